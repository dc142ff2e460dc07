use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::errors::AppError;
use crate::events::Loggable;

/// A single earning or deduction line. Amounts are whole currency units.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct PayslipLine {
    #[schema(example = "Basic Salary")]
    pub label: String,
    #[schema(example = 42000)]
    pub amount: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Payslip {
    pub id: Uuid,
    pub employee_id: Uuid,
    /// Calendar month in `YYYY-MM` form; one payslip per employee per month.
    pub payslip_month: String,
    pub earnings: Vec<PayslipLine>,
    pub deductions: Vec<PayslipLine>,
    pub total_earnings: i64,
    pub total_deductions: i64,
    pub net_pay: i64,
    pub net_pay_words: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Loggable for Payslip {
    fn entity_type() -> &'static str { "payslip" }
    fn subject_id(&self) -> Uuid { self.id }
}

#[derive(Debug, Clone, FromRow)]
pub struct DbPayslip {
    pub id: Uuid,
    pub employee_id: Uuid,
    pub payslip_month: String,
    pub earnings: String,
    pub deductions: String,
    pub total_earnings: i64,
    pub total_deductions: i64,
    pub net_pay: i64,
    pub net_pay_words: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TryFrom<DbPayslip> for Payslip {
    type Error = AppError;

    fn try_from(value: DbPayslip) -> Result<Self, Self::Error> {
        let earnings: Vec<PayslipLine> = serde_json::from_str(&value.earnings)
            .map_err(|err| AppError::internal(format!("corrupt earnings column: {err}")))?;
        let deductions: Vec<PayslipLine> = serde_json::from_str(&value.deductions)
            .map_err(|err| AppError::internal(format!("corrupt deductions column: {err}")))?;

        Ok(Payslip {
            id: value.id,
            employee_id: value.employee_id,
            payslip_month: value.payslip_month,
            earnings,
            deductions,
            total_earnings: value.total_earnings,
            total_deductions: value.total_deductions,
            net_pay: value.net_pay,
            net_pay_words: value.net_pay_words,
            created_at: value.created_at,
            updated_at: value.updated_at,
        })
    }
}

/// Totals are never accepted from the client; they are recomputed from the
/// line items on every write.
#[derive(Debug, Deserialize, ToSchema)]
pub struct PayslipCreateRequest {
    pub employee_id: Uuid,
    #[schema(example = "2025-03")]
    pub payslip_month: String,
    pub earnings: Vec<PayslipLine>,
    #[serde(default)]
    pub deductions: Vec<PayslipLine>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct PayslipUpdateRequest {
    pub earnings: Option<Vec<PayslipLine>>,
    pub deductions: Option<Vec<PayslipLine>>,
}
