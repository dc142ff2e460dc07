use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::authz::Role;
use crate::errors::AppError;
use crate::events::{Loggable, Severity};

/// Rating collection period. The key format depends on the period type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum PeriodType {
    Monthly,
    Quarterly,
    Yearly,
}

impl PeriodType {
    pub fn as_str(&self) -> &'static str {
        match self {
            PeriodType::Monthly => "monthly",
            PeriodType::Quarterly => "quarterly",
            PeriodType::Yearly => "yearly",
        }
    }

    pub fn parse(s: &str) -> Option<PeriodType> {
        match s {
            "monthly" => Some(PeriodType::Monthly),
            "quarterly" => Some(PeriodType::Quarterly),
            "yearly" => Some(PeriodType::Yearly),
            _ => None,
        }
    }

    /// Validates a period key against this type: `YYYY-MM`, `YYYY-Qn`, or
    /// `YYYY`.
    pub fn valid_key(&self, key: &str) -> bool {
        match self {
            PeriodType::Monthly => crate::utils::valid_month_key(key),
            PeriodType::Quarterly => {
                let Some((year, quarter)) = key.split_once("-Q") else {
                    return false;
                };
                year.len() == 4
                    && year.chars().all(|c| c.is_ascii_digit())
                    && matches!(quarter, "1" | "2" | "3" | "4")
            }
            PeriodType::Yearly => key.len() == 4 && key.chars().all(|c| c.is_ascii_digit()),
        }
    }
}

/// Per-KPI template block inside a KRA definition.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct KpiSpec {
    #[schema(example = "95% sprint commitment delivered")]
    pub target: String,
    #[schema(example = "1-5")]
    pub scale: String,
    pub rating_labels: Vec<String>,
}

/// Role-scoped rating template. Submissions are validated against the
/// target employee's role, so cross-role submission is impossible.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct KraDefinition {
    pub id: Uuid,
    pub role: Role,
    pub kra_number: i32,
    pub kra_name: String,
    pub weight_percentage: i32,
    pub kpi_1: Option<KpiSpec>,
    pub kpi_2: Option<KpiSpec>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Loggable for KraDefinition {
    fn entity_type() -> &'static str { "kra_definition" }
    fn subject_id(&self) -> Uuid { self.id }
    fn severity(&self) -> Severity { Severity::Critical }
}

#[derive(Debug, Clone, FromRow)]
pub struct DbKraDefinition {
    pub id: Uuid,
    pub role: String,
    pub kra_number: i32,
    pub kra_name: String,
    pub weight_percentage: i32,
    pub kpi_1: Option<String>,
    pub kpi_2: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

fn parse_kpi(column: Option<String>) -> Result<Option<KpiSpec>, AppError> {
    column
        .map(|raw| {
            serde_json::from_str(&raw)
                .map_err(|err| AppError::internal(format!("corrupt kpi column: {err}")))
        })
        .transpose()
}

impl TryFrom<DbKraDefinition> for KraDefinition {
    type Error = AppError;

    fn try_from(value: DbKraDefinition) -> Result<Self, Self::Error> {
        let role = Role::parse(&value.role)
            .ok_or_else(|| AppError::internal(format!("unknown role on KRA definition: {}", value.role)))?;

        Ok(KraDefinition {
            id: value.id,
            role,
            kra_number: value.kra_number,
            kra_name: value.kra_name,
            weight_percentage: value.weight_percentage,
            kpi_1: parse_kpi(value.kpi_1)?,
            kpi_2: parse_kpi(value.kpi_2)?,
            created_at: value.created_at,
            updated_at: value.updated_at,
        })
    }
}

/// One rating per `(kra, employee, period)`; re-submission updates in place.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct KraSubmission {
    pub id: Uuid,
    pub kra_id: Uuid,
    pub employee_id: Uuid,
    pub period_type: PeriodType,
    pub period_key: String,
    pub rating: i32,
    pub comments: Option<String>,
    pub submitted_by: Uuid,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Loggable for KraSubmission {
    fn entity_type() -> &'static str { "kra_submission" }
    fn subject_id(&self) -> Uuid { self.employee_id }
}

#[derive(Debug, Clone, FromRow)]
pub struct DbKraSubmission {
    pub id: Uuid,
    pub kra_id: Uuid,
    pub employee_id: Uuid,
    pub period_type: String,
    pub period_key: String,
    pub rating: i32,
    pub comments: Option<String>,
    pub submitted_by: Uuid,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TryFrom<DbKraSubmission> for KraSubmission {
    type Error = AppError;

    fn try_from(value: DbKraSubmission) -> Result<Self, Self::Error> {
        let period_type = PeriodType::parse(&value.period_type)
            .ok_or_else(|| AppError::internal(format!("unknown period type: {}", value.period_type)))?;

        Ok(KraSubmission {
            id: value.id,
            kra_id: value.kra_id,
            employee_id: value.employee_id,
            period_type,
            period_key: value.period_key,
            rating: value.rating,
            comments: value.comments,
            submitted_by: value.submitted_by,
            created_at: value.created_at,
            updated_at: value.updated_at,
        })
    }
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct KraDefinitionCreateRequest {
    pub role: Role,
    pub kra_number: i32,
    pub kra_name: String,
    pub weight_percentage: i32,
    pub kpi_1: Option<KpiSpec>,
    pub kpi_2: Option<KpiSpec>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct KraRatingItem {
    pub kra_id: Uuid,
    #[schema(minimum = 1, maximum = 5)]
    pub rating: i32,
    pub comments: Option<String>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct KraSubmitRequest {
    /// Omitted: ratings are filed for the caller. A Manager may file for a
    /// direct report.
    pub employee_id: Option<Uuid>,
    pub period_type: PeriodType,
    #[schema(example = "2025-01")]
    pub period_key: String,
    pub ratings: Vec<KraRatingItem>,
}

#[derive(Debug, Clone, Serialize, FromRow, ToSchema)]
pub struct KpiDefinition {
    pub id: Uuid,
    pub metric_key: String,
    pub name: String,
    pub description: Option<String>,
}

/// A calculated aggregate, stale until the next calculate run overwrites it.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct KpiMetric {
    pub id: Uuid,
    pub definition_id: Uuid,
    pub period_type: PeriodType,
    pub period_start: NaiveDate,
    pub period_end: NaiveDate,
    pub value: f64,
    pub calculated_at: DateTime<Utc>,
}

impl Loggable for KpiMetric {
    fn entity_type() -> &'static str { "kpi_metric" }
    fn subject_id(&self) -> Uuid { self.definition_id }
}

#[derive(Debug, Clone, FromRow)]
pub struct DbKpiMetric {
    pub id: Uuid,
    pub definition_id: Uuid,
    pub period_type: String,
    pub period_start: NaiveDate,
    pub period_end: NaiveDate,
    pub value: f64,
    pub calculated_at: DateTime<Utc>,
}

impl TryFrom<DbKpiMetric> for KpiMetric {
    type Error = AppError;

    fn try_from(value: DbKpiMetric) -> Result<Self, Self::Error> {
        let period_type = PeriodType::parse(&value.period_type)
            .ok_or_else(|| AppError::internal(format!("unknown period type: {}", value.period_type)))?;

        Ok(KpiMetric {
            id: value.id,
            definition_id: value.definition_id,
            period_type,
            period_start: value.period_start,
            period_end: value.period_end,
            value: value.value,
            calculated_at: value.calculated_at,
        })
    }
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct MetricCalculateRequest {
    pub period_type: PeriodType,
    pub period_start: NaiveDate,
    pub period_end: NaiveDate,
}
