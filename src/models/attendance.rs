use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::errors::AppError;
use crate::events::{Loggable, Severity};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum AttendanceStatus {
    Present,
    HalfDay,
}

impl AttendanceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AttendanceStatus::Present => "present",
            AttendanceStatus::HalfDay => "half_day",
        }
    }

    pub fn parse(s: &str) -> Option<AttendanceStatus> {
        match s {
            "present" => Some(AttendanceStatus::Present),
            "half_day" => Some(AttendanceStatus::HalfDay),
            _ => None,
        }
    }
}

/// One record per employee per workday, written by check-in/check-out.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Attendance {
    pub id: Uuid,
    pub employee_id: Uuid,
    pub work_date: NaiveDate,
    pub check_in: DateTime<Utc>,
    pub check_out: Option<DateTime<Utc>>,
    pub status: AttendanceStatus,
    pub note: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Loggable for Attendance {
    fn entity_type() -> &'static str { "attendance" }
    fn subject_id(&self) -> Uuid { self.employee_id }
    fn severity(&self) -> Severity { Severity::Noise }
}

#[derive(Debug, Clone, FromRow)]
pub struct DbAttendance {
    pub id: Uuid,
    pub employee_id: Uuid,
    pub work_date: NaiveDate,
    pub check_in: DateTime<Utc>,
    pub check_out: Option<DateTime<Utc>>,
    pub status: String,
    pub note: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TryFrom<DbAttendance> for Attendance {
    type Error = AppError;

    fn try_from(value: DbAttendance) -> Result<Self, Self::Error> {
        let status = AttendanceStatus::parse(&value.status)
            .ok_or_else(|| AppError::internal(format!("unknown attendance status: {}", value.status)))?;

        Ok(Attendance {
            id: value.id,
            employee_id: value.employee_id,
            work_date: value.work_date,
            check_in: value.check_in,
            check_out: value.check_out,
            status,
            note: value.note,
            created_at: value.created_at,
            updated_at: value.updated_at,
        })
    }
}

#[derive(Debug, Default, Deserialize, ToSchema)]
pub struct CheckInRequest {
    pub note: Option<String>,
    pub status: Option<AttendanceStatus>,
}
