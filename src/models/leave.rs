use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::authz::Role;
use crate::errors::AppError;
use crate::events::Loggable;

/// Leave lifecycle. `approved` and `rejected` are terminal: a resolved
/// request can never transition again, re-submission means a new request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum LeaveStatus {
    Pending,
    Approved,
    Rejected,
}

impl LeaveStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            LeaveStatus::Pending => "pending",
            LeaveStatus::Approved => "approved",
            LeaveStatus::Rejected => "rejected",
        }
    }

    pub fn parse(s: &str) -> Option<LeaveStatus> {
        match s {
            "pending" => Some(LeaveStatus::Pending),
            "approved" => Some(LeaveStatus::Approved),
            "rejected" => Some(LeaveStatus::Rejected),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, LeaveStatus::Pending)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct LeaveRequest {
    pub id: Uuid,
    pub employee_id: Uuid,
    pub leave_type: String,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub reason: Option<String>,
    pub status: LeaveStatus,
    pub approved_by: Option<Uuid>,
    pub approved_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Loggable for LeaveRequest {
    fn entity_type() -> &'static str { "leave" }
    fn subject_id(&self) -> Uuid { self.id }
}

#[derive(Debug, Clone, FromRow)]
pub struct DbLeaveRequest {
    pub id: Uuid,
    pub employee_id: Uuid,
    pub leave_type: String,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub reason: Option<String>,
    pub status: String,
    pub approved_by: Option<Uuid>,
    pub approved_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TryFrom<DbLeaveRequest> for LeaveRequest {
    type Error = AppError;

    fn try_from(value: DbLeaveRequest) -> Result<Self, Self::Error> {
        let status = LeaveStatus::parse(&value.status)
            .ok_or_else(|| AppError::internal(format!("unknown leave status: {}", value.status)))?;

        Ok(LeaveRequest {
            id: value.id,
            employee_id: value.employee_id,
            leave_type: value.leave_type,
            start_date: value.start_date,
            end_date: value.end_date,
            reason: value.reason,
            status,
            approved_by: value.approved_by,
            approved_at: value.approved_at,
            created_at: value.created_at,
            updated_at: value.updated_at,
        })
    }
}

/// Append-only comment; the author's role is captured at write time because
/// roles can change afterwards.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct LeaveComment {
    pub id: Uuid,
    pub leave_id: Uuid,
    pub author_id: Uuid,
    pub author_role: Role,
    pub body: String,
    pub created_at: DateTime<Utc>,
}

impl Loggable for LeaveComment {
    fn entity_type() -> &'static str { "leave_comment" }
    fn subject_id(&self) -> Uuid { self.leave_id }
}

#[derive(Debug, Clone, FromRow)]
pub struct DbLeaveComment {
    pub id: Uuid,
    pub leave_id: Uuid,
    pub author_id: Uuid,
    pub author_role: String,
    pub body: String,
    pub created_at: DateTime<Utc>,
}

impl TryFrom<DbLeaveComment> for LeaveComment {
    type Error = AppError;

    fn try_from(value: DbLeaveComment) -> Result<Self, Self::Error> {
        let author_role = Role::parse(&value.author_role)
            .ok_or_else(|| AppError::internal(format!("unknown role on comment: {}", value.author_role)))?;

        Ok(LeaveComment {
            id: value.id,
            leave_id: value.leave_id,
            author_id: value.author_id,
            author_role,
            body: value.body,
            created_at: value.created_at,
        })
    }
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct LeaveCreateRequest {
    /// Omitted: the request is filed for the caller. Privileged roles may
    /// file on behalf of another employee.
    pub employee_id: Option<Uuid>,
    #[schema(example = "sick")]
    pub leave_type: String,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub reason: Option<String>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct LeaveCommentRequest {
    pub body: String,
}
