use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::authz::Role;
use crate::errors::AppError;
use crate::events::Loggable;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    InProgress,
    Completed,
    Cancelled,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::InProgress => "in_progress",
            TaskStatus::Completed => "completed",
            TaskStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Option<TaskStatus> {
        match s {
            "pending" => Some(TaskStatus::Pending),
            "in_progress" => Some(TaskStatus::InProgress),
            "completed" => Some(TaskStatus::Completed),
            "cancelled" => Some(TaskStatus::Cancelled),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum TaskPriority {
    Low,
    Medium,
    High,
}

impl TaskPriority {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskPriority::Low => "low",
            TaskPriority::Medium => "medium",
            TaskPriority::High => "high",
        }
    }

    pub fn parse(s: &str) -> Option<TaskPriority> {
        match s {
            "low" => Some(TaskPriority::Low),
            "medium" => Some(TaskPriority::Medium),
            "high" => Some(TaskPriority::High),
            _ => None,
        }
    }
}

/// Lifecycle of a status-change request. All three non-pending states are
/// terminal; siblings on the same task are resolved independently.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum RequestStatus {
    Pending,
    Approved,
    Rejected,
    Reassigned,
}

impl RequestStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RequestStatus::Pending => "pending",
            RequestStatus::Approved => "approved",
            RequestStatus::Rejected => "rejected",
            RequestStatus::Reassigned => "reassigned",
        }
    }

    pub fn parse(s: &str) -> Option<RequestStatus> {
        match s {
            "pending" => Some(RequestStatus::Pending),
            "approved" => Some(RequestStatus::Approved),
            "rejected" => Some(RequestStatus::Rejected),
            "reassigned" => Some(RequestStatus::Reassigned),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Task {
    pub id: Uuid,
    pub title: String,
    pub description: Option<String>,
    pub status: TaskStatus,
    pub priority: TaskPriority,
    pub deadline: Option<DateTime<Utc>>,
    pub progress: i32,
    pub created_by: Uuid,
    pub assignee_ids: Vec<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl Loggable for Task {
    fn entity_type() -> &'static str { "task" }
    fn subject_id(&self) -> Uuid { self.id }
}

#[derive(Debug, Clone, FromRow)]
pub struct DbTask {
    pub id: Uuid,
    pub title: String,
    pub description: Option<String>,
    pub status: String,
    pub priority: String,
    pub deadline: Option<DateTime<Utc>>,
    pub progress: i32,
    pub created_by: Uuid,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl DbTask {
    pub fn into_task(self, assignee_ids: Vec<Uuid>) -> Result<Task, AppError> {
        let status = TaskStatus::parse(&self.status)
            .ok_or_else(|| AppError::internal(format!("unknown task status: {}", self.status)))?;
        let priority = TaskPriority::parse(&self.priority)
            .ok_or_else(|| AppError::internal(format!("unknown task priority: {}", self.priority)))?;

        Ok(Task {
            id: self.id,
            title: self.title,
            description: self.description,
            status,
            priority,
            deadline: self.deadline,
            progress: self.progress,
            created_by: self.created_by,
            assignee_ids,
            created_at: self.created_at,
            updated_at: self.updated_at,
            deleted_at: self.deleted_at,
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Subtask {
    pub id: Uuid,
    pub task_id: Uuid,
    pub title: String,
    pub status: TaskStatus,
    pub progress: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Loggable for Subtask {
    fn entity_type() -> &'static str { "subtask" }
    fn subject_id(&self) -> Uuid { self.task_id }
}

#[derive(Debug, Clone, FromRow)]
pub struct DbSubtask {
    pub id: Uuid,
    pub task_id: Uuid,
    pub title: String,
    pub status: String,
    pub progress: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TryFrom<DbSubtask> for Subtask {
    type Error = AppError;

    fn try_from(value: DbSubtask) -> Result<Self, Self::Error> {
        let status = TaskStatus::parse(&value.status)
            .ok_or_else(|| AppError::internal(format!("unknown subtask status: {}", value.status)))?;

        Ok(Subtask {
            id: value.id,
            task_id: value.task_id,
            title: value.title,
            status,
            progress: value.progress,
            created_at: value.created_at,
            updated_at: value.updated_at,
        })
    }
}

/// A proposed status transition awaiting countersignature. The task keeps its
/// previous status until a request is approved.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct StatusChangeRequest {
    pub id: Uuid,
    pub task_id: Uuid,
    pub requested_by: Uuid,
    pub current_status: TaskStatus,
    pub requested_status: TaskStatus,
    pub status: RequestStatus,
    pub resolved_by: Option<Uuid>,
    pub resolution_comment: Option<String>,
    pub reassigned_to: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
}

impl Loggable for StatusChangeRequest {
    fn entity_type() -> &'static str { "status_request" }
    fn subject_id(&self) -> Uuid { self.task_id }
}

#[derive(Debug, Clone, FromRow)]
pub struct DbStatusChangeRequest {
    pub id: Uuid,
    pub task_id: Uuid,
    pub requested_by: Uuid,
    pub current_status: String,
    pub requested_status: String,
    pub status: String,
    pub resolved_by: Option<Uuid>,
    pub resolution_comment: Option<String>,
    pub reassigned_to: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
}

impl TryFrom<DbStatusChangeRequest> for StatusChangeRequest {
    type Error = AppError;

    fn try_from(value: DbStatusChangeRequest) -> Result<Self, Self::Error> {
        let current_status = TaskStatus::parse(&value.current_status)
            .ok_or_else(|| AppError::internal(format!("unknown task status: {}", value.current_status)))?;
        let requested_status = TaskStatus::parse(&value.requested_status)
            .ok_or_else(|| AppError::internal(format!("unknown task status: {}", value.requested_status)))?;
        let status = RequestStatus::parse(&value.status)
            .ok_or_else(|| AppError::internal(format!("unknown request status: {}", value.status)))?;

        Ok(StatusChangeRequest {
            id: value.id,
            task_id: value.task_id,
            requested_by: value.requested_by,
            current_status,
            requested_status,
            status,
            resolved_by: value.resolved_by,
            resolution_comment: value.resolution_comment,
            reassigned_to: value.reassigned_to,
            created_at: value.created_at,
            resolved_at: value.resolved_at,
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct TaskComment {
    pub id: Uuid,
    pub task_id: Uuid,
    pub author_id: Uuid,
    pub author_role: Role,
    pub body: String,
    pub created_at: DateTime<Utc>,
}

impl Loggable for TaskComment {
    fn entity_type() -> &'static str { "task_comment" }
    fn subject_id(&self) -> Uuid { self.task_id }
}

#[derive(Debug, Clone, FromRow)]
pub struct DbTaskComment {
    pub id: Uuid,
    pub task_id: Uuid,
    pub author_id: Uuid,
    pub author_role: String,
    pub body: String,
    pub created_at: DateTime<Utc>,
}

impl TryFrom<DbTaskComment> for TaskComment {
    type Error = AppError;

    fn try_from(value: DbTaskComment) -> Result<Self, Self::Error> {
        let author_role = Role::parse(&value.author_role)
            .ok_or_else(|| AppError::internal(format!("unknown role on comment: {}", value.author_role)))?;

        Ok(TaskComment {
            id: value.id,
            task_id: value.task_id,
            author_id: value.author_id,
            author_role,
            body: value.body,
            created_at: value.created_at,
        })
    }
}

#[derive(Debug, Serialize, ToSchema)]
pub struct TaskDetail {
    pub task: Task,
    pub subtasks: Vec<Subtask>,
    pub comments: Vec<TaskComment>,
    pub status_requests: Vec<StatusChangeRequest>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct TaskCreateRequest {
    #[schema(example = "Prepare onboarding checklist")]
    pub title: String,
    pub description: Option<String>,
    pub priority: Option<TaskPriority>,
    pub deadline: Option<DateTime<Utc>>,
    #[serde(default)]
    pub assignee_ids: Vec<Uuid>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct TaskUpdateRequest {
    pub title: Option<String>,
    pub description: Option<String>,
    pub status: Option<TaskStatus>,
    pub priority: Option<TaskPriority>,
    pub deadline: Option<DateTime<Utc>>,
    pub progress: Option<i32>,
    pub assignee_ids: Option<Vec<Uuid>>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct SubtaskCreateRequest {
    pub title: String,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct SubtaskUpdateRequest {
    pub title: Option<String>,
    pub status: Option<TaskStatus>,
    pub progress: Option<i32>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct StatusRequestCreate {
    pub requested_status: TaskStatus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum ResolveAction {
    Approve,
    Reject,
    Reassign,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct StatusRequestResolve {
    pub action: ResolveAction,
    /// Required when `action` is `reassign`.
    pub reassign_to: Option<Uuid>,
    /// Optional verification note recorded on the resolution.
    pub comment: Option<String>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct TaskCommentRequest {
    pub body: String,
}
