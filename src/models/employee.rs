use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::authz::Role;
use crate::errors::AppError;
use crate::events::{Loggable, Severity};

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Employee {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    pub role: Role,
    pub department: Option<String>,
    pub phone: Option<String>,
    /// Reporting line. Manager-scoped access to this employee's records is
    /// derived from this back-reference on every request.
    pub manager_id: Option<Uuid>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl Loggable for Employee {
    fn entity_type() -> &'static str { "employee" }
    fn subject_id(&self) -> Uuid { self.id }
    fn severity(&self) -> Severity { Severity::Critical }
}

#[derive(Debug, Clone, FromRow)]
pub struct DbEmployee {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    pub password_hash: String,
    pub role: String,
    pub department: Option<String>,
    pub phone: Option<String>,
    pub manager_id: Option<Uuid>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl TryFrom<DbEmployee> for Employee {
    type Error = AppError;

    fn try_from(value: DbEmployee) -> Result<Self, Self::Error> {
        let role = Role::parse(&value.role)
            .ok_or_else(|| AppError::internal(format!("unknown role in employee record: {}", value.role)))?;

        Ok(Employee {
            id: value.id,
            name: value.name,
            email: value.email,
            role,
            department: value.department,
            phone: value.phone,
            manager_id: value.manager_id,
            is_active: value.is_active,
            created_at: value.created_at,
            updated_at: value.updated_at,
            deleted_at: value.deleted_at,
        })
    }
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct RegisterRequest {
    #[schema(example = "Ada Lovelace")]
    pub name: String,
    #[schema(example = "ada@example.com")]
    pub email: String,
    #[schema(example = "S3cureP@ssw0rd")]
    pub password: String,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct LoginRequest {
    #[schema(example = "ada@example.com")]
    pub email: String,
    #[schema(example = "S3cureP@ssw0rd")]
    pub password: String,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct AuthResponse {
    pub token: String,
    pub user: Employee,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct EmployeeCreateRequest {
    pub name: String,
    pub email: String,
    pub password: String,
    pub role: Option<Role>,
    pub department: Option<String>,
    pub phone: Option<String>,
    pub manager_id: Option<Uuid>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct EmployeeUpdateRequest {
    pub name: Option<String>,
    pub phone: Option<String>,
    // Fields below require the employee-manage allow-list; a self-edit
    // submitting any of them is rejected.
    pub email: Option<String>,
    pub role: Option<Role>,
    pub department: Option<String>,
    pub manager_id: Option<Uuid>,
    pub is_active: Option<bool>,
}

impl EmployeeUpdateRequest {
    /// True when only the self-editable subset (name, phone) is present.
    pub fn is_self_scope(&self) -> bool {
        self.email.is_none()
            && self.role.is_none()
            && self.department.is_none()
            && self.manager_id.is_none()
            && self.is_active.is_none()
    }
}
