use sqlx::{FromRow, SqlitePool};
use uuid::Uuid;

use super::Role;
use crate::errors::{AppError, AppResult};

/// The authenticated caller, resolved from the employees table on every
/// request. Never cached across requests: role and reporting line can change
/// between two calls and stale authorization state is a correctness hazard.
#[derive(Debug, Clone)]
pub struct Principal {
    pub id: Uuid,
    pub role: Role,
    pub name: String,
    pub email: String,
}

#[derive(FromRow)]
struct PrincipalRow {
    id: Uuid,
    name: String,
    email: String,
    role: String,
}

impl Principal {
    pub async fn load(pool: &SqlitePool, user_id: Uuid) -> AppResult<Self> {
        let row = sqlx::query_as::<_, PrincipalRow>(
            "SELECT id, name, email, role FROM employees WHERE id = ? AND is_active = 1 AND deleted_at IS NULL",
        )
        .bind(user_id)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| AppError::unauthorized("account missing or deactivated"))?;

        let role = Role::parse(&row.role)
            .ok_or_else(|| AppError::internal(format!("unknown role in employee record: {}", row.role)))?;

        Ok(Principal {
            id: row.id,
            role,
            name: row.name,
            email: row.email,
        })
    }

    pub fn is(&self, role: Role) -> bool {
        self.role == role
    }

    /// True when `employee_id` currently reports to this principal. Re-reads
    /// the `manager_id` back-reference on every call.
    pub async fn manages(&self, pool: &SqlitePool, employee_id: Uuid) -> AppResult<bool> {
        let exists: bool = sqlx::query_scalar(
            "SELECT EXISTS(SELECT 1 FROM employees WHERE id = ? AND manager_id = ? AND deleted_at IS NULL)",
        )
        .bind(employee_id)
        .bind(self.id)
        .fetch_one(pool)
        .await?;

        Ok(exists)
    }
}
