//! Entity access guards. Each guard layers an ownership or reporting-line
//! check on top of the permission predicate and returns `Forbidden` on
//! failure; callers resolve the target first, so a missing entity is already
//! `NotFound` by the time a guard runs.

use sqlx::SqlitePool;
use uuid::Uuid;

use super::{allow, has_permission, Principal, Role};
use crate::errors::{AppError, AppResult};

fn deny(principal: &Principal, action: &str) -> AppError {
    tracing::debug!(
        user_id = %principal.id,
        role = %principal.role,
        action = action,
        "access denied"
    );
    AppError::forbidden(format!("{} is not permitted for role {}", action, principal.role))
}

/// Plain allow-list check with a uniform denial message.
pub fn ensure_role(principal: &Principal, allowed: &[Role], action: &str) -> AppResult<()> {
    if has_permission(Some(principal.role), allowed) {
        return Ok(());
    }
    Err(deny(principal, action))
}

/// Self, privileged roles, or a Manager whose report the target currently is.
pub async fn ensure_employee_view(
    pool: &SqlitePool,
    principal: &Principal,
    target_id: Uuid,
) -> AppResult<()> {
    if principal.id == target_id
        || has_permission(Some(principal.role), allow::EMPLOYEE_MANAGERS)
    {
        return Ok(());
    }
    if principal.is(Role::Manager) && principal.manages(pool, target_id).await? {
        return Ok(());
    }
    Err(deny(principal, "viewing this employee record"))
}

pub fn ensure_employee_manage(principal: &Principal) -> AppResult<()> {
    ensure_role(principal, allow::EMPLOYEE_MANAGERS, "managing employee records")
}

/// Owner, blanket approver roles, or the requester's current manager.
pub async fn ensure_leave_view(
    pool: &SqlitePool,
    principal: &Principal,
    owner_id: Uuid,
) -> AppResult<()> {
    if principal.id == owner_id
        || has_permission(Some(principal.role), allow::LEAVE_APPROVERS)
    {
        return Ok(());
    }
    if principal.is(Role::Manager) && principal.manages(pool, owner_id).await? {
        return Ok(());
    }
    Err(deny(principal, "viewing this leave request"))
}

/// Approve/reject rights: HR, Super Admin, Admin, or the requester's manager.
/// The reporting line is re-read here, never taken from the caller.
pub async fn ensure_leave_resolve(
    pool: &SqlitePool,
    principal: &Principal,
    owner_id: Uuid,
) -> AppResult<()> {
    if has_permission(Some(principal.role), allow::LEAVE_APPROVERS) {
        return Ok(());
    }
    if principal.is(Role::Manager) && principal.manages(pool, owner_id).await? {
        return Ok(());
    }
    Err(deny(principal, "resolving this leave request"))
}

pub async fn is_task_assignee(
    pool: &SqlitePool,
    task_id: Uuid,
    employee_id: Uuid,
) -> AppResult<bool> {
    let assigned: bool = sqlx::query_scalar(
        "SELECT EXISTS(SELECT 1 FROM task_assignees WHERE task_id = ? AND employee_id = ?)",
    )
    .bind(task_id)
    .bind(employee_id)
    .fetch_one(pool)
    .await?;

    Ok(assigned)
}

pub fn ensure_task_edit(principal: &Principal) -> AppResult<()> {
    ensure_role(principal, allow::TASK_EDITORS, "editing tasks")
}

pub async fn ensure_task_view(
    pool: &SqlitePool,
    principal: &Principal,
    task_id: Uuid,
) -> AppResult<()> {
    if has_permission(Some(principal.role), allow::TASK_EDITORS) {
        return Ok(());
    }
    if is_task_assignee(pool, task_id, principal.id).await? {
        return Ok(());
    }
    Err(deny(principal, "viewing this task"))
}

/// Payslip access: privileged roles only, Manager only for direct reports.
/// The same rule covers view and update; delete is narrower.
pub async fn ensure_payslip_access(
    pool: &SqlitePool,
    principal: &Principal,
    owner_id: Uuid,
) -> AppResult<()> {
    if !has_permission(Some(principal.role), allow::PAYSLIP_VIEWERS) {
        return Err(deny(principal, "accessing payslips"));
    }
    if principal.is(Role::Manager) && !principal.manages(pool, owner_id).await? {
        return Err(deny(principal, "accessing payslips outside own reports"));
    }
    Ok(())
}

pub fn ensure_payslip_delete(principal: &Principal) -> AppResult<()> {
    ensure_role(principal, allow::PAYSLIP_DELETERS, "deleting payslips")
}

/// Ratings may be submitted by the employee themself or by their current
/// manager on their behalf.
pub async fn ensure_kra_submit(
    pool: &SqlitePool,
    principal: &Principal,
    target_id: Uuid,
) -> AppResult<()> {
    if principal.id == target_id {
        return Ok(());
    }
    if principal.is(Role::Manager) && principal.manages(pool, target_id).await? {
        return Ok(());
    }
    Err(deny(principal, "submitting ratings for this employee"))
}

pub async fn ensure_kra_view(
    pool: &SqlitePool,
    principal: &Principal,
    target_id: Uuid,
) -> AppResult<()> {
    if principal.id == target_id
        || has_permission(Some(principal.role), allow::KRA_REVIEWERS)
    {
        return Ok(());
    }
    if principal.is(Role::Manager) && principal.manages(pool, target_id).await? {
        return Ok(());
    }
    Err(deny(principal, "viewing ratings for this employee"))
}
