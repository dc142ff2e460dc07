use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::Json;
use serde::Deserialize;
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::app::AppState;
use crate::authz::guards::{ensure_leave_resolve, ensure_leave_view};
use crate::authz::{allow, has_permission, Principal, Role};
use crate::errors::{AppError, AppResult};
use crate::events::{log_activity_with_context, RequestContext};
use crate::jwt::AuthUser;
use crate::models::leave::{
    DbLeaveComment, DbLeaveRequest, LeaveComment, LeaveCommentRequest, LeaveCreateRequest,
    LeaveRequest, LeaveStatus,
};
use crate::utils::utc_now;

const SELECT_LEAVE: &str = "SELECT id, employee_id, leave_type, start_date, end_date, reason, status, approved_by, approved_at, created_at, updated_at FROM leave_requests";

#[derive(Debug, Deserialize)]
pub struct LeaveListQuery {
    pub status: Option<LeaveStatus>,
    pub employee_id: Option<Uuid>,
}

#[utoipa::path(
    get,
    path = "/leaves",
    tag = "Leaves",
    responses((status = 200, description = "List leave requests visible to the caller", body = [LeaveRequest]))
)]
pub async fn list_leaves(
    State(state): State<AppState>,
    Query(query): Query<LeaveListQuery>,
    auth: AuthUser,
) -> AppResult<Json<Vec<LeaveRequest>>> {
    let principal = Principal::load(&state.pool, auth.user_id).await?;

    let mut sql = if has_permission(Some(principal.role), allow::LEAVE_APPROVERS) {
        format!("{SELECT_LEAVE} WHERE 1 = 1")
    } else if principal.is(Role::Manager) {
        format!(
            "{SELECT_LEAVE} WHERE (employee_id = ? OR employee_id IN (SELECT id FROM employees WHERE manager_id = ? AND deleted_at IS NULL))"
        )
    } else {
        format!("{SELECT_LEAVE} WHERE employee_id = ?")
    };

    if query.status.is_some() {
        sql.push_str(" AND status = ?");
    }
    if query.employee_id.is_some() {
        sql.push_str(" AND employee_id = ?");
    }
    sql.push_str(" ORDER BY created_at DESC");

    let mut q = sqlx::query_as::<_, DbLeaveRequest>(&sql);
    if has_permission(Some(principal.role), allow::LEAVE_APPROVERS) {
        // no scope binds
    } else if principal.is(Role::Manager) {
        q = q.bind(principal.id).bind(principal.id);
    } else {
        q = q.bind(principal.id);
    }
    if let Some(status) = query.status {
        q = q.bind(status.as_str());
    }
    if let Some(employee_id) = query.employee_id {
        q = q.bind(employee_id);
    }

    let rows = q.fetch_all(&state.pool).await?;
    let leaves: Vec<LeaveRequest> = rows
        .into_iter()
        .map(LeaveRequest::try_from)
        .collect::<Result<_, _>>()?;

    Ok(Json(leaves))
}

#[utoipa::path(
    post,
    path = "/leaves",
    tag = "Leaves",
    request_body = LeaveCreateRequest,
    responses((status = 201, description = "Leave request filed", body = LeaveRequest))
)]
pub async fn create_leave(
    State(state): State<AppState>,
    auth: AuthUser,
    headers: HeaderMap,
    Json(payload): Json<LeaveCreateRequest>,
) -> AppResult<(StatusCode, Json<LeaveRequest>)> {
    let principal = Principal::load(&state.pool, auth.user_id).await?;

    let target_id = payload.employee_id.unwrap_or(principal.id);
    if target_id != principal.id && !has_permission(Some(principal.role), allow::LEAVE_APPROVERS) {
        return Err(AppError::forbidden("cannot file leave on behalf of another employee"));
    }

    if payload.end_date < payload.start_date {
        return Err(AppError::bad_request("end_date must be >= start_date"));
    }
    if payload.leave_type.trim().is_empty() {
        return Err(AppError::bad_request("leave_type must not be empty"));
    }

    let target_exists: bool = sqlx::query_scalar(
        "SELECT EXISTS(SELECT 1 FROM employees WHERE id = ? AND deleted_at IS NULL)",
    )
    .bind(target_id)
    .fetch_one(&state.pool)
    .await?;
    if !target_exists {
        return Err(AppError::not_found("employee not found"));
    }

    let leave_id = Uuid::new_v4();
    let now = utc_now();

    sqlx::query(
        "INSERT INTO leave_requests (id, employee_id, leave_type, start_date, end_date, reason, status, created_at, updated_at) \
         VALUES (?, ?, ?, ?, ?, ?, 'pending', ?, ?)",
    )
    .bind(leave_id)
    .bind(target_id)
    .bind(&payload.leave_type)
    .bind(payload.start_date)
    .bind(payload.end_date)
    .bind(&payload.reason)
    .bind(now)
    .bind(now)
    .execute(&state.pool)
    .await?;

    let leave: LeaveRequest = fetch_leave(&state.pool, leave_id).await?.try_into()?;

    let ctx = RequestContext::from_headers(&headers);
    log_activity_with_context(&state.event_bus, "created", Some(principal.id), &leave, None, Some(ctx));

    Ok((StatusCode::CREATED, Json(leave)))
}

#[utoipa::path(
    get,
    path = "/leaves/{id}",
    tag = "Leaves",
    params(("id" = Uuid, Path, description = "Leave request id")),
    responses((status = 200, description = "Leave request detail", body = LeaveRequest))
)]
pub async fn get_leave(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(id): Path<Uuid>,
) -> AppResult<Json<LeaveRequest>> {
    let principal = Principal::load(&state.pool, auth.user_id).await?;
    let db_leave = fetch_leave(&state.pool, id).await?;
    ensure_leave_view(&state.pool, &principal, db_leave.employee_id).await?;

    let leave: LeaveRequest = db_leave.try_into()?;
    Ok(Json(leave))
}

#[utoipa::path(
    post,
    path = "/leaves/{id}/approve",
    tag = "Leaves",
    params(("id" = Uuid, Path, description = "Leave request id")),
    responses(
        (status = 200, description = "Leave approved", body = LeaveRequest),
        (status = 409, description = "Request already resolved")
    )
)]
pub async fn approve_leave(
    State(state): State<AppState>,
    auth: AuthUser,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
) -> AppResult<Json<LeaveRequest>> {
    resolve_leave(state, auth, headers, id, LeaveStatus::Approved).await
}

#[utoipa::path(
    post,
    path = "/leaves/{id}/reject",
    tag = "Leaves",
    params(("id" = Uuid, Path, description = "Leave request id")),
    responses(
        (status = 200, description = "Leave rejected", body = LeaveRequest),
        (status = 409, description = "Request already resolved")
    )
)]
pub async fn reject_leave(
    State(state): State<AppState>,
    auth: AuthUser,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
) -> AppResult<Json<LeaveRequest>> {
    resolve_leave(state, auth, headers, id, LeaveStatus::Rejected).await
}

/// Shared approve/reject path. The terminal transition is a conditional
/// update on `status = 'pending'`: when two approvers race, exactly one
/// update matches and the loser sees the row already resolved.
async fn resolve_leave(
    state: AppState,
    auth: AuthUser,
    headers: HeaderMap,
    id: Uuid,
    to: LeaveStatus,
) -> AppResult<Json<LeaveRequest>> {
    let principal = Principal::load(&state.pool, auth.user_id).await?;
    let db_leave = fetch_leave(&state.pool, id).await?;

    // Terminal states are reported as conflicts before the guard runs, so a
    // stale retry gets 409 rather than 403 regardless of who sends it.
    let old: LeaveRequest = db_leave.clone().try_into()?;
    if old.status.is_terminal() {
        return Err(AppError::conflict(format!(
            "leave request is already {}",
            old.status.as_str()
        )));
    }

    ensure_leave_resolve(&state.pool, &principal, db_leave.employee_id).await?;

    let now = utc_now();
    let affected = sqlx::query(
        "UPDATE leave_requests SET status = ?, approved_by = ?, approved_at = ?, updated_at = ? \
         WHERE id = ? AND status = 'pending'",
    )
    .bind(to.as_str())
    .bind(principal.id)
    .bind(now)
    .bind(now)
    .bind(id)
    .execute(&state.pool)
    .await?;

    if affected.rows_affected() == 0 {
        // Lost a concurrent resolution race.
        return Err(AppError::conflict("leave request was resolved concurrently"));
    }

    let leave: LeaveRequest = fetch_leave(&state.pool, id).await?.try_into()?;

    let action = match to {
        LeaveStatus::Approved => "approved",
        _ => "rejected",
    };
    let ctx = RequestContext::from_headers(&headers);
    log_activity_with_context(&state.event_bus, action, Some(principal.id), &leave, Some(&old), Some(ctx));

    Ok(Json(leave))
}

#[utoipa::path(
    get,
    path = "/leaves/{id}/comments",
    tag = "Leaves",
    params(("id" = Uuid, Path, description = "Leave request id")),
    responses((status = 200, description = "Comments on the request", body = [LeaveComment]))
)]
pub async fn list_comments(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(id): Path<Uuid>,
) -> AppResult<Json<Vec<LeaveComment>>> {
    let principal = Principal::load(&state.pool, auth.user_id).await?;
    let db_leave = fetch_leave(&state.pool, id).await?;
    ensure_leave_view(&state.pool, &principal, db_leave.employee_id).await?;

    let rows = sqlx::query_as::<_, DbLeaveComment>(
        "SELECT id, leave_id, author_id, author_role, body, created_at FROM leave_comments WHERE leave_id = ? ORDER BY created_at",
    )
    .bind(id)
    .fetch_all(&state.pool)
    .await?;

    let comments: Vec<LeaveComment> = rows
        .into_iter()
        .map(LeaveComment::try_from)
        .collect::<Result<_, _>>()?;

    Ok(Json(comments))
}

#[utoipa::path(
    post,
    path = "/leaves/{id}/comments",
    tag = "Leaves",
    params(("id" = Uuid, Path, description = "Leave request id")),
    request_body = LeaveCommentRequest,
    responses((status = 201, description = "Comment appended", body = LeaveComment))
)]
pub async fn add_comment(
    State(state): State<AppState>,
    auth: AuthUser,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
    Json(payload): Json<LeaveCommentRequest>,
) -> AppResult<(StatusCode, Json<LeaveComment>)> {
    let principal = Principal::load(&state.pool, auth.user_id).await?;
    let db_leave = fetch_leave(&state.pool, id).await?;
    // Comments follow the view rule and are allowed in any state, terminal
    // included; they never transition the request.
    ensure_leave_view(&state.pool, &principal, db_leave.employee_id).await?;

    if payload.body.trim().is_empty() {
        return Err(AppError::bad_request("comment body must not be empty"));
    }

    let comment_id = Uuid::new_v4();
    let now = utc_now();

    sqlx::query(
        "INSERT INTO leave_comments (id, leave_id, author_id, author_role, body, created_at) VALUES (?, ?, ?, ?, ?, ?)",
    )
    .bind(comment_id)
    .bind(id)
    .bind(principal.id)
    .bind(principal.role.as_str())
    .bind(&payload.body)
    .bind(now)
    .execute(&state.pool)
    .await?;

    let comment = LeaveComment {
        id: comment_id,
        leave_id: id,
        author_id: principal.id,
        author_role: principal.role,
        body: payload.body,
        created_at: now,
    };

    let ctx = RequestContext::from_headers(&headers);
    log_activity_with_context(&state.event_bus, "created", Some(principal.id), &comment, None, Some(ctx));

    Ok((StatusCode::CREATED, Json(comment)))
}

async fn fetch_leave(pool: &SqlitePool, id: Uuid) -> AppResult<DbLeaveRequest> {
    let sql = format!("{SELECT_LEAVE} WHERE id = ?");
    sqlx::query_as::<_, DbLeaveRequest>(&sql)
        .bind(id)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| AppError::not_found("leave request not found"))
}
