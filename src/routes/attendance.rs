use axum::extract::{Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::Json;
use chrono::NaiveDate;
use serde::Deserialize;
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::app::AppState;
use crate::authz::guards::ensure_employee_view;
use crate::authz::Principal;
use crate::errors::{AppError, AppResult};
use crate::events::{log_activity_with_context, RequestContext};
use crate::jwt::AuthUser;
use crate::models::attendance::{Attendance, AttendanceStatus, CheckInRequest, DbAttendance};
use crate::utils::utc_now;

const SELECT_ATTENDANCE: &str = "SELECT id, employee_id, work_date, check_in, check_out, status, note, created_at, updated_at FROM attendance";

#[derive(Debug, Deserialize)]
pub struct AttendanceListQuery {
    pub employee_id: Option<Uuid>,
    pub from: Option<NaiveDate>,
    pub to: Option<NaiveDate>,
}

#[utoipa::path(
    get,
    path = "/attendance",
    tag = "Attendance",
    responses((status = 200, description = "Attendance records for an employee", body = [Attendance]))
)]
pub async fn list_attendance(
    State(state): State<AppState>,
    Query(query): Query<AttendanceListQuery>,
    auth: AuthUser,
) -> AppResult<Json<Vec<Attendance>>> {
    let principal = Principal::load(&state.pool, auth.user_id).await?;
    let target_id = query.employee_id.unwrap_or(principal.id);
    // Attendance visibility follows the employee-record rule: self,
    // privileged roles, or the employee's current manager.
    ensure_employee_view(&state.pool, &principal, target_id).await?;

    let mut sql = format!("{SELECT_ATTENDANCE} WHERE employee_id = ?");
    if query.from.is_some() {
        sql.push_str(" AND work_date >= ?");
    }
    if query.to.is_some() {
        sql.push_str(" AND work_date <= ?");
    }
    sql.push_str(" ORDER BY work_date DESC");

    let mut q = sqlx::query_as::<_, DbAttendance>(&sql).bind(target_id);
    if let Some(from) = query.from {
        q = q.bind(from);
    }
    if let Some(to) = query.to {
        q = q.bind(to);
    }

    let rows = q.fetch_all(&state.pool).await?;
    let records: Vec<Attendance> = rows
        .into_iter()
        .map(Attendance::try_from)
        .collect::<Result<_, _>>()?;

    Ok(Json(records))
}

#[utoipa::path(
    post,
    path = "/attendance/check-in",
    tag = "Attendance",
    request_body = CheckInRequest,
    responses(
        (status = 201, description = "Checked in for today", body = Attendance),
        (status = 409, description = "Already checked in today")
    )
)]
pub async fn check_in(
    State(state): State<AppState>,
    auth: AuthUser,
    headers: HeaderMap,
    payload: Option<Json<CheckInRequest>>,
) -> AppResult<(StatusCode, Json<Attendance>)> {
    let principal = Principal::load(&state.pool, auth.user_id).await?;
    let payload = payload.map(|Json(p)| p).unwrap_or_default();

    let now = utc_now();
    let today = now.date_naive();

    let existing: i64 = sqlx::query_scalar(
        "SELECT COUNT(1) FROM attendance WHERE employee_id = ? AND work_date = ?",
    )
    .bind(principal.id)
    .bind(today)
    .fetch_one(&state.pool)
    .await?;
    if existing > 0 {
        return Err(AppError::conflict("already checked in today"));
    }

    let record_id = Uuid::new_v4();
    let status = payload.status.unwrap_or(AttendanceStatus::Present);

    sqlx::query(
        "INSERT INTO attendance (id, employee_id, work_date, check_in, status, note, created_at, updated_at) \
         VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(record_id)
    .bind(principal.id)
    .bind(today)
    .bind(now)
    .bind(status.as_str())
    .bind(&payload.note)
    .bind(now)
    .bind(now)
    .execute(&state.pool)
    .await?;

    let record: Attendance = fetch_attendance(&state.pool, record_id).await?.try_into()?;

    let ctx = RequestContext::from_headers(&headers);
    log_activity_with_context(&state.event_bus, "created", Some(principal.id), &record, None, Some(ctx));

    Ok((StatusCode::CREATED, Json(record)))
}

#[utoipa::path(
    post,
    path = "/attendance/check-out",
    tag = "Attendance",
    responses(
        (status = 200, description = "Checked out", body = Attendance),
        (status = 404, description = "No check-in today"),
        (status = 409, description = "Already checked out")
    )
)]
pub async fn check_out(
    State(state): State<AppState>,
    auth: AuthUser,
    headers: HeaderMap,
) -> AppResult<Json<Attendance>> {
    let principal = Principal::load(&state.pool, auth.user_id).await?;

    let now = utc_now();
    let today = now.date_naive();

    let sql = format!("{SELECT_ATTENDANCE} WHERE employee_id = ? AND work_date = ?");
    let record = sqlx::query_as::<_, DbAttendance>(&sql)
        .bind(principal.id)
        .bind(today)
        .fetch_optional(&state.pool)
        .await?
        .ok_or_else(|| AppError::not_found("no check-in recorded today"))?;

    if record.check_out.is_some() {
        return Err(AppError::conflict("already checked out today"));
    }

    sqlx::query("UPDATE attendance SET check_out = ?, updated_at = ? WHERE id = ?")
        .bind(now)
        .bind(now)
        .bind(record.id)
        .execute(&state.pool)
        .await?;

    let updated: Attendance = fetch_attendance(&state.pool, record.id).await?.try_into()?;

    let ctx = RequestContext::from_headers(&headers);
    log_activity_with_context(&state.event_bus, "updated", Some(principal.id), &updated, None, Some(ctx));

    Ok(Json(updated))
}

async fn fetch_attendance(pool: &SqlitePool, id: Uuid) -> AppResult<DbAttendance> {
    let sql = format!("{SELECT_ATTENDANCE} WHERE id = ?");
    sqlx::query_as::<_, DbAttendance>(&sql)
        .bind(id)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| AppError::not_found("attendance record not found"))
}
