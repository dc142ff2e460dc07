use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use serde::Serialize;
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::app::AppState;
use crate::authz::Role;
use crate::errors::{AppError, AppResult};
use crate::events::log_activity;
use crate::jwt::AuthUser;
use crate::models::employee::{AuthResponse, DbEmployee, Employee, LoginRequest, RegisterRequest};
use crate::utils::{hash_password, utc_now, verify_password};

const SELECT_EMPLOYEE: &str = "SELECT id, name, email, password_hash, role, department, phone, manager_id, is_active, created_at, updated_at, deleted_at FROM employees";

#[derive(Debug, Serialize)]
pub struct MessageResponse {
    message: String,
}

#[utoipa::path(
    post,
    path = "/auth/register",
    tag = "Auth",
    request_body = RegisterRequest,
    responses(
        (status = 201, description = "Account registered", body = AuthResponse),
        (status = 409, description = "Email already in use")
    )
)]
pub async fn register(
    State(state): State<AppState>,
    Json(payload): Json<RegisterRequest>,
) -> AppResult<(StatusCode, Json<AuthResponse>)> {
    ensure_email_available(&state.pool, &payload.email).await?;

    let password_hash = hash_password(&payload.password)?;
    let now = utc_now();
    let user_id = Uuid::new_v4();

    // Bootstrap rule: the very first account owns the instance. Everyone
    // after that starts as a plain Employee and is promoted through the
    // employee-manage surface.
    let existing: i64 = sqlx::query_scalar("SELECT COUNT(1) FROM employees WHERE deleted_at IS NULL")
        .fetch_one(&state.pool)
        .await?;
    let role = if existing == 0 { Role::SuperAdmin } else { Role::Employee };

    sqlx::query(
        "INSERT INTO employees (id, name, email, password_hash, role, is_active, created_at, updated_at) VALUES (?, ?, ?, ?, ?, 1, ?, ?)",
    )
    .bind(user_id)
    .bind(&payload.name)
    .bind(&payload.email)
    .bind(password_hash)
    .bind(role.as_str())
    .bind(now)
    .bind(now)
    .execute(&state.pool)
    .await?;

    let db_employee = fetch_employee_by_id(&state.pool, user_id).await?;
    let user: Employee = db_employee.try_into()?;
    let token = state.jwt.encode(user.id)?;

    log_activity(&state.event_bus, "registered", Some(user.id), &user);

    Ok((StatusCode::CREATED, Json(AuthResponse { token, user })))
}

#[utoipa::path(
    post,
    path = "/auth/login",
    tag = "Auth",
    request_body = LoginRequest,
    responses(
        (status = 200, description = "Login successful", body = AuthResponse),
        (status = 401, description = "Invalid credentials")
    )
)]
pub async fn login(
    State(state): State<AppState>,
    Json(payload): Json<LoginRequest>,
) -> AppResult<Json<AuthResponse>> {
    let sql = format!("{SELECT_EMPLOYEE} WHERE email = ? AND is_active = 1 AND deleted_at IS NULL");
    let db_employee = sqlx::query_as::<_, DbEmployee>(&sql)
        .bind(&payload.email)
        .fetch_optional(&state.pool)
        .await?
        .ok_or_else(|| AppError::unauthorized("invalid credentials"))?;

    let password_ok = verify_password(&payload.password, &db_employee.password_hash)?;
    if !password_ok {
        return Err(AppError::unauthorized("invalid credentials"));
    }

    let token = state.jwt.encode(db_employee.id)?;
    let user: Employee = db_employee.try_into()?;

    Ok(Json(AuthResponse { token, user }))
}

#[utoipa::path(
    get,
    path = "/auth/me",
    tag = "Auth",
    responses((status = 200, description = "Current account", body = Employee))
)]
pub async fn me(State(state): State<AppState>, auth: AuthUser) -> AppResult<Json<Employee>> {
    let db_employee = fetch_employee_by_id(&state.pool, auth.user_id).await?;
    let user: Employee = db_employee.try_into()?;
    Ok(Json(user))
}

#[utoipa::path(
    post,
    path = "/auth/logout",
    tag = "Auth",
    responses((status = 200, description = "Logout acknowledged"))
)]
pub async fn logout(_auth: AuthUser) -> AppResult<Json<MessageResponse>> {
    Ok(Json(MessageResponse {
        message: "Logged out".to_string(),
    }))
}

async fn ensure_email_available(pool: &SqlitePool, email: &str) -> AppResult<()> {
    let count: i64 = sqlx::query_scalar("SELECT COUNT(1) FROM employees WHERE email = ? AND deleted_at IS NULL")
        .bind(email)
        .fetch_one(pool)
        .await?;

    if count > 0 {
        return Err(AppError::conflict("email already in use"));
    }

    Ok(())
}

async fn fetch_employee_by_id(pool: &SqlitePool, user_id: Uuid) -> AppResult<DbEmployee> {
    let sql = format!("{SELECT_EMPLOYEE} WHERE id = ? AND deleted_at IS NULL");
    sqlx::query_as::<_, DbEmployee>(&sql)
        .bind(user_id)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| AppError::not_found("employee not found"))
}
