use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::Json;
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::app::AppState;
use crate::authz::guards::{ensure_employee_manage, ensure_employee_view};
use crate::authz::{allow, has_permission, Principal, Role};
use crate::errors::{AppError, AppResult};
use crate::events::{log_activity_with_context, RequestContext};
use crate::jwt::AuthUser;
use crate::models::employee::{DbEmployee, Employee, EmployeeCreateRequest, EmployeeUpdateRequest};
use crate::utils::{hash_password, utc_now};

const SELECT_EMPLOYEE: &str = "SELECT id, name, email, password_hash, role, department, phone, manager_id, is_active, created_at, updated_at, deleted_at FROM employees";

#[utoipa::path(
    get,
    path = "/employees",
    tag = "Employees",
    responses((status = 200, description = "List employees visible to the caller", body = [Employee]))
)]
pub async fn list_employees(
    State(state): State<AppState>,
    auth: AuthUser,
) -> AppResult<Json<Vec<Employee>>> {
    let principal = Principal::load(&state.pool, auth.user_id).await?;

    // Managers see only their current reports; everyone unprivileged sees
    // just their own record.
    let rows = if has_permission(Some(principal.role), allow::EMPLOYEE_MANAGERS) {
        let sql = format!("{SELECT_EMPLOYEE} WHERE deleted_at IS NULL ORDER BY name");
        sqlx::query_as::<_, DbEmployee>(&sql).fetch_all(&state.pool).await?
    } else if principal.is(Role::Manager) {
        let sql = format!(
            "{SELECT_EMPLOYEE} WHERE (manager_id = ? OR id = ?) AND deleted_at IS NULL ORDER BY name"
        );
        sqlx::query_as::<_, DbEmployee>(&sql)
            .bind(principal.id)
            .bind(principal.id)
            .fetch_all(&state.pool)
            .await?
    } else {
        let sql = format!("{SELECT_EMPLOYEE} WHERE id = ? AND deleted_at IS NULL");
        sqlx::query_as::<_, DbEmployee>(&sql)
            .bind(principal.id)
            .fetch_all(&state.pool)
            .await?
    };

    let employees: Vec<Employee> = rows
        .into_iter()
        .map(Employee::try_from)
        .collect::<Result<_, _>>()?;

    Ok(Json(employees))
}

#[utoipa::path(
    post,
    path = "/employees",
    tag = "Employees",
    request_body = EmployeeCreateRequest,
    responses(
        (status = 201, description = "Employee created", body = Employee),
        (status = 409, description = "Email already in use")
    )
)]
pub async fn create_employee(
    State(state): State<AppState>,
    auth: AuthUser,
    headers: HeaderMap,
    Json(payload): Json<EmployeeCreateRequest>,
) -> AppResult<(StatusCode, Json<Employee>)> {
    let principal = Principal::load(&state.pool, auth.user_id).await?;
    ensure_employee_manage(&principal)?;

    let count: i64 = sqlx::query_scalar("SELECT COUNT(1) FROM employees WHERE email = ? AND deleted_at IS NULL")
        .bind(&payload.email)
        .fetch_one(&state.pool)
        .await?;
    if count > 0 {
        return Err(AppError::conflict("email already in use"));
    }

    if let Some(manager_id) = payload.manager_id {
        ensure_manager_exists(&state.pool, manager_id).await?;
    }

    let password_hash = hash_password(&payload.password)?;
    let role = payload.role.unwrap_or(Role::Employee);
    let employee_id = Uuid::new_v4();
    let now = utc_now();

    sqlx::query(
        "INSERT INTO employees (id, name, email, password_hash, role, department, phone, manager_id, is_active, created_at, updated_at) \
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, 1, ?, ?)",
    )
    .bind(employee_id)
    .bind(&payload.name)
    .bind(&payload.email)
    .bind(password_hash)
    .bind(role.as_str())
    .bind(&payload.department)
    .bind(&payload.phone)
    .bind(payload.manager_id)
    .bind(now)
    .bind(now)
    .execute(&state.pool)
    .await?;

    let employee: Employee = fetch_employee(&state.pool, employee_id).await?.try_into()?;

    let ctx = RequestContext::from_headers(&headers);
    log_activity_with_context(&state.event_bus, "created", Some(principal.id), &employee, None, Some(ctx));

    Ok((StatusCode::CREATED, Json(employee)))
}

#[utoipa::path(
    get,
    path = "/employees/{id}",
    tag = "Employees",
    params(("id" = Uuid, Path, description = "Employee id")),
    responses((status = 200, description = "Employee detail", body = Employee))
)]
pub async fn get_employee(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(id): Path<Uuid>,
) -> AppResult<Json<Employee>> {
    let principal = Principal::load(&state.pool, auth.user_id).await?;
    let db_employee = fetch_employee(&state.pool, id).await?;
    ensure_employee_view(&state.pool, &principal, db_employee.id).await?;

    let employee: Employee = db_employee.try_into()?;
    Ok(Json(employee))
}

#[utoipa::path(
    put,
    path = "/employees/{id}",
    tag = "Employees",
    params(("id" = Uuid, Path, description = "Employee id")),
    request_body = EmployeeUpdateRequest,
    responses((status = 200, description = "Employee updated", body = Employee))
)]
pub async fn update_employee(
    State(state): State<AppState>,
    auth: AuthUser,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
    Json(payload): Json<EmployeeUpdateRequest>,
) -> AppResult<Json<Employee>> {
    let principal = Principal::load(&state.pool, auth.user_id).await?;
    let mut record = fetch_employee(&state.pool, id).await?;
    let old: Employee = record.clone().try_into()?;

    let privileged = has_permission(Some(principal.role), allow::EMPLOYEE_MANAGERS);
    if !privileged {
        // Self-service edits are limited to name and phone.
        if principal.id != id || !payload.is_self_scope() {
            return Err(AppError::forbidden("only name and phone may be changed on own record"));
        }
    }

    if let Some(name) = payload.name {
        record.name = name;
    }
    if payload.phone.is_some() {
        record.phone = payload.phone;
    }
    if let Some(email) = payload.email {
        if email != record.email {
            let count: i64 =
                sqlx::query_scalar("SELECT COUNT(1) FROM employees WHERE email = ? AND id != ? AND deleted_at IS NULL")
                    .bind(&email)
                    .bind(id)
                    .fetch_one(&state.pool)
                    .await?;
            if count > 0 {
                return Err(AppError::conflict("email already in use"));
            }
            record.email = email;
        }
    }
    if let Some(role) = payload.role {
        record.role = role.as_str().to_string();
    }
    if payload.department.is_some() {
        record.department = payload.department;
    }
    if let Some(manager_id) = payload.manager_id {
        ensure_manager_exists(&state.pool, manager_id).await?;
        ensure_no_reporting_cycle(&state.pool, id, manager_id).await?;
        record.manager_id = Some(manager_id);
    }
    if let Some(is_active) = payload.is_active {
        record.is_active = is_active;
    }

    let now = utc_now();

    sqlx::query(
        "UPDATE employees SET name = ?, email = ?, role = ?, department = ?, phone = ?, manager_id = ?, is_active = ?, updated_at = ? WHERE id = ?",
    )
    .bind(&record.name)
    .bind(&record.email)
    .bind(&record.role)
    .bind(&record.department)
    .bind(&record.phone)
    .bind(record.manager_id)
    .bind(record.is_active)
    .bind(now)
    .bind(id)
    .execute(&state.pool)
    .await?;

    let employee: Employee = fetch_employee(&state.pool, id).await?.try_into()?;

    let ctx = RequestContext::from_headers(&headers);
    log_activity_with_context(&state.event_bus, "updated", Some(principal.id), &employee, Some(&old), Some(ctx));

    Ok(Json(employee))
}

#[utoipa::path(
    delete,
    path = "/employees/{id}",
    tag = "Employees",
    params(("id" = Uuid, Path, description = "Employee id")),
    responses((status = 204, description = "Employee soft deleted"))
)]
pub async fn delete_employee(
    State(state): State<AppState>,
    auth: AuthUser,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
) -> AppResult<StatusCode> {
    let principal = Principal::load(&state.pool, auth.user_id).await?;
    ensure_employee_manage(&principal)?;

    let record = fetch_employee(&state.pool, id).await?;
    let employee: Employee = record.try_into()?;

    let now = utc_now();
    let affected = sqlx::query(
        "UPDATE employees SET deleted_at = ?, is_active = 0, updated_at = ? WHERE id = ? AND deleted_at IS NULL",
    )
    .bind(now)
    .bind(now)
    .bind(id)
    .execute(&state.pool)
    .await?;

    if affected.rows_affected() == 0 {
        return Err(AppError::not_found("employee not found"));
    }

    let ctx = RequestContext::from_headers(&headers);
    log_activity_with_context(&state.event_bus, "deleted", Some(principal.id), &employee, None, Some(ctx));

    Ok(StatusCode::NO_CONTENT)
}

#[utoipa::path(
    get,
    path = "/employees/{id}/reports",
    tag = "Employees",
    params(("id" = Uuid, Path, description = "Manager's employee id")),
    responses((status = 200, description = "Direct reports", body = [Employee]))
)]
pub async fn list_reports(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(id): Path<Uuid>,
) -> AppResult<Json<Vec<Employee>>> {
    let principal = Principal::load(&state.pool, auth.user_id).await?;

    if principal.id != id && !has_permission(Some(principal.role), allow::EMPLOYEE_MANAGERS) {
        return Err(AppError::forbidden("cannot list another employee's reports"));
    }

    let sql = format!("{SELECT_EMPLOYEE} WHERE manager_id = ? AND deleted_at IS NULL ORDER BY name");
    let rows = sqlx::query_as::<_, DbEmployee>(&sql)
        .bind(id)
        .fetch_all(&state.pool)
        .await?;

    let employees: Vec<Employee> = rows
        .into_iter()
        .map(Employee::try_from)
        .collect::<Result<_, _>>()?;

    Ok(Json(employees))
}

pub(crate) async fn fetch_employee(pool: &SqlitePool, id: Uuid) -> AppResult<DbEmployee> {
    let sql = format!("{SELECT_EMPLOYEE} WHERE id = ? AND deleted_at IS NULL");
    sqlx::query_as::<_, DbEmployee>(&sql)
        .bind(id)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| AppError::not_found("employee not found"))
}

async fn ensure_manager_exists(pool: &SqlitePool, manager_id: Uuid) -> AppResult<()> {
    let exists: bool = sqlx::query_scalar(
        "SELECT EXISTS(SELECT 1 FROM employees WHERE id = ? AND is_active = 1 AND deleted_at IS NULL)",
    )
    .bind(manager_id)
    .fetch_one(pool)
    .await?;

    if !exists {
        return Err(AppError::bad_request("manager does not exist or is inactive"));
    }

    Ok(())
}

/// Rejects a `manager_id` assignment that would make the reporting line
/// circular. Walks up from the proposed manager with a recursive CTE; if the
/// chain reaches the employee being updated, the assignment closes a loop.
async fn ensure_no_reporting_cycle(
    pool: &SqlitePool,
    employee_id: Uuid,
    manager_id: Uuid,
) -> AppResult<()> {
    if employee_id == manager_id {
        return Err(AppError::bad_request("an employee cannot be their own manager"));
    }

    let cycle_exists: bool = sqlx::query_scalar(
        "WITH RECURSIVE chain(node) AS (
            SELECT manager_id FROM employees WHERE id = ?
            UNION
            SELECT e.manager_id FROM employees e JOIN chain c ON e.id = c.node
        )
        SELECT EXISTS(SELECT 1 FROM chain WHERE node = ?);",
    )
    .bind(manager_id)
    .bind(employee_id)
    .fetch_one(pool)
    .await?;

    if cycle_exists {
        return Err(AppError::bad_request("manager assignment would create a reporting cycle"));
    }

    Ok(())
}
