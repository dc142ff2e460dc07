use axum::extract::{Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::Json;
use serde::Deserialize;
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::app::AppState;
use crate::authz::guards::{ensure_kra_submit, ensure_kra_view, ensure_role};
use crate::authz::{allow, Principal, Role};
use crate::errors::{AppError, AppResult};
use crate::events::{log_activity_with_context, RequestContext};
use crate::jwt::AuthUser;
use crate::models::kra::{
    DbKraDefinition, DbKraSubmission, KraDefinition, KraDefinitionCreateRequest, KraSubmission,
    KraSubmitRequest, PeriodType,
};
use crate::utils::utc_now;

const SELECT_DEFINITION: &str = "SELECT id, role, kra_number, kra_name, weight_percentage, kpi_1, kpi_2, created_at, updated_at FROM kra_definitions";
const SELECT_SUBMISSION: &str = "SELECT id, kra_id, employee_id, period_type, period_key, rating, comments, submitted_by, created_at, updated_at FROM kra_submissions";

#[derive(Debug, Deserialize)]
pub struct DefinitionListQuery {
    pub role: Option<String>,
}

#[utoipa::path(
    get,
    path = "/kra/definitions",
    tag = "KRA",
    responses((status = 200, description = "KRA definitions for a role (defaults to the caller's role)", body = [KraDefinition]))
)]
pub async fn list_definitions(
    State(state): State<AppState>,
    Query(query): Query<DefinitionListQuery>,
    auth: AuthUser,
) -> AppResult<Json<Vec<KraDefinition>>> {
    let principal = Principal::load(&state.pool, auth.user_id).await?;

    let role = match query.role {
        Some(raw) => Role::parse(&raw)
            .ok_or_else(|| AppError::bad_request(format!("unknown role: {raw}")))?,
        None => principal.role,
    };

    let sql = format!("{SELECT_DEFINITION} WHERE role = ? ORDER BY kra_number");
    let rows = sqlx::query_as::<_, DbKraDefinition>(&sql)
        .bind(role.as_str())
        .fetch_all(&state.pool)
        .await?;

    let definitions: Vec<KraDefinition> = rows
        .into_iter()
        .map(KraDefinition::try_from)
        .collect::<Result<_, _>>()?;

    Ok(Json(definitions))
}

#[utoipa::path(
    post,
    path = "/kra/definitions",
    tag = "KRA",
    request_body = KraDefinitionCreateRequest,
    responses(
        (status = 201, description = "KRA definition created", body = KraDefinition),
        (status = 409, description = "Duplicate kra_number for the role")
    )
)]
pub async fn create_definition(
    State(state): State<AppState>,
    auth: AuthUser,
    headers: HeaderMap,
    Json(payload): Json<KraDefinitionCreateRequest>,
) -> AppResult<(StatusCode, Json<KraDefinition>)> {
    let principal = Principal::load(&state.pool, auth.user_id).await?;
    ensure_role(&principal, allow::KRA_DEFINITION_MANAGERS, "managing KRA definitions")?;

    if payload.kra_number < 1 {
        return Err(AppError::bad_request("kra_number must be positive"));
    }
    if !(0..=100).contains(&payload.weight_percentage) {
        return Err(AppError::bad_request("weight_percentage must be between 0 and 100"));
    }
    if payload.kra_name.trim().is_empty() {
        return Err(AppError::bad_request("kra_name must not be empty"));
    }

    let duplicate: i64 = sqlx::query_scalar(
        "SELECT COUNT(1) FROM kra_definitions WHERE role = ? AND kra_number = ?",
    )
    .bind(payload.role.as_str())
    .bind(payload.kra_number)
    .fetch_one(&state.pool)
    .await?;
    if duplicate > 0 {
        return Err(AppError::conflict("kra_number already defined for this role"));
    }

    let definition_id = Uuid::new_v4();
    let now = utc_now();
    let kpi_1 = payload
        .kpi_1
        .as_ref()
        .map(serde_json::to_string)
        .transpose()
        .map_err(|err| AppError::internal(format!("failed to encode kpi_1: {err}")))?;
    let kpi_2 = payload
        .kpi_2
        .as_ref()
        .map(serde_json::to_string)
        .transpose()
        .map_err(|err| AppError::internal(format!("failed to encode kpi_2: {err}")))?;

    sqlx::query(
        "INSERT INTO kra_definitions (id, role, kra_number, kra_name, weight_percentage, kpi_1, kpi_2, created_at, updated_at) \
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(definition_id)
    .bind(payload.role.as_str())
    .bind(payload.kra_number)
    .bind(&payload.kra_name)
    .bind(payload.weight_percentage)
    .bind(kpi_1)
    .bind(kpi_2)
    .bind(now)
    .bind(now)
    .execute(&state.pool)
    .await?;

    // Weights are business-meaningful but historically unconstrained; surface
    // drift without rejecting the write.
    let weight_sum: i64 = sqlx::query_scalar(
        "SELECT COALESCE(SUM(weight_percentage), 0) FROM kra_definitions WHERE role = ?",
    )
    .bind(payload.role.as_str())
    .fetch_one(&state.pool)
    .await?;
    if weight_sum != 100 {
        tracing::warn!(
            role = payload.role.as_str(),
            weight_sum,
            "KRA weights for role do not sum to 100"
        );
    }

    let sql = format!("{SELECT_DEFINITION} WHERE id = ?");
    let definition: KraDefinition = sqlx::query_as::<_, DbKraDefinition>(&sql)
        .bind(definition_id)
        .fetch_one(&state.pool)
        .await?
        .try_into()?;

    let ctx = RequestContext::from_headers(&headers);
    log_activity_with_context(&state.event_bus, "created", Some(principal.id), &definition, None, Some(ctx));

    Ok((StatusCode::CREATED, Json(definition)))
}

#[derive(Debug, Deserialize)]
pub struct SubmissionListQuery {
    pub employee_id: Option<Uuid>,
    pub period_type: Option<PeriodType>,
    pub period_key: Option<String>,
}

#[utoipa::path(
    get,
    path = "/kra/submissions",
    tag = "KRA",
    responses((status = 200, description = "KRA submissions for an employee", body = [KraSubmission]))
)]
pub async fn list_submissions(
    State(state): State<AppState>,
    Query(query): Query<SubmissionListQuery>,
    auth: AuthUser,
) -> AppResult<Json<Vec<KraSubmission>>> {
    let principal = Principal::load(&state.pool, auth.user_id).await?;
    let target_id = query.employee_id.unwrap_or(principal.id);
    ensure_kra_view(&state.pool, &principal, target_id).await?;

    let mut sql = format!("{SELECT_SUBMISSION} WHERE employee_id = ?");
    if query.period_type.is_some() {
        sql.push_str(" AND period_type = ?");
    }
    if query.period_key.is_some() {
        sql.push_str(" AND period_key = ?");
    }
    sql.push_str(" ORDER BY period_key DESC, created_at");

    let mut q = sqlx::query_as::<_, DbKraSubmission>(&sql).bind(target_id);
    if let Some(period_type) = query.period_type {
        q = q.bind(period_type.as_str());
    }
    if let Some(period_key) = &query.period_key {
        q = q.bind(period_key);
    }

    let rows = q.fetch_all(&state.pool).await?;
    let submissions: Vec<KraSubmission> = rows
        .into_iter()
        .map(KraSubmission::try_from)
        .collect::<Result<_, _>>()?;

    Ok(Json(submissions))
}

#[utoipa::path(
    post,
    path = "/kra/submissions",
    tag = "KRA",
    request_body = KraSubmitRequest,
    responses(
        (status = 200, description = "Ratings upserted for the period", body = [KraSubmission]),
        (status = 400, description = "Rating out of range or KRA not defined for the target's role")
    )
)]
pub async fn submit_ratings(
    State(state): State<AppState>,
    auth: AuthUser,
    headers: HeaderMap,
    Json(payload): Json<KraSubmitRequest>,
) -> AppResult<Json<Vec<KraSubmission>>> {
    let principal = Principal::load(&state.pool, auth.user_id).await?;
    let target_id = payload.employee_id.unwrap_or(principal.id);
    ensure_kra_submit(&state.pool, &principal, target_id).await?;

    if payload.ratings.is_empty() {
        return Err(AppError::bad_request("ratings must not be empty"));
    }
    if !payload.period_type.valid_key(&payload.period_key) {
        return Err(AppError::bad_request(format!(
            "period_key {} is not valid for {} periods",
            payload.period_key,
            payload.period_type.as_str()
        )));
    }
    for item in &payload.ratings {
        if !(1..=5).contains(&item.rating) {
            return Err(AppError::bad_request("rating must be between 1 and 5"));
        }
    }

    let target_role = fetch_employee_role(&state.pool, target_id).await?;

    // Every kra_id must belong to a definition for the target's role;
    // submitting against another role's template is invalid.
    for item in &payload.ratings {
        let role: Option<String> =
            sqlx::query_scalar("SELECT role FROM kra_definitions WHERE id = ?")
                .bind(item.kra_id)
                .fetch_optional(&state.pool)
                .await?;
        match role {
            None => {
                return Err(AppError::bad_request(format!("unknown kra_id: {}", item.kra_id)));
            }
            Some(role) if role != target_role.as_str() => {
                return Err(AppError::bad_request(format!(
                    "kra {} does not belong to role {}",
                    item.kra_id,
                    target_role.as_str()
                )));
            }
            Some(_) => {}
        }
    }

    let now = utc_now();
    let mut tx = state.pool.begin().await?;

    for item in &payload.ratings {
        sqlx::query(
            "INSERT INTO kra_submissions (id, kra_id, employee_id, period_type, period_key, rating, comments, submitted_by, created_at, updated_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?) \
             ON CONFLICT(kra_id, employee_id, period_type, period_key) \
             DO UPDATE SET rating = excluded.rating, comments = excluded.comments, submitted_by = excluded.submitted_by, updated_at = excluded.updated_at",
        )
        .bind(Uuid::new_v4())
        .bind(item.kra_id)
        .bind(target_id)
        .bind(payload.period_type.as_str())
        .bind(&payload.period_key)
        .bind(item.rating)
        .bind(&item.comments)
        .bind(principal.id)
        .bind(now)
        .bind(now)
        .execute(&mut *tx)
        .await?;
    }

    tx.commit().await?;

    let sql = format!(
        "{SELECT_SUBMISSION} WHERE employee_id = ? AND period_type = ? AND period_key = ? ORDER BY created_at"
    );
    let rows = sqlx::query_as::<_, DbKraSubmission>(&sql)
        .bind(target_id)
        .bind(payload.period_type.as_str())
        .bind(&payload.period_key)
        .fetch_all(&state.pool)
        .await?;

    let submissions: Vec<KraSubmission> = rows
        .into_iter()
        .map(KraSubmission::try_from)
        .collect::<Result<_, _>>()?;

    if let Some(first) = submissions.first() {
        let ctx = RequestContext::from_headers(&headers);
        log_activity_with_context(&state.event_bus, "submitted", Some(principal.id), first, None, Some(ctx));
    }

    Ok(Json(submissions))
}

async fn fetch_employee_role(pool: &SqlitePool, employee_id: Uuid) -> AppResult<Role> {
    let raw: Option<String> = sqlx::query_scalar(
        "SELECT role FROM employees WHERE id = ? AND deleted_at IS NULL",
    )
    .bind(employee_id)
    .fetch_optional(pool)
    .await?;

    let raw = raw.ok_or_else(|| AppError::not_found("employee not found"))?;
    Role::parse(&raw).ok_or_else(|| AppError::internal(format!("unknown role in employee record: {raw}")))
}
