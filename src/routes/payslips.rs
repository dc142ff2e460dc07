use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::Json;
use serde::Deserialize;
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::app::AppState;
use crate::authz::guards::{ensure_payslip_access, ensure_payslip_delete, ensure_role};
use crate::authz::{allow, Principal, Role};
use crate::errors::{AppError, AppResult};
use crate::events::{log_activity_with_context, RequestContext};
use crate::jwt::AuthUser;
use crate::models::payslip::{
    DbPayslip, Payslip, PayslipCreateRequest, PayslipLine, PayslipUpdateRequest,
};
use crate::utils::{amount_in_words, utc_now, valid_month_key};

const SELECT_PAYSLIP: &str = "SELECT id, employee_id, payslip_month, earnings, deductions, total_earnings, total_deductions, net_pay, net_pay_words, created_at, updated_at FROM payslips";

#[derive(Debug, Deserialize)]
pub struct PayslipListQuery {
    pub employee_id: Option<Uuid>,
    pub payslip_month: Option<String>,
}

#[utoipa::path(
    get,
    path = "/payslips",
    tag = "Payslips",
    responses((status = 200, description = "List payslips visible to the caller", body = [Payslip]))
)]
pub async fn list_payslips(
    State(state): State<AppState>,
    Query(query): Query<PayslipListQuery>,
    auth: AuthUser,
) -> AppResult<Json<Vec<Payslip>>> {
    let principal = Principal::load(&state.pool, auth.user_id).await?;
    ensure_role(&principal, allow::PAYSLIP_VIEWERS, "viewing payslips")?;

    let mut sql = if principal.is(Role::Manager) {
        format!(
            "{SELECT_PAYSLIP} WHERE employee_id IN (SELECT id FROM employees WHERE manager_id = ? AND deleted_at IS NULL)"
        )
    } else {
        format!("{SELECT_PAYSLIP} WHERE 1 = 1")
    };
    if query.employee_id.is_some() {
        sql.push_str(" AND employee_id = ?");
    }
    if query.payslip_month.is_some() {
        sql.push_str(" AND payslip_month = ?");
    }
    sql.push_str(" ORDER BY payslip_month DESC, created_at DESC");

    let mut q = sqlx::query_as::<_, DbPayslip>(&sql);
    if principal.is(Role::Manager) {
        q = q.bind(principal.id);
    }
    if let Some(employee_id) = query.employee_id {
        q = q.bind(employee_id);
    }
    if let Some(month) = &query.payslip_month {
        q = q.bind(month);
    }

    let rows = q.fetch_all(&state.pool).await?;
    let payslips: Vec<Payslip> = rows
        .into_iter()
        .map(Payslip::try_from)
        .collect::<Result<_, _>>()?;

    Ok(Json(payslips))
}

#[utoipa::path(
    post,
    path = "/payslips",
    tag = "Payslips",
    request_body = PayslipCreateRequest,
    responses(
        (status = 201, description = "Payslip created with server-computed totals", body = Payslip),
        (status = 409, description = "Payslip already exists for that month")
    )
)]
pub async fn create_payslip(
    State(state): State<AppState>,
    auth: AuthUser,
    headers: HeaderMap,
    Json(payload): Json<PayslipCreateRequest>,
) -> AppResult<(StatusCode, Json<Payslip>)> {
    let principal = Principal::load(&state.pool, auth.user_id).await?;
    ensure_payslip_access(&state.pool, &principal, payload.employee_id).await?;

    if !valid_month_key(&payload.payslip_month) {
        return Err(AppError::bad_request("payslip_month must be in YYYY-MM form"));
    }
    validate_lines(&payload.earnings)?;
    validate_lines(&payload.deductions)?;

    let employee_exists: bool = sqlx::query_scalar(
        "SELECT EXISTS(SELECT 1 FROM employees WHERE id = ? AND deleted_at IS NULL)",
    )
    .bind(payload.employee_id)
    .fetch_one(&state.pool)
    .await?;
    if !employee_exists {
        return Err(AppError::not_found("employee not found"));
    }

    let duplicate: i64 = sqlx::query_scalar(
        "SELECT COUNT(1) FROM payslips WHERE employee_id = ? AND payslip_month = ?",
    )
    .bind(payload.employee_id)
    .bind(&payload.payslip_month)
    .fetch_one(&state.pool)
    .await?;
    if duplicate > 0 {
        return Err(AppError::conflict("payslip already exists for this employee and month"));
    }

    // Totals are derived from the line items here, whatever the client sent.
    let (total_earnings, total_deductions, net_pay) =
        compute_totals(&payload.earnings, &payload.deductions);
    let net_pay_words = amount_in_words(net_pay);

    let payslip_id = Uuid::new_v4();
    let now = utc_now();
    let earnings_json = serde_json::to_string(&payload.earnings)
        .map_err(|err| AppError::internal(format!("failed to encode earnings: {err}")))?;
    let deductions_json = serde_json::to_string(&payload.deductions)
        .map_err(|err| AppError::internal(format!("failed to encode deductions: {err}")))?;

    let mut tx = state.pool.begin().await?;
    sqlx::query(
        "INSERT INTO payslips (id, employee_id, payslip_month, earnings, deductions, total_earnings, total_deductions, net_pay, net_pay_words, created_at, updated_at) \
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(payslip_id)
    .bind(payload.employee_id)
    .bind(&payload.payslip_month)
    .bind(&earnings_json)
    .bind(&deductions_json)
    .bind(total_earnings)
    .bind(total_deductions)
    .bind(net_pay)
    .bind(&net_pay_words)
    .bind(now)
    .bind(now)
    .execute(&mut *tx)
    .await?;
    tx.commit().await?;

    let payslip: Payslip = fetch_payslip(&state.pool, payslip_id).await?.try_into()?;

    let ctx = RequestContext::from_headers(&headers);
    log_activity_with_context(&state.event_bus, "created", Some(principal.id), &payslip, None, Some(ctx));

    Ok((StatusCode::CREATED, Json(payslip)))
}

#[utoipa::path(
    get,
    path = "/payslips/{id}",
    tag = "Payslips",
    params(("id" = Uuid, Path, description = "Payslip id")),
    responses((status = 200, description = "Payslip detail", body = Payslip))
)]
pub async fn get_payslip(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(id): Path<Uuid>,
) -> AppResult<Json<Payslip>> {
    let principal = Principal::load(&state.pool, auth.user_id).await?;
    let record = fetch_payslip(&state.pool, id).await?;
    ensure_payslip_access(&state.pool, &principal, record.employee_id).await?;

    let payslip: Payslip = record.try_into()?;
    Ok(Json(payslip))
}

#[utoipa::path(
    put,
    path = "/payslips/{id}",
    tag = "Payslips",
    params(("id" = Uuid, Path, description = "Payslip id")),
    request_body = PayslipUpdateRequest,
    responses((status = 200, description = "Payslip updated; totals recomputed", body = Payslip))
)]
pub async fn update_payslip(
    State(state): State<AppState>,
    auth: AuthUser,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
    Json(payload): Json<PayslipUpdateRequest>,
) -> AppResult<Json<Payslip>> {
    let principal = Principal::load(&state.pool, auth.user_id).await?;
    let record = fetch_payslip(&state.pool, id).await?;
    ensure_payslip_access(&state.pool, &principal, record.employee_id).await?;

    let old: Payslip = record.clone().try_into()?;

    let earnings = match payload.earnings {
        Some(lines) => {
            validate_lines(&lines)?;
            lines
        }
        None => old.earnings.clone(),
    };
    let deductions = match payload.deductions {
        Some(lines) => {
            validate_lines(&lines)?;
            lines
        }
        None => old.deductions.clone(),
    };

    let (total_earnings, total_deductions, net_pay) = compute_totals(&earnings, &deductions);
    let net_pay_words = amount_in_words(net_pay);

    let earnings_json = serde_json::to_string(&earnings)
        .map_err(|err| AppError::internal(format!("failed to encode earnings: {err}")))?;
    let deductions_json = serde_json::to_string(&deductions)
        .map_err(|err| AppError::internal(format!("failed to encode deductions: {err}")))?;
    let now = utc_now();

    let mut tx = state.pool.begin().await?;
    sqlx::query(
        "UPDATE payslips SET earnings = ?, deductions = ?, total_earnings = ?, total_deductions = ?, net_pay = ?, net_pay_words = ?, updated_at = ? WHERE id = ?",
    )
    .bind(&earnings_json)
    .bind(&deductions_json)
    .bind(total_earnings)
    .bind(total_deductions)
    .bind(net_pay)
    .bind(&net_pay_words)
    .bind(now)
    .bind(id)
    .execute(&mut *tx)
    .await?;
    tx.commit().await?;

    let payslip: Payslip = fetch_payslip(&state.pool, id).await?.try_into()?;

    let ctx = RequestContext::from_headers(&headers);
    log_activity_with_context(&state.event_bus, "updated", Some(principal.id), &payslip, Some(&old), Some(ctx));

    Ok(Json(payslip))
}

#[utoipa::path(
    delete,
    path = "/payslips/{id}",
    tag = "Payslips",
    params(("id" = Uuid, Path, description = "Payslip id")),
    responses((status = 204, description = "Payslip deleted"))
)]
pub async fn delete_payslip(
    State(state): State<AppState>,
    auth: AuthUser,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
) -> AppResult<StatusCode> {
    let principal = Principal::load(&state.pool, auth.user_id).await?;
    let record = fetch_payslip(&state.pool, id).await?;
    ensure_payslip_delete(&principal)?;

    let payslip: Payslip = record.try_into()?;

    sqlx::query("DELETE FROM payslips WHERE id = ?")
        .bind(id)
        .execute(&state.pool)
        .await?;

    let ctx = RequestContext::from_headers(&headers);
    log_activity_with_context(&state.event_bus, "deleted", Some(principal.id), &payslip, None, Some(ctx));

    Ok(StatusCode::NO_CONTENT)
}

async fn fetch_payslip(pool: &SqlitePool, id: Uuid) -> AppResult<DbPayslip> {
    let sql = format!("{SELECT_PAYSLIP} WHERE id = ?");
    sqlx::query_as::<_, DbPayslip>(&sql)
        .bind(id)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| AppError::not_found("payslip not found"))
}

fn validate_lines(lines: &[PayslipLine]) -> AppResult<()> {
    for line in lines {
        if line.label.trim().is_empty() {
            return Err(AppError::bad_request("line item label must not be empty"));
        }
        if line.amount < 0 {
            return Err(AppError::bad_request("line item amounts must not be negative"));
        }
    }
    Ok(())
}

fn compute_totals(earnings: &[PayslipLine], deductions: &[PayslipLine]) -> (i64, i64, i64) {
    let total_earnings: i64 = earnings.iter().map(|line| line.amount).sum();
    let total_deductions: i64 = deductions.iter().map(|line| line.amount).sum();
    (total_earnings, total_deductions, total_earnings - total_deductions)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn line(label: &str, amount: i64) -> PayslipLine {
        PayslipLine { label: label.to_string(), amount }
    }

    #[test]
    fn totals_are_derived_from_line_items() {
        let earnings = vec![line("Basic", 40_000), line("HRA", 12_000)];
        let deductions = vec![line("Tax", 5_000), line("PF", 1_800)];

        let (total_earnings, total_deductions, net_pay) = compute_totals(&earnings, &deductions);
        assert_eq!(total_earnings, 52_000);
        assert_eq!(total_deductions, 6_800);
        assert_eq!(net_pay, 45_200);
    }

    #[test]
    fn negative_line_amounts_are_rejected() {
        assert!(validate_lines(&[line("Adjustment", -10)]).is_err());
        assert!(validate_lines(&[line("", 10)]).is_err());
        assert!(validate_lines(&[line("Basic", 0)]).is_ok());
    }
}
