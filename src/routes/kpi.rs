use async_trait::async_trait;
use axum::extract::{Query, State};
use axum::Json;
use chrono::NaiveDate;
use serde::Deserialize;
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::app::AppState;
use crate::authz::guards::ensure_role;
use crate::authz::{allow, Principal};
use crate::errors::{AppError, AppResult};
use crate::jwt::AuthUser;
use crate::models::kra::{DbKpiMetric, KpiMetric, MetricCalculateRequest, PeriodType};
use crate::utils::utc_now;

const SELECT_METRIC: &str = "SELECT id, definition_id, period_type, period_start, period_end, value, calculated_at FROM kpi_metrics";

/// One registered KPI computation. Calculators read raw source rows (tasks,
/// attendance, leaves) for a period and produce a single value; the job
/// upserts one metric row per calculator.
#[async_trait]
pub trait MetricCalculator: Send + Sync {
    fn metric_key(&self) -> &'static str;
    async fn calculate(&self, pool: &SqlitePool, start: NaiveDate, end: NaiveDate) -> AppResult<f64>;
}

struct TaskCompletionRate;

#[async_trait]
impl MetricCalculator for TaskCompletionRate {
    fn metric_key(&self) -> &'static str {
        "task_completion_rate"
    }

    async fn calculate(&self, pool: &SqlitePool, start: NaiveDate, end: NaiveDate) -> AppResult<f64> {
        let (total, completed): (i64, i64) = sqlx::query_as(
            "SELECT COUNT(*), COALESCE(SUM(CASE WHEN status = 'completed' THEN 1 ELSE 0 END), 0) \
             FROM tasks WHERE deleted_at IS NULL AND status != 'cancelled' \
             AND date(created_at) BETWEEN ? AND ?",
        )
        .bind(start)
        .bind(end)
        .fetch_one(pool)
        .await?;

        if total == 0 {
            return Ok(0.0);
        }
        Ok(completed as f64 / total as f64 * 100.0)
    }
}

struct AttendanceRate;

#[async_trait]
impl MetricCalculator for AttendanceRate {
    fn metric_key(&self) -> &'static str {
        "attendance_rate"
    }

    async fn calculate(&self, pool: &SqlitePool, start: NaiveDate, end: NaiveDate) -> AppResult<f64> {
        let active: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM employees WHERE is_active = 1 AND deleted_at IS NULL",
        )
        .fetch_one(pool)
        .await?;

        let days = (end - start).num_days() + 1;
        let expected = active * days;
        if expected <= 0 {
            return Ok(0.0);
        }

        let recorded: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM attendance WHERE work_date BETWEEN ? AND ?",
        )
        .bind(start)
        .bind(end)
        .fetch_one(pool)
        .await?;

        Ok(recorded as f64 / expected as f64 * 100.0)
    }
}

struct LeaveApprovalRate;

#[async_trait]
impl MetricCalculator for LeaveApprovalRate {
    fn metric_key(&self) -> &'static str {
        "leave_approval_rate"
    }

    async fn calculate(&self, pool: &SqlitePool, start: NaiveDate, end: NaiveDate) -> AppResult<f64> {
        let (resolved, approved): (i64, i64) = sqlx::query_as(
            "SELECT COUNT(*), COALESCE(SUM(CASE WHEN status = 'approved' THEN 1 ELSE 0 END), 0) \
             FROM leave_requests WHERE status != 'pending' AND date(created_at) BETWEEN ? AND ?",
        )
        .bind(start)
        .bind(end)
        .fetch_one(pool)
        .await?;

        if resolved == 0 {
            return Ok(0.0);
        }
        Ok(approved as f64 / resolved as f64 * 100.0)
    }
}

struct AvgTaskProgress;

#[async_trait]
impl MetricCalculator for AvgTaskProgress {
    fn metric_key(&self) -> &'static str {
        "avg_task_progress"
    }

    async fn calculate(&self, pool: &SqlitePool, start: NaiveDate, end: NaiveDate) -> AppResult<f64> {
        let avg: Option<f64> = sqlx::query_scalar(
            "SELECT AVG(progress) FROM tasks WHERE deleted_at IS NULL AND status != 'cancelled' \
             AND date(created_at) BETWEEN ? AND ?",
        )
        .bind(start)
        .bind(end)
        .fetch_one(pool)
        .await?;

        Ok(avg.unwrap_or(0.0))
    }
}

fn calculators() -> Vec<Box<dyn MetricCalculator>> {
    vec![
        Box::new(TaskCompletionRate),
        Box::new(AttendanceRate),
        Box::new(LeaveApprovalRate),
        Box::new(AvgTaskProgress),
    ]
}

#[derive(Debug, Deserialize)]
pub struct MetricListQuery {
    pub period_type: Option<PeriodType>,
    pub period_start: Option<NaiveDate>,
    pub period_end: Option<NaiveDate>,
}

#[utoipa::path(
    get,
    path = "/kpi/metrics",
    tag = "KPI",
    responses((status = 200, description = "Calculated metrics (stale until recalculated)", body = [KpiMetric]))
)]
pub async fn list_metrics(
    State(state): State<AppState>,
    Query(query): Query<MetricListQuery>,
    auth: AuthUser,
) -> AppResult<Json<Vec<KpiMetric>>> {
    let principal = Principal::load(&state.pool, auth.user_id).await?;
    ensure_role(&principal, allow::METRIC_VIEWERS, "viewing KPI metrics")?;

    let mut sql = format!("{SELECT_METRIC} WHERE 1 = 1");
    if query.period_type.is_some() {
        sql.push_str(" AND period_type = ?");
    }
    if query.period_start.is_some() {
        sql.push_str(" AND period_start = ?");
    }
    if query.period_end.is_some() {
        sql.push_str(" AND period_end = ?");
    }
    sql.push_str(" ORDER BY period_start DESC, calculated_at DESC");

    let mut q = sqlx::query_as::<_, DbKpiMetric>(&sql);
    if let Some(period_type) = query.period_type {
        q = q.bind(period_type.as_str());
    }
    if let Some(period_start) = query.period_start {
        q = q.bind(period_start);
    }
    if let Some(period_end) = query.period_end {
        q = q.bind(period_end);
    }

    let rows = q.fetch_all(&state.pool).await?;
    let metrics: Vec<KpiMetric> = rows
        .into_iter()
        .map(KpiMetric::try_from)
        .collect::<Result<_, _>>()?;

    Ok(Json(metrics))
}

#[utoipa::path(
    post,
    path = "/kpi/metrics/calculate",
    tag = "KPI",
    request_body = MetricCalculateRequest,
    responses((status = 200, description = "Metrics recalculated for the period (overwrite, not accumulate)", body = [KpiMetric]))
)]
pub async fn calculate_metrics(
    State(state): State<AppState>,
    auth: AuthUser,
    Json(payload): Json<MetricCalculateRequest>,
) -> AppResult<Json<Vec<KpiMetric>>> {
    let principal = Principal::load(&state.pool, auth.user_id).await?;
    ensure_role(&principal, allow::METRIC_CALCULATORS, "calculating KPI metrics")?;

    if payload.period_end < payload.period_start {
        return Err(AppError::bad_request("period_end must be >= period_start"));
    }

    let mut results = Vec::new();

    // Each metric is written independently: a failure mid-run keeps the rows
    // already written for this period, and rerunning overwrites them.
    for calculator in calculators() {
        let definition_id: Option<Uuid> = sqlx::query_scalar(
            "SELECT id FROM kpi_definitions WHERE metric_key = ?",
        )
        .bind(calculator.metric_key())
        .fetch_optional(&state.pool)
        .await?;

        let Some(definition_id) = definition_id else {
            tracing::warn!(metric_key = calculator.metric_key(), "no definition for metric; skipping");
            continue;
        };

        let value = calculator
            .calculate(&state.pool, payload.period_start, payload.period_end)
            .await?;
        let now = utc_now();

        sqlx::query(
            "INSERT INTO kpi_metrics (id, definition_id, period_type, period_start, period_end, value, calculated_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?) \
             ON CONFLICT(definition_id, period_type, period_start, period_end) \
             DO UPDATE SET value = excluded.value, calculated_at = excluded.calculated_at",
        )
        .bind(Uuid::new_v4())
        .bind(definition_id)
        .bind(payload.period_type.as_str())
        .bind(payload.period_start)
        .bind(payload.period_end)
        .bind(value)
        .bind(now)
        .execute(&state.pool)
        .await?;

        let sql = format!(
            "{SELECT_METRIC} WHERE definition_id = ? AND period_type = ? AND period_start = ? AND period_end = ?"
        );
        let row = sqlx::query_as::<_, DbKpiMetric>(&sql)
            .bind(definition_id)
            .bind(payload.period_type.as_str())
            .bind(payload.period_start)
            .bind(payload.period_end)
            .fetch_one(&state.pool)
            .await?;

        results.push(KpiMetric::try_from(row)?);
    }

    tracing::info!(
        period_start = %payload.period_start,
        period_end = %payload.period_end,
        metrics = results.len(),
        "KPI metrics recalculated"
    );

    Ok(Json(results))
}
