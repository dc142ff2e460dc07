use anyhow::{Context, Result};
use axum::body::{self, Body};
use axum::http::{Request, StatusCode};
use axum::Router;
use serde_json::{json, Value};
use sqlx::sqlite::SqliteConnectOptions;
use sqlx::SqlitePool;
use tempfile::{tempdir, TempDir};
use tower::util::ServiceExt; // for `oneshot`
use uuid::Uuid;

use peopleops::create_app;

async fn setup() -> Result<(Router, SqlitePool, TempDir)> {
    let dir = tempdir().context("failed to create tempdir")?;
    let db_path = dir.path().join("test.db");
    let opts = SqliteConnectOptions::new()
        .filename(db_path.as_path())
        .create_if_missing(true);
    let pool = SqlitePool::connect_with(opts).await?;

    let migrator = sqlx::migrate::Migrator::new(
        std::path::Path::new(env!("CARGO_MANIFEST_DIR")).join("migrations"),
    )
    .await?;
    migrator.run(&pool).await?;

    std::env::set_var("JWT_SECRET", "test-secret");
    let app = create_app(pool.clone()).await?;

    Ok((app, pool, dir))
}

async fn send(
    app: &Router,
    method: &str,
    uri: &str,
    token: Option<&str>,
    body: Option<Value>,
) -> Result<(StatusCode, Value)> {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(token) = token {
        builder = builder.header("authorization", format!("Bearer {token}"));
    }
    let request = match body {
        Some(body) => builder
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))?,
        None => builder.body(Body::empty())?,
    };

    let response = app.clone().oneshot(request).await?;
    let status = response.status();
    let bytes = body::to_bytes(response.into_body(), 10_485_760).await?;
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes)?
    };

    Ok((status, value))
}

async fn register(app: &Router, name: &str, email: &str) -> Result<(String, Uuid)> {
    let (status, payload) = send(
        app,
        "POST",
        "/auth/register",
        None,
        Some(json!({"name": name, "email": email, "password": "password123"})),
    )
    .await?;
    assert_eq!(status, StatusCode::CREATED, "register failed: {payload}");
    let token = payload["token"].as_str().context("missing token")?.to_string();
    let id = Uuid::parse_str(payload["user"]["id"].as_str().context("missing id")?)?;
    Ok((token, id))
}

async fn set_role(pool: &SqlitePool, id: Uuid, role: &str) -> Result<()> {
    sqlx::query("UPDATE employees SET role = ? WHERE id = ?")
        .bind(role)
        .bind(id)
        .execute(pool)
        .await?;
    Ok(())
}

const CALC_BODY: &str = r#"{"period_type": "monthly", "period_start": "2000-01-01", "period_end": "2099-12-31"}"#;

#[tokio::test]
async fn recalculation_overwrites_instead_of_accumulating() -> Result<()> {
    let (app, pool, _dir) = setup().await?;

    let (admin_token, _admin_id) = register(&app, "Root", "root@example.com").await?;

    // Source data: two tasks, one completed.
    let (status, done_task) = send(
        &app,
        "POST",
        "/tasks",
        Some(&admin_token),
        Some(json!({"title": "Done already"})),
    )
    .await?;
    assert_eq!(status, StatusCode::CREATED);
    let done_id = done_task["id"].as_str().context("missing id")?.to_string();
    let (status, _) = send(
        &app,
        "PUT",
        &format!("/tasks/{done_id}"),
        Some(&admin_token),
        Some(json!({"status": "completed", "progress": 100})),
    )
    .await?;
    assert_eq!(status, StatusCode::OK);
    let (status, open_task) = send(
        &app,
        "POST",
        "/tasks",
        Some(&admin_token),
        Some(json!({"title": "Still open"})),
    )
    .await?;
    assert_eq!(status, StatusCode::CREATED);
    let open_id = open_task["id"].as_str().context("missing id")?.to_string();

    let calc: Value = serde_json::from_str(CALC_BODY)?;
    let (status, first_run) = send(&app, "POST", "/kpi/metrics/calculate", Some(&admin_token), Some(calc.clone())).await?;
    assert_eq!(status, StatusCode::OK, "{first_run}");
    let first_rows = first_run.as_array().context("expected array")?.len();
    assert!(first_rows >= 4, "expected all seeded metrics, got {first_rows}");

    // Change the source and recalculate: same row count, new values.
    let (status, _) = send(
        &app,
        "PUT",
        &format!("/tasks/{open_id}"),
        Some(&admin_token),
        Some(json!({"status": "completed", "progress": 100})),
    )
    .await?;
    assert_eq!(status, StatusCode::OK);

    let (status, second_run) = send(&app, "POST", "/kpi/metrics/calculate", Some(&admin_token), Some(calc.clone())).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(second_run.as_array().context("expected array")?.len(), first_rows);

    let stored: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM kpi_metrics")
        .fetch_one(&pool)
        .await?;
    assert_eq!(stored as usize, first_rows, "recalculation must not duplicate rows");

    // Deterministic value check: with both tasks completed the completion
    // rate for the window is 100%.
    let (status, metrics) = send(&app, "GET", "/kpi/metrics?period_type=monthly", Some(&admin_token), None).await?;
    assert_eq!(status, StatusCode::OK);
    let completion = metrics
        .as_array()
        .context("expected array")?
        .iter()
        .find(|m| {
            m["definition_id"]
                == json!("a1000000-0000-0000-0000-000000000001")
        })
        .context("completion metric missing")?;
    assert_eq!(completion["value"], 100.0);

    Ok(())
}

#[tokio::test]
async fn calculation_is_admin_only() -> Result<()> {
    let (app, pool, _dir) = setup().await?;

    let (_admin_token, _admin_id) = register(&app, "Root", "root@example.com").await?;
    let (hr_token, hr_id) = register(&app, "Hana", "hr@example.com").await?;
    set_role(&pool, hr_id, "HR").await?;

    let calc: Value = serde_json::from_str(CALC_BODY)?;
    let (status, _) = send(&app, "POST", "/kpi/metrics/calculate", Some(&hr_token), Some(calc)).await?;
    assert_eq!(status, StatusCode::FORBIDDEN);

    // HR can still read the dashboard.
    let (status, _) = send(&app, "GET", "/kpi/metrics", Some(&hr_token), None).await?;
    assert_eq!(status, StatusCode::OK);

    Ok(())
}

#[tokio::test]
async fn inverted_periods_are_rejected() -> Result<()> {
    let (app, _pool, _dir) = setup().await?;

    let (admin_token, _admin_id) = register(&app, "Root", "root@example.com").await?;

    let (status, _) = send(
        &app,
        "POST",
        "/kpi/metrics/calculate",
        Some(&admin_token),
        Some(json!({
            "period_type": "monthly",
            "period_start": "2025-02-01",
            "period_end": "2025-01-01"
        })),
    )
    .await?;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    Ok(())
}
