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

async fn set_manager(pool: &SqlitePool, employee: Uuid, manager: Uuid) -> Result<()> {
    sqlx::query("UPDATE employees SET manager_id = ? WHERE id = ?")
        .bind(manager)
        .bind(employee)
        .execute(pool)
        .await?;
    Ok(())
}

#[tokio::test]
async fn one_check_in_per_day_and_one_check_out() -> Result<()> {
    let (app, _pool, _dir) = setup().await?;

    let (token, id) = register(&app, "Root", "root@example.com").await?;

    // Check-out before check-in has nothing to close.
    let (status, _) = send(&app, "POST", "/attendance/check-out", Some(&token), None).await?;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, record) = send(&app, "POST", "/attendance/check-in", Some(&token), None).await?;
    assert_eq!(status, StatusCode::CREATED, "{record}");
    assert_eq!(record["employee_id"], json!(id.to_string()));
    assert_eq!(record["status"], "present");
    assert!(record["check_out"].is_null());

    let (status, _) = send(&app, "POST", "/attendance/check-in", Some(&token), None).await?;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, closed) = send(&app, "POST", "/attendance/check-out", Some(&token), None).await?;
    assert_eq!(status, StatusCode::OK);
    assert!(!closed["check_out"].is_null());

    let (status, _) = send(&app, "POST", "/attendance/check-out", Some(&token), None).await?;
    assert_eq!(status, StatusCode::CONFLICT);

    Ok(())
}

#[tokio::test]
async fn attendance_visibility_follows_record_scope() -> Result<()> {
    let (app, pool, _dir) = setup().await?;

    let (_root_token, _root_id) = register(&app, "Root", "root@example.com").await?;
    let (manager_token, manager_id) = register(&app, "Mira", "mira@example.com").await?;
    let (employee_token, employee_id) = register(&app, "Eve", "eve@example.com").await?;
    let (outsider_token, _outsider_id) = register(&app, "Oz", "oz@example.com").await?;

    set_role(&pool, manager_id, "Manager").await?;
    set_manager(&pool, employee_id, manager_id).await?;

    let (status, _) = send(&app, "POST", "/attendance/check-in", Some(&employee_token), None).await?;
    assert_eq!(status, StatusCode::CREATED);

    // Self and the employee's manager can read; an unrelated employee cannot.
    let (status, own) = send(&app, "GET", "/attendance", Some(&employee_token), None).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(own.as_array().context("expected array")?.len(), 1);

    let uri = format!("/attendance?employee_id={employee_id}");
    let (status, seen) = send(&app, "GET", &uri, Some(&manager_token), None).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(seen.as_array().context("expected array")?.len(), 1);

    let (status, _) = send(&app, "GET", &uri, Some(&outsider_token), None).await?;
    assert_eq!(status, StatusCode::FORBIDDEN);

    Ok(())
}
