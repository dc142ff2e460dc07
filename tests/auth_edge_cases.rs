use anyhow::{Context, Result};
use axum::body::{self, Body};
use axum::http::{Request, StatusCode};
use axum::Router;
use serde_json::{json, Value};
use sqlx::sqlite::SqliteConnectOptions;
use sqlx::SqlitePool;
use tempfile::{tempdir, TempDir};
use tower::util::ServiceExt; // for `oneshot`

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

#[tokio::test]
async fn first_account_bootstraps_super_admin() -> Result<()> {
    let (app, _pool, _dir) = setup().await?;

    let (status, first) = send(
        &app,
        "POST",
        "/auth/register",
        None,
        Some(json!({"name": "Root", "email": "root@example.com", "password": "password123"})),
    )
    .await?;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(first["user"]["role"], "Super Admin");

    let (status, second) = send(
        &app,
        "POST",
        "/auth/register",
        None,
        Some(json!({"name": "Worker", "email": "worker@example.com", "password": "password123"})),
    )
    .await?;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(second["user"]["role"], "Employee");

    Ok(())
}

#[tokio::test]
async fn duplicate_email_conflicts() -> Result<()> {
    let (app, _pool, _dir) = setup().await?;

    let body = json!({"name": "A", "email": "dup@example.com", "password": "password123"});
    let (status, _) = send(&app, "POST", "/auth/register", None, Some(body.clone())).await?;
    assert_eq!(status, StatusCode::CREATED);

    let (status, payload) = send(&app, "POST", "/auth/register", None, Some(body)).await?;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(payload["error"], "conflict");

    Ok(())
}

#[tokio::test]
async fn short_passwords_are_rejected() -> Result<()> {
    let (app, _pool, _dir) = setup().await?;

    let (status, payload) = send(
        &app,
        "POST",
        "/auth/register",
        None,
        Some(json!({"name": "A", "email": "short@example.com", "password": "short"})),
    )
    .await?;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(payload["error"], "bad_request");

    Ok(())
}

#[tokio::test]
async fn wrong_password_is_unauthorized() -> Result<()> {
    let (app, _pool, _dir) = setup().await?;

    let (status, _) = send(
        &app,
        "POST",
        "/auth/register",
        None,
        Some(json!({"name": "A", "email": "login@example.com", "password": "password123"})),
    )
    .await?;
    assert_eq!(status, StatusCode::CREATED);

    let (status, _) = send(
        &app,
        "POST",
        "/auth/login",
        None,
        Some(json!({"email": "login@example.com", "password": "not-the-password"})),
    )
    .await?;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    Ok(())
}

#[tokio::test]
async fn missing_and_garbage_tokens_are_unauthorized() -> Result<()> {
    let (app, _pool, _dir) = setup().await?;

    let (status, _) = send(&app, "GET", "/auth/me", None, None).await?;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _) = send(&app, "GET", "/auth/me", Some("not-a-jwt"), None).await?;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _) = send(&app, "GET", "/employees", Some("not-a-jwt"), None).await?;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    Ok(())
}

#[tokio::test]
async fn deactivated_accounts_cannot_act() -> Result<()> {
    let (app, pool, _dir) = setup().await?;

    let (status, payload) = send(
        &app,
        "POST",
        "/auth/register",
        None,
        Some(json!({"name": "Gone", "email": "gone@example.com", "password": "password123"})),
    )
    .await?;
    assert_eq!(status, StatusCode::CREATED);
    let token = payload["token"].as_str().context("missing token")?.to_string();
    let id = payload["user"]["id"].as_str().context("missing id")?.to_string();

    sqlx::query("UPDATE employees SET is_active = 0 WHERE id = ?")
        .bind(uuid::Uuid::parse_str(&id)?)
        .execute(&pool)
        .await?;

    // The token still parses, but the principal no longer resolves.
    let (status, _) = send(&app, "GET", "/employees", Some(&token), None).await?;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    Ok(())
}
