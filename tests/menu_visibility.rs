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

#[tokio::test]
async fn defaults_differ_by_role_and_overrides_win() -> Result<()> {
    let (app, _pool, _dir) = setup().await?;

    let (admin_token, _admin_id) = register(&app, "Root", "root@example.com").await?;
    let (employee_token, _employee_id) = register(&app, "Eve", "eve@example.com").await?;

    // Defaults: settings is admin-only, employees never see it.
    let (status, menu) = send(&app, "GET", "/menu", Some(&admin_token), None).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(menu["overridden"], false);
    let sections = menu["sections"].as_array().context("expected array")?;
    assert!(sections.contains(&json!("settings")));
    assert!(sections.contains(&json!("employees")));

    let (status, menu) = send(&app, "GET", "/menu", Some(&employee_token), None).await?;
    assert_eq!(status, StatusCode::OK);
    let sections = menu["sections"].as_array().context("expected array")?;
    assert!(!sections.contains(&json!("settings")));
    assert!(!sections.contains(&json!("employees")));

    // Admin narrows the Employee menu; the override is what resolves.
    let (status, stored) = send(
        &app,
        "PUT",
        "/menu/Employee",
        Some(&admin_token),
        Some(json!({"sections": ["dashboard", "leaves"]})),
    )
    .await?;
    assert_eq!(status, StatusCode::OK, "{stored}");

    let (status, menu) = send(&app, "GET", "/menu", Some(&employee_token), None).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(menu["overridden"], true);
    assert_eq!(menu["sections"], json!(["dashboard", "leaves"]));

    // Removing the override restores the defaults.
    let (status, _) = send(&app, "DELETE", "/menu/Employee", Some(&admin_token), None).await?;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (status, menu) = send(&app, "GET", "/menu", Some(&employee_token), None).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(menu["overridden"], false);

    Ok(())
}

#[tokio::test]
async fn override_surface_is_admin_only_and_validated() -> Result<()> {
    let (app, _pool, _dir) = setup().await?;

    let (admin_token, _admin_id) = register(&app, "Root", "root@example.com").await?;
    let (employee_token, _employee_id) = register(&app, "Eve", "eve@example.com").await?;

    let (status, _) = send(
        &app,
        "PUT",
        "/menu/Employee",
        Some(&employee_token),
        Some(json!({"sections": ["dashboard"]})),
    )
    .await?;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _) = send(
        &app,
        "PUT",
        "/menu/Employee",
        Some(&admin_token),
        Some(json!({"sections": ["dashboard", "no-such-section"]})),
    )
    .await?;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = send(
        &app,
        "PUT",
        "/menu/Intern",
        Some(&admin_token),
        Some(json!({"sections": ["dashboard"]})),
    )
    .await?;
    assert_eq!(status, StatusCode::NOT_FOUND);

    Ok(())
}
