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
async fn manager_listing_is_scoped_to_direct_reports() -> Result<()> {
    let (app, pool, _dir) = setup().await?;

    let (_admin_token, _admin_id) = register(&app, "Root", "root@example.com").await?;
    let (manager_token, manager_id) = register(&app, "Mira", "mira@example.com").await?;
    let (_report_token, report_id) = register(&app, "Rae", "rae@example.com").await?;
    let (_other_token, _other_id) = register(&app, "Omar", "omar@example.com").await?;

    set_role(&pool, manager_id, "Manager").await?;
    set_manager(&pool, report_id, manager_id).await?;

    let (status, list) = send(&app, "GET", "/employees", Some(&manager_token), None).await?;
    assert_eq!(status, StatusCode::OK);
    let names: Vec<&str> = list
        .as_array()
        .context("expected array")?
        .iter()
        .map(|e| e["name"].as_str().unwrap())
        .collect();
    // Own record plus the single direct report; Root and Omar are invisible.
    assert_eq!(names.len(), 2);
    assert!(names.contains(&"Mira"));
    assert!(names.contains(&"Rae"));

    // The manager can open the report's record but not an unrelated one.
    let (status, _) = send(&app, "GET", &format!("/employees/{report_id}"), Some(&manager_token), None).await?;
    assert_eq!(status, StatusCode::OK);
    let (status, _) = send(&app, "GET", &format!("/employees/{_other_id}"), Some(&manager_token), None).await?;
    assert_eq!(status, StatusCode::FORBIDDEN);

    Ok(())
}

#[tokio::test]
async fn self_edit_is_limited_to_name_and_phone() -> Result<()> {
    let (app, _pool, _dir) = setup().await?;

    let (_admin_token, _admin_id) = register(&app, "Root", "root@example.com").await?;
    let (token, id) = register(&app, "Worker", "worker@example.com").await?;

    let (status, updated) = send(
        &app,
        "PUT",
        &format!("/employees/{id}"),
        Some(&token),
        Some(json!({"name": "Worker Two", "phone": "+1-555-0100"})),
    )
    .await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(updated["name"], "Worker Two");
    assert_eq!(updated["phone"], "+1-555-0100");

    // Promoting yourself is not a limited field.
    let (status, _) = send(
        &app,
        "PUT",
        &format!("/employees/{id}"),
        Some(&token),
        Some(json!({"role": "Admin"})),
    )
    .await?;
    assert_eq!(status, StatusCode::FORBIDDEN);

    Ok(())
}

#[tokio::test]
async fn reporting_cycles_are_rejected() -> Result<()> {
    let (app, pool, _dir) = setup().await?;

    let (admin_token, _admin_id) = register(&app, "Root", "root@example.com").await?;
    let (_ta, a) = register(&app, "A", "a@example.com").await?;
    let (_tb, b) = register(&app, "B", "b@example.com").await?;
    let (_tc, c) = register(&app, "C", "c@example.com").await?;

    set_manager(&pool, b, a).await?; // B reports to A
    set_manager(&pool, c, b).await?; // C reports to B

    // A reporting to C would close the loop A -> B -> C -> A.
    let (status, payload) = send(
        &app,
        "PUT",
        &format!("/employees/{a}"),
        Some(&admin_token),
        Some(json!({"manager_id": c})),
    )
    .await?;
    assert_eq!(status, StatusCode::BAD_REQUEST, "{payload}");

    // Self-management is rejected outright.
    let (status, _) = send(
        &app,
        "PUT",
        &format!("/employees/{a}"),
        Some(&admin_token),
        Some(json!({"manager_id": a})),
    )
    .await?;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    // A legitimate reassignment still works.
    let (status, updated) = send(
        &app,
        "PUT",
        &format!("/employees/{c}"),
        Some(&admin_token),
        Some(json!({"manager_id": a})),
    )
    .await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(updated["manager_id"], json!(a.to_string()));

    Ok(())
}

#[tokio::test]
async fn only_privileged_roles_create_employees() -> Result<()> {
    let (app, pool, _dir) = setup().await?;

    let (_admin_token, _admin_id) = register(&app, "Root", "root@example.com").await?;
    let (hr_token, hr_id) = register(&app, "Hana", "hana@example.com").await?;
    let (employee_token, _employee_id) = register(&app, "Eve", "eve@example.com").await?;

    set_role(&pool, hr_id, "HR").await?;

    let body = json!({
        "name": "New Hire",
        "email": "hire@example.com",
        "password": "password123",
        "role": "Backend Developer",
        "department": "Engineering"
    });

    let (status, _) = send(&app, "POST", "/employees", Some(&employee_token), Some(body.clone())).await?;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, created) = send(&app, "POST", "/employees", Some(&hr_token), Some(body)).await?;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(created["role"], "Backend Developer");

    Ok(())
}
