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

/// Creates an employee through the admin surface, then logs them in.
async fn onboard(
    app: &Router,
    admin_token: &str,
    name: &str,
    email: &str,
    role: &str,
    manager_id: Option<&str>,
) -> Result<(String, String)> {
    let (status, created) = send(
        app,
        "POST",
        "/employees",
        Some(admin_token),
        Some(json!({
            "name": name,
            "email": email,
            "password": "password123",
            "role": role,
            "manager_id": manager_id
        })),
    )
    .await?;
    assert_eq!(status, StatusCode::CREATED, "onboard failed: {created}");
    let id = created["id"].as_str().context("missing id")?.to_string();

    let (status, login) = send(
        app,
        "POST",
        "/auth/login",
        None,
        Some(json!({"email": email, "password": "password123"})),
    )
    .await?;
    assert_eq!(status, StatusCode::OK, "login failed: {login}");
    let token = login["token"].as_str().context("missing token")?.to_string();

    Ok((token, id))
}

#[tokio::test]
async fn full_api_flow() -> Result<()> {
    let (app, pool, _dir) = setup().await?;

    // -- bootstrap the instance owner
    let (status, root) = send(
        &app,
        "POST",
        "/auth/register",
        None,
        Some(json!({"name": "Root", "email": "root@example.com", "password": "password123"})),
    )
    .await?;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(root["user"]["role"], "Super Admin");
    let root_token = root["token"].as_str().context("missing token")?.to_string();

    // -- onboard the org: HR, a manager, and a developer reporting to them
    let (hr_token, _hr_id) = onboard(&app, &root_token, "Hana", "hr@example.com", "HR", None).await?;
    let (manager_token, manager_id) =
        onboard(&app, &root_token, "Mira", "mira@example.com", "Manager", None).await?;
    let (dev_token, dev_id) = onboard(
        &app,
        &root_token,
        "Devi",
        "devi@example.com",
        "Backend Developer",
        Some(manager_id.as_str()),
    )
    .await?;

    let (status, me) = send(&app, "GET", "/auth/me", Some(&dev_token), None).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(me["role"], "Backend Developer");
    assert_eq!(me["manager_id"], json!(manager_id));

    // -- the day starts with a check-in
    let (status, _) = send(&app, "POST", "/attendance/check-in", Some(&dev_token), None).await?;
    assert_eq!(status, StatusCode::CREATED);

    // -- leave request, approved by the manager
    let (status, leave) = send(
        &app,
        "POST",
        "/leaves",
        Some(&dev_token),
        Some(json!({
            "leave_type": "vacation",
            "start_date": "2025-08-20",
            "end_date": "2025-08-22",
            "reason": "Family trip"
        })),
    )
    .await?;
    assert_eq!(status, StatusCode::CREATED);
    let leave_id = leave["id"].as_str().context("missing leave id")?;

    let (status, approved) = send(
        &app,
        "POST",
        &format!("/leaves/{leave_id}/approve"),
        Some(&manager_token),
        None,
    )
    .await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(approved["status"], "approved");
    assert_eq!(approved["approved_by"], json!(manager_id));

    // -- task assigned to the developer, completed through the workflow
    let (status, task) = send(
        &app,
        "POST",
        "/tasks",
        Some(&manager_token),
        Some(json!({
            "title": "Ship the payroll export",
            "priority": "high",
            "assignee_ids": [dev_id]
        })),
    )
    .await?;
    assert_eq!(status, StatusCode::CREATED);
    let task_id = task["id"].as_str().context("missing task id")?;

    let (status, request) = send(
        &app,
        "POST",
        &format!("/tasks/{task_id}/status-requests"),
        Some(&dev_token),
        Some(json!({"requested_status": "completed"})),
    )
    .await?;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(request["status"], "pending");
    let request_id = request["id"].as_str().context("missing request id")?;

    let (status, resolved) = send(
        &app,
        "POST",
        &format!("/tasks/{task_id}/status-requests/{request_id}/resolve"),
        Some(&manager_token),
        Some(json!({"action": "approve"})),
    )
    .await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(resolved["status"], "approved");

    let (status, detail) = send(&app, "GET", &format!("/tasks/{task_id}"), Some(&dev_token), None).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(detail["task"]["status"], "completed");

    // -- payroll: HR issues the month's payslip
    let (status, payslip) = send(
        &app,
        "POST",
        "/payslips",
        Some(&hr_token),
        Some(json!({
            "employee_id": dev_id,
            "payslip_month": "2025-08",
            "earnings": [
                {"label": "Basic Salary", "amount": 50000},
                {"label": "HRA", "amount": 15000}
            ],
            "deductions": [{"label": "Income Tax", "amount": 8000}]
        })),
    )
    .await?;
    assert_eq!(status, StatusCode::CREATED, "{payslip}");
    assert_eq!(payslip["net_pay"], 57000);
    assert_eq!(payslip["net_pay_words"], "fifty-seven thousand");

    // -- performance: a KRA for the role, rated by the manager
    let (status, definition) = send(
        &app,
        "POST",
        "/kra/definitions",
        Some(&hr_token),
        Some(json!({
            "role": "Backend Developer",
            "kra_number": 1,
            "kra_name": "Delivery quality",
            "weight_percentage": 100,
            "kpi_1": {
                "target": "Zero rollbacks in the period",
                "scale": "1-5",
                "rating_labels": ["Poor", "Below par", "Meets", "Exceeds", "Outstanding"]
            }
        })),
    )
    .await?;
    assert_eq!(status, StatusCode::CREATED);
    let kra_id = definition["id"].as_str().context("missing kra id")?;

    let (status, submissions) = send(
        &app,
        "POST",
        "/kra/submissions",
        Some(&manager_token),
        Some(json!({
            "employee_id": dev_id,
            "period_type": "monthly",
            "period_key": "2025-08",
            "ratings": [{"kra_id": kra_id, "rating": 4, "comments": "strong month"}]
        })),
    )
    .await?;
    assert_eq!(status, StatusCode::OK, "{submissions}");
    assert_eq!(submissions.as_array().context("expected array")?.len(), 1);

    // -- dashboards: the super admin recalculates KPI metrics
    let (status, metrics) = send(
        &app,
        "POST",
        "/kpi/metrics/calculate",
        Some(&root_token),
        Some(json!({
            "period_type": "monthly",
            "period_start": "2025-08-01",
            "period_end": "2025-08-31"
        })),
    )
    .await?;
    assert_eq!(status, StatusCode::OK);
    assert!(metrics.as_array().context("expected array")?.len() >= 4);

    // -- navigation reflects the role table
    let (status, menu) = send(&app, "GET", "/menu", Some(&dev_token), None).await?;
    assert_eq!(status, StatusCode::OK);
    assert!(!menu["sections"]
        .as_array()
        .context("expected array")?
        .contains(&json!("settings")));

    // -- the activity listener has been projecting all of the above
    tokio::time::sleep(std::time::Duration::from_millis(300)).await;
    let logged: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM activity_log")
        .fetch_one(&pool)
        .await?;
    assert!(logged > 0, "expected activity log rows, found none");

    let chained: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM event_store WHERE hash != ''")
        .fetch_one(&pool)
        .await?;
    assert!(chained > 0, "expected hash-chained event store rows");

    Ok(())
}
