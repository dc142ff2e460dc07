use std::sync::Arc;

use axum::{routing::get, Json, Router};
use serde_json::{json, Value};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use crate::authz;
use crate::models;
use crate::routes;

#[derive(OpenApi)]
#[openapi(
    paths(
        routes::health::health,
        routes::auth::register,
        routes::auth::login,
        routes::auth::me,
        routes::auth::logout,
        routes::employees::list_employees,
        routes::employees::create_employee,
        routes::employees::get_employee,
        routes::employees::update_employee,
        routes::employees::delete_employee,
        routes::employees::list_reports,
        routes::leaves::list_leaves,
        routes::leaves::create_leave,
        routes::leaves::get_leave,
        routes::leaves::approve_leave,
        routes::leaves::reject_leave,
        routes::leaves::list_comments,
        routes::leaves::add_comment,
        routes::tasks::list_tasks,
        routes::tasks::create_task,
        routes::tasks::get_task,
        routes::tasks::update_task,
        routes::tasks::delete_task,
        routes::tasks::create_subtask,
        routes::tasks::update_subtask,
        routes::tasks::list_status_requests,
        routes::tasks::create_status_request,
        routes::tasks::resolve_status_request,
        routes::tasks::list_comments,
        routes::tasks::add_comment,
        routes::payslips::list_payslips,
        routes::payslips::create_payslip,
        routes::payslips::get_payslip,
        routes::payslips::update_payslip,
        routes::payslips::delete_payslip,
        routes::kra::list_definitions,
        routes::kra::create_definition,
        routes::kra::list_submissions,
        routes::kra::submit_ratings,
        routes::kpi::list_metrics,
        routes::kpi::calculate_metrics,
        routes::attendance::list_attendance,
        routes::attendance::check_in,
        routes::attendance::check_out,
        routes::menu::get_menu,
        routes::menu::put_override,
        routes::menu::delete_override
    ),
    components(
        schemas(
            authz::Role,
            routes::health::HealthResponse,
            models::employee::Employee,
            models::employee::AuthResponse,
            models::employee::LoginRequest,
            models::employee::RegisterRequest,
            models::employee::EmployeeCreateRequest,
            models::employee::EmployeeUpdateRequest,
            models::leave::LeaveRequest,
            models::leave::LeaveStatus,
            models::leave::LeaveComment,
            models::leave::LeaveCreateRequest,
            models::leave::LeaveCommentRequest,
            models::task::Task,
            models::task::TaskDetail,
            models::task::TaskStatus,
            models::task::TaskPriority,
            models::task::RequestStatus,
            models::task::Subtask,
            models::task::StatusChangeRequest,
            models::task::TaskComment,
            models::task::TaskCreateRequest,
            models::task::TaskUpdateRequest,
            models::task::SubtaskCreateRequest,
            models::task::SubtaskUpdateRequest,
            models::task::StatusRequestCreate,
            models::task::StatusRequestResolve,
            models::task::ResolveAction,
            models::task::TaskCommentRequest,
            models::payslip::Payslip,
            models::payslip::PayslipLine,
            models::payslip::PayslipCreateRequest,
            models::payslip::PayslipUpdateRequest,
            models::kra::KraDefinition,
            models::kra::KpiSpec,
            models::kra::KraSubmission,
            models::kra::PeriodType,
            models::kra::KraDefinitionCreateRequest,
            models::kra::KraRatingItem,
            models::kra::KraSubmitRequest,
            models::kra::KpiDefinition,
            models::kra::KpiMetric,
            models::kra::MetricCalculateRequest,
            models::attendance::Attendance,
            models::attendance::AttendanceStatus,
            models::attendance::CheckInRequest,
            models::menu::MenuResponse,
            models::menu::MenuOverride,
            models::menu::MenuOverrideRequest
        )
    ),
    tags(
        (name = "Auth", description = "Authentication endpoints"),
        (name = "Employees", description = "Employee directory and records"),
        (name = "Leaves", description = "Leave requests and approval workflow"),
        (name = "Tasks", description = "Tasks, subtasks, and status-change approvals"),
        (name = "Payslips", description = "Payslip records with server-side totals"),
        (name = "KRA", description = "KRA definitions and rating submissions"),
        (name = "KPI", description = "Calculated KPI metrics"),
        (name = "Attendance", description = "Daily check-in/check-out records"),
        (name = "Menu", description = "Per-role navigation visibility"),
        (name = "Health", description = "Service health")
    )
)]
pub struct ApiDoc;

pub fn build_openapi(port: u16) -> anyhow::Result<utoipa::openapi::OpenApi> {
    let mut doc = serde_json::to_value(&ApiDoc::openapi())?;

    ensure_security_components(&mut doc);
    ensure_global_security(&mut doc);
    ensure_servers(&mut doc, port);

    Ok(serde_json::from_value(doc)?)
}

pub fn swagger_routes(doc: utoipa::openapi::OpenApi) -> Router {
    let swagger_config = utoipa_swagger_ui::Config::new(["/api-docs/openapi.json"])
        .try_it_out_enabled(true)
        .with_credentials(true)
        .persist_authorization(true);

    let doc_json = Arc::new(serde_json::to_value(&doc).expect("OpenAPI serialization must succeed"));

    let json_route = {
        let doc_json = Arc::clone(&doc_json);
        get(move || {
            let doc_json = Arc::clone(&doc_json);
            async move { Json((*doc_json).clone()) }
        })
    };

    Router::new()
        .route("/api-docs/openapi.json", json_route)
        .merge(SwaggerUi::new("/docs").config(swagger_config))
}

fn ensure_security_components(doc: &mut Value) {
    if doc.get("components").is_none() {
        doc["components"] = json!({});
    }

    if let Some(components) = doc.get_mut("components").and_then(Value::as_object_mut) {
        let schemes = components
            .entry("securitySchemes")
            .or_insert_with(|| json!({}));
        if let Some(schemes) = schemes.as_object_mut() {
            schemes.insert(
                "bearerAuth".to_string(),
                json!({
                    "type": "http",
                    "scheme": "bearer",
                    "bearerFormat": "JWT"
                }),
            );
        }
    }
}

fn ensure_global_security(doc: &mut Value) {
    // Register/login stay public via their own annotations; everything else
    // expects the Authorize dialog's bearer token.
    if doc.get("security").is_none() {
        doc["security"] = json!([{ "bearerAuth": [] }]);
    }
}

fn ensure_servers(doc: &mut Value, port: u16) {
    if doc.get("servers").is_none() {
        doc["servers"] = json!([
            { "url": format!("http://localhost:{}", port) }
        ]);
    }
}
