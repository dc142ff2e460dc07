use std::sync::Arc;

use axum::http::Method;
use axum::routing::{get, post, put};
use axum::Router;
use sqlx::SqlitePool;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::errors::AppError;
use crate::events::{init_event_bus, start_activity_listener, EventBus};
use crate::jwt::JwtConfig;
use crate::routes::{attendance, auth, employees, health, kpi, kra, leaves, menu, payslips, tasks};

#[derive(Clone)]
pub struct AppState {
    pub pool: SqlitePool,
    pub jwt: Arc<JwtConfig>,
    pub event_bus: EventBus,
}

impl AppState {
    pub fn new(pool: SqlitePool, jwt: JwtConfig, event_bus: EventBus) -> Self {
        Self {
            pool,
            jwt: Arc::new(jwt),
            event_bus,
        }
    }
}

pub async fn create_app(pool: SqlitePool) -> Result<Router, AppError> {
    let jwt_config = JwtConfig::from_env()?;

    let (event_bus, rx) = init_event_bus();
    // The listener owns its pool handle; activity persistence is decoupled
    // from request handling and never joins a request transaction.
    tokio::spawn(start_activity_listener(rx, pool.clone()));

    let state = AppState::new(pool, jwt_config, event_bus);

    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE, Method::OPTIONS])
        .allow_origin(Any)
        .allow_headers(Any);

    let auth_routes = Router::new()
        .route("/register", post(auth::register))
        .route("/login", post(auth::login))
        .route("/me", get(auth::me))
        .route("/logout", post(auth::logout));

    let employee_routes = Router::new()
        .route("/", get(employees::list_employees).post(employees::create_employee))
        .route(
            "/:id",
            get(employees::get_employee)
                .put(employees::update_employee)
                .delete(employees::delete_employee),
        )
        .route("/:id/reports", get(employees::list_reports));

    let leave_routes = Router::new()
        .route("/", get(leaves::list_leaves).post(leaves::create_leave))
        .route("/:id", get(leaves::get_leave))
        .route("/:id/approve", post(leaves::approve_leave))
        .route("/:id/reject", post(leaves::reject_leave))
        .route("/:id/comments", get(leaves::list_comments).post(leaves::add_comment));

    let task_routes = Router::new()
        .route("/", get(tasks::list_tasks).post(tasks::create_task))
        .route(
            "/:id",
            get(tasks::get_task).put(tasks::update_task).delete(tasks::delete_task),
        )
        .route("/:id/subtasks", post(tasks::create_subtask))
        .route("/:id/subtasks/:subtask_id", put(tasks::update_subtask))
        .route("/:id/comments", get(tasks::list_comments).post(tasks::add_comment))
        .route(
            "/:id/status-requests",
            get(tasks::list_status_requests).post(tasks::create_status_request),
        )
        .route(
            "/:id/status-requests/:request_id/resolve",
            post(tasks::resolve_status_request),
        );

    let payslip_routes = Router::new()
        .route("/", get(payslips::list_payslips).post(payslips::create_payslip))
        .route(
            "/:id",
            get(payslips::get_payslip)
                .put(payslips::update_payslip)
                .delete(payslips::delete_payslip),
        );

    let kra_routes = Router::new()
        .route("/definitions", get(kra::list_definitions).post(kra::create_definition))
        .route("/submissions", get(kra::list_submissions).post(kra::submit_ratings));

    let kpi_routes = Router::new()
        .route("/metrics", get(kpi::list_metrics))
        .route("/metrics/calculate", post(kpi::calculate_metrics));

    let attendance_routes = Router::new()
        .route("/", get(attendance::list_attendance))
        .route("/check-in", post(attendance::check_in))
        .route("/check-out", post(attendance::check_out));

    let menu_routes = Router::new()
        .route("/", get(menu::get_menu))
        .route("/:role", put(menu::put_override).delete(menu::delete_override));

    let router = Router::new()
        .route("/api/health", get(health::health))
        .nest("/auth", auth_routes)
        .nest("/employees", employee_routes)
        .nest("/leaves", leave_routes)
        .nest("/tasks", task_routes)
        .nest("/payslips", payslip_routes)
        .nest("/kra", kra_routes)
        .nest("/kpi", kpi_routes)
        .nest("/attendance", attendance_routes)
        .nest("/menu", menu_routes)
        .with_state(state)
        .layer(cors)
        .layer(TraceLayer::new_for_http());

    Ok(router)
}
