use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::Json;

use crate::app::AppState;
use crate::authz::guards::ensure_role;
use crate::authz::{allow, Principal, Role};
use crate::errors::{AppError, AppResult};
use crate::events::{log_activity_with_context, RequestContext};
use crate::jwt::AuthUser;
use crate::models::menu::{
    default_sections, DbMenuOverride, MenuOverride, MenuOverrideRequest, MenuResponse, SECTIONS,
};
use crate::utils::utc_now;

#[utoipa::path(
    get,
    path = "/menu",
    tag = "Menu",
    responses((status = 200, description = "Navigable sections for the caller's role", body = MenuResponse))
)]
pub async fn get_menu(
    State(state): State<AppState>,
    auth: AuthUser,
) -> AppResult<Json<MenuResponse>> {
    let principal = Principal::load(&state.pool, auth.user_id).await?;

    let stored = sqlx::query_as::<_, DbMenuOverride>(
        "SELECT role, sections, updated_at FROM menu_overrides WHERE role = ?",
    )
    .bind(principal.role.as_str())
    .fetch_optional(&state.pool)
    .await?;

    let (sections, overridden) = match stored {
        Some(row) => {
            let sections: Vec<String> = serde_json::from_str(&row.sections)
                .map_err(|err| AppError::internal(format!("corrupt menu override: {err}")))?;
            (sections, true)
        }
        None => (
            default_sections(principal.role).iter().map(|s| s.to_string()).collect(),
            false,
        ),
    };

    Ok(Json(MenuResponse {
        role: principal.role,
        sections,
        overridden,
    }))
}

#[utoipa::path(
    put,
    path = "/menu/{role}",
    tag = "Menu",
    params(("role" = String, Path, description = "Role name, e.g. `Manager`")),
    request_body = MenuOverrideRequest,
    responses(
        (status = 200, description = "Override stored", body = MenuOverride),
        (status = 400, description = "Unknown section name")
    )
)]
pub async fn put_override(
    State(state): State<AppState>,
    auth: AuthUser,
    headers: HeaderMap,
    Path(role): Path<String>,
    Json(payload): Json<MenuOverrideRequest>,
) -> AppResult<Json<MenuOverride>> {
    let principal = Principal::load(&state.pool, auth.user_id).await?;
    ensure_role(&principal, allow::MENU_ADMINS, "overriding menu visibility")?;

    let role = Role::parse(&role).ok_or_else(|| AppError::not_found(format!("unknown role: {role}")))?;

    for section in &payload.sections {
        if !SECTIONS.contains(&section.as_str()) {
            return Err(AppError::bad_request(format!("unknown section: {section}")));
        }
    }

    let now = utc_now();
    let sections_json = serde_json::to_string(&payload.sections)
        .map_err(|err| AppError::internal(format!("failed to encode sections: {err}")))?;

    sqlx::query(
        "INSERT INTO menu_overrides (role, sections, updated_at) VALUES (?, ?, ?) \
         ON CONFLICT(role) DO UPDATE SET sections = excluded.sections, updated_at = excluded.updated_at",
    )
    .bind(role.as_str())
    .bind(&sections_json)
    .bind(now)
    .execute(&state.pool)
    .await?;

    let override_row = MenuOverride {
        role,
        sections: payload.sections,
        updated_at: now,
    };

    let ctx = RequestContext::from_headers(&headers);
    log_activity_with_context(&state.event_bus, "updated", Some(principal.id), &override_row, None, Some(ctx));

    Ok(Json(override_row))
}

#[utoipa::path(
    delete,
    path = "/menu/{role}",
    tag = "Menu",
    params(("role" = String, Path, description = "Role name")),
    responses((status = 204, description = "Override removed; role falls back to defaults"))
)]
pub async fn delete_override(
    State(state): State<AppState>,
    auth: AuthUser,
    headers: HeaderMap,
    Path(role): Path<String>,
) -> AppResult<StatusCode> {
    let principal = Principal::load(&state.pool, auth.user_id).await?;
    ensure_role(&principal, allow::MENU_ADMINS, "overriding menu visibility")?;

    let role = Role::parse(&role).ok_or_else(|| AppError::not_found(format!("unknown role: {role}")))?;

    let affected = sqlx::query("DELETE FROM menu_overrides WHERE role = ?")
        .bind(role.as_str())
        .execute(&state.pool)
        .await?;

    if affected.rows_affected() == 0 {
        return Err(AppError::not_found("no override stored for this role"));
    }

    let removed = MenuOverride {
        role,
        sections: Vec::new(),
        updated_at: utc_now(),
    };
    let ctx = RequestContext::from_headers(&headers);
    log_activity_with_context(&state.event_bus, "deleted", Some(principal.id), &removed, None, Some(ctx));

    Ok(StatusCode::NO_CONTENT)
}
