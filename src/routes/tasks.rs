use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::Json;
use chrono::{DateTime, Utc};
use sqlx::{Sqlite, SqlitePool, Transaction};
use uuid::Uuid;

use crate::app::AppState;
use crate::authz::guards::{ensure_task_edit, ensure_task_view, is_task_assignee};
use crate::authz::{allow, has_permission, Principal};
use crate::errors::{AppError, AppResult};
use crate::events::{log_activity_with_context, RequestContext};
use crate::jwt::AuthUser;
use crate::models::task::{
    DbStatusChangeRequest, DbSubtask, DbTask, DbTaskComment, ResolveAction, StatusChangeRequest,
    StatusRequestCreate, StatusRequestResolve, Subtask, SubtaskCreateRequest, SubtaskUpdateRequest,
    Task, TaskComment, TaskCommentRequest, TaskCreateRequest, TaskDetail, TaskStatus,
    TaskUpdateRequest,
};
use crate::utils::utc_now;

const SELECT_TASK: &str = "SELECT id, title, description, status, priority, deadline, progress, created_by, created_at, updated_at, deleted_at FROM tasks";
const SELECT_REQUEST: &str = "SELECT id, task_id, requested_by, current_status, requested_status, status, resolved_by, resolution_comment, reassigned_to, created_at, resolved_at FROM status_change_requests";

#[utoipa::path(
    get,
    path = "/tasks",
    tag = "Tasks",
    responses((status = 200, description = "List tasks visible to the caller", body = [Task]))
)]
pub async fn list_tasks(
    State(state): State<AppState>,
    auth: AuthUser,
) -> AppResult<Json<Vec<Task>>> {
    let principal = Principal::load(&state.pool, auth.user_id).await?;

    let rows = if has_permission(Some(principal.role), allow::TASK_EDITORS) {
        let sql = format!("{SELECT_TASK} WHERE deleted_at IS NULL ORDER BY created_at DESC");
        sqlx::query_as::<_, DbTask>(&sql).fetch_all(&state.pool).await?
    } else {
        let sql = format!(
            "{SELECT_TASK} WHERE deleted_at IS NULL AND id IN (SELECT task_id FROM task_assignees WHERE employee_id = ?) ORDER BY created_at DESC"
        );
        sqlx::query_as::<_, DbTask>(&sql)
            .bind(principal.id)
            .fetch_all(&state.pool)
            .await?
    };

    let mut tasks = Vec::with_capacity(rows.len());
    for row in rows {
        let assignees = load_assignees(&state.pool, row.id).await?;
        tasks.push(row.into_task(assignees)?);
    }

    Ok(Json(tasks))
}

#[utoipa::path(
    post,
    path = "/tasks",
    tag = "Tasks",
    request_body = TaskCreateRequest,
    responses((status = 201, description = "Task created", body = Task))
)]
pub async fn create_task(
    State(state): State<AppState>,
    auth: AuthUser,
    headers: HeaderMap,
    Json(payload): Json<TaskCreateRequest>,
) -> AppResult<(StatusCode, Json<Task>)> {
    let principal = Principal::load(&state.pool, auth.user_id).await?;
    ensure_task_edit(&principal)?;

    if payload.title.trim().is_empty() {
        return Err(AppError::bad_request("title must not be empty"));
    }
    if let Some(deadline) = payload.deadline {
        if deadline < utc_now() {
            return Err(AppError::bad_request("deadline must not be in the past"));
        }
    }
    for assignee in &payload.assignee_ids {
        ensure_employee_active(&state.pool, *assignee).await?;
    }

    let task_id = Uuid::new_v4();
    let now = utc_now();
    let priority = payload.priority.unwrap_or(crate::models::task::TaskPriority::Medium);

    let mut tx = state.pool.begin().await?;

    sqlx::query(
        "INSERT INTO tasks (id, title, description, status, priority, deadline, progress, created_by, created_at, updated_at) \
         VALUES (?, ?, ?, 'pending', ?, ?, 0, ?, ?, ?)",
    )
    .bind(task_id)
    .bind(&payload.title)
    .bind(&payload.description)
    .bind(priority.as_str())
    .bind(payload.deadline)
    .bind(principal.id)
    .bind(now)
    .bind(now)
    .execute(&mut *tx)
    .await?;

    for assignee in &payload.assignee_ids {
        sqlx::query("INSERT OR IGNORE INTO task_assignees (task_id, employee_id, created_at) VALUES (?, ?, ?)")
            .bind(task_id)
            .bind(assignee)
            .bind(now)
            .execute(&mut *tx)
            .await?;
    }

    tx.commit().await?;

    let task = load_task(&state.pool, task_id).await?;

    let ctx = RequestContext::from_headers(&headers);
    log_activity_with_context(&state.event_bus, "created", Some(principal.id), &task, None, Some(ctx));

    Ok((StatusCode::CREATED, Json(task)))
}

#[utoipa::path(
    get,
    path = "/tasks/{id}",
    tag = "Tasks",
    params(("id" = Uuid, Path, description = "Task id")),
    responses((status = 200, description = "Task with subtasks, comments, and pending requests", body = TaskDetail))
)]
pub async fn get_task(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(id): Path<Uuid>,
) -> AppResult<Json<TaskDetail>> {
    let principal = Principal::load(&state.pool, auth.user_id).await?;
    let db_task = fetch_task(&state.pool, id).await?;
    ensure_task_view(&state.pool, &principal, db_task.id).await?;

    let assignees = load_assignees(&state.pool, id).await?;
    let task = db_task.into_task(assignees)?;

    let subtask_rows = sqlx::query_as::<_, DbSubtask>(
        "SELECT id, task_id, title, status, progress, created_at, updated_at FROM subtasks WHERE task_id = ? ORDER BY created_at",
    )
    .bind(id)
    .fetch_all(&state.pool)
    .await?;
    let subtasks: Vec<Subtask> = subtask_rows
        .into_iter()
        .map(Subtask::try_from)
        .collect::<Result<_, _>>()?;

    let comment_rows = sqlx::query_as::<_, DbTaskComment>(
        "SELECT id, task_id, author_id, author_role, body, created_at FROM task_comments WHERE task_id = ? ORDER BY created_at",
    )
    .bind(id)
    .fetch_all(&state.pool)
    .await?;
    let comments: Vec<TaskComment> = comment_rows
        .into_iter()
        .map(TaskComment::try_from)
        .collect::<Result<_, _>>()?;

    let request_rows = sqlx::query_as::<_, DbStatusChangeRequest>(&format!(
        "{SELECT_REQUEST} WHERE task_id = ? ORDER BY created_at"
    ))
    .bind(id)
    .fetch_all(&state.pool)
    .await?;
    let status_requests: Vec<StatusChangeRequest> = request_rows
        .into_iter()
        .map(StatusChangeRequest::try_from)
        .collect::<Result<_, _>>()?;

    Ok(Json(TaskDetail {
        task,
        subtasks,
        comments,
        status_requests,
    }))
}

#[utoipa::path(
    put,
    path = "/tasks/{id}",
    tag = "Tasks",
    params(("id" = Uuid, Path, description = "Task id")),
    request_body = TaskUpdateRequest,
    responses((status = 200, description = "Task updated", body = Task))
)]
pub async fn update_task(
    State(state): State<AppState>,
    auth: AuthUser,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
    Json(payload): Json<TaskUpdateRequest>,
) -> AppResult<Json<Task>> {
    let principal = Principal::load(&state.pool, auth.user_id).await?;
    let mut record = fetch_task(&state.pool, id).await?;
    ensure_task_edit(&principal)?;

    let old = load_task(&state.pool, id).await?;

    if let Some(title) = payload.title {
        if title.trim().is_empty() {
            return Err(AppError::bad_request("title must not be empty"));
        }
        record.title = title;
    }
    if payload.description.is_some() {
        record.description = payload.description;
    }
    if let Some(status) = payload.status {
        record.status = status.as_str().to_string();
    }
    if let Some(priority) = payload.priority {
        record.priority = priority.as_str().to_string();
    }
    if let Some(deadline) = payload.deadline {
        if deadline < utc_now() {
            return Err(AppError::bad_request("deadline must not be in the past"));
        }
        record.deadline = Some(deadline);
    }
    if let Some(progress) = payload.progress {
        if !(0..=100).contains(&progress) {
            return Err(AppError::bad_request("progress must be between 0 and 100"));
        }
        record.progress = progress;
    }

    if let Some(assignees) = &payload.assignee_ids {
        for assignee in assignees {
            ensure_employee_active(&state.pool, *assignee).await?;
        }
    }

    let now = utc_now();
    let mut tx = state.pool.begin().await?;

    sqlx::query(
        "UPDATE tasks SET title = ?, description = ?, status = ?, priority = ?, deadline = ?, progress = ?, updated_at = ? WHERE id = ?",
    )
    .bind(&record.title)
    .bind(&record.description)
    .bind(&record.status)
    .bind(&record.priority)
    .bind(record.deadline)
    .bind(record.progress)
    .bind(now)
    .bind(id)
    .execute(&mut *tx)
    .await?;

    if let Some(assignees) = &payload.assignee_ids {
        sqlx::query("DELETE FROM task_assignees WHERE task_id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        for assignee in assignees {
            sqlx::query("INSERT OR IGNORE INTO task_assignees (task_id, employee_id, created_at) VALUES (?, ?, ?)")
                .bind(id)
                .bind(assignee)
                .bind(now)
                .execute(&mut *tx)
                .await?;
        }
    }

    tx.commit().await?;

    let task = load_task(&state.pool, id).await?;

    let ctx = RequestContext::from_headers(&headers);
    log_activity_with_context(&state.event_bus, "updated", Some(principal.id), &task, Some(&old), Some(ctx));

    Ok(Json(task))
}

#[utoipa::path(
    delete,
    path = "/tasks/{id}",
    tag = "Tasks",
    params(("id" = Uuid, Path, description = "Task id")),
    responses((status = 204, description = "Task soft deleted"))
)]
pub async fn delete_task(
    State(state): State<AppState>,
    auth: AuthUser,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
) -> AppResult<StatusCode> {
    let principal = Principal::load(&state.pool, auth.user_id).await?;
    let _ = fetch_task(&state.pool, id).await?;
    ensure_task_edit(&principal)?;

    let task = load_task(&state.pool, id).await?;

    let now = utc_now();
    let affected = sqlx::query("UPDATE tasks SET deleted_at = ?, updated_at = ? WHERE id = ? AND deleted_at IS NULL")
        .bind(now)
        .bind(now)
        .bind(id)
        .execute(&state.pool)
        .await?;

    if affected.rows_affected() == 0 {
        return Err(AppError::not_found("task not found"));
    }

    let ctx = RequestContext::from_headers(&headers);
    log_activity_with_context(&state.event_bus, "deleted", Some(principal.id), &task, None, Some(ctx));

    Ok(StatusCode::NO_CONTENT)
}

#[utoipa::path(
    post,
    path = "/tasks/{id}/subtasks",
    tag = "Tasks",
    params(("id" = Uuid, Path, description = "Task id")),
    request_body = SubtaskCreateRequest,
    responses((status = 201, description = "Subtask created", body = Subtask))
)]
pub async fn create_subtask(
    State(state): State<AppState>,
    auth: AuthUser,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
    Json(payload): Json<SubtaskCreateRequest>,
) -> AppResult<(StatusCode, Json<Subtask>)> {
    let principal = Principal::load(&state.pool, auth.user_id).await?;
    let _ = fetch_task(&state.pool, id).await?;
    ensure_subtask_access(&state.pool, &principal, id).await?;

    if payload.title.trim().is_empty() {
        return Err(AppError::bad_request("title must not be empty"));
    }

    let subtask_id = Uuid::new_v4();
    let now = utc_now();

    let mut tx = state.pool.begin().await?;

    sqlx::query(
        "INSERT INTO subtasks (id, task_id, title, status, progress, created_at, updated_at) VALUES (?, ?, ?, 'pending', 0, ?, ?)",
    )
    .bind(subtask_id)
    .bind(id)
    .bind(&payload.title)
    .bind(now)
    .bind(now)
    .execute(&mut *tx)
    .await?;

    recompute_task_rollup(&mut tx, id, now).await?;
    tx.commit().await?;

    let subtask: Subtask = fetch_subtask(&state.pool, id, subtask_id).await?.try_into()?;

    let ctx = RequestContext::from_headers(&headers);
    log_activity_with_context(&state.event_bus, "created", Some(principal.id), &subtask, None, Some(ctx));

    Ok((StatusCode::CREATED, Json(subtask)))
}

#[utoipa::path(
    put,
    path = "/tasks/{id}/subtasks/{subtask_id}",
    tag = "Tasks",
    params(
        ("id" = Uuid, Path, description = "Task id"),
        ("subtask_id" = Uuid, Path, description = "Subtask id")
    ),
    request_body = SubtaskUpdateRequest,
    responses((status = 200, description = "Subtask updated; parent progress and status re-derived", body = Subtask))
)]
pub async fn update_subtask(
    State(state): State<AppState>,
    auth: AuthUser,
    headers: HeaderMap,
    Path((id, subtask_id)): Path<(Uuid, Uuid)>,
    Json(payload): Json<SubtaskUpdateRequest>,
) -> AppResult<Json<Subtask>> {
    let principal = Principal::load(&state.pool, auth.user_id).await?;
    let _ = fetch_task(&state.pool, id).await?;
    ensure_subtask_access(&state.pool, &principal, id).await?;

    let mut record = fetch_subtask(&state.pool, id, subtask_id).await?;
    let old: Subtask = record.clone().try_into()?;

    if let Some(title) = payload.title {
        if title.trim().is_empty() {
            return Err(AppError::bad_request("title must not be empty"));
        }
        record.title = title;
    }
    if let Some(progress) = payload.progress {
        if !(0..=100).contains(&progress) {
            return Err(AppError::bad_request("progress must be between 0 and 100"));
        }
        record.progress = progress;
    }
    if let Some(status) = payload.status {
        record.status = status.as_str().to_string();
        // A completed subtask counts as fully done unless the caller pinned
        // a progress value in the same payload.
        if status == TaskStatus::Completed && payload.progress.is_none() {
            record.progress = 100;
        }
    }

    let now = utc_now();
    let mut tx = state.pool.begin().await?;

    sqlx::query("UPDATE subtasks SET title = ?, status = ?, progress = ?, updated_at = ? WHERE id = ?")
        .bind(&record.title)
        .bind(&record.status)
        .bind(record.progress)
        .bind(now)
        .bind(subtask_id)
        .execute(&mut *tx)
        .await?;

    recompute_task_rollup(&mut tx, id, now).await?;
    tx.commit().await?;

    let subtask: Subtask = fetch_subtask(&state.pool, id, subtask_id).await?.try_into()?;

    let ctx = RequestContext::from_headers(&headers);
    log_activity_with_context(&state.event_bus, "updated", Some(principal.id), &subtask, Some(&old), Some(ctx));

    Ok(Json(subtask))
}

#[utoipa::path(
    get,
    path = "/tasks/{id}/status-requests",
    tag = "Tasks",
    params(("id" = Uuid, Path, description = "Task id")),
    responses((status = 200, description = "Status change requests for the task", body = [StatusChangeRequest]))
)]
pub async fn list_status_requests(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(id): Path<Uuid>,
) -> AppResult<Json<Vec<StatusChangeRequest>>> {
    let principal = Principal::load(&state.pool, auth.user_id).await?;
    let _ = fetch_task(&state.pool, id).await?;
    ensure_task_view(&state.pool, &principal, id).await?;

    let rows = sqlx::query_as::<_, DbStatusChangeRequest>(&format!(
        "{SELECT_REQUEST} WHERE task_id = ? ORDER BY created_at"
    ))
    .bind(id)
    .fetch_all(&state.pool)
    .await?;

    let requests: Vec<StatusChangeRequest> = rows
        .into_iter()
        .map(StatusChangeRequest::try_from)
        .collect::<Result<_, _>>()?;

    Ok(Json(requests))
}

#[utoipa::path(
    post,
    path = "/tasks/{id}/status-requests",
    tag = "Tasks",
    params(("id" = Uuid, Path, description = "Task id")),
    request_body = StatusRequestCreate,
    responses(
        (status = 201, description = "Request created (pending, or auto-approved when the caller already has edit rights)", body = StatusChangeRequest)
    )
)]
pub async fn create_status_request(
    State(state): State<AppState>,
    auth: AuthUser,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
    Json(payload): Json<StatusRequestCreate>,
) -> AppResult<(StatusCode, Json<StatusChangeRequest>)> {
    let principal = Principal::load(&state.pool, auth.user_id).await?;
    let db_task = fetch_task(&state.pool, id).await?;

    let current = TaskStatus::parse(&db_task.status)
        .ok_or_else(|| AppError::internal(format!("unknown task status: {}", db_task.status)))?;
    if payload.requested_status == current {
        return Err(AppError::bad_request("task is already in the requested status"));
    }

    let can_apply_directly = has_permission(Some(principal.role), allow::TASK_EDITORS)
        || db_task.created_by == principal.id;

    if !can_apply_directly && !is_task_assignee(&state.pool, id, principal.id).await? {
        return Err(AppError::forbidden("only assignees may request a status change"));
    }

    let request_id = Uuid::new_v4();
    let now = utc_now();

    if can_apply_directly {
        // The caller could have edited the task outright; apply the change and
        // record the request as already approved so the trail stays uniform.
        let mut tx = state.pool.begin().await?;

        sqlx::query(
            "INSERT INTO status_change_requests (id, task_id, requested_by, current_status, requested_status, status, resolved_by, created_at, resolved_at) \
             VALUES (?, ?, ?, ?, ?, 'approved', ?, ?, ?)",
        )
        .bind(request_id)
        .bind(id)
        .bind(principal.id)
        .bind(current.as_str())
        .bind(payload.requested_status.as_str())
        .bind(principal.id)
        .bind(now)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        apply_task_status(&mut tx, id, payload.requested_status, now).await?;
        tx.commit().await?;
    } else {
        // Visible task status stays unchanged until someone countersigns.
        sqlx::query(
            "INSERT INTO status_change_requests (id, task_id, requested_by, current_status, requested_status, status, created_at) \
             VALUES (?, ?, ?, ?, ?, 'pending', ?)",
        )
        .bind(request_id)
        .bind(id)
        .bind(principal.id)
        .bind(current.as_str())
        .bind(payload.requested_status.as_str())
        .bind(now)
        .execute(&state.pool)
        .await?;
    }

    let request: StatusChangeRequest = fetch_request(&state.pool, id, request_id).await?.try_into()?;

    let action = if can_apply_directly { "approved" } else { "created" };
    let ctx = RequestContext::from_headers(&headers);
    log_activity_with_context(&state.event_bus, action, Some(principal.id), &request, None, Some(ctx));

    Ok((StatusCode::CREATED, Json(request)))
}

#[utoipa::path(
    post,
    path = "/tasks/{id}/status-requests/{request_id}/resolve",
    tag = "Tasks",
    params(
        ("id" = Uuid, Path, description = "Task id"),
        ("request_id" = Uuid, Path, description = "Status change request id")
    ),
    request_body = StatusRequestResolve,
    responses(
        (status = 200, description = "Request resolved", body = StatusChangeRequest),
        (status = 409, description = "Request already resolved")
    )
)]
pub async fn resolve_status_request(
    State(state): State<AppState>,
    auth: AuthUser,
    headers: HeaderMap,
    Path((id, request_id)): Path<(Uuid, Uuid)>,
    Json(payload): Json<StatusRequestResolve>,
) -> AppResult<Json<StatusChangeRequest>> {
    let principal = Principal::load(&state.pool, auth.user_id).await?;
    let db_task = fetch_task(&state.pool, id).await?;
    let db_request = fetch_request(&state.pool, id, request_id).await?;

    // Countersignature: task editors or the task's assigner.
    if !has_permission(Some(principal.role), allow::TASK_EDITORS) && db_task.created_by != principal.id {
        return Err(AppError::forbidden("only task editors or the assigner may resolve status requests"));
    }

    if db_request.status != "pending" {
        return Err(AppError::conflict(format!(
            "status request is already {}",
            db_request.status
        )));
    }

    let requested_status = TaskStatus::parse(&db_request.requested_status)
        .ok_or_else(|| AppError::internal(format!("unknown task status: {}", db_request.requested_status)))?;

    // Resolving a sibling leaves other pending requests on this task
    // untouched; each one is countersigned independently.
    let (new_status, reassigned_to) = match payload.action {
        ResolveAction::Approve => ("approved", None),
        ResolveAction::Reject => ("rejected", None),
        ResolveAction::Reassign => {
            let target = payload
                .reassign_to
                .ok_or_else(|| AppError::bad_request("reassign_to is required for reassign"))?;
            ensure_employee_active(&state.pool, target).await?;
            ("reassigned", Some(target))
        }
    };

    let now = utc_now();
    let mut tx = state.pool.begin().await?;

    let affected = sqlx::query(
        "UPDATE status_change_requests SET status = ?, resolved_by = ?, resolution_comment = ?, reassigned_to = ?, resolved_at = ? \
         WHERE id = ? AND status = 'pending'",
    )
    .bind(new_status)
    .bind(principal.id)
    .bind(&payload.comment)
    .bind(reassigned_to)
    .bind(now)
    .bind(request_id)
    .execute(&mut *tx)
    .await?;

    if affected.rows_affected() == 0 {
        return Err(AppError::conflict("status request was resolved concurrently"));
    }

    match payload.action {
        ResolveAction::Approve => {
            apply_task_status(&mut tx, id, requested_status, now).await?;
        }
        ResolveAction::Reject => {}
        ResolveAction::Reassign => {
            // Swap the requesting assignee out; the task status stays as-is.
            sqlx::query("DELETE FROM task_assignees WHERE task_id = ? AND employee_id = ?")
                .bind(id)
                .bind(db_request.requested_by)
                .execute(&mut *tx)
                .await?;
            sqlx::query("INSERT OR IGNORE INTO task_assignees (task_id, employee_id, created_at) VALUES (?, ?, ?)")
                .bind(id)
                .bind(reassigned_to)
                .bind(now)
                .execute(&mut *tx)
                .await?;
        }
    }

    tx.commit().await?;

    let request: StatusChangeRequest = fetch_request(&state.pool, id, request_id).await?.try_into()?;

    let ctx = RequestContext::from_headers(&headers);
    log_activity_with_context(&state.event_bus, new_status, Some(principal.id), &request, None, Some(ctx));

    Ok(Json(request))
}

#[utoipa::path(
    get,
    path = "/tasks/{id}/comments",
    tag = "Tasks",
    params(("id" = Uuid, Path, description = "Task id")),
    responses((status = 200, description = "Comments on the task", body = [TaskComment]))
)]
pub async fn list_comments(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(id): Path<Uuid>,
) -> AppResult<Json<Vec<TaskComment>>> {
    let principal = Principal::load(&state.pool, auth.user_id).await?;
    let _ = fetch_task(&state.pool, id).await?;
    ensure_task_view(&state.pool, &principal, id).await?;

    let rows = sqlx::query_as::<_, DbTaskComment>(
        "SELECT id, task_id, author_id, author_role, body, created_at FROM task_comments WHERE task_id = ? ORDER BY created_at",
    )
    .bind(id)
    .fetch_all(&state.pool)
    .await?;

    let comments: Vec<TaskComment> = rows
        .into_iter()
        .map(TaskComment::try_from)
        .collect::<Result<_, _>>()?;

    Ok(Json(comments))
}

#[utoipa::path(
    post,
    path = "/tasks/{id}/comments",
    tag = "Tasks",
    params(("id" = Uuid, Path, description = "Task id")),
    request_body = TaskCommentRequest,
    responses((status = 201, description = "Comment appended", body = TaskComment))
)]
pub async fn add_comment(
    State(state): State<AppState>,
    auth: AuthUser,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
    Json(payload): Json<TaskCommentRequest>,
) -> AppResult<(StatusCode, Json<TaskComment>)> {
    let principal = Principal::load(&state.pool, auth.user_id).await?;
    let _ = fetch_task(&state.pool, id).await?;
    ensure_task_view(&state.pool, &principal, id).await?;

    if payload.body.trim().is_empty() {
        return Err(AppError::bad_request("comment body must not be empty"));
    }

    let comment_id = Uuid::new_v4();
    let now = utc_now();

    sqlx::query(
        "INSERT INTO task_comments (id, task_id, author_id, author_role, body, created_at) VALUES (?, ?, ?, ?, ?, ?)",
    )
    .bind(comment_id)
    .bind(id)
    .bind(principal.id)
    .bind(principal.role.as_str())
    .bind(&payload.body)
    .bind(now)
    .execute(&state.pool)
    .await?;

    let comment = TaskComment {
        id: comment_id,
        task_id: id,
        author_id: principal.id,
        author_role: principal.role,
        body: payload.body,
        created_at: now,
    };

    let ctx = RequestContext::from_headers(&headers);
    log_activity_with_context(&state.event_bus, "created", Some(principal.id), &comment, None, Some(ctx));

    Ok((StatusCode::CREATED, Json(comment)))
}

async fn fetch_task(pool: &SqlitePool, id: Uuid) -> AppResult<DbTask> {
    let sql = format!("{SELECT_TASK} WHERE id = ? AND deleted_at IS NULL");
    sqlx::query_as::<_, DbTask>(&sql)
        .bind(id)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| AppError::not_found("task not found"))
}

async fn fetch_subtask(pool: &SqlitePool, task_id: Uuid, subtask_id: Uuid) -> AppResult<DbSubtask> {
    sqlx::query_as::<_, DbSubtask>(
        "SELECT id, task_id, title, status, progress, created_at, updated_at FROM subtasks WHERE id = ? AND task_id = ?",
    )
    .bind(subtask_id)
    .bind(task_id)
    .fetch_optional(pool)
    .await?
    .ok_or_else(|| AppError::not_found("subtask not found"))
}

async fn fetch_request(pool: &SqlitePool, task_id: Uuid, request_id: Uuid) -> AppResult<DbStatusChangeRequest> {
    let sql = format!("{SELECT_REQUEST} WHERE id = ? AND task_id = ?");
    sqlx::query_as::<_, DbStatusChangeRequest>(&sql)
        .bind(request_id)
        .bind(task_id)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| AppError::not_found("status change request not found"))
}

async fn load_assignees(pool: &SqlitePool, task_id: Uuid) -> AppResult<Vec<Uuid>> {
    let assignees: Vec<Uuid> = sqlx::query_scalar(
        "SELECT employee_id FROM task_assignees WHERE task_id = ? ORDER BY created_at",
    )
    .bind(task_id)
    .fetch_all(pool)
    .await?;

    Ok(assignees)
}

async fn load_task(pool: &SqlitePool, task_id: Uuid) -> AppResult<Task> {
    let db_task = fetch_task(pool, task_id).await?;
    let assignees = load_assignees(pool, task_id).await?;
    db_task.into_task(assignees)
}

/// Subtasks may be worked by the task's assignees as well as by task editors.
async fn ensure_subtask_access(pool: &SqlitePool, principal: &Principal, task_id: Uuid) -> AppResult<()> {
    if has_permission(Some(principal.role), allow::TASK_EDITORS)
        || is_task_assignee(pool, task_id, principal.id).await?
    {
        return Ok(());
    }
    Err(AppError::forbidden("only assignees or task editors may modify subtasks"))
}

async fn ensure_employee_active(pool: &SqlitePool, employee_id: Uuid) -> AppResult<()> {
    let exists: bool = sqlx::query_scalar(
        "SELECT EXISTS(SELECT 1 FROM employees WHERE id = ? AND is_active = 1 AND deleted_at IS NULL)",
    )
    .bind(employee_id)
    .fetch_one(pool)
    .await?;

    if !exists {
        return Err(AppError::bad_request("employee does not exist or is inactive"));
    }

    Ok(())
}

async fn apply_task_status(
    tx: &mut Transaction<'_, Sqlite>,
    task_id: Uuid,
    status: TaskStatus,
    now: DateTime<Utc>,
) -> AppResult<()> {
    if status == TaskStatus::Completed {
        sqlx::query("UPDATE tasks SET status = ?, progress = 100, updated_at = ? WHERE id = ?")
            .bind(status.as_str())
            .bind(now)
            .bind(task_id)
            .execute(&mut **tx)
            .await?;
    } else {
        sqlx::query("UPDATE tasks SET status = ?, updated_at = ? WHERE id = ?")
            .bind(status.as_str())
            .bind(now)
            .bind(task_id)
            .execute(&mut **tx)
            .await?;
    }

    Ok(())
}

/// Re-derives the parent's progress (mean of subtask progress) and status
/// from its subtasks. Runs inside the same transaction as the subtask write
/// so readers never see the two out of sync. Cancelled tasks are left alone.
async fn recompute_task_rollup(
    tx: &mut Transaction<'_, Sqlite>,
    task_id: Uuid,
    now: DateTime<Utc>,
) -> AppResult<()> {
    let (count, avg, completed): (i64, Option<f64>, i64) = sqlx::query_as(
        "SELECT COUNT(*), AVG(progress), COALESCE(SUM(CASE WHEN status = 'completed' THEN 1 ELSE 0 END), 0) FROM subtasks WHERE task_id = ?",
    )
    .bind(task_id)
    .fetch_one(&mut **tx)
    .await?;

    if count == 0 {
        return Ok(());
    }

    let current: String = sqlx::query_scalar("SELECT status FROM tasks WHERE id = ?")
        .bind(task_id)
        .fetch_one(&mut **tx)
        .await?;

    if current == "cancelled" {
        return Ok(());
    }

    let progress = avg.unwrap_or(0.0).round() as i32;
    let status = if completed == count {
        "completed"
    } else if progress > 0 {
        "in_progress"
    } else {
        current.as_str()
    };

    sqlx::query("UPDATE tasks SET progress = ?, status = ?, updated_at = ? WHERE id = ?")
        .bind(progress)
        .bind(status)
        .bind(now)
        .bind(task_id)
        .execute(&mut **tx)
        .await?;

    Ok(())
}
