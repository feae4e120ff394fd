//! HTTP routes for users and their tasks.
//!
//! Handlers parse path ids and JSON bodies, call the domain services and map
//! `CoreError` onto status codes with the shared `{"error": {...}}` body.

use axum::extract::rejection::JsonRejection;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use domain::{CoreError, Resource, Task, TaskDraft, TaskId, User, UserDraft, UserId};
use serde::{Deserialize, Serialize};
use tracing::{error, warn};

use crate::AppState;

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/users", get(list_users).post(create_user))
        .route(
            "/users/:id",
            get(get_user)
                .put(replace_user)
                .patch(patch_user)
                .delete(delete_user),
        )
        .route("/users/:id/tasks", get(list_tasks).post(create_task))
        .route(
            "/users/:id/tasks/:task_id",
            get(get_task).put(update_task).delete(delete_task),
        )
        .with_state(state)
}

enum ApiError {
    Core(CoreError),
    InvalidId(String),
    BadRequest(String),
}

impl From<CoreError> for ApiError {
    fn from(e: CoreError) -> Self {
        Self::Core(e)
    }
}

impl From<JsonRejection> for ApiError {
    fn from(r: JsonRejection) -> Self {
        Self::BadRequest(r.body_text())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, body) = match self {
            ApiError::InvalidId(raw) => (
                StatusCode::BAD_REQUEST,
                http_common::json_error_with_message("invalid_id", &format!("not a valid id: {raw}")),
            ),
            ApiError::BadRequest(msg) => (
                StatusCode::BAD_REQUEST,
                http_common::json_error_with_message("bad_request", &msg),
            ),
            ApiError::Core(CoreError::NotFound(Resource::User)) => {
                (StatusCode::NOT_FOUND, http_common::json_err("user_not_found"))
            }
            ApiError::Core(CoreError::NotFound(Resource::Task)) => {
                (StatusCode::NOT_FOUND, http_common::json_err("task_not_found"))
            }
            ApiError::Core(CoreError::NoTasksFound) => {
                (StatusCode::NOT_FOUND, http_common::json_err("no_tasks"))
            }
            ApiError::Core(CoreError::AlreadyExists(msg)) => (
                StatusCode::CONFLICT,
                http_common::json_error_with_message("conflict", &msg),
            ),
            ApiError::Core(CoreError::InvalidInput(msg)) => (
                StatusCode::BAD_REQUEST,
                http_common::json_error_with_message("bad_request", &msg),
            ),
            ApiError::Core(e @ CoreError::Repository(_)) => {
                error!(err = %e, "request failed");
                (StatusCode::INTERNAL_SERVER_ERROR, http_common::json_err("internal"))
            }
        };
        (status, Json(body)).into_response()
    }
}

fn user_id(raw: &str) -> Result<UserId, ApiError> {
    UserId::parse_str(raw).map_err(|_| {
        warn!(id = raw, "bad user id in path");
        ApiError::InvalidId(raw.to_string())
    })
}

fn task_id(raw: &str) -> Result<TaskId, ApiError> {
    TaskId::parse_str(raw).map_err(|_| {
        warn!(id = raw, "bad task id in path");
        ApiError::InvalidId(raw.to_string())
    })
}

#[derive(Deserialize)]
struct UserReq {
    username: String,
    email: String,
}

#[derive(Deserialize)]
struct TaskReq {
    title: String,
    description: String,
    #[serde(default)]
    completed: bool,
}

impl From<UserReq> for UserDraft {
    fn from(r: UserReq) -> Self {
        UserDraft::new(r.username, r.email)
    }
}

impl From<TaskReq> for TaskDraft {
    fn from(r: TaskReq) -> Self {
        TaskDraft {
            title: r.title,
            description: r.description,
            completed: r.completed,
        }
    }
}

#[derive(Serialize)]
struct UserOut {
    id: String,
    username: String,
    email: String,
    created_at: String,
    updated_at: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tasks: Vec<TaskOut>,
}

#[derive(Serialize)]
struct TaskOut {
    id: String,
    user_id: String,
    title: String,
    description: String,
    completed: bool,
    created_at: String,
    updated_at: String,
}

fn user_to_out(user: User) -> UserOut {
    UserOut {
        id: user.id.to_string(),
        username: user.username,
        email: user.email.as_str().to_string(),
        created_at: http_common::system_time_to_rfc3339(user.created_at),
        updated_at: http_common::system_time_to_rfc3339(user.updated_at),
        tasks: user.tasks.into_iter().map(task_to_out).collect(),
    }
}

fn task_to_out(task: Task) -> TaskOut {
    TaskOut {
        id: task.id.to_string(),
        user_id: task.user_id.to_string(),
        title: task.title,
        description: task.description,
        completed: task.completed,
        created_at: http_common::system_time_to_rfc3339(task.created_at),
        updated_at: http_common::system_time_to_rfc3339(task.updated_at),
    }
}

async fn health() -> impl IntoResponse {
    Json(serde_json::json!({"status": "ok"}))
}

async fn create_user(
    State(state): State<AppState>,
    body: Result<Json<UserReq>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Json(body) = body?;
    let user = state.users.register_user(body.into())?;
    Ok((StatusCode::CREATED, Json(user_to_out(user))))
}

async fn list_users(State(state): State<AppState>) -> Result<impl IntoResponse, ApiError> {
    let users = state.users.get_all_users()?;
    Ok(Json(users.into_iter().map(user_to_out).collect::<Vec<_>>()))
}

async fn get_user(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let id = user_id(&id)?;
    Ok(Json(user_to_out(state.users.get_user_by_id(&id)?)))
}

async fn replace_user(
    State(state): State<AppState>,
    Path(id): Path<String>,
    body: Result<Json<UserReq>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let id = user_id(&id)?;
    let Json(body) = body?;
    Ok(Json(user_to_out(state.users.update_user(&id, body.into())?)))
}

/// Partial update from a JSON object. Every value must be a string; the key
/// allow-list is enforced by the service.
async fn patch_user(
    State(state): State<AppState>,
    Path(id): Path<String>,
    body: Result<Json<serde_json::Map<String, serde_json::Value>>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let id = user_id(&id)?;
    let Json(fields) = body?;
    let mut pairs = Vec::with_capacity(fields.len());
    for (key, value) in fields {
        match value {
            serde_json::Value::String(s) => pairs.push((key, s)),
            _ => return Err(ApiError::BadRequest(format!("field {key} must be a string"))),
        }
    }
    Ok(Json(user_to_out(
        state.users.update_user_fields_from_map(&id, pairs)?,
    )))
}

async fn delete_user(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    let id = user_id(&id)?;
    state.users.delete_user(&id)?;
    Ok(StatusCode::NO_CONTENT)
}

async fn create_task(
    State(state): State<AppState>,
    Path(id): Path<String>,
    body: Result<Json<TaskReq>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let id = user_id(&id)?;
    let Json(body) = body?;
    let task = state.tasks.create_task(&id, body.into())?;
    Ok((StatusCode::CREATED, Json(task_to_out(task))))
}

async fn list_tasks(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let id = user_id(&id)?;
    let tasks = state.tasks.find_user_tasks(&id)?;
    Ok(Json(tasks.into_iter().map(task_to_out).collect::<Vec<_>>()))
}

async fn get_task(
    State(state): State<AppState>,
    Path((id, tid)): Path<(String, String)>,
) -> Result<impl IntoResponse, ApiError> {
    let (id, tid) = (user_id(&id)?, task_id(&tid)?);
    Ok(Json(task_to_out(state.tasks.find_task_by_id(&id, &tid)?)))
}

async fn update_task(
    State(state): State<AppState>,
    Path((id, tid)): Path<(String, String)>,
    body: Result<Json<TaskReq>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let (id, tid) = (user_id(&id)?, task_id(&tid)?);
    let Json(body) = body?;
    Ok(Json(task_to_out(
        state.tasks.update_task(&id, &tid, body.into())?,
    )))
}

async fn delete_task(
    State(state): State<AppState>,
    Path((id, tid)): Path<(String, String)>,
) -> Result<StatusCode, ApiError> {
    let (id, tid) = (user_id(&id)?, task_id(&tid)?);
    state.tasks.delete_task(&id, &tid)?;
    Ok(StatusCode::NO_CONTENT)
}
