//! HTTP handlers for the task API.
//!
//! # Routes
//!
//! ```text
//! POST {base}/create-task       {"zipArchivePath","zipArchiveName"} -> {"message","taskID"}
//! GET  {base}/get?task-id=N     -> {"taskID","status","archiveLink"?,"files","completedFiles"}
//! POST {base}/add-file-to-task  {"taskID","fileURL","fileName"}     -> {"message","taskID"}
//! GET  /health                  -> "ok"
//! ```
//!
//! Extractor rejections are converted to [`ApiError::BadRequest`] so every
//! failure answers with the same JSON error body.

use std::sync::Arc;

use archiver_core::{ArchiveLocation, TaskId, TaskStatus, TaskView};
use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{Query, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::ApiError;
use crate::state::AppState;

/// Body of `POST {base}/create-task`.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateTaskRequest {
    /// Directory the archive is written into.
    pub zip_archive_path: String,
    /// Archive base name, without the `.zip` extension.
    pub zip_archive_name: String,
}

/// Body of `POST {base}/add-file-to-task`.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AddFileRequest {
    /// Target task.
    #[serde(rename = "taskID")]
    pub task_id: u64,
    /// Source URL of the file.
    #[serde(rename = "fileURL")]
    pub file_url: String,
    /// Name of the file inside the archive, without extension.
    #[serde(rename = "fileName")]
    pub file_name: String,
}

/// Query string of `GET {base}/get`.
#[derive(Debug, Clone, Deserialize)]
pub struct TaskQuery {
    /// Task to report on.
    #[serde(rename = "task-id")]
    pub task_id: u64,
}

/// Reply to task creation and file addition.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct TaskAck {
    /// Human-readable outcome.
    pub message: String,
    /// Task the operation applied to.
    #[serde(rename = "taskID")]
    pub task_id: TaskId,
}

/// Reply to a status query.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskStatusResponse {
    /// Task identity.
    #[serde(rename = "taskID")]
    pub task_id: TaskId,
    /// Lifecycle state.
    pub status: TaskStatus,
    /// Path of the finished archive; omitted until the task is completed.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub archive_link: Option<String>,
    /// Archive entry names of the stored files, in storage order.
    pub files: Vec<String>,
    /// Number of stored files.
    pub completed_files: usize,
}

impl From<TaskView> for TaskStatusResponse {
    fn from(view: TaskView) -> Self {
        Self {
            task_id: view.id,
            status: view.status,
            archive_link: view.archive_link,
            files: view.files,
            completed_files: view.completed_files,
        }
    }
}

/// Build the API router.
///
/// Task routes are nested under `base_path` (for example `/api-tasks`, or
/// `/` to serve them at the root); `/health` is always served at the root.
pub fn router(state: AppState, base_path: &str) -> Router {
    let tasks = Router::new()
        .route("/create-task", post(create_task))
        .route("/get", get(get_task_status))
        .route("/add-file-to-task", post(add_file_to_task));

    let app = if base_path == "/" {
        tasks
    } else {
        Router::new().nest(base_path, tasks)
    };
    app.route("/health", get(health))
        .with_state(state)
}

/// `POST {base}/create-task`
pub async fn create_task(
    State(state): State<AppState>,
    body: Result<Json<CreateTaskRequest>, JsonRejection>,
) -> Result<Json<TaskAck>, ApiError> {
    let Json(request) = body.map_err(|e| ApiError::BadRequest(e.body_text()))?;
    let location = ArchiveLocation::new(request.zip_archive_path, request.zip_archive_name);

    let registry = Arc::clone(state.registry());
    let task_id = tokio::task::spawn_blocking(move || registry.create_task(&location))
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))??;
    Ok(Json(TaskAck {
        message: format!("task {task_id} created"),
        task_id,
    }))
}

/// `GET {base}/get?task-id=N`
pub async fn get_task_status(
    State(state): State<AppState>,
    query: Result<Query<TaskQuery>, QueryRejection>,
) -> Result<Json<TaskStatusResponse>, ApiError> {
    let Query(query) = query.map_err(|e| ApiError::BadRequest(e.body_text()))?;
    let view = state.registry().task_status(TaskId::new(query.task_id))?;
    Ok(Json(view.into()))
}

/// `POST {base}/add-file-to-task`
///
/// The fetch and write are bounded by the request deadline. A timed-out
/// addition releases its slot; a write already handed to the archive still
/// lands and is counted.
pub async fn add_file_to_task(
    State(state): State<AppState>,
    body: Result<Json<AddFileRequest>, JsonRejection>,
) -> Result<Json<TaskAck>, ApiError> {
    let Json(request) = body.map_err(|e| ApiError::BadRequest(e.body_text()))?;
    let task_id = TaskId::new(request.task_id);

    let addition =
        state
            .registry()
            .add_file_to_task(task_id, &request.file_url, &request.file_name);
    match tokio::time::timeout(state.request_timeout(), addition).await {
        Ok(result) => result?,
        Err(_) => {
            warn!(
                task_id = %task_id,
                url = %request.file_url,
                timeout_ms = state.request_timeout().as_millis(),
                "file addition exceeded request deadline"
            );
            return Err(ApiError::DeadlineExceeded);
        },
    }

    debug!(task_id = %task_id, file = %request.file_name, "file addition acknowledged");
    Ok(Json(TaskAck {
        message: format!("file {} added to task {task_id}", request.file_name),
        task_id,
    }))
}

/// `GET /health`
pub async fn health() -> &'static str {
    "ok"
}
