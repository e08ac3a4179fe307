use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::StatusCode,
    routing::{delete, get},
    Json, Router,
};
use tracing::{instrument, warn};
use uuid::Uuid;

use super::{
    dto::{DeletedFileResponse, FileListResponse, SaveFileRequest, SavedFileResponse},
    services::{validate_upload, NOT_FOUND_OR_FOREIGN},
};
use crate::{
    auth::extractors::AuthUser,
    error::{AppError, AppResult},
    state::AppState,
};

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/files", get(list_files).post(save_file))
        .route("/files/{file_id}", delete(delete_file))
}

#[instrument(skip_all, fields(user_id = %user.user_id))]
pub async fn save_file(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    payload: Result<Json<SaveFileRequest>, JsonRejection>,
) -> AppResult<(StatusCode, Json<SavedFileResponse>)> {
    let Json(payload) = payload.map_err(|e| {
        warn!(error = %e.body_text(), "rejected upload body");
        AppError::validation("Missing required file data")
    })?;
    let input = validate_upload(payload)?;
    let file = state.files.save(user.user_id, input).await?;
    Ok((
        StatusCode::CREATED,
        Json(SavedFileResponse {
            success: true,
            file,
        }),
    ))
}

#[instrument(skip_all, fields(user_id = %user.user_id))]
pub async fn list_files(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
) -> AppResult<Json<FileListResponse>> {
    let files = state.files.list(user.user_id).await?;
    Ok(Json(FileListResponse {
        success: true,
        files,
    }))
}

#[instrument(skip(state, user), fields(user_id = %user.user_id))]
pub async fn delete_file(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Path(file_id): Path<String>,
) -> AppResult<Json<DeletedFileResponse>> {
    // a malformed id cannot name one of the caller's files
    let file_id: Uuid = file_id
        .parse()
        .map_err(|_| AppError::NotFound(NOT_FOUND_OR_FOREIGN.into()))?;
    state.files.delete(user.user_id, file_id).await?;
    Ok(Json(DeletedFileResponse {
        success: true,
        message: "File deleted".into(),
    }))
}
