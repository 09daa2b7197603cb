use crate::AppState;
use crate::api::error::AppError;
use crate::services::linked_file::{
    CreateLinkedFileRequest, LinkedFileParams, RefreshLinkedFileRequest,
};
use crate::utils::auth::Claims;
use axum::{
    Extension, Json,
    extract::{Path, State},
};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use validator::Validate;

#[derive(Deserialize, ToSchema, Validate)]
pub struct CreateLinkedFileBody {
    #[validate(length(min = 1, max = 150, message = "Name must be 1-150 characters"))]
    pub name: String,
    #[validate(length(min = 1, message = "parent_folder_id is required"))]
    pub parent_folder_id: String,
    /// One of `url`, `project_file`, `project_output_file`
    pub provider: String,
    #[serde(default)]
    pub data: LinkedFileParams,
}

#[derive(Serialize, ToSchema)]
pub struct LinkedFileResponse {
    pub new_file_id: String,
}

#[utoipa::path(
    post,
    path = "/project/{project_id}/linked_file",
    params(
        ("project_id" = String, Path, description = "Target project")
    ),
    request_body = CreateLinkedFileBody,
    responses(
        (status = 200, description = "Linked file created", body = LinkedFileResponse),
        (status = 400, description = "Invalid request"),
        (status = 403, description = "No access to the target or source project"),
        (status = 413, description = "Remote resource too large"),
        (status = 422, description = "Remote resource unavailable")
    ),
    security(
        ("jwt" = [])
    ),
    tag = "linked_files"
)]
pub async fn create_linked_file(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(project_id): Path<String>,
    Json(req): Json<CreateLinkedFileBody>,
) -> Result<Json<LinkedFileResponse>, AppError> {
    req.validate()
        .map_err(|e| AppError::BadRequest(e.to_string()))?;

    let new_file_id = state
        .linked_files
        .create_linked_file(CreateLinkedFileRequest {
            project_id,
            user_id: claims.sub,
            parent_folder_id: req.parent_folder_id,
            name: req.name,
            provider: req.provider,
            data: req.data,
        })
        .await?;

    Ok(Json(LinkedFileResponse { new_file_id }))
}

#[utoipa::path(
    post,
    path = "/project/{project_id}/linked_file/{file_id}/refresh",
    params(
        ("project_id" = String, Path, description = "Project holding the file"),
        ("file_id" = String, Path, description = "Linked file to refresh")
    ),
    responses(
        (status = 200, description = "Linked file refreshed", body = LinkedFileResponse),
        (status = 400, description = "File is not linked"),
        (status = 403, description = "No access"),
        (status = 404, description = "File not found"),
        (status = 422, description = "Source no longer available")
    ),
    security(
        ("jwt" = [])
    ),
    tag = "linked_files"
)]
pub async fn refresh_linked_file(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path((project_id, file_id)): Path<(String, String)>,
) -> Result<Json<LinkedFileResponse>, AppError> {
    let new_file_id = state
        .linked_files
        .refresh_linked_file(RefreshLinkedFileRequest {
            project_id,
            user_id: claims.sub,
            file_id,
        })
        .await?;

    Ok(Json(LinkedFileResponse { new_file_id }))
}
