use crate::AppState;
use crate::api::error::AppError;
use crate::services::snippets::{
    CreateFromSnippetsRequest, CreateFromZipRequest, CreateProjectResponse, SnippetInput,
};
use crate::utils::auth::Claims;
use axum::{Extension, Json, extract::State};
use serde::Deserialize;
use utoipa::ToSchema;
use validator::Validate;

#[derive(Deserialize, ToSchema, Validate)]
pub struct CreateFromSnippetsBody {
    #[validate(length(min = 1, message = "At least one snippet is required"))]
    pub snippets: Vec<SnippetInput>,
    /// Compiler for the new project, defaults to pdflatex
    pub engine: Option<String>,
    #[validate(length(max = 150, message = "Name must be at most 150 characters"))]
    pub name: Option<String>,
}

#[derive(Deserialize, ToSchema, Validate)]
pub struct CreateFromZipBody {
    #[validate(url(message = "zip_url must be a URL"))]
    pub zip_url: String,
    pub engine: Option<String>,
    #[validate(length(max = 150, message = "Name must be at most 150 characters"))]
    pub name: Option<String>,
}

#[utoipa::path(
    post,
    path = "/docs",
    request_body = CreateFromSnippetsBody,
    responses(
        (status = 200, description = "Project created", body = CreateProjectResponse),
        (status = 400, description = "Invalid snippets"),
        (status = 413, description = "A snippet is too large"),
        (status = 422, description = "A snippet could not be downloaded")
    ),
    security(
        ("jwt" = [])
    ),
    tag = "open_in_overleaf"
)]
pub async fn create_from_snippets(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<CreateFromSnippetsBody>,
) -> Result<Json<CreateProjectResponse>, AppError> {
    req.validate()
        .map_err(|e| AppError::BadRequest(e.to_string()))?;

    let response = state
        .snippets
        .create_from_snippets(CreateFromSnippetsRequest {
            user_id: claims.sub,
            snippets: req.snippets,
            engine: req.engine,
            name: req.name,
        })
        .await?;

    Ok(Json(response))
}

#[utoipa::path(
    post,
    path = "/docs/zip",
    request_body = CreateFromZipBody,
    responses(
        (status = 200, description = "Project created", body = CreateProjectResponse),
        (status = 400, description = "Invalid archive"),
        (status = 413, description = "Archive too large"),
        (status = 422, description = "Archive could not be downloaded")
    ),
    security(
        ("jwt" = [])
    ),
    tag = "open_in_overleaf"
)]
pub async fn create_from_zip(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<CreateFromZipBody>,
) -> Result<Json<CreateProjectResponse>, AppError> {
    req.validate()
        .map_err(|e| AppError::BadRequest(e.to_string()))?;

    let response = state
        .snippets
        .create_from_zip(CreateFromZipRequest {
            user_id: claims.sub,
            zip_url: req.zip_url,
            engine: req.engine,
            name: req.name,
        })
        .await?;

    Ok(Json(response))
}
