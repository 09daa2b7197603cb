use crate::AppState;
use crate::api::error::AppError;
use axum::{
    Json,
    body::Body,
    extract::{Path, State},
    http::{StatusCode, header},
    response::{IntoResponse, Response},
};

/// Content type for a cached image: sniffed from its bytes, with SVG
/// recognised by extension since it has no magic number
fn image_content_type(path: &str, bytes: &[u8]) -> String {
    if let Some(kind) = infer::get(bytes) {
        return kind.mime_type().to_string();
    }
    if path.to_ascii_lowercase().ends_with(".svg") {
        return mime::IMAGE_SVG.to_string();
    }
    mime::APPLICATION_OCTET_STREAM.to_string()
}

fn redirect_to(page: &str) -> Response {
    let location = format!("/learn/{}", page.replace(' ', "_"));
    Response::builder()
        .status(StatusCode::FOUND)
        .header(header::LOCATION, location)
        .body(Body::empty())
        .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
}

#[utoipa::path(
    get,
    path = "/learn/{page}",
    params(
        ("page" = String, Path, description = "Page title, spaces as underscores")
    ),
    responses(
        (status = 200, description = "Rendered page", body = crate::services::learn::LearnPage),
        (status = 302, description = "Page is a redirect to its canonical title"),
        (status = 404, description = "No such page")
    ),
    tag = "learn"
)]
pub async fn get_page(
    State(state): State<AppState>,
    Path(page): Path<String>,
) -> Result<Response, AppError> {
    let page = state.pages.get_page(&page).await?;

    if let Some(target) = page.redirect.as_deref() {
        return Ok(redirect_to(target));
    }

    Ok(Json(page).into_response())
}

#[utoipa::path(
    get,
    path = "/learn-scripts/images/{path}",
    params(
        ("path" = String, Path, description = "Image path below the images root")
    ),
    responses(
        (status = 200, description = "Image bytes"),
        (status = 400, description = "Invalid image path"),
        (status = 422, description = "Image not available upstream")
    ),
    tag = "learn"
)]
pub async fn get_image(
    State(state): State<AppState>,
    Path(path): Path<String>,
) -> Result<Response, AppError> {
    let location = state.images.proxy_image(&path).await?;
    let bytes = tokio::fs::read(&location)
        .await
        .map_err(|e| AppError::Internal(format!("read cached image: {}", e)))?;

    Response::builder()
        .header(header::CONTENT_TYPE, image_content_type(&path, &bytes))
        .header(header::CONTENT_LENGTH, bytes.len())
        .body(Body::from(bytes))
        .map_err(|e| AppError::Internal(e.to_string()))
}
