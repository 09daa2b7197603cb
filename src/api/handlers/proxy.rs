use crate::AppState;
use crate::services::fetcher::{HopQuery, UPSTREAM_STATUS_HEADER};
use crate::services::link_proxy::{ProxyError, limited_body};
use axum::{
    Json,
    body::Body,
    extract::{Path, Query, State},
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use serde_json::json;

impl IntoResponse for ProxyError {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.status_code().as_u16())
            .unwrap_or(StatusCode::UNPROCESSABLE_ENTITY);
        if let ProxyError::Transport(e) = &self {
            tracing::warn!("Proxy hop failed: {}", e);
        }

        let upstream = self.upstream_status();
        let mut response = (status, Json(json!({ "error": self.to_string() }))).into_response();
        if let Some(value) = upstream.and_then(|v| HeaderValue::from_str(&v).ok()) {
            response.headers_mut().insert(UPSTREAM_STATUS_HEADER, value);
        }
        response
    }
}

#[utoipa::path(
    get,
    path = "/proxy/{token}",
    params(
        ("token" = String, Path, description = "Shared hop token"),
        ("url" = String, Query, description = "Resource or next hop to fetch"),
        ("next_is_proxy" = Option<bool>, Query, description = "Whether `url` is another hop")
    ),
    responses(
        (status = 200, description = "Upstream body"),
        (status = 404, description = "Unknown token"),
        (status = 413, description = "Upstream body too large"),
        (status = 422, description = "Upstream failed, see x-upstream-status-code")
    ),
    tag = "proxy"
)]
pub async fn proxy(
    State(state): State<AppState>,
    Path(token): Path<String>,
    Query(query): Query<HopQuery>,
) -> Result<Response, ProxyError> {
    let upstream = state.proxy.open(&token, &query).await?;

    let content_type = upstream.headers().get(header::CONTENT_TYPE).cloned();
    let content_length = upstream.content_length();
    let body = Body::from_stream(limited_body(upstream, state.proxy.max_size()));

    let mut response = Response::new(body);
    if let Some(value) = content_type {
        response.headers_mut().insert(header::CONTENT_TYPE, value);
    }
    if let Some(len) = content_length {
        response
            .headers_mut()
            .insert(header::CONTENT_LENGTH, HeaderValue::from(len));
    }
    Ok(response)
}
