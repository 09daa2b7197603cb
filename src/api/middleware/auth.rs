use crate::AppState;
use crate::api::error::AppError;
use crate::utils::auth::validate_jwt;
use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use serde::Deserialize;

#[derive(Deserialize)]
struct AuthQuery {
    token: Option<String>,
}

/// Accepts a bearer token from the `Authorization` header or the `token`
/// query parameter and exposes its [`Claims`](crate::utils::auth::Claims)
/// to handlers
pub async fn auth_middleware(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, AppError> {
    let auth_header = req
        .headers()
        .get("Authorization")
        .and_then(|h| h.to_str().ok())
        .and_then(|h| h.strip_prefix("Bearer "))
        .map(|s| s.to_string());

    let token = if let Some(t) = auth_header {
        Some(t)
    } else {
        // Try query parameter
        let query = req.uri().query().unwrap_or_default();
        serde_urlencoded::from_str::<AuthQuery>(query)
            .ok()
            .and_then(|q| q.token)
    };

    if let Some(token) = token {
        match validate_jwt(&token, &state.config.jwt_secret) {
            Ok(claims) => {
                req.extensions_mut().insert(claims);
                return Ok(next.run(req).await);
            }
            Err(e) => tracing::debug!("Rejected bearer token: {}", e),
        }
    }

    Err(AppError::Unauthorized(
        "Missing or invalid bearer token".to_string(),
    ))
}
