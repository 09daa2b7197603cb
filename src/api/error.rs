use crate::services::fetcher::FetchError;
use crate::services::linked_file::OutputFileUnavailable;
use crate::services::managers::{AccessDenied, NotFound};
use crate::utils::validation::ValidationError;
use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Bad Request: {0}")]
    BadRequest(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Not Found: {0}")]
    NotFound(String),

    #[error("Unprocessable Entity: {0}")]
    UnprocessableEntity(String),

    #[error("Payload Too Large: {0}")]
    PayloadTooLarge(String),

    #[error("Internal Server Error: {0}")]
    Internal(String),

    #[error("Anyhow error: {0}")]
    Anyhow(anyhow::Error),
}

/// Maps the first recognised cause in an error chain to its variant.
/// Unrecognised errors stay `Anyhow` and become a 500.
impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        for cause in err.chain() {
            let classified = if let Some(e) = cause.downcast_ref::<ValidationError>() {
                Some(AppError::BadRequest(e.message.clone()))
            } else if let Some(e) = cause.downcast_ref::<AccessDenied>() {
                Some(AppError::Forbidden(e.0.clone()))
            } else if let Some(e) = cause.downcast_ref::<NotFound>() {
                Some(AppError::NotFound(e.0.clone()))
            } else if let Some(e) = cause.downcast_ref::<OutputFileUnavailable>() {
                Some(AppError::UnprocessableEntity(e.to_string()))
            } else {
                match cause.downcast_ref::<FetchError>() {
                    Some(e @ FetchError::UnprocessableEntity { .. }) => {
                        Some(AppError::UnprocessableEntity(e.to_string()))
                    }
                    Some(e @ FetchError::BodyTooLarge) => {
                        Some(AppError::PayloadTooLarge(e.to_string()))
                    }
                    _ => None,
                }
            };
            if let Some(app_error) = classified {
                tracing::debug!("Request failed: {:#}", err);
                return app_error;
            }
        }
        AppError::Anyhow(err)
    }
}

impl AppError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::Forbidden(_) => StatusCode::FORBIDDEN,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::UnprocessableEntity(_) => StatusCode::UNPROCESSABLE_ENTITY,
            AppError::PayloadTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            AppError::Internal(_) | AppError::Anyhow(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            AppError::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, msg),
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            AppError::Forbidden(msg) => (StatusCode::FORBIDDEN, msg),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            AppError::UnprocessableEntity(msg) => (StatusCode::UNPROCESSABLE_ENTITY, msg),
            AppError::PayloadTooLarge(msg) => (StatusCode::PAYLOAD_TOO_LARGE, msg),
            AppError::Internal(msg) => {
                tracing::error!("Internal error: {}", msg);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal Server Error".to_string(),
                )
            }
            AppError::Anyhow(e) => {
                tracing::error!("Anyhow error: {:?}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal Server Error".to_string(),
                )
            }
        };

        let body = Json(json!({
            "error": message
        }));

        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::{Context, anyhow};

    #[test]
    fn test_classification_walks_context() {
        let err: anyhow::Result<()> = Err(anyhow!(ValidationError::missing("url")));
        let err = err.context("create linked file").unwrap_err();
        assert_eq!(AppError::from(err).status_code(), StatusCode::BAD_REQUEST);

        let err = anyhow!(FetchError::BodyTooLarge).context("download file");
        assert_eq!(
            AppError::from(err).status_code(),
            StatusCode::PAYLOAD_TOO_LARGE
        );

        let err = anyhow!(AccessDenied("no".into()));
        assert!(matches!(AppError::from(err), AppError::Forbidden(msg) if msg == "no"));

        let err = anyhow!(NotFound("file f1".into())).context("refresh linked file");
        assert!(matches!(AppError::from(err), AppError::NotFound(_)));

        let err = anyhow!(OutputFileUnavailable);
        assert_eq!(
            AppError::from(err).status_code(),
            StatusCode::UNPROCESSABLE_ENTITY
        );

        let err = anyhow!(FetchError::UpstreamStatus(502));
        assert!(matches!(AppError::from(err), AppError::Anyhow(_)));
    }
}
