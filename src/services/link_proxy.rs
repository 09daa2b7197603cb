//! One hop of the outbound proxy chain.
//!
//! A hop fetches the `url` it is given without following redirects and
//! reports upstream failures as 422 with the original status in
//! [`UPSTREAM_STATUS_HEADER`], so the caller at the head of the chain can
//! tell a bad resource from a broken hop.

use crate::config::ImportConfig;
use crate::services::fetcher::{HopQuery, UPSTREAM_STATUS_HEADER};
use crate::utils::validation::validate_http_url;
use anyhow::Result;
use bytes::Bytes;
use futures::{Stream, StreamExt};
use reqwest::{Client, Response, StatusCode, redirect};
use subtle::ConstantTimeEq;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ProxyError {
    #[error("Not Found")]
    UnknownToken,

    #[error("Bad Request: {0}")]
    InvalidUrl(String),

    #[error("Body Too Large")]
    BodyTooLarge,

    #[error("upstream returned {upstream_status}")]
    Upstream {
        status: StatusCode,
        upstream_status: String,
    },

    #[error("upstream request failed: {0}")]
    Transport(#[from] reqwest::Error),
}

impl ProxyError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            ProxyError::UnknownToken => StatusCode::NOT_FOUND,
            ProxyError::InvalidUrl(_) => StatusCode::BAD_REQUEST,
            ProxyError::BodyTooLarge => StatusCode::PAYLOAD_TOO_LARGE,
            ProxyError::Upstream { status, .. } => *status,
            ProxyError::Transport(_) => StatusCode::UNPROCESSABLE_ENTITY,
        }
    }

    /// Value for the upstream status header, when the failure came from
    /// beyond this hop
    pub fn upstream_status(&self) -> Option<String> {
        match self {
            ProxyError::Upstream {
                upstream_status, ..
            } => Some(upstream_status.clone()),
            ProxyError::Transport(_) => Some(StatusCode::BAD_GATEWAY.as_u16().to_string()),
            _ => None,
        }
    }
}

#[derive(Clone)]
pub struct LinkProxy {
    client: Client,
    token: String,
    max_size: u64,
}

impl LinkProxy {
    pub fn new(config: &ImportConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.fetch_timeout)
            .no_proxy()
            .redirect(redirect::Policy::none())
            .build()?;

        Ok(Self {
            client,
            token: config.proxy_token.clone(),
            max_size: config.max_download_size,
        })
    }

    pub fn max_size(&self) -> u64 {
        self.max_size
    }

    /// Opens the upstream resource for `query`. The body is left unread.
    pub async fn open(&self, token: &str, query: &HopQuery) -> Result<Response, ProxyError> {
        if !bool::from(token.as_bytes().ct_eq(self.token.as_bytes())) {
            return Err(ProxyError::UnknownToken);
        }
        let url = validate_http_url(&query.url).map_err(|e| ProxyError::InvalidUrl(e.to_string()))?;
        let next_is_proxy = query.next_is_proxy.unwrap_or(false);

        let mut response = self.client.get(url.clone()).send().await?;
        let status = response.status();

        if status != StatusCode::OK {
            let forwarded = response
                .headers()
                .get(UPSTREAM_STATUS_HEADER)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string);
            while let Ok(Some(_)) = response.chunk().await {}

            tracing::debug!("proxy hop got {} from {}", status, url);

            let pass_through = next_is_proxy
                && matches!(
                    status,
                    StatusCode::PAYLOAD_TOO_LARGE | StatusCode::UNPROCESSABLE_ENTITY
                );
            return Err(if pass_through {
                ProxyError::Upstream {
                    status,
                    upstream_status: forwarded.unwrap_or_else(|| status.as_u16().to_string()),
                }
            } else {
                ProxyError::Upstream {
                    status: StatusCode::UNPROCESSABLE_ENTITY,
                    upstream_status: status.as_u16().to_string(),
                }
            });
        }

        if response
            .content_length()
            .is_some_and(|len| len > self.max_size)
        {
            return Err(ProxyError::BodyTooLarge);
        }

        Ok(response)
    }
}

/// Body of `response` that errors out once more than `max_size` bytes
/// have passed
pub fn limited_body(
    response: Response,
    max_size: u64,
) -> impl Stream<Item = Result<Bytes, std::io::Error>> + Send {
    let mut seen: u64 = 0;
    response.bytes_stream().map(move |chunk| {
        let chunk = chunk.map_err(std::io::Error::other)?;
        seen += chunk.len() as u64;
        if seen > max_size {
            return Err(std::io::Error::other("body too large"));
        }
        Ok(chunk)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_statuses() {
        assert_eq!(ProxyError::UnknownToken.status_code(), StatusCode::NOT_FOUND);
        assert_eq!(ProxyError::UnknownToken.upstream_status(), None);

        let upstream = ProxyError::Upstream {
            status: StatusCode::UNPROCESSABLE_ENTITY,
            upstream_status: "404".into(),
        };
        assert_eq!(upstream.status_code(), StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(upstream.upstream_status().as_deref(), Some("404"));
    }

    #[tokio::test]
    async fn test_rejects_wrong_token_and_bad_url() {
        let proxy = LinkProxy::new(&ImportConfig::development()).unwrap();
        let query = HopQuery {
            url: "https://example.com/a.png".into(),
            next_is_proxy: None,
        };
        assert!(matches!(
            proxy.open("wrong", &query).await,
            Err(ProxyError::UnknownToken)
        ));

        let query = HopQuery {
            url: "gopher://example.com/".into(),
            next_is_proxy: None,
        };
        assert!(matches!(
            proxy.open("dev-proxy-token", &query).await,
            Err(ProxyError::InvalidUrl(_))
        ));
    }
}
