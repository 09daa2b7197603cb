use crate::config::ImportConfig;
use anyhow::{Result, anyhow};
use reqwest::{Client, Response, StatusCode, redirect};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use url::Url;

/// Header a proxy hop uses to report the status code it got from upstream
pub const UPSTREAM_STATUS_HEADER: &str = "x-upstream-status-code";

/// Query string understood by every hop of the proxy chain
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HopQuery {
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_is_proxy: Option<bool>,
}

#[derive(Error, Debug)]
pub enum FetchError {
    #[error("Unprocessable Entity: upstream returned non success: {upstream_status}")]
    UnprocessableEntity { upstream_status: String },

    #[error("Body Too Large")]
    BodyTooLarge,

    #[error("proxy responded with status {0}")]
    UpstreamStatus(u16),

    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
}

/// Wraps `target` in each hop of `chain`, first hop innermost.
///
/// Every hop receives the previous URL as its `url` query parameter. Hops
/// after the first additionally get `next_is_proxy=true` so they know the
/// value points at another hop rather than at the origin.
pub fn chain_url(target: &Url, chain: &[Url]) -> Url {
    let mut current = target.clone();
    for (i, hop) in chain.iter().enumerate() {
        let mut next = hop.clone();
        next.set_query(None);
        {
            let mut pairs = next.query_pairs_mut();
            pairs.append_pair("url", current.as_str());
            if i > 0 {
                pairs.append_pair("next_is_proxy", "true");
            }
        }
        current = next;
    }
    current
}

/// Issues GET requests through the configured proxy chain.
///
/// Redirects are never followed and there are no retries at this layer.
#[derive(Clone)]
pub struct ChainedFetcher {
    client: Client,
    chain: Arc<[Url]>,
}

impl ChainedFetcher {
    pub fn new(chain: Vec<Url>, timeout: Duration) -> Result<Self> {
        if chain.is_empty() {
            return Err(anyhow!("proxy chain must have at least one hop"));
        }

        let client = Client::builder()
            .timeout(timeout)
            .no_proxy()
            .redirect(redirect::Policy::custom(|attempt| {
                attempt.error("redirects are blocked")
            }))
            .build()?;

        Ok(Self {
            client,
            chain: chain.into(),
        })
    }

    pub fn from_config(config: &ImportConfig) -> Result<Self> {
        Self::new(config.proxy_chain.clone(), config.fetch_timeout)
    }

    pub fn chain(&self) -> &[Url] {
        &self.chain
    }

    /// Fetches `url` through the chain.
    ///
    /// On success the caller owns the response and must read it to the end
    /// so the connection can be reused.
    pub async fn fetch(&self, url: &Url) -> Result<Response, FetchError> {
        let target = chain_url(url, &self.chain);
        let response = self.client.get(target).send().await?;

        match response.status() {
            StatusCode::OK => Ok(response),
            StatusCode::UNPROCESSABLE_ENTITY => {
                let upstream_status = response
                    .headers()
                    .get(UPSTREAM_STATUS_HEADER)
                    .and_then(|v| v.to_str().ok())
                    .unwrap_or("unknown")
                    .to_string();
                discard_body(response).await;
                Err(FetchError::UnprocessableEntity { upstream_status })
            }
            StatusCode::PAYLOAD_TOO_LARGE => {
                discard_body(response).await;
                Err(FetchError::BodyTooLarge)
            }
            status => {
                discard_body(response).await;
                tracing::debug!("proxy chain returned {} for {}", status, url);
                Err(FetchError::UpstreamStatus(status.as_u16()))
            }
        }
    }
}

async fn discard_body(mut response: Response) {
    while let Ok(Some(_)) = response.chunk().await {}
}

/// Reads a whole response body, failing once it grows past `max_size`
pub async fn read_limited(mut response: Response, max_size: u64) -> Result<Vec<u8>, FetchError> {
    if response.content_length().is_some_and(|len| len > max_size) {
        return Err(FetchError::BodyTooLarge);
    }
    let mut body = Vec::new();
    while let Some(chunk) = response.chunk().await? {
        if (body.len() + chunk.len()) as u64 > max_size {
            return Err(FetchError::BodyTooLarge);
        }
        body.extend_from_slice(&chunk);
    }
    Ok(body)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_read_limited() {
        let response = || Response::from(axum::http::Response::new("x".repeat(100)));
        assert_eq!(read_limited(response(), 100).await.unwrap().len(), 100);
        assert!(matches!(
            read_limited(response(), 99).await,
            Err(FetchError::BodyTooLarge)
        ));
    }

    fn inner_url(u: &Url) -> Option<String> {
        u.query_pairs()
            .find(|(k, _)| k == "url")
            .map(|(_, v)| v.into_owned())
    }

    fn has_next_is_proxy(u: &Url) -> bool {
        u.query_pairs()
            .any(|(k, v)| k == "next_is_proxy" && v == "true")
    }

    #[test]
    fn test_single_hop() {
        let target = Url::parse("https://foo.bar.com/p1/p2?url=evil").unwrap();
        let chain = vec![Url::parse("https://first.com/x1/x2").unwrap()];

        let chained = chain_url(&target, &chain);
        assert_eq!(
            chained.as_str(),
            "https://first.com/x1/x2?url=https%3A%2F%2Ffoo.bar.com%2Fp1%2Fp2%3Furl%3Devil"
        );

        // The embedded url=evil must not surface as the hop's own parameter
        let urls: Vec<_> = chained
            .query_pairs()
            .filter(|(k, _)| k == "url")
            .map(|(_, v)| v.into_owned())
            .collect();
        assert_eq!(urls, vec![target.to_string()]);
    }

    #[test]
    fn test_three_hops() {
        let target = Url::parse("https://foo.bar.com/p1/p2?url=evil&x=1").unwrap();
        let chain = vec![
            Url::parse("https://first.com/x1").unwrap(),
            Url::parse("https://second.com/y1").unwrap(),
            Url::parse("https://third.com/z1").unwrap(),
        ];

        let outer = chain_url(&target, &chain);
        assert_eq!(outer.host_str(), Some("third.com"));
        assert!(has_next_is_proxy(&outer));

        let second = Url::parse(&inner_url(&outer).unwrap()).unwrap();
        assert_eq!(second.host_str(), Some("second.com"));
        assert!(has_next_is_proxy(&second));

        let first = Url::parse(&inner_url(&second).unwrap()).unwrap();
        assert_eq!(first.host_str(), Some("first.com"));
        assert!(!has_next_is_proxy(&first));

        assert_eq!(inner_url(&first).unwrap(), target.as_str());
    }

    #[test]
    fn test_round_trip_recovers_target() {
        let targets = [
            "https://example.com/",
            "http://example.com/a%20b/c.png?q=1&url=x#frag",
            "https://example.com/ünïcode/ß.tex?x=%2F",
        ];
        let chain: Vec<Url> = (0..4)
            .map(|i| Url::parse(&format!("https://hop{}.example/proxy/token?stale=1", i)).unwrap())
            .collect();

        for raw in targets {
            let target = Url::parse(raw).unwrap();
            for n in 1..=chain.len() {
                let mut current = chain_url(&target, &chain[..n]);
                for _ in 0..n {
                    assert!(!current.query_pairs().any(|(k, _)| k == "stale"));
                    current = Url::parse(&inner_url(&current).unwrap()).unwrap();
                }
                assert_eq!(current, target);
            }
        }
    }

    #[test]
    fn test_empty_chain_is_rejected() {
        assert!(ChainedFetcher::new(Vec::new(), Duration::from_secs(1)).is_err());
    }
}
