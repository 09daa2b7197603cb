use crate::services::fetcher::{ChainedFetcher, read_limited};
use crate::services::managers::NotFound;
use anyhow::{Context, Result, anyhow};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::RwLock;
use url::Url;
use utoipa::ToSchema;

const MAIN_PAGE: &str = "Main_Page";
const MISSING_TITLE: &str = "missingtitle";

/// A rendered documentation page
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct LearnPage {
    pub title: String,
    pub display_title: String,
    pub revision: u64,
    pub content_html: String,
    /// Visible categories only
    pub categories: Vec<String>,
    /// Canonical page this one redirects to
    #[serde(skip_serializing_if = "Option::is_none")]
    pub redirect: Option<String>,
}

#[derive(Debug, Clone)]
struct PageCacheEntry {
    fetched_at: DateTime<Utc>,
    page: LearnPage,
}

#[derive(Debug, Deserialize)]
struct ParseEnvelope {
    parse: Option<ParseResult>,
    error: Option<ApiError>,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    code: String,
    info: String,
}

#[derive(Debug, Deserialize)]
struct ParseResult {
    title: String,
    #[serde(default)]
    displaytitle: Option<String>,
    #[serde(default)]
    revid: u64,
    text: ParseText,
    #[serde(default)]
    categories: Vec<ParseCategory>,
    #[serde(default)]
    redirects: Vec<ParseRedirect>,
}

#[derive(Debug, Deserialize)]
struct ParseText {
    #[serde(rename = "*")]
    html: String,
}

#[derive(Debug, Deserialize)]
struct ParseCategory {
    #[serde(rename = "*")]
    name: String,
    /// Present (with an empty value) only for hidden categories
    #[serde(default)]
    hidden: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct ParseRedirect {
    to: String,
}

/// Wiki page key for a request path: `/Some page/` -> `Some_page`
pub fn page_key(path: &str) -> String {
    let key = path.trim().trim_matches('/').replace(' ', "_");
    if key.is_empty() {
        MAIN_PAGE.to_string()
    } else {
        key
    }
}

fn parse_page(body: &[u8]) -> Result<LearnPage> {
    let envelope: ParseEnvelope = serde_json::from_slice(body).context("decode wiki response")?;
    if let Some(error) = envelope.error {
        if error.code == MISSING_TITLE {
            return Err(anyhow!(NotFound(error.info)));
        }
        return Err(anyhow!("wiki error {}: {}", error.code, error.info));
    }
    let parsed = envelope
        .parse
        .ok_or_else(|| anyhow!("wiki response has no parse result"))?;

    Ok(LearnPage {
        display_title: parsed.displaytitle.unwrap_or_else(|| parsed.title.clone()),
        redirect: parsed.redirects.last().map(|r| page_key(&r.to)),
        title: parsed.title,
        revision: parsed.revid,
        content_html: parsed.text.html,
        categories: parsed
            .categories
            .into_iter()
            .filter(|c| c.hidden.is_none())
            .map(|c| c.name)
            .collect(),
    })
}

/// Documentation pages fetched through the proxy chain and kept for
/// `ttl`. A failed refetch serves the stale copy.
pub struct LearnPageCache {
    fetcher: ChainedFetcher,
    api_url: Url,
    ttl: Duration,
    max_size: u64,
    entries: RwLock<HashMap<String, PageCacheEntry>>,
}

impl LearnPageCache {
    pub fn new(
        fetcher: ChainedFetcher,
        learn_base_url: &Url,
        ttl: Duration,
        max_size: u64,
    ) -> Result<Self> {
        let api_url = learn_base_url
            .join("learn/api.php")
            .context("learn api url")?;
        Ok(Self {
            fetcher,
            api_url,
            ttl,
            max_size,
            entries: RwLock::new(HashMap::new()),
        })
    }

    fn is_fresh(&self, fetched_at: DateTime<Utc>) -> bool {
        let age = Utc::now().signed_duration_since(fetched_at);
        age.to_std().map(|age| age < self.ttl).unwrap_or(true)
    }

    fn page_url(&self, key: &str) -> Url {
        let mut url = self.api_url.clone();
        url.query_pairs_mut()
            .clear()
            .append_pair("action", "parse")
            .append_pair("page", key)
            .append_pair("format", "json")
            .append_pair("redirects", "1")
            .append_pair("prop", "text|revid|categories|displaytitle");
        url
    }

    pub async fn get_page(&self, path: &str) -> Result<LearnPage> {
        let key = page_key(path);

        let cached = self.entries.read().await.get(&key).cloned();
        if let Some(entry) = &cached {
            if self.is_fresh(entry.fetched_at) {
                return Ok(entry.page.clone());
            }
        }

        match self.fetch_page(&key).await {
            Ok(page) => {
                self.entries.write().await.insert(
                    key,
                    PageCacheEntry {
                        fetched_at: Utc::now(),
                        page: page.clone(),
                    },
                );
                Ok(page)
            }
            Err(e) => match cached {
                Some(entry) => {
                    tracing::warn!("Serving stale learn page {}: {:#}", key, e);
                    Ok(entry.page)
                }
                None => Err(e),
            },
        }
    }

    async fn fetch_page(&self, key: &str) -> Result<LearnPage> {
        let response = self
            .fetcher
            .fetch(&self.page_url(key))
            .await
            .with_context(|| format!("fetch learn page {}", key))?;
        let body = read_limited(response, self.max_size)
            .await
            .context("read learn page")?;
        parse_page(&body)
    }

    /// Drops entries past their lifetime and returns how many went
    pub async fn sweep(&self) -> usize {
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|_, entry| self.is_fresh(entry.fetched_at));
        before - entries.len()
    }

    pub async fn cached_pages(&self) -> usize {
        self.entries.read().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_page_key() {
        assert_eq!(page_key("/Learn LaTeX in 30 minutes/"), "Learn_LaTeX_in_30_minutes");
        assert_eq!(page_key(""), "Main_Page");
        assert_eq!(page_key("/"), "Main_Page");
    }

    #[test]
    fn test_parse_page() {
        let body = serde_json::json!({
            "parse": {
                "title": "Tables",
                "displaytitle": "<span>Tables</span>",
                "revid": 4242,
                "text": { "*": "<p>rows</p>" },
                "categories": [
                    { "sortkey": "", "*": "LaTeX_Basics" },
                    { "sortkey": "", "*": "Pages_with_broken_links", "hidden": "" }
                ],
                "redirects": [{ "from": "Table", "to": "Tables" }]
            }
        });
        let page = parse_page(body.to_string().as_bytes()).unwrap();
        assert_eq!(page.title, "Tables");
        assert_eq!(page.display_title, "<span>Tables</span>");
        assert_eq!(page.revision, 4242);
        assert_eq!(page.categories, vec!["LaTeX_Basics"]);
        assert_eq!(page.redirect.as_deref(), Some("Tables"));
    }

    #[test]
    fn test_parse_page_error() {
        let body = br#"{"error":{"code":"missingtitle","info":"The page you specified doesn't exist."}}"#;
        let err = parse_page(body).unwrap_err();
        assert!(err.is::<NotFound>());

        let body = br#"{"error":{"code":"internal_api_error","info":"boom"}}"#;
        let err = parse_page(body).unwrap_err();
        assert!(err.to_string().contains("internal_api_error"));
    }

    #[test]
    fn test_page_url() {
        let fetcher = ChainedFetcher::new(
            vec![Url::parse("http://127.0.0.1:9/proxy/t").unwrap()],
            Duration::from_secs(1),
        )
        .unwrap();
        let base = Url::parse("https://learn.example.com").unwrap();
        let cache = LearnPageCache::new(fetcher, &base, Duration::from_secs(1), 1024).unwrap();
        assert_eq!(
            cache.page_url("Tables").as_str(),
            "https://learn.example.com/learn/api.php?action=parse&page=Tables&format=json&redirects=1&prop=text%7Crevid%7Ccategories%7Cdisplaytitle"
        );
    }
}
