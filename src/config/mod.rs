use anyhow::{Result, anyhow};
use std::env;
use std::path::PathBuf;
use std::time::Duration;
use url::Url;

/// Configuration for fetching, importing and caching linked resources
#[derive(Debug, Clone)]
pub struct ImportConfig {
    /// Ordered proxy hops every outbound fetch is routed through
    pub proxy_chain: Vec<Url>,

    /// Token a request must carry to be served by this instance's proxy hop
    pub proxy_token: String,

    /// HTTP client timeout (default: 30s)
    pub fetch_timeout: Duration,

    /// Maximum size of a single download in bytes (default: 50 MB)
    pub max_download_size: u64,

    /// Maximum size of an editable document in bytes (default: 2 MB)
    pub max_doc_length: usize,

    /// Number of concurrent snippet downloads (default: 5)
    pub parallel_downloads: usize,

    /// Directory for download buffers (default: system temp dir)
    pub download_tmp_dir: PathBuf,

    /// Base URL of the documentation wiki
    pub learn_base_url: Url,

    /// Directory holding proxied documentation images
    pub learn_image_cache_dir: PathBuf,

    /// How long pages and images are served without refetching (default: 10 min)
    pub learn_cache_duration: Duration,

    /// Public origin serving compile output files
    pub compile_domain: Url,

    /// Compile service endpoint
    pub clsi_url: Url,

    /// Secret for signing bearer tokens and output-file download tokens
    pub jwt_secret: String,

    /// Maximum number of entries in an imported zip archive (default: 2000)
    pub zip_max_entries: usize,

    /// Maximum uncompressed size of an imported zip archive (default: 300 MB)
    pub zip_max_total_size: u64,
}

fn default_url(raw: &str) -> Url {
    Url::parse(raw).expect("valid default url")
}

impl Default for ImportConfig {
    fn default() -> Self {
        Self {
            proxy_chain: vec![default_url("http://127.0.0.1:3000/proxy/dev-proxy-token")],
            proxy_token: "dev-proxy-token".to_string(),
            fetch_timeout: Duration::from_secs(30),
            max_download_size: 50 * 1024 * 1024, // 50 MB
            max_doc_length: 2 * 1024 * 1024,     // 2 MB
            parallel_downloads: 5,
            download_tmp_dir: env::temp_dir(),
            learn_base_url: default_url("https://learn.overleaf.com"),
            learn_image_cache_dir: env::temp_dir().join("learn-images"),
            learn_cache_duration: Duration::from_secs(600),
            compile_domain: default_url("http://127.0.0.1:3000"),
            clsi_url: default_url("http://127.0.0.1:3013"),
            jwt_secret: "secret".to_string(),
            zip_max_entries: 2000,
            zip_max_total_size: 300 * 1024 * 1024, // 300 MB
        }
    }
}

/// Parses a comma separated list of URLs, skipping blanks
pub fn parse_proxy_chain(raw: &str) -> Result<Vec<Url>> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| Url::parse(s).map_err(|e| anyhow!("invalid proxy hop '{}': {}", s, e)))
        .collect()
}

/// Reads `key` through `lookup`, failing when it is set but unparsable
fn parsed<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Result<Option<T>>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    lookup(key)
        .map(|v| {
            v.trim()
                .parse()
                .map_err(|e| anyhow!("invalid {} '{}': {}", key, v, e))
        })
        .transpose()
}

impl ImportConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Builds the configuration from `lookup`, keeping defaults for unset keys.
    /// A set but malformed value is an error.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let default = Self::default();
        let secs = |key: &str| parsed::<u64>(&lookup, key).map(|v| v.map(Duration::from_secs));

        Ok(Self {
            proxy_chain: match lookup("LINKED_URL_PROXY_CHAIN") {
                Some(raw) => parse_proxy_chain(&raw)?,
                None => default.proxy_chain,
            },

            proxy_token: lookup("LINKED_URL_PROXY_TOKEN").unwrap_or(default.proxy_token),

            fetch_timeout: secs("FETCH_TIMEOUT_SECS")?.unwrap_or(default.fetch_timeout),

            max_download_size: parsed(&lookup, "MAX_DOWNLOAD_SIZE")?
                .unwrap_or(default.max_download_size),

            max_doc_length: parsed(&lookup, "MAX_DOC_LENGTH")?.unwrap_or(default.max_doc_length),

            parallel_downloads: parsed(&lookup, "PARALLEL_DOWNLOADS")?
                .unwrap_or(default.parallel_downloads),

            download_tmp_dir: lookup("DOWNLOAD_TMP_DIR")
                .map(PathBuf::from)
                .unwrap_or(default.download_tmp_dir),

            learn_base_url: parsed(&lookup, "LEARN_BASE_URL")?.unwrap_or(default.learn_base_url),

            learn_image_cache_dir: lookup("LEARN_IMAGE_CACHE_DIR")
                .map(PathBuf::from)
                .unwrap_or(default.learn_image_cache_dir),

            learn_cache_duration: secs("LEARN_CACHE_DURATION_SECS")?
                .unwrap_or(default.learn_cache_duration),

            compile_domain: parsed(&lookup, "COMPILE_DOMAIN")?.unwrap_or(default.compile_domain),

            clsi_url: parsed(&lookup, "CLSI_URL")?.unwrap_or(default.clsi_url),

            jwt_secret: lookup("JWT_SECRET").unwrap_or(default.jwt_secret),

            zip_max_entries: parsed(&lookup, "ZIP_MAX_ENTRIES")?.unwrap_or(default.zip_max_entries),

            zip_max_total_size: parsed(&lookup, "ZIP_MAX_TOTAL_SIZE")?
                .unwrap_or(default.zip_max_total_size),
        })
    }

    /// Create config for development and tests (short cache, local hops)
    pub fn development() -> Self {
        Self {
            learn_cache_duration: Duration::from_secs(60),
            ..Self::default()
        }
    }

    /// Rejects settings the import pipeline cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.proxy_chain.is_empty() {
            return Err(anyhow!("LINKED_URL_PROXY_CHAIN needs at least one hop"));
        }
        if self.parallel_downloads == 0 {
            return Err(anyhow!("PARALLEL_DOWNLOADS must be positive"));
        }
        if self.proxy_token.is_empty() {
            return Err(anyhow!("LINKED_URL_PROXY_TOKEN must not be empty"));
        }
        Ok(())
    }
}
