use crate::services::downloader::{BufferedDownloader, BufferedFile, derive_filename};
use crate::utils::validation::{ValidationError, validate_http_url, validate_path};
use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};
use url::Url;
use utoipa::ToSchema;

/// One snippet as submitted: exactly one of `snapshot` or `url`
#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
pub struct SnippetInput {
    /// Path inside the new project
    pub path: Option<String>,
    /// Inline LaTeX source
    pub snapshot: Option<String>,
    /// Remote resource to download
    pub url: Option<String>,
}

#[derive(Debug, Clone)]
pub struct CreateFromSnippetsRequest {
    pub user_id: String,
    pub snippets: Vec<SnippetInput>,
    pub engine: Option<String>,
    pub name: Option<String>,
}

#[derive(Debug, Clone)]
pub struct CreateFromZipRequest {
    pub user_id: String,
    pub zip_url: String,
    pub engine: Option<String>,
    pub name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct CreateProjectResponse {
    pub project_id: String,
    pub redirect: String,
}

impl CreateProjectResponse {
    pub fn new(project_id: String) -> Self {
        Self {
            redirect: format!("/project/{}", project_id),
            project_id,
        }
    }
}

#[derive(Debug)]
pub(crate) enum SnippetSource {
    Inline(String),
    Url(Url),
}

/// A snippet moving through the import pipeline
#[derive(Debug)]
pub(crate) struct Snippet {
    /// Position in the submitted list
    pub index: usize,
    pub path: Option<String>,
    pub source: SnippetSource,
    /// Set once a url snippet is downloaded
    pub file: Option<BufferedFile>,
}

impl Snippet {
    /// Checks one submitted snippet. A url snippet without a path takes the
    /// name derived from its url and is rejected if there is none.
    pub fn parse(index: usize, input: &SnippetInput) -> Result<Self> {
        let mut path = match input.path.as_deref().map(str::trim) {
            Some(p) if !p.is_empty() => {
                let p = p.trim_start_matches('/');
                validate_path(p)?;
                Some(p.to_string())
            }
            _ => None,
        };

        let source = match (&input.snapshot, &input.url) {
            (Some(snapshot), None) => SnippetSource::Inline(snapshot.clone()),
            (None, Some(url)) => SnippetSource::Url(validate_http_url(url.trim())?),
            _ => {
                return Err(anyhow!(ValidationError::new(
                    "INVALID_SNIPPET",
                    format!("snippet {} needs exactly one of snapshot or url", index),
                )));
            }
        };

        if let (None, SnippetSource::Url(url)) = (&path, &source) {
            let derived = derive_filename(url);
            if derived.is_empty() {
                return Err(anyhow!(ValidationError::new(
                    "MISSING_SNIPPET_PATH",
                    format!("cannot derive a file name from {}, give the snippet a path", url),
                )));
            }
            path = Some(derived);
        }

        Ok(Self {
            index,
            path,
            source,
            file: None,
        })
    }

    pub fn is_inline(&self) -> bool {
        matches!(self.source, SnippetSource::Inline(_))
    }

    /// Downloads a url snippet into its buffer
    pub async fn download(&mut self, downloader: &BufferedDownloader) -> Result<()> {
        let SnippetSource::Url(url) = &self.source else {
            return Ok(());
        };

        let file = downloader
            .download_file(url)
            .await
            .with_context(|| format!("download snippet {}", url))?;
        self.file = Some(file);
        Ok(())
    }

    pub fn cleanup(&mut self) {
        if let Some(file) = self.file.as_mut() {
            if let Err(e) = file.cleanup() {
                tracing::warn!("Failed to remove snippet buffer {}: {}", self.index, e);
            }
        }
    }
}
