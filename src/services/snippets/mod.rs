//! "Open in Overleaf": new projects from a list of inline and remote
//! snippets, or from a remote zip archive.
//!
//! Inline snippets skip straight to the ready queue. Remote snippets go
//! through a bounded download queue served by a fixed pool of workers, so
//! no more than `parallel_downloads` fetches run at once. The first failed
//! download cancels the whole import.

pub mod archive;
pub mod preamble;
pub mod types;

pub use archive::ZipLimits;
pub use types::{CreateFromSnippetsRequest, CreateFromZipRequest, CreateProjectResponse, SnippetInput};

use crate::config::ImportConfig;
use crate::services::downloader::BufferedDownloader;
use crate::services::managers::{CreateProjectRequest, Managers, NewProjectFile};
use crate::utils::validation::{
    MAX_FILENAME_LENGTH, ValidationError, normalize_compiler, validate_http_url,
};
use anyhow::{Context, Result, anyhow};
use std::collections::HashSet;
use std::io::Cursor;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use types::{Snippet, SnippetSource};

const DEFAULT_PROJECT_NAME: &str = "Untitled";
const MAIN_DOC: &str = "main.tex";

pub struct SnippetImportService {
    managers: Managers,
    downloader: BufferedDownloader,
    workers: usize,
    max_doc_length: usize,
    zip_limits: ZipLimits,
    tmp_dir: PathBuf,
}

type DownloadQueue = Arc<Mutex<mpsc::Receiver<Snippet>>>;

impl SnippetImportService {
    pub fn new(managers: Managers, downloader: BufferedDownloader, config: &ImportConfig) -> Self {
        Self {
            managers,
            downloader,
            workers: config.parallel_downloads.max(1),
            max_doc_length: config.max_doc_length,
            zip_limits: ZipLimits {
                max_entries: config.zip_max_entries,
                max_total_size: config.zip_max_total_size,
            },
            tmp_dir: config.download_tmp_dir.clone(),
        }
    }

    pub async fn create_from_snippets(
        &self,
        request: CreateFromSnippetsRequest,
    ) -> Result<CreateProjectResponse> {
        let compiler = normalize_compiler(request.engine.as_deref())?;
        if request.snippets.is_empty() {
            return Err(anyhow!(ValidationError::missing("snippets")));
        }
        let snippets = request
            .snippets
            .iter()
            .enumerate()
            .map(|(i, input)| Snippet::parse(i, input))
            .collect::<Result<Vec<_>>>()?;

        let remote = snippets.iter().filter(|s| !s.is_inline()).count();
        tracing::info!(
            "📥 Importing {} snippets ({} remote) for user {}",
            snippets.len(),
            remote,
            request.user_id
        );

        let mut ready = self.gather(snippets).await?;
        let result = self
            .commit_snippets(&request.user_id, request.name, compiler, &mut ready)
            .await;

        for snippet in ready.iter_mut() {
            snippet.cleanup();
        }
        result
    }

    /// Runs the download pool and returns every snippet in submission order.
    ///
    /// On error nothing is returned and every buffer is removed.
    async fn gather(&self, snippets: Vec<Snippet>) -> Result<Vec<Snippet>> {
        let cancel = CancellationToken::new();
        let (download_tx, download_rx) = mpsc::channel::<Snippet>(self.workers);
        let (ready_tx, mut ready_rx) = mpsc::channel::<Snippet>(self.workers);
        let download_rx: DownloadQueue = Arc::new(Mutex::new(download_rx));

        let mut workers = JoinSet::new();
        for id in 0..self.workers {
            workers.spawn(download_worker(
                id,
                self.downloader.clone(),
                download_rx.clone(),
                ready_tx.clone(),
                cancel.clone(),
            ));
        }

        let dispatcher = tokio::spawn(dispatch(snippets, download_tx, ready_tx, cancel.clone()));

        let mut collected = Vec::new();
        while let Some(snippet) = ready_rx.recv().await {
            collected.push(snippet);
        }

        let mut first_error = None;
        while let Some(joined) = workers.join_next().await {
            let outcome = joined
                .map_err(|e| anyhow!("download worker failed: {}", e))
                .and_then(|r| r);
            if let Err(e) = outcome {
                first_error.get_or_insert(e);
            }
        }
        if let Err(e) = dispatcher.await {
            first_error.get_or_insert(anyhow!("snippet dispatcher failed: {}", e));
        }

        // Jobs still queued when the pool stopped
        {
            let mut queue = download_rx.lock().await;
            queue.close();
            while let Ok(mut snippet) = queue.try_recv() {
                snippet.cleanup();
            }
        }

        match first_error {
            Some(e) => {
                cancel.cancel();
                for snippet in collected.iter_mut() {
                    snippet.cleanup();
                }
                Err(e)
            }
            None => {
                collected.sort_by_key(|s| s.index);
                Ok(collected)
            }
        }
    }

    async fn commit_snippets(
        &self,
        user_id: &str,
        name: Option<String>,
        compiler: String,
        snippets: &mut [Snippet],
    ) -> Result<CreateProjectResponse> {
        assign_paths(snippets);

        let main_index = snippets
            .iter()
            .position(|s| s.is_inline() && s.path.as_deref().is_some_and(|p| p.ends_with(".tex")))
            .or_else(|| snippets.iter().position(|s| s.path.as_deref() == Some(MAIN_DOC)));

        if let Some(i) = main_index {
            if let SnippetSource::Inline(content) = &mut snippets[i].source {
                *content = preamble::wrap_snippet(std::mem::take(content), self.max_doc_length);
            }
        }

        let title = main_index.and_then(|i| match &snippets[i].source {
            SnippetSource::Inline(content) => preamble::extract_title(content),
            SnippetSource::Url(_) => None,
        });
        let root_doc_path = main_index
            .and_then(|i| snippets[i].path.clone())
            .or_else(|| {
                snippets
                    .iter()
                    .filter_map(|s| s.path.clone())
                    .find(|p| p.ends_with(".tex"))
            });

        let mut files = Vec::with_capacity(snippets.len());
        for snippet in snippets.iter_mut() {
            let path = snippet
                .path
                .clone()
                .ok_or_else(|| anyhow!(ValidationError::missing("path")))?;
            let file = match (&snippet.source, snippet.file.as_mut()) {
                (SnippetSource::Inline(content), _) => NewProjectFile {
                    path,
                    size: content.len() as u64,
                    content: Box::new(Cursor::new(content.clone().into_bytes())),
                },
                (SnippetSource::Url(_), Some(buffered)) => NewProjectFile {
                    path,
                    size: buffered.size,
                    content: Box::new(buffered.open().await.context("open snippet buffer")?),
                },
                (SnippetSource::Url(url), None) => {
                    return Err(anyhow!("snippet {} was never downloaded", url));
                }
            };
            files.push(file);
        }

        let name = project_name(name, title);
        self.commit(user_id, name, compiler, root_doc_path, files).await
    }

    /// Creates a project from the contents of a remote zip archive
    pub async fn create_from_zip(&self, request: CreateFromZipRequest) -> Result<CreateProjectResponse> {
        let compiler = normalize_compiler(request.engine.as_deref())?;
        let url = validate_http_url(request.zip_url.trim())?;

        tracing::info!("📦 Importing zip {} for user {}", url, request.user_id);

        let mut buffered = self
            .downloader
            .download_file(&url)
            .await
            .context("download zip")?;
        let archive_name = buffered.path.clone();

        let extracted = match buffered.open().await {
            Ok(handle) => {
                let reader = handle.into_std().await;
                let tmp_dir = self.tmp_dir.clone();
                let limits = self.zip_limits.clone();
                tokio::task::spawn_blocking(move || {
                    archive::extract_project(reader, &tmp_dir, &limits)
                })
                .await
                .context("zip extraction task")
                .and_then(|r| r)
            }
            Err(e) => Err(e),
        };
        if let Err(e) = buffered.cleanup() {
            tracing::warn!("Failed to remove zip buffer: {}", e);
        }
        let extracted = extracted?;

        let mut files = Vec::with_capacity(extracted.files.len());
        for entry in &extracted.files {
            let handle = tokio::fs::File::open(entry.file.path())
                .await
                .context("open extracted file")?;
            files.push(NewProjectFile {
                path: entry.path.clone(),
                size: entry.size,
                content: Box::new(handle),
            });
        }

        let stem = archive_name
            .strip_suffix(".zip")
            .unwrap_or(&archive_name)
            .to_string();
        let name = project_name(request.name, (!stem.is_empty()).then_some(stem));

        // `extracted` owns the temp files and removes them when dropped
        let response = self
            .commit(&request.user_id, name, compiler, extracted.root_doc_path.clone(), files)
            .await;
        drop(extracted);
        response
    }

    async fn commit(
        &self,
        user_id: &str,
        name: String,
        compiler: String,
        root_doc_path: Option<String>,
        files: Vec<NewProjectFile>,
    ) -> Result<CreateProjectResponse> {
        let count = files.len();
        let project_id = self
            .managers
            .uploads
            .create_project(CreateProjectRequest {
                owner_id: user_id.to_string(),
                name: name.clone(),
                compiler,
                root_doc_path,
                files,
            })
            .await
            .context("create project")?;

        tracing::info!(
            "✅ Created project {} '{}' with {} files",
            project_id,
            name,
            count
        );
        Ok(CreateProjectResponse::new(project_id))
    }
}

/// Feeds snippets to the queues in submission order until cancelled
async fn dispatch(
    snippets: Vec<Snippet>,
    download_tx: mpsc::Sender<Snippet>,
    ready_tx: mpsc::Sender<Snippet>,
    cancel: CancellationToken,
) {
    for snippet in snippets {
        let queue = if snippet.is_inline() {
            &ready_tx
        } else {
            &download_tx
        };
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            sent = queue.send(snippet) => {
                if sent.is_err() {
                    break;
                }
            }
        }
    }
}

async fn download_worker(
    id: usize,
    downloader: BufferedDownloader,
    queue: DownloadQueue,
    ready: mpsc::Sender<Snippet>,
    cancel: CancellationToken,
) -> Result<()> {
    loop {
        let next = {
            let mut queue = queue.lock().await;
            tokio::select! {
                biased;
                _ = cancel.cancelled() => None,
                snippet = queue.recv() => snippet,
            }
        };
        let Some(mut snippet) = next else {
            return Ok(());
        };

        let downloaded = tokio::select! {
            biased;
            // Dropping the in-flight download removes its partial buffer
            _ = cancel.cancelled() => return Ok(()),
            result = snippet.download(&downloader) => result,
        };

        if let Err(e) = downloaded {
            tracing::warn!("Snippet download worker {} failed: {:#}", id, e);
            cancel.cancel();
            return Err(e);
        }

        if let Err(mpsc::error::SendError(mut snippet)) = ready.send(snippet).await {
            snippet.cleanup();
            return Ok(());
        }
    }
}

/// Names inline snippets that came without a path and makes every path
/// unique within the project
fn assign_paths(snippets: &mut [Snippet]) {
    let mut main_taken = snippets.iter().any(|s| s.path.as_deref() == Some(MAIN_DOC));
    for snippet in snippets.iter_mut() {
        if snippet.path.is_none() {
            snippet.path = Some(if main_taken {
                format!("snippet_{}.tex", snippet.index + 1)
            } else {
                main_taken = true;
                MAIN_DOC.to_string()
            });
        }
    }

    let mut seen = HashSet::new();
    for snippet in snippets.iter_mut() {
        let Some(path) = snippet.path.take() else {
            continue;
        };
        let mut candidate = path.clone();
        let mut n = 1;
        while !seen.insert(candidate.clone()) {
            candidate = numbered(&path, n);
            n += 1;
        }
        snippet.path = Some(candidate);
    }
}

/// `dir/name.ext` -> `dir/name (n).ext`
fn numbered(path: &str, n: usize) -> String {
    let (dir, file) = match path.rsplit_once('/') {
        Some((dir, file)) => (Some(dir), file),
        None => (None, path),
    };
    let file = match file.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() => format!("{} ({}).{}", stem, n, ext),
        _ => format!("{} ({})", file, n),
    };
    match dir {
        Some(dir) => format!("{}/{}", dir, file),
        None => file,
    }
}

fn project_name(explicit: Option<String>, fallback: Option<String>) -> String {
    explicit
        .map(|n| n.trim().to_string())
        .filter(|n| !n.is_empty())
        .or(fallback)
        .map(|n| n.chars().take(MAX_FILENAME_LENGTH).collect())
        .unwrap_or_else(|| DEFAULT_PROJECT_NAME.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn inline(index: usize, path: Option<&str>) -> Snippet {
        Snippet {
            index,
            path: path.map(str::to_string),
            source: SnippetSource::Inline(String::new()),
            file: None,
        }
    }

    #[test]
    fn test_assign_paths_names_and_dedupes() {
        let mut snippets = vec![
            inline(0, None),
            inline(1, None),
            inline(2, Some("figs/a.png")),
            inline(3, Some("figs/a.png")),
            inline(4, Some("figs/a.png")),
        ];
        assign_paths(&mut snippets);
        let paths: Vec<_> = snippets.iter().map(|s| s.path.clone().unwrap()).collect();
        assert_eq!(
            paths,
            vec![
                "main.tex",
                "snippet_2.tex",
                "figs/a.png",
                "figs/a (1).png",
                "figs/a (2).png",
            ]
        );
    }

    #[test]
    fn test_explicit_main_is_respected() {
        let mut snippets = vec![inline(0, None), inline(1, Some("main.tex"))];
        assign_paths(&mut snippets);
        assert_eq!(snippets[0].path.as_deref(), Some("snippet_1.tex"));
        assert_eq!(snippets[1].path.as_deref(), Some("main.tex"));
    }

    #[test]
    fn test_project_name() {
        assert_eq!(project_name(Some(" Thesis ".into()), Some("T".into())), "Thesis");
        assert_eq!(project_name(Some("  ".into()), Some("From Title".into())), "From Title");
        assert_eq!(project_name(None, None), "Untitled");
        assert_eq!(project_name(Some("x".repeat(400)), None).len(), MAX_FILENAME_LENGTH);
    }

    #[test]
    fn test_numbered() {
        assert_eq!(numbered("a.tex", 1), "a (1).tex");
        assert_eq!(numbered(".bib", 2), ".bib (2)");
        assert_eq!(numbered("dir/README", 3), "dir/README (3)");
    }
}
