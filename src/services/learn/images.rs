use crate::services::downloader::BufferedDownloader;
use crate::utils::validation::validate_path;
use anyhow::{Context, Result, anyhow};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::fmt;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::RwLock;
use url::Url;

const STAGING_DIR: &str = ".tmp";

/// Every file a sweep failed to remove. The sweep itself keeps going.
#[derive(Error, Debug)]
pub struct SweepError {
    pub failures: Vec<(String, std::io::Error)>,
}

impl fmt::Display for SweepError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "failed to remove {} cached images", self.failures.len())?;
        for (key, e) in &self.failures {
            write!(f, "; {}: {}", key, e)?;
        }
        Ok(())
    }
}

/// Flat on-disk name for an image path: `a/b/c.png` -> `a-b-c.png`
pub fn cache_key(path: &str) -> Result<String> {
    let path = path.trim_start_matches('/');
    validate_path(path)?;
    Ok(path.replace('/', "-"))
}

/// Documentation images mirrored to a local directory
pub struct ImageProxyCache {
    dir: PathBuf,
    ttl: Duration,
    images_url: Url,
    downloader: BufferedDownloader,
    entries: RwLock<HashMap<String, DateTime<Utc>>>,
}

impl ImageProxyCache {
    /// Opens the cache directory and adopts the files already in it, aged
    /// by their modification time.
    pub async fn new(
        dir: PathBuf,
        ttl: Duration,
        learn_base_url: &Url,
        downloader: BufferedDownloader,
    ) -> Result<Self> {
        let staging = dir.join(STAGING_DIR);
        tokio::fs::create_dir_all(&staging)
            .await
            .with_context(|| format!("create image cache dir {}", staging.display()))?;

        let entries = seed_entries(&dir).await?;
        tracing::info!(
            "🖼️ Image cache at {} starts with {} files",
            dir.display(),
            entries.len()
        );

        Ok(Self {
            images_url: learn_base_url.clone(),
            // Buffers land next to the cache so `move_to` is a rename
            downloader: downloader.with_tmp_dir(staging),
            dir,
            ttl,
            entries: RwLock::new(entries),
        })
    }

    fn is_fresh(&self, fetched_at: DateTime<Utc>) -> bool {
        let age = Utc::now().signed_duration_since(fetched_at);
        age.to_std().map(|age| age < self.ttl).unwrap_or(true)
    }

    fn image_url(&self, path: &str) -> Result<Url> {
        let mut url = self.images_url.clone();
        url.set_query(None);
        url.path_segments_mut()
            .map_err(|_| anyhow!("learn base url cannot be a base"))?
            .pop_if_empty()
            .extend(["learn-scripts", "images"])
            .extend(path.split('/'));
        Ok(url)
    }

    /// Local path of a fresh copy of the image at `path`.
    ///
    /// A failed refresh falls back to the stale file when one exists.
    pub async fn proxy_image(&self, path: &str) -> Result<PathBuf> {
        let key = cache_key(path)?;
        let target = self.dir.join(&key);

        let fetched_at = self.entries.read().await.get(&key).copied();
        if fetched_at.is_some_and(|t| self.is_fresh(t)) {
            return Ok(target);
        }

        match self.refresh(path.trim_start_matches('/'), &target).await {
            Ok(()) => {
                self.entries.write().await.insert(key, Utc::now());
                Ok(target)
            }
            Err(e) => {
                let stale = fetched_at.is_some()
                    && tokio::fs::try_exists(&target).await.unwrap_or(false);
                if !stale {
                    return Err(e);
                }
                tracing::warn!("Serving stale image {}: {:#}", key, e);
                Ok(target)
            }
        }
    }

    async fn refresh(&self, path: &str, target: &Path) -> Result<()> {
        let url = self.image_url(path)?;
        let mut buffered = self
            .downloader
            .download_file(&url)
            .await
            .with_context(|| format!("download image {}", path))?;
        let moved = buffered.move_to(target).await;
        buffered.cleanup()?;
        moved
    }

    /// Deletes images past their lifetime.
    ///
    /// Files that cannot be removed stay indexed and are reported together
    /// in a [`SweepError`].
    pub async fn sweep(&self) -> Result<usize> {
        let stale: Vec<String> = self
            .entries
            .read()
            .await
            .iter()
            .filter(|(_, fetched_at)| !self.is_fresh(**fetched_at))
            .map(|(key, _)| key.clone())
            .collect();

        let mut removed = Vec::new();
        let mut failures = Vec::new();
        for key in stale {
            match tokio::fs::remove_file(self.dir.join(&key)).await {
                Ok(()) => removed.push(key),
                Err(e) if e.kind() == ErrorKind::NotFound => removed.push(key),
                Err(e) => failures.push((key, e)),
            }
        }

        {
            let mut entries = self.entries.write().await;
            for key in &removed {
                entries.remove(key);
            }
        }

        if failures.is_empty() {
            Ok(removed.len())
        } else {
            Err(SweepError { failures }.into())
        }
    }

    pub async fn cached_images(&self) -> usize {
        self.entries.read().await.len()
    }
}

async fn seed_entries(dir: &Path) -> Result<HashMap<String, DateTime<Utc>>> {
    let mut entries = HashMap::new();
    let mut read_dir = tokio::fs::read_dir(dir)
        .await
        .with_context(|| format!("read image cache dir {}", dir.display()))?;

    while let Some(entry) = read_dir.next_entry().await.context("read image cache dir")? {
        let metadata = match entry.metadata().await {
            Ok(m) => m,
            Err(e) => {
                tracing::warn!("Skipping cached image {:?}: {}", entry.file_name(), e);
                continue;
            }
        };
        if !metadata.is_file() {
            continue;
        }
        let Some(key) = entry.file_name().to_str().map(str::to_string) else {
            continue;
        };
        let modified = metadata
            .modified()
            .map(DateTime::<Utc>::from)
            .unwrap_or_else(|_| Utc::now());
        entries.insert(key, modified);
    }
    Ok(entries)
}
