use crate::config::ImportConfig;
use crate::services::fetcher::{ChainedFetcher, FetchError};
use crate::utils::validation::validate_filename;
use anyhow::{Context, Result, anyhow};
use percent_encoding::percent_decode_str;
use std::io::{ErrorKind, SeekFrom};
use std::path::{Path, PathBuf};
use tempfile::TempPath;
use tokio::fs::File;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use url::Url;

/// Downloaded bytes held in a private temp file.
///
/// Exactly one of [`BufferedFile::move_to`], [`BufferedFile::open`] or
/// [`BufferedFile::cleanup`] is expected to release it. Dropping it removes
/// the temp file as well.
#[derive(Debug)]
pub struct BufferedFile {
    file: Option<File>,
    temp_path: Option<TempPath>,
    location: PathBuf,
    /// Number of bytes written
    pub size: u64,
    /// File name derived from the source; empty when it was not a valid name
    pub path: String,
}

impl BufferedFile {
    /// Location of the temp file on disk
    pub fn location(&self) -> &Path {
        &self.location
    }

    /// Hands out the open handle on the first call, reopens from disk after.
    pub async fn open(&mut self) -> Result<File> {
        if let Some(file) = self.file.take() {
            return Ok(file);
        }
        if self.temp_path.is_none() {
            return Err(anyhow!("buffered file was already moved or cleaned up"));
        }
        File::open(&self.location)
            .await
            .with_context(|| format!("reopen {}", self.location.display()))
    }

    /// Renames the temp file to `target`, copying it when `target` is on
    /// another filesystem.
    pub async fn move_to(&mut self, target: &Path) -> Result<()> {
        drop(self.file.take());
        let temp_path = self
            .temp_path
            .take()
            .ok_or_else(|| anyhow!("buffered file was already moved or cleaned up"))?;

        match tokio::fs::rename(&temp_path, target).await {
            Ok(()) => {
                // The file now lives at `target`; stop the guard from deleting it.
                let _ = temp_path.keep();
            }
            Err(e) if e.kind() == ErrorKind::CrossesDevices => {
                tokio::fs::copy(&temp_path, target)
                    .await
                    .context("copy to move target")?;
                // Dropping the guard removes the temp copy
                drop(temp_path);
            }
            Err(e) => return Err(anyhow!(e).context("move target")),
        }

        self.location = target.to_path_buf();
        Ok(())
    }

    /// Closes and removes the temp file. Safe to call repeatedly.
    pub fn cleanup(&mut self) -> Result<()> {
        drop(self.file.take());
        if let Some(temp_path) = self.temp_path.take() {
            match temp_path.close() {
                Ok(()) => {}
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => return Err(anyhow!(e).context("cleanup temp file")),
            }
        }
        Ok(())
    }
}

/// Last path segment of `url`, kept only if it is a valid file name
pub fn derive_filename(url: &Url) -> String {
    let segment = url
        .path_segments()
        .and_then(|segments| segments.filter(|s| !s.is_empty()).last())
        .unwrap_or("");
    let decoded = percent_decode_str(segment).decode_utf8_lossy().into_owned();

    match validate_filename(&decoded) {
        Ok(()) => decoded,
        Err(e) => {
            tracing::debug!("dropping derived filename for {}: {}", url, e);
            String::new()
        }
    }
}

/// Fetches through the proxy chain into temp files
#[derive(Clone)]
pub struct BufferedDownloader {
    fetcher: ChainedFetcher,
    tmp_dir: PathBuf,
    max_size: u64,
}

impl BufferedDownloader {
    pub fn new(fetcher: ChainedFetcher, tmp_dir: PathBuf, max_size: u64) -> Self {
        Self {
            fetcher,
            tmp_dir,
            max_size,
        }
    }

    pub fn from_config(config: &ImportConfig) -> Result<Self> {
        Ok(Self::new(
            ChainedFetcher::from_config(config)?,
            config.download_tmp_dir.clone(),
            config.max_download_size,
        ))
    }

    /// Same downloader writing its buffers into `tmp_dir`
    pub fn with_tmp_dir(&self, tmp_dir: PathBuf) -> Self {
        Self {
            fetcher: self.fetcher.clone(),
            tmp_dir,
            max_size: self.max_size,
        }
    }

    pub fn fetcher(&self) -> &ChainedFetcher {
        &self.fetcher
    }

    fn create_temp(&self) -> Result<(File, TempPath)> {
        let named = tempfile::Builder::new()
            .prefix("buffered-")
            .tempfile_in(&self.tmp_dir)
            .context("create temp file")?;
        let (file, temp_path) = named.into_parts();
        Ok((File::from_std(file), temp_path))
    }

    async fn finish(
        mut file: File,
        temp_path: TempPath,
        size: u64,
        path: String,
    ) -> Result<BufferedFile> {
        file.flush().await.context("flush temp file")?;
        file.seek(SeekFrom::Start(0))
            .await
            .context("seek temp file")?;

        Ok(BufferedFile {
            file: Some(file),
            location: temp_path.to_path_buf(),
            temp_path: Some(temp_path),
            size,
            path,
        })
    }

    /// Downloads `url` into a temp file positioned at its start.
    ///
    /// A partially written temp file is removed on every error path.
    pub async fn download_file(&self, url: &Url) -> Result<BufferedFile> {
        let mut response = self.fetcher.fetch(url).await?;

        if response
            .content_length()
            .is_some_and(|len| len > self.max_size)
        {
            return Err(FetchError::BodyTooLarge.into());
        }

        let (mut file, temp_path) = self.create_temp()?;
        let mut size: u64 = 0;

        // `temp_path` removes the file if any `?` below returns early
        while let Some(chunk) = response
            .chunk()
            .await
            .map_err(FetchError::from)
            .context("read body")?
        {
            size += chunk.len() as u64;
            if size > self.max_size {
                return Err(FetchError::BodyTooLarge.into());
            }
            file.write_all(&chunk).await.context("write temp file")?;
        }

        tracing::debug!("buffered {} bytes from {}", size, url);
        Self::finish(file, temp_path, size, derive_filename(url)).await
    }

    /// Buffers an arbitrary stream into a temp file named `path`
    pub async fn buffer_reader<R>(&self, mut reader: R, path: String) -> Result<BufferedFile>
    where
        R: AsyncRead + Unpin + Send,
    {
        let (mut file, temp_path) = self.create_temp()?;
        let mut buffer = vec![0u8; 64 * 1024];
        let mut size: u64 = 0;

        loop {
            let n = reader.read(&mut buffer).await.context("read source")?;
            if n == 0 {
                break;
            }
            size += n as u64;
            if size > self.max_size {
                return Err(FetchError::BodyTooLarge.into());
            }
            file.write_all(&buffer[..n])
                .await
                .context("write temp file")?;
        }

        Self::finish(file, temp_path, size, path).await
    }

    /// Buffers in-memory content into a temp file named `path`
    pub async fn buffer_bytes(&self, content: &[u8], path: String) -> Result<BufferedFile> {
        let (mut file, temp_path) = self.create_temp()?;
        file.write_all(content).await.context("write temp file")?;
        Self::finish(file, temp_path, content.len() as u64, path).await
    }
}
