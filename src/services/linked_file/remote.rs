use crate::services::downloader::{BufferedDownloader, BufferedFile};
use anyhow::{Context, Result};
use url::Url;

/// Downloads an external resource through the proxy chain
pub(super) async fn import(downloader: &BufferedDownloader, url: &Url) -> Result<BufferedFile> {
    tracing::info!("🌐 Importing linked url {}", url);
    downloader.download_file(url).await.context("download file")
}
