use super::{ImageProxyCache, LearnPageCache};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::sleep;

/// Periodically evicts stale pages and images until told to stop
pub struct CacheSweeper {
    pages: Arc<LearnPageCache>,
    images: Arc<ImageProxyCache>,
    interval: Duration,
    shutdown: watch::Receiver<bool>,
}

impl CacheSweeper {
    pub fn new(
        pages: Arc<LearnPageCache>,
        images: Arc<ImageProxyCache>,
        interval: Duration,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            pages,
            images,
            // A zero interval would spin
            interval: interval.max(Duration::from_secs(1)),
            shutdown,
        }
    }

    pub async fn run(mut self) {
        tracing::info!("🚀 Cache sweeper started (every {:?})", self.interval);

        loop {
            tokio::select! {
                _ = self.shutdown.changed() => {
                    tracing::info!("🛑 Cache sweeper shutting down");
                    break;
                }
                _ = sleep(self.interval) => {
                    self.sweep_once().await;
                }
            }
        }
    }

    pub async fn sweep_once(&self) {
        let pages = self.pages.sweep().await;
        match self.images.sweep().await {
            Ok(images) => {
                if pages + images > 0 {
                    tracing::info!("🧹 Evicted {} pages and {} images", pages, images);
                }
            }
            Err(e) => tracing::error!("Image cache sweep incomplete: {:#}", e),
        }
    }
}
