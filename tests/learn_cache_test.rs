mod common;

use axum::{
    Json, Router,
    body::Body,
    extract::{Path, Query},
    http::{Request, StatusCode, header},
    response::{IntoResponse, Response},
    routing::get,
};
use common::{MemoryStore, TestBackend, spawn_backend, spawn_server};
use linked_import_backend::create_app;
use linked_import_backend::services::fetcher::FetchError;
use linked_import_backend::services::learn::CacheSweeper;
use linked_import_backend::services::managers::NotFound;
use serde_json::json;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;
use tower::ServiceExt;

const PNG: &[u8] = &[0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A, 0, 0, 0, 13];

#[derive(Default)]
struct Wiki {
    page_hits: AtomicUsize,
    image_hits: AtomicUsize,
    failing: AtomicBool,
}

async fn spawn_wiki(wiki: Arc<Wiki>) -> SocketAddr {
    let pages = wiki.clone();
    let images = wiki;
    let app = Router::new()
        .route(
            "/learn/api.php",
            get(move |Query(query): Query<HashMap<String, String>>| {
                let wiki = pages.clone();
                async move { wiki_page(&wiki, &query) }
            }),
        )
        .route(
            "/learn-scripts/images/*path",
            get(move |Path(path): Path<String>| {
                let wiki = images.clone();
                async move {
                    wiki.image_hits.fetch_add(1, Ordering::SeqCst);
                    if wiki.failing.load(Ordering::SeqCst) {
                        return StatusCode::SERVICE_UNAVAILABLE.into_response();
                    }
                    if path.ends_with(".png") {
                        PNG.to_vec().into_response()
                    } else {
                        StatusCode::NOT_FOUND.into_response()
                    }
                }
            }),
        );
    spawn_server(app).await
}

fn wiki_page(wiki: &Wiki, query: &HashMap<String, String>) -> Response {
    wiki.page_hits.fetch_add(1, Ordering::SeqCst);
    if wiki.failing.load(Ordering::SeqCst) {
        return StatusCode::SERVICE_UNAVAILABLE.into_response();
    }
    let revision = wiki.page_hits.load(Ordering::SeqCst);
    match query.get("page").map(String::as_str) {
        Some("Tables") => Json(json!({
            "parse": {
                "title": "Tables",
                "revid": revision,
                "text": { "*": "<table></table>" },
                "categories": [{ "sortkey": "", "*": "LaTeX_Basics" }]
            }
        }))
        .into_response(),
        Some("Table") => Json(json!({
            "parse": {
                "title": "Tables",
                "revid": revision,
                "text": { "*": "<table></table>" },
                "redirects": [{ "from": "Table", "to": "Tables" }]
            }
        }))
        .into_response(),
        _ => Json(json!({
            "error": { "code": "missingtitle", "info": "The page you specified doesn't exist." }
        }))
        .into_response(),
    }
}

async fn backend_with_ttl(wiki: &Arc<Wiki>, tmp: &std::path::Path, ttl: Duration) -> TestBackend {
    let addr = spawn_wiki(wiki.clone()).await;
    spawn_backend(MemoryStore::new(), tmp, move |config| {
        config.learn_base_url = format!("http://{}", addr).parse().unwrap();
        config.learn_cache_duration = ttl;
    })
    .await
}

#[tokio::test]
async fn test_fresh_page_is_served_from_cache() {
    let tmp = tempfile::tempdir().unwrap();
    let wiki = Arc::new(Wiki::default());
    let backend = backend_with_ttl(&wiki, tmp.path(), Duration::from_secs(3600)).await;
    let pages = &backend.state.pages;

    let first = pages.get_page("/Tables").await.unwrap();
    let second = pages.get_page("Tables/").await.unwrap();

    assert_eq!(first, second);
    assert_eq!(first.categories, vec!["LaTeX_Basics"]);
    assert_eq!(wiki.page_hits.load(Ordering::SeqCst), 1);
    assert_eq!(pages.cached_pages().await, 1);
    assert_eq!(pages.sweep().await, 0);
}

#[tokio::test]
async fn test_expired_page_is_refetched_and_swept() {
    let tmp = tempfile::tempdir().unwrap();
    let wiki = Arc::new(Wiki::default());
    let backend = backend_with_ttl(&wiki, tmp.path(), Duration::ZERO).await;
    let pages = &backend.state.pages;

    let first = pages.get_page("Tables").await.unwrap();
    let second = pages.get_page("Tables").await.unwrap();

    assert_eq!(wiki.page_hits.load(Ordering::SeqCst), 2);
    assert!(second.revision > first.revision);
    assert_eq!(pages.sweep().await, 1);
    assert_eq!(pages.cached_pages().await, 0);
}

#[tokio::test]
async fn test_stale_page_is_served_when_refetch_fails() {
    let tmp = tempfile::tempdir().unwrap();
    let wiki = Arc::new(Wiki::default());
    let backend = backend_with_ttl(&wiki, tmp.path(), Duration::ZERO).await;
    let pages = &backend.state.pages;

    let fresh = pages.get_page("Tables").await.unwrap();
    wiki.failing.store(true, Ordering::SeqCst);
    let stale = pages.get_page("Tables").await.unwrap();

    assert_eq!(fresh, stale);
    assert_eq!(wiki.page_hits.load(Ordering::SeqCst), 2);

    // Nothing cached to fall back on
    assert!(pages.get_page("Figures").await.is_err());
}

#[tokio::test]
async fn test_missing_page_is_not_found() {
    let tmp = tempfile::tempdir().unwrap();
    let wiki = Arc::new(Wiki::default());
    let backend = backend_with_ttl(&wiki, tmp.path(), Duration::from_secs(60)).await;

    let err = backend.state.pages.get_page("Nope").await.unwrap_err();
    assert!(err.chain().any(|c| c.is::<NotFound>()));
    assert_eq!(backend.state.pages.cached_pages().await, 0);
}

#[tokio::test]
async fn test_oversized_page_is_rejected() {
    let tmp = tempfile::tempdir().unwrap();
    let wiki = Arc::new(Wiki::default());
    let addr = spawn_wiki(wiki.clone()).await;
    let backend = spawn_backend(MemoryStore::new(), tmp.path(), move |config| {
        config.learn_base_url = format!("http://{}", addr).parse().unwrap();
        config.max_download_size = 32;
    })
    .await;

    let err = backend.state.pages.get_page("Tables").await.unwrap_err();
    assert!(err
        .chain()
        .any(|c| matches!(c.downcast_ref::<FetchError>(), Some(FetchError::BodyTooLarge))));
    assert_eq!(backend.state.pages.cached_pages().await, 0);
}

#[tokio::test]
async fn test_redirected_page_reports_target() {
    let tmp = tempfile::tempdir().unwrap();
    let wiki = Arc::new(Wiki::default());
    let backend = backend_with_ttl(&wiki, tmp.path(), Duration::from_secs(60)).await;

    let page = backend.state.pages.get_page("Table").await.unwrap();
    assert_eq!(page.redirect.as_deref(), Some("Tables"));
}

#[tokio::test]
async fn test_image_is_mirrored_and_reused() {
    let tmp = tempfile::tempdir().unwrap();
    let wiki = Arc::new(Wiki::default());
    let backend = backend_with_ttl(&wiki, tmp.path(), Duration::from_secs(3600)).await;
    let images = &backend.state.images;

    let first = images.proxy_image("figs/plot.png").await.unwrap();
    let second = images.proxy_image("/figs/plot.png").await.unwrap();

    assert_eq!(first, second);
    assert_eq!(first, backend.config.learn_image_cache_dir.join("figs-plot.png"));
    assert_eq!(std::fs::read(&first).unwrap(), PNG);
    assert_eq!(wiki.image_hits.load(Ordering::SeqCst), 1);
    assert_eq!(images.cached_images().await, 1);

    assert!(images.proxy_image("../secret.png").await.is_err());
    assert!(images.proxy_image("missing.gif").await.is_err());
    assert!(!backend.config.learn_image_cache_dir.join("missing.gif").exists());
}

#[tokio::test]
async fn test_stale_image_survives_failed_refresh_until_swept() {
    let tmp = tempfile::tempdir().unwrap();
    let wiki = Arc::new(Wiki::default());
    let backend = backend_with_ttl(&wiki, tmp.path(), Duration::ZERO).await;
    let images = &backend.state.images;

    let path = images.proxy_image("plot.png").await.unwrap();
    wiki.failing.store(true, Ordering::SeqCst);
    let stale = images.proxy_image("plot.png").await.unwrap();

    assert_eq!(path, stale);
    assert_eq!(wiki.image_hits.load(Ordering::SeqCst), 2);

    assert_eq!(images.sweep().await.unwrap(), 1);
    assert!(!path.exists());
    assert_eq!(images.cached_images().await, 0);
}

#[tokio::test]
async fn test_existing_images_are_adopted_on_start() {
    let tmp = tempfile::tempdir().unwrap();
    let dir = tmp.path().join("images");
    std::fs::create_dir_all(&dir).unwrap();
    std::fs::write(dir.join("old.png"), PNG).unwrap();

    let wiki = Arc::new(Wiki::default());
    let backend = backend_with_ttl(&wiki, tmp.path(), Duration::from_secs(3600)).await;

    assert_eq!(backend.state.images.cached_images().await, 1);
    let path = backend.state.images.proxy_image("old.png").await.unwrap();
    assert_eq!(path, dir.join("old.png"));
    assert_eq!(wiki.image_hits.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_sweeper_stops_on_shutdown() {
    let tmp = tempfile::tempdir().unwrap();
    let wiki = Arc::new(Wiki::default());
    let backend = backend_with_ttl(&wiki, tmp.path(), Duration::ZERO).await;
    backend.state.pages.get_page("Tables").await.unwrap();

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    let sweeper = CacheSweeper::new(
        backend.state.pages.clone(),
        backend.state.images.clone(),
        Duration::from_secs(3600),
        shutdown_rx,
    );
    sweeper.sweep_once().await;
    assert_eq!(backend.state.pages.cached_pages().await, 0);

    let handle = tokio::spawn(sweeper.run());
    shutdown_tx.send(true).unwrap();
    tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .expect("sweeper exits after shutdown")
        .unwrap();
}

#[tokio::test]
async fn test_learn_routes() {
    let tmp = tempfile::tempdir().unwrap();
    let wiki = Arc::new(Wiki::default());
    let backend = backend_with_ttl(&wiki, tmp.path(), Duration::from_secs(60)).await;
    let get = |uri: &str| Request::builder().uri(uri).body(Body::empty()).unwrap();

    let app = create_app(backend.state.clone());
    let response = app.clone().oneshot(get("/learn/Table")).await.unwrap();
    assert_eq!(response.status(), StatusCode::FOUND);
    assert_eq!(response.headers()[header::LOCATION], "/learn/Tables");

    let response = app.clone().oneshot(get("/learn/Tables")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = app.clone().oneshot(get("/learn/Nope")).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let response = app.oneshot(get("/learn-scripts/images/figs/plot.png")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()[header::CONTENT_TYPE], "image/png");
}
