use clap::{Parser, ValueEnum};
use dotenvy::dotenv;
use linked_import_backend::config::ImportConfig;
use linked_import_backend::infrastructure::{database, storage};
use linked_import_backend::services::compile::ClsiCompileManager;
use linked_import_backend::services::downloader::BufferedDownloader;
use linked_import_backend::services::fetcher::ChainedFetcher;
use linked_import_backend::services::learn::{CacheSweeper, ImageProxyCache, LearnPageCache};
use linked_import_backend::services::link_proxy::LinkProxy;
use linked_import_backend::services::linked_file::LinkedFileService;
use linked_import_backend::services::managers::Managers;
use linked_import_backend::services::project_store::ProjectStore;
use linked_import_backend::services::snippets::SnippetImportService;
use linked_import_backend::{AppState, create_app};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::signal;
use tower_http::trace::TraceLayer;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
enum Mode {
    /// HTTP API plus the cache sweeper
    All,
    /// HTTP API only
    Api,
}

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Services to run
    #[arg(short, long, value_enum, default_value_t = Mode::All)]
    mode: Mode,

    /// Port for the API server
    #[arg(short, long, default_value_t = 3000)]
    port: u16,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 1. Initial Environment & Logging Setup
    dotenv().ok();
    let args = Args::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "linked_import_backend=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("🚀 Starting Linked Import Backend [Mode: {:?}]...", args.mode);

    let config = ImportConfig::from_env()?;
    config.validate()?;
    info!(
        "🛡️  Import Config: Max Download={}MB, Workers={}, Proxy Hops={}",
        config.max_download_size / 1024 / 1024,
        config.parallel_downloads,
        config.proxy_chain.len()
    );

    // 2. Setup Infrastructure
    let db = database::setup_database().await?;
    let storage_service = storage::setup_storage().await?;

    let project_store = Arc::new(ProjectStore::new(
        db,
        storage_service,
        config.max_doc_length,
    ));
    let compiles = Arc::new(ClsiCompileManager::new(
        config.clsi_url.clone(),
        project_store.clone(),
    )?);
    let managers = Managers {
        projects: project_store.clone(),
        docs: project_store.clone(),
        filestore: project_store.clone(),
        file_tree: project_store.clone(),
        compiles,
        uploads: project_store,
    };

    // 3. Import Services & Caches
    let downloader = BufferedDownloader::from_config(&config)?;
    let pages = Arc::new(LearnPageCache::new(
        ChainedFetcher::from_config(&config)?,
        &config.learn_base_url,
        config.learn_cache_duration,
        config.max_download_size,
    )?);
    let images = Arc::new(
        ImageProxyCache::new(
            config.learn_image_cache_dir.clone(),
            config.learn_cache_duration,
            &config.learn_base_url,
            downloader.clone(),
        )
        .await?,
    );

    let state = AppState {
        linked_files: Arc::new(LinkedFileService::new(
            managers.clone(),
            downloader.clone(),
            &config,
        )),
        snippets: Arc::new(SnippetImportService::new(managers, downloader, &config)),
        pages: pages.clone(),
        images: images.clone(),
        proxy: LinkProxy::new(&config)?,
        config: Arc::new(config.clone()),
    };

    // 4. Setup Graceful Shutdown Channel
    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    let mut handles = Vec::new();

    if args.mode == Mode::All {
        let sweeper = CacheSweeper::new(pages, images, config.learn_cache_duration, shutdown_rx);
        handles.push(tokio::spawn(sweeper.run()));
        info!("🧹 Cache sweeper initialized.");
    }

    // Configure tracing layer for HTTP requests
    let trace_layer = TraceLayer::new_for_http()
        .make_span_with(|request: &axum::http::Request<_>| {
            let request_id = request
                .headers()
                .get("x-request-id")
                .and_then(|v| v.to_str().ok())
                .unwrap_or("unknown");
            tracing::info_span!(
                "http_request",
                method = %request.method(),
                uri = %request.uri(),
                request_id = %request_id,
            )
        })
        .on_request(|request: &axum::http::Request<_>, _span: &tracing::Span| {
            info!("📥 {} {}", request.method(), request.uri());
        })
        .on_response(
            |response: &axum::http::Response<_>,
             latency: std::time::Duration,
             _span: &tracing::Span| {
                info!(
                    "📤 Finished in {:?} with status {}",
                    latency,
                    response.status()
                );
            },
        );

    let app = create_app(state).layer(trace_layer);
    let addr = SocketAddr::from(([0, 0, 0, 0], args.port));
    let listener = tokio::net::TcpListener::bind(addr).await?;

    info!("✅ API Server listening on: http://0.0.0.0:{}", args.port);
    info!("📖 Swagger UI documentation: http://localhost:{}/swagger-ui", args.port);

    if let Err(e) = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
    {
        error!("❌ Server runtime error: {}", e);
    }

    info!("🛑 Shutting down backend services...");
    let _ = shutdown_tx.send(true);
    for handle in handles {
        let _ = handle.await;
    }

    info!("👋 Backend exited cleanly.");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("⌨️  Ctrl+C received, initiating graceful shutdown...");
        },
        _ = terminate => {
            info!("💤 SIGTERM received, initiating graceful shutdown...");
        },
    }
}
