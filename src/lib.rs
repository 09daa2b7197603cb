pub mod api;
pub mod config;
pub mod entities;
pub mod infrastructure;
pub mod services;
pub mod utils;

use crate::config::ImportConfig;
use crate::services::learn::{ImageProxyCache, LearnPageCache};
use crate::services::link_proxy::LinkProxy;
use crate::services::linked_file::LinkedFileService;
use crate::services::snippets::SnippetImportService;
use axum::{
    Router,
    middleware::from_fn_with_state,
    routing::{get, post},
};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use utoipa::openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme};
use utoipa::{Modify, OpenApi};
use utoipa_swagger_ui::SwaggerUi;

struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "jwt",
                SecurityScheme::Http(
                    HttpBuilder::new()
                        .scheme(HttpAuthScheme::Bearer)
                        .bearer_format("JWT")
                        .build(),
                ),
            );
        }
    }
}

#[derive(OpenApi)]
#[openapi(
    paths(
        api::handlers::health::health_check,
        api::handlers::linked_files::create_linked_file,
        api::handlers::linked_files::refresh_linked_file,
        api::handlers::open_in_overleaf::create_from_snippets,
        api::handlers::open_in_overleaf::create_from_zip,
        api::handlers::learn::get_page,
        api::handlers::learn::get_image,
        api::handlers::proxy::proxy,
    ),
    components(
        schemas(
            api::handlers::health::HealthResponse,
            api::handlers::linked_files::CreateLinkedFileBody,
            api::handlers::linked_files::LinkedFileResponse,
            api::handlers::open_in_overleaf::CreateFromSnippetsBody,
            api::handlers::open_in_overleaf::CreateFromZipBody,
            services::linked_file::LinkedFileParams,
            services::linked_file::LinkedFileData,
            services::linked_file::Provider,
            services::snippets::SnippetInput,
            services::snippets::CreateProjectResponse,
            services::learn::LearnPage,
        )
    ),
    modifiers(&SecurityAddon),
    tags(
        (name = "linked_files", description = "Files imported from URLs and other projects"),
        (name = "open_in_overleaf", description = "Project creation from snippets and archives"),
        (name = "learn", description = "Cached documentation pages and images"),
        (name = "proxy", description = "Outbound fetch hop"),
        (name = "system", description = "Health")
    )
)]
pub struct ApiDoc;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<ImportConfig>,
    pub linked_files: Arc<LinkedFileService>,
    pub snippets: Arc<SnippetImportService>,
    pub pages: Arc<LearnPageCache>,
    pub images: Arc<ImageProxyCache>,
    pub proxy: LinkProxy,
}

pub fn create_app(state: AppState) -> Router {
    let authenticated = Router::new()
        .route(
            "/project/:project_id/linked_file",
            post(api::handlers::linked_files::create_linked_file),
        )
        .route(
            "/project/:project_id/linked_file/:file_id/refresh",
            post(api::handlers::linked_files::refresh_linked_file),
        )
        .route(
            "/docs",
            post(api::handlers::open_in_overleaf::create_from_snippets),
        )
        .route(
            "/docs/zip",
            post(api::handlers::open_in_overleaf::create_from_zip),
        )
        .layer(from_fn_with_state(
            state.clone(),
            api::middleware::auth::auth_middleware,
        ));

    Router::new()
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .route("/health", get(api::handlers::health::health_check))
        .route("/learn/*page", get(api::handlers::learn::get_page))
        .route(
            "/learn-scripts/images/*path",
            get(api::handlers::learn::get_image),
        )
        .route("/proxy/:token", get(api::handlers::proxy::proxy))
        .merge(authenticated)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any)
                .expose_headers(Any),
        )
        .with_state(state)
}
