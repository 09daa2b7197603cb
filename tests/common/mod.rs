#![allow(dead_code)]

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use axum::{
    Router,
    extract::{Path, Query},
    http::{StatusCode, header},
    response::{IntoResponse, Response},
    routing::get,
};
use linked_import_backend::config::ImportConfig;
use linked_import_backend::services::downloader::BufferedDownloader;
use linked_import_backend::services::learn::{ImageProxyCache, LearnPageCache};
use linked_import_backend::services::fetcher::ChainedFetcher;
use linked_import_backend::services::link_proxy::LinkProxy;
use linked_import_backend::services::linked_file::{LinkedFileData, LinkedFileService};
use linked_import_backend::services::managers::{
    AccessDenied, ByteStream, CompileManager, CompileOutput, CreateProjectRequest,
    DocumentUpdaterManager, FileRecord, FileTreeManager, FilestoreManager, Managers, NotFound,
    ProjectEntity, ProjectManager, ProjectUploadManager, UploadFileRequest,
};
use linked_import_backend::services::snippets::SnippetImportService;
use linked_import_backend::utils::auth::validate_output_token;
use linked_import_backend::{AppState, create_app};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::Path as FsPath;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::AsyncReadExt;
use url::Url;

pub const PROXY_TOKEN: &str = "test-proxy-token";
pub const JWT_SECRET: &str = "test-secret";

#[derive(Debug, Clone)]
pub struct StoredFile {
    pub project_id: String,
    pub name: String,
    pub parent_folder_id: String,
    pub content: Vec<u8>,
    pub linked_file_data: Option<LinkedFileData>,
}

#[derive(Debug, Clone)]
pub struct CreatedProject {
    pub id: String,
    pub owner_id: String,
    pub name: String,
    pub compiler: String,
    pub root_doc_path: Option<String>,
    pub files: Vec<(String, Vec<u8>)>,
}

impl CreatedProject {
    pub fn file(&self, path: &str) -> Option<String> {
        self.files
            .iter()
            .find(|(p, _)| p == path)
            .map(|(_, content)| String::from_utf8_lossy(content).into_owned())
    }
}

#[derive(Default)]
struct Inner {
    owners: HashMap<String, String>,
    entities: HashMap<(String, String), ProjectEntity>,
    docs: HashMap<String, String>,
    files: HashMap<String, StoredFile>,
    compiles: HashMap<String, CompileOutput>,
    created: Vec<CreatedProject>,
    next_id: u64,
}

impl Inner {
    fn next_id(&mut self, prefix: &str) -> String {
        self.next_id += 1;
        format!("{}{}", prefix, self.next_id)
    }
}

/// In-memory stand-in for every collaborator of the import services
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn managers(self: &Arc<Self>) -> Managers {
        Managers {
            projects: self.clone(),
            docs: self.clone(),
            filestore: self.clone(),
            file_tree: self.clone(),
            compiles: self.clone(),
            uploads: self.clone(),
        }
    }

    pub fn add_project(&self, project_id: &str, owner_id: &str) {
        let mut inner = self.inner.lock().unwrap();
        inner
            .owners
            .insert(project_id.to_string(), owner_id.to_string());
    }

    pub fn add_doc(&self, project_id: &str, path: &str, content: &str) -> String {
        let mut inner = self.inner.lock().unwrap();
        let id = inner.next_id("doc");
        inner.docs.insert(id.clone(), content.to_string());
        inner.entities.insert(
            (project_id.to_string(), normalize(path)),
            ProjectEntity::Doc { id: id.clone() },
        );
        id
    }

    pub fn add_file(&self, project_id: &str, path: &str, content: &[u8]) -> String {
        let mut inner = self.inner.lock().unwrap();
        let id = inner.next_id("file");
        let name = path.rsplit('/').next().unwrap_or(path).to_string();
        inner.files.insert(
            id.clone(),
            StoredFile {
                project_id: project_id.to_string(),
                name,
                parent_folder_id: "root".to_string(),
                content: content.to_vec(),
                linked_file_data: None,
            },
        );
        inner.entities.insert(
            (project_id.to_string(), normalize(path)),
            ProjectEntity::File { id: id.clone() },
        );
        id
    }

    pub fn add_folder(&self, project_id: &str, path: &str) {
        let mut inner = self.inner.lock().unwrap();
        let id = inner.next_id("folder");
        inner.entities.insert(
            (project_id.to_string(), normalize(path)),
            ProjectEntity::Folder { id },
        );
    }

    pub fn set_compile_output(&self, project_id: &str, output: CompileOutput) {
        let mut inner = self.inner.lock().unwrap();
        inner.compiles.insert(project_id.to_string(), output);
    }

    pub fn file(&self, file_id: &str) -> Option<StoredFile> {
        self.inner.lock().unwrap().files.get(file_id).cloned()
    }

    pub fn files_in(&self, project_id: &str) -> Vec<StoredFile> {
        self.inner
            .lock()
            .unwrap()
            .files
            .values()
            .filter(|f| f.project_id == project_id)
            .cloned()
            .collect()
    }

    pub fn created(&self) -> Vec<CreatedProject> {
        self.inner.lock().unwrap().created.clone()
    }
}

fn normalize(path: &str) -> String {
    path.trim_start_matches('/').to_string()
}

async fn read_all(mut content: ByteStream) -> Result<Vec<u8>> {
    let mut bytes = Vec::new();
    content.read_to_end(&mut bytes).await?;
    Ok(bytes)
}

#[async_trait]
impl ProjectManager for MemoryStore {
    async fn check_access(&self, project_id: &str, user_id: &str) -> Result<()> {
        let inner = self.inner.lock().unwrap();
        match inner.owners.get(project_id) {
            Some(owner) if owner == user_id => Ok(()),
            Some(_) => Err(anyhow!(AccessDenied(format!(
                "user {} cannot access project {}",
                user_id, project_id
            )))),
            None => Err(anyhow!(NotFound(format!("project {}", project_id)))),
        }
    }

    async fn find_entity_by_path(&self, project_id: &str, path: &str) -> Result<ProjectEntity> {
        let inner = self.inner.lock().unwrap();
        inner
            .entities
            .get(&(project_id.to_string(), normalize(path)))
            .cloned()
            .ok_or_else(|| anyhow!(NotFound(format!("{} in project {}", path, project_id))))
    }
}

#[async_trait]
impl DocumentUpdaterManager for MemoryStore {
    async fn get_doc(&self, _project_id: &str, doc_id: &str) -> Result<String> {
        let inner = self.inner.lock().unwrap();
        inner
            .docs
            .get(doc_id)
            .cloned()
            .ok_or_else(|| anyhow!(NotFound(format!("doc {}", doc_id))))
    }
}

#[async_trait]
impl FilestoreManager for MemoryStore {
    async fn get_read_stream_for_project_file(
        &self,
        _project_id: &str,
        file_id: &str,
    ) -> Result<ByteStream> {
        let content = {
            let inner = self.inner.lock().unwrap();
            inner
                .files
                .get(file_id)
                .map(|f| f.content.clone())
                .ok_or_else(|| anyhow!(NotFound(format!("file {}", file_id))))?
        };
        Ok(Box::new(std::io::Cursor::new(content)))
    }
}

#[async_trait]
impl FileTreeManager for MemoryStore {
    async fn upload_file(&self, request: UploadFileRequest) -> Result<String> {
        let content = read_all(request.content).await?;
        assert_eq!(content.len() as u64, request.size, "declared size matches");

        let mut inner = self.inner.lock().unwrap();
        inner.files.retain(|_, f| {
            !(f.project_id == request.project_id
                && f.parent_folder_id == request.parent_folder_id
                && f.name == request.name)
        });
        let id = inner.next_id("file");
        inner.files.insert(
            id.clone(),
            StoredFile {
                project_id: request.project_id,
                name: request.name,
                parent_folder_id: request.parent_folder_id,
                content,
                linked_file_data: request.linked_file_data,
            },
        );
        Ok(id)
    }

    async fn get_file(&self, project_id: &str, file_id: &str) -> Result<FileRecord> {
        let inner = self.inner.lock().unwrap();
        inner
            .files
            .get(file_id)
            .filter(|f| f.project_id == project_id)
            .map(|f| FileRecord {
                id: file_id.to_string(),
                name: f.name.clone(),
                parent_folder_id: f.parent_folder_id.clone(),
                linked_file_data: f.linked_file_data.clone(),
            })
            .ok_or_else(|| anyhow!(NotFound(format!("file {}", file_id))))
    }
}

#[async_trait]
impl CompileManager for MemoryStore {
    async fn compile_headless(&self, project_id: &str, _user_id: &str) -> Result<CompileOutput> {
        let inner = self.inner.lock().unwrap();
        inner
            .compiles
            .get(project_id)
            .cloned()
            .ok_or_else(|| anyhow!("compile failed for {}", project_id))
    }
}

#[async_trait]
impl ProjectUploadManager for MemoryStore {
    async fn create_project(&self, request: CreateProjectRequest) -> Result<String> {
        let mut files = Vec::with_capacity(request.files.len());
        for file in request.files {
            let content = read_all(file.content).await?;
            assert_eq!(content.len() as u64, file.size, "declared size matches");
            files.push((file.path, content));
        }

        let mut inner = self.inner.lock().unwrap();
        let id = inner.next_id("project");
        inner.owners.insert(id.clone(), request.owner_id.clone());
        inner.created.push(CreatedProject {
            id: id.clone(),
            owner_id: request.owner_id,
            name: request.name,
            compiler: request.compiler,
            root_doc_path: request.root_doc_path,
            files,
        });
        Ok(id)
    }
}

/// Serves `app` on an ephemeral local port
pub async fn spawn_server(app: Router) -> SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

/// Config for a backend listening on `addr` whose chain is its own hop
pub fn test_config(addr: SocketAddr, tmp_dir: &FsPath) -> ImportConfig {
    let base = Url::parse(&format!("http://{}", addr)).unwrap();
    ImportConfig {
        proxy_chain: vec![base.join(&format!("proxy/{}", PROXY_TOKEN)).unwrap()],
        proxy_token: PROXY_TOKEN.to_string(),
        fetch_timeout: Duration::from_secs(10),
        max_download_size: 64 * 1024,
        download_tmp_dir: tmp_dir.join("buffers"),
        learn_image_cache_dir: tmp_dir.join("images"),
        jwt_secret: JWT_SECRET.to_string(),
        ..ImportConfig::development()
    }
}

pub struct TestBackend {
    pub addr: SocketAddr,
    pub config: ImportConfig,
    pub store: Arc<MemoryStore>,
    pub state: AppState,
}

impl TestBackend {
    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }
}

/// Starts a full backend over `store`, routing fetches through its own
/// proxy hop. `configure` adjusts the config before services are built.
pub async fn spawn_backend(
    store: Arc<MemoryStore>,
    tmp_dir: &FsPath,
    configure: impl FnOnce(&mut ImportConfig),
) -> TestBackend {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let mut config = test_config(addr, tmp_dir);
    configure(&mut config);
    std::fs::create_dir_all(&config.download_tmp_dir).unwrap();

    let state = build_state(&config, &store).await;
    let app = create_app(state.clone());
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    TestBackend {
        addr,
        config,
        store,
        state,
    }
}

pub async fn build_state(config: &ImportConfig, store: &Arc<MemoryStore>) -> AppState {
    let managers = store.managers();
    let downloader = BufferedDownloader::from_config(config).unwrap();
    let pages = LearnPageCache::new(
        ChainedFetcher::from_config(config).unwrap(),
        &config.learn_base_url,
        config.learn_cache_duration,
        config.max_download_size,
    )
    .unwrap();
    let images = ImageProxyCache::new(
        config.learn_image_cache_dir.clone(),
        config.learn_cache_duration,
        &config.learn_base_url,
        downloader.clone(),
    )
    .await
    .unwrap();

    AppState {
        linked_files: Arc::new(LinkedFileService::new(
            managers.clone(),
            downloader.clone(),
            config,
        )),
        snippets: Arc::new(SnippetImportService::new(managers, downloader, config)),
        pages: Arc::new(pages),
        images: Arc::new(images),
        proxy: LinkProxy::new(config).unwrap(),
        config: Arc::new(config.clone()),
    }
}

/// Origin server standing in for the rest of the internet.
///
/// - `/files/:name` serves `content of {name}`
/// - `/status/:code` answers with that status
/// - `/big` serves 128 KiB
/// - `/slow/:ms/:name` waits before answering
/// - `/project/:p/user/:u/build/:b/output/*path` checks the output token
pub fn origin_router(token_secret: String) -> Router {
    Router::new()
        .route(
            "/files/:name",
            get(|Path(name): Path<String>| async move {
                (
                    [(header::CONTENT_TYPE, "text/plain")],
                    format!("content of {}", name),
                )
            }),
        )
        .route(
            "/status/:code",
            get(|Path(code): Path<u16>| async move {
                StatusCode::from_u16(code).unwrap_or(StatusCode::IM_A_TEAPOT)
            }),
        )
        .route("/big", get(|| async { vec![b'x'; 128 * 1024] }))
        .route(
            "/slow/:ms/:name",
            get(|Path((ms, name)): Path<(u64, String)>| async move {
                tokio::time::sleep(Duration::from_millis(ms)).await;
                format!("content of {}", name)
            }),
        )
        .route(
            "/project/:project_id/user/:user_id/build/:build_id/output/*path",
            get(
                move |Path((project_id, user_id, build_id, path)): Path<(
                    String,
                    String,
                    String,
                    String,
                )>,
                      Query(query): Query<HashMap<String, String>>| {
                    let secret = token_secret.clone();
                    async move { serve_output(secret, project_id, user_id, build_id, path, query) }
                },
            ),
        )
}

fn serve_output(
    secret: String,
    project_id: String,
    user_id: String,
    build_id: String,
    path: String,
    query: HashMap<String, String>,
) -> Response {
    let authorized = query
        .get("token")
        .and_then(|t| validate_output_token(t, &secret).ok())
        .is_some_and(|claims| claims.sub == user_id && claims.project_id == project_id);
    if !authorized {
        return StatusCode::FORBIDDEN.into_response();
    }
    if build_id.starts_with("0000") {
        return StatusCode::NOT_FOUND.into_response();
    }
    let server = query.get("clsiserverid").cloned().unwrap_or_default();
    format!("{}@{}#{}", path, build_id, server).into_response()
}
