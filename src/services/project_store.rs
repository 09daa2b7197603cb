//! SeaORM backed project trees. Docs live in the database, binary files
//! in object storage.

use crate::entities::project_entries::{KIND_DOC, KIND_FILE, KIND_FOLDER};
use crate::entities::{prelude::*, *};
use crate::services::linked_file::LinkedFileData;
use crate::services::managers::{
    AccessDenied, ByteStream, CreateProjectRequest, DocumentUpdaterManager, FileRecord,
    FileTreeManager, FilestoreManager, NotFound, ProjectEntity, ProjectManager,
    ProjectUploadManager, UploadFileRequest,
};
use crate::services::storage::StorageService;
use crate::utils::validation::{ValidationError, validate_filename, validate_path};
use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection, EntityTrait, QueryFilter,
    Set, TransactionTrait,
};
use std::collections::HashMap;
use std::io::Cursor;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncReadExt;
use uuid::Uuid;

/// Extensions stored as editable docs rather than binary files
const DOC_EXTENSIONS: &[&str] = &[
    "tex", "latex", "sty", "cls", "bst", "bib", "bibtex", "txt", "md", "tikz", "mtx", "rtex",
    "asy", "lbx", "bbx", "cbx", "clo", "ldf", "def", "cfg", "ltx",
];

const FILE_URL_TTL: Duration = Duration::from_secs(3600);

pub fn is_doc_path(path: &str) -> bool {
    path.rsplit_once('.')
        .map(|(_, ext)| DOC_EXTENSIONS.contains(&ext.to_lowercase().as_str()))
        .unwrap_or(false)
}

/// Everything a compile needs to know about a project
#[derive(Debug, Default)]
pub struct ProjectSnapshot {
    pub compiler: String,
    pub root_doc_path: Option<String>,
    pub docs: Vec<(String, String)>,
    /// Path, download url and modification time in milliseconds
    pub files: Vec<(String, String, i64)>,
}

pub struct ProjectStore {
    db: DatabaseConnection,
    storage: Arc<dyn StorageService>,
    max_doc_length: usize,
}

impl ProjectStore {
    pub fn new(db: DatabaseConnection, storage: Arc<dyn StorageService>, max_doc_length: usize) -> Self {
        Self {
            db,
            storage,
            max_doc_length,
        }
    }

    async fn project(&self, project_id: &str) -> Result<projects::Model> {
        Projects::find_by_id(project_id.to_string())
            .one(&self.db)
            .await?
            .ok_or_else(|| anyhow!(NotFound(format!("project {}", project_id))))
    }

    async fn entry(&self, project_id: &str, entry_id: &str, kind: &str) -> Result<project_entries::Model> {
        ProjectEntries::find_by_id(entry_id.to_string())
            .filter(project_entries::Column::ProjectId.eq(project_id))
            .filter(project_entries::Column::Kind.eq(kind))
            .one(&self.db)
            .await?
            .ok_or_else(|| anyhow!(NotFound(format!("{} {}", kind, entry_id))))
    }

    async fn child(
        &self,
        project_id: &str,
        parent_id: &str,
        name: &str,
    ) -> Result<Option<project_entries::Model>> {
        Ok(ProjectEntries::find()
            .filter(project_entries::Column::ProjectId.eq(project_id))
            .filter(project_entries::Column::ParentId.eq(parent_id))
            .filter(project_entries::Column::Name.eq(name))
            .one(&self.db)
            .await?)
    }

    /// Collects docs and file urls for a compile of `project_id`
    pub async fn snapshot(&self, project_id: &str) -> Result<ProjectSnapshot> {
        let project = self.project(project_id).await?;
        let entries = ProjectEntries::find()
            .filter(project_entries::Column::ProjectId.eq(project_id))
            .all(&self.db)
            .await?;

        let by_id: HashMap<&str, &project_entries::Model> =
            entries.iter().map(|e| (e.id.as_str(), e)).collect();
        let path_of = |entry: &project_entries::Model| -> String {
            let mut parts = vec![entry.name.as_str()];
            let mut parent = entry.parent_id.as_deref();
            while let Some(id) = parent {
                match by_id.get(id) {
                    Some(p) if p.parent_id.is_some() => {
                        parts.push(p.name.as_str());
                        parent = p.parent_id.as_deref();
                    }
                    _ => break,
                }
            }
            parts.reverse();
            parts.join("/")
        };

        let mut snapshot = ProjectSnapshot {
            compiler: project.compiler.clone(),
            ..Default::default()
        };
        for entry in &entries {
            match entry.kind.as_str() {
                KIND_DOC => {
                    let path = path_of(entry);
                    if project.root_doc_id.as_deref() == Some(entry.id.as_str()) {
                        snapshot.root_doc_path = Some(path.clone());
                    }
                    snapshot
                        .docs
                        .push((path, entry.content.clone().unwrap_or_default()));
                }
                KIND_FILE => {
                    let Some(key) = entry.s3_key.as_deref() else {
                        continue;
                    };
                    let url = self.storage.get_download_url(key, FILE_URL_TTL).await?;
                    let modified = entry
                        .updated_at
                        .or(entry.created_at)
                        .map(|t| t.timestamp_millis())
                        .unwrap_or_default();
                    snapshot.files.push((path_of(entry), url, modified));
                }
                _ => {}
            }
        }
        Ok(snapshot)
    }

    /// Folder id for `dir` (`a/b`), creating missing folders on the way
    async fn ensure_folder<C: ConnectionTrait>(
        conn: &C,
        project_id: &str,
        root_folder_id: &str,
        dir: &str,
        folders: &mut HashMap<String, String>,
        now: DateTime<Utc>,
    ) -> Result<String> {
        let mut parent = root_folder_id.to_string();
        let mut path = String::new();
        for name in dir.split('/').filter(|s| !s.is_empty()) {
            if !path.is_empty() {
                path.push('/');
            }
            path.push_str(name);

            if let Some(id) = folders.get(&path) {
                parent = id.clone();
                continue;
            }
            let id = Uuid::new_v4().to_string();
            project_entries::ActiveModel {
                id: Set(id.clone()),
                project_id: Set(project_id.to_string()),
                parent_id: Set(Some(parent.clone())),
                kind: Set(KIND_FOLDER.to_string()),
                name: Set(name.to_string()),
                content: Set(None),
                s3_key: Set(None),
                size: Set(0),
                linked_file_data: Set(None),
                created_at: Set(Some(now)),
                updated_at: Set(Some(now)),
            }
            .insert(conn)
            .await?;
            folders.insert(path.clone(), id.clone());
            parent = id;
        }
        Ok(parent)
    }

    async fn populate<C: ConnectionTrait>(
        &self,
        conn: &C,
        project_id: &str,
        root_folder_id: &str,
        request: CreateProjectRequest,
        uploaded: &mut Vec<String>,
    ) -> Result<Option<String>> {
        let now = Utc::now();
        let mut folders = HashMap::new();
        let mut root_doc_id = None;

        for file in request.files {
            validate_path(&file.path)?;
            let (dir, name) = file.path.rsplit_once('/').unwrap_or(("", file.path.as_str()));
            let parent_id =
                Self::ensure_folder(conn, project_id, root_folder_id, dir, &mut folders, now).await?;
            let id = Uuid::new_v4().to_string();

            let mut content = file.content;
            let mut model = project_entries::ActiveModel {
                id: Set(id.clone()),
                project_id: Set(project_id.to_string()),
                parent_id: Set(Some(parent_id)),
                name: Set(name.to_string()),
                linked_file_data: Set(None),
                created_at: Set(Some(now)),
                updated_at: Set(Some(now)),
                ..Default::default()
            };

            let text = if is_doc_path(name) && file.size <= self.max_doc_length as u64 {
                let mut bytes = Vec::with_capacity(file.size as usize);
                content.read_to_end(&mut bytes).await.context("read doc")?;
                match String::from_utf8(bytes) {
                    Ok(text) => Ok(text),
                    Err(e) => Err(e.into_bytes()),
                }
            } else {
                Err(Vec::new())
            };

            match text {
                Ok(text) => {
                    if request.root_doc_path.as_deref() == Some(file.path.as_str()) {
                        root_doc_id = Some(id.clone());
                    }
                    model.kind = Set(KIND_DOC.to_string());
                    model.size = Set(text.len() as i64);
                    model.content = Set(Some(text));
                    model.s3_key = Set(None);
                }
                Err(read) => {
                    let key = format!("projects/{}/files/{}", project_id, id);
                    // Bytes already consumed while probing for text go first
                    let stream: ByteStream = if read.is_empty() {
                        content
                    } else {
                        Box::new(Cursor::new(read))
                    };
                    let size = self.storage.upload_stream(&key, stream).await?;
                    uploaded.push(key.clone());
                    model.kind = Set(KIND_FILE.to_string());
                    model.size = Set(size as i64);
                    model.content = Set(None);
                    model.s3_key = Set(Some(key));
                }
            }
            model.insert(conn).await?;
        }
        Ok(root_doc_id)
    }
}

#[async_trait]
impl ProjectManager for ProjectStore {
    async fn check_access(&self, project_id: &str, user_id: &str) -> Result<()> {
        let project = self.project(project_id).await?;
        if project.owner_id != user_id {
            return Err(anyhow!(AccessDenied(format!(
                "user {} cannot access project {}",
                user_id, project_id
            ))));
        }
        Ok(())
    }

    async fn find_entity_by_path(&self, project_id: &str, path: &str) -> Result<ProjectEntity> {
        let project = self.project(project_id).await?;
        let mut current = project.root_folder_id;
        let mut found = None;

        for name in path.split('/').filter(|s| !s.is_empty()) {
            let entry = self
                .child(project_id, &current, name)
                .await?
                .ok_or_else(|| anyhow!(NotFound(format!("{} in project {}", path, project_id))))?;
            current = entry.id.clone();
            found = Some(entry);
        }

        let entry = found.ok_or_else(|| anyhow!(NotFound(format!("empty path in {}", project_id))))?;
        Ok(match entry.kind.as_str() {
            KIND_DOC => ProjectEntity::Doc { id: entry.id },
            KIND_FILE => ProjectEntity::File { id: entry.id },
            _ => ProjectEntity::Folder { id: entry.id },
        })
    }
}

#[async_trait]
impl DocumentUpdaterManager for ProjectStore {
    async fn get_doc(&self, project_id: &str, doc_id: &str) -> Result<String> {
        Ok(self
            .entry(project_id, doc_id, KIND_DOC)
            .await?
            .content
            .unwrap_or_default())
    }
}

#[async_trait]
impl FilestoreManager for ProjectStore {
    async fn get_read_stream_for_project_file(
        &self,
        project_id: &str,
        file_id: &str,
    ) -> Result<ByteStream> {
        let entry = self.entry(project_id, file_id, KIND_FILE).await?;
        let key = entry
            .s3_key
            .ok_or_else(|| anyhow!("file {} has no stored object", file_id))?;
        self.storage.get_object_stream(&key).await
    }
}

#[async_trait]
impl FileTreeManager for ProjectStore {
    async fn upload_file(&self, request: UploadFileRequest) -> Result<String> {
        validate_filename(&request.name)?;
        self.entry(&request.project_id, &request.parent_folder_id, KIND_FOLDER)
            .await?;

        let existing = self
            .child(&request.project_id, &request.parent_folder_id, &request.name)
            .await?;
        if existing.as_ref().is_some_and(|e| e.kind == KIND_FOLDER) {
            return Err(anyhow!(ValidationError::new(
                "NAME_TAKEN",
                format!("a folder named '{}' already exists", request.name),
            )));
        }

        let file_id = Uuid::new_v4().to_string();
        let key = format!("projects/{}/files/{}", request.project_id, file_id);
        let size = self.storage.upload_stream(&key, request.content).await?;
        let linked_file_data = request
            .linked_file_data
            .map(serde_json::to_value)
            .transpose()?;
        let now = Utc::now();

        let txn = self.db.begin().await?;
        if let Some(old) = &existing {
            ProjectEntries::delete_by_id(old.id.clone()).exec(&txn).await?;
        }
        project_entries::ActiveModel {
            id: Set(file_id.clone()),
            project_id: Set(request.project_id.clone()),
            parent_id: Set(Some(request.parent_folder_id.clone())),
            kind: Set(KIND_FILE.to_string()),
            name: Set(request.name.clone()),
            content: Set(None),
            s3_key: Set(Some(key)),
            size: Set(size as i64),
            linked_file_data: Set(linked_file_data),
            created_at: Set(Some(now)),
            updated_at: Set(Some(now)),
        }
        .insert(&txn)
        .await?;
        txn.commit().await?;

        if let Some(old_key) = existing.and_then(|e| e.s3_key) {
            if let Err(e) = self.storage.delete_file(&old_key).await {
                tracing::warn!("Failed to delete replaced object {}: {}", old_key, e);
            }
        }

        tracing::info!(
            "Stored file {} '{}' ({} bytes) in project {}",
            file_id,
            request.name,
            size,
            request.project_id
        );
        Ok(file_id)
    }

    async fn get_file(&self, project_id: &str, file_id: &str) -> Result<FileRecord> {
        let entry = self.entry(project_id, file_id, KIND_FILE).await?;
        let linked_file_data: Option<LinkedFileData> = entry
            .linked_file_data
            .map(serde_json::from_value::<LinkedFileData>)
            .transpose()
            .context("decode linked file data")?;
        Ok(FileRecord {
            id: entry.id,
            name: entry.name,
            parent_folder_id: entry.parent_id.unwrap_or_default(),
            linked_file_data,
        })
    }
}

#[async_trait]
impl ProjectUploadManager for ProjectStore {
    async fn create_project(&self, request: CreateProjectRequest) -> Result<String> {
        let project_id = Uuid::new_v4().to_string();
        let root_folder_id = Uuid::new_v4().to_string();
        let now = Utc::now();

        let txn = self.db.begin().await?;
        projects::ActiveModel {
            id: Set(project_id.clone()),
            owner_id: Set(request.owner_id.clone()),
            name: Set(request.name.clone()),
            compiler: Set(request.compiler.clone()),
            root_folder_id: Set(root_folder_id.clone()),
            root_doc_id: Set(None),
            created_at: Set(Some(now)),
        }
        .insert(&txn)
        .await?;
        project_entries::ActiveModel {
            id: Set(root_folder_id.clone()),
            project_id: Set(project_id.clone()),
            parent_id: Set(None),
            kind: Set(KIND_FOLDER.to_string()),
            name: Set("rootFolder".to_string()),
            content: Set(None),
            s3_key: Set(None),
            size: Set(0),
            linked_file_data: Set(None),
            created_at: Set(Some(now)),
            updated_at: Set(Some(now)),
        }
        .insert(&txn)
        .await?;

        let mut uploaded = Vec::new();
        let root_doc_id = match self
            .populate(&txn, &project_id, &root_folder_id, request, &mut uploaded)
            .await
        {
            Ok(id) => id,
            Err(e) => {
                for key in uploaded {
                    if let Err(e) = self.storage.delete_file(&key).await {
                        tracing::warn!("Failed to delete orphaned object {}: {}", key, e);
                    }
                }
                return Err(e);
            }
        };

        if root_doc_id.is_some() {
            projects::ActiveModel {
                id: Set(project_id.clone()),
                root_doc_id: Set(root_doc_id),
                ..Default::default()
            }
            .update(&txn)
            .await?;
        }
        txn.commit().await?;

        Ok(project_id)
    }
}
