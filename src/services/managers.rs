//! Narrow interfaces to the services that own projects, documents, stored
//! files and compiles. The import pipeline only talks to these traits.

use crate::services::linked_file::LinkedFileData;
use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::io::AsyncRead;

pub type ByteStream = Box<dyn AsyncRead + Unpin + Send>;

#[derive(Error, Debug)]
#[error("Forbidden: {0}")]
pub struct AccessDenied(pub String);

#[derive(Error, Debug)]
#[error("Not Found: {0}")]
pub struct NotFound(pub String);

/// An element of a project's file tree addressed by path
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProjectEntity {
    Doc { id: String },
    File { id: String },
    Folder { id: String },
}

/// A stored binary file as the file tree knows it
#[derive(Debug, Clone)]
pub struct FileRecord {
    pub id: String,
    pub name: String,
    pub parent_folder_id: String,
    pub linked_file_data: Option<LinkedFileData>,
}

/// Content to place into a project's file tree
pub struct UploadFileRequest {
    pub project_id: String,
    pub user_id: String,
    pub parent_folder_id: String,
    pub name: String,
    pub size: u64,
    pub content: ByteStream,
    pub linked_file_data: Option<LinkedFileData>,
}

/// One file of a project being created
pub struct NewProjectFile {
    pub path: String,
    pub size: u64,
    pub content: ByteStream,
}

pub struct CreateProjectRequest {
    pub owner_id: String,
    pub name: String,
    pub compiler: String,
    pub root_doc_path: Option<String>,
    pub files: Vec<NewProjectFile>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputFile {
    pub path: String,
    pub build_id: String,
    #[serde(rename = "type")]
    pub file_type: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompileOutput {
    pub status: String,
    pub clsi_server_id: Option<String>,
    pub output_files: Vec<OutputFile>,
}

#[async_trait]
pub trait ProjectManager: Send + Sync {
    /// Fails with [`AccessDenied`] unless `user_id` may use the project
    async fn check_access(&self, project_id: &str, user_id: &str) -> Result<()>;

    /// Resolves `path` (relative to the root folder) to a doc or file
    async fn find_entity_by_path(&self, project_id: &str, path: &str) -> Result<ProjectEntity>;
}

#[async_trait]
pub trait DocumentUpdaterManager: Send + Sync {
    /// Current snapshot of a live document
    async fn get_doc(&self, project_id: &str, doc_id: &str) -> Result<String>;
}

#[async_trait]
pub trait FilestoreManager: Send + Sync {
    async fn get_read_stream_for_project_file(
        &self,
        project_id: &str,
        file_id: &str,
    ) -> Result<ByteStream>;
}

#[async_trait]
pub trait FileTreeManager: Send + Sync {
    /// Commits `request.content` under the parent folder, replacing an
    /// existing entry of the same name. Returns the new file id.
    async fn upload_file(&self, request: UploadFileRequest) -> Result<String>;

    async fn get_file(&self, project_id: &str, file_id: &str) -> Result<FileRecord>;
}

#[async_trait]
pub trait CompileManager: Send + Sync {
    /// Compiles without an editor session and reports the output files
    async fn compile_headless(&self, project_id: &str, user_id: &str) -> Result<CompileOutput>;
}

#[async_trait]
pub trait ProjectUploadManager: Send + Sync {
    /// Creates a project from `request.files` in one step. Returns its id.
    async fn create_project(&self, request: CreateProjectRequest) -> Result<String>;
}

/// Handles to every collaborator the import services talk to
#[derive(Clone)]
pub struct Managers {
    pub projects: Arc<dyn ProjectManager>,
    pub docs: Arc<dyn DocumentUpdaterManager>,
    pub filestore: Arc<dyn FilestoreManager>,
    pub file_tree: Arc<dyn FileTreeManager>,
    pub compiles: Arc<dyn CompileManager>,
    pub uploads: Arc<dyn ProjectUploadManager>,
}
