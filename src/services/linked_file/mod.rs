//! Files imported from a URL, another project's file tree or another
//! project's compile output, and refreshed from the same source later.

mod output_file;
mod project_file;
mod remote;
pub mod types;

pub use types::{
    CreateLinkedFileRequest, LinkedFileData, LinkedFileParams, LinkedFileSource,
    OutputFileUnavailable, Provider, RefreshLinkedFileRequest,
};

use crate::config::ImportConfig;
use crate::services::downloader::{BufferedDownloader, BufferedFile};
use crate::services::managers::{Managers, UploadFileRequest};
use crate::utils::validation::ValidationError;
use anyhow::{Context, Result, anyhow};
use output_file::OutputFileLocation;
use url::Url;

pub struct LinkedFileService {
    managers: Managers,
    downloader: BufferedDownloader,
    compile_domain: Url,
    token_secret: String,
}

impl LinkedFileService {
    pub fn new(managers: Managers, downloader: BufferedDownloader, config: &ImportConfig) -> Self {
        Self {
            managers,
            downloader,
            compile_domain: config.compile_domain.clone(),
            token_secret: config.jwt_secret.clone(),
        }
    }

    /// Imports a new linked file and returns its file id
    pub async fn create_linked_file(&self, request: CreateLinkedFileRequest) -> Result<String> {
        let source = request.validate()?;
        self.managers
            .projects
            .check_access(&request.project_id, &request.user_id)
            .await?;

        tracing::info!(
            "🔗 Creating {} linked file '{}' in project {}",
            source.provider(),
            request.name,
            request.project_id
        );

        self.import_and_commit(
            &request.project_id,
            &request.user_id,
            &request.parent_folder_id,
            &request.name,
            &source,
        )
        .await
    }

    /// Re-imports a linked file from its recorded source, replacing it in
    /// place. Returns the id of the new file.
    pub async fn refresh_linked_file(&self, request: RefreshLinkedFileRequest) -> Result<String> {
        self.managers
            .projects
            .check_access(&request.project_id, &request.user_id)
            .await?;

        let record = self
            .managers
            .file_tree
            .get_file(&request.project_id, &request.file_id)
            .await?;
        let data = record.linked_file_data.ok_or_else(|| {
            anyhow!(ValidationError::new(
                "NOT_LINKED",
                format!("file {} is not a linked file", request.file_id),
            ))
        })?;

        let mut source = LinkedFileSource::from_data(&data)?;
        if let LinkedFileSource::ProjectOutputFile {
            source_project_id,
            source_output_file_path,
            build_id,
            clsi_server_id,
        } = &mut source
        {
            self.managers
                .projects
                .check_access(source_project_id, &request.user_id)
                .await?;
            let (latest, server) = output_file::latest_build(
                self.managers.compiles.as_ref(),
                source_project_id,
                &request.user_id,
                source_output_file_path,
            )
            .await?;
            *build_id = Some(latest);
            *clsi_server_id = server;
        }

        tracing::info!(
            "🔄 Refreshing {} linked file {} in project {}",
            source.provider(),
            request.file_id,
            request.project_id
        );

        self.import_and_commit(
            &request.project_id,
            &request.user_id,
            &record.parent_folder_id,
            &record.name,
            &source,
        )
        .await
    }

    async fn import_and_commit(
        &self,
        project_id: &str,
        user_id: &str,
        parent_folder_id: &str,
        name: &str,
        source: &LinkedFileSource,
    ) -> Result<String> {
        let mut buffered = self.import(user_id, source).await?;

        let result = self
            .commit(project_id, user_id, parent_folder_id, name, source, &mut buffered)
            .await;

        if let Err(e) = buffered.cleanup() {
            tracing::warn!("Failed to remove import buffer: {}", e);
        }
        result
    }

    async fn import(&self, user_id: &str, source: &LinkedFileSource) -> Result<BufferedFile> {
        match source {
            LinkedFileSource::Url { url } => remote::import(&self.downloader, url).await,
            LinkedFileSource::ProjectFile {
                source_project_id,
                source_entity_path,
            } => {
                self.managers
                    .projects
                    .check_access(source_project_id, user_id)
                    .await?;
                project_file::import(
                    &self.managers,
                    &self.downloader,
                    source_project_id,
                    source_entity_path,
                )
                .await
            }
            LinkedFileSource::ProjectOutputFile {
                source_project_id,
                source_output_file_path,
                build_id,
                clsi_server_id,
            } => {
                self.managers
                    .projects
                    .check_access(source_project_id, user_id)
                    .await?;
                let build_id = build_id
                    .as_deref()
                    .ok_or_else(|| anyhow!(ValidationError::missing("build_id")))?;
                output_file::import(
                    &self.downloader,
                    &self.compile_domain,
                    &self.token_secret,
                    OutputFileLocation {
                        source_project_id,
                        user_id,
                        build_id,
                        output_path: source_output_file_path,
                        clsi_server_id: clsi_server_id.as_deref(),
                    },
                )
                .await
            }
        }
    }

    async fn commit(
        &self,
        project_id: &str,
        user_id: &str,
        parent_folder_id: &str,
        name: &str,
        source: &LinkedFileSource,
        buffered: &mut BufferedFile,
    ) -> Result<String> {
        let content = buffered.open().await.context("open import buffer")?;
        let file_id = self
            .managers
            .file_tree
            .upload_file(UploadFileRequest {
                project_id: project_id.to_string(),
                user_id: user_id.to_string(),
                parent_folder_id: parent_folder_id.to_string(),
                name: name.to_string(),
                size: buffered.size,
                content: Box::new(content),
                linked_file_data: Some(source.provenance()),
            })
            .await
            .context("upload file")?;

        tracing::info!("✅ Linked file {} stored in project {}", file_id, project_id);
        Ok(file_id)
    }
}
