use crate::services::downloader::{BufferedDownloader, BufferedFile};
use crate::services::managers::{Managers, ProjectEntity};
use crate::utils::validation::ValidationError;
use anyhow::{Context, Result, anyhow};

/// Copies a doc or binary file out of another project.
///
/// Docs are read from the document updater so unsaved edits are included.
pub(super) async fn import(
    managers: &Managers,
    downloader: &BufferedDownloader,
    source_project_id: &str,
    source_entity_path: &str,
) -> Result<BufferedFile> {
    let entity = managers
        .projects
        .find_entity_by_path(source_project_id, source_entity_path)
        .await
        .context("find source entity")?;

    let name = source_entity_path
        .rsplit('/')
        .next()
        .unwrap_or(source_entity_path)
        .to_string();

    match entity {
        ProjectEntity::Doc { id } => {
            let content = managers
                .docs
                .get_doc(source_project_id, &id)
                .await
                .context("get doc")?;
            downloader.buffer_bytes(content.as_bytes(), name).await
        }
        ProjectEntity::File { id } => {
            let stream = managers
                .filestore
                .get_read_stream_for_project_file(source_project_id, &id)
                .await
                .context("open file stream")?;
            downloader.buffer_reader(stream, name).await
        }
        ProjectEntity::Folder { .. } => Err(anyhow!(ValidationError::new(
            "INVALID_SOURCE",
            format!("'{}' is a folder", source_entity_path),
        ))),
    }
}
