use super::types::OutputFileUnavailable;
use crate::services::downloader::{BufferedDownloader, BufferedFile};
use crate::services::fetcher::FetchError;
use crate::services::managers::CompileManager;
use crate::utils::auth::create_output_token;
use anyhow::{Result, anyhow};
use url::Url;

/// Location of one output file of a finished build
pub(super) struct OutputFileLocation<'a> {
    pub source_project_id: &'a str,
    pub user_id: &'a str,
    pub build_id: &'a str,
    pub output_path: &'a str,
    pub clsi_server_id: Option<&'a str>,
}

/// `{domain}/project/{p}/user/{u}/build/{b}/output/{path}?clsiserverid=..&token=..`
pub(super) fn output_file_url(
    compile_domain: &Url,
    location: &OutputFileLocation<'_>,
    token: &str,
) -> Result<Url> {
    let mut url = compile_domain.clone();
    url.set_query(None);
    url.path_segments_mut()
        .map_err(|_| anyhow!("compile domain cannot be a base url"))?
        .pop_if_empty()
        .extend([
            "project",
            location.source_project_id,
            "user",
            location.user_id,
            "build",
            location.build_id,
            "output",
        ])
        .extend(location.output_path.split('/'));

    {
        let mut pairs = url.query_pairs_mut();
        if let Some(server) = location.clsi_server_id {
            pairs.append_pair("clsiserverid", server);
        }
        pairs.append_pair("token", token);
    }
    Ok(url)
}

pub(super) async fn import(
    downloader: &BufferedDownloader,
    compile_domain: &Url,
    token_secret: &str,
    location: OutputFileLocation<'_>,
) -> Result<BufferedFile> {
    let token = create_output_token(location.user_id, location.source_project_id, token_secret)?;
    let url = output_file_url(compile_domain, &location, &token)?;

    tracing::info!(
        "📄 Importing output file {} of build {} from project {}",
        location.output_path,
        location.build_id,
        location.source_project_id
    );

    downloader.download_file(&url).await.map_err(|e| {
        match e.downcast_ref::<FetchError>() {
            Some(FetchError::UnprocessableEntity { upstream_status }) => {
                tracing::debug!("output file fetch rejected upstream: {}", upstream_status);
                anyhow!(OutputFileUnavailable)
            }
            _ => e.context("download output file"),
        }
    })
}

/// Compiles the source project and finds the build holding `output_path`
pub(super) async fn latest_build(
    compiles: &dyn CompileManager,
    source_project_id: &str,
    user_id: &str,
    output_path: &str,
) -> Result<(String, Option<String>)> {
    let output = compiles.compile_headless(source_project_id, user_id).await?;
    let file = output
        .output_files
        .iter()
        .find(|f| f.path == output_path)
        .ok_or_else(|| {
            tracing::warn!(
                "compile of {} ({}) produced no {}",
                source_project_id,
                output.status,
                output_path
            );
            anyhow!(OutputFileUnavailable)
        })?;
    Ok((file.build_id.clone(), output.clsi_server_id.clone()))
}
