use crate::services::managers::{CompileManager, CompileOutput, OutputFile};
use crate::services::project_store::ProjectStore;
use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use reqwest::Client;
use reqwest::header::SET_COOKIE;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use url::Url;

const COMPILE_TIMEOUT_SECS: u64 = 240;
const SERVER_ID_COOKIE: &str = "clsiserverid";

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CompileResource {
    path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    modified: Option<i64>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CompileOptions {
    compiler: String,
    timeout: u64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CompileBody {
    options: CompileOptions,
    root_resource_path: String,
    resources: Vec<CompileResource>,
}

#[derive(Debug, Serialize)]
struct CompileRequest {
    compile: CompileBody,
}

#[derive(Debug, Deserialize)]
struct CompileResponse {
    compile: CompileResult,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CompileResult {
    status: String,
    #[serde(default)]
    output_files: Vec<ClsiOutputFile>,
}

#[derive(Debug, Deserialize)]
struct ClsiOutputFile {
    path: String,
    #[serde(rename = "type", default)]
    file_type: String,
    build: String,
}

fn server_id(response: &reqwest::Response) -> Option<String> {
    response
        .headers()
        .get_all(SET_COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .filter_map(|cookie| cookie.split(';').next())
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(name, _)| *name == SERVER_ID_COOKIE)
        .map(|(_, value)| value.to_string())
}

/// Runs compiles on a CLSI instance using the stored project contents
pub struct ClsiCompileManager {
    client: Client,
    clsi_url: Url,
    projects: Arc<ProjectStore>,
}

impl ClsiCompileManager {
    pub fn new(clsi_url: Url, projects: Arc<ProjectStore>) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(COMPILE_TIMEOUT_SECS + 30))
            .build()?;
        Ok(Self {
            client,
            clsi_url,
            projects,
        })
    }

    fn compile_url(&self, project_id: &str, user_id: &str) -> Result<Url> {
        let mut url = self.clsi_url.clone();
        url.path_segments_mut()
            .map_err(|_| anyhow!("clsi url cannot be a base"))?
            .pop_if_empty()
            .extend(["project", project_id, "user", user_id, "compile"]);
        Ok(url)
    }
}

#[async_trait]
impl CompileManager for ClsiCompileManager {
    async fn compile_headless(&self, project_id: &str, user_id: &str) -> Result<CompileOutput> {
        let snapshot = self.projects.snapshot(project_id).await?;
        let root_resource_path = snapshot
            .root_doc_path
            .clone()
            .unwrap_or_else(|| "main.tex".to_string());

        let mut resources: Vec<CompileResource> = snapshot
            .docs
            .into_iter()
            .map(|(path, content)| CompileResource {
                path,
                content: Some(content),
                url: None,
                modified: None,
            })
            .collect();
        resources.extend(snapshot.files.into_iter().map(|(path, url, modified)| {
            CompileResource {
                path,
                content: None,
                url: Some(url),
                modified: Some(modified),
            }
        }));

        let body = CompileRequest {
            compile: CompileBody {
                options: CompileOptions {
                    compiler: snapshot.compiler,
                    timeout: COMPILE_TIMEOUT_SECS,
                },
                root_resource_path,
                resources,
            },
        };

        tracing::info!("⚙️ Compiling project {} for user {}", project_id, user_id);

        let response = self
            .client
            .post(self.compile_url(project_id, user_id)?)
            .json(&body)
            .send()
            .await
            .context("send compile request")?
            .error_for_status()
            .context("compile request rejected")?;
        let clsi_server_id = server_id(&response);
        let result: CompileResponse = response.json().await.context("decode compile response")?;

        Ok(CompileOutput {
            status: result.compile.status,
            clsi_server_id,
            output_files: result
                .compile
                .output_files
                .into_iter()
                .map(|f| OutputFile {
                    path: f.path,
                    build_id: f.build,
                    file_type: f.file_type,
                })
                .collect(),
        })
    }
}
