use crate::utils::validation::{ValidationError, validate_filename, validate_http_url, validate_path};
use anyhow::{Result, anyhow};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use url::Url;
use utoipa::ToSchema;

#[derive(Error, Debug)]
#[error("output file is not available for importing")]
pub struct OutputFileUnavailable;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum Provider {
    Url,
    ProjectFile,
    ProjectOutputFile,
}

impl Provider {
    pub fn as_str(&self) -> &'static str {
        match self {
            Provider::Url => "url",
            Provider::ProjectFile => "project_file",
            Provider::ProjectOutputFile => "project_output_file",
        }
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Provider {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "url" => Ok(Provider::Url),
            "project_file" => Ok(Provider::ProjectFile),
            "project_output_file" => Ok(Provider::ProjectOutputFile),
            "" => Err(anyhow!(ValidationError::missing("provider"))),
            other => Err(anyhow!(ValidationError::new(
                "INVALID_PROVIDER",
                format!("unknown provider '{}'", other),
            ))),
        }
    }
}

/// Provenance stored on a linked file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct LinkedFileData {
    pub provider: Provider,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_project_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_entity_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_output_file_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub build_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub clsi_server_id: Option<String>,
}

/// Provider coordinates of a create request, all optional on the wire
#[derive(Debug, Clone, Default, Deserialize, ToSchema)]
pub struct LinkedFileParams {
    pub url: Option<String>,
    pub source_project_id: Option<String>,
    pub source_entity_path: Option<String>,
    pub source_output_file_path: Option<String>,
    pub build_id: Option<String>,
    pub clsi_server_id: Option<String>,
}

/// Validated source of a linked file
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkedFileSource {
    Url {
        url: Url,
    },
    ProjectFile {
        source_project_id: String,
        source_entity_path: String,
    },
    ProjectOutputFile {
        source_project_id: String,
        source_output_file_path: String,
        build_id: Option<String>,
        clsi_server_id: Option<String>,
    },
}

fn required(value: &Option<String>, field: &str) -> Result<String> {
    match value.as_deref().map(str::trim) {
        Some(v) if !v.is_empty() => Ok(v.to_string()),
        _ => Err(anyhow!(ValidationError::missing(field))),
    }
}

fn non_empty(value: &Option<String>) -> Option<String> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

/// Build ids are two dash-separated lowercase hex groups
pub fn validate_build_id(build_id: &str) -> Result<()> {
    let valid = match build_id.split_once('-') {
        Some((a, b)) => {
            let hex = |s: &str| !s.is_empty() && s.chars().all(|c| matches!(c, '0'..='9' | 'a'..='f'));
            hex(a) && hex(b)
        }
        None => false,
    };
    if valid {
        Ok(())
    } else {
        Err(anyhow!(ValidationError::new(
            "INVALID_BUILD_ID",
            format!("'{}' is not a build id", build_id),
        )))
    }
}

fn validate_entity_path(path: &str) -> Result<String> {
    let path = path.trim_start_matches('/');
    validate_path(path)?;
    Ok(path.to_string())
}

fn validate_output_path(path: &str) -> Result<String> {
    validate_path(path)?;
    Ok(path.to_string())
}

impl LinkedFileSource {
    /// Validates the coordinates `provider` needs. With `require_build`
    /// an output file must name the build it comes from.
    pub fn from_params(
        provider: Provider,
        params: &LinkedFileParams,
        require_build: bool,
    ) -> Result<Self> {
        match provider {
            Provider::Url => {
                let raw = required(&params.url, "url")?;
                Ok(LinkedFileSource::Url {
                    url: validate_http_url(&raw)?,
                })
            }
            Provider::ProjectFile => Ok(LinkedFileSource::ProjectFile {
                source_project_id: required(&params.source_project_id, "source_project_id")?,
                source_entity_path: validate_entity_path(&required(
                    &params.source_entity_path,
                    "source_entity_path",
                )?)?,
            }),
            Provider::ProjectOutputFile => {
                let source_project_id = required(&params.source_project_id, "source_project_id")?;
                let source_output_file_path = validate_output_path(&required(
                    &params.source_output_file_path,
                    "source_output_file_path",
                )?)?;
                let build_id = if require_build {
                    let build_id = required(&params.build_id, "build_id")?;
                    validate_build_id(&build_id)?;
                    Some(build_id)
                } else {
                    None
                };
                Ok(LinkedFileSource::ProjectOutputFile {
                    source_project_id,
                    source_output_file_path,
                    build_id,
                    clsi_server_id: non_empty(&params.clsi_server_id),
                })
            }
        }
    }

    /// Re-reads the source from stored provenance for a refresh
    pub fn from_data(data: &LinkedFileData) -> Result<Self> {
        let params = LinkedFileParams {
            url: data.url.clone(),
            source_project_id: data.source_project_id.clone(),
            source_entity_path: data.source_entity_path.clone(),
            source_output_file_path: data.source_output_file_path.clone(),
            build_id: None,
            clsi_server_id: None,
        };
        Self::from_params(data.provider, &params, false)
    }

    pub fn provider(&self) -> Provider {
        match self {
            LinkedFileSource::Url { .. } => Provider::Url,
            LinkedFileSource::ProjectFile { .. } => Provider::ProjectFile,
            LinkedFileSource::ProjectOutputFile { .. } => Provider::ProjectOutputFile,
        }
    }

    /// Provenance with exactly this provider's coordinates populated
    pub fn provenance(&self) -> LinkedFileData {
        let mut data = LinkedFileData {
            provider: self.provider(),
            url: None,
            source_project_id: None,
            source_entity_path: None,
            source_output_file_path: None,
            build_id: None,
            clsi_server_id: None,
        };
        match self {
            LinkedFileSource::Url { url } => data.url = Some(url.to_string()),
            LinkedFileSource::ProjectFile {
                source_project_id,
                source_entity_path,
            } => {
                data.source_project_id = Some(source_project_id.clone());
                data.source_entity_path = Some(source_entity_path.clone());
            }
            LinkedFileSource::ProjectOutputFile {
                source_project_id,
                source_output_file_path,
                build_id,
                clsi_server_id,
            } => {
                data.source_project_id = Some(source_project_id.clone());
                data.source_output_file_path = Some(source_output_file_path.clone());
                data.build_id = build_id.clone();
                data.clsi_server_id = clsi_server_id.clone();
            }
        }
        data
    }
}

/// Request to create a linked file in `project_id`
#[derive(Debug, Clone)]
pub struct CreateLinkedFileRequest {
    pub project_id: String,
    pub user_id: String,
    pub parent_folder_id: String,
    pub name: String,
    pub provider: String,
    pub data: LinkedFileParams,
}

impl CreateLinkedFileRequest {
    pub fn validate(&self) -> Result<LinkedFileSource> {
        if self.name.trim().is_empty() {
            return Err(anyhow!(ValidationError::missing("name")));
        }
        validate_filename(&self.name)?;
        if self.parent_folder_id.trim().is_empty() {
            return Err(anyhow!(ValidationError::missing("parent_folder_id")));
        }
        let provider: Provider = self.provider.trim().parse()?;
        LinkedFileSource::from_params(provider, &self.data, true)
    }
}

/// Request to refresh an existing linked file
#[derive(Debug, Clone)]
pub struct RefreshLinkedFileRequest {
    pub project_id: String,
    pub user_id: String,
    pub file_id: String,
}
