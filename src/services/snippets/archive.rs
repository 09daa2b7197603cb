use super::preamble::{DOCUMENTCLASS_SCAN_BYTES, has_documentclass};
use crate::utils::validation::{ValidationError, validate_path};
use anyhow::{Context, Result, anyhow};
use std::io::{Read, Seek};
use std::path::{Component, Path};
use tempfile::NamedTempFile;
use zip::ZipArchive;

#[derive(Debug, Clone)]
pub struct ZipLimits {
    pub max_entries: usize,
    pub max_total_size: u64,
}

/// One archive entry unpacked into its own temp file
#[derive(Debug)]
pub struct ExtractedFile {
    pub path: String,
    pub size: u64,
    pub file: NamedTempFile,
}

#[derive(Debug)]
pub struct ExtractedProject {
    pub files: Vec<ExtractedFile>,
    pub root_doc_path: Option<String>,
}

fn is_junk(path: &str) -> bool {
    path.starts_with("__MACOSX/") || path.rsplit('/').next() == Some(".DS_Store")
}

/// Entry name as a `/` separated relative path, `None` if it escapes
fn entry_path(name: &Path) -> Option<String> {
    let mut parts = Vec::new();
    for component in name.components() {
        match component {
            Component::Normal(part) => parts.push(part.to_str()?.to_string()),
            Component::CurDir => {}
            _ => return None,
        }
    }
    (!parts.is_empty()).then(|| parts.join("/"))
}

/// Drops a folder every entry lives under, as produced by zipping a directory
fn strip_common_folder(paths: &mut [(usize, String)]) {
    let Some((_, first)) = paths.first() else {
        return;
    };
    let Some((folder, _)) = first.split_once('/') else {
        return;
    };
    let prefix = format!("{}/", folder);
    if paths.iter().all(|(_, p)| p.starts_with(&prefix)) {
        for (_, p) in paths.iter_mut() {
            *p = p[prefix.len()..].to_string();
        }
    }
}

fn too_large(limits: &ZipLimits) -> anyhow::Error {
    anyhow!(ValidationError::new(
        "ZIP_TOO_LARGE",
        format!("archive expands to more than {} bytes", limits.max_total_size),
    ))
}

/// Unpacks a project archive into temp files under `tmp_dir`.
///
/// Blocking; run it on the blocking pool.
pub fn extract_project<R: Read + Seek>(
    reader: R,
    tmp_dir: &Path,
    limits: &ZipLimits,
) -> Result<ExtractedProject> {
    let mut archive = ZipArchive::new(reader).map_err(|e| {
        anyhow!(ValidationError::new(
            "INVALID_ZIP",
            format!("failed to parse zip: {}", e),
        ))
    })?;

    if archive.len() > limits.max_entries {
        return Err(anyhow!(ValidationError::new(
            "ZIP_TOO_MANY_ENTRIES",
            format!("archive has more than {} entries", limits.max_entries),
        )));
    }

    let mut paths = Vec::new();
    for i in 0..archive.len() {
        let entry = archive.by_index(i).context("read zip entry")?;
        if entry.is_dir() {
            continue;
        }
        let path = entry
            .enclosed_name()
            .and_then(entry_path)
            .ok_or_else(|| {
                anyhow!(ValidationError::new(
                    "INVALID_PATH",
                    format!("zip entry '{}' escapes the project", entry.name()),
                ))
            })?;
        if !is_junk(&path) {
            paths.push((i, path));
        }
    }
    strip_common_folder(&mut paths);

    let mut files = Vec::with_capacity(paths.len());
    let mut total: u64 = 0;
    let mut root_candidate = None;

    for (i, path) in paths {
        validate_path(&path)?;
        if entry_size_hint(&mut archive, i)? > limits.max_total_size - total {
            return Err(too_large(limits));
        }

        let mut entry = archive.by_index(i).context("read zip entry")?;
        let mut file = tempfile::Builder::new()
            .prefix("zip-entry-")
            .tempfile_in(tmp_dir)
            .context("create temp file")?;

        let remaining = limits.max_total_size - total;
        let size = std::io::copy(&mut (&mut entry).take(remaining + 1), file.as_file_mut())
            .context("extract zip entry")?;
        if size > remaining {
            return Err(too_large(limits));
        }
        total += size;

        if root_candidate.is_none() && path.ends_with(".tex") && declares_class(&file)? {
            root_candidate = Some(path.clone());
        }
        files.push(ExtractedFile { path, size, file });
    }

    let root_doc_path = files
        .iter()
        .find(|f| f.path == "main.tex")
        .map(|f| f.path.clone())
        .or(root_candidate);

    tracing::debug!("extracted {} files ({} bytes) from zip", files.len(), total);
    Ok(ExtractedProject {
        files,
        root_doc_path,
    })
}

fn entry_size_hint<R: Read + Seek>(archive: &mut ZipArchive<R>, i: usize) -> Result<u64> {
    Ok(archive.by_index(i).context("read zip entry")?.size())
}

fn declares_class(file: &NamedTempFile) -> Result<bool> {
    let mut head = Vec::with_capacity(DOCUMENTCLASS_SCAN_BYTES);
    file.reopen()
        .context("reopen zip entry")?
        .take(DOCUMENTCLASS_SCAN_BYTES as u64)
        .read_to_end(&mut head)
        .context("read zip entry")?;
    Ok(has_documentclass(&String::from_utf8_lossy(&head)))
}
