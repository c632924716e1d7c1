//! Directory listing for single and batch jobs.

use std::path::{Path, PathBuf};

use crate::error::{MergeError, Result};

pub const IMAGE_EXTENSIONS: &[&str] = &["png", "jpeg", "jpg"];

/// one output document built from the images of one directory
#[derive(Debug, Clone, PartialEq)]
pub struct MergeJob {
    pub source: PathBuf,
    pub images: Vec<PathBuf>,
    pub output: PathBuf,
}

impl MergeJob {
    /// display name used as log prefix and document title
    pub fn name(&self) -> String {
        self.source
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.source.display().to_string())
    }
}

pub fn is_supported_image(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|ext| IMAGE_EXTENSIONS.contains(&ext.to_lowercase().as_str()))
}

/// `<dir>.pdf` next to `dir`
pub fn output_path(dir: &Path) -> PathBuf {
    let mut name = dir.file_name().unwrap_or(dir.as_os_str()).to_os_string();
    name.push(".pdf");
    dir.with_file_name(name)
}

/// list direct children of `dir` sorted by file name
fn sorted_entries(dir: &Path) -> Result<Vec<PathBuf>> {
    let access = |source| MergeError::DirectoryAccess {
        path: dir.to_path_buf(),
        source,
    };
    let mut entries = std::fs::read_dir(dir)
        .map_err(access)?
        .map(|e| e.map(|e| e.path()))
        .collect::<std::io::Result<Vec<_>>>()
        .map_err(access)?;
    entries.sort_by(|a, b| a.file_name().cmp(&b.file_name()));
    Ok(entries)
}

/// Build the job for a single directory.
///
/// Only direct children with a supported extension are kept. Sub-directories
/// and other files are skipped with a diagnostic.
pub fn collect_job(dir: &Path) -> Result<MergeJob> {
    let source = std::fs::canonicalize(dir).map_err(|source| MergeError::DirectoryAccess {
        path: dir.to_path_buf(),
        source,
    })?;
    let entries = sorted_entries(&source)?;

    let mut images = Vec::with_capacity(entries.len());
    for path in entries {
        if path.is_dir() {
            tracing::info!("skipping sub-directory {}", path.display());
        } else if !is_supported_image(&path) {
            tracing::info!("skipping unsupported file {}", path.display());
        } else {
            images.push(path);
        }
    }

    Ok(MergeJob {
        output: output_path(&source),
        source,
        images,
    })
}

/// immediate sub-directories of `dir`, sorted by name
pub fn batch_dirs(dir: &Path) -> Result<Vec<PathBuf>> {
    let dirs: Vec<PathBuf> = sorted_entries(dir)?
        .into_iter()
        .filter(|p| p.is_dir())
        .collect();
    tracing::debug!("{} sub-directories in {}", dirs.len(), dir.display());
    Ok(dirs)
}
