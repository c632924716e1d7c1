use std::path::PathBuf;
use thiserror::Error;

/// errors that abort a merge job
#[derive(Debug, Error)]
pub enum MergeError {
    #[error("unsupported page size \"{0}\" (use A0-A4, or set both --width and --height)")]
    UnsupportedPageSize(String),

    #[error("cannot decode image {}: {reason}", path.display())]
    ImageDecode { path: PathBuf, reason: String },

    #[error("cannot access directory {}", path.display())]
    DirectoryAccess {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to write {}: {reason}", path.display())]
    Write { path: PathBuf, reason: String },
}

impl MergeError {
    pub fn decode(path: impl Into<PathBuf>, reason: impl ToString) -> Self {
        MergeError::ImageDecode {
            path: path.into(),
            reason: reason.to_string(),
        }
    }

    pub fn write(path: impl Into<PathBuf>, reason: impl ToString) -> Self {
        MergeError::Write {
            path: path.into(),
            reason: reason.to_string(),
        }
    }
}

pub type Result<T, E = MergeError> = std::result::Result<T, E>;
