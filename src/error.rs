use std::path::{Path, PathBuf};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("I/O failure on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Pattern not found")]
    PatternNotFound,

    #[error("Unexpected bytes at offset {offset:#x}: expected [{expected}], found [{found}]")]
    UnexpectedBytesAtOffset {
        offset: u64,
        expected: String,
        found: String,
    },

    #[error("Verification failed at offset {offset:#x}")]
    VerificationFailed { offset: u64 },

    #[error("Failed to create backup of {}: {reason}", path.display())]
    BackupCreationFailed { path: PathBuf, reason: String },

    #[error("Replacement '{replacement}' does not fit over '{original}' in {encoding} encoding")]
    ReplacementTooLong {
        encoding: &'static str,
        original: String,
        replacement: String,
    },

    #[error("Invalid hex: {0}")]
    InvalidHex(String),

    #[error("Invalid pattern: {0}")]
    InvalidPattern(String),

    #[error("Invalid domain: {0}")]
    InvalidDomain(String),

    #[error("Archive error: {0}")]
    Archive(#[from] zip::result::ZipError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub fn io(path: impl AsRef<Path>, source: std::io::Error) -> Self {
        Error::Io {
            path: path.as_ref().to_path_buf(),
            source,
        }
    }

    /// Check if this error is a "file not found" error
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::Io { source, .. } if source.kind() == std::io::ErrorKind::NotFound)
    }
}
