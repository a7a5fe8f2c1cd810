use std::path::{Path, PathBuf};

use thiserror::Error;

pub type StrataResult<T> = Result<T, StrataError>;

#[derive(Debug, Error)]
pub enum StrataError {
    #[error("config error: {0}")]
    Config(String),

    #[error("key not found: {0}")]
    KeyNotFound(String),

    #[error("key recovery failed: {0}")]
    KeyRecovery(String),

    #[error("manifest missing: {}", .0.display())]
    MissingManifest(PathBuf),

    #[error("format error: {0}")]
    Format(String),

    #[error("integrity check failed for {} at chunk {chunk}", .path.display())]
    Integrity { path: PathBuf, chunk: usize },

    #[error("crypto error: {0}")]
    Crypto(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("I/O error at {}: {source}", .path.display())]
    IoAt {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl StrataError {
    /// Attach the offending path to an I/O error.
    pub fn io_at(path: &Path, source: std::io::Error) -> Self {
        StrataError::IoAt {
            path: path.to_path_buf(),
            source,
        }
    }

    /// Chunk index for integrity failures
    pub fn failed_chunk(&self) -> Option<usize> {
        match self {
            StrataError::Integrity { chunk, .. } => Some(*chunk),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn integrity_error_names_chunk_and_path() {
        let err = StrataError::Integrity {
            path: PathBuf::from("/data/movie.enc"),
            chunk: 3,
        };
        assert_eq!(err.failed_chunk(), Some(3));
        let msg = err.to_string();
        assert!(msg.contains("/data/movie.enc"), "{msg}");
        assert!(msg.contains("chunk 3"), "{msg}");
    }

    #[test]
    fn io_at_keeps_path() {
        let err = StrataError::io_at(
            Path::new("/nope/file.bin"),
            std::io::Error::new(std::io::ErrorKind::NotFound, "gone"),
        );
        assert!(err.to_string().contains("/nope/file.bin"));
        assert_eq!(err.failed_chunk(), None);
    }
}
