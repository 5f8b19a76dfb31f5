use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error("archive write failed at {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("archive read failed at {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("archive entry {name:?} escapes the destination directory")]
    PathTraversal { name: String },

    #[error("unsupported entry {name:?} ({kind})")]
    UnsupportedEntry { name: String, kind: String },
}

pub type Result<T> = std::result::Result<T, ArchiveError>;
