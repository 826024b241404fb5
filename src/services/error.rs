//! Errors raised by the storage core (registry, catalog and object store).

use std::{io, path::PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("bucket `{0}` not found")]
    BucketNotFound(String),
    #[error("bucket `{0}` already exists")]
    BucketAlreadyExists(String),
    #[error("bucket `{0}` is not empty")]
    BucketNotEmpty(String),
    #[error("bucket `{bucket}` directory holds unexpected entry `{entry}`")]
    BucketDirectoryNotClean { bucket: String, entry: String },
    #[error("name `{0}` is reserved for catalog files")]
    ProhibitedName(String),
    #[error("object `{key}` not found in bucket `{bucket}`")]
    ObjectNotFound { bucket: String, key: String },
    #[error("content length must be declared before the upload starts")]
    UndefinedLength,
    #[error("declared length {declared} exceeds the {max} byte object limit")]
    TooLarge { declared: u64, max: u64 },
    #[error("body carried {received} bytes but {expected} were declared")]
    BodyLengthMismatch { expected: u64, received: u64 },
    #[error("storage path `{0}` is prohibited")]
    ProhibitedStoragePath(String),
    #[error("corrupt catalog {}:{line}: {reason}", path.display())]
    Corruption {
        path: PathBuf,
        line: u64,
        reason: String,
    },
    #[error("catalog {} disagrees with the registry: {reason}", path.display())]
    CatalogMismatch { path: PathBuf, reason: String },
    #[error("registry lock not acquired within {0:?}")]
    LockTimeout(std::time::Duration),
    #[error(transparent)]
    Csv(#[from] csv::Error),
    #[error(transparent)]
    Io(#[from] io::Error),
}

pub type StorageResult<T> = Result<T, StorageError>;

impl StorageError {
    pub(crate) fn corruption(path: impl Into<PathBuf>, line: u64, reason: impl Into<String>) -> Self {
        StorageError::Corruption {
            path: path.into(),
            line,
            reason: reason.into(),
        }
    }
}
