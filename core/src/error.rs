use std::path::PathBuf;
use thiserror::Error;

/// Result alias for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;

/// Errors from the persisted-state layer.
///
/// None of these ever reach the host pipeline: the hook boundary maps every
/// variant to an allow-with-no-output activation. The enum exists so tests
/// and the status command can tell the failure classes apart.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("corrupt state file {path}: {source}")]
    Corrupt {
        path: PathBuf,
        source: serde_json::Error,
    },
}
