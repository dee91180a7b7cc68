use std::path::PathBuf;

/// Errors produced by the shard store.
///
/// Mirrors the taxonomy used throughout the store: callers match on variant
/// to decide whether to retry (`Timeout`), repair (`IntegrityViolated`), or
/// treat the condition as a programming error (`InvalidArgument`).
#[derive(thiserror::Error, Debug)]
pub enum StoreError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("not found: {0}")]
    NotFound(PathBuf),

    #[error("already exists: {0}")]
    AlreadyExists(PathBuf),

    #[error("resource locked: {0}")]
    Locked(PathBuf),

    #[error("timed out acquiring lock: {0}")]
    Timeout(PathBuf),

    #[error("corrupt: {0}")]
    Corrupt(String),

    #[error("shard set does not match metadata: {0}")]
    IntegrityViolated(String),

    #[error("could not release lock {0}: not owned or expired")]
    CouldNotRelease(PathBuf),

    #[error("lock {0} is not held by this process")]
    NotOwned(PathBuf),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, StoreError>;
