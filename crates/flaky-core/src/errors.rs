//! Error types for the flaky-core library.

use std::path::PathBuf;

/// Top-level error enum for the flaky-core library.
///
/// Only hard failures live here. Unresolved imports, insufficient run data and
/// exhausted quotas are ordinary values returned by their components.
#[derive(Debug, thiserror::Error)]
pub enum FlakyError {
    #[error("Root file not found: {}", .0.display())]
    RootMissing(PathBuf),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Store error: {0}")]
    Store(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

#[cfg(feature = "python")]
impl From<FlakyError> for pyo3::PyErr {
    fn from(err: FlakyError) -> pyo3::PyErr {
        use pyo3::exceptions::{PyIOError, PyRuntimeError, PyValueError};
        match &err {
            FlakyError::Io(_) | FlakyError::RootMissing(_) => PyIOError::new_err(err.to_string()),
            FlakyError::Config(_) | FlakyError::Json(_) => PyValueError::new_err(err.to_string()),
            FlakyError::Store(_) | FlakyError::Sqlite(_) => {
                PyRuntimeError::new_err(err.to_string())
            }
        }
    }
}

pub type FlakyResult<T> = Result<T, FlakyError>;
