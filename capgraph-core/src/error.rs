//! Error taxonomy for the document graph store
//!
//! Only `Io` (and `Conflict` on caller-versioned writes) is expected to escape
//! a store operation. The remaining variants are logged by the operation that
//! produced them and turned into a no-op or a fallback.

use std::path::{Path, PathBuf};
use thiserror::Error;

/// Error type for store operations
#[derive(Debug, Error)]
pub enum StoreError {
    /// Referenced capability or enabler could not be located by id
    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    /// A table exists but its rows are narrower than any known layout
    #[error("table under '{section}' has {columns} column(s), expected at least {expected}")]
    ParseAmbiguous {
        section: String,
        columns: usize,
        expected: usize,
    },

    /// The randomized id search ran out of attempts
    #[error("no free {prefix} id after {attempts} attempts")]
    IdExhausted { prefix: String, attempts: usize },

    /// Plan document or its template markers are absent
    #[error("template '{name}' missing: {reason}")]
    TemplateMissing { name: String, reason: String },

    /// The document changed on disk since it was read
    #[error("document changed on disk since it was read: {path:?}")]
    Conflict { path: PathBuf },

    /// Timed out waiting for another writer's lock
    #[error("timeout waiting for file lock on {path:?}")]
    LockTimeout { path: PathBuf },

    /// Filesystem-level failure
    #[error("IO error on {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Invalid configuration
    #[error("configuration error: {0}")]
    Config(String),
}

impl StoreError {
    pub fn io(path: &Path, source: std::io::Error) -> Self {
        StoreError::Io {
            path: path.to_path_buf(),
            source,
        }
    }

    pub fn capability_not_found(id: &str) -> Self {
        StoreError::NotFound {
            kind: "Capability",
            id: id.to_string(),
        }
    }

    pub fn enabler_not_found(id: &str) -> Self {
        StoreError::NotFound {
            kind: "Enabler",
            id: id.to_string(),
        }
    }

    /// True for errors that must propagate to the caller rather than be skipped
    pub fn is_fatal(&self) -> bool {
        matches!(self, StoreError::Io { .. } | StoreError::Config(_))
    }
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;
