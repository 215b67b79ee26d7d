//! Error types for fathom-core.
//!
//! Uses a hierarchical error enum so callers can pattern-match on
//! the failure class at the pipeline boundary. Each subsystem converts
//! its internal errors to `FathomError` before they cross module lines.

use std::path::PathBuf;

use thiserror::Error;

/// Top-level error type for all fathom-core operations.
#[derive(Debug, Error)]
pub enum FathomError {
    // ---- Recoverable (operation failed, system healthy) ----
    /// A path, container, or annotation id is not present.
    #[error("not found: {entity}")]
    NotFound {
        /// Description of what was not found.
        entity: String,
    },

    /// An indexing job is already running for the container.
    #[error("container '{container}' is busy with another indexing job")]
    Busy {
        /// Name of the contended container.
        container: String,
    },

    /// A single file failed to extract. The rest of the job is fine.
    #[error("extraction failed for {path}: {reason}")]
    Extraction {
        /// Path to the file that failed.
        path: PathBuf,
        /// Human-readable error description.
        reason: String,
    },

    /// Caller supplied an invalid filter, oversized top_k, or malformed query.
    #[error("bad input: {details}")]
    BadInput {
        /// What's wrong with the input.
        details: String,
    },

    // ---- Provider-level (retryable at the indexer, bounded) ----
    /// Vector dimension or container/provider identity mismatch.
    /// Remediation: rebuild the container against the current provider.
    #[error("provider mismatch: {details}; rebuild the container to proceed")]
    ProviderMismatch {
        /// Diagnostic details (expected vs actual dimension, model name).
        details: String,
    },

    /// Embedding or reranker model failed to load.
    #[error("model load failed: {reason}")]
    ModelLoad {
        /// Why the model couldn't be loaded.
        reason: String,
    },

    /// Network transport failure talking to a remote provider.
    #[error("transport error: {reason}")]
    Transport {
        /// Underlying transport diagnostic.
        reason: String,
    },

    /// A provider call exceeded its deadline.
    #[error("timed out: {operation}")]
    Timeout {
        /// Operation that exceeded its deadline.
        operation: String,
    },

    // ---- Fatal for the current job ----
    /// Store failure. Fatal for the current job; committed state is intact.
    #[error("store failure: {details}")]
    Store {
        /// Diagnostic details.
        details: String,
    },

    /// Configuration is invalid or missing required fields.
    #[error("configuration error: {details}")]
    Config {
        /// What's wrong with the config.
        details: String,
    },

    // ---- Wrapped external errors ----
    /// SQLite error.
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic internal error for unexpected conditions.
    #[error("internal error: {0}")]
    Internal(String),
}

impl FathomError {
    /// Whether the indexer may retry the failed operation (bounded, with backoff).
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::ModelLoad { .. } | Self::Transport { .. } | Self::Timeout { .. }
        )
    }
}

/// Convenience type alias for Results in fathom-core.
pub type FathomResult<T> = Result<T, FathomError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classes() {
        assert!(FathomError::Transport { reason: "refused".into() }.is_retryable());
        assert!(FathomError::Timeout { operation: "embed".into() }.is_retryable());
        assert!(FathomError::ModelLoad { reason: "missing".into() }.is_retryable());
        assert!(!FathomError::Busy { container: "Default".into() }.is_retryable());
        assert!(!FathomError::Store { details: "disk full".into() }.is_retryable());
    }
}
