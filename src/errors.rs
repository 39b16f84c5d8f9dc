//! Typed error hierarchy for the document sync reconciler.
//!
//! Every failure in the fallback path is caught at its operation boundary and
//! logged; none of them reach the editing surface. The variants map onto the
//! recovery each one gets:
//! - `Decode`: malformed persisted binary, recovered by treating it as empty
//! - `Probe`: counted toward the degraded threshold
//! - `Fetch` / `Merge` / `Persist`: abort the current sync attempt, retried on
//!   the next scheduler tick

use thiserror::Error;

/// Errors raised by the sync subsystem.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("Invalid persisted binary: {0}")]
    Decode(#[from] base64::DecodeError),

    #[error("Health probe failed: {reason}")]
    Probe { reason: String },

    #[error("Failed to fetch document {document}: {reason}")]
    Fetch { document: String, reason: String },

    #[error("Failed to persist document {document}: {reason}")]
    Persist { document: String, reason: String },

    #[error("Failed to merge binary updates: {0}")]
    Merge(String),

    #[error("Editor rejected document state: {0}")]
    Editor(String),

    #[error("HTTP client error: {0}")]
    Http(#[source] reqwest::Error),
}

impl SyncError {
    /// Whether the failure should abandon the attempt and leave the retry to
    /// the next scheduler tick.
    ///
    /// Merge failures count here: a corrupt remote snapshot is handled the
    /// same way as a failed fetch.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            SyncError::Fetch { .. } | SyncError::Persist { .. } | SyncError::Merge(_)
        )
    }
}
