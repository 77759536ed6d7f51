//! Error types for the audit trail.

use thiserror::Error;

/// Errors that can occur while persisting audit records.
#[derive(Debug, Error)]
pub enum AuditError {
    /// Writing to the underlying sink failed.
    #[error("audit sink i/o failed: {0}")]
    Io(#[from] std::io::Error),

    /// Failed to serialize a record.
    #[error("serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The sink refused or could not accept the record.
    #[error("audit sink unavailable: {reason}")]
    Unavailable {
        /// Why the sink is unavailable.
        reason: String,
    },
}

impl AuditError {
    /// Creates an [`AuditError::Unavailable`] with the given reason.
    pub fn unavailable(reason: impl Into<String>) -> Self {
        Self::Unavailable {
            reason: reason.into(),
        }
    }
}

/// Result type alias for audit operations.
pub type Result<T> = std::result::Result<T, AuditError>;
