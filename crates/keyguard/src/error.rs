//! Error types for the secret guard.
//!
//! No variant ever carries payload bytes. Identifiers and caller ids are
//! included so an operator can act on a failure.

use thiserror::Error;

/// Errors returned by [`SecretGuard`](crate::SecretGuard) operations.
#[derive(Debug, Error)]
pub enum GuardError {
    /// The identifier failed validation.
    #[error("invalid secret identifier: {reason}")]
    InvalidIdentifier {
        /// The reason the identifier is invalid.
        reason: String,
    },

    /// The caller is not allowed by the policy.
    #[error("caller {caller} is not authorized to access secret {identifier}")]
    Authorization {
        /// The requested secret.
        identifier: String,
        /// The audit-safe caller identity.
        caller: String,
    },

    /// The store has no secret under this identifier.
    #[error("secret {identifier} not found (requested by {caller})")]
    SecretNotFound {
        /// The requested secret.
        identifier: String,
        /// The audit-safe caller identity.
        caller: String,
    },

    /// The handle was used after the secret was invalidated.
    #[error("secret {identifier} has expired (lease {lease}); acquire it again")]
    SecretExpired {
        /// The secret the handle referred to.
        identifier: String,
        /// The lease the handle belonged to.
        lease: String,
    },

    /// The secret store could not be reached.
    #[error("secret store unavailable while accessing {identifier}: {reason}")]
    StoreUnavailable {
        /// The secret being accessed.
        identifier: String,
        /// What went wrong.
        reason: String,
    },

    /// The payload did not match its pinned digest.
    #[error("integrity check failed for secret {identifier} (requested by {caller})")]
    IntegrityCheckFailed {
        /// The requested secret.
        identifier: String,
        /// The audit-safe caller identity.
        caller: String,
    },

    /// An exclusive hold on the identifier was not released in time.
    #[error("timed out waiting for exclusive access to {identifier} (requested by {caller})")]
    LockTimeout {
        /// The requested secret.
        identifier: String,
        /// The audit-safe caller identity.
        caller: String,
    },

    /// The audit record for a decision could not be persisted.
    #[error("audit record for {identifier} could not be persisted: {reason}")]
    AuditWriteFailure {
        /// The secret the record was about.
        identifier: String,
        /// The sink error.
        reason: String,
    },

    /// Configuration is invalid.
    #[error("configuration error: {reason}")]
    Config {
        /// What is wrong with the configuration.
        reason: String,
    },

    /// The expiry watchdog could not be started.
    #[error("watchdog error: {reason}")]
    Watchdog {
        /// What went wrong.
        reason: String,
    },
}

impl GuardError {
    /// Returns true if retrying the same call later may succeed.
    ///
    /// Authorization, not-found and integrity failures are facts that a
    /// retry does not change.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::StoreUnavailable { .. } | Self::LockTimeout { .. })
    }

    pub(crate) fn config(reason: impl Into<String>) -> Self {
        Self::Config {
            reason: reason.into(),
        }
    }
}

/// Errors reported by a [`SecretStore`](crate::SecretStore) backend.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    /// The store could not be reached.
    #[error("store unavailable: {reason}")]
    Unavailable {
        /// What went wrong.
        reason: String,
    },

    /// The store was reached but failed to produce the payload.
    #[error("store backend failure: {reason}")]
    Backend {
        /// What went wrong.
        reason: String,
    },
}

/// Result type alias for guard operations.
pub type Result<T> = std::result::Result<T, GuardError>;
