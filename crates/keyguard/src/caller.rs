//! Caller identity.
//!
//! Callers pass their identity explicitly on every acquisition. The
//! [`CallerId`] is what ends up in audit records and error messages; an
//! optional token proves the identity when the policy pins a digest for
//! it, and is never logged.

use serde::{Deserialize, Serialize};
use std::fmt;
use zeroize::Zeroizing;

use crate::error::{GuardError, Result};
use crate::types::{validate_name, Digest};

/// Audit-safe caller identity, for example `alice` or `signer-bot`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct CallerId(String);

impl CallerId {
    /// Maximum length of a caller identifier.
    pub const MAX_LENGTH: usize = 128;

    /// Creates a new `CallerId` after validating the input.
    pub fn new(id: impl Into<String>) -> Result<Self> {
        let id = id.into();
        validate_name(&id, Self::MAX_LENGTH).map_err(|e| GuardError::InvalidIdentifier {
            reason: format!("invalid caller id: {e}"),
        })?;
        Ok(Self(id))
    }

    /// Returns the identifier as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CallerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for CallerId {
    type Error = GuardError;

    fn try_from(value: String) -> Result<Self> {
        Self::new(value)
    }
}

impl From<CallerId> for String {
    fn from(id: CallerId) -> Self {
        id.0
    }
}

/// The identity a caller presents when requesting a secret.
#[derive(Clone)]
pub struct Caller {
    id: CallerId,
    token: Option<Zeroizing<Vec<u8>>>,
}

impl Caller {
    /// A caller identified by name only.
    pub fn new(id: impl Into<String>) -> Result<Self> {
        Ok(Self {
            id: CallerId::new(id)?,
            token: None,
        })
    }

    /// A caller that also presents a token.
    pub fn with_token(id: impl Into<String>, token: impl AsRef<[u8]>) -> Result<Self> {
        Ok(Self {
            id: CallerId::new(id)?,
            token: Some(Zeroizing::new(token.as_ref().to_vec())),
        })
    }

    /// Returns the audit-safe identity.
    #[must_use]
    pub fn id(&self) -> &CallerId {
        &self.id
    }

    /// Returns true if the caller presented a token.
    #[must_use]
    pub fn has_token(&self) -> bool {
        self.token.is_some()
    }

    /// Digest of the presented token, if any.
    pub(crate) fn token_digest(&self) -> Option<Digest> {
        self.token.as_ref().map(|t| Digest::of(t))
    }
}

impl From<CallerId> for Caller {
    fn from(id: CallerId) -> Self {
        Self { id, token: None }
    }
}

impl fmt::Debug for Caller {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Caller")
            .field("id", &self.id)
            .field("token", &self.token.as_ref().map(|_| "[REDACTED]"))
            .finish()
    }
}
