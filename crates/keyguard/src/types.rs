//! Core types for the secret guard.
//!
//! - [`SecretId`]: A validated logical name for a secret
//! - [`ServiceId`]: The namespace secrets are looked up under
//! - [`SecretValue`]: Payload bytes that zeroize on drop
//! - [`Digest`]: A BLAKE3 digest compared in constant time

use serde::{Deserialize, Serialize};
use std::fmt;
use subtle::ConstantTimeEq;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::{GuardError, Result};

/// A validated identifier for a secret, such as a wallet alias.
///
/// Secret IDs must:
/// - Be between 1 and 253 characters
/// - Contain only ASCII alphanumeric characters, hyphens, underscores, and periods
/// - Start with an alphanumeric character
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SecretId(String);

impl SecretId {
    /// Maximum length of a secret identifier.
    pub const MAX_LENGTH: usize = 253;

    /// Creates a new `SecretId` after validating the input.
    pub fn new(id: impl Into<String>) -> Result<Self> {
        let id = id.into();
        validate_name(&id, Self::MAX_LENGTH)?;
        Ok(Self(id))
    }

    /// Returns the identifier as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Shared validation for identifiers and caller names.
pub(crate) fn validate_name(id: &str, max_len: usize) -> Result<()> {
    let invalid = |reason: String| GuardError::InvalidIdentifier { reason };

    let Some(first) = id.chars().next() else {
        return Err(invalid("identifier cannot be empty".to_string()));
    };

    if id.len() > max_len {
        return Err(invalid(format!(
            "identifier exceeds maximum length of {max_len} characters"
        )));
    }

    if !first.is_ascii_alphanumeric() {
        return Err(invalid(
            "identifier must start with an alphanumeric character".to_string(),
        ));
    }

    if let Some(c) = id
        .chars()
        .find(|c| !c.is_ascii_alphanumeric() && !matches!(c, '-' | '_' | '.'))
    {
        return Err(invalid(format!(
            "identifier contains invalid character '{c}'; only alphanumerics, hyphens, underscores, and periods are allowed"
        )));
    }

    Ok(())
}

impl fmt::Display for SecretId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for SecretId {
    type Error = GuardError;

    fn try_from(value: String) -> Result<Self> {
        Self::new(value)
    }
}

impl TryFrom<&str> for SecretId {
    type Error = GuardError;

    fn try_from(value: &str) -> Result<Self> {
        Self::new(value)
    }
}

impl From<SecretId> for String {
    fn from(id: SecretId) -> Self {
        id.0
    }
}

impl AsRef<str> for SecretId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// The namespace a guard looks secrets up under.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ServiceId(String);

impl ServiceId {
    /// Creates a new service identifier.
    pub fn new(id: impl Into<String>) -> Result<Self> {
        let id = id.into();
        validate_name(&id, SecretId::MAX_LENGTH)
            .map_err(|e| GuardError::config(format!("invalid service id: {e}")))?;
        Ok(Self(id))
    }

    /// Returns the identifier as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ServiceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for ServiceId {
    type Error = GuardError;

    fn try_from(value: String) -> Result<Self> {
        Self::new(value)
    }
}

impl From<ServiceId> for String {
    fn from(id: ServiceId) -> Self {
        id.0
    }
}

/// Secret payload that securely zeroizes memory on drop.
///
/// Deliberately implements neither `Display` nor `Serialize`.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct SecretValue {
    data: Vec<u8>,
}

impl SecretValue {
    /// Creates a new `SecretValue` from raw bytes.
    #[must_use]
    pub fn new(data: Vec<u8>) -> Self {
        Self { data }
    }

    /// Returns the payload as a byte slice.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    /// Returns the payload length.
    #[must_use]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Returns true if the payload is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Computes the BLAKE3 digest of the payload.
    #[must_use]
    pub fn digest(&self) -> Digest {
        Digest::of(&self.data)
    }
}

impl From<&[u8]> for SecretValue {
    fn from(bytes: &[u8]) -> Self {
        Self::new(bytes.to_vec())
    }
}

impl From<&str> for SecretValue {
    fn from(s: &str) -> Self {
        Self::new(s.as_bytes().to_vec())
    }
}

impl fmt::Debug for SecretValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SecretValue")
            .field("len", &self.data.len())
            .field("data", &"[REDACTED]")
            .finish()
    }
}

impl PartialEq for SecretValue {
    fn eq(&self, other: &Self) -> bool {
        self.data.ct_eq(&other.data).into()
    }
}

impl Eq for SecretValue {}

/// A 32-byte BLAKE3 digest, written as 64 lowercase hex characters.
#[derive(Clone, Copy, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Digest([u8; Self::LEN]);

impl Digest {
    /// Digest length in bytes.
    pub const LEN: usize = 32;

    /// Hashes `data` with BLAKE3.
    #[must_use]
    pub fn of(data: &[u8]) -> Self {
        Self(*blake3::hash(data).as_bytes())
    }

    /// Parses a digest from 64 hex characters.
    pub fn from_hex(s: &str) -> Result<Self> {
        let bytes = hex::decode(s.trim())
            .map_err(|e| GuardError::config(format!("invalid digest hex: {e}")))?;
        let bytes: [u8; Self::LEN] = bytes.try_into().map_err(|b: Vec<u8>| {
            GuardError::config(format!(
                "digest must be {} bytes, got {}",
                Self::LEN,
                b.len()
            ))
        })?;
        Ok(Self(bytes))
    }

    /// Returns the lowercase hex encoding.
    #[must_use]
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Compares two digests in constant time.
    #[must_use]
    pub fn matches(&self, other: &Self) -> bool {
        self.0.ct_eq(&other.0).into()
    }
}

impl PartialEq for Digest {
    fn eq(&self, other: &Self) -> bool {
        self.matches(other)
    }
}

impl Eq for Digest {}

impl fmt::Debug for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Digest({})", self.to_hex())
    }
}

impl TryFrom<String> for Digest {
    type Error = GuardError;

    fn try_from(value: String) -> Result<Self> {
        Self::from_hex(&value)
    }
}

impl From<Digest> for String {
    fn from(d: Digest) -> Self {
        d.to_hex()
    }
}
