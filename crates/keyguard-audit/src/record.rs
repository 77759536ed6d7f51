//! Access record types.
//!
//! An [`AccessRecord`] is built through one of its named constructors so
//! the action, outcome and denial reason always agree with each other.
//! Fields are public for reading; records are cloned out of sinks and never
//! modified after they were appended.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::error::Result;

/// What the caller (or the guard on its behalf) attempted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccessAction {
    /// Acquisition of a secret.
    Acquire,
    /// Explicit or scope-exit release of a held secret.
    Release,
    /// Forced invalidation after the lifetime elapsed.
    Expire,
    /// Revocation of a cached authorization grant in the store.
    ResetAuthorization,
}

impl AccessAction {
    /// Returns the string representation of this action.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Acquire => "acquire",
            Self::Release => "release",
            Self::Expire => "expire",
            Self::ResetAuthorization => "reset_authorization",
        }
    }
}

impl fmt::Display for AccessAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How an access attempt ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccessOutcome {
    /// The secret was handed out.
    Granted,
    /// The attempt was refused; see [`DenialReason`].
    Denied,
    /// A held secret was released and wiped.
    Released,
    /// A held secret was wiped because its lifetime elapsed.
    Expired,
    /// A cached authorization grant was revoked.
    Reset,
}

impl AccessOutcome {
    /// Returns the string representation of this outcome.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Granted => "granted",
            Self::Denied => "denied",
            Self::Released => "released",
            Self::Expired => "expired",
            Self::Reset => "reset",
        }
    }
}

impl fmt::Display for AccessOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why an attempt was denied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DenialReason {
    /// The store has no secret under the identifier.
    NotFound,
    /// The caller is not in the policy or presented a wrong token.
    UnauthorizedCaller,
    /// The payload digest did not match the pinned digest.
    IntegrityCheckFailed,
    /// The store could not be reached.
    StoreUnavailable,
    /// An exclusive hold on the identifier was not freed in time.
    LockTimeout,
}

impl DenialReason {
    /// Returns the string representation of this reason.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::NotFound => "not-found",
            Self::UnauthorizedCaller => "unauthorized-caller",
            Self::IntegrityCheckFailed => "integrity-check-failed",
            Self::StoreUnavailable => "store-unavailable",
            Self::LockTimeout => "lock-timeout",
        }
    }
}

impl fmt::Display for DenialReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An immutable audit entry for one access attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessRecord {
    /// Unique record identifier.
    pub record_id: Uuid,
    /// When the attempt happened.
    pub timestamp: DateTime<Utc>,
    /// Logical name of the secret.
    pub identifier: String,
    /// Audit-safe caller identity.
    pub caller: String,
    /// What was attempted.
    pub action: AccessAction,
    /// How it ended.
    pub outcome: AccessOutcome,
    /// Why it was denied, for denials only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<DenialReason>,
    /// Lease the record belongs to, when a scoped handle is involved.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lease_id: Option<Uuid>,
}

impl AccessRecord {
    fn new(
        identifier: impl Into<String>,
        caller: impl Into<String>,
        action: AccessAction,
        outcome: AccessOutcome,
    ) -> Self {
        Self {
            record_id: Uuid::new_v4(),
            timestamp: Utc::now(),
            identifier: identifier.into(),
            caller: caller.into(),
            action,
            outcome,
            reason: None,
            lease_id: None,
        }
    }

    /// A successful acquisition that opened `lease_id`.
    #[must_use]
    pub fn granted(
        identifier: impl Into<String>,
        caller: impl Into<String>,
        lease_id: Uuid,
    ) -> Self {
        let mut record = Self::new(
            identifier,
            caller,
            AccessAction::Acquire,
            AccessOutcome::Granted,
        );
        record.lease_id = Some(lease_id);
        record
    }

    /// A refused acquisition.
    #[must_use]
    pub fn denied(
        identifier: impl Into<String>,
        caller: impl Into<String>,
        reason: DenialReason,
    ) -> Self {
        let mut record = Self::new(
            identifier,
            caller,
            AccessAction::Acquire,
            AccessOutcome::Denied,
        );
        record.reason = Some(reason);
        record
    }

    /// A lease that was released by its holder.
    #[must_use]
    pub fn released(
        identifier: impl Into<String>,
        caller: impl Into<String>,
        lease_id: Uuid,
    ) -> Self {
        let mut record = Self::new(
            identifier,
            caller,
            AccessAction::Release,
            AccessOutcome::Released,
        );
        record.lease_id = Some(lease_id);
        record
    }

    /// A lease that was forcibly invalidated after its lifetime.
    #[must_use]
    pub fn expired(
        identifier: impl Into<String>,
        caller: impl Into<String>,
        lease_id: Uuid,
    ) -> Self {
        let mut record = Self::new(
            identifier,
            caller,
            AccessAction::Expire,
            AccessOutcome::Expired,
        );
        record.lease_id = Some(lease_id);
        record
    }

    /// A revoked authorization grant.
    #[must_use]
    pub fn reset(identifier: impl Into<String>, caller: impl Into<String>) -> Self {
        Self::new(
            identifier,
            caller,
            AccessAction::ResetAuthorization,
            AccessOutcome::Reset,
        )
    }

    /// A revocation that could not be carried out.
    #[must_use]
    pub fn reset_failed(
        identifier: impl Into<String>,
        caller: impl Into<String>,
        reason: DenialReason,
    ) -> Self {
        let mut record = Self::new(
            identifier,
            caller,
            AccessAction::ResetAuthorization,
            AccessOutcome::Denied,
        );
        record.reason = Some(reason);
        record
    }

    /// Overrides the timestamp, used when the caller owns the clock.
    #[must_use]
    pub fn at(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    /// Returns true if this record is a denial.
    #[must_use]
    pub fn is_denial(&self) -> bool {
        self.outcome == AccessOutcome::Denied
    }

    /// Serializes the record to a single-line JSON string.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

impl fmt::Display for AccessRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} by {}: {}",
            self.action, self.identifier, self.caller, self.outcome
        )?;
        if let Some(reason) = self.reason {
            write!(f, " ({reason})")?;
        }
        Ok(())
    }
}
