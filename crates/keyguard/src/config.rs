//! Guard configuration.
//!
//! Loaded once at startup from a JSON file:
//!
//! ```json
//! {
//!   "service_id": "wallet-signer",
//!   "max_lifetime_secs": 30,
//!   "watchdog_interval_ms": 250,
//!   "access_mode": { "mode": "exclusive", "lock_wait_ms": 2000 },
//!   "require_audit": false,
//!   "callers": [
//!     { "name": "alice" },
//!     { "name": "signer-bot", "token_blake3": "<64 hex chars>" }
//!   ],
//!   "integrity": { "wallet1": "<64 hex chars>" }
//! }
//! ```
//!
//! Everything except `service_id` has a default. No callers means the
//! guard denies everyone.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::access::CallerPolicy;
use crate::caller::CallerId;
use crate::error::{GuardError, Result};
use crate::types::{Digest, SecretId, ServiceId};

/// Default maximum possession time, in seconds.
pub const DEFAULT_MAX_LIFETIME_SECS: u64 = 30;

/// Default watchdog sweep interval, in milliseconds.
pub const DEFAULT_WATCHDOG_INTERVAL_MS: u64 = 250;

/// Upper bound on `max_lifetime_secs`: one day.
pub const MAX_LIFETIME_SECS_LIMIT: u64 = 86_400;

/// How concurrent acquisitions of one identifier interact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum AccessMode {
    /// Any number of holders per identifier.
    #[default]
    Shared,
    /// One holder per identifier; others wait up to `lock_wait_ms`.
    Exclusive {
        /// Longest time an acquisition waits for the current holder.
        lock_wait_ms: u64,
    },
}

/// One allowed caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CallerConfig {
    /// Caller identity.
    pub name: String,
    /// BLAKE3 digest of the token this caller must present.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_blake3: Option<Digest>,
}

/// Configuration for a [`SecretGuard`](crate::SecretGuard).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GuardConfig {
    /// Namespace secrets are looked up under.
    pub service_id: String,
    /// Maximum possession time for an acquired secret.
    #[serde(default = "default_max_lifetime_secs")]
    pub max_lifetime_secs: u64,
    /// How often the watchdog sweeps for expired leases.
    #[serde(default = "default_watchdog_interval_ms")]
    pub watchdog_interval_ms: u64,
    /// Shared or exclusive access per identifier.
    #[serde(default)]
    pub access_mode: AccessMode,
    /// Refuse grants whose audit record could not be persisted.
    #[serde(default)]
    pub require_audit: bool,
    /// Callers allowed to acquire secrets.
    #[serde(default)]
    pub callers: Vec<CallerConfig>,
    /// Pinned payload digests by secret identifier.
    #[serde(default)]
    pub integrity: BTreeMap<String, Digest>,
}

const fn default_max_lifetime_secs() -> u64 {
    DEFAULT_MAX_LIFETIME_SECS
}

const fn default_watchdog_interval_ms() -> u64 {
    DEFAULT_WATCHDOG_INTERVAL_MS
}

impl GuardConfig {
    /// Creates a configuration with defaults and no allowed callers.
    #[must_use]
    pub fn new(service_id: impl Into<String>) -> Self {
        Self {
            service_id: service_id.into(),
            max_lifetime_secs: DEFAULT_MAX_LIFETIME_SECS,
            watchdog_interval_ms: DEFAULT_WATCHDOG_INTERVAL_MS,
            access_mode: AccessMode::Shared,
            require_audit: false,
            callers: Vec::new(),
            integrity: BTreeMap::new(),
        }
    }

    /// Loads configuration from a JSON file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            GuardError::config(format!(
                "failed to read config file '{}': {e}",
                path.display()
            ))
        })?;

        let config = Self::from_json(&content)?;
        debug!(path = %path.display(), callers = config.callers.len(), "loaded guard config");
        Ok(config)
    }

    /// Parses configuration from a JSON string.
    pub fn from_json(content: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(content)
            .map_err(|e| GuardError::config(format!("invalid JSON: {e}")))?;

        config.validate()?;
        Ok(config)
    }

    /// Validates the configuration.
    pub fn validate(&self) -> Result<()> {
        ServiceId::new(self.service_id.as_str())?;

        if self.max_lifetime_secs == 0 {
            return Err(GuardError::config(
                "max_lifetime_secs must be greater than 0",
            ));
        }

        if self.max_lifetime_secs > MAX_LIFETIME_SECS_LIMIT {
            return Err(GuardError::config(format!(
                "max_lifetime_secs must be at most {MAX_LIFETIME_SECS_LIMIT}"
            )));
        }

        if self.watchdog_interval_ms == 0 {
            return Err(GuardError::config(
                "watchdog_interval_ms must be greater than 0",
            ));
        }

        // A sweep must land at least once per lifetime.
        if self.watchdog_interval_ms > self.max_lifetime_secs.saturating_mul(1000) {
            return Err(GuardError::config(
                "watchdog_interval_ms must not exceed max_lifetime_secs",
            ));
        }

        if let AccessMode::Exclusive { lock_wait_ms: 0 } = self.access_mode {
            return Err(GuardError::config(
                "access_mode.lock_wait_ms must be greater than 0",
            ));
        }

        let mut seen = BTreeSet::new();
        for caller in &self.callers {
            CallerId::new(caller.name.as_str())
                .map_err(|e| GuardError::config(format!("callers: {e}")))?;
            if !seen.insert(caller.name.as_str()) {
                return Err(GuardError::config(format!(
                    "callers: duplicate caller '{}'",
                    caller.name
                )));
            }
        }

        for identifier in self.integrity.keys() {
            SecretId::new(identifier.as_str())
                .map_err(|e| GuardError::config(format!("integrity: {e}")))?;
        }

        Ok(())
    }

    /// Sets the maximum possession time.
    #[must_use]
    pub fn with_max_lifetime_secs(mut self, secs: u64) -> Self {
        self.max_lifetime_secs = secs;
        self
    }

    /// Sets the watchdog sweep interval.
    #[must_use]
    pub fn with_watchdog_interval_ms(mut self, ms: u64) -> Self {
        self.watchdog_interval_ms = ms;
        self
    }

    /// Sets the access mode.
    #[must_use]
    pub fn with_access_mode(mut self, mode: AccessMode) -> Self {
        self.access_mode = mode;
        self
    }

    /// Requires every grant to be audited before it is handed out.
    #[must_use]
    pub fn with_require_audit(mut self, require: bool) -> Self {
        self.require_audit = require;
        self
    }

    /// Allows a caller by name.
    #[must_use]
    pub fn with_caller(mut self, name: impl Into<String>) -> Self {
        self.callers.push(CallerConfig {
            name: name.into(),
            token_blake3: None,
        });
        self
    }

    /// Allows a caller that must present a token hashing to `digest`.
    #[must_use]
    pub fn with_token_caller(mut self, name: impl Into<String>, digest: Digest) -> Self {
        self.callers.push(CallerConfig {
            name: name.into(),
            token_blake3: Some(digest),
        });
        self
    }

    /// Pins the expected payload digest of a secret.
    #[must_use]
    pub fn with_integrity_pin(mut self, identifier: impl Into<String>, digest: Digest) -> Self {
        self.integrity.insert(identifier.into(), digest);
        self
    }

    /// Maximum possession time.
    #[must_use]
    pub fn max_lifetime(&self) -> Duration {
        Duration::from_secs(self.max_lifetime_secs)
    }

    /// Watchdog sweep interval.
    #[must_use]
    pub fn watchdog_interval(&self) -> Duration {
        Duration::from_millis(self.watchdog_interval_ms)
    }

    /// Longest wait for an exclusive hold, if exclusive mode is on.
    #[must_use]
    pub fn lock_wait(&self) -> Option<Duration> {
        match self.access_mode {
            AccessMode::Shared => None,
            AccessMode::Exclusive { lock_wait_ms } => Some(Duration::from_millis(lock_wait_ms)),
        }
    }

    /// The validated service id.
    pub fn service(&self) -> Result<ServiceId> {
        ServiceId::new(self.service_id.as_str())
    }

    /// Builds the caller policy.
    pub fn caller_policy(&self) -> Result<CallerPolicy> {
        let mut policy = CallerPolicy::deny_all();
        for caller in &self.callers {
            let id = CallerId::new(caller.name.as_str())
                .map_err(|e| GuardError::config(format!("callers: {e}")))?;
            policy = match caller.token_blake3 {
                Some(digest) => policy.with_token_caller(id, digest),
                None => policy.with_caller(id),
            };
        }
        Ok(policy)
    }

    /// Builds the integrity pins keyed by validated identifier.
    pub fn integrity_pins(&self) -> Result<HashMap<SecretId, Digest>> {
        self.integrity
            .iter()
            .map(|(identifier, digest)| {
                let id = SecretId::new(identifier.as_str())
                    .map_err(|e| GuardError::config(format!("integrity: {e}")))?;
                Ok((id, *digest))
            })
            .collect()
    }
}
