//! # keyguard
//!
//! Scoped, audited, time-bounded access to short-lived secrets such as
//! signing keys.
//!
//! - **Fail-closed authorization**: only callers the policy names may
//!   acquire; nothing is allowed by default
//! - **Scoped handles**: a [`ScopedSecret`] wipes its payload when released,
//!   dropped, or when its lifetime elapses
//! - **Forced expiry**: a watchdog thread invalidates leases past their
//!   deadline even if the holder never returns
//! - **Audit trail**: every decision produces exactly one
//!   [`AccessRecord`](keyguard_audit::AccessRecord), and no record or log
//!   line ever contains payload bytes
//!
//! ## Example
//!
//! ```rust
//! use std::sync::Arc;
//!
//! use keyguard::{Caller, EncryptedMemoryStore, GuardConfig, SecretGuard, SecretId};
//! use keyguard_audit::MemoryAuditLog;
//!
//! let config = GuardConfig::new("wallet-signer").with_caller("alice");
//! let store = Arc::new(EncryptedMemoryStore::ephemeral());
//! store
//!     .put(&config.service()?, &SecretId::new("wallet1")?, b"secretpayload")
//!     .expect("store is online");
//!
//! let audit = Arc::new(MemoryAuditLog::new());
//! let guard = SecretGuard::builder(config)
//!     .store(store)
//!     .audit_sink(audit.clone())
//!     .build()?;
//!
//! let alice = Caller::new("alice")?;
//! let len = guard.with_secret("wallet1", &alice, |payload| payload.len())?;
//! assert_eq!(len, 13);
//!
//! let bob = Caller::new("bob")?;
//! assert!(guard.acquire("wallet1", &bob).is_err());
//! assert_eq!(audit.len(), 3);
//! # Ok::<(), keyguard::GuardError>(())
//! ```
//!
//! ## Security Considerations
//!
//! - Payloads use `zeroize` and are overwritten on release, expiry and drop
//! - Payloads, tokens and keys have redacted `Debug` output
//! - Token and digest comparisons are constant-time

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod access;
pub mod caller;
pub mod clock;
pub mod config;
pub mod encryption;
pub mod error;
pub mod guard;
pub mod lease;
pub mod store;
pub mod types;
mod watchdog;

// Re-export commonly used types
pub use access::{CallerPolicy, PolicyEntry};
pub use caller::{Caller, CallerId};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{AccessMode, CallerConfig, GuardConfig};
pub use encryption::SecretKey;
pub use error::{GuardError, Result, StoreError};
pub use guard::{SecretGuard, SecretGuardBuilder, GUARD_CALLER};
pub use lease::{LeaseState, ScopedSecret};
pub use store::{EncryptedMemoryStore, SecretStore};
pub use types::{Digest, SecretId, SecretValue, ServiceId};
pub use watchdog::WATCHDOG_THREAD_NAME;
