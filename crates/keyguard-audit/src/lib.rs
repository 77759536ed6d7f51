//! # keyguard-audit
//!
//! Append-only audit trail for secret access decisions.
//!
//! Every access attempt the guard mediates produces exactly one
//! [`AccessRecord`]. Records carry the secret identifier, the audit-safe
//! caller identity, the action and its outcome. They never carry the
//! secret payload.
//!
//! ## Features
//!
//! - [`AccessRecord`]: Immutable audit entry with named constructors
//! - [`AuditSink`]: Pluggable trait for audit backends
//! - [`MemoryAuditLog`]: In-memory log with [`AuditFilter`] queries
//! - [`TracingAuditSink`]: Structured events through `tracing`
//! - [`JsonLinesAuditSink`]: One JSON object per line in an append-only file
//! - [`FanoutAuditSink`]: Forwards every record to several sinks
//!
//! ## Example
//!
//! ```rust
//! use keyguard_audit::{AccessRecord, AuditSink, DenialReason, MemoryAuditLog};
//!
//! let log = MemoryAuditLog::new();
//!
//! let record = AccessRecord::denied("wallet1", "bob", DenialReason::UnauthorizedCaller);
//! log.append(&record).expect("memory log never fails");
//!
//! assert_eq!(log.len(), 1);
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod error;
pub mod file;
pub mod memory;
pub mod record;
pub mod sink;

// Re-export main types
pub use error::{AuditError, Result};
pub use file::JsonLinesAuditSink;
pub use memory::{AuditFilter, MemoryAuditLog};
pub use record::{AccessAction, AccessOutcome, AccessRecord, DenialReason};
pub use sink::{AuditSink, BoxedAuditSink, FanoutAuditSink, TracingAuditSink};
