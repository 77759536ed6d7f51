//! Audit sink backends.
//!
//! This module provides the [`AuditSink`] trait and the sinks that do not
//! need their own module.

use std::sync::Arc;

use crate::error::{AuditError, Result};
use crate::record::{AccessOutcome, AccessRecord};

/// Trait for audit backends.
///
/// The only contract is "append one record, do not block indefinitely".
/// A sink that cannot persist a record must return an error instead of
/// dropping it silently.
pub trait AuditSink: Send + Sync {
    /// Appends one record as a single, atomic write.
    fn append(&self, record: &AccessRecord) -> Result<()>;
}

/// Audit sink that emits records through `tracing`.
///
/// Records are logged at levels derived from their outcome:
/// - Granted, Released, Reset → `tracing::info!`
/// - Denied, Expired → `tracing::warn!`
#[derive(Debug, Clone, Default)]
pub struct TracingAuditSink {
    prefix: Option<String>,
}

impl TracingAuditSink {
    /// Creates a new tracing-based audit sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a new tracing-based audit sink with a message prefix.
    #[must_use]
    pub fn with_prefix(prefix: impl Into<String>) -> Self {
        Self {
            prefix: Some(prefix.into()),
        }
    }
}

impl AuditSink for TracingAuditSink {
    fn append(&self, record: &AccessRecord) -> Result<()> {
        let json = record.to_json()?;
        let prefix = self.prefix.as_deref().unwrap_or("AUDIT");
        let record_id = record.record_id;
        let identifier = record.identifier.as_str();
        let caller = record.caller.as_str();
        let action = record.action;
        let outcome = record.outcome;

        match outcome {
            AccessOutcome::Granted | AccessOutcome::Released | AccessOutcome::Reset => {
                tracing::info!(
                    target: "keyguard_audit",
                    %record_id,
                    identifier,
                    caller,
                    %action,
                    %outcome,
                    record_json = %json,
                    "[{prefix}] {action} {outcome}"
                );
            }
            AccessOutcome::Denied | AccessOutcome::Expired => {
                tracing::warn!(
                    target: "keyguard_audit",
                    %record_id,
                    identifier,
                    caller,
                    %action,
                    %outcome,
                    reason = record.reason.map(|r| r.as_str()),
                    record_json = %json,
                    "[{prefix}] {action} {outcome}"
                );
            }
        }

        Ok(())
    }
}

/// Forwards every record to several sinks.
///
/// All sinks are attempted even when an earlier one fails; the first
/// failure is returned.
#[derive(Default)]
pub struct FanoutAuditSink {
    sinks: Vec<Arc<dyn AuditSink>>,
}

impl FanoutAuditSink {
    /// Creates a fanout sink with no targets.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a target sink.
    #[must_use]
    pub fn with(mut self, sink: Arc<dyn AuditSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    /// Returns the number of target sinks.
    #[must_use]
    pub fn len(&self) -> usize {
        self.sinks.len()
    }

    /// Returns true if there are no target sinks.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }
}

impl AuditSink for FanoutAuditSink {
    fn append(&self, record: &AccessRecord) -> Result<()> {
        let mut first_error: Option<AuditError> = None;
        for sink in &self.sinks {
            if let Err(e) = sink.append(record) {
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }
}

impl std::fmt::Debug for FanoutAuditSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FanoutAuditSink")
            .field("sinks", &self.sinks.len())
            .finish()
    }
}

/// A boxed audit sink for dynamic dispatch.
pub type BoxedAuditSink = Box<dyn AuditSink>;

impl AuditSink for BoxedAuditSink {
    fn append(&self, record: &AccessRecord) -> Result<()> {
        (**self).append(record)
    }
}
