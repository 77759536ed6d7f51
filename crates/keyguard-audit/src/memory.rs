//! In-memory audit log.
//!
//! Records are kept in append order and can be queried with an
//! [`AuditFilter`]. There is no way to remove or edit a record once it has
//! been appended.

use chrono::{DateTime, Utc};
use parking_lot::RwLock;

use crate::error::Result;
use crate::record::{AccessAction, AccessOutcome, AccessRecord, DenialReason};
use crate::sink::AuditSink;

/// Filter criteria for querying audit records.
#[derive(Debug, Clone, Default)]
pub struct AuditFilter {
    /// Filter by secret identifier.
    pub identifier: Option<String>,
    /// Filter by caller.
    pub caller: Option<String>,
    /// Filter by action.
    pub action: Option<AccessAction>,
    /// Filter by outcome.
    pub outcome: Option<AccessOutcome>,
    /// Filter by denial reason.
    pub reason: Option<DenialReason>,
    /// Filter records after this time.
    pub after: Option<DateTime<Utc>>,
    /// Filter records before this time.
    pub before: Option<DateTime<Utc>>,
    /// Keep only the newest `n` matching records.
    pub limit: Option<usize>,
}

impl AuditFilter {
    /// Creates a new empty filter that matches all records.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Filters by secret identifier.
    #[must_use]
    pub fn for_identifier(mut self, identifier: impl Into<String>) -> Self {
        self.identifier = Some(identifier.into());
        self
    }

    /// Filters by caller.
    #[must_use]
    pub fn by_caller(mut self, caller: impl Into<String>) -> Self {
        self.caller = Some(caller.into());
        self
    }

    /// Filters by action.
    #[must_use]
    pub fn with_action(mut self, action: AccessAction) -> Self {
        self.action = Some(action);
        self
    }

    /// Filters by outcome.
    #[must_use]
    pub fn with_outcome(mut self, outcome: AccessOutcome) -> Self {
        self.outcome = Some(outcome);
        self
    }

    /// Filters by denial reason.
    #[must_use]
    pub fn with_reason(mut self, reason: DenialReason) -> Self {
        self.reason = Some(reason);
        self
    }

    /// Filters records after a given time.
    #[must_use]
    pub fn after(mut self, time: DateTime<Utc>) -> Self {
        self.after = Some(time);
        self
    }

    /// Filters records before a given time.
    #[must_use]
    pub fn before(mut self, time: DateTime<Utc>) -> Self {
        self.before = Some(time);
        self
    }

    /// Limits the number of returned records.
    #[must_use]
    pub fn limit(mut self, n: usize) -> Self {
        self.limit = Some(n);
        self
    }

    fn matches(&self, record: &AccessRecord) -> bool {
        if let Some(ref identifier) = self.identifier {
            if &record.identifier != identifier {
                return false;
            }
        }

        if let Some(ref caller) = self.caller {
            if &record.caller != caller {
                return false;
            }
        }

        if self.action.is_some_and(|a| a != record.action) {
            return false;
        }

        if self.outcome.is_some_and(|o| o != record.outcome) {
            return false;
        }

        if self.reason.is_some() && self.reason != record.reason {
            return false;
        }

        if let Some(after) = self.after {
            if record.timestamp <= after {
                return false;
            }
        }

        if let Some(before) = self.before {
            if record.timestamp >= before {
                return false;
            }
        }

        true
    }
}

/// An append-only, in-memory audit log.
pub struct MemoryAuditLog {
    records: RwLock<Vec<AccessRecord>>,
}

impl MemoryAuditLog {
    /// Creates a new empty audit log.
    #[must_use]
    pub fn new() -> Self {
        Self {
            records: RwLock::new(Vec::new()),
        }
    }

    /// Queries the log with the given filter.
    ///
    /// Returns matching records in append order (oldest first). A limit
    /// keeps the newest records.
    #[must_use]
    pub fn query(&self, filter: &AuditFilter) -> Vec<AccessRecord> {
        let records = self.records.read();

        let mut results: Vec<AccessRecord> = records
            .iter()
            .filter(|r| filter.matches(r))
            .cloned()
            .collect();

        if let Some(limit) = filter.limit {
            let skip = results.len().saturating_sub(limit);
            results.drain(..skip);
        }

        results
    }

    /// Counts records matching the filter.
    #[must_use]
    pub fn count(&self, filter: &AuditFilter) -> usize {
        self.records.read().iter().filter(|r| filter.matches(r)).count()
    }

    /// Returns a copy of every record in append order.
    #[must_use]
    pub fn records(&self) -> Vec<AccessRecord> {
        self.records.read().clone()
    }

    /// Returns the total number of records.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    /// Returns true if the log is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl AuditSink for MemoryAuditLog {
    fn append(&self, record: &AccessRecord) -> Result<()> {
        self.records.write().push(record.clone());
        Ok(())
    }
}

impl Default for MemoryAuditLog {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for MemoryAuditLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let len = self.len();
        f.debug_struct("MemoryAuditLog")
            .field("records_count", &len)
            .finish()
    }
}
