//! The secret guard.
//!
//! Every acquisition goes through the same gate in the same order: validate
//! the identifier, check the caller against the policy, take an exclusive
//! hold if configured, fetch from the store, verify the integrity pin, then
//! grant a lease. Each decision produces exactly one audit record.
//!
//! The policy is consulted before the store is touched, so an unauthorized
//! caller never causes a store lookup.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use keyguard_audit::{AccessRecord, AuditSink, DenialReason, TracingAuditSink};
use parking_lot::{Condvar, Mutex, RwLock};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::access::CallerPolicy;
use crate::caller::{Caller, CallerId};
use crate::clock::{Clock, SystemClock};
use crate::config::GuardConfig;
use crate::error::{GuardError, Result, StoreError};
use crate::lease::{Lease, LeaseState, ScopedSecret};
use crate::store::SecretStore;
use crate::types::{Digest, SecretId, SecretValue, ServiceId};
use crate::watchdog::Watchdog;

/// Caller name recorded for actions the guard takes on its own behalf.
pub const GUARD_CALLER: &str = "keyguard";

/// Mediates all access to secrets in one service namespace.
///
/// Cheap to share: wrap it in an [`Arc`] and hand it to worker threads.
pub struct SecretGuard {
    inner: Arc<GuardInner>,
    watchdog: Watchdog,
}

/// Shared state behind a [`SecretGuard`] and its handles.
pub(crate) struct GuardInner {
    config: GuardConfig,
    service: ServiceId,
    max_lifetime: Duration,
    policy: RwLock<CallerPolicy>,
    integrity: HashMap<SecretId, Digest>,
    store: Arc<dyn SecretStore>,
    audit: Arc<dyn AuditSink>,
    clock: Arc<dyn Clock>,
    leases: Mutex<HashMap<Uuid, Arc<Lease>>>,
    holds: Mutex<HashSet<SecretId>>,
    hold_freed: Condvar,
    audit_failures: AtomicU64,
}

impl SecretGuard {
    /// Starts building a guard from `config`.
    #[must_use]
    pub fn builder(config: GuardConfig) -> SecretGuardBuilder {
        SecretGuardBuilder::new(config)
    }

    /// Acquires `identifier` for `caller` with the configured maximum
    /// lifetime.
    ///
    /// # Errors
    ///
    /// - [`GuardError::InvalidIdentifier`] if `identifier` is malformed.
    /// - [`GuardError::Authorization`] if the policy does not allow `caller`.
    /// - [`GuardError::LockTimeout`] if an exclusive hold is not freed in time.
    /// - [`GuardError::StoreUnavailable`] if the store cannot be reached.
    /// - [`GuardError::SecretNotFound`] if nothing is stored under `identifier`.
    /// - [`GuardError::IntegrityCheckFailed`] if the payload does not match its pin.
    /// - [`GuardError::AuditWriteFailure`] if audit is required and the grant
    ///   record could not be written.
    pub fn acquire(&self, identifier: &str, caller: &Caller) -> Result<ScopedSecret> {
        self.acquire_with_lifetime(identifier, caller, self.inner.max_lifetime)
    }

    /// Acquires with a shorter lifetime.
    ///
    /// `lifetime` is clamped to the configured maximum.
    pub fn acquire_with_lifetime(
        &self,
        identifier: &str,
        caller: &Caller,
        lifetime: Duration,
    ) -> Result<ScopedSecret> {
        self.inner.acquire(identifier, caller, lifetime)
    }

    /// Releases a handle early. Same as [`ScopedSecret::release`].
    pub fn release(&self, secret: &ScopedSecret) {
        secret.release();
    }

    /// Acquires, runs `f` on the payload, and releases before returning.
    ///
    /// The lease is released even if `f` panics.
    pub fn with_secret<R>(
        &self,
        identifier: &str,
        caller: &Caller,
        f: impl FnOnce(&[u8]) -> R,
    ) -> Result<R> {
        let secret = self.acquire(identifier, caller)?;
        let result = secret.expose(f);
        secret.release();
        result
    }

    /// Removes the stored secret and any trust grant the store keeps for
    /// it, so the next acquisition starts from scratch.
    ///
    /// Succeeds whether or not anything was stored. Leases already granted
    /// keep running until they are released or expire.
    pub fn reset_authorization(&self, identifier: &str) -> Result<()> {
        self.inner.reset_authorization(identifier)
    }

    /// Replaces the caller policy. Later acquisitions use the new policy;
    /// leases already granted are unaffected.
    pub fn reload_policy(&self, policy: CallerPolicy) {
        let callers = policy.len();
        *self.inner.policy.write() = policy;
        info!(callers, "caller policy reloaded");
    }

    /// Expires every lease whose deadline has passed.
    ///
    /// The watchdog calls this on its own; it is public so callers driving
    /// a manual clock do not have to wait for the next sweep.
    pub fn sweep_expired(&self) -> usize {
        self.inner.sweep_expired()
    }

    /// Number of leases currently active.
    #[must_use]
    pub fn active_leases(&self) -> usize {
        self.inner.leases.lock().len()
    }

    /// Number of audit records that failed to reach the sink.
    #[must_use]
    pub fn audit_failures(&self) -> u64 {
        self.inner.audit_failures.load(Ordering::Relaxed)
    }

    /// The configuration the guard was built from.
    #[must_use]
    pub fn config(&self) -> &GuardConfig {
        &self.inner.config
    }

    /// The service namespace.
    #[must_use]
    pub fn service(&self) -> &ServiceId {
        &self.inner.service
    }

    /// Returns true while the watchdog thread is running.
    #[must_use]
    pub fn watchdog_running(&self) -> bool {
        !self.watchdog.is_finished()
    }
}

impl std::fmt::Debug for SecretGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecretGuard")
            .field("service", &self.inner.service)
            .field("active_leases", &self.active_leases())
            .field("audit_failures", &self.audit_failures())
            .finish_non_exhaustive()
    }
}

impl GuardInner {
    pub(crate) fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    fn acquire(
        self: &Arc<Self>,
        identifier: &str,
        caller: &Caller,
        lifetime: Duration,
    ) -> Result<ScopedSecret> {
        let id = SecretId::new(identifier)?;
        let caller_id = caller.id();
        let lifetime = chrono::Duration::from_std(lifetime.min(self.max_lifetime))
            .map_err(|e| GuardError::config(format!("lease lifetime out of range: {e}")))?;
        if self.now().checked_add_signed(lifetime).is_none() {
            return Err(GuardError::config("lease deadline is past the clock's range"));
        }

        if !self.policy.read().authorizes(caller) {
            self.deny(&id, caller_id, DenialReason::UnauthorizedCaller);
            return Err(GuardError::Authorization {
                identifier: id.to_string(),
                caller: caller_id.to_string(),
            });
        }

        let exclusive = match self.config.lock_wait() {
            Some(wait) => {
                if !self.take_hold(&id, wait) {
                    self.deny(&id, caller_id, DenialReason::LockTimeout);
                    return Err(GuardError::LockTimeout {
                        identifier: id.to_string(),
                        caller: caller_id.to_string(),
                    });
                }
                true
            }
            None => false,
        };

        let value = match self.fetch_verified(&id, caller_id) {
            Ok(value) => value,
            Err(e) => {
                if exclusive {
                    self.free_hold(&id);
                }
                return Err(e);
            }
        };

        let now = self.now();
        let deadline = now.checked_add_signed(lifetime).unwrap_or(DateTime::<Utc>::MAX_UTC);
        let lease = Arc::new(Lease::new(
            id,
            caller_id.clone(),
            now,
            deadline,
            value,
            exclusive,
        ));
        self.leases.lock().insert(lease.id, Arc::clone(&lease));

        let persisted = self.record(
            &AccessRecord::granted(lease.identifier.as_str(), caller_id.as_str(), lease.id).at(now),
        );

        if !persisted && self.config.require_audit {
            self.finish(&lease, LeaseState::Released);
            warn!(
                identifier = %lease.identifier,
                caller = %caller_id,
                "grant withdrawn: audit record not persisted"
            );
            return Err(GuardError::AuditWriteFailure {
                identifier: lease.identifier.to_string(),
                reason: "grant record could not be persisted".to_string(),
            });
        }

        debug!(
            identifier = %lease.identifier,
            caller = %caller_id,
            lease_id = %lease.id,
            expires_at = %lease.deadline,
            "secret acquired"
        );

        Ok(ScopedSecret::new(lease, Arc::clone(self), persisted))
    }

    fn fetch_verified(&self, id: &SecretId, caller: &CallerId) -> Result<SecretValue> {
        let value = match self.store.get(&self.service, id) {
            Ok(Some(value)) => value,
            Ok(None) => {
                self.deny(id, caller, DenialReason::NotFound);
                return Err(GuardError::SecretNotFound {
                    identifier: id.to_string(),
                    caller: caller.to_string(),
                });
            }
            Err(e) => {
                self.deny(id, caller, DenialReason::StoreUnavailable);
                return Err(store_unavailable(id, &e));
            }
        };

        if let Some(pin) = self.integrity.get(id) {
            if !pin.matches(&value.digest()) {
                self.deny(id, caller, DenialReason::IntegrityCheckFailed);
                return Err(GuardError::IntegrityCheckFailed {
                    identifier: id.to_string(),
                    caller: caller.to_string(),
                });
            }
        }

        Ok(value)
    }

    /// Releases `lease` if it is still active.
    pub(crate) fn release(&self, lease: &Lease) {
        if self.finish(lease, LeaseState::Released) {
            debug!(identifier = %lease.identifier, lease_id = %lease.id, "secret released");
            self.record(
                &AccessRecord::released(lease.identifier.as_str(), lease.caller.as_str(), lease.id)
                    .at(self.now()),
            );
        }
    }

    /// Expires `lease` if it is still active.
    pub(crate) fn expire(&self, lease: &Lease) -> bool {
        if !self.finish(lease, LeaseState::Expired) {
            return false;
        }
        warn!(
            identifier = %lease.identifier,
            caller = %lease.caller,
            lease_id = %lease.id,
            "secret lifetime elapsed; payload wiped"
        );
        self.record(
            &AccessRecord::expired(lease.identifier.as_str(), lease.caller.as_str(), lease.id)
                .at(self.now()),
        );
        true
    }

    pub(crate) fn sweep_expired(&self) -> usize {
        let now = self.now();
        let due: Vec<Arc<Lease>> = self
            .leases
            .lock()
            .values()
            .filter(|lease| lease.is_due(now))
            .cloned()
            .collect();

        due.iter().filter(|lease| self.expire(lease)).count()
    }

    fn reset_authorization(&self, identifier: &str) -> Result<()> {
        let id = SecretId::new(identifier)?;

        match self.store.delete(&self.service, &id) {
            Ok(existed) => {
                info!(identifier = %id, existed, "authorization reset");
                self.record(&AccessRecord::reset(id.as_str(), GUARD_CALLER).at(self.now()));
                Ok(())
            }
            Err(e) => {
                warn!(identifier = %id, error = %e, "authorization reset failed");
                self.record(
                    &AccessRecord::reset_failed(
                        id.as_str(),
                        GUARD_CALLER,
                        DenialReason::StoreUnavailable,
                    )
                    .at(self.now()),
                );
                Err(store_unavailable(&id, &e))
            }
        }
    }

    /// Closes `lease`, drops it from the registry and frees its hold.
    ///
    /// Returns false if someone else closed it first.
    fn finish(&self, lease: &Lease, to: LeaseState) -> bool {
        if !lease.close(to) {
            return false;
        }
        self.leases.lock().remove(&lease.id);
        if lease.exclusive {
            self.free_hold(&lease.identifier);
        }
        true
    }

    fn take_hold(&self, id: &SecretId, wait: Duration) -> bool {
        let deadline = Instant::now() + wait;
        let mut holds = self.holds.lock();
        while holds.contains(id) {
            if self.hold_freed.wait_until(&mut holds, deadline).timed_out() && holds.contains(id) {
                return false;
            }
        }
        holds.insert(id.clone());
        true
    }

    fn free_hold(&self, id: &SecretId) {
        self.holds.lock().remove(id);
        self.hold_freed.notify_all();
    }

    fn deny(&self, id: &SecretId, caller: &CallerId, reason: DenialReason) {
        warn!(identifier = %id, caller = %caller, reason = %reason, "secret access denied");
        self.record(&AccessRecord::denied(id.as_str(), caller.as_str(), reason).at(self.now()));
    }

    /// Appends `record` to the sink. Returns false if it was not persisted.
    fn record(&self, record: &AccessRecord) -> bool {
        match self.audit.append(record) {
            Ok(()) => true,
            Err(e) => {
                self.audit_failures.fetch_add(1, Ordering::Relaxed);
                error!(
                    identifier = %record.identifier,
                    caller = %record.caller,
                    action = %record.action,
                    outcome = %record.outcome,
                    error = %e,
                    "audit record could not be persisted"
                );
                false
            }
        }
    }
}

fn store_unavailable(id: &SecretId, e: &StoreError) -> GuardError {
    GuardError::StoreUnavailable {
        identifier: id.to_string(),
        reason: e.to_string(),
    }
}

/// Builder for [`SecretGuard`].
pub struct SecretGuardBuilder {
    config: GuardConfig,
    store: Option<Arc<dyn SecretStore>>,
    audit: Option<Arc<dyn AuditSink>>,
    clock: Option<Arc<dyn Clock>>,
    policy: Option<CallerPolicy>,
}

impl SecretGuardBuilder {
    fn new(config: GuardConfig) -> Self {
        Self {
            config,
            store: None,
            audit: None,
            clock: None,
            policy: None,
        }
    }

    /// Sets the store secrets are read from. Required.
    #[must_use]
    pub fn store(mut self, store: Arc<dyn SecretStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Sets the audit sink. Defaults to a [`TracingAuditSink`].
    #[must_use]
    pub fn audit_sink(mut self, sink: Arc<dyn AuditSink>) -> Self {
        self.audit = Some(sink);
        self
    }

    /// Sets the clock. Defaults to [`SystemClock`].
    #[must_use]
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Uses `policy` instead of the callers listed in the configuration.
    #[must_use]
    pub fn policy(mut self, policy: CallerPolicy) -> Self {
        self.policy = Some(policy);
        self
    }

    /// Validates the configuration and starts the watchdog.
    pub fn build(self) -> Result<SecretGuard> {
        self.config.validate()?;

        let store = self
            .store
            .ok_or_else(|| GuardError::config("a secret store is required"))?;
        let service = self.config.service()?;
        let policy = match self.policy {
            Some(policy) => policy,
            None => self.config.caller_policy()?,
        };
        let integrity = self.config.integrity_pins()?;
        let max_lifetime = self.config.max_lifetime();
        chrono::Duration::from_std(max_lifetime)
            .map_err(|e| GuardError::config(format!("max_lifetime_secs out of range: {e}")))?;

        if policy.is_empty() {
            warn!(service = %service, "no callers allowed; every acquisition will be denied");
        }

        let inner = Arc::new(GuardInner {
            service,
            max_lifetime,
            policy: RwLock::new(policy),
            integrity,
            store,
            audit: self
                .audit
                .unwrap_or_else(|| Arc::new(TracingAuditSink::new())),
            clock: self.clock.unwrap_or_else(|| Arc::new(SystemClock)),
            leases: Mutex::new(HashMap::new()),
            holds: Mutex::new(HashSet::new()),
            hold_freed: Condvar::new(),
            audit_failures: AtomicU64::new(0),
            config: self.config,
        });

        let watchdog = Watchdog::spawn(Arc::downgrade(&inner), inner.config.watchdog_interval())?;

        info!(
            service = %inner.service,
            max_lifetime_secs = inner.config.max_lifetime_secs,
            access_mode = ?inner.config.access_mode,
            "secret guard started"
        );

        Ok(SecretGuard { inner, watchdog })
    }
}

impl std::fmt::Debug for SecretGuardBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecretGuardBuilder")
            .field("config", &self.config)
            .field("has_store", &self.store.is_some())
            .field("has_audit_sink", &self.audit.is_some())
            .finish_non_exhaustive()
    }
}
