//! Test helpers for guard integration tests.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::{Duration, Instant};

use keyguard::{
    Caller, EncryptedMemoryStore, GuardConfig, ManualClock, SecretGuard, SecretId, ServiceId,
};
use keyguard_audit::{AccessAction, AccessOutcome, AuditFilter, DenialReason, MemoryAuditLog};

/// Service namespace used by every test.
pub const SERVICE: &str = "wallet-signer";

/// Payload stored under `wallet1`.
pub const PAYLOAD: &[u8] = b"secretpayload";

/// Polling budget for anything that waits on the watchdog thread.
pub const WATCHDOG_TIMEOUT: Duration = Duration::from_secs(5);

/// A guard wired to an in-memory store, an in-memory audit log and a
/// manual clock.
pub struct Harness {
    pub guard: SecretGuard,
    pub store: Arc<EncryptedMemoryStore>,
    pub audit: Arc<MemoryAuditLog>,
    pub clock: ManualClock,
}

impl Harness {
    /// Builds a guard from `config` with `wallet1` already stored.
    pub fn new(config: GuardConfig) -> Self {
        let store = Arc::new(EncryptedMemoryStore::ephemeral());
        let audit = Arc::new(MemoryAuditLog::new());
        let clock = ManualClock::at_epoch();

        let harness_store = store.clone();
        let guard = SecretGuard::builder(config)
            .store(store)
            .audit_sink(audit.clone())
            .clock(Arc::new(clock.clone()))
            .build()
            .expect("guard should build");

        let harness = Self {
            guard,
            store: harness_store,
            audit,
            clock,
        };
        harness.put("wallet1", PAYLOAD);
        harness
    }

    /// Stores `payload` under `identifier` in the guard's namespace.
    pub fn put(&self, identifier: &str, payload: &[u8]) {
        self.store
            .put(&service(), &SecretId::new(identifier).expect("valid id"), payload)
            .expect("store is online");
    }

    pub fn granted(&self) -> usize {
        self.audit
            .count(&AuditFilter::new().with_outcome(AccessOutcome::Granted))
    }

    pub fn denied(&self, reason: DenialReason) -> usize {
        self.audit.count(
            &AuditFilter::new()
                .with_action(AccessAction::Acquire)
                .with_reason(reason),
        )
    }

    pub fn count(&self, action: AccessAction) -> usize {
        self.audit.count(&AuditFilter::new().with_action(action))
    }
}

/// Alice is allowed, lifetime is 5 seconds, and the watchdog is as slow as
/// the config allows, so tests drive expiry with `sweep_expired`.
pub fn config() -> GuardConfig {
    GuardConfig::new(SERVICE)
        .with_caller("alice")
        .with_max_lifetime_secs(5)
        .with_watchdog_interval_ms(5_000)
}

pub fn service() -> ServiceId {
    ServiceId::new(SERVICE).expect("valid service")
}

pub fn caller(name: &str) -> Caller {
    Caller::new(name).expect("valid caller")
}

/// Polls `check` until it holds or `timeout` elapses.
pub fn wait_until(timeout: Duration, mut check: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if check() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    check()
}
