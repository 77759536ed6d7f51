//! Leases and scoped handles.
//!
//! A [`Lease`] owns one acquired payload from grant until it is released or
//! expires. The payload is wiped at that moment, whichever path gets there
//! first, and the lease never becomes active again.
//!
//! The lifecycle state is an atomic apart from the payload lock, so closing
//! a lease never waits on a reader. If a reader is mid-`expose` when the
//! lease closes, the reader wipes the payload on its way out.
//!
//! A [`ScopedSecret`] is the caller's handle to a lease. Dropping it
//! releases the lease, so every exit path from the caller's scope
//! (including `?` and unwinding) wipes the payload.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use uuid::Uuid;
use zeroize::Zeroize;

use crate::caller::CallerId;
use crate::error::{GuardError, Result};
use crate::guard::GuardInner;
use crate::types::{SecretId, SecretValue};

/// Where a lease is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LeaseState {
    /// The payload is readable.
    Active,
    /// The holder released the lease; the payload is gone.
    Released,
    /// The lifetime elapsed; the payload is gone.
    Expired,
}

impl std::fmt::Display for LeaseState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Active => "active",
            Self::Released => "released",
            Self::Expired => "expired",
        })
    }
}

impl LeaseState {
    const fn to_u8(self) -> u8 {
        match self {
            Self::Active => 0,
            Self::Released => 1,
            Self::Expired => 2,
        }
    }

    const fn from_u8(raw: u8) -> Self {
        match raw {
            0 => Self::Active,
            1 => Self::Released,
            _ => Self::Expired,
        }
    }
}

/// One acquired secret, shared by its handle and the guard's registry.
pub(crate) struct Lease {
    pub(crate) id: Uuid,
    pub(crate) identifier: SecretId,
    pub(crate) caller: CallerId,
    pub(crate) acquired_at: DateTime<Utc>,
    pub(crate) deadline: DateTime<Utc>,
    pub(crate) exclusive: bool,
    state: AtomicU8,
    payload: Mutex<Option<SecretValue>>,
}

impl Lease {
    pub(crate) fn new(
        identifier: SecretId,
        caller: CallerId,
        acquired_at: DateTime<Utc>,
        deadline: DateTime<Utc>,
        payload: SecretValue,
        exclusive: bool,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            identifier,
            caller,
            acquired_at,
            deadline,
            exclusive,
            state: AtomicU8::new(LeaseState::Active.to_u8()),
            payload: Mutex::new(Some(payload)),
        }
    }

    pub(crate) fn state(&self) -> LeaseState {
        LeaseState::from_u8(self.state.load(Ordering::SeqCst))
    }

    pub(crate) fn is_due(&self, now: DateTime<Utc>) -> bool {
        now >= self.deadline
    }

    /// Moves an active lease to `to` and wipes the payload.
    ///
    /// Returns false if the lease was already closed, so exactly one caller
    /// wins when release and expiry race. Never blocks: if a reader holds
    /// the payload, the reader wipes it when its closure returns.
    pub(crate) fn close(&self, to: LeaseState) -> bool {
        debug_assert!(to != LeaseState::Active);
        if self
            .state
            .compare_exchange(
                LeaseState::Active.to_u8(),
                to.to_u8(),
                Ordering::SeqCst,
                Ordering::SeqCst,
            )
            .is_err()
        {
            return false;
        }
        if let Some(mut payload) = self.payload.try_lock() {
            wipe(&mut payload);
        }
        true
    }

    /// Wipes the payload if the lease closed while it was being read.
    fn wipe_if_closed(&self) {
        if self.state() != LeaseState::Active {
            wipe(&mut self.payload.lock());
        }
    }

    fn gone(&self) -> GuardError {
        GuardError::SecretExpired {
            identifier: self.identifier.to_string(),
            lease: self.id.to_string(),
        }
    }
}

fn wipe(payload: &mut Option<SecretValue>) {
    if let Some(mut value) = payload.take() {
        value.zeroize();
    }
}

/// Runs [`Lease::wipe_if_closed`] after the payload lock is dropped, on
/// unwind too.
struct ReadExit<'a>(&'a Lease);

impl Drop for ReadExit<'_> {
    fn drop(&mut self) {
        self.0.wipe_if_closed();
    }
}

/// Handle to an acquired secret.
///
/// The payload is only reachable through [`ScopedSecret::expose`]. The
/// handle releases its lease when dropped.
pub struct ScopedSecret {
    lease: Arc<Lease>,
    guard: Arc<GuardInner>,
    audit_persisted: bool,
}

impl ScopedSecret {
    pub(crate) fn new(lease: Arc<Lease>, guard: Arc<GuardInner>, audit_persisted: bool) -> Self {
        Self {
            lease,
            guard,
            audit_persisted,
        }
    }

    /// Runs `f` with the payload borrowed.
    ///
    /// `f` must not release or read this handle again. A slow `f` does not
    /// hold up expiry: if the lease expires while `f` runs, the state flips
    /// at once and the payload is wiped as soon as `f` returns.
    ///
    /// Fails with [`GuardError::SecretExpired`] once the lifetime has
    /// elapsed or the handle was released. Reading past the deadline
    /// expires the lease on the spot, even if the watchdog has not swept
    /// it yet.
    pub fn expose<R>(&self, f: impl FnOnce(&[u8]) -> R) -> Result<R> {
        let now = self.guard.now();

        if self.lease.state() != LeaseState::Active {
            return Err(self.lease.gone());
        }

        if self.lease.is_due(now) {
            self.guard.expire(&self.lease);
            return Err(self.lease.gone());
        }

        let _exit = ReadExit(&self.lease);
        let payload = self.lease.payload.lock();
        if self.lease.state() != LeaseState::Active {
            return Err(self.lease.gone());
        }
        match payload.as_ref() {
            Some(value) => Ok(f(value.as_bytes())),
            None => Err(self.lease.gone()),
        }
    }

    /// Releases the lease and wipes the payload.
    ///
    /// Idempotent: releasing a released or expired handle does nothing.
    pub fn release(&self) {
        self.guard.release(&self.lease);
    }

    /// The secret this handle refers to.
    #[must_use]
    pub fn identifier(&self) -> &SecretId {
        &self.lease.identifier
    }

    /// The caller that acquired it.
    #[must_use]
    pub fn caller(&self) -> &CallerId {
        &self.lease.caller
    }

    /// The lease id, as written in audit records.
    #[must_use]
    pub fn lease_id(&self) -> Uuid {
        self.lease.id
    }

    /// When the secret was acquired.
    #[must_use]
    pub fn acquired_at(&self) -> DateTime<Utc> {
        self.lease.acquired_at
    }

    /// When the secret will be forcibly invalidated.
    #[must_use]
    pub fn expires_at(&self) -> DateTime<Utc> {
        self.lease.deadline
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> LeaseState {
        self.lease.state()
    }

    /// Returns true while the payload is readable.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.state() == LeaseState::Active
    }

    /// Whether the grant record reached the audit sink.
    #[must_use]
    pub fn audit_persisted(&self) -> bool {
        self.audit_persisted
    }
}

impl Drop for ScopedSecret {
    fn drop(&mut self) {
        self.release();
    }
}

impl std::fmt::Debug for ScopedSecret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScopedSecret")
            .field("lease_id", &self.lease.id)
            .field("identifier", &self.lease.identifier)
            .field("caller", &self.lease.caller)
            .field("state", &self.state())
            .field("expires_at", &self.lease.deadline)
            .field("payload", &"[REDACTED]")
            .finish()
    }
}
