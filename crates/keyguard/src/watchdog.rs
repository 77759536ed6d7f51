//! Background expiry.
//!
//! The watchdog is a plain OS thread that sweeps the lease registry on a
//! fixed interval. It holds only a weak reference to the guard, so it stops
//! on its own once the guard and every handle have been dropped.

use std::sync::Weak;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::{debug, trace};

use crate::error::{GuardError, Result};
use crate::guard::GuardInner;

/// Name of the watchdog thread.
pub const WATCHDOG_THREAD_NAME: &str = "keyguard-watchdog";

/// Handle to the running watchdog thread.
#[derive(Debug)]
pub(crate) struct Watchdog {
    handle: JoinHandle<()>,
}

impl Watchdog {
    pub(crate) fn spawn(guard: Weak<GuardInner>, interval: Duration) -> Result<Self> {
        let handle = thread::Builder::new()
            .name(WATCHDOG_THREAD_NAME.to_string())
            .spawn(move || run(&guard, interval))
            .map_err(|e| GuardError::Watchdog {
                reason: format!("failed to spawn watchdog thread: {e}"),
            })?;

        debug!(interval_ms = interval.as_millis(), "watchdog started");
        Ok(Self { handle })
    }

    /// Returns true once the thread has exited.
    pub(crate) fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

fn run(guard: &Weak<GuardInner>, interval: Duration) {
    loop {
        thread::sleep(interval);

        let Some(inner) = guard.upgrade() else {
            break;
        };

        let expired = inner.sweep_expired();
        if expired > 0 {
            trace!(expired, "watchdog sweep");
        }
    }

    debug!("watchdog stopped");
}
