//! End-to-end tests for the acquire / use / release flow.
//!
//! These tests verify:
//! 1. Authorization is checked before the store is touched
//! 2. Granted handles expose the payload until released
//! 3. Leases are wiped when their lifetime elapses
//! 4. Store, not-found and integrity failures are refused and recorded
//! 5. Authorization resets and policy reloads

mod helpers;

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;

use helpers::{caller, config, service, Harness, PAYLOAD, SERVICE};
use keyguard::{
    Caller, CallerId, CallerPolicy, Digest, EncryptedMemoryStore, GuardConfig, GuardError,
    LeaseState, SecretGuard, SecretId, GUARD_CALLER,
};
use keyguard_audit::{AccessAction, AccessOutcome, AuditFilter, DenialReason};

// ============================================================================
// Authorization
// ============================================================================

#[test]
fn test_unauthorized_caller_is_denied_without_store_lookup() {
    let h = Harness::new(config());

    let result = h.guard.acquire("wallet1", &caller("bob"));

    assert!(matches!(
        result,
        Err(GuardError::Authorization { ref identifier, ref caller })
            if identifier == "wallet1" && caller == "bob"
    ));
    assert_eq!(h.store.lookups(), 0);

    let records = h.audit.records();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].identifier, "wallet1");
    assert_eq!(records[0].caller, "bob");
    assert_eq!(records[0].action, AccessAction::Acquire);
    assert_eq!(records[0].outcome, AccessOutcome::Denied);
    assert_eq!(records[0].reason, Some(DenialReason::UnauthorizedCaller));
}

#[test]
fn test_empty_policy_denies_everyone() {
    let h = Harness::new(GuardConfig::new(SERVICE).with_watchdog_interval_ms(5_000));

    for name in ["alice", "bob", "root"] {
        assert!(matches!(
            h.guard.acquire("wallet1", &caller(name)),
            Err(GuardError::Authorization { .. })
        ));
    }
    assert_eq!(h.denied(DenialReason::UnauthorizedCaller), 3);
    assert_eq!(h.store.lookups(), 0);
}

#[test]
fn test_token_pinned_caller_must_present_matching_token() {
    let h = Harness::new(
        config().with_token_caller("signer-bot", Digest::of(b"bot-token")),
    );

    let with_token = Caller::with_token("signer-bot", b"bot-token").expect("caller");
    let wrong_token = Caller::with_token("signer-bot", b"guess").expect("caller");
    let no_token = caller("signer-bot");

    assert!(h.guard.acquire("wallet1", &with_token).is_ok());
    assert!(matches!(
        h.guard.acquire("wallet1", &wrong_token),
        Err(GuardError::Authorization { .. })
    ));
    assert!(matches!(
        h.guard.acquire("wallet1", &no_token),
        Err(GuardError::Authorization { .. })
    ));
    assert_eq!(h.store.lookups(), 1);
}

#[test]
fn test_reload_policy_grants_and_revokes() {
    let h = Harness::new(config());
    let bob = caller("bob");

    assert!(h.guard.acquire("wallet1", &bob).is_err());

    h.guard.reload_policy(CallerPolicy::allow_callers([
        CallerId::new("bob").expect("caller id"),
    ]));
    let held = h.guard.acquire("wallet1", &bob).expect("bob is now allowed");
    assert!(matches!(
        h.guard.acquire("wallet1", &caller("alice")),
        Err(GuardError::Authorization { .. })
    ));

    assert!(held.is_active());
}

// ============================================================================
// Acquire and Release
// ============================================================================

#[test]
fn test_granted_handle_exposes_payload_until_released() {
    let h = Harness::new(config());

    let secret = h.guard.acquire("wallet1", &caller("alice")).expect("acquire");
    let seen = secret.expose(|bytes| bytes.to_vec()).expect("active");
    assert_eq!(seen, PAYLOAD);
    assert_eq!(h.guard.active_leases(), 1);

    secret.release();

    assert_eq!(secret.state(), LeaseState::Released);
    assert!(matches!(
        secret.expose(|_| ()),
        Err(GuardError::SecretExpired { .. })
    ));
    assert_eq!(h.guard.active_leases(), 0);

    let records = h.audit.records();
    assert_eq!(records.len(), 2);
    assert_eq!(records[0].outcome, AccessOutcome::Granted);
    assert_eq!(records[1].outcome, AccessOutcome::Released);
    assert_eq!(records[0].lease_id, Some(secret.lease_id()));
    assert_eq!(records[1].lease_id, Some(secret.lease_id()));
}

#[test]
fn test_dropping_handle_releases_lease() {
    let h = Harness::new(config());

    {
        let secret = h.guard.acquire("wallet1", &caller("alice")).expect("acquire");
        assert!(secret.is_active());
    }

    assert_eq!(h.guard.active_leases(), 0);
    assert_eq!(h.count(AccessAction::Release), 1);
}

#[test]
fn test_release_is_idempotent() {
    let h = Harness::new(config());
    let secret = h.guard.acquire("wallet1", &caller("alice")).expect("acquire");

    for _ in 0..3 {
        secret.release();
    }
    drop(secret);

    assert_eq!(h.count(AccessAction::Release), 1);
}

#[test]
fn test_with_secret_releases_after_closure() {
    let h = Harness::new(config());

    let len = h
        .guard
        .with_secret("wallet1", &caller("alice"), |bytes| bytes.len())
        .expect("with_secret");

    assert_eq!(len, PAYLOAD.len());
    assert_eq!(h.guard.active_leases(), 0);
    assert_eq!(h.granted(), 1);
    assert_eq!(h.count(AccessAction::Release), 1);
}

#[test]
fn test_with_secret_releases_when_closure_panics() {
    let h = Harness::new(config());
    let alice = caller("alice");

    let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
        h.guard.with_secret("wallet1", &alice, |_| -> usize {
            panic!("signer crashed")
        })
    }));

    assert!(outcome.is_err());
    assert_eq!(h.guard.active_leases(), 0);
    assert_eq!(h.count(AccessAction::Release), 1);
}

#[test]
fn test_concurrent_shared_handles_are_independent() {
    let h = Harness::new(config());
    let alice = caller("alice");

    let first = h.guard.acquire("wallet1", &alice).expect("acquire");
    let second = h.guard.acquire("wallet1", &alice).expect("acquire");
    assert_ne!(first.lease_id(), second.lease_id());

    first.release();
    assert!(second.is_active());
    assert_eq!(second.expose(|b| b.to_vec()).expect("active"), PAYLOAD);
}

// ============================================================================
// Expiry
// ============================================================================

#[test]
fn test_lease_expires_after_lifetime() {
    let h = Harness::new(config());
    let secret = h.guard.acquire("wallet1", &caller("alice")).expect("acquire");

    h.clock.advance_secs(4);
    assert_eq!(h.guard.sweep_expired(), 0);
    assert!(secret.expose(|_| ()).is_ok());

    h.clock.advance_secs(2);
    assert_eq!(h.guard.sweep_expired(), 1);

    assert_eq!(secret.state(), LeaseState::Expired);
    assert!(matches!(
        secret.expose(|_| ()),
        Err(GuardError::SecretExpired { ref identifier, .. }) if identifier == "wallet1"
    ));

    let expired = h
        .audit
        .query(&AuditFilter::new().with_outcome(AccessOutcome::Expired));
    assert_eq!(expired.len(), 1);
    assert_eq!(expired[0].caller, "alice");
    assert_eq!(expired[0].lease_id, Some(secret.lease_id()));
}

#[test]
fn test_release_after_expiry_records_nothing() {
    let h = Harness::new(config());
    let secret = h.guard.acquire("wallet1", &caller("alice")).expect("acquire");

    h.clock.advance_secs(6);
    h.guard.sweep_expired();
    secret.release();
    drop(secret);

    assert_eq!(h.count(AccessAction::Expire), 1);
    assert_eq!(h.count(AccessAction::Release), 0);
}

#[test]
fn test_short_lifetime_expires_first() {
    let h = Harness::new(config());
    let alice = caller("alice");

    let short = h
        .guard
        .acquire_with_lifetime("wallet1", &alice, Duration::from_secs(1))
        .expect("acquire");
    let long = h.guard.acquire("wallet1", &alice).expect("acquire");

    h.clock.advance_secs(1);
    assert_eq!(h.guard.sweep_expired(), 1);
    assert!(!short.is_active());
    assert!(long.is_active());
}

// ============================================================================
// Store and Integrity Failures
// ============================================================================

#[test]
fn test_store_unavailable_is_refused_and_retryable() {
    let h = Harness::new(config());
    h.store.set_available(false);

    let err = h
        .guard
        .acquire("wallet1", &caller("alice"))
        .expect_err("store is offline");

    assert!(matches!(err, GuardError::StoreUnavailable { .. }));
    assert!(err.is_retryable());
    assert_eq!(h.granted(), 0);
    assert_eq!(h.denied(DenialReason::StoreUnavailable), 1);

    h.store.set_available(true);
    assert!(h.guard.acquire("wallet1", &caller("alice")).is_ok());
}

#[test]
fn test_missing_secret_is_not_found() {
    let h = Harness::new(config());

    let err = h
        .guard
        .acquire("wallet2", &caller("alice"))
        .expect_err("nothing stored");

    assert!(matches!(err, GuardError::SecretNotFound { .. }));
    assert!(!err.is_retryable());
    assert_eq!(h.denied(DenialReason::NotFound), 1);
}

#[test]
fn test_integrity_pin_mismatch_is_refused() {
    let h = Harness::new(config().with_integrity_pin("wallet1", Digest::of(b"other payload")));

    let err = h
        .guard
        .acquire("wallet1", &caller("alice"))
        .expect_err("digest does not match");

    assert!(matches!(err, GuardError::IntegrityCheckFailed { .. }));
    assert_eq!(h.denied(DenialReason::IntegrityCheckFailed), 1);
    assert_eq!(h.guard.active_leases(), 0);
}

#[test]
fn test_integrity_pin_match_is_granted() {
    let h = Harness::new(config().with_integrity_pin("wallet1", Digest::of(PAYLOAD)));

    assert!(h.guard.acquire("wallet1", &caller("alice")).is_ok());
}

#[test]
fn test_invalid_identifier_never_reaches_store() {
    let h = Harness::new(config());

    for bad in ["", "../wallet1", "wallet 1", "-wallet"] {
        assert!(matches!(
            h.guard.acquire(bad, &caller("alice")),
            Err(GuardError::InvalidIdentifier { .. })
        ));
    }
    assert_eq!(h.store.lookups(), 0);
}

// ============================================================================
// Authorization Reset
// ============================================================================

#[test]
fn test_reset_authorization_forces_fresh_lookup() {
    let h = Harness::new(config());
    let held = h.guard.acquire("wallet1", &caller("alice")).expect("acquire");

    h.guard.reset_authorization("wallet1").expect("reset");

    assert!(held.is_active());
    assert!(matches!(
        h.guard.acquire("wallet1", &caller("alice")),
        Err(GuardError::SecretNotFound { .. })
    ));

    let resets = h
        .audit
        .query(&AuditFilter::new().with_action(AccessAction::ResetAuthorization));
    assert_eq!(resets.len(), 1);
    assert_eq!(resets[0].caller, GUARD_CALLER);
    assert_eq!(resets[0].outcome, AccessOutcome::Reset);
}

#[test]
fn test_reset_authorization_of_unknown_secret_succeeds() {
    let h = Harness::new(config());

    h.guard.reset_authorization("never-stored").expect("reset");
    assert_eq!(h.count(AccessAction::ResetAuthorization), 1);
}

#[test]
fn test_reset_authorization_with_store_offline_fails() {
    let h = Harness::new(config());
    h.store.set_available(false);

    let err = h
        .guard
        .reset_authorization("wallet1")
        .expect_err("store is offline");
    assert!(matches!(err, GuardError::StoreUnavailable { .. }));

    let records = h.audit.records();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].outcome, AccessOutcome::Denied);
    assert_eq!(records[0].reason, Some(DenialReason::StoreUnavailable));

    h.store.set_available(true);
    assert!(h.store.contains(&service(), &SecretId::new("wallet1").expect("id")));
}

// ============================================================================
// Configuration
// ============================================================================

#[test]
fn test_guard_from_config_file() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("keyguard.json");
    std::fs::write(
        &path,
        format!(
            r#"{{
                "service_id": "{SERVICE}",
                "max_lifetime_secs": 10,
                "callers": [{{ "name": "alice" }}],
                "integrity": {{ "wallet1": "{}" }}
            }}"#,
            Digest::of(PAYLOAD).to_hex()
        ),
    )
    .expect("write config");

    let config = GuardConfig::from_file(&path).expect("load config");
    let store = Arc::new(EncryptedMemoryStore::ephemeral());
    store
        .put(&service(), &SecretId::new("wallet1").expect("id"), PAYLOAD)
        .expect("put");

    let guard = SecretGuard::builder(config).store(store).build().expect("build");
    assert_eq!(guard.config().max_lifetime_secs, 10);
    assert_eq!(guard.service().as_str(), SERVICE);
    assert!(guard.watchdog_running());

    let secret = guard.acquire("wallet1", &caller("alice")).expect("acquire");
    assert_eq!(
        secret.expires_at() - secret.acquired_at(),
        chrono::Duration::seconds(10)
    );
}
