//! Secret store seam.
//!
//! The guard does not own secrets; it reads them from a [`SecretStore`]
//! keyed by `(service, identifier)`. [`EncryptedMemoryStore`] is the
//! bundled in-process backend.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use parking_lot::RwLock;
use tracing::debug;

use crate::encryption::{decrypt, encrypt, SecretKey};
use crate::error::StoreError;
use crate::types::{SecretId, SecretValue, ServiceId};

/// Backend the guard reads secrets from.
pub trait SecretStore: Send + Sync {
    /// Fetches the payload stored under `(service, id)`.
    ///
    /// Returns `Ok(None)` if nothing is stored there.
    fn get(&self, service: &ServiceId, id: &SecretId) -> Result<Option<SecretValue>, StoreError>;

    /// Removes the entry for `(service, id)`, including any cached trust
    /// grant a keychain-style backend keeps for it.
    ///
    /// Returns `Ok(false)` if there was nothing to remove.
    fn delete(&self, service: &ServiceId, id: &SecretId) -> Result<bool, StoreError>;
}

/// In-process store that keeps payloads encrypted at rest.
///
/// Every payload is sealed under a key derived from the master key for its
/// `(service, id)` pair. The store can be switched offline to exercise the
/// guard's unavailable-store path.
pub struct EncryptedMemoryStore {
    master_key: SecretKey,
    entries: RwLock<HashMap<(ServiceId, SecretId), Vec<u8>>>,
    available: AtomicBool,
    lookups: AtomicU64,
}

impl EncryptedMemoryStore {
    /// Creates an empty store sealed under `master_key`.
    #[must_use]
    pub fn new(master_key: SecretKey) -> Self {
        Self {
            master_key,
            entries: RwLock::new(HashMap::new()),
            available: AtomicBool::new(true),
            lookups: AtomicU64::new(0),
        }
    }

    /// Creates an empty store with a freshly generated master key.
    #[must_use]
    pub fn ephemeral() -> Self {
        Self::new(SecretKey::generate())
    }

    /// Stores `value` under `(service, id)`, replacing any previous value.
    pub fn put(&self, service: &ServiceId, id: &SecretId, value: &[u8]) -> Result<(), StoreError> {
        self.ensure_available()?;
        let key = self.master_key.derive_for(service, id);
        let sealed = encrypt(&key, value)?;
        self.entries
            .write()
            .insert((service.clone(), id.clone()), sealed);
        debug!(service = %service, identifier = %id, "stored secret");
        Ok(())
    }

    /// Marks the store reachable or unreachable.
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Returns how many `get` calls reached the store.
    #[must_use]
    pub fn lookups(&self) -> u64 {
        self.lookups.load(Ordering::SeqCst)
    }

    /// Returns true if `(service, id)` has a stored value.
    #[must_use]
    pub fn contains(&self, service: &ServiceId, id: &SecretId) -> bool {
        self.entries
            .read()
            .contains_key(&(service.clone(), id.clone()))
    }

    /// Returns the number of stored secrets.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Returns true if the store is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn ensure_available(&self) -> Result<(), StoreError> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(StoreError::Unavailable {
                reason: "store is offline".to_string(),
            })
        }
    }
}

impl SecretStore for EncryptedMemoryStore {
    fn get(&self, service: &ServiceId, id: &SecretId) -> Result<Option<SecretValue>, StoreError> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        self.ensure_available()?;

        let entries = self.entries.read();
        let Some(sealed) = entries.get(&(service.clone(), id.clone())) else {
            return Ok(None);
        };

        let key = self.master_key.derive_for(service, id);
        let plaintext = decrypt(&key, sealed)?;
        Ok(Some(SecretValue::new(plaintext)))
    }

    fn delete(&self, service: &ServiceId, id: &SecretId) -> Result<bool, StoreError> {
        self.ensure_available()?;
        let removed = self
            .entries
            .write()
            .remove(&(service.clone(), id.clone()))
            .is_some();
        Ok(removed)
    }
}

impl std::fmt::Debug for EncryptedMemoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EncryptedMemoryStore")
            .field("secrets_count", &self.len())
            .field("available", &self.available.load(Ordering::SeqCst))
            .field("master_key", &"[REDACTED]")
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn service() -> ServiceId {
        ServiceId::new("svc").expect("valid service")
    }

    fn secret(name: &str) -> SecretId {
        SecretId::new(name).expect("valid id")
    }

    #[test]
    fn store_put_and_get() {
        let store = EncryptedMemoryStore::ephemeral();
        store
            .put(&service(), &secret("wallet1"), b"secretpayload")
            .expect("put");

        let value = store
            .get(&service(), &secret("wallet1"))
            .expect("get")
            .expect("present");
        assert_eq!(value.as_bytes(), b"secretpayload");
        assert_eq!(store.lookups(), 1);
    }

    #[test]
    fn store_get_missing_is_none() {
        let store = EncryptedMemoryStore::ephemeral();
        let value = store.get(&service(), &secret("missing")).expect("get");
        assert!(value.is_none());
    }

    #[test]
    fn store_is_namespaced_by_service() {
        let store = EncryptedMemoryStore::ephemeral();
        let other = ServiceId::new("other").expect("valid");
        store
            .put(&service(), &secret("wallet1"), b"one")
            .expect("put");

        assert!(store.get(&other, &secret("wallet1")).expect("get").is_none());
        assert!(store.contains(&service(), &secret("wallet1")));
        assert!(!store.contains(&other, &secret("wallet1")));
    }

    #[test]
    fn store_does_not_keep_plaintext() {
        let store = EncryptedMemoryStore::ephemeral();
        store
            .put(&service(), &secret("wallet1"), b"secretpayload")
            .expect("put");

        let entries = store.entries.read();
        let sealed = entries
            .get(&(service(), secret("wallet1")))
            .expect("stored");
        assert!(!sealed
            .windows(b"secretpayload".len())
            .any(|w| w == b"secretpayload"));
    }

    #[test]
    fn store_delete_reports_presence() {
        let store = EncryptedMemoryStore::ephemeral();
        store
            .put(&service(), &secret("wallet1"), b"x")
            .expect("put");

        assert!(store.delete(&service(), &secret("wallet1")).expect("delete"));
        assert!(!store.delete(&service(), &secret("wallet1")).expect("delete"));
        assert!(store.is_empty());
    }

    #[test]
    fn offline_store_fails_every_operation() {
        let store = EncryptedMemoryStore::ephemeral();
        store.set_available(false);

        assert!(matches!(
            store.get(&service(), &secret("wallet1")),
            Err(StoreError::Unavailable { .. })
        ));
        assert!(matches!(
            store.delete(&service(), &secret("wallet1")),
            Err(StoreError::Unavailable { .. })
        ));
        assert!(store.put(&service(), &secret("wallet1"), b"x").is_err());

        store.set_available(true);
        assert!(store.get(&service(), &secret("wallet1")).is_ok());
    }

    #[test]
    fn store_debug_redacts_key() {
        let debug = format!("{:?}", EncryptedMemoryStore::ephemeral());
        assert!(debug.contains("[REDACTED]"));
        assert!(debug.contains("EncryptedMemoryStore"));
    }
}
