//! Encryption at rest for [`EncryptedMemoryStore`](crate::store::EncryptedMemoryStore).
//!
//! Payloads are sealed with ChaCha20-Poly1305 under a key derived per
//! `(service, identifier)` from a master key with BLAKE3.

use chacha20poly1305::{
    aead::{Aead, KeyInit},
    ChaCha20Poly1305, Nonce,
};
use rand::RngCore;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::StoreError;
use crate::types::{SecretId, ServiceId};

/// Size of the encryption key in bytes (256 bits).
pub const KEY_SIZE: usize = 32;

/// Size of the nonce in bytes (96 bits).
pub const NONCE_SIZE: usize = 12;

/// Size of the authentication tag in bytes (128 bits).
pub const TAG_SIZE: usize = 16;

/// A symmetric key, zeroized when dropped.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct SecretKey {
    bytes: [u8; KEY_SIZE],
}

impl SecretKey {
    /// Generates a new random key.
    #[must_use]
    pub fn generate() -> Self {
        let mut bytes = [0u8; KEY_SIZE];
        rand::thread_rng().fill_bytes(&mut bytes);
        Self { bytes }
    }

    /// Creates a key from exactly [`KEY_SIZE`] raw bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, StoreError> {
        let bytes: [u8; KEY_SIZE] = bytes.try_into().map_err(|_| StoreError::Backend {
            reason: format!("key must be exactly {KEY_SIZE} bytes, got {}", bytes.len()),
        })?;
        Ok(Self { bytes })
    }

    /// Derives the key for one secret of one service.
    #[must_use]
    pub fn derive_for(&self, service: &ServiceId, id: &SecretId) -> Self {
        let context = format!("keyguard store v1 {service} {id}");
        Self {
            bytes: blake3::derive_key(&context, &self.bytes),
        }
    }

    #[cfg(test)]
    fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }
}

impl std::fmt::Debug for SecretKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecretKey")
            .field("bytes", &"[REDACTED]")
            .finish()
    }
}

/// Encrypts `plaintext`; the output is `nonce || ciphertext || tag`.
pub fn encrypt(key: &SecretKey, plaintext: &[u8]) -> Result<Vec<u8>, StoreError> {
    let cipher = ChaCha20Poly1305::new_from_slice(&key.bytes).map_err(|e| StoreError::Backend {
        reason: format!("failed to create cipher: {e}"),
    })?;

    let mut nonce_bytes = [0u8; NONCE_SIZE];
    rand::thread_rng().fill_bytes(&mut nonce_bytes);
    let nonce = Nonce::from_slice(&nonce_bytes);

    let ciphertext = cipher
        .encrypt(nonce, plaintext)
        .map_err(|e| StoreError::Backend {
            reason: format!("encryption failed: {e}"),
        })?;

    let mut output = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
    output.extend_from_slice(&nonce_bytes);
    output.extend_from_slice(&ciphertext);

    Ok(output)
}

/// Decrypts data produced by [`encrypt`].
///
/// Fails if the input is too short, the key is wrong or the data was
/// tampered with.
pub fn decrypt(key: &SecretKey, sealed: &[u8]) -> Result<Vec<u8>, StoreError> {
    if sealed.len() < NONCE_SIZE + TAG_SIZE {
        return Err(StoreError::Backend {
            reason: format!(
                "ciphertext too short: expected at least {} bytes, got {}",
                NONCE_SIZE + TAG_SIZE,
                sealed.len()
            ),
        });
    }

    let cipher = ChaCha20Poly1305::new_from_slice(&key.bytes).map_err(|e| StoreError::Backend {
        reason: format!("failed to create cipher: {e}"),
    })?;

    let (nonce, encrypted) = sealed.split_at(NONCE_SIZE);
    cipher
        .decrypt(Nonce::from_slice(nonce), encrypted)
        .map_err(|e| StoreError::Backend {
            reason: format!("decryption failed: {e}"),
        })
}
