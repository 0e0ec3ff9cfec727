//! Password-derived keys and authenticated encryption using `ring`.
//!
//! - **Key derivation**: PBKDF2-HMAC-SHA256 (480 000 iterations, 32-byte
//!   output) from the master password and a per-installation salt. The salt
//!   is generated lazily on first use, persisted under `encryption.salt`,
//!   and never regenerated; regenerating it would invalidate every blob
//!   already on disk.
//! - **Blobs**: AES-256-GCM with a random 96-bit nonce. The wire form is
//!   `base64url(nonce || ciphertext || tag)`, one self-contained string per
//!   KV entry.
//!
//! Decrypting with the wrong key fails closed with
//! [`VaultError::AuthenticationFailed`]; corrupted or truncated blobs never
//! decrypt to garbage.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE;
use ring::aead::{AES_256_GCM, Aad, LessSafeKey, NONCE_LEN, Nonce, UnboundKey};
use ring::pbkdf2;
use ring::rand::{SecureRandom, SystemRandom};
use sealed_store::KvStore;

use crate::error::{Result, VaultError};

/// Length of the derived AES-256-GCM key in bytes.
pub const KEY_LEN: usize = 32;

/// Length of the persistent PBKDF2 salt in bytes.
pub const SALT_LEN: usize = 16;

/// KV key holding the base64-encoded per-installation salt.
pub const SALT_KEY: &str = "encryption.salt";

/// PBKDF2 iteration count.
const PBKDF2_ITERATIONS: std::num::NonZeroU32 = std::num::NonZeroU32::new(480_000).unwrap();

static PBKDF2_ALG: pbkdf2::Algorithm = pbkdf2::PBKDF2_HMAC_SHA256;

/// A 256-bit symmetric key derived from the master password.
///
/// The key travels between the UI bridge and the handlers as its base64
/// encoding (see [`DerivedKey::encode`]); the raw bytes live only in memory
/// and are intentionally absent from the `Debug` output.
#[derive(Clone, PartialEq, Eq)]
pub struct DerivedKey([u8; KEY_LEN]);

impl DerivedKey {
    /// Wrap raw key bytes. Test helper and decode target.
    pub fn from_bytes(bytes: [u8; KEY_LEN]) -> Self {
        Self(bytes)
    }

    /// Base64 (URL-safe) encoding of the key, the form handed to callers.
    pub fn encode(&self) -> String {
        URL_SAFE.encode(self.0)
    }

    /// Decode a key previously produced by [`DerivedKey::encode`].
    pub fn decode(encoded: &str) -> Result<Self> {
        let raw = URL_SAFE
            .decode(encoded)
            .map_err(|e| VaultError::InvalidKey {
                reason: e.to_string(),
            })?;
        let bytes: [u8; KEY_LEN] = raw.try_into().map_err(|_| VaultError::InvalidKey {
            reason: format!("expected {KEY_LEN} bytes"),
        })?;
        Ok(Self(bytes))
    }

    fn aead_key(&self) -> Result<LessSafeKey> {
        let unbound =
            UnboundKey::new(&AES_256_GCM, &self.0).map_err(|_| VaultError::InvalidKey {
                reason: "failed to create AES-256-GCM key".into(),
            })?;
        Ok(LessSafeKey::new(unbound))
    }
}

impl std::fmt::Debug for DerivedKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("DerivedKey(..)")
    }
}

/// Derive the local encryption key from `password`.
///
/// Loads the persistent salt from the KV store, creating and storing it on
/// first use. Deterministic across calls as long as the stored salt is
/// unchanged.
pub fn derive_key(kv: &KvStore, password: &str) -> Result<DerivedKey> {
    let salt = load_or_create_salt(kv)?;

    let mut key = [0u8; KEY_LEN];
    pbkdf2::derive(
        PBKDF2_ALG,
        PBKDF2_ITERATIONS,
        &salt,
        password.as_bytes(),
        &mut key,
    );

    tracing::debug!("derived encryption key from master password");
    Ok(DerivedKey(key))
}

fn load_or_create_salt(kv: &KvStore) -> Result<[u8; SALT_LEN]> {
    if let Some(stored) = kv.get(SALT_KEY)? {
        let raw = URL_SAFE
            .decode(&stored)
            .map_err(|e| VaultError::KeyDerivationFailed {
                reason: format!("stored salt is not valid base64: {e}"),
            })?;
        return raw
            .try_into()
            .map_err(|_| VaultError::KeyDerivationFailed {
                reason: format!("stored salt is not {SALT_LEN} bytes"),
            });
    }

    let mut salt = [0u8; SALT_LEN];
    SystemRandom::new()
        .fill(&mut salt)
        .map_err(|_| VaultError::KeyDerivationFailed {
            reason: "failed to generate random salt".into(),
        })?;
    kv.put(SALT_KEY, &URL_SAFE.encode(salt))?;

    tracing::info!("generated per-installation encryption salt");
    Ok(salt)
}

/// Encrypt `plaintext` under `key` into a self-contained base64 blob.
pub fn encrypt(key: &DerivedKey, plaintext: &[u8]) -> Result<String> {
    let mut nonce_bytes = [0u8; NONCE_LEN];
    SystemRandom::new()
        .fill(&mut nonce_bytes)
        .map_err(|_| VaultError::InvalidBlob {
            reason: "failed to generate random nonce".into(),
        })?;

    let aead = key.aead_key()?;
    let mut in_out = plaintext.to_vec();
    aead.seal_in_place_append_tag(
        Nonce::assume_unique_for_key(nonce_bytes),
        Aad::empty(),
        &mut in_out,
    )
    .map_err(|_| VaultError::InvalidBlob {
        reason: "seal failed".into(),
    })?;

    let mut blob = Vec::with_capacity(NONCE_LEN + in_out.len());
    blob.extend_from_slice(&nonce_bytes);
    blob.extend_from_slice(&in_out);

    tracing::trace!(plaintext_len = plaintext.len(), "encrypted blob");
    Ok(URL_SAFE.encode(blob))
}

/// Decrypt a blob produced by [`encrypt`].
///
/// # Errors
///
/// [`VaultError::AuthenticationFailed`] if the key does not match or the
/// ciphertext was tampered with; [`VaultError::InvalidBlob`] if the blob is
/// not even structurally a blob.
pub fn decrypt(key: &DerivedKey, blob: &str) -> Result<Vec<u8>> {
    let raw = URL_SAFE.decode(blob).map_err(|e| VaultError::InvalidBlob {
        reason: format!("bad base64: {e}"),
    })?;
    if raw.len() < NONCE_LEN + AES_256_GCM.tag_len() {
        return Err(VaultError::InvalidBlob {
            reason: "blob shorter than nonce + tag".into(),
        });
    }

    let (nonce_bytes, ciphertext) = raw.split_at(NONCE_LEN);
    let nonce = Nonce::try_assume_unique_for_key(nonce_bytes)
        .map_err(|_| VaultError::InvalidBlob {
            reason: "bad nonce".into(),
        })?;

    let aead = key.aead_key()?;
    let mut in_out = ciphertext.to_vec();
    let plaintext = aead
        .open_in_place(nonce, Aad::empty(), &mut in_out)
        .map_err(|_| VaultError::AuthenticationFailed)?;

    tracing::trace!(plaintext_len = plaintext.len(), "decrypted blob");
    Ok(plaintext.to_vec())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
