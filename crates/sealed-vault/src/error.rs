//! Vault error types.
//!
//! All encryption subsystems surface errors through [`VaultError`].  The
//! variant split matters to callers: [`VaultError::AuthenticationFailed`] is
//! the "wrong password" signal and must stay distinguishable from blob
//! corruption and from plain absence (which is `Ok(None)` on the read APIs).

/// Unified error type for the sealed encryption engine.
#[derive(Debug, thiserror::Error)]
pub enum VaultError {
    /// AEAD open failed: wrong key or tampered ciphertext. Never produced
    /// for an absent entry.
    #[error("authentication failed: wrong key or corrupted data")]
    AuthenticationFailed,

    /// The stored blob is structurally invalid (bad base64, too short).
    #[error("invalid encrypted blob: {reason}")]
    InvalidBlob { reason: String },

    /// Key derivation failed (salt generation or storage).
    #[error("key derivation failed: {reason}")]
    KeyDerivationFailed { reason: String },

    /// A key string could not be decoded into 32 raw bytes.
    #[error("invalid key encoding: {reason}")]
    InvalidKey { reason: String },

    /// Underlying KV store failure.
    #[error("store error: {0}")]
    Store(#[from] sealed_store::StoreError),

    /// JSON serialization/deserialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Convenience alias used throughout the vault crate.
pub type Result<T> = std::result::Result<T, VaultError>;
