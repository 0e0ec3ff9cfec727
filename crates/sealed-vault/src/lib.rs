//! # sealed-vault
//!
//! Encryption engine for sealed.
//!
//! Everything the proxy persists about the remote vault is encrypted at
//! rest with a key derived from the user's master password; this crate owns
//! that key and the blob format.
//!
//! - [`crypto`]: PBKDF2-HMAC-SHA256 key derivation (persistent salt),
//!   AES-256-GCM blobs via `ring`.
//! - [`encrypted`]: JSON values transparently encrypted into the KV store.
//! - [`memoize`]: encrypted, TTL-bounded memoization with a process-wide
//!   enable flag. The flag never gates the secrecy-critical paths below.
//! - [`session`]: encrypted session-token lifecycle and cache purge.
//! - [`error`]: unified error types; `AuthenticationFailed` is the
//!   wrong-password signal.

pub mod crypto;
pub mod encrypted;
pub mod error;
pub mod memoize;
pub mod session;

// ── re-exports ───────────────────────────────────────────────────────

pub use crypto::{DerivedKey, decrypt, derive_key, encrypt};
pub use encrypted::{get_encrypted, save_encrypted};
pub use error::{Result, VaultError};
pub use session::{CACHE_PREFIX, SESSION_TOKEN_KEY, SessionStore};
