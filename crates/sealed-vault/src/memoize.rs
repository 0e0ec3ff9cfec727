//! Encrypted memoization of expensive calls.
//!
//! A memoized value lives under
//! `memoization.<sha256(fn-name)>.<sha256(canonical-args-json)>`, encrypted
//! under the caller's derived key and carrying a TTL on the underlying KV
//! entry. The process-wide enable flag (`encryption.enabled`, default on)
//! gates only this cache: session tokens and vault snapshots go through
//! [`crate::encrypted`] directly and are always encrypted regardless of the
//! flag.

use std::time::Duration;

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE;
use ring::digest::{SHA256, digest};
use serde::Serialize;
use serde::de::DeserializeOwned;
use sealed_store::KvStore;

use crate::crypto::{self, DerivedKey};
use crate::error::Result;

/// KV key holding the memoization enable flag.
pub const ENABLED_KEY: &str = "encryption.enabled";

/// Namespace prefix for every memoized entry.
pub const MEMOIZE_PREFIX: &str = "memoization.";

/// Whether memoization is currently enabled (default: enabled).
pub fn memoize_enabled(kv: &KvStore) -> Result<bool> {
    Ok(kv.get(ENABLED_KEY)?.is_none_or(|v| v != "0"))
}

/// Flip the memoization flag.
pub fn set_memoize(kv: &KvStore, enabled: bool) -> Result<()> {
    kv.put(ENABLED_KEY, if enabled { "1" } else { "0" })?;
    Ok(())
}

/// Deterministic logical key for `(function, args)`.
///
/// Both components are hashed so arbitrary argument payloads cannot inject
/// separators into the key namespace.
pub fn memoize_key(function: &str, args: &serde_json::Value) -> String {
    let fn_hash = sha256_hex(function.as_bytes());
    // serde_json renders maps in a stable order for the same Value, so the
    // serialization is a usable canonical form.
    let args_hash = sha256_hex(args.to_string().as_bytes());
    format!("{MEMOIZE_PREFIX}{fn_hash}.{args_hash}")
}

fn sha256_hex(data: &[u8]) -> String {
    let d = digest(&SHA256, data);
    URL_SAFE.encode(d.as_ref())
}

/// Look up a memoized value. Returns `None` when memoization is disabled,
/// the entry is absent, or its TTL has elapsed.
pub fn memoize_get<T: DeserializeOwned>(
    kv: &KvStore,
    key: &DerivedKey,
    function: &str,
    args: &serde_json::Value,
) -> Result<Option<T>> {
    if !memoize_enabled(kv)? {
        return Ok(None);
    }
    let Some(blob) = kv.get(&memoize_key(function, args))? else {
        return Ok(None);
    };
    let plaintext = crypto::decrypt(key, &blob)?;
    Ok(Some(serde_json::from_slice(&plaintext)?))
}

/// Store a memoized value with `ttl` on the underlying KV entry. A no-op
/// when memoization is disabled.
pub fn memoize_set<T: Serialize>(
    kv: &KvStore,
    key: &DerivedKey,
    function: &str,
    args: &serde_json::Value,
    value: &T,
    ttl: Duration,
) -> Result<()> {
    if !memoize_enabled(kv)? {
        return Ok(());
    }
    let plaintext = serde_json::to_vec(value)?;
    let blob = crypto::encrypt(key, &plaintext)?;
    kv.put_with_ttl(&memoize_key(function, args), &blob, ttl)?;

    tracing::trace!(function = function, "memoized value");
    Ok(())
}

/// Drop every memoized entry.
pub fn memoize_clear(kv: &KvStore) -> Result<usize> {
    Ok(kv.delete_prefix(MEMOIZE_PREFIX)?)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
