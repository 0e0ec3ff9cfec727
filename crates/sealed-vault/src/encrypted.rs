//! Transparently encrypted JSON values in the KV store.
//!
//! `save_encrypted` / `get_encrypted` compose the store and the crypto
//! primitives: callers hand over any `Serialize` value and a logical key and
//! get encryption at rest for free. Absence is `Ok(None)`; a key mismatch
//! propagates [`VaultError::AuthenticationFailed`] so the caller can tell
//! "no cache yet" apart from "wrong password".

use serde::Serialize;
use serde::de::DeserializeOwned;
use sealed_store::KvStore;

use crate::crypto::{self, DerivedKey};
use crate::error::Result;

/// Serialize `value` as JSON, encrypt it under `key`, and store the blob
/// under `logical_key`, overwriting any previous snapshot.
pub fn save_encrypted<T: Serialize>(
    kv: &KvStore,
    key: &DerivedKey,
    logical_key: &str,
    value: &T,
) -> Result<()> {
    let plaintext = serde_json::to_vec(value)?;
    let blob = crypto::encrypt(key, &plaintext)?;
    kv.put(logical_key, &blob)?;

    tracing::debug!(logical_key = logical_key, "saved encrypted value");
    Ok(())
}

/// Load and decrypt the value stored under `logical_key`.
pub fn get_encrypted<T: DeserializeOwned>(
    kv: &KvStore,
    key: &DerivedKey,
    logical_key: &str,
) -> Result<Option<T>> {
    let Some(blob) = kv.get(logical_key)? else {
        return Ok(None);
    };
    let plaintext = crypto::decrypt(key, &blob)?;
    Ok(Some(serde_json::from_slice(&plaintext)?))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::KEY_LEN;
    use crate::error::VaultError;

    #[derive(serde::Serialize, serde::Deserialize, PartialEq, Debug)]
    struct Snapshot {
        success: bool,
        items: Vec<String>,
    }

    fn key(seed: u8) -> DerivedKey {
        DerivedKey::from_bytes([seed; KEY_LEN])
    }

    #[test]
    fn save_and_get_roundtrip() {
        let kv = KvStore::open_in_memory().unwrap();
        let snap = Snapshot {
            success: true,
            items: vec!["A".into()],
        };

        save_encrypted(&kv, &key(1), "bw.list_items", &snap).unwrap();
        let loaded: Snapshot = get_encrypted(&kv, &key(1), "bw.list_items")
            .unwrap()
            .unwrap();
        assert_eq!(loaded, snap);
    }

    #[test]
    fn absent_logical_key_is_none() {
        let kv = KvStore::open_in_memory().unwrap();
        let loaded: Option<Snapshot> = get_encrypted(&kv, &key(1), "bw.list_items").unwrap();
        assert!(loaded.is_none());
    }

    #[test]
    fn wrong_key_propagates_authentication_failure() {
        let kv = KvStore::open_in_memory().unwrap();
        let snap = Snapshot {
            success: true,
            items: vec![],
        };
        save_encrypted(&kv, &key(1), "bw.list_items", &snap).unwrap();

        let result: Result<Option<Snapshot>> = get_encrypted(&kv, &key(2), "bw.list_items");
        assert!(matches!(result, Err(VaultError::AuthenticationFailed)));
    }

    #[test]
    fn stored_blob_is_not_plaintext() {
        let kv = KvStore::open_in_memory().unwrap();
        let snap = Snapshot {
            success: true,
            items: vec!["hunter2".into()],
        };
        save_encrypted(&kv, &key(1), "bw.list_items", &snap).unwrap();

        let raw = kv.get("bw.list_items").unwrap().unwrap();
        assert!(!raw.contains("hunter2"));
    }
}
