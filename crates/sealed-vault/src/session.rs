//! Encrypted session-token storage.
//!
//! The remote session token only ever touches durable storage as an
//! encrypted blob under `bw.session_key`. [`SessionStore::token`] is the
//! password check in disguise: decryption with a key derived from the wrong
//! password surfaces [`VaultError::AuthenticationFailed`], which callers
//! report as "invalid password" without falling back to a remote unlock.

use serde::{Deserialize, Serialize};
use sealed_store::KvStore;

use crate::crypto::DerivedKey;
use crate::encrypted::{get_encrypted, save_encrypted};
use crate::error::Result;

/// Logical key the encrypted session token lives under.
pub const SESSION_TOKEN_KEY: &str = "bw.session_key";

/// Prefix covering the session token and every cached vault snapshot.
pub const CACHE_PREFIX: &str = "bw";

#[derive(Serialize, Deserialize)]
struct SessionRecord {
    session_key: String,
}

/// Handle for the session-token lifecycle. Cheap to clone.
#[derive(Clone)]
pub struct SessionStore {
    kv: KvStore,
}

impl SessionStore {
    pub fn new(kv: KvStore) -> Self {
        Self { kv }
    }

    /// Persist `token` encrypted under `key`, replacing any previous token.
    ///
    /// This path never consults the memoization flag: the token is always
    /// encrypted.
    pub fn store_token(&self, key: &DerivedKey, token: &str) -> Result<()> {
        let record = SessionRecord {
            session_key: token.to_string(),
        };
        save_encrypted(&self.kv, key, SESSION_TOKEN_KEY, &record)?;

        tracing::info!("stored encrypted session token");
        Ok(())
    }

    /// Decrypt and return the stored token.
    ///
    /// `Ok(None)` means no session exists; `VaultError::AuthenticationFailed`
    /// means one exists but `key` does not match it.
    pub fn token(&self, key: &DerivedKey) -> Result<Option<String>> {
        let record: Option<SessionRecord> = get_encrypted(&self.kv, key, SESSION_TOKEN_KEY)?;
        Ok(record.map(|r| r.session_key))
    }

    /// Whether an encrypted token is present, without decrypting it.
    pub fn token_exists(&self) -> Result<bool> {
        Ok(self.kv.get(SESSION_TOKEN_KEY)?.is_some())
    }

    /// Purge the session token and every cached snapshot under the session
    /// namespace. Returns the number of entries removed.
    pub fn clear_cache(&self) -> Result<usize> {
        let removed = self.kv.delete_prefix(CACHE_PREFIX)?;
        tracing::info!(removed = removed, "cleared session cache namespace");
        Ok(removed)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::KEY_LEN;
    use crate::error::VaultError;

    fn key(seed: u8) -> DerivedKey {
        DerivedKey::from_bytes([seed; KEY_LEN])
    }

    #[test]
    fn token_roundtrip() {
        let sessions = SessionStore::new(KvStore::open_in_memory().unwrap());
        assert!(!sessions.token_exists().unwrap());

        sessions.store_token(&key(1), "BW_SESSION_abc").unwrap();
        assert!(sessions.token_exists().unwrap());
        assert_eq!(
            sessions.token(&key(1)).unwrap().as_deref(),
            Some("BW_SESSION_abc")
        );
    }

    #[test]
    fn wrong_key_reports_authentication_failure_not_absence() {
        let sessions = SessionStore::new(KvStore::open_in_memory().unwrap());
        sessions.store_token(&key(1), "token").unwrap();

        assert!(matches!(
            sessions.token(&key(2)),
            Err(VaultError::AuthenticationFailed)
        ));
    }

    #[test]
    fn missing_token_is_none() {
        let sessions = SessionStore::new(KvStore::open_in_memory().unwrap());
        assert_eq!(sessions.token(&key(1)).unwrap(), None);
    }

    #[test]
    fn clear_cache_purges_session_namespace() {
        let kv = KvStore::open_in_memory().unwrap();
        let sessions = SessionStore::new(kv.clone());
        sessions.store_token(&key(1), "token").unwrap();
        kv.put("bw.list_items", "snapshot").unwrap();
        kv.put("config.server_url", "kept").unwrap();

        assert_eq!(sessions.clear_cache().unwrap(), 2);
        assert!(!sessions.token_exists().unwrap());
        assert_eq!(kv.get("config.server_url").unwrap().as_deref(), Some("kept"));
    }
}
