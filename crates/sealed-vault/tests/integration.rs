//! Integration tests for the encryption engine against a file-backed store:
//! the password-derived key must survive a process restart (same salt, same
//! blobs) and the unlock state machine must hold together end to end.

use sealed_store::KvStore;
use sealed_vault::memoize::set_memoize;
use sealed_vault::{SessionStore, VaultError, derive_key, get_encrypted, save_encrypted};

#[test]
fn derived_key_survives_reopen_and_decrypts_old_blobs() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("sealed.db");

    {
        let kv = KvStore::open(&path).unwrap();
        let key = derive_key(&kv, "master password").unwrap();
        save_encrypted(&kv, &key, "bw.list_items", &vec!["A", "B"]).unwrap();
    }

    // Simulated restart: fresh handles, same storage, same password.
    let kv = KvStore::open(&path).unwrap();
    let key = derive_key(&kv, "master password").unwrap();
    let items: Vec<String> = get_encrypted(&kv, &key, "bw.list_items")
        .unwrap()
        .unwrap();
    assert_eq!(items, vec!["A", "B"]);
}

#[test]
fn wrong_password_after_reopen_is_authentication_failure() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("sealed.db");

    {
        let kv = KvStore::open(&path).unwrap();
        let key = derive_key(&kv, "right password").unwrap();
        SessionStore::new(kv.clone())
            .store_token(&key, "token")
            .unwrap();
    }

    let kv = KvStore::open(&path).unwrap();
    let wrong = derive_key(&kv, "wrong password").unwrap();
    let result = SessionStore::new(kv).token(&wrong);
    assert!(matches!(result, Err(VaultError::AuthenticationFailed)));
}

#[test]
fn disabling_memoization_never_disables_session_encryption() {
    let kv = KvStore::open_in_memory().unwrap();
    set_memoize(&kv, false).unwrap();

    let key = derive_key(&kv, "password").unwrap();
    let sessions = SessionStore::new(kv.clone());
    sessions.store_token(&key, "tok-secret").unwrap();
    save_encrypted(&kv, &key, "bw.list_items", &vec!["hunter2"]).unwrap();

    assert!(!kv.get("bw.session_key").unwrap().unwrap().contains("tok-secret"));
    assert!(!kv.get("bw.list_items").unwrap().unwrap().contains("hunter2"));
    assert_eq!(sessions.token(&key).unwrap().as_deref(), Some("tok-secret"));
}
