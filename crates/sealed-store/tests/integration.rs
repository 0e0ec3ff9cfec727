//! Integration tests for the sealed KV store: file-backed persistence and
//! cross-handle visibility.

use std::time::Duration;

use sealed_store::KvStore;

#[test]
fn file_backed_store_persists_across_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("sealed.db");

    {
        let kv = KvStore::open(&path).unwrap();
        kv.put("config.server_url", "vault.example.org").unwrap();
        kv.put_with_ttl("memoization.abc", "{}", Duration::from_secs(3600))
            .unwrap();
    }

    let kv = KvStore::open(&path).unwrap();
    assert_eq!(
        kv.get("config.server_url").unwrap().as_deref(),
        Some("vault.example.org")
    );
    assert_eq!(kv.get("memoization.abc").unwrap().as_deref(), Some("{}"));
}

#[test]
fn concurrent_readers_see_complete_prefix_delete() {
    let kv = KvStore::open_in_memory().unwrap();
    for i in 0..50 {
        kv.put(&format!("bw.list_folder_items.{i}"), "cached").unwrap();
    }
    kv.put("config.server_url", "kept").unwrap();

    // Hammer reads from another handle while the delete runs; every read
    // must succeed and return either the cached value or absence, never a
    // storage error from the concurrent statement.
    let reader = kv.clone();
    let handle = std::thread::spawn(move || {
        for i in 0..200 {
            let value = reader.get(&format!("bw.list_folder_items.{}", i % 50)).unwrap();
            assert!(value.is_none() || value.as_deref() == Some("cached"));
        }
    });

    let removed = kv.delete_prefix("bw.list_folder_items").unwrap();
    assert_eq!(removed, 50);
    handle.join().unwrap();

    assert_eq!(kv.get("bw.list_folder_items.25").unwrap(), None);
    assert_eq!(kv.get("config.server_url").unwrap().as_deref(), Some("kept"));
}
