//! End-to-end tests over the assembled application with a scripted
//! provider executor.

use std::time::Duration;

use sealed_store::KvStore;
use sealed_sync::{ScriptedExecutor, SealedApp, keys};
use sealed_vault::{SessionStore, derive_key};

const ITEMS_JSON: &str = r#"[
    {"id": "i1", "name": "Mail", "type": 1, "favorite": false,
     "folderId": "f1", "login": {"username": "me", "password": "pw"},
     "revisionDate": "2024-06-01T09:30:12.345Z"}
]"#;

const FOLDERS_JSON: &str = r#"[{"id": "f1", "name": "Personal"}]"#;

fn app_with(exec: &ScriptedExecutor) -> (SealedApp<ScriptedExecutor>, KvStore) {
    let kv = KvStore::open_in_memory().unwrap();
    let app = SealedApp::new(kv.clone(), exec.clone()).unwrap();
    (app, kv)
}

#[tokio::test(flavor = "multi_thread")]
async fn read_serves_stale_and_refreshes_in_background() {
    let exec = ScriptedExecutor::new();
    exec.respond_with("sync", "");
    exec.respond_with("list items", ITEMS_JSON);
    exec.respond_with("list folders", FOLDERS_JSON);

    let (app, kv) = app_with(&exec);
    let worker = app.start();

    // Establish a local session directly against the shared store.
    let key = derive_key(&kv, "master-password").unwrap();
    SessionStore::new(kv.clone())
        .store_token(&key, "tok-abc")
        .unwrap();
    let encryption_key = key.encode();

    // First read: nothing cached yet, but the refresh is now scheduled.
    let first = app.list_items(&encryption_key).unwrap();
    assert!(first.items.is_empty());

    tokio::time::sleep(Duration::from_millis(200)).await;

    // Second read serves the freshly synced snapshot.
    let second = app.list_items(&encryption_key).unwrap();
    assert_eq!(second.items.len(), 1);
    assert_eq!(second.items[0].name, "Mail");
    assert_eq!(second.items[0].folder_name, "Personal");
    assert_eq!(second.items[0].updated, "2024-06-01 09:30");

    // The background job actually hit the provider with the session token.
    let lines = exec.call_lines();
    assert!(lines.iter().any(|l| l == "sync"));
    assert!(lines.iter().any(|l| l.starts_with("list items")));

    app.shutdown();
    worker.await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn background_sync_toggles_the_loading_flag() {
    let exec = ScriptedExecutor::new();
    exec.respond_with("sync", "");
    exec.respond_with("list items", "[]");
    exec.respond_with("list folders", "[]");

    let (app, kv) = app_with(&exec);
    let mut signals = app.signals().subscribe();
    let worker = app.start();

    let key = derive_key(&kv, "pw").unwrap();
    SessionStore::new(kv.clone()).store_token(&key, "tok").unwrap();

    app.refresh(&key.encode()).unwrap();

    let on = signals.recv().await.unwrap();
    assert_eq!(on.name, "loading");
    assert_eq!(on.payload, serde_json::json!(true));
    let off = signals.recv().await.unwrap();
    assert_eq!(off.payload, serde_json::json!(false));

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(!app.loading_state().unwrap());

    app.shutdown();
    worker.await.unwrap();
}

#[tokio::test]
async fn unlock_with_stored_token_never_calls_the_provider() {
    let exec = ScriptedExecutor::new();
    let (app, kv) = app_with(&exec);

    let key = derive_key(&kv, "correct-horse").unwrap();
    SessionStore::new(kv.clone())
        .store_token(&key, "tok-abc")
        .unwrap();

    let ok = app.unlock("correct-horse").await;
    assert!(ok.success);
    assert_eq!(ok.encryption_key.as_deref(), Some(key.encode().as_str()));

    let bad = app.unlock("battery-staple").await;
    assert!(!bad.success);
    assert_eq!(bad.message, "Invalid password");
    assert!(bad.encryption_key.is_none());

    // Both outcomes were decided locally.
    assert!(exec.calls().is_empty());
}

#[tokio::test]
async fn login_persists_only_an_encrypted_token() {
    let exec = ScriptedExecutor::new();
    exec.respond_with("login", "tok-secret\n");

    let (app, kv) = app_with(&exec);
    let response = app.login("a@b.c", "pw", None).await;
    assert!(response.success);

    // The token round-trips through the session store under the same key.
    let key = derive_key(&kv, "pw").unwrap();
    assert_eq!(response.encryption_key.as_deref(), Some(key.encode().as_str()));
    let token = SessionStore::new(kv.clone()).token(&key).unwrap();
    assert_eq!(token.as_deref(), Some("tok-secret"));

    // The raw stored blob never contains the plaintext token.
    let blob = kv.get("bw.session_key").unwrap().unwrap();
    assert!(!blob.contains("tok-secret"));
}

#[tokio::test]
async fn login_surfaces_the_second_factor_demand() {
    let exec = ScriptedExecutor::new();
    exec.fail_with("login", "No provider selected for two-step login");

    let (app, _) = app_with(&exec);
    let response = app.login("a@b.c", "pw", None).await;
    assert!(!response.success);
    assert_eq!(response.message, "Second factor required");
}

#[tokio::test]
async fn mutations_without_a_session_fail_locally() {
    let exec = ScriptedExecutor::new();
    let (app, kv) = app_with(&exec);

    let key = derive_key(&kv, "pw").unwrap();
    let response = app
        .add_folder(&key.encode(), "New Folder")
        .await;
    assert!(!response.success);
    assert_eq!(response.message, "Not logged in");
    assert!(exec.calls().is_empty());
}

#[tokio::test]
async fn edit_merges_over_the_fetched_record() {
    let exec = ScriptedExecutor::new();
    exec.respond_with(
        "get item i1",
        r#"{"id": "i1", "name": "Old", "type": 1,
            "login": {"username": "old-user", "password": "keep-me"}}"#,
    );
    exec.respond_with("edit item i1", "{}");

    let (app, kv) = app_with(&exec);
    let key = derive_key(&kv, "pw").unwrap();
    SessionStore::new(kv.clone()).store_token(&key, "tok").unwrap();

    let patch = sealed_sync::ItemPatch {
        name: Some("New".into()),
        ..sealed_sync::ItemPatch::default()
    };
    let response = app.edit_login(&key.encode(), "i1", &patch).await;
    assert!(response.success, "{}", response.message);

    // The resent payload carries the patched name and the untouched
    // password, base64-encoded as the provider expects.
    let edit_call = exec
        .calls()
        .into_iter()
        .find(|c| c.args.first().is_some_and(|a| a == "edit"))
        .unwrap();
    let decoded = base64::Engine::decode(
        &base64::engine::general_purpose::STANDARD,
        &edit_call.args[3],
    )
    .unwrap();
    let payload: serde_json::Value = serde_json::from_slice(&decoded).unwrap();
    assert_eq!(payload["name"], "New");
    assert_eq!(payload["login"]["password"], "keep-me");
}

#[tokio::test]
async fn set_server_purges_the_session_namespace() {
    let exec = ScriptedExecutor::new();
    exec.respond_with("config server", "Saved setting");

    let (app, kv) = app_with(&exec);
    kv.put("bw.list_items", "old-server-snapshot").unwrap();

    let response = app.set_server("vault.example.com").await;
    assert!(response.success);
    assert!(kv.get("bw.list_items").unwrap().is_none());
    assert_eq!(
        app.configuration().unwrap().server_url,
        "vault.example.com"
    );
}

#[tokio::test]
async fn configuration_defaults_to_the_public_server() {
    let (app, _) = app_with(&ScriptedExecutor::new());
    assert_eq!(app.configuration().unwrap().server_url, "bitwarden.com");
}

#[tokio::test]
async fn setup_probe_runs_once() {
    let exec = ScriptedExecutor::new();
    exec.respond_with("help", "usage: bw ...");

    let (app, _) = app_with(&exec);
    assert!(app.setup().await.success);
    assert!(app.setup().await.success);

    let probes = exec.call_lines().iter().filter(|l| *l == "help").count();
    assert_eq!(probes, 1);
}

#[tokio::test]
async fn logout_wipes_local_state_even_when_already_logged_out() {
    let exec = ScriptedExecutor::new();
    exec.fail_with("logout", "You are not logged in.");

    let (app, kv) = app_with(&exec);
    kv.put("bw.list_items", "snapshot").unwrap();
    kv.put(keys::SETUP_DONE, "1").unwrap();
    kv.put("encryption.salt", "salt").unwrap();

    let response = app.logout().await;
    assert!(response.success);
    assert!(kv.get("bw.list_items").unwrap().is_none());
    assert!(kv.get(keys::SETUP_DONE).unwrap().is_none());
    assert!(kv.get("encryption.salt").unwrap().is_none());
}
