//! Vault provider client over an external command executor.
//!
//! The provider CLI (`bw`) is an external collaborator; the orchestrator
//! only depends on the [`CommandExecutor`] call contract: an argument list,
//! an optional environment overlay, raw text out, and an error carrying the
//! failure text on non-zero exit. [`BwClient`] builds every provider
//! operation on top of that seam, so tests swap in a scripted executor and
//! never touch a real process.

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use tracing::{debug, warn};

use crate::error::{Result, SyncError};
use crate::model::{ItemKind, NewCard, NewLogin};

/// Environment variable carrying the session token into provider commands.
const SESSION_ENV: &str = "BW_SESSION";

/// Default provider command timeout in seconds.
const DEFAULT_TIMEOUT_SECS: u64 = 60;

/// Raw output of a provider command.
#[derive(Debug, Clone)]
pub struct CommandOutput {
    pub text: String,
}

impl CommandOutput {
    /// Parse the raw text as JSON into `T`.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T> {
        Ok(serde_json::from_str(&self.text)?)
    }
}

/// The call contract toward the external command executor.
#[async_trait]
pub trait CommandExecutor: Send + Sync {
    /// Run the provider with `args` and the given environment overlay.
    /// A non-zero exit is an error with the failure text attached.
    async fn run(&self, args: &[String], env: &[(String, String)]) -> Result<CommandOutput>;
}

/// Executor backed by the real provider CLI via [`tokio::process::Command`].
pub struct BwCommandExecutor {
    program: String,
    timeout_secs: u64,
}

impl BwCommandExecutor {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            timeout_secs: DEFAULT_TIMEOUT_SECS,
        }
    }

    pub fn with_timeout(mut self, timeout_secs: u64) -> Self {
        self.timeout_secs = timeout_secs;
        self
    }
}

impl Default for BwCommandExecutor {
    fn default() -> Self {
        Self::new("bw")
    }
}

#[async_trait]
impl CommandExecutor for BwCommandExecutor {
    async fn run(&self, args: &[String], env: &[(String, String)]) -> Result<CommandOutput> {
        debug!(program = %self.program, ?args, "running provider command");

        let mut command = tokio::process::Command::new(&self.program);
        command
            .args(args)
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped())
            .kill_on_drop(true);
        for (name, value) in env {
            command.env(name, value);
        }

        let child = command.spawn().map_err(|e| SyncError::SpawnFailed {
            reason: e.to_string(),
        })?;

        let result = tokio::time::timeout(
            std::time::Duration::from_secs(self.timeout_secs),
            child.wait_with_output(),
        )
        .await;

        match result {
            Ok(Ok(output)) => {
                let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
                if output.status.success() {
                    Ok(CommandOutput { text: stdout })
                } else {
                    let stderr = String::from_utf8_lossy(&output.stderr);
                    let message = if stderr.trim().is_empty() {
                        stdout
                    } else {
                        stderr.into_owned()
                    };
                    Err(SyncError::CommandFailed { message })
                }
            }
            Ok(Err(e)) => Err(SyncError::SpawnFailed {
                reason: e.to_string(),
            }),
            Err(_) => {
                warn!(program = %self.program, ?args, "provider command timed out");
                Err(SyncError::Timeout {
                    seconds: self.timeout_secs,
                })
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Provider status
// ---------------------------------------------------------------------------

/// Authentication status reported by the provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderStatus {
    Unauthenticated,
    Locked,
    Unlocked,
}

impl ProviderStatus {
    /// Total mapping from the provider's status string; any other value is
    /// a loud [`SyncError::UnknownStatus`], never a silent default.
    pub fn parse(value: &str) -> Result<Self> {
        match value {
            "unauthenticated" => Ok(Self::Unauthenticated),
            "locked" => Ok(Self::Locked),
            "unlocked" => Ok(Self::Unlocked),
            other => Err(SyncError::UnknownStatus {
                value: other.to_string(),
            }),
        }
    }
}

// ---------------------------------------------------------------------------
// Provider records
// ---------------------------------------------------------------------------

/// A folder as returned by the provider.
#[derive(Debug, Clone)]
pub struct BwFolder {
    pub id: String,
    pub name: String,
}

/// A provider item, flattened from the nested login/card structure and
/// joined with its folder name. `raw` keeps the provider's full record for
/// the edit merge.
#[derive(Debug, Clone)]
pub struct BwItem {
    pub id: String,
    pub name: String,
    pub username: String,
    pub password: String,
    pub totp: String,
    pub notes: String,
    pub creation_date: String,
    pub revision_date: String,
    pub favorite: bool,
    pub kind: ItemKind,
    pub cardholder_name: String,
    pub brand: String,
    pub number: String,
    pub expiry_month: String,
    pub expiry_year: String,
    pub code: String,
    pub raw: Value,
    pub folder_id: String,
    pub folder_name: String,
}

fn str_at<'a>(value: &'a Value, path: &[&str]) -> &'a str {
    let mut current = value;
    for segment in path {
        match current.get(segment) {
            Some(next) => current = next,
            None => return "",
        }
    }
    current.as_str().unwrap_or("")
}

impl BwItem {
    /// Flatten a raw provider record; `folders` supplies the name join.
    /// A record without a numeric `type` is rejected, never defaulted.
    fn from_raw(raw: Value, folders: &[BwFolder]) -> Result<Self> {
        let kind_raw = raw
            .get("type")
            .and_then(Value::as_i64)
            .ok_or_else(|| SyncError::MalformedItem {
                reason: "missing numeric type field".into(),
            })?;
        let kind = ItemKind::from_provider(kind_raw)?;
        let folder_id = str_at(&raw, &["folderId"]).to_string();
        let folder_name = folders
            .iter()
            .find(|f| f.id == folder_id)
            .map(|f| f.name.clone())
            .unwrap_or_default();

        Ok(Self {
            id: str_at(&raw, &["id"]).to_string(),
            name: str_at(&raw, &["name"]).to_string(),
            username: str_at(&raw, &["login", "username"]).to_string(),
            password: str_at(&raw, &["login", "password"]).to_string(),
            totp: str_at(&raw, &["login", "totp"]).to_string(),
            notes: str_at(&raw, &["notes"]).to_string(),
            creation_date: str_at(&raw, &["creationDate"]).to_string(),
            revision_date: str_at(&raw, &["revisionDate"]).to_string(),
            favorite: raw.get("favorite").and_then(Value::as_bool).unwrap_or(false),
            kind,
            cardholder_name: str_at(&raw, &["card", "cardholderName"]).to_string(),
            brand: str_at(&raw, &["card", "brand"]).to_string(),
            number: str_at(&raw, &["card", "number"]).to_string(),
            expiry_month: str_at(&raw, &["card", "expMonth"]).to_string(),
            expiry_year: str_at(&raw, &["card", "expYear"]).to_string(),
            code: str_at(&raw, &["card", "code"]).to_string(),
            folder_id,
            folder_name,
            raw,
        })
    }
}

// ---------------------------------------------------------------------------
// Edit merge
// ---------------------------------------------------------------------------

/// Sparse field overrides for an item edit. `None` leaves the stored field
/// untouched; `Some` replaces it.
#[derive(Debug, Clone, Default)]
pub struct ItemPatch {
    pub name: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub notes: Option<String>,
    pub totp: Option<String>,
    pub cardholder_name: Option<String>,
    pub brand: Option<String>,
    pub number: Option<String>,
    pub exp_month: Option<String>,
    pub exp_year: Option<String>,
    pub code: Option<String>,
    pub favorite: Option<bool>,
    /// `Some("")` detaches the item from its folder; `None` keeps it.
    pub folder_id: Option<String>,
}

/// Merge sparse overrides over an existing raw provider record, returning a
/// new record. The input is never mutated, so the cached representation and
/// the outgoing request can't alias each other.
pub fn merge_item(raw: &Value, patch: &ItemPatch) -> Value {
    let mut merged = raw.clone();

    let set_top = |merged: &mut Value, field: &str, value: &Option<String>| {
        if let Some(v) = value {
            merged[field] = json!(v);
        }
    };
    let set_nested = |merged: &mut Value, object: &str, field: &str, value: &Option<String>| {
        if let Some(v) = value {
            if merged.get(object).is_none_or(Value::is_null) {
                merged[object] = json!({});
            }
            merged[object][field] = json!(v);
        }
    };

    set_top(&mut merged, "name", &patch.name);
    set_top(&mut merged, "notes", &patch.notes);
    set_nested(&mut merged, "login", "username", &patch.username);
    set_nested(&mut merged, "login", "password", &patch.password);
    set_nested(&mut merged, "login", "totp", &patch.totp);
    set_nested(&mut merged, "card", "cardholderName", &patch.cardholder_name);
    set_nested(&mut merged, "card", "brand", &patch.brand);
    set_nested(&mut merged, "card", "number", &patch.number);
    set_nested(&mut merged, "card", "expMonth", &patch.exp_month);
    set_nested(&mut merged, "card", "expYear", &patch.exp_year);
    set_nested(&mut merged, "card", "code", &patch.code);

    if let Some(favorite) = patch.favorite {
        merged["favorite"] = json!(favorite);
    }
    if let Some(folder_id) = &patch.folder_id {
        merged["folderId"] = if folder_id.is_empty() {
            Value::Null
        } else {
            json!(folder_id)
        };
    }

    merged
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

/// High-level provider operations over a [`CommandExecutor`].
pub struct BwClient<E> {
    exec: E,
}

impl<E: CommandExecutor> BwClient<E> {
    pub fn new(exec: E) -> Self {
        Self { exec }
    }

    async fn run(&self, args: &[&str]) -> Result<CommandOutput> {
        let args: Vec<String> = args.iter().map(|s| s.to_string()).collect();
        self.exec.run(&args, &[]).await
    }

    async fn run_with_session(&self, args: &[&str], session: &str) -> Result<CommandOutput> {
        let args: Vec<String> = args.iter().map(|s| s.to_string()).collect();
        let env = vec![(SESSION_ENV.to_string(), session.to_string())];
        self.exec.run(&args, &env).await
    }

    /// Sanity-check that the provider CLI is runnable at all.
    pub async fn setup(&self) -> Result<()> {
        self.run(&["help"]).await?;
        Ok(())
    }

    /// Current authentication status.
    pub async fn status(&self) -> Result<ProviderStatus> {
        let output = self.run(&["status"]).await?;

        // The CLI reports a broken server config as free text before any
        // JSON appears.
        if output.text.to_lowercase().contains("unable to fetch serverconfig") {
            return Ok(ProviderStatus::Unauthenticated);
        }

        let parsed: Value = output.json()?;
        let status = parsed
            .get("status")
            .and_then(Value::as_str)
            .unwrap_or("unauthenticated");
        ProviderStatus::parse(status)
    }

    /// Log in with email and master password, optionally passing a
    /// two-factor code through. Returns the session token.
    pub async fn login(&self, email: &str, password: &str, otp: Option<&str>) -> Result<String> {
        let mut args = vec!["login", "--raw"];
        if let Some(code) = otp {
            args.extend(["--method", "0", "--code", code]);
        }
        args.extend([email, password]);

        match self.run(&args).await {
            Ok(output) => Ok(output.text.trim().to_string()),
            Err(SyncError::CommandFailed { message })
                if message.to_lowercase().contains("no provider selected") =>
            {
                Err(SyncError::NeedsSecondFactor)
            }
            Err(e) => Err(e),
        }
    }

    /// Unlock an authenticated-but-locked vault. Returns the session token.
    pub async fn unlock(&self, password: &str) -> Result<String> {
        let output = self.run(&["unlock", "--raw", password]).await?;
        Ok(output.text.trim().to_string())
    }

    /// Trigger a remote synchronization of the provider's local state.
    pub async fn sync(&self, session: &str) -> Result<()> {
        self.run_with_session(&["sync"], session).await?;
        Ok(())
    }

    /// List folders, skipping the virtual "no folder" entry (null id).
    pub async fn list_folders(&self, session: &str) -> Result<Vec<BwFolder>> {
        let output = self.run_with_session(&["list", "folders"], session).await?;
        let raw: Vec<Value> = output.json()?;

        let folders = raw
            .into_iter()
            .filter_map(|f| {
                let id = f.get("id").and_then(Value::as_str)?.to_string();
                let name = str_at(&f, &["name"]).to_string();
                Some(BwFolder { id, name })
            })
            .collect();
        Ok(folders)
    }

    /// List items, optionally from the trash or a single folder. Item
    /// records are joined with folder names.
    pub async fn list_items(
        &self,
        session: &str,
        trash: bool,
        folder_id: Option<&str>,
    ) -> Result<Vec<BwItem>> {
        let mut args = vec!["list", "items"];
        if trash {
            args.push("--trash");
        }
        if let Some(folder_id) = folder_id {
            args.extend(["--folderid", folder_id]);
        }

        let output = self.run_with_session(&args, session).await?;
        let raw_items: Vec<Value> = output.json()?;
        let folders = self.list_folders(session).await?;

        raw_items
            .into_iter()
            .map(|raw| BwItem::from_raw(raw, &folders))
            .collect()
    }

    /// Fetch a single item with its raw record (used for the edit merge).
    pub async fn get_item(&self, session: &str, item_id: &str) -> Result<BwItem> {
        let output = self
            .run_with_session(&["get", "item", item_id], session)
            .await?;
        let raw: Value = output.json()?;

        let folders = if str_at(&raw, &["folderId"]).is_empty() {
            Vec::new()
        } else {
            self.list_folders(session).await?
        };
        BwItem::from_raw(raw, &folders)
    }

    /// Create a new login item.
    pub async fn create_login(&self, session: &str, login: &NewLogin) -> Result<()> {
        let payload = login_payload(login);
        self.create_item(session, &payload).await
    }

    /// Create a new card item.
    pub async fn create_card(&self, session: &str, card: &NewCard) -> Result<()> {
        let payload = card_payload(card);
        self.create_item(session, &payload).await
    }

    async fn create_item(&self, session: &str, item: &Value) -> Result<()> {
        let encoded = encode_payload(item);
        self.run_with_session(&["create", "item", &encoded], session)
            .await?;
        Ok(())
    }

    /// Fetch the item, apply the patch via [`merge_item`], and resend the
    /// whole record.
    pub async fn edit_item(&self, session: &str, item_id: &str, patch: &ItemPatch) -> Result<()> {
        let existing = self.get_item(session, item_id).await?;
        let merged = merge_item(&existing.raw, patch);
        let encoded = encode_payload(&merged);
        self.run_with_session(&["edit", "item", item_id, &encoded], session)
            .await?;
        Ok(())
    }

    /// Move an item to the trash, or delete it permanently.
    pub async fn delete_item(&self, session: &str, item_id: &str, permanent: bool) -> Result<()> {
        let mut args = vec!["delete", "item", item_id];
        if permanent {
            args.push("--permanent");
        }
        self.run_with_session(&args, session).await?;
        Ok(())
    }

    /// Restore an item from the trash.
    pub async fn restore_item(&self, session: &str, item_id: &str) -> Result<()> {
        self.run_with_session(&["restore", "item", item_id], session)
            .await?;
        Ok(())
    }

    /// Create a folder.
    pub async fn create_folder(&self, session: &str, name: &str) -> Result<()> {
        let encoded = encode_payload(&json!({ "name": name }));
        self.run_with_session(&["create", "folder", &encoded], session)
            .await?;
        Ok(())
    }

    /// Rename a folder.
    pub async fn edit_folder(&self, session: &str, folder_id: &str, name: &str) -> Result<()> {
        let encoded = encode_payload(&json!({ "name": name }));
        self.run_with_session(&["edit", "folder", folder_id, &encoded], session)
            .await?;
        Ok(())
    }

    /// Delete a folder.
    pub async fn delete_folder(&self, session: &str, folder_id: &str) -> Result<()> {
        self.run_with_session(&["delete", "folder", folder_id], session)
            .await?;
        Ok(())
    }

    /// Point the provider at a different server.
    pub async fn set_server(&self, url: &str) -> Result<()> {
        self.run(&["config", "server", url]).await?;
        Ok(())
    }

    /// Log out of the provider entirely.
    pub async fn logout(&self) -> Result<()> {
        self.run(&["logout"]).await?;
        Ok(())
    }
}

/// Provider payloads travel as base64-encoded JSON on the command line.
fn encode_payload(value: &Value) -> String {
    STANDARD.encode(value.to_string())
}

/// The full item shape the provider expects for a new login.
fn login_payload(login: &NewLogin) -> Value {
    let non_empty = |s: &str| {
        if s.is_empty() { Value::Null } else { json!(s) }
    };

    json!({
        "passwordHistory": [],
        "revisionDate": null,
        "creationDate": null,
        "deletedDate": null,
        "organizationId": null,
        "collectionIds": null,
        "folderId": non_empty(&login.folder_id),
        "type": ItemKind::Login.to_provider(),
        "name": login.name,
        "notes": non_empty(&login.notes),
        "favorite": login.favorite,
        "fields": [],
        "login": {
            "uris": [],
            "username": non_empty(&login.username),
            "password": non_empty(&login.password),
            "totp": non_empty(&login.totp),
            "fido2Credentials": [],
        },
        "secureNote": null,
        "card": null,
        "identity": null,
        "sshKey": null,
        "reprompt": 0,
    })
}

/// The full item shape the provider expects for a new card.
fn card_payload(card: &NewCard) -> Value {
    let non_empty = |s: &str| {
        if s.is_empty() { Value::Null } else { json!(s) }
    };

    json!({
        "passwordHistory": [],
        "revisionDate": null,
        "creationDate": null,
        "deletedDate": null,
        "organizationId": null,
        "collectionIds": null,
        "folderId": non_empty(&card.folder_id),
        "type": ItemKind::Card.to_provider(),
        "name": card.name,
        "notes": null,
        "favorite": card.favorite,
        "fields": [],
        "login": null,
        "secureNote": null,
        "card": {
            "cardholderName": non_empty(&card.cardholder_name),
            "brand": non_empty(&card.brand),
            "number": non_empty(&card.number),
            "expMonth": non_empty(&card.exp_month),
            "expYear": non_empty(&card.exp_year),
            "code": non_empty(&card.code),
        },
        "identity": null,
        "sshKey": null,
        "reprompt": 0,
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ScriptedExecutor;

    #[tokio::test]
    async fn status_parses_json_status() {
        let exec = ScriptedExecutor::new();
        exec.respond_with("status", r#"{"status": "unlocked"}"#);

        let client = BwClient::new(exec);
        assert_eq!(client.status().await.unwrap(), ProviderStatus::Unlocked);
    }

    #[tokio::test]
    async fn status_detects_broken_serverconfig_as_unauthenticated() {
        let exec = ScriptedExecutor::new();
        exec.respond_with("status", "Unable to fetch ServerConfig from example");

        let client = BwClient::new(exec);
        assert_eq!(
            client.status().await.unwrap(),
            ProviderStatus::Unauthenticated
        );
    }

    #[tokio::test]
    async fn unknown_status_fails_loudly() {
        let exec = ScriptedExecutor::new();
        exec.respond_with("status", r#"{"status": "hibernating"}"#);

        let client = BwClient::new(exec);
        assert!(matches!(
            client.status().await,
            Err(SyncError::UnknownStatus { value }) if value == "hibernating"
        ));
    }

    #[tokio::test]
    async fn login_maps_missing_provider_to_second_factor() {
        let exec = ScriptedExecutor::new();
        exec.fail_with("login", "No provider selected for two-step login");

        let client = BwClient::new(exec);
        let result = client.login("a@b.c", "pw", None).await;
        assert!(matches!(result, Err(SyncError::NeedsSecondFactor)));
    }

    #[tokio::test]
    async fn list_items_joins_folder_names() {
        let exec = ScriptedExecutor::new();
        exec.respond_with(
            "list items",
            r#"[{"id": "i1", "name": "Mail", "type": 1, "folderId": "f1",
                 "login": {"username": "me"}}]"#,
        );
        exec.respond_with(
            "list folders",
            r#"[{"id": "f1", "name": "Personal"}, {"id": null, "name": "No Folder"}]"#,
        );

        let client = BwClient::new(exec);
        let items = client.list_items("session", false, None).await.unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].folder_name, "Personal");
        assert_eq!(items[0].username, "me");
        assert_eq!(items[0].kind, ItemKind::Login);
    }

    #[tokio::test]
    async fn item_without_a_type_is_rejected_not_defaulted() {
        let exec = ScriptedExecutor::new();
        exec.respond_with("list items", r#"[{"id": "i1", "name": "X"}]"#);
        exec.respond_with("list folders", "[]");

        let client = BwClient::new(exec);
        assert!(matches!(
            client.list_items("session", false, None).await,
            Err(SyncError::MalformedItem { .. })
        ));
    }

    #[tokio::test]
    async fn list_items_propagates_unknown_item_kind() {
        let exec = ScriptedExecutor::new();
        exec.respond_with("list items", r#"[{"id": "i1", "name": "X", "type": 42}]"#);
        exec.respond_with("list folders", "[]");

        let client = BwClient::new(exec);
        assert!(matches!(
            client.list_items("session", false, None).await,
            Err(SyncError::UnknownItemKind { value: 42 })
        ));
    }

    #[tokio::test]
    async fn session_env_is_attached_to_session_commands() {
        let exec = ScriptedExecutor::new();
        exec.respond_with("sync", "{}");

        let client = BwClient::new(exec);
        client.sync("token-123").await.unwrap();

        let calls = client.exec.calls();
        assert_eq!(calls[0].env, vec![("BW_SESSION".to_string(), "token-123".to_string())]);
    }

    #[test]
    fn merge_applies_overrides_without_touching_original() {
        let raw = json!({
            "id": "i1",
            "name": "Old",
            "favorite": false,
            "folderId": "f1",
            "login": {"username": "old-user", "password": "old-pass"}
        });
        let patch = ItemPatch {
            name: Some("New".into()),
            username: Some("new-user".into()),
            favorite: Some(true),
            ..ItemPatch::default()
        };

        let merged = merge_item(&raw, &patch);

        assert_eq!(merged["name"], "New");
        assert_eq!(merged["login"]["username"], "new-user");
        assert_eq!(merged["login"]["password"], "old-pass");
        assert_eq!(merged["favorite"], true);
        assert_eq!(merged["folderId"], "f1");

        // The original record is untouched.
        assert_eq!(raw["name"], "Old");
        assert_eq!(raw["login"]["username"], "old-user");
    }

    #[test]
    fn merge_detaches_folder_on_empty_override() {
        let raw = json!({"id": "i1", "folderId": "f1"});
        let patch = ItemPatch {
            folder_id: Some(String::new()),
            ..ItemPatch::default()
        };
        assert_eq!(merge_item(&raw, &patch)["folderId"], Value::Null);
    }

    #[test]
    fn merge_creates_missing_nested_object() {
        let raw = json!({"id": "i1", "card": null});
        let patch = ItemPatch {
            number: Some("4111".into()),
            ..ItemPatch::default()
        };
        assert_eq!(merge_item(&raw, &patch)["card"]["number"], "4111");
    }

    #[test]
    fn payloads_null_out_empty_optional_fields() {
        let login = NewLogin {
            name: "Mail".into(),
            username: "me".into(),
            ..NewLogin::default()
        };
        let payload = login_payload(&login);
        assert_eq!(payload["login"]["username"], "me");
        assert_eq!(payload["login"]["password"], Value::Null);
        assert_eq!(payload["folderId"], Value::Null);
        assert_eq!(payload["type"], 1);
    }
}
