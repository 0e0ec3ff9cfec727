//! Background sync handlers.
//!
//! Each handler pulls the base64 encryption key out of its job metadata,
//! decrypts the stored session token, talks to the provider, and writes a
//! freshly encrypted snapshot back into the KV store. Read paths never wait
//! on these jobs; they serve whatever snapshot is already cached and let the
//! dispatcher run the refresh behind them.
//!
//! A missing key, a missing session, or a provider failure all end the job
//! without touching the cache, so a stale snapshot survives a flaky remote.

use async_trait::async_trait;
use serde_json::{Value, json};
use tracing::warn;

use sealed_dispatch::{EventHandler, Metadata, SignalBus};
use sealed_store::KvStore;
use sealed_vault::{DerivedKey, SessionStore, save_encrypted};

use crate::model::{
    Folder, Item, ItemKind, ListFoldersResult, ListItemsResult, SessionValidation, keys,
    format_provider_date, pad_expiry, sort_folders, sort_items,
};
use crate::provider::{BwClient, BwItem, CommandExecutor, ProviderStatus};

/// Signal emitted when the periodic session check finds the remote session
/// gone.
pub const SESSION_SIGNAL: &str = "session";

/// Metadata field carrying the base64 encryption key into sync jobs.
pub const META_ENCRYPTION_KEY: &str = "encryption_key";

/// Metadata field selecting the folder for a folder-scoped item sync.
pub const META_FOLDER_ID: &str = "folder_id";

/// Shared dependencies of the sync handlers.
pub struct SyncContext<E> {
    pub kv: KvStore,
    pub sessions: SessionStore,
    pub client: std::sync::Arc<BwClient<E>>,
    pub signals: SignalBus,
}

impl<E> Clone for SyncContext<E> {
    fn clone(&self) -> Self {
        Self {
            kv: self.kv.clone(),
            sessions: self.sessions.clone(),
            client: std::sync::Arc::clone(&self.client),
            signals: self.signals.clone(),
        }
    }
}

/// Which item list a sync job refreshes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ItemScope {
    Active,
    Trash,
    /// Folder id comes from the job metadata.
    Folder,
}

/// Refreshes one of the encrypted item snapshots.
pub struct SyncItemsHandler<E> {
    ctx: SyncContext<E>,
    scope: ItemScope,
}

impl<E> SyncItemsHandler<E> {
    /// Handler for the main item list (`bw.list_items`).
    pub fn items(ctx: SyncContext<E>) -> Self {
        Self {
            ctx,
            scope: ItemScope::Active,
        }
    }

    /// Handler for the trash list (`bw.list_trash_items`).
    pub fn trash(ctx: SyncContext<E>) -> Self {
        Self {
            ctx,
            scope: ItemScope::Trash,
        }
    }

    /// Handler for a single folder's items (`bw.list_folder_items.<id>`).
    pub fn folder_scoped(ctx: SyncContext<E>) -> Self {
        Self {
            ctx,
            scope: ItemScope::Folder,
        }
    }
}

/// Decode the encryption key out of job metadata. `None` is the signal to
/// end the job as a no-op failure.
fn metadata_key(metadata: &Metadata) -> Option<DerivedKey> {
    let encoded = metadata.get(META_ENCRYPTION_KEY)?.as_str()?;
    match DerivedKey::decode(encoded) {
        Ok(key) => Some(key),
        Err(e) => {
            warn!(error = %e, "sync job carried an undecodable encryption key");
            None
        }
    }
}

/// Flatten a provider record into the bridge-facing shape.
fn project_item(bw: BwItem) -> Item {
    Item {
        id: bw.id,
        name: bw.name,
        username: bw.username,
        password: bw.password,
        favorite: bw.favorite,
        item_type: bw.kind,
        notes: bw.notes,
        created: format_provider_date(&bw.creation_date),
        updated: format_provider_date(&bw.revision_date),
        totp: bw.totp,
        cardholder_name: bw.cardholder_name,
        brand: bw.brand,
        number: bw.number,
        expiry_month: pad_expiry(&bw.expiry_month, 2),
        expiry_year: pad_expiry(&bw.expiry_year, 4),
        code: bw.code,
        folder_id: bw.folder_id,
        folder_name: bw.folder_name,
    }
}

fn failure_result() -> std::result::Result<Value, String> {
    Ok(json!(ListItemsResult::empty_failure()))
}

#[async_trait]
impl<E: CommandExecutor + 'static> EventHandler for SyncItemsHandler<E> {
    async fn trigger(&self, metadata: Metadata) -> std::result::Result<Value, String> {
        let Some(key) = metadata_key(&metadata) else {
            return failure_result();
        };

        let folder_id = match self.scope {
            ItemScope::Folder => {
                let Some(id) = metadata.get(META_FOLDER_ID).and_then(Value::as_str) else {
                    warn!("folder item sync scheduled without a folder id");
                    return failure_result();
                };
                Some(id.to_string())
            }
            _ => None,
        };

        let token = match self.ctx.sessions.token(&key) {
            Ok(Some(token)) => token,
            Ok(None) => return failure_result(),
            Err(e) => return Err(e.to_string()),
        };

        if let Err(e) = self.ctx.client.sync(&token).await {
            warn!(error = %e, "provider sync failed, keeping stale snapshot");
            return failure_result();
        }

        let listed = self
            .ctx
            .client
            .list_items(&token, self.scope == ItemScope::Trash, folder_id.as_deref())
            .await;
        let raw_items = match listed {
            Ok(items) => items,
            Err(e) => {
                warn!(error = %e, "provider list failed, keeping stale snapshot");
                return failure_result();
            }
        };

        let mut items: Vec<Item> = raw_items
            .into_iter()
            .filter(|i| matches!(i.kind, ItemKind::Login | ItemKind::Card))
            .map(project_item)
            .collect();
        sort_items(&mut items);

        let logical_key = match &folder_id {
            Some(id) => keys::folder_items(id),
            None if self.scope == ItemScope::Trash => keys::LIST_TRASH_ITEMS.to_string(),
            None => keys::LIST_ITEMS.to_string(),
        };
        let snapshot = ListItemsResult {
            success: true,
            items,
        };
        save_encrypted(&self.ctx.kv, &key, &logical_key, &snapshot).map_err(|e| e.to_string())?;

        Ok(json!({ "success": true, "count": snapshot.items.len() }))
    }
}

/// Refreshes the encrypted folder snapshot (`bw.list_folders`).
pub struct SyncFoldersHandler<E> {
    ctx: SyncContext<E>,
}

impl<E> SyncFoldersHandler<E> {
    pub fn new(ctx: SyncContext<E>) -> Self {
        Self { ctx }
    }
}

#[async_trait]
impl<E: CommandExecutor + 'static> EventHandler for SyncFoldersHandler<E> {
    async fn trigger(&self, metadata: Metadata) -> std::result::Result<Value, String> {
        let Some(key) = metadata_key(&metadata) else {
            return Ok(json!(ListFoldersResult::empty_failure()));
        };
        let token = match self.ctx.sessions.token(&key) {
            Ok(Some(token)) => token,
            Ok(None) => return Ok(json!(ListFoldersResult::empty_failure())),
            Err(e) => return Err(e.to_string()),
        };

        let listed = match self.ctx.client.list_folders(&token).await {
            Ok(folders) => folders,
            Err(e) => {
                warn!(error = %e, "provider folder list failed, keeping stale snapshot");
                return Ok(json!(ListFoldersResult::empty_failure()));
            }
        };

        let mut folders: Vec<Folder> = listed
            .into_iter()
            .map(|f| Folder {
                id: f.id,
                name: f.name,
            })
            .collect();
        sort_folders(&mut folders);

        let snapshot = ListFoldersResult {
            success: true,
            folders,
        };
        save_encrypted(&self.ctx.kv, &key, keys::LIST_FOLDERS, &snapshot)
            .map_err(|e| e.to_string())?;

        Ok(json!({ "success": true, "count": snapshot.folders.len() }))
    }
}

/// Periodic check that the remote session is still alive.
///
/// Transient status failures are treated as "still valid" so a network blip
/// never logs the user out; only a definitive `unauthenticated` or `locked`
/// answer purges the cache and raises the [`SESSION_SIGNAL`].
pub struct ValidateSessionHandler<E> {
    ctx: SyncContext<E>,
}

impl<E> ValidateSessionHandler<E> {
    pub fn new(ctx: SyncContext<E>) -> Self {
        Self { ctx }
    }
}

#[async_trait]
impl<E: CommandExecutor + 'static> EventHandler for ValidateSessionHandler<E> {
    async fn trigger(&self, _metadata: Metadata) -> std::result::Result<Value, String> {
        let valid = SessionValidation {
            valid: true,
            logged_out: false,
        };

        match self.ctx.sessions.token_exists() {
            Ok(true) => {}
            Ok(false) => return Ok(json!(valid)),
            Err(e) => return Err(e.to_string()),
        }

        let status = match self.ctx.client.status().await {
            Ok(status) => status,
            Err(e) => {
                warn!(error = %e, "session check could not reach provider, assuming valid");
                return Ok(json!(valid));
            }
        };

        match status {
            ProviderStatus::Unlocked => Ok(json!(valid)),
            ProviderStatus::Unauthenticated | ProviderStatus::Locked => {
                self.ctx.sessions.clear_cache().map_err(|e| e.to_string())?;
                self.ctx
                    .signals
                    .send(SESSION_SIGNAL, json!({ "logged_out": true }));
                tracing::info!(?status, "remote session gone, cache purged");
                Ok(json!(SessionValidation {
                    valid: false,
                    logged_out: true,
                }))
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
