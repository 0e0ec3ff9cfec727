//! The application facade the UI bridge talks to.
//!
//! [`SealedApp`] wires the KV store, the encryption engine, the provider
//! client, and the dispatcher together. Read paths answer from the encrypted
//! cache and schedule a background refresh on every call; mutating paths go
//! straight to the provider and then schedule the refreshes that make the
//! change visible.
//!
//! Nothing in here blocks on the network except the explicitly remote
//! operations (setup, login, unlock, the mutations).

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tokio::task::JoinHandle;
use tracing::warn;

use sealed_dispatch::{Dispatcher, Event, LoadingSink, Metadata, SignalBus, WithLoading};
use sealed_store::KvStore;
use sealed_vault::{DerivedKey, SessionStore, derive_key, get_encrypted};

use crate::error::{Result, SyncError};
use crate::events::{
    META_ENCRYPTION_KEY, META_FOLDER_ID, SyncContext, SyncFoldersHandler, SyncItemsHandler,
    ValidateSessionHandler,
};
use crate::model::{
    Configuration, ListFoldersResult, ListItemsResult, LoginField, LoginResponse, LoginScreen,
    NewCard, NewLogin, StatusResponse, keys,
};
use crate::provider::{BwClient, CommandExecutor, ItemPatch, ProviderStatus};

/// Background event ids.
pub const EVENT_SYNC_ITEMS: &str = "sync-items";
pub const EVENT_SYNC_FOLDERS: &str = "sync-folders";
pub const EVENT_SYNC_TRASH: &str = "sync-trash-items";
pub const EVENT_SYNC_FOLDER_ITEMS: &str = "sync-folder-items";
pub const EVENT_VALIDATE_SESSION: &str = "validate-session";

/// How often the remote session is revalidated.
pub const SESSION_CHECK_INTERVAL: Duration = Duration::from_secs(30);

/// Default server when none has been configured.
const DEFAULT_SERVER_URL: &str = "bitwarden.com";

/// Loading sink that persists the flag and mirrors it onto the signal bus.
struct KvLoadingSink {
    kv: KvStore,
    signals: SignalBus,
}

impl LoadingSink for KvLoadingSink {
    fn set_loading(&self, loading: bool) {
        if let Err(e) = self.kv.put(keys::LOADING, if loading { "1" } else { "0" }) {
            warn!(error = %e, "failed to persist loading flag");
        }
        self.signals.send("loading", json!(loading));
    }
}

/// The assembled application. One instance per process; handles are cheap
/// to clone via the contained `Arc`s if the bridge needs to share it.
pub struct SealedApp<E> {
    kv: KvStore,
    sessions: SessionStore,
    client: Arc<BwClient<E>>,
    dispatcher: Dispatcher,
    signals: SignalBus,
}

impl<E: CommandExecutor + 'static> SealedApp<E> {
    /// Wire the services together and register every background event.
    /// Call [`SealedApp::start`] afterwards to begin processing jobs.
    pub fn new(kv: KvStore, executor: E) -> Result<Self> {
        let sessions = SessionStore::new(kv.clone());
        let client = Arc::new(BwClient::new(executor));
        let signals = SignalBus::default();
        let dispatcher = Dispatcher::new();

        let ctx = SyncContext {
            kv: kv.clone(),
            sessions: sessions.clone(),
            client: Arc::clone(&client),
            signals: signals.clone(),
        };
        let sink: Arc<dyn LoadingSink> = Arc::new(KvLoadingSink {
            kv: kv.clone(),
            signals: signals.clone(),
        });

        dispatcher.register(Event::new(
            EVENT_SYNC_ITEMS,
            Arc::new(WithLoading::new(
                SyncItemsHandler::items(ctx.clone()),
                Arc::clone(&sink),
            )),
        ))?;
        dispatcher.register(Event::new(
            EVENT_SYNC_TRASH,
            Arc::new(WithLoading::new(
                SyncItemsHandler::trash(ctx.clone()),
                Arc::clone(&sink),
            )),
        ))?;
        dispatcher.register(Event::new(
            EVENT_SYNC_FOLDER_ITEMS,
            Arc::new(WithLoading::new(
                SyncItemsHandler::folder_scoped(ctx.clone()),
                Arc::clone(&sink),
            )),
        ))?;
        dispatcher.register(Event::new(
            EVENT_SYNC_FOLDERS,
            Arc::new(WithLoading::new(
                SyncFoldersHandler::new(ctx.clone()),
                Arc::clone(&sink),
            )),
        ))?;
        // The session check runs silently; it must not flash the loading
        // indicator every 30 seconds.
        dispatcher.register(
            Event::new(
                EVENT_VALIDATE_SESSION,
                Arc::new(ValidateSessionHandler::new(ctx)),
            )
            .with_interval(SESSION_CHECK_INTERVAL),
        )?;

        Ok(Self {
            kv,
            sessions,
            client,
            dispatcher,
            signals,
        })
    }

    /// Start the dispatcher worker and the session-check ticker.
    pub fn start(&self) -> JoinHandle<()> {
        self.dispatcher.start()
    }

    /// Stop background processing after the current job.
    pub fn shutdown(&self) {
        self.dispatcher.shutdown();
    }

    /// Subscribe to UI signals (`loading`, `session`).
    pub fn signals(&self) -> &SignalBus {
        &self.signals
    }

    // -- Setup and configuration --------------------------------------------

    /// One-time check that the provider CLI is usable, persisted so later
    /// startups skip the probe.
    pub async fn setup(&self) -> StatusResponse {
        match self.kv.get(keys::SETUP_DONE) {
            Ok(Some(done)) if done == "1" => return StatusResponse::ok(),
            Ok(_) => {}
            Err(e) => return StatusResponse::failed(e.to_string()),
        }

        if let Err(e) = self.client.setup().await {
            return StatusResponse::failed(e.to_string());
        }
        match self.kv.put(keys::SETUP_DONE, "1") {
            Ok(_) => StatusResponse::ok(),
            Err(e) => StatusResponse::failed(e.to_string()),
        }
    }

    /// Point the provider at a different server. Every cached snapshot
    /// belongs to the old server, so the session namespace is purged.
    pub async fn set_server(&self, url: &str) -> StatusResponse {
        if let Err(e) = self.client.set_server(url).await {
            return StatusResponse::failed(e.to_string());
        }
        let result = self
            .sessions
            .clear_cache()
            .map_err(SyncError::from)
            .and_then(|_| {
                self.kv.put(keys::SERVER_URL, url)?;
                Ok(())
            });
        status_from(result)
    }

    /// Local configuration as shown in the UI.
    pub fn configuration(&self) -> Result<Configuration> {
        Ok(Configuration {
            server_url: self.kv.get_or(keys::SERVER_URL, DEFAULT_SERVER_URL)?,
        })
    }

    // -- Authentication ------------------------------------------------------

    /// Which credential fields the UI must collect. With a stored session
    /// only the master password is needed; otherwise the provider status
    /// decides between a full login and an unlock.
    pub async fn login_screen(&self) -> Result<LoginScreen> {
        if self.sessions.token_exists()? {
            return Ok(LoginScreen {
                show: true,
                fields: vec![LoginField::Password],
            });
        }

        // An unreachable provider is indistinguishable from a fresh
        // install; ask for the full login.
        let status = self
            .client
            .status()
            .await
            .unwrap_or(ProviderStatus::Unauthenticated);
        let fields = match status {
            ProviderStatus::Unauthenticated => {
                vec![LoginField::Email, LoginField::Password, LoginField::Totp]
            }
            ProviderStatus::Locked | ProviderStatus::Unlocked => vec![LoginField::Password],
        };
        Ok(LoginScreen { show: true, fields })
    }

    /// Full login against the provider. On success the session token is
    /// stored encrypted and the base64 key is handed back to the bridge.
    pub async fn login(&self, email: &str, password: &str, otp: Option<&str>) -> LoginResponse {
        let key = match derive_key(&self.kv, password) {
            Ok(key) => key,
            Err(e) => return LoginResponse::failed(e.to_string()),
        };

        let token = match self.client.login(email, password, otp).await {
            Ok(token) => token,
            Err(SyncError::NeedsSecondFactor) => {
                return LoginResponse::failed("Second factor required");
            }
            Err(e) => return LoginResponse::failed(e.to_string()),
        };

        match self.sessions.store_token(&key, &token) {
            Ok(()) => LoginResponse::succeeded(key.encode()),
            Err(e) => LoginResponse::failed(e.to_string()),
        }
    }

    /// Unlock with the master password.
    ///
    /// With a stored token this is purely local: decrypting it with the
    /// derived key is the password check, and no provider call is made in
    /// either outcome. Without a token the unlock goes to the provider.
    pub async fn unlock(&self, password: &str) -> LoginResponse {
        let key = match derive_key(&self.kv, password) {
            Ok(key) => key,
            Err(e) => return LoginResponse::failed(e.to_string()),
        };

        let stored = match self.sessions.token_exists() {
            Ok(stored) => stored,
            Err(e) => return LoginResponse::failed(e.to_string()),
        };

        if stored {
            return match self.sessions.token(&key).map_err(SyncError::from) {
                Ok(Some(_)) => LoginResponse::succeeded(key.encode()),
                Ok(None) => LoginResponse::failed("Not logged in"),
                Err(SyncError::InvalidPassword) => LoginResponse::failed("Invalid password"),
                Err(e) => LoginResponse::failed(e.to_string()),
            };
        }

        let token = match self.client.unlock(password).await {
            Ok(token) => token,
            Err(e) => return LoginResponse::failed(e.to_string()),
        };
        match self.sessions.store_token(&key, &token) {
            Ok(()) => LoginResponse::succeeded(key.encode()),
            Err(e) => LoginResponse::failed(e.to_string()),
        }
    }

    /// Log out of the provider and wipe all local state, including the
    /// salt. A provider that was already logged out is not an error.
    pub async fn logout(&self) -> StatusResponse {
        if let Err(e) = self.client.logout().await {
            let benign = matches!(
                &e,
                SyncError::CommandFailed { message }
                    if message.to_lowercase().contains("not logged in")
            );
            if !benign {
                return StatusResponse::failed(e.to_string());
            }
        }

        let result = (|| -> Result<()> {
            self.sessions.clear_cache()?;
            self.kv.delete_prefix("sealed")?;
            self.kv.delete_prefix("encryption")?;
            self.kv.delete_prefix("memoization")?;
            self.kv.put(keys::LOADING, "0")?;
            Ok(())
        })();
        status_from(result)
    }

    // -- Read paths (stale-while-revalidate) --------------------------------

    /// Cached item list, refreshed in the background on every call.
    /// Folders are refreshed alongside since item rows join folder names.
    pub fn list_items(&self, encryption_key: &str) -> Result<ListItemsResult> {
        let key = DerivedKey::decode(encryption_key)?;
        let snapshot = get_encrypted(&self.kv, &key, keys::LIST_ITEMS)?
            .unwrap_or_else(ListItemsResult::empty_success);

        self.schedule_keyed(EVENT_SYNC_ITEMS, encryption_key)?;
        self.schedule_keyed(EVENT_SYNC_FOLDERS, encryption_key)?;
        Ok(snapshot)
    }

    /// Cached trash list, refreshed in the background on every call.
    pub fn list_trash(&self, encryption_key: &str) -> Result<ListItemsResult> {
        let key = DerivedKey::decode(encryption_key)?;
        let snapshot = get_encrypted(&self.kv, &key, keys::LIST_TRASH_ITEMS)?
            .unwrap_or_else(ListItemsResult::empty_success);

        self.schedule_keyed(EVENT_SYNC_TRASH, encryption_key)?;
        Ok(snapshot)
    }

    /// Cached folder list, refreshed in the background on every call.
    pub fn list_folders(&self, encryption_key: &str) -> Result<ListFoldersResult> {
        let key = DerivedKey::decode(encryption_key)?;
        let snapshot = get_encrypted(&self.kv, &key, keys::LIST_FOLDERS)?
            .unwrap_or_else(ListFoldersResult::empty_success);

        self.schedule_keyed(EVENT_SYNC_FOLDERS, encryption_key)?;
        Ok(snapshot)
    }

    /// Cached items of one folder, refreshed in the background.
    pub fn list_folder(&self, encryption_key: &str, folder_id: &str) -> Result<ListItemsResult> {
        let key = DerivedKey::decode(encryption_key)?;
        let snapshot = get_encrypted(&self.kv, &key, &keys::folder_items(folder_id))?
            .unwrap_or_else(ListItemsResult::empty_success);

        let mut metadata = keyed_metadata(encryption_key);
        metadata.insert(META_FOLDER_ID.into(), json!(folder_id));
        self.dispatcher.schedule(EVENT_SYNC_FOLDER_ITEMS, metadata)?;
        Ok(snapshot)
    }

    /// Force a refresh of the main item list without reading it.
    pub fn refresh(&self, encryption_key: &str) -> Result<()> {
        self.schedule_keyed(EVENT_SYNC_ITEMS, encryption_key)
    }

    /// Force a refresh of the trash list.
    pub fn refresh_trash(&self, encryption_key: &str) -> Result<()> {
        self.schedule_keyed(EVENT_SYNC_TRASH, encryption_key)
    }

    /// Force a refresh of the folder list.
    pub fn refresh_folders(&self, encryption_key: &str) -> Result<()> {
        self.schedule_keyed(EVENT_SYNC_FOLDERS, encryption_key)
    }

    /// Force a refresh of one folder's items.
    pub fn refresh_folder(&self, encryption_key: &str, folder_id: &str) -> Result<()> {
        let mut metadata = keyed_metadata(encryption_key);
        metadata.insert(META_FOLDER_ID.into(), json!(folder_id));
        self.dispatcher.schedule(EVENT_SYNC_FOLDER_ITEMS, metadata)?;
        Ok(())
    }

    // -- Item mutations ------------------------------------------------------

    /// Create a login item.
    pub async fn add_login(&self, encryption_key: &str, login: &NewLogin) -> StatusResponse {
        let result = async {
            let (_, token) = self.session_token(encryption_key)?;
            self.client.create_login(&token, login).await?;
            self.schedule_keyed(EVENT_SYNC_ITEMS, encryption_key)
        }
        .await;
        status_from(result)
    }

    /// Create a card item.
    pub async fn add_card(&self, encryption_key: &str, card: &NewCard) -> StatusResponse {
        let result = async {
            let (_, token) = self.session_token(encryption_key)?;
            self.client.create_card(&token, card).await?;
            self.schedule_keyed(EVENT_SYNC_ITEMS, encryption_key)
        }
        .await;
        status_from(result)
    }

    /// Apply sparse field edits to a login item.
    pub async fn edit_login(
        &self,
        encryption_key: &str,
        item_id: &str,
        patch: &ItemPatch,
    ) -> StatusResponse {
        self.edit_item(encryption_key, item_id, patch).await
    }

    /// Apply sparse field edits to a card item.
    pub async fn edit_card(
        &self,
        encryption_key: &str,
        item_id: &str,
        patch: &ItemPatch,
    ) -> StatusResponse {
        self.edit_item(encryption_key, item_id, patch).await
    }

    // The provider edits both kinds through the same fetch-merge-resend
    // path; the split entry points exist for the bridge surface.
    async fn edit_item(
        &self,
        encryption_key: &str,
        item_id: &str,
        patch: &ItemPatch,
    ) -> StatusResponse {
        let result = async {
            let (_, token) = self.session_token(encryption_key)?;
            self.client.edit_item(&token, item_id, patch).await?;
            self.schedule_keyed(EVENT_SYNC_ITEMS, encryption_key)
        }
        .await;
        status_from(result)
    }

    /// Move an item to the trash.
    pub async fn trash_item(&self, encryption_key: &str, item_id: &str) -> StatusResponse {
        let result = async {
            let (_, token) = self.session_token(encryption_key)?;
            self.client.delete_item(&token, item_id, false).await?;
            self.schedule_keyed(EVENT_SYNC_ITEMS, encryption_key)?;
            self.schedule_keyed(EVENT_SYNC_TRASH, encryption_key)
        }
        .await;
        status_from(result)
    }

    /// Permanently delete an item (from the trash).
    pub async fn delete_item(&self, encryption_key: &str, item_id: &str) -> StatusResponse {
        let result = async {
            let (_, token) = self.session_token(encryption_key)?;
            self.client.delete_item(&token, item_id, true).await?;
            self.schedule_keyed(EVENT_SYNC_TRASH, encryption_key)
        }
        .await;
        status_from(result)
    }

    /// Restore an item from the trash.
    pub async fn restore_item(&self, encryption_key: &str, item_id: &str) -> StatusResponse {
        let result = async {
            let (_, token) = self.session_token(encryption_key)?;
            self.client.restore_item(&token, item_id).await?;
            self.schedule_keyed(EVENT_SYNC_ITEMS, encryption_key)?;
            self.schedule_keyed(EVENT_SYNC_TRASH, encryption_key)
        }
        .await;
        status_from(result)
    }

    // -- Folder mutations ----------------------------------------------------

    /// Create a folder.
    pub async fn add_folder(&self, encryption_key: &str, name: &str) -> StatusResponse {
        let result = async {
            let (_, token) = self.session_token(encryption_key)?;
            self.client.create_folder(&token, name).await?;
            self.schedule_keyed(EVENT_SYNC_FOLDERS, encryption_key)
        }
        .await;
        status_from(result)
    }

    /// Rename a folder.
    pub async fn edit_folder(
        &self,
        encryption_key: &str,
        folder_id: &str,
        name: &str,
    ) -> StatusResponse {
        let result = async {
            let (_, token) = self.session_token(encryption_key)?;
            self.client.edit_folder(&token, folder_id, name).await?;
            self.schedule_keyed(EVENT_SYNC_FOLDERS, encryption_key)
        }
        .await;
        status_from(result)
    }

    /// Delete a folder. Items inside it survive, detached.
    pub async fn delete_folder(&self, encryption_key: &str, folder_id: &str) -> StatusResponse {
        let result = async {
            let (_, token) = self.session_token(encryption_key)?;
            self.client.delete_folder(&token, folder_id).await?;
            self.schedule_keyed(EVENT_SYNC_FOLDERS, encryption_key)?;
            self.schedule_keyed(EVENT_SYNC_ITEMS, encryption_key)
        }
        .await;
        status_from(result)
    }

    // -- Loading flag --------------------------------------------------------

    /// Whether a background sync is currently running, as last persisted.
    pub fn loading_state(&self) -> Result<bool> {
        Ok(self.kv.get(keys::LOADING)?.as_deref() == Some("1"))
    }

    /// Reset a loading flag left behind by an unclean shutdown.
    pub fn clear_loading(&self) -> Result<()> {
        self.kv.put(keys::LOADING, "0")?;
        Ok(())
    }

    // -- Internals -----------------------------------------------------------

    /// Decode the key and decrypt the session token; [`SyncError::NotLoggedIn`]
    /// when no token is stored.
    fn session_token(&self, encryption_key: &str) -> Result<(DerivedKey, String)> {
        let key = DerivedKey::decode(encryption_key)?;
        match self.sessions.token(&key)? {
            Some(token) => Ok((key, token)),
            None => Err(SyncError::NotLoggedIn),
        }
    }

    fn schedule_keyed(&self, event_id: &str, encryption_key: &str) -> Result<()> {
        self.dispatcher
            .schedule(event_id, keyed_metadata(encryption_key))?;
        Ok(())
    }
}

fn keyed_metadata(encryption_key: &str) -> Metadata {
    let mut metadata = Metadata::new();
    metadata.insert(META_ENCRYPTION_KEY.into(), json!(encryption_key));
    metadata
}

fn status_from(result: Result<()>) -> StatusResponse {
    match result {
        Ok(()) => StatusResponse::ok(),
        Err(SyncError::NotLoggedIn) => StatusResponse::failed("Not logged in"),
        Err(e) => StatusResponse::failed(e.to_string()),
    }
}
