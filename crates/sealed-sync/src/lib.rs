//! # sealed-sync
//!
//! Sync orchestrator for sealed: the local proxy in front of a remote
//! credential vault.
//!
//! - [`provider`]: vault provider client over an external command executor
//!   ([`CommandExecutor`] is the seam tests mock).
//! - [`events`]: background sync handlers driven by `sealed-dispatch`,
//!   writing encrypted snapshots into `sealed-store`.
//! - [`app`]: the [`SealedApp`] facade the UI bridge calls: cached reads
//!   with background refresh, remote mutations, session lifecycle.
//! - [`model`]: bridge-facing records and cache keys.
//! - [`testing`]: scripted executor for driving the stack without a
//!   provider binary.

pub mod app;
pub mod error;
pub mod events;
pub mod model;
pub mod provider;
pub mod testing;

// ── re-exports ───────────────────────────────────────────────────────

pub use app::{
    EVENT_SYNC_FOLDER_ITEMS, EVENT_SYNC_FOLDERS, EVENT_SYNC_ITEMS, EVENT_SYNC_TRASH,
    EVENT_VALIDATE_SESSION, SESSION_CHECK_INTERVAL, SealedApp,
};
pub use error::{Result, SyncError};
pub use events::{SESSION_SIGNAL, SyncContext, ValidateSessionHandler};
pub use model::{
    Configuration, Folder, Item, ItemKind, ListFoldersResult, ListItemsResult, LoginField,
    LoginResponse, LoginScreen, NewCard, NewLogin, StatusResponse, keys,
};
pub use provider::{
    BwClient, BwCommandExecutor, CommandExecutor, CommandOutput, ItemPatch, ProviderStatus,
    merge_item,
};
pub use testing::ScriptedExecutor;
