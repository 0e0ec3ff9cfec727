//! Domain records crossing the UI bridge and the cache snapshots built from
//! them.
//!
//! Everything here is JSON-serializable: these are the exact shapes that get
//! encrypted into the KV store and handed back to the bridge on the read
//! path.

use serde::{Deserialize, Serialize};

use crate::error::{Result, SyncError};

/// Logical cache keys for the encrypted snapshots.
pub mod keys {
    pub const LIST_ITEMS: &str = "bw.list_items";
    pub const LIST_TRASH_ITEMS: &str = "bw.list_trash_items";
    pub const LIST_FOLDERS: &str = "bw.list_folders";
    pub const LIST_FOLDER_ITEMS: &str = "bw.list_folder_items";
    pub const LOADING: &str = "loading";
    pub const SETUP_DONE: &str = "sealed.setup_done";
    pub const SERVER_URL: &str = "config.server_url";

    /// Per-folder snapshot key: `bw.list_folder_items.<folderId>`.
    pub fn folder_items(folder_id: &str) -> String {
        format!("{LIST_FOLDER_ITEMS}.{folder_id}")
    }
}

/// The kind of vault item, mapped from the provider's numeric type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemKind {
    Login,
    SecureNote,
    Card,
    Identity,
    SshKey,
}

impl ItemKind {
    /// Total mapping from the provider's numeric item type. Unrecognized
    /// values fail loudly instead of defaulting.
    pub fn from_provider(value: i64) -> Result<Self> {
        match value {
            1 => Ok(Self::Login),
            2 => Ok(Self::SecureNote),
            3 => Ok(Self::Card),
            4 => Ok(Self::Identity),
            5 => Ok(Self::SshKey),
            other => Err(SyncError::UnknownItemKind { value: other }),
        }
    }

    /// The numeric type the provider expects back on writes.
    pub fn to_provider(self) -> i64 {
        match self {
            Self::Login => 1,
            Self::SecureNote => 2,
            Self::Card => 3,
            Self::Identity => 4,
            Self::SshKey => 5,
        }
    }
}

/// A vault item as shown to the UI. Card fields are empty strings for
/// logins and vice versa, mirroring the flat record the bridge expects.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Item {
    pub id: String,
    pub name: String,
    pub username: String,
    pub password: String,
    pub favorite: bool,
    pub item_type: ItemKind,
    pub notes: String,
    pub created: String,
    pub updated: String,
    pub totp: String,
    pub cardholder_name: String,
    pub brand: String,
    pub number: String,
    pub expiry_month: String,
    pub expiry_year: String,
    pub code: String,
    pub folder_id: String,
    pub folder_name: String,
}

/// A vault folder.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Folder {
    pub id: String,
    pub name: String,
}

/// Snapshot of an item list (items, trash, or one folder's items).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListItemsResult {
    pub success: bool,
    pub items: Vec<Item>,
}

impl ListItemsResult {
    pub fn empty_success() -> Self {
        Self {
            success: true,
            items: Vec::new(),
        }
    }

    pub fn empty_failure() -> Self {
        Self {
            success: false,
            items: Vec::new(),
        }
    }
}

/// Snapshot of the folder list.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListFoldersResult {
    pub success: bool,
    pub folders: Vec<Folder>,
}

impl ListFoldersResult {
    pub fn empty_success() -> Self {
        Self {
            success: true,
            folders: Vec::new(),
        }
    }

    pub fn empty_failure() -> Self {
        Self {
            success: false,
            folders: Vec::new(),
        }
    }
}

/// The `{success, message}` shape every mutating bridge call returns.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusResponse {
    pub success: bool,
    #[serde(default)]
    pub message: String,
}

impl StatusResponse {
    pub fn ok() -> Self {
        Self {
            success: true,
            message: String::new(),
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
        }
    }
}

/// Result of a login or unlock attempt. On success the base64 encryption
/// key is handed back so the bridge can pass it into subsequent calls.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoginResponse {
    pub success: bool,
    pub encryption_key: Option<String>,
    #[serde(default)]
    pub message: String,
}

impl LoginResponse {
    pub fn succeeded(encryption_key: String) -> Self {
        Self {
            success: true,
            encryption_key: Some(encryption_key),
            message: String::new(),
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            success: false,
            encryption_key: None,
            message: message.into(),
        }
    }
}

/// Outcome of the periodic session validation.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct SessionValidation {
    pub valid: bool,
    pub logged_out: bool,
}

/// Which credential fields the UI must collect before calling login/unlock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoginField {
    Email,
    Password,
    Totp,
}

/// Login-screen shape derived from local state and provider status.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoginScreen {
    pub show: bool,
    pub fields: Vec<LoginField>,
}

/// Local configuration surfaced to the UI.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Configuration {
    pub server_url: String,
}

/// Fields for a new login item.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NewLogin {
    pub name: String,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
    #[serde(default)]
    pub notes: String,
    #[serde(default)]
    pub totp: String,
    #[serde(default)]
    pub favorite: bool,
    #[serde(default)]
    pub folder_id: String,
}

/// Fields for a new card item.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NewCard {
    pub name: String,
    #[serde(default)]
    pub cardholder_name: String,
    #[serde(default)]
    pub brand: String,
    #[serde(default)]
    pub number: String,
    #[serde(default)]
    pub exp_month: String,
    #[serde(default)]
    pub exp_year: String,
    #[serde(default)]
    pub code: String,
    #[serde(default)]
    pub favorite: bool,
    #[serde(default)]
    pub folder_id: String,
}

/// Reformat a provider RFC 3339 timestamp as `YYYY-MM-DD HH:MM`; anything
/// unparseable collapses to an empty string rather than leaking the raw
/// value to the UI.
pub fn format_provider_date(raw: &str) -> String {
    match chrono::DateTime::parse_from_rfc3339(raw) {
        Ok(dt) => dt.format("%Y-%m-%d %H:%M").to_string(),
        Err(_) => String::new(),
    }
}

/// Zero-pad an expiry component to `width` digits; empty stays empty.
pub fn pad_expiry(raw: &str, width: usize) -> String {
    if raw.is_empty() {
        return String::new();
    }
    format!("{raw:0>width$}")
}

/// Sort items for display: favorites first, then case-sensitive name
/// ascending.
pub fn sort_items(items: &mut [Item]) {
    items.sort_by(|a, b| b.favorite.cmp(&a.favorite).then_with(|| a.name.cmp(&b.name)));
}

/// Sort folders by name ascending.
pub fn sort_folders(folders: &mut [Folder]) {
    folders.sort_by(|a, b| a.name.cmp(&b.name));
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
