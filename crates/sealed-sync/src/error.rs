//! Sync error types.
//!
//! [`SyncError`] is the single error type of the orchestrator crate. The
//! variants that matter to the UI are the distinguishable ones:
//! [`SyncError::InvalidPassword`] (decryption said wrong key),
//! [`SyncError::NotLoggedIn`] (precondition: no session), and
//! [`SyncError::NeedsSecondFactor`] (provider wants a one-time code).
//! Everything else collapses into a `{success: false, message}` response at
//! the bridge boundary.

/// Unified error type for the sealed sync orchestrator.
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    // -- Provider errors ----------------------------------------------------
    /// The provider command exited non-zero; the failure text is attached.
    #[error("provider command failed: {message}")]
    CommandFailed { message: String },

    /// The provider command could not be spawned at all.
    #[error("failed to spawn provider command: {reason}")]
    SpawnFailed { reason: String },

    /// The provider command exceeded its time limit.
    #[error("provider command timed out after {seconds}s")]
    Timeout { seconds: u64 },

    /// Provider output was not the JSON we expected.
    #[error("malformed provider output: {0}")]
    MalformedOutput(#[from] serde_json::Error),

    /// The provider reported a status string we do not recognize.
    #[error("unknown provider status: {value}")]
    UnknownStatus { value: String },

    /// The provider reported a numeric item type we do not recognize.
    #[error("unknown item kind: {value}")]
    UnknownItemKind { value: i64 },

    /// An item record is missing a required field or has the wrong shape.
    #[error("malformed item record: {reason}")]
    MalformedItem { reason: String },

    // -- Session / auth errors ----------------------------------------------
    /// The provider requires a two-factor code to complete the login.
    #[error("second factor required")]
    NeedsSecondFactor,

    /// The master password does not match the stored session blob.
    #[error("invalid password")]
    InvalidPassword,

    /// The operation needs a session token and none is stored.
    #[error("not logged in")]
    NotLoggedIn,

    // -- Underlying errors --------------------------------------------------
    /// Encryption-engine failure other than a key mismatch.
    #[error("vault error: {0}")]
    Vault(sealed_vault::VaultError),

    /// KV store failure.
    #[error("store error: {0}")]
    Store(#[from] sealed_store::StoreError),

    /// Dispatcher failure (unknown event id, shut down).
    #[error("dispatch error: {0}")]
    Dispatch(#[from] sealed_dispatch::DispatchError),
}

impl From<sealed_vault::VaultError> for SyncError {
    fn from(err: sealed_vault::VaultError) -> Self {
        // A key mismatch is the wrong-password signal and keeps its own
        // variant; everything else is an internal vault failure.
        match err {
            sealed_vault::VaultError::AuthenticationFailed => SyncError::InvalidPassword,
            other => SyncError::Vault(other),
        }
    }
}

/// Convenience alias used throughout the sync crate.
pub type Result<T> = std::result::Result<T, SyncError>;
