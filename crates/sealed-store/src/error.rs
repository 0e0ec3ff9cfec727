//! Store error types.
//!
//! All store operations surface errors through [`StoreError`], which is the
//! single error type returned by every public API in this crate.

/// Unified error type for the sealed KV store.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// SQLite error from `rusqlite`.
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// JSON serialization/deserialization error for typed accessors.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The connection mutex was poisoned by a panicking writer.
    #[error("store lock poisoned: {0}")]
    LockPoisoned(String),
}

/// Convenience alias used throughout the store crate.
pub type Result<T> = std::result::Result<T, StoreError>;
