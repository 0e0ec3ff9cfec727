//! # sealed-store
//!
//! Persistent key-value storage for sealed.
//!
//! Provides a SQLite-backed store with WAL mode, optional per-entry TTL,
//! and atomic prefix-wide deletes. Every other sealed crate persists
//! through this one: encrypted snapshots, the salt, configuration, and the
//! loading flag all live in the single `kv` table under dotted-namespace
//! keys (`bw.`, `config.`, `encryption.`, `memoization.`).

pub mod error;
pub mod kv;

// ── re-exports ───────────────────────────────────────────────────────

pub use error::{Result, StoreError};
pub use kv::KvStore;
