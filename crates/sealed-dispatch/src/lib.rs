//! # sealed-dispatch
//!
//! Background event dispatcher for sealed.
//!
//! - **[`dispatcher`]**: named-event registry with a coalescing FIFO job
//!   queue ([`crossbeam::queue::SegQueue`]), a single tokio worker, and
//!   interval-driven self-repeating events.
//! - **[`loading`]**: composable loading-flag wrapper applied around
//!   individual handlers at registration time.
//! - **[`signal`]**: named-signal broadcast channel toward the UI bridge.
//! - **[`error`]**: unified dispatcher error types via [`thiserror`].
//!
//! All public types are `Send + Sync` and designed for use within a
//! multi-threaded tokio runtime.

pub mod dispatcher;
pub mod error;
pub mod loading;
pub mod signal;

// ── re-exports ───────────────────────────────────────────────────────

pub use dispatcher::{Dispatcher, Event, EventHandler, EventState, Metadata};
pub use error::{DispatchError, Result};
pub use loading::{LoadingSink, WithLoading};
pub use signal::{Signal, SignalBus};
