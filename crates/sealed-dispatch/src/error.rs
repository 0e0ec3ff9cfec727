//! Dispatcher error types.

/// Unified error type for the sealed event dispatcher.
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    /// An event with this id is already registered. Events are registered
    /// once at process start; hitting this is a programming error.
    #[error("event already registered: {id}")]
    DuplicateEvent { id: String },

    /// `schedule` referenced an id that was never registered.
    #[error("event not found: {id}")]
    EventNotFound { id: String },

    /// The dispatcher has been shut down and will not accept new jobs.
    #[error("dispatcher is shut down")]
    Shutdown,
}

/// Convenience alias used throughout the dispatcher crate.
pub type Result<T> = std::result::Result<T, DispatchError>;
