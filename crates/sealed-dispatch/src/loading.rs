//! Loading-state wrapper for event handlers.
//!
//! [`WithLoading`] composes around any [`EventHandler`] at registration
//! time: the sink sees `true` before the inner handler runs and `false`
//! after it returns, on success and failure alike. The effect order is
//! explicit here instead of being hidden inside the dispatcher, so it can
//! be tested independently of the wrapped logic.

use std::sync::Arc;

use async_trait::async_trait;

use crate::dispatcher::{EventHandler, Metadata};

/// Where the loading flag goes: typically persisted to the KV store and
/// mirrored to the UI bridge as the named `loading` signal.
pub trait LoadingSink: Send + Sync {
    fn set_loading(&self, loading: bool);
}

/// An [`EventHandler`] that brackets its inner handler with loading flags.
pub struct WithLoading<H> {
    inner: H,
    sink: Arc<dyn LoadingSink>,
}

impl<H: EventHandler> WithLoading<H> {
    pub fn new(inner: H, sink: Arc<dyn LoadingSink>) -> Self {
        Self { inner, sink }
    }
}

#[async_trait]
impl<H: EventHandler> EventHandler for WithLoading<H> {
    async fn trigger(&self, metadata: Metadata) -> Result<serde_json::Value, String> {
        self.sink.set_loading(true);
        let result = self.inner.trigger(metadata).await;
        self.sink.set_loading(false);
        result
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct FlagLog(Mutex<Vec<bool>>);

    impl LoadingSink for FlagLog {
        fn set_loading(&self, loading: bool) {
            self.0.lock().unwrap().push(loading);
        }
    }

    struct Succeeding;

    #[async_trait]
    impl EventHandler for Succeeding {
        async fn trigger(&self, _: Metadata) -> Result<serde_json::Value, String> {
            Ok(serde_json::Value::Bool(true))
        }
    }

    struct Failing;

    #[async_trait]
    impl EventHandler for Failing {
        async fn trigger(&self, _: Metadata) -> Result<serde_json::Value, String> {
            Err("boom".into())
        }
    }

    #[tokio::test]
    async fn loading_brackets_successful_handler() {
        let log = Arc::new(FlagLog(Mutex::new(Vec::new())));
        let wrapped = WithLoading::new(Succeeding, log.clone());

        let result = wrapped.trigger(Metadata::new()).await;
        assert!(result.is_ok());
        assert_eq!(*log.0.lock().unwrap(), vec![true, false]);
    }

    #[tokio::test]
    async fn loading_cleared_even_when_handler_fails() {
        let log = Arc::new(FlagLog(Mutex::new(Vec::new())));
        let wrapped = WithLoading::new(Failing, log.clone());

        let result = wrapped.trigger(Metadata::new()).await;
        assert!(result.is_err());
        assert_eq!(*log.0.lock().unwrap(), vec![true, false]);
    }
}
