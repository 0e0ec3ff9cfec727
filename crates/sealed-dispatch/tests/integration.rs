//! Integration test: a loading-wrapped handler running through the full
//! dispatcher loop, with the flag mirrored onto the signal bus.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use sealed_dispatch::{
    Dispatcher, Event, EventHandler, LoadingSink, Metadata, SignalBus, WithLoading,
};
use serde_json::json;

struct BusSink(SignalBus);

impl LoadingSink for BusSink {
    fn set_loading(&self, loading: bool) {
        self.0.send("loading", json!(loading));
    }
}

struct CountingHandler(Arc<AtomicU32>);

#[async_trait]
impl EventHandler for CountingHandler {
    async fn trigger(&self, _: Metadata) -> Result<serde_json::Value, String> {
        self.0.fetch_add(1, Ordering::SeqCst);
        Ok(serde_json::Value::Null)
    }
}

#[tokio::test]
async fn scheduled_job_emits_loading_signals_around_execution() {
    let bus = SignalBus::new(16);
    let mut rx = bus.subscribe();

    let runs = Arc::new(AtomicU32::new(0));
    let handler = WithLoading::new(CountingHandler(runs.clone()), Arc::new(BusSink(bus.clone())));

    let dispatcher = Dispatcher::new();
    dispatcher
        .register(Event::new("sync-items", Arc::new(handler)))
        .unwrap();
    let worker = dispatcher.start();

    dispatcher.schedule("sync-items", Metadata::new()).unwrap();

    let on = rx.recv().await.unwrap();
    assert_eq!(on.name, "loading");
    assert_eq!(on.payload, json!(true));

    let off = rx.recv().await.unwrap();
    assert_eq!(off.payload, json!(false));

    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(runs.load(Ordering::SeqCst), 1);

    dispatcher.shutdown();
    worker.await.unwrap();
}
