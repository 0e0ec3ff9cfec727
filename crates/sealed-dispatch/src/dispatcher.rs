//! Coalescing background event dispatcher.
//!
//! The dispatcher holds a process-wide registry of named events, accepts
//! non-blocking [`Dispatcher::schedule`] calls from any thread, and drives
//! execution with a single tokio worker that drains a
//! [`crossbeam::queue::SegQueue`] in enqueue order.
//!
//! # Per-event lifecycle
//!
//! ```text
//! Idle  -->  Scheduled  -->  Running  -->  Idle
//! ```
//!
//! # Deduplication
//!
//! Read paths schedule a refresh on every call, so repeated schedules for
//! an event that already has a pending job coalesce into one job and the
//! newest metadata wins. Jobs for distinct events keep their enqueue order.
//!
//! Events registered with an interval additionally get a job injected with
//! empty metadata every time the interval elapses, independent of explicit
//! schedules. Handler failures are logged at the loop boundary and never
//! terminate the worker.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use crossbeam::queue::SegQueue;
use dashmap::DashMap;
use tokio::sync::Notify;
use tokio::task::JoinHandle;

use crate::error::{DispatchError, Result};

/// Opaque job metadata handed to handlers.
pub type Metadata = serde_json::Map<String, serde_json::Value>;

/// The work attached to an event.
///
/// Handlers return a JSON-serializable result (surfaced to logs) or a
/// diagnostic string; either way the worker loop keeps going.
#[async_trait]
pub trait EventHandler: Send + Sync {
    async fn trigger(&self, metadata: Metadata) -> std::result::Result<serde_json::Value, String>;
}

/// A named background event, optionally self-repeating.
pub struct Event {
    pub id: String,
    pub handler: Arc<dyn EventHandler>,
    pub interval: Option<Duration>,
}

impl Event {
    /// An event that only runs when explicitly scheduled.
    pub fn new(id: impl Into<String>, handler: Arc<dyn EventHandler>) -> Self {
        Self {
            id: id.into(),
            handler,
            interval: None,
        }
    }

    /// Also trigger this event automatically every `interval`.
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = Some(interval);
        self
    }
}

/// Observable lifecycle state of a registered event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventState {
    Idle,
    Scheduled,
    Running,
}

struct Registered {
    handler: Arc<dyn EventHandler>,
    interval: Option<Duration>,
}

struct DispatcherInner {
    /// Registry of events, written once at startup.
    events: DashMap<String, Registered>,

    /// Coalesced metadata for every event with a pending job. Presence in
    /// this map is what "Scheduled" means; replacing the value is how
    /// last-metadata-wins works.
    pending: DashMap<String, Metadata>,

    /// Event ids in enqueue order. An id appears at most once while its
    /// `pending` entry exists.
    queue: SegQueue<String>,

    states: DashMap<String, EventState>,

    /// Wakes the worker when new work arrives.
    notify: Notify,

    started: AtomicBool,
    shutdown: AtomicBool,
}

/// Cheaply cloneable (`Arc`-backed) handle to the dispatcher.
#[derive(Clone)]
pub struct Dispatcher {
    inner: Arc<DispatcherInner>,
}

impl Dispatcher {
    /// Create a dispatcher **without** starting the worker. Register all
    /// events, then call [`Dispatcher::start`].
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Arc::new(DispatcherInner {
                events: DashMap::new(),
                pending: DashMap::new(),
                queue: SegQueue::new(),
                states: DashMap::new(),
                notify: Notify::new(),
                started: AtomicBool::new(false),
                shutdown: AtomicBool::new(false),
            }),
        }
    }

    /// Add `event` to the registry, at most once per id.
    pub fn register(&self, event: Event) -> Result<()> {
        let id = event.id.clone();
        let entry = Registered {
            handler: event.handler,
            interval: event.interval,
        };

        if self.inner.events.contains_key(&id) {
            return Err(DispatchError::DuplicateEvent { id });
        }
        self.inner.events.insert(id.clone(), entry);
        self.inner.states.insert(id.clone(), EventState::Idle);

        tracing::debug!(event_id = %id, "event registered");
        Ok(())
    }

    /// Enqueue a job for `event_id` without blocking.
    ///
    /// If a job for this event is already pending, the two collapse into one
    /// and `metadata` replaces the older metadata.
    pub fn schedule(&self, event_id: &str, metadata: Metadata) -> Result<()> {
        if self.inner.shutdown.load(Ordering::Acquire) {
            return Err(DispatchError::Shutdown);
        }
        if !self.inner.events.contains_key(event_id) {
            return Err(DispatchError::EventNotFound {
                id: event_id.to_string(),
            });
        }

        let already_pending = self
            .inner
            .pending
            .insert(event_id.to_string(), metadata)
            .is_some();

        if already_pending {
            tracing::trace!(event_id = event_id, "coalesced pending job");
        } else {
            self.inner.queue.push(event_id.to_string());
            self.inner
                .states
                .insert(event_id.to_string(), EventState::Scheduled);
            tracing::debug!(event_id = event_id, "job scheduled");
        }

        self.inner.notify.notify_one();
        Ok(())
    }

    /// Current lifecycle state of a registered event.
    pub fn state(&self, event_id: &str) -> Option<EventState> {
        self.inner.states.get(event_id).map(|s| *s)
    }

    /// Spawn the worker loop and one ticker per interval event. The worker
    /// runs for the lifetime of the process (until [`Dispatcher::shutdown`]).
    ///
    /// There is never more than one worker: jobs execute strictly one at a
    /// time, so handlers need no locking of their own. Repeat calls are
    /// no-ops returning an immediately finished handle.
    pub fn start(&self) -> JoinHandle<()> {
        let fresh = !self.inner.started.swap(true, Ordering::AcqRel);
        if !fresh {
            tracing::warn!("dispatcher already started, ignoring repeat start");
            return tokio::spawn(async {});
        }

        for entry in self.inner.events.iter() {
            if let Some(interval) = entry.value().interval {
                self.spawn_ticker(entry.key().clone(), interval);
            }
        }

        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            tracing::info!("dispatcher worker started");
            Self::worker_loop(&inner).await;
            tracing::info!("dispatcher worker stopped");
        })
    }

    /// Stop the worker after the current job (if any) finishes.
    pub fn shutdown(&self) {
        self.inner.shutdown.store(true, Ordering::Release);
        self.inner.notify.notify_one();
    }

    fn spawn_ticker(&self, event_id: String, interval: Duration) {
        let dispatcher = self.clone();
        tokio::spawn(async move {
            tracing::debug!(event_id = %event_id, ?interval, "interval ticker started");
            loop {
                tokio::time::sleep(interval).await;
                match dispatcher.schedule(&event_id, Metadata::new()) {
                    Ok(()) => {}
                    Err(DispatchError::Shutdown) => break,
                    Err(e) => {
                        tracing::warn!(event_id = %event_id, error = %e, "ticker schedule failed");
                    }
                }
            }
        });
    }

    async fn worker_loop(inner: &DispatcherInner) {
        loop {
            match inner.queue.pop() {
                Some(event_id) => {
                    // Consume the coalesced metadata; a missing entry means
                    // the job was already absorbed by an earlier pop.
                    let Some((_, metadata)) = inner.pending.remove(&event_id) else {
                        continue;
                    };
                    let Some(handler) = inner
                        .events
                        .get(&event_id)
                        .map(|e| Arc::clone(&e.handler))
                    else {
                        tracing::warn!(event_id = %event_id, "dropping job for unknown event");
                        continue;
                    };

                    inner.states.insert(event_id.clone(), EventState::Running);
                    tracing::debug!(event_id = %event_id, "job running");

                    match handler.trigger(metadata).await {
                        Ok(result) => {
                            tracing::trace!(event_id = %event_id, %result, "job completed");
                        }
                        Err(error) => {
                            tracing::error!(event_id = %event_id, error = %error, "job failed");
                        }
                    }

                    // A schedule that arrived mid-run re-pended the event.
                    let next = if inner.pending.contains_key(&event_id) {
                        EventState::Scheduled
                    } else {
                        EventState::Idle
                    };
                    inner.states.insert(event_id, next);
                }
                None => {
                    if inner.shutdown.load(Ordering::Acquire) {
                        break;
                    }
                    inner.notify.notified().await;
                    if inner.shutdown.load(Ordering::Acquire) {
                        break;
                    }
                }
            }
        }
    }
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
