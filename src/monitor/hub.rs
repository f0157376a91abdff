//! The event hub: sole writer of the job log store and sole broadcaster to
//! live observers.
//!
//! ```text
//!  producers ──emit()──> [ingest queue, bounded] ──> hub loop (one thread)
//!                              │ full → drop + warn        │ assign seq id
//!                                                          │ append to <job>.jsonl
//!                                                          │ fan out (registry read lock)
//!                                                          v
//!                                        [observer queue, bounded] ──> Subscription
//!                                              full → drop for that observer only
//! ```
//!
//! Two independent bounded queues: ingest overload loses events globally
//! but never stalls a producer; a slow observer only loses its own copies.
//! The loop owns the sequence counter and the open file map, so
//! "write order == broadcast order == file order" holds without per-job
//! locks.

use std::collections::{HashMap, HashSet};
use std::fs::File;
use std::io::Write;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, warn};

use super::event::{Event, EventData, EventType};
use super::store::{JobLogStore, is_valid_job_id};

/// Default bound of the shared ingestion queue.
pub const DEFAULT_INGEST_CAPACITY: usize = 4096;

/// Default bound of each observer's delivery queue.
pub const DEFAULT_SUBSCRIBER_CAPACITY: usize = 64;

/// Non-blocking ingestion point for job events.
///
/// Implemented by [`Hub`]; tests substitute a recorder.
pub trait EventSink: Send + Sync {
    fn emit(&self, job_id: &str, event_type: EventType, data: EventData);
}

/// Queue bounds for a [`Hub`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HubConfig {
    pub ingest_capacity: usize,
    pub subscriber_capacity: usize,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            ingest_capacity: DEFAULT_INGEST_CAPACITY,
            subscriber_capacity: DEFAULT_SUBSCRIBER_CAPACITY,
        }
    }
}

/// An event as accepted from a producer, before the loop numbers it.
struct PendingEvent {
    job_id: String,
    event_type: EventType,
    timestamp: DateTime<Utc>,
    data: EventData,
}

enum Command {
    Event(PendingEvent),
    Shutdown(oneshot::Sender<()>),
}

struct Subscriber {
    /// `None` receives every job.
    filter: Option<String>,
    tx: mpsc::Sender<Arc<Event>>,
}

impl Subscriber {
    fn wants(&self, job_id: &str) -> bool {
        self.filter.as_deref().is_none_or(|f| f == job_id)
    }
}

#[derive(Default)]
struct Registry {
    subscribers: HashMap<u64, Subscriber>,
}

type SharedRegistry = Arc<RwLock<Registry>>;

// Observer bookkeeping stays consistent even if a holder panicked, so a
// poisoned lock is recovered rather than propagated.
fn read_registry(registry: &SharedRegistry) -> RwLockReadGuard<'_, Registry> {
    registry.read().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn write_registry(registry: &SharedRegistry) -> RwLockWriteGuard<'_, Registry> {
    registry.write().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Remove one observer. Dropping its sender closes the queue, and the map
/// removal guarantees that happens at most once.
fn remove_subscriber(registry: &SharedRegistry, id: u64) -> bool {
    write_registry(registry).subscribers.remove(&id).is_some()
}

struct HubInner {
    tx: mpsc::Sender<Command>,
    registry: SharedRegistry,
    next_subscriber_id: AtomicU64,
    subscriber_capacity: usize,
    store: JobLogStore,
}

/// Handle to the event hub. Cheap to clone; every clone feeds the same loop.
#[derive(Clone)]
pub struct Hub {
    inner: Arc<HubInner>,
}

impl Hub {
    /// Create a hub persisting into `store` and start its processing loop on
    /// a dedicated thread (the loop blocks on file I/O, never on producers).
    pub fn start(store: JobLogStore, config: HubConfig) -> std::io::Result<Self> {
        let (tx, rx) = mpsc::channel(config.ingest_capacity.max(1));
        let registry = SharedRegistry::default();

        let worker = HubWorker {
            rx,
            registry: Arc::clone(&registry),
            store: store.clone(),
            files: HashMap::new(),
            unpersisted: HashSet::new(),
            seq: 0,
        };
        std::thread::Builder::new()
            .name("foreman-hub".to_string())
            .spawn(move || worker.run())?;

        info!(
            dir = %store.dir().display(),
            ingest_capacity = config.ingest_capacity,
            subscriber_capacity = config.subscriber_capacity,
            "event hub started"
        );

        Ok(Self {
            inner: Arc::new(HubInner {
                tx,
                registry,
                next_subscriber_id: AtomicU64::new(1),
                subscriber_capacity: config.subscriber_capacity.max(1),
                store,
            }),
        })
    }

    pub fn store(&self) -> &JobLogStore {
        &self.inner.store
    }

    /// Enqueue an event. Never blocks: an empty `job_id` is ignored and a
    /// full ingestion queue drops the event with a warning.
    pub fn emit(&self, job_id: &str, event_type: EventType, data: EventData) {
        if job_id.is_empty() {
            return;
        }
        let pending = PendingEvent {
            job_id: job_id.to_string(),
            event_type,
            timestamp: Utc::now(),
            data,
        };
        match self.inner.tx.try_send(Command::Event(pending)) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!(job_id = %job_id, event_type = %event_type, "hub ingest queue full, dropping event");
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                debug!(job_id = %job_id, event_type = %event_type, "hub shut down, dropping event");
            }
        }
    }

    /// Register an observer. `None` (or an empty string) receives every
    /// job's events; otherwise only the named job's.
    pub fn subscribe(&self, job_id: Option<&str>) -> Subscription {
        let (tx, rx) = mpsc::channel(self.inner.subscriber_capacity);
        let id = self.inner.next_subscriber_id.fetch_add(1, Ordering::Relaxed);
        let filter = job_id.filter(|j| !j.is_empty()).map(str::to_string);

        // The loop closes its receiver before clearing the registry under the
        // write lock, so checking under the same lock cannot miss shutdown.
        // A late subscriber gets an already-closed queue.
        {
            let mut registry = write_registry(&self.inner.registry);
            if self.inner.tx.is_closed() {
                debug!(subscriber = id, "hub shut down, subscription closed");
            } else {
                debug!(subscriber = id, filter = ?filter, "observer subscribed");
                registry.subscribers.insert(id, Subscriber { filter, tx });
            }
        }

        Subscription {
            id,
            rx,
            registry: Arc::clone(&self.inner.registry),
        }
    }

    /// Remove an observer and close its queue. Safe to call repeatedly and
    /// concurrently with fan-out.
    pub fn unsubscribe(&self, subscription: &Subscription) {
        if remove_subscriber(&self.inner.registry, subscription.id) {
            debug!(subscriber = subscription.id, "observer unsubscribed");
        }
    }

    pub fn subscriber_count(&self) -> usize {
        read_registry(&self.inner.registry).subscribers.len()
    }

    /// Drain every event accepted so far, close all job files and observer
    /// queues, and stop the loop. Later emits are dropped.
    pub async fn shutdown(&self) {
        let (done_tx, done_rx) = oneshot::channel();
        if self.inner.tx.send(Command::Shutdown(done_tx)).await.is_err() {
            return;
        }
        let _ = done_rx.await;
    }
}

impl EventSink for Hub {
    fn emit(&self, job_id: &str, event_type: EventType, data: EventData) {
        Hub::emit(self, job_id, event_type, data);
    }
}

/// A live observer's end of its delivery queue. Dropping it unsubscribes.
pub struct Subscription {
    id: u64,
    rx: mpsc::Receiver<Arc<Event>>,
    registry: SharedRegistry,
}

impl Subscription {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Next event, or `None` once the observer was removed (or the hub shut
    /// down) and the queue is drained.
    pub async fn recv(&mut self) -> Option<Arc<Event>> {
        self.rx.recv().await
    }

    pub fn try_recv(&mut self) -> Option<Arc<Event>> {
        self.rx.try_recv().ok()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        remove_subscriber(&self.registry, self.id);
    }
}

/// State owned exclusively by the hub loop.
struct HubWorker {
    rx: mpsc::Receiver<Command>,
    registry: SharedRegistry,
    store: JobLogStore,
    files: HashMap<String, File>,
    /// Job ids that cannot name a log file; their events are only fanned out.
    unpersisted: HashSet<String>,
    seq: u64,
}

impl HubWorker {
    fn run(mut self) {
        while let Some(command) = self.rx.blocking_recv() {
            match command {
                Command::Event(pending) => self.accept(pending),
                Command::Shutdown(done) => {
                    self.rx.close();
                    let mut waiters = vec![done];
                    // Events queued behind the marker were already accepted.
                    while let Ok(command) = self.rx.try_recv() {
                        match command {
                            Command::Event(pending) => self.accept(pending),
                            Command::Shutdown(done) => waiters.push(done),
                        }
                    }
                    self.close();
                    for done in waiters {
                        let _ = done.send(());
                    }
                    return;
                }
            }
        }
        self.close();
    }

    fn accept(&mut self, pending: PendingEvent) {
        self.seq += 1;
        let event = Arc::new(Event {
            id: self.seq.to_string(),
            job_id: pending.job_id,
            event_type: pending.event_type,
            timestamp: pending.timestamp,
            data: pending.data,
        });
        self.persist(&event);
        self.fan_out(&event);
    }

    fn persist(&mut self, event: &Event) {
        let mut line = match serde_json::to_vec(event) {
            Ok(line) => line,
            Err(e) => {
                error!(job_id = %event.job_id, "failed to serialize event: {}", e);
                return;
            }
        };
        line.push(b'\n');

        if !self.files.contains_key(&event.job_id) {
            if !is_valid_job_id(&event.job_id) {
                if self.unpersisted.insert(event.job_id.clone()) {
                    debug!(job_id = %event.job_id, "unsafe job id, events will not be persisted");
                }
                return;
            }
            match self.store.open_append(&event.job_id) {
                Ok(file) => {
                    self.files.insert(event.job_id.clone(), file);
                }
                Err(e) => {
                    error!(job_id = %event.job_id, "failed to open job log: {}", e);
                    return;
                }
            }
        }

        if let Some(file) = self.files.get_mut(&event.job_id)
            && let Err(e) = file.write_all(&line)
        {
            error!(job_id = %event.job_id, event_id = %event.id, "failed to append to job log: {}", e);
            // Reopen on the next event rather than writing after a torn line.
            self.files.remove(&event.job_id);
        }
    }

    fn fan_out(&self, event: &Arc<Event>) {
        let registry = read_registry(&self.registry);
        for (id, subscriber) in &registry.subscribers {
            if !subscriber.wants(&event.job_id) {
                continue;
            }
            if let Err(mpsc::error::TrySendError::Full(_)) = subscriber.tx.try_send(Arc::clone(event)) {
                debug!(subscriber = id, job_id = %event.job_id, event_id = %event.id, "observer too slow, dropping event");
            }
        }
    }

    fn close(&mut self) {
        for (job_id, file) in self.files.drain() {
            if let Err(e) = file.sync_data() {
                warn!(job_id = %job_id, "failed to sync job log on shutdown: {}", e);
            }
        }
        let closed = {
            let mut registry = write_registry(&self.registry);
            let count = registry.subscribers.len();
            registry.subscribers.clear();
            count
        };
        info!(seq = self.seq, observers_closed = closed, "event hub stopped");
    }
}
