#![allow(
    dead_code,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::todo,
    clippy::unimplemented,
    clippy::indexing_slicing
)]
//! Shared test utilities for room-sync integration tests.
//!
//! Provides a [`ScriptedStore`] that wraps a [`MemoryStore`] with an
//! operation journal, failure injection and write gating, a
//! [`ScriptedBackend`] to bootstrap against it, and a [`RecordingSession`]
//! that records session transport calls.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use async_trait::async_trait;
use room_sync::store::ValueChange;
use room_sync::{
    Backend, BackendConfig, BackendInit, CoordinatorConfig, DependencyStatus, KeyValueStore,
    MemoryStore, Readiness, RoomCoordinator, RoomSyncError, RoomSyncEvent, SessionTransport,
    Status, Subscription, UserId,
};
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};

/// Upper bound on how long a test waits for any single event.
pub const EVENT_TIMEOUT: Duration = Duration::from_secs(2);

// ── ScriptedStore ───────────────────────────────────────────────────

/// A store call observed by [`ScriptedStore`].
#[derive(Debug, Clone, PartialEq)]
pub enum StoreOp {
    Read(String),
    Write(String, Value),
    Subscribe(String),
}

/// Handles for a write held by [`ScriptedStore::hold_next_write`].
pub struct WriteHold {
    /// Resolves once the held write has been issued.
    pub entered: oneshot::Receiver<()>,
    /// Send (or drop) to let the held write proceed.
    pub release: oneshot::Sender<()>,
}

struct HeldWrite {
    path: String,
    entered: oneshot::Sender<()>,
    release: oneshot::Receiver<()>,
}

/// A [`MemoryStore`] wrapper that records every call and can be told to
/// fail, or to hold, specific operations.
#[derive(Default)]
pub struct ScriptedStore {
    inner: MemoryStore,
    journal: StdMutex<Vec<StoreOp>>,
    failing_write_prefixes: StdMutex<Vec<String>>,
    fail_reads: AtomicBool,
    fail_subscribe: AtomicBool,
    held: StdMutex<Option<HeldWrite>>,
    listeners: StdMutex<Vec<mpsc::UnboundedSender<ValueChange>>>,
}

impl ScriptedStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// A store whose tree already holds `value` at `path`.
    pub async fn with_value(path: &str, value: Value) -> Arc<Self> {
        let store = Self::default();
        store.inner.write(path, value).await.unwrap();
        Arc::new(store)
    }

    /// The wrapped store. Writes made through it bypass the journal, which
    /// makes it the way to simulate another client.
    pub fn inner(&self) -> &MemoryStore {
        &self.inner
    }

    pub fn journal(&self) -> Vec<StoreOp> {
        self.journal.lock().unwrap().clone()
    }

    /// Only the write calls, in order.
    pub fn writes(&self) -> Vec<(String, Value)> {
        self.journal()
            .into_iter()
            .filter_map(|op| match op {
                StoreOp::Write(path, value) => Some((path, value)),
                _ => None,
            })
            .collect()
    }

    /// Write calls targeting exactly `path`.
    pub fn writes_to(&self, path: &str) -> Vec<Value> {
        self.writes()
            .into_iter()
            .filter(|(p, _)| p == path)
            .map(|(_, v)| v)
            .collect()
    }

    /// Reject every write whose path starts with `prefix`.
    pub fn fail_writes_under(&self, prefix: &str) {
        self.failing_write_prefixes
            .lock()
            .unwrap()
            .push(prefix.to_owned());
    }

    pub fn fail_reads(&self) {
        self.fail_reads.store(true, Ordering::SeqCst);
    }

    pub fn fail_subscribe(&self) {
        self.fail_subscribe.store(true, Ordering::SeqCst);
    }

    /// Hold the next write to `path` until the returned release fires.
    pub fn hold_next_write(&self, path: &str) -> WriteHold {
        let (entered_tx, entered_rx) = oneshot::channel();
        let (release_tx, release_rx) = oneshot::channel();
        *self.held.lock().unwrap() = Some(HeldWrite {
            path: path.to_owned(),
            entered: entered_tx,
            release: release_rx,
        });
        WriteHold {
            entered: entered_rx,
            release: release_tx,
        }
    }

    /// Deliver a database-level error to every attached subscription.
    pub fn push_listener_error(&self, reason: &str) {
        for tx in self.listeners.lock().unwrap().iter() {
            let _ = tx.send(Err(RoomSyncError::Listener {
                path: "currentRoom".into(),
                reason: reason.into(),
            }));
        }
    }

    fn record(&self, op: StoreOp) {
        self.journal.lock().unwrap().push(op);
    }
}

#[async_trait]
impl KeyValueStore for ScriptedStore {
    async fn read(&self, path: &str) -> Result<Option<Value>, RoomSyncError> {
        self.record(StoreOp::Read(path.to_owned()));
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(RoomSyncError::StoreRead {
                path: path.to_owned(),
                reason: "scripted read failure".into(),
            });
        }
        self.inner.read(path).await
    }

    async fn write(&self, path: &str, value: Value) -> Result<(), RoomSyncError> {
        self.record(StoreOp::Write(path.to_owned(), value.clone()));

        let held = {
            let mut slot = self.held.lock().unwrap();
            if slot.as_ref().is_some_and(|h| h.path == path) {
                slot.take()
            } else {
                None
            }
        };
        if let Some(held) = held {
            let _ = held.entered.send(());
            let _ = held.release.await;
        }

        let failing = self
            .failing_write_prefixes
            .lock()
            .unwrap()
            .iter()
            .any(|prefix| path.starts_with(prefix.as_str()));
        if failing {
            return Err(RoomSyncError::StoreWrite {
                path: path.to_owned(),
                reason: "scripted write failure".into(),
            });
        }
        self.inner.write(path, value).await
    }

    async fn subscribe(&self, path: &str) -> Result<Subscription, RoomSyncError> {
        self.record(StoreOp::Subscribe(path.to_owned()));
        if self.fail_subscribe.load(Ordering::SeqCst) {
            return Err(RoomSyncError::StoreUnavailable(
                "scripted subscribe failure".into(),
            ));
        }

        // Forward the inner subscription through a channel we can also inject into.
        let mut inner = self.inner.subscribe(path).await?;
        let (tx, subscription) = Subscription::channel(path);
        self.listeners.lock().unwrap().push(tx.clone());
        tokio::spawn(async move {
            while let Some(change) = inner.next_change().await {
                if tx.send(change).is_err() {
                    break;
                }
            }
        });
        Ok(subscription)
    }
}

// ── ScriptedBackend ─────────────────────────────────────────────────

/// A [`Backend`] serving a [`ScriptedStore`] with scripted bootstrap outcomes.
pub struct ScriptedBackend {
    pub store: Arc<ScriptedStore>,
    pub dependency_status: DependencyStatus,
    /// `None` makes anonymous sign-in fail.
    pub user_id: Option<String>,
}

impl ScriptedBackend {
    pub fn new(store: &Arc<ScriptedStore>) -> Self {
        Self {
            store: Arc::clone(store),
            dependency_status: DependencyStatus::Available,
            user_id: Some("uid-alice".into()),
        }
    }
}

#[async_trait]
impl Backend for ScriptedBackend {
    async fn check_dependencies(&self) -> DependencyStatus {
        self.dependency_status
    }

    async fn open_store(
        &self,
        _endpoint: Option<&str>,
    ) -> Result<Arc<dyn KeyValueStore>, RoomSyncError> {
        Ok(Arc::clone(&self.store) as Arc<dyn KeyValueStore>)
    }

    async fn sign_in_anonymously(&self) -> Result<UserId, RoomSyncError> {
        self.user_id
            .clone()
            .ok_or_else(|| RoomSyncError::AuthFailure("scripted sign-in failure".into()))
    }
}

// ── RecordingSession ────────────────────────────────────────────────

/// A session transport call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionCall {
    Create(String),
    Join(String),
}

/// Records every [`SessionTransport`] call. Clones share the record.
#[derive(Debug, Clone, Default)]
pub struct RecordingSession {
    calls: Arc<StdMutex<Vec<SessionCall>>>,
}

impl RecordingSession {
    pub fn calls(&self) -> Vec<SessionCall> {
        self.calls.lock().unwrap().clone()
    }
}

impl SessionTransport for RecordingSession {
    fn create_session(&self, room: &str) {
        self.calls
            .lock()
            .unwrap()
            .push(SessionCall::Create(room.to_owned()));
    }

    fn join_session(&self, room: &str) {
        self.calls
            .lock()
            .unwrap()
            .push(SessionCall::Join(room.to_owned()));
    }
}

// ── Helpers ─────────────────────────────────────────────────────────

/// Initialize a backend over `store` and return the (ready) initializer.
pub async fn ready_backend(store: &Arc<ScriptedStore>) -> BackendInit {
    let init = BackendInit::new(BackendConfig::new());
    init.initialize(&ScriptedBackend::new(store))
        .await
        .expect("scripted backend initializes");
    init
}

/// Start a coordinator with a fresh [`RecordingSession`].
pub fn start_coordinator(
    readiness: Readiness,
) -> (
    RoomCoordinator,
    mpsc::Receiver<RoomSyncEvent>,
    RecordingSession,
) {
    let session = RecordingSession::default();
    let (coordinator, events) =
        RoomCoordinator::start(readiness, session.clone(), CoordinatorConfig::new());
    (coordinator, events, session)
}

async fn next_event(events: &mut mpsc::Receiver<RoomSyncEvent>) -> RoomSyncEvent {
    tokio::time::timeout(EVENT_TIMEOUT, events.recv())
        .await
        .expect("timed out waiting for an event")
        .expect("event channel closed")
}

/// Consume events up to the next `RoomChanged` and return its room.
pub async fn next_room(events: &mut mpsc::Receiver<RoomSyncEvent>) -> String {
    loop {
        match next_event(events).await {
            RoomSyncEvent::RoomChanged { room } => return room,
            RoomSyncEvent::Stopped => panic!("coordinator stopped before a room change"),
            RoomSyncEvent::Status(_) => {}
        }
    }
}

/// Consume events until a `RoomChanged` for `expected` arrives.
pub async fn wait_for_room(events: &mut mpsc::Receiver<RoomSyncEvent>, expected: &str) {
    while next_room(events).await != expected {}
}

/// Consume events up to the first status matching `wanted` and return it.
pub async fn next_status(
    events: &mut mpsc::Receiver<RoomSyncEvent>,
    wanted: impl Fn(&Status) -> bool,
) -> Status {
    loop {
        match next_event(events).await {
            RoomSyncEvent::Status(status) if wanted(&status) => return status,
            RoomSyncEvent::Stopped => panic!("coordinator stopped before the expected status"),
            _ => {}
        }
    }
}

/// Give the coordinator loop a moment to process queued work.
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(50)).await;
}

/// Returns `true` for names of the form `SalaAuto` + a number in `[100, 999)`.
pub fn is_default_room(room: &str) -> bool {
    room.strip_prefix("SalaAuto")
        .filter(|suffix| suffix.len() == 3)
        .and_then(|suffix| suffix.parse::<u16>().ok())
        .is_some_and(|n| (100..999).contains(&n))
}
