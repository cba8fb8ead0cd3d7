//! Room coordinator: keeps the local room in sync with the shared pointer.
//!
//! [`RoomCoordinator`] is a thin handle that communicates with a background
//! coordinator loop via an unbounded MPSC channel. Events are emitted on a
//! bounded channel ([`tokio::sync::mpsc::Receiver<RoomSyncEvent>`]) returned
//! from [`RoomCoordinator::start`].
//!
//! The loop is the only place local room state changes. Remote operations run
//! as detached tasks that report back over a channel; their results and
//! push-subscription updates are applied one at a time, in whatever order they
//! complete. When a local write and an external change race, whichever lands
//! last wins. An issued operation is never cancelled: it runs to completion
//! even if the coordinator stops first.
//!
//! # Example
//!
//! ```rust,ignore
//! let init = BackendInit::new(BackendConfig::from_env());
//! let (coordinator, mut events) =
//!     RoomCoordinator::start(init.readiness(), MySessions, CoordinatorConfig::new());
//! tokio::spawn(async move { init.initialize(&backend).await });
//!
//! while let Some(event) = events.recv().await {
//!     match event {
//!         RoomSyncEvent::RoomChanged { room } => { /* … */ }
//!         RoomSyncEvent::Stopped => break,
//!         _ => {}
//!     }
//! }
//! ```

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::{mpsc, oneshot, Mutex};
use tracing::{debug, error, info, warn};

use crate::backend::Readiness;
use crate::error::{Result, RoomSyncError};
use crate::event::RoomSyncEvent;
use crate::room::{default_room_name, generate_room_id, RoomRecord};
use crate::session::{SessionLaunch, SessionTransport};
use crate::status::Status;
use crate::store::{
    room_from_value, room_record_path, KeyValueStore, Subscription, ValueChange, CURRENT_ROOM_PATH,
};

/// Default capacity of the bounded event channel.
const DEFAULT_EVENT_CHANNEL_CAPACITY: usize = 256;

/// Default timeout for the graceful shutdown.
const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(1);

// ── Configuration ───────────────────────────────────────────────────

/// Configuration for a [`RoomCoordinator`].
///
/// # Example
///
/// ```
/// use room_sync::coordinator::CoordinatorConfig;
/// use std::time::Duration;
///
/// let config = CoordinatorConfig::new()
///     .with_event_channel_capacity(512)
///     .with_shutdown_timeout(Duration::from_secs(5));
/// assert_eq!(config.event_channel_capacity, 512);
/// ```
#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    /// Capacity of the bounded event channel.
    ///
    /// When the consumer cannot keep up, events are dropped (with a warning
    /// logged) to avoid blocking the loop. One extra slot is reserved for
    /// `Stopped`, so a graceful shutdown delivers it even when the channel
    /// is full.
    ///
    /// Defaults to **256**. Values below 1 are clamped to 1.
    pub event_channel_capacity: usize,
    /// Timeout for the graceful shutdown.
    ///
    /// Defaults to **1 second**. A zero timeout aborts the loop immediately.
    pub shutdown_timeout: Duration,
}

impl CoordinatorConfig {
    /// Create a configuration with default values.
    pub fn new() -> Self {
        Self {
            event_channel_capacity: DEFAULT_EVENT_CHANNEL_CAPACITY,
            shutdown_timeout: DEFAULT_SHUTDOWN_TIMEOUT,
        }
    }

    /// Set the capacity of the bounded event channel. Values below 1 are clamped to 1.
    #[must_use]
    pub fn with_event_channel_capacity(mut self, capacity: usize) -> Self {
        self.event_channel_capacity = capacity.max(1);
        self
    }

    /// Set the timeout for the graceful shutdown.
    #[must_use]
    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self::new()
    }
}

// ── Phase ───────────────────────────────────────────────────────────

/// Synchronization phase of a coordinator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CoordinatorPhase {
    /// No listener attached yet.
    #[default]
    Unsubscribed,
    /// Listener attached, first read in flight (or stalled after a failure).
    AwaitingInitialRead,
    /// The local room matches a known remote value.
    Synchronized,
}

// ── Shared state ────────────────────────────────────────────────────

/// State written by the loop and read by the handle.
struct CoordinatorState {
    running: AtomicBool,
    phase: Mutex<CoordinatorPhase>,
    current_room: Mutex<Option<String>>,
}

impl CoordinatorState {
    fn new() -> Self {
        Self {
            running: AtomicBool::new(true),
            phase: Mutex::new(CoordinatorPhase::Unsubscribed),
            current_room: Mutex::new(None),
        }
    }
}

/// Commands queued by the handle.
#[derive(Debug)]
enum Command {
    CreateRoom,
    SetNetwork { room: String, launch: SessionLaunch },
    JoinRoom,
}

/// Result of a remote operation, applied by the loop.
enum Completion {
    InitialRead(Result<Option<Value>>),
    DefaultRoomWritten {
        room: String,
        result: Result<()>,
    },
    RoomRecordWritten {
        room: String,
        result: Result<()>,
    },
    PointerWritten {
        room: String,
        launch: SessionLaunch,
        result: Result<()>,
    },
}

// ── Coordinator handle ──────────────────────────────────────────────

/// Handle to a running room coordinator.
///
/// Created via [`RoomCoordinator::start`]. Command methods queue work for the
/// loop and return immediately; outcomes are reported as [`RoomSyncEvent`]s.
pub struct RoomCoordinator {
    cmd_tx: mpsc::UnboundedSender<Command>,
    state: Arc<CoordinatorState>,
    task: Option<tokio::task::JoinHandle<()>>,
    shutdown_tx: Option<oneshot::Sender<()>>,
    shutdown_timeout: Duration,
}

impl RoomCoordinator {
    /// Start the coordinator loop and return a handle plus event receiver.
    ///
    /// The loop waits on `readiness`, then subscribes to `currentRoom` and
    /// reconciles its initial value. Must be called within a tokio runtime.
    #[must_use = "the event receiver must be used to receive events"]
    pub fn start(
        readiness: Readiness,
        session: impl SessionTransport,
        config: CoordinatorConfig,
    ) -> (Self, mpsc::Receiver<RoomSyncEvent>) {
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel::<Command>();
        // Clamp capacity to at least 1 (tokio panics on 0).
        let capacity = config.event_channel_capacity.max(1);
        let (event_tx, event_rx) = mpsc::channel::<RoomSyncEvent>(capacity + 1);
        // The channel is empty, so reserving the extra slot cannot fail.
        let stop_permit = event_tx.clone().try_reserve_owned().ok();
        let (completion_tx, completion_rx) = mpsc::unbounded_channel::<Completion>();
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();

        let state = Arc::new(CoordinatorState::new());
        let coordinator_loop = CoordinatorLoop {
            readiness,
            session: Arc::new(session),
            state: Arc::clone(&state),
            event_tx,
            stop_permit,
            readiness_handled: false,
            subscription: None,
            completion_tx,
        };
        let task = tokio::spawn(coordinator_loop.run(cmd_rx, completion_rx, shutdown_rx));

        let coordinator = Self {
            cmd_tx,
            state,
            task: Some(task),
            shutdown_tx: Some(shutdown_tx),
            shutdown_timeout: config.shutdown_timeout,
        };

        (coordinator, event_rx)
    }

    // ── Public API methods ──────────────────────────────────────────

    /// Create a new room record and point every client at it.
    ///
    /// Requires a ready backend. On success the session transport is asked to
    /// host the room.
    ///
    /// # Errors
    ///
    /// Returns [`RoomSyncError::NotRunning`] if the loop has stopped.
    pub fn create_room(&self) -> Result<()> {
        self.send(Command::CreateRoom)
    }

    /// Write `room` to the shared pointer, then act on `launch`.
    ///
    /// Every call performs one write; repeated calls are not deduplicated.
    ///
    /// # Errors
    ///
    /// Returns [`RoomSyncError::NotRunning`] if the loop has stopped.
    pub fn set_network(&self, room: impl Into<String>, launch: SessionLaunch) -> Result<()> {
        self.send(Command::SetNetwork {
            room: room.into(),
            launch,
        })
    }

    /// Join the session of the current room. Never writes to the store.
    ///
    /// Ignored (with a status update) until the coordinator is synchronized.
    ///
    /// # Errors
    ///
    /// Returns [`RoomSyncError::NotRunning`] if the loop has stopped.
    pub fn join_room(&self) -> Result<()> {
        self.send(Command::JoinRoom)
    }

    /// Stop the coordinator loop and detach the push subscription.
    ///
    /// After calling this method, the event receiver yields
    /// [`RoomSyncEvent::Stopped`] followed by `None`. Store writes that were
    /// already issued still complete; their results are discarded.
    pub async fn shutdown(&mut self) {
        debug!("RoomCoordinator: shutdown requested");

        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }

        // Await the loop with a timeout. If it doesn't exit in time, abort it
        // so the task cannot detach and run indefinitely.
        if let Some(mut task) = self.task.take() {
            match tokio::time::timeout(self.shutdown_timeout, &mut task).await {
                Ok(Ok(())) => {}
                Ok(Err(join_err)) => {
                    warn!("coordinator loop terminated with join error: {join_err}");
                }
                Err(_) => {
                    warn!("coordinator loop did not exit within timeout; aborting task");
                    task.abort();
                    if let Err(join_err) = task.await {
                        debug!("coordinator loop aborted: {join_err}");
                    }
                }
            }
        }

        self.state.running.store(false, Ordering::Release);
    }

    // ── State accessors ─────────────────────────────────────────────

    /// Returns `true` while the coordinator loop accepts commands.
    pub fn is_running(&self) -> bool {
        self.state.running.load(Ordering::Acquire)
    }

    /// The room this process last observed, if any.
    pub async fn current_room(&self) -> Option<String> {
        self.state.current_room.lock().await.clone()
    }

    /// The current synchronization phase.
    pub async fn phase(&self) -> CoordinatorPhase {
        *self.state.phase.lock().await
    }

    // ── Internal helpers ────────────────────────────────────────────

    fn send(&self, cmd: Command) -> Result<()> {
        if !self.state.running.load(Ordering::Acquire) {
            return Err(RoomSyncError::NotRunning);
        }
        self.cmd_tx.send(cmd).map_err(|_| RoomSyncError::NotRunning)
    }
}

impl std::fmt::Debug for RoomCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RoomCoordinator")
            .field("running", &self.is_running())
            .field("has_task", &self.task.is_some())
            .finish()
    }
}

impl Drop for RoomCoordinator {
    fn drop(&mut self) {
        // No executor context to await a graceful stop; aborting drops the
        // loop future and its subscription. Issued operations run on their own
        // tasks and are unaffected.
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

// ── Coordinator loop ────────────────────────────────────────────────

struct CoordinatorLoop {
    readiness: Readiness,
    session: Arc<dyn SessionTransport>,
    state: Arc<CoordinatorState>,
    event_tx: mpsc::Sender<RoomSyncEvent>,
    /// Slot held back for the final `Stopped` event.
    stop_permit: Option<mpsc::OwnedPermit<RoomSyncEvent>>,
    /// Set once the readiness signal resolved (or can no longer resolve).
    readiness_handled: bool,
    subscription: Option<Subscription>,
    completion_tx: mpsc::UnboundedSender<Completion>,
}

impl CoordinatorLoop {
    /// Multiplex commands, readiness, push updates and remote completions.
    ///
    /// Exits when the shutdown signal fires or the handle is dropped.
    async fn run(
        mut self,
        mut cmd_rx: mpsc::UnboundedReceiver<Command>,
        mut completion_rx: mpsc::UnboundedReceiver<Completion>,
        mut shutdown_rx: oneshot::Receiver<()>,
    ) {
        debug!("coordinator loop started");

        loop {
            tokio::select! {
                _ = &mut shutdown_rx => {
                    debug!("shutdown signal received");
                    break;
                }

                cmd = cmd_rx.recv() => {
                    match cmd {
                        Some(cmd) => self.handle_command(cmd).await,
                        None => {
                            debug!("command channel closed, shutting down coordinator loop");
                            break;
                        }
                    }
                }

                context = self.readiness.ready(), if !self.readiness_handled => {
                    self.readiness_handled = true;
                    match context {
                        Some(context) => self.on_ready(Arc::clone(context.store())).await,
                        None => warn!("backend initializer dropped before becoming ready"),
                    }
                }

                change = next_change(&mut self.subscription), if self.subscription.is_some() => {
                    self.on_change(change).await;
                }

                // The loop holds a sender, so this channel never closes.
                Some(completion) = completion_rx.recv() => {
                    self.on_completion(completion).await;
                }
            }
        }

        self.subscription = None;
        self.state.running.store(false, Ordering::Release);
        match self.stop_permit.take() {
            Some(permit) => {
                permit.send(RoomSyncEvent::Stopped);
            }
            None => debug!("no event slot reserved, dropping Stopped"),
        }
        debug!("coordinator loop exited");
    }

    // ── Readiness and subscription ──────────────────────────────────

    async fn on_ready(&mut self, store: Arc<dyn KeyValueStore>) {
        self.report(Status::Subscribing);

        match store.subscribe(CURRENT_ROOM_PATH).await {
            Ok(subscription) => self.subscription = Some(subscription),
            Err(e) => {
                error!("failed to subscribe to {CURRENT_ROOM_PATH}: {e}");
                self.report(Status::StoreUnavailable);
                return;
            }
        }

        self.set_phase(CoordinatorPhase::AwaitingInitialRead).await;
        self.spawn_remote(async move {
            let result = store.read(CURRENT_ROOM_PATH).await;
            Completion::InitialRead(result)
        });
    }

    async fn on_change(&mut self, change: Option<ValueChange>) {
        match change {
            Some(Ok(value)) => match value.as_ref().and_then(room_from_value) {
                Some(room) => self.finalize(room).await,
                None => debug!("{CURRENT_ROOM_PATH} is empty, ignoring change"),
            },
            Some(Err(e)) => {
                error!("listener error: {e}");
                self.report(Status::ListenerFailed);
            }
            None => {
                warn!("store closed the {CURRENT_ROOM_PATH} subscription");
                self.subscription = None;
            }
        }
    }

    // ── Commands ────────────────────────────────────────────────────

    async fn handle_command(&mut self, cmd: Command) {
        debug!("handling command: {cmd:?}");
        match cmd {
            Command::CreateRoom => self.create_room(),
            Command::SetNetwork { room, launch } => self.set_network(room, launch),
            Command::JoinRoom => self.join_room().await,
        }
    }

    fn create_room(&mut self) {
        let Some(context) = self.readiness.context() else {
            self.report(Status::BackendNotReady);
            return;
        };

        let room = generate_room_id();
        let value = match serde_json::to_value(RoomRecord::new(context.user_id())) {
            Ok(value) => value,
            Err(e) => {
                error!("failed to create room {room}: {}", RoomSyncError::from(e));
                self.report(Status::CreateRoomFailed);
                return;
            }
        };

        debug!(room = %room, "writing room record");
        let path = room_record_path(&room);
        self.spawn_write(Arc::clone(context.store()), path, value, move |result| {
            Completion::RoomRecordWritten { room, result }
        });
    }

    fn set_network(&mut self, room: String, launch: SessionLaunch) {
        let Some(context) = self.readiness.context() else {
            self.report(Status::BackendNotReady);
            return;
        };

        let value = Value::String(room.clone());
        self.spawn_write(
            Arc::clone(context.store()),
            CURRENT_ROOM_PATH.to_owned(),
            value,
            move |result| Completion::PointerWritten {
                room,
                launch,
                result,
            },
        );
    }

    async fn join_room(&mut self) {
        let phase = *self.state.phase.lock().await;
        let room = self.state.current_room.lock().await.clone();
        match (phase, room) {
            (CoordinatorPhase::Synchronized, Some(room)) => {
                self.report(Status::Joining(room.clone()));
                self.session.join_session(&room);
            }
            _ => self.report(Status::NotReadyToJoin),
        }
    }

    // ── Completions ─────────────────────────────────────────────────

    async fn on_completion(&mut self, completion: Completion) {
        match completion {
            Completion::InitialRead(Err(e)) => {
                error!("initial read of {CURRENT_ROOM_PATH} failed: {e}");
                self.report(Status::InitialReadFailed);
            }
            Completion::InitialRead(Ok(value)) => {
                debug!(exists = value.is_some(), value = ?value, "initial {CURRENT_ROOM_PATH} read");
                match value.as_ref().and_then(room_from_value) {
                    Some(room) => self.finalize(room).await,
                    None => self.create_default_room(),
                }
            }
            Completion::DefaultRoomWritten { room, result } => match result {
                Ok(()) => self.finalize(room).await,
                Err(e) => {
                    error!("failed to create default room {room}: {e}");
                    self.report(Status::DefaultRoomFailed);
                }
            },
            Completion::RoomRecordWritten { room, result } => match result {
                Ok(()) => {
                    self.report(Status::RoomCreated(room.clone()));
                    self.set_network(room, SessionLaunch::Create);
                }
                Err(e) => {
                    error!("failed to create room {room}: {e}");
                    self.report(Status::CreateRoomFailed);
                }
            },
            Completion::PointerWritten {
                room,
                launch,
                result,
            } => match result {
                Ok(()) => {
                    self.finalize(room.clone()).await;
                    launch.dispatch(self.session.as_ref(), &room);
                }
                Err(e) => {
                    error!("failed to update {CURRENT_ROOM_PATH} to {room}: {e}");
                    self.report(Status::UpdateRoomFailed);
                }
            },
        }
    }

    fn create_default_room(&mut self) {
        let Some(context) = self.readiness.context() else {
            self.report(Status::StoreUnavailable);
            return;
        };

        self.report(Status::CreatingDefaultRoom);
        let room = default_room_name();
        let value = Value::String(room.clone());
        self.spawn_write(
            Arc::clone(context.store()),
            CURRENT_ROOM_PATH.to_owned(),
            value,
            move |result| Completion::DefaultRoomWritten { room, result },
        );
    }

    // ── Internal helpers ────────────────────────────────────────────

    /// Record `room` as the local room and enter `Synchronized`.
    async fn finalize(&mut self, room: String) {
        *self.state.current_room.lock().await = Some(room.clone());
        self.set_phase(CoordinatorPhase::Synchronized).await;
        info!(room = %room, "synchronized on room");
        self.emit(RoomSyncEvent::RoomChanged { room: room.clone() });
        self.report(Status::CurrentRoom(room));
    }

    async fn set_phase(&self, phase: CoordinatorPhase) {
        let mut current = self.state.phase.lock().await;
        if *current != phase {
            debug!("phase: {:?} -> {:?}", *current, phase);
            *current = phase;
        }
    }

    fn spawn_write<F>(&self, store: Arc<dyn KeyValueStore>, path: String, value: Value, done: F)
    where
        F: FnOnce(Result<()>) -> Completion + Send + 'static,
    {
        self.spawn_remote(async move {
            let result = store.write(&path, value).await;
            done(result)
        });
    }

    /// Run a remote operation on its own task and queue its completion.
    ///
    /// The task is never aborted. If the loop has stopped by the time it
    /// finishes, the completion is dropped.
    fn spawn_remote<F>(&self, operation: F)
    where
        F: std::future::Future<Output = Completion> + Send + 'static,
    {
        let completion_tx = self.completion_tx.clone();
        tokio::spawn(async move {
            let completion = operation.await;
            if completion_tx.send(completion).is_err() {
                debug!("coordinator stopped before a remote operation completed");
            }
        });
    }

    /// Log a status and forward it to the display surface.
    fn report(&self, status: Status) {
        if status.is_failure() {
            warn!("[RoomCoordinator] {status}");
        } else {
            info!("[RoomCoordinator] {status}");
        }
        self.emit(RoomSyncEvent::Status(status));
    }

    /// Emit an event. If the channel is full, log a warning and drop the event
    /// to avoid blocking the loop.
    fn emit(&self, event: RoomSyncEvent) {
        match self.event_tx.try_send(event) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(dropped)) => {
                warn!("event channel full, dropping event: {dropped:?}");
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                debug!("event channel closed, receiver dropped");
            }
        }
    }
}

/// Next push update, or pending forever when no subscription is attached.
async fn next_change(subscription: &mut Option<Subscription>) -> Option<ValueChange> {
    match subscription {
        Some(subscription) => subscription.next_change().await,
        None => std::future::pending().await,
    }
}

// ── Tests ───────────────────────────────────────────────────────────

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::todo,
    clippy::unimplemented,
    clippy::indexing_slicing
)]
mod tests {
    use super::*;
    use crate::backend::{Backend, BackendConfig, BackendInit, DependencyStatus, UserId};
    use async_trait::async_trait;
    use serde_json::json;
    use std::collections::HashMap;
    use std::sync::Mutex as StdMutex;

    // ── Mock store ──────────────────────────────────────────────────

    /// A flat store that records writes and can be told to fail them.
    #[derive(Default)]
    struct MockStore {
        values: StdMutex<HashMap<String, Value>>,
        writes: StdMutex<Vec<(String, Value)>>,
        fail_writes: AtomicBool,
        subscribers: StdMutex<Vec<mpsc::UnboundedSender<ValueChange>>>,
    }

    impl MockStore {
        fn with(path: &str, value: Value) -> Self {
            let store = Self::default();
            store.values.lock().unwrap().insert(path.into(), value);
            store
        }

        fn writes(&self) -> Vec<(String, Value)> {
            self.writes.lock().unwrap().clone()
        }

        fn push(&self, change: ValueChange) {
            let subscribers = self.subscribers.lock().unwrap();
            for tx in subscribers.iter() {
                let _ = tx.send(match &change {
                    Ok(v) => Ok(v.clone()),
                    Err(_) => Err(RoomSyncError::Listener {
                        path: CURRENT_ROOM_PATH.into(),
                        reason: "permission denied".into(),
                    }),
                });
            }
        }
    }

    #[async_trait]
    impl KeyValueStore for MockStore {
        async fn read(&self, path: &str) -> Result<Option<Value>> {
            Ok(self.values.lock().unwrap().get(path).cloned())
        }

        async fn write(&self, path: &str, value: Value) -> Result<()> {
            if self.fail_writes.load(Ordering::SeqCst) {
                return Err(RoomSyncError::StoreWrite {
                    path: path.into(),
                    reason: "offline".into(),
                });
            }
            self.writes.lock().unwrap().push((path.into(), value.clone()));
            self.values.lock().unwrap().insert(path.into(), value);
            Ok(())
        }

        async fn subscribe(&self, path: &str) -> Result<Subscription> {
            let (tx, subscription) = Subscription::channel(path);
            self.subscribers.lock().unwrap().push(tx);
            Ok(subscription)
        }
    }

    struct MockBackend(Arc<MockStore>);

    #[async_trait]
    impl Backend for MockBackend {
        async fn check_dependencies(&self) -> DependencyStatus {
            DependencyStatus::Available
        }

        async fn open_store(&self, _endpoint: Option<&str>) -> Result<Arc<dyn KeyValueStore>> {
            Ok(Arc::clone(&self.0) as Arc<dyn KeyValueStore>)
        }

        async fn sign_in_anonymously(&self) -> Result<UserId> {
            Ok("uid-test".into())
        }
    }

    #[derive(Clone, Default)]
    struct MockSession {
        calls: Arc<StdMutex<Vec<String>>>,
    }

    impl SessionTransport for MockSession {
        fn create_session(&self, room: &str) {
            self.calls.lock().unwrap().push(format!("create:{room}"));
        }

        fn join_session(&self, room: &str) {
            self.calls.lock().unwrap().push(format!("join:{room}"));
        }
    }

    // ── Helpers ─────────────────────────────────────────────────────

    async fn ready(store: &Arc<MockStore>) -> BackendInit {
        let init = BackendInit::new(BackendConfig::new());
        init.initialize(&MockBackend(Arc::clone(store)))
            .await
            .unwrap();
        init
    }

    async fn next_room(events: &mut mpsc::Receiver<RoomSyncEvent>) -> String {
        loop {
            match events.recv().await.unwrap() {
                RoomSyncEvent::RoomChanged { room } => return room,
                RoomSyncEvent::Stopped => panic!("stopped before a room change"),
                RoomSyncEvent::Status(_) => {}
            }
        }
    }

    async fn next_status(
        events: &mut mpsc::Receiver<RoomSyncEvent>,
        wanted: impl Fn(&Status) -> bool,
    ) -> Status {
        loop {
            if let RoomSyncEvent::Status(status) = events.recv().await.unwrap() {
                if wanted(&status) {
                    return status;
                }
            }
        }
    }

    // ── Tests ───────────────────────────────────────────────────────

    #[tokio::test]
    async fn existing_pointer_synchronizes_without_writing() {
        let store = Arc::new(MockStore::with(CURRENT_ROOM_PATH, json!("Lobby1")));
        let init = ready(&store).await;

        let (mut coordinator, mut events) = RoomCoordinator::start(
            init.readiness(),
            MockSession::default(),
            CoordinatorConfig::new(),
        );

        assert_eq!(next_room(&mut events).await, "Lobby1");
        assert_eq!(coordinator.phase().await, CoordinatorPhase::Synchronized);
        assert_eq!(coordinator.current_room().await.as_deref(), Some("Lobby1"));
        assert!(store.writes().is_empty());

        coordinator.shutdown().await;
    }

    #[tokio::test]
    async fn absent_pointer_writes_one_default_room() {
        let store = Arc::new(MockStore::default());
        let init = ready(&store).await;

        let (mut coordinator, mut events) = RoomCoordinator::start(
            init.readiness(),
            MockSession::default(),
            CoordinatorConfig::new(),
        );

        let room = next_room(&mut events).await;
        assert!(room.starts_with("SalaAuto"));
        let writes = store.writes();
        assert_eq!(writes, vec![(CURRENT_ROOM_PATH.to_string(), json!(room))]);

        coordinator.shutdown().await;
    }

    #[tokio::test]
    async fn default_room_write_failure_stalls_in_awaiting_read() {
        let store = Arc::new(MockStore::default());
        store.fail_writes.store(true, Ordering::SeqCst);
        let init = ready(&store).await;

        let (mut coordinator, mut events) = RoomCoordinator::start(
            init.readiness(),
            MockSession::default(),
            CoordinatorConfig::new(),
        );

        next_status(&mut events, |s| *s == Status::DefaultRoomFailed).await;
        assert_eq!(
            coordinator.phase().await,
            CoordinatorPhase::AwaitingInitialRead
        );
        assert!(coordinator.current_room().await.is_none());

        coordinator.shutdown().await;
    }

    #[tokio::test]
    async fn listener_error_keeps_state() {
        let store = Arc::new(MockStore::with(CURRENT_ROOM_PATH, json!("Lobby1")));
        let init = ready(&store).await;

        let (mut coordinator, mut events) = RoomCoordinator::start(
            init.readiness(),
            MockSession::default(),
            CoordinatorConfig::new(),
        );
        assert_eq!(next_room(&mut events).await, "Lobby1");

        store.push(Err(RoomSyncError::Listener {
            path: CURRENT_ROOM_PATH.into(),
            reason: "permission denied".into(),
        }));
        next_status(&mut events, |s| *s == Status::ListenerFailed).await;
        assert_eq!(coordinator.current_room().await.as_deref(), Some("Lobby1"));
        assert_eq!(coordinator.phase().await, CoordinatorPhase::Synchronized);

        // An empty push is ignored, a non-empty one is adopted.
        store.push(Ok(None));
        store.push(Ok(Some(json!("Lobby9"))));
        assert_eq!(next_room(&mut events).await, "Lobby9");

        coordinator.shutdown().await;
    }

    #[tokio::test]
    async fn create_room_hosts_after_record_and_pointer_writes() {
        let store = Arc::new(MockStore::with(CURRENT_ROOM_PATH, json!("Lobby1")));
        let init = ready(&store).await;
        let session = MockSession::default();

        let (mut coordinator, mut events) =
            RoomCoordinator::start(init.readiness(), session.clone(), CoordinatorConfig::new());
        assert_eq!(next_room(&mut events).await, "Lobby1");

        coordinator.create_room().unwrap();
        let created = match next_status(&mut events, |s| matches!(s, Status::RoomCreated(_))).await
        {
            Status::RoomCreated(room) => room,
            other => panic!("unexpected status {other:?}"),
        };
        assert_eq!(next_room(&mut events).await, created);

        let writes = store.writes();
        assert_eq!(writes.len(), 2);
        assert_eq!(writes[0].0, format!("rooms/{created}"));
        assert_eq!(writes[0].1["owner"], json!("uid-test"));
        assert_eq!(writes[1], (CURRENT_ROOM_PATH.to_string(), json!(created)));
        assert_eq!(*session.calls.lock().unwrap(), vec![format!("create:{created}")]);

        coordinator.shutdown().await;
    }

    #[tokio::test]
    async fn commands_after_shutdown_fail_with_not_running() {
        let store = Arc::new(MockStore::default());
        let init = ready(&store).await;
        let (mut coordinator, mut events) = RoomCoordinator::start(
            init.readiness(),
            MockSession::default(),
            CoordinatorConfig::new(),
        );
        let _ = next_room(&mut events).await;

        coordinator.shutdown().await;
        assert!(!coordinator.is_running());
        assert!(matches!(
            coordinator.join_room(),
            Err(RoomSyncError::NotRunning)
        ));

        // Stopped is the last event.
        let mut last = None;
        while let Some(event) = events.recv().await {
            last = Some(event);
        }
        assert_eq!(last, Some(RoomSyncEvent::Stopped));
    }

    #[tokio::test]
    async fn config_defaults() {
        let config = CoordinatorConfig::default();
        assert_eq!(config.event_channel_capacity, 256);
        assert_eq!(config.shutdown_timeout, Duration::from_secs(1));
        assert_eq!(
            CoordinatorConfig::new()
                .with_event_channel_capacity(0)
                .event_channel_capacity,
            1
        );
    }
}
