//! # Shared Lobby Example
//!
//! Demonstrates two clients sharing one in-memory store:
//!
//! 1. Bootstrap each client's backend against the same `MemoryStore`
//! 2. Start a room coordinator per client and let them agree on a default room
//! 3. The host creates a fresh room and starts hosting it
//! 4. The guest follows the shared pointer and joins the host's session
//! 5. Shut both coordinators down
//!
//! ## Running
//!
//! ```sh
//! cargo run --example shared_lobby
//!
//! # Verbose output:
//! RUST_LOG=debug cargo run --example shared_lobby
//! ```

use room_sync::{
    BackendConfig, BackendInit, CoordinatorConfig, MemoryBackend, MemoryStore, RoomCoordinator,
    RoomSyncEvent, SessionTransport, Status,
};
use tokio::sync::mpsc;

/// A session transport that only logs what it would do.
struct LoggingSession {
    player: &'static str,
}

impl SessionTransport for LoggingSession {
    fn create_session(&self, room: &str) {
        tracing::info!("[{}] hosting session in room {room}", self.player);
    }

    fn join_session(&self, room: &str) {
        tracing::info!("[{}] joining session in room {room}", self.player);
    }
}

/// Wait for the next room change, logging status updates along the way.
async fn next_room(player: &str, events: &mut mpsc::Receiver<RoomSyncEvent>) -> Option<String> {
    while let Some(event) = events.recv().await {
        match event {
            RoomSyncEvent::RoomChanged { room } => return Some(room),
            RoomSyncEvent::Status(status) => tracing::info!("[{player}] {status}"),
            RoomSyncEvent::Stopped => return None,
        }
    }
    None
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // ── Logging ─────────────────────────────────────────────────────
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    // ── Backends ────────────────────────────────────────────────────
    // Both clients talk to the same store, like two devices on one database.
    let store = MemoryStore::new();
    let config = BackendConfig::from_env();

    let host_init = BackendInit::new(config.clone());
    host_init
        .initialize(&MemoryBackend::with_store(store.clone()))
        .await?;

    let guest_init = BackendInit::new(config);
    guest_init
        .initialize(&MemoryBackend::with_store(store.clone()))
        .await?;

    // ── Coordinators ────────────────────────────────────────────────
    let (mut host, mut host_events) = RoomCoordinator::start(
        host_init.readiness(),
        LoggingSession { player: "host" },
        CoordinatorConfig::new(),
    );
    let Some(lobby) = next_room("host", &mut host_events).await else {
        return Ok(());
    };
    tracing::info!("[host] everyone starts in {lobby}");

    let (mut guest, mut guest_events) = RoomCoordinator::start(
        guest_init.readiness(),
        LoggingSession { player: "guest" },
        CoordinatorConfig::new(),
    );
    if let Some(room) = next_room("guest", &mut guest_events).await {
        tracing::info!("[guest] found the group in {room}");
    }

    // ── Host moves everyone to a new room ───────────────────────────
    host.create_room()?;
    while let Some(event) = host_events.recv().await {
        match event {
            RoomSyncEvent::Status(Status::RoomCreated(room)) => {
                tracing::info!("[host] created {room}");
            }
            RoomSyncEvent::Status(status) if status.is_failure() => {
                tracing::warn!("[host] {status}");
                break;
            }
            RoomSyncEvent::RoomChanged { room } if room != lobby => break,
            RoomSyncEvent::Stopped => break,
            _ => {}
        }
    }

    // ── Guest follows and joins ─────────────────────────────────────
    while let Some(room) = next_room("guest", &mut guest_events).await {
        if room != lobby {
            tracing::info!("[guest] pointer moved to {room}");
            guest.join_room()?;
            break;
        }
    }

    // Let the guest's join status land before stopping.
    tokio::time::sleep(std::time::Duration::from_millis(100)).await;
    while let Ok(event) = guest_events.try_recv() {
        if let RoomSyncEvent::Status(status) = event {
            tracing::info!("[guest] {status}");
        }
    }

    // ── Shutdown ────────────────────────────────────────────────────
    host.shutdown().await;
    guest.shutdown().await;
    tracing::info!("Both coordinators stopped");

    Ok(())
}
