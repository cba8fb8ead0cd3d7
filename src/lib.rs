//! # room-sync
//!
//! Backend-agnostic Rust client that keeps every multiplayer client pointed
//! at the same room through one shared `currentRoom` key.
//!
//! A [`BackendInit`] bootstraps the backend exactly once (dependency check,
//! store handle, anonymous sign-in) and publishes a fire-once [`Readiness`]
//! signal. A [`RoomCoordinator`] waits for it, subscribes to `currentRoom`,
//! creates a default room when none exists, follows remote changes, and hands
//! session hosting or joining to your [`SessionTransport`].
//!
//! ## Features
//!
//! - **Backend-agnostic**: implement [`Backend`] and [`KeyValueStore`] for any store
//! - **Fail-silent**: backend failures become [`Status`] updates, never panics or errors
//! - **In-memory backend**: default `memory-backend` feature provides [`MemoryBackend`]
//! - **Event-driven**: receive typed [`RoomSyncEvent`]s via a channel
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use room_sync::{
//!     BackendConfig, BackendInit, CoordinatorConfig, MemoryBackend, RoomCoordinator,
//!     RoomSyncEvent, SessionTransport,
//! };
//!
//! struct Sessions;
//!
//! impl SessionTransport for Sessions {
//!     fn create_session(&self, room: &str) { println!("hosting {room}"); }
//!     fn join_session(&self, room: &str) { println!("joining {room}"); }
//! }
//!
//! # async fn run() {
//! let backend = MemoryBackend::new();
//! let init = BackendInit::new(BackendConfig::from_env());
//! let (coordinator, mut events) =
//!     RoomCoordinator::start(init.readiness(), Sessions, CoordinatorConfig::new());
//!
//! if init.initialize(&backend).await.is_ok() {
//!     while let Some(event) = events.recv().await {
//!         if let RoomSyncEvent::RoomChanged { room } = event {
//!             println!("everyone is in {room}");
//!             let _ = coordinator.join_room();
//!         }
//!     }
//! }
//! # }
//! ```

pub mod backend;
pub mod backends;
pub mod coordinator;
pub mod error;
pub mod event;
pub mod room;
pub mod session;
pub mod status;
pub mod store;

// Re-export primary types for ergonomic imports.
pub use backend::{
    Backend, BackendConfig, BackendContext, BackendInit, DependencyStatus, Readiness, UserId,
};
pub use coordinator::{CoordinatorConfig, CoordinatorPhase, RoomCoordinator};
pub use error::RoomSyncError;
pub use event::RoomSyncEvent;
pub use room::RoomRecord;
pub use session::{SessionLaunch, SessionTransport};
pub use status::Status;
pub use store::{KeyValueStore, Subscription};

#[cfg(feature = "memory-backend")]
pub use backends::{MemoryBackend, MemoryStore};
