//! Backend implementations.
//!
//! This module provides concrete [`Backend`](crate::Backend) and
//! [`KeyValueStore`](crate::KeyValueStore) implementations behind feature
//! gates. Enable the corresponding Cargo feature to pull one in:
//!
//! | Feature          | Backend                          |
//! |------------------|----------------------------------|
//! | `memory-backend` | [`MemoryBackend`], [`MemoryStore`] |
//!
//! # Example
//!
//! ```rust,ignore
//! use room_sync::{BackendConfig, BackendInit, MemoryBackend};
//!
//! let backend = MemoryBackend::new();
//! let init = BackendInit::new(BackendConfig::new());
//! let context = init.initialize(&backend).await?;
//! println!("signed in as {}", context.user_id());
//! ```

#[cfg(feature = "memory-backend")]
pub mod memory;

#[cfg(feature = "memory-backend")]
pub use memory::{MemoryBackend, MemoryStore};
