//! Key-value store abstraction used by the room coordinator.
//!
//! The [`KeyValueStore`] trait models a realtime database addressed by
//! `/`-separated paths. The coordinator only needs three things from it:
//! one-off reads, whole-value writes, and a standing push subscription on a
//! single path.
//!
//! # Implementing a Custom Store
//!
//! ```rust,no_run
//! use async_trait::async_trait;
//! use room_sync::error::Result;
//! use room_sync::store::{KeyValueStore, Subscription};
//! use serde_json::Value;
//!
//! struct MyStore { /* ... */ }
//!
//! #[async_trait]
//! impl KeyValueStore for MyStore {
//!     async fn read(&self, path: &str) -> Result<Option<Value>> {
//!         // Fetch the value stored at `path`, `None` if absent
//!         todo!()
//!     }
//!
//!     async fn write(&self, path: &str, value: Value) -> Result<()> {
//!         // Replace the value at `path`; `Value::Null` deletes it
//!         todo!()
//!     }
//!
//!     async fn subscribe(&self, path: &str) -> Result<Subscription> {
//!         // Register a listener and forward every change into the channel
//!         let (tx, subscription) = Subscription::channel(path);
//!         # drop(tx);
//!         Ok(subscription)
//!     }
//! }
//! ```

use std::pin::Pin;
use std::task::{Context, Poll};

use async_trait::async_trait;
use futures_util::Stream;
use serde_json::Value;
use tokio::sync::mpsc;

use crate::error::{Result, RoomSyncError};

/// Path of the shared room pointer every client follows.
pub const CURRENT_ROOM_PATH: &str = "currentRoom";

/// Parent path under which room records are stored.
pub const ROOMS_PATH: &str = "rooms";

/// Returns the store path of the record for room `room_id`.
pub fn room_record_path(room_id: &str) -> String {
    format!("{ROOMS_PATH}/{room_id}")
}

/// Decode a stored value into a room identifier.
///
/// JSON `null` means "no room". Strings are taken verbatim; any other value
/// is rendered as its JSON text.
pub fn room_from_value(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(room) => Some(room.clone()),
        other => Some(other.to_string()),
    }
}

/// One notification delivered by a [`Subscription`].
///
/// `Ok(None)` means the path is currently absent.
pub type ValueChange = std::result::Result<Option<Value>, RoomSyncError>;

/// A remote key-value store with push subscriptions.
///
/// # Object Safety
///
/// This trait is object-safe; the backend hands the coordinator an
/// `Arc<dyn KeyValueStore>`.
#[async_trait]
pub trait KeyValueStore: Send + Sync + 'static {
    /// Read the value at `path`.
    ///
    /// Returns `Ok(None)` when nothing is stored there.
    ///
    /// # Errors
    ///
    /// Returns [`RoomSyncError::StoreRead`] if the read could not be served.
    async fn read(&self, path: &str) -> Result<Option<Value>>;

    /// Replace the value at `path`. Writing [`Value::Null`] deletes it.
    ///
    /// A single write is atomic: it either applies completely or not at all.
    ///
    /// # Errors
    ///
    /// Returns [`RoomSyncError::StoreWrite`] if the write was rejected.
    async fn write(&self, path: &str, value: Value) -> Result<()>;

    /// Attach a push subscription to `path`.
    ///
    /// The subscription yields a [`ValueChange`] on every mutation affecting
    /// `path`, including mutations made by this process. Dropping the
    /// [`Subscription`] detaches the listener.
    ///
    /// # Errors
    ///
    /// Returns [`RoomSyncError::StoreUnavailable`] if the listener could not
    /// be registered.
    async fn subscribe(&self, path: &str) -> Result<Subscription>;
}

/// A standing push subscription on one store path.
///
/// Implements [`Stream`]; [`next_change`](Subscription::next_change) is the
/// async convenience used by the coordinator loop. Both are cancel-safe since
/// they wrap [`mpsc::UnboundedReceiver`].
#[derive(Debug)]
pub struct Subscription {
    path: String,
    rx: mpsc::UnboundedReceiver<ValueChange>,
}

impl Subscription {
    /// Create a subscription for `path` together with the sender a store
    /// implementation uses to push changes into it.
    pub fn channel(path: impl Into<String>) -> (mpsc::UnboundedSender<ValueChange>, Self) {
        let (tx, rx) = mpsc::unbounded_channel();
        let subscription = Self {
            path: path.into(),
            rx,
        };
        (tx, subscription)
    }

    /// The store path this subscription listens to.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Wait for the next change.
    ///
    /// Returns `None` once the store stops delivering changes.
    pub async fn next_change(&mut self) -> Option<ValueChange> {
        self.rx.recv().await
    }
}

impl Stream for Subscription {
    type Item = ValueChange;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}

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
    use futures_util::StreamExt;
    use serde_json::json;

    #[test]
    fn room_record_path_nests_under_rooms() {
        assert_eq!(room_record_path("ab12cd34"), "rooms/ab12cd34");
    }

    #[test]
    fn room_from_value_rules() {
        assert_eq!(room_from_value(&Value::Null), None);
        assert_eq!(room_from_value(&json!("Lobby1")).as_deref(), Some("Lobby1"));
        assert_eq!(room_from_value(&json!(42)).as_deref(), Some("42"));
        assert_eq!(room_from_value(&json!(true)).as_deref(), Some("true"));
    }

    #[tokio::test]
    async fn subscription_yields_pushed_changes_in_order() {
        let (tx, mut subscription) = Subscription::channel(CURRENT_ROOM_PATH);
        assert_eq!(subscription.path(), "currentRoom");

        tx.send(Ok(Some(json!("Lobby1")))).unwrap();
        tx.send(Ok(None)).unwrap();
        drop(tx);

        let first = subscription.next_change().await.unwrap().unwrap();
        assert_eq!(first, Some(json!("Lobby1")));
        let second = subscription.next().await.unwrap().unwrap();
        assert_eq!(second, None);
        assert!(subscription.next().await.is_none());
    }
}
