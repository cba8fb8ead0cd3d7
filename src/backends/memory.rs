//! In-process backend backed by a shared JSON tree.
//!
//! [`MemoryStore`] behaves like a small realtime database: values live in one
//! JSON tree addressed by `/`-separated paths, writes replace whole subtrees,
//! and subscribers are pushed the new value of their path after every write
//! that changes it. Cloning a store shares the tree, so several clients can
//! be wired to the same "database".
//!
//! Write semantics follow the hosted database:
//!
//! - writing `null` deletes the path, and parents left empty are pruned;
//! - empty objects are never stored;
//! - the `{".sv": "timestamp"}` placeholder is replaced by the current epoch
//!   milliseconds;
//! - keys containing `.`, `#`, `$`, `[` or `]` are rejected.
//!
//! # Example
//!
//! ```
//! # tokio_test::block_on(async {
//! use room_sync::{KeyValueStore, MemoryStore};
//! use serde_json::json;
//!
//! let store = MemoryStore::new();
//! store.write("rooms/abc/owner", json!("alice")).await?;
//! assert_eq!(store.read("rooms").await?, Some(json!({ "abc": { "owner": "alice" } })));
//! # Ok::<(), room_sync::RoomSyncError>(())
//! # }).unwrap();
//! ```

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use serde_json::{Map, Value};
use tokio::sync::{mpsc, Mutex};
use tracing::debug;

use crate::backend::{Backend, DependencyStatus, UserId};
use crate::error::{Result, RoomSyncError};
use crate::room::ServerValue;
use crate::store::{KeyValueStore, Subscription, ValueChange};

/// Characters that may not appear in a path segment.
const INVALID_KEY_CHARS: &[char] = &['.', '#', '$', '[', ']'];

// ── Store ───────────────────────────────────────────────────────────

/// A shareable in-memory [`KeyValueStore`].
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    tree: Arc<Mutex<Tree>>,
}

#[derive(Debug, Default)]
struct Tree {
    root: Value,
    listeners: Vec<Listener>,
}

#[derive(Debug)]
struct Listener {
    path: Vec<String>,
    tx: mpsc::UnboundedSender<ValueChange>,
}

impl MemoryStore {
    /// An empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// A copy of the whole tree (`null` when empty).
    pub async fn snapshot(&self) -> Value {
        self.tree.lock().await.root.clone()
    }

    /// Number of attached subscriptions whose receiver is still alive.
    pub async fn subscriber_count(&self) -> usize {
        let mut tree = self.tree.lock().await;
        tree.listeners.retain(|listener| !listener.tx.is_closed());
        tree.listeners.len()
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn read(&self, path: &str) -> Result<Option<Value>> {
        let segments = segments(path);
        validate(&segments).map_err(|reason| RoomSyncError::StoreRead {
            path: path.to_owned(),
            reason,
        })?;

        let tree = self.tree.lock().await;
        Ok(lookup(&tree.root, &segments).cloned())
    }

    async fn write(&self, path: &str, mut value: Value) -> Result<()> {
        let segments = segments(path);
        validate(&segments).map_err(|reason| RoomSyncError::StoreWrite {
            path: path.to_owned(),
            reason,
        })?;
        normalize(&mut value, now_millis());

        let mut tree = self.tree.lock().await;
        let before = tree.watched_values(&segments);
        assign(&mut tree.root, &segments, value);
        if is_empty(&tree.root) {
            tree.root = Value::Null;
        }
        tree.notify(before);
        debug!(path = %path, "memory store write applied");
        Ok(())
    }

    async fn subscribe(&self, path: &str) -> Result<Subscription> {
        let segments = segments(path);
        validate(&segments).map_err(RoomSyncError::StoreUnavailable)?;

        let (tx, subscription) = Subscription::channel(path);
        let mut tree = self.tree.lock().await;
        // Deliver the current value first, like a freshly attached listener.
        let current = lookup(&tree.root, &segments).cloned();
        if tx.send(Ok(current)).is_ok() {
            tree.listeners.push(Listener {
                path: segments.iter().map(|s| (*s).to_owned()).collect(),
                tx,
            });
        }
        Ok(subscription)
    }
}

impl Tree {
    /// Current value of every listener's path, `None` for listeners a write
    /// to `changed` cannot affect. One entry per listener, in order.
    fn watched_values(&self, changed: &[&str]) -> Vec<Option<Option<Value>>> {
        self.listeners
            .iter()
            .map(|listener| {
                overlaps(&listener.path, changed)
                    .then(|| lookup(&self.root, &listener.path).cloned())
            })
            .collect()
    }

    /// Push the new value to every listener whose value differs from
    /// `before`, dropping listeners whose receiver is gone.
    fn notify(&mut self, before: Vec<Option<Option<Value>>>) {
        let Self { root, listeners } = self;
        let root = &*root;
        let mut before = before.into_iter();
        listeners.retain(|listener| {
            let Some(previous) = before.next().flatten() else {
                return !listener.tx.is_closed();
            };
            let value = lookup(root, &listener.path).cloned();
            if value == previous {
                return !listener.tx.is_closed();
            }
            listener.tx.send(Ok(value)).is_ok()
        });
    }
}

// ── Tree helpers ────────────────────────────────────────────────────

fn segments(path: &str) -> Vec<&str> {
    path.split('/').filter(|s| !s.is_empty()).collect()
}

fn validate(segments: &[&str]) -> std::result::Result<(), String> {
    for segment in segments {
        if let Some(c) = segment.chars().find(|c| INVALID_KEY_CHARS.contains(c)) {
            return Err(format!("invalid character `{c}` in key `{segment}`"));
        }
    }
    Ok(())
}

/// One path is an ancestor of (or equal to) the other.
fn overlaps(listener: &[String], changed: &[&str]) -> bool {
    listener.iter().zip(changed).all(|(a, b)| a == b)
}

fn lookup<'a, S: AsRef<str>>(root: &'a Value, segments: &[S]) -> Option<&'a Value> {
    let mut node = root;
    for segment in segments {
        node = node.as_object()?.get(segment.as_ref())?;
    }
    if node.is_null() {
        None
    } else {
        Some(node)
    }
}

fn assign(node: &mut Value, segments: &[&str], value: Value) {
    let Some((first, rest)) = segments.split_first() else {
        *node = value;
        return;
    };
    if !node.is_object() {
        if value.is_null() {
            return;
        }
        *node = Value::Object(Map::new());
    }
    let Value::Object(map) = node else {
        return;
    };

    if rest.is_empty() {
        if value.is_null() {
            map.remove(*first);
        } else {
            map.insert((*first).to_owned(), value);
        }
        return;
    }

    let child = map.entry((*first).to_owned()).or_insert(Value::Null);
    assign(child, rest, value);
    if is_empty(child) {
        map.remove(*first);
    }
}

fn is_empty(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Object(map) => map.is_empty(),
        _ => false,
    }
}

/// Resolve server timestamps and drop empty children.
fn normalize(value: &mut Value, now_ms: i64) {
    if ServerValue::is_timestamp(value) {
        *value = Value::from(now_ms);
        return;
    }
    if let Value::Object(map) = value {
        for child in map.values_mut() {
            normalize(child, now_ms);
        }
        map.retain(|_, child| !is_empty(child));
        if map.is_empty() {
            *value = Value::Null;
        }
    }
}

fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| i64::try_from(elapsed.as_millis()).unwrap_or(i64::MAX))
        .unwrap_or(0)
}

// ── Backend ─────────────────────────────────────────────────────────

/// A [`Backend`] whose store is a [`MemoryStore`].
///
/// Dependencies are always available unless configured otherwise, the
/// endpoint is ignored, and every sign-in yields a fresh random user id.
#[derive(Debug, Clone)]
pub struct MemoryBackend {
    store: MemoryStore,
    dependency_status: DependencyStatus,
}

impl MemoryBackend {
    /// A backend with its own empty store.
    pub fn new() -> Self {
        Self::with_store(MemoryStore::new())
    }

    /// A backend sharing `store` with other backends.
    pub fn with_store(store: MemoryStore) -> Self {
        Self {
            store,
            dependency_status: DependencyStatus::Available,
        }
    }

    /// Report `status` from the dependency check.
    #[must_use]
    pub fn with_dependency_status(mut self, status: DependencyStatus) -> Self {
        self.dependency_status = status;
        self
    }

    /// The underlying store.
    pub fn store(&self) -> &MemoryStore {
        &self.store
    }
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Backend for MemoryBackend {
    async fn check_dependencies(&self) -> DependencyStatus {
        self.dependency_status
    }

    async fn open_store(&self, endpoint: Option<&str>) -> Result<Arc<dyn KeyValueStore>> {
        debug!(endpoint = ?endpoint, "opening in-memory store");
        Ok(Arc::new(self.store.clone()))
    }

    async fn sign_in_anonymously(&self) -> Result<UserId> {
        Ok(format!("anon-{}", uuid::Uuid::new_v4().simple()))
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
    use futures_util::FutureExt;
    use serde_json::json;

    #[tokio::test]
    async fn nested_writes_build_a_tree() {
        let store = MemoryStore::new();
        store.write("currentRoom", json!("Lobby1")).await.unwrap();
        store.write("rooms/a1/owner", json!("u1")).await.unwrap();
        store.write("/rooms/b2/", json!({ "owner": "u2" })).await.unwrap();

        assert_eq!(store.read("currentRoom").await.unwrap(), Some(json!("Lobby1")));
        assert_eq!(store.read("rooms/b2/owner").await.unwrap(), Some(json!("u2")));
        assert_eq!(
            store.snapshot().await,
            json!({
                "currentRoom": "Lobby1",
                "rooms": { "a1": { "owner": "u1" }, "b2": { "owner": "u2" } }
            })
        );
        assert_eq!(store.read("missing/path").await.unwrap(), None);
        // Reading below a scalar finds nothing.
        assert_eq!(store.read("currentRoom/child").await.unwrap(), None);
    }

    #[tokio::test]
    async fn null_deletes_and_prunes_empty_parents() {
        let store = MemoryStore::new();
        store.write("rooms/a1/owner", json!("u1")).await.unwrap();
        store.write("rooms/a1/owner", Value::Null).await.unwrap();

        assert_eq!(store.read("rooms").await.unwrap(), None);
        assert_eq!(store.snapshot().await, Value::Null);
    }

    #[tokio::test]
    async fn server_timestamp_is_resolved_and_empty_maps_dropped() {
        let store = MemoryStore::new();
        let before = now_millis();
        store
            .write(
                "rooms/r1",
                json!({ "createdAt": { ".sv": "timestamp" }, "owner": "u", "participants": {} }),
            )
            .await
            .unwrap();

        let record = store.read("rooms/r1").await.unwrap().unwrap();
        let created_at = record["createdAt"].as_i64().unwrap();
        assert!(created_at >= before);
        assert_eq!(record["owner"], json!("u"));
        assert!(record.get("participants").is_none());
    }

    #[tokio::test]
    async fn invalid_keys_are_rejected() {
        let store = MemoryStore::new();
        let err = store.write("rooms/a.b", json!(1)).await.unwrap_err();
        assert!(matches!(err, RoomSyncError::StoreWrite { ref path, .. } if path == "rooms/a.b"));
        assert!(matches!(
            store.read("rooms/$x").await,
            Err(RoomSyncError::StoreRead { .. })
        ));
        assert!(matches!(
            store.subscribe("a[0]").await,
            Err(RoomSyncError::StoreUnavailable(_))
        ));
        assert_eq!(store.snapshot().await, Value::Null);
    }

    #[tokio::test]
    async fn subscription_sees_current_value_then_related_writes() {
        let store = MemoryStore::new();
        store.write("rooms/r1/owner", json!("u1")).await.unwrap();
        let mut sub = store.subscribe("rooms/r1").await.unwrap();

        let initial = sub.next_change().await.unwrap().unwrap();
        assert_eq!(initial, Some(json!({ "owner": "u1" })));

        // Descendant write.
        store.write("rooms/r1/owner", json!("u2")).await.unwrap();
        assert_eq!(
            sub.next_change().await.unwrap().unwrap(),
            Some(json!({ "owner": "u2" }))
        );

        // Unrelated write produces nothing; ancestor delete reports absence.
        store.write("currentRoom", json!("X")).await.unwrap();
        store.write("rooms", Value::Null).await.unwrap();
        assert_eq!(sub.next_change().await.unwrap().unwrap(), None);
    }

    #[tokio::test]
    async fn unchanged_writes_do_not_notify() {
        let store = MemoryStore::new();
        store.write("currentRoom", json!("Lobby1")).await.unwrap();
        let mut sub = store.subscribe("currentRoom").await.unwrap();
        assert_eq!(
            sub.next_change().await.unwrap().unwrap(),
            Some(json!("Lobby1"))
        );

        // Rewriting the same value, or deleting an absent sibling, is silent.
        store.write("currentRoom", json!("Lobby1")).await.unwrap();
        store.write("missing", Value::Null).await.unwrap();
        store.write("currentRoom", json!("Lobby2")).await.unwrap();

        assert_eq!(
            sub.next_change().await.unwrap().unwrap(),
            Some(json!("Lobby2"))
        );
        assert!(sub.next_change().now_or_never().is_none());
    }

    #[tokio::test]
    async fn dropped_subscriptions_are_detached() {
        let store = MemoryStore::new();
        let sub = store.subscribe("currentRoom").await.unwrap();
        let _kept = store.subscribe("currentRoom").await.unwrap();
        assert_eq!(store.subscriber_count().await, 2);

        drop(sub);
        store.write("currentRoom", json!("Y")).await.unwrap();
        assert_eq!(store.subscriber_count().await, 1);
    }

    #[tokio::test]
    async fn clones_share_one_tree() {
        let a = MemoryStore::new();
        let b = a.clone();
        let mut sub = b.subscribe("currentRoom").await.unwrap();
        assert_eq!(sub.next_change().await.unwrap().unwrap(), None);

        a.write("currentRoom", json!("Shared")).await.unwrap();
        assert_eq!(b.read("currentRoom").await.unwrap(), Some(json!("Shared")));
        assert_eq!(
            sub.next_change().await.unwrap().unwrap(),
            Some(json!("Shared"))
        );
    }

    #[tokio::test]
    async fn backend_issues_fresh_anonymous_ids() {
        let backend = MemoryBackend::new();
        assert_eq!(
            backend.check_dependencies().await,
            DependencyStatus::Available
        );
        let a = backend.sign_in_anonymously().await.unwrap();
        let b = backend.sign_in_anonymously().await.unwrap();
        assert!(a.starts_with("anon-"));
        assert_ne!(a, b);

        let degraded = MemoryBackend::new().with_dependency_status(DependencyStatus::UnavailableOther);
        assert_eq!(
            degraded.check_dependencies().await,
            DependencyStatus::UnavailableOther
        );
    }

    #[tokio::test]
    async fn opened_store_shares_backend_tree() {
        let backend = MemoryBackend::new();
        let store = backend.open_store(Some("https://ignored/")).await.unwrap();
        store.write("currentRoom", json!("Z")).await.unwrap();
        assert_eq!(
            backend.store().read("currentRoom").await.unwrap(),
            Some(json!("Z"))
        );
    }
}
