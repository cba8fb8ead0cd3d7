//! Error types for the room-sync client.

use thiserror::Error;

use crate::backend::DependencyStatus;

/// Errors that can occur while bootstrapping the backend or talking to the store.
///
/// The coordinator never surfaces these to its callers; they end up in a log
/// line plus a [`Status`](crate::status::Status) update. They are returned
/// directly only by [`BackendInit`](crate::backend::BackendInit), the
/// [`KeyValueStore`](crate::store::KeyValueStore) trait, and the
/// coordinator handle when its loop is gone.
#[derive(Debug, Error)]
pub enum RoomSyncError {
    /// The platform cannot provide the backend SDK dependencies.
    #[error("backend dependencies unavailable: {0}")]
    DependencyUnavailable(DependencyStatus),

    /// Anonymous identity acquisition failed.
    #[error("anonymous sign-in failed: {0}")]
    AuthFailure(String),

    /// No handle to the key-value store could be obtained.
    #[error("store handle unavailable: {0}")]
    StoreUnavailable(String),

    /// Reading a path from the store failed.
    #[error("store read failed at `{path}`: {reason}")]
    StoreRead {
        /// Store path that was being read.
        path: String,
        /// Backend-provided failure description.
        reason: String,
    },

    /// Writing a path to the store failed.
    #[error("store write failed at `{path}`: {reason}")]
    StoreWrite {
        /// Store path that was being written.
        path: String,
        /// Backend-provided failure description.
        reason: String,
    },

    /// A push subscription reported a database-level error.
    #[error("listener error at `{path}`: {reason}")]
    Listener {
        /// Store path the subscription is attached to.
        path: String,
        /// Backend-provided failure description.
        reason: String,
    },

    /// [`BackendInit::initialize`](crate::backend::BackendInit::initialize)
    /// was called more than once.
    #[error("backend already initialized")]
    AlreadyInitialized,

    /// The coordinator loop has stopped; commands can no longer be queued.
    #[error("coordinator is not running")]
    NotRunning,

    /// Failed to serialize or deserialize a stored value.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// A specialized [`Result`] type for room-sync operations.
pub type Result<T> = std::result::Result<T, RoomSyncError>;
