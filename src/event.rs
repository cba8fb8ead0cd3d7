//! Events emitted by the room coordinator.

use crate::status::Status;

/// An event delivered on the receiver returned by
/// [`RoomCoordinator::start`](crate::coordinator::RoomCoordinator::start).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoomSyncEvent {
    /// A status update for the operator. Every status is also logged.
    Status(Status),
    /// The local room changed and the coordinator is synchronized on it.
    ///
    /// Emitted on each synchronization, even if `room` equals the previous one.
    RoomChanged {
        /// The room all clients should currently join.
        room: String,
    },
    /// The coordinator loop stopped.
    ///
    /// Always the last event after a graceful
    /// [`shutdown`](crate::coordinator::RoomCoordinator::shutdown), even when
    /// the channel is full. A coordinator that is dropped, or whose loop is
    /// aborted after the shutdown timeout, closes the channel without it.
    Stopped,
}
