//! Human-readable status updates reported by the coordinator.
//!
//! Every failure inside the coordinator ends in one of these (plus a log
//! line) rather than an error returned to the caller.

use std::fmt;

/// A status update shown to the operator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Status {
    /// The backend became ready and the coordinator is attaching its listener.
    Subscribing,
    /// The listener could not be attached.
    StoreUnavailable,
    /// The initial read of the room pointer failed.
    InitialReadFailed,
    /// The room pointer is absent; a default room is being written.
    CreatingDefaultRoom,
    /// Writing the default room failed.
    DefaultRoomFailed,
    /// The push subscription reported an error.
    ListenerFailed,
    /// The coordinator is synchronized on this room.
    CurrentRoom(String),
    /// A room operation was requested before the backend was ready.
    BackendNotReady,
    /// A room record was written; the pointer update follows.
    RoomCreated(String),
    /// Writing a room record failed.
    CreateRoomFailed,
    /// A join was requested before any room was known.
    NotReadyToJoin,
    /// Joining the session of this room.
    Joining(String),
    /// Writing the room pointer failed.
    UpdateRoomFailed,
}

impl Status {
    /// Returns `true` for statuses that report a failure.
    pub fn is_failure(&self) -> bool {
        matches!(
            self,
            Self::StoreUnavailable
                | Self::InitialReadFailed
                | Self::DefaultRoomFailed
                | Self::ListenerFailed
                | Self::BackendNotReady
                | Self::CreateRoomFailed
                | Self::NotReadyToJoin
                | Self::UpdateRoomFailed
        )
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Subscribing => write!(f, "Backend ready, subscribing to currentRoom..."),
            Self::StoreUnavailable => write!(f, "Store handle unavailable. Backend not ready."),
            Self::InitialReadFailed => write!(f, "Error reading currentRoom."),
            Self::CreatingDefaultRoom => write!(f, "No currentRoom. Creating a default one..."),
            Self::DefaultRoomFailed => write!(f, "Error initializing room."),
            Self::ListenerFailed => write!(f, "Error listening to currentRoom."),
            Self::CurrentRoom(room) => write!(f, "Current room: {room}"),
            Self::BackendNotReady => write!(f, "Backend not ready yet."),
            Self::RoomCreated(room) => write!(f, "Room created: {room}. Updating currentRoom..."),
            Self::CreateRoomFailed => write!(f, "Error creating room."),
            Self::NotReadyToJoin => write!(f, "Not ready to join."),
            Self::Joining(room) => write!(f, "Joining room: {room}"),
            Self::UpdateRoomFailed => write!(f, "Error updating room."),
        }
    }
}
