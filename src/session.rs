//! Session transport collaborator.
//!
//! The coordinator decides *which* room to be in; actually hosting or joining
//! a networked session is delegated to a [`SessionTransport`]. Calls are
//! fire-and-forget.

/// Starts or joins the networked session for a room.
pub trait SessionTransport: Send + Sync + 'static {
    /// Host a new session for `room`.
    fn create_session(&self, room: &str);

    /// Join the existing session for `room`.
    fn join_session(&self, room: &str);
}

/// What to do with the session transport after the room pointer is updated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionLaunch {
    /// Only update the pointer.
    #[default]
    None,
    /// Host a new session for the room.
    Create,
    /// Join the room's existing session.
    Join,
}

impl SessionLaunch {
    /// Map the `run_session` / `create` flag pair onto a launch intent.
    ///
    /// ```
    /// use room_sync::session::SessionLaunch;
    ///
    /// assert_eq!(SessionLaunch::from_flags(false, true), SessionLaunch::None);
    /// assert_eq!(SessionLaunch::from_flags(true, true), SessionLaunch::Create);
    /// assert_eq!(SessionLaunch::from_flags(true, false), SessionLaunch::Join);
    /// ```
    pub fn from_flags(run_session: bool, create: bool) -> Self {
        match (run_session, create) {
            (false, _) => Self::None,
            (true, true) => Self::Create,
            (true, false) => Self::Join,
        }
    }

    /// Invoke the matching [`SessionTransport`] method for `room`.
    pub(crate) fn dispatch(self, session: &dyn SessionTransport, room: &str) {
        match self {
            Self::None => {}
            Self::Create => session.create_session(room),
            Self::Join => session.join_session(room),
        }
    }
}
