//! Session state owned by the connection lifecycle manager

use crate::protocol::SessionState;

/// Baseline status line shown while idle
pub(crate) const STATUS_IDLE: &str = "Click to start";

/// Status line shown on the optimistic transition to listening
pub(crate) const STATUS_LISTENING: &str = "Listening...";

/// Per-connection session state
///
/// The backend is authoritative for `state`; the only local transition is
/// the optimistic switch to listening when the user starts a session.
#[derive(Debug, Clone)]
pub(crate) struct Session {
    /// What the voice pipeline is currently doing
    pub state: SessionState,
    /// Whether the transport is currently open
    pub connected: bool,
    /// Last human-readable status line
    pub status_text: String,
}

impl Session {
    pub(crate) fn new() -> Self {
        Self {
            state: SessionState::Idle,
            connected: false,
            status_text: STATUS_IDLE.to_string(),
        }
    }

    /// Derived cache of `state == listening`
    pub(crate) fn is_listening(&self) -> bool {
        self.state == SessionState::Listening
    }

    /// Apply an authoritative status update from the backend
    pub(crate) fn apply_status(&mut self, state: SessionState, message: &str) {
        self.state = state.normalized();
        self.status_text = message.to_string();
    }

    /// Reset to the idle baseline
    ///
    /// Leaves `connected` untouched; the transport flag is owned by the
    /// connection open/close paths.
    pub(crate) fn reset(&mut self) {
        self.state = SessionState::Idle;
        self.status_text = STATUS_IDLE.to_string();
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}
