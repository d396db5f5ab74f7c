//! Wire protocol for the voice service connection
//!
//! Defines the JSON message format exchanged with the backend over the
//! WebSocket. Server frames are tagged by an `event` field; unknown events
//! and unknown session states decode to safe fallbacks instead of failing.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Session states declared by the backend voice pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub(crate) enum SessionState {
    #[default]
    Idle,
    Listening,
    Processing,
    Speaking,
    /// Catch-all for state values this client does not recognize
    #[serde(other)]
    Unknown,
}

impl SessionState {
    /// Collapse unrecognized backend states to idle
    pub(crate) fn normalized(self) -> Self {
        match self {
            SessionState::Unknown => SessionState::Idle,
            other => other,
        }
    }

    /// Whether the state maps to an active indicator class
    pub(crate) fn is_active(self) -> bool {
        !matches!(self.normalized(), SessionState::Idle)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionState::Idle | SessionState::Unknown => write!(f, "idle"),
            SessionState::Listening => write!(f, "listening"),
            SessionState::Processing => write!(f, "processing"),
            SessionState::Speaking => write!(f, "speaking"),
        }
    }
}

/// Who produced a transcript line
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub(crate) enum Speaker {
    User,
    Assistant,
}

impl fmt::Display for Speaker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Speaker::User => write!(f, "You"),
            Speaker::Assistant => write!(f, "Assistant"),
        }
    }
}

/// Push notifications received from the backend
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub(crate) enum ServerEvent {
    /// Authoritative session state plus a human-readable status line
    Status {
        #[serde(default)]
        state: SessionState,
        #[serde(default)]
        message: String,
    },
    /// One utterance to display
    Transcript {
        #[serde(rename = "type")]
        speaker: Speaker,
        text: String,
    },
    /// Non-fatal fault notice
    Error {
        #[serde(default)]
        message: Option<String>,
    },
    /// Catch-all for event types this client does not handle
    #[serde(other)]
    Other,
}

/// Control requests sent to the backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub(crate) enum ClientRequest {
    StartListening,
    StopListening,
}
