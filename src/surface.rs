//! UI surface events
//!
//! The core publishes display changes on a broadcast channel; whatever
//! renders the surface subscribes. The binary ships a console renderer,
//! richer frontends attach to the same channel.

use crate::protocol::{SessionState, Speaker};
use chrono::{DateTime, Local};
use tokio::sync::broadcast;
use tracing::debug;

/// Display changes published by the core
#[derive(Debug, Clone)]
pub(crate) enum UiEvent {
    /// Indicator class change; idle means no active class
    Indicator(SessionState),
    /// Status text region update
    Status(String),
    /// A transcript message element was attached
    MessageAdded {
        id: u64,
        speaker: Speaker,
        text: String,
        at: DateTime<Local>,
    },
    /// A message began its fade-out
    MessageFading { id: u64 },
    /// A message element was detached
    MessageRemoved { id: u64 },
    /// The transcript container was emptied without fading
    TranscriptCleared,
}

/// Create the surface event channel
pub(crate) fn channel() -> broadcast::Sender<UiEvent> {
    let (tx, _) = broadcast::channel(100);
    tx
}

/// Indicator glyph for a session state
fn indicator_glyph(state: SessionState) -> &'static str {
    if !state.is_active() {
        return "○";
    }
    match state.normalized() {
        SessionState::Listening => "●",
        SessionState::Processing => "◐",
        _ => "◍",
    }
}

/// Spawn the console renderer task
///
/// Prints indicator/status changes and transcript lines to stdout. Fades
/// have no console representation; scrollback stands in for removal.
pub(crate) fn spawn_console_surface(
    mut event_rx: broadcast::Receiver<UiEvent>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        while let Ok(event) = event_rx.recv().await {
            match event {
                UiEvent::Indicator(state) => {
                    println!("{} {}", indicator_glyph(state), state);
                }
                UiEvent::Status(text) => {
                    println!("  {}", text);
                }
                UiEvent::MessageAdded {
                    speaker, text, at, ..
                } => {
                    println!("[{}] {}: {}", at.format("%H:%M:%S"), speaker, text);
                }
                UiEvent::MessageFading { id } | UiEvent::MessageRemoved { id } => {
                    debug!(id, "Transcript message retired");
                }
                UiEvent::TranscriptCleared => {
                    debug!("Transcript cleared");
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_indicator_glyphs_distinct_for_active_states() {
        let active = [
            SessionState::Listening,
            SessionState::Processing,
            SessionState::Speaking,
        ];
        for state in active {
            assert_ne!(indicator_glyph(state), indicator_glyph(SessionState::Idle));
        }
    }

    #[test]
    fn test_unknown_state_renders_as_idle() {
        assert_eq!(
            indicator_glyph(SessionState::Unknown),
            indicator_glyph(SessionState::Idle)
        );
    }
}
