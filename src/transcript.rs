//! Transcript retention
//!
//! Bounded, self-expiring log of displayed utterances. At most three
//! messages are visible at once; an insertion past the bound starts the
//! oldest visible message fading, and every message is force-retired after
//! a fixed age. Delayed callbacks are never cancelled: each one re-checks
//! that its target is still attached (and, for expiry, still visible)
//! immediately before acting, so overflow and expiry paths cannot detach
//! the same message twice.

use crate::protocol::Speaker;
use crate::surface::UiEvent;
use chrono::{DateTime, Local};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::sleep;

/// Maximum number of concurrently visible messages
pub(crate) const MAX_VISIBLE: usize = 3;

/// Time a fading message stays attached before detachment
pub(crate) const FADE_DELAY: Duration = Duration::from_secs(1);

/// Age at which a still-visible message is force-retired
pub(crate) const EXPIRY_DELAY: Duration = Duration::from_secs(30);

/// Display phase of an attached message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum DisplayState {
    Visible,
    Fading,
}

/// One displayed utterance
#[derive(Debug, Clone)]
pub(crate) struct TranscriptMessage {
    pub id: u64,
    pub speaker: Speaker,
    pub text: String,
    pub created_at: DateTime<Local>,
    pub display_state: DisplayState,
}

#[derive(Debug, Default)]
struct LogInner {
    messages: Vec<TranscriptMessage>,
    next_id: u64,
}

/// Bounded, self-expiring transcript log
///
/// Cheaply cloneable handle; delayed fade/expiry tasks hold their own clone
/// and go through the same id-guarded paths as everything else.
#[derive(Clone)]
pub(crate) struct TranscriptLog {
    inner: Arc<Mutex<LogInner>>,
    ui_tx: broadcast::Sender<UiEvent>,
}

impl TranscriptLog {
    pub(crate) fn new(ui_tx: broadcast::Sender<UiEvent>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(LogInner::default())),
            ui_tx,
        }
    }

    fn lock(&self) -> MutexGuard<'_, LogInner> {
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Append a new message, evicting the oldest visible one if the bound
    /// would be exceeded
    ///
    /// Returns the id assigned to the new message.
    pub(crate) fn append(&self, speaker: Speaker, text: &str) -> u64 {
        let text = sanitize_text(text);
        let created_at = Local::now();
        let mut evicted: Vec<u64> = Vec::new();
        let id = {
            let mut inner = self.lock();
            while visible_count_of(&inner) >= MAX_VISIBLE {
                match inner
                    .messages
                    .iter_mut()
                    .find(|m| m.display_state == DisplayState::Visible)
                {
                    Some(oldest) => {
                        oldest.display_state = DisplayState::Fading;
                        evicted.push(oldest.id);
                    }
                    None => break,
                }
            }
            let id = inner.next_id;
            inner.next_id += 1;
            inner.messages.push(TranscriptMessage {
                id,
                speaker,
                text: text.clone(),
                created_at,
                display_state: DisplayState::Visible,
            });
            id
        };

        for evicted_id in evicted {
            let _ = self.ui_tx.send(UiEvent::MessageFading { id: evicted_id });
            self.spawn_detach(evicted_id);
        }
        let _ = self.ui_tx.send(UiEvent::MessageAdded {
            id,
            speaker,
            text,
            at: created_at,
        });
        self.spawn_expiry(id);
        id
    }

    /// Immediately detach everything, skipping the fade phase
    ///
    /// Pending fade/expiry timers find their targets gone and no-op.
    pub(crate) fn clear(&self) {
        self.lock().messages.clear();
        let _ = self.ui_tx.send(UiEvent::TranscriptCleared);
    }

    /// Age-based retirement: begin the fade if the message is still visible
    fn expire(&self, id: u64) {
        let still_visible = {
            let mut inner = self.lock();
            match inner
                .messages
                .iter_mut()
                .find(|m| m.id == id && m.display_state == DisplayState::Visible)
            {
                Some(message) => {
                    message.display_state = DisplayState::Fading;
                    true
                }
                None => false,
            }
        };
        if still_visible {
            let _ = self.ui_tx.send(UiEvent::MessageFading { id });
            self.spawn_detach(id);
        }
    }

    /// Final removal: detach only if the message is still attached
    fn detach(&self, id: u64) {
        let removed = {
            let mut inner = self.lock();
            match inner.messages.iter().position(|m| m.id == id) {
                Some(index) => {
                    inner.messages.remove(index);
                    true
                }
                None => false,
            }
        };
        if removed {
            let _ = self.ui_tx.send(UiEvent::MessageRemoved { id });
        }
    }

    fn spawn_detach(&self, id: u64) {
        let log = self.clone();
        tokio::spawn(async move {
            sleep(FADE_DELAY).await;
            log.detach(id);
        });
    }

    fn spawn_expiry(&self, id: u64) {
        let log = self.clone();
        tokio::spawn(async move {
            sleep(EXPIRY_DELAY).await;
            log.expire(id);
        });
    }

    /// Number of currently visible messages
    #[allow(dead_code)]
    pub(crate) fn visible_count(&self) -> usize {
        visible_count_of(&self.lock())
    }

    /// Snapshot of all attached messages in display order
    #[allow(dead_code)]
    pub(crate) fn snapshot(&self) -> Vec<TranscriptMessage> {
        self.lock().messages.clone()
    }
}

fn visible_count_of(inner: &LogInner) -> usize {
    inner
        .messages
        .iter()
        .filter(|m| m.display_state == DisplayState::Visible)
        .count()
}

/// Scrub untrusted display text before it reaches any surface
///
/// Strips ANSI escape sequences and replaces remaining control characters
/// with spaces; the backend's text is trusted only as plain words.
fn sanitize_text(text: &str) -> String {
    let stripped = strip_ansi_escapes::strip(text.as_bytes());
    String::from_utf8_lossy(&stripped)
        .chars()
        .map(|c| if c.is_control() { ' ' } else { c })
        .collect::<String>()
        .trim()
        .to_string()
}
