//! Transcript surface
//!
//! The user-visible log a session writes into. [`BufferTranscript`] keeps the
//! text in memory and broadcasts every change so editor connections can
//! mirror it.

use serde::{Deserialize, Serialize};
use std::sync::{Mutex, MutexGuard};
use tokio::sync::broadcast;
use tracing::debug;

/// Append-only, clearable text sink shown to the user
pub trait Transcript: Send + Sync {
    fn append(&self, text: &str);
    fn clear(&self);
    fn show(&self);
    fn dispose(&self);
}

/// Change notifications emitted by [`BufferTranscript`]
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TranscriptEvent {
    Appended { text: String },
    Cleared,
    Shown,
    Disposed,
}

#[derive(Debug, Default)]
struct BufferState {
    text: String,
    visible: bool,
}

/// In-memory transcript that broadcasts its changes
#[derive(Debug)]
pub struct BufferTranscript {
    name: String,
    state: Mutex<BufferState>,
    events_tx: broadcast::Sender<TranscriptEvent>,
}

impl BufferTranscript {
    /// Create an empty, hidden transcript
    pub fn new(name: impl Into<String>) -> Self {
        let (events_tx, _) = broadcast::channel(1024);
        Self {
            name: name.into(),
            state: Mutex::new(BufferState::default()),
            events_tx,
        }
    }

    /// Current transcript text
    pub fn contents(&self) -> String {
        self.lock().text.clone()
    }

    pub fn is_visible(&self) -> bool {
        self.lock().visible
    }

    /// Subscribe to transcript changes
    pub fn subscribe(&self) -> broadcast::Receiver<TranscriptEvent> {
        self.events_tx.subscribe()
    }

    fn lock(&self) -> MutexGuard<'_, BufferState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn emit(&self, event: TranscriptEvent) {
        // No subscribers is fine
        let _ = self.events_tx.send(event);
    }
}

impl Transcript for BufferTranscript {
    fn append(&self, text: &str) {
        if text.is_empty() {
            return;
        }
        self.lock().text.push_str(text);
        self.emit(TranscriptEvent::Appended {
            text: text.to_string(),
        });
    }

    fn clear(&self) {
        self.lock().text.clear();
        self.emit(TranscriptEvent::Cleared);
    }

    fn show(&self) {
        debug!("Showing {} transcript", self.name);
        self.lock().visible = true;
        self.emit(TranscriptEvent::Shown);
    }

    fn dispose(&self) {
        let mut state = self.lock();
        state.text.clear();
        state.visible = false;
        drop(state);
        debug!("Released {} transcript", self.name);
        self.emit(TranscriptEvent::Disposed);
    }
}
