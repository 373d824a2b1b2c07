// Player event stream
use crate::script::{SoundKind, VisualState};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::trace;

/// Non-fatal observability signals emitted while a script plays.
///
/// Nothing in the player depends on these being observed; they exist so a
/// front-end or a test can see what happened (including failures that are
/// otherwise swallowed).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PlayerEvent {
    RunStarted {
        total_steps: usize,
    },
    StepStarted {
        index: usize,
        kind: String,
        progress: u8,
    },
    SceneChanged {
        visual: VisualState,
        show_photo: bool,
    },
    SpeechFailed {
        text: String,
        reason: String,
    },
    AudioUnavailable {
        kind: SoundKind,
        reason: String,
    },
    RunFinished,
    Reset,
}

/// Broadcast fan-out of [`PlayerEvent`]s. Cheap to clone; publishing with
/// no subscribers is fine.
#[derive(Clone)]
pub struct EventStream {
    tx: broadcast::Sender<PlayerEvent>,
}

impl EventStream {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn publish(&self, event: PlayerEvent) {
        trace!(target = "player", event = ?event, "publish");
        // No receivers is not an error here
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PlayerEvent> {
        self.tx.subscribe()
    }
}

impl Default for EventStream {
    fn default() -> Self {
        Self::new(256)
    }
}
