//! In-process event bus for narration updates.

use narration_types::{ChunkFailure, NarrationEvent, PlaybackState};
use tokio::sync::broadcast;

#[derive(Clone, Debug)]
pub struct EventBus {
    sender: broadcast::Sender<NarrationEvent>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    /// Create a new event bus with a bounded broadcast channel.
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(64);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<NarrationEvent> {
        self.sender.subscribe()
    }

    pub fn emit(&self, event: NarrationEvent) {
        let _ = self.sender.send(event);
    }

    pub fn state_changed(&self, state: PlaybackState, current_index: Option<usize>) {
        self.emit(NarrationEvent::StateChanged {
            state,
            current_index,
        });
    }

    pub fn source_loaded(&self, chunk_count: usize) {
        self.emit(NarrationEvent::SourceLoaded { chunk_count });
    }

    pub fn chunk_scheduled(&self, index: usize, start_at: f64, offset_seconds: f64, duration_seconds: f64) {
        self.emit(NarrationEvent::ChunkScheduled {
            index,
            start_at,
            offset_seconds,
            duration_seconds,
        });
    }

    pub fn chunk_finished(&self, index: usize) {
        self.emit(NarrationEvent::ChunkFinished { index });
    }

    pub fn playback_failed(&self, failure: ChunkFailure) {
        self.emit(NarrationEvent::PlaybackFailed(failure));
    }
}
