use serde::{Deserialize, Serialize};

/// Coarse state of the narration engine.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PlaybackState {
    /// Nothing is scheduled and no chunk is selected.
    #[default]
    Idle,
    /// The playback loop is walking the chunk sequence.
    Playing,
    /// Playback is suspended on a chunk and can be resumed.
    Paused,
}

/// Failure recorded when a chunk on the active playback path could not be played.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChunkFailure {
    /// Index of the chunk that failed.
    pub index: usize,
    /// Human-readable error chain.
    pub message: String,
}

/// Point-in-time view of the narration engine.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct NarrationStatus {
    /// Current engine state.
    pub state: PlaybackState,
    /// Chunk currently playing or paused on. `None` while idle.
    pub current_index: Option<usize>,
    /// Number of chunks in the loaded source.
    pub chunk_count: usize,
    /// Playback rate multiplier applied to every chunk.
    pub rate: f64,
    /// Voice used for new synthesis requests.
    pub voice: String,
    /// Position inside the current chunk in seconds, when audio is sounding or paused.
    pub position_seconds: Option<f64>,
    /// Duration of the current chunk in seconds, once it has been decoded.
    pub chunk_duration_seconds: Option<f64>,
    /// Decoded chunks held by the prefetch cache.
    pub cached_chunks: usize,
    /// Chunks with a synthesis request in flight.
    pub in_flight_chunks: usize,
    /// Session generation counter.
    pub generation: u64,
    /// Last active-path failure, cleared by the next successful play.
    pub last_error: Option<ChunkFailure>,
}

/// Notifications broadcast by the narration engine.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum NarrationEvent {
    /// A new text source replaced the previous one.
    SourceLoaded { chunk_count: usize },
    /// A chunk was handed to the audio output.
    ChunkScheduled {
        index: usize,
        /// Output clock time at which the chunk starts sounding.
        start_at: f64,
        /// Offset into the chunk in seconds.
        offset_seconds: f64,
        /// Full chunk duration in seconds.
        duration_seconds: f64,
    },
    /// A chunk played through to its natural end.
    ChunkFinished { index: usize },
    /// The engine changed state.
    StateChanged {
        state: PlaybackState,
        current_index: Option<usize>,
    },
    /// The playback rate changed.
    RateChanged { rate: f64 },
    /// The synthesis voice changed.
    VoiceChanged { voice: String },
    /// A chunk on the active path failed; playback paused on it.
    PlaybackFailed(ChunkFailure),
    /// The last chunk finished playing.
    Finished,
}
