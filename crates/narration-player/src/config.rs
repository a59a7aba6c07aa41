use serde::{Deserialize, Serialize};

/// Tuning parameters for the narration engine.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct EngineConfig {
    /// Longest chunk the chunker emits, in characters.
    pub max_chunk_chars: usize,
    /// Number of chunks synthesized ahead of the one playing.
    pub prefetch_window: usize,
    /// Delay between `play` and the first scheduled sample, in seconds.
    pub schedule_lead_seconds: f64,
    /// Playback rate used until the caller changes it.
    pub initial_rate: f64,
    /// Voice used for synthesis until the caller changes it.
    pub voice: String,
    /// Resampler input chunk size in frames.
    pub resample_chunk_frames: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_chunk_chars: 1200,
            prefetch_window: 3,
            schedule_lead_seconds: 0.1,
            initial_rate: 1.0,
            voice: "alloy".to_string(),
            resample_chunk_frames: 1024,
        }
    }
}
