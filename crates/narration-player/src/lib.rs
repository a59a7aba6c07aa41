//! Gapless narration playback engine.
//!
//! Text is split into chunks, each chunk is synthesized and decoded ahead of
//! playback by the prefetch cache, and the scheduler plays the decoded buffers
//! back to back on an [`output::AudioOutput`].

pub mod cache;
pub mod chunker;
pub mod config;
pub mod decode;
pub mod device;
pub mod error;
pub mod fence;
pub mod output;
pub mod playback;
pub mod playhead;
pub mod provider;
pub mod resample;
pub mod scheduler;
pub mod status;

#[cfg(test)]
mod testing;

pub use chunker::{Chunk, split_text};
pub use config::EngineConfig;
pub use error::{ChunkError, ContentFetchError, ControlError, DecodeError, PlaybackError, SynthesisError};
pub use narration_types::{ChunkFailure, NarrationEvent, NarrationStatus, PlaybackState};
pub use scheduler::{LoopOutcome, Narrator, PlaybackTask};
