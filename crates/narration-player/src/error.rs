//! Typed errors for the narration engine.

use thiserror::Error;

/// Failure converting a provider payload into playable samples.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("audio payload is empty")]
    Empty,
    #[error("payload length {len} is not a multiple of the {frame_bytes}-byte frame")]
    Misaligned { len: usize, frame_bytes: usize },
    #[error("invalid audio format: {0}")]
    InvalidFormat(String),
    #[error("container decode failed: {0}")]
    Container(String),
    #[error("resample failed: {0}")]
    Resample(String),
}

/// Failure reported by the speech synthesis backend.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("synthesis with voice `{voice}` failed: {message}")]
pub struct SynthesisError {
    pub voice: String,
    pub message: String,
}

impl SynthesisError {
    pub fn new(voice: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            voice: voice.into(),
            message: message.into(),
        }
    }
}

/// Failure producing or playing the audio for one chunk.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ChunkError {
    #[error(transparent)]
    Synthesis(#[from] SynthesisError),
    #[error(transparent)]
    Decode(#[from] DecodeError),
    #[error("audio output failed: {0}")]
    Output(String),
}

/// Active-path failure that paused playback at `index`.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("chunk {index} failed: {cause}")]
pub struct PlaybackError {
    pub index: usize,
    #[source]
    pub cause: ChunkError,
}

/// Failure resolving narration text from user input.
#[derive(Debug, Error)]
pub enum ContentFetchError {
    #[error("no text or URL given")]
    Empty,
    #[error("request to {url} failed: {message}")]
    Request { url: String, message: String },
    #[error("{url} returned HTTP {status}")]
    Status { url: String, status: u16 },
    #[error("no readable text found at {0}")]
    NoText(String),
    #[error("read failed: {0}")]
    Io(#[from] std::io::Error),
}

/// Control operation rejected because it does not apply to the current session.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ControlError {
    #[error("no text source is loaded")]
    NoSource,
    #[error("chunk index {index} is out of range (source has {len} chunks)")]
    IndexOutOfRange { index: usize, len: usize },
    #[error("playback is not paused")]
    NotPaused,
    #[error("invalid playback rate {0}")]
    InvalidRate(f64),
}
