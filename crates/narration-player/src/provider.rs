//! Collaborator traits for speech synthesis and text resolution.

use async_trait::async_trait;

use crate::decode::PayloadFormat;
use crate::error::{ContentFetchError, SynthesisError};

/// Turns text into encoded audio.
#[async_trait]
pub trait Synthesizer: Send + Sync {
    /// Synthesize `text` with `voice`, returning the encoded payload.
    async fn synthesize(&self, text: &str, voice: &str) -> Result<Vec<u8>, SynthesisError>;

    /// Encoding of the payloads returned by [`Synthesizer::synthesize`].
    fn payload_format(&self) -> PayloadFormat {
        PayloadFormat::default()
    }
}

/// Resolves user input (a URL or pasted text) into narration text.
#[async_trait]
pub trait TextSource: Send + Sync {
    async fn resolve(&self, input: &str) -> Result<String, ContentFetchError>;
}
