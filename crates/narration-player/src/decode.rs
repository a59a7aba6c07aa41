//! Payload decode stage.
//!
//! Turns the bytes returned by a synthesis provider into interleaved `f32`
//! samples. Raw little-endian PCM16 is converted directly; container formats
//! (WAV, MP3, FLAC, ...) go through Symphonia.

use std::io::Cursor;
use std::sync::Arc;

use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{CodecParameters, DecoderOptions};
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;

use crate::error::DecodeError;

/// Sample rate assumed for raw PCM payloads when the provider does not say otherwise.
pub const DEFAULT_PCM_SAMPLE_RATE: u32 = 24_000;

/// Decoded, playback-ready audio for one chunk.
///
/// Samples are interleaved and shared, so clones are cheap and never copy audio.
#[derive(Clone, Debug, PartialEq)]
pub struct DecodedAudio {
    pub samples: Arc<[f32]>,
    pub sample_rate: u32,
    pub channels: usize,
}

impl DecodedAudio {
    pub fn new(samples: Vec<f32>, sample_rate: u32, channels: usize) -> Self {
        Self {
            samples: samples.into(),
            sample_rate,
            channels,
        }
    }

    /// Number of frames (samples per channel).
    pub fn frames(&self) -> usize {
        if self.channels == 0 {
            return 0;
        }
        self.samples.len() / self.channels
    }

    pub fn duration_seconds(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.frames() as f64 / self.sample_rate as f64
    }
}

/// Encoding of the bytes a synthesizer returns.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PayloadFormat {
    /// Headerless signed 16-bit little-endian PCM.
    Pcm16 { sample_rate: u32, channels: u16 },
    /// A container/codec Symphonia can probe. `extension` is used as a probe hint.
    Container { extension: Option<String> },
}

impl Default for PayloadFormat {
    fn default() -> Self {
        PayloadFormat::Pcm16 {
            sample_rate: DEFAULT_PCM_SAMPLE_RATE,
            channels: 1,
        }
    }
}

/// Decode `payload` according to `format`.
pub fn decode_payload(payload: Vec<u8>, format: &PayloadFormat) -> Result<DecodedAudio, DecodeError> {
    match format {
        PayloadFormat::Pcm16 {
            sample_rate,
            channels,
        } => decode_pcm16(&payload, *sample_rate, *channels),
        PayloadFormat::Container { extension } => decode_container(payload, extension.as_deref()),
    }
}

/// Convert signed 16-bit little-endian PCM into `f32` samples in `[-1.0, 1.0]`.
pub fn decode_pcm16(payload: &[u8], sample_rate: u32, channels: u16) -> Result<DecodedAudio, DecodeError> {
    if sample_rate == 0 || channels == 0 {
        return Err(DecodeError::InvalidFormat(format!(
            "{sample_rate} Hz, {channels} channels"
        )));
    }
    if payload.is_empty() {
        return Err(DecodeError::Empty);
    }
    let frame_bytes = 2 * channels as usize;
    if payload.len() % frame_bytes != 0 {
        return Err(DecodeError::Misaligned {
            len: payload.len(),
            frame_bytes,
        });
    }

    let samples: Vec<f32> = payload
        .chunks_exact(2)
        .map(|b| i16::from_le_bytes([b[0], b[1]]) as f32 / 32768.0)
        .collect();

    Ok(DecodedAudio::new(samples, sample_rate, channels as usize))
}

/// Decode an in-memory container payload with Symphonia.
pub fn decode_container(payload: Vec<u8>, extension: Option<&str>) -> Result<DecodedAudio, DecodeError> {
    if payload.is_empty() {
        return Err(DecodeError::Empty);
    }

    let mut hint = Hint::new();
    if let Some(ext) = extension {
        hint.with_extension(ext);
    }

    let mss = MediaSourceStream::new(Box::new(Cursor::new(payload)), Default::default());
    let probed = symphonia::default::get_probe()
        .format(&hint, mss, &FormatOptions::default(), &MetadataOptions::default())
        .map_err(|e| DecodeError::Container(e.to_string()))?;
    let mut format = probed.format;

    let track = format
        .default_track()
        .ok_or_else(|| DecodeError::Container("no default audio track".to_string()))?;
    let track_id = track.id;
    let codec_params: CodecParameters = track.codec_params.clone();
    tracing::debug!(
        codec = codec_name_from_params(&codec_params).unwrap_or("unknown"),
        rate_hz = ?codec_params.sample_rate,
        "decoding container payload"
    );

    let mut decoder = symphonia::default::get_codecs()
        .make(&codec_params, &DecoderOptions::default())
        .map_err(|e| DecodeError::Container(e.to_string()))?;

    let mut samples = Vec::new();
    let mut rate = codec_params.sample_rate;
    let mut channels = codec_params.channels.map(|c| c.count());

    loop {
        let packet = match format.next_packet() {
            Ok(p) => p,
            Err(_) => break, // EOF
        };
        if packet.track_id() != track_id {
            continue;
        }

        let decoded = match decoder.decode(&packet) {
            Ok(d) => d,
            Err(_) => continue,
        };

        let spec = *decoded.spec();
        rate.get_or_insert(spec.rate);
        channels.get_or_insert(spec.channels.count());

        let mut sample_buf = SampleBuffer::<f32>::new(decoded.frames() as u64, spec);
        sample_buf.copy_interleaved_ref(decoded);
        samples.extend_from_slice(sample_buf.samples());
    }

    let rate = rate.ok_or_else(|| DecodeError::Container("unknown sample rate".to_string()))?;
    let channels = channels.ok_or_else(|| DecodeError::Container("unknown channels".to_string()))?;
    if samples.is_empty() {
        return Err(DecodeError::Empty);
    }
    if rate == 0 || channels == 0 {
        return Err(DecodeError::InvalidFormat(format!("{rate} Hz, {channels} channels")));
    }

    Ok(DecodedAudio::new(samples, rate, channels))
}

/// Best-effort codec label for logs.
fn codec_name_from_params(params: &CodecParameters) -> Option<&'static str> {
    use symphonia::core::codecs::*;
    let name = match params.codec {
        CODEC_TYPE_FLAC => "FLAC",
        CODEC_TYPE_MP3 => "MP3",
        CODEC_TYPE_AAC => "AAC",
        CODEC_TYPE_VORBIS => "VORBIS",
        CODEC_TYPE_OPUS => "OPUS",
        CODEC_TYPE_PCM_S16LE | CODEC_TYPE_PCM_S16BE => "PCM_S16",
        CODEC_TYPE_PCM_S24LE | CODEC_TYPE_PCM_S24BE => "PCM_S24",
        CODEC_TYPE_PCM_F32LE | CODEC_TYPE_PCM_F32BE => "PCM_F32",
        _ => return None,
    };
    Some(name)
}

#[cfg(test)]
pub(crate) fn pcm16_bytes(samples: &[i16]) -> Vec<u8> {
    samples.iter().flat_map(|s| s.to_le_bytes()).collect()
}
