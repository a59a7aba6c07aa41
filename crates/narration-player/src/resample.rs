//! Sample-rate conversion for decoded chunks.
//!
//! Uses Rubato to convert a whole decoded buffer to the output device rate
//! before it is cached, so scheduling never waits on conversion.

use audioadapter_buffers::direct::InterleavedSlice;
use rubato::{
    Async, FixedAsync, Indexing, Resampler, SincInterpolationParameters, SincInterpolationType,
    WindowFunction, calculate_cutoff,
};

use crate::decode::DecodedAudio;
use crate::error::DecodeError;

/// Convert `audio` to `dst_rate`, keeping its duration.
///
/// Returns the input unchanged when the rates already match. The resampler's
/// output delay is trimmed so the first output frame lines up with the first
/// input frame.
pub fn resample_to(
    audio: &DecodedAudio,
    dst_rate: u32,
    chunk_frames: usize,
) -> Result<DecodedAudio, DecodeError> {
    if dst_rate == 0 {
        return Err(DecodeError::InvalidFormat("target rate 0 Hz".to_string()));
    }
    if audio.sample_rate == dst_rate || audio.frames() == 0 {
        return Ok(audio.clone());
    }

    let channels = audio.channels;
    let f_ratio = dst_rate as f64 / audio.sample_rate as f64;
    let expected_frames = target_frames(audio.frames(), f_ratio);

    let sinc_len = 128;
    let window = WindowFunction::BlackmanHarris2;
    let params = SincInterpolationParameters {
        sinc_len,
        f_cutoff: calculate_cutoff(sinc_len, window),
        interpolation: SincInterpolationType::Cubic,
        oversampling_factor: 256,
        window,
    };

    let chunk_in_frames = chunk_frames.max(1);
    let mut resampler =
        Async::<f32>::new_sinc(f_ratio, 1.1, &params, chunk_in_frames, channels, FixedAsync::Input)
            .map_err(|e| DecodeError::Resample(e.to_string()))?;

    let delay = resampler.output_delay();
    let wanted = delay + expected_frames;

    let mut out_chunk = vec![0.0f32; channels * resampler.output_frames_max()];
    let mut in_chunk = vec![0.0f32; channels * chunk_in_frames];
    let mut output: Vec<f32> = Vec::with_capacity(channels * (wanted + chunk_in_frames));

    let indexing = Indexing {
        input_offset: 0,
        output_offset: 0,
        active_channels_mask: None,
        partial_len: None,
    };

    let mut consumed = 0usize;
    // Input runs out first; the remaining calls feed silence to flush the filter.
    let max_calls = audio.frames().div_ceil(chunk_in_frames) + wanted.div_ceil(chunk_in_frames) + 4;
    for _ in 0..max_calls {
        if output.len() / channels >= wanted {
            break;
        }

        in_chunk.fill(0.0);
        let available = audio.samples.len().saturating_sub(consumed);
        let take = available.min(in_chunk.len());
        in_chunk[..take].copy_from_slice(&audio.samples[consumed..consumed + take]);
        consumed += take;

        let input_adapter = InterleavedSlice::new(&in_chunk, channels, chunk_in_frames)
            .map_err(|e| DecodeError::Resample(format!("input buffer: {e}")))?;
        let out_capacity_frames = out_chunk.len() / channels;
        let mut output_adapter = InterleavedSlice::new_mut(&mut out_chunk, channels, out_capacity_frames)
            .map_err(|e| DecodeError::Resample(format!("output buffer: {e}")))?;

        let (_nbr_in, nbr_out) = resampler
            .process_into_buffer(&input_adapter, &mut output_adapter, Some(&indexing))
            .map_err(|e| DecodeError::Resample(e.to_string()))?;

        output.extend_from_slice(&out_chunk[..nbr_out * channels]);
    }

    let start = (delay * channels).min(output.len());
    let mut samples = output.split_off(start);
    samples.resize(expected_frames * channels, 0.0);

    tracing::debug!(
        from_hz = audio.sample_rate,
        to_hz = dst_rate,
        frames = expected_frames,
        "resampled chunk"
    );
    Ok(DecodedAudio::new(samples, dst_rate, channels))
}

fn target_frames(frames: usize, ratio: f64) -> usize {
    (frames as f64 * ratio).round() as usize
}
