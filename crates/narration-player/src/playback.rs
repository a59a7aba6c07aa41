//! Playback stage (CPAL output stream).
//!
//! Builds the CPAL output stream and provides the real-time audio callback.
//! The callback:
//! - advances a sample clock shared with the scheduler
//! - renders the single active voice once its start frame is reached
//! - applies the playback rate with linear interpolation
//! - applies basic channel mapping (mono↔stereo, best-effort otherwise)
//! - converts `f32` samples to the device sample format

use std::sync::{Arc, Mutex};

use anyhow::{Result, anyhow};
use cpal::traits::DeviceTrait;
use tokio::sync::oneshot;

/// Output-side state shared between the CPAL callback and [`crate::output::CpalOutput`].
///
/// A voice reports its end up to two callback periods early so the scheduler
/// can queue the following chunk as `next`; `next` starts on the first frame
/// after the current voice runs out.
#[derive(Debug)]
pub struct Mixer {
    /// Device sample rate.
    pub out_rate: u32,
    /// Output frames rendered since the stream started. This is the output clock.
    pub frames_played: u64,
    /// The voice currently sounding or waiting for its start frame.
    pub voice: Option<Voice>,
    /// Voice queued behind a voice that already reported its end.
    pub next: Option<Voice>,
    /// Frames in the most recent callback.
    pub period_frames: u64,
}

/// A scheduled buffer inside the mixer.
#[derive(Debug)]
pub struct Voice {
    pub id: u64,
    pub samples: Arc<[f32]>,
    pub channels: usize,
    /// Source sample rate.
    pub src_rate: u32,
    /// Output frame at which the voice starts sounding.
    pub start_frame: u64,
    /// Read position in source frames.
    pub position: f64,
    /// Source frames advanced per output frame.
    pub step: f64,
    /// Taken when the end is reported.
    pub ended: Option<oneshot::Sender<()>>,
}

impl Voice {
    /// Source frames consumed per output frame for `rate` at `out_rate`.
    pub fn step_for(rate: f64, src_rate: u32, out_rate: u32) -> f64 {
        if out_rate == 0 {
            return 0.0;
        }
        rate * src_rate as f64 / out_rate as f64
    }

    fn frames(&self) -> usize {
        if self.channels == 0 {
            0
        } else {
            self.samples.len() / self.channels
        }
    }

    fn is_exhausted(&self) -> bool {
        self.position >= self.frames() as f64
    }

    /// The end has been reported but the tail may still be sounding.
    fn is_draining(&self) -> bool {
        self.ended.is_none()
    }

    fn notify_if_ending(&mut self, within_frames: u64) {
        if self.ended.is_none() || self.step <= 0.0 {
            return;
        }
        let remaining = ((self.frames() as f64 - self.position).max(0.0) / self.step).ceil();
        if remaining <= within_frames as f64 {
            if let Some(ended) = self.ended.take() {
                let _ = ended.send(());
            }
        }
    }

    /// Interpolated sample for source channel `ch` at the current position.
    fn sample(&self, ch: usize) -> f32 {
        let frames = self.frames();
        let ch = ch.min(self.channels.saturating_sub(1));
        let base = self.position.floor();
        let i = base as usize;
        if i >= frames {
            return 0.0;
        }
        let frac = (self.position - base) as f32;
        let a = self.samples[i * self.channels + ch];
        let b = if i + 1 < frames {
            self.samples[(i + 1) * self.channels + ch]
        } else {
            a
        };
        a + (b - a) * frac
    }

    /// Output sample for `dst_ch` after channel mapping.
    ///
    /// Mapping rules:
    /// - mono → stereo: duplicate channel 0
    /// - stereo → mono: average L/R
    /// - stereo → stereo: pass-through
    /// - other layouts: best-effort "clamp to available channels"
    fn mapped_sample(&self, dst_channels: usize, dst_ch: usize) -> f32 {
        match (self.channels, dst_channels) {
            (1, 1) | (1, 2) => self.sample(0),
            (2, 2) => self.sample(dst_ch.min(1)),
            (2, 1) => 0.5 * (self.sample(0) + self.sample(1)),
            _ => self.sample(dst_ch),
        }
    }
}

impl Mixer {
    pub fn new(out_rate: u32) -> Self {
        Self {
            out_rate,
            frames_played: 0,
            voice: None,
            next: None,
            period_frames: 0,
        }
    }

    /// Output clock in seconds.
    pub fn now(&self) -> f64 {
        if self.out_rate == 0 {
            return 0.0;
        }
        self.frames_played as f64 / self.out_rate as f64
    }

    /// Add `voice`, never starting before the current clock.
    ///
    /// Queued behind a draining voice, otherwise replaces whatever is scheduled.
    pub fn schedule(&mut self, mut voice: Voice) {
        voice.start_frame = voice.start_frame.max(self.frames_played);
        if self.voice.as_ref().is_some_and(Voice::is_draining) {
            self.next = Some(voice);
        } else {
            self.voice = Some(voice);
            self.next = None;
        }
    }

    /// Silence voice `id`. Stopping a queued voice also cuts the tail in front of it.
    pub fn stop(&mut self, id: u64) {
        if self.next.as_ref().is_some_and(|v| v.id == id) {
            self.next = None;
            if self.voice.as_ref().is_some_and(Voice::is_draining) {
                self.voice = None;
            }
        } else if self.voice.as_ref().is_some_and(|v| v.id == id) {
            self.voice = None;
        }
    }

    pub fn set_rate(&mut self, id: u64, rate: f64) {
        let out_rate = self.out_rate;
        for voice in [self.voice.as_mut(), self.next.as_mut()].into_iter().flatten() {
            if voice.id == id {
                voice.step = Voice::step_for(rate, voice.src_rate, out_rate);
            }
        }
    }

    /// Fill `data` (interleaved, `channels_out` wide) and advance the clock.
    pub fn render<T>(&mut self, data: &mut [T], channels_out: usize)
    where
        T: cpal::Sample + cpal::FromSample<f32>,
    {
        let channels_out = channels_out.max(1);
        let silence = <T as cpal::Sample>::from_sample::<f32>(0.0);
        self.period_frames = (data.len() / channels_out) as u64;
        let notify_within = self.period_frames.saturating_mul(2);

        for frame in data.chunks_mut(channels_out) {
            let clock = self.frames_played;
            self.frames_played += 1;
            self.retire_finished();

            let Some(voice) = self.voice.as_mut().filter(|v| clock >= v.start_frame) else {
                frame.fill(silence);
                continue;
            };
            for (ch, out) in frame.iter_mut().enumerate() {
                *out = <T as cpal::Sample>::from_sample::<f32>(voice.mapped_sample(channels_out, ch));
            }
            voice.position += voice.step;
            voice.notify_if_ending(notify_within);
        }
        self.retire_finished();
    }

    /// Drop an exhausted voice and promote the queued one.
    fn retire_finished(&mut self) {
        if self.voice.as_ref().is_some_and(Voice::is_exhausted) {
            if let Some(mut voice) = self.voice.take() {
                if let Some(ended) = voice.ended.take() {
                    let _ = ended.send(());
                }
            }
        }
        if self.voice.is_none() {
            self.voice = self.next.take();
        }
    }
}

/// Build a CPAL output stream rendering from `mixer`.
pub fn build_output_stream(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    sample_format: cpal::SampleFormat,
    mixer: Arc<Mutex<Mixer>>,
) -> Result<cpal::Stream> {
    match sample_format {
        cpal::SampleFormat::F32 => build_stream::<f32>(device, config, mixer),
        cpal::SampleFormat::I16 => build_stream::<i16>(device, config, mixer),
        cpal::SampleFormat::I32 => build_stream::<i32>(device, config, mixer),
        cpal::SampleFormat::U16 => build_stream::<u16>(device, config, mixer),
        other => Err(anyhow!("Unsupported sample format: {other:?}")),
    }
}

/// Type-specialized stream builder for CPAL sample formats.
fn build_stream<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    mixer: Arc<Mutex<Mixer>>,
) -> Result<cpal::Stream>
where
    T: cpal::Sample + cpal::SizedSample + cpal::FromSample<f32>,
{
    let channels_out = config.channels as usize;
    let err_fn = |err| tracing::warn!("stream error: {err}");

    let stream = device.build_output_stream(
        config,
        move |data: &mut [T], _| match mixer.lock() {
            Ok(mut m) => m.render(data, channels_out),
            Err(_) => data.fill(<T as cpal::Sample>::from_sample::<f32>(0.0)),
        },
        err_fn,
        None,
    )?;

    Ok(stream)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn voice(samples: Vec<f32>, channels: usize, start_frame: u64, step: f64) -> (Voice, oneshot::Receiver<()>) {
        voice_with_id(1, samples, channels, start_frame, step)
    }

    fn voice_with_id(
        id: u64,
        samples: Vec<f32>,
        channels: usize,
        start_frame: u64,
        step: f64,
    ) -> (Voice, oneshot::Receiver<()>) {
        let (tx, rx) = oneshot::channel();
        (
            Voice {
                id,
                samples: samples.into(),
                channels,
                src_rate: 10,
                start_frame,
                position: 0.0,
                step,
                ended: Some(tx),
            },
            rx,
        )
    }

    #[test]
    fn silent_until_start_frame() {
        let mut mixer = Mixer::new(10);
        let (v, _rx) = voice(vec![0.5; 4], 1, 2, 1.0);
        mixer.voice = Some(v);
        let mut out = vec![0.0f32; 4];
        mixer.render(&mut out, 1);
        assert_eq!(out, vec![0.0, 0.0, 0.5, 0.5]);
        assert_eq!(mixer.frames_played, 4);
    }

    #[test]
    fn exhausted_voice_is_retired() {
        let mut mixer = Mixer::new(10);
        let (v, mut rx) = voice(vec![0.1, 0.2, 0.3], 1, 0, 1.0);
        mixer.voice = Some(v);
        let mut out = vec![0.0f32; 5];
        mixer.render(&mut out, 1);
        assert_eq!(out[..3], [0.1, 0.2, 0.3]);
        assert_eq!(out[3..], [0.0, 0.0]);
        assert!(mixer.voice.is_none());
        assert!(rx.try_recv().is_ok());
    }

    #[test]
    fn end_is_reported_two_periods_early() {
        let mut mixer = Mixer::new(10);
        let (v, mut rx) = voice(vec![0.5; 10], 1, 0, 1.0);
        mixer.voice = Some(v);
        let mut out = vec![0.0f32; 2];

        mixer.render(&mut out, 1);
        mixer.render(&mut out, 1);
        assert!(rx.try_recv().is_err());

        // Four frames left after this callback.
        mixer.render(&mut out, 1);
        assert!(rx.try_recv().is_ok());
        assert!(mixer.voice.is_some());
        assert_eq!(out, vec![0.5, 0.5]);
    }

    #[test]
    fn queued_voice_follows_without_a_gap() {
        let mut mixer = Mixer::new(10);
        let (first, mut first_rx) = voice_with_id(1, vec![0.1; 6], 1, 0, 1.0);
        mixer.schedule(first);

        let mut out = vec![0.0f32; 4];
        mixer.render(&mut out, 1);
        assert_eq!(out, vec![0.1; 4]);
        assert!(first_rx.try_recv().is_ok());

        // Queued at the frame after the first voice's last one.
        let (second, _second_rx) = voice_with_id(2, vec![0.9; 3], 1, 6, 1.0);
        mixer.schedule(second);
        assert_eq!(mixer.voice.as_ref().map(|v| v.id), Some(1));

        let mut out = vec![0.0f32; 8];
        mixer.render(&mut out, 1);
        assert_eq!(out, vec![0.1, 0.1, 0.9, 0.9, 0.9, 0.0, 0.0, 0.0]);
    }

    #[test]
    fn late_queued_voice_starts_right_after_the_tail() {
        let mut mixer = Mixer::new(10);
        let (first, _first_rx) = voice_with_id(1, vec![0.1; 3], 1, 0, 1.0);
        mixer.schedule(first);
        let mut out = vec![0.0f32; 2];
        mixer.render(&mut out, 1);

        // Cursor said frame 1; the tail still owns frame 2.
        let (second, _second_rx) = voice_with_id(2, vec![0.9; 2], 1, 1, 1.0);
        mixer.schedule(second);
        let mut out = vec![0.0f32; 4];
        mixer.render(&mut out, 1);
        assert_eq!(out, vec![0.1, 0.9, 0.9, 0.0]);
    }

    #[test]
    fn scheduling_replaces_a_voice_still_playing() {
        let mut mixer = Mixer::new(10);
        let (first, mut first_rx) = voice_with_id(1, vec![0.1; 100], 1, 0, 1.0);
        mixer.schedule(first);
        let mut out = vec![0.0f32; 4];
        mixer.render(&mut out, 1);

        let (second, _second_rx) = voice_with_id(2, vec![0.9; 100], 1, 0, 1.0);
        mixer.schedule(second);
        assert_eq!(mixer.voice.as_ref().map(|v| v.start_frame), Some(4));
        assert!(mixer.next.is_none());
        assert!(first_rx.try_recv().is_err());
        mixer.render(&mut out, 1);
        assert_eq!(out, vec![0.9; 4]);
    }

    #[test]
    fn stopping_queued_voice_cuts_the_tail() {
        let mut mixer = Mixer::new(10);
        let (first, _first_rx) = voice_with_id(1, vec![0.1; 6], 1, 0, 1.0);
        mixer.schedule(first);
        let mut out = vec![0.0f32; 4];
        mixer.render(&mut out, 1);
        let (second, _second_rx) = voice_with_id(2, vec![0.9; 3], 1, 6, 1.0);
        mixer.schedule(second);

        mixer.stop(2);
        assert!(mixer.voice.is_none());
        assert!(mixer.next.is_none());
        mixer.render(&mut out, 1);
        assert_eq!(out, vec![0.0; 4]);
    }

    #[test]
    fn rate_change_reaches_queued_voice() {
        let mut mixer = Mixer::new(10);
        let (first, _first_rx) = voice_with_id(1, vec![0.1; 3], 1, 0, 1.0);
        mixer.schedule(first);
        let mut out = vec![0.0f32; 2];
        mixer.render(&mut out, 1);
        let (second, _second_rx) = voice_with_id(2, vec![0.9; 4], 1, 3, 1.0);
        mixer.schedule(second);

        mixer.set_rate(2, 2.0);
        assert_eq!(mixer.next.as_ref().map(|v| v.step), Some(2.0));
        assert_eq!(mixer.voice.as_ref().map(|v| v.step), Some(1.0));
    }

    #[test]
    fn double_rate_skips_frames() {
        let mut mixer = Mixer::new(10);
        let (v, _rx) = voice(vec![0.0, 0.1, 0.2, 0.3], 1, 0, 2.0);
        mixer.voice = Some(v);
        let mut out = vec![0.0f32; 2];
        mixer.render(&mut out, 1);
        assert_eq!(out, vec![0.0, 0.2]);
        assert!(mixer.voice.is_none());
    }

    #[test]
    fn half_rate_interpolates() {
        let mut mixer = Mixer::new(10);
        let (v, _rx) = voice(vec![0.0, 1.0], 1, 0, 0.5);
        mixer.voice = Some(v);
        let mut out = vec![0.0f32; 3];
        mixer.render(&mut out, 1);
        assert_eq!(out, vec![0.0, 0.5, 1.0]);
    }

    #[test]
    fn mono_is_duplicated_to_stereo() {
        let mut mixer = Mixer::new(10);
        let (v, _rx) = voice(vec![0.25, 0.75], 1, 0, 1.0);
        mixer.voice = Some(v);
        let mut out = vec![0.0f32; 4];
        mixer.render(&mut out, 2);
        assert_eq!(out, vec![0.25, 0.25, 0.75, 0.75]);
    }

    #[test]
    fn stereo_is_averaged_to_mono() {
        let mut mixer = Mixer::new(10);
        let (v, _rx) = voice(vec![0.2, 0.4], 2, 0, 1.0);
        mixer.voice = Some(v);
        let mut out = vec![0.0f32; 1];
        mixer.render(&mut out, 1);
        assert!((out[0] - 0.3).abs() < 1e-6);
    }

    #[test]
    fn clock_advances_without_voice() {
        let mut mixer = Mixer::new(4);
        let mut out = vec![0i16; 8];
        mixer.render(&mut out, 2);
        assert_eq!(mixer.frames_played, 4);
        assert!((mixer.now() - 1.0).abs() < 1e-9);
    }

    #[test]
    fn step_accounts_for_rate_conversion() {
        assert!((Voice::step_for(1.0, 24_000, 48_000) - 0.5).abs() < 1e-12);
        assert!((Voice::step_for(2.0, 48_000, 48_000) - 2.0).abs() < 1e-12);
    }
}
