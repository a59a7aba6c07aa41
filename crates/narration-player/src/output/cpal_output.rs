//! Device-backed [`AudioOutput`].
//!
//! CPAL streams are not `Send`, so the stream lives on a dedicated thread for
//! the lifetime of the output. The scheduler talks to the callback through the
//! shared [`Mixer`].

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread;

use anyhow::{Context, Result, anyhow};
use cpal::traits::{DeviceTrait, StreamTrait};
use crossbeam_channel::{Sender, bounded};
use tokio::sync::oneshot;

use super::{AudioOutput, ScheduleRequest, ScheduledSource, SourceControl};
use crate::decode::DEFAULT_PCM_SAMPLE_RATE;
use crate::device;
use crate::playback::{Mixer, Voice, build_output_stream};

/// Negotiated stream parameters reported by the stream thread.
#[derive(Clone, Debug)]
pub struct OutputInfo {
    pub device: String,
    pub sample_rate: u32,
    pub channels: u16,
    pub sample_format: String,
}

pub struct CpalOutput {
    mixer: Arc<Mutex<Mixer>>,
    info: OutputInfo,
    next_id: AtomicU64,
    shutdown: Sender<()>,
}

impl CpalOutput {
    /// Open the output device matching `device_name` (or the default device) and start the stream.
    pub fn open(device_name: Option<&str>) -> Result<Self> {
        let device_name = device_name.map(str::to_string);
        let mixer = Arc::new(Mutex::new(Mixer::new(DEFAULT_PCM_SAMPLE_RATE)));
        let (ready_tx, ready_rx) = bounded::<Result<OutputInfo>>(1);
        let (shutdown_tx, shutdown_rx) = bounded::<()>(1);

        let mixer_thread = mixer.clone();
        thread::Builder::new()
            .name("narration-output".to_string())
            .spawn(move || {
                let stream = match start_stream(device_name.as_deref(), &mixer_thread) {
                    Ok((stream, info)) => {
                        let _ = ready_tx.send(Ok(info));
                        stream
                    }
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };
                // Blocks until the output is dropped.
                let _ = shutdown_rx.recv();
                drop(stream);
            })
            .context("spawn output thread")?;

        let info = ready_rx
            .recv()
            .map_err(|_| anyhow!("output thread exited during setup"))??;
        tracing::info!(
            device = %info.device,
            rate_hz = info.sample_rate,
            channels = info.channels,
            sample_format = %info.sample_format,
            "audio output ready"
        );

        Ok(Self {
            mixer,
            info,
            next_id: AtomicU64::new(1),
            shutdown: shutdown_tx,
        })
    }

    pub fn info(&self) -> &OutputInfo {
        &self.info
    }

    fn lock(&self) -> MutexGuard<'_, Mixer> {
        lock_mixer(&self.mixer)
    }
}

impl Drop for CpalOutput {
    fn drop(&mut self) {
        let _ = self.shutdown.try_send(());
    }
}

impl AudioOutput for CpalOutput {
    fn now(&self) -> f64 {
        self.lock().now()
    }

    fn sample_rate(&self) -> Option<u32> {
        Some(self.info.sample_rate)
    }

    fn schedule(&self, request: ScheduleRequest) -> Result<ScheduledSource> {
        let ScheduleRequest {
            index,
            audio,
            start_at,
            offset,
            rate,
        } = request;
        if audio.channels == 0 || audio.sample_rate == 0 {
            return Err(anyhow!("chunk {index} has no playable audio"));
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (ended_tx, ended_rx) = oneshot::channel();
        let mut mixer = self.lock();
        let out_rate = mixer.out_rate;
        let start_frame = (start_at * out_rate as f64).round().max(0.0) as u64;
        mixer.schedule(Voice {
            id,
            step: Voice::step_for(rate, audio.sample_rate, out_rate),
            samples: audio.samples,
            channels: audio.channels,
            src_rate: audio.sample_rate,
            start_frame,
            position: offset.max(0.0) * audio.sample_rate as f64,
            ended: Some(ended_tx),
        });
        drop(mixer);

        tracing::debug!(index, start_frame, "voice scheduled");
        Ok(ScheduledSource {
            control: Arc::new(CpalSourceControl {
                mixer: self.mixer.clone(),
                id,
            }),
            ended: ended_rx,
        })
    }
}

struct CpalSourceControl {
    mixer: Arc<Mutex<Mixer>>,
    id: u64,
}

impl SourceControl for CpalSourceControl {
    fn set_rate(&self, rate: f64) {
        lock_mixer(&self.mixer).set_rate(self.id, rate);
    }

    fn stop(&self) {
        lock_mixer(&self.mixer).stop(self.id);
    }
}

fn lock_mixer(mixer: &Mutex<Mixer>) -> MutexGuard<'_, Mixer> {
    mixer.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn start_stream(device_name: Option<&str>, mixer: &Arc<Mutex<Mixer>>) -> Result<(cpal::Stream, OutputInfo)> {
    let host = cpal::default_host();
    let device = device::pick_device(&host, device_name)?;
    let config = device::pick_output_config(&device, Some(DEFAULT_PCM_SAMPLE_RATE))?;
    let mut stream_config: cpal::StreamConfig = config.clone().into();
    if let Some(buf) = device::pick_buffer_size(&config) {
        stream_config.buffer_size = buf;
    }

    lock_mixer(mixer).out_rate = stream_config.sample_rate;
    let stream = build_output_stream(&device, &stream_config, config.sample_format(), mixer.clone())?;
    stream.play().context("start output stream")?;

    let info = OutputInfo {
        device: device
            .description()
            .map(|d| d.to_string())
            .unwrap_or_else(|_| "unknown".to_string()),
        sample_rate: stream_config.sample_rate,
        channels: stream_config.channels,
        sample_format: format!("{:?}", config.sample_format()),
    };
    Ok((stream, info))
}
