//! Wall-clock [`AudioOutput`] that produces no sound.
//!
//! Each source is a Tokio task that sleeps until the source would have ended,
//! following rate changes and stops. Useful for dry runs and machines without
//! an audio device.

use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use tokio::runtime::Handle;
use tokio::sync::{oneshot, watch};
use tokio::time::{Duration, Instant};

use super::{AudioOutput, ScheduleRequest, ScheduledSource, SourceControl};
use crate::playhead::Playhead;

#[derive(Clone, Copy, Debug, PartialEq)]
enum SourceCommand {
    Play { rate: f64 },
    Stop,
}

pub struct SilentOutput {
    origin: Instant,
    handle: Handle,
    current: Mutex<Option<Arc<SilentSource>>>,
}

impl SilentOutput {
    /// Create an output bound to the current Tokio runtime.
    pub fn new() -> Result<Self> {
        let handle = Handle::try_current().context("silent output needs a Tokio runtime")?;
        Ok(Self {
            origin: Instant::now(),
            handle,
            current: Mutex::new(None),
        })
    }

    fn clock(origin: Instant) -> f64 {
        origin.elapsed().as_secs_f64()
    }
}

impl AudioOutput for SilentOutput {
    fn now(&self) -> f64 {
        Self::clock(self.origin)
    }

    fn schedule(&self, request: ScheduleRequest) -> Result<ScheduledSource> {
        let duration = request.audio.duration_seconds();
        let mut playhead = Playhead::new(request.start_at, request.offset, request.rate, duration);
        let (command_tx, mut command_rx) = watch::channel(SourceCommand::Play { rate: request.rate });
        let (ended_tx, ended_rx) = oneshot::channel();
        let origin = self.origin;
        let index = request.index;

        self.handle.spawn(async move {
            loop {
                let end_at = origin + Duration::from_secs_f64(playhead.end_time().max(0.0));
                tokio::select! {
                    _ = tokio::time::sleep_until(end_at) => {
                        tracing::trace!(index, "silent source ended");
                        let _ = ended_tx.send(());
                        return;
                    }
                    changed = command_rx.changed() => {
                        if changed.is_err() {
                            return;
                        }
                        let command = *command_rx.borrow_and_update();
                        match command {
                            SourceCommand::Play { rate } => {
                                playhead.set_rate(SilentOutput::clock(origin), rate);
                            }
                            SourceCommand::Stop => return,
                        }
                    }
                }
            }
        });

        let source = Arc::new(SilentSource { commands: command_tx });
        let previous = self
            .current
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .replace(source.clone());
        if let Some(previous) = previous {
            previous.stop();
        }

        Ok(ScheduledSource {
            control: source,
            ended: ended_rx,
        })
    }
}

struct SilentSource {
    commands: watch::Sender<SourceCommand>,
}

impl SourceControl for SilentSource {
    fn set_rate(&self, rate: f64) {
        let _ = self.commands.send(SourceCommand::Play { rate });
    }

    fn stop(&self) {
        let _ = self.commands.send(SourceCommand::Stop);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decode::DecodedAudio;

    fn request(duration_ms: usize, rate: f64, start_at: f64) -> ScheduleRequest {
        ScheduleRequest {
            index: 0,
            audio: DecodedAudio::new(vec![0.0; duration_ms], 1000, 1),
            start_at,
            offset: 0.0,
            rate,
        }
    }

    #[tokio::test]
    async fn source_ends_after_duration() {
        let output = SilentOutput::new().unwrap();
        let start = Instant::now();
        let source = output.schedule(request(30, 1.0, output.now())).unwrap();
        source.ended.await.unwrap();
        assert!(start.elapsed() >= Duration::from_millis(25));
    }

    #[tokio::test]
    async fn stopped_source_never_ends() {
        let output = SilentOutput::new().unwrap();
        let source = output.schedule(request(20, 1.0, output.now())).unwrap();
        source.control.stop();
        assert!(source.ended.await.is_err());
    }

    #[tokio::test]
    async fn scheduling_replaces_previous_source() {
        let output = SilentOutput::new().unwrap();
        let first = output.schedule(request(500, 1.0, output.now())).unwrap();
        let second = output.schedule(request(10, 1.0, output.now())).unwrap();
        assert!(first.ended.await.is_err());
        assert!(second.ended.await.is_ok());
    }

    #[tokio::test]
    async fn rate_change_shortens_remaining_time() {
        let output = SilentOutput::new().unwrap();
        let start = Instant::now();
        let source = output.schedule(request(400, 1.0, output.now())).unwrap();
        source.control.set_rate(4.0);
        source.ended.await.unwrap();
        assert!(start.elapsed() < Duration::from_millis(300));
    }
}
