//! In-memory collaborators for engine tests.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{oneshot, watch};

use crate::decode::{PayloadFormat, pcm16_bytes};
use crate::error::SynthesisError;
use crate::output::{AudioOutput, ScheduleRequest, ScheduledSource, SourceControl};
use crate::playhead::Playhead;
use crate::provider::Synthesizer;

/// Sample rate of scripted payloads. One second of audio is 1000 frames.
pub const SCRIPTED_RATE: u32 = 1000;

/// Constant sample value a scripted synthesizer emits for `voice`, as `f32`.
pub fn voice_level(voice: &str) -> f32 {
    raw_level(voice) as f32 / 32768.0
}

fn raw_level(voice: &str) -> i16 {
    let sum: u32 = voice.bytes().map(u32::from).sum();
    (sum % 20_000 + 100) as i16
}

/// Poll `cond` until it holds, failing the test after two seconds.
pub async fn wait_for(cond: impl Fn() -> bool) {
    for _ in 0..2000 {
        if cond() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
    panic!("condition not reached");
}

/// Give spawned tasks a chance to run.
pub async fn settle() {
    for _ in 0..20 {
        tokio::task::yield_now().await;
    }
}

/// Synthesizer returning one second of constant PCM per chunk.
#[derive(Default)]
pub struct ScriptedSynthesizer {
    calls: Mutex<Vec<(String, String)>>,
    fail: Mutex<HashSet<String>>,
    fail_once: Mutex<HashSet<String>>,
    frames: Mutex<HashMap<String, usize>>,
    gate: Mutex<Option<watch::Receiver<bool>>>,
    completed: AtomicUsize,
    failures: AtomicUsize,
}

/// Holds scripted synthesis requests until released or dropped.
pub struct Gate {
    tx: watch::Sender<bool>,
}

impl Gate {
    pub fn release(&self) {
        let _ = self.tx.send(false);
    }
}

impl ScriptedSynthesizer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Block every synthesis call until the returned gate is released.
    pub fn hold(&self) -> Gate {
        let (tx, rx) = watch::channel(true);
        *self.gate.lock().unwrap() = Some(rx);
        Gate { tx }
    }

    pub fn fail_text(&self, text: &str) {
        self.fail.lock().unwrap().insert(text.to_string());
    }

    pub fn fail_text_once(&self, text: &str) {
        self.fail_once.lock().unwrap().insert(text.to_string());
    }

    pub fn clear_failures(&self) {
        self.fail.lock().unwrap().clear();
        self.fail_once.lock().unwrap().clear();
    }

    /// Make the payload for `text` `frames` long instead of one second.
    pub fn set_frames(&self, text: &str, frames: usize) {
        self.frames.lock().unwrap().insert(text.to_string(), frames);
    }

    pub fn calls(&self) -> Vec<(String, String)> {
        self.calls.lock().unwrap().clone()
    }

    /// Number of calls that returned, successfully or not.
    pub fn completed(&self) -> usize {
        self.completed.load(Ordering::SeqCst)
    }

    pub fn failures(&self) -> usize {
        self.failures.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Synthesizer for ScriptedSynthesizer {
    async fn synthesize(&self, text: &str, voice: &str) -> Result<Vec<u8>, SynthesisError> {
        self.calls
            .lock()
            .unwrap()
            .push((text.to_string(), voice.to_string()));

        let gate = self.gate.lock().unwrap().clone();
        if let Some(mut gate) = gate {
            while *gate.borrow_and_update() {
                if gate.changed().await.is_err() {
                    break;
                }
            }
        }

        let failed = self.fail.lock().unwrap().contains(text) || self.fail_once.lock().unwrap().remove(text);
        self.completed.fetch_add(1, Ordering::SeqCst);
        if failed {
            self.failures.fetch_add(1, Ordering::SeqCst);
            return Err(SynthesisError::new(voice, format!("scripted failure for {text:?}")));
        }

        let frames = self
            .frames
            .lock()
            .unwrap()
            .get(text)
            .copied()
            .unwrap_or(SCRIPTED_RATE as usize);
        Ok(pcm16_bytes(&vec![raw_level(voice); frames]))
    }

    fn payload_format(&self) -> PayloadFormat {
        PayloadFormat::Pcm16 {
            sample_rate: SCRIPTED_RATE,
            channels: 1,
        }
    }
}

/// What the engine asked a [`ManualOutput`] to play.
#[derive(Clone, Debug)]
pub struct ScheduledRecord {
    pub index: usize,
    pub start_at: f64,
    pub offset: f64,
    pub rate: f64,
    pub end_time: f64,
    pub first_sample: f32,
    pub stopped: bool,
    pub ended: bool,
}

struct ManualSource {
    record: ScheduledRecord,
    playhead: Playhead,
    ended: Option<oneshot::Sender<()>>,
}

#[derive(Default)]
struct ManualState {
    now: f64,
    /// Seconds before its end time at which a source reports the end.
    early: f64,
    sources: Vec<ManualSource>,
}

/// Output driven by a manual clock. Sources end when the clock passes their end time.
#[derive(Default)]
pub struct ManualOutput {
    state: Arc<Mutex<ManualState>>,
}

impl ManualOutput {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn scheduled(&self) -> Vec<ScheduledRecord> {
        self.state
            .lock()
            .unwrap()
            .sources
            .iter()
            .map(|s| s.record.clone())
            .collect()
    }

    pub fn record(&self, n: usize) -> ScheduledRecord {
        self.scheduled()[n].clone()
    }

    /// Report source ends `lead` seconds early, as a device output does.
    pub fn end_early(&self, lead: f64) {
        self.state.lock().unwrap().early = lead;
    }

    /// Move the clock to `t` and fire end notifications for sources that finished.
    pub fn advance_to(&self, t: f64) {
        let mut state = self.state.lock().unwrap();
        state.now = t;
        fire_ended(&mut state);
    }
}

fn fire_ended(state: &mut ManualState) {
    let now = state.now;
    let early = state.early;
    for source in state.sources.iter_mut() {
        if source.record.stopped || source.record.ended {
            continue;
        }
        if source.playhead.end_time() - early <= now + 1e-9 {
            source.record.ended = true;
            if let Some(ended) = source.ended.take() {
                let _ = ended.send(());
            }
        }
    }
}

impl AudioOutput for ManualOutput {
    fn now(&self) -> f64 {
        self.state.lock().unwrap().now
    }

    fn schedule(&self, request: ScheduleRequest) -> anyhow::Result<ScheduledSource> {
        let duration = request.audio.duration_seconds();
        let playhead = Playhead::new(request.start_at, request.offset, request.rate, duration);
        let (tx, rx) = oneshot::channel();
        let mut state = self.state.lock().unwrap();
        let id = state.sources.len();
        state.sources.push(ManualSource {
            record: ScheduledRecord {
                index: request.index,
                start_at: request.start_at,
                offset: request.offset,
                rate: request.rate,
                end_time: playhead.end_time(),
                first_sample: request.audio.samples.first().copied().unwrap_or(0.0),
                stopped: false,
                ended: false,
            },
            playhead,
            ended: Some(tx),
        });
        fire_ended(&mut state);

        Ok(ScheduledSource {
            control: Arc::new(ManualControl {
                state: self.state.clone(),
                id,
            }),
            ended: rx,
        })
    }
}

struct ManualControl {
    state: Arc<Mutex<ManualState>>,
    id: usize,
}

impl SourceControl for ManualControl {
    fn set_rate(&self, rate: f64) {
        let mut state = self.state.lock().unwrap();
        let now = state.now;
        let source = &mut state.sources[self.id];
        source.playhead.set_rate(now, rate);
        source.record.rate = rate;
        source.record.end_time = source.playhead.end_time();
        fire_ended(&mut state);
    }

    fn stop(&self) {
        let mut state = self.state.lock().unwrap();
        let source = &mut state.sources[self.id];
        if !source.record.ended {
            source.record.stopped = true;
        }
        source.ended = None;
    }
}
