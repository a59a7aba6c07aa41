//! Playback scheduler.
//!
//! [`Narrator`] owns the narration session: it walks the chunk sequence,
//! pulls decoded audio from the [`PrefetchCache`], and schedules each buffer on
//! the [`AudioOutput`] back to back on a single forward cursor.
//!
//! ## Fencing
//! Every operation that invalidates scheduled or in-flight work advances the
//! [`SessionFence`] while holding the session lock. The playback loop checks
//! its ticket under the same lock before every effect, so a superseded loop
//! can never touch the session.
//!
//! Lock order is session, then cache.

use std::sync::{Arc, Mutex, MutexGuard};

use narration_types::{ChunkFailure, NarrationEvent, NarrationStatus, PlaybackState};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use crate::cache::PrefetchCache;
use crate::chunker::{Chunk, split_text};
use crate::config::EngineConfig;
use crate::error::{ChunkError, ContentFetchError, ControlError, PlaybackError};
use crate::fence::{FenceTicket, SessionFence};
use crate::output::{AudioOutput, ScheduleRequest, SourceControl};
use crate::playhead::Playhead;
use crate::provider::{Synthesizer, TextSource};
use crate::status::EventBus;

/// How a playback loop ended without error.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LoopOutcome {
    /// The last chunk played to its end.
    Completed,
    /// Another operation took over the session.
    Superseded,
}

/// Handle to a running playback loop.
pub type PlaybackTask = JoinHandle<Result<LoopOutcome, PlaybackError>>;

/// Narration session handle. Clones share the same session.
#[derive(Clone)]
pub struct Narrator {
    shared: Arc<Shared>,
}

struct Shared {
    config: EngineConfig,
    fence: SessionFence,
    cache: PrefetchCache,
    output: Arc<dyn AudioOutput>,
    events: EventBus,
    session: Mutex<Session>,
}

struct Session {
    state: PlaybackState,
    current_index: Option<usize>,
    rate: f64,
    resume_offset: f64,
    /// Output clock time at which the next buffer may start.
    cursor: f64,
    active: Option<ActiveSource>,
    last_error: Option<ChunkFailure>,
}

struct ActiveSource {
    index: usize,
    control: Arc<dyn SourceControl>,
    playhead: Playhead,
}

impl Session {
    fn stop_active(&mut self) {
        if let Some(active) = self.active.take() {
            active.control.stop();
        }
    }
}

impl Narrator {
    pub fn new(config: EngineConfig, synthesizer: Arc<dyn Synthesizer>, output: Arc<dyn AudioOutput>) -> Self {
        let cache = PrefetchCache::new(
            synthesizer,
            config.voice.clone(),
            output.sample_rate(),
            config.resample_chunk_frames,
        );
        let rate = if config.initial_rate.is_finite() && config.initial_rate > 0.0 {
            config.initial_rate
        } else {
            1.0
        };
        Self {
            shared: Arc::new(Shared {
                config,
                fence: SessionFence::new(),
                cache,
                output,
                events: EventBus::new(),
                session: Mutex::new(Session {
                    state: PlaybackState::Idle,
                    current_index: None,
                    rate,
                    resume_offset: 0.0,
                    cursor: 0.0,
                    active: None,
                    last_error: None,
                }),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Session> {
        self.shared
            .session
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn config(&self) -> &EngineConfig {
        &self.shared.config
    }

    pub fn subscribe(&self) -> broadcast::Receiver<NarrationEvent> {
        self.shared.events.subscribe()
    }

    pub fn chunk_count(&self) -> usize {
        self.shared.cache.chunk_count()
    }

    pub fn chunk(&self, index: usize) -> Option<Chunk> {
        self.shared.cache.chunk(index)
    }

    pub fn state(&self) -> PlaybackState {
        self.lock().state
    }

    pub fn current_index(&self) -> Option<usize> {
        self.lock().current_index
    }

    /// Replace the text source. Stops playback and drops all cached audio.
    pub fn load_source(&self, chunks: Vec<Chunk>) -> usize {
        let count = chunks.len();
        let mut s = self.lock();
        self.shared.fence.advance();
        s.stop_active();
        s.state = PlaybackState::Idle;
        s.current_index = None;
        s.resume_offset = 0.0;
        s.last_error = None;
        self.shared.cache.reset(chunks);
        self.shared.events.source_loaded(count);
        self.shared.events.state_changed(PlaybackState::Idle, None);
        tracing::info!(chunks = count, "source loaded");
        count
    }

    /// Split `text` and load it as the new source.
    pub fn load_text(&self, text: &str) -> usize {
        self.load_source(split_text(text, self.shared.config.max_chunk_chars))
    }

    /// Resolve `input` through `source` and load the result.
    ///
    /// On failure the current session is left untouched.
    pub async fn load_from(&self, source: &dyn TextSource, input: &str) -> Result<usize, ContentFetchError> {
        let text = source.resolve(input).await?;
        let chunks = split_text(&text, self.shared.config.max_chunk_chars);
        if chunks.is_empty() {
            return Err(ContentFetchError::NoText(input.to_string()));
        }
        Ok(self.load_source(chunks))
    }

    /// Start playing at chunk `from`, `offset` seconds into it.
    pub fn play(&self, from: usize, offset: f64) -> Result<PlaybackTask, ControlError> {
        let ticket = {
            let mut s = self.lock();
            let len = self.shared.cache.chunk_count();
            if len == 0 {
                return Err(ControlError::NoSource);
            }
            if from >= len {
                return Err(ControlError::IndexOutOfRange { index: from, len });
            }
            let ticket = self.shared.fence.advance();
            s.stop_active();
            s.state = PlaybackState::Playing;
            s.current_index = Some(from);
            s.resume_offset = 0.0;
            s.last_error = None;
            s.cursor = self.shared.output.now() + self.shared.config.schedule_lead_seconds;
            self.shared.events.state_changed(PlaybackState::Playing, Some(from));
            ticket
        };
        tracing::info!(index = from, offset, generation = ticket.generation(), "play");

        let narrator = self.clone();
        Ok(tokio::spawn(narrator.run_loop(ticket, from, offset)))
    }

    /// Suspend playback, remembering the position inside the current chunk.
    ///
    /// Returns `false` (and does nothing) unless playing.
    pub fn pause(&self) -> bool {
        let mut s = self.lock();
        if s.state != PlaybackState::Playing {
            return false;
        }
        self.shared.fence.advance();
        let now = self.shared.output.now();
        let offset = match &s.active {
            Some(active) if Some(active.index) == s.current_index => active.playhead.position_at(now),
            _ => 0.0,
        };
        s.stop_active();
        s.resume_offset = offset;
        s.state = PlaybackState::Paused;
        self.shared.events.state_changed(PlaybackState::Paused, s.current_index);
        tracing::info!(index = ?s.current_index, offset, "paused");
        true
    }

    /// Continue from the paused chunk and offset.
    pub fn resume(&self) -> Result<PlaybackTask, ControlError> {
        let (index, offset) = {
            let s = self.lock();
            match (s.state, s.current_index) {
                (PlaybackState::Paused, Some(index)) => (index, s.resume_offset),
                _ => return Err(ControlError::NotPaused),
            }
        };
        self.play(index, offset)
    }

    /// Jump to the start of chunk `target`.
    pub fn seek(&self, target: usize) -> Result<PlaybackTask, ControlError> {
        self.play(target, 0.0)
    }

    pub fn stop(&self) {
        let mut s = self.lock();
        self.shared.fence.advance();
        s.stop_active();
        s.state = PlaybackState::Idle;
        s.current_index = None;
        s.resume_offset = 0.0;
        self.shared.events.state_changed(PlaybackState::Idle, None);
    }

    /// Change the playback rate of the sounding chunk and every later one.
    pub fn set_playback_rate(&self, rate: f64) -> Result<(), ControlError> {
        if !rate.is_finite() || rate <= 0.0 {
            return Err(ControlError::InvalidRate(rate));
        }
        let mut guard = self.lock();
        let s = &mut *guard;
        s.rate = rate;
        if let Some(active) = s.active.as_mut() {
            let now = self.shared.output.now();
            active.control.set_rate(rate);
            active.playhead.set_rate(now, rate);
            s.cursor = active.playhead.end_time();
        }
        self.shared.events.emit(NarrationEvent::RateChanged { rate });
        tracing::info!(rate, "playback rate changed");
        Ok(())
    }

    /// Switch the synthesis voice. Pauses playback and drops cached audio.
    ///
    /// Returns `false` when `voice` is already selected.
    pub fn change_voice(&self, voice: &str) -> bool {
        if self.shared.cache.voice() == voice {
            return false;
        }
        self.pause();
        let changed = self.shared.cache.select_voice(voice);
        if changed {
            self.shared.events.emit(NarrationEvent::VoiceChanged {
                voice: voice.to_string(),
            });
            tracing::info!(voice, "voice changed");
        }
        changed
    }

    pub fn snapshot(&self) -> NarrationStatus {
        let s = self.lock();
        let cache = &self.shared.cache;
        let active = s
            .active
            .as_ref()
            .filter(|active| Some(active.index) == s.current_index);
        let position_seconds = match (active, s.state) {
            (Some(active), _) => Some(active.playhead.position_at(self.shared.output.now())),
            (None, PlaybackState::Paused) => Some(s.resume_offset),
            _ => None,
        };
        let chunk_duration_seconds = active
            .map(|active| active.playhead.duration())
            .or_else(|| s.current_index.and_then(|i| cache.get(i)).map(|a| a.duration_seconds()));

        NarrationStatus {
            state: s.state,
            current_index: s.current_index,
            chunk_count: cache.chunk_count(),
            rate: s.rate,
            voice: cache.voice(),
            position_seconds,
            chunk_duration_seconds,
            cached_chunks: cache.cached_count(),
            in_flight_chunks: cache.in_flight_count(),
            generation: self.shared.fence.current(),
            last_error: s.last_error.clone(),
        }
    }

    async fn run_loop(self, ticket: FenceTicket, from: usize, offset: f64) -> Result<LoopOutcome, PlaybackError> {
        let shared = &self.shared;
        let mut offset = offset.max(0.0);
        let mut index = from;

        loop {
            {
                let mut s = self.lock();
                if !ticket.is_current() {
                    return Ok(LoopOutcome::Superseded);
                }
                if index >= shared.cache.chunk_count() {
                    break;
                }
                s.current_index = Some(index);
            }
            shared.cache.prefetch_window(index + 1, shared.config.prefetch_window);

            let audio = match shared.cache.fetch(index).await {
                Ok(Some(audio)) => audio,
                Ok(None) => {
                    tracing::debug!(index, "fetch abandoned");
                    return Ok(LoopOutcome::Superseded);
                }
                Err(cause) => return self.fail(&ticket, index, cause),
            };

            let scheduled = {
                let mut s = self.lock();
                if !ticket.is_current() {
                    return Ok(LoopOutcome::Superseded);
                }
                let now = shared.output.now();
                let start_at = s.cursor.max(now);
                let duration = audio.duration_seconds();
                let offset_now = offset.clamp(0.0, duration);
                let rate = s.rate;
                let request = ScheduleRequest {
                    index,
                    audio,
                    start_at,
                    offset: offset_now,
                    rate,
                };
                match shared.output.schedule(request) {
                    Ok(source) => {
                        s.cursor = start_at + (duration - offset_now) / rate;
                        s.active = Some(ActiveSource {
                            index,
                            control: source.control,
                            playhead: Playhead::new(start_at, offset_now, rate, duration),
                        });
                        shared.events.chunk_scheduled(index, start_at, offset_now, duration);
                        tracing::debug!(index, start_at, offset = offset_now, duration, "chunk scheduled");
                        Ok(source.ended)
                    }
                    Err(e) => Err(ChunkError::Output(format!("{e:#}"))),
                }
            };
            let ended = match scheduled {
                Ok(ended) => ended,
                Err(cause) => return self.fail(&ticket, index, cause),
            };
            offset = 0.0;

            let natural_end = ended.await.is_ok();
            {
                let mut s = self.lock();
                if !ticket.is_current() {
                    return Ok(LoopOutcome::Superseded);
                }
                if !natural_end {
                    drop(s);
                    let cause = ChunkError::Output("source stopped unexpectedly".to_string());
                    return self.fail(&ticket, index, cause);
                }
                if s.active.as_ref().is_some_and(|active| active.index == index) {
                    s.active = None;
                }
                shared.events.chunk_finished(index);
            }
            index += 1;
        }

        let mut s = self.lock();
        if !ticket.is_current() {
            return Ok(LoopOutcome::Superseded);
        }
        s.state = PlaybackState::Idle;
        s.current_index = None;
        s.resume_offset = 0.0;
        s.active = None;
        shared.events.state_changed(PlaybackState::Idle, None);
        shared.events.emit(NarrationEvent::Finished);
        tracing::info!("narration finished");
        Ok(LoopOutcome::Completed)
    }

    /// Pause on `index` after an active-path failure and report it.
    fn fail(&self, ticket: &FenceTicket, index: usize, cause: ChunkError) -> Result<LoopOutcome, PlaybackError> {
        let mut s = self.lock();
        if !ticket.is_current() {
            return Ok(LoopOutcome::Superseded);
        }
        self.shared.fence.advance();
        s.stop_active();
        s.state = PlaybackState::Paused;
        s.current_index = Some(index);
        s.resume_offset = 0.0;
        let failure = ChunkFailure {
            index,
            message: cause.to_string(),
        };
        s.last_error = Some(failure.clone());
        self.shared.events.state_changed(PlaybackState::Paused, Some(index));
        self.shared.events.playback_failed(failure);
        tracing::warn!(index, "chunk failed, playback paused: {cause}");
        Err(PlaybackError { index, cause })
    }
}
