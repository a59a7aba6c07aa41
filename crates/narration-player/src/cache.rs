//! Prefetch cache.
//!
//! Sparse, index-addressed store of decoded chunk audio. Every synthesis is
//! tagged with the cache epoch and voice current when it started; results that
//! come back after an invalidation are dropped instead of stored.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::watch;

use crate::chunker::Chunk;
use crate::decode::{DecodedAudio, decode_payload};
use crate::error::ChunkError;
use crate::provider::Synthesizer;
use crate::resample::resample_to;

#[derive(Clone)]
pub struct PrefetchCache {
    inner: Arc<CacheInner>,
}

struct CacheInner {
    synthesizer: Arc<dyn Synthesizer>,
    /// Output rate decoded chunks are converted to, when the output has a fixed rate.
    target_rate: Option<u32>,
    resample_chunk_frames: usize,
    state: Mutex<CacheState>,
}

struct CacheState {
    epoch: u64,
    voice: String,
    chunks: Arc<[Chunk]>,
    entries: HashMap<usize, DecodedAudio>,
    in_flight: HashMap<usize, InFlight>,
}

/// Marker for a running synthesis. Dropping `done` wakes every waiter.
struct InFlight {
    epoch: u64,
    done: watch::Sender<()>,
}

/// Work captured when a synthesis is claimed.
struct Job {
    index: usize,
    epoch: u64,
    voice: String,
    text: String,
}

enum Claim {
    Cached(DecodedAudio),
    Wait { epoch: u64, done: watch::Receiver<()> },
    Start(Job),
    Missing,
}

impl PrefetchCache {
    pub fn new(
        synthesizer: Arc<dyn Synthesizer>,
        voice: impl Into<String>,
        target_rate: Option<u32>,
        resample_chunk_frames: usize,
    ) -> Self {
        Self {
            inner: Arc::new(CacheInner {
                synthesizer,
                target_rate,
                resample_chunk_frames,
                state: Mutex::new(CacheState {
                    epoch: 0,
                    voice: voice.into(),
                    chunks: Arc::from(Vec::new()),
                    entries: HashMap::new(),
                    in_flight: HashMap::new(),
                }),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, CacheState> {
        self.inner
            .state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Replace the chunk sequence and drop everything cached for the old one.
    pub fn reset(&self, chunks: Vec<Chunk>) {
        let mut state = self.lock();
        state.chunks = chunks.into();
        invalidate_locked(&mut state);
    }

    /// Switch the synthesis voice. Returns `false` when `voice` is already selected.
    pub fn select_voice(&self, voice: &str) -> bool {
        let mut state = self.lock();
        if state.voice == voice {
            return false;
        }
        state.voice = voice.to_string();
        invalidate_locked(&mut state);
        true
    }

    /// Drop every cached buffer and in-flight marker.
    ///
    /// Waiters on an in-flight synthesis wake up and observe the new epoch.
    pub fn invalidate_all(&self) {
        invalidate_locked(&mut self.lock());
    }

    pub fn get(&self, index: usize) -> Option<DecodedAudio> {
        self.lock().entries.get(&index).cloned()
    }

    pub fn voice(&self) -> String {
        self.lock().voice.clone()
    }

    pub fn chunk_count(&self) -> usize {
        self.lock().chunks.len()
    }

    pub fn chunk(&self, index: usize) -> Option<Chunk> {
        self.lock().chunks.get(index).cloned()
    }

    pub fn cached_count(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn in_flight_count(&self) -> usize {
        self.lock().in_flight.len()
    }

    pub fn is_in_flight(&self, index: usize) -> bool {
        self.lock().in_flight.contains_key(&index)
    }

    /// Start background synthesis for `index` unless it is cached or already in flight.
    ///
    /// Must be called from within a Tokio runtime. Failures are logged and leave
    /// the entry absent.
    pub fn ensure(&self, index: usize) {
        let Claim::Start(job) = self.claim(index) else {
            return;
        };
        let cache = self.clone();
        tokio::spawn(async move {
            let index = job.index;
            let voice = job.voice.clone();
            let result = cache.run(&job).await;
            let stored = cache.complete(&job, result.as_ref().ok());
            match result {
                Ok(_) if stored => tracing::debug!(index, voice = %voice, "prefetched chunk"),
                Ok(_) => tracing::debug!(index, voice = %voice, "discarded stale prefetch"),
                Err(e) => tracing::warn!(index, voice = %voice, "prefetch failed: {e}"),
            }
        });
    }

    /// Call [`PrefetchCache::ensure`] for `from..from + window`, bounded by the sequence length.
    pub fn prefetch_window(&self, from: usize, window: usize) {
        let end = from.saturating_add(window).min(self.chunk_count());
        for index in from..end {
            self.ensure(index);
        }
    }

    /// Return audio for `index`, synthesizing it on this task if needed.
    ///
    /// Waits for an in-flight prefetch of the same index rather than issuing a
    /// duplicate request. Returns `Ok(None)` when the voice or source changed
    /// while waiting, or when `index` no longer exists.
    pub async fn fetch(&self, index: usize) -> Result<Option<DecodedAudio>, ChunkError> {
        loop {
            match self.claim(index) {
                Claim::Cached(audio) => return Ok(Some(audio)),
                Claim::Missing => return Ok(None),
                Claim::Wait { epoch, mut done } => {
                    let _ = done.changed().await;
                    if self.lock().epoch != epoch {
                        return Ok(None);
                    }
                    // Prefetch either stored the entry or failed; the next claim tells which.
                }
                Claim::Start(job) => {
                    let result = self.run(&job).await;
                    let stored = self.complete(&job, result.as_ref().ok());
                    return match result {
                        Ok(audio) if stored => Ok(Some(audio)),
                        Ok(_) => Ok(None),
                        Err(_) if self.lock().epoch != job.epoch => Ok(None),
                        Err(e) => Err(e),
                    };
                }
            }
        }
    }

    fn claim(&self, index: usize) -> Claim {
        let mut state = self.lock();
        if let Some(audio) = state.entries.get(&index) {
            return Claim::Cached(audio.clone());
        }
        if let Some(flight) = state.in_flight.get(&index) {
            return Claim::Wait {
                epoch: state.epoch,
                done: flight.done.subscribe(),
            };
        }
        let Some(chunk) = state.chunks.get(index) else {
            return Claim::Missing;
        };
        let job = Job {
            index,
            epoch: state.epoch,
            voice: state.voice.clone(),
            text: chunk.text.clone(),
        };
        let (done, _) = watch::channel(());
        state.in_flight.insert(
            index,
            InFlight {
                epoch: job.epoch,
                done,
            },
        );
        Claim::Start(job)
    }

    async fn run(&self, job: &Job) -> Result<DecodedAudio, ChunkError> {
        let synthesizer = &self.inner.synthesizer;
        let payload = synthesizer.synthesize(&job.text, &job.voice).await?;
        let format = synthesizer.payload_format();
        let target_rate = self.inner.target_rate;
        let chunk_frames = self.inner.resample_chunk_frames;

        tokio::task::spawn_blocking(move || -> Result<DecodedAudio, ChunkError> {
            let audio = decode_payload(payload, &format)?;
            match target_rate {
                Some(rate) => Ok(resample_to(&audio, rate, chunk_frames)?),
                None => Ok(audio),
            }
        })
        .await
        .map_err(|e| ChunkError::Output(format!("decode task failed: {e}")))?
    }

    /// Clear the in-flight marker for `job` and store `audio` if the job is still current.
    fn complete(&self, job: &Job, audio: Option<&DecodedAudio>) -> bool {
        let mut state = self.lock();
        if state
            .in_flight
            .get(&job.index)
            .is_some_and(|flight| flight.epoch == job.epoch)
        {
            state.in_flight.remove(&job.index);
        }
        let current = state.epoch == job.epoch && state.voice == job.voice;
        match audio {
            Some(audio) if current => {
                state.entries.insert(job.index, audio.clone());
                true
            }
            _ => false,
        }
    }
}

fn invalidate_locked(state: &mut CacheState) {
    state.epoch += 1;
    state.entries.clear();
    state.in_flight.clear();
}
