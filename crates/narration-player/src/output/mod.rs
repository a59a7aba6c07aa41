//! Audio output abstraction.
//!
//! The scheduler hands each decoded chunk to an [`AudioOutput`] together with
//! an absolute start time on the output clock. The output reports the natural
//! end of a source through a one-shot channel; a stopped source drops the
//! sender instead, so the receiver resolves with an error.

use std::sync::Arc;

use tokio::sync::oneshot;

use crate::decode::DecodedAudio;

pub mod cpal_output;
pub mod silent;

pub use cpal_output::CpalOutput;
pub use silent::SilentOutput;

/// One chunk to be played.
#[derive(Clone, Debug)]
pub struct ScheduleRequest {
    pub index: usize,
    pub audio: DecodedAudio,
    /// Output clock time (seconds) at which the first sample sounds.
    pub start_at: f64,
    /// Offset into `audio` in seconds.
    pub offset: f64,
    pub rate: f64,
}

/// Handle to a scheduled source.
pub trait SourceControl: Send + Sync {
    /// Change the playback rate of the source from the current output time on.
    fn set_rate(&self, rate: f64);
    /// Silence and release the source. Its end notification is never sent.
    fn stop(&self);
}

pub struct ScheduledSource {
    pub control: Arc<dyn SourceControl>,
    /// Resolves with `Ok(())` when the source plays to its end. Device outputs
    /// may resolve up to two callback periods early so the next source can be
    /// queued right behind it.
    pub ended: oneshot::Receiver<()>,
}

pub trait AudioOutput: Send + Sync {
    /// Current output clock time in seconds.
    fn now(&self) -> f64;

    /// Fixed sample rate of the output, if it has one.
    ///
    /// Chunks are converted to this rate before they are scheduled.
    fn sample_rate(&self) -> Option<u32> {
        None
    }

    /// Schedule a source. Any source previously scheduled on this output is
    /// replaced, except for the tail of one that has already reported its end.
    fn schedule(&self, request: ScheduleRequest) -> anyhow::Result<ScheduledSource>;
}
