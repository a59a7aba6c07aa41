//! Rate-aware position tracking for the sounding chunk.

/// Maps output clock time to a position inside one scheduled buffer.
///
/// The mapping is piecewise linear: each rate change re-anchors it at the
/// moment of the change, so earlier playback at the old rate is accounted for
/// exactly.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Playhead {
    anchor_time: f64,
    anchor_position: f64,
    rate: f64,
    duration: f64,
}

impl Playhead {
    /// Buffer of `duration` seconds that reaches `offset` at clock time `start_at`.
    pub fn new(start_at: f64, offset: f64, rate: f64, duration: f64) -> Self {
        Self {
            anchor_time: start_at,
            anchor_position: offset.clamp(0.0, duration.max(0.0)),
            rate,
            duration: duration.max(0.0),
        }
    }

    /// Position in seconds at clock time `now`, clamped to `[0, duration]`.
    pub fn position_at(&self, now: f64) -> f64 {
        let elapsed = (now - self.anchor_time).max(0.0);
        (self.anchor_position + elapsed * self.rate).clamp(0.0, self.duration)
    }

    /// Switch to `rate` at clock time `now`.
    ///
    /// A change before the buffer starts keeps the start time as the anchor.
    pub fn set_rate(&mut self, now: f64, rate: f64) {
        let at = now.max(self.anchor_time);
        self.anchor_position = self.position_at(at);
        self.anchor_time = at;
        self.rate = rate;
    }

    /// Clock time at which the buffer finishes at the current rate.
    pub fn end_time(&self) -> f64 {
        self.anchor_time + (self.duration - self.anchor_position) / self.rate
    }

    pub fn duration(&self) -> f64 {
        self.duration
    }

    pub fn rate(&self) -> f64 {
        self.rate
    }
}
