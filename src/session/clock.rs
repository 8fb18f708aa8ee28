//! Frame timing and the post-ready resize burst

use std::time::{Duration, Instant};

/// Monotonic frame clock
///
/// Each tick measures the time since the previous tick and adds it to the
/// running total. The first tick has a delta of zero.
#[derive(Debug, Clone, Default)]
pub struct FrameClock {
    last: Option<Instant>,
    delta: f64,
    total: f64,
    frame_count: u64,
}

impl FrameClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ticks at `now`, returns the delta in seconds
    ///
    /// An instant earlier than the previous tick counts as no time passing.
    pub fn tick_at(&mut self, now: Instant) -> f64 {
        let delta = match self.last {
            Some(last) => now.saturating_duration_since(last).as_secs_f64(),
            None => 0.0,
        };
        self.last = Some(self.last.map_or(now, |last| last.max(now)));
        self.delta = delta;
        self.total += delta;
        self.frame_count += 1;
        delta
    }

    /// Seconds between the last two ticks
    pub fn delta(&self) -> f64 {
        self.delta
    }

    /// Seconds accumulated over all ticks
    pub fn total(&self) -> f64 {
        self.total
    }

    pub fn frame_count(&self) -> u64 {
        self.frame_count
    }

    /// Average seconds per frame
    pub fn average_frame_time(&self) -> f64 {
        if self.frame_count > 1 {
            self.total / (self.frame_count - 1) as f64
        } else {
            0.0
        }
    }
}

/// Fixed number of re-fits at a fixed cadence, armed once the video source is ready
///
/// Native video dimensions may arrive after the source reports ready, so the
/// layout is corrected a few more times. A burst of `count` fires `count + 1`
/// times: once per interval, plus the tick on which it cancels itself.
#[derive(Debug, Clone)]
pub struct ResizeBurst {
    interval: Duration,
    count: u32,
    remaining: u32,
    next_due: Option<Instant>,
}

impl ResizeBurst {
    pub fn new(interval: Duration, count: u32) -> Self {
        Self {
            interval,
            count,
            remaining: 0,
            next_due: None,
        }
    }

    /// Starts the burst, the first correction is due one interval after `now`
    pub fn arm(&mut self, now: Instant) {
        self.remaining = self.count + 1;
        self.next_due = Some(now + self.interval);
    }

    pub fn is_active(&self) -> bool {
        self.next_due.is_some()
    }

    /// Corrections still to fire
    pub fn remaining(&self) -> u32 {
        self.remaining
    }

    /// Returns true when a correction is due at `now` and consumes it
    ///
    /// At most one correction fires per poll, however late the poll is.
    pub fn poll(&mut self, now: Instant) -> bool {
        let Some(due) = self.next_due else {
            return false;
        };
        if now < due {
            return false;
        }

        self.remaining = self.remaining.saturating_sub(1);
        self.next_due = if self.remaining == 0 {
            None
        } else {
            Some(due + self.interval)
        };
        true
    }
}
