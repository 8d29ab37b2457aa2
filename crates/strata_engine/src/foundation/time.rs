//! Time management utilities

use std::cell::Cell;
use std::collections::VecDeque;
use std::rc::Rc;
use std::time::{Duration, Instant};

/// Number of delta samples kept for smoothing
pub const DELTA_WINDOW_LEN: usize = 5;

/// Monotonic time source used by the frame scheduler
pub trait FrameClock {
    /// Time elapsed since the clock's origin. Must never go backwards.
    fn now(&self) -> Duration;
}

/// Wall clock backed by [`Instant`]
#[derive(Debug, Clone, Copy)]
pub struct MonotonicClock {
    origin: Instant,
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl MonotonicClock {
    /// Create a clock whose origin is now
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl FrameClock for MonotonicClock {
    fn now(&self) -> Duration {
        self.origin.elapsed()
    }
}

/// Hand-driven clock for deterministic frame timing
///
/// Clones share the same time value, so a test can keep one clone and
/// advance it while the scheduler owns the other.
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    now: Rc<Cell<Duration>>,
}

impl ManualClock {
    /// Create a clock at time zero
    pub fn new() -> Self {
        Self::default()
    }

    /// Move the clock forward
    pub fn advance(&self, by: Duration) {
        self.now.set(self.now.get() + by);
    }
}

impl FrameClock for ManualClock {
    fn now(&self) -> Duration {
        self.now.get()
    }
}

/// Bounded rolling window of recent frame deltas
#[derive(Debug, Clone, Default)]
pub struct DeltaWindow {
    samples: VecDeque<f32>,
}

impl DeltaWindow {
    /// Create an empty window
    pub fn new() -> Self {
        Self {
            samples: VecDeque::with_capacity(DELTA_WINDOW_LEN),
        }
    }

    /// Record a delta, evicting the oldest sample once full
    pub fn push(&mut self, delta: f32) {
        if self.samples.len() == DELTA_WINDOW_LEN {
            self.samples.pop_front();
        }
        self.samples.push_back(delta);
    }

    /// Number of samples currently held
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    /// Whether no samples have been recorded
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Mean of the held samples, zero when empty
    pub fn average(&self) -> f32 {
        if self.samples.is_empty() {
            0.0
        } else {
            self.samples.iter().sum::<f32>() / self.samples.len() as f32
        }
    }

    /// Samples from oldest to newest
    pub fn samples(&self) -> impl Iterator<Item = f32> + '_ {
        self.samples.iter().copied()
    }
}
