//! Step timing and per-pass statistics.
//!
//! [`StepClock`] accumulates how long each pipeline pass takes, counts steps
//! and keeps a periodically refreshed steps-per-second figure.
//!
//! # Example
//!
//! ```ignore
//! use gridflock::time::{Pass, StepClock};
//!
//! let mut clock = StepClock::new();
//! let started = clock.begin_step();
//! clock.time(Pass::Velocity, || {
//!     // ... run the velocity pass ...
//! });
//! clock.end_step(started);
//!
//! println!("Steps: {}", clock.steps());
//! println!("Velocity: {:?}", clock.total(Pass::Velocity));
//! ```

use std::fmt;
use std::time::{Duration, Instant};

/// A timed stage of the step pipeline.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Pass {
    /// Cell id computation.
    Index,
    /// Sorting agents by cell id.
    Sort,
    /// Building the cell start/end table.
    Buckets,
    /// Gathering positions and velocities into slot order.
    Rearrange,
    /// Applying the flocking rules.
    Velocity,
    /// Advancing and wrapping positions.
    Integrate,
}

impl Pass {
    /// Every pass, in pipeline order.
    pub const ALL: [Pass; 6] = [
        Pass::Index,
        Pass::Sort,
        Pass::Buckets,
        Pass::Rearrange,
        Pass::Velocity,
        Pass::Integrate,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Pass::Index => "index",
            Pass::Sort => "sort",
            Pass::Buckets => "buckets",
            Pass::Rearrange => "rearrange",
            Pass::Velocity => "velocity",
            Pass::Integrate => "integrate",
        }
    }

    fn slot(self) -> usize {
        self as usize
    }
}

impl fmt::Display for Pass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Timing statistics for a running simulation.
#[derive(Clone, Debug)]
pub struct StepClock {
    /// When the clock was created.
    start: Instant,
    /// Total steps completed.
    step_count: u64,
    /// Accumulated time per pass, indexed by [`Pass`].
    pass_totals: [Duration; 6],
    /// Time spent in each pass during the most recent step.
    pass_last: [Duration; 6],
    /// Wall time of the most recent step.
    last_step: Duration,
    /// Calculated steps per second (updated periodically).
    steps_per_sec: f32,
    /// Step count at last rate update.
    rate_step_count: u64,
    /// Time of last rate calculation.
    rate_update_time: Instant,
    /// How often to update the rate.
    rate_update_interval: Duration,
}

impl StepClock {
    /// Create a clock starting from now.
    pub fn new() -> Self {
        let now = Instant::now();
        Self {
            start: now,
            step_count: 0,
            pass_totals: [Duration::ZERO; 6],
            pass_last: [Duration::ZERO; 6],
            last_step: Duration::ZERO,
            steps_per_sec: 0.0,
            rate_step_count: 0,
            rate_update_time: now,
            rate_update_interval: Duration::from_millis(500),
        }
    }

    /// Mark the start of a step and clear the per-step pass times.
    pub fn begin_step(&mut self) -> Instant {
        self.pass_last = [Duration::ZERO; 6];
        Instant::now()
    }

    /// Add `elapsed` to the totals for `pass`.
    pub fn record(&mut self, pass: Pass, elapsed: Duration) {
        self.pass_totals[pass.slot()] += elapsed;
        self.pass_last[pass.slot()] += elapsed;
    }

    /// Run `f`, recording its wall time under `pass`.
    pub fn time<R>(&mut self, pass: Pass, f: impl FnOnce() -> R) -> R {
        let started = Instant::now();
        let result = f();
        self.record(pass, started.elapsed());
        result
    }

    /// Close a step opened with [`begin_step`](Self::begin_step).
    pub fn end_step(&mut self, started: Instant) {
        let now = Instant::now();
        self.last_step = now.duration_since(started);
        self.step_count += 1;

        let rate_elapsed = now.duration_since(self.rate_update_time);
        if rate_elapsed >= self.rate_update_interval {
            let steps_since = self.step_count - self.rate_step_count;
            self.steps_per_sec = steps_since as f32 / rate_elapsed.as_secs_f32();
            self.rate_step_count = self.step_count;
            self.rate_update_time = now;
        }
    }

    /// Total steps completed.
    #[inline]
    pub fn steps(&self) -> u64 {
        self.step_count
    }

    /// Accumulated time spent in `pass` over all steps.
    #[inline]
    pub fn total(&self, pass: Pass) -> Duration {
        self.pass_totals[pass.slot()]
    }

    /// Time spent in `pass` during the most recent step.
    #[inline]
    pub fn last(&self, pass: Pass) -> Duration {
        self.pass_last[pass.slot()]
    }

    /// Mean time per step spent in `pass`.
    pub fn mean(&self, pass: Pass) -> Duration {
        match u32::try_from(self.step_count) {
            Ok(0) => Duration::ZERO,
            Ok(steps) => self.total(pass) / steps,
            Err(_) => Duration::from_secs_f64(self.total(pass).as_secs_f64() / self.step_count as f64),
        }
    }

    /// Wall time of the most recent step.
    #[inline]
    pub fn last_step(&self) -> Duration {
        self.last_step
    }

    /// Calculated steps per second.
    #[inline]
    pub fn steps_per_sec(&self) -> f32 {
        self.steps_per_sec
    }

    /// Time since the clock was created.
    #[inline]
    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }
}

impl Default for StepClock {
    fn default() -> Self {
        Self::new()
    }
}
