//! Fixed-rate ticking for the authority loop.
//!
//! Real elapsed time is banked and paid out in whole ticks. A single call
//! never pays out more than [`MAX_CATCH_UP_TICKS`]; time beyond that is
//! dropped so a stalled host does not spiral into ever longer frames.

use tracing::debug;

/// Upper bound on ticks run for one call to [`TickSchedule::accumulate`].
pub const MAX_CATCH_UP_TICKS: u32 = 8;

/// Converts elapsed seconds into a count of fixed ticks.
#[derive(Debug, Clone)]
pub struct TickSchedule {
    step_secs: f64,
    banked_secs: f64,
    elapsed_ticks: u64,
    dropped_secs: f64,
}

impl TickSchedule {
    /// A schedule running at `hz` ticks per second. Zero runs at 1 Hz.
    pub fn with_tick_rate(hz: u32) -> Self {
        Self {
            step_secs: 1.0 / f64::from(hz.max(1)),
            banked_secs: 0.0,
            elapsed_ticks: 0,
            dropped_secs: 0.0,
        }
    }

    /// Banks `dt_secs` and returns how many ticks are now due.
    pub fn accumulate(&mut self, dt_secs: f64) -> u32 {
        self.banked_secs += dt_secs.max(0.0);
        let due = (self.banked_secs / self.step_secs).floor();
        let ticks = if due > f64::from(MAX_CATCH_UP_TICKS) {
            let dropped = self.banked_secs - f64::from(MAX_CATCH_UP_TICKS) * self.step_secs;
            debug!(dropped_secs = dropped, "tick schedule fell behind; dropping time");
            self.dropped_secs += dropped;
            self.banked_secs -= dropped;
            MAX_CATCH_UP_TICKS
        } else {
            due as u32
        };
        self.banked_secs = (self.banked_secs - f64::from(ticks) * self.step_secs).max(0.0);
        self.elapsed_ticks += u64::from(ticks);
        ticks
    }

    /// Ticks paid out so far.
    pub fn total_ticks(&self) -> u64 {
        self.elapsed_ticks
    }

    /// Length of one tick in seconds.
    pub fn tick_duration_secs(&self) -> f64 {
        self.step_secs
    }

    /// Fraction of the next tick already banked, in `[0, 1)`.
    pub fn pending_fraction(&self) -> f64 {
        self.banked_secs / self.step_secs
    }

    /// Seconds discarded by the catch-up cap.
    pub fn dropped_secs(&self) -> f64 {
        self.dropped_secs
    }
}
