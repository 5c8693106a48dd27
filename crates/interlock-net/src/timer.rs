//! Deferred one-shot actions driven by the simulation clock.
//!
//! Arming a key that is already pending is a no-op: the original deadline
//! stands. Armed timers cannot be cancelled individually; [`TimerQueue::clear`]
//! drops everything at once (level teardown).

use std::fmt::Debug;

use tracing::trace;

#[derive(Debug, Clone)]
struct Armed<K> {
    key: K,
    fire_at: f64,
}

/// A queue of keyed one-shot timers.
#[derive(Debug, Clone)]
pub struct TimerQueue<K> {
    now: f64,
    armed: Vec<Armed<K>>,
}

impl<K: PartialEq + Debug> TimerQueue<K> {
    /// Creates an empty queue at time zero.
    pub fn new() -> Self {
        Self {
            now: 0.0,
            armed: Vec::new(),
        }
    }

    /// Arms `key` to fire `delay_secs` from now. Returns `false` (and leaves
    /// the existing deadline untouched) if `key` is already pending.
    pub fn arm(&mut self, key: K, delay_secs: f64) -> bool {
        if self.is_pending(&key) {
            trace!(?key, "timer already armed");
            return false;
        }
        self.armed.push(Armed {
            key,
            fire_at: self.now + delay_secs.max(0.0),
        });
        true
    }

    /// Returns `true` if `key` is armed and has not fired yet.
    pub fn is_pending(&self, key: &K) -> bool {
        self.armed.iter().any(|a| &a.key == key)
    }

    /// Seconds left before `key` fires.
    pub fn remaining(&self, key: &K) -> Option<f64> {
        self.armed
            .iter()
            .find(|a| &a.key == key)
            .map(|a| (a.fire_at - self.now).max(0.0))
    }

    /// Advances the clock by `dt` seconds and returns the keys that fired,
    /// earliest deadline first.
    pub fn advance(&mut self, dt: f64) -> Vec<K> {
        self.now += dt.max(0.0);
        let now = self.now;
        let mut due = Vec::new();
        let mut i = 0;
        while i < self.armed.len() {
            if self.armed[i].fire_at <= now {
                due.push(self.armed.swap_remove(i));
            } else {
                i += 1;
            }
        }
        due.sort_by(|a, b| a.fire_at.total_cmp(&b.fire_at));
        due.into_iter().map(|a| a.key).collect()
    }

    /// Drops every pending timer.
    pub fn clear(&mut self) {
        self.armed.clear();
    }

    /// Current clock value in seconds.
    pub fn now(&self) -> f64 {
        self.now
    }

    /// Number of pending timers.
    pub fn len(&self) -> usize {
        self.armed.len()
    }

    /// Returns `true` if nothing is pending.
    pub fn is_empty(&self) -> bool {
        self.armed.is_empty()
    }
}

impl<K: PartialEq + Debug> Default for TimerQueue<K> {
    fn default() -> Self {
        Self::new()
    }
}
