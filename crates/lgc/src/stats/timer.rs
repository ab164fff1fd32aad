//! GC Timer - Timing Utilities
//!
//! Timer untuk mengukur satu cycle dan tiap phase di dalamnya.

use std::time::{Duration, Instant};

/// Timer for one collection cycle
pub struct GcTimer {
    start: Instant,
    phase_start: Instant,
}

impl GcTimer {
    pub fn new() -> Self {
        let now = Instant::now();
        Self {
            start: now,
            phase_start: now,
        }
    }

    /// Time since the cycle started
    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    pub fn elapsed_ns(&self) -> u64 {
        self.elapsed().as_nanos() as u64
    }

    pub fn elapsed_ms(&self) -> f64 {
        self.elapsed().as_secs_f64() * 1000.0
    }

    /// Close the running phase and start the next one
    ///
    /// Returns the closed phase's duration in milliseconds.
    pub fn lap_ms(&mut self) -> f64 {
        let now = Instant::now();
        let ms = (now - self.phase_start).as_secs_f64() * 1000.0;
        self.phase_start = now;
        ms
    }
}

impl Default for GcTimer {
    fn default() -> Self {
        Self::new()
    }
}
