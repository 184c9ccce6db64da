//! Wall-clock timing of kernel dispatch.

use std::fmt;
use std::time::{Duration, Instant};

/// Point on the monotonic clock where a measurement started.
#[derive(Debug, Clone, Copy)]
pub struct Timestamp(Instant);

/// Time between a [`Timestamp`] and the matching [`stop`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct ElapsedDuration(Duration);

impl ElapsedDuration {
    /// Elapsed time as a [`Duration`].
    pub fn as_duration(&self) -> Duration {
        self.0
    }

    /// Elapsed time in fractional milliseconds.
    pub fn as_millis_f64(&self) -> f64 {
        self.0.as_secs_f64() * 1_000.0
    }
}

impl fmt::Display for ElapsedDuration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.6} ms", self.as_millis_f64())
    }
}

/// Read the clock just before the measured section.
pub fn start() -> Timestamp {
    Timestamp(Instant::now())
}

/// Time since `started`.
pub fn stop(started: Timestamp) -> ElapsedDuration {
    ElapsedDuration(started.0.elapsed())
}
