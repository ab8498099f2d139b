//! Time source abstraction.
//!
//! Every timer-driven component (VAD hysteresis, snapshot staleness, failover
//! bookkeeping) takes a [`Clock`] so tests can drive time manually instead of
//! sleeping against the wall clock.

use std::time::Instant;

/// Trait for time operations, allowing mock time in tests.
pub trait Clock: Send + Sync {
    /// Returns the current monotonic instant.
    fn now(&self) -> Instant;

    /// Returns the current wall-clock time as seconds since the Unix epoch.
    fn epoch_secs(&self) -> f64;
}

/// Allow shared clocks (`Arc<dyn Clock>`) wherever a clock is expected.
impl<C: Clock + ?Sized> Clock for std::sync::Arc<C> {
    fn now(&self) -> Instant {
        (**self).now()
    }

    fn epoch_secs(&self) -> f64 {
        (**self).epoch_secs()
    }
}

/// Real system clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn epoch_secs(&self) -> f64 {
        chrono::Utc::now().timestamp_micros() as f64 / 1_000_000.0
    }
}
