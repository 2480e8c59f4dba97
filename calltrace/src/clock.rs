//! # Clocks and stopwatches
//!
//! Every traced call owns a [`Stopwatch`] that is started when the call is
//! opened and stopped exactly once when it closes. Stopwatches read time from
//! a [`Clock`], which is a monotonic reading relative to a fixed origin.
//!
//! [`MonotonicClock`] is the default. [`ManualClock`] only moves when told to,
//! which makes recorded timings deterministic.

use std::{
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::{Duration, Instant},
};

/// A monotonic time source.
pub trait Clock: Send + Sync {
    /// Time elapsed since the clock's origin. Never decreases.
    fn now(&self) -> Duration;
}

/// Wall-clock time measured with [`Instant`].
#[derive(Debug, Clone, Copy)]
pub struct MonotonicClock {
    origin: Instant,
}

impl MonotonicClock {
    /// Create a clock whose origin is the current instant.
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for MonotonicClock {
    fn now(&self) -> Duration {
        self.origin.elapsed()
    }
}

/// A clock that advances only when instructed.
///
/// Clones share the same reading, so a test can keep one handle and hand the
/// other to a [`Tracer`](crate::Tracer).
///
/// # Examples
///
/// ```
/// use std::time::Duration;
/// use calltrace::{Clock, ManualClock};
///
/// let clock = ManualClock::new();
/// let handle = clock.clone();
/// handle.advance(Duration::from_millis(15));
/// assert_eq!(clock.now(), Duration::from_millis(15));
/// ```
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    nanos: Arc<AtomicU64>,
}

impl ManualClock {
    /// Create a clock reading zero.
    pub fn new() -> Self {
        Self::default()
    }

    /// Move the clock forward by `delta`.
    pub fn advance(&self, delta: Duration) {
        self.nanos
            .fetch_add(duration_as_nanos(delta), Ordering::SeqCst);
    }

    /// Move the clock to `at`. Readings earlier than the current one are
    /// ignored so the clock stays monotonic.
    pub fn set(&self, at: Duration) {
        self.nanos
            .fetch_max(duration_as_nanos(at), Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Duration {
        Duration::from_nanos(self.nanos.load(Ordering::SeqCst))
    }
}

fn duration_as_nanos(duration: Duration) -> u64 {
    u64::try_from(duration.as_nanos()).unwrap_or(u64::MAX)
}

/// One-shot stopwatch attached to a traced call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Stopwatch {
    started_at: Duration,
    stopped_at: Option<Duration>,
}

impl Stopwatch {
    /// Start a new stopwatch at the clock's current reading.
    pub fn start(clock: &dyn Clock) -> Self {
        Self {
            started_at: clock.now(),
            stopped_at: None,
        }
    }

    /// Stop the stopwatch and return the measured duration.
    ///
    /// Returns `None` if it was already stopped; the first reading is kept.
    pub fn stop(&mut self, clock: &dyn Clock) -> Option<Duration> {
        if self.stopped_at.is_some() {
            return None;
        }
        let now = clock.now();
        self.stopped_at = Some(now);
        Some(now.saturating_sub(self.started_at))
    }

    /// Whether the stopwatch is still running.
    pub fn is_running(&self) -> bool {
        self.stopped_at.is_none()
    }

    /// Measured duration, or zero while running.
    pub fn elapsed(&self) -> Duration {
        self.stopped_at
            .map(|stopped| stopped.saturating_sub(self.started_at))
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn manual_clock_is_shared_between_clones() {
        let clock = ManualClock::new();
        let other = clock.clone();
        other.advance(Duration::from_millis(7));
        assert_eq!(clock.now(), Duration::from_millis(7));

        clock.set(Duration::from_millis(3));
        assert_eq!(other.now(), Duration::from_millis(7));
    }

    #[test]
    fn stopwatch_stops_once() {
        let clock = ManualClock::new();
        let mut watch = Stopwatch::start(&clock);
        assert!(watch.is_running());
        assert_eq!(watch.elapsed(), Duration::ZERO);

        clock.advance(Duration::from_millis(40));
        assert_eq!(watch.stop(&clock), Some(Duration::from_millis(40)));
        assert!(!watch.is_running());

        clock.advance(Duration::from_millis(40));
        assert_eq!(watch.stop(&clock), None);
        assert_eq!(watch.elapsed(), Duration::from_millis(40));
    }

    #[test]
    fn monotonic_clock_never_goes_back() {
        let clock = MonotonicClock::new();
        let first = clock.now();
        let second = clock.now();
        assert!(second >= first);
    }
}
