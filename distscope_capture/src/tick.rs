//! Synthesized timestamps for ingestion passes.

use std::{fmt, time::Duration};

use serde::{Serialize, Serializer};

/// Time elapsed since capture start at which a pass was first sampled.
///
/// Ticks issued by one [`crate::Capture`] are strictly increasing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Tick(Duration);

impl Tick {
    /// Create a tick at `elapsed` past capture start.
    #[must_use]
    pub const fn from_elapsed(elapsed: Duration) -> Self {
        Self(elapsed)
    }

    /// Elapsed time since capture start.
    #[must_use]
    pub const fn elapsed(self) -> Duration {
        self.0
    }

    /// Elapsed seconds since capture start, the usual x-axis of a display.
    #[must_use]
    pub fn as_secs_f64(self) -> f64 {
        self.0.as_secs_f64()
    }
}

impl fmt::Display for Tick {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.3}s", self.as_secs_f64())
    }
}

impl Serialize for Tick {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_f64(self.as_secs_f64())
    }
}

/// Issues [`Tick`]s from a monotonic clock.
///
/// A coarse or mocked clock may report the same instant for two passes; the
/// second tick is then nudged one nanosecond past the first.
#[derive(Debug, Clone)]
pub(crate) struct TickClock {
    clock: quanta::Clock,
    start: quanta::Instant,
    last: Option<Tick>,
}

impl TickClock {
    pub(crate) fn new(clock: quanta::Clock) -> Self {
        let start = clock.now();
        Self {
            clock,
            start,
            last: None,
        }
    }

    pub(crate) fn next(&mut self) -> Tick {
        let elapsed = self.clock.now().saturating_duration_since(self.start);
        let tick = match self.last {
            Some(last) if elapsed <= last.0 => Tick(last.0 + Duration::from_nanos(1)),
            _ => Tick(elapsed),
        };
        self.last = Some(tick);
        tick
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ticks_follow_the_clock() {
        let (clock, mock) = quanta::Clock::mock();
        let mut ticks = TickClock::new(clock);

        mock.increment(Duration::from_millis(100));
        assert_eq!(ticks.next().elapsed(), Duration::from_millis(100));
        mock.increment(Duration::from_millis(250));
        assert_eq!(ticks.next().elapsed(), Duration::from_millis(350));
    }

    #[test]
    fn ticks_strictly_increase_on_a_stalled_clock() {
        let (clock, _mock) = quanta::Clock::mock();
        let mut ticks = TickClock::new(clock);

        let first = ticks.next();
        let second = ticks.next();
        let third = ticks.next();
        assert!(first < second);
        assert!(second < third);
    }

    #[test]
    fn tick_serializes_as_seconds() {
        let tick = Tick::from_elapsed(Duration::from_millis(1500));
        assert_eq!(serde_json::to_string(&tick).expect("serializable"), "1.5");
        assert_eq!(tick.to_string(), "1.500s");
    }
}
