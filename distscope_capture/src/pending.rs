//! Samples of one ingestion pass, grouped under a single tick.
//!
//! Every accepted sample of a pass shares the tick allocated for the first
//! one. A source reporting twice in the same pass keeps only its latest
//! readings. At flush the pending samples become a [`Row`] that covers every
//! active source, falling back to the last known value for sources that were
//! silent this pass.

use rustc_hash::FxHashMap;

use crate::{
    fill::FillCache,
    metric::{Metric, Readings, SourceId, Value},
    record::Sample,
    tick::Tick,
    window::Row,
};

#[derive(Debug, Clone)]
pub(crate) struct PendingTick {
    tick: Tick,
    samples: FxHashMap<SourceId, Readings>,
}

impl PendingTick {
    pub(crate) fn new(tick: Tick) -> Self {
        Self {
            tick,
            samples: FxHashMap::default(),
        }
    }

    pub(crate) fn tick(&self) -> Tick {
        self.tick
    }

    /// Number of distinct sources that reported this pass.
    pub(crate) fn sources(&self) -> usize {
        self.samples.len()
    }

    /// Record `sample`, returning `true` if it replaced an earlier sample
    /// from the same source.
    pub(crate) fn insert(&mut self, sample: Sample) -> bool {
        self.samples
            .insert(sample.source, sample.readings)
            .is_some()
    }

    /// Consume the pending samples, producing the row for `active` sources.
    pub(crate) fn into_row(
        self,
        slots: usize,
        active: impl Iterator<Item = SourceId>,
        cache: &FillCache,
    ) -> Row {
        let mut row = Row::new(self.tick, slots);
        for source in active {
            match self.samples.get(&source) {
                Some(readings) => {
                    for (metric, value) in readings.iter() {
                        row.set(metric, source, Value::Defined(value));
                    }
                }
                None => {
                    for metric in Metric::ALL {
                        row.set(metric, source, cache.lookup(metric, source));
                    }
                }
            }
        }
        row
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn sample(id: u8, v: f64) -> Sample {
        Sample {
            source: SourceId::new(id),
            readings: Readings::new([v, v + 0.1, v + 0.2, v + 0.3]),
        }
    }

    fn tick(ms: u64) -> Tick {
        Tick::from_elapsed(Duration::from_millis(ms))
    }

    #[test]
    fn last_write_wins_within_a_tick() {
        let mut pending = PendingTick::new(tick(100));
        assert!(!pending.insert(sample(0, 1.0)));
        assert!(pending.insert(sample(0, 2.0)));
        assert_eq!(pending.sources(), 1);

        let row = pending.into_row(4, [SourceId::new(0)].into_iter(), &FillCache::new(4));
        assert_eq!(row.tick(), tick(100));
        assert_eq!(row.get(Metric::Ifft, SourceId::new(0)), Value::Defined(2.0));
    }

    #[test]
    fn silent_sources_fall_back_to_cache() {
        let mut cache = FillCache::new(4);
        cache.update(Metric::Best, SourceId::new(1), 7.0);

        let mut pending = PendingTick::new(tick(200));
        pending.insert(sample(0, 1.0));
        let active = [SourceId::new(0), SourceId::new(1), SourceId::new(2)];
        let row = pending.into_row(4, active.into_iter(), &cache);

        assert_eq!(row.get(Metric::Ifft, SourceId::new(0)), Value::Defined(1.0));
        assert_eq!(row.get(Metric::Best, SourceId::new(1)), Value::Defined(7.0));
        assert_eq!(row.get(Metric::Ifft, SourceId::new(1)), Value::Undefined);
        assert_eq!(row.get(Metric::Rtt, SourceId::new(2)), Value::Undefined);
    }
}
