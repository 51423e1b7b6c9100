//! Rolling windows kept in lockstep
//!
//! [`Windows`] holds one bounded sequence per (metric, antenna path) pair and
//! one shared sequence of [`Tick`]s. All sequences share a single capacity.
//! The only data mutator is `append`, which pushes one row to every
//! sequence of every active antenna path and, once capacity is exceeded, drops
//! the oldest element of every sequence together. The central invariant is
//! therefore:
//!
//! * for every configured metric `m` and active source `s`,
//!   `series(m, s).len() == timestamps().len()`
//!
//! An antenna path activated after the windows hold data starts with a
//! sequence back-filled with [`Value::Undefined`] up to the current length.

use std::{collections::VecDeque, num::NonZeroUsize};

use crate::{
    metric::{METRIC_COUNT, Metric, SourceId, Value},
    tick::Tick,
};

/// One tick's worth of filled values, for every metric and source slot.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Row {
    tick: Tick,
    slots: usize,
    cells: Vec<Value>,
}

impl Row {
    pub(crate) fn new(tick: Tick, slots: usize) -> Self {
        Self {
            tick,
            slots,
            cells: vec![Value::Undefined; METRIC_COUNT * slots],
        }
    }

    pub(crate) fn tick(&self) -> Tick {
        self.tick
    }

    pub(crate) fn set(&mut self, metric: Metric, source: SourceId, value: Value) {
        let slot = source.slot();
        if slot < self.slots {
            self.cells[metric.index() * self.slots + slot] = value;
        }
    }

    pub(crate) fn get(&self, metric: Metric, source: SourceId) -> Value {
        let slot = source.slot();
        if slot < self.slots {
            self.cells[metric.index() * self.slots + slot]
        } else {
            Value::Undefined
        }
    }
}

/// Capacity-bounded, time-aligned history of every metric and antenna path.
#[derive(Debug, Clone)]
pub struct Windows {
    capacity: usize,
    metrics: Vec<Metric>,
    timestamps: VecDeque<Tick>,
    // Indexed by position in `metrics`, then by source slot. `None` until the
    // slot's antenna path is first observed.
    series: Vec<Vec<Option<VecDeque<Value>>>>,
}

impl Windows {
    /// Create empty windows of `capacity` for `metrics` over `slots` antenna
    /// paths.
    #[must_use]
    pub fn new(capacity: NonZeroUsize, metrics: &[Metric], slots: usize) -> Self {
        Self {
            capacity: capacity.get(),
            metrics: metrics.to_vec(),
            timestamps: VecDeque::with_capacity(capacity.get() + 1),
            series: metrics.iter().map(|_| vec![None; slots]).collect(),
        }
    }

    /// Maximum number of ticks retained.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of ticks currently retained.
    #[must_use]
    pub fn len(&self) -> usize {
        self.timestamps.len()
    }

    /// Whether no tick has been retained yet.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.timestamps.is_empty()
    }

    /// The metrics tracked, in configured order.
    #[must_use]
    pub fn metrics(&self) -> &[Metric] {
        &self.metrics
    }

    /// The shared timestamp sequence, oldest first.
    #[must_use]
    pub fn timestamps(&self) -> &VecDeque<Tick> {
        &self.timestamps
    }

    /// Number of source slots.
    #[must_use]
    pub fn slots(&self) -> usize {
        self.series.first().map_or(0, Vec::len)
    }

    /// Whether `source` has been observed.
    #[must_use]
    pub fn is_active(&self, source: SourceId) -> bool {
        self.series
            .first()
            .and_then(|per_source| per_source.get(source.slot()))
            .is_some_and(Option::is_some)
    }

    /// Active antenna paths in ascending order.
    pub fn active_sources(&self) -> impl Iterator<Item = SourceId> + '_ {
        self.series
            .first()
            .into_iter()
            .flat_map(|per_source| per_source.iter().enumerate())
            .filter(|(_, series)| series.is_some())
            .filter_map(|(slot, _)| u8::try_from(slot).ok().map(SourceId::new))
    }

    /// The sequence for `metric` on `source`, oldest first, or `None` if the
    /// metric is not tracked or the source is not active.
    #[must_use]
    pub fn series(&self, metric: Metric, source: SourceId) -> Option<&VecDeque<Value>> {
        let pos = self.position(metric)?;
        self.series[pos].get(source.slot())?.as_ref()
    }

    fn position(&self, metric: Metric) -> Option<usize> {
        self.metrics.iter().position(|m| *m == metric)
    }

    /// Mark `source` active, back-filling its sequences with
    /// [`Value::Undefined`] to the current length.
    ///
    /// Returns `true` if the source was not active before. A source outside
    /// the configured slots is never activated.
    pub(crate) fn activate(&mut self, source: SourceId) -> bool {
        let slot = source.slot();
        if slot >= self.slots() || self.is_active(source) {
            return false;
        }
        let len = self.timestamps.len();
        for per_source in &mut self.series {
            let mut series = VecDeque::with_capacity(self.capacity + 1);
            series.resize(len, Value::Undefined);
            per_source[slot] = Some(series);
        }
        true
    }

    /// Push `row` onto every sequence, evicting the oldest element everywhere
    /// once capacity is exceeded.
    pub(crate) fn append(&mut self, row: &Row) {
        self.timestamps.push_back(row.tick());
        let evict = self.timestamps.len() > self.capacity;
        if evict {
            self.timestamps.pop_front();
        }

        for (metric, per_source) in self.metrics.iter().zip(self.series.iter_mut()) {
            for (slot, series) in per_source.iter_mut().enumerate() {
                let Some(series) = series else { continue };
                let Ok(id) = u8::try_from(slot) else { continue };
                series.push_back(row.get(*metric, SourceId::new(id)));
                if evict {
                    series.pop_front();
                }
            }
        }

        debug_assert!(self.is_lockstep(), "rolling windows out of lockstep");
    }

    /// Whether every active sequence has the timestamp sequence's length.
    #[must_use]
    pub fn is_lockstep(&self) -> bool {
        let len = self.timestamps.len();
        self.series
            .iter()
            .flatten()
            .flatten()
            .all(|series| series.len() == len)
    }

    #[cfg(test)]
    pub(crate) fn series_mut(
        &mut self,
        metric: Metric,
        source: SourceId,
    ) -> Option<&mut VecDeque<Value>> {
        let pos = self.position(metric)?;
        self.series[pos].get_mut(source.slot())?.as_mut()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::time::Duration;

    fn capacity(c: usize) -> NonZeroUsize {
        NonZeroUsize::new(c).expect("non-zero capacity")
    }

    fn row(tick_ms: u64, slots: usize, values: &[(u8, f64)]) -> Row {
        let mut row = Row::new(Tick::from_elapsed(Duration::from_millis(tick_ms)), slots);
        for (id, v) in values {
            for metric in Metric::ALL {
                row.set(metric, SourceId::new(*id), Value::Defined(*v));
            }
        }
        row
    }

    #[test]
    fn new_windows_are_empty() {
        let windows = Windows::new(capacity(3), &Metric::ALL, 4);
        assert!(windows.is_empty());
        assert_eq!(windows.capacity(), 3);
        assert_eq!(windows.slots(), 4);
        assert_eq!(windows.active_sources().count(), 0);
        assert!(windows.is_lockstep());
    }

    #[test]
    fn append_pushes_every_active_source() {
        let mut windows = Windows::new(capacity(3), &Metric::ALL, 4);
        windows.activate(SourceId::new(0));
        windows.activate(SourceId::new(2));
        windows.append(&row(100, 4, &[(0, 1.0)]));

        assert_eq!(windows.len(), 1);
        let s0 = windows.series(Metric::Ifft, SourceId::new(0)).expect("active");
        let s2 = windows.series(Metric::Ifft, SourceId::new(2)).expect("active");
        assert_eq!(s0.back(), Some(&Value::Defined(1.0)));
        assert_eq!(s2.back(), Some(&Value::Undefined));
        assert_eq!(windows.series(Metric::Ifft, SourceId::new(1)), None);
    }

    #[test]
    fn eviction_is_synchronized() {
        let mut windows = Windows::new(capacity(2), &Metric::ALL, 2);
        windows.activate(SourceId::new(0));
        windows.activate(SourceId::new(1));
        for t in 1..=5 {
            windows.append(&row(t * 100, 2, &[(0, t as f64), (1, -(t as f64))]));
            assert!(windows.is_lockstep());
        }

        assert_eq!(windows.len(), 2);
        let ticks: Vec<u128> = windows
            .timestamps()
            .iter()
            .map(|t| t.elapsed().as_millis())
            .collect();
        assert_eq!(ticks, vec![400, 500]);
        let s1: Vec<Value> = windows
            .series(Metric::Best, SourceId::new(1))
            .expect("active")
            .iter()
            .copied()
            .collect();
        assert_eq!(s1, vec![Value::Defined(-4.0), Value::Defined(-5.0)]);
    }

    #[test]
    fn late_source_is_back_filled() {
        let mut windows = Windows::new(capacity(5), &Metric::ALL, 4);
        windows.activate(SourceId::new(0));
        windows.append(&row(100, 4, &[(0, 1.0)]));
        windows.append(&row(200, 4, &[(0, 2.0)]));

        assert!(windows.activate(SourceId::new(3)));
        assert!(windows.is_lockstep());
        windows.append(&row(300, 4, &[(0, 3.0), (3, 9.0)]));

        let s3: Vec<Value> = windows
            .series(Metric::Rtt, SourceId::new(3))
            .expect("active")
            .iter()
            .copied()
            .collect();
        assert_eq!(s3, vec![Value::Undefined, Value::Undefined, Value::Defined(9.0)]);
    }

    #[test]
    fn activation_is_idempotent_and_bounded() {
        let mut windows = Windows::new(capacity(5), &Metric::ALL, 2);
        assert!(windows.activate(SourceId::new(1)));
        assert!(!windows.activate(SourceId::new(1)));
        assert!(!windows.activate(SourceId::new(2)));
        let active: Vec<SourceId> = windows.active_sources().collect();
        assert_eq!(active, vec![SourceId::new(1)]);
    }

    #[test]
    fn untracked_metrics_have_no_series() {
        let mut windows = Windows::new(capacity(5), &[Metric::Best], 2);
        windows.activate(SourceId::new(0));
        windows.append(&row(100, 2, &[(0, 1.0)]));
        assert!(windows.series(Metric::Best, SourceId::new(0)).is_some());
        assert!(windows.series(Metric::Ifft, SourceId::new(0)).is_none());
    }

    #[derive(Debug, Clone)]
    enum Op {
        Activate(u8),
        Append(Vec<u8>),
    }

    fn op() -> impl Strategy<Value = Op> {
        prop_oneof![
            (0u8..6).prop_map(Op::Activate),
            prop::collection::vec(0u8..6, 0..4).prop_map(Op::Append),
        ]
    }

    proptest! {
        #[test]
        fn prop_windows_stay_in_lockstep(
            cap in 1usize..8,
            ops in prop::collection::vec(op(), 0..64),
        ) {
            let slots = 4;
            let mut windows = Windows::new(capacity(cap), &Metric::ALL, slots);
            let mut appends = 0usize;
            for (t, op) in ops.into_iter().enumerate() {
                match op {
                    Op::Activate(id) => { windows.activate(SourceId::new(id)); }
                    Op::Append(ids) => {
                        let values: Vec<(u8, f64)> = ids.iter().map(|id| (*id, f64::from(*id))).collect();
                        windows.append(&row(t as u64, slots, &values));
                        appends += 1;
                    }
                }
                prop_assert!(windows.is_lockstep());
                prop_assert_eq!(windows.len(), appends.min(cap));
                for source in windows.active_sources() {
                    for metric in Metric::ALL {
                        let series = windows.series(metric, source);
                        prop_assert_eq!(series.map(VecDeque::len), Some(windows.len()));
                    }
                }
            }
        }
    }
}
