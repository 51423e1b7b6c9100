//! Last known value per metric and antenna path.
//!
//! Antenna paths do not all report every tick. When a path is silent its
//! most recent observation is carried forward; this cache holds those
//! observations. It is a fixed table of `METRIC_COUNT * slots` cells, written
//! only when a record is ingested and never evicted.

use crate::metric::{METRIC_COUNT, Metric, Readings, SourceId, Value};

#[derive(Debug, Clone)]
pub(crate) struct FillCache {
    slots: usize,
    cells: Vec<Value>,
}

impl FillCache {
    pub(crate) fn new(slots: usize) -> Self {
        Self {
            slots,
            cells: vec![Value::Undefined; METRIC_COUNT * slots],
        }
    }

    #[inline]
    fn idx(&self, metric: Metric, source: SourceId) -> Option<usize> {
        let slot = source.slot();
        (slot < self.slots).then(|| metric.index() * self.slots + slot)
    }

    /// Overwrite the last known value for `metric` on `source`.
    ///
    /// Writes to a source outside the configured slots are ignored.
    pub(crate) fn update(&mut self, metric: Metric, source: SourceId, value: f64) {
        if let Some(idx) = self.idx(metric, source) {
            self.cells[idx] = Value::Defined(value);
        }
    }

    /// Overwrite the last known value of every metric for `source`.
    pub(crate) fn update_all(&mut self, source: SourceId, readings: &Readings) {
        for (metric, value) in readings.iter() {
            self.update(metric, source, value);
        }
    }

    pub(crate) fn lookup(&self, metric: Metric, source: SourceId) -> Value {
        self.idx(metric, source)
            .map_or(Value::Undefined, |idx| self.cells[idx])
    }
}
