//! Rectangular, per-metric views of the rolling windows.

use std::collections::VecDeque;

use serde::Serialize;
use tracing::warn;

use crate::{
    metric::{Metric, SourceId, Value},
    tick::Tick,
    window::Windows,
};

/// One antenna path's column of a [`Table`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Column {
    /// The antenna path.
    pub source: SourceId,
    /// Values aligned with [`Table::timestamps`], oldest first.
    pub values: Vec<Value>,
}

impl Column {
    /// The most recent value of this column, [`Value::Undefined`] if empty.
    #[must_use]
    pub fn latest(&self) -> Value {
        self.values.last().copied().unwrap_or_default()
    }
}

/// A timestamp column plus one column per active antenna path, all of equal
/// length.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Table {
    /// The metric this table holds.
    pub metric: Metric,
    /// Tick of every row, oldest first.
    pub timestamps: Vec<Tick>,
    /// One column per active antenna path, ordered by source id.
    pub columns: Vec<Column>,
}

impl Table {
    /// Number of rows.
    #[must_use]
    pub fn len(&self) -> usize {
        self.timestamps.len()
    }

    /// Whether the table has no rows.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.timestamps.is_empty()
    }

    /// Tick of the most recent row.
    #[must_use]
    pub fn latest_tick(&self) -> Option<Tick> {
        self.timestamps.last().copied()
    }

    /// Column of `source`, if that antenna path is active.
    #[must_use]
    pub fn column(&self, source: SourceId) -> Option<&Column> {
        self.columns.iter().find(|c| c.source == source)
    }

    /// Build the table of `metric` from `windows`, or `None` if the metric is
    /// not tracked.
    pub(crate) fn build(windows: &Windows, metric: Metric) -> Option<Self> {
        if !windows.metrics().contains(&metric) {
            return None;
        }
        let timestamps: Vec<Tick> = windows.timestamps().iter().copied().collect();
        let len = timestamps.len();
        let columns = windows
            .active_sources()
            .filter_map(|source| {
                let series = windows.series(metric, source)?;
                Some(Column {
                    source,
                    values: fit(metric, source, series, len),
                })
            })
            .collect();

        Some(Self {
            metric,
            timestamps,
            columns,
        })
    }
}

/// Copy `series` into a column of exactly `len` values, padding the tail with
/// [`Value::Undefined`] or truncating it.
fn fit(metric: Metric, source: SourceId, series: &VecDeque<Value>, len: usize) -> Vec<Value> {
    if series.len() != len {
        warn!(
            %metric,
            %source,
            expected = len,
            actual = series.len(),
            "Window length does not match timestamps, fitting column"
        );
    }
    let mut values: Vec<Value> = series.iter().take(len).copied().collect();
    values.resize(len, Value::Undefined);
    values
}
