//! Time-aligned capture of distance estimate records
//!
//! The core structure is [`Capture`]. Callers drive it in *passes*: every
//! refresh interval they call [`Capture::begin_pass`], feed each line that
//! arrived since the previous pass to [`Pass::ingest_line`] and end the pass
//! with [`Pass::finish`]. A pass moves through two states:
//!
//! * Accumulating. The first accepted sample allocates a [`Tick`] from the
//!   capture's clock; later samples reuse it. A source that reports twice keeps
//!   only its latest readings. Every accepted sample also overwrites the
//!   last known value of its source.
//! * Flushed. If at least one sample was accepted, exactly one row is appended
//!   to the rolling windows. Sources silent this pass are filled from their
//!   last known value, or [`Value::Undefined`] if they never reported.
//!
//! A pass with no accepted sample has no effect on the windows. Dropping a
//! [`Pass`] without calling `finish` flushes it all the same.
//!
//! # Tick granularity
//!
//! Lines that arrive in the same pass share a tick even when the device
//! emitted them at different times. The time resolution of the windows is
//! therefore the refresh interval, not the device's own cadence.
//!
//! [`Value::Undefined`]: crate::Value::Undefined

use std::num::{NonZeroU8, NonZeroUsize};

use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use crate::{
    fill::FillCache,
    metric::{Metric, SourceId},
    pending::PendingTick,
    record::{MatchMode, Parser, Sample},
    snapshot::Table,
    tick::{Tick, TickClock},
    window::Windows,
};

const DEFAULT_CAPACITY: NonZeroUsize = NonZeroUsize::new(100).unwrap();
const DEFAULT_SOURCE_SLOTS: NonZeroU8 = NonZeroU8::new(4).unwrap();

/// Errors produced by [`Capture`] construction
#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// The metric list is empty
    #[error("At least one metric must be captured")]
    NoMetrics,
    /// A metric is listed more than once
    #[error("Metric {0} is listed more than once")]
    DuplicateMetric(Metric),
}

fn default_capacity() -> NonZeroUsize {
    DEFAULT_CAPACITY
}

fn default_metrics() -> Vec<Metric> {
    Metric::ALL.to_vec()
}

fn default_source_slots() -> NonZeroU8 {
    DEFAULT_SOURCE_SLOTS
}

/// Configuration of a [`Capture`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Number of ticks retained in every rolling window.
    #[serde(default = "default_capacity")]
    pub capacity: NonZeroUsize,
    /// Metrics to capture, in display order.
    #[serde(default = "default_metrics")]
    pub metrics: Vec<Metric>,
    /// Number of antenna paths accepted. Records from a path numbered at or
    /// above this are rejected.
    #[serde(default = "default_source_slots")]
    pub source_slots: NonZeroU8,
    /// How much of a line a record must occupy.
    #[serde(default)]
    pub record_match: MatchMode,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            capacity: default_capacity(),
            metrics: default_metrics(),
            source_slots: default_source_slots(),
            record_match: MatchMode::default(),
        }
    }
}

impl Config {
    /// Check that this configuration can build a [`Capture`].
    ///
    /// # Errors
    ///
    /// Returns an error if the metric list is empty or repeats a metric.
    pub fn validate(&self) -> Result<(), Error> {
        if self.metrics.is_empty() {
            return Err(Error::NoMetrics);
        }
        for (idx, metric) in self.metrics.iter().enumerate() {
            if self.metrics[..idx].contains(metric) {
                return Err(Error::DuplicateMetric(*metric));
            }
        }
        Ok(())
    }
}

/// Outcome of ingesting one line or sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ingest {
    /// The line was a record and its sample joined the pass.
    Accepted,
    /// The line was not a record.
    Unmatched,
    /// The record named an antenna path outside the configured slots.
    Rejected,
}

/// Counts describing one finished pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PassSummary {
    /// The tick of the appended row, `None` if nothing was flushed.
    pub tick: Option<Tick>,
    /// Samples accepted.
    pub accepted: u64,
    /// Lines that were not records.
    pub unmatched: u64,
    /// Records rejected for naming an unknown antenna path.
    pub rejected: u64,
    /// Lines lost to read or decode failures.
    pub read_errors: u64,
    /// Antenna paths that became active during the pass.
    pub activated: u64,
}

impl PassSummary {
    /// Whether the pass appended a row.
    #[must_use]
    pub fn flushed(&self) -> bool {
        self.tick.is_some()
    }
}

/// Rolling, time-aligned history of distance estimates
#[derive(Debug)]
pub struct Capture {
    parser: Parser,
    ticks: TickClock,
    cache: FillCache,
    windows: Windows,
}

impl Capture {
    /// Create a new [`Capture`] timed by the system monotonic clock.
    ///
    /// # Errors
    ///
    /// Returns an error if `config` is invalid.
    pub fn new(config: &Config) -> Result<Self, Error> {
        Self::with_clock(config, quanta::Clock::new())
    }

    /// Create a new [`Capture`] timed by `clock`.
    ///
    /// # Errors
    ///
    /// Returns an error if `config` is invalid.
    pub fn with_clock(config: &Config, clock: quanta::Clock) -> Result<Self, Error> {
        config.validate()?;
        let slots = usize::from(config.source_slots.get());
        Ok(Self {
            parser: Parser::new(config.record_match),
            ticks: TickClock::new(clock),
            cache: FillCache::new(slots),
            windows: Windows::new(config.capacity, &config.metrics, slots),
        })
    }

    /// Start an ingestion pass.
    pub fn begin_pass(&mut self) -> Pass<'_> {
        Pass {
            capture: self,
            pending: None,
            summary: PassSummary::default(),
        }
    }

    /// The rolling windows, for read-only inspection.
    #[must_use]
    pub fn windows(&self) -> &Windows {
        &self.windows
    }

    /// The parser applied to ingested lines.
    #[must_use]
    pub fn parser(&self) -> Parser {
        self.parser
    }

    /// Active antenna paths in ascending order.
    pub fn active_sources(&self) -> impl Iterator<Item = SourceId> + '_ {
        self.windows.active_sources()
    }

    /// The table of `metric`, or `None` if it is not captured.
    #[must_use]
    pub fn snapshot(&self, metric: Metric) -> Option<Table> {
        Table::build(&self.windows, metric)
    }

    /// One table per captured metric, in configured order.
    #[must_use]
    pub fn snapshots(&self) -> Vec<Table> {
        self.windows
            .metrics()
            .iter()
            .filter_map(|metric| Table::build(&self.windows, *metric))
            .collect()
    }
}

/// One ingestion pass over a [`Capture`]
///
/// The pending tick lives inside the pass and cannot outlive it.
#[derive(Debug)]
pub struct Pass<'a> {
    capture: &'a mut Capture,
    pending: Option<PendingTick>,
    summary: PassSummary,
}

impl Pass<'_> {
    /// Parse `line` and ingest the sample it carries, if any.
    pub fn ingest_line(&mut self, line: &str) -> Ingest {
        match self.capture.parser.parse(line) {
            Some(sample) => self.ingest(sample),
            None => {
                trace!(line, "Unmatched line");
                self.summary.unmatched += 1;
                Ingest::Unmatched
            }
        }
    }

    /// Ingest an already parsed sample.
    pub fn ingest(&mut self, sample: Sample) -> Ingest {
        let source = sample.source;
        let windows = &mut self.capture.windows;
        if source.slot() >= windows.slots() {
            debug!(
                %source,
                slots = windows.slots(),
                "Rejected sample from antenna path outside configured slots"
            );
            self.summary.rejected += 1;
            return Ingest::Rejected;
        }
        if windows.activate(source) {
            debug!(%source, backfill = windows.len(), "Antenna path activated");
            self.summary.activated += 1;
        }

        self.capture.cache.update_all(source, &sample.readings);
        let ticks = &mut self.capture.ticks;
        let pending = self
            .pending
            .get_or_insert_with(|| PendingTick::new(ticks.next()));
        if pending.insert(sample) {
            trace!(%source, tick = %pending.tick(), "Sample replaced earlier sample in tick");
        }
        self.summary.accepted += 1;
        Ingest::Accepted
    }

    /// Count a line lost to a read or decode failure.
    pub fn record_read_error(&mut self) {
        self.summary.read_errors += 1;
    }

    /// Counts so far in this pass.
    #[must_use]
    pub fn summary(&self) -> PassSummary {
        self.summary
    }

    /// End the pass, appending its row if any sample was accepted.
    #[must_use]
    pub fn finish(mut self) -> PassSummary {
        self.summary.tick = self.flush();
        self.summary
    }

    fn flush(&mut self) -> Option<Tick> {
        let pending = self.pending.take()?;
        let sources = pending.sources();
        let capture = &mut *self.capture;
        let row = pending.into_row(
            capture.windows.slots(),
            capture.windows.active_sources(),
            &capture.cache,
        );
        capture.windows.append(&row);
        debug!(tick = %row.tick(), sources, retained = capture.windows.len(), "Flushed pass");
        Some(row.tick())
    }
}

impl Drop for Pass<'_> {
    fn drop(&mut self) {
        self.flush();
    }
}
