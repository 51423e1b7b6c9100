//! Streaming capture of antenna path distance estimates
//!
//! This crate turns lines logged by a channel-sounding ranging device into
//! bounded, time-aligned rolling windows. [`Capture`] owns all state;
//! [`Table`]s are read-only views of it, one per metric.

#![deny(clippy::all)]
#![deny(clippy::perf)]
#![deny(clippy::suspicious)]
#![deny(clippy::complexity)]
#![deny(unused_extern_crates)]
#![deny(unused_allocation)]
#![deny(unused_assignments)]
#![deny(unused_comparisons)]
#![deny(unreachable_pub)]
#![deny(missing_docs)]
#![deny(missing_debug_implementations)]

pub mod accumulator;
mod fill;
pub mod metric;
mod pending;
pub mod record;
pub mod snapshot;
pub mod tick;
pub mod window;

pub use accumulator::{Capture, Config, Error, Ingest, Pass, PassSummary};
pub use metric::{Metric, Readings, SourceId, Value};
pub use record::{MatchMode, Parser, Sample};
pub use snapshot::{Column, Table};
pub use tick::Tick;
pub use window::Windows;
