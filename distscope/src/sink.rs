//! Consumers of capture snapshots
//!
//! After every pass that appends a row, the server hands one [`Table`] per
//! captured metric to each configured sink. Tables carry
//! [`distscope_capture::Value::Undefined`] for gaps; sinks treat those as
//! missing data, never as zero.

use serde::Deserialize;

use distscope_capture::Table;

pub mod log;
pub mod prometheus;

#[derive(thiserror::Error, Debug)]
/// Errors produced by [`Sink`] implementations
pub enum Error {
    /// Serializing a table failed.
    #[error("Failed to serialize table: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
#[serde(deny_unknown_fields)]
/// Configuration for a sink
pub enum Config {
    /// See [`crate::sink::log::Config`] for details.
    Log(log::Config),
    /// Export the latest value of every column as a gauge. See
    /// [`crate::sink::prometheus::Prometheus`].
    Prometheus,
}

/// A consumer of snapshot tables.
pub trait Sink: std::fmt::Debug + Send {
    /// Receive the tables of one flushed pass, in configured metric order.
    ///
    /// # Errors
    ///
    /// Returns an error if the sink cannot accept the tables. The server
    /// treats this as fatal.
    fn publish(&mut self, tables: &[Table]) -> Result<(), Error>;
}

/// Build the sink described by `config`.
#[must_use]
pub fn build(config: &Config) -> Box<dyn Sink> {
    match config {
        Config::Log(conf) => Box::new(log::Log::new(conf.clone())),
        Config::Prometheus => Box::new(prometheus::Prometheus),
    }
}

/// The sinks used when none are configured.
#[must_use]
pub fn default_sinks() -> Vec<Config> {
    vec![Config::Log(log::Config::default())]
}
