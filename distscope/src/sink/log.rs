//! Structured-log sink
//!
//! Emits one `info` event per metric every `every_passes` flushed passes. The
//! summary format reports the latest value of each antenna path; the json
//! format embeds the full table.

use std::num::NonZeroU32;

use serde::Deserialize;
use tracing::info;

use distscope_capture::Table;

use super::{Error, Sink};

fn default_every_passes() -> NonZeroU32 {
    NonZeroU32::new(10).unwrap_or(NonZeroU32::MIN)
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
/// Shape of the emitted event
pub enum Format {
    /// Latest value per antenna path, e.g. `0=1.5 1=undefined`.
    #[default]
    Summary,
    /// The whole table serialized as JSON.
    Json,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
/// Configuration for [`Log`]
pub struct Config {
    /// Emit on every n-th flushed pass.
    #[serde(default = "default_every_passes")]
    pub every_passes: NonZeroU32,
    /// Shape of the emitted event.
    #[serde(default)]
    pub format: Format,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            every_passes: default_every_passes(),
            format: Format::default(),
        }
    }
}

#[derive(Debug)]
/// The log sink.
pub struct Log {
    config: Config,
    passes: u64,
}

impl Log {
    /// Create a new [`Log`] sink
    #[must_use]
    pub fn new(config: Config) -> Self {
        Self { config, passes: 0 }
    }

    fn due(&mut self) -> bool {
        self.passes += 1;
        self.passes % u64::from(self.config.every_passes.get()) == 0
    }
}

impl Sink for Log {
    fn publish(&mut self, tables: &[Table]) -> Result<(), Error> {
        if !self.due() {
            return Ok(());
        }
        for table in tables {
            let tick = table
                .latest_tick()
                .map_or_else(|| "none".to_string(), |t| t.to_string());
            match self.config.format {
                Format::Summary => {
                    info!(
                        metric = %table.metric,
                        tick = %tick,
                        rows = table.len(),
                        latest = %latest_values(table),
                        "Distance estimates"
                    );
                }
                Format::Json => {
                    let json = serde_json::to_string(table)?;
                    info!(metric = %table.metric, tick = %tick, table = %json, "Distance estimates");
                }
            }
        }
        Ok(())
    }
}

/// Render `source=value` pairs of the latest row.
pub(crate) fn latest_values(table: &Table) -> String {
    table
        .columns
        .iter()
        .map(|column| format!("{}={}", column.source, column.latest()))
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use distscope_capture::{Column, Metric, SourceId, Tick, Value};

    use super::*;

    fn table() -> Table {
        Table {
            metric: Metric::Rtt,
            timestamps: vec![Tick::from_elapsed(Duration::from_millis(100))],
            columns: vec![
                Column {
                    source: SourceId::new(0),
                    values: vec![Value::Defined(1.5)],
                },
                Column {
                    source: SourceId::new(2),
                    values: vec![Value::Undefined],
                },
            ],
        }
    }

    #[test]
    fn latest_values_marks_gaps() {
        assert_eq!(latest_values(&table()), "0=1.5 2=undefined");
        let empty = Table {
            columns: Vec::new(),
            ..table()
        };
        assert_eq!(latest_values(&empty), "");
    }

    #[test]
    fn emits_every_nth_pass() {
        let mut sink = Log::new(Config {
            every_passes: NonZeroU32::new(3).expect("non-zero"),
            format: Format::Json,
        });
        let due: Vec<bool> = (0..6).map(|_| sink.due()).collect();
        assert_eq!(due, vec![false, false, true, false, false, true]);
        assert!(sink.publish(&[table()]).is_ok());
    }

    #[test]
    fn config_defaults() {
        let config: Config = serde_yaml::from_str("{}").expect("valid yaml");
        assert_eq!(config, Config::default());
        assert_eq!(config.every_passes.get(), 10);
        assert!(serde_yaml::from_str::<Config>("every_passes: 0").is_err());
        let config: Config = serde_yaml::from_str("format: json").expect("valid yaml");
        assert_eq!(config.format, Format::Json);
    }
}
