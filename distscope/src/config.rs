//! This module controls configuration parsing from the end user, providing a
//! convenience mechanism for the rest of the program. Crashes are most likely
//! to originate from this code, intentionally.

use std::{
    env, fs, io,
    net::SocketAddr,
    num::NonZeroUsize,
    path::{Path, PathBuf},
    time::Duration,
};

use rustc_hash::FxHashMap;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::{input, sink};

/// Environment variable holding the whole configuration as YAML. When set it
/// takes precedence over the configuration file.
pub const CONFIG_ENV: &str = "DISTSCOPE_CONFIG";

/// Errors produced by [`Config`]
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// Error for a serde [`serde_yaml`].
    #[error("Failed to deserialize yaml: {0}")]
    SerdeYaml(#[from] serde_yaml::Error),
    /// Error reading config file
    #[error("Failed to read config file {path:?}: {source}")]
    ReadFile {
        /// File path
        path: PathBuf,
        /// Underlying IO error
        #[source]
        source: Box<io::Error>,
    },
    /// The refresh interval is zero.
    #[error("refresh_interval_milliseconds must be greater than zero")]
    ZeroRefreshInterval,
    /// The maximum consecutive read errors is zero.
    #[error("max_consecutive_read_errors must be greater than zero")]
    ZeroReadErrors,
    /// The capture section is invalid.
    #[error("Invalid capture configuration: {0}")]
    Capture(#[from] distscope_capture::Error),
}

fn default_max_line_bytes() -> NonZeroUsize {
    NonZeroUsize::new(4096).unwrap_or(NonZeroUsize::MIN)
}

fn default_max_consecutive_read_errors() -> u32 {
    8
}

fn default_refresh_interval() -> u64 {
    100
}

/// Main configuration struct for this program
#[derive(Debug, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Where device lines are read from
    #[serde(with = "serde_yaml::with::singleton_map")]
    pub input: input::Config,
    /// Lines longer than this many bytes are discarded
    #[serde(default = "default_max_line_bytes")]
    pub max_line_bytes: NonZeroUsize,
    /// Transient read errors tolerated in a row before the input is
    /// considered failed
    #[serde(default = "default_max_consecutive_read_errors")]
    pub max_consecutive_read_errors: u32,
    /// The period on which buffered lines are ingested and published
    #[serde(default = "default_refresh_interval")]
    pub refresh_interval_milliseconds: u64,
    /// Rolling window configuration
    #[serde(default)]
    pub capture: distscope_capture::Config,
    /// The method by which to express telemetry
    pub telemetry: Option<Telemetry>,
    /// Consumers of snapshot tables
    #[serde(default = "sink::default_sinks")]
    #[serde(with = "serde_yaml::with::singleton_map_recursive")]
    pub sinks: Vec<sink::Config>,
}

#[derive(Debug, Deserialize, PartialEq, Eq, Clone)]
#[serde(untagged)]
/// Defines the manner of distscope's telemetry.
pub enum Telemetry {
    /// In prometheus mode distscope will emit its internal telemetry and the
    /// gauge sink for scraping at a prometheus poll endpoint.
    Prometheus {
        /// Address and port for prometheus exporter
        addr: SocketAddr,
        /// Additional labels to include in every metric
        #[serde(default)]
        global_labels: FxHashMap<String, String>,
    },
    /// In prometheus socket mode distscope will emit its internal telemetry
    /// for scraping on a unix socket.
    PrometheusSocket {
        /// Path of the socket for the prometheus exporter
        path: PathBuf,
        /// Additional labels to include in every metric
        #[serde(default)]
        global_labels: FxHashMap<String, String>,
    },
}

impl Telemetry {
    /// Labels applied to every exported metric.
    pub fn global_labels_mut(&mut self) -> &mut FxHashMap<String, String> {
        match self {
            Telemetry::Prometheus { global_labels, .. }
            | Telemetry::PrometheusSocket { global_labels, .. } => global_labels,
        }
    }
}

impl Config {
    /// The period between ingestion passes.
    #[must_use]
    pub fn refresh_interval(&self) -> Duration {
        Duration::from_millis(self.refresh_interval_milliseconds)
    }

    /// Check constraints that deserialization alone cannot express.
    ///
    /// # Errors
    ///
    /// Returns an error if the refresh interval or the read error budget is
    /// zero, or if the capture section is invalid.
    pub fn validate(&self) -> Result<(), Error> {
        if self.refresh_interval_milliseconds == 0 {
            return Err(Error::ZeroRefreshInterval);
        }
        if self.max_consecutive_read_errors == 0 {
            return Err(Error::ZeroReadErrors);
        }
        self.capture.validate()?;
        if self.telemetry.is_none() && self.sinks.contains(&sink::Config::Prometheus) {
            warn!("prometheus sink configured without telemetry, gauges will not be exported");
        }
        Ok(())
    }
}

/// Parse and validate a YAML configuration.
///
/// # Errors
///
/// Returns an error if `contents` is not a valid configuration.
pub fn parse(contents: &str) -> Result<Config, Error> {
    let config: Config = serde_yaml::from_str(contents)?;
    config.validate()?;
    Ok(config)
}

/// Load the configuration from [`CONFIG_ENV`] if set, else from `path`.
///
/// # Errors
///
/// Returns an error if the file cannot be read or the configuration is
/// invalid.
pub fn load(path: &Path) -> Result<Config, Error> {
    if let Ok(contents) = env::var(CONFIG_ENV) {
        debug!("Using config from env var '{CONFIG_ENV}'");
        return parse(&contents);
    }
    debug!("Attempting to open configuration file at: {}", path.display());
    let contents = fs::read_to_string(path).map_err(|source| Error::ReadFile {
        path: path.to_path_buf(),
        source: Box::new(source),
    })?;
    parse(&contents)
}
