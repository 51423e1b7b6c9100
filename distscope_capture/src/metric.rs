//! The closed set of metrics, antenna path identifiers and the values kept
//! for them.
//!
//! Every record a device emits carries exactly [`METRIC_COUNT`] distance
//! estimates, one per [`Metric`]. A value stored in a rolling window is a
//! [`Value`]: either a real observation or [`Value::Undefined`] for ticks
//! where no observation has ever been made for that antenna path. Undefined
//! is a distinct variant rather than a NaN so that equality behaves and
//! consumers can ask [`Value::is_defined`] instead of guessing.

use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize, Serializer};

/// Number of metrics carried by every record.
pub const METRIC_COUNT: usize = 4;

/// Errors produced when converting text into a [`Metric`]
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// The name is not one of the known metrics
    #[error("Unknown metric name: {0}")]
    UnknownMetric(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
/// The distance estimates reported for each antenna path.
pub enum Metric {
    /// Estimate derived from the inverse FFT of the channel response.
    Ifft,
    /// Estimate derived from the phase slope across channels.
    PhaseSlope,
    /// Estimate derived from round trip time.
    Rtt,
    /// The estimate the device considers best.
    Best,
}

impl Metric {
    /// All metrics, in the order they appear in a record.
    pub const ALL: [Metric; METRIC_COUNT] =
        [Metric::Ifft, Metric::PhaseSlope, Metric::Rtt, Metric::Best];

    /// Position of this metric within a record.
    #[must_use]
    pub const fn index(self) -> usize {
        match self {
            Metric::Ifft => 0,
            Metric::PhaseSlope => 1,
            Metric::Rtt => 2,
            Metric::Best => 3,
        }
    }

    /// Field name of this metric as it appears in a record.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Metric::Ifft => "ifft",
            Metric::PhaseSlope => "phase_slope",
            Metric::Rtt => "rtt",
            Metric::Best => "best",
        }
    }
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Metric {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Metric::ALL
            .into_iter()
            .find(|m| m.name() == s)
            .ok_or_else(|| Error::UnknownMetric(s.to_string()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
/// Identifier of an antenna path, the logical source of a record.
pub struct SourceId(u8);

impl SourceId {
    /// Create a new [`SourceId`]
    #[must_use]
    pub const fn new(id: u8) -> Self {
        Self(id)
    }

    /// The raw identifier.
    #[must_use]
    pub const fn get(self) -> u8 {
        self.0
    }

    pub(crate) const fn slot(self) -> usize {
        self.0 as usize
    }
}

impl From<u8> for SourceId {
    fn from(id: u8) -> Self {
        Self(id)
    }
}

impl fmt::Display for SourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A single cell of a rolling window.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum Value {
    /// No observation has been made for this metric and source yet.
    #[default]
    Undefined,
    /// An observed or forward-filled measurement.
    Defined(f64),
}

impl Value {
    /// Whether this cell holds a measurement.
    #[must_use]
    pub const fn is_defined(&self) -> bool {
        matches!(self, Value::Defined(_))
    }

    /// The measurement, if any.
    #[must_use]
    pub const fn get(&self) -> Option<f64> {
        match self {
            Value::Undefined => None,
            Value::Defined(v) => Some(*v),
        }
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Defined(v)
    }
}

impl From<Option<f64>> for Value {
    fn from(v: Option<f64>) -> Self {
        v.map_or(Value::Undefined, Value::Defined)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Undefined => f.write_str("undefined"),
            Value::Defined(v) => write!(f, "{v}"),
        }
    }
}

// Undefined cells serialize as `null` so that downstream consumers see a gap.
impl Serialize for Value {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        self.get().serialize(serializer)
    }
}

/// The four distance estimates of one record, indexed by [`Metric`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Readings([f64; METRIC_COUNT]);

impl Readings {
    /// Create a new [`Readings`] from values in record order.
    #[must_use]
    pub const fn new(values: [f64; METRIC_COUNT]) -> Self {
        Self(values)
    }

    /// The reading for `metric`.
    #[must_use]
    pub const fn get(&self, metric: Metric) -> f64 {
        self.0[metric.index()]
    }

    /// Iterate readings paired with their metric, in record order.
    pub fn iter(&self) -> impl Iterator<Item = (Metric, f64)> + '_ {
        Metric::ALL.into_iter().map(|m| (m, self.get(m)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metric_names_parse_back() {
        for metric in Metric::ALL {
            assert_eq!(metric.name().parse::<Metric>(), Ok(metric));
            assert_eq!(metric.to_string(), metric.name());
        }
    }

    #[test]
    fn metric_index_matches_record_order() {
        for (idx, metric) in Metric::ALL.into_iter().enumerate() {
            assert_eq!(metric.index(), idx);
        }
    }

    #[test]
    fn metric_names_are_case_sensitive() {
        assert_eq!(
            "IFFT".parse::<Metric>(),
            Err(Error::UnknownMetric("IFFT".to_string()))
        );
        assert!("phase-slope".parse::<Metric>().is_err());
    }

    #[test]
    fn metric_deserializes_from_snake_case() {
        let metrics: Vec<Metric> =
            serde_yaml::from_str("[ifft, phase_slope, rtt, best]").expect("valid yaml");
        assert_eq!(metrics, Metric::ALL.to_vec());
    }

    #[test]
    fn value_defaults_to_undefined() {
        assert_eq!(Value::default(), Value::Undefined);
        assert!(!Value::default().is_defined());
        assert!(Value::from(0.0).is_defined());
        assert_eq!(Value::from(None), Value::Undefined);
        assert_eq!(Value::from(Some(2.5)).get(), Some(2.5));
    }

    #[test]
    fn value_serializes_gap_as_null() {
        let cells = vec![Value::Defined(1.5), Value::Undefined];
        let json = serde_json::to_string(&cells).expect("serializable");
        assert_eq!(json, "[1.5,null]");
    }

    #[test]
    fn readings_index_by_metric() {
        let readings = Readings::new([1.0, 2.0, 3.0, 4.0]);
        assert_eq!(readings.get(Metric::Ifft), 1.0);
        assert_eq!(readings.get(Metric::PhaseSlope), 2.0);
        assert_eq!(readings.get(Metric::Rtt), 3.0);
        assert_eq!(readings.get(Metric::Best), 4.0);
        let collected: Vec<(Metric, f64)> = readings.iter().collect();
        assert_eq!(collected.len(), METRIC_COUNT);
    }
}
