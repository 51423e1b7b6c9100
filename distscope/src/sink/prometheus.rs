//! Gauge sink
//!
//! ## Metrics
//!
//! `distance_estimate`: Latest defined value, labeled by `metric` and `source`
//!

use metrics::gauge;

use distscope_capture::Table;

use super::{Error, Sink};

#[derive(Debug, Clone, Copy, Default)]
/// Sets the `distance_estimate` gauge from the latest row of every table.
///
/// A gap leaves the gauge at its previous value. Without an installed
/// exporter this sink is a no-op.
pub struct Prometheus;

impl Sink for Prometheus {
    fn publish(&mut self, tables: &[Table]) -> Result<(), Error> {
        for table in tables {
            for column in &table.columns {
                if let Some(value) = column.latest().get() {
                    gauge!(
                        "distance_estimate",
                        "metric" => table.metric.name(),
                        "source" => column.source.to_string()
                    )
                    .set(value);
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use distscope_capture::{Column, Metric, SourceId, Tick, Value};
    use metrics_exporter_prometheus::PrometheusBuilder;

    use super::*;

    #[test]
    fn latest_defined_values_become_gauges() {
        let table = Table {
            metric: Metric::PhaseSlope,
            timestamps: vec![
                Tick::from_elapsed(Duration::from_millis(100)),
                Tick::from_elapsed(Duration::from_millis(200)),
            ],
            columns: vec![
                Column {
                    source: SourceId::new(1),
                    values: vec![Value::Defined(2.0), Value::Defined(3.25)],
                },
                Column {
                    source: SourceId::new(3),
                    values: vec![Value::Undefined, Value::Undefined],
                },
            ],
        };

        let recorder = PrometheusBuilder::new().build_recorder();
        let handle = recorder.handle();
        metrics::with_local_recorder(&recorder, || {
            Prometheus.publish(&[table]).expect("publish succeeds");
        });

        let rendered = handle.render();
        let line = rendered
            .lines()
            .find(|l| l.starts_with("distance_estimate{"))
            .expect("gauge rendered");
        assert!(line.contains(r#"metric="phase_slope""#), "{line}");
        assert!(line.contains(r#"source="1""#), "{line}");
        assert!(line.ends_with(" 3.25"), "{line}");
        assert!(!rendered.contains(r#"source="3""#), "{rendered}");
    }
}
