use std::{num::NonZeroUsize, path::PathBuf, str::FromStr};

use clap::{Args, Parser, Subcommand};
use distscope::{
    config::{self, Config, Telemetry},
    server::{self, Server},
    signals::{Reason, Shutdown},
};
use jemallocator::Jemalloc;
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};
use once_cell::sync::Lazy;
use regex::Regex;
use tokio::{
    runtime::Builder,
    signal,
    time::{self, Duration},
};
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, util::SubscriberInitExt};

#[global_allocator]
static GLOBAL: Jemalloc = Jemalloc;

#[derive(thiserror::Error, Debug)]
enum Error {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("Distscope configuration is invalid: {0}")]
    Config(#[from] config::Error),
    #[error("Capture server returned an error: {0}")]
    Server(#[from] server::Error),
    #[error("Failed to install prometheus exporter: {0}")]
    Exporter(#[from] BuildError),
    #[error("Could not join the capture server task: {0}")]
    Join(#[from] tokio::task::JoinError),
}

fn default_config_path() -> String {
    "/etc/distscope/distscope.yaml".to_string()
}

/// Labels the `distance_estimate` gauge sets itself.
const RESERVED_LABELS: [&str; 2] = ["metric", "source"];

/// One `KEY=VALUE` label applied to every exported metric.
#[derive(Clone, Debug, PartialEq, Eq)]
struct GlobalLabel {
    key: String,
    value: String,
}

impl FromStr for GlobalLabel {
    type Err = String;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        static LABEL_NAME: Lazy<Regex> = Lazy::new(|| {
            Regex::new(r"^[a-zA-Z_][a-zA-Z0-9_]*$").expect("Invalid regex pattern provided")
        });

        let (key, value) = input
            .split_once('=')
            .ok_or_else(|| format!("expected KEY=VALUE, got {input:?}"))?;
        // Names starting with `__` are reserved by prometheus itself.
        if !LABEL_NAME.is_match(key) || key.starts_with("__") {
            return Err(format!("{key:?} is not a valid prometheus label name"));
        }
        if RESERVED_LABELS.contains(&key) {
            return Err(format!("{key:?} is set by distscope on distance_estimate"));
        }
        Ok(Self {
            key: key.to_string(),
            value: value.to_string(),
        })
    }
}

#[derive(Parser)]
#[clap(version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run distscope with specified configuration
    Run(RunCommand),
    /// Validate configuration file and exit
    ConfigCheck(ConfigCheckCommand),
}

#[derive(Args)]
struct RunCommand {
    /// path on disk to the configuration file
    #[clap(long, default_value_t = default_config_path())]
    config_path: String,
    /// number of ticks kept in every rolling window, overrides the
    /// configuration file
    #[clap(long)]
    capacity: Option<NonZeroUsize>,
    /// milliseconds between ingestion passes, overrides the configuration
    /// file
    #[clap(long)]
    refresh_interval_milliseconds: Option<u64>,
    /// additional label to apply to all exported metrics, may be repeated
    #[clap(long = "global-label", value_name = "KEY=VALUE")]
    global_labels: Vec<GlobalLabel>,
    /// the maximum time to wait, in seconds, for controlled shutdown
    #[clap(long, default_value_t = 5)]
    max_shutdown_delay: u16,
}

#[derive(Args)]
struct ConfigCheckCommand {
    /// path on disk to the configuration file
    #[clap(long, default_value_t = default_config_path())]
    config_path: String,
}

fn get_config(args: &RunCommand) -> Result<Config, Error> {
    let mut config = config::load(&PathBuf::from(&args.config_path)).inspect_err(|err| {
        error!("Configuration validation failed: {err}");
    })?;

    if let Some(capacity) = args.capacity {
        config.capture.capacity = capacity;
    }
    if let Some(refresh) = args.refresh_interval_milliseconds {
        config.refresh_interval_milliseconds = refresh;
    }
    match config.telemetry.as_mut() {
        Some(telemetry) => {
            for label in &args.global_labels {
                telemetry
                    .global_labels_mut()
                    .insert(label.key.clone(), label.value.clone());
            }
        }
        None if !args.global_labels.is_empty() => {
            warn!("--global-label given without telemetry configured, ignoring");
        }
        None => {}
    }
    config.validate()?;
    Ok(config)
}

fn install_telemetry(telemetry: Telemetry) -> Result<(), Error> {
    let (mut builder, global_labels) = match telemetry {
        Telemetry::Prometheus {
            addr,
            global_labels,
        } => (PrometheusBuilder::new().with_http_listener(addr), global_labels),
        Telemetry::PrometheusSocket {
            path,
            global_labels,
        } => (
            PrometheusBuilder::new().with_http_uds_listener(path),
            global_labels,
        ),
    };
    for (k, v) in global_labels {
        builder = builder.add_global_label(k, v);
    }
    builder.install()?;
    Ok(())
}

async fn inner_main(config: Config) -> Result<(), Error> {
    if let Some(telemetry) = config.telemetry.clone() {
        install_telemetry(telemetry)?;
    }

    let shutdown = Shutdown::new();
    let server = Server::new(&config, shutdown.clone())?;
    let mut server_task = tokio::spawn(server.run());

    let res = tokio::select! {
        _ = signal::ctrl_c() => {
            info!("received ctrl-c");
            Ok(())
        },
        res = &mut server_task => {
            match res? {
                Ok(()) => Ok(()),
                Err(err) => {
                    error!("Capture server shut down unexpectedly: {err}");
                    Err(Error::Server(err))
                }
            }
        }
    };

    if !server_task.is_finished() {
        if shutdown.signal(Reason::Interrupt) {
            info!("Signaled capture server to stop");
        }
        match time::timeout(Duration::from_secs(1), server_task).await {
            Ok(Ok(Ok(()))) => info!("Capture server shut down"),
            Ok(Ok(Err(err))) => error!("Capture server failed during shutdown: {err}"),
            Ok(Err(err)) => error!("Could not join the capture server task: {err}"),
            Err(_) => error!("Capture server did not stop in time"),
        }
    }
    res
}

fn main() -> Result<(), Error> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_ansi(false)
        .finish()
        .init();

    let version = env!("CARGO_PKG_VERSION");
    info!("Starting distscope {version} run.");

    let args = match Cli::parse().command {
        Commands::Run(args) => args,
        Commands::ConfigCheck(check) => {
            match config::load(&PathBuf::from(&check.config_path)) {
                Ok(_) => {
                    info!("Configuration file is valid");
                    std::process::exit(0)
                }
                Err(err) => {
                    error!("Configuration validation failed: {err}");
                    std::process::exit(1)
                }
            }
        }
    };

    let config = get_config(&args)?;
    let max_shutdown_delay = Duration::from_secs(args.max_shutdown_delay.into());

    let runtime = Builder::new_multi_thread()
        .enable_io()
        .enable_time()
        .build()?;
    let res = runtime.block_on(inner_main(config));
    info!(
        "Shutting down runtime with a {} second delay. May leave orphaned tasks.",
        max_shutdown_delay.as_secs(),
    );
    runtime.shutdown_timeout(max_shutdown_delay);
    info!("Bye. :)");
    res
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    #[test]
    fn global_label_parses_key_and_value() {
        let label = GlobalLabel::from_str("board=nrf5340").expect("valid label");
        assert_eq!(label.key, "board");
        assert_eq!(label.value, "nrf5340");
        let label = GlobalLabel::from_str("site=lab=two,b").expect("valid label");
        assert_eq!(label.value, "lab=two,b");
        let label = GlobalLabel::from_str("empty=").expect("valid label");
        assert_eq!(label.value, "");
    }

    #[test]
    fn global_label_rejects_invalid_names() {
        for bad in ["board", "=x", "1board=x", "bo-ard=x", "__name=x", "metric=x", "source=1"] {
            assert!(GlobalLabel::from_str(bad).is_err(), "accepted {bad:?}");
        }
    }

    #[test]
    fn cli_overrides_apply() {
        let tmp_dir = tempfile::tempdir().expect("directory could not be created");
        let path = tmp_dir.path().join("distscope.yaml");
        let mut file = std::fs::File::create(&path).expect("file created");
        file.write_all(b"input: stdin\ntelemetry:\n  addr: 127.0.0.1:9000\n")
            .expect("file written");

        let path = path.display().to_string();
        let cli = Cli::parse_from([
            "distscope",
            "run",
            "--config-path",
            path.as_str(),
            "--capacity",
            "20",
            "--refresh-interval-milliseconds",
            "250",
            "--global-label",
            "board=nrf5340",
            "--global-label",
            "site=lab_two",
        ]);
        let Commands::Run(args) = cli.command else {
            panic!("expected run subcommand");
        };
        let mut config = get_config(&args).expect("valid config");

        assert_eq!(config.capture.capacity.get(), 20);
        assert_eq!(config.refresh_interval(), Duration::from_millis(250));
        let labels = config
            .telemetry
            .as_mut()
            .expect("telemetry configured")
            .global_labels_mut();
        assert_eq!(labels.get("board").map(String::as_str), Some("nrf5340"));
        assert_eq!(labels.get("site").map(String::as_str), Some("lab_two"));
    }

    #[test]
    fn zero_refresh_override_is_rejected() {
        let tmp_dir = tempfile::tempdir().expect("directory could not be created");
        let path = tmp_dir.path().join("distscope.yaml");
        std::fs::write(&path, "input: stdin\n").expect("file written");

        let path = path.display().to_string();
        let cli = Cli::parse_from([
            "distscope",
            "run",
            "--config-path",
            path.as_str(),
            "--refresh-interval-milliseconds",
            "0",
        ]);
        let Commands::Run(args) = cli.command else {
            panic!("expected run subcommand");
        };
        assert!(matches!(
            get_config(&args),
            Err(Error::Config(config::Error::ZeroRefreshInterval))
        ));
    }
}
