//! SensorCast — entry point.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::Shell;
use tokio::sync::mpsc;

use sensorcast::{ForecastSettings, SensorType};
use sensorcast_server::config::{resolve_addr, resolve_data_dir};
use sensorcast_server::transport::{feed, http, AppState, StdioFeed};
use sensorcast_server::{
    EventBus, ForecastPipeline, PipelineEvent, PublishContext, RawCaptureLog, ReplayPublisher,
};

#[derive(Parser)]
#[command(
    name = "sensorcast",
    about = "Sensor feed ingestion with rolling polynomial forecasts",
    version
)]
struct Cli {
    /// Directory holding history, forecast and capture documents.
    #[arg(long, global = true)]
    data_dir: Option<String>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    /// Emit logs as JSON lines.
    #[arg(long, global = true)]
    log_json: bool,

    /// Polynomial degree of the regression (1 to 8).
    #[arg(
        long,
        global = true,
        value_parser = clap::builder::RangedU64ValueParser::<usize>::new()
            .range(1..=sensorcast::MAX_DEGREE as u64)
    )]
    degree: Option<usize>,

    /// Number of 10-minute candidate steps in the forecast horizon.
    #[arg(long, global = true)]
    horizon_steps: Option<usize>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP API and feed consumer (default).
    Serve {
        /// Listen address (host:port). Also reads SENSORCAST_ADDR.
        #[arg(long)]
        addr: Option<String>,

        /// Read newline-delimited feed payloads from stdin.
        #[arg(long)]
        stdin_feed: bool,

        /// Replay recorded feed items from this file on the publication cadence.
        #[arg(long)]
        replay: Option<PathBuf>,
    },

    /// Ingest a feed payload file (array or single object) and exit.
    Ingest {
        /// Path to a JSON payload.
        file: PathBuf,
    },

    /// Print the reconciled forecast table for a sensor type.
    Predictions {
        /// Sensor type (temperature, humidity, pressure).
        sensor: SensorType,
    },

    /// Print the raw reading history for a sensor type.
    History {
        /// Sensor type (temperature, humidity, pressure).
        sensor: SensorType,
    },

    /// Replay recorded feed items into the pipeline without the HTTP API.
    Publish {
        /// JSON array of feed items.
        file: PathBuf,
    },

    /// Generate shell completion scripts.
    ///
    /// Examples:
    ///   sensorcast completions bash > ~/.local/share/bash-completion/completions/sensorcast
    ///   sensorcast completions zsh > ~/.zfunc/_sensorcast
    Completions {
        /// Shell type (bash, zsh, fish, powershell, elvish).
        shell: Shell,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(&cli.log_level, cli.log_json);

    let mut settings = ForecastSettings::default();
    if let Some(degree) = cli.degree {
        settings.degree = degree;
    }
    if let Some(steps) = cli.horizon_steps {
        settings.horizon_steps = steps;
    }

    let data_dir = resolve_data_dir(cli.data_dir.as_deref());

    match cli.command.unwrap_or(Commands::Serve {
        addr: None,
        stdin_feed: false,
        replay: None,
    }) {
        Commands::Serve {
            addr,
            stdin_feed,
            replay,
        } => {
            let addr = resolve_addr(addr.as_deref());
            serve(&addr, &data_dir, settings, stdin_feed, replay.as_deref()).await?;
        }

        Commands::Ingest { file } => {
            let text = std::fs::read_to_string(&file)
                .with_context(|| format!("reading {}", file.display()))?;
            let payload = sensorcast_server::types::parse_payload(&text)?;
            let events = Arc::new(EventBus::default());
            let pipeline = Arc::new(ForecastPipeline::open(&data_dir, settings, events));
            let capture = Arc::new(RawCaptureLog::in_dir(&data_dir));
            let report = feed::process_payload(&pipeline, &capture, payload).await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }

        Commands::Predictions { sensor } => {
            let pipeline = ForecastPipeline::open(&data_dir, settings, Arc::new(EventBus::default()));
            let records = pipeline.predictions(sensor)?;
            println!("{}", serde_json::to_string_pretty(&records)?);
        }

        Commands::History { sensor } => {
            let pipeline = ForecastPipeline::open(&data_dir, settings, Arc::new(EventBus::default()));
            let readings = pipeline.history(sensor)?;
            println!("{}", serde_json::to_string_pretty(&readings)?);
        }

        Commands::Publish { file } => {
            let events = Arc::new(EventBus::default());
            let context = Arc::new(PublishContext::new());
            let publisher =
                ReplayPublisher::load(&file, settings.cadence.clone(), context, Arc::clone(&events))?;
            let pipeline = Arc::new(ForecastPipeline::open(&data_dir, settings, events));
            let capture = Arc::new(RawCaptureLog::in_dir(&data_dir));

            let (tx, rx) = mpsc::channel(feed::FEED_CAPACITY);
            let consumer = tokio::spawn(feed::run_consumer(rx, pipeline, capture));
            let publishing = tokio::spawn(publisher.run(tx));

            shutdown_signal().await;
            publishing.abort();
            consumer.await?;
        }

        Commands::Completions { shell } => {
            let mut cmd = Cli::command();
            clap_complete::generate(shell, &mut cmd, "sensorcast", &mut std::io::stdout());
        }
    }

    Ok(())
}

fn init_tracing(level: &str, json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

async fn serve(
    addr: &str,
    data_dir: &Path,
    settings: ForecastSettings,
    stdin_feed: bool,
    replay: Option<&Path>,
) -> anyhow::Result<()> {
    std::fs::create_dir_all(data_dir)
        .with_context(|| format!("creating data dir {}", data_dir.display()))?;

    let events = Arc::new(EventBus::default());
    let publish = Arc::new(PublishContext::new());
    let cadence = settings.cadence.clone();
    let pipeline = Arc::new(ForecastPipeline::open(data_dir, settings, Arc::clone(&events)));
    let capture = Arc::new(RawCaptureLog::in_dir(data_dir));

    let (tx, rx) = mpsc::channel(feed::FEED_CAPACITY);
    let consumer = tokio::spawn(feed::run_consumer(
        rx,
        Arc::clone(&pipeline),
        Arc::clone(&capture),
    ));

    let mut producers = Vec::new();
    if stdin_feed {
        let stdio = StdioFeed::new(tx.clone());
        producers.push(tokio::spawn(async move {
            if let Err(e) = stdio.run().await {
                tracing::error!("Stdio feed failed: {e}");
            }
        }));
    }
    if let Some(path) = replay {
        let publisher =
            ReplayPublisher::load(path, cadence, Arc::clone(&publish), Arc::clone(&events))?;
        producers.push(tokio::spawn(publisher.run(tx.clone())));
    }
    drop(tx);

    events.emit(PipelineEvent::RuntimeStarted {
        version: env!("CARGO_PKG_VERSION").to_string(),
        addr: Some(addr.to_string()),
        data_dir: data_dir.display().to_string(),
    });
    tracing::info!("SensorCast {} (data dir: {})", env!("CARGO_PKG_VERSION"), data_dir.display());

    let state = Arc::new(AppState::new(pipeline, capture, publish, data_dir.to_path_buf()));
    let result = http::serve(addr, state, shutdown_signal()).await;

    for producer in producers {
        producer.abort();
    }
    // The HTTP side holds no feed sender, so the consumer drains and stops.
    if let Err(e) = consumer.await {
        tracing::warn!("Feed consumer ended abnormally: {e}");
    }
    tracing::info!("Shut down");
    result
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl-C: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to listen for SIGTERM: {e}");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    tracing::info!("Shutdown signal received");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_degree_is_bounded() {
        let cli = Cli::try_parse_from(["sensorcast", "--degree", "4", "history", "humidity"]).unwrap();
        assert_eq!(cli.degree, Some(4));

        assert!(Cli::try_parse_from(["sensorcast", "--degree", "0", "serve"]).is_err());
        assert!(Cli::try_parse_from(["sensorcast", "--degree", "9", "serve"]).is_err());
        assert!(
            Cli::try_parse_from(["sensorcast", "--degree", "18446744073709551615", "serve"]).is_err()
        );
    }
}
