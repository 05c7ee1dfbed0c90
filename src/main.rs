//! edge-ingest - entry point
//!
//! Loads configuration, opens the broker session, runs the ingest pipeline
//! and closes cleanly on SIGINT or SIGTERM.

use clap::{Parser, Subcommand};
use edge_ingest::config::IngestConfig;
use edge_ingest::error::{IngestError, IngestResult};
use edge_ingest::observability::{
    init_default_logging, init_logging, session_span, HealthServer, LogFormat,
};
use edge_ingest::processing::{IngestPipeline, LoggingSink, MessageValidator, ValidationOutcome};
use edge_ingest::protocol::RawMessage;
use edge_ingest::transport::mqtt::{SessionError, TransportSession};
use std::path::{Path, PathBuf};
use std::process;
use std::sync::Arc;
use tokio::signal;
use tokio::sync::mpsc;
use tracing::{error, info, warn, Instrument, Level};

/// Exit code for `check` when the payload is rejected
const EXIT_REJECTED: i32 = 2;

/// Edge-node telemetry ingestion over mutually-authenticated MQTT
#[derive(Parser)]
#[command(name = "edge-ingest")]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, value_name = "FILE", global = true)]
    config: Option<PathBuf>,

    /// Verbose logging (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Connect to the broker and ingest telemetry until signalled
    Run,
    /// Load and validate configuration
    Config {
        /// Print the resolved configuration
        #[arg(long)]
        show: bool,
    },
    /// Validate a single payload without connecting
    Check {
        #[arg(long)]
        topic: String,
        #[arg(long)]
        payload: String,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    match cli.verbose {
        0 => init_default_logging(),
        n => {
            let level = if n == 1 { Level::DEBUG } else { Level::TRACE };
            let format = LogFormat::parse(&std::env::var("LOG_FORMAT").unwrap_or_default());
            init_logging(level, format, false);
        }
    }

    let result = match cli.command {
        Commands::Run => match load_configuration(cli.config.as_deref()) {
            Ok(config) => run_ingest(config).await,
            Err(e) => Err(e),
        },
        Commands::Config { show } => handle_config_command(cli.config.as_deref(), show),
        Commands::Check { topic, payload } => process::exit(check_payload(&topic, &payload)),
    };

    if let Err(e) = result {
        error!(error = %e, "edge-ingest failed");
        process::exit(1);
    }
}

fn load_configuration(explicit: Option<&Path>) -> IngestResult<IngestConfig> {
    let path = IngestConfig::locate(explicit)?;
    info!(path = %path.display(), "Loading configuration");
    Ok(IngestConfig::load_from_file(&path)?)
}

async fn run_ingest(config: IngestConfig) -> IngestResult<()> {
    info!(
        node_id = %config.node.id,
        version = env!("CARGO_PKG_VERSION"),
        "Starting edge-ingest"
    );

    let endpoint = config.endpoint()?;
    let (tx, rx) = mpsc::channel::<RawMessage>(config.mqtt.inbound_capacity);

    let mut session = TransportSession::open(&config, tx)?;
    let handle = session.handle();

    let pipeline = IngestPipeline::from_config(Arc::new(LoggingSink), &config.pipeline);
    let pipeline_task = tokio::spawn(pipeline.run(rx));

    if config.health.enabled {
        let server = HealthServer::new(
            config.node.id.clone(),
            config.health.port,
            handle.subscribe_state(),
        );
        tokio::spawn(server.start());
    }

    let signal_handle = handle.clone();
    tokio::spawn(async move {
        wait_for_signal().await;
        signal_handle.close();
    });

    let span = session_span!(node_id = %config.node.id, broker = %endpoint);
    let session_result = async {
        match session.connect(&endpoint).await {
            Ok(()) | Err(SessionError::ShutdownRequested) => {}
            Err(e) if e.is_transient() => {
                warn!(error = %e, "Initial connect failed, retrying with backoff");
            }
            Err(e) => return Err(e),
        }
        session.run().await
    }
    .instrument(span)
    .await;

    session.close().await;
    // Dropping the session drops the inbound sender and lets the pipeline drain
    drop(session);

    match pipeline_task.await {
        Ok(stats) => info!(
            received = stats.received,
            valid = stats.valid,
            rejected = stats.rejected(),
            "Ingest complete"
        ),
        Err(e) => error!(error = %e, "Ingest pipeline task failed"),
    }

    session_result.map_err(IngestError::from)?;
    info!("Shutdown complete");
    Ok(())
}

fn handle_config_command(explicit: Option<&Path>, show: bool) -> IngestResult<()> {
    let config = load_configuration(explicit)?;
    config.endpoint()?;

    if show {
        let rendered = toml::to_string_pretty(&config)
            .map_err(|e| IngestError::internal(format!("Cannot render configuration: {e}")))?;
        println!("{rendered}");
    }

    info!(node_id = %config.node.id, "Configuration is valid");
    Ok(())
}

/// Prints the outcome and returns the process exit code
fn check_payload(topic: &str, payload: &str) -> i32 {
    let raw = RawMessage::new(topic, payload.as_bytes().to_vec());

    match MessageValidator::validate(&raw) {
        ValidationOutcome::Valid(record) => {
            match serde_json::to_string_pretty(&record) {
                Ok(json) => println!("valid\n{json}"),
                Err(_) => println!("valid"),
            }
            0
        }
        ValidationOutcome::Rejected(rejection) => {
            println!("rejected ({}): {}", rejection.kind, rejection.reason);
            EXIT_REJECTED
        }
    }
}

async fn wait_for_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal as unix_signal, SignalKind};

        match unix_signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = signal::ctrl_c() => info!("Received SIGINT, shutting down"),
                    _ = sigterm.recv() => info!("Received SIGTERM, shutting down"),
                }
            }
            Err(e) => {
                warn!(error = %e, "SIGTERM handler unavailable, waiting for SIGINT only");
                let _ = signal::ctrl_c().await;
                info!("Received SIGINT, shutting down");
            }
        }
    }

    #[cfg(not(unix))]
    {
        let _ = signal::ctrl_c().await;
        info!("Received Ctrl-C, shutting down");
    }
}
