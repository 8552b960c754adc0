use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Result, anyhow};
use clap::{Parser, Subcommand, ValueEnum};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use track_jobs::app;
use track_jobs::config::settings::AppConfig;
use track_jobs::modules::tracks::events::{TranscodeOutcome, TranscodingInfo};
use track_jobs::modules::tracks::model::TrackMetadata;

#[derive(Parser)]
#[command(name = "track-jobs", version, about = "Background jobs for track uploads")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Start the transcoding_infos worker.
    Worker {
        /// Config file (KEY=value lines).
        #[arg(short, long, default_value = "config/app.env")]
        config: PathBuf,
    },
    /// Publish a transcoding report for a track.
    Enqueue {
        #[arg(short, long, default_value = "config/app.env")]
        config: PathBuf,
        #[arg(long)]
        track_id: i64,
        #[arg(long, value_enum)]
        outcome: OutcomeArg,
        /// Seconds.
        #[arg(long)]
        duration: Option<f64>,
        /// Kbps.
        #[arg(long)]
        bitrate: Option<i32>,
        #[arg(long)]
        format: Option<String>,
        #[arg(long)]
        message: Option<String>,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum OutcomeArg {
    Succeeded,
    Failed,
}

impl From<OutcomeArg> for TranscodeOutcome {
    fn from(arg: OutcomeArg) -> Self {
        match arg {
            OutcomeArg::Succeeded => TranscodeOutcome::Succeeded,
            OutcomeArg::Failed => TranscodeOutcome::Failed,
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(true))
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Command::Worker { config } => {
            let config = load_config(&config)?;
            let state = app::build_state(config).await?;

            let stop = CancellationToken::new();
            tokio::spawn(watch_shutdown(stop.clone()));

            app::run_worker(state, stop).await?;
            info!("Worker shutdown complete");
            Ok(())
        }
        Command::Enqueue {
            config,
            track_id,
            outcome,
            duration,
            bitrate,
            format,
            message,
        } => {
            let config = load_config(&config)?;
            let queue = app::connect_broker(&config).await?;

            let metadata = TrackMetadata {
                duration,
                bitrate,
                format,
                ..TrackMetadata::default()
            };
            let report = TranscodingInfo {
                track_id,
                outcome: outcome.into(),
                metadata: (!metadata.is_empty()).then_some(metadata),
                message,
            };

            let envelope = app::enqueue_report(queue.as_ref(), &report).await?;
            println!("{}", envelope.id);
            Ok(())
        }
    }
}

fn load_config(path: &std::path::Path) -> Result<AppConfig> {
    AppConfig::from_file(path).map_err(|e| anyhow!("Failed to load {}: {}", path.display(), e))
}

async fn watch_shutdown(stop: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
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
                error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
        _ = stop.cancelled() => return,
    }

    info!("🛑 Shutdown requested, finishing in-flight jobs");
    stop.cancel();
}
