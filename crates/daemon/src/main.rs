use std::path::PathBuf;

use bci_daemon::app::Session;
use bci_daemon::config::{load_config, render_config, Overrides};
use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(author, version, about = "BCI trial session daemon", long_about = None)]
struct Args {
    /// Path to the TOML session configuration
    #[arg(long, short)]
    config: Option<PathBuf>,

    /// Number of trials to present, overriding the configuration
    #[arg(long)]
    trials: Option<u32>,

    /// Directory that receives the per-run artifact folders
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// Upper bound on every coordinator wait, in milliseconds
    #[arg(long)]
    poll_interval_ms: Option<u64>,

    /// Print the effective configuration and exit
    #[arg(long)]
    print_config: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "bci_daemon=info,session=info,eeg_sensor=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();
    let overrides = Overrides {
        trials: args.trials,
        data_dir: args.data_dir,
        poll_interval_ms: args.poll_interval_ms,
    };
    let config = load_config(args.config.as_deref(), &overrides)?;

    if args.print_config {
        print!("{}", render_config(&config)?);
        return Ok(());
    }

    tracing::info!("BCI daemon starting...");
    let session = Session::build(config)?;
    tracing::info!("Recording to {}", session.store().dir().display());

    // --- Graceful Shutdown ---
    let stop = session.stop_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Shutdown signal received. Stopping session...");
            stop.request();
        }
    });

    let summary = tokio::task::spawn_blocking(move || session.run()).await??;
    if summary.error {
        anyhow::bail!(
            "session stopped after {} trials because a subsystem failed",
            summary.trials_completed
        );
    }

    tracing::info!(
        "BCI daemon stopped gracefully after {} trials.",
        summary.trials_completed
    );
    Ok(())
}
