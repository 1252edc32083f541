//! agent-checks binary entry point.

use agent_checks::{telemetry, Config, MetricsSink, Runner};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// Polling monitors for BIND/named and local health probes.
#[derive(Parser, Debug)]
#[command(name = "agent-checks")]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to configuration file (TOML).
    #[arg(short, long, default_value = "agent-checks.toml")]
    config: PathBuf,

    /// Poll every instance once and exit.
    #[arg(long)]
    once: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let config: Config = config::Config::builder()
        .add_source(config::File::from(args.config.clone()))
        .add_source(
            config::Environment::with_prefix("AGENT_CHECKS")
                .separator("__")
                .try_parsing(true),
        )
        .build()?
        .try_deserialize()?;

    telemetry::init(&config.telemetry).map_err(|e| e as Box<dyn std::error::Error>)?;

    info!(
        config_file = %args.config.display(),
        bind = config.bind.len(),
        file_grep = config.file_grep.len(),
        status_process = config.status_process.len(),
        "Starting agent-checks"
    );

    let runner = match Runner::new(&config, Arc::new(MetricsSink)) {
        Ok(runner) => runner,
        Err(e) => {
            error!("invalid check configuration: {}", e);
            return Err(e.into());
        }
    };

    if args.once {
        runner.poll_once().await;
        return Ok(());
    }

    let token = CancellationToken::new();
    let signal_token = token.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("shutdown requested"),
            Err(e) => error!("cannot listen for shutdown signal: {}", e),
        }
        signal_token.cancel();
    });

    runner.run(token).await;

    info!("agent-checks shutdown complete");
    Ok(())
}
