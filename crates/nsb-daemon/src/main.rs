//! nsb_daemon - Network Simulation Broker daemon binary.
//!
//! Usage: `nsb_daemon <config_file>` where the config file is the YAML
//! document described in [`nsb_daemon::config`]. Exit codes: 0 on a clean
//! EXIT-driven shutdown, 1 on a missing or invalid configuration, 1 on a
//! bind failure.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use nsb_daemon::{BrokerConfig, BrokerServer};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Network Simulation Broker daemon
#[derive(Parser, Debug)]
#[command(name = "nsb_daemon")]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to the YAML configuration file
    config: PathBuf,

    /// Override the port from the configuration file
    #[arg(long)]
    port: Option<u16>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Log to file instead of stdout
    #[arg(long)]
    log_file: Option<PathBuf>,
}

fn init_tracing(args: &Args) -> anyhow::Result<()> {
    let filter = EnvFilter::try_new(&args.log_level).unwrap_or_else(|_| EnvFilter::new("info"));

    if let Some(log_file) = &args.log_file {
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(log_file)?;
        tracing_subscriber::registry()
            .with(filter)
            .with(
                tracing_subscriber::fmt::layer()
                    .with_writer(file)
                    .with_ansi(false),
            )
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    if let Err(err) = init_tracing(&args) {
        eprintln!("failed to initialize logging: {err}");
        return ExitCode::FAILURE;
    }

    if !args.config.exists() {
        error!(path = %args.config.display(), "configuration file does not exist");
        return ExitCode::FAILURE;
    }
    let mut config = match BrokerConfig::from_file(&args.config) {
        Ok(config) => config,
        Err(err) => {
            error!(path = %args.config.display(), error = %err, "failed to load configuration");
            return ExitCode::FAILURE;
        },
    };
    if let Some(port) = args.port {
        config.server_port = port;
    }

    info!("starting daemon");
    let server = match BrokerServer::bind(config).await {
        Ok(server) => server,
        Err(err) => {
            error!(error = %err, "failed to start server");
            return ExitCode::FAILURE;
        },
    };

    match server.run().await {
        Ok(()) => {
            info!("daemon exited cleanly");
            ExitCode::SUCCESS
        },
        Err(err) => {
            error!(error = %err, "daemon terminated with error");
            ExitCode::FAILURE
        },
    }
}
