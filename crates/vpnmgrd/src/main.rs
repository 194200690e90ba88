//! vpnmgrd - BGP-VPN association reconciliation daemon
//!
//! Runs the reconciler against the in-memory VPN model. Change events are
//! either replayed from a JSON-lines file or the daemon idles until
//! interrupted.

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{error, info};
use vpnmgrd::replay::replay_file;
use vpnmgrd::{VpnMgrConfig, VpnMgrDaemon, DEFAULT_CONFIG_PATH};

/// BGP-VPN association reconciliation daemon
#[derive(Parser, Debug)]
#[command(name = "vpnmgrd")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Configuration file
    #[arg(short = 'c', long, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short = 'l', long, default_value = "info")]
    log_level: String,

    /// Replay change events from a JSON-lines file, then exit
    #[arg(short = 'r', long)]
    replay: Option<PathBuf>,

    /// Print the VPN model and counters as JSON on exit
    #[arg(long)]
    dump_state: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    init_logging(&args.log_level);

    info!("--- Starting vpnmgrd ---");

    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("vpnmgrd failed: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

fn init_logging(log_level: &str) {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    tracing_subscriber::registry()
        .with(filter)
        .with(
            fmt::layer()
                .with_target(true)
                .with_thread_ids(true)
                .with_level(true),
        )
        .init();
}

async fn run(args: Args) -> Result<()> {
    let config = VpnMgrConfig::load_or_default(&args.config)
        .with_context(|| format!("loading {}", args.config.display()))?;
    let daemon = VpnMgrDaemon::start(&config).context("invalid configuration")?;

    match &args.replay {
        Some(path) => {
            let summary = replay_file(&daemon, path)
                .await
                .with_context(|| format!("replaying {}", path.display()))?;
            info!("Queued {} record(s) {:?}", summary.records, summary.by_kind);
        }
        None => {
            info!("vpnmgrd running, waiting for shutdown signal");
            tokio::signal::ctrl_c()
                .await
                .context("installing signal handler")?;
            info!("Received SIGINT");
        }
    }

    let model = std::sync::Arc::clone(daemon.model());
    let report = daemon.shutdown().await;
    info!(
        "Handled {} event(s): {} rejected, {} deferred, {} lock timeouts, {} downstream failures",
        report.reconciler.events_handled,
        report.reconciler.rejected,
        report.reconciler.deferred,
        report.reconciler.lock_timeouts,
        report.reconciler.downstream_failures
    );

    if args.dump_state {
        let state = serde_json::json!({
            "model": model.snapshot(),
            "report": report,
        });
        println!(
            "{}",
            serde_json::to_string_pretty(&state).context("serializing state")?
        );
    }

    info!("vpnmgrd exiting");
    Ok(())
}
