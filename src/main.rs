//! `cistern`: read the tank level and report it.
//!
//! With the MQTT sink the level is polled until SIGINT/SIGTERM; with the database sink
//! a single measurement is stored and the process exits.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use cistern_monitor::config::{SinkKind, DEFAULT_CONFIG_PATH};
use cistern_monitor::poll_loop::{shutdown_channel, PollLoop, ShutdownTrigger};
use cistern_monitor::{logging, sink};

#[derive(Parser, Debug)]
#[command(name = "cistern", version, about = "Cistern water-volume monitor")]
struct Args {
    /// Path to the TOML configuration file
    #[arg(short, long, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Emit logs as JSON lines
    #[arg(long)]
    json: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config = logging::init_from_config(&args.config, args.json)
        .with_context(|| format!("Failed to load configuration from {}", args.config.display()))?;

    tracing::info!(
        config = %args.config.display(),
        sink = ?config.sink,
        device = %config.bus.device.display(),
        "Starting cistern monitor"
    );

    let publisher = sink::build_publisher(&config).context("Failed to build sink")?;
    let poll = PollLoop::from_config(&config);

    let outcome = match config.sink {
        SinkKind::Mqtt => {
            let (trigger, token) = shutdown_channel();
            tokio::spawn(forward_signals(trigger));
            poll.run_continuous(publisher.as_ref(), token)
                .await
                .map(|report| tracing::info!(cycles = report.cycles, "Cistern monitor stopped"))
        }
        SinkKind::Database => poll.run_single_shot(publisher.as_ref()).await.map(|_| ()),
    };

    if let Err(e) = &outcome {
        let stage = if e.is_read_failure() { "read" } else { "delivery" };
        tracing::error!(stage, error = %e, "Cistern monitor failed");
    }
    Ok(outcome?)
}

async fn forward_signals(trigger: ShutdownTrigger) {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut terminate) => {
                tokio::select! {
                    _ = ctrl_c => {}
                    _ = terminate.recv() => {}
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "Could not install SIGTERM handler");
                let _ = ctrl_c.await;
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = ctrl_c.await;
    }

    tracing::info!("Shutdown requested");
    trigger.trigger();
}
