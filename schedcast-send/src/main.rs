//! schedcast-send - Background daemon for scheduled delivery
//!
//! Runs the worker loop over the configured queue and delivers posts when
//! they fall due.

use anyhow::Context;
use clap::Parser;
use libschedcast::events::EventKind;
use libschedcast::logging::{LogFormat, LoggingConfig};
use libschedcast::notifier::{failure_callback, LogNotifier};
use libschedcast::{Config, Manager, SchedcastError};
use std::sync::Arc;
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(name = "schedcast-send")]
#[command(version)]
#[command(about = "Background daemon for scheduled delivery")]
#[command(long_about = "\
schedcast-send - Background daemon for scheduled delivery

DESCRIPTION:
    schedcast-send is a long-running daemon that watches the schedcast queue
    and delivers each post to its platform once it falls due.

    Every tick it claims the due posts, waits out each platform's rate limit,
    publishes, and records the outcome. Failed deliveries are retried after
    a fixed delay until the attempt budget is spent.

USAGE:
    # Run in foreground (logs to stderr)
    schedcast-send

    # Tick every 250ms instead of the configured interval
    schedcast-send --tick-interval 250

    # Deliver whatever is due right now and exit
    schedcast-send --once

SIGNALS:
    SIGTERM, SIGINT - Graceful shutdown (in-flight deliveries finish first)

CONFIGURATION:
    Configuration file: ~/.config/schedcast/config.toml
    Database location: ~/.local/share/schedcast/posts.db

    Override with environment variables:
        SCHEDCAST_CONFIG      - Path to config file
        SCHEDCAST_DB_PATH     - Path to database file
        SCHEDCAST_LOG_FORMAT  - text, json or pretty
        SCHEDCAST_LOG_LEVEL   - error, warn, info, debug or trace

EXIT CODES:
    0 - Clean shutdown
    1 - Runtime error
    2 - Configuration or database error
")]
struct Cli {
    /// Tick interval in milliseconds (overrides config)
    #[arg(long, value_name = "MILLISECONDS")]
    tick_interval: Option<u64>,

    /// Enable verbose logging to stderr
    #[arg(short, long)]
    verbose: bool,

    /// Log output format
    #[arg(long, value_name = "FORMAT", env = "SCHEDCAST_LOG_FORMAT", default_value = "text")]
    log_format: String,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long, value_name = "LEVEL", env = "SCHEDCAST_LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Run a single tick and exit
    #[arg(long)]
    once: bool,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let format = match cli.log_format.parse::<LogFormat>() {
        Ok(format) => format,
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(3);
        }
    };
    LoggingConfig::new(format, cli.log_level.clone(), cli.verbose).init();

    if let Err(e) = run(cli).await {
        error!(error = %format!("{:#}", e), "schedcast-send failed");
        eprintln!("Error: {:#}", e);
        std::process::exit(exit_code(&e));
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let mut config = Config::load_or_default().context("Failed to load configuration")?;
    if let Some(tick_interval) = cli.tick_interval {
        anyhow::ensure!(tick_interval > 0, "--tick-interval must be greater than 0");
        config.scheduling.tick_interval_ms = tick_interval;
    }

    let manager = Manager::from_config(&config)
        .await
        .context("Failed to open the post queue")?;
    manager
        .events()
        .register_arc(EventKind::PostFailed, failure_callback(Arc::new(LogNotifier)));

    info!(
        platforms = ?manager.publishers().names(),
        tick_interval_ms = config.scheduling.tick_interval_ms,
        "schedcast-send starting"
    );

    if cli.once {
        manager.recover().await?;
        let claimed = manager.tick().await?;
        info!(claimed, "Processed due posts once, exiting");
    } else {
        manager.start().await?;
        wait_for_shutdown_signal().await?;
    }

    manager.shutdown().await?;
    info!("schedcast-send stopped");
    Ok(())
}

fn exit_code(e: &anyhow::Error) -> i32 {
    e.downcast_ref::<SchedcastError>()
        .map_or(1, SchedcastError::exit_code)
}

#[cfg(unix)]
async fn wait_for_shutdown_signal() -> anyhow::Result<()> {
    use futures::StreamExt;
    use signal_hook::consts::{SIGINT, SIGTERM};
    use signal_hook_tokio::Signals;

    let mut signals = Signals::new([SIGINT, SIGTERM]).context("Signal setup failed")?;
    let handle = signals.handle();

    if let Some(signal) = signals.next().await {
        info!(signal, "Received shutdown signal, stopping gracefully");
    }
    handle.close();
    Ok(())
}

#[cfg(not(unix))]
async fn wait_for_shutdown_signal() -> anyhow::Result<()> {
    tokio::signal::ctrl_c()
        .await
        .context("Signal setup failed")?;
    info!("Received Ctrl-C, stopping gracefully");
    Ok(())
}
