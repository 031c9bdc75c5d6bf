//! lineserver - newline-delimited TCP message collector
//!
//! Accepts TCP clients, logs every `\n`-terminated message they send and
//! acknowledges each one with `Message received`.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::{
    layer::SubscriberExt, reload, util::SubscriberInitExt, EnvFilter, Registry,
};

use lineserver::{config::ConfigManager, consumer, shutdown, Server};

/// CLI arguments for lineserver
#[derive(Parser, Debug)]
#[command(name = "lineserver")]
#[command(about = "lineserver - newline-delimited TCP message collector")]
#[command(version)]
#[command(long_about = "
lineserver - newline-delimited TCP message collector

Every line a client sends is handed to a single consumer and acknowledged
with \"Message received\".

Configuration priority (highest to lowest):
1. Command-line arguments
2. Configuration file
3. Environment variables
4. Built-in defaults

Environment variables:
  LINESERVER_LISTEN_ADDR     - Listen address (e.g., 127.0.0.1:3000)
  LINESERVER_BUS_CAPACITY    - Messages buffered before readers block
  LINESERVER_ACCEPT_BACKOFF  - Pause after listener errors (e.g., 100ms)
  LINESERVER_LOG_LEVEL       - Log level (trace, debug, info, warn, error)
")]
pub struct CliArgs {
    /// Configuration file path
    #[arg(
        short,
        long,
        default_value = "lineserver.toml",
        help = "Path to configuration file"
    )]
    pub config: PathBuf,

    /// Listen address (overrides config file)
    #[arg(short, long, help = "Listen address (e.g., 127.0.0.1:3000)")]
    pub listen: Option<String>,

    /// Message bus capacity (overrides config file)
    #[arg(long, help = "Messages buffered before readers block")]
    pub bus_capacity: Option<usize>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, help = "Log level")]
    pub log_level: Option<String>,

    /// Enable verbose logging (sets log level to debug)
    #[arg(short, long, help = "Enable verbose logging")]
    pub verbose: bool,

    /// Validate configuration and exit
    #[arg(long, help = "Validate configuration and exit")]
    pub validate_config: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = CliArgs::parse();

    // Tracing comes up before the config so loading is logged; the filter is
    // swapped for the configured level once the config is known.
    let filter_handle = init_tracing(&bootstrap_log_level(&args));

    // Load configuration with priority: CLI args > config file > environment > defaults
    let mut config = if args.config.exists() {
        ConfigManager::load_from_file(&args.config)?
    } else {
        ConfigManager::load_from_env()?
    };

    config.merge_with_cli_args(
        args.listen.as_deref(),
        args.bus_capacity,
        args.log_level.as_deref(),
    );
    if args.verbose {
        config.logging.log_level = "debug".to_string();
    }

    config
        .validate()
        .context("Final configuration validation failed")?;

    if std::env::var_os("RUST_LOG").is_none() {
        filter_handle
            .reload(EnvFilter::new(&config.logging.log_level))
            .context("Failed to apply configured log level")?;
    }

    info!("Starting lineserver v{}", env!("CARGO_PKG_VERSION"));

    if args.validate_config {
        info!("Configuration is valid");
        info!("  Listen address: {}", config.server.listen_addr);
        info!("  Bus capacity: {}", config.server.bus_capacity);
        info!(
            "  Accept error backoff: {:?}",
            config.server.accept_error_backoff
        );
        info!(
            "  Max consecutive read errors: {}",
            match config.server.max_consecutive_read_errors {
                0 => "unlimited".to_string(),
                n => n.to_string(),
            }
        );
        return Ok(());
    }

    let (server, messages) = Server::new(&config.server)?;
    let server = Arc::new(server);

    let consumer_handle = tokio::spawn(consumer::log_messages(messages));

    let running = Arc::clone(&server);
    let mut server_handle = tokio::spawn(async move { running.start().await });

    tokio::select! {
        result = &mut server_handle => {
            // start only returns on its own when binding failed; the bus is closed already.
            if let Err(e) = consumer_handle.await {
                error!("Consumer task failed: {}", e);
            }
            return result?.context("Server failed to start");
        }
        signal_result = shutdown::wait_for_os_signal() => {
            if let Err(e) = signal_result {
                error!("Error setting up signal handlers: {}", e);
            }
        }
    }

    info!("Initiating shutdown...");
    server.stop();

    match server_handle.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => error!("Server error: {}", e),
        Err(e) => error!("Server task failed: {}", e),
    }

    match consumer_handle.await {
        Ok(consumed) => info!("Consumer finished after {} messages", consumed),
        Err(e) => error!("Consumer task failed: {}", e),
    }

    let stats = server.stats();
    info!(
        "Served {} connections, {} still open at shutdown",
        stats.total_connections, stats.active_connections
    );
    info!("Server shutdown complete");

    Ok(())
}

/// Log level used until the configuration has been loaded
fn bootstrap_log_level(args: &CliArgs) -> String {
    if args.verbose {
        return "debug".to_string();
    }
    args.log_level
        .clone()
        .or_else(|| std::env::var("LINESERVER_LOG_LEVEL").ok())
        .unwrap_or_else(|| "info".to_string())
}

/// Initialize tracing/logging
fn init_tracing(log_level: &str) -> reload::Handle<EnvFilter, Registry> {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));
    let (filter_layer, handle) = reload::Layer::new(env_filter);

    tracing_subscriber::registry()
        .with(filter_layer)
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_thread_ids(true)
                .with_level(true)
                .with_ansi(true),
        )
        .init();

    handle
}
