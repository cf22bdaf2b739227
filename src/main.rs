//! actions-gate binary entry point.
//!
//! Accepts TCP connections, admits those coming from GitHub Actions runner
//! ranges (or the configured additional CIDRs) and pipes them to the
//! upstream; everything else is closed.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use actions_gate::config::{
    ConfigError, ConfigLoader, ConfigResult, LogFormat, LogLevel, LoggingConfig, ServiceConfig,
};
use actions_gate::module::{ModuleConfig, ModuleContract};
use actions_gate::modules::admission::{GateHandler, GateListener, TcpForwarder};
use clap::Parser;
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

/// actions-gate - admit TCP connections from GitHub Actions runners
#[derive(Parser, Debug)]
#[command(name = "actions-gate", version, about)]
struct Cli {
    /// Config file path
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Listen address, overrides `service.listen`
    #[arg(short, long)]
    listen: Option<SocketAddr>,

    /// Upstream address, overrides `upstream.address`
    #[arg(short, long)]
    upstream: Option<SocketAddr>,

    /// Log level (trace, debug, info, warn, error), overrides `logging.level`
    #[arg(long)]
    log_level: Option<LogLevel>,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let config = match load_config(&cli) {
        Ok(config) => config,
        Err(e) => {
            init_tracing(&LoggingConfig::default());
            error!(error = %e, "Failed to load config");
            std::process::exit(1);
        },
    };
    init_tracing(&config.logging);

    info!(
        version = env!("CARGO_PKG_VERSION"),
        name = %config.service.name,
        listen = %config.service.listen,
        upstream = %config.upstream.address,
        "Starting actions-gate"
    );

    if let Err(e) = run(config).await {
        error!(error = %e, "actions-gate failed");
        std::process::exit(1);
    }

    info!("actions-gate stopped");
}

fn load_config(cli: &Cli) -> ConfigResult<ServiceConfig> {
    let loader = ConfigLoader::new();
    let mut config = match &cli.config {
        Some(path) => loader.load(path)?,
        None => ServiceConfig::default(),
    };

    if let Some(listen) = cli.listen {
        config.service.listen = listen;
    }
    if let Some(upstream) = cli.upstream {
        config.upstream.address = upstream;
    }
    if let Some(level) = cli.log_level {
        config.logging.level = level;
    }

    config.validate().map_err(ConfigError::ValidationError)?;
    Ok(config)
}

fn init_tracing(logging: &LoggingConfig) {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(logging.level.to_string()));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false);

    let _ = match logging.format {
        LogFormat::Json => builder.json().try_init(),
        LogFormat::Compact => builder.compact().try_init(),
        LogFormat::Pretty => builder.pretty().try_init(),
    };
}

async fn run(config: ServiceConfig) -> Result<(), Box<dyn std::error::Error>> {
    let forwarder = Arc::new(TcpForwarder::new(config.upstream.clone()));
    let mut handler = GateHandler::with_config(config.gate.clone(), Arc::clone(&forwarder));
    handler.init(ModuleConfig::new())?;
    handler.start()?;

    let gate = handler.gate().ok_or("admission gate did not start")?;
    let listener = GateListener::bind(config.service.listen).await?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        shutdown_signal().await;
        info!("Received shutdown signal");
        let _ = shutdown_tx.send(true);
    });

    let served = listener.serve(gate, shutdown_rx).await;

    info!(
        accepted = listener.stats().total_accepted,
        upstream_sessions = forwarder.stats().sessions.load(Ordering::Relaxed),
        "Final metrics:\n{}",
        handler.metrics().to_prometheus("actions_gate")
    );
    if let Err(e) = handler.stop() {
        warn!(error = %e, "Failed to stop admission gate cleanly");
    }

    served.map_err(Into::into)
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => {}
                    _ = sigterm.recv() => {}
                }
            },
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                ctrl_c.await.ok();
            },
        }
    }

    #[cfg(not(unix))]
    {
        ctrl_c.await.ok();
    }
}
