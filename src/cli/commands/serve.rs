//! Implementation of `sprintctl serve`: loads configuration, sets up
//! structured logging, and runs the orchestrator daemon until a
//! shutdown signal arrives (spec §6 "Exit codes": 0 on clean
//! signal-initiated shutdown).

use anyhow::{Context, Result};

use crate::infrastructure::config::{Config, ConfigLoader};
use crate::infrastructure::logging::{LogConfig, LogFormat, LoggerImpl};
use crate::runtime;

pub async fn execute(port_override: Option<u16>) -> Result<()> {
    let mut config: Config = ConfigLoader::load().context("failed to load configuration")?;
    if let Some(port) = port_override {
        config.server.port = port;
    }

    let log_config = LogConfig {
        level: config.logging.level.clone(),
        format: if config.logging.format == "json" { LogFormat::Json } else { LogFormat::Pretty },
        log_dir: config.logging.log_dir.clone().map(std::path::PathBuf::from),
        enable_stdout: true,
        ..LogConfig::default()
    };
    let _logger = LoggerImpl::init(&log_config).context("failed to initialize logging")?;

    tracing::info!(host = %config.server.host, port = config.server.port, "starting sprintforge orchestrator");

    let sprints_root = std::path::PathBuf::from(".sprint/sprints");
    runtime::run_daemon(config, sprints_root, shutdown_signal()).await
}

async fn shutdown_signal() {
    let ctrl_c = async { tokio::signal::ctrl_c().await.expect("failed to install Ctrl+C handler") };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()).expect("failed to install SIGTERM handler").recv().await;
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }
    tracing::info!("shutdown signal received, draining in-flight work");
}
