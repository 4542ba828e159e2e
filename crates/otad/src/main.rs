//! otad - OTA Server Daemon
//!
//! Serves a firmware registry over HTTP: update checks, uploads and
//! resumable downloads.
//!
//! Usage:
//!   otad [config.toml]
//!
//! If no config file is provided, defaults are used (port 8070, artifacts
//! under `./firmware`, registry in `./firmware_db.json`).

mod config;

use std::sync::Arc;

use anyhow::Context;
use ota_api::{create_router_with_timeout, AppState};
use ota_core::UpdateService;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::{LogFormat, ServerConfig};

/// Parsed command-line arguments
struct Args {
    /// Server config file (TOML)
    config_path: Option<String>,
}

fn parse_args() -> Args {
    let mut result = Args { config_path: None };

    for arg in std::env::args().skip(1) {
        match arg.as_str() {
            "--help" | "-h" => {
                print_help();
                std::process::exit(0);
            }
            arg if !arg.starts_with('-') => {
                result.config_path = Some(arg.to_string());
            }
            _ => {
                eprintln!("Unknown argument: {}", arg);
            }
        }
    }

    result
}

fn print_help() {
    eprintln!(
        r#"otad - OTA Server Daemon

Usage: otad [config.toml]

Options:
  -h, --help    Print this help message

Config keys (all optional):
  bind, storage_dir, registry_path, max_upload_bytes, allow_replace,
  auth_token, auth_identity, body_timeout_secs, log_format ("text" | "json")

Examples:
  # Run with defaults
  otad

  # Run with config file
  otad /etc/otad.toml
"#
    );
}

fn init_logging(format: LogFormat) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "otad=info,ota_api=info,ota_core=info,audit=info".into());
    let registry = tracing_subscriber::registry().with(filter);

    match format {
        LogFormat::Text => registry.with(tracing_subscriber::fmt::layer()).init(),
        LogFormat::Json => registry
            .with(tracing_subscriber::fmt::layer().json())
            .init(),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = parse_args();

    // Config comes first: it picks the log format
    let config = match &args.config_path {
        Some(path) => ServerConfig::load(path)?,
        None => ServerConfig::default(),
    };

    init_logging(config.log_format);
    tracing::info!("Starting otad (OTA Server Daemon)");
    match &args.config_path {
        Some(path) => tracing::info!("Loaded config from: {}", path),
        None => tracing::info!("No config file provided, using defaults"),
    }

    let service = UpdateService::open(config.service_config())
        .await
        .context("Failed to open firmware registry")?;

    let mut state = AppState::from_arc(Arc::new(service));
    if let Some(auth) = config.auth() {
        tracing::info!(identity = %config.auth_identity, "Bearer token authentication enabled");
        state = state.with_auth(auth);
    }
    if config.allow_replace {
        tracing::warn!("Replacing published versions is enabled");
    }

    let app = create_router_with_timeout(state, config.body_timeout());

    let listener = tokio::net::TcpListener::bind(config.bind)
        .await
        .with_context(|| format!("Failed to bind {}", config.bind))?;
    tracing::info!("Listening on http://{}", config.bind);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("otad stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}
