//! OTA CLI - Command-line tool for OTA firmware distribution
//!
//! Operator side: list, inspect and upload firmware. Device side: check for,
//! download and verify updates.

mod commands;
mod output;

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use ota_client::{ClientConfig, OtaClient, Version};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::output::{OutputContext, OutputFormat};

#[derive(Parser)]
#[command(name = "ota-cli")]
#[command(author, version, about = "OTA Firmware Distribution CLI")]
struct Cli {
    /// Server URL
    #[arg(
        short,
        long,
        env = "OTA_SERVER",
        default_value = "http://localhost:8070"
    )]
    server: String,

    /// Bearer token
    #[arg(short, long, env = "OTA_TOKEN", hide_env_values = true)]
    token: Option<String>,

    /// Client configuration file (YAML); overrides --server and --token
    #[arg(short, long, env = "OTA_CONFIG")]
    config: Option<PathBuf>,

    /// Output format
    #[arg(short, long, value_enum, default_value = "table")]
    output: OutputFormat,

    /// Disable colored output
    #[arg(long)]
    no_color: bool,

    /// Minimal output (for scripting)
    #[arg(short, long)]
    quiet: bool,

    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Ask whether a newer version exists
    Check {
        /// Device type
        #[arg(short, long, env = "OTA_DEVICE_TYPE")]
        device_type: String,

        /// Version currently installed
        #[arg(long)]
        current_version: Option<String>,
    },

    /// List published firmware
    List {
        /// Only this device type
        device_type: Option<String>,
    },

    /// Show metadata of one version
    Info {
        /// Device type
        device_type: String,

        /// Version, or "latest"
        version: String,
    },

    /// Publish a firmware file
    Upload {
        /// Device type
        device_type: String,

        /// Version to publish
        version: String,

        /// Firmware file path
        file: PathBuf,

        /// Release notes
        #[arg(long)]
        notes: Option<String>,

        /// Replace an already published version (server must allow it)
        #[arg(long)]
        replace: bool,
    },

    /// Download and verify one version
    Download {
        /// Device type
        device_type: String,

        /// Version to download
        version: String,

        /// Target directory
        #[arg(long, default_value = ".")]
        out_dir: PathBuf,
    },

    /// Check, download and verify in one go
    Update {
        /// Device type
        #[arg(short, long, env = "OTA_DEVICE_TYPE")]
        device_type: String,

        /// Version currently installed
        #[arg(long)]
        current_version: Option<String>,

        /// Target directory
        #[arg(long, default_value = "downloads")]
        out_dir: PathBuf,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let ctx = OutputContext::new(cli.output, cli.no_color, cli.quiet);

    if let Err(e) = run(cli, &ctx).await {
        ctx.error(&format!("Error: {:#}", e));
        std::process::exit(1);
    }
}

async fn run(cli: Cli, ctx: &OutputContext) -> Result<()> {
    // Set up logging
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("warn")
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
        .with(filter)
        .init();

    let config = load_config(&cli)?;
    tracing::debug!(server = %config.connection.base_url, "Using OTA server");
    let client = OtaClient::from_config(&config).context("Failed to create OTA client")?;

    match cli.command {
        Commands::Check {
            device_type,
            current_version,
        } => {
            let current = parse_version(current_version.as_deref())?;
            commands::check(&client, &device_type, current.as_ref(), ctx).await?;
        }

        Commands::List { device_type } => {
            commands::list(&client, device_type.as_deref(), ctx).await?;
        }

        Commands::Info {
            device_type,
            version,
        } => {
            commands::info(&client, &device_type, &version, ctx).await?;
        }

        Commands::Upload {
            device_type,
            version,
            file,
            notes,
            replace,
        } => {
            let version = Version::parse(&version).context("Invalid version")?;
            commands::upload(
                &client,
                &device_type,
                &version,
                &file,
                notes.as_deref(),
                replace,
                ctx,
            )
            .await?;
        }

        Commands::Download {
            device_type,
            version,
            out_dir,
        } => {
            let version = Version::parse(&version).context("Invalid version")?;
            commands::download(&client, &device_type, &version, &out_dir, ctx).await?;
        }

        Commands::Update {
            device_type,
            current_version,
            out_dir,
        } => {
            let current = parse_version(current_version.as_deref())?;
            commands::update(client, &device_type, current, &out_dir, ctx).await?;
        }
    }

    Ok(())
}

/// Client settings from --config, else from --server/--token
fn load_config(cli: &Cli) -> Result<ClientConfig> {
    if let Some(path) = &cli.config {
        return ClientConfig::from_yaml_file(path)
            .with_context(|| format!("Failed to load config {}", path.display()));
    }

    // The device section is unused by the plain client
    let mut builder = ClientConfig::builder(&cli.server, "");
    if let Some(token) = &cli.token {
        builder = builder.bearer_token(token);
    }
    Ok(builder.build())
}

fn parse_version(s: Option<&str>) -> Result<Option<Version>> {
    s.map(|v| Version::parse(v).context("Invalid version"))
        .transpose()
}
