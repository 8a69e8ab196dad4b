mod commands;

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::error;
use tracing_subscriber::EnvFilter;

use selfbot::config::DEFAULT_CONFIG_FILE;

// ============================================================================
// CLI Types
// ============================================================================

/// selfbot - answers the slash commands you send to your own WhatsApp chat
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Connect to WhatsApp and answer commands until stopped
    Run {
        /// Path to configuration file
        #[arg(short, long, default_value = DEFAULT_CONFIG_FILE)]
        config: String,

        /// Owner phone number, digits only (overrides config file)
        #[arg(long)]
        owner: Option<String>,

        /// Credential directory (overrides config file)
        #[arg(long)]
        auth_dir: Option<PathBuf>,
    },

    /// Delete stored credentials so the next run pairs a new device
    ResetAuth {
        /// Path to configuration file
        #[arg(short, long, default_value = DEFAULT_CONFIG_FILE)]
        config: String,

        /// Credential directory (overrides config file)
        #[arg(long)]
        auth_dir: Option<PathBuf>,
    },

    /// Validate the configuration and print what it resolves to
    CheckConfig {
        /// Path to configuration file
        #[arg(short, long, default_value = DEFAULT_CONFIG_FILE)]
        config: String,
    },
}

// ============================================================================
// Entry Point
// ============================================================================

#[tokio::main]
async fn main() -> ExitCode {
    init_tracing();

    match run().await {
        Ok(code) => code,
        Err(e) => {
            error!("{e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run() -> Result<ExitCode> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            config,
            owner,
            auth_dir,
        } => commands::run::run(&config, owner, auth_dir).await,
        Commands::ResetAuth { config, auth_dir } => {
            commands::reset_auth::run(&config, auth_dir).await?;
            Ok(ExitCode::SUCCESS)
        }
        Commands::CheckConfig { config } => {
            commands::check_config::run(&config).await?;
            Ok(ExitCode::SUCCESS)
        }
    }
}

// ============================================================================
// Initialization
// ============================================================================

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init();
}
