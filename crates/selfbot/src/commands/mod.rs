//! CLI command implementations.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use selfbot::config::{self, Config};

pub mod check_config;
pub mod reset_auth;
pub mod run;

/// Config with command-line overrides applied.
pub struct Loaded {
    pub config: Config,
    /// Credential directory, resolved against the config file location.
    pub auth_dir: PathBuf,
}

/// Load the config file and apply overrides.
///
/// A relative `auth_dir` from the config file is resolved against the config
/// file directory; one given on the command line is used as is.
pub async fn load_config(
    config_path: &str,
    owner: Option<String>,
    auth_dir: Option<PathBuf>,
) -> Result<Loaded> {
    let mut config = Config::load(config_path)
        .await
        .with_context(|| format!("failed to load '{config_path}'"))?;

    if let Some(owner) = owner {
        config.owner.number = owner;
    }

    let config_file = Path::new(config_path);
    let auth_dir = auth_dir.unwrap_or_else(|| config::resolve_path(config_file, &config.auth_dir));

    // Bare names are looked up on PATH; paths are relative to the config file
    if config.bridge.command.contains(['/', std::path::MAIN_SEPARATOR]) {
        let command = config::resolve_path(config_file, Path::new(&config.bridge.command));
        config.bridge.command = command.to_string_lossy().into_owned();
    }

    Ok(Loaded { config, auth_dir })
}
