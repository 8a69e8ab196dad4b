//! `selfbot reset-auth`: forget the paired device.

use std::io::ErrorKind;
use std::path::PathBuf;

use anyhow::{Context, Result};
use tokio::fs;

pub async fn run(config_path: &str, auth_dir: Option<PathBuf>) -> Result<()> {
    let loaded = super::load_config(config_path, None, auth_dir).await?;
    let dir = loaded.auth_dir;

    match fs::remove_dir_all(&dir).await {
        Ok(()) => {
            println!("Removed credentials in {}", dir.display());
            println!("The next `selfbot run` will show a QR code to pair again.");
        }
        Err(e) if e.kind() == ErrorKind::NotFound => {
            println!("No credentials at {}, nothing to reset.", dir.display());
        }
        Err(e) => {
            return Err(e).with_context(|| format!("failed to remove '{}'", dir.display()));
        }
    }
    Ok(())
}
