//! `selfbot check-config`: validate and show the effective configuration.

use std::path::Path;

use anyhow::Result;

pub async fn run(config_path: &str) -> Result<()> {
    let loaded = super::load_config(config_path, None, None).await?;
    let config = &loaded.config;
    config.validate()?;

    let source = if Path::new(config_path).exists() {
        config_path.to_string()
    } else {
        format!("{config_path} (not found, using defaults)")
    };

    println!("Config:          {source}");
    println!("Self-chat:       {}", config.owner_jid());
    if let Some(name) = &config.owner.name {
        println!("Owner name:      {name}");
    }
    println!("Auth dir:        {}", loaded.auth_dir.display());
    println!("Reconnect delay: {} ms", config.reconnect_delay_ms);
    println!(
        "Bridge:          {} {}",
        config.bridge.command,
        config.bridge.args.join(" ")
    );
    match config.version.pinned {
        Some(version) => println!("Version:         {version} (pinned)"),
        None => println!("Version:         discovered from {}", config.version.url),
    }
    println!("Config OK");
    Ok(())
}
