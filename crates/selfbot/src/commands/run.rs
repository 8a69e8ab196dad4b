//! `selfbot run`: the long-running agent.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Result;
use tokio::signal;
use tracing::{info, warn};

use selfbot::client::{BridgeClientFactory, FixedVersionSource, HttpVersionSource, VersionSource};
use selfbot::dispatcher::CommandDispatcher;
use selfbot::display::TerminalQrDisplay;
use selfbot::lifecycle::{LifecycleConfig, LifecycleDeps, LifecycleManager, StopReason};
use selfbot::store::FileCredentialStore;

use super::Loaded;

pub async fn run(
    config_path: &str,
    owner: Option<String>,
    auth_dir: Option<PathBuf>,
) -> Result<ExitCode> {
    let reason = run_until_stopped(config_path, owner, auth_dir).await?;
    match reason {
        StopReason::Shutdown => info!("selfbot stopped"),
        StopReason::LoggedOut => warn!(
            "selfbot stopped after logout, run `selfbot reset-auth` and start again to pair"
        ),
    }
    Ok(ExitCode::from(reason.exit_code()))
}

/// Run the agent until it logs out or a shutdown signal arrives.
async fn run_until_stopped(
    config_path: &str,
    owner: Option<String>,
    auth_dir: Option<PathBuf>,
) -> Result<StopReason> {
    let Loaded { config, auth_dir } = super::load_config(config_path, owner, auth_dir).await?;
    config.validate()?;

    let owner_jid = config.owner_jid();
    let credentials = Arc::new(FileCredentialStore::new(auth_dir));
    info!(
        owner = %owner_jid,
        auth_dir = %credentials.dir().display(),
        bridge = %config.bridge.command,
        "Starting selfbot"
    );

    let versions: Arc<dyn VersionSource> = match config.version.pinned {
        Some(version) => Arc::new(FixedVersionSource(version)),
        None => Arc::new(HttpVersionSource::new(config.version.url.clone())),
    };

    let deps = LifecycleDeps {
        factory: Arc::new(BridgeClientFactory::new(config.bridge.clone())),
        versions,
        credentials,
        messages: Arc::new(CommandDispatcher::new(owner_jid, config.owner.name.clone())),
        qr: Arc::new(TerminalQrDisplay),
    };
    let manager = LifecycleManager::new(
        LifecycleConfig {
            reconnect_delay: config.reconnect_delay(),
            timeouts: config.connection.timeouts(),
        },
        deps,
    );

    let starter = manager.clone();
    tokio::spawn(async move { starter.start().await });

    let reason = tokio::select! {
        reason = manager.stopped() => reason,
        _ = shutdown_signal() => {
            manager.shutdown().await;
            StopReason::Shutdown
        }
    };
    Ok(reason)
}

/// Resolves on Ctrl+C or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Failed to install Ctrl+C handler");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, shutting down..."),
        _ = terminate => info!("Received SIGTERM, shutting down..."),
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::time::Duration;

    use tempfile::TempDir;

    /// Bridge that reports a logout right after connecting.
    const LOGOUT_CONFIG: &str = r#"
owner:
  number: "923000000000"
auth_dir: auth
reconnect_delay_ms: 100
bridge:
  command: sh
  args:
    - "-c"
    - |
      read connect
      echo '{"type":"connection_update","connection":"close","last_disconnect":{"status_code":401,"message":"logged out"}}'
      sleep 5
version:
  pinned: [2, 3000, 1]
"#;

    #[tokio::test]
    async fn logout_ends_run_with_exit_code_one() {
        let tmp = TempDir::new().unwrap();
        let config_path = tmp.path().join("selfbot.yaml");
        std::fs::write(&config_path, LOGOUT_CONFIG).unwrap();
        let config_path = config_path.to_str().unwrap();

        let reason = tokio::time::timeout(
            Duration::from_secs(10),
            run_until_stopped(config_path, None, None),
        )
        .await
        .expect("run did not stop after logout")
        .unwrap();

        assert_eq!(reason, StopReason::LoggedOut);
        assert_eq!(reason.exit_code(), 1);
        // Credential directory resolved next to the config file
        assert!(tmp.path().join("auth").is_dir());
    }

    #[tokio::test]
    async fn invalid_config_is_an_error() {
        let tmp = TempDir::new().unwrap();
        let config_path = tmp.path().join("selfbot.yaml");
        std::fs::write(&config_path, "owner:\n  number: \"+92 300\"\n").unwrap();

        let result = run(config_path.to_str().unwrap(), None, None).await;
        assert!(result.is_err());
    }
}
