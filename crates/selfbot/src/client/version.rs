//! WhatsApp Web version discovery.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;

use selfbot_bridge_protocol::ProtocolVersion;

/// Version announced when discovery fails.
pub const BUNDLED_VERSION: ProtocolVersion = ProtocolVersion([2, 3000, 1_023_223_821]);

const FETCH_TIMEOUT: Duration = Duration::from_secs(10);

/// Result of a version lookup.
#[derive(Debug, Clone, PartialEq)]
pub struct VersionInfo {
    pub version: ProtocolVersion,
    /// False when the bundled version was used as a fallback.
    pub is_latest: bool,
    /// Why discovery fell back, if it did.
    pub error: Option<String>,
}

/// Source of the WhatsApp Web version to announce.
#[async_trait]
pub trait VersionSource: Send + Sync {
    /// Never fails: implementations fall back to [`BUNDLED_VERSION`].
    async fn latest_version(&self) -> VersionInfo;
}

// ============================================================================
// HttpVersionSource
// ============================================================================

/// Fetches `{"version": [a, b, c]}` from a URL.
pub struct HttpVersionSource {
    client: reqwest::Client,
    url: String,
}

#[derive(Deserialize)]
struct VersionDocument {
    version: ProtocolVersion,
}

impl HttpVersionSource {
    pub fn new(url: impl Into<String>) -> Self {
        let client = reqwest::Client::builder()
            .user_agent(format!("selfbot/{}", env!("CARGO_PKG_VERSION")))
            .timeout(FETCH_TIMEOUT)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self {
            client,
            url: url.into(),
        }
    }

    async fn fetch(&self) -> Result<ProtocolVersion, reqwest::Error> {
        let document: VersionDocument = self
            .client
            .get(&self.url)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(document.version)
    }
}

#[async_trait]
impl VersionSource for HttpVersionSource {
    async fn latest_version(&self) -> VersionInfo {
        match self.fetch().await {
            Ok(version) => VersionInfo {
                version,
                is_latest: true,
                error: None,
            },
            Err(e) => VersionInfo {
                version: BUNDLED_VERSION,
                is_latest: false,
                error: Some(e.to_string()),
            },
        }
    }
}

// ============================================================================
// FixedVersionSource
// ============================================================================

/// Always returns the same version. Used for pinned versions and tests.
pub struct FixedVersionSource(pub ProtocolVersion);

#[async_trait]
impl VersionSource for FixedVersionSource {
    async fn latest_version(&self) -> VersionInfo {
        VersionInfo {
            version: self.0,
            is_latest: true,
            error: None,
        }
    }
}
