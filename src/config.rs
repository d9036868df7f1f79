use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::Result;

/// All policy knobs in one place. Staleness windows, poll cadence and miss
/// thresholds are deliberately configuration, not invariants.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub discovery: DiscoveryConfig,
    pub session: SessionConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Port the media/relay server binds on, on all interfaces, so any LAN
    /// client (the phone, the receiver) can reach it.
    pub port: u16,
    /// Where relayed uploads land. Defaults to a per-user cache directory.
    pub upload_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DiscoveryConfig {
    /// Per-pass response window; devices that miss it are simply not
    /// reported this pass.
    pub scan_timeout_secs: u64,
    /// Devices absent for this long are evicted from the registry.
    pub stale_after_secs: u64,
    /// Delay between periodic background scan passes.
    pub scan_interval_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub poll_interval_ms: u64,
    /// Consecutive failed polls before the session demotes to Error.
    pub miss_threshold: u32,
    /// Adapter connect timeout.
    pub connect_timeout_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 8765,
            upload_dir: None,
        }
    }
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            scan_timeout_secs: 5,
            stale_after_secs: 30,
            scan_interval_secs: 60,
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 1000,
            miss_threshold: 3,
            connect_timeout_secs: 10,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            discovery: DiscoveryConfig::default(),
            session: SessionConfig::default(),
        }
    }
}

impl Config {
    /// Load from the default config path, falling back to defaults if the
    /// file does not exist. A malformed file is an error, not a silent reset.
    pub fn load() -> Result<Self> {
        match Self::default_path() {
            Some(path) if path.exists() => Self::load_from(&path),
            _ => Ok(Self::default()),
        }
    }

    pub fn load_from(path: &std::path::Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        toml::from_str(&raw).map_err(|e| {
            crate::CastError::Discovery(format!("invalid config {}: {}", path.display(), e))
        })
    }

    pub fn default_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("dev", "lancast", "lancast")
            .map(|dirs| dirs.config_dir().join("config.toml"))
    }

    /// Resolved upload directory, created on first use.
    pub fn upload_dir(&self) -> PathBuf {
        let dir = self.server.upload_dir.clone().unwrap_or_else(|| {
            directories::ProjectDirs::from("dev", "lancast", "lancast")
                .map(|dirs| dirs.cache_dir().join("uploads"))
                .unwrap_or_else(|| std::env::temp_dir().join("lancast-uploads"))
        });
        if let Err(e) = std::fs::create_dir_all(&dir) {
            warn!("Failed to create upload dir {}: {}", dir.display(), e);
        }
        dir
    }

    pub fn scan_timeout(&self) -> Duration {
        Duration::from_secs(self.discovery.scan_timeout_secs)
    }

    pub fn stale_after(&self) -> Duration {
        Duration::from_secs(self.discovery.stale_after_secs)
    }

    pub fn scan_interval(&self) -> Duration {
        Duration::from_secs(self.discovery.scan_interval_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.session.poll_interval_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.session.connect_timeout_secs)
    }
}
