//! ==============================================================================
//! config.rs - Runtime Configuration Loader
//! ==============================================================================
//!
//! purpose:
//!     defines the schema for `rackwatch.toml`.
//!     loads configuration from file or falls back to defaults.
//!
//! structure:
//!     - RemoteConfig: where the origin lives and how long to wait on it.
//!     - WatchdogConfig: how long without a reading before "no new data".
//!     - CacheConfig: where the managed-set blob is persisted.
//!     - RacksConfig: sequence vs set semantics for rack lists.
//!     - HistoryConfig: chart points kept per rack.
//!     - ServerConfig / LoggingConfig: host binary only.
//!     - ActorSection: which identity the host acts as at startup.
//!
//! ==============================================================================

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use serde::Deserialize;

use crate::actor::{ActorIdentity, ActorRole};
use crate::cache::CACHE_KEY;
use crate::remote::FeedTransport;
use crate::store::managed::RackListPolicy;

/// Root configuration structure
#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct MonitorConfig {
    pub remote: RemoteConfig,
    pub watchdog: WatchdogConfig,
    pub cache: CacheConfig,
    pub racks: RacksConfig,
    pub history: HistoryConfig,
    pub server: ServerConfig,
    pub logging: LoggingConfig,
    pub actor: ActorSection,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct RemoteConfig {
    pub base_url: String,
    pub request_timeout_seconds: u64,
    /// "websocket" (default) or "stream" for a line-delimited http response
    pub feed_transport: FeedTransport,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct WatchdogConfig {
    pub stale_after_seconds: u64,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct CacheConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct RacksConfig {
    /// true: adding a rack already in the list is ignored
    pub dedup: bool,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct HistoryConfig {
    pub capacity: usize,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: String,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub show_sensor_data: bool,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ActorSection {
    pub role: ActorRole,
    pub display_name: String,
    pub email: String,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:5000".to_string(),
            request_timeout_seconds: 10,
            feed_transport: FeedTransport::default(),
        }
    }
}

impl Default for WatchdogConfig {
    fn default() -> Self {
        Self { stale_after_seconds: 30 }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("cache").join(format!("{}.json", CACHE_KEY)),
        }
    }
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self { capacity: 100 }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0:3000".to_string(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            show_sensor_data: true,
        }
    }
}

impl Default for ActorSection {
    fn default() -> Self {
        Self {
            role: ActorRole::Owner,
            display_name: String::new(),
            email: String::new(),
        }
    }
}

impl RemoteConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_seconds)
    }
}

impl WatchdogConfig {
    pub fn stale_after(&self) -> Duration {
        Duration::from_secs(self.stale_after_seconds)
    }
}

impl RacksConfig {
    pub fn policy(&self) -> RackListPolicy {
        if self.dedup {
            RackListPolicy::Set
        } else {
            RackListPolicy::Sequence
        }
    }
}

impl ActorSection {
    /// `None` until an email is configured
    pub fn identity(&self) -> Option<ActorIdentity> {
        if self.email.trim().is_empty() {
            return None;
        }
        let display_name = if self.display_name.is_empty() {
            self.email.clone()
        } else {
            self.display_name.clone()
        };
        Some(ActorIdentity {
            role: self.role,
            display_name,
            email: self.email.clone(),
        })
    }
}

impl MonitorConfig {
    /// Load configuration from file
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;

        let config: MonitorConfig = toml::from_str(&content)
            .with_context(|| format!("failed to parse config {}", path.display()))?;

        Ok(config)
    }

    /// Load with default fallback
    pub fn load_or_default() -> Self {
        let paths = [
            PathBuf::from("config").join("rackwatch.toml"),
            PathBuf::from("..").join("config").join("rackwatch.toml"),
        ];

        for path in &paths {
            if path.exists() {
                match Self::load(path) {
                    Ok(config) => {
                        println!("[CONFIG] Loaded from {}", path.display());
                        return config;
                    }
                    Err(e) => {
                        println!("[CONFIG] Warning: {:#}", e);
                    }
                }
            }
        }

        println!("[CONFIG] Warning: No config file found - using defaults");
        Self::default()
    }

    /// Print configuration summary
    pub fn print_summary(&self) {
        println!("┌─────────────────────────────────────────┐");
        println!("│         RACKWATCH CONFIGURATION         │");
        println!("├─────────────────────────────────────────┤");
        println!("│ Origin: {}", self.remote.base_url);
        println!("│ Feed: {:?}", self.remote.feed_transport);
        println!("│ Acting as: {}", self.actor.email);
        println!("│ Watchdog: {}s", self.watchdog.stale_after_seconds);
        println!("│ Cache: {}", self.cache.path.display());
        println!("│ Racks: {:?}", self.racks.policy());
        println!("│ Log Level: {}", self.logging.level);
        println!("└─────────────────────────────────────────┘");
    }
}
