//! Application configuration management.
//!
//! Configuration is stored at `~/.config/rollcache/config.json`. Missing
//! fields take their defaults, and a few environment variables (usually set
//! through `.env`) override the file:
//!
//! - `ROLLCACHE_GATEWAY_URL`
//! - `ROLLCACHE_POLL_INTERVAL_MS`
//! - `ROLLCACHE_LOG_DIR`

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use rollcache_core::cache::PollInterval;
use rollcache_core::views::{DEFAULT_MOST_PRESENT_LIMIT, DEFAULT_RECENT_LIMIT};
use serde::{Deserialize, Serialize};

/// Application name used for config directory paths
const APP_NAME: &str = "rollcache";

/// Config file name
const CONFIG_FILE: &str = "config.json";

const DEFAULT_GATEWAY_URL: &str = "http://localhost:5005";
const DEFAULT_POLL_INTERVAL_MS: u64 = 15_000;
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub gateway_url: String,
    pub poll_interval_ms: u64,
    pub request_timeout_secs: u64,
    /// Daily rolling log files are written here when set
    pub log_dir: Option<PathBuf>,
    pub recent_limit: usize,
    pub most_present_limit: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            gateway_url: DEFAULT_GATEWAY_URL.to_string(),
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
            log_dir: None,
            recent_limit: DEFAULT_RECENT_LIMIT,
            most_present_limit: DEFAULT_MOST_PRESENT_LIMIT,
        }
    }
}

impl Config {
    /// Load the config file (or defaults), then apply environment overrides.
    ///
    /// Also returns a message for each override that was ignored. Logging is
    /// configured from the loaded config, so the caller reports these once
    /// it is up.
    pub fn load() -> Result<(Self, Vec<String>)> {
        let path = Self::config_path()?;
        let mut config = if path.exists() {
            let contents = std::fs::read_to_string(&path)
                .with_context(|| format!("Failed to read {}", path.display()))?;
            serde_json::from_str(&contents)
                .with_context(|| format!("Failed to parse {}", path.display()))?
        } else {
            Self::default()
        };
        let ignored = config.apply_overrides(|name| std::env::var(name).ok());
        Ok((config, ignored))
    }

    pub fn save(&self) -> Result<PathBuf> {
        let path = Self::config_path()?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents = serde_json::to_string_pretty(self)?;
        std::fs::write(&path, contents)?;
        Ok(path)
    }

    fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find config directory"))?;
        Ok(config_dir.join(APP_NAME).join(CONFIG_FILE))
    }

    /// Apply overrides from `lookup` (normally the process environment).
    /// Unparsable values are skipped; one message per skipped value is
    /// returned.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Vec<String> {
        let mut ignored = Vec::new();
        if let Some(url) = lookup("ROLLCACHE_GATEWAY_URL").filter(|v| !v.trim().is_empty()) {
            self.gateway_url = url.trim().to_string();
        }
        if let Some(raw) = lookup("ROLLCACHE_POLL_INTERVAL_MS") {
            match raw.trim().parse() {
                Ok(ms) => self.poll_interval_ms = ms,
                Err(_) => ignored.push(format!("Ignoring invalid ROLLCACHE_POLL_INTERVAL_MS: {:?}", raw)),
            }
        }
        if let Some(dir) = lookup("ROLLCACHE_LOG_DIR").filter(|v| !v.trim().is_empty()) {
            self.log_dir = Some(PathBuf::from(dir.trim()));
        }
        ignored
    }

    /// Configured interval, never below the polling floor.
    pub fn poll_interval(&self) -> PollInterval {
        PollInterval::from_millis(self.poll_interval_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}
