//! Edgewatch configuration system.
//!
//! Loaded once at startup from `~/.edgewatch/config.toml` (or an explicit
//! path) and validated before any component starts running. Range errors
//! are fatal here, never discovered mid-loop.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{EdgewatchError, Result};

/// Root agent configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Seconds between self-test polls.
    #[serde(default = "default_health_poll_interval")]
    pub health_poll_interval: u64,
    /// Hours between health exports. Zero disables the export activity.
    #[serde(default = "default_health_export_interval")]
    pub health_export_interval: u64,
    /// Directory receiving export snapshots.
    #[serde(default = "default_health_export_dir")]
    pub health_export_dir: PathBuf,
    /// Gzip export snapshots after writing them.
    #[serde(default)]
    pub compress_health_exports: bool,
    /// Days an export snapshot is kept on disk before pruning.
    #[serde(default = "default_health_export_retention")]
    pub health_export_retention: u64,
    /// Days a health record is kept in the store.
    #[serde(default = "default_health_record_retention")]
    pub health_record_retention: u64,
    /// Services restarted automatically when the self-test reports them down.
    #[serde(default)]
    pub restart_services: Vec<String>,
    /// Services whose unit state the self-test reports.
    #[serde(default = "default_monitored_services")]
    pub monitored_services: Vec<String>,
    /// Worker count for the background job queue.
    #[serde(default = "default_queue_workers")]
    pub queue_workers: usize,
    /// Bounded capacity of the background job queue.
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    /// Scheduler loop cadence in seconds; bounds scheduling jitter.
    #[serde(default = "default_tick_resolution")]
    pub tick_resolution_secs: u64,
    /// SQLite database holding health records.
    #[serde(default = "default_health_db")]
    pub health_db: PathBuf,
}

fn default_health_poll_interval() -> u64 { 10 }
fn default_health_export_interval() -> u64 { 6 }
fn default_health_export_dir() -> PathBuf { AgentConfig::home_dir().join("health_exports") }
fn default_health_export_retention() -> u64 { 7 }
fn default_health_record_retention() -> u64 { 30 }
fn default_monitored_services() -> Vec<String> {
    vec!["kismet".into(), "bettercap".into(), "gpsd".into()]
}
fn default_queue_workers() -> usize { 2 }
fn default_queue_capacity() -> usize { 64 }
fn default_tick_resolution() -> u64 { 1 }
fn default_health_db() -> PathBuf { AgentConfig::home_dir().join("health.db") }

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            health_poll_interval: default_health_poll_interval(),
            health_export_interval: default_health_export_interval(),
            health_export_dir: default_health_export_dir(),
            compress_health_exports: false,
            health_export_retention: default_health_export_retention(),
            health_record_retention: default_health_record_retention(),
            restart_services: Vec::new(),
            monitored_services: default_monitored_services(),
            queue_workers: default_queue_workers(),
            queue_capacity: default_queue_capacity(),
            tick_resolution_secs: default_tick_resolution(),
            health_db: default_health_db(),
        }
    }
}

impl AgentConfig {
    /// Load config from the default path (~/.edgewatch/config.toml).
    pub fn load() -> Result<Self> {
        let path = Self::default_path();
        if path.exists() {
            Self::load_from(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Load config from a specific path.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| EdgewatchError::Config(format!("Failed to read config: {e}")))?;
        let config: Self = toml::from_str(&content)
            .map_err(|e| EdgewatchError::Config(format!("Failed to parse config: {e}")))?;
        Ok(config)
    }

    /// Save config to the default path.
    pub fn save(&self) -> Result<()> {
        let path = Self::default_path();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)
            .map_err(|e| EdgewatchError::Config(format!("Failed to serialize config: {e}")))?;
        std::fs::write(&path, content)?;
        Ok(())
    }

    /// Get the default config path.
    pub fn default_path() -> PathBuf {
        Self::home_dir().join("config.toml")
    }

    /// Get the Edgewatch home directory.
    pub fn home_dir() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".edgewatch")
    }

    /// Check every range rule up front. Anything rejected here would
    /// otherwise only surface mid-loop, so a bad value is fatal at startup.
    pub fn validate(&self) -> Result<()> {
        if self.health_poll_interval < 1 {
            return Err(EdgewatchError::Config(
                "health_poll_interval must be >= 1 second".into(),
            ));
        }
        if self.health_export_retention < 1 {
            return Err(EdgewatchError::Config(
                "health_export_retention must be >= 1 day".into(),
            ));
        }
        if self.health_record_retention < 1 {
            return Err(EdgewatchError::Config(
                "health_record_retention must be >= 1 day".into(),
            ));
        }
        if self.queue_workers < 1 {
            return Err(EdgewatchError::Config("queue_workers must be >= 1".into()));
        }
        if self.queue_capacity < 1 {
            return Err(EdgewatchError::Config("queue_capacity must be >= 1".into()));
        }
        if self.tick_resolution_secs < 1 {
            return Err(EdgewatchError::Config(
                "tick_resolution_secs must be >= 1 second".into(),
            ));
        }
        if self.health_export_interval > 0 {
            std::fs::create_dir_all(&self.health_export_dir).map_err(|e| {
                EdgewatchError::Config(format!(
                    "health_export_dir {} is not usable: {e}",
                    self.health_export_dir.display()
                ))
            })?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let mut cfg = AgentConfig::default();
        // Point the export dir somewhere writable for the check.
        cfg.health_export_dir = std::env::temp_dir().join("edgewatch-test-config-exports");
        assert!(cfg.validate().is_ok());
        std::fs::remove_dir_all(&cfg.health_export_dir).ok();
    }

    #[test]
    fn zero_poll_interval_rejected() {
        let cfg = AgentConfig {
            health_poll_interval: 0,
            ..AgentConfig::default()
        };
        assert!(matches!(cfg.validate(), Err(EdgewatchError::Config(_))));
    }

    #[test]
    fn zero_workers_rejected() {
        let cfg = AgentConfig {
            queue_workers: 0,
            ..AgentConfig::default()
        };
        assert!(matches!(cfg.validate(), Err(EdgewatchError::Config(_))));
    }

    #[test]
    fn export_can_be_disabled() {
        let cfg = AgentConfig {
            health_export_interval: 0,
            // Deliberately unusable path: must not matter when export is off.
            health_export_dir: PathBuf::from("/dev/null/nope"),
            ..AgentConfig::default()
        };
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn partial_toml_fills_defaults() {
        let cfg: AgentConfig =
            toml::from_str("health_poll_interval = 30\nrestart_services = [\"kismet\"]").unwrap();
        assert_eq!(cfg.health_poll_interval, 30);
        assert_eq!(cfg.restart_services, vec!["kismet".to_string()]);
        assert_eq!(cfg.health_export_interval, 6);
        assert_eq!(cfg.queue_workers, 2);
    }
}
