//! Configuration types for the assistant scheduling core.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::error::{Result, YumeError};

/// Largest accepted temporal floor (30 days).
pub const MAX_TEMPORAL_DISTANCE_SECS: u64 = 30 * 24 * 3600;
/// Largest accepted history retention window (100 years).
pub const MAX_HISTORY_RETENTION_DAYS: u32 = 36_500;

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct YumeConfig {
    /// Adaptive interaction scheduler timing.
    pub scheduler: SchedulerConfig,
    /// Run timeline persistence.
    pub store: StoreConfig,
    /// Log output.
    pub logging: LoggingConfig,
}

/// Timing knobs for the adaptive interaction scheduler.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Default delay between a trigger and the decision it causes.
    pub debounce_delay_secs: u64,
    /// Shorter delay used for plan changes affecting today or tomorrow.
    pub urgent_debounce_delay_secs: u64,
    /// Minimum lead time between committing a run and firing it.
    pub min_temporal_distance_secs: u64,
    /// Upper bound for building context plus asking the decision gateway.
    pub decision_timeout_secs: u64,
    /// Upper bound for one action invocation.
    pub action_timeout_secs: u64,
    /// Pause before the single retry of a failed store write.
    pub store_retry_delay_ms: u64,
    /// Number of recent runs included in the decision context.
    pub context_recent_runs: usize,
    /// Number of recent agent interactions included in the decision context.
    pub context_recent_interactions: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            debounce_delay_secs: 60,
            urgent_debounce_delay_secs: 10,
            min_temporal_distance_secs: 15 * 60,
            decision_timeout_secs: 120,
            action_timeout_secs: 300,
            store_retry_delay_ms: 250,
            context_recent_runs: 10,
            context_recent_interactions: 20,
        }
    }
}

impl SchedulerConfig {
    pub fn debounce_delay(&self) -> Duration {
        Duration::from_secs(self.debounce_delay_secs)
    }

    pub fn urgent_debounce_delay(&self) -> Duration {
        Duration::from_secs(self.urgent_debounce_delay_secs)
    }

    /// Temporal floor as a calendar duration (added to wall-clock instants).
    pub fn min_temporal_distance(&self) -> chrono::Duration {
        let secs = i64::try_from(self.min_temporal_distance_secs).unwrap_or(i64::MAX);
        chrono::Duration::try_seconds(secs).unwrap_or(chrono::Duration::MAX)
    }

    pub fn decision_timeout(&self) -> Duration {
        Duration::from_secs(self.decision_timeout_secs)
    }

    pub fn action_timeout(&self) -> Duration {
        Duration::from_secs(self.action_timeout_secs)
    }

    pub fn store_retry_delay(&self) -> Duration {
        Duration::from_millis(self.store_retry_delay_ms)
    }
}

/// Run timeline persistence settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// SQLite database path (None = `<data_dir>/scheduler.db`).
    pub database_path: Option<PathBuf>,
    /// Prune terminal runs older than this many days. None keeps every run.
    pub history_retention_days: Option<u32>,
    /// How often the retention janitor runs.
    pub janitor_interval_secs: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            database_path: None,
            history_retention_days: None,
            janitor_interval_secs: 12 * 3600,
        }
    }
}

impl StoreConfig {
    /// Resolved database path.
    pub fn database_path(&self) -> PathBuf {
        self.database_path
            .clone()
            .unwrap_or_else(crate::yume_dirs::scheduler_db_file)
    }

    pub fn janitor_interval(&self) -> Duration {
        Duration::from_secs(self.janitor_interval_secs)
    }
}

/// Log output settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// `EnvFilter` directive used when `RUST_LOG` is unset.
    pub filter: String,
    /// Also write a daily-rolling log file under the logs directory.
    pub log_to_file: bool,
    /// Log directory (None = `<data_dir>/logs`).
    pub directory: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: "yume=info".to_owned(),
            log_to_file: false,
            directory: None,
        }
    }
}

impl LoggingConfig {
    pub fn directory(&self) -> PathBuf {
        self.directory
            .clone()
            .unwrap_or_else(crate::yume_dirs::logs_dir)
    }
}

impl YumeConfig {
    /// Load configuration from a TOML file, falling back to defaults for missing fields.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, parsed, or fails validation.
    pub fn from_file(path: &std::path::Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self =
            toml::from_str(&content).map_err(|e| YumeError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to a TOML file, creating parent directories as needed.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written or the config cannot be serialized.
    pub fn save_to_file(&self, path: &std::path::Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content =
            toml::to_string_pretty(self).map_err(|e| YumeError::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Returns the default config file path: `<config_dir>/config.toml`.
    pub fn default_config_path() -> PathBuf {
        crate::yume_dirs::config_file()
    }

    /// Reject settings that would stall or busy-loop the scheduler.
    pub fn validate(&self) -> Result<()> {
        let s = &self.scheduler;
        if s.debounce_delay_secs == 0 {
            return Err(YumeError::Config(
                "scheduler.debounce_delay_secs must be greater than zero".to_owned(),
            ));
        }
        if s.urgent_debounce_delay_secs == 0 {
            return Err(YumeError::Config(
                "scheduler.urgent_debounce_delay_secs must be greater than zero".to_owned(),
            ));
        }
        if s.decision_timeout_secs == 0 || s.action_timeout_secs == 0 {
            return Err(YumeError::Config(
                "scheduler timeouts must be greater than zero".to_owned(),
            ));
        }
        if s.min_temporal_distance_secs > MAX_TEMPORAL_DISTANCE_SECS {
            return Err(YumeError::Config(format!(
                "scheduler.min_temporal_distance_secs must be at most {MAX_TEMPORAL_DISTANCE_SECS}"
            )));
        }
        match self.store.history_retention_days {
            Some(0) => {
                return Err(YumeError::Config(
                    "store.history_retention_days must be at least 1 when set".to_owned(),
                ));
            }
            Some(days) if days > MAX_HISTORY_RETENTION_DAYS => {
                return Err(YumeError::Config(format!(
                    "store.history_retention_days must be at most {MAX_HISTORY_RETENTION_DAYS}"
                )));
            }
            _ => {}
        }
        if self.store.janitor_interval_secs == 0 {
            return Err(YumeError::Config(
                "store.janitor_interval_secs must be greater than zero".to_owned(),
            ));
        }
        Ok(())
    }
}
