//! BotClaw configuration system.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{BotClawError, Result};
use crate::types::QueueName;

/// Root configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct BotClawConfig {
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub policy: PolicyConfig,
    #[serde(default)]
    pub queue: QueueConfig,
    #[serde(default)]
    pub workers: WorkerConfig,
    #[serde(default)]
    pub executor: ExecutorConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
}

impl BotClawConfig {
    /// Load config from the default path (~/.botclaw/config.toml).
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
            .map_err(|e| BotClawError::Config(format!("Failed to read config: {e}")))?;
        let config: Self = toml::from_str(&content)
            .map_err(|e| BotClawError::Config(format!("Failed to parse config: {e}")))?;
        Ok(config)
    }

    /// Save config to the given path.
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)
            .map_err(|e| BotClawError::Config(format!("Failed to serialize config: {e}")))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Get the default config path.
    pub fn default_path() -> PathBuf {
        Self::home_dir().join("config.toml")
    }

    /// Get the BotClaw home directory.
    pub fn home_dir() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".botclaw")
    }
}

fn bool_true() -> bool { true }

/// Scheduler sweep configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Seconds between sweeps. Also the idempotency tick length.
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,
    /// Expand active campaigns into derived action jobs instead of
    /// dispatching their bots one by one.
    #[serde(default)]
    pub campaign_fan_out: bool,
}

fn default_sweep_interval() -> u64 { 60 }

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            sweep_interval_secs: default_sweep_interval(),
            campaign_fan_out: false,
        }
    }
}

/// Policy chain configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyConfig {
    #[serde(default = "bool_true")]
    pub quiet_hours_enabled: bool,
    /// Local "HH:MM".
    #[serde(default = "default_quiet_start")]
    pub quiet_hours_start: String,
    /// Local "HH:MM".
    #[serde(default = "default_quiet_end")]
    pub quiet_hours_end: String,
    /// Offset of the tenant's local time from UTC.
    #[serde(default)]
    pub utc_offset_minutes: i32,
    /// Ceiling of concurrently running bots per tenant.
    #[serde(default = "default_max_running")]
    pub max_running_per_tenant: usize,
    /// Confidence recorded when no strategy advisor has an opinion.
    #[serde(default = "default_confidence")]
    pub default_confidence: f64,
}

fn default_quiet_start() -> String { "23:00".into() }
fn default_quiet_end() -> String { "06:00".into() }
fn default_max_running() -> usize { 5 }
fn default_confidence() -> f64 { 0.75 }

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            quiet_hours_enabled: true,
            quiet_hours_start: default_quiet_start(),
            quiet_hours_end: default_quiet_end(),
            utc_offset_minutes: 0,
            max_running_per_tenant: default_max_running(),
            default_confidence: default_confidence(),
        }
    }
}

/// Execution queue retry and retention configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    /// Attempts for bot-level jobs.
    #[serde(default = "default_bot_attempts")]
    pub bot_max_attempts: u32,
    /// Attempts for campaign-derived action jobs.
    #[serde(default = "default_action_attempts")]
    pub action_max_attempts: u32,
    #[serde(default = "default_backoff_base")]
    pub backoff_base_ms: u64,
    #[serde(default = "default_backoff_max")]
    pub backoff_max_ms: u64,
    /// Terminal jobs kept for inspection.
    #[serde(default = "default_history_limit")]
    pub history_limit: usize,
    #[serde(default = "default_history_retention")]
    pub history_retention_hours: u64,
}

fn default_bot_attempts() -> u32 { 3 }
fn default_action_attempts() -> u32 { 2 }
fn default_backoff_base() -> u64 { 5_000 }
fn default_backoff_max() -> u64 { 300_000 }
fn default_history_limit() -> usize { 500 }
fn default_history_retention() -> u64 { 24 }

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            bot_max_attempts: default_bot_attempts(),
            action_max_attempts: default_action_attempts(),
            backoff_base_ms: default_backoff_base(),
            backoff_max_ms: default_backoff_max(),
            history_limit: default_history_limit(),
            history_retention_hours: default_history_retention(),
        }
    }
}

impl QueueConfig {
    /// Attempt budget for a queue.
    pub fn max_attempts(&self, queue: QueueName) -> u32 {
        let attempts = match queue {
            QueueName::BotExecution => self.bot_max_attempts,
            QueueName::ActionExecutor | QueueName::MediaContent => self.action_max_attempts,
        };
        attempts.max(1)
    }

    /// Exponential backoff before attempt `attempt + 1`.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(16);
        let ms = self.backoff_base_ms.saturating_mul(1u64 << exp);
        Duration::from_millis(ms.min(self.backoff_max_ms))
    }
}

/// Worker pool concurrency and action timeouts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    #[serde(default = "default_bot_concurrency")]
    pub bot_concurrency: usize,
    #[serde(default = "default_action_concurrency")]
    pub action_concurrency: usize,
    /// Content generation is resource-heavy; keep this low.
    #[serde(default = "default_media_concurrency")]
    pub media_concurrency: usize,
    #[serde(default = "default_action_timeout")]
    pub action_timeout_secs: u64,
    #[serde(default = "default_media_timeout")]
    pub media_timeout_secs: u64,
}

fn default_bot_concurrency() -> usize { 4 }
fn default_action_concurrency() -> usize { 8 }
fn default_media_concurrency() -> usize { 2 }
fn default_action_timeout() -> u64 { 60 }
fn default_media_timeout() -> u64 { 300 }

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            bot_concurrency: default_bot_concurrency(),
            action_concurrency: default_action_concurrency(),
            media_concurrency: default_media_concurrency(),
            action_timeout_secs: default_action_timeout(),
            media_timeout_secs: default_media_timeout(),
        }
    }
}

impl WorkerConfig {
    pub fn concurrency(&self, queue: QueueName) -> usize {
        let limit = match queue {
            QueueName::BotExecution => self.bot_concurrency,
            QueueName::ActionExecutor => self.action_concurrency,
            QueueName::MediaContent => self.media_concurrency,
        };
        limit.max(1)
    }

    /// Bot-level jobs may post, so they get the generous media timeout.
    pub fn timeout(&self, queue: QueueName) -> Duration {
        match queue {
            QueueName::ActionExecutor => Duration::from_secs(self.action_timeout_secs),
            QueueName::BotExecution | QueueName::MediaContent => {
                Duration::from_secs(self.media_timeout_secs)
            }
        }
    }
}

/// Platform action bridge.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ExecutorConfig {
    /// POST target for action requests. Empty = dry run.
    #[serde(default)]
    pub webhook_url: String,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
}

/// Database configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: String,
}

fn default_db_path() -> String { "~/.botclaw/botclaw.db".into() }

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self { path: default_db_path() }
    }
}

impl DatabaseConfig {
    /// Path with `~` expanded.
    pub fn resolved_path(&self) -> PathBuf {
        PathBuf::from(shellexpand::tilde(&self.path).to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = BotClawConfig::default();
        assert_eq!(config.scheduler.sweep_interval_secs, 60);
        assert_eq!(config.policy.quiet_hours_start, "23:00");
        assert_eq!(config.policy.quiet_hours_end, "06:00");
        assert_eq!(config.queue.bot_max_attempts, 3);
        assert_eq!(config.queue.action_max_attempts, 2);
        assert!(config.executor.webhook_url.is_empty());
    }

    #[test]
    fn test_config_from_toml() {
        let toml_str = r#"
            [scheduler]
            sweep_interval_secs = 10
            campaign_fan_out = true

            [policy]
            quiet_hours_start = "22:30"
            utc_offset_minutes = 420

            [workers]
            media_concurrency = 1
        "#;

        let config: BotClawConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.scheduler.sweep_interval_secs, 10);
        assert!(config.scheduler.campaign_fan_out);
        assert_eq!(config.policy.quiet_hours_start, "22:30");
        assert_eq!(config.policy.quiet_hours_end, "06:00");
        assert_eq!(config.policy.utc_offset_minutes, 420);
        assert_eq!(config.workers.concurrency(QueueName::MediaContent), 1);
    }

    #[test]
    fn test_config_missing_fields_use_defaults() {
        let config: BotClawConfig = toml::from_str("").unwrap();
        assert_eq!(config.policy.max_running_per_tenant, 5);
        assert_eq!(config.workers.bot_concurrency, 4);
    }

    #[test]
    fn test_backoff_is_exponential_and_capped() {
        let queue = QueueConfig {
            backoff_base_ms: 1_000,
            backoff_max_ms: 3_000,
            ..Default::default()
        };
        assert_eq!(queue.backoff(1), Duration::from_millis(1_000));
        assert_eq!(queue.backoff(2), Duration::from_millis(2_000));
        assert_eq!(queue.backoff(3), Duration::from_millis(3_000));
        assert_eq!(queue.backoff(10), Duration::from_millis(3_000));
    }

    #[test]
    fn test_attempt_budget_per_queue() {
        let queue = QueueConfig::default();
        assert_eq!(queue.max_attempts(QueueName::BotExecution), 3);
        assert_eq!(queue.max_attempts(QueueName::MediaContent), 2);
    }

    #[test]
    fn test_home_dir() {
        let home = BotClawConfig::home_dir();
        assert!(home.to_string_lossy().contains("botclaw"));
    }
}
