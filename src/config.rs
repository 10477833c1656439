//! Configuration types for the scheduling and alert engine.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::error::{Result, VigilError};

/// Top-level engine configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct VigilConfig {
    /// Task scheduler settings.
    pub scheduler: SchedulerConfig,
    /// Retry/backoff settings.
    pub retry: RetryConfig,
    /// Per-task-type quality feedback settings.
    pub quality: QualityConfig,
    /// Alert delivery policy settings.
    pub notifications: NotificationConfig,
    /// Escalation timing for unacknowledged alerts.
    pub escalation: EscalationConfig,
    /// Task persistence settings.
    pub store: StoreConfig,
    /// Log output settings.
    pub logging: LoggingConfig,
}

/// How the scheduler invokes task executors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum DispatchMode {
    /// Await each executor on the timer-processing loop.
    Inline,
    /// Hand executors to a bounded worker pool.
    #[default]
    Pooled,
}

/// Task scheduler configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// How far in the past a requested due time may be before it is rejected.
    pub grace_window_secs: u64,
    /// Minimal delay applied when a due time is clamped forward.
    pub min_delay_ms: u64,
    /// Executor call budget before the attempt counts as a timeout failure.
    pub executor_timeout_secs: u64,
    /// Executor dispatch mode.
    pub dispatch_mode: DispatchMode,
    /// Worker pool size for pooled dispatch.
    pub max_concurrent_dispatches: usize,
    /// Retry budget used when a caller does not pass one.
    pub default_max_retries: u32,
    /// How long terminal tasks stay in the store before purge.
    pub retention_secs: u64,
    /// Interval between maintenance passes (retention purge).
    pub maintenance_interval_secs: u64,
    /// Max run-history entries kept in memory.
    pub history_limit: usize,
    /// Priorities at or above this value count as background work.
    pub background_priority_threshold: i32,
    /// Extra delay before the first attempt of a deprioritized background task.
    pub deprioritized_delay_secs: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            grace_window_secs: 60,
            min_delay_ms: 1_000,
            executor_timeout_secs: 30,
            dispatch_mode: DispatchMode::Pooled,
            max_concurrent_dispatches: 4,
            default_max_retries: 3,
            retention_secs: 7 * 24 * 3600,
            maintenance_interval_secs: 3600,
            history_limit: 400,
            background_priority_threshold: 5,
            deprioritized_delay_secs: 300,
        }
    }
}

/// Retry and backoff configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Base backoff delay in milliseconds.
    pub base_delay_ms: u64,
    /// Upper bound on the backoff delay in milliseconds.
    pub max_delay_ms: u64,
    /// Jitter as a fraction of the computed delay (0.1 = up to +10%).
    pub jitter_ratio: f64,
    /// Trailing window for the per-error-kind retry cap.
    pub kind_window_secs: u64,
    /// Max retries granted per error kind within the window, across all tasks.
    pub kind_limit: u32,
    /// Divisor applied to `kind_limit` for deprioritized task types.
    pub deprioritized_cap_divisor: u32,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            base_delay_ms: 5_000,
            max_delay_ms: 60_000,
            jitter_ratio: 0.1,
            kind_window_secs: 60,
            kind_limit: 10,
            deprioritized_cap_divisor: 2,
        }
    }
}

/// Quality feedback configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QualityConfig {
    /// Task types scoring below this are deprioritized.
    pub deprioritize_threshold: f64,
}

impl Default for QualityConfig {
    fn default() -> Self {
        Self {
            deprioritize_threshold: 0.4,
        }
    }
}

/// Delay per importance tier, in seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DelayTier {
    /// Delay for HIGH importance.
    pub high_secs: u64,
    /// Delay for NORMAL importance.
    pub normal_secs: u64,
    /// Delay for LOW importance.
    pub low_secs: u64,
}

/// Alert delivery policy configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NotificationConfig {
    /// When disabled every alert is delivered immediately.
    pub smart_timing_enabled: bool,
    /// Whether do-not-disturb defers non-urgent alerts.
    pub respect_do_not_disturb: bool,
    /// Scale volume with importance and raise it on escalation.
    pub adaptive_volume: bool,
    /// Pick vibration patterns by importance and strengthen them on escalation.
    pub adaptive_vibration: bool,
    /// Start of the quiet-hours window (local hour, 0-23).
    pub quiet_start_hour: u8,
    /// End of the quiet-hours window (local hour, 0-23, exclusive).
    pub quiet_end_hour: u8,
    /// Recent-alert count above which LOW alerts are batched.
    pub batch_threshold: u32,
    /// Window used to count recent alerts.
    pub batch_window_secs: u64,
    /// Extra delay added to LOW alerts while batching.
    pub batch_extension_secs: u64,
    /// LOW alerts still undelivered after this age are suppressed.
    pub low_stale_after_secs: u64,
    /// NORMAL alerts still undelivered after this age are suppressed.
    pub normal_stale_after_secs: u64,
    /// Redelivery interval after a failed URGENT delivery.
    pub urgent_redelivery_secs: u64,
    /// Max redelivery attempts for a failed URGENT delivery.
    pub urgent_redelivery_attempts: u32,
    /// Records kept in the in-memory ledger.
    pub history_limit: usize,
    /// Delays while the user is in a call.
    pub in_call_delay: DelayTier,
    /// Delays during quiet hours.
    pub quiet_hours_delay: DelayTier,
    /// Delays while do-not-disturb is engaged.
    pub do_not_disturb_delay: DelayTier,
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            smart_timing_enabled: true,
            respect_do_not_disturb: true,
            adaptive_volume: true,
            adaptive_vibration: true,
            quiet_start_hour: 23,
            quiet_end_hour: 7,
            batch_threshold: 5,
            batch_window_secs: 3_600,
            batch_extension_secs: 1_800,
            low_stale_after_secs: 12 * 3_600,
            normal_stale_after_secs: 24 * 3_600,
            urgent_redelivery_secs: 5,
            urgent_redelivery_attempts: 5,
            history_limit: 200,
            in_call_delay: DelayTier {
                high_secs: 60,
                normal_secs: 300,
                low_secs: 1_800,
            },
            quiet_hours_delay: DelayTier {
                high_secs: 600,
                normal_secs: 7_200,
                low_secs: 28_800,
            },
            do_not_disturb_delay: DelayTier {
                high_secs: 30,
                normal_secs: 180,
                low_secs: 1_800,
            },
        }
    }
}

/// Escalation timing configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EscalationConfig {
    /// Grace period before the first URGENT escalation.
    pub urgent_grace_secs: u64,
    /// Grace period before the single HIGH escalation.
    pub high_grace_secs: u64,
    /// Period between repeated URGENT escalations.
    pub urgent_period_secs: u64,
    /// Optional cap on URGENT escalations (None = until acknowledged).
    pub urgent_cap: Option<u32>,
    /// Volume increase per escalation step, in percent.
    pub volume_step_percent: u8,
}

impl Default for EscalationConfig {
    fn default() -> Self {
        Self {
            urgent_grace_secs: 30,
            high_grace_secs: 60,
            urgent_period_secs: 30,
            urgent_cap: None,
            volume_step_percent: 20,
        }
    }
}

/// Task store backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum StoreBackend {
    /// SQLite database file.
    #[default]
    Sqlite,
    /// Volatile in-process map (no restart recovery).
    Memory,
}

/// Task store configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Backend selection.
    pub backend: StoreBackend,
    /// Database path (SQLite backend).
    pub path: PathBuf,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::Sqlite,
            path: crate::vigil_dirs::store_path(),
        }
    }
}

/// Log output configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Filter directive used when `RUST_LOG` is unset.
    pub level: String,
    /// Emit logs to stderr.
    pub console: bool,
    /// Directory for daily rotated log files (None = no file logging).
    pub directory: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "vigil=info".to_owned(),
            console: true,
            directory: None,
        }
    }
}

impl VigilConfig {
    /// Load configuration from a TOML file, falling back to defaults for missing fields.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, parsed, or fails validation.
    pub fn from_file(path: &std::path::Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content).map_err(|e| VigilError::Config(e.to_string()))?;
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
            toml::to_string_pretty(self).map_err(|e| VigilError::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Returns the default config file path: `<config dir>/config.toml`.
    pub fn default_config_path() -> PathBuf {
        crate::vigil_dirs::config_dir().join("config.toml")
    }

    /// Reject values the engine cannot operate with.
    pub fn validate(&self) -> Result<()> {
        let invalid = |msg: &str| Err(VigilError::Config(msg.to_owned()));

        if self.scheduler.max_concurrent_dispatches == 0 {
            return invalid("scheduler.max_concurrent_dispatches must be greater than 0");
        }
        if self.scheduler.executor_timeout_secs == 0 {
            return invalid("scheduler.executor_timeout_secs must be greater than 0");
        }
        if self.retry.base_delay_ms == 0 {
            return invalid("retry.base_delay_ms must be greater than 0");
        }
        if self.retry.base_delay_ms > self.retry.max_delay_ms {
            return invalid("retry.base_delay_ms must be <= retry.max_delay_ms");
        }
        if !(0.0..=1.0).contains(&self.retry.jitter_ratio) {
            return invalid("retry.jitter_ratio must be within [0, 1]");
        }
        if self.retry.deprioritized_cap_divisor == 0 {
            return invalid("retry.deprioritized_cap_divisor must be greater than 0");
        }
        if !(0.0..=1.0).contains(&self.quality.deprioritize_threshold) {
            return invalid("quality.deprioritize_threshold must be within [0, 1]");
        }
        if self.notifications.quiet_start_hour > 23 || self.notifications.quiet_end_hour > 23 {
            return invalid("notifications quiet hours must be within 0-23");
        }
        if self.escalation.urgent_period_secs == 0 {
            return invalid("escalation.urgent_period_secs must be greater than 0");
        }
        Ok(())
    }
}
