use chrono::Weekday;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::core::models::event::ModelTier;

/// Upper bound on a subscriber's queue of unread snapshots.
pub const MAX_SUBSCRIBER_QUEUE: usize = 4096;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config: {0}")]
    ReadError(#[from] std::io::Error),
    #[error("Failed to parse config: {0}")]
    ParseError(#[from] toml::de::Error),
    #[error("Failed to serialize config: {0}")]
    SerializeError(#[from] toml::ser::Error),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSettings {
    /// Token budget for one 5-hour session window
    #[serde(default = "default_budget_limit")]
    pub budget_limit: u64,
}

fn default_budget_limit() -> u64 {
    750_000
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            budget_limit: default_budget_limit(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TierLimit {
    pub tier: String,
    pub hours_limit: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WeeklySettings {
    /// Day the weekly period resets on (e.g. "monday")
    #[serde(default = "default_week_start")]
    pub week_start: String,
    /// UTC hour of the reset
    #[serde(default)]
    pub reset_hour: u32,
    #[serde(default = "default_tiers")]
    pub tiers: Vec<TierLimit>,
}

fn default_week_start() -> String {
    "monday".to_string()
}

fn default_tiers() -> Vec<TierLimit> {
    vec![
        TierLimit {
            tier: "standard".into(),
            hours_limit: 80.0,
        },
        TierLimit {
            tier: "premium".into(),
            hours_limit: 24.0,
        },
    ]
}

impl Default for WeeklySettings {
    fn default() -> Self {
        Self {
            week_start: default_week_start(),
            reset_hour: 0,
            tiers: default_tiers(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateSettings {
    /// Smoothing factor for the current rate (0 < alpha <= 1)
    #[serde(default = "default_ewma_alpha")]
    pub ewma_alpha: f64,
    /// Idle time after which the current rate has halved
    #[serde(default = "default_decay_half_life_secs")]
    pub decay_half_life_secs: u64,
    #[serde(default = "default_sample_capacity")]
    pub sample_capacity: usize,
    /// Relative difference between short and long averages that counts as a trend
    #[serde(default = "default_trend_margin")]
    pub trend_margin: f64,
    #[serde(default = "default_volatility_window_secs")]
    pub volatility_window_secs: u64,
    #[serde(default = "default_trend_short_window_secs")]
    pub trend_short_window_secs: u64,
}

fn default_ewma_alpha() -> f64 {
    0.3
}
fn default_decay_half_life_secs() -> u64 {
    120
}
fn default_sample_capacity() -> usize {
    1024
}
fn default_trend_margin() -> f64 {
    0.10
}
fn default_volatility_window_secs() -> u64 {
    900
}
fn default_trend_short_window_secs() -> u64 {
    300
}

impl Default for RateSettings {
    fn default() -> Self {
        Self {
            ewma_alpha: default_ewma_alpha(),
            decay_half_life_secs: default_decay_half_life_secs(),
            sample_capacity: default_sample_capacity(),
            trend_margin: default_trend_margin(),
            volatility_window_secs: default_volatility_window_secs(),
            trend_short_window_secs: default_trend_short_window_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertSettings {
    #[serde(default = "default_cooldown_secs")]
    pub cooldown_secs: u64,
    /// Number of alerts kept in the audit log
    #[serde(default = "default_history_limit")]
    pub history_limit: usize,
    /// Samples required before rate alerts are evaluated
    #[serde(default = "default_min_rate_samples")]
    pub min_rate_samples: u64,
}

fn default_cooldown_secs() -> u64 {
    1800
}
fn default_history_limit() -> usize {
    256
}
fn default_min_rate_samples() -> u64 {
    3
}

impl Default for AlertSettings {
    fn default() -> Self {
        Self {
            cooldown_secs: default_cooldown_secs(),
            history_limit: default_history_limit(),
            min_rate_samples: default_min_rate_samples(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineSettings {
    /// Idle time after which the source is considered stalled
    #[serde(default = "default_stall_threshold_secs")]
    pub stall_threshold_secs: u64,
    #[serde(default = "default_stall_check_secs")]
    pub stall_check_secs: u64,
    #[serde(default = "default_clock_skew_tolerance_secs")]
    pub clock_skew_tolerance_secs: u64,
    /// Snapshots buffered per subscriber before the oldest is dropped
    #[serde(default = "default_subscriber_queue")]
    pub subscriber_queue: usize,
    #[serde(default = "default_window_history")]
    pub window_history: usize,
    #[serde(default = "default_quota_history_weeks")]
    pub quota_history_weeks: usize,
}

fn default_stall_threshold_secs() -> u64 {
    300
}
fn default_stall_check_secs() -> u64 {
    30
}
fn default_clock_skew_tolerance_secs() -> u64 {
    5
}
fn default_subscriber_queue() -> usize {
    16
}
fn default_window_history() -> usize {
    16
}
fn default_quota_history_weeks() -> usize {
    4
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            stall_threshold_secs: default_stall_threshold_secs(),
            stall_check_secs: default_stall_check_secs(),
            clock_skew_tolerance_secs: default_clock_skew_tolerance_secs(),
            subscriber_queue: default_subscriber_queue(),
            window_history: default_window_history(),
            quota_history_weeks: default_quota_history_weeks(),
        }
    }
}

/// Start-up configuration. Immutable for the lifetime of an engine.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub session: SessionSettings,
    #[serde(default)]
    pub weekly: WeeklySettings,
    #[serde(default)]
    pub rate: RateSettings,
    #[serde(default)]
    pub alerts: AlertSettings,
    #[serde(default)]
    pub engine: EngineSettings,
}

impl EngineConfig {
    /// Get the config file path, respecting XDG_CONFIG_HOME
    pub fn config_path() -> PathBuf {
        let config_dir = std::env::var("XDG_CONFIG_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| {
                dirs::home_dir()
                    .unwrap_or_else(|| PathBuf::from("~"))
                    .join(".config")
            });
        config_dir.join("burnwatch").join("config.toml")
    }

    /// Load config from the default path, falling back to defaults if not found
    pub fn load() -> Result<Self, ConfigError> {
        let path = Self::config_path();
        if !path.exists() {
            return Ok(Self::default());
        }
        Self::load_from(&path)
    }

    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: EngineConfig = toml::from_str(&content)?;
        Ok(config)
    }

    /// Serialize and write this config to `path`.
    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn week_start(&self) -> Weekday {
        self.weekly.week_start.parse().unwrap_or(Weekday::Mon)
    }

    /// Weekly hours allowance for `tier`; unconfigured tiers get zero.
    pub fn hours_limit(&self, tier: ModelTier) -> f64 {
        self.weekly
            .tiers
            .iter()
            .find(|t| ModelTier::from_id(&t.tier) == Some(tier))
            .map(|t| t.hours_limit)
            .unwrap_or(0.0)
    }

    /// Tiers that have a configured weekly allowance.
    pub fn configured_tiers(&self) -> Vec<ModelTier> {
        let mut tiers: Vec<ModelTier> = self
            .weekly
            .tiers
            .iter()
            .filter_map(|t| ModelTier::from_id(&t.tier))
            .collect();
        tiers.sort();
        tiers.dedup();
        tiers
    }

    pub fn cooldown(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.alerts.cooldown_secs as i64)
    }

    pub fn clock_skew_tolerance(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.engine.clock_skew_tolerance_secs as i64)
    }

    pub fn stall_threshold(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.engine.stall_threshold_secs)
    }

    pub fn stall_check_interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.engine.stall_check_secs.max(1))
    }

    /// Validate the config
    pub fn validate(&self) -> Vec<String> {
        let mut issues = Vec::new();
        if self.session.budget_limit == 0 {
            issues.push("session.budget_limit must be greater than zero".to_string());
        }
        if self.weekly.week_start.parse::<Weekday>().is_err() {
            issues.push(format!(
                "Invalid weekly.week_start: '{}' (must be a weekday name)",
                self.weekly.week_start
            ));
        }
        if self.weekly.reset_hour > 23 {
            issues.push(format!(
                "Invalid weekly.reset_hour: {} (must be 0-23)",
                self.weekly.reset_hour
            ));
        }
        for t in &self.weekly.tiers {
            if ModelTier::from_id(&t.tier).is_none() {
                issues.push(format!("Unknown model tier: '{}'", t.tier));
            }
            if t.hours_limit.is_nan() || t.hours_limit <= 0.0 {
                issues.push(format!(
                    "Tier '{}': hours_limit must be positive, got {}",
                    t.tier, t.hours_limit
                ));
            }
        }
        if !is_unit_fraction(self.rate.ewma_alpha) {
            issues.push(format!(
                "Invalid rate.ewma_alpha: {} (must be in (0, 1])",
                self.rate.ewma_alpha
            ));
        }
        if self.rate.sample_capacity == 0 {
            issues.push("rate.sample_capacity must be greater than zero".to_string());
        }
        if self.rate.trend_margin < 0.0 {
            issues.push("rate.trend_margin must not be negative".to_string());
        }
        if self.engine.subscriber_queue == 0 || self.engine.subscriber_queue > MAX_SUBSCRIBER_QUEUE {
            issues.push(format!(
                "Invalid engine.subscriber_queue: {} (must be 1-{})",
                self.engine.subscriber_queue, MAX_SUBSCRIBER_QUEUE
            ));
        }
        if self.engine.stall_threshold_secs == 0 {
            issues.push("engine.stall_threshold_secs must be greater than zero".to_string());
        }
        issues
    }
}

fn is_unit_fraction(x: f64) -> bool {
    x > 0.0 && x <= 1.0
}
