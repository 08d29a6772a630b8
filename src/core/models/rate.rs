use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Trend {
    Rising,
    Falling,
    Stable,
}

impl std::fmt::Display for Trend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Rising => write!(f, "Rising"),
            Self::Falling => write!(f, "Falling"),
            Self::Stable => write!(f, "Stable"),
        }
    }
}

/// One instantaneous consumption-rate observation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RateSample {
    pub at: DateTime<Utc>,
    /// Tokens per minute over the interval ending at `at`
    pub tokens_per_minute: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BurnRateMetrics {
    /// Smoothed rate in tokens per minute
    pub current_rate: f64,
    pub average_rate: f64,
    pub peak_rate: f64,
    /// Standard deviation of recent samples (tokens per minute)
    pub volatility: f64,
    pub trend: Trend,
    pub sample_count: u64,
}

impl Default for BurnRateMetrics {
    fn default() -> Self {
        Self {
            current_rate: 0.0,
            average_rate: 0.0,
            peak_rate: 0.0,
            volatility: 0.0,
            trend: Trend::Stable,
            sample_count: 0,
        }
    }
}
