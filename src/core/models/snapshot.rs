use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::core::models::alert::Alert;
use crate::core::models::rate::BurnRateMetrics;
use crate::core::models::window::{SessionWindow, WeeklyQuota};

/// Complete engine state at one instant.
///
/// A consumer holding only the latest snapshot has everything it needs;
/// no earlier snapshot or event history is required to interpret it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    /// Publication counter, strictly increasing per engine instance
    pub sequence: u64,
    /// Most recent session window (active, expired or closed), if any event was seen
    pub session_window: Option<SessionWindow>,
    /// Current-period quota for every configured tier
    pub weekly_quotas: Vec<WeeklyQuota>,
    pub burn_rate: BurnRateMetrics,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub predicted_exhaustion_at: Option<DateTime<Utc>>,
    /// Whether the projected exhaustion falls before the window resets
    pub exhausts_before_reset: bool,
    pub active_alerts: Vec<Alert>,
    pub generated_at: DateTime<Utc>,
    pub degraded: bool,
}

impl Snapshot {
    /// The snapshot published before any state exists.
    pub fn empty(generated_at: DateTime<Utc>) -> Self {
        Self {
            sequence: 0,
            session_window: None,
            weekly_quotas: Vec::new(),
            burn_rate: BurnRateMetrics::default(),
            predicted_exhaustion_at: None,
            exhausts_before_reset: false,
            active_alerts: Vec::new(),
            generated_at,
            degraded: false,
        }
    }

    pub fn tokens_consumed(&self) -> u64 {
        self.session_window
            .as_ref()
            .map(|w| w.tokens_consumed)
            .unwrap_or(0)
    }
}
