use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::core::models::event::ModelTier;

/// Fixed length of a session window.
pub const SESSION_LENGTH_HOURS: i64 = 5;

/// Fixed length of a weekly quota period.
pub const WEEK_LENGTH_DAYS: i64 = 7;

pub fn session_length() -> Duration {
    Duration::hours(SESSION_LENGTH_HOURS)
}

pub fn week_length() -> Duration {
    Duration::days(WEEK_LENGTH_DAYS)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WindowStatus {
    Active,
    Expired,
    Closed,
}

impl std::fmt::Display for WindowStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Active => write!(f, "Active"),
            Self::Expired => write!(f, "Expired"),
            Self::Closed => write!(f, "Closed"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionWindow {
    pub id: u64,
    pub started_at: DateTime<Utc>,
    /// Always `started_at + 5h`; set once at creation.
    pub ends_at: DateTime<Utc>,
    pub tokens_consumed: u64,
    pub budget_limit: u64,
    pub status: WindowStatus,
}

impl SessionWindow {
    pub fn open(id: u64, started_at: DateTime<Utc>, budget_limit: u64) -> Self {
        Self {
            id,
            started_at,
            ends_at: started_at + session_length(),
            tokens_consumed: 0,
            budget_limit,
            status: WindowStatus::Active,
        }
    }

    pub fn is_active(&self) -> bool {
        self.status == WindowStatus::Active
    }

    /// Whether an event at `at` belongs to this window. An expired window
    /// still covers its own span; a closed one covers nothing.
    pub fn accepts(&self, at: DateTime<Utc>) -> bool {
        self.status != WindowStatus::Closed && at < self.ends_at
    }

    /// Signed remaining budget; negative once the budget is overrun.
    pub fn budget_remaining(&self) -> i128 {
        i128::from(self.budget_limit) - i128::from(self.tokens_consumed)
    }

    /// Percentage of the budget consumed (0.0 - 100.0+).
    pub fn used_percent(&self) -> f64 {
        if self.budget_limit == 0 {
            return 100.0;
        }
        self.tokens_consumed as f64 / self.budget_limit as f64 * 100.0
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeeklyQuota {
    pub model_tier: ModelTier,
    pub period_start: DateTime<Utc>,
    pub period_end: DateTime<Utc>,
    pub hours_consumed: f64,
    pub hours_limit: f64,
}

impl WeeklyQuota {
    pub fn new(model_tier: ModelTier, period_start: DateTime<Utc>, hours_limit: f64) -> Self {
        Self {
            model_tier,
            period_start,
            period_end: period_start + week_length(),
            hours_consumed: 0.0,
            hours_limit,
        }
    }

    pub fn contains(&self, at: DateTime<Utc>) -> bool {
        at >= self.period_start && at < self.period_end
    }

    /// Percentage of the weekly allowance consumed; may exceed 100.
    pub fn used_percent(&self) -> f64 {
        if self.hours_limit <= 0.0 {
            return 100.0;
        }
        self.hours_consumed / self.hours_limit * 100.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn open_window_ends_five_hours_later() {
        let start = Utc.with_ymd_and_hms(2026, 3, 2, 9, 17, 0).unwrap();
        let window = SessionWindow::open(1, start, 750_000);
        assert_eq!(window.ends_at - window.started_at, Duration::hours(5));
        assert!(window.is_active());
        assert_eq!(window.budget_remaining(), 750_000);
    }

    #[test]
    fn budget_remaining_goes_negative_when_overrun() {
        let mut window = SessionWindow::open(1, Utc::now(), 100);
        window.tokens_consumed = 150;
        assert_eq!(window.budget_remaining(), -50);
        assert!((window.used_percent() - 150.0).abs() < 1e-9);

        let mut huge = SessionWindow::open(2, Utc::now(), u64::MAX);
        huge.tokens_consumed = 1;
        assert_eq!(huge.budget_remaining(), i128::from(u64::MAX) - 1);
        huge.budget_limit = 1;
        huge.tokens_consumed = u64::MAX;
        assert!(huge.budget_remaining() < 0);
    }

    #[test]
    fn weekly_quota_period_is_half_open() {
        let start = Utc.with_ymd_and_hms(2026, 3, 2, 0, 0, 0).unwrap();
        let quota = WeeklyQuota::new(ModelTier::Standard, start, 40.0);
        assert!(quota.contains(start));
        assert!(!quota.contains(start + Duration::days(7)));
        assert!(quota.contains(start + Duration::days(7) - Duration::seconds(1)));
    }
}
