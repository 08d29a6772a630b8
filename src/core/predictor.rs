use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Projected budget exhaustion for a session window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "at", rename_all = "snake_case")]
pub enum Prediction {
    /// No consumption, so no meaningful projection
    Undefined,
    /// Budget is already used up
    Exhausted(DateTime<Utc>),
    At(DateTime<Utc>),
}

impl Prediction {
    pub fn at(&self) -> Option<DateTime<Utc>> {
        match self {
            Self::Undefined => None,
            Self::Exhausted(at) | Self::At(at) => Some(*at),
        }
    }

    /// Whether exhaustion lands strictly before `ends_at`.
    pub fn before(&self, ends_at: DateTime<Utc>) -> bool {
        self.at().is_some_and(|at| at < ends_at)
    }
}

/// Project when `budget_remaining` tokens run out at `tokens_per_minute`.
///
/// A non-positive rate yields `Undefined` even when the budget is already
/// overrun; a projection too far out to represent is also `Undefined`.
pub fn predict(budget_remaining: i128, tokens_per_minute: f64, now: DateTime<Utc>) -> Prediction {
    if tokens_per_minute.is_nan() || tokens_per_minute <= 0.0 {
        return Prediction::Undefined;
    }
    if budget_remaining <= 0 {
        return Prediction::Exhausted(now);
    }

    let ms = budget_remaining as f64 / tokens_per_minute * 60_000.0;
    if !ms.is_finite() {
        return Prediction::Undefined;
    }
    Duration::try_milliseconds(ms.round() as i64)
        .and_then(|d| now.checked_add_signed(d))
        .map(Prediction::At)
        .unwrap_or(Prediction::Undefined)
}
