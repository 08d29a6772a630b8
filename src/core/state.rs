use chrono::{DateTime, Duration, Utc};
use tracing::debug;

use crate::core::alerts::{AlertEngine, AlertInputs, Evaluation};
use crate::core::config::EngineConfig;
use crate::core::error::EngineError;
use crate::core::models::alert::{Alert, AlertId};
use crate::core::models::event::UsageEvent;
use crate::core::models::rate::RateSample;
use crate::core::models::snapshot::Snapshot;
use crate::core::models::window::WeeklyQuota;
use crate::core::predictor::{self, Prediction};
use crate::core::rate::RateEstimator;
use crate::core::window::WindowTracker;

/// All mutable engine state, owned by a single writer.
///
/// ```text
/// UsageEvent ─► WindowTracker ─► RateEstimator
///                    │                │
///                    └──► predictor ◄─┘
///                             │
///                        AlertEngine ─► Snapshot
/// ```
#[derive(Debug)]
pub struct EngineState {
    windows: WindowTracker,
    rate: RateEstimator,
    alerts: AlertEngine,
    sequence: u64,
    last_generated_at: Option<DateTime<Utc>>,
}

impl EngineState {
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            windows: WindowTracker::new(config),
            rate: RateEstimator::new(config),
            alerts: AlertEngine::new(config),
            sequence: 0,
            last_generated_at: None,
        }
    }

    /// The snapshot published before any event, stamped `now`.
    pub fn initial_snapshot(&mut self, now: DateTime<Utc>) -> Snapshot {
        self.last_generated_at = Some(now);
        Snapshot::empty(now)
    }

    pub fn apply(&mut self, event: &UsageEvent) {
        let applied = self.windows.apply(event);
        if applied.opened {
            self.rate.reset();
        }
        if let Some(sample) = self.rate.record(event.occurred_at, event.total_tokens()) {
            debug!(
                window_id = applied.window_id,
                tokens_per_minute = sample.tokens_per_minute,
                "Rate sample recorded"
            );
        }
    }

    /// Returns true if a window was closed.
    pub fn close_session(&mut self, now: DateTime<Utc>) -> bool {
        self.windows.close_session(now).is_some()
    }

    pub fn acknowledge(&mut self, id: AlertId, now: DateTime<Utc>) -> Result<(), EngineError> {
        self.alerts.acknowledge(id, now)
    }

    pub fn rate_history(&self, from: DateTime<Utc>, to: DateTime<Utc>) -> Vec<RateSample> {
        self.rate.history(from, to)
    }

    pub fn quota_history(&self) -> Vec<WeeklyQuota> {
        self.windows.quota_history()
    }

    pub fn alert_history(&self) -> Vec<Alert> {
        self.alerts.history()
    }

    pub fn windows(&self) -> &WindowTracker {
        &self.windows
    }

    /// Re-evaluate everything as of `now` and build the next snapshot.
    ///
    /// `now` is never taken to be earlier than the latest event seen, and the
    /// returned `generated_at` is strictly later than the previous one.
    pub fn assemble(&mut self, now: DateTime<Utc>, degraded: bool) -> (Snapshot, Evaluation) {
        let now = self.windows.last_event_at().map_or(now, |last| now.max(last));
        self.windows.refresh(now);

        let burn_rate = self.rate.metrics(now, degraded);
        let quotas = self.windows.current_quotas(now);
        let active = self.windows.active();

        let prediction = match active {
            Some(window) => predictor::predict(window.budget_remaining(), burn_rate.current_rate, now),
            None => Prediction::Undefined,
        };
        let exhausts_before_reset = active.is_some_and(|w| prediction.before(w.ends_at));

        let evaluation = self.alerts.evaluate(
            &AlertInputs {
                window: active,
                burn_rate: &burn_rate,
                quotas: &quotas,
            },
            now,
        );

        let generated_at = match self.last_generated_at {
            Some(prev) if now <= prev => prev + Duration::microseconds(1),
            _ => now,
        };
        self.last_generated_at = Some(generated_at);
        self.sequence += 1;

        let snapshot = Snapshot {
            sequence: self.sequence,
            session_window: self.windows.current().cloned(),
            weekly_quotas: quotas,
            burn_rate,
            predicted_exhaustion_at: prediction.at(),
            exhausts_before_reset,
            active_alerts: self.alerts.active(),
            generated_at,
            degraded,
        };
        (snapshot, evaluation)
    }
}
