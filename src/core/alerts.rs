use chrono::{DateTime, Duration, Utc};
use std::collections::{HashMap, VecDeque};
use tracing::{debug, info, warn};

use crate::core::config::EngineConfig;
use crate::core::error::EngineError;
use crate::core::models::alert::{Alert, AlertCategory, AlertId, Severity};
use crate::core::models::rate::BurnRateMetrics;
use crate::core::models::window::{SessionWindow, WeeklyQuota};

const BUDGET_CRITICAL_PERCENT: u128 = 95;
const BUDGET_WARNING_PERCENT: u128 = 80;
const RATE_CRITICAL_EXCESS: f64 = 1.0;
const RATE_WARNING_EXCESS: f64 = 0.5;
const QUOTA_CRITICAL_PERCENT: f64 = 100.0;
const QUOTA_WARNING_PERCENT: f64 = 90.0;

/// State the rules are evaluated against.
#[derive(Debug, Clone, Copy)]
pub struct AlertInputs<'a> {
    /// The active window only; expired or closed windows raise no budget alerts
    pub window: Option<&'a SessionWindow>,
    pub burn_rate: &'a BurnRateMetrics,
    pub quotas: &'a [WeeklyQuota],
}

/// A rule that matched in one evaluation cycle.
#[derive(Debug, Clone, PartialEq)]
pub struct Condition {
    pub category: AlertCategory,
    pub severity: Severity,
    pub message: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Evaluation {
    pub raised: Vec<AlertId>,
    pub retired: Vec<AlertId>,
    pub suppressed: u64,
}

#[derive(Debug)]
pub struct AlertEngine {
    cooldown: Duration,
    history_limit: usize,
    min_rate_samples: u64,
    next_id: u64,
    /// Every alert ever raised, oldest first, bounded by `history_limit`
    log: VecDeque<Alert>,
    /// Raise time of the last acknowledged alert per key; drives the cool-down
    acknowledged: HashMap<(AlertCategory, Severity), DateTime<Utc>>,
}

impl AlertEngine {
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            cooldown: config.cooldown(),
            history_limit: config.alerts.history_limit.max(1),
            min_rate_samples: config.alerts.min_rate_samples,
            next_id: 1,
            log: VecDeque::new(),
            acknowledged: HashMap::new(),
        }
    }

    /// Match the rule set; at most one condition per category, most severe first.
    pub fn conditions(&self, inputs: &AlertInputs<'_>) -> Vec<Condition> {
        let mut matched = Vec::new();

        if let Some(window) = inputs.window {
            let used = window.used_percent();
            // Integer comparison keeps the exact thresholds exact
            let consumed = window.tokens_consumed as u128 * 100;
            let limit = window.budget_limit as u128;
            let severity = if consumed >= limit * BUDGET_CRITICAL_PERCENT {
                Some(Severity::Critical)
            } else if consumed >= limit * BUDGET_WARNING_PERCENT {
                Some(Severity::Warning)
            } else {
                None
            };
            if let Some(severity) = severity {
                matched.push(Condition {
                    category: AlertCategory::Budget,
                    severity,
                    message: format!(
                        "Session budget {:.0}% used ({} of {} tokens)",
                        used, window.tokens_consumed, window.budget_limit
                    ),
                });
            }
        }

        let rate = inputs.burn_rate;
        if rate.sample_count >= self.min_rate_samples && rate.average_rate > 0.0 {
            let excess = rate.current_rate / rate.average_rate - 1.0;
            let severity = if excess > RATE_CRITICAL_EXCESS {
                Some(Severity::Critical)
            } else if excess > RATE_WARNING_EXCESS {
                Some(Severity::Warning)
            } else {
                None
            };
            if let Some(severity) = severity {
                matched.push(Condition {
                    category: AlertCategory::Rate,
                    severity,
                    message: format!(
                        "Burn rate {:.0} tokens/min is {:.0}% above the session average",
                        rate.current_rate,
                        excess * 100.0
                    ),
                });
            }
        }

        let worst_quota = inputs
            .quotas
            .iter()
            .filter(|q| q.hours_limit > 0.0)
            .max_by(|a, b| a.used_percent().total_cmp(&b.used_percent()));
        if let Some(quota) = worst_quota {
            let used = quota.used_percent();
            let severity = if used >= QUOTA_CRITICAL_PERCENT {
                Some(Severity::Critical)
            } else if used >= QUOTA_WARNING_PERCENT {
                Some(Severity::Warning)
            } else {
                None
            };
            if let Some(severity) = severity {
                matched.push(Condition {
                    category: AlertCategory::Quota,
                    severity,
                    message: format!(
                        "{} weekly quota {:.0}% used ({:.1} of {:.1} hours)",
                        quota.model_tier.label(),
                        used,
                        quota.hours_consumed,
                        quota.hours_limit
                    ),
                });
            }
        }

        matched
    }

    /// Run one evaluation cycle: retire alerts whose condition cleared, then
    /// raise the matching ones.
    pub fn evaluate(&mut self, inputs: &AlertInputs<'_>, now: DateTime<Utc>) -> Evaluation {
        let matched = self.conditions(inputs);
        let mut outcome = Evaluation::default();

        for alert in self.log.iter_mut().filter(|a| a.is_active()) {
            let still_true = matched
                .iter()
                .any(|c| c.category == alert.category && c.severity == alert.severity);
            if !still_true {
                alert.retired_at = Some(now);
                outcome.retired.push(alert.id);
                info!(alert_id = alert.id.0, category = %alert.category, severity = %alert.severity, "Alert retired");
            }
        }

        for condition in matched {
            match self.raise(condition.category, condition.severity, condition.message, now) {
                Some(id) => outcome.raised.push(id),
                None => outcome.suppressed += 1,
            }
        }

        outcome
    }

    /// Raise an alert unless an unacknowledged one with the same category and
    /// severity exists, or the last one was acknowledged and raised within the
    /// cool-down. A retired alert does not hold back a new one.
    pub fn raise(
        &mut self,
        category: AlertCategory,
        severity: Severity,
        message: String,
        now: DateTime<Utc>,
    ) -> Option<AlertId> {
        let key = (category, severity);
        let duplicate = self
            .log
            .iter()
            .any(|a| a.is_active() && a.category == category && a.severity == severity);
        let cooling = self
            .acknowledged
            .get(&key)
            .is_some_and(|last| now < *last + self.cooldown);
        if duplicate || cooling {
            debug!(%category, %severity, duplicate, "Alert suppressed");
            return None;
        }

        let id = AlertId(self.next_id);
        self.next_id += 1;
        match severity {
            Severity::Critical => warn!(alert_id = id.0, %category, %message, "Alert raised"),
            _ => info!(alert_id = id.0, %category, %severity, %message, "Alert raised"),
        }
        self.log.push_back(Alert {
            id,
            category,
            severity,
            message,
            raised_at: now,
            acknowledged_at: None,
            retired_at: None,
        });
        self.trim();
        Some(id)
    }

    pub fn acknowledge(&mut self, id: AlertId, now: DateTime<Utc>) -> Result<(), EngineError> {
        let alert = self
            .log
            .iter_mut()
            .find(|a| a.id == id)
            .ok_or(EngineError::AlertNotFound(id))?;
        if alert.acknowledged_at.is_none() {
            alert.acknowledged_at = Some(now);
            self.acknowledged
                .insert((alert.category, alert.severity), alert.raised_at);
            info!(alert_id = id.0, "Alert acknowledged");
        }
        Ok(())
    }

    pub fn active(&self) -> Vec<Alert> {
        self.log.iter().filter(|a| a.is_active()).cloned().collect()
    }

    /// Audit log, including acknowledged and retired alerts.
    pub fn history(&self) -> Vec<Alert> {
        self.log.iter().cloned().collect()
    }

    /// Drop the oldest inactive alerts once the log is over its limit.
    fn trim(&mut self) {
        while self.log.len() > self.history_limit {
            match self.log.iter().position(|a| !a.is_active()) {
                Some(pos) => {
                    self.log.remove(pos);
                }
                None => break,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::models::event::ModelTier;
    use crate::core::models::rate::Trend;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 4, 12, 0, 0).unwrap()
    }

    fn window(tokens: u64) -> SessionWindow {
        let mut w = SessionWindow::open(1, now() - Duration::hours(1), 750_000);
        w.tokens_consumed = tokens;
        w
    }

    fn rate(current: f64, average: f64) -> BurnRateMetrics {
        BurnRateMetrics {
            current_rate: current,
            average_rate: average,
            peak_rate: current.max(average),
            volatility: 0.0,
            trend: Trend::Stable,
            sample_count: 10,
        }
    }

    fn quota(hours: f64, limit: f64) -> WeeklyQuota {
        let mut q = WeeklyQuota::new(ModelTier::Premium, now() - Duration::days(1), limit);
        q.hours_consumed = hours;
        q
    }

    fn engine() -> AlertEngine {
        AlertEngine::new(&EngineConfig::default())
    }

    fn keys(conditions: &[Condition]) -> Vec<(AlertCategory, Severity)> {
        conditions.iter().map(|c| (c.category, c.severity)).collect()
    }

    #[test]
    fn budget_thresholds() {
        let e = engine();
        let r = rate(0.0, 0.0);
        let w = window(599_999);
        let inputs = AlertInputs { window: Some(&w), burn_rate: &r, quotas: &[] };
        assert!(e.conditions(&inputs).is_empty());

        let w = window(600_000);
        let inputs = AlertInputs { window: Some(&w), burn_rate: &r, quotas: &[] };
        assert_eq!(keys(&e.conditions(&inputs)), vec![(AlertCategory::Budget, Severity::Warning)]);

        let w = window(712_500);
        let inputs = AlertInputs { window: Some(&w), burn_rate: &r, quotas: &[] };
        assert_eq!(keys(&e.conditions(&inputs)), vec![(AlertCategory::Budget, Severity::Critical)]);
    }

    #[test]
    fn rate_thresholds_pick_most_severe() {
        let e = engine();
        let check = |current: f64| {
            let r = rate(current, 1000.0);
            let inputs = AlertInputs { window: None, burn_rate: &r, quotas: &[] };
            keys(&e.conditions(&inputs))
        };
        assert!(check(1500.0).is_empty());
        assert_eq!(check(1600.0), vec![(AlertCategory::Rate, Severity::Warning)]);
        assert_eq!(check(2100.0), vec![(AlertCategory::Rate, Severity::Critical)]);
    }

    #[test]
    fn rate_rules_need_enough_samples() {
        let e = engine();
        let mut r = rate(5000.0, 1000.0);
        r.sample_count = 2;
        let inputs = AlertInputs { window: None, burn_rate: &r, quotas: &[] };
        assert!(e.conditions(&inputs).is_empty());
    }

    #[test]
    fn quota_thresholds_use_worst_tier() {
        let e = engine();
        let r = rate(0.0, 0.0);
        let quotas = vec![quota(1.0, 24.0), quota(22.0, 24.0)];
        let inputs = AlertInputs { window: None, burn_rate: &r, quotas: &quotas };
        assert_eq!(keys(&e.conditions(&inputs)), vec![(AlertCategory::Quota, Severity::Warning)]);

        let quotas = vec![quota(30.0, 24.0)];
        let inputs = AlertInputs { window: None, burn_rate: &r, quotas: &quotas };
        assert_eq!(keys(&e.conditions(&inputs)), vec![(AlertCategory::Quota, Severity::Critical)]);
    }

    #[test]
    fn raising_twice_within_cooldown_yields_one_alert() {
        let mut e = engine();
        let first = e.raise(AlertCategory::Budget, Severity::Critical, "a".into(), now());
        let second = e.raise(
            AlertCategory::Budget,
            Severity::Critical,
            "b".into(),
            now() + Duration::minutes(1),
        );
        assert!(first.is_some());
        assert!(second.is_none());
        assert_eq!(e.active().len(), 1);
    }

    #[test]
    fn acknowledged_alert_leaves_active_but_stays_in_history() {
        let mut e = engine();
        let id = e
            .raise(AlertCategory::Budget, Severity::Warning, "x".into(), now())
            .unwrap();
        e.acknowledge(id, now()).unwrap();
        assert!(e.active().is_empty());
        let history = e.history();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].acknowledged_at, Some(now()));
    }

    #[test]
    fn acknowledge_unknown_is_not_found() {
        let mut e = engine();
        assert_eq!(
            e.acknowledge(AlertId(42), now()),
            Err(EngineError::AlertNotFound(AlertId(42)))
        );
    }

    #[test]
    fn reraise_after_ack_respects_cooldown() {
        let mut e = engine();
        let id = e
            .raise(AlertCategory::Budget, Severity::Warning, "x".into(), now())
            .unwrap();
        e.acknowledge(id, now()).unwrap();
        assert!(e
            .raise(AlertCategory::Budget, Severity::Warning, "x".into(), now() + Duration::minutes(10))
            .is_none());
        assert!(e
            .raise(AlertCategory::Budget, Severity::Warning, "x".into(), now() + Duration::minutes(30))
            .is_some());
    }

    #[test]
    fn retired_alert_reraises_without_cooldown() {
        let mut e = engine();
        let r = rate(0.0, 0.0);
        let w = window(610_000);
        let out = e.evaluate(&AlertInputs { window: Some(&w), burn_rate: &r, quotas: &[] }, now());
        assert_eq!(out.raised.len(), 1);

        // Window closes, then the next one crosses 80% two minutes later
        let out = e.evaluate(&AlertInputs { window: None, burn_rate: &r, quotas: &[] }, now());
        assert_eq!(out.retired.len(), 1);
        let later = now() + Duration::minutes(2);
        let out = e.evaluate(&AlertInputs { window: Some(&w), burn_rate: &r, quotas: &[] }, later);
        assert_eq!(out.raised.len(), 1);
        assert_eq!(out.suppressed, 0);
        let active = e.active();
        assert_eq!(active.len(), 1);
        assert_eq!((active[0].category, active[0].severity), (AlertCategory::Budget, Severity::Warning));
        assert_eq!(active[0].raised_at, later);
    }

    #[test]
    fn cleared_condition_retires_alert() {
        let mut e = engine();
        let r = rate(0.0, 0.0);
        let w = window(650_000);
        let out = e.evaluate(&AlertInputs { window: Some(&w), burn_rate: &r, quotas: &[] }, now());
        assert_eq!(out.raised.len(), 1);

        // Escalation retires the warning and raises the critical
        let w = window(720_000);
        let out = e.evaluate(&AlertInputs { window: Some(&w), burn_rate: &r, quotas: &[] }, now());
        assert_eq!(out.retired.len(), 1);
        assert_eq!(out.raised.len(), 1);
        let active = e.active();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].severity, Severity::Critical);

        // Window gone: everything retires
        let out = e.evaluate(&AlertInputs { window: None, burn_rate: &r, quotas: &[] }, now());
        assert_eq!(out.retired.len(), 1);
        assert!(e.active().is_empty());
        assert_eq!(e.history().len(), 2);
        assert!(e.history().iter().all(|a| a.retired_at.is_some()));
    }

    #[test]
    fn repeated_evaluation_counts_suppression() {
        let mut e = engine();
        let r = rate(0.0, 0.0);
        let w = window(720_000);
        let inputs = AlertInputs { window: Some(&w), burn_rate: &r, quotas: &[] };
        e.evaluate(&inputs, now());
        let out = e.evaluate(&inputs, now() + Duration::seconds(5));
        assert!(out.raised.is_empty());
        assert_eq!(out.suppressed, 1);
        assert_eq!(e.active().len(), 1);
    }

    #[test]
    fn audit_log_is_bounded() {
        let mut config = EngineConfig::default();
        config.alerts.history_limit = 3;
        config.alerts.cooldown_secs = 0;
        let mut e = AlertEngine::new(&config);
        for i in 0..6 {
            let id = e
                .raise(AlertCategory::Rate, Severity::Warning, "x".into(), now() + Duration::minutes(i))
                .unwrap();
            e.acknowledge(id, now()).unwrap();
        }
        let history = e.history();
        assert_eq!(history.len(), 3);
        assert_eq!(history[0].id, AlertId(4));
    }
}
