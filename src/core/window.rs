use chrono::{DateTime, Datelike, Duration, NaiveTime, Utc, Weekday};
use std::collections::{BTreeMap, VecDeque};
use tracing::info;

use crate::core::config::EngineConfig;
use crate::core::models::event::{ModelTier, UsageEvent};
use crate::core::models::window::{week_length, SessionWindow, WeeklyQuota, WindowStatus};

/// What applying an event did to the session window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Applied {
    pub window_id: u64,
    /// A new window was opened by this event
    pub opened: bool,
}

/// Owns the session window and the per-tier weekly quotas.
#[derive(Debug)]
pub struct WindowTracker {
    budget_limit: u64,
    week_start: Weekday,
    reset_hour: u32,
    hours_limits: Vec<(ModelTier, f64)>,
    window_history_limit: usize,
    quota_history_weeks: usize,
    next_window_id: u64,
    current: Option<SessionWindow>,
    history: VecDeque<SessionWindow>,
    quotas: BTreeMap<(ModelTier, DateTime<Utc>), WeeklyQuota>,
    /// Latest event time seen inside the current session
    last_event_at: Option<DateTime<Utc>>,
}

impl WindowTracker {
    pub fn new(config: &EngineConfig) -> Self {
        let hours_limits = config
            .configured_tiers()
            .into_iter()
            .map(|tier| (tier, config.hours_limit(tier)))
            .collect();
        Self {
            budget_limit: config.session.budget_limit,
            week_start: config.week_start(),
            reset_hour: config.weekly.reset_hour.min(23),
            hours_limits,
            window_history_limit: config.engine.window_history,
            quota_history_weeks: config.engine.quota_history_weeks.max(1),
            next_window_id: 1,
            current: None,
            history: VecDeque::new(),
            quotas: BTreeMap::new(),
            last_event_at: None,
        }
    }

    /// Most recent window, whatever its status.
    pub fn current(&self) -> Option<&SessionWindow> {
        self.current.as_ref()
    }

    pub fn active(&self) -> Option<&SessionWindow> {
        self.current.as_ref().filter(|w| w.is_active())
    }

    /// Windows superseded or closed before the current one, oldest first.
    pub fn history(&self) -> impl Iterator<Item = &SessionWindow> {
        self.history.iter()
    }

    pub fn last_event_at(&self) -> Option<DateTime<Utc>> {
        self.last_event_at
    }

    /// Expire the active window if `now` has reached its end.
    /// Returns true when a transition happened.
    pub fn refresh(&mut self, now: DateTime<Utc>) -> bool {
        match self.current.as_mut() {
            Some(window) if window.is_active() && now >= window.ends_at => {
                window.status = WindowStatus::Expired;
                info!(
                    window_id = window.id,
                    tokens = window.tokens_consumed,
                    "Session window expired"
                );
                true
            }
            _ => false,
        }
    }

    /// Handle an end-of-session signal. Returns the id of the closed window.
    pub fn close_session(&mut self, now: DateTime<Utc>) -> Option<u64> {
        self.refresh(now);
        let window = self.current.as_mut()?;
        if window.status == WindowStatus::Closed {
            return None;
        }
        window.status = WindowStatus::Closed;
        info!(window_id = window.id, tokens = window.tokens_consumed, "Session window closed");
        Some(window.id)
    }

    /// Attribute an event to the current window, or open a new one.
    ///
    /// An expired window still takes events stamped before its end, so
    /// history submitted after the wall clock passed the window lands in the
    /// window it belongs to. A closed window takes nothing.
    pub fn apply(&mut self, event: &UsageEvent) -> Applied {
        let at = event.occurred_at;
        self.refresh(at);

        let opened = !self.current.as_ref().is_some_and(|w| w.accepts(at));
        if opened {
            self.open_window(at);
        }

        let previous = self.last_event_at;
        let mut window_id = 0;
        if let Some(window) = self.current.as_mut() {
            window.tokens_consumed = window.tokens_consumed.saturating_add(event.total_tokens());
            window_id = window.id;
        }

        self.accrue_quota(event.model_tier, at, previous);
        self.last_event_at = Some(previous.map_or(at, |p| p.max(at)));

        Applied { window_id, opened }
    }

    fn open_window(&mut self, started_at: DateTime<Utc>) {
        if let Some(mut old) = self.current.take() {
            old.status = WindowStatus::Closed;
            self.history.push_back(old);
            while self.history.len() > self.window_history_limit {
                self.history.pop_front();
            }
        }
        let window = SessionWindow::open(self.next_window_id, started_at, self.budget_limit);
        self.next_window_id += 1;
        info!(
            window_id = window.id,
            started_at = %window.started_at,
            ends_at = %window.ends_at,
            "Session window opened"
        );
        self.current = Some(window);
        self.last_event_at = None;
    }

    /// Add the wall-clock time since the previous event in this session to
    /// the quotas of `tier`, split at period boundaries.
    fn accrue_quota(&mut self, tier: ModelTier, at: DateTime<Utc>, previous: Option<DateTime<Utc>>) {
        self.quota_entry(tier, at);

        if let Some(prev) = previous.filter(|prev| *prev < at) {
            let mut cursor = prev;
            while cursor < at {
                let period_end = self.period_start(cursor) + week_length();
                let until = at.min(period_end);
                let hours = (until - cursor).num_milliseconds() as f64 / 3_600_000.0;
                self.quota_entry(tier, cursor).hours_consumed += hours;
                cursor = until;
            }
        }

        self.prune_quotas(tier);
    }

    fn quota_entry(&mut self, tier: ModelTier, at: DateTime<Utc>) -> &mut WeeklyQuota {
        let period_start = self.period_start(at);
        let hours_limit = self.hours_limit(tier);
        self.quotas
            .entry((tier, period_start))
            .or_insert_with(|| WeeklyQuota::new(tier, period_start, hours_limit))
    }

    fn prune_quotas(&mut self, tier: ModelTier) {
        let periods: Vec<DateTime<Utc>> = self
            .quotas
            .keys()
            .filter(|(t, _)| *t == tier)
            .map(|(_, start)| *start)
            .collect();
        if periods.len() > self.quota_history_weeks {
            let excess = periods.len() - self.quota_history_weeks;
            for start in periods.into_iter().take(excess) {
                self.quotas.remove(&(tier, start));
            }
        }
    }

    fn hours_limit(&self, tier: ModelTier) -> f64 {
        self.hours_limits
            .iter()
            .find(|(t, _)| *t == tier)
            .map(|(_, h)| *h)
            .unwrap_or(0.0)
    }

    /// Start of the weekly period containing `at`.
    pub fn period_start(&self, at: DateTime<Utc>) -> DateTime<Utc> {
        let date = at.date_naive();
        let days_back = (date.weekday().num_days_from_monday() + 7
            - self.week_start.num_days_from_monday())
            % 7;
        let reset_time = NaiveTime::from_hms_opt(self.reset_hour, 0, 0).unwrap_or_default();
        let start = (date - Duration::days(days_back as i64))
            .and_time(reset_time)
            .and_utc();
        if start > at {
            start - week_length()
        } else {
            start
        }
    }

    /// Quota instance for `tier` covering `at`, if one was created.
    pub fn quota(&self, tier: ModelTier, at: DateTime<Utc>) -> Option<&WeeklyQuota> {
        self.quotas.get(&(tier, self.period_start(at)))
    }

    /// Every retained quota period, by tier then period start.
    pub fn quota_history(&self) -> Vec<WeeklyQuota> {
        self.quotas.values().cloned().collect()
    }

    /// Current-period quota for every configured or observed tier.
    ///
    /// Tiers with no event yet in the period containing `now` are reported
    /// with zero consumption, which is how a rollover becomes visible.
    pub fn current_quotas(&self, now: DateTime<Utc>) -> Vec<WeeklyQuota> {
        let mut tiers: Vec<ModelTier> = self.hours_limits.iter().map(|(t, _)| *t).collect();
        for (tier, _) in self.quotas.keys() {
            if !tiers.contains(tier) {
                tiers.push(*tier);
            }
        }
        tiers.sort();

        let period_start = self.period_start(now);
        tiers
            .into_iter()
            .map(|tier| match self.quotas.get(&(tier, period_start)) {
                Some(q) => q.clone(),
                None => WeeklyQuota::new(tier, period_start, self.hours_limit(tier)),
            })
            .collect()
    }
}
