use chrono::{DateTime, Duration, Utc};
use std::collections::VecDeque;

use crate::core::config::EngineConfig;
use crate::core::models::rate::{BurnRateMetrics, RateSample, Trend};

/// Events closer together than this are folded into the next sample.
const MIN_SAMPLE_INTERVAL_MS: i64 = 1_000;

/// Time-ordered burn-rate samples for the active session window.
#[derive(Debug)]
pub struct RateEstimator {
    alpha: f64,
    half_life: Duration,
    stall_threshold: Duration,
    trend_margin: f64,
    volatility_window: Duration,
    short_window: Duration,
    capacity: usize,
    samples: VecDeque<RateSample>,
    ewma: Option<f64>,
    // Lifetime stats for the window; survive buffer eviction
    sum: f64,
    count: u64,
    peak: f64,
    last_point: Option<DateTime<Utc>>,
    pending_tokens: u64,
}

impl RateEstimator {
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            alpha: config.rate.ewma_alpha,
            half_life: Duration::seconds(config.rate.decay_half_life_secs as i64),
            stall_threshold: Duration::seconds(config.engine.stall_threshold_secs as i64),
            trend_margin: config.rate.trend_margin,
            volatility_window: Duration::seconds(config.rate.volatility_window_secs as i64),
            short_window: Duration::seconds(config.rate.trend_short_window_secs as i64),
            capacity: config.rate.sample_capacity.max(1),
            samples: VecDeque::new(),
            ewma: None,
            sum: 0.0,
            count: 0,
            peak: 0.0,
            last_point: None,
            pending_tokens: 0,
        }
    }

    /// Drop all state; called when a new session window opens.
    pub fn reset(&mut self) {
        self.samples.clear();
        self.ewma = None;
        self.sum = 0.0;
        self.count = 0;
        self.peak = 0.0;
        self.last_point = None;
        self.pending_tokens = 0;
    }

    /// Feed one event. Returns the sample it produced, if any.
    ///
    /// The first event only anchors the series. Later events contribute
    /// `tokens / elapsed` since the previous sample point; events inside the
    /// minimum interval (or out of order) accumulate until one lands far
    /// enough ahead.
    pub fn record(&mut self, at: DateTime<Utc>, tokens: u64) -> Option<RateSample> {
        let Some(prev) = self.last_point else {
            self.last_point = Some(at);
            return None;
        };

        self.pending_tokens = self.pending_tokens.saturating_add(tokens);
        let elapsed_ms = (at - prev).num_milliseconds();
        if elapsed_ms < MIN_SAMPLE_INTERVAL_MS {
            return None;
        }

        let minutes = elapsed_ms as f64 / 60_000.0;
        let sample = RateSample {
            at,
            tokens_per_minute: self.pending_tokens as f64 / minutes,
        };
        self.pending_tokens = 0;
        self.last_point = Some(at);
        self.push(sample);
        Some(sample)
    }

    fn push(&mut self, sample: RateSample) {
        let rate = sample.tokens_per_minute;
        self.ewma = Some(match self.ewma {
            Some(prev) => self.alpha * rate + (1.0 - self.alpha) * prev,
            None => rate,
        });
        self.sum += rate;
        self.count += 1;
        self.peak = self.peak.max(rate);

        self.samples.push_back(sample);
        while self.samples.len() > self.capacity {
            self.samples.pop_front();
        }
    }

    /// Smoothed rate as of `now`, halving every half-life of idleness and
    /// dropping to zero once the source has been idle past the stall threshold.
    pub fn current_rate(&self, now: DateTime<Utc>) -> f64 {
        let (Some(ewma), Some(last)) = (self.ewma, self.last_point) else {
            return 0.0;
        };
        let idle = now - last;
        if idle >= self.stall_threshold {
            return 0.0;
        }
        if idle <= Duration::zero() || self.half_life <= Duration::zero() {
            return ewma;
        }
        let half_lives = idle.num_milliseconds() as f64 / self.half_life.num_milliseconds() as f64;
        ewma * 0.5f64.powf(half_lives)
    }

    pub fn average_rate(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.sum / self.count as f64
        }
    }

    fn recent(&self, now: DateTime<Utc>, span: Duration) -> impl Iterator<Item = f64> + '_ {
        let since = now - span;
        self.samples
            .iter()
            .filter(move |s| s.at >= since)
            .map(|s| s.tokens_per_minute)
    }

    /// Population standard deviation over the trailing volatility window.
    pub fn volatility(&self, now: DateTime<Utc>) -> f64 {
        let values: Vec<f64> = self.recent(now, self.volatility_window).collect();
        if values.len() < 2 {
            return 0.0;
        }
        let mean = values.iter().sum::<f64>() / values.len() as f64;
        let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / values.len() as f64;
        variance.sqrt()
    }

    pub fn trend(&self, now: DateTime<Utc>) -> Trend {
        let long = self.average_rate();
        if self.count < 2 || long <= 0.0 {
            return Trend::Stable;
        }
        let short: Vec<f64> = self.recent(now, self.short_window).collect();
        if short.is_empty() {
            return Trend::Stable;
        }
        let short_mean = short.iter().sum::<f64>() / short.len() as f64;
        if short_mean > long * (1.0 + self.trend_margin) {
            Trend::Rising
        } else if short_mean < long * (1.0 - self.trend_margin) {
            Trend::Falling
        } else {
            Trend::Stable
        }
    }

    /// Derive the metrics as of `now`. A degraded evaluation reports no
    /// current consumption.
    pub fn metrics(&self, now: DateTime<Utc>, degraded: bool) -> BurnRateMetrics {
        BurnRateMetrics {
            current_rate: if degraded { 0.0 } else { self.current_rate(now) },
            average_rate: self.average_rate(),
            peak_rate: self.peak,
            volatility: self.volatility(now),
            trend: self.trend(now),
            sample_count: self.count,
        }
    }

    /// Retained samples with `from <= at < to`, oldest first.
    pub fn history(&self, from: DateTime<Utc>, to: DateTime<Utc>) -> Vec<RateSample> {
        self.samples
            .iter()
            .filter(|s| s.at >= from && s.at < to)
            .copied()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 4, 9, 0, 0).unwrap()
    }

    fn minutes(m: i64) -> DateTime<Utc> {
        t0() + Duration::minutes(m)
    }

    fn estimator() -> RateEstimator {
        RateEstimator::new(&EngineConfig::default())
    }

    #[test]
    fn first_event_only_anchors() {
        let mut r = estimator();
        assert!(r.record(t0(), 5000).is_none());
        assert_eq!(r.metrics(t0(), false), BurnRateMetrics::default());
    }

    #[test]
    fn rate_is_tokens_over_elapsed_minutes() {
        let mut r = estimator();
        r.record(t0(), 0);
        let s = r.record(minutes(2), 1000).unwrap();
        assert!((s.tokens_per_minute - 500.0).abs() < 1e-9);
        assert!((r.current_rate(minutes(2)) - 500.0).abs() < 1e-9);
    }

    #[test]
    fn bursts_are_coalesced() {
        let mut r = estimator();
        r.record(t0(), 0);
        assert!(r.record(t0() + Duration::milliseconds(200), 300).is_none());
        assert!(r.record(t0() + Duration::milliseconds(400), 300).is_none());
        let s = r.record(minutes(1), 400).unwrap();
        assert!((s.tokens_per_minute - 1000.0).abs() < 1e-9);
    }

    #[test]
    fn constant_rate_converges() {
        let mut r = estimator();
        for m in 0..30 {
            r.record(minutes(m), 2000);
        }
        let metrics = r.metrics(minutes(29), false);
        assert!((metrics.current_rate - 2000.0).abs() < 1e-6);
        assert!((metrics.average_rate - 2000.0).abs() < 1e-6);
        assert!((metrics.peak_rate - 2000.0).abs() < 1e-6);
        assert!(metrics.volatility < 1e-6);
        assert_eq!(metrics.trend, Trend::Stable);
        assert_eq!(metrics.sample_count, 29);
    }

    #[test]
    fn ewma_dampens_single_spike() {
        let mut r = estimator();
        for m in 0..10 {
            r.record(minutes(m), 1000);
        }
        r.record(minutes(10), 10_000);
        let current = r.current_rate(minutes(10));
        assert!(current < 10_000.0);
        assert!(current > 1000.0);
        assert!((r.metrics(minutes(10), false).peak_rate - 10_000.0).abs() < 1e-9);
    }

    #[test]
    fn rising_and_falling_trend() {
        let mut r = estimator();
        for m in 0..30 {
            r.record(minutes(m), 1000);
        }
        for m in 30..35 {
            r.record(minutes(m), 5000);
        }
        assert_eq!(r.trend(minutes(34)), Trend::Rising);

        let mut r = estimator();
        for m in 0..30 {
            r.record(minutes(m), 5000);
        }
        for m in 30..35 {
            r.record(minutes(m), 500);
        }
        assert_eq!(r.trend(minutes(34)), Trend::Falling);
    }

    #[test]
    fn volatility_only_covers_trailing_window() {
        let mut r = estimator();
        r.record(minutes(0), 0);
        r.record(minutes(1), 100);
        r.record(minutes(2), 10_000);
        // Within 15 minutes both samples count
        assert!(r.volatility(minutes(3)) > 1000.0);
        // Long after, nothing is recent
        assert_eq!(r.volatility(minutes(60)), 0.0);
    }

    #[test]
    fn rate_decays_while_idle_and_zeroes_after_stall() {
        let mut r = estimator();
        r.record(minutes(0), 0);
        r.record(minutes(1), 1000);
        let half = r.current_rate(minutes(3));
        assert!((half - 500.0).abs() < 1e-6);
        let quarter = r.current_rate(minutes(5));
        assert!((quarter - 250.0).abs() < 1e-6);
        assert_eq!(r.current_rate(minutes(6) + Duration::seconds(1)), 0.0);
    }

    #[test]
    fn degraded_metrics_report_zero_current_rate() {
        let mut r = estimator();
        r.record(minutes(0), 0);
        r.record(minutes(1), 1000);
        let m = r.metrics(minutes(1), true);
        assert_eq!(m.current_rate, 0.0);
        assert!((m.average_rate - 1000.0).abs() < 1e-9);
    }

    #[test]
    fn reset_discards_samples() {
        let mut r = estimator();
        r.record(minutes(0), 0);
        r.record(minutes(1), 1000);
        r.reset();
        assert_eq!(r.metrics(minutes(1), false), BurnRateMetrics::default());
        assert!(r.history(t0(), minutes(10)).is_empty());
    }

    #[test]
    fn history_is_bounded_and_half_open() {
        let mut config = EngineConfig::default();
        config.rate.sample_capacity = 5;
        let mut r = RateEstimator::new(&config);
        for m in 0..20 {
            r.record(minutes(m), 100);
        }
        let all = r.history(t0(), minutes(100));
        assert_eq!(all.len(), 5);
        assert_eq!(all[0].at, minutes(15));
        let some = r.history(minutes(16), minutes(18));
        assert_eq!(some.iter().map(|s| s.at).collect::<Vec<_>>(), vec![minutes(16), minutes(17)]);
        // Lifetime stats keep every sample
        assert_eq!(r.metrics(minutes(19), false).sample_count, 19);
    }
}
