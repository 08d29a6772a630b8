use std::collections::HashSet;

use burnwatch::{
    AlertCategory, Clock, Engine, EngineConfig, IngestError, ModelTier, RawEvent, Severity, Source,
    UsageEvent, WindowStatus,
};
use chrono::{DateTime, Duration, TimeZone, Utc};

fn at(day: u32, hour: u32, minute: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, day, hour, minute, 0).unwrap()
}

fn event(tier: ModelTier, tokens: u64, occurred_at: DateTime<Utc>) -> UsageEvent {
    UsageEvent {
        source: Source::Claude,
        model_tier: tier,
        input_tokens: tokens,
        output_tokens: 0,
        cache_read_tokens: 0,
        cache_creation_tokens: 0,
        occurred_at,
    }
}

fn replay() -> Engine {
    Engine::start_with_clock(EngineConfig::default(), Clock::Replay).unwrap()
}

#[tokio::test]
async fn late_joiner_sees_every_prior_event() {
    let engine = replay();
    let start = at(4, 9, 0);
    for i in 0..10_000 {
        let occurred_at = start + Duration::milliseconds(i * 100);
        engine
            .submit_event(event(ModelTier::Standard, 7, occurred_at))
            .unwrap();
    }
    let flushed = engine.flush().await.unwrap();
    assert_eq!(flushed.tokens_consumed(), 70_000);

    let mut late = engine.subscribe();
    let first = late.recv().await.unwrap();
    assert_eq!(first.sequence, flushed.sequence);
    assert_eq!(first.tokens_consumed(), 70_000);
    assert!(late.try_recv().is_none());

    assert_eq!(engine.diagnostics().events_accepted, 10_000);
    engine.shutdown().await;
}

#[tokio::test]
async fn subscribers_see_strictly_increasing_snapshots() {
    let engine = replay();
    let mut a = engine.subscribe();
    let mut b = engine.subscribe();

    for m in 0..10 {
        engine
            .submit_event(event(ModelTier::Standard, 1_000, at(4, 9, m)))
            .unwrap();
    }
    engine.flush().await.unwrap();

    for sub in [&mut a, &mut b] {
        let mut previous: Option<(u64, DateTime<Utc>)> = None;
        let mut seen = 0;
        while let Some(snap) = sub.try_recv() {
            if let Some((seq, generated)) = previous {
                assert!(snap.sequence > seq);
                assert!(snap.generated_at > generated);
            }
            previous = Some((snap.sequence, snap.generated_at));
            seen += 1;
        }
        // Initial snapshot plus one per event
        assert_eq!(seen, 11);
        assert_eq!(previous.unwrap().0, 10);
    }
    engine.shutdown().await;
}

#[tokio::test]
async fn slow_subscriber_drops_oldest_without_affecting_others() {
    let mut config = EngineConfig::default();
    config.engine.subscriber_queue = 4;
    let engine = Engine::start_with_clock(config, Clock::Replay).unwrap();
    let mut slow = engine.subscribe();

    for m in 0..20 {
        engine
            .submit_event(event(ModelTier::Standard, 100, at(4, 9, m)))
            .unwrap();
    }
    let latest = engine.flush().await.unwrap();

    let mut sequences = Vec::new();
    while let Some(snap) = slow.try_recv() {
        sequences.push(snap.sequence);
    }
    assert_eq!(sequences, vec![17, 18, 19, 20]);
    assert_eq!(slow.dropped(), 17);
    assert_eq!(latest.sequence, 20);
    assert_eq!(engine.diagnostics().snapshots_dropped, 17);

    let id = slow.id();
    assert!(engine.unsubscribe(id));
    engine
        .submit_event(event(ModelTier::Standard, 100, at(4, 9, 30)))
        .unwrap();
    assert_eq!(engine.flush().await.unwrap().tokens_consumed(), 2_100);
    assert!(slow.try_recv().is_none());
    engine.shutdown().await;
}

#[tokio::test]
async fn quota_rolls_over_at_week_boundary() {
    let engine = replay();
    // Sunday 2026-03-08 22:00 and 23:30, then Monday 00:30 in the same session
    engine
        .submit_event(event(ModelTier::Premium, 10, at(8, 22, 0)))
        .unwrap();
    engine
        .submit_event(event(ModelTier::Premium, 10, at(8, 23, 30)))
        .unwrap();
    let sunday = engine.flush().await.unwrap();
    let premium = sunday
        .weekly_quotas
        .iter()
        .find(|q| q.model_tier == ModelTier::Premium)
        .unwrap();
    assert_eq!(premium.period_start, at(2, 0, 0));
    assert!((premium.hours_consumed - 1.5).abs() < 1e-9);

    engine
        .submit_event(event(ModelTier::Premium, 10, at(9, 0, 30)))
        .unwrap();
    let monday = engine.flush().await.unwrap();
    let premium = monday
        .weekly_quotas
        .iter()
        .find(|q| q.model_tier == ModelTier::Premium)
        .unwrap();
    assert_eq!(premium.period_start, at(9, 0, 0));
    assert!((premium.hours_consumed - 0.5).abs() < 1e-9);

    let standard = monday
        .weekly_quotas
        .iter()
        .find(|q| q.model_tier == ModelTier::Standard)
        .unwrap();
    assert_eq!(standard.hours_consumed, 0.0);

    // The half hour before midnight stays with the old week
    let history = engine.quota_history().await.unwrap();
    let weeks: Vec<_> = history
        .iter()
        .filter(|q| q.model_tier == ModelTier::Premium)
        .map(|q| (q.period_start, q.hours_consumed))
        .collect();
    assert_eq!(weeks.len(), 2);
    assert_eq!(weeks[0].0, at(2, 0, 0));
    assert!((weeks[0].1 - 2.0).abs() < 1e-9);
    assert!((weeks[1].1 - 0.5).abs() < 1e-9);

    // The session itself is untouched by the week boundary
    let window = monday.session_window.as_ref().unwrap();
    assert_eq!((window.id, window.tokens_consumed), (1, 30));
    engine.shutdown().await;
}

#[tokio::test]
async fn budget_alert_escalates_then_clears_with_new_window() {
    let engine = replay();
    engine
        .submit_event(event(ModelTier::Standard, 610_000, at(4, 9, 0)))
        .unwrap();
    let warned = engine.flush().await.unwrap();
    assert_eq!(warned.active_alerts.len(), 1);
    assert_eq!(warned.active_alerts[0].category, AlertCategory::Budget);
    assert_eq!(warned.active_alerts[0].severity, Severity::Warning);

    engine
        .submit_event(event(ModelTier::Standard, 110_000, at(4, 9, 30)))
        .unwrap();
    let critical = engine.flush().await.unwrap();
    let budget: Vec<_> = critical
        .active_alerts
        .iter()
        .filter(|a| a.category == AlertCategory::Budget)
        .collect();
    assert_eq!(budget.len(), 1);
    assert_eq!(budget[0].severity, Severity::Critical);

    // Six hours later a new window opens and the condition no longer holds
    engine
        .submit_event(event(ModelTier::Standard, 10, at(4, 15, 30)))
        .unwrap();
    let fresh = engine.flush().await.unwrap();
    assert!(fresh.active_alerts.is_empty());
    assert_eq!(fresh.session_window.as_ref().unwrap().id, 2);

    let history = engine.alert_history().await.unwrap();
    assert_eq!(history.len(), 2);
    assert!(history.iter().all(|a| a.retired_at.is_some()));
    let ids: HashSet<_> = history.iter().map(|a| a.id).collect();
    assert_eq!(ids.len(), 2);
    engine.shutdown().await;
}

#[tokio::test]
async fn budget_warning_reraises_in_next_window_within_cooldown() {
    let engine = replay();
    engine
        .submit_event(event(ModelTier::Standard, 610_000, at(4, 9, 0)))
        .unwrap();
    let first = engine.flush().await.unwrap();
    assert_eq!(first.active_alerts.len(), 1);

    engine.close_session().unwrap();
    engine
        .submit_event(event(ModelTier::Standard, 610_000, at(4, 9, 2)))
        .unwrap();
    let second = engine.flush().await.unwrap();
    assert_eq!(second.session_window.as_ref().unwrap().id, 2);
    assert_eq!(second.active_alerts.len(), 1);
    let alert = &second.active_alerts[0];
    assert_eq!((alert.category, alert.severity), (AlertCategory::Budget, Severity::Warning));
    assert_ne!(alert.id, first.active_alerts[0].id);
    assert_eq!(engine.diagnostics().alerts_suppressed, 0);
    engine.shutdown().await;
}

#[tokio::test]
async fn closed_window_has_no_prediction() {
    let engine = replay();
    engine
        .submit_event(event(ModelTier::Standard, 500, at(4, 9, 0)))
        .unwrap();
    engine.close_session().unwrap();
    let closed = engine.flush().await.unwrap();
    let window = closed.session_window.as_ref().unwrap();
    assert_eq!(window.status, WindowStatus::Closed);
    assert!(closed.predicted_exhaustion_at.is_none());
    engine.shutdown().await;
}

#[tokio::test]
async fn future_timestamp_is_clamped_and_counted() {
    let engine = Engine::start(EngineConfig::default()).unwrap();
    let future = Utc::now() + Duration::hours(2);
    let raw: RawEvent = serde_json::from_value(serde_json::json!({
        "source": "codex",
        "model_tier": "standard",
        "input_tokens": 40,
        "output_tokens": 2,
        "cached_input_tokens": 0,
        "occurred_at": future.to_rfc3339(),
    }))
    .unwrap();
    engine.submit(raw).unwrap();

    let snap = engine.flush().await.unwrap();
    let window = snap.session_window.as_ref().unwrap();
    assert_eq!(window.tokens_consumed, 42);
    assert!(window.started_at < future - Duration::hours(1));
    assert_eq!(engine.diagnostics().clock_skew_clamped, 1);
    engine.shutdown().await;
}

#[tokio::test]
async fn missing_fields_are_rejected_with_reason() {
    let engine = replay();
    let raw: RawEvent = serde_json::from_value(serde_json::json!({
        "source": "claude",
        "model_tier": "premium",
        "input_tokens": 1,
        "output_tokens": 1,
        "cache_read_input_tokens": 0,
        "occurred_at": "2026-03-04T09:00:00Z",
    }))
    .unwrap();
    match engine.submit(raw) {
        Err(IngestError::Malformed(reason)) => assert!(reason.contains("cache_creation")),
        other => panic!("expected malformed, got {:?}", other),
    }
    assert_eq!(engine.latest().sequence, 0);
    engine.shutdown().await;
}
