use chrono::{DateTime, Utc};
use std::sync::{Arc, Mutex};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::core::config::EngineConfig;
use crate::core::diagnostics::{Diagnostics, DiagnosticsSnapshot};
use crate::core::error::{EngineError, IngestError};
use crate::core::models::alert::{Alert, AlertId};
use crate::core::models::event::UsageEvent;
use crate::core::models::rate::RateSample;
use crate::core::models::snapshot::Snapshot;
use crate::core::models::window::WeeklyQuota;
use crate::core::normalizer::{Normalizer, RawEvent};
use crate::core::publisher::{Publisher, Subscription, SubscriptionId};
use crate::core::state::EngineState;

/// Where the processing task takes "now" from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Clock {
    /// Wall clock
    #[default]
    System,
    /// Latest event timestamp plus monotonic time elapsed since it arrived.
    /// Used to replay recorded streams.
    Replay,
}

enum Command {
    Event(UsageEvent),
    CloseSession,
    Acknowledge(AlertId, oneshot::Sender<Result<(), EngineError>>),
    RateHistory {
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        reply: oneshot::Sender<Vec<RateSample>>,
    },
    QuotaHistory(oneshot::Sender<Vec<WeeklyQuota>>),
    AlertHistory(oneshot::Sender<Vec<Alert>>),
    Flush(oneshot::Sender<Arc<Snapshot>>),
    Shutdown,
}

struct Shared {
    commands: mpsc::UnboundedSender<Command>,
    publisher: Arc<Publisher>,
    normalizer: Normalizer,
    diagnostics: Arc<Diagnostics>,
    task: Mutex<Option<JoinHandle<()>>>,
}

/// Handle to a running engine. Clones share the same engine.
///
/// All mutable state lives in one processing task; the handle only sends it
/// commands and reads published snapshots.
#[derive(Clone)]
pub struct Engine {
    shared: Arc<Shared>,
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("diagnostics", &self.shared.diagnostics.snapshot())
            .finish_non_exhaustive()
    }
}

impl Engine {
    /// Spawn the processing task on the current tokio runtime.
    pub fn start(config: EngineConfig) -> Result<Self, EngineError> {
        Self::start_with_clock(config, Clock::System)
    }

    /// Fails with `InvalidConfig` listing every issue `EngineConfig::validate` finds.
    pub fn start_with_clock(config: EngineConfig, clock: Clock) -> Result<Self, EngineError> {
        let issues = config.validate();
        if !issues.is_empty() {
            return Err(EngineError::InvalidConfig(issues.join("; ")));
        }

        let diagnostics = Arc::new(Diagnostics::default());
        let mut state = EngineState::new(&config);
        let started_at = match clock {
            Clock::System => Utc::now(),
            Clock::Replay => DateTime::<Utc>::default(),
        };
        let initial = state.initial_snapshot(started_at);
        let publisher = Arc::new(Publisher::new(
            initial,
            config.engine.subscriber_queue,
            Arc::clone(&diagnostics),
        ));

        let (commands, rx) = mpsc::unbounded_channel();
        let task = Processor {
            state,
            publisher: Arc::clone(&publisher),
            diagnostics: Arc::clone(&diagnostics),
            clock,
            stall_threshold: config.stall_threshold(),
            last_activity: Instant::now(),
            stalled: false,
        };
        let handle = tokio::spawn(task.run(rx, config.stall_check_interval()));
        info!(
            budget_limit = config.session.budget_limit,
            ?clock,
            "Engine started"
        );

        Ok(Self {
            shared: Arc::new(Shared {
                commands,
                publisher,
                normalizer: Normalizer::new(config.clock_skew_tolerance()),
                diagnostics,
                task: Mutex::new(Some(handle)),
            }),
        })
    }

    /// Validate and enqueue a raw event. Never blocks on processing.
    pub fn submit(&self, raw: RawEvent) -> Result<(), IngestError> {
        let normalized = match self.shared.normalizer.normalize(&raw, Utc::now()) {
            Ok(n) => n,
            Err(e) => {
                let counter = match e {
                    IngestError::UnknownSource { .. } => &self.shared.diagnostics.unknown_source,
                    _ => &self.shared.diagnostics.malformed,
                };
                Diagnostics::incr(counter);
                warn!(error = %e, "Event rejected");
                return Err(e);
            }
        };
        if let Some(skew) = normalized.clock_skew {
            Diagnostics::incr(&self.shared.diagnostics.clock_skew_clamped);
            warn!(
                skew_ms = skew.num_milliseconds(),
                source = normalized.event.source.id(),
                "Event timestamp ahead of engine clock, clamped"
            );
        }
        self.submit_event(normalized.event)
    }

    /// Enqueue an event that is already validated.
    pub fn submit_event(&self, event: UsageEvent) -> Result<(), IngestError> {
        self.send(Command::Event(event))
            .map_err(|_| IngestError::EngineStopped)
    }

    /// Signal that the current session ended before its five hours elapsed.
    pub fn close_session(&self) -> Result<(), EngineError> {
        self.send(Command::CloseSession)
    }

    pub fn subscribe(&self) -> Subscription {
        self.shared.publisher.subscribe()
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.shared.publisher.unsubscribe(id)
    }

    pub fn latest(&self) -> Arc<Snapshot> {
        self.shared.publisher.latest()
    }

    pub fn watch(&self) -> watch::Receiver<Arc<Snapshot>> {
        self.shared.publisher.watch()
    }

    pub async fn acknowledge(&self, id: AlertId) -> Result<(), EngineError> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Acknowledge(id, reply))?;
        rx.await.map_err(|_| EngineError::Stopped)?
    }

    /// Retained burn-rate samples with `from <= at < to`.
    pub async fn rate_history(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<RateSample>, EngineError> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::RateHistory { from, to, reply })?;
        rx.await.map_err(|_| EngineError::Stopped)
    }

    /// Every retained weekly quota period, including past ones.
    pub async fn quota_history(&self) -> Result<Vec<WeeklyQuota>, EngineError> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::QuotaHistory(reply))?;
        rx.await.map_err(|_| EngineError::Stopped)
    }

    pub async fn alert_history(&self) -> Result<Vec<Alert>, EngineError> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::AlertHistory(reply))?;
        rx.await.map_err(|_| EngineError::Stopped)
    }

    /// Wait until everything submitted so far is processed and return the
    /// snapshot that reflects it.
    pub async fn flush(&self) -> Result<Arc<Snapshot>, EngineError> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Flush(reply))?;
        rx.await.map_err(|_| EngineError::Stopped)
    }

    pub fn diagnostics(&self) -> DiagnosticsSnapshot {
        self.shared.diagnostics.snapshot()
    }

    /// Stop the processing task and close every subscription.
    pub async fn shutdown(&self) {
        let _ = self.send(Command::Shutdown);
        let handle = self
            .shared
            .task
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                warn!(error = %e, "Engine task ended abnormally");
            }
        }
    }

    fn send(&self, command: Command) -> Result<(), EngineError> {
        self.shared
            .commands
            .send(command)
            .map_err(|_| EngineError::Stopped)
    }
}

/// The single writer.
struct Processor {
    state: EngineState,
    publisher: Arc<Publisher>,
    diagnostics: Arc<Diagnostics>,
    clock: Clock,
    stall_threshold: std::time::Duration,
    last_activity: Instant,
    stalled: bool,
}

impl Processor {
    async fn run(mut self, mut rx: mpsc::UnboundedReceiver<Command>, check_every: std::time::Duration) {
        let mut ticker = time::interval(check_every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker.tick().await;

        loop {
            tokio::select! {
                command = rx.recv() => match command {
                    Some(Command::Shutdown) | None => break,
                    Some(command) => self.handle(command),
                },
                _ = ticker.tick() => self.check_stall(),
            }
        }

        self.publisher.close_all();
        info!("Engine stopped");
    }

    fn handle(&mut self, command: Command) {
        match command {
            Command::Event(event) => {
                self.state.apply(&event);
                self.last_activity = Instant::now();
                Diagnostics::incr(&self.diagnostics.events_accepted);
                if self.stalled {
                    self.stalled = false;
                    info!("Event source resumed");
                }
                self.publish();
            }
            Command::CloseSession => {
                if self.state.close_session(self.now()) {
                    self.publish();
                }
            }
            Command::Acknowledge(id, reply) => {
                let result = self.state.acknowledge(id, self.now());
                if result.is_ok() {
                    self.publish();
                }
                let _ = reply.send(result);
            }
            Command::RateHistory { from, to, reply } => {
                let _ = reply.send(self.state.rate_history(from, to));
            }
            Command::QuotaHistory(reply) => {
                let _ = reply.send(self.state.quota_history());
            }
            Command::AlertHistory(reply) => {
                let _ = reply.send(self.state.alert_history());
            }
            Command::Flush(reply) => {
                let _ = reply.send(self.publisher.latest());
            }
            Command::Shutdown => {}
        }
    }

    fn check_stall(&mut self) {
        if self.last_activity.elapsed() < self.stall_threshold {
            return;
        }
        if !self.stalled {
            self.stalled = true;
            Diagnostics::incr(&self.diagnostics.stalls_detected);
            warn!(
                idle_secs = self.last_activity.elapsed().as_secs(),
                "No events within stall threshold, publishing degraded snapshots"
            );
        }
        self.publish();
    }

    fn now(&self) -> DateTime<Utc> {
        match self.clock {
            Clock::System => Utc::now(),
            Clock::Replay => {
                let base = self.state.windows().last_event_at().unwrap_or_default();
                let elapsed = chrono::Duration::from_std(self.last_activity.elapsed())
                    .unwrap_or_else(|_| chrono::Duration::zero());
                base + elapsed
            }
        }
    }

    fn publish(&mut self) {
        let (snapshot, evaluation) = self.state.assemble(self.now(), self.stalled);
        Diagnostics::add(&self.diagnostics.alerts_suppressed, evaluation.suppressed);
        let snapshot = self.publisher.publish(snapshot);
        debug!(
            sequence = snapshot.sequence,
            tokens = snapshot.tokens_consumed(),
            degraded = snapshot.degraded,
            raised = evaluation.raised.len(),
            retired = evaluation.retired.len(),
            "Snapshot published"
        );
    }
}
