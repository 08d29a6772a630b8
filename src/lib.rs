//! Real-time token quota and burn-rate tracking.
//!
//! Usage events flow through one [`Engine`]: they are validated, attributed
//! to a five-hour session window and the weekly per-tier quotas, folded into a
//! burn-rate estimate and an exhaustion projection, checked against the alert
//! rules, and published as immutable [`Snapshot`]s to every subscriber.

pub mod core;

pub use crate::core::config::EngineConfig;
pub use crate::core::diagnostics::DiagnosticsSnapshot;
pub use crate::core::engine::{Clock, Engine};
pub use crate::core::error::{EngineError, IngestError};
pub use crate::core::models::alert::{Alert, AlertCategory, AlertId, Severity};
pub use crate::core::models::event::{ModelTier, Source, UsageEvent};
pub use crate::core::models::rate::{BurnRateMetrics, RateSample, Trend};
pub use crate::core::models::snapshot::Snapshot;
pub use crate::core::models::window::{SessionWindow, WeeklyQuota, WindowStatus};
pub use crate::core::normalizer::RawEvent;
pub use crate::core::publisher::{Subscription, SubscriptionId};
