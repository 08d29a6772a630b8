use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

/// Engine counters, shared between the handle and the processing task.
#[derive(Debug, Default)]
pub struct Diagnostics {
    pub events_accepted: AtomicU64,
    pub malformed: AtomicU64,
    pub unknown_source: AtomicU64,
    /// Events whose future timestamp was clamped to the engine clock
    pub clock_skew_clamped: AtomicU64,
    pub alerts_suppressed: AtomicU64,
    pub snapshots_published: AtomicU64,
    /// Snapshots evicted unread from a full subscriber queue
    pub snapshots_dropped: AtomicU64,
    pub stalls_detected: AtomicU64,
}

/// Point-in-time copy of [`Diagnostics`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiagnosticsSnapshot {
    pub events_accepted: u64,
    pub malformed: u64,
    pub unknown_source: u64,
    pub clock_skew_clamped: u64,
    pub alerts_suppressed: u64,
    pub snapshots_published: u64,
    pub snapshots_dropped: u64,
    pub stalls_detected: u64,
}

impl Diagnostics {
    pub fn incr(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add(counter: &AtomicU64, n: u64) {
        if n > 0 {
            counter.fetch_add(n, Ordering::Relaxed);
        }
    }

    pub fn snapshot(&self) -> DiagnosticsSnapshot {
        DiagnosticsSnapshot {
            events_accepted: self.events_accepted.load(Ordering::Relaxed),
            malformed: self.malformed.load(Ordering::Relaxed),
            unknown_source: self.unknown_source.load(Ordering::Relaxed),
            clock_skew_clamped: self.clock_skew_clamped.load(Ordering::Relaxed),
            alerts_suppressed: self.alerts_suppressed.load(Ordering::Relaxed),
            snapshots_published: self.snapshots_published.load(Ordering::Relaxed),
            snapshots_dropped: self.snapshots_dropped.load(Ordering::Relaxed),
            stalls_detected: self.stalls_detected.load(Ordering::Relaxed),
        }
    }
}
