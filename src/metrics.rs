//! Ambient observability counters, exposed as a small JSON document at
//! `/metrics`. Not a Prometheus exposition — that concern (and wiring a
//! scrape target) is an excluded external collaborator; this is just the
//! same atomic-counter bookkeeping the ingest path already needs for
//! structured logging, surfaced for operators.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

#[derive(Default)]
pub struct Metrics {
    pub accepted: AtomicU64,
    pub malformed: AtomicU64,
    pub rate_limited: AtomicU64,
    pub signature_missing: AtomicU64,
    pub signature_invalid: AtomicU64,
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self, snapshots_dropped: u64, history_writes_dropped: u64, devices: usize, dashboard_clients: usize) -> MetricsSnapshot {
        MetricsSnapshot {
            accepted: self.accepted.load(Ordering::Relaxed),
            malformed: self.malformed.load(Ordering::Relaxed),
            rate_limited: self.rate_limited.load(Ordering::Relaxed),
            signature_missing: self.signature_missing.load(Ordering::Relaxed),
            signature_invalid: self.signature_invalid.load(Ordering::Relaxed),
            snapshots_dropped,
            history_writes_dropped,
            devices,
            dashboard_clients,
        }
    }
}

#[derive(Serialize)]
pub struct MetricsSnapshot {
    pub accepted: u64,
    pub malformed: u64,
    pub rate_limited: u64,
    pub signature_missing: u64,
    pub signature_invalid: u64,
    pub snapshots_dropped: u64,
    pub history_writes_dropped: u64,
    pub devices: usize,
    pub dashboard_clients: usize,
}
