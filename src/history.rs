//! Bounded, TTL-evicted persisted history of samples, keyed by
//! `(device, iface, ts)`.
//!
//! Backed by `sled`, an embedded KV store in the same family as the
//! reference implementation's embedded store. `sled` has no native
//! per-key TTL, so each value carries its own expiry and a periodic
//! sweep (§4.8) removes entries past it; `fetch` also filters any entry
//! that slipped past its expiry between sweeps, so the TTL contract
//! holds even mid-scan.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use crate::model::Sample;

#[derive(thiserror::Error, Debug)]
pub enum HistoryError {
    #[error("opening history store: {0}")]
    Open(#[source] sled::Error),
    #[error("history store io: {0}")]
    Io(#[source] sled::Error),
    #[error("history disabled")]
    Disabled,
    #[error("corrupt history record: {0}")]
    Corrupt(#[source] serde_json::Error),
}

fn now_ms() -> u64 {
    chrono::Utc::now().timestamp_millis().max(0) as u64
}

fn key(device: &str, iface: &str, ts: i64) -> Vec<u8> {
    format!("{device}|{iface}|{ts:020}").into_bytes()
}

#[derive(Serialize, Deserialize)]
struct StoredSample {
    sample: Sample,
    expire_at_ms: u64,
}

/// Contract implemented by both the real and no-op backends.
pub trait HistoryStore: Send + Sync {
    fn store_sample(&self, device: &str, iface: &str, sample: Sample) -> Result<(), HistoryError>;
    fn fetch_samples(
        &self,
        device: &str,
        iface: &str,
        since: Duration,
    ) -> Result<Vec<Sample>, HistoryError>;
    fn enabled(&self) -> bool;
    fn close(&self);
}

/// Used when `--history-dir` is empty: accepts writes silently, refuses
/// reads, matching the original's `noopHistory`.
pub struct NoopHistory;

impl HistoryStore for NoopHistory {
    fn store_sample(&self, _device: &str, _iface: &str, _sample: Sample) -> Result<(), HistoryError> {
        Ok(())
    }
    fn fetch_samples(
        &self,
        _device: &str,
        _iface: &str,
        _since: Duration,
    ) -> Result<Vec<Sample>, HistoryError> {
        Err(HistoryError::Disabled)
    }
    fn enabled(&self) -> bool {
        false
    }
    fn close(&self) {}
}

pub struct SledHistory {
    db: sled::Db,
    ttl: Duration,
}

impl SledHistory {
    pub fn open(dir: &str, ttl: Duration) -> Result<Self, HistoryError> {
        let db = sled::open(dir).map_err(HistoryError::Open)?;
        Ok(Self { db, ttl })
    }

    /// Removes entries past their expiry. Intended to run on an interval
    /// from a dedicated background task, the same shape as the
    /// rate-limiter/dedup eviction sweeps elsewhere in this stack.
    pub fn sweep_expired(&self) {
        let now = now_ms();
        let mut removed = 0usize;
        let mut stale_keys = Vec::new();
        for item in self.db.iter() {
            let Ok((k, v)) = item else { continue };
            match serde_json::from_slice::<StoredSample>(&v) {
                Ok(stored) if stored.expire_at_ms < now => stale_keys.push(k),
                Ok(_) => {}
                Err(_) => stale_keys.push(k),
            }
        }
        for k in &stale_keys {
            if self.db.remove(k).is_ok() {
                removed += 1;
            }
        }
        if removed > 0 {
            info!(removed, "history_eviction");
        }
    }
}

impl HistoryStore for SledHistory {
    fn store_sample(&self, device: &str, iface: &str, sample: Sample) -> Result<(), HistoryError> {
        let stored = StoredSample {
            sample,
            expire_at_ms: now_ms() + self.ttl.as_millis() as u64,
        };
        let bytes = serde_json::to_vec(&stored).map_err(HistoryError::Corrupt)?;
        self.db
            .insert(key(device, iface, sample.ts), bytes)
            .map_err(HistoryError::Io)?;
        Ok(())
    }

    fn fetch_samples(
        &self,
        device: &str,
        iface: &str,
        since: Duration,
    ) -> Result<Vec<Sample>, HistoryError> {
        let now = now_ms();
        let cutoff = now.saturating_sub(since.as_millis() as u64) as i64;
        let prefix = format!("{device}|{iface}|");
        let mut out = Vec::new();
        for item in self.db.scan_prefix(prefix.as_bytes()) {
            let (_, v) = item.map_err(HistoryError::Io)?;
            let stored: StoredSample = match serde_json::from_slice(&v) {
                Ok(s) => s,
                Err(_) => continue,
            };
            if stored.expire_at_ms < now {
                continue;
            }
            if stored.sample.ts < cutoff {
                continue;
            }
            out.push(stored.sample);
        }
        Ok(out)
    }

    fn enabled(&self) -> bool {
        true
    }

    fn close(&self) {
        if let Err(e) = self.db.flush() {
            error!(error = %e, "history_close_flush_failed");
        }
    }
}

/// Opens the configured history backend. Empty `dir` disables history.
pub fn open(dir: &str, ttl: Duration) -> Result<Box<dyn HistoryStore>, HistoryError> {
    if dir.trim().is_empty() {
        return Ok(Box::new(NoopHistory));
    }
    let store = SledHistory::open(dir, ttl)?;
    Ok(Box::new(store))
}

/// Background sweeper for a [`SledHistory`]-backed store; no-op forever
/// if history is disabled (the noop backend never schedules this).
pub async fn run_eviction_sweeper(store: std::sync::Arc<SledHistory>, interval: Duration) {
    let mut ticker = tokio::time::interval(interval);
    loop {
        ticker.tick().await;
        store.sweep_expired();
    }
}

pub fn log_store_failure(device: &str, iface: &str, err: &HistoryError) {
    warn!(device, iface, error = %err, "history_store_failed");
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(ts: i64) -> Sample {
        Sample {
            ts,
            rx: 1.0,
            tx: 2.0,
            drops: 0,
            q: 0,
            lat: 0.1,
            seq: 1,
        }
    }

    #[test]
    fn noop_store_accepts_but_refuses_fetch() {
        let h = NoopHistory;
        assert!(!h.enabled());
        assert!(h.store_sample("d", "eth0", sample(1)).is_ok());
        assert!(matches!(
            h.fetch_samples("d", "eth0", Duration::from_secs(60)),
            Err(HistoryError::Disabled)
        ));
    }

    #[test]
    fn sled_store_roundtrips_within_window() {
        let dir = tempdir();
        let h = SledHistory::open(dir.to_str().unwrap(), Duration::from_secs(300)).unwrap();
        assert!(h.enabled());
        h.store_sample("sw-01", "eth0", sample(1_700_000_000_000)).unwrap();
        let got = h.fetch_samples("sw-01", "eth0", Duration::from_secs(3600)).unwrap();
        assert_eq!(got.len(), 1);
        assert_eq!(got[0].seq, 1);
        std::fs::remove_dir_all(dir).ok();
    }

    #[test]
    fn sled_store_is_keyed_by_device_iface_prefix() {
        let dir = tempdir();
        let h = SledHistory::open(dir.to_str().unwrap(), Duration::from_secs(300)).unwrap();
        h.store_sample("sw-01", "eth0", sample(1)).unwrap();
        h.store_sample("sw-01", "eth1", sample(2)).unwrap();
        h.store_sample("sw-02", "eth0", sample(3)).unwrap();
        let got = h.fetch_samples("sw-01", "eth0", Duration::from_secs(3600)).unwrap();
        assert_eq!(got.len(), 1);
        assert_eq!(got[0].ts, 1);
        std::fs::remove_dir_all(dir).ok();
    }

    #[test]
    fn sweep_removes_expired_entries() {
        let dir = tempdir();
        let h = SledHistory::open(dir.to_str().unwrap(), Duration::from_millis(0)).unwrap();
        h.store_sample("sw-01", "eth0", sample(1)).unwrap();
        std::thread::sleep(Duration::from_millis(5));
        h.sweep_expired();
        let got = h.fetch_samples("sw-01", "eth0", Duration::from_secs(3600)).unwrap();
        assert!(got.is_empty());
        std::fs::remove_dir_all(dir).ok();
    }

    fn tempdir() -> std::path::PathBuf {
        use rand::Rng;
        let suffix: u64 = rand::thread_rng().gen();
        let mut p = std::env::temp_dir();
        p.push(format!("linkpulse-history-test-{}-{:x}", std::process::id(), suffix));
        p
    }
}
