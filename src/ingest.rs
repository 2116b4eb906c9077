//! UDP ingest listener: decode → rate-limit → verify → hand to state.
//!
//! One datagram carries one JSON message; a trailing newline is tolerated
//! but not required. Nothing is ever written back — UDP ingest is
//! fire-and-forget (§4.5).

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Instant;

use tokio::net::UdpSocket;
use tracing::{info, warn};

use crate::metrics::Metrics;
use crate::model::Message;
use crate::ratelimit::RateLimiter;
use crate::signature;
use crate::state::StateStore;

const READ_BUF_SIZE: usize = 2048;

pub async fn run(
    socket: UdpSocket,
    state: Arc<StateStore>,
    limiter: Arc<RateLimiter>,
    hmac_secret: Option<Vec<u8>>,
    metrics: Arc<Metrics>,
) {
    info!(addr = ?socket.local_addr().ok(), "udp_ingest_listening");
    let mut buf = [0u8; READ_BUF_SIZE];
    loop {
        let (n, _peer) = match socket.recv_from(&mut buf).await {
            Ok(v) => v,
            Err(e) => {
                warn!(error = %e, "udp_read_error");
                continue;
            }
        };

        let payload = trim_trailing_newline(&buf[..n]);
        let msg: Message = match serde_json::from_slice(payload) {
            Ok(m) => m,
            Err(e) => {
                metrics.malformed.fetch_add(1, Ordering::Relaxed);
                warn!(error = %e, "malformed_datagram");
                continue;
            }
        };

        if msg.device_id.is_empty() || msg.iface.is_empty() {
            metrics.malformed.fetch_add(1, Ordering::Relaxed);
            warn!("malformed_datagram_empty_key");
            continue;
        }

        if !limiter.allow(&msg.device_id, Instant::now()) {
            metrics.rate_limited.fetch_add(1, Ordering::Relaxed);
            warn!(device = %msg.device_id, "rate_limit_denied");
            continue;
        }

        if let Some(secret) = hmac_secret.as_deref() {
            if msg.sig.is_none() {
                metrics.signature_missing.fetch_add(1, Ordering::Relaxed);
                warn!(device = %msg.device_id, iface = %msg.iface, "signature_missing");
                continue;
            }
            if !signature::verify(&msg, secret) {
                metrics.signature_invalid.fetch_add(1, Ordering::Relaxed);
                warn!(device = %msg.device_id, iface = %msg.iface, "signature_invalid");
                continue;
            }
        }

        metrics.accepted.fetch_add(1, Ordering::Relaxed);
        state.ingest(&msg);
    }
}

fn trim_trailing_newline(buf: &[u8]) -> &[u8] {
    match buf.split_last() {
        Some((b'\n', rest)) => rest,
        _ => buf,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trims_single_trailing_newline_only() {
        assert_eq!(trim_trailing_newline(b"{}\n"), b"{}");
        assert_eq!(trim_trailing_newline(b"{}"), b"{}");
        assert_eq!(trim_trailing_newline(b""), b"");
    }
}
