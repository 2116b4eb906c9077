//! HMAC-SHA-256 verification of ingest messages.
//!
//! The signed string is a fixed, pipe-joined field order; numeric fields
//! must render byte-identically to the agent's encoder or every signature
//! mismatches. See [`canonical_string`].

use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::model::Message;

type HmacSha256 = Hmac<Sha256>;

/// Builds the canonical signing string for a message:
/// `device_id|iface|ts_unix_ms|rx_bps|tx_bps|drops|q|lat_ms|seq`.
///
/// Numeric formatting relies on `f64`/integer `Display`, which already
/// renders the shortest round-tripping decimal in fixed notation — the
/// same algorithm Go's `strconv.FormatFloat(x, 'f', -1, 64)` uses, which
/// is what the agent signs against.
pub fn canonical_string(m: &Message) -> String {
    format!(
        "{}|{}|{}|{}|{}|{}|{}|{}|{}",
        m.device_id,
        m.iface,
        m.ts_unix_ms,
        m.rx_bps,
        m.tx_bps,
        m.drops,
        m.queue_depth,
        m.latency_ms,
        m.seq,
    )
}

/// Computes the lowercase-hex HMAC-SHA-256 over the canonical string.
pub fn sign(m: &Message, secret: &[u8]) -> String {
    let mut mac = HmacSha256::new_from_slice(secret).expect("HMAC accepts any key length");
    mac.update(canonical_string(m).as_bytes());
    hex_encode(&mac.finalize().into_bytes())
}

/// Verifies `m.sig` against the recomputed MAC under `secret`, in constant
/// time. Returns `false` on missing signature, bad hex, or MAC mismatch.
pub fn verify(m: &Message, secret: &[u8]) -> bool {
    let Some(sig_hex) = m.sig.as_deref() else {
        return false;
    };
    let Some(sig_bytes) = hex_decode(sig_hex) else {
        return false;
    };
    let mut mac = HmacSha256::new_from_slice(secret).expect("HMAC accepts any key length");
    mac.update(canonical_string(m).as_bytes());
    mac.verify_slice(&sig_bytes).is_ok()
}

fn hex_encode(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

fn hex_decode(s: &str) -> Option<Vec<u8>> {
    if s.len() % 2 != 0 {
        return None;
    }
    (0..s.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(&s[i..i + 2], 16).ok())
        .collect()
}
