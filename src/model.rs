//! Wire message and sample types shared across the ingest, state, and
//! snapshot layers.

use serde::{Deserialize, Serialize};

/// One measurement reading for one interface at one instant.
///
/// Immutable once built — `State::ingest` constructs a fresh `Sample` per
/// accepted message and never mutates one in place.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    pub ts: i64,
    pub rx: f64,
    pub tx: f64,
    pub drops: u32,
    pub q: i32,
    pub lat: f64,
    pub seq: u64,
}

/// What arrives on the wire: one JSON object per UDP datagram.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub device_id: String,
    pub iface: String,
    pub ts_unix_ms: i64,
    pub rx_bps: f64,
    pub tx_bps: f64,
    pub drops: u32,
    pub queue_depth: i32,
    pub latency_ms: f64,
    pub seq: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sig: Option<String>,
}

impl Message {
    pub fn to_sample(&self) -> Sample {
        Sample {
            ts: self.ts_unix_ms,
            rx: self.rx_bps,
            tx: self.tx_bps,
            drops: self.drops,
            q: self.queue_depth,
            lat: self.latency_ms,
            seq: self.seq,
        }
    }
}

/// Health classification for an interface or device.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Status {
    Ok,
    Alert,
    Offline,
}

impl Status {
    pub fn as_str(&self) -> &'static str {
        match self {
            Status::Ok => "OK",
            Status::Alert => "ALERT",
            Status::Offline => "OFFLINE",
        }
    }
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_decodes_without_sig() {
        let raw = r#"{"device_id":"sw-01","iface":"eth0","ts_unix_ms":1700000000000,
            "rx_bps":1e8,"tx_bps":8e7,"drops":0,"queue_depth":3,"latency_ms":0.5,"seq":1}"#;
        let m: Message = serde_json::from_str(raw).unwrap();
        assert_eq!(m.device_id, "sw-01");
        assert!(m.sig.is_none());
    }

    #[test]
    fn message_decodes_with_sig() {
        let raw = r#"{"device_id":"sw-01","iface":"eth0","ts_unix_ms":1,
            "rx_bps":1.0,"tx_bps":1.0,"drops":0,"queue_depth":0,"latency_ms":0.0,"seq":1,
            "sig":"deadbeef"}"#;
        let m: Message = serde_json::from_str(raw).unwrap();
        assert_eq!(m.sig.as_deref(), Some("deadbeef"));
    }

    #[test]
    fn status_renders_uppercase() {
        assert_eq!(Status::Ok.as_str(), "OK");
        assert_eq!(Status::Alert.to_string(), "ALERT");
        assert_eq!(Status::Offline.as_str(), "OFFLINE");
    }
}
