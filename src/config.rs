//! Configuration surface (§6), exposed as a `clap`-derived CLI with
//! environment-variable fallbacks, consistent with how this stack's
//! other services take configuration.

use clap::Parser;

#[derive(Parser, Debug, Clone)]
#[command(name = "linkpulse-controller", about = "Network telemetry controller")]
pub struct Config {
    /// UDP listen address for agent ingest.
    #[arg(long, env = "LINKPULSE_UDP_LISTEN", default_value = "0.0.0.0:9000")]
    pub udp_listen: String,

    /// HTTP listen address (dashboard WebSocket, history API, metrics).
    #[arg(long, env = "LINKPULSE_HTTP_LISTEN", default_value = "0.0.0.0:8080")]
    pub http_listen: String,

    /// Seconds of silence before an interface is considered OFFLINE.
    #[arg(long, env = "LINKPULSE_OFFLINE_AFTER_SECS", default_value_t = 5)]
    pub offline_after_secs: u64,

    /// Consecutive breaching evaluations required before ALERT. Clamped
    /// to >= 1.
    #[arg(long, env = "LINKPULSE_ALERT_CONSECUTIVE", default_value_t = 3)]
    pub alert_consecutive: u32,

    /// Max ingest messages per device per second. 0 disables rate limiting.
    #[arg(long, env = "LINKPULSE_MAX_INGEST_PER_SEC", default_value_t = 0)]
    pub max_ingest_per_sec: i64,

    /// Shared HMAC secret for agent messages. Empty disables verification.
    #[arg(long, env = "LINKPULSE_HMAC_SECRET", default_value = "")]
    pub hmac_secret: String,

    /// Directory for persisted history. Empty disables history.
    #[arg(long, env = "LINKPULSE_HISTORY_DIR", default_value = "")]
    pub history_dir: String,

    /// Seconds to retain persisted samples.
    #[arg(long, env = "LINKPULSE_HISTORY_RETENTION_SECS", default_value_t = 300)]
    pub history_retention_secs: u64,
}

impl Config {
    pub fn hmac_secret_bytes(&self) -> Option<Vec<u8>> {
        if self.hmac_secret.is_empty() {
            None
        } else {
            Some(self.hmac_secret.as_bytes().to_vec())
        }
    }

    pub fn alert_consecutive_clamped(&self) -> u32 {
        self.alert_consecutive.max(1)
    }
}
