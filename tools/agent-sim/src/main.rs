// =============================================================================
// LINKPULSE — Agent Simulator
// =============================================================================
// Stands in for the telemetry agent process (out of the controller's core
// scope): emits signed JSON datagrams for one or more interfaces on a
// device, with an occasional random spike, matching the controller's wire
// format and HMAC signing scheme.
// =============================================================================

use std::net::UdpSocket;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use clap::Parser;
use hmac::{Hmac, Mac};
use rand::Rng;
use serde::Serialize;
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

#[derive(Parser)]
#[command(name = "linkpulse-agent-sim")]
#[command(about = "Telemetry agent simulator for the linkpulse controller's UDP ingest path")]
struct Args {
    /// Controller UDP address.
    #[arg(long, default_value = "127.0.0.1:9000")]
    controller: String,

    /// Device id to report as.
    #[arg(long, default_value = "sw-01")]
    device: String,

    /// Comma-delimited interface names.
    #[arg(long, default_value = "eth0")]
    ifaces: String,

    /// Send period in milliseconds.
    #[arg(long, default_value_t = 1000)]
    period_ms: u64,

    /// Probability (0.0-1.0) of a spiked sample per send.
    #[arg(long, default_value_t = 0.05)]
    spike_prob: f64,

    /// Shared HMAC secret. Empty sends unsigned messages.
    #[arg(long, default_value = "")]
    secret: String,

    /// Number of sends per interface. 0 runs until interrupted.
    #[arg(long, default_value_t = 0)]
    count: u64,
}

#[derive(Serialize)]
struct Msg {
    device_id: String,
    iface: String,
    ts_unix_ms: i64,
    rx_bps: f64,
    tx_bps: f64,
    drops: u32,
    queue_depth: i32,
    latency_ms: f64,
    seq: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    sig: Option<String>,
}

fn canonical_string(m: &Msg) -> String {
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

fn sign(m: &Msg, secret: &[u8]) -> String {
    let mut mac = HmacSha256::new_from_slice(secret).expect("HMAC accepts any key length");
    mac.update(canonical_string(m).as_bytes());
    mac.finalize()
        .into_bytes()
        .iter()
        .map(|b| format!("{:02x}", b))
        .collect()
}

fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}

#[derive(Default)]
struct Counters {
    sent: AtomicU64,
    failed: AtomicU64,
    spiked: AtomicU64,
}

fn main() {
    let args = Args::parse();

    let socket = UdpSocket::bind("0.0.0.0:0").expect("failed to bind local udp socket");
    socket
        .connect(&args.controller)
        .unwrap_or_else(|e| panic!("failed to resolve controller address {}: {}", args.controller, e));

    let ifaces: Vec<String> = args.ifaces.split(',').map(|s| s.trim().to_string()).collect();
    let secret = (!args.secret.is_empty()).then(|| args.secret.as_bytes().to_vec());

    println!("=== LinkPulse Agent Simulator ===");
    println!("Controller: {}", args.controller);
    println!("Device:     {}", args.device);
    println!("Ifaces:     {:?}", ifaces);
    println!("Period:     {} ms", args.period_ms);
    println!("Signed:     {}", secret.is_some());
    println!();

    let counters = Arc::new(Counters::default());
    let mut rng = rand::thread_rng();
    let mut seq: u64 = 1;
    let start = Instant::now();
    let mut last_report = Instant::now();

    loop {
        for iface in &ifaces {
            let mut m = Msg {
                device_id: args.device.clone(),
                iface: iface.clone(),
                ts_unix_ms: now_ms(),
                rx_bps: 1e8,
                tx_bps: 8e7,
                drops: 0,
                queue_depth: 3,
                latency_ms: 0.5,
                seq,
                sig: None,
            };

            if rng.gen_bool(args.spike_prob) {
                m.drops = 150 + rng.gen_range(0..200);
                m.queue_depth = 25 + rng.gen_range(0..10);
                m.latency_ms = 10.0 + rng.gen::<f64>() * 50.0;
                counters.spiked.fetch_add(1, Ordering::Relaxed);
            }

            if let Some(secret) = secret.as_deref() {
                m.sig = Some(sign(&m, secret));
            }

            match serde_json::to_vec(&m) {
                Ok(payload) => match socket.send(&payload) {
                    Ok(_) => {
                        counters.sent.fetch_add(1, Ordering::Relaxed);
                    }
                    Err(e) => {
                        eprintln!("udp send error: {}", e);
                        counters.failed.fetch_add(1, Ordering::Relaxed);
                    }
                },
                Err(e) => eprintln!("encode error: {}", e),
            }

            seq += 1;
        }

        let sent = counters.sent.load(Ordering::Relaxed);
        if args.count > 0 && sent >= args.count * ifaces.len() as u64 {
            break;
        }

        if last_report.elapsed() >= Duration::from_secs(5) {
            println!(
                "[{:.1}s] sent={} failed={} spiked={}",
                start.elapsed().as_secs_f64(),
                sent,
                counters.failed.load(Ordering::Relaxed),
                counters.spiked.load(Ordering::Relaxed),
            );
            last_report = Instant::now();
        }

        std::thread::sleep(Duration::from_millis(args.period_ms));
    }

    println!(
        "\nDone. sent={} failed={} spiked={}",
        counters.sent.load(Ordering::Relaxed),
        counters.failed.load(Ordering::Relaxed),
        counters.spiked.load(Ordering::Relaxed),
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonical_string_matches_controller_signing_format() {
        let m = Msg {
            device_id: "sw-01".into(),
            iface: "eth0".into(),
            ts_unix_ms: 1_700_000_000_000,
            rx_bps: 1e8,
            tx_bps: 8e7,
            drops: 0,
            queue_depth: 3,
            latency_ms: 0.5,
            seq: 1,
            sig: None,
        };
        assert_eq!(
            canonical_string(&m),
            "sw-01|eth0|1700000000000|100000000|80000000|0|3|0.5|1"
        );
    }

    #[test]
    fn sign_is_deterministic_for_same_message() {
        let m = Msg {
            device_id: "sw-01".into(),
            iface: "eth0".into(),
            ts_unix_ms: 1_700_000_000_000,
            rx_bps: 1e8,
            tx_bps: 8e7,
            drops: 0,
            queue_depth: 3,
            latency_ms: 0.5,
            seq: 1,
            sig: None,
        };
        let a = sign(&m, b"secret");
        let b = sign(&m, b"secret");
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
    }
}
