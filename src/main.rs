// =============================================================================
// LINKPULSE — Network Telemetry Controller
// =============================================================================
// Ingest path:   UDP datagram -> decode -> rate-limit(device) -> HMAC verify
//                -> State::ingest -> snapshot -> hub fan-out (+ async history)
// Detector path: 1 Hz tick -> reclassify every iface/device -> hub fan-out
// =============================================================================

mod api;
mod config;
mod detector;
mod history;
mod hub;
mod ingest;
mod metrics;
mod model;
mod ratelimit;
mod signature;
mod snapshot;
mod state;

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tracing::{error, info};

use config::Config;
use history::HistoryStore;
use hub::Hub;
use metrics::Metrics;
use ratelimit::RateLimiter;
use state::StateStore;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            std::env::var("RUST_LOG")
                .unwrap_or_else(|_| "linkpulse_controller=info,tower_http=info".into()),
        )
        .json()
        .init();

    let cfg = Config::parse();
    info!(udp = %cfg.udp_listen, http = %cfg.http_listen, "linkpulse_controller_starting");

    let history_retention = Duration::from_secs(cfg.history_retention_secs);
    let (history_store, history_for_close): (Arc<dyn HistoryStore>, Arc<dyn HistoryStore>) =
        if cfg.history_dir.trim().is_empty() {
            let noop = Arc::new(history::NoopHistory);
            (noop.clone(), noop)
        } else {
            match history::SledHistory::open(&cfg.history_dir, history_retention) {
                Ok(store) => {
                    let store = Arc::new(store);
                    info!(
                        dir = %cfg.history_dir,
                        retention_secs = cfg.history_retention_secs,
                        "history_persistence_enabled"
                    );
                    tokio::spawn(history::run_eviction_sweeper(
                        Arc::clone(&store),
                        Duration::from_secs(60),
                    ));
                    (store.clone(), store)
                }
                Err(e) => {
                    error!(error = %e, "history_store_open_failed");
                    std::process::exit(1);
                }
            }
        };

    let hub = Hub::new();
    tokio::spawn(Arc::clone(&hub).run());

    let (history_tx, history_rx) = mpsc::channel(10_000);
    tokio::spawn(state::run_history_writer(history_rx, history_store.clone()));

    let state_store = StateStore::new(
        Duration::from_secs(cfg.offline_after_secs),
        cfg.alert_consecutive_clamped(),
        Arc::clone(&hub),
        history_store,
        history_tx,
    );

    tokio::spawn(detector::run(Arc::clone(&state_store), Arc::clone(&hub)));

    let limiter = Arc::new(RateLimiter::new(
        cfg.max_ingest_per_sec,
        Duration::from_secs(1),
    ));
    let metrics = Arc::new(Metrics::new());

    let udp_socket = match UdpSocket::bind(&cfg.udp_listen).await {
        Ok(s) => s,
        Err(e) => {
            error!(addr = %cfg.udp_listen, error = %e, "udp_bind_failed");
            std::process::exit(1);
        }
    };
    tokio::spawn(ingest::run(
        udp_socket,
        Arc::clone(&state_store),
        limiter,
        cfg.hmac_secret_bytes(),
        Arc::clone(&metrics),
    ));

    let api_state = api::ApiState {
        store: state_store,
        hub,
        metrics,
    };
    let app = api::router(api_state);

    let listener = match tokio::net::TcpListener::bind(&cfg.http_listen).await {
        Ok(l) => l,
        Err(e) => {
            error!(addr = %cfg.http_listen, error = %e, "http_bind_failed");
            std::process::exit(1);
        }
    };
    info!(addr = %cfg.http_listen, "http_listening");

    if let Err(e) = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
    {
        error!(error = %e, "http_server_failed");
    }

    history_for_close.close();
    info!("shutdown_complete");
}

async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        if let Ok(mut sig) = signal(SignalKind::terminate()) {
            sig.recv().await;
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("shutdown_signal_received");
}
