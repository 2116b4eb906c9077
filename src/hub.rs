//! Fan-out hub: maintains the dashboard client set and delivers
//! [`StateSnapshot`] values to all of them with bounded queueing and
//! drop-on-backpressure semantics.
//!
//! The inbound channel (capacity 32) and the "serialize once, write to
//! every client" delivery loop mirror the reference hub; per-client
//! registration, writer, and reader tasks follow the split-socket
//! pattern this stack's other Axum WebSocket handlers use.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use axum::extract::ws::{Message as WsMessage, WebSocket};
use dashmap::DashMap;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::snapshot::StateSnapshot;

const INBOUND_CAPACITY: usize = 32;
const CLIENT_QUEUE_CAPACITY: usize = 8;

type ClientId = u64;

pub struct Hub {
    clients: DashMap<ClientId, mpsc::Sender<Arc<str>>>,
    next_id: AtomicU64,
    inbound_tx: mpsc::Sender<StateSnapshot>,
    inbound_rx: tokio::sync::Mutex<Option<mpsc::Receiver<StateSnapshot>>>,
    dropped: AtomicU64,
}

impl Hub {
    pub fn new() -> Arc<Self> {
        let (tx, rx) = mpsc::channel(INBOUND_CAPACITY);
        Arc::new(Self {
            clients: DashMap::new(),
            next_id: AtomicU64::new(1),
            inbound_tx: tx,
            inbound_rx: tokio::sync::Mutex::new(Some(rx)),
            dropped: AtomicU64::new(0),
        })
    }

    /// Non-blocking: drops the snapshot and logs if the inbound channel is
    /// full. Fan-out lag must never stall ingest or the detector.
    pub fn broadcast_state(&self, snap: StateSnapshot) {
        if self.inbound_tx.try_send(snap).is_err() {
            self.dropped.fetch_add(1, Ordering::Relaxed);
            warn!("hub_inbound_full_dropping_snapshot");
        }
    }

    pub fn dropped_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    pub fn client_count(&self) -> usize {
        self.clients.len()
    }

    /// The single delivery task: drains the inbound channel, serializes
    /// each snapshot once, and fans it out to every registered client's
    /// own bounded queue. Never re-enters the state store.
    pub async fn run(self: Arc<Self>) {
        let mut rx = self
            .inbound_rx
            .lock()
            .await
            .take()
            .expect("run() called more than once");
        while let Some(snap) = rx.recv().await {
            let payload: Arc<str> = match serde_json::to_string(&snap) {
                Ok(s) => s.into(),
                Err(e) => {
                    warn!(error = %e, "snapshot_serialize_failed");
                    continue;
                }
            };
            let mut evict = Vec::new();
            for entry in self.clients.iter() {
                if entry.value().try_send(payload.clone()).is_err() {
                    evict.push(*entry.key());
                }
            }
            for id in evict {
                self.clients.remove(&id);
            }
        }
    }

    /// Registers a freshly upgraded WebSocket connection and spawns its
    /// writer + reader tasks. The reader exists solely to observe close;
    /// incoming client frames are ignored.
    pub fn register(self: &Arc<Self>, socket: WebSocket) {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::channel(CLIENT_QUEUE_CAPACITY);
        self.clients.insert(id, tx);
        let hub = Arc::clone(self);
        tokio::spawn(async move {
            run_client(hub, id, socket, rx).await;
        });
    }
}

async fn run_client(
    hub: Arc<Hub>,
    id: ClientId,
    socket: WebSocket,
    mut rx: mpsc::Receiver<Arc<str>>,
) {
    let (mut ws_tx, mut ws_rx) = socket.split();
    loop {
        tokio::select! {
            msg = rx.recv() => {
                match msg {
                    Some(payload) => {
                        if ws_tx.send(WsMessage::Text(payload.to_string())).await.is_err() {
                            break;
                        }
                    }
                    None => break,
                }
            }
            incoming = ws_rx.next() => {
                match incoming {
                    Some(Ok(WsMessage::Close(_))) | None => break,
                    Some(Err(_)) => break,
                    // client frames are ignored; the reader only detects close
                    _ => {}
                }
            }
        }
    }
    hub.clients.remove(&id);
    info!(client_id = id, "dashboard_client_disconnected");
}
