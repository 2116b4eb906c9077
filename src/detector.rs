//! 1 Hz health evaluator: reclassifies every interface/device on each
//! tick and pushes the resulting snapshot through the same fan-out path
//! ingest uses.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::debug;

use crate::state::StateStore;

pub async fn run(store: Arc<StateStore>, hub: Arc<crate::hub::Hub>) {
    let mut ticker = tokio::time::interval(Duration::from_secs(1));
    loop {
        ticker.tick().await;
        let snap = store.evaluate_statuses(Instant::now());
        debug!(devices = snap.devices.len(), "detector_tick");
        hub.broadcast_state(snap);
    }
}
