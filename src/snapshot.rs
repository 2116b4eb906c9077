//! Self-contained, serializable views of current state — the unit of
//! fan-out to dashboard clients and the `/api/history` response shape.

use serde::Serialize;

use crate::model::Status;

#[derive(Clone, Debug, Serialize)]
pub struct IfaceSnapshot {
    pub name: String,
    pub rx_bps: f64,
    pub tx_bps: f64,
    pub drops: u32,
    pub q: i32,
    pub lat_ms: f64,
    pub status: Status,
}

#[derive(Clone, Debug, Serialize)]
pub struct DeviceSnapshot {
    pub id: String,
    pub status: Status,
    pub ifaces: Vec<IfaceSnapshot>,
}

#[derive(Clone, Debug, Serialize)]
pub struct StateSnapshot {
    pub t: i64,
    pub devices: Vec<DeviceSnapshot>,
}
