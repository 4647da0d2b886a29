//! Consumer control protocol.
//!
//! Messages exchanged with hub consumers over newline-delimited JSON. Every
//! message carries a lowercase `type` tag. Unknown inbound types fail to
//! parse and are dropped by the hub with a warning; they never disconnect
//! the consumer.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::event::Detection;
use crate::zone::{CameraZone, ZoneRect};

/// Messages a consumer may send to the hub.
#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ClientMessage {
    Ping,
    Status,
    Command { command: String },
}

/// Messages the hub sends to consumers.
#[derive(Clone, Debug, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ServerMessage {
    Connection {
        status: String,
        message: String,
    },
    Pong {
        timestamp: f64,
    },
    Status {
        connected_clients: usize,
        server_status: String,
    },
    Config {
        blind_spot_zones: BTreeMap<CameraZone, ZoneRect>,
        object_colors: BTreeMap<String, String>,
    },
    Detections {
        timestamp: f64,
        detections: Vec<Detection>,
    },
}
