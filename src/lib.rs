//! SafeDetect
//!
//! Multi-camera blind-spot detection for a vehicle. Three fixed camera
//! zones (left, right, rear) are polled at a target frame rate; detections
//! are projected into world coordinates, classified against per-zone
//! blind-spot rectangles, and fanned out to live consumers and an MQTT
//! broker.
//!
//! # Architecture
//!
//! - `zone`: zone identities, blind-spot rectangles, alert classification
//! - `camera`: per-zone capture channels (synthetic or V4L2)
//! - `detect`: detector backends and the adapter mapping raw outputs to
//!   detection events
//! - `pipeline`: the per-tick control loop and capture worker
//! - `hub`: TCP broadcast fan-out and the consumer control protocol
//! - `publish`: at-least-once MQTT publishing of detections and status
//!
//! Degradation is deliberate: a missing camera, a dead consumer, or an
//! unreachable broker reduces coverage but never stops the loop.

use std::time::{SystemTime, UNIX_EPOCH};

pub mod alert;
pub mod camera;
pub mod config;
pub mod detect;
pub mod event;
pub mod frame;
pub mod hub;
pub mod messages;
pub mod metrics;
pub mod pipeline;
pub mod publish;
pub mod zone;

pub use alert::{AlertSink, LogAlertSink};
pub use camera::{CameraChannel, CameraConfig, ChannelStatus};
pub use config::{SystemConfig, ZoneConfig};
pub use detect::{DetectionAdapter, DetectorBackend, RawObject, StubDetector};
pub use event::{Detection, WorldPosition};
pub use frame::Frame;
pub use hub::{BroadcastHub, HubConfig, HubContext, HubHandle};
pub use messages::{ClientMessage, ServerMessage};
pub use pipeline::{Pipeline, PipelineHandle, PipelineState, SystemStatus};
pub use publish::{EventPublisher, PublisherConfig};
pub use zone::{CameraZone, PositionScale, ZoneClassifier, ZoneGeometry, ZoneRect};

/// Current wall-clock time as seconds since the unix epoch. Clock failures
/// degrade to zero rather than aborting the tick.
pub fn now_ts() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}
