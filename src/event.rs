//! Detection event types.
//!
//! A `Detection` is one classified object instance produced from one frame,
//! enriched with a world-space position and its owning zone. Detections are
//! immutable once constructed and never persisted beyond the current tick
//! except as serialized messages.

use serde::{Deserialize, Serialize};

use crate::zone::CameraZone;

/// Object position in world coordinates (meters relative to the vehicle).
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct WorldPosition {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

/// One detected object, in the wire shape consumed by every transport.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Detection {
    /// Human-readable class label, e.g. "car".
    pub object: String,
    pub position: WorldPosition,
    /// Model confidence in [0,1].
    pub confidence: f64,
    /// Raw bounding box in pixel coordinates: [x1, y1, x2, y2].
    pub bbox: [f64; 4],
    pub class_id: u32,
    pub camera_zone: CameraZone,
    /// Capture timestamp, seconds since the unix epoch.
    pub timestamp: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detection_wire_shape() {
        let det = Detection {
            object: "car".to_string(),
            position: WorldPosition {
                x: 1.0,
                y: 0.5,
                z: 4.0,
            },
            confidence: 0.85,
            bbox: [100.0, 150.0, 200.0, 250.0],
            class_id: 2,
            camera_zone: CameraZone::Left,
            timestamp: 1_700_000_000.0,
        };

        let json = serde_json::to_value(&det).expect("serialize");
        assert_eq!(json["object"], "car");
        assert_eq!(json["camera_zone"], "left");
        assert_eq!(json["class_id"], 2);
        assert_eq!(json["position"]["z"], 4.0);
        assert_eq!(json["bbox"][3], 250.0);

        let back: Detection = serde_json::from_value(json).expect("deserialize");
        assert_eq!(back.camera_zone, CameraZone::Left);
        assert_eq!(back.bbox, det.bbox);
    }
}
