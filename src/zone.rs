//! Blind-spot zone geometry and classification.
//!
//! Responsibilities:
//! - identify the three monitored camera zones around the vehicle
//! - hold the normalized blind-spot rectangle for each zone
//! - decide whether a detection's position falls inside its zone
//!
//! All rectangle coordinates are normalized to [0,1] over the frame;
//! world positions are the normalized center scaled into meters.

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::event::Detection;

/// One of the three monitored vantage points around the vehicle.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CameraZone {
    Left,
    Right,
    Rear,
}

impl CameraZone {
    pub const ALL: [CameraZone; 3] = [CameraZone::Left, CameraZone::Right, CameraZone::Rear];

    pub fn as_str(&self) -> &'static str {
        match self {
            CameraZone::Left => "left",
            CameraZone::Right => "right",
            CameraZone::Rear => "rear",
        }
    }

    /// Fixed depth offset (meters on the vehicle's longitudinal axis) applied
    /// to every world position produced from this zone's camera.
    pub fn depth_offset(&self) -> f64 {
        match self {
            CameraZone::Left => 4.0,
            CameraZone::Right => -5.0,
            CameraZone::Rear => 0.0,
        }
    }
}

impl fmt::Display for CameraZone {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CameraZone {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "left" => Ok(CameraZone::Left),
            "right" => Ok(CameraZone::Right),
            "rear" => Ok(CameraZone::Rear),
            other => Err(anyhow!("unknown camera zone '{}'", other)),
        }
    }
}

/// Axis-aligned rectangle in normalized frame coordinates. Bounds are
/// inclusive on all four edges.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct ZoneRect {
    pub x_min: f64,
    pub x_max: f64,
    pub y_min: f64,
    pub y_max: f64,
}

impl ZoneRect {
    pub fn contains(&self, x: f64, y: f64) -> bool {
        x >= self.x_min && x <= self.x_max && y >= self.y_min && y <= self.y_max
    }

    pub fn validate(&self) -> Result<()> {
        if self.x_min >= self.x_max || self.y_min >= self.y_max {
            return Err(anyhow!(
                "degenerate zone rect: x [{}, {}], y [{}, {}]",
                self.x_min,
                self.x_max,
                self.y_min,
                self.y_max
            ));
        }
        for v in [self.x_min, self.x_max, self.y_min, self.y_max] {
            if !(0.0..=1.0).contains(&v) {
                return Err(anyhow!("zone rect coordinate {} outside [0,1]", v));
            }
        }
        Ok(())
    }
}

/// Factors mapping a normalized frame center to world meters.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct PositionScale {
    pub x: f64,
    pub y: f64,
}

impl Default for PositionScale {
    fn default() -> Self {
        Self { x: 5.0, y: 3.0 }
    }
}

/// Validated blind-spot rectangles plus the position scale used to project
/// detections into world coordinates.
#[derive(Clone, Debug)]
pub struct ZoneGeometry {
    rects: BTreeMap<CameraZone, ZoneRect>,
    scale: PositionScale,
}

impl ZoneGeometry {
    pub fn new(rects: BTreeMap<CameraZone, ZoneRect>, scale: PositionScale) -> Result<Self> {
        for (zone, rect) in &rects {
            rect.validate()
                .map_err(|e| anyhow!("zone {}: {}", zone, e))?;
        }
        Ok(Self { rects, scale })
    }

    pub fn scale(&self) -> PositionScale {
        self.scale
    }

    pub fn rect(&self, zone: CameraZone) -> Option<&ZoneRect> {
        self.rects.get(&zone)
    }

    pub fn rects(&self) -> &BTreeMap<CameraZone, ZoneRect> {
        &self.rects
    }

    /// Whether the normalized point lies inside the given zone's rectangle.
    /// A zone with no configured rectangle contains nothing.
    pub fn contains(&self, x: f64, y: f64, zone: CameraZone) -> bool {
        self.rects.get(&zone).is_some_and(|r| r.contains(x, y))
    }
}

/// Decides which detections warrant a blind-spot alert.
#[derive(Clone, Debug)]
pub struct ZoneClassifier {
    geometry: ZoneGeometry,
}

impl ZoneClassifier {
    pub fn new(geometry: ZoneGeometry) -> Self {
        Self { geometry }
    }

    /// A detection is alert-worthy when its normalized frame center lies
    /// inside the rectangle of the zone whose camera produced it. Other
    /// zones' rectangles never apply.
    pub fn is_alert_worthy(&self, detection: &Detection) -> bool {
        let scale = self.geometry.scale();
        if scale.x == 0.0 || scale.y == 0.0 {
            return false;
        }
        let nx = detection.position.x / scale.x;
        let ny = detection.position.y / scale.y;
        self.geometry.contains(nx, ny, detection.camera_zone)
    }

    /// Detections from the given tick that fall inside their zone.
    pub fn alert_worthy<'a>(&self, detections: &'a [Detection]) -> Vec<&'a Detection> {
        detections
            .iter()
            .filter(|d| self.is_alert_worthy(d))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::WorldPosition;

    fn geometry() -> ZoneGeometry {
        let mut rects = BTreeMap::new();
        rects.insert(
            CameraZone::Left,
            ZoneRect {
                x_min: 0.0,
                x_max: 0.3,
                y_min: 0.2,
                y_max: 0.8,
            },
        );
        rects.insert(
            CameraZone::Rear,
            ZoneRect {
                x_min: 0.3,
                x_max: 0.7,
                y_min: 0.7,
                y_max: 1.0,
            },
        );
        ZoneGeometry::new(rects, PositionScale::default()).expect("valid geometry")
    }

    fn detection(zone: CameraZone, nx: f64, ny: f64) -> Detection {
        let scale = PositionScale::default();
        Detection {
            object: "car".to_string(),
            position: WorldPosition {
                x: nx * scale.x,
                y: ny * scale.y,
                z: zone.depth_offset(),
            },
            confidence: 0.9,
            bbox: [0.0, 0.0, 10.0, 10.0],
            class_id: 2,
            camera_zone: zone,
            timestamp: 0.0,
        }
    }

    #[test]
    fn zone_boundaries_are_inclusive() {
        let geo = geometry();
        assert!(geo.contains(0.3, 0.5, CameraZone::Left));
        assert!(geo.contains(0.0, 0.2, CameraZone::Left));
        assert!(!geo.contains(0.30001, 0.5, CameraZone::Left));
        assert!(!geo.contains(0.3, 0.19999, CameraZone::Left));
    }

    #[test]
    fn unconfigured_zone_contains_nothing() {
        let geo = geometry();
        assert!(!geo.contains(0.9, 0.5, CameraZone::Right));
    }

    #[test]
    fn degenerate_rect_is_rejected() {
        let mut rects = BTreeMap::new();
        rects.insert(
            CameraZone::Left,
            ZoneRect {
                x_min: 0.3,
                x_max: 0.3,
                y_min: 0.2,
                y_max: 0.8,
            },
        );
        assert!(ZoneGeometry::new(rects, PositionScale::default()).is_err());
    }

    #[test]
    fn out_of_range_rect_is_rejected() {
        let mut rects = BTreeMap::new();
        rects.insert(
            CameraZone::Left,
            ZoneRect {
                x_min: -0.1,
                x_max: 0.3,
                y_min: 0.2,
                y_max: 0.8,
            },
        );
        assert!(ZoneGeometry::new(rects, PositionScale::default()).is_err());
    }

    #[test]
    fn classification_uses_own_zone_only() {
        let classifier = ZoneClassifier::new(geometry());

        // Inside the left rect, seen by the left camera.
        assert!(classifier.is_alert_worthy(&detection(CameraZone::Left, 0.15, 0.5)));
        // Same normalized point but seen by the rear camera: outside the
        // rear rect, not alert-worthy.
        assert!(!classifier.is_alert_worthy(&detection(CameraZone::Rear, 0.15, 0.5)));
        // Inside the rear rect.
        assert!(classifier.is_alert_worthy(&detection(CameraZone::Rear, 0.5, 0.85)));
    }

    #[test]
    fn alert_worthy_filters_a_tick() {
        let classifier = ZoneClassifier::new(geometry());
        let detections = vec![
            detection(CameraZone::Left, 0.15, 0.5),
            detection(CameraZone::Left, 0.9, 0.5),
            detection(CameraZone::Rear, 0.5, 0.85),
        ];
        let hits = classifier.alert_worthy(&detections);
        assert_eq!(hits.len(), 2);
    }

    #[test]
    fn zone_serializes_lowercase() {
        assert_eq!(
            serde_json::to_string(&CameraZone::Left).expect("serialize"),
            "\"left\""
        );
        let parsed: CameraZone = serde_json::from_str("\"rear\"").expect("deserialize");
        assert_eq!(parsed, CameraZone::Rear);
    }
}
