use anyhow::Result;
use std::collections::BTreeMap;

use crate::detect::backend::{DetectorBackend, RawObject};
use crate::event::{Detection, WorldPosition};
use crate::frame::Frame;
use crate::now_ts;
use crate::zone::{CameraZone, PositionScale};

/// Bridges raw model outputs into the system's detection events.
///
/// The adapter owns the backend and the class table. For each frame it
/// filters raw objects to the configured classes, projects the bounding-box
/// center into world coordinates, and stamps the result with its zone.
pub struct DetectionAdapter {
    backend: Box<dyn DetectorBackend>,
    classes: BTreeMap<u32, String>,
    min_confidence: f64,
    scale: PositionScale,
}

impl DetectionAdapter {
    pub fn new(
        backend: Box<dyn DetectorBackend>,
        classes: BTreeMap<u32, String>,
        min_confidence: f64,
        scale: PositionScale,
    ) -> Self {
        Self {
            backend,
            classes,
            min_confidence,
            scale,
        }
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    pub fn warm_up(&mut self) -> Result<()> {
        self.backend.warm_up()
    }

    /// Run the backend on one frame and map its outputs to detections for
    /// the given zone. Objects of unconfigured classes are dropped.
    pub fn detect(&mut self, frame: &Frame, zone: CameraZone) -> Result<Vec<Detection>> {
        let raw = self.backend.detect(
            &frame.pixels,
            frame.width,
            frame.height,
            self.min_confidence,
        )?;

        let timestamp = now_ts();
        let detections = raw
            .into_iter()
            .filter_map(|object| {
                let label = self.classes.get(&object.class_id)?;
                Some(self.project(object, label.clone(), zone, frame, timestamp))
            })
            .collect();
        Ok(detections)
    }

    fn project(
        &self,
        object: RawObject,
        label: String,
        zone: CameraZone,
        frame: &Frame,
        timestamp: f64,
    ) -> Detection {
        let [x1, y1, x2, y2] = object.bbox;
        let cx = (x1 + x2) / 2.0 / frame.width as f64;
        let cy = (y1 + y2) / 2.0 / frame.height as f64;
        Detection {
            object: label,
            position: WorldPosition {
                x: cx * self.scale.x,
                y: cy * self.scale.y,
                z: zone.depth_offset(),
            },
            confidence: object.confidence,
            bbox: object.bbox,
            class_id: object.class_id,
            camera_zone: zone,
            timestamp,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::stub::StubDetector;

    fn classes() -> BTreeMap<u32, String> {
        let mut classes = BTreeMap::new();
        classes.insert(0, "person".to_string());
        classes.insert(2, "car".to_string());
        classes
    }

    #[test]
    fn projects_bbox_center_into_world_meters() {
        let backend = StubDetector::scripted(vec![RawObject {
            class_id: 2,
            confidence: 0.9,
            bbox: [100.0, 150.0, 200.0, 250.0],
        }]);
        let mut adapter = DetectionAdapter::new(
            Box::new(backend),
            classes(),
            0.5,
            PositionScale::default(),
        );

        let frame = Frame::new(vec![0u8; 4], 640, 480, 0.0);
        let out = adapter
            .detect(&frame, CameraZone::Left)
            .expect("detect");
        assert_eq!(out.len(), 1);

        let det = &out[0];
        // center = (150/640, 200/480), scaled by (5.0, 3.0)
        assert!((det.position.x - 1.171875).abs() < 1e-9);
        assert!((det.position.y - 1.25).abs() < 1e-9);
        assert!((det.position.z - 4.0).abs() < f64::EPSILON);
        assert_eq!(det.object, "car");
        assert_eq!(det.camera_zone, CameraZone::Left);
    }

    #[test]
    fn unconfigured_classes_are_dropped() {
        let backend = StubDetector::scripted(vec![
            RawObject {
                class_id: 7,
                confidence: 0.9,
                bbox: [0.0, 0.0, 10.0, 10.0],
            },
            RawObject {
                class_id: 0,
                confidence: 0.9,
                bbox: [0.0, 0.0, 10.0, 10.0],
            },
        ]);
        let mut adapter = DetectionAdapter::new(
            Box::new(backend),
            classes(),
            0.5,
            PositionScale::default(),
        );

        let frame = Frame::new(vec![0u8; 4], 640, 480, 0.0);
        let out = adapter
            .detect(&frame, CameraZone::Rear)
            .expect("detect");
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].object, "person");
        assert!((out[0].position.z - 0.0).abs() < f64::EPSILON);
    }
}
