use anyhow::Result;
use sha2::{Digest, Sha256};

use crate::detect::backend::{DetectorBackend, RawObject};

/// Stub backend for development and tests.
///
/// Two modes:
/// - hash mode (default): emits one centered car-class object whenever the
///   frame's pixel hash changes, approximating motion
/// - scripted mode: replays a fixed object list on every call, still subject
///   to the confidence floor
pub struct StubDetector {
    last_hash: Option<[u8; 32]>,
    scripted: Option<Vec<RawObject>>,
}

impl StubDetector {
    pub fn new() -> Self {
        Self {
            last_hash: None,
            scripted: None,
        }
    }

    /// Replay the given objects on every frame.
    pub fn scripted(objects: Vec<RawObject>) -> Self {
        Self {
            last_hash: None,
            scripted: Some(objects),
        }
    }
}

impl Default for StubDetector {
    fn default() -> Self {
        Self::new()
    }
}

impl DetectorBackend for StubDetector {
    fn name(&self) -> &'static str {
        "stub"
    }

    fn detect(
        &mut self,
        pixels: &[u8],
        width: u32,
        height: u32,
        min_confidence: f64,
    ) -> Result<Vec<RawObject>> {
        if let Some(objects) = &self.scripted {
            return Ok(objects
                .iter()
                .copied()
                .filter(|o| o.confidence >= min_confidence)
                .collect());
        }

        let current_hash: [u8; 32] = Sha256::digest(pixels).into();
        let changed = match self.last_hash {
            Some(prev) => prev != current_hash,
            None => false,
        };
        self.last_hash = Some(current_hash);

        if !changed {
            return Ok(vec![]);
        }

        // A change yields one centered box covering a quarter of the frame.
        let (w, h) = (width as f64, height as f64);
        let object = RawObject {
            class_id: 2,
            confidence: 0.85,
            bbox: [w * 0.375, h * 0.375, w * 0.625, h * 0.625],
        };
        if object.confidence < min_confidence {
            return Ok(vec![]);
        }
        Ok(vec![object])
    }
}
