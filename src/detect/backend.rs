use anyhow::Result;
use serde::{Deserialize, Serialize};

/// One raw model output before any zone or class filtering.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct RawObject {
    pub class_id: u32,
    /// Model confidence in [0,1].
    pub confidence: f64,
    /// Bounding box in pixel coordinates: [x1, y1, x2, y2].
    pub bbox: [f64; 4],
}

/// Object detector backend trait.
///
/// Implementations run synchronously on the capture worker thread and must
/// treat the pixel slice as read-only and ephemeral. Backends return raw
/// model outputs; class filtering and world projection happen in the
/// adapter, not here.
pub trait DetectorBackend: Send {
    /// Backend identifier.
    fn name(&self) -> &'static str;

    /// Run detection on a frame, dropping objects below `min_confidence`.
    fn detect(
        &mut self,
        pixels: &[u8],
        width: u32,
        height: u32,
        min_confidence: f64,
    ) -> Result<Vec<RawObject>>;

    /// Optional warm-up hook.
    fn warm_up(&mut self) -> Result<()> {
        Ok(())
    }
}
