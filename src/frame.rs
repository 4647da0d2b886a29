//! Raw frame value type.
//!
//! A `Frame` is a single capture from one camera channel. Frames live for one
//! processing tick: a channel produces them on demand and the detection
//! adapter consumes them; nothing downstream retains pixel data.

/// One captured frame, RGB24 pixel data.
#[derive(Clone, Debug)]
pub struct Frame {
    pub pixels: Vec<u8>,
    pub width: u32,
    pub height: u32,
    /// Capture time, seconds since the unix epoch.
    pub captured_at: f64,
}

impl Frame {
    pub fn new(pixels: Vec<u8>, width: u32, height: u32, captured_at: f64) -> Self {
        Self {
            pixels,
            width,
            height,
            captured_at,
        }
    }
}
