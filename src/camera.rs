//! Camera channels.
//!
//! One `CameraChannel` per zone owns the capture device for that vantage
//! point. Channels are polled, not pushed: the capture worker asks each
//! available channel for at most one frame per tick.
//!
//! Device paths select the backend:
//! - `stub://name` creates a synthetic source that always opens
//! - `missing://name` always fails to open (exercises degraded startup)
//! - any other path is treated as a local V4L2 device node
//!   (feature: capture-v4l2)

use anyhow::{anyhow, Result};
use serde::Serialize;

use crate::frame::Frame;
use crate::now_ts;
use crate::zone::CameraZone;

/// Lifecycle state of one channel, reported in system status.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelStatus {
    NotConnected,
    Available,
    Error,
}

/// Configuration for one camera channel.
#[derive(Clone, Debug)]
pub struct CameraConfig {
    pub device: String,
    pub width: u32,
    pub height: u32,
    pub target_fps: u32,
}

/// One zone's capture device.
///
/// A backend exists exactly while the channel is `Available`. An open
/// failure parks the channel in `Error` until `reopen` or `close`.
pub struct CameraChannel {
    zone: CameraZone,
    config: CameraConfig,
    status: ChannelStatus,
    backend: Option<CaptureBackend>,
}

enum CaptureBackend {
    Synthetic(SyntheticSource),
    #[cfg(feature = "capture-v4l2")]
    Device(DeviceSource),
}

impl CameraChannel {
    pub fn new(zone: CameraZone, config: CameraConfig) -> Self {
        Self {
            zone,
            config,
            status: ChannelStatus::NotConnected,
            backend: None,
        }
    }

    pub fn zone(&self) -> CameraZone {
        self.zone
    }

    pub fn status(&self) -> ChannelStatus {
        self.status
    }

    pub fn device(&self) -> &str {
        &self.config.device
    }

    /// Try to open the capture device. On failure the channel enters
    /// `Error` and stays there; the failure is reflected in the returned
    /// status, not an `Err`.
    pub fn open(&mut self) -> ChannelStatus {
        if self.status != ChannelStatus::NotConnected {
            return self.status;
        }
        match self.open_backend() {
            Ok(backend) => {
                self.backend = Some(backend);
                self.status = ChannelStatus::Available;
                log::info!(
                    "{} camera: connected to {}",
                    self.zone,
                    self.config.device
                );
            }
            Err(err) => {
                self.backend = None;
                self.status = ChannelStatus::Error;
                log::error!(
                    "{} camera: failed to open {}: {:#}",
                    self.zone,
                    self.config.device,
                    err
                );
            }
        }
        self.status
    }

    /// Retry an errored channel. No-op for channels that are already
    /// available.
    pub fn reopen(&mut self) -> ChannelStatus {
        if self.status == ChannelStatus::Error {
            self.status = ChannelStatus::NotConnected;
        }
        self.open()
    }

    /// Capture one frame. Read errors are transient: they are logged at
    /// debug level and yield `None` without changing the channel status.
    pub fn read_frame(&mut self) -> Option<Frame> {
        let backend = self.backend.as_mut()?;
        match backend.next_frame(&self.config) {
            Ok(frame) => Some(frame),
            Err(err) => {
                log::debug!("{} camera: frame read failed: {:#}", self.zone, err);
                None
            }
        }
    }

    /// Release the device. Idempotent.
    pub fn close(&mut self) {
        if self.backend.take().is_some() {
            log::info!("{} camera: closed {}", self.zone, self.config.device);
        }
        self.status = ChannelStatus::NotConnected;
    }

    fn open_backend(&self) -> Result<CaptureBackend> {
        let device = self.config.device.as_str();
        if let Some(name) = device.strip_prefix("stub://") {
            return Ok(CaptureBackend::Synthetic(SyntheticSource::new(name)));
        }
        if device.starts_with("missing://") {
            return Err(anyhow!("device {} is not present", device));
        }

        #[cfg(feature = "capture-v4l2")]
        {
            let mut source = DeviceSource::new(self.config.clone());
            source.connect()?;
            return Ok(CaptureBackend::Device(source));
        }

        #[cfg(not(feature = "capture-v4l2"))]
        Err(anyhow!(
            "device {} requires the capture-v4l2 feature",
            device
        ))
    }
}

impl CaptureBackend {
    fn next_frame(&mut self, config: &CameraConfig) -> Result<Frame> {
        match self {
            CaptureBackend::Synthetic(source) => source.next_frame(config),
            #[cfg(feature = "capture-v4l2")]
            CaptureBackend::Device(source) => source.next_frame(),
        }
    }
}

// ----------------------------------------------------------------------------
// Synthetic source (stub://)
// ----------------------------------------------------------------------------

struct SyntheticSource {
    seed: u64,
    frame_count: u64,
    scene_state: u8,
}

impl SyntheticSource {
    fn new(name: &str) -> Self {
        // Distinct seeds keep the per-zone pixel streams from colliding.
        let seed = name.bytes().fold(0u64, |acc, b| acc.wrapping_mul(31).wrapping_add(b as u64));
        Self {
            seed,
            frame_count: 0,
            scene_state: 0,
        }
    }

    fn next_frame(&mut self, config: &CameraConfig) -> Result<Frame> {
        self.frame_count += 1;
        if self.frame_count % 50 == 0 {
            self.scene_state = self.scene_state.wrapping_add(1);
        }

        let pixel_count = (config.width * config.height * 3) as usize;
        let mut pixels = vec![0u8; pixel_count];
        for (i, pixel) in pixels.iter_mut().enumerate() {
            *pixel =
                ((i as u64 + self.seed + self.scene_state as u64) % 256) as u8;
        }

        Ok(Frame::new(pixels, config.width, config.height, now_ts()))
    }
}

// ----------------------------------------------------------------------------
// V4L2 device source (feature: capture-v4l2)
// ----------------------------------------------------------------------------

#[cfg(feature = "capture-v4l2")]
struct DeviceSource {
    config: CameraConfig,
    state: Option<DeviceState>,
    active_width: u32,
    active_height: u32,
}

#[cfg(feature = "capture-v4l2")]
#[ouroboros::self_referencing]
struct DeviceState {
    device: v4l::Device,
    #[borrows(mut device)]
    #[covariant]
    stream: v4l::prelude::MmapStream<'this, v4l::Device>,
}

#[cfg(feature = "capture-v4l2")]
impl DeviceSource {
    fn new(config: CameraConfig) -> Self {
        Self {
            active_width: config.width,
            active_height: config.height,
            config,
            state: None,
        }
    }

    fn connect(&mut self) -> Result<()> {
        use anyhow::Context;
        use v4l::buffer::Type;
        use v4l::video::Capture;

        let mut device = v4l::Device::with_path(&self.config.device)
            .with_context(|| format!("open v4l2 device {}", self.config.device))?;
        let mut format = device.format().context("read v4l2 format")?;
        format.width = self.config.width;
        format.height = self.config.height;
        format.fourcc = v4l::FourCC::new(b"RGB3");

        let format = match device.set_format(&format) {
            Ok(format) => format,
            Err(err) => {
                log::warn!(
                    "failed to set format on {}: {}",
                    self.config.device,
                    err
                );
                device
                    .format()
                    .context("read v4l2 format after set failure")?
            }
        };

        if self.config.target_fps > 0 {
            let params = v4l::video::capture::Parameters::with_fps(self.config.target_fps);
            if let Err(err) = device.set_params(&params) {
                log::warn!("failed to set fps on {}: {}", self.config.device, err);
            }
        }

        self.active_width = format.width;
        self.active_height = format.height;

        let state = DeviceStateBuilder {
            device,
            stream_builder: |device| {
                v4l::prelude::MmapStream::with_buffers(device, Type::VideoCapture, 4)
                    .map_err(|err| anyhow::Error::new(err).context("create v4l2 buffer stream"))
            },
        }
        .try_build()?;
        self.state = Some(state);
        Ok(())
    }

    fn next_frame(&mut self) -> Result<Frame> {
        use anyhow::Context;
        use v4l::io::traits::CaptureStream;

        let state = self.state.as_mut().context("v4l2 device not connected")?;
        let (buf, _meta) = state
            .with_mut(|fields| fields.stream.next())
            .map_err(|err| anyhow::Error::new(err).context("capture v4l2 frame"))?;

        Ok(Frame::new(
            buf.to_vec(),
            self.active_width,
            self.active_height,
            now_ts(),
        ))
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn stub_config(device: &str) -> CameraConfig {
        CameraConfig {
            device: device.to_string(),
            width: 640,
            height: 480,
            target_fps: 15,
        }
    }

    #[test]
    fn stub_channel_opens_and_produces_frames() {
        let mut channel = CameraChannel::new(CameraZone::Left, stub_config("stub://left"));
        assert_eq!(channel.status(), ChannelStatus::NotConnected);
        assert_eq!(channel.open(), ChannelStatus::Available);

        let frame = channel.read_frame().expect("frame");
        assert_eq!(frame.width, 640);
        assert_eq!(frame.height, 480);
        assert_eq!(frame.pixels.len(), 640 * 480 * 3);
    }

    #[test]
    fn missing_device_enters_error_and_stays_there() {
        let mut channel = CameraChannel::new(CameraZone::Rear, stub_config("missing://rear"));
        assert_eq!(channel.open(), ChannelStatus::Error);
        // Error is terminal for plain open.
        assert_eq!(channel.open(), ChannelStatus::Error);
        assert!(channel.read_frame().is_none());
        // reopen retries from scratch and fails again for this device.
        assert_eq!(channel.reopen(), ChannelStatus::Error);
    }

    #[test]
    fn close_is_idempotent() {
        let mut channel = CameraChannel::new(CameraZone::Right, stub_config("stub://right"));
        channel.open();
        channel.close();
        assert_eq!(channel.status(), ChannelStatus::NotConnected);
        channel.close();
        assert_eq!(channel.status(), ChannelStatus::NotConnected);
        assert!(channel.read_frame().is_none());
    }

    #[test]
    fn distinct_stub_devices_produce_distinct_pixels() {
        let mut left = CameraChannel::new(CameraZone::Left, stub_config("stub://left"));
        let mut right = CameraChannel::new(CameraZone::Right, stub_config("stub://right"));
        left.open();
        right.open();

        let a = left.read_frame().expect("frame");
        let b = right.read_frame().expect("frame");
        assert_ne!(a.pixels, b.pixels);
    }
}
