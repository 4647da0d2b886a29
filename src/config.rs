//! Static system configuration.
//!
//! One immutable `SystemConfig` is loaded at process start (optional JSON
//! file named by `SAFEDETECT_CONFIG`, then `SAFEDETECT_*` env overrides,
//! then validation) and passed by value into every component at
//! construction. No component reads configuration from global state.

use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use crate::zone::{CameraZone, PositionScale, ZoneGeometry, ZoneRect};

const DEFAULT_HUB_ADDR: &str = "127.0.0.1:8765";
const DEFAULT_MQTT_ADDR: &str = "127.0.0.1:1883";
const DEFAULT_MQTT_TOPIC: &str = "safedetect/detections";
const DEFAULT_CONFIDENCE: f64 = 0.5;
const DEFAULT_FRAME_WIDTH: u32 = 640;
const DEFAULT_FRAME_HEIGHT: u32 = 480;
const DEFAULT_TARGET_FPS: u32 = 15;
const DEFAULT_ACK_TIMEOUT_SECS: u64 = 10;

#[derive(Debug, Deserialize, Default)]
struct ConfigFile {
    zones: Option<BTreeMap<String, ZoneConfigFile>>,
    scale: Option<PositionScale>,
    detection: Option<DetectionConfigFile>,
    camera: Option<CameraConfigFile>,
    hub: Option<HubConfigFile>,
    mqtt: Option<MqttConfigFile>,
}

#[derive(Debug, Deserialize)]
struct ZoneConfigFile {
    device: Option<String>,
    name: Option<String>,
    x_min: f64,
    x_max: f64,
    y_min: f64,
    y_max: f64,
}

#[derive(Debug, Deserialize, Default)]
struct DetectionConfigFile {
    confidence: Option<f64>,
    /// Class id -> label, keyed by the id's decimal string (JSON maps
    /// require string keys).
    classes: Option<BTreeMap<String, String>>,
    colors: Option<BTreeMap<String, String>>,
}

#[derive(Debug, Deserialize, Default)]
struct CameraConfigFile {
    width: Option<u32>,
    height: Option<u32>,
    target_fps: Option<u32>,
    reopen_secs: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
struct HubConfigFile {
    addr: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct MqttConfigFile {
    addr: Option<String>,
    topic: Option<String>,
    ack_timeout_secs: Option<u64>,
}

/// Per-zone configuration: which capture device serves the zone and the
/// blind-spot rectangle monitored there.
#[derive(Clone, Debug)]
pub struct ZoneConfig {
    pub device: String,
    pub name: String,
    pub rect: ZoneRect,
}

/// Complete immutable configuration for one run of the system.
#[derive(Clone, Debug)]
pub struct SystemConfig {
    pub zones: BTreeMap<CameraZone, ZoneConfig>,
    pub scale: PositionScale,
    /// Detection classes of interest: class id -> label.
    pub object_classes: BTreeMap<u32, String>,
    /// Label -> display color, reported verbatim to consumers.
    pub object_colors: BTreeMap<String, String>,
    pub confidence: f64,
    pub frame_width: u32,
    pub frame_height: u32,
    pub target_fps: u32,
    /// When set, channels that failed to open are retried at this cadence.
    /// Off by default: an open failure is terminal for the session.
    pub camera_reopen: Option<Duration>,
    pub hub_addr: String,
    pub mqtt_addr: String,
    pub mqtt_topic: String,
    pub ack_timeout: Duration,
}

impl SystemConfig {
    /// Load from the file named by `SAFEDETECT_CONFIG` (if any), apply env
    /// overrides, validate.
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("SAFEDETECT_CONFIG").ok();
        Self::load_from(config_path.as_deref().map(Path::new))
    }

    pub fn load_from(path: Option<&Path>) -> Result<Self> {
        let file_cfg = match path {
            Some(path) => read_config_file(path)?,
            None => ConfigFile::default(),
        };
        let mut cfg = Self::from_file(file_cfg)?;
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: ConfigFile) -> Result<Self> {
        let zones = match file.zones {
            Some(zones) => {
                let mut parsed = BTreeMap::new();
                for (name, zone) in zones {
                    let id: CameraZone = name.parse()?;
                    parsed.insert(
                        id,
                        ZoneConfig {
                            device: zone
                                .device
                                .unwrap_or_else(|| format!("stub://{}", id)),
                            name: zone
                                .name
                                .unwrap_or_else(|| format!("{} camera", id)),
                            rect: ZoneRect {
                                x_min: zone.x_min,
                                x_max: zone.x_max,
                                y_min: zone.y_min,
                                y_max: zone.y_max,
                            },
                        },
                    );
                }
                parsed
            }
            None => default_zones(),
        };

        let detection = file.detection.unwrap_or_default();
        let object_classes = match detection.classes {
            Some(classes) => {
                let mut parsed = BTreeMap::new();
                for (id, label) in classes {
                    let id: u32 = id
                        .parse()
                        .map_err(|_| anyhow!("class id '{}' is not an integer", id))?;
                    parsed.insert(id, label);
                }
                parsed
            }
            None => default_classes(),
        };
        let object_colors = detection.colors.unwrap_or_else(default_colors);

        let camera = file.camera.unwrap_or_default();
        let hub = file.hub.unwrap_or_default();
        let mqtt = file.mqtt.unwrap_or_default();

        Ok(Self {
            zones,
            scale: file.scale.unwrap_or_default(),
            object_classes,
            object_colors,
            confidence: detection.confidence.unwrap_or(DEFAULT_CONFIDENCE),
            frame_width: camera.width.unwrap_or(DEFAULT_FRAME_WIDTH),
            frame_height: camera.height.unwrap_or(DEFAULT_FRAME_HEIGHT),
            target_fps: camera.target_fps.unwrap_or(DEFAULT_TARGET_FPS),
            camera_reopen: camera.reopen_secs.map(Duration::from_secs),
            hub_addr: hub.addr.unwrap_or_else(|| DEFAULT_HUB_ADDR.to_string()),
            mqtt_addr: mqtt.addr.unwrap_or_else(|| DEFAULT_MQTT_ADDR.to_string()),
            mqtt_topic: mqtt.topic.unwrap_or_else(|| DEFAULT_MQTT_TOPIC.to_string()),
            ack_timeout: Duration::from_secs(
                mqtt.ack_timeout_secs.unwrap_or(DEFAULT_ACK_TIMEOUT_SECS),
            ),
        })
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(addr) = std::env::var("SAFEDETECT_HUB_ADDR") {
            if !addr.trim().is_empty() {
                self.hub_addr = addr;
            }
        }
        if let Ok(addr) = std::env::var("SAFEDETECT_MQTT_ADDR") {
            if !addr.trim().is_empty() {
                self.mqtt_addr = addr;
            }
        }
        if let Ok(topic) = std::env::var("SAFEDETECT_MQTT_TOPIC") {
            if !topic.trim().is_empty() {
                self.mqtt_topic = topic;
            }
        }
        if let Ok(fps) = std::env::var("SAFEDETECT_TARGET_FPS") {
            let fps: u32 = fps
                .parse()
                .map_err(|_| anyhow!("SAFEDETECT_TARGET_FPS must be an integer"))?;
            self.target_fps = fps;
        }
        if let Ok(secs) = std::env::var("SAFEDETECT_CAMERA_REOPEN_SECS") {
            let secs: u64 = secs.parse().map_err(|_| {
                anyhow!("SAFEDETECT_CAMERA_REOPEN_SECS must be an integer number of seconds")
            })?;
            self.camera_reopen = Some(Duration::from_secs(secs));
        }
        Ok(())
    }

    fn validate(&self) -> Result<()> {
        // Building the geometry runs the rect invariants.
        self.geometry()?;
        if self.target_fps == 0 {
            return Err(anyhow!("target_fps must be greater than zero"));
        }
        if !(0.0..=1.0).contains(&self.confidence) {
            return Err(anyhow!("detection confidence must be within [0,1]"));
        }
        if self.object_classes.is_empty() {
            return Err(anyhow!("at least one object class must be configured"));
        }
        if self.frame_width == 0 || self.frame_height == 0 {
            return Err(anyhow!("frame dimensions must be non-zero"));
        }
        Ok(())
    }

    /// Zone geometry derived from the configured rectangles and scale.
    pub fn geometry(&self) -> Result<ZoneGeometry> {
        let rects = self
            .zones
            .iter()
            .map(|(zone, cfg)| (*zone, cfg.rect))
            .collect();
        ZoneGeometry::new(rects, self.scale)
    }
}

impl Default for SystemConfig {
    fn default() -> Self {
        Self {
            zones: default_zones(),
            scale: PositionScale::default(),
            object_classes: default_classes(),
            object_colors: default_colors(),
            confidence: DEFAULT_CONFIDENCE,
            frame_width: DEFAULT_FRAME_WIDTH,
            frame_height: DEFAULT_FRAME_HEIGHT,
            target_fps: DEFAULT_TARGET_FPS,
            camera_reopen: None,
            hub_addr: DEFAULT_HUB_ADDR.to_string(),
            mqtt_addr: DEFAULT_MQTT_ADDR.to_string(),
            mqtt_topic: DEFAULT_MQTT_TOPIC.to_string(),
            ack_timeout: Duration::from_secs(DEFAULT_ACK_TIMEOUT_SECS),
        }
    }
}

fn default_zones() -> BTreeMap<CameraZone, ZoneConfig> {
    let mut zones = BTreeMap::new();
    zones.insert(
        CameraZone::Left,
        ZoneConfig {
            device: "stub://left".to_string(),
            name: "Left Side Camera".to_string(),
            rect: ZoneRect {
                x_min: 0.0,
                x_max: 0.3,
                y_min: 0.2,
                y_max: 0.8,
            },
        },
    );
    zones.insert(
        CameraZone::Right,
        ZoneConfig {
            device: "stub://right".to_string(),
            name: "Right Side Camera".to_string(),
            rect: ZoneRect {
                x_min: 0.7,
                x_max: 1.0,
                y_min: 0.2,
                y_max: 0.8,
            },
        },
    );
    zones.insert(
        CameraZone::Rear,
        ZoneConfig {
            device: "stub://rear".to_string(),
            name: "Rear Camera".to_string(),
            rect: ZoneRect {
                x_min: 0.3,
                x_max: 0.7,
                y_min: 0.7,
                y_max: 1.0,
            },
        },
    );
    zones
}

fn default_classes() -> BTreeMap<u32, String> {
    // COCO ids for the classes of interest.
    let mut classes = BTreeMap::new();
    classes.insert(0, "person".to_string());
    classes.insert(2, "car".to_string());
    classes.insert(3, "motorcycle".to_string());
    classes
}

fn default_colors() -> BTreeMap<String, String> {
    let mut colors = BTreeMap::new();
    colors.insert("car".to_string(), "green".to_string());
    colors.insert("motorcycle".to_string(), "orange".to_string());
    colors.insert("person".to_string(), "yellow".to_string());
    colors
}

fn read_config_file(path: &Path) -> Result<ConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let cfg = serde_json::from_str(&raw)
        .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?;
    Ok(cfg)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_cover_all_three_zones() {
        let cfg = SystemConfig::default();
        for zone in CameraZone::ALL {
            assert!(cfg.zones.contains_key(&zone), "missing zone {}", zone);
        }
        assert_eq!(cfg.target_fps, 15);
        assert_eq!(cfg.object_classes.get(&2).map(String::as_str), Some("car"));
        assert!(cfg.camera_reopen.is_none());
        assert_eq!(cfg.scale, PositionScale { x: 5.0, y: 3.0 });
    }

    #[test]
    fn degenerate_zone_rect_fails_validation() {
        let mut cfg = SystemConfig::default();
        if let Some(zone) = cfg.zones.get_mut(&CameraZone::Left) {
            zone.rect.x_max = zone.rect.x_min;
        }
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn zero_fps_fails_validation() {
        let mut cfg = SystemConfig::default();
        cfg.target_fps = 0;
        assert!(cfg.validate().is_err());
    }
}
