//! Detection pipeline.
//!
//! The pipeline owns the per-tick control flow: capture one frame per
//! available camera, run detection, classify against the blind-spot zones,
//! raise at most one alert, fan results out to the hub and publisher, and
//! pace to the target frame rate.
//!
//! Capture and inference block, so they live on a dedicated worker thread;
//! the pipeline drives it over a request/report channel pair and never
//! touches a device directly.

use anyhow::{anyhow, Context, Result};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{Receiver, Sender};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crate::alert::AlertSink;
use crate::camera::{CameraChannel, CameraConfig, ChannelStatus};
use crate::config::SystemConfig;
use crate::detect::{DetectionAdapter, DetectorBackend};
use crate::event::Detection;
use crate::hub::HubHandle;
use crate::metrics::PipelineMetrics;
use crate::publish::EventPublisher;
use crate::zone::{CameraZone, ZoneClassifier};

const STATUS_PUBLISH_INTERVAL: Duration = Duration::from_secs(5);

/// Pipeline lifecycle state.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PipelineState {
    Stopped,
    Starting,
    Running,
    Stopping,
}

/// Status of one zone's camera, as reported to consumers.
#[derive(Clone, Debug, Serialize)]
pub struct ZoneStatus {
    pub device: String,
    pub status: ChannelStatus,
}

/// Snapshot of the whole system, published periodically and served to
/// status queries.
#[derive(Clone, Debug, Serialize)]
pub struct SystemStatus {
    pub state: PipelineState,
    pub running: bool,
    pub fps: f64,
    pub cameras: BTreeMap<CameraZone, ZoneStatus>,
    pub connected_clients: usize,
    pub detections_last_tick: usize,
}

// ----------------------------------------------------------------------------
// Capture worker
// ----------------------------------------------------------------------------

enum WorkerRequest {
    Open,
    Tick,
    Close,
}

struct WorkerReport {
    statuses: BTreeMap<CameraZone, (String, ChannelStatus)>,
    detections: Vec<Detection>,
}

/// Thread owning the camera channels and the detection adapter.
struct CaptureWorker {
    tx: Sender<WorkerRequest>,
    rx: Receiver<WorkerReport>,
    join: Option<JoinHandle<()>>,
}

impl CaptureWorker {
    fn spawn(
        mut channels: Vec<CameraChannel>,
        mut adapter: DetectionAdapter,
        reopen_after: Option<Duration>,
    ) -> Self {
        let (req_tx, req_rx) = std::sync::mpsc::channel::<WorkerRequest>();
        let (rep_tx, rep_rx) = std::sync::mpsc::channel::<WorkerReport>();

        let join = std::thread::spawn(move || {
            let mut last_reopen = Instant::now();
            while let Ok(request) = req_rx.recv() {
                match request {
                    WorkerRequest::Open => {
                        for channel in channels.iter_mut() {
                            channel.open();
                        }
                        if rep_tx.send(report(&channels, vec![])).is_err() {
                            break;
                        }
                    }
                    WorkerRequest::Tick => {
                        if let Some(cadence) = reopen_after {
                            if last_reopen.elapsed() >= cadence {
                                last_reopen = Instant::now();
                                for channel in channels.iter_mut() {
                                    if channel.status() == ChannelStatus::Error {
                                        channel.reopen();
                                    }
                                }
                            }
                        }
                        let detections = capture_tick(&mut channels, &mut adapter);
                        if rep_tx.send(report(&channels, detections)).is_err() {
                            break;
                        }
                    }
                    WorkerRequest::Close => {
                        for channel in channels.iter_mut() {
                            channel.close();
                        }
                        let _ = rep_tx.send(report(&channels, vec![]));
                        break;
                    }
                }
            }
        });

        Self {
            tx: req_tx,
            rx: rep_rx,
            join: Some(join),
        }
    }

    fn request(&self, request: WorkerRequest) -> Result<WorkerReport> {
        self.tx
            .send(request)
            .map_err(|_| anyhow!("capture worker is gone"))?;
        self.rx
            .recv()
            .map_err(|_| anyhow!("capture worker stopped unexpectedly"))
    }

    fn shutdown(mut self) -> Result<()> {
        let _ = self.request(WorkerRequest::Close);
        if let Some(join) = self.join.take() {
            join.join()
                .map_err(|_| anyhow!("capture worker thread panicked"))?;
        }
        Ok(())
    }
}

fn report(channels: &[CameraChannel], detections: Vec<Detection>) -> WorkerReport {
    let statuses = channels
        .iter()
        .map(|c| (c.zone(), (c.device().to_string(), c.status())))
        .collect();
    WorkerReport {
        statuses,
        detections,
    }
}

/// One capture-and-detect pass over every available channel. A channel with
/// no frame this tick is skipped; an adapter failure on one zone is logged
/// and never blocks the others.
fn capture_tick(channels: &mut [CameraChannel], adapter: &mut DetectionAdapter) -> Vec<Detection> {
    let mut detections = Vec::new();
    for channel in channels.iter_mut() {
        if channel.status() != ChannelStatus::Available {
            continue;
        }
        let Some(frame) = channel.read_frame() else {
            log::debug!("{} camera: no frame this tick", channel.zone());
            continue;
        };
        match adapter.detect(&frame, channel.zone()) {
            Ok(mut zone_detections) => detections.append(&mut zone_detections),
            Err(err) => {
                log::error!("error processing {} camera: {:#}", channel.zone(), err);
            }
        }
    }
    detections
}

// ----------------------------------------------------------------------------
// Pipeline
// ----------------------------------------------------------------------------

/// The assembled detection pipeline.
pub struct Pipeline {
    state: PipelineState,
    worker: Option<CaptureWorker>,
    classifier: ZoneClassifier,
    metrics: PipelineMetrics,
    hub: Option<HubHandle>,
    publisher: Option<EventPublisher>,
    alert: Box<dyn AlertSink>,
    target_fps: u32,
    cameras: BTreeMap<CameraZone, ZoneStatus>,
    detections_last_tick: usize,
    last_status_publish: Instant,
}

impl Pipeline {
    pub fn new(
        config: &SystemConfig,
        backend: Box<dyn DetectorBackend>,
        hub: Option<HubHandle>,
        publisher: Option<EventPublisher>,
        alert: Box<dyn AlertSink>,
    ) -> Result<Self> {
        let geometry = config.geometry()?;
        let classifier = ZoneClassifier::new(geometry.clone());

        let mut adapter = DetectionAdapter::new(
            backend,
            config.object_classes.clone(),
            config.confidence,
            geometry.scale(),
        );
        adapter.warm_up().context("detector warm-up")?;

        let channels: Vec<CameraChannel> = config
            .zones
            .iter()
            .map(|(zone, zone_cfg)| {
                CameraChannel::new(
                    *zone,
                    CameraConfig {
                        device: zone_cfg.device.clone(),
                        width: config.frame_width,
                        height: config.frame_height,
                        target_fps: config.target_fps,
                    },
                )
            })
            .collect();

        let cameras = channels
            .iter()
            .map(|c| {
                (
                    c.zone(),
                    ZoneStatus {
                        device: c.device().to_string(),
                        status: c.status(),
                    },
                )
            })
            .collect();

        let worker = CaptureWorker::spawn(channels, adapter, config.camera_reopen);

        Ok(Self {
            state: PipelineState::Stopped,
            worker: Some(worker),
            classifier,
            metrics: PipelineMetrics::new(),
            hub,
            publisher,
            alert,
            target_fps: config.target_fps,
            cameras,
            detections_last_tick: 0,
            last_status_publish: Instant::now(),
        })
    }

    pub fn state(&self) -> PipelineState {
        self.state
    }

    /// Open every camera and enter `Running`. Startup succeeds even when
    /// every camera fails to open; the system runs degraded and reports the
    /// failures in its status.
    pub fn start(&mut self) -> Result<()> {
        if self.state != PipelineState::Stopped {
            return Err(anyhow!("pipeline already started"));
        }
        self.state = PipelineState::Starting;

        let worker = self
            .worker
            .as_ref()
            .ok_or_else(|| anyhow!("capture worker is gone"))?;
        let report = worker.request(WorkerRequest::Open)?;
        self.absorb_report(&report);

        let available = self
            .cameras
            .values()
            .filter(|z| z.status == ChannelStatus::Available)
            .count();
        if available < self.cameras.len() {
            log::warn!(
                "running degraded: {}/{} cameras available",
                available,
                self.cameras.len()
            );
        } else {
            log::info!("all {} cameras available", available);
        }

        self.state = PipelineState::Running;
        Ok(())
    }

    /// One full pipeline pass. Errors from alerting, broadcasting, and
    /// publishing are logged and absorbed; only the loss of the capture
    /// worker is fatal.
    pub fn tick(&mut self) -> Result<()> {
        if self.state != PipelineState::Running {
            return Err(anyhow!("pipeline is not running"));
        }

        let worker = self
            .worker
            .as_ref()
            .ok_or_else(|| anyhow!("capture worker is gone"))?;
        let report = worker.request(WorkerRequest::Tick)?;
        self.absorb_report(&report);
        let detections = report.detections;
        self.detections_last_tick = detections.len();

        self.metrics.record_tick();
        if let Some(fps) = self.metrics.maybe_rollover() {
            log::info!("pipeline fps: {:.1}", fps);
        }

        // At most one alert per tick, regardless of how many objects are in
        // zone.
        let in_zone = self.classifier.alert_worthy(&detections).len();
        if in_zone > 0 {
            if let Err(err) = self.alert.alert(in_zone) {
                log::error!("alert sink failed: {:#}", err);
            }
        }

        if let Some(hub) = &self.hub {
            if let Err(err) = hub.broadcast(&detections) {
                log::error!("broadcast failed: {:#}", err);
            }
        }

        if let Some(publisher) = self.publisher.as_mut() {
            if !detections.is_empty() {
                if let Err(err) = publisher.publish_detections(&detections, None) {
                    log::warn!("detection publish dropped: {:#}", err);
                }
            }
        }

        if self.last_status_publish.elapsed() >= STATUS_PUBLISH_INTERVAL {
            self.last_status_publish = Instant::now();
            let status = self.status();
            log::info!(
                "status: {} detections last tick, {:.1} fps, {} clients",
                status.detections_last_tick,
                status.fps,
                status.connected_clients
            );
            if let Some(publisher) = self.publisher.as_mut() {
                if let Err(err) = publisher.publish_status(&status, None) {
                    log::warn!("status publish dropped: {:#}", err);
                }
            }
        }

        Ok(())
    }

    pub fn status(&self) -> SystemStatus {
        SystemStatus {
            state: self.state,
            running: self.state == PipelineState::Running,
            fps: self.metrics.fps(),
            cameras: self.cameras.clone(),
            connected_clients: self
                .hub
                .as_ref()
                .map(|h| h.connected_clients())
                .unwrap_or(0),
            detections_last_tick: self.detections_last_tick,
        }
    }

    /// Tear everything down in order: cameras, hub, publisher. Idempotent.
    pub fn stop(&mut self) -> Result<()> {
        if self.state == PipelineState::Stopped {
            return Ok(());
        }
        self.state = PipelineState::Stopping;

        if let Some(worker) = self.worker.take() {
            worker.shutdown()?;
        }
        for status in self.cameras.values_mut() {
            status.status = ChannelStatus::NotConnected;
        }
        if let Some(hub) = self.hub.take() {
            hub.stop()?;
        }
        if let Some(publisher) = self.publisher.take() {
            publisher.stop();
        }

        self.state = PipelineState::Stopped;
        log::info!("pipeline stopped");
        Ok(())
    }

    fn absorb_report(&mut self, report: &WorkerReport) {
        for (zone, (device, status)) in &report.statuses {
            self.cameras.insert(
                *zone,
                ZoneStatus {
                    device: device.clone(),
                    status: *status,
                },
            );
        }
    }

    /// Run the pipeline on its own thread until the shutdown flag is set or
    /// a tick fails fatally.
    pub fn spawn(mut self, shutdown: Arc<AtomicBool>) -> Result<PipelineHandle> {
        self.start()?;
        let tick_interval = Duration::from_secs_f64(1.0 / self.target_fps as f64);

        let join = std::thread::spawn(move || {
            let result = loop {
                if shutdown.load(Ordering::SeqCst) {
                    break Ok(());
                }
                let started = Instant::now();
                if let Err(err) = self.tick() {
                    break Err(err);
                }
                if let Some(remaining) = tick_interval.checked_sub(started.elapsed()) {
                    std::thread::sleep(remaining);
                }
            };
            let stop_result = self.stop();
            result.and(stop_result)
        });

        Ok(PipelineHandle { join: Some(join) })
    }
}

/// Handle to a pipeline running on its own thread.
pub struct PipelineHandle {
    join: Option<JoinHandle<Result<()>>>,
}

impl PipelineHandle {
    /// Block until the loop exits, returning its final result.
    pub fn wait(mut self) -> Result<()> {
        match self.join.take() {
            Some(join) => join
                .join()
                .map_err(|_| anyhow!("pipeline thread panicked"))?,
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alert::LogAlertSink;
    use crate::detect::StubDetector;

    fn stub_config() -> SystemConfig {
        SystemConfig::default()
    }

    #[test]
    fn tick_requires_running_state() {
        let mut pipeline = Pipeline::new(
            &stub_config(),
            Box::new(StubDetector::new()),
            None,
            None,
            Box::new(LogAlertSink),
        )
        .expect("pipeline");

        assert_eq!(pipeline.state(), PipelineState::Stopped);
        assert!(pipeline.tick().is_err());

        pipeline.start().expect("start");
        assert_eq!(pipeline.state(), PipelineState::Running);
        pipeline.tick().expect("tick");

        pipeline.stop().expect("stop");
        assert_eq!(pipeline.state(), PipelineState::Stopped);
    }

    #[test]
    fn start_twice_is_rejected_but_stop_is_idempotent() {
        let mut pipeline = Pipeline::new(
            &stub_config(),
            Box::new(StubDetector::new()),
            None,
            None,
            Box::new(LogAlertSink),
        )
        .expect("pipeline");

        pipeline.start().expect("start");
        assert!(pipeline.start().is_err());

        pipeline.stop().expect("stop");
        pipeline.stop().expect("second stop is a no-op");
    }

    #[test]
    fn status_reflects_camera_availability() {
        let mut pipeline = Pipeline::new(
            &stub_config(),
            Box::new(StubDetector::new()),
            None,
            None,
            Box::new(LogAlertSink),
        )
        .expect("pipeline");

        pipeline.start().expect("start");
        let status = pipeline.status();
        assert!(status.running);
        assert_eq!(status.cameras.len(), 3);
        for zone_status in status.cameras.values() {
            assert_eq!(zone_status.status, ChannelStatus::Available);
        }
        pipeline.stop().expect("stop");
    }
}
