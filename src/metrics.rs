//! Windowed throughput accounting for the pipeline loop.

use std::time::Instant;

/// Rolling frames-per-second metric over a one-second window.
///
/// The loop records one tick per iteration; once at least a full second has
/// elapsed since the last reset the window rolls over, yielding
/// `frame_count / elapsed` and restarting the counter.
#[derive(Debug)]
pub struct PipelineMetrics {
    frame_count: u64,
    window_started: Instant,
    fps: f64,
}

impl PipelineMetrics {
    pub fn new() -> Self {
        Self {
            frame_count: 0,
            window_started: Instant::now(),
            fps: 0.0,
        }
    }

    pub fn record_tick(&mut self) {
        self.frame_count += 1;
    }

    /// Last computed window FPS. Zero until the first window completes.
    pub fn fps(&self) -> f64 {
        self.fps
    }

    /// Roll the window over if at least one second has elapsed, returning the
    /// freshly computed FPS value.
    pub fn maybe_rollover(&mut self) -> Option<f64> {
        let elapsed = self.window_started.elapsed().as_secs_f64();
        let fps = self.rollover_if_elapsed(elapsed)?;
        self.window_started = Instant::now();
        Some(fps)
    }

    fn rollover_if_elapsed(&mut self, elapsed_s: f64) -> Option<f64> {
        if elapsed_s < 1.0 {
            return None;
        }
        self.fps = self.frame_count as f64 / elapsed_s;
        self.frame_count = 0;
        Some(self.fps)
    }
}

impl Default for PipelineMetrics {
    fn default() -> Self {
        Self::new()
    }
}
