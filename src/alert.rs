//! Alert side channel.
//!
//! Alerting is fire-and-forget: the pipeline signals at most one alert per
//! tick when any detection falls inside a blind-spot zone, and a sink failure
//! is logged by the caller, never propagated. Audio synthesis itself is an
//! external collaborator; the default sink just logs.

use anyhow::Result;

/// Destination for blind-spot alerts.
///
/// Implementations must tolerate being called once per tick and must report
/// delivery failure through the `Result` rather than panicking; the pipeline
/// logs and continues on error.
pub trait AlertSink: Send {
    fn alert(&mut self, objects_in_zone: usize) -> Result<()>;
}

/// Default sink: a warning log line per alert.
pub struct LogAlertSink;

impl AlertSink for LogAlertSink {
    fn alert(&mut self, objects_in_zone: usize) -> Result<()> {
        log::warn!(
            "BLIND SPOT ALERT: {} object(s) in monitored zones",
            objects_in_zone
        );
        Ok(())
    }
}
