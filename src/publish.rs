//! Durable event publishing over MQTT.
//!
//! The publisher mirrors detection and status payloads onto an MQTT broker
//! with at-least-once delivery. Publishing is best-effort at the call site:
//! a publish that is not broker-acknowledged within the configured timeout
//! returns an error and the payload is dropped, never queued for retry.

use anyhow::{anyhow, Context, Result};
use rumqttc::v5::{mqttbytes::v5::Packet, mqttbytes::QoS, Client, Connection, Event, MqttOptions};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::event::Detection;
use crate::now_ts;
use crate::pipeline::SystemStatus;

/// Configuration for the MQTT publisher.
#[derive(Clone, Debug)]
pub struct PublisherConfig {
    /// Broker address, `host:port` with an optional `mqtt://` scheme.
    pub broker_addr: String,
    pub topic: String,
    pub client_id: String,
    /// How long to wait for a broker acknowledgement per publish.
    pub ack_timeout: Duration,
}

/// Wire envelope for published payloads.
#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Envelope<'a> {
    Detections {
        timestamp: f64,
        detections: &'a [Detection],
    },
    Status {
        timestamp: f64,
        status: &'a SystemStatus,
    },
}

/// MQTT event publisher.
///
/// A worker thread drives the connection event loop and counts broker
/// PubAcks; each publish waits until the total ack count catches up with
/// the total publish count, so a late ack for an earlier timed-out publish
/// can never satisfy a later one.
pub struct EventPublisher {
    client: Client,
    topic: String,
    ack_timeout: Duration,
    acks: Arc<AtomicU64>,
    /// QoS-1 publishes handed to the client so far. Ack number `published`
    /// is the one that completes the current publish.
    published: u64,
    stopping: Arc<AtomicBool>,
    connection_handle: Option<std::thread::JoinHandle<()>>,
}

impl EventPublisher {
    /// Connect to the broker and start the connection worker.
    pub fn connect(config: PublisherConfig) -> Result<Self> {
        let (host, port) = parse_broker_addr(&config.broker_addr)?;

        let mut options = MqttOptions::new(&config.client_id, host, port);
        options.set_keep_alive(Duration::from_secs(60));
        options.set_clean_start(true);

        let (client, connection) = Client::new(options, 10);
        let acks = Arc::new(AtomicU64::new(0));
        let stopping = Arc::new(AtomicBool::new(false));
        let connection_handle = Some(spawn_connection_worker(
            connection,
            Arc::clone(&acks),
            Arc::clone(&stopping),
        ));

        log::info!(
            "event publisher connected to {} (topic {})",
            config.broker_addr,
            config.topic
        );

        Ok(Self {
            client,
            topic: config.topic,
            ack_timeout: config.ack_timeout,
            acks,
            published: 0,
            stopping,
            connection_handle,
        })
    }

    /// Publish a detections envelope. Empty ticks are skipped entirely.
    ///
    /// An optional key suffixes the topic (`topic/key`) so consumers can
    /// subscribe per partition.
    pub fn publish_detections(&mut self, detections: &[Detection], key: Option<&str>) -> Result<()> {
        if detections.is_empty() {
            return Ok(());
        }
        let envelope = Envelope::Detections {
            timestamp: now_ts(),
            detections,
        };
        self.publish_envelope(&envelope, key)
    }

    /// Publish a status snapshot.
    pub fn publish_status(&mut self, status: &SystemStatus, key: Option<&str>) -> Result<()> {
        let envelope = Envelope::Status {
            timestamp: now_ts(),
            status,
        };
        self.publish_envelope(&envelope, key)
    }

    fn publish_envelope(&mut self, envelope: &Envelope<'_>, key: Option<&str>) -> Result<()> {
        let payload = serde_json::to_vec(envelope).context("serialize publish envelope")?;
        let topic = match key {
            Some(key) => format!("{}/{}", self.topic, key),
            None => self.topic.clone(),
        };

        self.client
            .publish(topic.as_str(), QoS::AtLeastOnce, false, payload)
            .with_context(|| format!("publish to {}", topic))?;
        self.published += 1;

        // Wait until acks catch up with publishes. The absolute target
        // means a stray ack for an earlier timed-out publish is credited to
        // that publish, never to this one.
        if !wait_for_acks(&self.acks, self.published, self.ack_timeout) {
            return Err(anyhow!(
                "no broker acknowledgement for {} within {:?}",
                topic,
                self.ack_timeout
            ));
        }
        Ok(())
    }

    /// Disconnect and join the connection worker.
    pub fn stop(mut self) {
        self.stopping.store(true, Ordering::SeqCst);
        if let Err(err) = self.client.disconnect() {
            log::warn!("MQTT disconnect failed: {}", err);
        }
        if let Some(handle) = self.connection_handle.take() {
            let _ = handle.join();
        }
    }
}

fn wait_for_acks(acks: &AtomicU64, target: u64, timeout: Duration) -> bool {
    let deadline = Instant::now() + timeout;
    while acks.load(Ordering::Acquire) < target {
        if Instant::now() >= deadline {
            return false;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    true
}

/// Drives the client event loop until stop. Connection errors are logged
/// and iteration continues so the client can reconnect and late acks for
/// in-flight publishes still arrive.
fn spawn_connection_worker(
    mut connection: Connection,
    acks: Arc<AtomicU64>,
    stopping: Arc<AtomicBool>,
) -> std::thread::JoinHandle<()> {
    std::thread::spawn(move || {
        for event in connection.iter() {
            if stopping.load(Ordering::SeqCst) {
                break;
            }
            match event {
                Ok(Event::Incoming(Packet::PubAck(_))) => {
                    acks.fetch_add(1, Ordering::Release);
                }
                Ok(Event::Incoming(_)) | Ok(Event::Outgoing(_)) => {}
                Err(e) => {
                    log::warn!("MQTT connection error: {}", e);
                    std::thread::sleep(Duration::from_millis(500));
                }
            }
        }
    })
}

fn parse_broker_addr(addr: &str) -> Result<(String, u16)> {
    let mut remainder = addr.trim();
    if let Some((scheme, rest)) = remainder.split_once("://") {
        match scheme {
            "mqtt" | "tcp" => {}
            other => return Err(anyhow!("unsupported MQTT scheme: {}", other)),
        }
        remainder = rest;
    }
    split_host_port(remainder)
}

fn split_host_port(addr: &str) -> Result<(String, u16)> {
    if let Some(rest) = addr.strip_prefix('[') {
        let (host, rest) = rest
            .split_once(']')
            .ok_or_else(|| anyhow!("invalid MQTT address: {}", addr))?;
        let port = rest
            .strip_prefix(':')
            .ok_or_else(|| anyhow!("missing MQTT port in {}", addr))?;
        let port: u16 = port.parse().context("invalid MQTT port")?;
        return Ok((host.to_string(), port));
    }

    let (host, port) = addr
        .rsplit_once(':')
        .ok_or_else(|| anyhow!("missing MQTT port in {}", addr))?;
    let port: u16 = port.parse().context("invalid MQTT port")?;
    Ok((host.to_string(), port))
}
