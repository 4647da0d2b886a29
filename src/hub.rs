//! Broadcast hub for live consumers.
//!
//! The hub fans detection batches out to any number of connected consumers
//! over newline-delimited JSON on TCP and answers the small control protocol
//! in `messages`. One hub thread owns the listener and the connection
//! registry; each consumer gets a reader thread that parses inbound lines
//! and forwards them as commands. Consumer writes carry a short timeout, so
//! a dead consumer and one that has stopped reading are both pruned on
//! their first failed or stalled write and never stall the others.

use anyhow::{anyhow, Result};
use std::collections::BTreeMap;
use std::io::{BufRead, BufReader, Write};
use std::net::{Shutdown, SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::mpsc::{Receiver, Sender, TryRecvError};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use crate::event::Detection;
use crate::messages::{ClientMessage, ServerMessage};
use crate::now_ts;
use crate::zone::{CameraZone, ZoneRect};

/// Configuration for the broadcast hub.
#[derive(Clone, Debug)]
pub struct HubConfig {
    pub addr: String,
}

/// Static facts the hub reports to consumers asking for configuration.
#[derive(Clone, Debug)]
pub struct HubContext {
    pub zones: BTreeMap<CameraZone, ZoneRect>,
    pub object_colors: BTreeMap<String, String>,
}

const CONSUMER_WRITE_TIMEOUT: Duration = Duration::from_secs(1);

enum HubCommand {
    Broadcast { payload: String },
    Control { id: u64, raw: String },
    Disconnect { id: u64 },
}

/// Handle to a running hub.
pub struct HubHandle {
    pub addr: SocketAddr,
    tx: Sender<HubCommand>,
    shutdown: Arc<AtomicBool>,
    connected: Arc<AtomicUsize>,
    join: Option<JoinHandle<()>>,
}

impl HubHandle {
    /// Queue a detections broadcast. Never blocks on consumer sockets.
    pub fn broadcast(&self, detections: &[Detection]) -> Result<()> {
        let message = ServerMessage::Detections {
            timestamp: now_ts(),
            detections: detections.to_vec(),
        };
        let payload = serde_json::to_string(&message)?;
        self.tx
            .send(HubCommand::Broadcast { payload })
            .map_err(|_| anyhow!("broadcast hub is gone"))
    }

    pub fn connected_clients(&self) -> usize {
        self.connected.load(Ordering::SeqCst)
    }

    /// Stop accepting, drop all consumers, join the hub thread.
    pub fn stop(mut self) -> Result<()> {
        self.shutdown.store(true, Ordering::SeqCst);
        if let Some(join) = self.join.take() {
            join.join()
                .map_err(|_| anyhow!("broadcast hub thread panicked"))?;
        }
        Ok(())
    }
}

/// TCP broadcast hub.
pub struct BroadcastHub;

impl BroadcastHub {
    pub fn spawn(config: HubConfig, context: HubContext) -> Result<HubHandle> {
        let listener = TcpListener::bind(&config.addr)?;
        let addr = listener.local_addr()?;
        listener.set_nonblocking(true)?;

        let (tx, rx) = std::sync::mpsc::channel();
        let shutdown = Arc::new(AtomicBool::new(false));
        let connected = Arc::new(AtomicUsize::new(0));

        let thread_tx = tx.clone();
        let thread_shutdown = shutdown.clone();
        let thread_connected = connected.clone();
        let join = std::thread::spawn(move || {
            run_hub(
                listener,
                context,
                thread_tx,
                rx,
                thread_shutdown,
                thread_connected,
            );
        });

        log::info!("broadcast hub listening on {}", addr);

        Ok(HubHandle {
            addr,
            tx,
            shutdown,
            connected,
            join: Some(join),
        })
    }
}

fn run_hub(
    listener: TcpListener,
    context: HubContext,
    tx: Sender<HubCommand>,
    rx: Receiver<HubCommand>,
    shutdown: Arc<AtomicBool>,
    connected: Arc<AtomicUsize>,
) {
    let mut consumers: BTreeMap<u64, TcpStream> = BTreeMap::new();
    let mut next_id: u64 = 0;

    loop {
        if shutdown.load(Ordering::SeqCst) {
            break;
        }

        // Accept any pending consumers.
        loop {
            match listener.accept() {
                Ok((stream, peer)) => {
                    let id = next_id;
                    next_id += 1;
                    if let Err(err) = register_consumer(&mut consumers, id, stream, &tx) {
                        log::warn!("consumer {} rejected: {:#}", peer, err);
                        continue;
                    }
                    connected.store(consumers.len(), Ordering::SeqCst);
                    log::info!("consumer connected from {} (id {})", peer, id);
                }
                Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => break,
                Err(err) => {
                    log::error!("broadcast hub accept failed: {}", err);
                    break;
                }
            }
        }

        // Drain queued commands, then sleep briefly when idle.
        let mut drained_any = false;
        loop {
            match rx.try_recv() {
                Ok(command) => {
                    drained_any = true;
                    apply_command(&mut consumers, &context, command, &connected);
                }
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => return,
            }
        }
        if !drained_any {
            std::thread::sleep(Duration::from_millis(10));
        }
    }

    for (_, stream) in consumers.iter() {
        let _ = stream.shutdown(Shutdown::Both);
    }
    connected.store(0, Ordering::SeqCst);
}

fn register_consumer(
    consumers: &mut BTreeMap<u64, TcpStream>,
    id: u64,
    stream: TcpStream,
    tx: &Sender<HubCommand>,
) -> Result<()> {
    stream.set_nodelay(true)?;
    // A consumer that stops reading fills its socket buffer; the write
    // timeout turns that stall into a failed send so fan-out prunes it
    // instead of blocking the hub thread. Set before cloning so every
    // handle to the socket shares it.
    stream.set_write_timeout(Some(CONSUMER_WRITE_TIMEOUT))?;
    let mut writer = stream.try_clone()?;

    let ack = ServerMessage::Connection {
        status: "connected".to_string(),
        message: "SafeDetect stream ready".to_string(),
    };
    write_line(&mut writer, &serde_json::to_string(&ack)?)?;

    // Reader thread: forwards parsed lines as control commands and reports
    // disconnect on EOF or read error. Detached; it exits when the socket
    // is shut down.
    let reader_tx = tx.clone();
    let reader_stream = stream.try_clone()?;
    std::thread::spawn(move || {
        let reader = BufReader::new(reader_stream);
        for line in reader.lines() {
            match line {
                Ok(line) => {
                    if line.trim().is_empty() {
                        continue;
                    }
                    if reader_tx
                        .send(HubCommand::Control { id, raw: line })
                        .is_err()
                    {
                        return;
                    }
                }
                Err(_) => break,
            }
        }
        let _ = reader_tx.send(HubCommand::Disconnect { id });
    });

    consumers.insert(id, stream);
    Ok(())
}

fn apply_command(
    consumers: &mut BTreeMap<u64, TcpStream>,
    context: &HubContext,
    command: HubCommand,
    connected: &Arc<AtomicUsize>,
) {
    match command {
        HubCommand::Broadcast { payload } => {
            fan_out(consumers, &payload);
            connected.store(consumers.len(), Ordering::SeqCst);
        }
        HubCommand::Control { id, raw } => {
            let reply = match serde_json::from_str::<ClientMessage>(&raw) {
                Ok(message) => control_reply(message, consumers.len(), context),
                Err(err) => {
                    log::warn!("consumer {} sent unrecognized message: {}", id, err);
                    None
                }
            };
            if let Some(reply) = reply {
                let payload = match serde_json::to_string(&reply) {
                    Ok(payload) => payload,
                    Err(err) => {
                        log::error!("failed to serialize control reply: {}", err);
                        return;
                    }
                };
                let failed = match consumers.get_mut(&id) {
                    Some(stream) => write_line(stream, &payload).is_err(),
                    None => false,
                };
                if failed {
                    drop_consumer(consumers, id);
                }
            }
            connected.store(consumers.len(), Ordering::SeqCst);
        }
        HubCommand::Disconnect { id } => {
            drop_consumer(consumers, id);
            connected.store(consumers.len(), Ordering::SeqCst);
        }
    }
}

fn control_reply(
    message: ClientMessage,
    connected_clients: usize,
    context: &HubContext,
) -> Option<ServerMessage> {
    match message {
        ClientMessage::Ping => Some(ServerMessage::Pong { timestamp: now_ts() }),
        ClientMessage::Status => Some(ServerMessage::Status {
            connected_clients,
            server_status: "running".to_string(),
        }),
        ClientMessage::Command { command } => match command.as_str() {
            "get_config" => Some(ServerMessage::Config {
                blind_spot_zones: context.zones.clone(),
                object_colors: context.object_colors.clone(),
            }),
            other => {
                log::warn!("consumer sent unknown command '{}'", other);
                None
            }
        },
    }
}

/// Write the payload to every consumer, pruning each one whose write fails.
/// A failing consumer never affects delivery to the rest.
fn fan_out<W: Write>(consumers: &mut BTreeMap<u64, W>, payload: &str) {
    let mut dead: Vec<u64> = Vec::new();
    for (id, writer) in consumers.iter_mut() {
        if write_line(writer, payload).is_err() {
            dead.push(*id);
        }
    }
    for id in dead {
        consumers.remove(&id);
        log::info!("consumer {} dropped (write failed)", id);
    }
}

fn drop_consumer(consumers: &mut BTreeMap<u64, TcpStream>, id: u64) {
    if let Some(stream) = consumers.remove(&id) {
        let _ = stream.shutdown(Shutdown::Both);
        log::info!("consumer {} disconnected", id);
    }
}

fn write_line<W: Write>(writer: &mut W, payload: &str) -> std::io::Result<()> {
    writer.write_all(payload.as_bytes())?;
    writer.write_all(b"\n")?;
    writer.flush()
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Writer that fails every write.
    struct BrokenWriter;

    impl Write for BrokenWriter {
        fn write(&mut self, _buf: &[u8]) -> std::io::Result<usize> {
            Err(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                "broken",
            ))
        }
        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    enum TestWriter {
        Ok(Vec<u8>),
        Broken(BrokenWriter),
    }

    impl Write for TestWriter {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            match self {
                TestWriter::Ok(buf_out) => buf_out.write(buf),
                TestWriter::Broken(w) => w.write(buf),
            }
        }
        fn flush(&mut self) -> std::io::Result<()> {
            match self {
                TestWriter::Ok(buf_out) => buf_out.flush(),
                TestWriter::Broken(w) => w.flush(),
            }
        }
    }

    #[test]
    fn fan_out_prunes_failing_consumers_only() {
        let mut consumers: BTreeMap<u64, TestWriter> = BTreeMap::new();
        consumers.insert(1, TestWriter::Ok(Vec::new()));
        consumers.insert(2, TestWriter::Broken(BrokenWriter));
        consumers.insert(3, TestWriter::Ok(Vec::new()));

        fan_out(&mut consumers, "{\"type\":\"detections\"}");

        assert_eq!(consumers.len(), 2);
        assert!(consumers.contains_key(&1));
        assert!(!consumers.contains_key(&2));
        assert!(consumers.contains_key(&3));

        for writer in consumers.values() {
            if let TestWriter::Ok(buf) = writer {
                assert_eq!(buf, b"{\"type\":\"detections\"}\n");
            }
        }
    }

    #[test]
    fn control_replies_cover_the_protocol() {
        let context = HubContext {
            zones: BTreeMap::new(),
            object_colors: BTreeMap::new(),
        };

        let pong = control_reply(ClientMessage::Ping, 0, &context).expect("reply");
        assert!(matches!(pong, ServerMessage::Pong { .. }));

        let status = control_reply(ClientMessage::Status, 4, &context).expect("reply");
        match status {
            ServerMessage::Status {
                connected_clients, ..
            } => assert_eq!(connected_clients, 4),
            other => panic!("unexpected reply: {:?}", other),
        }

        let config = control_reply(
            ClientMessage::Command {
                command: "get_config".to_string(),
            },
            0,
            &context,
        )
        .expect("reply");
        assert!(matches!(config, ServerMessage::Config { .. }));

        // Unknown commands get no reply and no disconnect.
        assert!(control_reply(
            ClientMessage::Command {
                command: "reboot".to_string()
            },
            0,
            &context
        )
        .is_none());
    }
}
