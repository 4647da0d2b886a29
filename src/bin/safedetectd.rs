//! safedetectd - SafeDetect daemon
//!
//! This daemon:
//! 1. Loads the system configuration (file plus environment overrides)
//! 2. Starts the broadcast hub for live consumers
//! 3. Connects the MQTT event publisher
//! 4. Runs the detection pipeline at the target frame rate
//! 5. Shuts everything down in order on SIGINT/SIGTERM

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use safedetect::{
    BroadcastHub, EventPublisher, HubConfig, HubContext, LogAlertSink, Pipeline, PublisherConfig,
    StubDetector, SystemConfig,
};

#[derive(Parser, Debug)]
#[command(author, version, about = "Multi-camera blind spot detection daemon")]
struct Args {
    /// Path to the JSON configuration file.
    #[arg(long, env = "SAFEDETECT_CONFIG")]
    config: Option<PathBuf>,

    /// Disable the TCP broadcast hub.
    #[arg(long)]
    no_hub: bool,

    /// Disable the MQTT event publisher.
    #[arg(long)]
    no_publish: bool,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let config = SystemConfig::load_from(args.config.as_deref()).context("load configuration")?;
    log::info!(
        "safedetect v{}: {} zones, target {} fps",
        env!("CARGO_PKG_VERSION"),
        config.zones.len(),
        config.target_fps
    );

    let hub = if args.no_hub {
        None
    } else {
        let context = HubContext {
            zones: config
                .zones
                .iter()
                .map(|(zone, cfg)| (*zone, cfg.rect))
                .collect(),
            object_colors: config.object_colors.clone(),
        };
        let handle = BroadcastHub::spawn(
            HubConfig {
                addr: config.hub_addr.clone(),
            },
            context,
        )
        .context("start broadcast hub")?;
        Some(handle)
    };

    let publisher = if args.no_publish {
        None
    } else {
        let publisher = EventPublisher::connect(PublisherConfig {
            broker_addr: config.mqtt_addr.clone(),
            topic: config.mqtt_topic.clone(),
            client_id: "safedetectd".to_string(),
            ack_timeout: config.ack_timeout,
        })
        .context("connect event publisher")?;
        Some(publisher)
    };

    let pipeline = Pipeline::new(
        &config,
        Box::new(StubDetector::new()),
        hub,
        publisher,
        Box::new(LogAlertSink),
    )?;

    let shutdown = Arc::new(AtomicBool::new(false));
    let ctrlc_shutdown = shutdown.clone();
    ctrlc::set_handler(move || {
        log::info!("shutdown requested");
        ctrlc_shutdown.store(true, Ordering::SeqCst);
    })
    .context("install signal handler")?;

    let handle = pipeline.spawn(shutdown)?;
    handle.wait()
}
