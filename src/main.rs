//! Sensor node entry point
//!
//! Loads configuration, connects to the broker and runs the node until a
//! signal or a remote shutdown command stops it.

use clap::Parser;
use mqtt_presence::config::{ConfigError, ConfigOverrides, NodeConfig};
use mqtt_presence::node::{ExitReason, NodeLifecycle, NodeSettings, ScanRate};
use mqtt_presence::observability::{init_default_logging, metrics::metrics};
use mqtt_presence::protocol::NodeTopics;
use mqtt_presence::sensors::LmSensorsSource;
use mqtt_presence::transport::mqtt::MqttSession;
use mqtt_presence::{NodeHandle, NodeResult};
use std::path::PathBuf;
use std::process;
use tokio::signal;
use tracing::{error, info, warn};

/// MQTT sensor node with presence, birth certificate and remote commands
#[derive(Parser)]
#[command(name = "sensor-node")]
#[command(about = "Publish lm-sensors readings over MQTT with presence tracking")]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// MQTT broker host
    #[arg(long)]
    host: Option<String>,

    /// MQTT broker port
    #[arg(long)]
    port: Option<u16>,

    /// Application id (topic namespace); defaults to the host name
    #[arg(long)]
    application_id: Option<String>,

    /// Initial scan rate in seconds
    #[arg(long, value_name = "SECONDS")]
    scan_rate: Option<f64>,

    /// Command producing lm-sensors output
    #[arg(long, value_name = "CMD")]
    sensors_command: Option<String>,

    /// Verbose logging
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    init_default_logging(cli.verbose);

    info!("Starting sensor-node v{}", env!("CARGO_PKG_VERSION"));

    let config = match load_configuration(&cli) {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            process::exit(1);
        }
    };

    match run_node(config).await {
        Ok(exit) => info!(reason = ?exit, "Application shutdown complete"),
        Err(e) => {
            error!("Node failed: {}", e);
            process::exit(1);
        }
    }
}

fn load_configuration(cli: &Cli) -> Result<NodeConfig, Box<dyn std::error::Error>> {
    let mut config = match &cli.config {
        Some(path) => {
            info!("Loading configuration from: {}", path.display());
            NodeConfig::load_from_file(path)?
        }
        None => {
            let default_path = PathBuf::from("sensor-node.toml");
            if default_path.exists() {
                info!("Loading configuration from: {}", default_path.display());
                NodeConfig::load_from_file(&default_path)?
            } else {
                info!("No configuration file, using defaults");
                NodeConfig::default()
            }
        }
    };

    config.apply_overrides(ConfigOverrides {
        host: cli.host.clone(),
        port: cli.port,
        application_id: cli.application_id.clone(),
        scan_rate_secs: cli.scan_rate,
        sensors_command: cli.sensors_command.clone(),
    });
    config.validate()?;
    Ok(config)
}

async fn run_node(config: NodeConfig) -> NodeResult<ExitReason> {
    let application_id = config.resolve_application_id()?;
    let topics = NodeTopics::new(&application_id)
        .map_err(|e| ConfigError::InvalidApplicationId(e.to_string()))?;
    let scan_rate = ScanRate::new(config.node.scan_rate_secs)
        .map_err(|e| ConfigError::InvalidConfig(e.to_string()))?;
    let sensors = LmSensorsSource::new(&config.sensors.command)?;

    info!(
        application_id = %application_id,
        host = %config.mqtt.host,
        port = config.mqtt.port,
        "Node configured"
    );

    let transport = MqttSession::new(&application_id, config.mqtt.clone());
    let settings = NodeSettings {
        publish_dead_on_exit: config.node.publish_dead_on_exit,
        ..Default::default()
    };

    let mut node = NodeLifecycle::new(topics, transport, sensors, scan_rate, settings);
    if let Err(e) = spawn_signal_handler(node.handle()) {
        warn!(error = %e, "Signal handlers unavailable, keeping default signal behavior");
    }

    node.start().await?;
    let exit = node.run().await?;

    match serde_json::to_string(&metrics().snapshot()) {
        Ok(snapshot) => info!(metrics = %snapshot, "Final metrics"),
        Err(e) => warn!(error = %e, "Failed to serialize metrics"),
    }
    Ok(exit)
}

/// Translate SIGINT/SIGTERM into a local shutdown request
fn spawn_signal_handler(handle: NodeHandle) -> Result<(), std::io::Error> {
    let mut sigint = signal::unix::signal(signal::unix::SignalKind::interrupt())?;
    let mut sigterm = signal::unix::signal(signal::unix::SignalKind::terminate())?;

    tokio::spawn(async move {
        tokio::select! {
            _ = sigint.recv() => info!("Received SIGINT, shutting down gracefully..."),
            _ = sigterm.recv() => info!("Received SIGTERM, shutting down gracefully..."),
        }
        handle.shutdown();
    });
    Ok(())
}
