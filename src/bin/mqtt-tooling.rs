//! MQTT maintenance tooling
//!
//! `publish-null-foreach-retained` overwrites every retained message on the
//! broker with an empty retained payload and prints a JSON report.

use clap::{Parser, Subcommand};
use mqtt_presence::config::MqttSection;
use mqtt_presence::observability::init_default_logging;
use mqtt_presence::sweeper::{RetainedSweeper, SweepOptions};
use mqtt_presence::transport::mqtt::MqttSession;
use std::process;
use std::time::Duration;
use tracing::{error, info};

#[derive(Parser)]
#[command(name = "mqtt-tooling")]
#[command(about = "Maintenance commands for an MQTT broker")]
#[command(version)]
struct Cli {
    /// MQTT broker host
    #[arg(long, default_value = "localhost")]
    host: String,

    /// MQTT broker port
    #[arg(long, default_value_t = 1883)]
    port: u16,

    /// Verbose logging
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Clear every retained message by publishing an empty retained payload
    PublishNullForeachRetained {
        /// Idle wait before checking for unconfirmed overwrites
        #[arg(long, default_value_t = 1.0)]
        idle_timeout_secs: f64,

        /// Give up after this many idle waits with unconfirmed overwrites
        #[arg(long)]
        max_pending_waits: Option<u32>,

        /// Capacity of the inbound message queue
        #[arg(long, default_value_t = 100)]
        queue_capacity: usize,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    init_default_logging(cli.verbose);

    let result = match cli.command {
        Commands::PublishNullForeachRetained {
            idle_timeout_secs,
            max_pending_waits,
            queue_capacity,
        } => {
            publish_null_foreach_retained(
                cli.host,
                cli.port,
                idle_timeout_secs,
                max_pending_waits,
                queue_capacity,
            )
            .await
        }
    };

    if let Err(e) = result {
        error!("Command failed: {}", e);
        process::exit(1);
    }
}

async fn publish_null_foreach_retained(
    host: String,
    port: u16,
    idle_timeout_secs: f64,
    max_pending_waits: Option<u32>,
    queue_capacity: usize,
) -> Result<(), Box<dyn std::error::Error>> {
    let idle_timeout = Duration::try_from_secs_f64(idle_timeout_secs)
        .map_err(|e| format!("Invalid idle timeout {idle_timeout_secs}: {e}"))?;
    if queue_capacity == 0 {
        return Err("Queue capacity must be greater than 0".into());
    }

    let mqtt = MqttSection {
        host,
        port,
        event_capacity: queue_capacity,
        ..Default::default()
    };
    info!(host = %mqtt.host, port = mqtt.port, "Sweeping retained messages");

    let transport = MqttSession::new("mqtt-tooling", mqtt);
    let options = SweepOptions {
        idle_timeout,
        max_pending_waits,
        ..Default::default()
    };

    let report = RetainedSweeper::new(transport, options).run().await?;
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}
