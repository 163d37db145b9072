//! Command sender for a running stream processor instance.
//!
//! Publishes one command to `cupertino/control/<service_id>/commands` at
//! QoS 1 and waits for the broker acknowledgement. Exit code 0 on
//! success, 1 on any error with the message on stderr.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use rumqttc::{Client, Event, MqttOptions, Packet, QoS};
use serde_json::{json, Value};
use uuid::Uuid;

#[derive(Parser)]
#[command(
    name = "cupertino-cli",
    version,
    about = "Send control commands to a stream processor instance"
)]
struct Args {
    /// Target service id.
    #[arg(long, default_value = "cam_01")]
    service_id: String,

    /// MQTT broker host.
    #[arg(long, default_value = "localhost")]
    broker: String,

    /// MQTT broker port.
    #[arg(long, default_value_t = 1883)]
    port: u16,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Add a zone from a YAML definition.
    AddZone { config: PathBuf },
    /// Remove a zone by id.
    RemoveZone { zone_id: String },
    /// Enable a zone by id.
    EnableZone { zone_id: String },
    /// Disable a zone by id.
    DisableZone { zone_id: String },
    /// Swap the detector model from a YAML definition.
    SetModel { config: PathBuf },
    /// Pause publishing.
    Pause,
    /// Resume publishing.
    Resume,
    /// Request a one-shot status report.
    Status,
    /// Request a health probe.
    Health,
    /// List configured zones.
    ListZones,
}

fn main() {
    if let Err(e) = run() {
        eprintln!("error: {e:#}");
        std::process::exit(1);
    }
}

fn run() -> anyhow::Result<()> {
    let args = Args::parse();
    let payload = build_payload(&args.command)?;
    let topic = format!("cupertino/control/{}/commands", args.service_id);

    send_command(&args.broker, args.port, &topic, &payload)?;
    println!(
        "command sent: {}",
        payload["command"].as_str().unwrap_or("unknown")
    );
    Ok(())
}

fn build_payload(command: &Command) -> anyhow::Result<Value> {
    Ok(match command {
        Command::AddZone { config } => load_yaml_payload(config, "add_zone")?,
        Command::SetModel { config } => load_yaml_payload(config, "set_model")?,
        Command::RemoveZone { zone_id } => {
            json!({ "command": "remove_zone", "zone_id": zone_id })
        }
        Command::EnableZone { zone_id } => {
            json!({ "command": "enable_zone", "zone_id": zone_id })
        }
        Command::DisableZone { zone_id } => {
            json!({ "command": "disable_zone", "zone_id": zone_id })
        }
        Command::Pause => json!({ "command": "pause" }),
        Command::Resume => json!({ "command": "resume" }),
        Command::Status => json!({ "command": "status" }),
        Command::Health => json!({ "command": "health" }),
        Command::ListZones => json!({ "command": "list_zones" }),
    })
}

/// Load a command payload from YAML, filling in the command name when the
/// file leaves it implicit.
fn load_yaml_payload(path: &Path, command: &str) -> anyhow::Result<Value> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("cannot read {}", path.display()))?;
    let mut value: Value = serde_yaml::from_str(&text)
        .with_context(|| format!("invalid YAML in {}", path.display()))?;

    let Some(object) = value.as_object_mut() else {
        bail!("{} must contain a YAML mapping", path.display());
    };
    object
        .entry("command".to_string())
        .or_insert_with(|| Value::String(command.to_string()));
    Ok(value)
}

/// Publish at QoS 1 and drive the connection until the broker
/// acknowledges the message.
fn send_command(broker: &str, port: u16, topic: &str, payload: &Value) -> anyhow::Result<()> {
    let client_id = format!("cupertino_cli_{}", Uuid::new_v4().simple());
    let mut options = MqttOptions::new(client_id, broker, port);
    options.set_keep_alive(Duration::from_secs(30));

    let (client, mut connection) = Client::new(options, 10);
    let body = serde_json::to_vec(payload)?;
    client.publish(topic, QoS::AtLeastOnce, false, body)?;

    for event in connection.iter() {
        match event {
            Ok(Event::Incoming(Packet::PubAck(_))) => {
                let _ = client.disconnect();
                return Ok(());
            }
            Ok(_) => {}
            Err(e) => bail!(
                "unable to reach MQTT broker at {broker}:{port}: {e} (is mosquitto running?)"
            ),
        }
    }
    bail!("connection closed before the broker acknowledged the command")
}
