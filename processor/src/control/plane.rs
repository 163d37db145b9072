//! MQTT control plane: command subscription + retained status publishing.
//!
//! The message handler runs on the bus event-loop task, never on a
//! pipeline thread. Handlers mutate the zone registry and model pointer
//! through the locks those components document, and are expected to be
//! fast (no blocking I/O beyond a model load).

use std::sync::Arc;
use std::time::Duration;

use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, Packet, QoS};
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use cupertino_mqtt::schema::StatusMessage;

use super::registry::{CommandError, CommandRegistry};

#[derive(Debug, Error)]
pub enum ControlError {
    #[error("control plane connect timeout after {0:?}")]
    ConnectTimeout(Duration),
}

#[derive(Debug, Clone)]
pub struct ControlPlaneConfig {
    pub broker_host: String,
    pub broker_port: u16,
    pub service_id: String,
    pub client_id: String,
    pub username: Option<String>,
    pub password: Option<String>,
}

/// Clonable handle for publishing retained status updates from any task.
#[derive(Clone)]
pub struct StatusHandle {
    client: AsyncClient,
    topic: String,
    client_id: String,
}

impl StatusHandle {
    /// Publish `{ status, timestamp, client_id, detail? }` retained at QoS 1.
    pub fn publish(&self, status: &str, detail: Option<serde_json::Value>) {
        let message = StatusMessage::new(status, &self.client_id, detail);
        let payload = match serde_json::to_vec(&message) {
            Ok(payload) => payload,
            Err(e) => {
                error!("control: status serialize failed: {e}");
                return;
            }
        };
        match self
            .client
            .try_publish(&self.topic, QoS::AtLeastOnce, true, payload)
        {
            Ok(()) => debug!("control: status published: {status}"),
            Err(e) => warn!("control: status publish failed: {e}"),
        }
    }
}

/// Long-lived bus session: subscribe to the command topic, dispatch via
/// the command registry, publish lifecycle + outcome statuses.
pub struct ControlPlane {
    client: AsyncClient,
    eventloop: Option<EventLoop>,
    connected_tx: Option<watch::Sender<bool>>,
    connected: watch::Receiver<bool>,
    driver: Option<JoinHandle<()>>,
    command_topic: String,
    status_topic: String,
    client_id: String,
    registry: Arc<CommandRegistry>,
}

impl ControlPlane {
    pub fn new(config: ControlPlaneConfig) -> Self {
        let mut options = MqttOptions::new(
            &config.client_id,
            &config.broker_host,
            config.broker_port,
        );
        options.set_keep_alive(Duration::from_secs(60));
        if let (Some(user), Some(pass)) = (&config.username, &config.password) {
            options.set_credentials(user, pass);
        }
        let (client, eventloop) = AsyncClient::new(options, 64);
        let (connected_tx, connected) = watch::channel(false);

        Self {
            client,
            eventloop: Some(eventloop),
            connected_tx: Some(connected_tx),
            connected,
            driver: None,
            command_topic: format!("cupertino/control/{}/commands", config.service_id),
            status_topic: format!("cupertino/control/{}/status", config.service_id),
            client_id: config.client_id,
            registry: Arc::new(CommandRegistry::new()),
        }
    }

    pub fn command_registry(&self) -> Arc<CommandRegistry> {
        self.registry.clone()
    }

    pub fn command_topic(&self) -> &str {
        &self.command_topic
    }

    pub fn status_handle(&self) -> StatusHandle {
        StatusHandle {
            client: self.client.clone(),
            topic: self.status_topic.clone(),
            client_id: self.client_id.clone(),
        }
    }

    pub fn is_connected(&self) -> bool {
        *self.connected.borrow()
    }

    /// Start the event-loop task and wait for the broker acknowledgement.
    pub async fn connect(&mut self, timeout: Duration) -> Result<(), ControlError> {
        let (Some(eventloop), Some(connected_tx)) =
            (self.eventloop.take(), self.connected_tx.take())
        else {
            return Ok(());
        };

        info!(
            "control: connecting as {} (commands: {})",
            self.client_id, self.command_topic
        );
        self.driver = Some(tokio::spawn(drive_plane(
            eventloop,
            self.client.clone(),
            connected_tx,
            self.command_topic.clone(),
            self.registry.clone(),
            self.status_handle(),
        )));

        let mut connected = self.connected.clone();
        let wait_result = tokio::time::timeout(timeout, connected.wait_for(|c| *c))
            .await
            .map(|r| r.map(|_| ()));
        match wait_result {
            Ok(Ok(())) => {
                info!("control: plane connected");
                Ok(())
            }
            _ => {
                if let Some(driver) = self.driver.take() {
                    driver.abort();
                }
                Err(ControlError::ConnectTimeout(timeout))
            }
        }
    }

    pub fn publish_status(&self, status: &str, detail: Option<serde_json::Value>) {
        self.status_handle().publish(status, detail);
    }

    /// Publish the "disconnected" status and tear the session down.
    /// Safe to call repeatedly.
    pub async fn disconnect(&mut self) {
        if let Some(driver) = self.driver.take() {
            self.publish_status("disconnected", None);
            let _ = self.client.disconnect().await;
            driver.abort();
            info!("control: plane disconnected");
        }
    }
}

async fn drive_plane(
    mut eventloop: EventLoop,
    client: AsyncClient,
    connected: watch::Sender<bool>,
    command_topic: String,
    registry: Arc<CommandRegistry>,
    status: StatusHandle,
) {
    loop {
        match eventloop.poll().await {
            Ok(Event::Incoming(Packet::ConnAck(_))) => {
                // Re-subscribe on every (re)connect; the broker replays the
                // retained status to new subscribers on its own.
                match client.try_subscribe(&command_topic, QoS::AtLeastOnce) {
                    Ok(()) => info!("control: subscribed to {command_topic} (qos 1)"),
                    Err(e) => warn!("control: subscribe failed: {e}"),
                }
                status.publish("connected", None);
                let _ = connected.send(true);
            }
            Ok(Event::Incoming(Packet::Publish(publish))) => {
                handle_message(&publish.payload, &registry, &status);
            }
            Ok(_) => {}
            Err(e) => {
                if *connected.borrow() {
                    warn!("control: connection lost: {e}");
                }
                let _ = connected.send(false);
                tokio::time::sleep(Duration::from_secs(1)).await;
            }
        }
    }
}

/// Decode → parse → dispatch. Every failure class is logged and dropped;
/// nothing here can take the plane down.
fn handle_message(payload: &[u8], registry: &CommandRegistry, status: &StatusHandle) {
    let text = match std::str::from_utf8(payload) {
        Ok(text) => text,
        Err(e) => {
            warn!("control: payload is not valid utf-8: {e}");
            return;
        }
    };

    let value: serde_json::Value = match serde_json::from_str(text) {
        Ok(value) => value,
        Err(e) => {
            warn!("control: malformed command ({e}): {text}");
            return;
        }
    };

    let command = value
        .get("command")
        .and_then(|c| c.as_str())
        .unwrap_or("")
        .to_lowercase();
    if command.is_empty() {
        warn!("control: message without a command field: {text}");
        return;
    }

    info!("control: executing command '{command}'");
    match registry.execute(&command, &value) {
        Ok(()) => debug!("control: command '{command}' completed"),
        Err(CommandError::Unknown { command, available }) => {
            warn!(
                "control: unknown command '{command}' (available: {})",
                available.join(", ")
            );
            status.publish(
                "unknown_command",
                Some(serde_json::json!({
                    "command": command,
                    "available_commands": available,
                })),
            );
        }
        Err(e) => {
            error!("control: {e:#}");
            status.publish(
                "command_failed",
                Some(serde_json::json!({
                    "command": command,
                    "error": format!("{e:#}"),
                })),
            );
        }
    }
}
