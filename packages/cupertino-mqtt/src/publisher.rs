//! Data-plane publishers: one MQTT client per stream, fire-and-forget.
//!
//! A publisher owns its own client and connection flag. Publish failures
//! are logged and reported as `false`; callers never retry — the next
//! frame supersedes the lost one.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, Packet, QoS};
use serde::Serialize;
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::schema::{DetectionMessage, ZoneEventMessage};

#[derive(Debug, Error)]
pub enum PublishError {
    #[error("mqtt connect timeout after {timeout:?} (client '{client_id}')")]
    ConnectTimeout {
        timeout: Duration,
        client_id: String,
    },
}

/// Map a numeric QoS level from configuration onto the client enum.
/// Levels above 2 clamp to exactly-once.
pub fn qos_from_level(level: u8) -> QoS {
    match level {
        0 => QoS::AtMostOnce,
        1 => QoS::AtLeastOnce,
        _ => QoS::ExactlyOnce,
    }
}

#[derive(Debug, Clone)]
pub struct PublisherConfig {
    pub broker_host: String,
    pub broker_port: u16,
    pub topic: String,
    pub client_id: String,
    pub username: Option<String>,
    pub password: Option<String>,
    pub qos: QoS,
}

/// Publisher statistics snapshot.
#[derive(Debug, Clone)]
pub struct PublisherStats {
    pub published: u64,
    pub failed: u64,
    pub connected: bool,
    pub topic: String,
}

struct Session {
    client: AsyncClient,
    connected: watch::Receiver<bool>,
    driver: JoinHandle<()>,
}

/// Single-topic MQTT publisher with its own connection.
///
/// All methods take `&self`; the session lives behind a brief lock so the
/// publisher can be shared with the worker task via `Arc`.
pub struct MqttPublisher {
    config: PublisherConfig,
    session: Mutex<Option<Session>>,
    published: AtomicU64,
    failed: AtomicU64,
}

impl MqttPublisher {
    pub fn new(config: PublisherConfig) -> Self {
        Self {
            config,
            session: Mutex::new(None),
            published: AtomicU64::new(0),
            failed: AtomicU64::new(0),
        }
    }

    pub fn topic(&self) -> &str {
        &self.config.topic
    }

    /// Connect and wait for the broker acknowledgement, bounded by `timeout`.
    pub async fn connect(&self, timeout: Duration) -> Result<(), PublishError> {
        if self.is_connected() {
            return Ok(());
        }

        let mut options = MqttOptions::new(
            &self.config.client_id,
            &self.config.broker_host,
            self.config.broker_port,
        );
        options.set_keep_alive(Duration::from_secs(60));
        if let (Some(user), Some(pass)) = (&self.config.username, &self.config.password) {
            options.set_credentials(user, pass);
        }

        let (client, eventloop) = AsyncClient::new(options, 64);
        let (tx, mut rx) = watch::channel(false);
        let driver = tokio::spawn(drive_connection(
            eventloop,
            tx,
            self.config.client_id.clone(),
        ));

        let wait_result = tokio::time::timeout(timeout, rx.wait_for(|connected| *connected))
            .await
            .map(|r| r.map(|_| ()));
        match wait_result {
            Ok(Ok(())) => {
                *self.session.lock() = Some(Session {
                    client,
                    connected: rx,
                    driver,
                });
                info!(
                    "publisher {}: connected, topic {}",
                    self.config.client_id, self.config.topic
                );
                Ok(())
            }
            _ => {
                driver.abort();
                Err(PublishError::ConnectTimeout {
                    timeout,
                    client_id: self.config.client_id.clone(),
                })
            }
        }
    }

    pub fn is_connected(&self) -> bool {
        self.session
            .lock()
            .as_ref()
            .map(|s| *s.connected.borrow())
            .unwrap_or(false)
    }

    /// Serialize and publish. Returns `false` (and logs) on any failure.
    pub fn publish<T: Serialize>(&self, message: &T) -> bool {
        let payload = match serde_json::to_vec(message) {
            Ok(payload) => payload,
            Err(e) => {
                warn!("publisher {}: serialize failed: {e}", self.config.client_id);
                self.failed.fetch_add(1, Ordering::Relaxed);
                return false;
            }
        };

        let result = {
            let session = self.session.lock();
            match session.as_ref() {
                Some(session) if *session.connected.borrow() => Some(session.client.try_publish(
                    &self.config.topic,
                    self.config.qos,
                    false,
                    payload,
                )),
                _ => None,
            }
        };

        match result {
            None => {
                warn!(
                    "publisher {}: not connected, dropping message",
                    self.config.client_id
                );
                self.failed.fetch_add(1, Ordering::Relaxed);
                false
            }
            Some(Ok(())) => {
                let count = self.published.fetch_add(1, Ordering::Relaxed) + 1;
                debug!(
                    "publisher {}: published #{count} to {}",
                    self.config.client_id, self.config.topic
                );
                true
            }
            Some(Err(e)) => {
                warn!("publisher {}: publish failed: {e}", self.config.client_id);
                self.failed.fetch_add(1, Ordering::Relaxed);
                false
            }
        }
    }

    pub async fn disconnect(&self) {
        let session = self.session.lock().take();
        if let Some(session) = session {
            let _ = session.client.disconnect().await;
            session.driver.abort();
            info!(
                "publisher {}: disconnected ({} published, {} failed)",
                self.config.client_id,
                self.published.load(Ordering::Relaxed),
                self.failed.load(Ordering::Relaxed),
            );
        }
    }

    pub fn stats(&self) -> PublisherStats {
        PublisherStats {
            published: self.published.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            connected: self.is_connected(),
            topic: self.config.topic.clone(),
        }
    }
}

/// Drive the rumqttc event loop: flip the connection flag on ConnAck and
/// on errors. The event loop reconnects on its own; a send error never
/// crashes the service.
async fn drive_connection(
    mut eventloop: EventLoop,
    connected: watch::Sender<bool>,
    client_id: String,
) {
    loop {
        match eventloop.poll().await {
            Ok(Event::Incoming(Packet::ConnAck(_))) => {
                debug!("publisher {client_id}: broker acknowledged connection");
                let _ = connected.send(true);
            }
            Ok(_) => {}
            Err(e) => {
                if *connected.borrow() {
                    warn!("publisher {client_id}: connection lost: {e}");
                }
                let _ = connected.send(false);
                tokio::time::sleep(Duration::from_secs(1)).await;
            }
        }
    }
}

// ── Typed publishers ──────────────────────────────────────────────────────────

/// Publisher for detection envelopes. Validates before sending.
pub struct DetectionPublisher {
    inner: MqttPublisher,
}

impl DetectionPublisher {
    pub fn new(config: PublisherConfig) -> Self {
        Self {
            inner: MqttPublisher::new(config),
        }
    }

    pub async fn connect(&self, timeout: Duration) -> Result<(), PublishError> {
        self.inner.connect(timeout).await
    }

    pub async fn disconnect(&self) {
        self.inner.disconnect().await
    }

    pub fn publish(&self, message: &DetectionMessage) -> bool {
        if let Err(e) = message.validate() {
            warn!("detection envelope rejected: {e}");
            return false;
        }
        self.inner.publish(message)
    }

    pub fn is_connected(&self) -> bool {
        self.inner.is_connected()
    }

    pub fn stats(&self) -> PublisherStats {
        self.inner.stats()
    }
}

/// Publisher for zone-event envelopes. Validates before sending.
pub struct ZoneEventPublisher {
    inner: MqttPublisher,
}

impl ZoneEventPublisher {
    pub fn new(config: PublisherConfig) -> Self {
        Self {
            inner: MqttPublisher::new(config),
        }
    }

    pub async fn connect(&self, timeout: Duration) -> Result<(), PublishError> {
        self.inner.connect(timeout).await
    }

    pub async fn disconnect(&self) {
        self.inner.disconnect().await
    }

    pub fn publish(&self, message: &ZoneEventMessage) -> bool {
        if let Err(e) = message.validate() {
            warn!("zone-event envelope rejected: {e}");
            return false;
        }
        self.inner.publish(message)
    }

    pub fn is_connected(&self) -> bool {
        self.inner.is_connected()
    }

    pub fn stats(&self) -> PublisherStats {
        self.inner.stats()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn config() -> PublisherConfig {
        PublisherConfig {
            broker_host: "localhost".to_string(),
            broker_port: 1883,
            topic: "cupertino/data/detections/cam_01".to_string(),
            client_id: "publisher_test".to_string(),
            username: None,
            password: None,
            qos: QoS::AtMostOnce,
        }
    }

    #[test]
    fn qos_levels_map_onto_client_enum() {
        assert_eq!(qos_from_level(0), QoS::AtMostOnce);
        assert_eq!(qos_from_level(1), QoS::AtLeastOnce);
        assert_eq!(qos_from_level(2), QoS::ExactlyOnce);
    }

    #[test]
    fn publish_before_connect_reports_failure() {
        let publisher = MqttPublisher::new(config());
        assert!(!publisher.is_connected());
        assert!(!publisher.publish(&serde_json::json!({ "x": 1 })));

        let stats = publisher.stats();
        assert_eq!(stats.published, 0);
        assert_eq!(stats.failed, 1);
    }

    #[test]
    fn invalid_envelope_is_rejected_before_the_wire() {
        let publisher = DetectionPublisher::new(config());
        let mut message = DetectionMessage::new(Utc::now(), 1, 0, vec![]);
        message.detections.push(crate::schema::Detection {
            tracker_id: 1,
            class_name: "person".to_string(),
            confidence: 2.0,
            bbox: crate::schema::BBox {
                x: 0.0,
                y: 0.0,
                width: 10.0,
                height: 10.0,
            },
        });
        assert!(!publisher.publish(&message));
        // Rejected before reaching the client: no failure counted there.
        assert_eq!(publisher.stats().failed, 0);
    }
}
