//! # cupertino-mqtt
//!
//! Wire envelopes and MQTT publishers for the Cupertino data plane.
//!
//! ## Topics (parameterized by `service_id`)
//! - `cupertino/data/detections/<service_id>` — detection envelopes, QoS 0
//! - `cupertino/data/zones/<service_id>` — zone-event envelopes, QoS 0
//! - `cupertino/control/<service_id>/status` — status envelopes, QoS 1 retained
//!
//! The data plane is fire-and-forget: a failed publish is logged and the
//! next frame supersedes it. Only the control plane (owned by the
//! processor) is reliable.

pub mod publisher;
pub mod schema;

pub use publisher::{
    qos_from_level, DetectionPublisher, MqttPublisher, PublishError, PublisherConfig,
    PublisherStats, ZoneEventPublisher,
};
pub use schema::{
    BBox, CrossingDirection, Detection, DetectionMessage, EventType, SchemaError, StatusMessage,
    ZoneEvent, ZoneEventMessage, ZoneEventStats, ZoneType, SCHEMA_VERSION,
};
