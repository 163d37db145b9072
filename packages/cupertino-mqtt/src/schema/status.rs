//! Status envelope published on the retained control-plane status topic.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One status update from a service instance. The status topic is retained,
/// so the latest message doubles as the instance's last-known state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusMessage {
    /// Status name, e.g. "connected", "running", "zone_added", "command_failed".
    pub status: String,
    pub timestamp: DateTime<Utc>,
    pub client_id: String,
    /// Optional structured payload (zone lists, model info, error strings).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<serde_json::Value>,
}

impl StatusMessage {
    pub fn new(
        status: impl Into<String>,
        client_id: impl Into<String>,
        detail: Option<serde_json::Value>,
    ) -> Self {
        Self {
            status: status.into(),
            timestamp: Utc::now(),
            client_id: client_id.into(),
            detail,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn detail_is_omitted_when_absent() {
        let message = StatusMessage::new("running", "processor_cam_01", None);
        let json = serde_json::to_value(&message).unwrap();
        assert!(json.get("detail").is_none());
        assert_eq!(json["status"], "running");
    }

    #[test]
    fn round_trip_with_detail() {
        let message = StatusMessage::new(
            "zone_added",
            "processor_cam_01",
            Some(json!({ "zone_id": "entrance" })),
        );
        let text = serde_json::to_string(&message).unwrap();
        let back: StatusMessage = serde_json::from_str(&text).unwrap();
        assert_eq!(message, back);
    }
}
