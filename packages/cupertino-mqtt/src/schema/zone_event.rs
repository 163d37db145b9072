//! Zone-event envelope: the state of every monitored zone for one frame.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{SchemaError, SCHEMA_VERSION};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ZoneType {
    Polygon,
    Line,
}

impl ZoneType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Polygon => "polygon",
            Self::Line => "line",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventType {
    /// Objects currently inside a polygon zone.
    Inside,
    /// Objects crossed a line zone this frame.
    Crossing,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CrossingDirection {
    In,
    Out,
}

/// Counters for one zone. Polygon zones carry `current_count` and null
/// totals; line zones carry totals and a null `current_count`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ZoneEventStats {
    pub total_in: Option<u64>,
    pub total_out: Option<u64>,
    pub current_count: Option<u64>,
}

impl ZoneEventStats {
    pub fn polygon(current_count: u64) -> Self {
        Self {
            total_in: None,
            total_out: None,
            current_count: Some(current_count),
        }
    }

    pub fn line(total_in: u64, total_out: u64) -> Self {
        Self {
            total_in: Some(total_in),
            total_out: Some(total_out),
            current_count: None,
        }
    }
}

/// One zone's state after a frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ZoneEvent {
    pub zone_id: String,
    pub zone_type: ZoneType,
    pub event_type: EventType,
    pub stats: ZoneEventStats,
    /// Tracker ids inside the zone (polygon) or crossing it (line).
    pub triggered_by: Vec<u32>,
    /// Present iff `zone_type == Line`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub crossing_direction: Option<CrossingDirection>,
}

impl ZoneEvent {
    pub fn validate(&self) -> Result<(), SchemaError> {
        match self.zone_type {
            ZoneType::Line => {
                if self.crossing_direction.is_none() {
                    return Err(SchemaError::MissingCrossingDirection(self.zone_id.clone()));
                }
                if self.stats.total_in.is_none()
                    || self.stats.total_out.is_none()
                    || self.stats.current_count.is_some()
                {
                    return Err(SchemaError::StatsShapeMismatch {
                        zone_id: self.zone_id.clone(),
                        zone_type: self.zone_type.as_str().to_string(),
                    });
                }
            }
            ZoneType::Polygon => {
                if self.stats.current_count.is_none()
                    || self.stats.total_in.is_some()
                    || self.stats.total_out.is_some()
                {
                    return Err(SchemaError::StatsShapeMismatch {
                        zone_id: self.zone_id.clone(),
                        zone_type: self.zone_type.as_str().to_string(),
                    });
                }
            }
        }
        Ok(())
    }
}

/// Complete zone-event envelope for one frame. `frame_id` correlates with
/// the detection envelope published for the same frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ZoneEventMessage {
    pub schema_version: String,
    pub timestamp: DateTime<Utc>,
    pub frame_id: u64,
    pub source_id: u32,
    pub zones: Vec<ZoneEvent>,
}

impl ZoneEventMessage {
    pub fn new(
        timestamp: DateTime<Utc>,
        frame_id: u64,
        source_id: u32,
        zones: Vec<ZoneEvent>,
    ) -> Self {
        Self {
            schema_version: SCHEMA_VERSION.to_string(),
            timestamp,
            frame_id,
            source_id,
            zones,
        }
    }

    pub fn validate(&self) -> Result<(), SchemaError> {
        for zone in &self.zones {
            zone.validate()?;
        }
        Ok(())
    }

    pub fn zone_count(&self) -> usize {
        self.zones.len()
    }

    pub fn zone(&self, zone_id: &str) -> Option<&ZoneEvent> {
        self.zones.iter().find(|z| z.zone_id == zone_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn polygon_event() -> ZoneEvent {
        ZoneEvent {
            zone_id: "entrance".to_string(),
            zone_type: ZoneType::Polygon,
            event_type: EventType::Inside,
            stats: ZoneEventStats::polygon(2),
            triggered_by: vec![1, 3],
            crossing_direction: None,
        }
    }

    fn line_event() -> ZoneEvent {
        ZoneEvent {
            zone_id: "doorway".to_string(),
            zone_type: ZoneType::Line,
            event_type: EventType::Crossing,
            stats: ZoneEventStats::line(10, 8),
            triggered_by: vec![2],
            crossing_direction: Some(CrossingDirection::In),
        }
    }

    #[test]
    fn round_trip_is_lossless() {
        let message =
            ZoneEventMessage::new(Utc::now(), 123, 0, vec![polygon_event(), line_event()]);
        let json = serde_json::to_string(&message).unwrap();
        let back: ZoneEventMessage = serde_json::from_str(&json).unwrap();
        assert_eq!(message, back);
    }

    #[test]
    fn polygon_event_omits_crossing_direction() {
        let json = serde_json::to_value(polygon_event()).unwrap();
        assert!(json.get("crossing_direction").is_none());
        assert_eq!(json["stats"]["total_in"], serde_json::Value::Null);
        assert_eq!(json["stats"]["current_count"], 2);
    }

    #[test]
    fn line_event_serializes_direction_lowercase() {
        let json = serde_json::to_value(line_event()).unwrap();
        assert_eq!(json["crossing_direction"], "in");
        assert_eq!(json["zone_type"], "line");
        assert_eq!(json["event_type"], "crossing");
    }

    #[test]
    fn line_event_without_direction_fails_validation() {
        let mut event = line_event();
        event.crossing_direction = None;
        assert!(matches!(
            event.validate(),
            Err(SchemaError::MissingCrossingDirection(_))
        ));
    }

    #[test]
    fn stats_shape_is_checked_per_zone_type() {
        let mut event = polygon_event();
        event.stats = ZoneEventStats::line(1, 1);
        assert!(matches!(
            event.validate(),
            Err(SchemaError::StatsShapeMismatch { .. })
        ));

        let mut event = line_event();
        event.stats = ZoneEventStats::polygon(4);
        assert!(matches!(
            event.validate(),
            Err(SchemaError::StatsShapeMismatch { .. })
        ));
    }

    #[test]
    fn zone_lookup_by_id() {
        let message =
            ZoneEventMessage::new(Utc::now(), 1, 0, vec![polygon_event(), line_event()]);
        assert!(message.zone("doorway").is_some());
        assert!(message.zone("missing").is_none());
        assert_eq!(message.zone_count(), 2);
    }
}
