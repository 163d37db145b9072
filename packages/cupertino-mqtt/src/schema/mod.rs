//! Versioned message shapes carried on the bus.
//!
//! Every envelope serializes to the exact JSON documented on the data
//! plane; deserialize(serialize(m)) == m for all valid messages.

mod detection;
mod status;
mod zone_event;

pub use detection::{BBox, Detection, DetectionMessage};
pub use status::StatusMessage;
pub use zone_event::{CrossingDirection, EventType, ZoneEvent, ZoneEventMessage, ZoneEventStats, ZoneType};

use thiserror::Error;

/// Current envelope schema version.
pub const SCHEMA_VERSION: &str = "1.0";

/// Validation failures for wire envelopes. Always logged, never fatal.
#[derive(Debug, Error)]
pub enum SchemaError {
    #[error("bbox width and height must be > 0, got {width}x{height}")]
    InvalidBBox { width: f64, height: f64 },

    #[error("confidence must be in [0, 1], got {0}")]
    ConfidenceOutOfRange(f64),

    #[error("line zone '{0}' must carry a crossing_direction")]
    MissingCrossingDirection(String),

    #[error("zone '{zone_id}' stats do not match zone type '{zone_type}'")]
    StatsShapeMismatch { zone_id: String, zone_type: String },
}
