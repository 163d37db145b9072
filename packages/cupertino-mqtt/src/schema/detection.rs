//! Detection envelope: all detections from a single frame.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{SchemaError, SCHEMA_VERSION};

/// Bounding box in absolute pixels, origin at the frame's top-left corner.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BBox {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl BBox {
    pub fn validate(&self) -> Result<(), SchemaError> {
        if self.width <= 0.0 || self.height <= 0.0 {
            return Err(SchemaError::InvalidBBox {
                width: self.width,
                height: self.height,
            });
        }
        Ok(())
    }
}

/// One detected object with its tracking identity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    pub tracker_id: u32,
    #[serde(rename = "class")]
    pub class_name: String,
    pub confidence: f64,
    pub bbox: BBox,
}

impl Detection {
    pub fn validate(&self) -> Result<(), SchemaError> {
        if !(0.0..=1.0).contains(&self.confidence) {
            return Err(SchemaError::ConfidenceOutOfRange(self.confidence));
        }
        self.bbox.validate()
    }
}

/// Complete detection envelope for one frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectionMessage {
    pub schema_version: String,
    pub timestamp: DateTime<Utc>,
    pub frame_id: u64,
    pub source_id: u32,
    pub detections: Vec<Detection>,
}

impl DetectionMessage {
    pub fn new(
        timestamp: DateTime<Utc>,
        frame_id: u64,
        source_id: u32,
        detections: Vec<Detection>,
    ) -> Self {
        Self {
            schema_version: SCHEMA_VERSION.to_string(),
            timestamp,
            frame_id,
            source_id,
            detections,
        }
    }

    pub fn validate(&self) -> Result<(), SchemaError> {
        for detection in &self.detections {
            detection.validate()?;
        }
        Ok(())
    }

    pub fn detection_count(&self) -> usize {
        self.detections.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> DetectionMessage {
        DetectionMessage::new(
            Utc::now(),
            123,
            0,
            vec![Detection {
                tracker_id: 1,
                class_name: "person".to_string(),
                confidence: 0.95,
                bbox: BBox {
                    x: 100.0,
                    y: 200.0,
                    width: 50.0,
                    height: 100.0,
                },
            }],
        )
    }

    #[test]
    fn round_trip_is_lossless() {
        let message = sample();
        let json = serde_json::to_string(&message).unwrap();
        let back: DetectionMessage = serde_json::from_str(&json).unwrap();
        assert_eq!(message, back);
    }

    #[test]
    fn class_field_is_renamed_on_the_wire() {
        let json = serde_json::to_value(sample()).unwrap();
        let detection = &json["detections"][0];
        assert_eq!(detection["class"], "person");
        assert!(detection.get("class_name").is_none());
    }

    #[test]
    fn zero_area_bbox_fails_validation() {
        let mut message = sample();
        message.detections[0].bbox.width = 0.0;
        assert!(matches!(
            message.validate(),
            Err(SchemaError::InvalidBBox { .. })
        ));
    }

    #[test]
    fn out_of_range_confidence_fails_validation() {
        let mut message = sample();
        message.detections[0].confidence = 1.2;
        assert!(matches!(
            message.validate(),
            Err(SchemaError::ConfidenceOutOfRange(_))
        ));
    }
}
