//! Stateless zone detection: applies geometry to a detection batch.
//!
//! Line-side memory is injected and returned rather than mutated in place,
//! so these functions stay pure and the caller controls where state lives.

use std::collections::HashMap;

use crate::{Anchor, DetectionBatch, LineZone, PolygonZone, ZoneError};

/// Result of one line-crossing pass over a batch.
#[derive(Debug, Clone)]
pub struct LineCrossing {
    /// Per-detection flag: crossed onto the +1 side this frame.
    pub crossed_in: Vec<bool>,
    /// Per-detection flag: crossed onto the -1 side this frame.
    pub crossed_out: Vec<bool>,
    /// Updated side memory: every tracker seen this frame is recorded;
    /// unseen ids carry forward unchanged.
    pub state: HashMap<u32, i8>,
}

/// Per-detection membership mask for a polygon zone.
pub fn detect_polygon(zone: &PolygonZone, batch: &DetectionBatch, anchor: Anchor) -> Vec<bool> {
    batch
        .anchor_points(anchor)
        .into_iter()
        .map(|(x, y)| zone.contains(x, y))
        .collect()
}

/// Directional line-crossing detection with external side memory.
///
/// A crossing is counted only when the tracker's remembered side differs
/// from the current side and the current side is strictly ±1. Transitions
/// through side 0 never count: a tracker first seen on the line stores 0
/// and cannot trigger until it lands on a side.
///
/// Fails with [`ZoneError::MissingTrackerId`] if any detection lacks a
/// tracker id.
pub fn detect_line_crossing(
    zone: &LineZone,
    batch: &DetectionBatch,
    prior_state: &HashMap<u32, i8>,
    anchor: Anchor,
) -> Result<LineCrossing, ZoneError> {
    let mut crossed_in = vec![false; batch.len()];
    let mut crossed_out = vec![false; batch.len()];
    let mut state = prior_state.clone();

    for (idx, detection) in batch.iter().enumerate() {
        let tracker_id = detection.tracker_id.ok_or(ZoneError::MissingTrackerId)?;
        let (x, y) = detection.bbox.anchor(anchor);
        let current = zone.side(x, y);

        if let Some(&previous) = prior_state.get(&tracker_id) {
            if previous != current && current != 0 {
                if current == 1 {
                    crossed_in[idx] = true;
                } else {
                    crossed_out[idx] = true;
                }
            }
        }

        state.insert(tracker_id, current);
    }

    Ok(LineCrossing {
        crossed_in,
        crossed_out,
        state,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{BoundingBox, Detection};

    fn tracked(x: f32, y: f32, tracker_id: u32) -> Detection {
        // 20x40 box whose bottom-center anchor lands on (x, y).
        Detection {
            bbox: BoundingBox::new(x - 10.0, y - 40.0, 20.0, 40.0),
            class_id: 0,
            confidence: 0.9,
            tracker_id: Some(tracker_id),
        }
    }

    fn horizontal_line() -> LineZone {
        LineZone::new((0.0, 50.0), (100.0, 50.0)).unwrap()
    }

    #[test]
    fn polygon_mask_matches_membership() {
        let zone =
            PolygonZone::new(vec![(10, 10), (90, 10), (90, 90), (10, 90)], (100, 100)).unwrap();
        let batch = DetectionBatch::from_detections(vec![
            tracked(50.0, 80.0, 1),
            tracked(5.0, 5.0, 2),
        ]);
        let mask = detect_polygon(&zone, &batch, Anchor::BottomCenter);
        assert_eq!(mask, vec![true, false]);
    }

    #[test]
    fn polygon_empty_batch_yields_empty_mask() {
        let zone =
            PolygonZone::new(vec![(10, 10), (90, 10), (90, 90), (10, 90)], (100, 100)).unwrap();
        let mask = detect_polygon(&zone, &DetectionBatch::new(), Anchor::BottomCenter);
        assert!(mask.is_empty());
    }

    #[test]
    fn crossing_in_across_two_frames() {
        let line = horizontal_line();

        // Frame 1: tracker 7 below the line (side -1) — no prior state, no crossing.
        let frame1 = DetectionBatch::from_detections(vec![tracked(50.0, 70.0, 7)]);
        let first =
            detect_line_crossing(&line, &frame1, &HashMap::new(), Anchor::BottomCenter).unwrap();
        assert_eq!(first.crossed_in, vec![false]);
        assert_eq!(first.crossed_out, vec![false]);
        assert_eq!(first.state.get(&7), Some(&-1));

        // Frame 2: same tracker above the line (side +1) — crossed in.
        let frame2 = DetectionBatch::from_detections(vec![tracked(50.0, 30.0, 7)]);
        let second =
            detect_line_crossing(&line, &frame2, &first.state, Anchor::BottomCenter).unwrap();
        assert_eq!(second.crossed_in, vec![true]);
        assert_eq!(second.crossed_out, vec![false]);
        assert_eq!(second.state.get(&7), Some(&1));
    }

    #[test]
    fn landing_on_the_line_never_counts() {
        let line = horizontal_line();
        let mut state = HashMap::new();
        state.insert(3, -1_i8);

        let on_line = DetectionBatch::from_detections(vec![tracked(50.0, 50.0, 3)]);
        let result =
            detect_line_crossing(&line, &on_line, &state, Anchor::BottomCenter).unwrap();
        assert_eq!(result.crossed_in, vec![false]);
        assert_eq!(result.crossed_out, vec![false]);
        assert_eq!(result.state.get(&3), Some(&0));

        // Leaving side 0 onto +1 does count: the remembered side differs.
        let above = DetectionBatch::from_detections(vec![tracked(50.0, 30.0, 3)]);
        let next =
            detect_line_crossing(&line, &above, &result.state, Anchor::BottomCenter).unwrap();
        assert_eq!(next.crossed_in, vec![true]);
    }

    #[test]
    fn first_sighting_on_line_cannot_trigger() {
        let line = horizontal_line();
        let on_line = DetectionBatch::from_detections(vec![tracked(50.0, 50.0, 9)]);
        let result =
            detect_line_crossing(&line, &on_line, &HashMap::new(), Anchor::BottomCenter).unwrap();
        assert_eq!(result.crossed_in, vec![false]);
        assert_eq!(result.crossed_out, vec![false]);
        assert_eq!(result.state.get(&9), Some(&0));
    }

    #[test]
    fn unseen_trackers_carry_forward() {
        let line = horizontal_line();
        let mut prior = HashMap::new();
        prior.insert(1, 1_i8);
        prior.insert(2, -1_i8);

        let batch = DetectionBatch::from_detections(vec![tracked(50.0, 70.0, 1)]);
        let result = detect_line_crossing(&line, &batch, &prior, Anchor::BottomCenter).unwrap();
        assert_eq!(result.state.get(&1), Some(&-1));
        assert_eq!(result.state.get(&2), Some(&-1));
        // The input state is untouched.
        assert_eq!(prior.get(&1), Some(&1));
    }

    #[test]
    fn untracked_detection_fails_the_batch() {
        let line = horizontal_line();
        let batch = DetectionBatch::from_detections(vec![Detection {
            bbox: BoundingBox::new(40.0, 40.0, 20.0, 40.0),
            class_id: 0,
            confidence: 0.9,
            tracker_id: None,
        }]);
        let err =
            detect_line_crossing(&line, &batch, &HashMap::new(), Anchor::BottomCenter).unwrap_err();
        assert!(matches!(err, ZoneError::MissingTrackerId));
    }

    #[test]
    fn empty_batch_preserves_state() {
        let line = horizontal_line();
        let mut prior = HashMap::new();
        prior.insert(4, 1_i8);
        let result =
            detect_line_crossing(&line, &DetectionBatch::new(), &prior, Anchor::BottomCenter)
                .unwrap();
        assert!(result.crossed_in.is_empty());
        assert!(result.crossed_out.is_empty());
        assert_eq!(result.state, prior);
    }
}
