//! Detection batch handed from the detector + tracker to zone evaluation.

use std::collections::HashSet;

/// Bounding box in absolute pixels, origin at the top-left of the frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl BoundingBox {
    pub fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Representative point of the box for zone queries.
    pub fn anchor(&self, anchor: Anchor) -> (f32, f32) {
        let cx = self.x + self.width / 2.0;
        match anchor {
            Anchor::BottomCenter => (cx, self.y + self.height),
            Anchor::Center => (cx, self.y + self.height / 2.0),
            Anchor::TopCenter => (cx, self.y),
        }
    }
}

/// Which point of a bounding box is tested against zones.
///
/// Bottom-center approximates the ground contact point of an object and is
/// the default for overhead and street-level cameras alike.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Anchor {
    #[default]
    BottomCenter,
    Center,
    TopCenter,
}

/// One detection, optionally carrying a persistent tracker id.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Detection {
    pub bbox: BoundingBox,
    pub class_id: u32,
    pub confidence: f32,
    pub tracker_id: Option<u32>,
}

/// Ordered detections for a single frame.
#[derive(Debug, Clone, Default)]
pub struct DetectionBatch {
    detections: Vec<Detection>,
}

impl DetectionBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_detections(detections: Vec<Detection>) -> Self {
        Self { detections }
    }

    pub fn push(&mut self, detection: Detection) {
        self.detections.push(detection);
    }

    pub fn len(&self) -> usize {
        self.detections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.detections.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Detection> {
        self.detections.iter()
    }

    pub fn get(&self, index: usize) -> Option<&Detection> {
        self.detections.get(index)
    }

    /// Anchor point of every detection, in batch order.
    pub fn anchor_points(&self, anchor: Anchor) -> Vec<(f32, f32)> {
        self.detections
            .iter()
            .map(|d| d.bbox.anchor(anchor))
            .collect()
    }

    /// Tracker ids present in this batch, for pruning side memory.
    pub fn active_tracker_ids(&self) -> HashSet<u32> {
        self.detections
            .iter()
            .filter_map(|d| d.tracker_id)
            .collect()
    }
}
