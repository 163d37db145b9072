//! Per-zone statistics accumulator and its immutable snapshot.

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};

use crate::DetectionBatch;

/// Immutable statistics snapshot for a zone.
///
/// Emitted per frame and per query; never mutated after emission, so it can
/// cross task boundaries and be serialized onto the bus as-is.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ZoneStats {
    pub zone_id: String,
    /// Objects currently inside (polygon zones; rebuilt every frame).
    pub current_count: u64,
    /// Cumulative "in" crossings (line zones).
    pub total_entered: u64,
    /// Cumulative "out" crossings (line zones).
    pub total_exited: u64,
    /// Class-name histogram. Polygon zones rebuild it per frame; line zones
    /// accumulate `<class>_IN` / `<class>_OUT` keys.
    pub classwise_counts: BTreeMap<String, u64>,
}

/// Mutable per-zone accumulator.
///
/// Single-writer by contract: only the evaluator (inference task) calls the
/// update methods. Snapshots are safe to hand to any reader.
#[derive(Debug)]
pub struct ZoneCounter {
    zone_id: String,
    current_count: u64,
    total_entered: u64,
    total_exited: u64,
    classwise_counts: BTreeMap<String, u64>,
}

impl ZoneCounter {
    pub fn new(zone_id: impl Into<String>) -> Self {
        Self {
            zone_id: zone_id.into(),
            current_count: 0,
            total_entered: 0,
            total_exited: 0,
            classwise_counts: BTreeMap::new(),
        }
    }

    /// Presence counting for polygon zones: replace the current count and
    /// rebuild the per-frame class histogram from the masked subset.
    pub fn update_polygon(
        &mut self,
        mask: &[bool],
        batch: &DetectionBatch,
        class_names: &HashMap<u32, String>,
    ) {
        self.current_count = mask.iter().filter(|&&inside| inside).count() as u64;
        self.classwise_counts.clear();

        for (idx, &inside) in mask.iter().enumerate() {
            if !inside {
                continue;
            }
            if let Some(detection) = batch.get(idx) {
                let label = class_label(class_names, detection.class_id);
                *self.classwise_counts.entry(label).or_insert(0) += 1;
            }
        }
    }

    /// Crossing counting for line zones: accumulate totals and directional
    /// class counts.
    pub fn update_line(
        &mut self,
        crossed_in: &[bool],
        crossed_out: &[bool],
        batch: &DetectionBatch,
        class_names: &HashMap<u32, String>,
    ) {
        self.total_entered += crossed_in.iter().filter(|&&c| c).count() as u64;
        self.total_exited += crossed_out.iter().filter(|&&c| c).count() as u64;

        for (idx, &crossed) in crossed_in.iter().enumerate() {
            if !crossed {
                continue;
            }
            if let Some(detection) = batch.get(idx) {
                let label = format!("{}_IN", class_label(class_names, detection.class_id));
                *self.classwise_counts.entry(label).or_insert(0) += 1;
            }
        }
        for (idx, &crossed) in crossed_out.iter().enumerate() {
            if !crossed {
                continue;
            }
            if let Some(detection) = batch.get(idx) {
                let label = format!("{}_OUT", class_label(class_names, detection.class_id));
                *self.classwise_counts.entry(label).or_insert(0) += 1;
            }
        }
    }

    pub fn snapshot(&self) -> ZoneStats {
        ZoneStats {
            zone_id: self.zone_id.clone(),
            current_count: self.current_count,
            total_entered: self.total_entered,
            total_exited: self.total_exited,
            classwise_counts: self.classwise_counts.clone(),
        }
    }

    pub fn reset(&mut self) {
        self.current_count = 0;
        self.total_entered = 0;
        self.total_exited = 0;
        self.classwise_counts.clear();
    }
}

fn class_label(class_names: &HashMap<u32, String>, class_id: u32) -> String {
    class_names
        .get(&class_id)
        .cloned()
        .unwrap_or_else(|| format!("class_{class_id}"))
}
