//! Thread-safe zone registry with snapshot-discipline evaluation.
//!
//! The registry lock is held only for map mutations and for copying the
//! enabled-zone references at the start of `evaluate`; detector and
//! counter work runs outside it. Counters and crossing trackers are
//! single-writer — only the inference task calls `evaluate` — so their
//! per-zone locks never contend.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;
use thiserror::Error;
use tracing::debug;

use cupertino_zone::{
    detect_line_crossing, detect_polygon, Anchor, CrossingTracker, DetectionBatch, LineZone,
    PolygonZone, ZoneCounter, ZoneError, ZoneStats,
};

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("zone '{0}' already exists")]
    DuplicateZone(String),

    #[error("zone '{0}' not found")]
    UnknownZone(String),

    #[error("cannot change zone '{id}' from {from} to {to}")]
    ZoneTypeMismatch {
        id: String,
        from: ZoneKind,
        to: ZoneKind,
    },

    #[error("unknown zone type '{0}' (expected polygon or line)")]
    UnknownZoneType(String),

    #[error("line zone needs exactly 2 points, got {0}")]
    LineEndpoints(usize),

    #[error("line zone '{0}' is missing its crossing tracker")]
    MissingTracker(String),

    #[error(transparent)]
    Zone(#[from] ZoneError),
}

// ── Shapes ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ZoneKind {
    Polygon,
    Line,
}

impl ZoneKind {
    pub fn parse(s: &str) -> Result<Self, RegistryError> {
        match s {
            "polygon" => Ok(Self::Polygon),
            "line" => Ok(Self::Line),
            other => Err(RegistryError::UnknownZoneType(other.to_string())),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Polygon => "polygon",
            Self::Line => "line",
        }
    }
}

impl fmt::Display for ZoneKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Tagged zone geometry. Polygon and line zones share nothing below the
/// registry boundary: different result types, different per-zone state.
#[derive(Debug, Clone)]
pub enum ZoneShape {
    Polygon(PolygonZone),
    Line(LineZone),
}

impl ZoneShape {
    pub fn kind(&self) -> ZoneKind {
        match self {
            Self::Polygon(_) => ZoneKind::Polygon,
            Self::Line(_) => ZoneKind::Line,
        }
    }

    /// Build a shape from command/config coordinates.
    pub fn from_coordinates(
        kind: ZoneKind,
        coordinates: &[(i64, i64)],
        frame_resolution_wh: (u32, u32),
    ) -> Result<Self, RegistryError> {
        match kind {
            ZoneKind::Polygon => Ok(Self::Polygon(PolygonZone::new(
                coordinates.to_vec(),
                frame_resolution_wh,
            )?)),
            ZoneKind::Line => {
                if coordinates.len() != 2 {
                    return Err(RegistryError::LineEndpoints(coordinates.len()));
                }
                let start = (coordinates[0].0 as f32, coordinates[0].1 as f32);
                let end = (coordinates[1].0 as f32, coordinates[1].1 as f32);
                Ok(Self::Line(LineZone::new(start, end)?))
            }
        }
    }

    fn coordinates(&self) -> Vec<(f64, f64)> {
        match self {
            Self::Polygon(zone) => zone
                .vertices()
                .iter()
                .map(|&(x, y)| (x as f64, y as f64))
                .collect(),
            Self::Line(zone) => {
                let (sx, sy) = zone.start();
                let (ex, ey) = zone.end();
                vec![(sx as f64, sy as f64), (ex as f64, ey as f64)]
            }
        }
    }
}

// ── Managed zones ─────────────────────────────────────────────────────────────

/// One zone under registry management: geometry plus its analytics state.
///
/// Never reassigned after construction — `update` replaces the registry
/// entry, and only the `enabled` flag mutates in place. That is what makes
/// the evaluate snapshot safe against concurrent remove/update.
pub struct ManagedZone {
    zone_id: String,
    shape: ZoneShape,
    counter: Mutex<ZoneCounter>,
    tracker: Option<Mutex<CrossingTracker>>,
    enabled: AtomicBool,
}

impl ManagedZone {
    fn new(zone_id: String, shape: ZoneShape, enabled: bool) -> Self {
        let tracker = match shape.kind() {
            ZoneKind::Line => Some(Mutex::new(CrossingTracker::new())),
            ZoneKind::Polygon => None,
        };
        Self {
            counter: Mutex::new(ZoneCounter::new(zone_id.clone())),
            zone_id,
            shape,
            tracker,
            enabled: AtomicBool::new(enabled),
        }
    }

    pub fn kind(&self) -> ZoneKind {
        self.shape.kind()
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }
}

/// Per-zone evaluation result for one frame.
#[derive(Debug, Clone)]
pub enum ZoneResult {
    Polygon {
        mask: Vec<bool>,
        stats: ZoneStats,
    },
    Line {
        crossed_in: Vec<bool>,
        crossed_out: Vec<bool>,
        stats: ZoneStats,
    },
}

impl ZoneResult {
    pub fn stats(&self) -> &ZoneStats {
        match self {
            Self::Polygon { stats, .. } | Self::Line { stats, .. } => stats,
        }
    }

    /// Published per-zone count: objects inside for polygons, crossings
    /// this frame (in + out) for lines.
    pub fn count(&self) -> u64 {
        match self {
            Self::Polygon { mask, .. } => mask.iter().filter(|&&m| m).count() as u64,
            Self::Line {
                crossed_in,
                crossed_out,
                ..
            } => {
                (crossed_in.iter().filter(|&&c| c).count()
                    + crossed_out.iter().filter(|&&c| c).count()) as u64
            }
        }
    }
}

/// Zone summary for introspection.
#[derive(Debug, Clone, Serialize)]
pub struct ZoneInfo {
    pub zone_type: ZoneKind,
    pub enabled: bool,
    pub coordinates: Vec<(f64, f64)>,
    pub stats: ZoneStats,
}

// ── Registry ──────────────────────────────────────────────────────────────────

/// Thread-safe collection of managed zones.
pub struct ZoneRegistry {
    zones: Mutex<HashMap<String, Arc<ManagedZone>>>,
    anchor: Anchor,
}

impl Default for ZoneRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ZoneRegistry {
    pub fn new() -> Self {
        Self::with_anchor(Anchor::default())
    }

    pub fn with_anchor(anchor: Anchor) -> Self {
        Self {
            zones: Mutex::new(HashMap::new()),
            anchor,
        }
    }

    pub fn add_polygon(&self, zone_id: &str, zone: PolygonZone) -> Result<(), RegistryError> {
        self.insert(zone_id, ZoneShape::Polygon(zone))
    }

    pub fn add_line(&self, zone_id: &str, zone: LineZone) -> Result<(), RegistryError> {
        self.insert(zone_id, ZoneShape::Line(zone))
    }

    pub fn add_shape(&self, zone_id: &str, shape: ZoneShape) -> Result<(), RegistryError> {
        self.insert(zone_id, shape)
    }

    fn insert(&self, zone_id: &str, shape: ZoneShape) -> Result<(), RegistryError> {
        let managed = Arc::new(ManagedZone::new(zone_id.to_string(), shape, true));
        let mut zones = self.zones.lock();
        if zones.contains_key(zone_id) {
            return Err(RegistryError::DuplicateZone(zone_id.to_string()));
        }
        debug!("registry: added {} zone '{zone_id}'", managed.kind());
        zones.insert(zone_id.to_string(), managed);
        Ok(())
    }

    pub fn remove(&self, zone_id: &str) -> Result<(), RegistryError> {
        let mut zones = self.zones.lock();
        zones
            .remove(zone_id)
            .map(|_| ())
            .ok_or_else(|| RegistryError::UnknownZone(zone_id.to_string()))
    }

    /// Replace a zone's geometry, resetting its counter and tracker while
    /// preserving the enabled flag. The new shape must keep the zone's kind.
    pub fn update(&self, zone_id: &str, shape: ZoneShape) -> Result<(), RegistryError> {
        let mut zones = self.zones.lock();
        let existing = zones
            .get(zone_id)
            .ok_or_else(|| RegistryError::UnknownZone(zone_id.to_string()))?;
        if existing.kind() != shape.kind() {
            return Err(RegistryError::ZoneTypeMismatch {
                id: zone_id.to_string(),
                from: existing.kind(),
                to: shape.kind(),
            });
        }
        let enabled = existing.is_enabled();
        zones.insert(
            zone_id.to_string(),
            Arc::new(ManagedZone::new(zone_id.to_string(), shape, enabled)),
        );
        Ok(())
    }

    pub fn enable(&self, zone_id: &str) -> Result<(), RegistryError> {
        self.set_enabled(zone_id, true)
    }

    pub fn disable(&self, zone_id: &str) -> Result<(), RegistryError> {
        self.set_enabled(zone_id, false)
    }

    fn set_enabled(&self, zone_id: &str, enabled: bool) -> Result<(), RegistryError> {
        let zones = self.zones.lock();
        let zone = zones
            .get(zone_id)
            .ok_or_else(|| RegistryError::UnknownZone(zone_id.to_string()))?;
        zone.enabled.store(enabled, Ordering::Relaxed);
        Ok(())
    }

    /// Evaluate every enabled zone against one detection batch.
    ///
    /// Called from exactly one task (the inference task); the counters and
    /// trackers inside managed zones inherit that single-writer guarantee.
    pub fn evaluate(
        &self,
        batch: &DetectionBatch,
        class_names: &HashMap<u32, String>,
    ) -> Result<HashMap<String, ZoneResult>, RegistryError> {
        // Snapshot under the lock, process outside it.
        let snapshot: Vec<Arc<ManagedZone>> = {
            let zones = self.zones.lock();
            zones
                .values()
                .filter(|zone| zone.is_enabled())
                .cloned()
                .collect()
        };

        let mut results = HashMap::with_capacity(snapshot.len());
        for managed in snapshot {
            match &managed.shape {
                ZoneShape::Polygon(zone) => {
                    let mask = detect_polygon(zone, batch, self.anchor);
                    let mut counter = managed.counter.lock();
                    counter.update_polygon(&mask, batch, class_names);
                    let stats = counter.snapshot();
                    drop(counter);
                    results.insert(managed.zone_id.clone(), ZoneResult::Polygon { mask, stats });
                }
                ZoneShape::Line(zone) => {
                    let tracker = managed
                        .tracker
                        .as_ref()
                        .ok_or_else(|| RegistryError::MissingTracker(managed.zone_id.clone()))?;
                    let crossing = {
                        let mut tracker = tracker.lock();
                        let crossing =
                            detect_line_crossing(zone, batch, tracker.state(), self.anchor)?;
                        tracker.set_state(crossing.state.clone());
                        crossing
                    };
                    let mut counter = managed.counter.lock();
                    counter.update_line(
                        &crossing.crossed_in,
                        &crossing.crossed_out,
                        batch,
                        class_names,
                    );
                    let stats = counter.snapshot();
                    drop(counter);
                    results.insert(
                        managed.zone_id.clone(),
                        ZoneResult::Line {
                            crossed_in: crossing.crossed_in,
                            crossed_out: crossing.crossed_out,
                            stats,
                        },
                    );
                }
            }
        }
        Ok(results)
    }

    /// Drop line-side memory for trackers that left the scene.
    pub fn prune_trackers(&self, active_tracker_ids: &HashSet<u32>) {
        let snapshot: Vec<Arc<ManagedZone>> = {
            let zones = self.zones.lock();
            zones.values().cloned().collect()
        };
        for managed in snapshot {
            if let Some(tracker) = &managed.tracker {
                tracker.lock().prune(active_tracker_ids);
            }
        }
    }

    /// Snapshot of zone id → enabled.
    pub fn list(&self) -> BTreeMap<String, bool> {
        let zones = self.zones.lock();
        zones
            .iter()
            .map(|(id, zone)| (id.clone(), zone.is_enabled()))
            .collect()
    }

    pub fn info(&self, zone_id: &str) -> Result<ZoneInfo, RegistryError> {
        let zones = self.zones.lock();
        let zone = zones
            .get(zone_id)
            .ok_or_else(|| RegistryError::UnknownZone(zone_id.to_string()))?;
        let result = Ok(ZoneInfo {
            zone_type: zone.kind(),
            enabled: zone.is_enabled(),
            coordinates: zone.shape.coordinates(),
            stats: zone.counter.lock().snapshot(),
        });
        result
    }

    pub fn stats(&self, zone_id: &str) -> Result<ZoneStats, RegistryError> {
        let zones = self.zones.lock();
        let zone = zones
            .get(zone_id)
            .ok_or_else(|| RegistryError::UnknownZone(zone_id.to_string()))?;
        let result = Ok(zone.counter.lock().snapshot());
        result
    }

    pub fn clear(&self) {
        self.zones.lock().clear();
    }

    pub fn count(&self) -> usize {
        self.zones.lock().len()
    }
}
