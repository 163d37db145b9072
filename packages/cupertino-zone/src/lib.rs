//! # cupertino-zone
//!
//! Zone geometry and analytics for the Cupertino stream processor.
//!
//! These types are used by:
//! - `cupertino-processor`: per-frame zone evaluation in the inference path
//! - `cupertino-mqtt`: zone statistics snapshots carried in zone-event envelopes
//!
//! ## Layering
//!
//! - **Geometry** ([`PolygonZone`], [`LineZone`]): immutable shapes with O(1)
//!   spatial predicates. Safe to share across tasks without locking.
//! - **Detection** ([`detector`]): stateless functions applying geometry to a
//!   [`DetectionBatch`]. External state (line-side memory) is injected and
//!   returned, never mutated in place.
//! - **Analytics** ([`ZoneCounter`], [`CrossingTracker`]): per-zone mutable
//!   accumulators. Single-writer by contract — only the inference task
//!   touches them.
//!
//! ## Crossing convention
//!
//! A tracker moving onto the +1 ("left") side of a line counts as an "in"
//! crossing, onto the -1 side as "out". Swap a line's start and end points
//! to invert the convention for a given zone.

mod counter;
mod detections;
pub mod detector;
mod geometry;
mod tracker;

pub use counter::{ZoneCounter, ZoneStats};
pub use detections::{Anchor, BoundingBox, Detection, DetectionBatch};
pub use detector::{detect_line_crossing, detect_polygon, LineCrossing};
pub use geometry::{LineZone, PolygonZone};
pub use tracker::CrossingTracker;

use thiserror::Error;

/// Errors raised by zone construction and detection.
#[derive(Debug, Error)]
pub enum ZoneError {
    /// Polygon zones need at least three vertices to enclose an area.
    #[error("polygon must have at least 3 vertices, got {0}")]
    TooFewVertices(usize),

    /// Frame resolution must be positive in both dimensions.
    #[error("frame resolution must be positive, got {0}x{1}")]
    InvalidResolution(u32, u32),

    /// Line start and end must be distinct points.
    #[error("line start and end must be different points")]
    DegenerateLine,

    /// Line crossing detection needs a tracker id on every detection.
    #[error("line crossing detection requires tracker ids (is the batch tracked?)")]
    MissingTrackerId,
}
