//! Immutable zone shapes: mask-based polygons and cross-product lines.

use crate::ZoneError;

// ── Polygon ───────────────────────────────────────────────────────────────────

/// Immutable polygon zone with a rasterized interior mask.
///
/// The mask is built once at construction (scanline even-odd fill plus a
/// boundary pass so edges and vertices land inside), making [`contains`]
/// a single bounds-checked lookup.
///
/// Self-intersecting polygons are accepted; their interior follows the
/// even-odd rule.
///
/// [`contains`]: PolygonZone::contains
#[derive(Debug, Clone)]
pub struct PolygonZone {
    vertices: Vec<(i64, i64)>,
    frame_resolution_wh: (u32, u32),
    mask: Vec<bool>,
}

impl PolygonZone {
    pub fn new(
        vertices: Vec<(i64, i64)>,
        frame_resolution_wh: (u32, u32),
    ) -> Result<Self, ZoneError> {
        if vertices.len() < 3 {
            return Err(ZoneError::TooFewVertices(vertices.len()));
        }
        let (width, height) = frame_resolution_wh;
        if width == 0 || height == 0 {
            return Err(ZoneError::InvalidResolution(width, height));
        }

        let mask = rasterize(&vertices, width, height);
        Ok(Self {
            vertices,
            frame_resolution_wh,
            mask,
        })
    }

    pub fn vertices(&self) -> &[(i64, i64)] {
        &self.vertices
    }

    /// (width, height) the mask was rasterized against.
    pub fn frame_resolution(&self) -> (u32, u32) {
        self.frame_resolution_wh
    }

    /// O(1) point-in-polygon via mask lookup.
    ///
    /// Coordinates are truncated to integers; points outside the frame
    /// bounds are outside the zone.
    pub fn contains(&self, x: f32, y: f32) -> bool {
        let (width, height) = self.frame_resolution_wh;
        let xi = x.trunc() as i64;
        let yi = y.trunc() as i64;
        if xi < 0 || yi < 0 || xi >= width as i64 || yi >= height as i64 {
            return false;
        }
        self.mask[(yi * width as i64 + xi) as usize]
    }
}

/// Scanline even-odd fill with a half-open edge rule, then a boundary
/// pass: polygon edges themselves are part of the zone.
fn rasterize(vertices: &[(i64, i64)], width: u32, height: u32) -> Vec<bool> {
    let w = width as i64;
    let h = height as i64;
    let mut mask = vec![false; (width as usize) * (height as usize)];

    for y in 0..h {
        let mut crossings: Vec<f64> = Vec::new();
        for i in 0..vertices.len() {
            let (x1, y1) = vertices[i];
            let (x2, y2) = vertices[(i + 1) % vertices.len()];
            if y1 == y2 {
                continue;
            }
            // Half-open rule: each scanline intersects an edge at most once,
            // so shared vertices are not double counted.
            if y >= y1.min(y2) && y < y1.max(y2) {
                let t = (y - y1) as f64 / (y2 - y1) as f64;
                crossings.push(x1 as f64 + t * (x2 - x1) as f64);
            }
        }
        crossings.sort_by(|a, b| a.total_cmp(b));
        for span in crossings.chunks_exact(2) {
            let x_start = span[0].ceil().max(0.0) as i64;
            let x_end = span[1].floor().min((w - 1) as f64) as i64;
            for x in x_start..=x_end {
                mask[(y * w + x) as usize] = true;
            }
        }
    }

    for i in 0..vertices.len() {
        plot_segment(
            vertices[i],
            vertices[(i + 1) % vertices.len()],
            &mut mask,
            w,
            h,
        );
    }

    mask
}

/// Bresenham segment plot, clipped to the frame.
fn plot_segment(a: (i64, i64), b: (i64, i64), mask: &mut [bool], w: i64, h: i64) {
    let (mut x, mut y) = a;
    let (x_end, y_end) = b;
    let dx = (x_end - x).abs();
    let dy = -(y_end - y).abs();
    let sx = if x < x_end { 1 } else { -1 };
    let sy = if y < y_end { 1 } else { -1 };
    let mut err = dx + dy;

    loop {
        if x >= 0 && x < w && y >= 0 && y < h {
            mask[(y * w + x) as usize] = true;
        }
        if x == x_end && y == y_end {
            break;
        }
        let e2 = 2 * err;
        if e2 >= dy {
            err += dy;
            x += sx;
        }
        if e2 <= dx {
            err += dx;
            y += sy;
        }
    }
}

// ── Line ──────────────────────────────────────────────────────────────────────

/// Immutable line segment for directional crossing detection.
///
/// [`side`] classifies a point by the sign of the 2D cross product
/// `(end - start) × (point - start)`: +1 left, -1 right, 0 on the line.
/// A move onto the +1 side counts as an "in" crossing downstream; swap
/// start and end to invert the convention.
///
/// [`side`]: LineZone::side
#[derive(Debug, Clone, Copy)]
pub struct LineZone {
    start: (f32, f32),
    end: (f32, f32),
    vector: (f32, f32),
}

impl LineZone {
    pub fn new(start: (f32, f32), end: (f32, f32)) -> Result<Self, ZoneError> {
        if start == end {
            return Err(ZoneError::DegenerateLine);
        }
        Ok(Self {
            start,
            end,
            vector: (end.0 - start.0, end.1 - start.1),
        })
    }

    pub fn start(&self) -> (f32, f32) {
        self.start
    }

    pub fn end(&self) -> (f32, f32) {
        self.end
    }

    /// Side of the infinite line through start→end: +1, -1, or 0.
    ///
    /// Coordinates are screen-space (y grows downward), so +1 is the
    /// visual left of the direction of travel: for a left-to-right
    /// horizontal line, points above it.
    pub fn side(&self, x: f32, y: f32) -> i8 {
        let cross = f64::from(self.vector.1) * f64::from(x - self.start.0)
            - f64::from(self.vector.0) * f64::from(y - self.start.1);
        if cross > 0.0 {
            1
        } else if cross < 0.0 {
            -1
        } else {
            0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn square_100() -> PolygonZone {
        PolygonZone::new(vec![(10, 10), (90, 10), (90, 90), (10, 90)], (100, 100)).unwrap()
    }

    #[test]
    fn polygon_rejects_too_few_vertices() {
        let err = PolygonZone::new(vec![(0, 0), (10, 10)], (100, 100)).unwrap_err();
        assert!(matches!(err, ZoneError::TooFewVertices(2)));
    }

    #[test]
    fn polygon_rejects_zero_resolution() {
        let err = PolygonZone::new(vec![(0, 0), (10, 0), (10, 10)], (100, 0)).unwrap_err();
        assert!(matches!(err, ZoneError::InvalidResolution(100, 0)));
    }

    #[test]
    fn polygon_contains_interior_point() {
        let zone = square_100();
        assert!(zone.contains(50.0, 80.0));
        assert!(zone.contains(50.0, 50.0));
    }

    #[test]
    fn polygon_excludes_exterior_point() {
        let zone = square_100();
        assert!(!zone.contains(5.0, 5.0));
        assert!(!zone.contains(95.0, 50.0));
    }

    #[test]
    fn polygon_excludes_out_of_frame_points() {
        let zone = square_100();
        assert!(!zone.contains(-1.0, 50.0));
        assert!(!zone.contains(50.0, 100.0));
        assert!(!zone.contains(1000.0, 1000.0));
    }

    #[test]
    fn polygon_boundary_is_inside() {
        let zone = square_100();
        // Vertices and edge midpoints sit on the mask.
        assert!(zone.contains(10.0, 10.0));
        assert!(zone.contains(90.0, 90.0));
        assert!(zone.contains(50.0, 10.0));
        assert!(zone.contains(10.0, 50.0));
    }

    #[test]
    fn polygon_mask_agrees_with_contains() {
        // Every point reported inside must be within the frame; spot-check a
        // grid against a triangle's analytic half-plane interior.
        let zone =
            PolygonZone::new(vec![(0, 0), (40, 0), (0, 40)], (50, 50)).unwrap();
        for y in 0..50 {
            for x in 0..50 {
                let inside = zone.contains(x as f32, y as f32);
                let analytic = x + y <= 40;
                if inside {
                    // The rasterized interior never leaks outside the
                    // analytic triangle.
                    assert!(analytic, "({x},{y}) marked inside but outside triangle");
                }
            }
        }
        // Deep interior points are always inside.
        assert!(zone.contains(5.0, 5.0));
        assert!(zone.contains(10.0, 20.0));
    }

    #[test]
    fn line_rejects_degenerate_segment() {
        let err = LineZone::new((5.0, 5.0), (5.0, 5.0)).unwrap_err();
        assert!(matches!(err, ZoneError::DegenerateLine));
    }

    #[test]
    fn line_endpoints_are_on_the_line() {
        let line = LineZone::new((0.0, 50.0), (100.0, 50.0)).unwrap();
        assert_eq!(line.side(0.0, 50.0), 0);
        assert_eq!(line.side(100.0, 50.0), 0);
        assert_eq!(line.side(37.0, 50.0), 0);
    }

    #[test]
    fn line_sides_are_opposite_across_the_line() {
        let line = LineZone::new((0.0, 50.0), (100.0, 50.0)).unwrap();
        let below = line.side(50.0, 70.0);
        let above = line.side(50.0, 30.0);
        assert_eq!(below, -1);
        assert_eq!(above, 1);
        assert!(i32::from(below) * i32::from(above) < 0);
    }

    #[test]
    fn line_side_sign_matches_segment_crossing() {
        let line = LineZone::new((10.0, 0.0), (10.0, 100.0)).unwrap();
        // Segment p→q crosses the infinite line iff the side signs differ.
        let p = line.side(5.0, 20.0);
        let q = line.side(15.0, 20.0);
        assert!(i32::from(p) * i32::from(q) < 0);

        let r = line.side(12.0, 80.0);
        assert!(i32::from(q) * i32::from(r) > 0);
    }
}
