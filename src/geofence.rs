//! Geofence engine: point-in-polygon containment and S2 cell covering.
//!
//! A geofence is a named multi-polygon. Containment uses an even-odd
//! ray-cast over the exact polygon edges; area coverage goes through an S2
//! region covering of the fence's bounding rect, with every candidate cell
//! re-tested against the exact polygons because the covering
//! over-approximates. Callers treat the result as candidate area, not as an
//! exact mask.

use log::warn;
use s2::cell::Cell;
use s2::latlng::LatLng;
use s2::rect::Rect;
use s2::region::RegionCoverer;
use s2::s1::Deg;
use serde::{Deserialize, Serialize};

use crate::{Bounds, Coordinate};

/// Even-odd ray-cast containment test for a single polygon ring.
///
/// The ring is an ordered vertex list; the closing edge back to the first
/// vertex is implicit. Vertex-exact and boundary results are unspecified
/// (either side), consistently across the crate.
pub fn in_polygon(ring: &[Coordinate], lat: f64, lng: f64) -> bool {
    let n = ring.len();
    if n < 3 {
        return false;
    }

    let mut inside = false;
    let mut j = n - 1;
    for i in 0..n {
        let vi = ring[i];
        let vj = ring[j];
        if (vi.longitude > lng) != (vj.longitude > lng) {
            // A zero-span edge can never satisfy the toggle condition; the
            // guard keeps the division defined for degenerate rings.
            let span = vj.longitude - vi.longitude;
            if span != 0.0 {
                let intersect =
                    (vj.latitude - vi.latitude) * (lng - vi.longitude) / span + vi.latitude;
                if lat < intersect {
                    inside = !inside;
                }
            }
        }
        j = i;
    }
    inside
}

/// True if any member polygon contains the point.
pub fn in_multi_polygon(polygons: &[Vec<Coordinate>], lat: f64, lng: f64) -> bool {
    polygons.iter().any(|ring| in_polygon(ring, lat, lng))
}

/// S2 covering bounds for a geofence.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CoverageConfig {
    /// Minimum S2 cell level of the covering.
    pub min_level: u8,
    /// Maximum S2 cell level of the covering.
    pub max_level: u8,
    /// Upper bound on the number of covering cells requested.
    pub max_cells: usize,
}

impl Default for CoverageConfig {
    fn default() -> Self {
        // Level 15 cells are ~250m across, matching one scan radius.
        Self {
            min_level: 15,
            max_level: 15,
            max_cells: 2048,
        }
    }
}

impl CoverageConfig {
    /// Covering at a single fixed level.
    pub fn at_level(level: u8, max_cells: usize) -> Self {
        Self {
            min_level: level,
            max_level: level,
            max_cells,
        }
    }
}

/// A named multi-polygon geofence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Geofence {
    name: String,
    polygons: Vec<Vec<Coordinate>>,
}

impl Geofence {
    /// Create a geofence from raw polygon vertex lists.
    ///
    /// Rings with fewer than three vertices carry no area and are dropped
    /// with a warning; self-intersecting input is accepted as-is (upstream
    /// validation's problem) and yields even-odd semantics.
    pub fn new(name: impl Into<String>, polygons: Vec<Vec<Coordinate>>) -> Self {
        let name = name.into();
        let (kept, dropped): (Vec<_>, Vec<_>) = polygons.into_iter().partition(|p| p.len() >= 3);
        if !dropped.is_empty() {
            warn!(
                "[Geofence] '{}': dropped {} ring(s) with fewer than 3 vertices",
                name,
                dropped.len()
            );
        }
        Self {
            name,
            polygons: kept,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn polygons(&self) -> &[Vec<Coordinate>] {
        &self.polygons
    }

    pub fn is_empty(&self) -> bool {
        self.polygons.is_empty()
    }

    /// True if any member polygon contains the point.
    pub fn contains(&self, lat: f64, lng: f64) -> bool {
        in_multi_polygon(&self.polygons, lat, lng)
    }

    /// Bounding box over all member polygons.
    pub fn bounds(&self) -> Option<Bounds> {
        let all: Vec<Coordinate> = self.polygons.iter().flatten().copied().collect();
        crate::geo_utils::compute_bounds(&all)
    }

    /// S2 cells covering the fence, as 64-bit cell ids.
    ///
    /// The covering is seeded from the bounding rect and then each
    /// candidate cell is kept if **any** of its four corner vertices lies
    /// inside the exact polygons; boundary cells are over-included rather
    /// than risking missed coverage.
    pub fn cell_coverage(&self, config: &CoverageConfig) -> Vec<u64> {
        self.retained_cells(config)
            .into_iter()
            .map(|cell| cell.id.0)
            .collect()
    }

    /// Scan coordinates for the fence: the centers of its covering cells,
    /// sorted latitude-then-longitude so the set is deterministic across
    /// rebuilds.
    pub fn scan_coordinates(&self, config: &CoverageConfig) -> Vec<Coordinate> {
        let mut coords: Vec<Coordinate> = self
            .retained_cells(config)
            .into_iter()
            .map(|cell| {
                let center = LatLng::from(&cell.center());
                Coordinate::new(center.lat.deg(), center.lng.deg())
            })
            .collect();
        coords.sort_by(|a, b| a.total_cmp(b));
        coords
    }

    fn retained_cells(&self, config: &CoverageConfig) -> Vec<Cell> {
        let bounds = match self.bounds() {
            Some(b) => b,
            None => return Vec::new(),
        };

        let lo = LatLng::new(Deg(bounds.min_lat).into(), Deg(bounds.min_lng).into());
        let hi = LatLng::new(Deg(bounds.max_lat).into(), Deg(bounds.max_lng).into());
        let rect = Rect::from(lo).union(&Rect::from(hi));

        let coverer = RegionCoverer {
            min_level: config.min_level,
            max_level: config.max_level,
            level_mod: 1,
            max_cells: config.max_cells,
        };

        coverer
            .covering(&rect)
            .0
            .iter()
            .map(Cell::from)
            .filter(|cell| {
                (0..4).any(|k| {
                    let vertex = LatLng::from(&cell.vertex(k));
                    self.contains(vertex.lat.deg(), vertex.lng.deg())
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn square() -> Vec<Coordinate> {
        vec![
            Coordinate::new(0.0, 0.0),
            Coordinate::new(0.0, 10.0),
            Coordinate::new(10.0, 10.0),
            Coordinate::new(10.0, 0.0),
        ]
    }

    #[test]
    fn test_in_polygon_square() {
        let ring = square();
        assert!(in_polygon(&ring, 5.0, 5.0));
        assert!(!in_polygon(&ring, 15.0, 15.0));
        assert!(!in_polygon(&ring, -5.0, 5.0));
        assert!(!in_polygon(&ring, 5.0, -5.0));
    }

    #[test]
    fn test_in_polygon_degenerate() {
        assert!(!in_polygon(&[], 5.0, 5.0));
        let line = vec![Coordinate::new(0.0, 0.0), Coordinate::new(10.0, 10.0)];
        assert!(!in_polygon(&line, 5.0, 5.0));
    }

    #[test]
    fn test_in_polygon_concave() {
        // L-shape: the notch around (7, 7) is outside
        let ring = vec![
            Coordinate::new(0.0, 0.0),
            Coordinate::new(0.0, 10.0),
            Coordinate::new(5.0, 10.0),
            Coordinate::new(5.0, 5.0),
            Coordinate::new(10.0, 5.0),
            Coordinate::new(10.0, 0.0),
        ];
        assert!(in_polygon(&ring, 2.0, 8.0));
        assert!(in_polygon(&ring, 8.0, 2.0));
        assert!(!in_polygon(&ring, 8.0, 8.0));
    }

    #[test]
    fn test_in_multi_polygon() {
        let far = vec![
            Coordinate::new(20.0, 20.0),
            Coordinate::new(20.0, 30.0),
            Coordinate::new(30.0, 30.0),
            Coordinate::new(30.0, 20.0),
        ];
        let polygons = vec![square(), far];
        assert!(in_multi_polygon(&polygons, 5.0, 5.0));
        assert!(in_multi_polygon(&polygons, 25.0, 25.0));
        assert!(!in_multi_polygon(&polygons, 15.0, 15.0));
    }

    #[test]
    fn test_geofence_drops_degenerate_rings() {
        let fence = Geofence::new(
            "test",
            vec![square(), vec![Coordinate::new(0.0, 0.0)]],
        );
        assert_eq!(fence.polygons().len(), 1);
        assert!(!fence.is_empty());

        let empty = Geofence::new("empty", vec![]);
        assert!(empty.is_empty());
        assert!(empty.bounds().is_none());
        assert!(empty.cell_coverage(&CoverageConfig::default()).is_empty());
        assert!(empty
            .scan_coordinates(&CoverageConfig::default())
            .is_empty());
    }

    #[test]
    fn test_cell_coverage_small_fence() {
        // ~1km square around central London
        let fence = Geofence::new(
            "london",
            vec![vec![
                Coordinate::new(51.500, -0.130),
                Coordinate::new(51.500, -0.120),
                Coordinate::new(51.510, -0.120),
                Coordinate::new(51.510, -0.130),
            ]],
        );
        let config = CoverageConfig::at_level(15, 1024);
        let cells = fence.cell_coverage(&config);
        assert!(!cells.is_empty());

        let coords = fence.scan_coordinates(&config);
        assert_eq!(coords.len(), cells.len());
        // Deterministic ordering
        for pair in coords.windows(2) {
            assert_ne!(pair[0].total_cmp(&pair[1]), std::cmp::Ordering::Greater);
        }
        // Over-inclusion is allowed, but the covering must hit the fence
        assert!(coords.iter().any(|c| fence.contains(c.latitude, c.longitude)));
    }

    #[test]
    fn test_scan_coordinates_stable_across_calls() {
        let fence = Geofence::new(
            "stable",
            vec![vec![
                Coordinate::new(51.500, -0.130),
                Coordinate::new(51.500, -0.125),
                Coordinate::new(51.505, -0.125),
                Coordinate::new(51.505, -0.130),
            ]],
        );
        let config = CoverageConfig::default();
        assert_eq!(
            fence.scan_coordinates(&config),
            fence.scan_coordinates(&config)
        );
    }
}
