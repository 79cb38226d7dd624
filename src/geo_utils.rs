//! Spherical geometry helpers shared by the geofence engine, route
//! optimizer, and cooldown calculator.
//!
//! Distances use the spherical law of cosines rather than Haversine: the
//! cooldown model and route metric are specified against that exact
//! formula, and the precision difference only matters below the metre
//! scale for the distances this system sees.

use crate::{Bounds, Coordinate};

/// Mean Earth radius in meters.
pub const EARTH_RADIUS_M: f64 = 6_371_000.0;

/// Great-circle distance between two coordinates in meters.
///
/// Spherical law of cosines:
/// `acos(sin φ1 · sin φ2 + cos φ1 · cos φ2 · cos Δλ) × R`.
///
/// The cosine argument is clamped to [-1, 1]; floating-point noise pushes
/// it fractionally outside for coincident points, where the distance is 0.
///
/// # Example
/// ```
/// use scan_dispatch::Coordinate;
/// use scan_dispatch::geo_utils::great_circle_distance;
///
/// let london = Coordinate::new(51.5074, -0.1278);
/// let paris = Coordinate::new(48.8566, 2.3522);
/// let d = great_circle_distance(&london, &paris);
/// assert!(d > 330_000.0 && d < 360_000.0);
/// ```
pub fn great_circle_distance(a: &Coordinate, b: &Coordinate) -> f64 {
    let lat1 = a.latitude.to_radians();
    let lat2 = b.latitude.to_radians();
    let delta_lng = (b.longitude - a.longitude).to_radians();

    let cos_angle = lat1.sin() * lat2.sin() + lat1.cos() * lat2.cos() * delta_lng.cos();
    cos_angle.clamp(-1.0, 1.0).acos() * EARTH_RADIUS_M
}

/// Total distance along a path in meters.
pub fn polyline_length(coords: &[Coordinate]) -> f64 {
    if coords.len() < 2 {
        return 0.0;
    }
    coords
        .windows(2)
        .map(|pair| great_circle_distance(&pair[0], &pair[1]))
        .sum()
}

/// Length of a closed tour (the path plus the wrap edge back to the start).
pub fn tour_length(coords: &[Coordinate]) -> f64 {
    if coords.len() < 2 {
        return 0.0;
    }
    polyline_length(coords) + great_circle_distance(&coords[coords.len() - 1], &coords[0])
}

/// Bounding box for a coordinate set. Empty input yields `None`.
pub fn compute_bounds(coords: &[Coordinate]) -> Option<Bounds> {
    Bounds::from_coordinates(coords)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_distance_same_point() {
        let p = Coordinate::new(36.1, -115.1);
        assert_eq!(great_circle_distance(&p, &p), 0.0);
    }

    #[test]
    fn test_distance_known_pair() {
        // Las Vegas to Los Angeles, ~370 km
        let lv = Coordinate::new(36.17, -115.14);
        let la = Coordinate::new(34.05, -118.24);
        let d = great_circle_distance(&lv, &la);
        assert!(d > 350_000.0 && d < 400_000.0, "LV to LA ~370km, got {}", d);
    }

    #[test]
    fn test_distance_symmetric() {
        let a = Coordinate::new(51.5074, -0.1278);
        let b = Coordinate::new(48.8566, 2.3522);
        assert_eq!(great_circle_distance(&a, &b), great_circle_distance(&b, &a));
    }

    #[test]
    fn test_polyline_length() {
        let coords: Vec<Coordinate> = (0..5)
            .map(|i| Coordinate::new(51.5 + i as f64 * 0.001, -0.1278))
            .collect();
        let len = polyline_length(&coords);
        // 4 segments of ~111m each
        assert!(len > 400.0 && len < 500.0, "got {}", len);

        assert_eq!(polyline_length(&coords[..1]), 0.0);
    }

    #[test]
    fn test_tour_length_includes_wrap_edge() {
        let coords = vec![
            Coordinate::new(51.5, -0.1),
            Coordinate::new(51.6, -0.1),
            Coordinate::new(51.6, -0.2),
        ];
        let open = polyline_length(&coords);
        let closed = tour_length(&coords);
        assert!(closed > open);
    }
}
