//! # Geographic Utilities
//!
//! Distance computations used by the ride engine and the location adapter.
//!
//! | Function | Description |
//! |----------|-------------|
//! | [`haversine_distance`] | Great-circle distance between two positions |
//! | [`polyline_length`] | Unrounded length of a trail in meters |
//! | [`trail_distance_meters`] | Trail length rounded once to whole meters |
//! | [`has_moved_significantly`] | Cheap lat/lng delta movement test |
//!
//! ## Example
//!
//! ```rust
//! use ride_tracker::{geo_utils, RoutePoint};
//!
//! let trail = vec![
//!     RoutePoint::new(-23.5505, -46.6333, 0),
//!     RoutePoint::new(-23.5510, -46.6340, 5_000),
//! ];
//! let meters = geo_utils::trail_distance_meters(&trail);
//! assert!(meters > 80 && meters < 100);
//! ```
//!
//! ## Haversine Formula
//!
//! Distances assume a spherical Earth with radius 6,371,000 m. Segment
//! lengths are summed as floats and rounded a single time, so long trails
//! do not accumulate per-segment rounding bias.

use crate::{LatLng, RoutePoint};

/// Mean Earth radius in meters.
pub const EARTH_RADIUS_METERS: f64 = 6_371_000.0;

/// Default movement threshold in degrees (roughly 10-15 meters).
pub const DEFAULT_MOVEMENT_THRESHOLD_DEGREES: f64 = 0.0001;

/// Great-circle distance in meters between two positions.
///
/// ```rust
/// use ride_tracker::{geo_utils, LatLng};
///
/// let sao_paulo = LatLng::new(-23.5505, -46.6333);
/// let rio = LatLng::new(-22.9068, -43.1729);
/// let d = geo_utils::haversine_distance(&sao_paulo, &rio);
/// assert!((d - 360_700.0).abs() < 2_000.0);
/// ```
#[inline]
pub fn haversine_distance(p1: &LatLng, p2: &LatLng) -> f64 {
    let d_lat = (p2.lat - p1.lat).to_radians();
    let d_lng = (p2.lng - p1.lng).to_radians();
    let a = (d_lat / 2.0).sin().powi(2)
        + p1.lat.to_radians().cos() * p2.lat.to_radians().cos() * (d_lng / 2.0).sin().powi(2);
    EARTH_RADIUS_METERS * 2.0 * a.sqrt().atan2((1.0 - a).sqrt())
}

/// Total length of a trail in meters, unrounded.
///
/// Empty or single-point trails return 0.0.
pub fn polyline_length(points: &[RoutePoint]) -> f64 {
    points
        .windows(2)
        .map(|pair| haversine_distance(&pair[0].position(), &pair[1].position()))
        .sum()
}

/// Total length of a trail rounded to the nearest whole meter.
///
/// Callers are expected to pass points in chronological order. Malformed
/// coordinates are not rejected; they simply produce a meaningless number.
pub fn trail_distance_meters(points: &[RoutePoint]) -> u64 {
    if points.len() < 2 {
        return 0;
    }
    let total = polyline_length(points);
    if total.is_finite() && total > 0.0 {
        total.round() as u64
    } else {
        0
    }
}

/// Returns true when either coordinate moved by more than `threshold` degrees.
///
/// This is a flat delta test rather than a true distance, so the effective
/// threshold in meters shrinks for longitude as latitude grows.
#[inline]
pub fn has_moved_significantly(last: &LatLng, next: &LatLng, threshold: f64) -> bool {
    (last.lat - next.lat).abs() > threshold || (last.lng - next.lng).abs() > threshold
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Latitude degrees spanning the given distance along a meridian.
    fn lat_degrees_for(meters: f64) -> f64 {
        (meters / EARTH_RADIUS_METERS).to_degrees()
    }

    fn straight_trail(count: usize, spacing_m: f64) -> Vec<RoutePoint> {
        let step = lat_degrees_for(spacing_m);
        (0..count)
            .map(|i| RoutePoint::new(-23.55 + i as f64 * step, -46.63, i as i64 * 1_000))
            .collect()
    }

    #[test]
    fn test_empty_and_single_point() {
        assert_eq!(trail_distance_meters(&[]), 0);
        assert_eq!(trail_distance_meters(&[RoutePoint::new(1.0, 2.0, 0)]), 0);
    }

    #[test]
    fn test_meridian_distance() {
        let trail = straight_trail(3, 20.0);
        assert_eq!(trail_distance_meters(&trail), 40);

        let trail = straight_trail(2, 1000.0);
        assert_eq!(trail_distance_meters(&trail), 1000);
    }

    #[test]
    fn test_reversal_symmetry() {
        let trail: Vec<RoutePoint> = vec![
            RoutePoint::new(-23.5505, -46.6333, 0),
            RoutePoint::new(-23.5520, -46.6301, 1),
            RoutePoint::new(-23.5561, -46.6290, 2),
            RoutePoint::new(-23.5599, -46.6355, 3),
        ];
        let mut reversed = trail.clone();
        reversed.reverse();
        assert_eq!(trail_distance_meters(&trail), trail_distance_meters(&reversed));
    }

    #[test]
    fn test_rounds_once_at_the_end() {
        // Ten segments of 10.4 m each: per-segment rounding would give 100.
        let trail = straight_trail(11, 10.4);
        assert_eq!(trail_distance_meters(&trail), 104);
    }

    #[test]
    fn test_movement_threshold() {
        let a = LatLng::new(-23.5505, -46.6333);
        assert!(!has_moved_significantly(
            &a,
            &LatLng::new(-23.55055, -46.63335),
            DEFAULT_MOVEMENT_THRESHOLD_DEGREES
        ));
        assert!(has_moved_significantly(
            &a,
            &LatLng::new(-23.5507, -46.6333),
            DEFAULT_MOVEMENT_THRESHOLD_DEGREES
        ));
        assert!(has_moved_significantly(
            &a,
            &LatLng::new(-23.5505, -46.6331),
            DEFAULT_MOVEMENT_THRESHOLD_DEGREES
        ));
    }
}
