//! WGS84 earth-curvature helpers for degree <-> meter conversion.
//!
//! Both radii are returned pre-scaled to meters per degree, so an angular
//! difference in degrees multiplied by the radius is a linear offset in
//! meters, and a linear offset divided by the radius is back in degrees.

use std::f64::consts::PI;

/// WGS84 semi-major axis [m].
pub const SEMI_MAJOR_AXIS: f64 = 6_378_137.0;

/// WGS84 first eccentricity squared.
pub const ECCENTRICITY_SQ: f64 = 6.694_379_990_141_316e-3;

const DEG2RAD: f64 = PI / 180.0;

/// Meridian radius of curvature at the given latitude, scaled to meters per
/// degree: `delta_lat_deg * meridian_radius(lat)` is a north offset in meters.
pub fn meridian_radius(lat_deg: f64) -> f64 {
    let s = (lat_deg * DEG2RAD).sin();
    let w = 1.0 - ECCENTRICITY_SQ * s * s;
    SEMI_MAJOR_AXIS * (1.0 - ECCENTRICITY_SQ) / (w * w.sqrt()) * DEG2RAD
}

/// Prime-vertical (normal) radius of curvature, scaled to meters per degree:
/// `delta_lon_deg * normal_radius(angle)` is an east offset in meters.
///
/// The curvature is evaluated at whatever angle the caller supplies.
pub fn normal_radius(angle_deg: f64) -> f64 {
    let s = (angle_deg * DEG2RAD).sin();
    SEMI_MAJOR_AXIS / (1.0 - ECCENTRICITY_SQ * s * s).sqrt() * DEG2RAD
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_meridian_arc_at_equator() {
        // One degree of latitude at the equator is about 110.574 km.
        assert_relative_eq!(meridian_radius(0.0), 110_574.0, max_relative = 1e-4);
    }

    #[test]
    fn test_meridian_arc_at_pole() {
        // Flattening stretches a degree of latitude to about 111.694 km.
        assert_relative_eq!(meridian_radius(90.0), 111_694.0, max_relative = 1e-4);
    }

    #[test]
    fn test_normal_arc_at_equator() {
        // a * pi / 180
        assert_relative_eq!(normal_radius(0.0), 111_319.5, max_relative = 1e-4);
    }

    #[test]
    fn test_radii_monotonic_with_latitude() {
        assert!(meridian_radius(60.0) > meridian_radius(30.0));
        assert!(normal_radius(60.0) > normal_radius(30.0));
    }

    #[test]
    fn test_degree_meter_round_trip() {
        let lat = 31.0;
        let offset_m = 12.5;
        let deg = offset_m / meridian_radius(lat);
        assert_relative_eq!(deg * meridian_radius(lat), offset_m, max_relative = 1e-12);
    }
}
