//! Spherical geometry and speed math used by the ETA engine.

const EARTH_RADIUS_M: f64 = 6_371_000.0;

/// Great-circle distance between two WGS84 coordinates in meters,
/// computed with the Haversine formula.
pub fn haversine_distance(lat1: f64, lng1: f64, lat2: f64, lng2: f64) -> f64 {
    let phi1 = lat1.to_radians();
    let phi2 = lat2.to_radians();
    let delta_phi = (lat2 - lat1).to_radians();
    let delta_lambda = (lng2 - lng1).to_radians();

    let a = (delta_phi / 2.0).sin().powi(2)
        + phi1.cos() * phi2.cos() * (delta_lambda / 2.0).sin().powi(2);
    // clamp guards against rounding slightly above 1.0 for antipodal points
    2.0 * EARTH_RADIUS_M * a.sqrt().min(1.0).asin()
}

/// Whole minutes to cover `distance_m` at `speed_mps`, rounded up.
/// A positive distance never yields 0 minutes; degenerate inputs yield 0.
pub fn eta_minutes(distance_m: f64, speed_mps: f64) -> i64 {
    if distance_m <= 0.0 || speed_mps <= 0.0 {
        return 0;
    }
    ((distance_m / speed_mps / 60.0).ceil() as i64).max(1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn distance_sao_paulo_to_rio() {
        let d = haversine_distance(-23.5505, -46.6333, -22.9068, -43.1729);
        assert!(
            (350_000.0..=365_000.0).contains(&d),
            "unexpected distance: {d}"
        );
    }

    #[test]
    fn distance_is_symmetric_within_a_centimeter() {
        let forward = haversine_distance(-23.5505, -46.6333, 51.5074, -0.1278);
        let backward = haversine_distance(51.5074, -0.1278, -23.5505, -46.6333);
        assert!((forward - backward).abs() < 0.01);
    }

    #[test]
    fn distance_is_zero_iff_points_coincide() {
        assert_eq!(haversine_distance(12.34, 56.78, 12.34, 56.78), 0.0);
        assert!(haversine_distance(12.34, 56.78, 12.34, 56.79) > 0.0);
    }

    #[test]
    fn distance_crosses_the_antimeridian() {
        // one degree of longitude at the equator, straddling +/-180
        let d = haversine_distance(0.0, 179.5, 0.0, -179.5);
        assert!((d - 111_195.0).abs() < 100.0, "unexpected distance: {d}");
    }

    #[test]
    fn distance_at_the_pole_ignores_longitude() {
        assert!(haversine_distance(90.0, 0.0, 90.0, 135.0) < 0.01);
    }

    #[test]
    fn eta_rounds_up_and_never_returns_zero_for_positive_distance() {
        assert_eq!(eta_minutes(0.0, 10.0), 0);
        assert_eq!(eta_minutes(1000.0, 0.0), 0);
        assert_eq!(eta_minutes(1.0, 100.0), 1);
        // exactly one minute of travel
        assert_eq!(eta_minutes(600.0, 10.0), 1);
        // just over one minute rounds to two
        assert_eq!(eta_minutes(601.0, 10.0), 2);
    }
}
