//! Great-circle distance via the haversine formula.

use super::types::Coordinate;

/// Mean Earth radius in kilometres.
pub const EARTH_RADIUS_KM: f64 = 6371.0;

/// Distance in kilometres between two coordinates.
pub fn distance_km(a: Coordinate, b: Coordinate) -> f64 {
    haversine_km(a.latitude, a.longitude, b.latitude, b.longitude)
}

/// Same as [`distance_km`] on raw degrees. Inputs are not range-checked.
pub fn haversine_km(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let d_lat = (lat2 - lat1).to_radians();
    let d_lon = (lon2 - lon1).to_radians();

    let a = (d_lat / 2.0).sin().powi(2)
        + lat1.to_radians().cos() * lat2.to_radians().cos() * (d_lon / 2.0).sin().powi(2);

    let c = 2.0 * a.sqrt().atan2((1.0 - a).sqrt());
    EARTH_RADIUS_KM * c
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn c(lat: f64, lon: f64) -> Coordinate {
        Coordinate::new(lat, lon).unwrap()
    }

    #[test]
    fn test_same_point_is_zero() {
        for p in [c(0.0, 0.0), c(12.97, 77.59), c(-89.9, 179.9), c(59.3293, 18.0686)] {
            assert_eq!(distance_km(p, p), 0.0);
        }
    }

    #[test]
    fn test_symmetric() {
        let pairs = [
            (c(12.97, 77.59), c(28.6139, 77.2090)),
            (c(-33.8688, 151.2093), c(51.5074, -0.1278)),
            (c(0.0, 179.5), c(0.0, -179.5)),
        ];
        for (a, b) in pairs {
            assert_abs_diff_eq!(distance_km(a, b), distance_km(b, a), epsilon = 1e-9);
        }
    }

    #[test]
    fn test_one_degree_on_equator() {
        assert_abs_diff_eq!(distance_km(c(0.0, 0.0), c(0.0, 1.0)), 111.19, epsilon = 0.5);
    }

    #[test]
    fn test_bangalore_to_delhi() {
        // ~1740 km as the crow flies
        let d = distance_km(c(12.9716, 77.5946), c(28.6139, 77.2090));
        assert!((1700.0..1780.0).contains(&d), "got {}", d);
    }

    #[test]
    fn test_across_antimeridian() {
        assert_abs_diff_eq!(haversine_km(0.0, 179.5, 0.0, -179.5), 111.19, epsilon = 0.5);
    }
}
