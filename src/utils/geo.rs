// src/utils/geo.rs
//
// Great-circle distance and ETA primitives. Pure functions; the ETA is a
// linear estimate used only for ranking candidates, never for billing.
use crate::models::driver::GeoPoint;

/// Mean Earth radius in meters (IUGG).
pub const EARTH_RADIUS_M: f64 = 6_371_008.8;

/// Haversine great-circle distance between two points, in meters.
pub fn distance_meters(a: GeoPoint, b: GeoPoint) -> f64 {
    let lat1 = a.latitude.to_radians();
    let lat2 = b.latitude.to_radians();
    let dlat = (b.latitude - a.latitude).to_radians();
    let dlon = (b.longitude - a.longitude).to_radians();

    let sin_dlat = (dlat * 0.5).sin();
    let sin_dlon = (dlon * 0.5).sin();
    let h = sin_dlat * sin_dlat + lat1.cos() * lat2.cos() * sin_dlon * sin_dlon;
    let c = 2.0 * h.sqrt().atan2((1.0 - h).sqrt());

    EARTH_RADIUS_M * c
}

pub fn distance_km(a: GeoPoint, b: GeoPoint) -> f64 {
    distance_meters(a, b) / 1000.0
}

/// Linear travel-time estimate in seconds at an assumed constant speed.
pub fn eta_seconds(distance_meters: f64, assumed_speed_mps: f64) -> f64 {
    if assumed_speed_mps <= 0.0 {
        return f64::INFINITY;
    }
    distance_meters / assumed_speed_mps
}

#[cfg(test)]
mod tests {
    use super::*;

    fn point(lat: f64, lon: f64) -> GeoPoint {
        GeoPoint {
            latitude: lat,
            longitude: lon,
        }
    }

    #[test]
    fn test_zero_distance() {
        let accra = point(5.6037, -0.1870);
        assert_eq!(distance_meters(accra, accra), 0.0);
    }

    #[test]
    fn test_known_distance() {
        // Accra to Kumasi is roughly 200 km great-circle.
        let accra = point(5.6037, -0.1870);
        let kumasi = point(6.6885, -1.6244);
        let d = distance_km(accra, kumasi);
        assert!(d > 190.0 && d < 210.0, "got {} km", d);
    }

    #[test]
    fn test_symmetry() {
        let a = point(5.6037, -0.1870);
        let b = point(5.5560, -0.1969);
        let ab = distance_meters(a, b);
        let ba = distance_meters(b, a);
        assert!((ab - ba).abs() < 1e-6);
    }

    #[test]
    fn test_one_degree_latitude() {
        // One degree of latitude is ~111.2 km everywhere.
        let a = point(0.0, 0.0);
        let b = point(1.0, 0.0);
        let d = distance_km(a, b);
        assert!((d - 111.2).abs() < 0.5, "got {} km", d);
    }

    #[test]
    fn test_eta() {
        assert_eq!(eta_seconds(1000.0, 10.0), 100.0);
        assert!(eta_seconds(1000.0, 0.0).is_infinite());
    }
}
