//! Great-circle distance for agent geofencing.

use serde::{Deserialize, Serialize};

const EARTH_RADIUS_KM: f64 = 6371.0;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub latitude: f64,
    pub longitude: f64,
}

impl GeoPoint {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self { latitude, longitude }
    }

    pub fn is_valid(&self) -> bool {
        (-90.0..=90.0).contains(&self.latitude) && (-180.0..=180.0).contains(&self.longitude)
    }
}

/// Haversine distance between two points, in kilometres.
pub fn haversine_km(a: GeoPoint, b: GeoPoint) -> f64 {
    let (lat1, lat2) = (a.latitude.to_radians(), b.latitude.to_radians());
    let dlat = (b.latitude - a.latitude).to_radians();
    let dlon = (b.longitude - a.longitude).to_radians();

    let h = (dlat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (dlon / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_KM * h.sqrt().asin()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_point_is_zero() {
        let p = GeoPoint::new(-1.2921, 36.8219);
        assert!(haversine_km(p, p).abs() < 1e-9);
    }

    #[test]
    fn nairobi_to_mombasa_is_about_440_km() {
        let nairobi = GeoPoint::new(-1.2921, 36.8219);
        let mombasa = GeoPoint::new(-4.0435, 39.6682);
        let d = haversine_km(nairobi, mombasa);
        assert!((d - 440.0).abs() < 10.0, "got {d}");
    }

    #[test]
    fn small_offsets_straddle_one_km() {
        let origin = GeoPoint::new(0.0, 0.0);
        // one degree of latitude is ~111.2 km
        let near = GeoPoint::new(0.008, 0.0);
        let far = GeoPoint::new(0.01, 0.0);
        assert!(haversine_km(origin, near) < 1.0);
        assert!(haversine_km(origin, far) > 1.0);
    }

    #[test]
    fn rejects_out_of_range_coordinates() {
        assert!(!GeoPoint::new(91.0, 0.0).is_valid());
        assert!(!GeoPoint::new(0.0, -181.0).is_valid());
        assert!(GeoPoint::new(-1.0, 36.0).is_valid());
    }
}
