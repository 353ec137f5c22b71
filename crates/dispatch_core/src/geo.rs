//! Geographic primitives: great-circle distance and coordinate quantization.
//!
//! All distance math is double-precision; no sub-meter accuracy is promised.
//! Quantized coordinates are stored as scaled integers so they can serve as
//! hash-map keys (the ETA cache is keyed on them).

use serde::{Deserialize, Serialize};

/// Mean Earth radius in kilometres.
pub const EARTH_RADIUS_KM: f64 = 6371.0;

/// Decimal places used for cache-key quantization (10^-4 degree ≈ 10 m).
pub const QUANTIZE_DECIMALS: u32 = 4;

/// A WGS-84 coordinate pair.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub lat: f64,
    pub lng: f64,
}

impl Point {
    pub fn new(lat: f64, lng: f64) -> Self {
        Self { lat, lng }
    }
}

/// Great-circle distance between two points in kilometres (Haversine on a
/// spherical Earth, R = 6371 km). Symmetric in its arguments.
pub fn haversine_km(a: Point, b: Point) -> f64 {
    let (lat1, lon1) = (a.lat.to_radians(), a.lng.to_radians());
    let (lat2, lon2) = (b.lat.to_radians(), b.lng.to_radians());
    let dlat = lat2 - lat1;
    let dlon = lon2 - lon1;
    let sin_dlat = (dlat * 0.5).sin();
    let sin_dlon = (dlon * 0.5).sin();
    let h = sin_dlat * sin_dlat + lat1.cos() * lat2.cos() * sin_dlon * sin_dlon;
    let c = 2.0 * h.sqrt().atan2((1.0 - h).sqrt());
    EARTH_RADIUS_KM * c
}

/// Round a single coordinate to `decimals` decimal places.
pub fn round_coord(value: f64, decimals: u32) -> f64 {
    let scale = 10_f64.powi(decimals as i32);
    (value * scale).round() / scale
}

/// Round both coordinates of a point to `decimals` decimal places.
pub fn quantize(p: Point, decimals: u32) -> Point {
    Point {
        lat: round_coord(p.lat, decimals),
        lng: round_coord(p.lng, decimals),
    }
}

/// A point quantized to 10^-4 degree, stored as scaled integers.
///
/// Two points within ~10 m of each other collapse to the same key, which is
/// what makes the ETA cache effective for repeated nearby lookups.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct QuantKey {
    pub lat_q: i32,
    pub lng_q: i32,
}

impl QuantKey {
    pub fn from_point(p: Point) -> Self {
        let scale = 10_f64.powi(QUANTIZE_DECIMALS as i32);
        Self {
            lat_q: (p.lat * scale).round() as i32,
            lng_q: (p.lng * scale).round() as i32,
        }
    }

    /// The quantized coordinate back as a point.
    pub fn to_point(self) -> Point {
        let scale = 10_f64.powi(QUANTIZE_DECIMALS as i32);
        Point {
            lat: self.lat_q as f64 / scale,
            lng: self.lng_q as f64 / scale,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn haversine_is_symmetric() {
        let a = Point::new(25.0330, 121.5654);
        let b = Point::new(25.0478, 121.5170);
        let ab = haversine_km(a, b);
        let ba = haversine_km(b, a);
        assert!((ab - ba).abs() < 1e-9);
    }

    #[test]
    fn haversine_zero_for_same_point() {
        let a = Point::new(25.0330, 121.5654);
        assert_eq!(haversine_km(a, a), 0.0);
    }

    #[test]
    fn haversine_known_distance() {
        // Taipei 101 to Taipei Main Station is roughly 5 km.
        let a = Point::new(25.0330, 121.5654);
        let b = Point::new(25.0478, 121.5170);
        let d = haversine_km(a, b);
        assert!(d > 4.0 && d < 6.0, "unexpected distance: {d}");
    }

    #[test]
    fn quantize_rounds_to_four_decimals() {
        let p = Point::new(25.03304567, 121.56541234);
        let q = quantize(p, 4);
        assert_eq!(q.lat, 25.0330);
        assert_eq!(q.lng, 121.5654);
    }

    #[test]
    fn nearby_points_share_a_quant_key() {
        let a = QuantKey::from_point(Point::new(25.03301, 121.56539));
        let b = QuantKey::from_point(Point::new(25.03299, 121.56541));
        assert_eq!(a, b);
    }

    #[test]
    fn quant_key_round_trips_within_tolerance() {
        let p = Point::new(25.0333, 121.5657);
        let back = QuantKey::from_point(p).to_point();
        assert!((back.lat - p.lat).abs() < 1e-9);
        assert!((back.lng - p.lng).abs() < 1e-9);
    }
}
