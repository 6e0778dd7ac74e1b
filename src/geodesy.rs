//! Lat/lon ↔ local planar frame
//!
//! Equirectangular projection around a fixed origin. Good to well under a
//! meter over the few kilometers a single drive covers, which is all the
//! filter needs from a position source.

use serde::{Deserialize, Serialize};

use crate::types::PositionFix;

const EARTH_RADIUS: f64 = 6_371_000.0; // meters

pub fn latlon_to_meters(lat: f64, lon: f64, origin_lat: f64, origin_lon: f64) -> (f64, f64) {
    let d_lat = (lat - origin_lat).to_radians();
    let d_lon = (lon - origin_lon).to_radians();
    let x = EARTH_RADIUS * d_lon * origin_lat.to_radians().cos();
    let y = EARTH_RADIUS * d_lat;
    (x, y)
}

pub fn meters_to_latlon(x: f64, y: f64, origin_lat: f64, origin_lon: f64) -> (f64, f64) {
    let d_lat = y / EARTH_RADIUS;
    let d_lon = x / (EARTH_RADIUS * origin_lat.to_radians().cos());
    let lat = origin_lat + d_lat.to_degrees();
    let lon = origin_lon + d_lon.to_degrees();
    (lat, lon)
}

pub fn haversine_distance(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let d_lat = (lat2 - lat1).to_radians();
    let d_lon = (lon2 - lon1).to_radians();
    let a = (d_lat / 2.0).sin().powi(2)
        + lat1.to_radians().cos() * lat2.to_radians().cos() * (d_lon / 2.0).sin().powi(2);
    let c = 2.0 * a.sqrt().atan2((1.0 - a).max(0.0).sqrt());
    EARTH_RADIUS * c
}

/// Local east/north frame anchored at a reference point.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct LocalFrame {
    pub origin_lat: f64,
    pub origin_lon: f64,
}

impl LocalFrame {
    pub fn new(origin_lat: f64, origin_lon: f64) -> Self {
        Self {
            origin_lat,
            origin_lon,
        }
    }

    /// Project a geodetic fix into the frame (x east, y north).
    pub fn project(&self, lat: f64, lon: f64) -> PositionFix {
        let (x, y) = latlon_to_meters(lat, lon, self.origin_lat, self.origin_lon);
        PositionFix::new(x, y)
    }

    pub fn unproject(&self, x: f64, y: f64) -> (f64, f64) {
        meters_to_latlon(x, y, self.origin_lat, self.origin_lon)
    }
}
