//! Player coordinates and client-side distance math.

use bytes::BufMut;

const EARTH_RADIUS_METERS: f64 = 6_371_000.0;

/// A point on (or above) the globe. Immutable value; a moving player
/// replaces the whole struct via [`crate::session::Session::move_to`].
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Location {
    pub latitude: f64,
    pub longitude: f64,
    pub altitude: f64,
}

impl Location {
    pub fn new(latitude: f64, longitude: f64, altitude: f64) -> Self {
        Self {
            latitude,
            longitude,
            altitude,
        }
    }

    /// Fixed 24-byte encoding used by the signing pipeline: latitude,
    /// longitude and altitude as consecutive big-endian IEEE-754 doubles.
    pub fn get_bytes(&self) -> [u8; 24] {
        let mut buf = [0u8; 24];
        {
            let mut cursor = &mut buf[..];
            cursor.put_f64(self.latitude);
            cursor.put_f64(self.longitude);
            cursor.put_f64(self.altitude);
        }
        buf
    }

    /// Haversine great-circle distance to `other` in meters. Used for
    /// client-side filtering only; never sent to the server.
    pub fn distance_to(&self, other: &Location) -> f64 {
        let lat1 = self.latitude.to_radians();
        let lat2 = other.latitude.to_radians();
        let delta_lat = (other.latitude - self.latitude).to_radians();
        let delta_lon = (other.longitude - self.longitude).to_radians();

        let a = (delta_lat / 2.0).sin().powi(2)
            + lat1.cos() * lat2.cos() * (delta_lon / 2.0).sin().powi(2);
        let c = 2.0 * a.sqrt().atan2((1.0 - a).sqrt());

        EARTH_RADIUS_METERS * c
    }
}
