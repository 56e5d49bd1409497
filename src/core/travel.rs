//! Travel duration lookup.
//!
//! Routing is an external concern; the engine only needs "minutes from A to B",
//! and must work when that answer is unknown.

/// Geographic coordinates in degrees.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Coordinates {
    /// Degrees north
    pub latitude: f64,
    /// Degrees east
    pub longitude: f64,
}

impl From<(f64, f64)> for Coordinates {
    fn from((latitude, longitude): (f64, f64)) -> Self {
        Self {
            latitude,
            longitude,
        }
    }
}

/// Source of travel durations between two homes.
pub trait TravelTimes: Send + Sync {
    /// Minutes needed to get from `from` to `to`, `None` when unknown.
    fn travel_minutes(&self, from: Coordinates, to: Coordinates) -> Option<u32>;
}

/// Used when no routing data is available; timing falls back to plain offsets.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoTravelData;

impl TravelTimes for NoTravelData {
    fn travel_minutes(&self, _from: Coordinates, _to: Coordinates) -> Option<u32> {
        None
    }
}

/// Great-circle distance at a constant speed, padded by a detour factor.
#[derive(Debug, Clone, Copy)]
pub struct StraightLineEstimate {
    /// Average speed in km/h (cycling in town is about 15)
    pub speed_kmh: f64,
    /// Multiplier for streets not being straight
    pub detour_factor: f64,
}

impl Default for StraightLineEstimate {
    fn default() -> Self {
        Self {
            speed_kmh: 15.0,
            detour_factor: 1.3,
        }
    }
}

const EARTH_RADIUS_KM: f64 = 6371.0;

/// Haversine distance in kilometres.
#[must_use]
pub fn distance_km(a: Coordinates, b: Coordinates) -> f64 {
    let (lat1, lat2) = (a.latitude.to_radians(), b.latitude.to_radians());
    let d_lat = lat2 - lat1;
    let d_lon = (b.longitude - a.longitude).to_radians();
    let h = (d_lat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (d_lon / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_KM * h.sqrt().asin()
}

impl TravelTimes for StraightLineEstimate {
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    fn travel_minutes(&self, from: Coordinates, to: Coordinates) -> Option<u32> {
        if self.speed_kmh <= 0.0 {
            return None;
        }
        let minutes = distance_km(from, to) * self.detour_factor / self.speed_kmh * 60.0;
        minutes.is_finite().then(|| minutes.ceil().max(0.0) as u32)
    }
}
