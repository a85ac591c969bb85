//! Great-circle distance and point-to-point velocity.

use geo::{Distance, Haversine, Point};
use tracing::debug;

use crate::ping::Ping;

const MS_PER_HOUR: f64 = 3_600_000.0;

/// Great-circle distance in kilometres between two `(lat, lon)` pairs.
pub fn distance_km(from: (f64, f64), to: (f64, f64)) -> f64 {
    // geo points are (x = lon, y = lat)
    let a = Point::new(from.1, from.0);
    let b = Point::new(to.1, to.0);
    Haversine.distance(a, b) / 1000.0
}

/// Speed in km/h needed to travel from `previous` to `current`.
///
/// Returns 0.0 when no time elapsed (duplicate or out-of-order timestamps),
/// when the gap does not fit in an `i64`, and when either position is
/// missing or unparseable.
pub fn velocity_kmh(previous: &Ping, current: &Ping) -> f64 {
    let elapsed_ms = match current.timestamp_ms.checked_sub(previous.timestamp_ms) {
        Some(ms) if ms > 0 => ms,
        _ => return 0.0,
    };

    match (previous.position(), current.position()) {
        (Ok(from), Ok(to)) => distance_km(from, to) / (elapsed_ms as f64 / MS_PER_HOUR),
        (Err(e), _) | (_, Err(e)) => {
            debug!(error = %e, line_id = %current.line_id, "Velocity defaulted to 0");
            0.0
        }
    }
}
