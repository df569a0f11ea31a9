use runtrack_protocol::RawPoint;

pub const EARTH_RADIUS_M: f64 = 6_371_000.0;

/// Great-circle distance in meters.
pub fn haversine_distance(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let to_rad = |deg: f64| deg.to_radians();
    let dlat = to_rad(lat2 - lat1);
    let dlon = to_rad(lon2 - lon1);
    let a = (dlat / 2.0).sin().powi(2)
        + to_rad(lat1).cos() * to_rad(lat2).cos() * (dlon / 2.0).sin().powi(2);
    let c = 2.0 * a.sqrt().atan2((1.0 - a).sqrt());
    EARTH_RADIUS_M * c
}

pub fn distance_between(from: &RawPoint, to: &RawPoint) -> f64 {
    haversine_distance(from.latitude, from.longitude, to.latitude, to.longitude)
}

/// Pace in sec/km for a speed in m/s; undefined for non-positive speeds.
pub fn pace_from_speed(speed_m_per_s: f64) -> Option<f64> {
    if speed_m_per_s.is_finite() && speed_m_per_s > 0.0 {
        Some(1000.0 / speed_m_per_s)
    } else {
        None
    }
}

/// Latitude offset in degrees covering `meters` along a meridian.
pub fn meters_to_latitude_degrees(meters: f64) -> f64 {
    (meters / EARTH_RADIUS_M).to_degrees()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_distance_for_same_point() {
        assert_eq!(haversine_distance(37.5, 127.0, 37.5, 127.0), 0.0);
    }

    #[test]
    fn meridian_offsets_round_trip() {
        let step = meters_to_latitude_degrees(50.0);
        let distance = haversine_distance(37.5, 127.0, 37.5 + step, 127.0);
        assert!((distance - 50.0).abs() < 1e-6, "distance was {}", distance);
    }

    #[test]
    fn one_degree_of_longitude_at_equator() {
        let distance = haversine_distance(0.0, 0.0, 0.0, 1.0);
        assert!((distance - 111_194.9).abs() < 1.0);
    }

    #[test]
    fn pace_requires_positive_speed() {
        assert_eq!(pace_from_speed(4.0), Some(250.0));
        assert_eq!(pace_from_speed(0.0), None);
        assert_eq!(pace_from_speed(-1.0), None);
    }
}
