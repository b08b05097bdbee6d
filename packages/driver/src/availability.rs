//! Availability heartbeat: decides when the driver's replaceable
//! `AVAILABILITY` event needs to be republished (periodic heartbeat, or an
//! out-of-band move past the throttle distance) and when it must instead be
//! withdrawn (going offline, or `roadflare_only` drivers who never publish
//! a location at all).

use wayfare_core::types::{
    AVAILABILITY_HEARTBEAT_SECS, AVAILABILITY_MIN_REPUBLISH_SECS, AVAILABILITY_MOVE_THRESHOLD_METERS,
};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LastPublished {
    pub geohash_lat: f64,
    pub geohash_lon: f64,
    pub published_at_unix: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RepublishReason {
    Heartbeat,
    Moved,
}

/// Returns the reason a fresh `AVAILABILITY` event should go out now, or
/// `None` if the last publish is still both fresh and close enough.
///
/// A driver that has moved past [`AVAILABILITY_MOVE_THRESHOLD_METERS`] is
/// still throttled to at most one republish per
/// [`AVAILABILITY_MIN_REPUBLISH_SECS`], so a driver bouncing back and forth
/// across the threshold cannot spam the relay.
pub fn should_republish(last: Option<LastPublished>, now_lat: f64, now_lon: f64, now_unix: i64) -> Option<RepublishReason> {
    let Some(last) = last else {
        return Some(RepublishReason::Heartbeat);
    };

    if now_unix - last.published_at_unix >= AVAILABILITY_HEARTBEAT_SECS as i64 {
        return Some(RepublishReason::Heartbeat);
    }

    let moved_meters = haversine_meters(last.geohash_lat, last.geohash_lon, now_lat, now_lon);
    if moved_meters >= AVAILABILITY_MOVE_THRESHOLD_METERS
        && now_unix - last.published_at_unix >= AVAILABILITY_MIN_REPUBLISH_SECS as i64
    {
        return Some(RepublishReason::Moved);
    }

    None
}

/// Great-circle distance in meters. Good enough for a 1km republish
/// threshold; no need for an ellipsoidal model at this precision.
fn haversine_meters(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    const EARTH_RADIUS_METERS: f64 = 6_371_000.0;
    let (lat1r, lat2r) = (lat1.to_radians(), lat2.to_radians());
    let dlat = (lat2 - lat1).to_radians();
    let dlon = (lon2 - lon1).to_radians();
    let a = (dlat / 2.0).sin().powi(2) + lat1r.cos() * lat2r.cos() * (dlon / 2.0).sin().powi(2);
    let c = 2.0 * a.sqrt().asin();
    EARTH_RADIUS_METERS * c
}

pub fn reason_label(reason: RepublishReason) -> &'static str {
    match reason {
        RepublishReason::Heartbeat => "heartbeat",
        RepublishReason::Moved => "moved",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_publish_has_no_prior_state() {
        assert_eq!(should_republish(None, 40.0, -73.0, 1000), Some(RepublishReason::Heartbeat));
    }

    #[test]
    fn fresh_and_stationary_skips_republish() {
        let last = LastPublished { geohash_lat: 40.0, geohash_lon: -73.0, published_at_unix: 1000 };
        assert_eq!(should_republish(Some(last), 40.0, -73.0, 1010), None);
    }

    #[test]
    fn heartbeat_interval_forces_republish() {
        let last = LastPublished { geohash_lat: 40.0, geohash_lon: -73.0, published_at_unix: 1000 };
        let now = 1000 + AVAILABILITY_HEARTBEAT_SECS as i64;
        assert_eq!(should_republish(Some(last), 40.0, -73.0, now), Some(RepublishReason::Heartbeat));
    }

    #[test]
    fn large_move_past_throttle_forces_republish() {
        let last = LastPublished { geohash_lat: 40.0, geohash_lon: -73.0, published_at_unix: 1000 };
        let now = 1000 + AVAILABILITY_MIN_REPUBLISH_SECS as i64;
        // roughly 11km north
        assert_eq!(should_republish(Some(last), 40.1, -73.0, now), Some(RepublishReason::Moved));
    }

    #[test]
    fn large_move_within_throttle_window_is_suppressed() {
        let last = LastPublished { geohash_lat: 40.0, geohash_lon: -73.0, published_at_unix: 1000 };
        let now = 1000 + (AVAILABILITY_MIN_REPUBLISH_SECS as i64) - 1;
        assert_eq!(should_republish(Some(last), 40.1, -73.0, now), None);
    }
}
