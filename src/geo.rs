use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use ts_rs::TS;

/// Mean earth radius used by the haversine formula. All distances produced by
/// this module are kilometers; callers that need meters multiply by 1000.
pub const EARTH_RADIUS_KM: f64 = 6371.0;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum GeoError {
    InvalidCoordinate { lat: f64, lon: f64 },
}

impl std::fmt::Display for GeoError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GeoError::InvalidCoordinate { lat, lon } => {
                write!(f, "Coordinate out of range: lat={lat}, lon={lon}")
            }
        }
    }
}

impl std::error::Error for GeoError {}

/// A single GPS sample. Immutable once recorded.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct GeoFix {
    pub lat: f64,
    pub lon: f64,
    pub time: DateTime<Utc>,
}

impl GeoFix {
    /// Validates coordinate ranges; out-of-range input is rejected, not clamped.
    pub fn new(lat: f64, lon: f64, time: DateTime<Utc>) -> Result<Self, GeoError> {
        if !(-90.0..=90.0).contains(&lat) || !(-180.0..=180.0).contains(&lon) {
            return Err(GeoError::InvalidCoordinate { lat, lon });
        }
        Ok(GeoFix { lat, lon, time })
    }

    /// Great-circle distance to another fix, in kilometers.
    pub fn distance_km(&self, other: &GeoFix) -> f64 {
        haversine_km(self.lat, self.lon, other.lat, other.lon)
    }
}

/// Haversine distance between two coordinate pairs, in kilometers.
pub fn haversine_km(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let phi1 = lat1.to_radians();
    let phi2 = lat2.to_radians();
    let dphi = (lat2 - lat1).to_radians();
    let dlambda = (lon2 - lon1).to_radians();
    let a = (dphi / 2.0).sin().powi(2) + phi1.cos() * phi2.cos() * (dlambda / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_KM * a.sqrt().atan2((1.0 - a).sqrt())
}

/// Movement classification of a finished track against a caller-supplied
/// threshold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[serde(rename_all = "lowercase")]
#[ts(export)]
pub enum Movement {
    Stationary,
    Moving,
}

/// What happened to a submitted fix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, TS)]
#[serde(rename_all = "lowercase")]
#[ts(export)]
pub enum FixOutcome {
    /// Appended to the track.
    Recorded,
    /// Timestamp not after the last recorded fix; duplicates and out-of-order
    /// arrivals land here and are dropped.
    Stale,
    /// Accepted but not recorded: it neither moved far enough nor waited long
    /// enough since the last recorded fix.
    Debounced,
}

/// Hybrid debounce policy for fix ingestion: record a candidate when it moved
/// more than `min_meters` from the last recorded fix, or at least
/// `min_seconds` elapsed since it. The first fix is always recorded.
#[derive(Debug, Clone, Copy)]
pub struct SamplingPolicy {
    pub min_meters: f64,
    pub min_seconds: i64,
}

impl SamplingPolicy {
    pub fn should_record(&self, last: Option<&GeoFix>, candidate: &GeoFix) -> bool {
        let Some(last) = last else {
            return true;
        };
        let moved_meters = last.distance_km(candidate) * 1000.0;
        let elapsed = (candidate.time - last.time).num_seconds();
        moved_meters > self.min_meters || elapsed >= self.min_seconds
    }
}

/// An ordered sequence of fixes for one session, reduced to a running total
/// path distance.
///
/// Distance is accumulated as fixes are recorded, so it never decreases, and
/// bounding the in-memory buffer to `max_fixes` points does not lose distance
/// already walked.
#[derive(Debug, Clone)]
pub struct GeoTrack {
    fixes: VecDeque<GeoFix>,
    distance_km: f64,
    last_recorded: Option<GeoFix>,
    max_fixes: usize,
}

impl GeoTrack {
    pub fn new(max_fixes: usize) -> Self {
        GeoTrack {
            fixes: VecDeque::new(),
            distance_km: 0.0,
            last_recorded: None,
            max_fixes,
        }
    }

    /// Validates and ingests one fix. Stale and debounced fixes do not change
    /// the track; recorded fixes extend the path and the accumulated distance.
    pub fn add_fix(
        &mut self,
        lat: f64,
        lon: f64,
        time: DateTime<Utc>,
        policy: &SamplingPolicy,
    ) -> Result<FixOutcome, GeoError> {
        let fix = GeoFix::new(lat, lon, time)?;

        if let Some(last) = &self.last_recorded {
            if fix.time <= last.time {
                return Ok(FixOutcome::Stale);
            }
            if !policy.should_record(Some(last), &fix) {
                return Ok(FixOutcome::Debounced);
            }
            self.distance_km += last.distance_km(&fix);
        }

        self.last_recorded = Some(fix);
        self.fixes.push_back(fix);
        if self.fixes.len() > self.max_fixes {
            self.fixes.pop_front();
        }
        Ok(FixOutcome::Recorded)
    }

    /// Total path distance over consecutive recorded fixes, in kilometers.
    /// 0 for tracks with fewer than two recorded fixes.
    pub fn total_distance_km(&self) -> f64 {
        self.distance_km
    }

    pub fn classify(&self, threshold_meters: f64) -> Movement {
        if self.distance_km * 1000.0 > threshold_meters {
            Movement::Moving
        } else {
            Movement::Stationary
        }
    }

    pub fn len(&self) -> usize {
        self.fixes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fixes.is_empty()
    }

    pub fn last_fix(&self) -> Option<&GeoFix> {
        self.last_recorded.as_ref()
    }

    /// Recorded fixes still held in memory, oldest first.
    pub fn points(&self) -> Vec<GeoFix> {
        self.fixes.iter().copied().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    // Roughly one meter of latitude, in degrees.
    const METER_LAT: f64 = 1.0 / 111_195.0;

    fn at(seconds: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + seconds, 0).unwrap()
    }

    // Records every fix: no debouncing gets in the way of distance tests.
    fn eager() -> SamplingPolicy {
        SamplingPolicy {
            min_meters: 0.0,
            min_seconds: 0,
        }
    }

    #[test]
    fn empty_and_single_fix_have_zero_distance() {
        let mut track = GeoTrack::new(1000);
        assert_eq!(track.total_distance_km(), 0.0);

        track.add_fix(4.65, -74.05, at(0), &eager()).unwrap();
        assert_eq!(track.total_distance_km(), 0.0);
        assert_eq!(track.classify(0.0), Movement::Stationary);
    }

    #[test]
    fn three_point_track_matches_segment_sum() {
        let mut track = GeoTrack::new(1000);
        track.add_fix(0.0, 0.0, at(0), &eager()).unwrap();
        track.add_fix(0.0, 1.0, at(10), &eager()).unwrap();
        track.add_fix(0.0, 2.0, at(20), &eager()).unwrap();

        let segments = haversine_km(0.0, 0.0, 0.0, 1.0) + haversine_km(0.0, 1.0, 0.0, 2.0);
        let total = track.total_distance_km();
        assert!((total - segments).abs() < 1e-9);
        // One degree along the equator is ~111.19 km with R = 6371.
        assert!((total - 222.39).abs() / 222.39 < 0.001);
    }

    #[test]
    fn appending_never_decreases_distance() {
        let mut track = GeoTrack::new(1000);
        let mut previous = 0.0;
        for i in 0..50 {
            track
                .add_fix(4.65 + (i as f64) * METER_LAT * 3.0, -74.05, at(i), &eager())
                .unwrap();
            let distance = track.total_distance_km();
            assert!(distance >= previous);
            previous = distance;
        }
    }

    #[test]
    fn short_stroll_is_moving_at_20m_stationary_at_100m() {
        let mut track = GeoTrack::new(1000);
        track.add_fix(4.6500, -74.0500, at(0), &eager()).unwrap();
        track.add_fix(4.6505, -74.0500, at(30), &eager()).unwrap();

        let distance = track.total_distance_km();
        assert!((distance - 0.0556).abs() < 0.0005, "got {distance}");
        assert_eq!(track.classify(20.0), Movement::Moving);
        assert_eq!(track.classify(100.0), Movement::Stationary);
    }

    #[test]
    fn classification_boundary_is_exclusive() {
        let mut track = GeoTrack::new(1000);
        track.add_fix(0.0, 0.0, at(0), &eager()).unwrap();
        track.add_fix(METER_LAT * 10.0, 0.0, at(10), &eager()).unwrap();

        let meters = track.total_distance_km() * 1000.0;
        assert_eq!(track.classify(meters), Movement::Stationary);
        assert_eq!(track.classify(meters - 0.01), Movement::Moving);
    }

    #[test]
    fn out_of_range_coordinates_are_rejected() {
        let mut track = GeoTrack::new(1000);
        assert_eq!(
            track.add_fix(91.0, 0.0, at(0), &eager()),
            Err(GeoError::InvalidCoordinate { lat: 91.0, lon: 0.0 })
        );
        assert_eq!(
            track.add_fix(0.0, -180.5, at(0), &eager()),
            Err(GeoError::InvalidCoordinate {
                lat: 0.0,
                lon: -180.5
            })
        );
        assert!(track.is_empty());
    }

    #[test]
    fn duplicate_and_out_of_order_fixes_are_stale() {
        let mut track = GeoTrack::new(1000);
        track.add_fix(4.65, -74.05, at(10), &eager()).unwrap();
        assert_eq!(
            track.add_fix(4.66, -74.05, at(10), &eager()).unwrap(),
            FixOutcome::Stale
        );
        assert_eq!(
            track.add_fix(4.66, -74.05, at(5), &eager()).unwrap(),
            FixOutcome::Stale
        );
        assert_eq!(track.len(), 1);
        assert_eq!(track.total_distance_km(), 0.0);
    }

    #[test]
    fn hybrid_policy_debounces_small_quick_movements() {
        let policy = SamplingPolicy {
            min_meters: 15.0,
            min_seconds: 30,
        };
        let mut track = GeoTrack::new(1000);

        // First fix always lands.
        assert_eq!(
            track.add_fix(4.65, -74.05, at(0), &policy).unwrap(),
            FixOutcome::Recorded
        );
        // 5 m and 10 s later: neither condition met.
        assert_eq!(
            track
                .add_fix(4.65 + METER_LAT * 5.0, -74.05, at(10), &policy)
                .unwrap(),
            FixOutcome::Debounced
        );
        // Same small move but 30 s after the last *recorded* fix: time wins.
        assert_eq!(
            track
                .add_fix(4.65 + METER_LAT * 5.0, -74.05, at(30), &policy)
                .unwrap(),
            FixOutcome::Recorded
        );
        // 20 m in one second: distance wins.
        assert_eq!(
            track
                .add_fix(4.65 + METER_LAT * 25.0, -74.05, at(31), &policy)
                .unwrap(),
            FixOutcome::Recorded
        );
        assert_eq!(track.len(), 3);
    }

    #[test]
    fn bounded_buffer_keeps_accumulated_distance() {
        let mut track = GeoTrack::new(2);
        for i in 0..5 {
            track
                .add_fix(0.0 + (i as f64) * METER_LAT * 100.0, 0.0, at(i), &eager())
                .unwrap();
        }
        assert_eq!(track.len(), 2);
        // Four ~100 m segments walked, regardless of what is still buffered.
        let meters = track.total_distance_km() * 1000.0;
        assert!((meters - 400.0).abs() < 1.0, "got {meters}");
    }
}
