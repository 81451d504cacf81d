//! Detection reports - the timestamped observations entering the pipeline.
//!
//! A report carries a geodetic position and a set of named feature values.
//! Reports are immutable value types, totally ordered by
//! `(sensor_time, sensor_id, report_id)` so they can live in ordered
//! containers and be replayed deterministically.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;

use crate::error::TrackerError;

// ============================================================================
// TIME
// ============================================================================

/// Absolute time with millisecond resolution.
///
/// Sensor clocks are monotonic per sensor; the pipeline never consults
/// wall-clock time, so replayed data behaves exactly like live data.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
pub struct Timestamp(i64);

impl Timestamp {
    pub const EPOCH: Timestamp = Timestamp(0);

    pub fn from_millis(millis: i64) -> Self {
        Timestamp(millis)
    }

    pub fn from_secs_f64(secs: f64) -> Self {
        Timestamp((secs * 1000.0).round() as i64)
    }

    pub fn as_millis(self) -> i64 {
        self.0
    }

    pub fn as_secs_f64(self) -> f64 {
        self.0 as f64 / 1000.0
    }

    /// Milliseconds elapsed since `earlier`. Negative when `self` is older.
    pub fn millis_since(self, earlier: Timestamp) -> i64 {
        self.0 - earlier.0
    }

    pub fn add_millis(self, millis: i64) -> Timestamp {
        Timestamp(self.0 + millis)
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.3}s", self.as_secs_f64())
    }
}

// ============================================================================
// GEODETIC DOMAIN
// ============================================================================

/// Valid longitude range in degrees.
pub const LONGITUDE_RANGE: (f64, f64) = (-180.0, 180.0);
/// Valid latitude range in degrees.
pub const LATITUDE_RANGE: (f64, f64) = (-90.0, 90.0);
/// Valid altitude range in meters over sea level (Dead Sea to Everest).
pub const METERS_OVER_SEA_RANGE: (f64, f64) = (-420.0, 8850.0);

/// A validated WGS84 position.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    longitude: f64,
    latitude: f64,
    meters_over_sea: f64,
}

impl GeoPoint {
    /// Builds a position, rejecting out-of-domain coordinates with bad-input.
    pub fn new(longitude: f64, latitude: f64, meters_over_sea: f64) -> Result<Self, TrackerError> {
        let point = GeoPoint {
            longitude,
            latitude,
            meters_over_sea,
        };
        point.validate()?;
        Ok(point)
    }

    /// Re-checks the domain. Deserialized values bypass `new`, so intake
    /// points re-validate before trusting a report.
    pub fn validate(&self) -> Result<(), TrackerError> {
        check_range("longitude", self.longitude, LONGITUDE_RANGE)?;
        check_range("latitude", self.latitude, LATITUDE_RANGE)?;
        check_range("meters_over_sea", self.meters_over_sea, METERS_OVER_SEA_RANGE)?;
        Ok(())
    }

    pub fn longitude(&self) -> f64 {
        self.longitude
    }

    pub fn latitude(&self) -> f64 {
        self.latitude
    }

    pub fn meters_over_sea(&self) -> f64 {
        self.meters_over_sea
    }
}

fn check_range(name: &str, value: f64, (lo, hi): (f64, f64)) -> Result<(), TrackerError> {
    if !value.is_finite() || value < lo || value > hi {
        return Err(TrackerError::bad_input(format!(
            "{name} {value} outside [{lo}, {hi}]"
        )));
    }
    Ok(())
}

// ============================================================================
// FEATURES
// ============================================================================

/// Feature values keyed by name, unique within one report.
pub type FeatureMap = BTreeMap<String, String>;

/// Similarity grade between two feature values of the same name.
///
/// Comparators tolerate missing names (grade 0); present names grade on
/// exact value equality.
pub fn feature_grade(a: &str, b: &str) -> f64 {
    if a == b {
        1.0
    } else {
        0.0
    }
}

/// Feature name under which sensors report the object class.
pub const CLASS_FEATURE: &str = "class";

// ============================================================================
// DETECTION REPORT
// ============================================================================

/// A single timestamped observation from one sensor.
///
/// Equality and ordering are identity-based: two reports are the same report
/// iff they agree on `(sensor_time, sensor_id, report_id)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectionReport {
    report_id: u64,
    sensor_id: u32,
    sensor_time: Timestamp,
    position: GeoPoint,
    features: FeatureMap,
}

impl DetectionReport {
    pub fn new(
        report_id: u64,
        sensor_id: u32,
        sensor_time: Timestamp,
        position: GeoPoint,
        features: FeatureMap,
    ) -> Result<Self, TrackerError> {
        position.validate()?;
        Ok(DetectionReport {
            report_id,
            sensor_id,
            sensor_time,
            position,
            features,
        })
    }

    pub fn report_id(&self) -> u64 {
        self.report_id
    }

    pub fn sensor_id(&self) -> u32 {
        self.sensor_id
    }

    pub fn sensor_time(&self) -> Timestamp {
        self.sensor_time
    }

    pub fn position(&self) -> GeoPoint {
        self.position
    }

    pub fn longitude(&self) -> f64 {
        self.position.longitude()
    }

    pub fn latitude(&self) -> f64 {
        self.position.latitude()
    }

    pub fn meters_over_sea(&self) -> f64 {
        self.position.meters_over_sea()
    }

    pub fn features(&self) -> &FeatureMap {
        &self.features
    }

    pub fn feature(&self, name: &str) -> Option<&str> {
        self.features.get(name).map(String::as_str)
    }

    fn identity(&self) -> (Timestamp, u32, u64) {
        (self.sensor_time, self.sensor_id, self.report_id)
    }
}

impl PartialEq for DetectionReport {
    fn eq(&self, other: &Self) -> bool {
        self.identity() == other.identity()
    }
}

impl Eq for DetectionReport {}

impl PartialOrd for DetectionReport {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for DetectionReport {
    fn cmp(&self, other: &Self) -> Ordering {
        self.identity().cmp(&other.identity())
    }
}

impl std::hash::Hash for DetectionReport {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.identity().hash(state);
    }
}

impl fmt::Display for DetectionReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "DR#{} sensor={} t={} ({:.5}, {:.5})",
            self.report_id,
            self.sensor_id,
            self.sensor_time,
            self.position.longitude(),
            self.position.latitude(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn report(id: u64, sensor: u32, millis: i64) -> DetectionReport {
        DetectionReport::new(
            id,
            sensor,
            Timestamp::from_millis(millis),
            GeoPoint::new(10.0, 20.0, 0.0).unwrap(),
            FeatureMap::new(),
        )
        .unwrap()
    }

    #[test]
    fn rejects_out_of_domain_coordinates() {
        assert!(GeoPoint::new(181.0, 0.0, 0.0).is_err());
        assert!(GeoPoint::new(0.0, -91.0, 0.0).is_err());
        assert!(GeoPoint::new(0.0, 0.0, 9000.0).is_err());
        assert!(GeoPoint::new(f64::NAN, 0.0, 0.0).is_err());
        assert!(GeoPoint::new(-180.0, 90.0, -420.0).is_ok());
    }

    #[test]
    fn orders_by_time_then_sensor_then_id() {
        let a = report(5, 2, 100);
        let b = report(1, 1, 200);
        let c = report(0, 3, 200);
        assert!(a < b);
        assert!(b < c);

        let set: std::collections::BTreeSet<_> = [c.clone(), a.clone(), b.clone()].into();
        let ordered: Vec<_> = set.iter().map(|r| r.report_id()).collect();
        assert_eq!(ordered, vec![5, 1, 0]);
    }

    #[test]
    fn timestamp_round_trips_seconds() {
        let t = Timestamp::from_secs_f64(0.6);
        assert_eq!(t.as_millis(), 600);
        assert_eq!(t.millis_since(Timestamp::from_millis(100)), 500);
    }
}
