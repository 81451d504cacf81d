//! Tracks and the track manager.
//!
//! A track is the tracker's estimate of one persistent physical object. The
//! manager exclusively owns the live track set, keyed by UUID; every other
//! component refers to tracks through [`TrackId`] handles.

use nalgebra::Vector4;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::{FilterError, TrackerError};
use crate::estimation::{Estimate, EstimationFilter};
use crate::report::{DetectionReport, FeatureMap, Timestamp, CLASS_FEATURE};

/// Floor applied to seed variances so a single-report birth never produces a
/// zero covariance.
const SEED_VARIANCE_FLOOR: f64 = 1e-4;

/// Opaque track handle: the UUID assigned at birth.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct TrackId(Uuid);

impl TrackId {
    fn generate() -> Self {
        TrackId(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl fmt::Display for TrackId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Object class carried by a track. Kinds share all state; the variant only
/// gates association against class-tagged reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrackKind {
    #[default]
    Generic,
    Human,
    Vehicle,
}

impl TrackKind {
    /// Maps a report's `class` feature value to a kind.
    pub fn from_feature(value: &str) -> TrackKind {
        match value {
            "human" | "pedestrian" => TrackKind::Human,
            "vehicle" | "car" => TrackKind::Vehicle,
            _ => TrackKind::Generic,
        }
    }
}

/// What happened to one measurement offered to a track.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MeasurementOutcome {
    /// Folded into the filter; state and refresh time advanced.
    Applied,
    /// Older than the track's refresh time; silently dropped.
    Stale,
    /// The track is unhealthy and no longer accepts measurements.
    Rejected,
}

/// A live track: position/velocity estimate, prediction, features, and the
/// owned estimation filter.
pub struct Track {
    id: TrackId,
    kind: TrackKind,
    lon: f64,
    lat: f64,
    mos: f64,
    lon_vel: f64,
    lat_vel: f64,
    mos_vel: f64,
    predicted_lon: f64,
    predicted_lat: f64,
    predicted_mos: f64,
    lon_prediction_var: f64,
    lat_prediction_var: f64,
    mos_prediction_var: f64,
    refresh_time: Timestamp,
    features: FeatureMap,
    healthy: bool,
    filter: Box<dyn EstimationFilter>,
}

impl Clone for Track {
    fn clone(&self) -> Self {
        Track {
            id: self.id,
            kind: self.kind,
            lon: self.lon,
            lat: self.lat,
            mos: self.mos,
            lon_vel: self.lon_vel,
            lat_vel: self.lat_vel,
            mos_vel: self.mos_vel,
            predicted_lon: self.predicted_lon,
            predicted_lat: self.predicted_lat,
            predicted_mos: self.predicted_mos,
            lon_prediction_var: self.lon_prediction_var,
            lat_prediction_var: self.lat_prediction_var,
            mos_prediction_var: self.mos_prediction_var,
            refresh_time: self.refresh_time,
            features: self.features.clone(),
            healthy: self.healthy,
            filter: self.filter.clone_filter(),
        }
    }
}

impl fmt::Debug for Track {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Track")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("lon", &self.lon)
            .field("lat", &self.lat)
            .field("refresh_time", &self.refresh_time)
            .field("healthy", &self.healthy)
            .finish()
    }
}

impl Track {
    /// Creates a track seeded at the given position and creation time.
    ///
    /// Sensors provide no velocity, so it starts at zero and is recomputed
    /// from consecutive corrected positions. Creation time comes from the
    /// data (batch mode): wall-clock time would make replayed tracks live
    /// the wrong lifetime.
    pub(crate) fn new(
        mut filter: Box<dyn EstimationFilter>,
        kind: TrackKind,
        (lon, lat, mos): (f64, f64, f64),
        (lon_var, lat_var, _mos_var): (f64, f64, f64),
        creation_time: Timestamp,
        features: FeatureMap,
    ) -> Result<Self, FilterError> {
        let prediction = filter.initialize(
            Vector4::new(lon, lat, 0.0, 0.0),
            Vector4::new(lon_var, lat_var, 0.0, 0.0),
        )?;

        let mut track = Track {
            id: TrackId::generate(),
            kind,
            lon,
            lat,
            mos,
            lon_vel: 0.0,
            lat_vel: 0.0,
            mos_vel: 0.0,
            predicted_lon: 0.0,
            predicted_lat: 0.0,
            predicted_mos: 0.0,
            lon_prediction_var: 0.0,
            lat_prediction_var: 0.0,
            mos_prediction_var: 0.0,
            refresh_time: creation_time,
            features,
            healthy: true,
            filter,
        };
        track.store_prediction(&prediction);
        debug!(track = %track.id, time = %creation_time, "track born");
        Ok(track)
    }

    pub fn id(&self) -> TrackId {
        self.id
    }

    pub fn kind(&self) -> TrackKind {
        self.kind
    }

    pub fn longitude(&self) -> f64 {
        self.lon
    }

    pub fn latitude(&self) -> f64 {
        self.lat
    }

    pub fn meters_over_sea(&self) -> f64 {
        self.mos
    }

    pub fn longitude_velocity(&self) -> f64 {
        self.lon_vel
    }

    pub fn latitude_velocity(&self) -> f64 {
        self.lat_vel
    }

    pub fn meters_over_sea_velocity(&self) -> f64 {
        self.mos_vel
    }

    pub fn predicted_longitude(&self) -> f64 {
        self.predicted_lon
    }

    pub fn predicted_latitude(&self) -> f64 {
        self.predicted_lat
    }

    pub fn predicted_meters_over_sea(&self) -> f64 {
        self.predicted_mos
    }

    pub fn longitude_prediction_variance(&self) -> f64 {
        self.lon_prediction_var
    }

    pub fn latitude_prediction_variance(&self) -> f64 {
        self.lat_prediction_var
    }

    pub fn meters_over_sea_prediction_variance(&self) -> f64 {
        self.mos_prediction_var
    }

    pub fn refresh_time(&self) -> Timestamp {
        self.refresh_time
    }

    pub fn features(&self) -> &FeatureMap {
        &self.features
    }

    pub fn is_healthy(&self) -> bool {
        self.healthy
    }

    /// Whether the track survives a TTL pass at `current_time`.
    pub fn is_valid(&self, current_time: Timestamp, ttl_ms: i64) -> bool {
        self.healthy && current_time.millis_since(self.refresh_time) <= ttl_ms
    }

    /// Folds one measurement into the track.
    ///
    /// A measurement no newer than the refresh time is dropped (stale);
    /// otherwise the filter corrects then predicts, velocity is recomputed
    /// when time actually passed, and the refresh time advances. A filter
    /// failure marks the track unhealthy before the error is returned.
    pub(crate) fn apply_measurement(
        &mut self,
        dr: &DetectionReport,
    ) -> Result<MeasurementOutcome, FilterError> {
        if !self.healthy {
            return Ok(MeasurementOutcome::Rejected);
        }

        let new_time = dr.sensor_time();
        if new_time <= self.refresh_time {
            debug!(
                track = %self.id,
                refresh = %self.refresh_time,
                measurement = %new_time,
                "stale measurement skipped"
            );
            return Ok(MeasurementOutcome::Stale);
        }
        let time_passed_secs = new_time.millis_since(self.refresh_time) as f64 / 1000.0;

        // Reports carry no velocity; reuse the last computed one.
        let observation = Vector4::new(dr.longitude(), dr.latitude(), self.lon_vel, self.lat_vel);
        let corrected = match self.filter.correct(observation) {
            Ok(estimate) => estimate,
            Err(err) => {
                warn!(track = %self.id, %err, "filter failed, track marked unhealthy");
                self.healthy = false;
                return Err(err);
            }
        };

        let new_lon = corrected.state[0];
        let new_lat = corrected.state[1];
        if time_passed_secs > 0.0 {
            self.lon_vel = (new_lon - self.lon) / time_passed_secs;
            self.lat_vel = (new_lat - self.lat) / time_passed_secs;
        }
        self.lon = new_lon;
        self.lat = new_lat;
        self.mos = dr.meters_over_sea();
        self.refresh_time = new_time;

        for (name, value) in dr.features() {
            self.features.insert(name.clone(), value.clone());
        }

        let prediction = match self.filter.predict(None) {
            Ok(estimate) => estimate,
            Err(err) => {
                warn!(track = %self.id, %err, "prediction failed, track marked unhealthy");
                self.healthy = false;
                return Err(err);
            }
        };
        self.store_prediction(&prediction);

        Ok(MeasurementOutcome::Applied)
    }

    fn store_prediction(&mut self, prediction: &Estimate) {
        self.predicted_lon = prediction.state[0];
        self.predicted_lat = prediction.state[1];
        self.predicted_mos = self.mos;
        self.lon_prediction_var = prediction.variance[0];
        self.lat_prediction_var = prediction.variance[1];
        self.mos_prediction_var = 0.0;
    }
}

// ============================================================================
// TRACK MANAGER
// ============================================================================

/// Owns the live track set.
///
/// The TTL is explicit configuration: there is deliberately no default.
pub struct TrackManager {
    ttl_ms: i64,
    tracks: BTreeMap<TrackId, Track>,
}

impl TrackManager {
    pub fn new(ttl_ms: i64) -> Self {
        TrackManager {
            ttl_ms: ttl_ms.max(1),
            tracks: BTreeMap::new(),
        }
    }

    pub fn ttl_ms(&self) -> i64 {
        self.ttl_ms
    }

    /// Live tracks, ascending by id.
    pub fn tracks(&self) -> impl Iterator<Item = &Track> {
        self.tracks.values()
    }

    pub fn get(&self, id: TrackId) -> Option<&Track> {
        self.tracks.get(&id)
    }

    pub fn len(&self) -> usize {
        self.tracks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }

    /// Spawns one track per non-empty residual group, seeded from the
    /// group's centroid with sample variance (floored). The track's refresh
    /// time is the group's maximum sensor time. All-or-nothing: no track is
    /// inserted unless every birth succeeds.
    pub fn initialize_tracks(
        &mut self,
        residual: Vec<BTreeSet<DetectionReport>>,
        filter_prototype: &dyn EstimationFilter,
    ) -> Result<BTreeMap<TrackId, BTreeSet<DetectionReport>>, TrackerError> {
        let mut newborn: Vec<(Track, BTreeSet<DetectionReport>)> = Vec::new();

        for group in residual {
            if group.is_empty() {
                continue;
            }
            let (centroid, variance) = seed_from_group(&group);
            let refresh_time = group
                .iter()
                .map(DetectionReport::sensor_time)
                .max()
                .unwrap_or(Timestamp::EPOCH);
            let kind = common_kind(&group);
            let features = merged_features(&group);

            let track = Track::new(
                filter_prototype.clone_filter(),
                kind,
                centroid,
                variance,
                refresh_time,
                features,
            )?;
            newborn.push((track, group));
        }

        let mut born = BTreeMap::new();
        for (track, group) in newborn {
            born.insert(track.id(), group);
            self.tracks.insert(track.id(), track);
        }
        Ok(born)
    }

    /// Offers one measurement to the identified track.
    pub fn apply_measurement(
        &mut self,
        id: TrackId,
        dr: &DetectionReport,
    ) -> Result<MeasurementOutcome, TrackerError> {
        let track = self
            .tracks
            .get_mut(&id)
            .ok_or(TrackerError::TrackNotFound(id.as_uuid()))?;
        track.apply_measurement(dr).map_err(TrackerError::from)
    }

    /// Drops tracks unrefreshed for longer than the TTL, and unhealthy
    /// tracks. Returns how many were removed.
    pub fn expire(&mut self, current_time: Timestamp) -> usize {
        let before = self.tracks.len();
        self.tracks
            .retain(|_, track| track.is_valid(current_time, self.ttl_ms));
        let removed = before - self.tracks.len();
        if removed > 0 {
            debug!(removed, now = %current_time, "expired tracks");
        }
        removed
    }
}

/// Centroid (mean lon/lat/mos) and per-axis population variance, floored.
fn seed_from_group(group: &BTreeSet<DetectionReport>) -> ((f64, f64, f64), (f64, f64, f64)) {
    let n = group.len() as f64;
    let mut mean = (0.0, 0.0, 0.0);
    for dr in group {
        mean.0 += dr.longitude();
        mean.1 += dr.latitude();
        mean.2 += dr.meters_over_sea();
    }
    mean.0 /= n;
    mean.1 /= n;
    mean.2 /= n;

    let mut var = (0.0, 0.0, 0.0);
    for dr in group {
        var.0 += (dr.longitude() - mean.0).powi(2);
        var.1 += (dr.latitude() - mean.1).powi(2);
        var.2 += (dr.meters_over_sea() - mean.2).powi(2);
    }
    var.0 = (var.0 / n).max(SEED_VARIANCE_FLOOR);
    var.1 = (var.1 / n).max(SEED_VARIANCE_FLOOR);
    var.2 = (var.2 / n).max(SEED_VARIANCE_FLOOR);

    (mean, var)
}

/// The group's common kind, when every class-tagged report agrees.
fn common_kind(group: &BTreeSet<DetectionReport>) -> TrackKind {
    let mut kind = None;
    for dr in group {
        let Some(value) = dr.feature(CLASS_FEATURE) else {
            continue;
        };
        let report_kind = TrackKind::from_feature(value);
        match kind {
            None => kind = Some(report_kind),
            Some(existing) if existing == report_kind => {}
            Some(_) => return TrackKind::Generic,
        }
    }
    kind.unwrap_or_default()
}

fn merged_features(group: &BTreeSet<DetectionReport>) -> FeatureMap {
    let mut features = FeatureMap::new();
    for dr in group {
        for (name, value) in dr.features() {
            features.insert(name.clone(), value.clone());
        }
    }
    features
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::estimation::KalmanFilter;
    use crate::report::GeoPoint;
    use approx::assert_relative_eq;

    fn prototype() -> KalmanFilter {
        KalmanFilter::constant_velocity(0.3, 1e-6, 1e-6)
    }

    fn report(id: u64, millis: i64, lon: f64, lat: f64) -> DetectionReport {
        DetectionReport::new(
            id,
            1,
            Timestamp::from_millis(millis),
            GeoPoint::new(lon, lat, 0.0).unwrap(),
            FeatureMap::new(),
        )
        .unwrap()
    }

    fn manager_with_track(ttl_ms: i64) -> (TrackManager, TrackId) {
        let mut manager = TrackManager::new(ttl_ms);
        let born = manager
            .initialize_tracks(
                vec![BTreeSet::from([report(1, 0, 10.0, 20.0)])],
                &prototype(),
            )
            .unwrap();
        let id = *born.keys().next().unwrap();
        (manager, id)
    }

    #[test]
    fn birth_cardinality_one_track_per_nonempty_group() {
        let mut manager = TrackManager::new(1000);
        let groups = vec![
            BTreeSet::from([report(1, 0, 10.0, 20.0)]),
            BTreeSet::new(),
            BTreeSet::from([report(2, 100, 50.0, -10.0), report(3, 200, 50.0001, -10.0)]),
        ];
        let born = manager.initialize_tracks(groups, &prototype()).unwrap();

        assert_eq!(born.len(), 2);
        assert_eq!(manager.len(), 2);
        let ids: BTreeSet<_> = born.keys().copied().collect();
        assert_eq!(ids.len(), 2, "distinct UUIDs");
    }

    #[test]
    fn birth_refresh_time_is_group_maximum() {
        let mut manager = TrackManager::new(1000);
        let group = BTreeSet::from([
            report(1, 100, 10.0, 20.0),
            report(2, 700, 10.0001, 20.0001),
        ]);
        let born = manager.initialize_tracks(vec![group], &prototype()).unwrap();
        let id = *born.keys().next().unwrap();
        assert_eq!(
            manager.get(id).unwrap().refresh_time(),
            Timestamp::from_millis(700)
        );
    }

    #[test]
    fn birth_seeds_centroid() {
        let mut manager = TrackManager::new(1000);
        let group = BTreeSet::from([report(1, 0, 10.0, 20.0), report(2, 0, 12.0, 22.0)]);
        let born = manager.initialize_tracks(vec![group], &prototype()).unwrap();
        let track = manager.get(*born.keys().next().unwrap()).unwrap();
        assert_relative_eq!(track.longitude(), 11.0, epsilon = 1e-9);
        assert_relative_eq!(track.latitude(), 21.0, epsilon = 1e-9);
    }

    #[test]
    fn refresh_time_is_monotone_and_stale_is_dropped() {
        let (mut manager, id) = manager_with_track(10_000);

        assert_eq!(
            manager
                .apply_measurement(id, &report(2, 300, 10.01, 20.01))
                .unwrap(),
            MeasurementOutcome::Applied
        );
        let after_first = manager.get(id).unwrap().refresh_time();
        assert_eq!(after_first, Timestamp::from_millis(300));

        // Older measurement: silently dropped, state untouched.
        let lon_before = manager.get(id).unwrap().longitude();
        assert_eq!(
            manager
                .apply_measurement(id, &report(3, 200, 9.0, 19.0))
                .unwrap(),
            MeasurementOutcome::Stale
        );
        let track = manager.get(id).unwrap();
        assert_eq!(track.refresh_time(), after_first);
        assert_relative_eq!(track.longitude(), lon_before);
    }

    #[test]
    fn velocity_recomputed_only_when_time_passed() {
        let (mut manager, id) = manager_with_track(10_000);
        assert_eq!(manager.get(id).unwrap().longitude_velocity(), 0.0);

        manager
            .apply_measurement(id, &report(2, 500, 10.5, 20.0))
            .unwrap();
        let track = manager.get(id).unwrap();
        // Moved ~0.5 degrees in 0.5 s with a near-exact measurement model.
        assert!(track.longitude_velocity() > 0.5);
    }

    #[test]
    fn expire_removes_stale_tracks() {
        let (mut manager, id) = manager_with_track(1000);

        assert_eq!(manager.expire(Timestamp::from_millis(900)), 0);
        assert!(manager.get(id).is_some());

        assert_eq!(manager.expire(Timestamp::from_millis(1001)), 1);
        assert!(manager.get(id).is_none());
    }

    #[test]
    fn degenerate_filter_marks_track_unhealthy_then_rejects() {
        // Zero process and measurement noise: the covariance collapses to
        // zero after the first update, so the second innovation covariance
        // is singular.
        let broken = KalmanFilter::constant_velocity(1.0, 0.0, 0.0);
        let mut manager = TrackManager::new(1000);
        let born = manager
            .initialize_tracks(vec![BTreeSet::from([report(1, 0, 10.0, 20.0)])], &broken)
            .unwrap();
        let id = *born.keys().next().unwrap();

        assert_eq!(
            manager
                .apply_measurement(id, &report(2, 100, 10.0, 20.0))
                .unwrap(),
            MeasurementOutcome::Applied
        );

        let result = manager.apply_measurement(id, &report(3, 200, 10.0, 20.0));
        assert!(matches!(result, Err(TrackerError::Filter(_))));

        let track = manager.get(id).unwrap();
        assert!(!track.is_healthy());
        // Last valid state retained.
        assert_relative_eq!(track.longitude(), 10.0);
        assert_eq!(track.refresh_time(), Timestamp::from_millis(100));

        // Further measurements are rejected without touching the filter.
        assert_eq!(
            manager
                .apply_measurement(id, &report(4, 300, 11.0, 21.0))
                .unwrap(),
            MeasurementOutcome::Rejected
        );

        // Unhealthy tracks go at the next TTL pass regardless of age.
        assert_eq!(manager.expire(Timestamp::from_millis(300)), 1);
    }

    #[test]
    fn clone_gives_independent_filter() {
        let (mut manager, id) = manager_with_track(10_000);
        let cloned = manager.get(id).unwrap().clone();

        manager
            .apply_measurement(id, &report(2, 500, 11.0, 21.0))
            .unwrap();

        // The clone kept its own filter and state.
        assert_relative_eq!(cloned.longitude(), 10.0);
        assert_eq!(cloned.refresh_time(), Timestamp::from_millis(0));
    }

    #[test]
    fn kind_inferred_when_group_agrees() {
        let mut features = FeatureMap::new();
        features.insert(CLASS_FEATURE.to_string(), "vehicle".to_string());
        let tagged = DetectionReport::new(
            1,
            1,
            Timestamp::from_millis(0),
            GeoPoint::new(10.0, 20.0, 0.0).unwrap(),
            features,
        )
        .unwrap();

        let mut manager = TrackManager::new(1000);
        let born = manager
            .initialize_tracks(vec![BTreeSet::from([tagged])], &prototype())
            .unwrap();
        let track = manager.get(*born.keys().next().unwrap()).unwrap();
        assert_eq!(track.kind(), TrackKind::Vehicle);
    }
}
