//! Measurement-to-track association.
//!
//! Each track picks at most one group-subset; the choice is greedy in
//! ascending refresh-time order (UUID tiebreak) so runs are reproducible.
//! Globally optimal assignment would be exponential; once a subset is chosen
//! for a track it is swept from the pool and later tracks cannot take it.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use crate::report::{feature_grade, DetectionReport, CLASS_FEATURE};
use crate::track::{Track, TrackId, TrackKind, TrackManager};

/// Reports declared mutually compatible candidates for one object.
pub type Group = BTreeSet<DetectionReport>;

/// Sentinel below every reachable group rate, so a zero-rated group can
/// still win. Downstream copes with the resulting empty associations.
const SENTINEL_RATE: f64 = -1.0;

// ============================================================================
// COMPARATOR POLICIES
// ============================================================================

/// Combines per-feature grades into one report rate, clipped to [0, 1].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResultComparator {
    /// Max of grades.
    #[default]
    Or,
    /// Min of grades.
    And,
}

impl ResultComparator {
    pub fn combine(&self, grades: &BTreeMap<String, f64>) -> f64 {
        let combined = match self {
            ResultComparator::Or => grades.values().copied().fold(0.0, f64::max),
            ResultComparator::And => {
                if grades.is_empty() {
                    0.0
                } else {
                    grades.values().copied().fold(1.0, f64::min)
                }
            }
        };
        combined.clamp(0.0, 1.0)
    }
}

/// Combines the kept report rates into one group rate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ListComparator {
    /// Max of rates.
    #[default]
    Or,
    /// Mean of rates.
    And,
}

impl ListComparator {
    pub fn combine(&self, rates: &[f64]) -> f64 {
        if rates.is_empty() {
            return 0.0;
        }
        match self {
            ListComparator::Or => rates.iter().copied().fold(0.0, f64::max),
            ListComparator::And => rates.iter().sum::<f64>() / rates.len() as f64,
        }
    }
}

// ============================================================================
// DATA ASSOCIATOR
// ============================================================================

/// Matches neighbourhood groups against the live track set.
///
/// The association is computed once per input and cached until the next
/// [`set_input`](DataAssociator::set_input).
pub struct DataAssociator {
    result_comparator: ResultComparator,
    list_comparator: ListComparator,
    threshold: f64,
    groups: Vec<Group>,
    associated: BTreeMap<TrackId, Group>,
    computed: bool,
}

impl DataAssociator {
    /// `threshold` in [0, 1]: minimum report rate to be taken into a
    /// track's subset.
    pub fn new(
        result_comparator: ResultComparator,
        list_comparator: ListComparator,
        threshold: f64,
    ) -> Self {
        DataAssociator {
            result_comparator,
            list_comparator,
            threshold: threshold.clamp(0.0, 1.0),
            groups: Vec::new(),
            associated: BTreeMap::new(),
            computed: false,
        }
    }

    pub fn set_threshold(&mut self, threshold: f64) {
        self.threshold = threshold.clamp(0.0, 1.0);
        self.computed = false;
    }

    /// Accepts the groups to associate, invalidating any cached output.
    pub fn set_input(&mut self, groups: Vec<Group>) {
        self.groups = groups;
        self.associated.clear();
        self.computed = false;
    }

    /// Runs the greedy assignment once. Tracks iterate ascending by refresh
    /// time, ties broken by UUID; each picks its best-rated group subset and
    /// the chosen reports are removed from the pool.
    pub fn compute(&mut self, tracks: &TrackManager) {
        if self.computed {
            return;
        }

        let mut order: Vec<&Track> = tracks.tracks().collect();
        order.sort_by_key(|t| (t.refresh_time(), t.id()));

        let chosen: Vec<(TrackId, Group)> = order
            .iter()
            .map(|track| (track.id(), self.take_best_group(track)))
            .collect();
        self.associated.extend(chosen);
        self.computed = true;
    }

    /// Associated measurements per track. Valid after [`compute`].
    pub fn tracks_to_reports(&self) -> &BTreeMap<TrackId, Group> {
        debug_assert!(self.computed, "associate before reading output");
        &self.associated
    }

    /// Residual reports left in each group after all tracks have chosen.
    /// Groups emptied by association are dropped; the rest seed new tracks.
    pub fn unassociated(&self) -> Vec<Group> {
        debug_assert!(self.computed, "associate before reading output");
        self.groups.iter().filter(|g| !g.is_empty()).cloned().collect()
    }

    /// Rates every group on a copy, keeps the best, and sweeps the winning
    /// subset out of the original pool. Better-rated groups strictly win;
    /// the sentinel guarantees some group is chosen whenever any exists.
    fn take_best_group(&mut self, track: &Track) -> Group {
        let mut best_rate = SENTINEL_RATE;
        let mut best: Option<(usize, Group, Group)> = None;

        for (idx, group) in self.groups.iter().enumerate() {
            let mut copy = group.clone();
            let (rate, chosen) = self.rate_group_for_track(&mut copy, track);
            if rate > best_rate {
                best_rate = rate;
                best = Some((idx, chosen, copy));
            }
        }

        match best {
            Some((idx, chosen, rest)) => {
                self.groups[idx] = rest;
                chosen
            }
            None => Group::new(),
        }
    }

    /// Moves every report rated at or above the threshold out of `group`
    /// into the returned subset, and rates the subset as a whole.
    fn rate_group_for_track(&self, group: &mut Group, track: &Track) -> (f64, Group) {
        let mut rates = Vec::new();
        let mut chosen = Group::new();
        let mut rest = Group::new();

        for report in std::mem::take(group) {
            let rate = self.rate_report_for_track(&report, track);
            if rate >= self.threshold {
                rates.push(rate);
                chosen.insert(report);
            } else {
                rest.insert(report);
            }
        }
        *group = rest;

        (self.list_comparator.combine(&rates), chosen)
    }

    /// Grades one report against one track in [0, 1].
    ///
    /// A class mismatch is a hard gate: humans never associate with vehicle
    /// tracks. Otherwise every report feature is graded against the track's
    /// feature of the same name (missing names grade 0) and the result
    /// comparator combines the map.
    fn rate_report_for_track(&self, dr: &DetectionReport, track: &Track) -> f64 {
        if track.kind() != TrackKind::Generic {
            if let Some(class) = dr.feature(CLASS_FEATURE) {
                if TrackKind::from_feature(class) != track.kind() {
                    return 0.0;
                }
            }
        }

        let mut grades: BTreeMap<String, f64> = BTreeMap::new();
        for (name, value) in dr.features() {
            let grade = match track.features().get(name) {
                Some(track_value) => feature_grade(value, track_value),
                None => 0.0,
            };
            grades.insert(name.clone(), grade);
        }
        self.result_comparator.combine(&grades)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::estimation::KalmanFilter;
    use crate::report::{FeatureMap, GeoPoint, Timestamp};

    fn report_with(id: u64, millis: i64, features: &[(&str, &str)]) -> DetectionReport {
        let map: FeatureMap = features
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        DetectionReport::new(
            id,
            1,
            Timestamp::from_millis(millis),
            GeoPoint::new(10.0, 20.0, 0.0).unwrap(),
            map,
        )
        .unwrap()
    }

    fn manager_with_tracks(times: &[i64]) -> (TrackManager, Vec<TrackId>) {
        let prototype = KalmanFilter::constant_velocity(1.0, 1e-6, 1e-6);
        let mut manager = TrackManager::new(60_000);
        let mut ids = Vec::new();
        for (i, millis) in times.iter().enumerate() {
            let seed = BTreeSet::from([report_with(1000 + i as u64, *millis, &[])]);
            let born = manager.initialize_tracks(vec![seed], &prototype).unwrap();
            ids.push(*born.keys().next().unwrap());
        }
        (manager, ids)
    }

    #[test]
    fn or_comparator_is_max_and_is_min() {
        let grades: BTreeMap<String, f64> =
            [("a".to_string(), 0.2), ("b".to_string(), 0.9)].into();
        assert_eq!(ResultComparator::Or.combine(&grades), 0.9);
        assert_eq!(ResultComparator::And.combine(&grades), 0.2);
        assert_eq!(ResultComparator::Or.combine(&BTreeMap::new()), 0.0);
        assert_eq!(ResultComparator::And.combine(&BTreeMap::new()), 0.0);
    }

    #[test]
    fn list_comparators_combine_rates() {
        assert_eq!(ListComparator::Or.combine(&[0.1, 0.7]), 0.7);
        assert_eq!(ListComparator::And.combine(&[0.5, 1.0]), 0.75);
        assert_eq!(ListComparator::Or.combine(&[]), 0.0);
        assert_eq!(ListComparator::And.combine(&[]), 0.0);
    }

    #[test]
    fn zero_threshold_sweeps_whole_group_into_track() {
        let (manager, ids) = manager_with_tracks(&[0]);
        let mut associator =
            DataAssociator::new(ResultComparator::Or, ListComparator::Or, 0.0);
        associator.set_input(vec![BTreeSet::from([
            report_with(1, 300, &[]),
            report_with(2, 600, &[]),
        ])]);
        associator.compute(&manager);

        let associated = associator.tracks_to_reports();
        assert_eq!(associated[&ids[0]].len(), 2);
        assert!(associator.unassociated().is_empty());
    }

    #[test]
    fn earlier_refresh_time_wins_contested_group() {
        // Both tracks rate the group identically; the one refreshed earlier
        // chooses first and takes it all.
        let (manager, ids) = manager_with_tracks(&[200, 100]);
        let mut associator =
            DataAssociator::new(ResultComparator::Or, ListComparator::Or, 0.0);
        associator.set_input(vec![BTreeSet::from([report_with(1, 300, &[])])]);
        associator.compute(&manager);

        let associated = associator.tracks_to_reports();
        assert_eq!(associated[&ids[1]].len(), 1, "refresh 100 chooses first");
        assert!(associated[&ids[0]].is_empty());
        assert!(associator.unassociated().is_empty());
    }

    #[test]
    fn threshold_filters_unmatched_reports_into_residual() {
        let (mut manager, ids) = manager_with_tracks(&[0]);
        // Teach the track a feature so one report can match exactly.
        manager
            .apply_measurement(ids[0], &report_with(10, 50, &[("color", "red")]))
            .unwrap();

        let mut associator =
            DataAssociator::new(ResultComparator::Or, ListComparator::Or, 1.0);
        associator.set_input(vec![BTreeSet::from([
            report_with(1, 300, &[("color", "red")]),
            report_with(2, 400, &[("color", "blue")]),
        ])]);
        associator.compute(&manager);

        let associated = associator.tracks_to_reports();
        assert_eq!(associated[&ids[0]].len(), 1);
        assert_eq!(
            associated[&ids[0]].iter().next().unwrap().report_id(),
            1
        );

        let residual = associator.unassociated();
        assert_eq!(residual.len(), 1);
        assert_eq!(residual[0].iter().next().unwrap().report_id(), 2);
    }

    #[test]
    fn no_report_owned_twice() {
        let (manager, _ids) = manager_with_tracks(&[0, 100]);
        let mut associator =
            DataAssociator::new(ResultComparator::Or, ListComparator::Or, 0.0);
        associator.set_input(vec![
            BTreeSet::from([report_with(1, 300, &[]), report_with(2, 350, &[])]),
            BTreeSet::from([report_with(3, 400, &[])]),
        ]);
        associator.compute(&manager);

        let mut seen: BTreeSet<u64> = BTreeSet::new();
        for group in associator.tracks_to_reports().values() {
            for dr in group {
                assert!(seen.insert(dr.report_id()), "report owned twice");
            }
        }
        for group in associator.unassociated() {
            for dr in &group {
                assert!(seen.insert(dr.report_id()), "report owned twice");
            }
        }
    }

    #[test]
    fn set_input_invalidates_previous_result() {
        let (manager, ids) = manager_with_tracks(&[0]);
        let mut associator =
            DataAssociator::new(ResultComparator::Or, ListComparator::Or, 0.0);

        associator.set_input(vec![BTreeSet::from([report_with(1, 300, &[])])]);
        associator.compute(&manager);
        assert_eq!(associator.tracks_to_reports()[&ids[0]].len(), 1);

        associator.set_input(vec![BTreeSet::from([report_with(2, 600, &[])])]);
        associator.compute(&manager);
        let associated = associator.tracks_to_reports();
        assert_eq!(associated[&ids[0]].len(), 1);
        assert_eq!(
            associated[&ids[0]].iter().next().unwrap().report_id(),
            2
        );
    }

    #[test]
    fn class_mismatch_is_a_hard_gate() {
        let prototype = KalmanFilter::constant_velocity(1.0, 1e-6, 1e-6);
        let mut manager = TrackManager::new(60_000);
        let born = manager
            .initialize_tracks(
                vec![BTreeSet::from([report_with(1, 0, &[("class", "vehicle")])])],
                &prototype,
            )
            .unwrap();
        let id = *born.keys().next().unwrap();

        let mut associator =
            DataAssociator::new(ResultComparator::Or, ListComparator::Or, 0.5);
        associator.set_input(vec![BTreeSet::from([report_with(
            2,
            300,
            &[("class", "human")],
        )])]);
        associator.compute(&manager);

        assert!(associator.tracks_to_reports()[&id].is_empty());
        assert_eq!(associator.unassociated().len(), 1);
    }
}
