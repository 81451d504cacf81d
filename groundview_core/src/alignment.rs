//! Temporal alignment - splits a report set into time-windowed cohorts.

use std::collections::BTreeSet;

use crate::report::{DetectionReport, Timestamp};

/// Default alignment window.
pub const DEFAULT_WINDOW_MS: i64 = 1000;

/// Groups reports into successive cohorts of one window each.
///
/// Every report is emitted in exactly one cohort; cohorts come out in
/// non-decreasing start-time order; an empty cohort is terminal and
/// idempotent.
#[derive(Debug)]
pub struct AlignmentProcessor {
    window_ms: i64,
    pool: BTreeSet<DetectionReport>,
}

impl AlignmentProcessor {
    pub fn new(window_ms: i64) -> Self {
        AlignmentProcessor {
            window_ms: window_ms.max(1),
            pool: BTreeSet::new(),
        }
    }

    /// Accepts a fresh report set, resetting the cursor. Any reports still
    /// pooled from a previous set are discarded.
    pub fn set_reports(&mut self, reports: BTreeSet<DetectionReport>) {
        self.pool = reports;
    }

    /// Emits the next cohort: all remaining reports with
    /// `sensor_time ∈ [t0, t0 + window)` where `t0` is the earliest
    /// remaining time. Empty when exhausted.
    pub fn next_cohort(&mut self) -> BTreeSet<DetectionReport> {
        let Some(first) = self.pool.iter().next() else {
            return BTreeSet::new();
        };
        let cutoff: Timestamp = first.sensor_time().add_millis(self.window_ms);

        // The pool is ordered by sensor time first, so the cohort is a prefix.
        let cohort: BTreeSet<DetectionReport> = self
            .pool
            .iter()
            .take_while(|r| r.sensor_time() < cutoff)
            .cloned()
            .collect();
        self.pool.retain(|r| r.sensor_time() >= cutoff);
        cohort
    }

    pub fn remaining(&self) -> usize {
        self.pool.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::report::{FeatureMap, GeoPoint};

    fn report(id: u64, millis: i64) -> DetectionReport {
        DetectionReport::new(
            id,
            1,
            Timestamp::from_millis(millis),
            GeoPoint::new(10.0, 20.0, 0.0).unwrap(),
            FeatureMap::new(),
        )
        .unwrap()
    }

    #[test]
    fn partitions_into_disjoint_windows() {
        let reports: BTreeSet<_> = [
            report(1, 0),
            report(2, 300),
            report(3, 999),
            report(4, 1000),
            report(5, 2500),
        ]
        .into();
        let mut processor = AlignmentProcessor::new(1000);
        processor.set_reports(reports.clone());

        let first = processor.next_cohort();
        assert_eq!(
            first.iter().map(|r| r.report_id()).collect::<Vec<_>>(),
            vec![1, 2, 3]
        );

        let second = processor.next_cohort();
        assert_eq!(
            second.iter().map(|r| r.report_id()).collect::<Vec<_>>(),
            vec![4]
        );

        let third = processor.next_cohort();
        assert_eq!(
            third.iter().map(|r| r.report_id()).collect::<Vec<_>>(),
            vec![5]
        );

        // Disjoint union of cohorts equals the input set.
        let mut union = BTreeSet::new();
        union.extend(first);
        union.extend(second);
        union.extend(third);
        assert_eq!(union, reports);
    }

    #[test]
    fn exhausted_processor_is_idempotent() {
        let mut processor = AlignmentProcessor::new(1000);
        processor.set_reports([report(1, 0)].into());

        assert_eq!(processor.next_cohort().len(), 1);
        assert!(processor.next_cohort().is_empty());
        assert!(processor.next_cohort().is_empty());
    }

    #[test]
    fn set_reports_resets_cursor() {
        let mut processor = AlignmentProcessor::new(1000);
        processor.set_reports([report(1, 0), report(2, 5000)].into());
        processor.next_cohort();

        processor.set_reports([report(3, 100)].into());
        let cohort = processor.next_cohort();
        assert_eq!(cohort.iter().next().unwrap().report_id(), 3);
        assert!(processor.next_cohort().is_empty());
    }

    #[test]
    fn window_start_follows_earliest_remaining() {
        let mut processor = AlignmentProcessor::new(500);
        processor.set_reports([report(1, 700), report(2, 1100), report(3, 1300)].into());

        // t0 = 700 -> window [700, 1200)
        let first = processor.next_cohort();
        assert_eq!(first.len(), 2);
        // t0 = 1300 -> window [1300, 1800)
        let second = processor.next_cohort();
        assert_eq!(second.len(), 1);
    }
}
