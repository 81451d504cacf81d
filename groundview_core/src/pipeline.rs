//! The pipeline driver.
//!
//! Pulls batches from the report source, drains the alignment processor, and
//! runs each cohort through selection, association, track birth and fusion
//! before publishing a snapshot. Logically sequential per batch; the
//! snapshot publisher is the only state shared with other threads.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::alignment::AlignmentProcessor;
use crate::association::DataAssociator;
use crate::config::TrackerConfig;
use crate::error::TrackerError;
use crate::estimation::EstimationFilter;
use crate::fusion::{FusionExecutor, FusionStats};
use crate::map::StreetMap;
use crate::report::{DetectionReport, Timestamp};
use crate::selection::CandidateSelector;
use crate::snapshot::SnapshotPublisher;
use crate::source::ReportSource;
use crate::track::TrackManager;

/// Cooperative cancellation flag, checked between cohorts and batches.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// Counters accumulated over a run.
#[derive(Debug, Clone, Copy, Default)]
pub struct PipelineStats {
    pub batches: usize,
    pub rejected_batches: usize,
    pub cohorts: usize,
    pub tracks_born: usize,
    pub tracks_expired: usize,
    pub snapshots_published: usize,
    pub fusion: FusionStats,
}

/// Orchestrates the data flow and owns every pipeline component.
///
/// The track manager is a singleton owned here; the associator and fusion
/// executor borrow it per cohort. Either a cohort commits entirely or it
/// leaves the manager untouched: association only reads, and mutation starts
/// only after selection and association have succeeded.
pub struct DataManager<S: ReportSource> {
    source: S,
    alignment: AlignmentProcessor,
    selector: CandidateSelector,
    associator: DataAssociator,
    manager: TrackManager,
    executor: FusionExecutor,
    publisher: Arc<SnapshotPublisher>,
    filter_prototype: Box<dyn EstimationFilter>,
    cancel: CancelToken,
    stats: PipelineStats,
}

impl<S: ReportSource> DataManager<S> {
    /// Builds the full pipeline from a validated configuration.
    pub fn from_config(config: &TrackerConfig, source: S) -> Result<Self, TrackerError> {
        config.validate()?;
        let filter = config.filter.build()?;
        Ok(DataManager {
            source,
            alignment: AlignmentProcessor::new(config.alignment.window_ms),
            selector: CandidateSelector::new(config.selection.neighborhood_radius_m),
            associator: DataAssociator::new(
                config.association.result_comparator,
                config.association.list_comparator,
                config.association.threshold,
            ),
            manager: TrackManager::new(config.track.ttl_ms),
            executor: FusionExecutor::new(),
            publisher: Arc::new(SnapshotPublisher::new()),
            filter_prototype: Box::new(filter),
            cancel: CancelToken::new(),
            stats: PipelineStats::default(),
        })
    }

    /// Attaches the read-only street map used by the candidate selector.
    pub fn with_map(mut self, map: Arc<StreetMap>) -> Self {
        self.selector = self.selector.with_map(map);
        self
    }

    /// Handle for snapshot consumers; clone freely across threads.
    pub fn publisher(&self) -> Arc<SnapshotPublisher> {
        Arc::clone(&self.publisher)
    }

    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    pub fn track_manager(&self) -> &TrackManager {
        &self.manager
    }

    pub fn stats(&self) -> PipelineStats {
        self.stats
    }

    /// Runs until the source drains or cancellation is signalled.
    ///
    /// A bad-input batch is rejected and logged; the loop continues with the
    /// next one. Cancellation discards the in-flight cohort and does not
    /// republish.
    pub fn run(&mut self) -> Result<PipelineStats, TrackerError> {
        loop {
            if self.cancel.is_cancelled() {
                info!("pipeline cancelled between batches");
                return Err(TrackerError::Cancelled);
            }

            let batch = self.source.get_reports()?;
            if batch.is_empty() {
                info!(batches = self.stats.batches, "report stream drained");
                return Ok(self.stats);
            }

            self.stats.batches += 1;
            match self.process_batch(batch) {
                Ok(()) => {}
                Err(TrackerError::BadInput(reason)) => {
                    warn!(%reason, "batch rejected");
                    self.stats.rejected_batches += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }

    /// Aligns one batch into cohorts and processes each in order.
    pub fn process_batch(
        &mut self,
        batch: BTreeSet<DetectionReport>,
    ) -> Result<(), TrackerError> {
        debug!(reports = batch.len(), "processing batch");
        self.alignment.set_reports(batch);

        loop {
            if self.cancel.is_cancelled() {
                info!("pipeline cancelled between cohorts");
                return Err(TrackerError::Cancelled);
            }
            let cohort = self.alignment.next_cohort();
            if cohort.is_empty() {
                return Ok(());
            }
            self.process_cohort(cohort)?;
        }
    }

    /// One cohort: select -> associate -> birth -> fuse -> expire -> publish.
    fn process_cohort(&mut self, cohort: BTreeSet<DetectionReport>) -> Result<(), TrackerError> {
        let cohort_end = cohort
            .iter()
            .map(DetectionReport::sensor_time)
            .max()
            .unwrap_or(Timestamp::EPOCH);

        // Read-only phase: failures here leave the track manager untouched.
        let groups = self.selector.partition(&cohort)?;
        debug!(reports = cohort.len(), groups = groups.len(), "cohort selected");

        self.associator.set_input(groups);
        self.associator.compute(&self.manager);
        let associated = self.associator.tracks_to_reports().clone();
        let residual = self.associator.unassociated();

        // Commit phase.
        let born = self
            .manager
            .initialize_tracks(residual, self.filter_prototype.as_ref())?;
        self.stats.tracks_born += born.len();

        self.stats.fusion.merge(self.executor.fuse(&mut self.manager, &associated));
        self.stats.fusion.merge(self.executor.fuse(&mut self.manager, &born));

        self.stats.tracks_expired += self.manager.expire(cohort_end);
        self.publisher.publish(&self.manager, cohort_end);
        self.stats.snapshots_published += 1;
        self.stats.cohorts += 1;

        debug!(
            tracks = self.manager.len(),
            born = born.len(),
            at = %cohort_end,
            "cohort committed"
        );
        Ok(())
    }

    /// TTL pass without new reports: expires stale tracks and republishes.
    /// Lets replay drivers advance time past the last measurement.
    pub fn expire_and_publish(&mut self, now: Timestamp) {
        self.stats.tracks_expired += self.manager.expire(now);
        self.publisher.publish(&self.manager, now);
        self.stats.snapshots_published += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::report::{FeatureMap, GeoPoint};
    use crate::source::InMemoryReportSource;

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

    fn config() -> TrackerConfig {
        let mut config = TrackerConfig::with_ttl_ms(10_000);
        config.association.threshold = 0.0;
        config
    }

    #[test]
    fn run_drains_source_and_tracks_object() {
        let batch: BTreeSet<_> = [
            report(1, 0, 10.0, 20.0),
            report(2, 300, 10.0001, 20.0001),
            report(3, 600, 10.0002, 20.0002),
        ]
        .into();
        let source = InMemoryReportSource::from_batches([batch]);
        let mut pipeline = DataManager::from_config(&config(), source).unwrap();
        let publisher = pipeline.publisher();

        let stats = pipeline.run().unwrap();
        assert_eq!(stats.batches, 1);
        assert_eq!(stats.cohorts, 1);
        assert_eq!(stats.tracks_born, 1);

        let snapshot = publisher.get();
        assert_eq!(snapshot.len(), 1);
        assert_eq!(
            snapshot.tracks()[0].refresh_time(),
            Timestamp::from_millis(600)
        );
    }

    #[test]
    fn cancellation_stops_before_next_batch() {
        let source = InMemoryReportSource::from_batches([
            BTreeSet::from([report(1, 0, 10.0, 20.0)]),
        ]);
        let mut pipeline = DataManager::from_config(&config(), source).unwrap();
        pipeline.cancel_token().cancel();

        assert!(matches!(pipeline.run(), Err(TrackerError::Cancelled)));
        assert!(pipeline.publisher().get().is_empty());
    }

    #[test]
    fn expire_and_publish_advances_ttl_without_reports() {
        let source = InMemoryReportSource::from_batches([
            BTreeSet::from([report(1, 0, 10.0, 20.0)]),
        ]);
        let mut config = config();
        config.track.ttl_ms = 1000;
        let mut pipeline = DataManager::from_config(&config, source).unwrap();
        pipeline.run().unwrap();
        assert_eq!(pipeline.publisher().get().len(), 1);

        pipeline.expire_and_publish(Timestamp::from_millis(1001));
        assert!(pipeline.publisher().get().is_empty());
    }
}
