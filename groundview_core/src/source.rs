//! Report intake - the only external I/O inside the core loop.

use std::collections::{BTreeSet, VecDeque};

use crate::error::TrackerError;
use crate::report::DetectionReport;

/// Pulls batches of detection reports from upstream storage.
///
/// `get_reports` may block awaiting new reports; an empty set signals that
/// the stream is drained and drives the pipeline loop to completion.
pub trait ReportSource {
    fn get_reports(&mut self) -> Result<BTreeSet<DetectionReport>, TrackerError>;
}

/// Scripted source backed by a queue of batches. Used by tests and the
/// simulator; real deployments implement [`ReportSource`] over their store.
#[derive(Debug, Default)]
pub struct InMemoryReportSource {
    batches: VecDeque<BTreeSet<DetectionReport>>,
}

impl InMemoryReportSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_batches(batches: impl IntoIterator<Item = BTreeSet<DetectionReport>>) -> Self {
        InMemoryReportSource {
            batches: batches.into_iter().collect(),
        }
    }

    pub fn push_batch(&mut self, batch: BTreeSet<DetectionReport>) {
        self.batches.push_back(batch);
    }
}

impl ReportSource for InMemoryReportSource {
    fn get_reports(&mut self) -> Result<BTreeSet<DetectionReport>, TrackerError> {
        Ok(self.batches.pop_front().unwrap_or_default())
    }
}
