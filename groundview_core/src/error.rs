//! Error types for the tracking pipeline.

use thiserror::Error;
use uuid::Uuid;

/// Errors raised by the tracking pipeline.
#[derive(Debug, Error)]
pub enum TrackerError {
    /// Coordinates out of domain, malformed report set, or a configured
    /// matrix with the wrong shape. Rejected at intake; the pipeline
    /// continues with the next batch.
    #[error("bad input: {0}")]
    BadInput(String),

    /// Numeric failure inside an estimation filter.
    #[error(transparent)]
    Filter(#[from] FilterError),

    /// A track handle no longer resolves to a live track.
    #[error("track not found: {0}")]
    TrackNotFound(Uuid),

    /// Cooperative cancellation was signalled between cohorts or batches.
    #[error("pipeline cancelled")]
    Cancelled,

    /// The report source failed while pulling a batch.
    #[error("report source: {0}")]
    Source(String),
}

impl TrackerError {
    /// Creates a bad-input error.
    pub fn bad_input(msg: impl Into<String>) -> Self {
        Self::BadInput(msg.into())
    }

    /// Creates a report-source error.
    pub fn source(msg: impl Into<String>) -> Self {
        Self::Source(msg.into())
    }
}

/// Numeric failures of an estimation filter.
///
/// A degenerate covariance must surface as an error, never as NaN in the
/// estimate. The owning track is marked unhealthy and expired at the next
/// TTL pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum FilterError {
    /// Non-invertible or non-finite innovation covariance.
    #[error("degenerate covariance matrix")]
    Degenerate,

    /// `predict`/`correct` called before `initialize`.
    #[error("filter not initialized")]
    Uninitialized,
}
