//! GroundView Core - Multi-Sensor Target Tracking Pipeline
//!
//! Consumes timestamped detection reports from heterogeneous sensors
//! observing one scene and maintains a live set of tracks: probabilistic
//! estimates of position, velocity and identity per detected object.
//!
//! The pipeline stages, in data-flow order:
//! 1. **Alignment**: reports grouped into time-windowed cohorts
//! 2. **Selection**: cohorts partitioned into spatial neighbourhoods
//! 3. **Association**: neighbourhood groups matched greedily to tracks
//! 4. **Birth/Fusion**: unmatched groups spawn tracks; matched reports feed
//!    each track's Kalman filter in sensor-time order
//! 5. **Publication**: a deep-cloned snapshot is swapped in for readers
//!
//! The driver is single-threaded per batch; only published snapshots are
//! shared across threads.

pub mod alignment;
pub mod association;
pub mod config;
pub mod error;
pub mod estimation;
pub mod fusion;
pub mod map;
pub mod pipeline;
pub mod report;
pub mod selection;
pub mod snapshot;
pub mod source;
pub mod track;

// Re-export key types for convenience
pub use alignment::AlignmentProcessor;
pub use association::{DataAssociator, Group, ListComparator, ResultComparator};
pub use config::TrackerConfig;
pub use error::{FilterError, TrackerError};
pub use estimation::{Estimate, EstimationFilter, KalmanFilter};
pub use fusion::{FusionExecutor, FusionStats};
pub use map::{Street, StreetMap, StreetNode};
pub use pipeline::{CancelToken, DataManager, PipelineStats};
pub use report::{DetectionReport, FeatureMap, GeoPoint, Timestamp};
pub use selection::CandidateSelector;
pub use snapshot::{Snapshot, SnapshotPublisher};
pub use source::{InMemoryReportSource, ReportSource};
pub use track::{MeasurementOutcome, Track, TrackId, TrackKind, TrackManager};
