//! Fusion execution - applies associated measurements to their tracks.

use std::collections::BTreeMap;
use tracing::warn;

use crate::association::Group;
use crate::error::TrackerError;
use crate::track::{MeasurementOutcome, TrackId, TrackManager};

/// Per-fuse telemetry. Stale drops are not errors at this boundary; they are
/// counted here.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FusionStats {
    pub applied: usize,
    pub stale_dropped: usize,
    pub rejected: usize,
    pub degenerate: usize,
}

impl FusionStats {
    pub fn merge(&mut self, other: FusionStats) {
        self.applied += other.applied;
        self.stale_dropped += other.stale_dropped;
        self.rejected += other.rejected;
        self.degenerate += other.degenerate;
    }
}

/// Feeds each track its associated reports in sensor-time order.
///
/// Ordering matters: out-of-order application would trip the refresh-time
/// monotonicity guard and silently drop valid measurements.
#[derive(Debug, Default)]
pub struct FusionExecutor;

impl FusionExecutor {
    pub fn new() -> Self {
        FusionExecutor
    }

    pub fn fuse(
        &self,
        manager: &mut TrackManager,
        associations: &BTreeMap<TrackId, Group>,
    ) -> FusionStats {
        let mut stats = FusionStats::default();

        for (id, reports) in associations {
            // Group iteration is ascending by sensor time already.
            for dr in reports {
                match manager.apply_measurement(*id, dr) {
                    Ok(MeasurementOutcome::Applied) => stats.applied += 1,
                    Ok(MeasurementOutcome::Stale) => stats.stale_dropped += 1,
                    Ok(MeasurementOutcome::Rejected) => stats.rejected += 1,
                    Err(TrackerError::Filter(err)) => {
                        // Track is unhealthy now; stop feeding it.
                        warn!(track = %id, %err, "fusion aborted for track");
                        stats.degenerate += 1;
                        break;
                    }
                    Err(err) => {
                        warn!(track = %id, %err, "measurement not applied");
                        break;
                    }
                }
            }
        }
        stats
    }
}
