//! Snapshot publication - the single multi-threaded point of the pipeline.
//!
//! A snapshot is an immutable deep clone of the live track set (each track
//! cloned including its filter). The publisher swaps an `Arc` behind a short
//! lock: readers observe the previous or the new snapshot, never a torn
//! state, and keep whatever snapshot they hold alive until they drop it.

use parking_lot::RwLock;
use std::sync::Arc;

use crate::report::Timestamp;
use crate::track::{Track, TrackManager};

/// Frozen view of the world at publication time. Cloned tracks expose all
/// getters but no mutators.
pub struct Snapshot {
    published_at: Timestamp,
    tracks: Vec<Track>,
}

impl Snapshot {
    fn empty() -> Self {
        Snapshot {
            published_at: Timestamp::EPOCH,
            tracks: Vec::new(),
        }
    }

    fn capture(manager: &TrackManager, published_at: Timestamp) -> Self {
        Snapshot {
            published_at,
            tracks: manager.tracks().cloned().collect(),
        }
    }

    pub fn published_at(&self) -> Timestamp {
        self.published_at
    }

    pub fn tracks(&self) -> &[Track] {
        &self.tracks
    }

    pub fn len(&self) -> usize {
        self.tracks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }
}

/// Atomically replaces the published snapshot; any number of readers may
/// call [`get`](SnapshotPublisher::get) concurrently. Last writer wins.
pub struct SnapshotPublisher {
    current: RwLock<Arc<Snapshot>>,
}

impl Default for SnapshotPublisher {
    fn default() -> Self {
        Self::new()
    }
}

impl SnapshotPublisher {
    pub fn new() -> Self {
        SnapshotPublisher {
            current: RwLock::new(Arc::new(Snapshot::empty())),
        }
    }

    /// Deep-clones the live track set and swaps it in.
    pub fn publish(&self, manager: &TrackManager, at: Timestamp) {
        let snapshot = Arc::new(Snapshot::capture(manager, at));
        *self.current.write() = snapshot;
    }

    /// The current snapshot, shared and immutable.
    pub fn get(&self) -> Arc<Snapshot> {
        Arc::clone(&self.current.read())
    }
}
