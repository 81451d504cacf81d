//! Candidate selection - partitions a cohort into spatial neighbourhoods.
//!
//! Stage 1 prunes with H3 cells at a resolution matched to the configured
//! neighbourhood radius: only reports in the same or an adjacent cell are
//! candidate neighbours. Stage 2 gates candidate pairs on planar distance,
//! projected against the street map's normalisation origin when a map is
//! attached. Groups are the connected components of the resulting neighbour
//! relation: pairwise disjoint, complete, deterministically ordered.

use h3o::{CellIndex, LatLng, Resolution};
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use crate::error::TrackerError;
use crate::map::StreetMap;
use crate::report::DetectionReport;

/// Mean earth radius in meters.
const EARTH_RADIUS_M: f64 = 6_371_000.0;

/// Default neighbourhood radius in meters.
pub const DEFAULT_NEIGHBORHOOD_RADIUS_M: f64 = 50.0;

/// Average hexagon edge length in meters per H3 resolution.
/// Source: https://h3geo.org/docs/core-library/restable/
const H3_EDGE_LENGTH_M: [(Resolution, f64); 16] = [
    (Resolution::Zero, 1_107_712.591),
    (Resolution::One, 418_676.005),
    (Resolution::Two, 158_244.655),
    (Resolution::Three, 59_810.857),
    (Resolution::Four, 22_606.379),
    (Resolution::Five, 8_544.408),
    (Resolution::Six, 3_229.482),
    (Resolution::Seven, 1_220.629),
    (Resolution::Eight, 461.354),
    (Resolution::Nine, 174.375),
    (Resolution::Ten, 65.907),
    (Resolution::Eleven, 24.910),
    (Resolution::Twelve, 9.415),
    (Resolution::Thirteen, 3.559),
    (Resolution::Fourteen, 1.348),
    (Resolution::Fifteen, 0.509),
];

/// Finest resolution whose cells are still at least one radius wide, so two
/// reports within the radius always land in the same or adjacent cells.
fn resolution_for_radius(radius_m: f64) -> Resolution {
    let mut chosen = Resolution::Zero;
    for (resolution, edge_m) in H3_EDGE_LENGTH_M {
        if edge_m >= radius_m {
            chosen = resolution;
        } else {
            break;
        }
    }
    chosen
}

/// Equirectangular planar distance in meters, scaled at the reference
/// latitude.
pub fn planar_distance_m(
    (lon_a, lat_a): (f64, f64),
    (lon_b, lat_b): (f64, f64),
    reference_lat_deg: f64,
) -> f64 {
    let dx = (lon_b - lon_a).to_radians() * reference_lat_deg.to_radians().cos();
    let dy = (lat_b - lat_a).to_radians();
    (dx * dx + dy * dy).sqrt() * EARTH_RADIUS_M
}

struct UnionFind {
    parent: Vec<usize>,
}

impl UnionFind {
    fn new(len: usize) -> Self {
        UnionFind {
            parent: (0..len).collect(),
        }
    }

    fn find(&mut self, i: usize) -> usize {
        if self.parent[i] != i {
            let root = self.find(self.parent[i]);
            self.parent[i] = root;
        }
        self.parent[i]
    }

    fn union(&mut self, a: usize, b: usize) {
        let (ra, rb) = (self.find(a), self.find(b));
        if ra != rb {
            self.parent[rb.max(ra)] = rb.min(ra);
        }
    }
}

/// Partitions cohorts into disjoint neighbourhood groups.
pub struct CandidateSelector {
    resolution: Resolution,
    neighborhood_radius_m: f64,
    map: Option<Arc<StreetMap>>,
}

impl CandidateSelector {
    pub fn new(neighborhood_radius_m: f64) -> Self {
        CandidateSelector {
            resolution: resolution_for_radius(neighborhood_radius_m),
            neighborhood_radius_m,
            map: None,
        }
    }

    /// Attaches the read-only street map; its normalisation origin anchors
    /// the planar projection.
    pub fn with_map(mut self, map: Arc<StreetMap>) -> Self {
        self.map = Some(map);
        self
    }

    /// Splits the cohort into an ordered list of disjoint non-empty groups
    /// whose union equals the cohort. Rejects out-of-domain coordinates with
    /// bad-input.
    pub fn partition(
        &self,
        cohort: &BTreeSet<DetectionReport>,
    ) -> Result<Vec<BTreeSet<DetectionReport>>, TrackerError> {
        if cohort.is_empty() {
            return Ok(Vec::new());
        }

        let reports: Vec<&DetectionReport> = cohort.iter().collect();
        for report in &reports {
            report.position().validate()?;
        }

        let reference_lat = self.reference_latitude(&reports);

        // Stage 1: coarse cell per report plus a cell -> report index bucket.
        let mut cells: Vec<CellIndex> = Vec::with_capacity(reports.len());
        let mut buckets: HashMap<CellIndex, Vec<usize>> = HashMap::new();
        for (idx, report) in reports.iter().enumerate() {
            let latlng = LatLng::new(report.latitude(), report.longitude())
                .map_err(|e| TrackerError::bad_input(format!("invalid coordinates: {e}")))?;
            let cell = latlng.to_cell(self.resolution);
            cells.push(cell);
            buckets.entry(cell).or_default().push(idx);
        }

        // Stage 2: gate same-or-adjacent-cell pairs on planar distance.
        let mut components = UnionFind::new(reports.len());
        for (idx, cell) in cells.iter().enumerate() {
            for neighbor_cell in cell.grid_disk_safe(1) {
                let Some(candidates) = buckets.get(&neighbor_cell) else {
                    continue;
                };
                for &other in candidates {
                    if other <= idx {
                        continue;
                    }
                    let distance = planar_distance_m(
                        (reports[idx].longitude(), reports[idx].latitude()),
                        (reports[other].longitude(), reports[other].latitude()),
                        reference_lat,
                    );
                    if distance <= self.neighborhood_radius_m {
                        components.union(idx, other);
                    }
                }
            }
        }

        // Components keyed by root; reports stay in cohort order, so the
        // group list is ordered by each group's earliest report.
        let mut groups: Vec<(usize, BTreeSet<DetectionReport>)> = Vec::new();
        let mut root_to_group: HashMap<usize, usize> = HashMap::new();
        for (idx, report) in reports.iter().enumerate() {
            let root = components.find(idx);
            let slot = *root_to_group.entry(root).or_insert_with(|| {
                groups.push((idx, BTreeSet::new()));
                groups.len() - 1
            });
            groups[slot].1.insert((*report).clone());
        }
        groups.sort_by_key(|(first_idx, _)| *first_idx);

        Ok(groups.into_iter().map(|(_, group)| group).collect())
    }

    fn reference_latitude(&self, reports: &[&DetectionReport]) -> f64 {
        match &self.map {
            Some(map) => map.normalization_origin().1,
            None => reports
                .iter()
                .map(|r| r.latitude())
                .fold(f64::MAX, f64::min),
        }
    }
}
