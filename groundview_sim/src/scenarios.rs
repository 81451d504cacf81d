//! Synthetic tracking scenarios.
//!
//! Each scenario scripts a set of ground-truth objects and turns them into
//! noisy detection report batches. All randomness derives from the run seed,
//! so any failure reproduces from its seed number.

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use std::collections::BTreeSet;

use groundview_core::{DetectionReport, FeatureMap, GeoPoint, Timestamp};

/// Scenario identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScenarioId {
    /// Two objects on crossing paths observed by two sensors.
    Crossing,

    /// A three-vehicle convoy moving along one bearing.
    Convoy,

    /// One object, a silence longer than any sane TTL, then a reappearance.
    Dropout,
}

impl ScenarioId {
    pub fn all() -> Vec<ScenarioId> {
        vec![ScenarioId::Crossing, ScenarioId::Convoy, ScenarioId::Dropout]
    }

    pub fn name(&self) -> &'static str {
        match self {
            ScenarioId::Crossing => "crossing",
            ScenarioId::Convoy => "convoy",
            ScenarioId::Dropout => "dropout",
        }
    }

    pub fn from_name(name: &str) -> Option<ScenarioId> {
        Self::all().into_iter().find(|s| s.name() == name)
    }

    /// Number of distinct objects the tracker should end up with.
    pub fn expected_tracks(&self) -> usize {
        match self {
            ScenarioId::Crossing => 2,
            ScenarioId::Convoy => 3,
            ScenarioId::Dropout => 1,
        }
    }
}

/// A scripted ground-truth object.
struct GroundTruth {
    lon: f64,
    lat: f64,
    lon_vel_deg_s: f64,
    lat_vel_deg_s: f64,
    class: Option<&'static str>,
}

impl GroundTruth {
    fn position_at(&self, secs: f64) -> (f64, f64) {
        (
            self.lon + self.lon_vel_deg_s * secs,
            self.lat + self.lat_vel_deg_s * secs,
        )
    }
}

/// Turns a scenario into report batches at the given cadence.
pub struct ScenarioGenerator {
    rng: ChaCha8Rng,
    noise_deg: f64,
    next_report_id: u64,
}

impl ScenarioGenerator {
    pub fn new(seed: u64) -> Self {
        ScenarioGenerator {
            rng: ChaCha8Rng::seed_from_u64(seed),
            noise_deg: 2e-5,
            next_report_id: 0,
        }
    }

    /// Generates the full batch list for a scenario.
    pub fn generate(
        &mut self,
        scenario: ScenarioId,
        duration_secs: f64,
    ) -> Vec<BTreeSet<DetectionReport>> {
        let objects = self.ground_truth(scenario);
        let cadence_secs = 0.5;
        let mut batches = Vec::new();

        let steps = (duration_secs / cadence_secs).ceil() as u64;
        for step in 0..steps {
            let secs = step as f64 * cadence_secs;
            if scenario == ScenarioId::Dropout && (4.0..12.0).contains(&secs) {
                continue; // sensor silence
            }
            let mut batch = BTreeSet::new();
            for (object_idx, object) in objects.iter().enumerate() {
                let (lon, lat) = object.position_at(secs);
                for sensor_id in 0..2u32 {
                    if let Some(dr) = self.observe(sensor_id, object_idx, object, lon, lat, secs) {
                        batch.insert(dr);
                    }
                }
            }
            if !batch.is_empty() {
                batches.push(batch);
            }
        }
        batches
    }

    fn observe(
        &mut self,
        sensor_id: u32,
        object_idx: usize,
        object: &GroundTruth,
        lon: f64,
        lat: f64,
        secs: f64,
    ) -> Option<DetectionReport> {
        let noisy_lon = lon + self.rng.gen_range(-self.noise_deg..self.noise_deg);
        let noisy_lat = lat + self.rng.gen_range(-self.noise_deg..self.noise_deg);
        // Per-sensor clock skew stays well inside one alignment window.
        let skew_secs = self.rng.gen_range(0..50) as f64 / 1000.0;

        let mut features = FeatureMap::new();
        features.insert("object".to_string(), format!("obj-{object_idx}"));
        if let Some(class) = object.class {
            features.insert("class".to_string(), class.to_string());
        }

        let report_id = self.next_report_id;
        self.next_report_id += 1;

        DetectionReport::new(
            report_id,
            sensor_id,
            Timestamp::from_secs_f64(secs + skew_secs),
            GeoPoint::new(noisy_lon, noisy_lat, 10.0).ok()?,
            features,
        )
        .ok()
    }

    fn ground_truth(&self, scenario: ScenarioId) -> Vec<GroundTruth> {
        match scenario {
            ScenarioId::Crossing => vec![
                GroundTruth {
                    lon: 18.60,
                    lat: 54.35,
                    lon_vel_deg_s: 4e-5,
                    lat_vel_deg_s: 0.0,
                    class: Some("vehicle"),
                },
                GroundTruth {
                    lon: 18.62,
                    lat: 54.34,
                    lon_vel_deg_s: -4e-5,
                    lat_vel_deg_s: 1e-5,
                    class: Some("human"),
                },
            ],
            ScenarioId::Convoy => (0..3)
                .map(|i| GroundTruth {
                    lon: 18.60 + i as f64 * 0.01,
                    lat: 54.35,
                    lon_vel_deg_s: 5e-5,
                    lat_vel_deg_s: 0.0,
                    class: Some("vehicle"),
                })
                .collect(),
            ScenarioId::Dropout => vec![GroundTruth {
                lon: 18.60,
                lat: 54.35,
                lon_vel_deg_s: 3e-5,
                lat_vel_deg_s: 0.0,
                class: None,
            }],
        }
    }
}
