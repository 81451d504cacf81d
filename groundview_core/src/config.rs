//! Tracker configuration.
//!
//! Most knobs carry the documented defaults; the track TTL deliberately has
//! none and must be stated. Filter matrices arrive as rows and are
//! shape-checked into fixed-size types (bad-input on mismatch).

use nalgebra::{Matrix2, Matrix2x4, Matrix4};
use serde::{Deserialize, Serialize};

use crate::alignment::DEFAULT_WINDOW_MS;
use crate::association::{ListComparator, ResultComparator};
use crate::error::TrackerError;
use crate::estimation::KalmanFilter;
use crate::selection::DEFAULT_NEIGHBORHOOD_RADIUS_M;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackerConfig {
    #[serde(default)]
    pub alignment: AlignmentConfig,
    #[serde(default)]
    pub association: AssociationConfig,
    /// Required: no implicit TTL.
    pub track: TrackConfig,
    #[serde(default)]
    pub selection: SelectionConfig,
    #[serde(default)]
    pub filter: FilterConfig,
}

impl TrackerConfig {
    /// Programmatic construction: defaults everywhere except the TTL, which
    /// the caller must state.
    pub fn with_ttl_ms(ttl_ms: i64) -> Self {
        TrackerConfig {
            alignment: AlignmentConfig::default(),
            association: AssociationConfig::default(),
            track: TrackConfig { ttl_ms },
            selection: SelectionConfig::default(),
            filter: FilterConfig::default(),
        }
    }

    pub fn validate(&self) -> Result<(), TrackerError> {
        if self.alignment.window_ms < 1 {
            return Err(TrackerError::bad_input("alignment.window_ms must be >= 1"));
        }
        if !(0.0..=1.0).contains(&self.association.threshold) {
            return Err(TrackerError::bad_input(
                "association.threshold must be in [0, 1]",
            ));
        }
        if self.track.ttl_ms < 1 {
            return Err(TrackerError::bad_input("track.ttl_ms must be >= 1"));
        }
        if !(self.selection.neighborhood_radius_m > 0.0) {
            return Err(TrackerError::bad_input(
                "selection.neighborhood_radius_m must be > 0",
            ));
        }
        self.filter.build()?;
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlignmentConfig {
    pub window_ms: i64,
}

impl Default for AlignmentConfig {
    fn default() -> Self {
        AlignmentConfig {
            window_ms: DEFAULT_WINDOW_MS,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssociationConfig {
    pub threshold: f64,
    #[serde(default)]
    pub result_comparator: ResultComparator,
    #[serde(default)]
    pub list_comparator: ListComparator,
}

impl Default for AssociationConfig {
    fn default() -> Self {
        AssociationConfig {
            threshold: 1.0,
            result_comparator: ResultComparator::Or,
            list_comparator: ListComparator::Or,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackConfig {
    /// Maximum unrefreshed lifetime in milliseconds. No default.
    pub ttl_ms: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SelectionConfig {
    /// Neighbourhood radius in meters; the coarse H3 index resolution
    /// follows from it.
    pub neighborhood_radius_m: f64,
}

impl Default for SelectionConfig {
    fn default() -> Self {
        SelectionConfig {
            neighborhood_radius_m: DEFAULT_NEIGHBORHOOD_RADIUS_M,
        }
    }
}

/// Kalman matrices as rows: A, Q are 4x4; R is 2x2; H is 2x4; B optional 4x4.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FilterConfig {
    pub a: Vec<Vec<f64>>,
    #[serde(default)]
    pub b: Option<Vec<Vec<f64>>>,
    pub q: Vec<Vec<f64>>,
    pub r: Vec<Vec<f64>>,
    pub h: Vec<Vec<f64>>,
}

impl Default for FilterConfig {
    /// Constant-velocity model over one alignment window (1 s step).
    fn default() -> Self {
        FilterConfig {
            a: vec![
                vec![1.0, 0.0, 1.0, 0.0],
                vec![0.0, 1.0, 0.0, 1.0],
                vec![0.0, 0.0, 1.0, 0.0],
                vec![0.0, 0.0, 0.0, 1.0],
            ],
            b: None,
            q: diagonal_rows(4, 1e-4),
            r: diagonal_rows(2, 1e-4),
            h: vec![
                vec![1.0, 0.0, 0.0, 0.0],
                vec![0.0, 1.0, 0.0, 0.0],
            ],
        }
    }
}

fn diagonal_rows(dim: usize, value: f64) -> Vec<Vec<f64>> {
    (0..dim)
        .map(|i| (0..dim).map(|j| if i == j { value } else { 0.0 }).collect())
        .collect()
}

impl FilterConfig {
    /// Builds the filter prototype, rejecting shape mismatches.
    pub fn build(&self) -> Result<KalmanFilter, TrackerError> {
        let a = matrix4("filter.a", &self.a)?;
        let b = self.b.as_ref().map(|rows| matrix4("filter.b", rows)).transpose()?;
        let q = matrix4("filter.q", &self.q)?;
        let r = matrix2("filter.r", &self.r)?;
        let h = matrix2x4("filter.h", &self.h)?;
        Ok(KalmanFilter::new(a, b, q, r, h))
    }
}

fn check_shape(
    name: &str,
    rows: &[Vec<f64>],
    expected_rows: usize,
    expected_cols: usize,
) -> Result<(), TrackerError> {
    if rows.len() != expected_rows || rows.iter().any(|r| r.len() != expected_cols) {
        return Err(TrackerError::bad_input(format!(
            "{name} must be {expected_rows}x{expected_cols}"
        )));
    }
    Ok(())
}

fn matrix4(name: &str, rows: &[Vec<f64>]) -> Result<Matrix4<f64>, TrackerError> {
    check_shape(name, rows, 4, 4)?;
    Ok(Matrix4::from_fn(|i, j| rows[i][j]))
}

fn matrix2(name: &str, rows: &[Vec<f64>]) -> Result<Matrix2<f64>, TrackerError> {
    check_shape(name, rows, 2, 2)?;
    Ok(Matrix2::from_fn(|i, j| rows[i][j]))
}

fn matrix2x4(name: &str, rows: &[Vec<f64>]) -> Result<Matrix2x4<f64>, TrackerError> {
    check_shape(name, rows, 2, 4)?;
    Ok(Matrix2x4::from_fn(|i, j| rows[i][j]))
}
