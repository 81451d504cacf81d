//! Linear Gaussian recursive estimation.
//!
//! The state model is the 4-dimensional vector `[lon, lat, lon_vel, lat_vel]`.
//! Altitude is carried by tracks but not filtered. Each track owns one filter
//! instance; filters are cloneable so every new track receives an independent
//! copy of the configured prototype.

use nalgebra::{Matrix2, Matrix2x4, Matrix4, Vector2, Vector4};

use crate::error::FilterError;

/// Dimensionality of the filter state.
pub const STATE_DIM: usize = 4;

/// One filter output: the state vector and the per-axis variance
/// (the covariance diagonal).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Estimate {
    pub state: Vector4<f64>,
    pub variance: Vector4<f64>,
}

/// A linear Gaussian recursive estimator.
///
/// Implementations may substitute any estimator preserving the
/// predict/correct output contract. A singular covariance must fail with
/// [`FilterError::Degenerate`], never produce NaN.
pub trait EstimationFilter: Send + Sync {
    /// Seeds state and diagonal covariance, then performs and returns the
    /// first prediction.
    fn initialize(
        &mut self,
        state: Vector4<f64>,
        covariance_diag: Vector4<f64>,
    ) -> Result<Estimate, FilterError>;

    /// Advances one step, optionally driven by a control input.
    fn predict(&mut self, control: Option<Vector4<f64>>) -> Result<Estimate, FilterError>;

    /// Folds in an observation given in state-space layout; only the
    /// positional components are measured (projected through H).
    fn correct(&mut self, observation: Vector4<f64>) -> Result<Estimate, FilterError>;

    /// Independent deep copy.
    fn clone_filter(&self) -> Box<dyn EstimationFilter>;
}

/// Standard Kalman filter over the position/velocity model.
#[derive(Debug, Clone)]
pub struct KalmanFilter {
    a: Matrix4<f64>,
    b: Option<Matrix4<f64>>,
    q: Matrix4<f64>,
    r: Matrix2<f64>,
    h: Matrix2x4<f64>,
    state: Vector4<f64>,
    covariance: Matrix4<f64>,
    initialized: bool,
}

impl KalmanFilter {
    pub fn new(
        a: Matrix4<f64>,
        b: Option<Matrix4<f64>>,
        q: Matrix4<f64>,
        r: Matrix2<f64>,
        h: Matrix2x4<f64>,
    ) -> Self {
        KalmanFilter {
            a,
            b,
            q,
            r,
            h,
            state: Vector4::zeros(),
            covariance: Matrix4::zeros(),
            initialized: false,
        }
    }

    /// Constant-velocity model: position advances by velocity over `dt_secs`,
    /// only position is observed.
    pub fn constant_velocity(dt_secs: f64, process_noise: f64, measurement_noise: f64) -> Self {
        let mut a = Matrix4::identity();
        a[(0, 2)] = dt_secs;
        a[(1, 3)] = dt_secs;

        let mut h = Matrix2x4::zeros();
        h[(0, 0)] = 1.0;
        h[(1, 1)] = 1.0;

        KalmanFilter::new(
            a,
            None,
            Matrix4::identity() * process_noise,
            Matrix2::identity() * measurement_noise,
            h,
        )
    }

    fn ensure_initialized(&self) -> Result<(), FilterError> {
        if self.initialized {
            Ok(())
        } else {
            Err(FilterError::Uninitialized)
        }
    }

    fn estimate(&self) -> Estimate {
        Estimate {
            state: self.state,
            variance: self.covariance.diagonal(),
        }
    }
}

fn finite2(m: &Matrix2<f64>) -> bool {
    m.iter().all(|v| v.is_finite())
}

impl EstimationFilter for KalmanFilter {
    fn initialize(
        &mut self,
        state: Vector4<f64>,
        covariance_diag: Vector4<f64>,
    ) -> Result<Estimate, FilterError> {
        self.state = state;
        self.covariance = Matrix4::from_diagonal(&covariance_diag);
        self.initialized = true;
        self.predict(None)
    }

    fn predict(&mut self, control: Option<Vector4<f64>>) -> Result<Estimate, FilterError> {
        self.ensure_initialized()?;

        let mut predicted = self.a * self.state;
        if let (Some(b), Some(u)) = (self.b.as_ref(), control) {
            predicted += b * u;
        }
        self.state = predicted;
        self.covariance = self.a * self.covariance * self.a.transpose() + self.q;

        if !self.state.iter().all(|v| v.is_finite()) {
            return Err(FilterError::Degenerate);
        }
        Ok(self.estimate())
    }

    fn correct(&mut self, observation: Vector4<f64>) -> Result<Estimate, FilterError> {
        self.ensure_initialized()?;

        let z: Vector2<f64> = self.h * observation;
        let innovation = z - self.h * self.state;

        // S = H P Hᵀ + R; a singular innovation covariance aborts the update.
        let s: Matrix2<f64> = self.h * self.covariance * self.h.transpose() + self.r;
        if !finite2(&s) {
            return Err(FilterError::Degenerate);
        }
        let s_inv = s.try_inverse().ok_or(FilterError::Degenerate)?;
        if !finite2(&s_inv) {
            return Err(FilterError::Degenerate);
        }

        let gain = self.covariance * self.h.transpose() * s_inv;
        self.state += gain * innovation;

        // Joseph form for numerical stability.
        let ikh = Matrix4::identity() - gain * self.h;
        self.covariance =
            ikh * self.covariance * ikh.transpose() + gain * self.r * gain.transpose();

        if !self.state.iter().all(|v| v.is_finite()) {
            return Err(FilterError::Degenerate);
        }
        Ok(self.estimate())
    }

    fn clone_filter(&self) -> Box<dyn EstimationFilter> {
        Box::new(self.clone())
    }
}
