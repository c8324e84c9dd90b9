//! Per-axis smoothing of projected coordinates.
//!
//! Each axis gets its own scalar Kalman filter with a static-state process
//! model:
//!
//! ```text
//! predict:  P⁻ = P + q
//! gain:     K  = P⁻ / (P⁻ + r)
//! correct:  x  = x + K · (z − x)
//!           P  = (1 − K) · P⁻
//! ```
//!
//! `q` (process variance) says how much the true position may wander between
//! frames; `r` (measurement variance) says how noisy a single reading is.
//!
//! # Example
//!
//! ```rust
//! use armsight_perception::filter::{KalmanFilter1D, FilterTuning};
//!
//! let mut kf = KalmanFilter1D::new(FilterTuning::SIMULATION);
//! assert_eq!(kf.update(12.5), 12.5); // first sample passes straight through
//! let smoothed = kf.update(13.0);
//! assert!(smoothed > 12.5 && smoothed <= 13.0);
//! ```

use armsight_types::{DeploymentMode, Point3};
use serde::{Deserialize, Serialize};

/// Error covariance every filter starts from, and returns to on reset.
const INITIAL_ERROR_COV: f32 = 1.0;

// ────────────────────────────────────────────────────────────────────────────
// Tuning
// ────────────────────────────────────────────────────────────────────────────

/// Noise parameters for one deployment.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FilterTuning {
    pub process_variance: f32,
    pub measurement_variance: f32,
}

impl FilterTuning {
    /// Clean rendered depth: trust measurements, react fast.
    pub const SIMULATION: Self = Self {
        process_variance: 1e-3,
        measurement_variance: 1e-4,
    };

    /// Real sensor noise: trust the static model, favour stability.
    pub const HARDWARE: Self = Self {
        process_variance: 1e-5,
        measurement_variance: 1e-2,
    };

    pub fn for_deployment(mode: DeploymentMode) -> Self {
        match mode {
            DeploymentMode::Simulation => Self::SIMULATION,
            DeploymentMode::Hardware => Self::HARDWARE,
        }
    }
}

impl Default for FilterTuning {
    fn default() -> Self {
        Self::HARDWARE
    }
}

// ────────────────────────────────────────────────────────────────────────────
// KalmanFilter1D
// ────────────────────────────────────────────────────────────────────────────

/// A scalar Kalman filter.
#[derive(Debug, Clone)]
pub struct KalmanFilter1D {
    tuning: FilterTuning,
    state_estimate: f32,
    post_error_cov: f32,
    initialized: bool,
}

impl KalmanFilter1D {
    pub fn new(tuning: FilterTuning) -> Self {
        Self {
            tuning,
            state_estimate: 0.0,
            post_error_cov: INITIAL_ERROR_COV,
            initialized: false,
        }
    }

    /// Fold one measurement in and return the smoothed value.
    ///
    /// The first measurement initialises the state directly, so there is no
    /// start-up transient.
    pub fn update(&mut self, measurement: f32) -> f32 {
        if !self.initialized {
            self.state_estimate = measurement;
            self.initialized = true;
            return measurement;
        }

        let prior_cov = self.post_error_cov + self.tuning.process_variance;
        let gain = prior_cov / (prior_cov + self.tuning.measurement_variance);
        self.state_estimate += gain * (measurement - self.state_estimate);
        self.post_error_cov = (1.0 - gain) * prior_cov;
        self.state_estimate
    }

    /// Force the state to `value` and restore the initial uncertainty.
    ///
    /// The filter counts as initialised afterwards: the next `update` blends
    /// against `value` instead of re-seeding from the measurement.
    pub fn reset(&mut self, value: f32) {
        self.state_estimate = value;
        self.post_error_cov = INITIAL_ERROR_COV;
        self.initialized = true;
    }

    pub fn state_estimate(&self) -> f32 {
        self.state_estimate
    }

    pub fn error_covariance(&self) -> f32 {
        self.post_error_cov
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }
}

// ────────────────────────────────────────────────────────────────────────────
// AxisFilters
// ────────────────────────────────────────────────────────────────────────────

/// Three independent [`KalmanFilter1D`]s for x, y, and z.
///
/// One set belongs to exactly one projection engine; never share a set
/// between optical paths.
#[derive(Debug, Clone)]
pub struct AxisFilters {
    x: KalmanFilter1D,
    y: KalmanFilter1D,
    z: KalmanFilter1D,
}

impl AxisFilters {
    pub fn new(tuning: FilterTuning) -> Self {
        Self {
            x: KalmanFilter1D::new(tuning),
            y: KalmanFilter1D::new(tuning),
            z: KalmanFilter1D::new(tuning),
        }
    }

    pub fn update(&mut self, p: Point3) -> Point3 {
        Point3::new(self.x.update(p.x), self.y.update(p.y), self.z.update(p.z))
    }

    pub fn reset(&mut self, p: Point3) {
        self.x.reset(p.x);
        self.y.reset(p.y);
        self.z.reset(p.z);
    }

    /// Current estimate without folding in a new measurement.
    pub fn estimate(&self) -> Point3 {
        Point3::new(
            self.x.state_estimate(),
            self.y.state_estimate(),
            self.z.state_estimate(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_update_has_no_transient() {
        let mut kf = KalmanFilter1D::new(FilterTuning::HARDWARE);
        assert_eq!(kf.update(42.0), 42.0);
        // Same value again: blending 42 with 42 stays 42.
        assert!((kf.update(42.0) - 42.0).abs() < 1e-6);
    }

    #[test]
    fn constant_input_converges() {
        let mut kf = KalmanFilter1D::new(FilterTuning::HARDWARE);
        kf.update(0.0);
        for _ in 0..500 {
            kf.update(10.0);
        }
        assert!((kf.state_estimate() - 10.0).abs() < 0.05, "got {}", kf.state_estimate());
    }

    #[test]
    fn simulation_tuning_tracks_faster_than_hardware() {
        let mut sim = KalmanFilter1D::new(FilterTuning::SIMULATION);
        let mut hw = KalmanFilter1D::new(FilterTuning::HARDWARE);
        sim.update(0.0);
        hw.update(0.0);
        for _ in 0..3 {
            sim.update(10.0);
            hw.update(10.0);
        }
        assert!(sim.state_estimate() > hw.state_estimate());
    }

    #[test]
    fn gain_matches_closed_form_on_second_update() {
        let tuning = FilterTuning::HARDWARE;
        let mut kf = KalmanFilter1D::new(tuning);
        kf.update(0.0);
        let out = kf.update(1.0);
        let prior = 1.0 + tuning.process_variance;
        let gain = prior / (prior + tuning.measurement_variance);
        assert!((out - gain).abs() < 1e-6);
        assert!((kf.error_covariance() - (1.0 - gain) * prior).abs() < 1e-6);
    }

    #[test]
    fn reset_forces_state_and_prior() {
        let mut kf = KalmanFilter1D::new(FilterTuning::HARDWARE);
        kf.update(0.0);
        for _ in 0..20 {
            kf.update(5.0);
        }
        kf.reset(-3.0);
        assert_eq!(kf.state_estimate(), -3.0);
        assert_eq!(kf.error_covariance(), INITIAL_ERROR_COV);
        // No residual lag: the corrected value fed back comes out unchanged.
        assert!((kf.update(-3.0) + 3.0).abs() < 1e-6);
    }

    #[test]
    fn reset_before_first_update_counts_as_initialised() {
        let mut kf = KalmanFilter1D::new(FilterTuning::SIMULATION);
        kf.reset(7.0);
        assert!(kf.is_initialized());
        let out = kf.update(8.0);
        assert!(out > 7.0 && out < 8.0);
    }

    #[test]
    fn axis_filters_are_independent() {
        let mut f = AxisFilters::new(FilterTuning::SIMULATION);
        f.update(Point3::new(1.0, 2.0, 3.0));
        f.reset(Point3::new(10.0, 20.0, 30.0));
        assert_eq!(f.estimate(), Point3::new(10.0, 20.0, 30.0));
    }
}
