//! Proportional controllers for Cartesian end-effector positioning.
//!
//! [`AxisController`] drives one scalar toward a set-point.  The servo loop
//! uses three of them bundled as a [`CartesianController`], one per axis,
//! each acting independently.  The command law is
//! `cmd = current + kp * (goal - current)`.
//!
//! # Example
//!
//! ```rust
//! use armsight_hal::proportional::CartesianController;
//! use armsight_types::Point3;
//!
//! let mut axes = CartesianController::new(0.8);
//! axes.set_target(Point3::new(10.0, 0.0, 0.0));
//!
//! let step = axes.correction(Point3::zero());
//! assert!((step.x - 8.0).abs() < 1e-5);
//! ```

use armsight_types::Point3;

/// Proportional controller for one axis.
#[derive(Debug, Clone)]
pub struct AxisController {
    kp: f32,
    set_point: f32,
}

impl AxisController {
    pub fn new(kp: f32) -> Self {
        Self { kp, set_point: 0.0 }
    }

    /// Change the desired set-point value.
    pub fn set_set_point(&mut self, set_point: f32) {
        self.set_point = set_point;
    }

    pub fn set_point(&self) -> f32 {
        self.set_point
    }

    pub fn gain(&self) -> f32 {
        self.kp
    }

    /// Correction for the current `measurement`.
    pub fn update(&self, measurement: f32) -> f32 {
        self.kp * (self.set_point - measurement)
    }
}

// ────────────────────────────────────────────────────────────────────────────
// CartesianController
// ────────────────────────────────────────────────────────────────────────────

/// Three independent [`AxisController`]s, one per Cartesian axis.
#[derive(Debug, Clone)]
pub struct CartesianController {
    x: AxisController,
    y: AxisController,
    z: AxisController,
}

impl CartesianController {
    /// Same `gain` on every axis.
    pub fn new(gain: f32) -> Self {
        Self {
            x: AxisController::new(gain),
            y: AxisController::new(gain),
            z: AxisController::new(gain),
        }
    }

    /// Move the set-point of all three axes.
    pub fn set_target(&mut self, target: Point3) {
        self.x.set_set_point(target.x);
        self.y.set_set_point(target.y);
        self.z.set_set_point(target.z);
    }

    pub fn target(&self) -> Point3 {
        Point3::new(self.x.set_point(), self.y.set_point(), self.z.set_point())
    }

    /// Per-axis correction to add to `current`.
    pub fn correction(&self, current: Point3) -> Point3 {
        Point3::new(
            self.x.update(current.x),
            self.y.update(current.y),
            self.z.update(current.z),
        )
    }

    /// The commanded position for this tick: `current + correction`.
    pub fn command(&self, current: Point3) -> Point3 {
        current.add(self.correction(current))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn drives_toward_set_point() {
        let mut axis = AxisController::new(2.0);
        axis.set_set_point(10.0);
        assert!((axis.update(0.0) - 20.0).abs() < 1e-4);
    }

    #[test]
    fn output_is_zero_at_set_point() {
        let mut axis = AxisController::new(1.0);
        axis.set_set_point(5.0);
        assert!(axis.update(5.0).abs() < 1e-6);
    }

    #[test]
    fn cartesian_axes_are_independent() {
        let mut axes = CartesianController::new(0.8);
        axes.set_target(Point3::new(30.0, 0.0, 13.0));
        let cmd = axes.command(Point3::new(0.0, 0.0, 20.0));
        assert!((cmd.x - 24.0).abs() < 1e-4);
        assert!(cmd.y.abs() < 1e-6);
        assert!((cmd.z - 14.4).abs() < 1e-4);
        assert_eq!(axes.target(), Point3::new(30.0, 0.0, 13.0));
    }

    #[test]
    fn repeated_commands_shrink_error_geometrically() {
        let mut axes = CartesianController::new(0.8);
        let goal = Point3::new(10.0, -5.0, 2.0);
        axes.set_target(goal);
        let mut pos = Point3::zero();
        let mut last = pos.distance(goal);
        for _ in 0..5 {
            pos = axes.command(pos);
            let err = pos.distance(goal);
            assert!((err - 0.2 * last).abs() < 1e-3);
            last = err;
        }
    }
}
