//! The `MotionDriver` capability: everything the servo controller needs from
//! the arm.
//!
//! Implementations may talk to a serial bus, a simulator socket, or an
//! in-memory model.  Pose reads are expected to be cheap snapshot reads.

use std::time::Duration;

use armsight_types::{ArmError, EndEffectorPose, Point3};

/// A Cartesian move as issued by the control loop.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MotionCommand {
    /// Goal position in centimetres.
    pub target: Point3,
    /// Speed as a percentage of the driver's maximum (1..=100).
    pub speed: u8,
}

/// Pose, move, and gripper access for a robot arm.
///
/// Methods take `&self` so a single driver can be shared between the
/// perception producer (pose stamping) and the servo thread.
pub trait MotionDriver: Send + Sync {
    /// Stable identifier, e.g. `"dofbot"`.
    fn id(&self) -> &str;

    /// Return the most recent end-effector pose.
    ///
    /// # Errors
    ///
    /// Returns [`ArmError::DriverUnavailable`] when the driver has no
    /// connection to the arm.
    fn current_pose(&self) -> Result<EndEffectorPose, ArmError>;

    /// Move the end-effector to `target` (cm) at `speed` percent.
    ///
    /// When `wait` is `true` the call blocks until arrival or `timeout`.
    ///
    /// # Errors
    ///
    /// Returns [`ArmError::HardwareFault`] if the command is rejected.
    fn move_to(
        &self,
        target: Point3,
        speed: u8,
        wait: bool,
        timeout: Duration,
    ) -> Result<(), ArmError>;

    /// Open the gripper to `percent` (0 = fully closed, 100 = fully open).
    fn move_gripper(&self, percent: f32) -> Result<(), ArmError>;

    /// Convenience accessor for the gripper aperture.
    fn gripper_aperture(&self) -> Result<f32, ArmError> {
        Ok(self.current_pose()?.gripper)
    }
}
