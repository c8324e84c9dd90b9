//! In-process simulated arm for headless tests and demos.
//!
//! [`SimArm`] is a noiseless kinematic stand-in for a real driver: every
//! `move_to` lands exactly on its target, and closing the gripper stops at
//! the width of whatever object it was told it is holding.  All commands are
//! recorded so tests can assert on the exact sequence the servo issued.
//!
//! # Example
//!
//! ```rust
//! use std::time::Duration;
//! use armsight_hal::{MotionDriver, SimArm};
//! use armsight_types::Point3;
//!
//! let arm = SimArm::new("dofbot").at(Point3::new(0.0, 0.0, 20.0)).holding(0.02);
//! arm.move_to(Point3::new(5.0, 0.0, 15.0), 30, false, Duration::from_secs(1))
//!     .expect("sim move must succeed");
//! arm.move_gripper(0.0).expect("sim gripper must succeed");
//!
//! let pose = arm.current_pose().unwrap();
//! assert_eq!(pose.position, Point3::new(5.0, 0.0, 15.0));
//! assert!((pose.gripper - 0.02).abs() < 1e-6);
//! ```

use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use armsight_types::{ArmError, EndEffectorPose, Point3, Quaternion};
use tracing::debug;

use crate::motion::{MotionCommand, MotionDriver};

/// Finger opening reported at 100 % (sum of both finger joints).
const DEFAULT_MAX_APERTURE: f32 = 0.06;

#[derive(Debug)]
struct SimArmState {
    pose: EndEffectorPose,
    orientation: Quaternion,
    /// Aperture at which closing fingers meet an object, if one is held.
    held_aperture: Option<f32>,
    commands: Vec<MotionCommand>,
    gripper_commands: Vec<f32>,
    faulted: bool,
}

/// A simulated arm that executes every command instantly and exactly.
#[derive(Debug)]
pub struct SimArm {
    id: String,
    max_aperture: f32,
    state: Mutex<SimArmState>,
}

impl SimArm {
    /// Create a simulated arm at the origin with the gripper fully open.
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            max_aperture: DEFAULT_MAX_APERTURE,
            state: Mutex::new(SimArmState {
                pose: EndEffectorPose {
                    gripper: DEFAULT_MAX_APERTURE,
                    ..EndEffectorPose::default()
                },
                orientation: Quaternion::identity(),
                held_aperture: None,
                commands: Vec::new(),
                gripper_commands: Vec::new(),
                faulted: false,
            }),
        }
    }

    /// Start the end-effector at `position` (cm).
    pub fn at(self, position: Point3) -> Self {
        self.with_state(|s| s.pose.position = position)
    }

    /// Set the end-effector orientation.
    pub fn with_orientation(self, orientation: Quaternion) -> Self {
        self.with_state(|s| s.orientation = orientation)
    }

    /// Pretend an object of the given finger aperture sits between the
    /// fingers: closing stops there instead of at zero.
    pub fn holding(self, aperture: f32) -> Self {
        self.with_state(|s| s.held_aperture = Some(aperture))
    }

    /// Make every command fail with a hardware fault.
    pub fn faulted(self) -> Self {
        self.with_state(|s| s.faulted = true)
    }

    /// Teleport the end-effector without recording a command.
    pub fn set_position(&self, position: Point3) {
        self.lock().pose.position = position;
    }

    /// Remove or replace the held object at runtime.
    pub fn set_held_aperture(&self, aperture: Option<f32>) {
        self.lock().held_aperture = aperture;
    }

    pub fn orientation(&self) -> Quaternion {
        self.lock().orientation
    }

    /// Every Cartesian command issued so far, oldest first.
    pub fn commands(&self) -> Vec<MotionCommand> {
        self.lock().commands.clone()
    }

    /// Every gripper percentage issued so far, oldest first.
    pub fn gripper_commands(&self) -> Vec<f32> {
        self.lock().gripper_commands.clone()
    }

    fn with_state(self, f: impl FnOnce(&mut SimArmState)) -> Self {
        f(&mut self.lock());
        self
    }

    fn lock(&self) -> MutexGuard<'_, SimArmState> {
        // The state holds plain values; a panic mid-update cannot leave it
        // in an unusable shape.
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn check_fault(&self, state: &SimArmState) -> Result<(), ArmError> {
        if state.faulted {
            return Err(ArmError::HardwareFault {
                component: self.id.clone(),
                details: "simulated fault".to_string(),
            });
        }
        Ok(())
    }
}

impl MotionDriver for SimArm {
    fn id(&self) -> &str {
        &self.id
    }

    fn current_pose(&self) -> Result<EndEffectorPose, ArmError> {
        let state = self.lock();
        self.check_fault(&state)?;
        Ok(state.pose)
    }

    fn move_to(
        &self,
        target: Point3,
        speed: u8,
        _wait: bool,
        _timeout: Duration,
    ) -> Result<(), ArmError> {
        let mut state = self.lock();
        self.check_fault(&state)?;
        debug!(arm = %self.id, x = target.x, y = target.y, z = target.z, speed, "sim move");
        state.pose.position = target;
        state.commands.push(MotionCommand { target, speed });
        Ok(())
    }

    fn move_gripper(&self, percent: f32) -> Result<(), ArmError> {
        let mut state = self.lock();
        self.check_fault(&state)?;
        let opening = percent.clamp(0.0, 100.0) / 100.0 * self.max_aperture;
        state.pose.gripper = match state.held_aperture {
            Some(held) if opening < held => held,
            _ => opening,
        };
        state.gripper_commands.push(percent);
        Ok(())
    }
}
