//! `armsight-hal` – hardware abstraction for the arm and its cameras.
//!
//! The servo and perception layers only ever talk to the traits defined
//! here, so a physical driver, the simulator bridge, and test doubles are
//! interchangeable.
//!
//! # Modules
//!
//! - [`motion`] – [`MotionDriver`][motion::MotionDriver]: pose queries,
//!   Cartesian moves, and gripper commands.
//! - [`camera`] – [`DepthCamera`][camera::DepthCamera]: synchronised
//!   colour + depth capture.
//! - [`proportional`] – per-axis proportional controllers used by the
//!   servo loop.
//! - [`sim`] – [`SimArm`][sim::SimArm]: a noiseless in-process arm for
//!   headless tests and demos.

pub mod camera;
pub mod motion;
pub mod proportional;
pub mod sim;

pub use camera::DepthCamera;
pub use motion::{MotionCommand, MotionDriver};
pub use proportional::{AxisController, CartesianController};
pub use sim::SimArm;
