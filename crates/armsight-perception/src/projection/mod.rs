//! Pixel + depth → 3-D point.
//!
//! Two interchangeable engines sit behind [`Projector`]:
//!
//! - [`sim::SimProjection`] reconstructs the renderer's exact view and
//!   projection matrices and lands directly in world coordinates, with
//!   optional ground-truth correction.
//! - [`hardware::HardwareProjection`] uses the depth camera's factory
//!   intrinsics, an IMU tilt correction, and a calibrated floor offset, and
//!   lands in camera coordinates.
//!
//! Both smooth their output through a private [`AxisFilters`] set, so each
//! engine instance (and therefore each optical path) has its own history.
//!
//! [`AxisFilters`]: crate::filter::AxisFilters

pub mod hardware;
pub mod sim;

use armsight_types::Point3;

/// Which frame [`Projector::pixel_to_3d`] results are expressed in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProjectionFrame {
    /// Already in the robot/world frame; no mounting offset needed.
    World,
    /// Relative to the camera; the bridge still has to place the camera.
    Camera,
}

/// Shared contract of the projection engines.
///
/// All lengths returned are centimetres.
pub trait Projector: Send {
    /// The frame [`pixel_to_3d`](Self::pixel_to_3d) reports in.
    fn frame(&self) -> ProjectionFrame;

    /// Project and smooth one detection of class `name`.
    ///
    /// Returns `None` when the engine rejects the detection outright (a
    /// simulated detection with no matching object in the scene).
    fn pixel_to_3d(&mut self, name: &str, u: f32, v: f32, depth_m: f32) -> Option<Point3>;

    /// Unfiltered view-space point: x right, y up, camera looking down -z.
    fn pixel_to_view(&self, u: f32, v: f32, depth_m: f32) -> Point3;

    /// Drop all smoothing history.
    fn reset_filters(&mut self);

    /// Feed an accelerometer reading for tilt compensation.  Engines with
    /// a fixed, known pose ignore it.
    fn set_gravity(&mut self, _accel: Point3) {}
}
