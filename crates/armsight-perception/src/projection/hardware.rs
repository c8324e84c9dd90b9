//! Projection for the physical depth camera.
//!
//! Deprojection follows the pinhole model with the sensor's factory
//! intrinsics. The result is then levelled with the IMU tilt correction and
//! lifted by the calibrated floor offset before smoothing.

use armsight_types::{ArmError, DepthMap, Point3};
use nalgebra::Matrix3;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{ProjectionFrame, Projector};
use crate::calibration::{rotate, tilt_correction, FloorCalibration};
use crate::filter::{AxisFilters, FilterTuning};

/// Undistortion fixed-point iterations.
const UNDISTORT_ITERATIONS: usize = 10;

/// Gravity direction in camera axes when the camera is level.
pub const CAMERA_DOWN: Point3 = Point3::new(0.0, 1.0, 0.0);

/// Lens distortion model reported by the sensor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DistortionModel {
    #[default]
    None,
    /// Coefficients describe the forward distortion; deprojection inverts it
    /// iteratively.
    BrownConrady,
    /// Coefficients describe the undistortion directly.
    InverseBrownConrady,
}

/// Factory calibration of one depth stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HardwareIntrinsics {
    pub width: u32,
    pub height: u32,
    pub fx: f32,
    pub fy: f32,
    pub ppx: f32,
    pub ppy: f32,
    #[serde(default)]
    pub model: DistortionModel,
    /// `[k1, k2, p1, p2, k3]`
    #[serde(default)]
    pub coeffs: [f32; 5],
    /// Metres per raw depth unit.
    pub depth_scale: f32,
}

impl Default for HardwareIntrinsics {
    fn default() -> Self {
        Self {
            width: 640,
            height: 480,
            fx: 615.0,
            fy: 615.0,
            ppx: 320.0,
            ppy: 240.0,
            model: DistortionModel::None,
            coeffs: [0.0; 5],
            depth_scale: 0.001,
        }
    }
}

impl HardwareIntrinsics {
    /// Pixel + depth (m) → camera-frame point (m): x right, y down, z forward.
    pub fn deproject(&self, u: f32, v: f32, depth_m: f32) -> Point3 {
        let mut x = (u - self.ppx) / self.fx;
        let mut y = (v - self.ppy) / self.fy;
        let [k1, k2, p1, p2, k3] = self.coeffs;

        match self.model {
            DistortionModel::None => {}
            DistortionModel::BrownConrady => {
                let (xo, yo) = (x, y);
                for _ in 0..UNDISTORT_ITERATIONS {
                    let r2 = x * x + y * y;
                    let icdist = 1.0 / (1.0 + ((k3 * r2 + k2) * r2 + k1) * r2);
                    let dx = 2.0 * p1 * x * y + p2 * (r2 + 2.0 * x * x);
                    let dy = 2.0 * p2 * x * y + p1 * (r2 + 2.0 * y * y);
                    x = (xo - dx) * icdist;
                    y = (yo - dy) * icdist;
                }
            }
            DistortionModel::InverseBrownConrady => {
                let r2 = x * x + y * y;
                let f = 1.0 + k1 * r2 + k2 * r2 * r2 + k3 * r2 * r2 * r2;
                let ux = x * f + 2.0 * p1 * x * y + p2 * (r2 + 2.0 * x * x);
                let uy = y * f + 2.0 * p2 * x * y + p1 * (r2 + 2.0 * y * y);
                x = ux;
                y = uy;
            }
        }

        Point3::new(depth_m * x, depth_m * y, depth_m)
    }

    /// Camera-frame point (m) → pixel, applying forward distortion for
    /// [`DistortionModel::BrownConrady`].  `None` behind the camera.
    pub fn project(&self, p: Point3) -> Option<(f32, f32)> {
        if p.z <= 0.0 {
            return None;
        }
        let mut x = p.x / p.z;
        let mut y = p.y / p.z;
        if self.model == DistortionModel::BrownConrady {
            let [k1, k2, p1, p2, k3] = self.coeffs;
            let r2 = x * x + y * y;
            let f = 1.0 + k1 * r2 + k2 * r2 * r2 + k3 * r2 * r2 * r2;
            let dx = x * f + 2.0 * p1 * x * y + p2 * (r2 + 2.0 * x * x);
            let dy = y * f + 2.0 * p2 * x * y + p1 * (r2 + 2.0 * y * y);
            x = dx;
            y = dy;
        }
        Some((x * self.fx + self.ppx, y * self.fy + self.ppy))
    }

    /// Convert a raw 16-bit depth buffer into metres.
    pub fn depth_from_raw(&self, raw: &[u16]) -> Result<DepthMap, ArmError> {
        let data = raw.iter().map(|d| *d as f32 * self.depth_scale).collect();
        DepthMap::new(self.width, self.height, data)
    }

    /// Sparse point cloud (cm) over valid pixels, sampling every `stride`
    /// pixels in both directions.
    pub fn point_cloud(&self, depth: &DepthMap, stride: u32) -> Vec<Point3> {
        let stride = stride.max(1) as usize;
        let mut cloud = Vec::new();
        for v in (0..depth.height).step_by(stride) {
            for u in (0..depth.width).step_by(stride) {
                let Some(d) = depth.get(u as i64, v as i64) else {
                    continue;
                };
                if d > 0.0 && d.is_finite() {
                    cloud.push(self.deproject(u as f32, v as f32, d).scale(100.0));
                }
            }
        }
        cloud
    }
}

/// [`Projector`] for the physical depth camera.
pub struct HardwareProjection {
    intrinsics: HardwareIntrinsics,
    tuning: FilterTuning,
    tilt: Matrix3<f32>,
    floor_offset_cm: f32,
    filters: AxisFilters,
}

impl HardwareProjection {
    pub fn new(intrinsics: HardwareIntrinsics, tuning: FilterTuning) -> Self {
        Self {
            intrinsics,
            tuning,
            tilt: Matrix3::identity(),
            floor_offset_cm: 0.0,
            filters: AxisFilters::new(tuning),
        }
    }

    pub fn intrinsics(&self) -> &HardwareIntrinsics {
        &self.intrinsics
    }

    pub fn tilt(&self) -> &Matrix3<f32> {
        &self.tilt
    }

    pub fn set_floor_offset(&mut self, cm: f32) {
        self.floor_offset_cm = cm;
    }

    pub fn floor_offset(&self) -> f32 {
        self.floor_offset_cm
    }

    /// Run floor calibration over `frames` with the current tilt and store
    /// the result.
    pub fn calibrate_floor(&mut self, frames: &[DepthMap], cal: &FloorCalibration) -> f32 {
        self.floor_offset_cm = cal.estimate_offset(frames, &self.intrinsics, &self.tilt);
        self.floor_offset_cm
    }
}

impl Projector for HardwareProjection {
    fn frame(&self) -> ProjectionFrame {
        ProjectionFrame::Camera
    }

    fn pixel_to_3d(&mut self, _name: &str, u: f32, v: f32, depth_m: f32) -> Option<Point3> {
        let cam = self.intrinsics.deproject(u, v, depth_m).scale(100.0);
        let mut levelled = rotate(&self.tilt, cam);
        levelled.z += self.floor_offset_cm;
        Some(self.filters.update(levelled))
    }

    fn pixel_to_view(&self, u: f32, v: f32, depth_m: f32) -> Point3 {
        let p = self.intrinsics.deproject(u, v, depth_m).scale(100.0);
        Point3::new(p.x, -p.y, -p.z)
    }

    fn reset_filters(&mut self) {
        self.filters = AxisFilters::new(self.tuning);
    }

    /// Recompute the tilt correction from an accelerometer reading.
    fn set_gravity(&mut self, accel: Point3) {
        self.tilt = tilt_correction(accel, CAMERA_DOWN);
        debug!(?accel, "tilt correction updated");
    }
}
