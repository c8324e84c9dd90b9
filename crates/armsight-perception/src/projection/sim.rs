//! Projection for the rendered simulation camera.
//!
//! The renderer has no lens distortion, so the only way to get an error here
//! is a matrix mismatch.  [`SimCamera`] therefore rebuilds the same
//! right-handed look-at view matrix and vertical-FOV perspective the renderer
//! was configured with, and derives pinhole intrinsics from it:
//!
//! ```text
//! P00 = 1 / (aspect · tan(fov/2))     fx = P00 · W/2     cx = W/2
//! P11 = 1 / tan(fov/2)                fy = P11 · H/2     cy = H/2
//! ```
//!
//! Back-projection goes through view space (`x right, y up, -z forward`) and
//! then the inverse view matrix into world metres, reported in centimetres.

use std::sync::Arc;

use armsight_types::{ArmError, Point3, Quaternion};
use nalgebra::{Matrix4, Point3 as NaPoint3, Vector3, Vector4};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::{ProjectionFrame, Projector};
use crate::filter::{AxisFilters, FilterTuning};

/// Detections whose estimate lies within this squared distance (cm²) of the
/// ground-truth object are snapped onto it.
const CORRECTION_RADIUS_SQ_CM: f32 = 400.0;

// ────────────────────────────────────────────────────────────────────────────
// Camera model
// ────────────────────────────────────────────────────────────────────────────

/// Render-camera configuration, in simulator units (metres, degrees).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimCameraConfig {
    pub width: u32,
    pub height: u32,
    /// Vertical field of view in degrees.
    pub fov_deg: f32,
    pub near: f32,
    pub far: f32,
    pub eye: [f32; 3],
    pub target: [f32; 3],
    pub up: [f32; 3],
}

impl Default for SimCameraConfig {
    fn default() -> Self {
        Self {
            width: 600,
            height: 480,
            fov_deg: 60.0,
            near: 0.01,
            far: 10.0,
            eye: [0.5, 0.0, 0.5],
            target: [0.0, 0.0, 0.0],
            up: [0.0, 0.0, 1.0],
        }
    }
}

/// Exact pinhole reconstruction of the simulator's render camera.
#[derive(Debug, Clone)]
pub struct SimCamera {
    config: SimCameraConfig,
    view: Matrix4<f32>,
    cam_to_world: Matrix4<f32>,
    fx: f32,
    fy: f32,
    cx: f32,
    cy: f32,
}

impl SimCamera {
    /// Build the view matrix and intrinsics for `config`.
    ///
    /// # Errors
    ///
    /// Returns [`ArmError::Projection`] when the look-at is degenerate (eye on
    /// the target, or `up` parallel to the viewing direction) or the image
    /// size is zero.
    pub fn new(config: SimCameraConfig) -> Result<Self, ArmError> {
        if config.width == 0 || config.height == 0 {
            return Err(ArmError::Projection("camera image size is zero".into()));
        }
        let eye = NaPoint3::from(config.eye);
        let target = NaPoint3::from(config.target);
        let up = Vector3::from(config.up);

        let view = Matrix4::look_at_rh(&eye, &target, &up);
        if view.iter().any(|v| !v.is_finite()) {
            return Err(ArmError::Projection(
                "degenerate look-at: eye, target and up must span a frame".into(),
            ));
        }
        let cam_to_world = view
            .try_inverse()
            .ok_or_else(|| ArmError::Projection("view matrix is not invertible".into()))?;

        let (w, h) = (config.width as f32, config.height as f32);
        let aspect = w / h;
        let tan_half = (config.fov_deg.to_radians() / 2.0).tan();
        let p00 = 1.0 / (aspect * tan_half);
        let p11 = 1.0 / tan_half;

        Ok(Self {
            fx: p00 * w / 2.0,
            fy: p11 * h / 2.0,
            cx: w / 2.0,
            cy: h / 2.0,
            config,
            view,
            cam_to_world,
        })
    }

    pub fn config(&self) -> &SimCameraConfig {
        &self.config
    }

    /// `(fx, fy, cx, cy)` in pixels.
    pub fn intrinsics(&self) -> (f32, f32, f32, f32) {
        (self.fx, self.fy, self.cx, self.cy)
    }

    /// View-space point in metres.
    fn view_point_m(&self, u: f32, v: f32, depth_m: f32) -> Vector4<f32> {
        Vector4::new(
            (u - self.cx) * depth_m / self.fx,
            -(v - self.cy) * depth_m / self.fy,
            -depth_m,
            1.0,
        )
    }

    /// Back-project into view space, centimetres.
    pub fn pixel_to_view(&self, u: f32, v: f32, depth_m: f32) -> Point3 {
        let p = self.view_point_m(u, v, depth_m);
        Point3::new(p.x, p.y, p.z).scale(100.0)
    }

    /// Back-project into world space, centimetres.
    pub fn pixel_to_world(&self, u: f32, v: f32, depth_m: f32) -> Point3 {
        let w = self.cam_to_world * self.view_point_m(u, v, depth_m);
        Point3::new(w.x, w.y, w.z).scale(100.0)
    }

    fn world_to_view_m(&self, world_cm: Point3) -> Vector4<f32> {
        let p = world_cm.scale(0.01);
        self.view * Vector4::new(p.x, p.y, p.z, 1.0)
    }

    /// Distance from the camera plane (not along the ray), metres.
    pub fn planar_depth(&self, world_cm: Point3) -> f32 {
        -self.world_to_view_m(world_cm).z
    }

    /// Forward projection: `(u, v, planar depth m)`, or `None` behind the
    /// camera.
    pub fn world_to_pixel(&self, world_cm: Point3) -> Option<(f32, f32, f32)> {
        let p = self.world_to_view_m(world_cm);
        let depth = -p.z;
        if depth <= 0.0 {
            return None;
        }
        Some((
            self.cx + self.fx * p.x / depth,
            self.cy - self.fy * p.y / depth,
            depth,
        ))
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Ground truth
// ────────────────────────────────────────────────────────────────────────────

/// What the simulator knows about an object.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum GroundTruth {
    /// The simulator could not be queried.
    Unavailable,
    /// The simulator answered: no such object in the scene.
    Absent,
    /// Exact object position, world centimetres.
    Present(Point3),
}

/// Read access to the simulator's shared state.
pub trait SimulationOracle: Send + Sync {
    fn object_position(&self, name: &str) -> GroundTruth;

    /// End-effector world position (cm) and orientation, if known.
    fn end_effector_state(&self) -> Option<(Point3, Quaternion)>;
}

// ────────────────────────────────────────────────────────────────────────────
// SimProjection
// ────────────────────────────────────────────────────────────────────────────

/// [`Projector`] for the simulated camera.
pub struct SimProjection {
    camera: SimCamera,
    tuning: FilterTuning,
    filters: AxisFilters,
    oracle: Option<Arc<dyn SimulationOracle>>,
}

impl SimProjection {
    pub fn new(camera: SimCamera, tuning: FilterTuning) -> Self {
        Self {
            camera,
            tuning,
            filters: AxisFilters::new(tuning),
            oracle: None,
        }
    }

    /// Enable ground-truth correction and phantom suppression.
    pub fn with_oracle(mut self, oracle: Arc<dyn SimulationOracle>) -> Self {
        self.oracle = Some(oracle);
        self
    }

    pub fn camera(&self) -> &SimCamera {
        &self.camera
    }

    pub fn filters(&self) -> &AxisFilters {
        &self.filters
    }
}

impl Projector for SimProjection {
    fn frame(&self) -> ProjectionFrame {
        ProjectionFrame::World
    }

    fn pixel_to_3d(&mut self, name: &str, u: f32, v: f32, depth_m: f32) -> Option<Point3> {
        let raw = self.camera.pixel_to_world(u, v, depth_m);
        let truth = self
            .oracle
            .as_ref()
            .map_or(GroundTruth::Unavailable, |o| o.object_position(name));

        match truth {
            GroundTruth::Absent => {
                debug!(name, "no such object in the scene, dropping phantom detection");
                None
            }
            GroundTruth::Present(gt) if raw.distance_squared(gt) < CORRECTION_RADIUS_SQ_CM => {
                let true_depth = self.camera.planar_depth(gt);
                let corrected = self.camera.pixel_to_world(u, v, true_depth);
                self.filters.reset(corrected);
                Some(corrected)
            }
            GroundTruth::Present(gt) => {
                warn!(
                    name,
                    distance_cm = raw.distance(gt),
                    "vision estimate far from ground truth, keeping filtered estimate"
                );
                Some(self.filters.update(raw))
            }
            GroundTruth::Unavailable => Some(self.filters.update(raw)),
        }
    }

    fn pixel_to_view(&self, u: f32, v: f32, depth_m: f32) -> Point3 {
        self.camera.pixel_to_view(u, v, depth_m)
    }

    fn reset_filters(&mut self) {
        self.filters = AxisFilters::new(self.tuning);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f32::consts::FRAC_1_SQRT_2;

    struct FixedOracle(GroundTruth);

    impl SimulationOracle for FixedOracle {
        fn object_position(&self, _name: &str) -> GroundTruth {
            self.0
        }

        fn end_effector_state(&self) -> Option<(Point3, Quaternion)> {
            None
        }
    }

    fn camera() -> SimCamera {
        SimCamera::new(SimCameraConfig::default()).unwrap()
    }

    #[test]
    fn intrinsics_follow_the_projection_matrix() {
        let (fx, fy, cx, cy) = camera().intrinsics();
        let expected = 240.0 / (30f32.to_radians().tan());
        assert!((fy - expected).abs() < 1e-2, "fy={fy}");
        assert!((fx - fy).abs() < 1e-2, "square pixels expected");
        assert_eq!((cx, cy), (300.0, 240.0));
    }

    #[test]
    fn principal_ray_hits_the_look_at_target() {
        let cam = camera();
        // Eye (0.5, 0, 0.5) to origin is 0.5·√2 m.
        let d = 0.5 * 2f32.sqrt();
        let p = cam.pixel_to_world(300.0, 240.0, d);
        assert!(p.norm() < 1e-3, "expected origin, got {p:?}");
    }

    #[test]
    fn view_space_is_opengl_convention() {
        let p = camera().pixel_to_view(300.0, 240.0, 0.4);
        assert!(p.x.abs() < 1e-5 && p.y.abs() < 1e-5);
        assert!((p.z + 40.0).abs() < 1e-4);
        // Pixel above centre maps to +y.
        assert!(camera().pixel_to_view(300.0, 100.0, 0.4).y > 0.0);
    }

    #[test]
    fn forward_and_back_projection_agree() {
        let cam = camera();
        let world = Point3::new(5.0, -8.0, 3.0);
        let (u, v, d) = cam.world_to_pixel(world).unwrap();
        let back = cam.pixel_to_world(u, v, d);
        assert!(back.distance(world) < 1e-2, "back={back:?}");
        assert!((cam.planar_depth(world) - d).abs() < 1e-6);
    }

    #[test]
    fn degenerate_look_at_is_rejected() {
        let cfg = SimCameraConfig {
            eye: [0.0, 0.0, 1.0],
            target: [0.0, 0.0, 0.0],
            up: [0.0, 0.0, 1.0],
            ..SimCameraConfig::default()
        };
        assert!(SimCamera::new(cfg).is_err());
    }

    #[test]
    fn ground_truth_snaps_and_resets_filters() {
        let cam = camera();
        let gt = Point3::new(2.0, 1.0, 0.0);
        let (u, v, d) = cam.world_to_pixel(gt).unwrap();
        let mut proj = SimProjection::new(cam, FilterTuning::SIMULATION)
            .with_oracle(Arc::new(FixedOracle(GroundTruth::Present(gt))));

        // Noisy depth, 3 cm too far.
        let out = proj.pixel_to_3d("bottle", u, v, d + 0.03).unwrap();
        assert!(out.distance(gt) < 1e-2, "out={out:?}");
        assert_eq!(proj.filters().estimate(), out);
        // No residual lag on the next correction.
        let again = proj.pixel_to_3d("bottle", u, v, d + 0.03).unwrap();
        assert!(again.distance(out) < 1e-4);
    }

    #[test]
    fn absent_object_is_a_phantom() {
        let mut proj = SimProjection::new(camera(), FilterTuning::SIMULATION)
            .with_oracle(Arc::new(FixedOracle(GroundTruth::Absent)));
        assert!(proj.pixel_to_3d("ghost", 300.0, 240.0, 0.7).is_none());
    }

    #[test]
    fn far_ground_truth_keeps_vision_estimate() {
        let far = Point3::new(100.0, 100.0, 0.0);
        let mut proj = SimProjection::new(camera(), FilterTuning::SIMULATION)
            .with_oracle(Arc::new(FixedOracle(GroundTruth::Present(far))));
        let out = proj.pixel_to_3d("bottle", 300.0, 240.0, 0.5 * 2f32.sqrt()).unwrap();
        assert!(out.norm() < 1e-3);
    }

    #[test]
    fn without_oracle_output_is_filtered_projection() {
        let mut proj = SimProjection::new(camera(), FilterTuning::SIMULATION);
        let first = proj.pixel_to_3d("cup", 320.0, 250.0, 0.6).unwrap();
        assert_eq!(first, proj.camera().pixel_to_world(320.0, 250.0, 0.6));

        // After a reset the next sample passes straight through again.
        proj.reset_filters();
        let jumped = proj.pixel_to_3d("cup", 100.0, 100.0, 0.9).unwrap();
        assert_eq!(jumped, proj.camera().pixel_to_world(100.0, 100.0, 0.9));
    }

    #[test]
    fn rotated_camera_config_builds() {
        let cfg = SimCameraConfig {
            eye: [0.0, 0.3, 0.4],
            up: [0.0, FRAC_1_SQRT_2, FRAC_1_SQRT_2],
            ..SimCameraConfig::default()
        };
        assert!(SimCamera::new(cfg).is_ok());
    }
}
