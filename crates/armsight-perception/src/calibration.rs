//! Calibration routines for the physical depth camera.
//!
//! - [`tilt_correction`]: rotation that levels the camera using the IMU's
//!   gravity reading (Rodrigues' formula).
//! - [`FloorCalibration`]: RANSAC plane fit over sparse point clouds to find
//!   the camera's height above the floor.
//! - [`AffineCalibration`]: least-squares camera → robot affine map from
//!   measured point pairs, persisted as JSON.

use std::fs;
use std::path::Path;

use armsight_types::{ArmError, DepthMap, Point3};
use nalgebra::{DMatrix, Matrix3, Vector3};
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::projection::hardware::HardwareIntrinsics;

// ────────────────────────────────────────────────────────────────────────────
// Tilt correction
// ────────────────────────────────────────────────────────────────────────────

/// Rotation that maps the measured gravity direction onto `down`.
///
/// `R = I + sinθ·K + (1 − cosθ)·K²`, where `K` is the cross-product matrix
/// of the unit rotation axis `accel × down`.  Returns the identity when the
/// reading is zero or already (anti)parallel to `down`.
pub fn tilt_correction(accel: Point3, down: Point3) -> Matrix3<f32> {
    let a = Vector3::new(accel.x, accel.y, accel.z);
    let d = Vector3::new(down.x, down.y, down.z);
    let (a_norm, d_norm) = (a.norm(), d.norm());
    if a_norm == 0.0 || d_norm == 0.0 || !a_norm.is_finite() {
        return Matrix3::identity();
    }
    let a = a / a_norm;
    let d = d / d_norm;

    let axis = a.cross(&d);
    let s = axis.norm();
    if s < 1e-6 {
        return Matrix3::identity();
    }
    let k = (axis / s).cross_matrix();
    let theta = a.dot(&d).clamp(-1.0, 1.0).acos();
    Matrix3::identity() + k * theta.sin() + k * k * (1.0 - theta.cos())
}

/// Apply a 3x3 rotation to a point.
pub fn rotate(m: &Matrix3<f32>, p: Point3) -> Point3 {
    let r = m * Vector3::new(p.x, p.y, p.z);
    Point3::new(r.x, r.y, r.z)
}

// ────────────────────────────────────────────────────────────────────────────
// RANSAC plane fit
// ────────────────────────────────────────────────────────────────────────────

/// Configuration for [`fit_plane_ransac`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RansacOptions {
    pub iterations: usize,
    /// Inlier distance threshold, centimetres.
    pub threshold_cm: f32,
    /// RNG seed, for reproducible calibrations.
    pub seed: u64,
}

impl Default for RansacOptions {
    fn default() -> Self {
        Self {
            iterations: 100,
            threshold_cm: 2.0,
            seed: 0x5eed,
        }
    }
}

/// Plane `n · p + d = 0` with unit normal `n`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Plane {
    pub normal: Point3,
    pub d: f32,
}

impl Plane {
    /// Plane through three points, or `None` if they are collinear.
    pub fn through(p1: Point3, p2: Point3, p3: Point3) -> Option<Self> {
        let n = p2.sub(p1).cross(p3.sub(p1));
        let len = n.norm();
        if len < 1e-6 {
            return None;
        }
        let normal = n.scale(1.0 / len);
        Some(Self {
            normal,
            d: -normal.dot(p1),
        })
    }

    pub fn distance(&self, p: Point3) -> f32 {
        (self.normal.dot(p) + self.d).abs()
    }
}

/// Best plane found and the number of points that support it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PlaneFit {
    pub plane: Plane,
    pub inliers: usize,
}

/// Fit a plane by repeatedly sampling three points and keeping the
/// candidate with the most inliers.
pub fn fit_plane_ransac(points: &[Point3], opts: &RansacOptions) -> Option<PlaneFit> {
    if points.len() < 3 {
        return None;
    }
    let mut rng = StdRng::seed_from_u64(opts.seed);
    let mut best: Option<PlaneFit> = None;

    for _ in 0..opts.iterations {
        let idx = rand::seq::index::sample(&mut rng, points.len(), 3);
        let Some(plane) = Plane::through(points[idx.index(0)], points[idx.index(1)], points[idx.index(2)])
        else {
            continue;
        };
        let inliers = points
            .iter()
            .filter(|p| plane.distance(**p) < opts.threshold_cm)
            .count();
        if best.is_none_or(|b| inliers > b.inliers) {
            best = Some(PlaneFit { plane, inliers });
        }
    }
    best
}

// ────────────────────────────────────────────────────────────────────────────
// Floor calibration
// ────────────────────────────────────────────────────────────────────────────

/// Estimates the camera's distance to the floor from a handful of frames.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FloorCalibration {
    /// Pixel stride of the sparse point cloud.
    pub stride: u32,
    pub ransac: RansacOptions,
    /// A plane counts as the floor when `|normal.z|` exceeds this.
    pub min_normal_z: f32,
    /// At most this many frames are used.
    pub max_frames: usize,
}

impl Default for FloorCalibration {
    fn default() -> Self {
        Self {
            stride: 20,
            ransac: RansacOptions::default(),
            min_normal_z: 0.8,
            max_frames: 10,
        }
    }
}

impl FloorCalibration {
    /// Average floor distance (cm) across `frames`, or `0.0` if no frame
    /// yields a floor-like plane.
    pub fn estimate_offset(
        &self,
        frames: &[DepthMap],
        intrinsics: &HardwareIntrinsics,
        tilt: &Matrix3<f32>,
    ) -> f32 {
        let mut distances = Vec::new();
        for (i, depth) in frames.iter().take(self.max_frames).enumerate() {
            let cloud: Vec<Point3> = intrinsics
                .point_cloud(depth, self.stride)
                .into_iter()
                .map(|p| rotate(tilt, p))
                .collect();
            match fit_plane_ransac(&cloud, &self.ransac) {
                Some(fit) if fit.plane.normal.z.abs() > self.min_normal_z => {
                    distances.push(fit.plane.d.abs());
                }
                Some(fit) => {
                    warn!(frame = i, normal_z = fit.plane.normal.z, "best plane is not the floor");
                }
                None => warn!(frame = i, points = cloud.len(), "no plane found"),
            }
        }

        if distances.is_empty() {
            warn!("floor calibration failed, using zero offset");
            return 0.0;
        }
        let offset = distances.iter().sum::<f32>() / distances.len() as f32;
        info!(offset_cm = offset, frames = distances.len(), "floor calibrated");
        offset
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Affine camera → robot calibration
// ────────────────────────────────────────────────────────────────────────────

/// One measured correspondence.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CalibrationPair {
    pub camera: Point3,
    pub robot: Point3,
}

#[derive(Serialize, Deserialize)]
struct CalibrationFile {
    transform_matrix: Vec<Vec<f32>>,
    points: Vec<CalibrationPair>,
}

/// Camera → robot affine transform estimated from point pairs.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AffineCalibration {
    points: Vec<CalibrationPair>,
    transform: Option<[[f32; 4]; 4]>,
}

impl AffineCalibration {
    /// Minimum number of pairs for a full 3-D affine solve.
    pub const MIN_POINTS: usize = 4;

    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_point(&mut self, robot: Point3, camera: Point3) {
        info!(?robot, ?camera, "calibration point added");
        self.points.push(CalibrationPair { camera, robot });
    }

    pub fn clear_points(&mut self) {
        self.points.clear();
    }

    pub fn points(&self) -> &[CalibrationPair] {
        &self.points
    }

    pub fn transform(&self) -> Option<[[f32; 4]; 4]> {
        self.transform
    }

    /// Solve the least-squares affine map over all collected pairs.
    ///
    /// # Errors
    ///
    /// [`ArmError::Calibration`] with fewer than [`MIN_POINTS`](Self::MIN_POINTS)
    /// pairs, or when the camera points are coplanar.
    pub fn solve(&mut self) -> Result<(), ArmError> {
        let n = self.points.len();
        if n < Self::MIN_POINTS {
            return Err(ArmError::Calibration(format!(
                "need at least {} points, have {n}",
                Self::MIN_POINTS
            )));
        }

        let a = DMatrix::<f64>::from_fn(n, 4, |r, c| {
            let p = self.points[r].camera;
            [p.x as f64, p.y as f64, p.z as f64, 1.0][c]
        });
        let b = DMatrix::<f64>::from_fn(n, 3, |r, c| {
            let p = self.points[r].robot;
            [p.x as f64, p.y as f64, p.z as f64][c]
        });

        let svd = a.svd(true, true);
        if svd.rank(1e-9) < 4 {
            return Err(ArmError::Calibration("camera points are coplanar".into()));
        }
        let x = svd
            .solve(&b, 1e-12)
            .map_err(|e| ArmError::Calibration(e.to_string()))?;

        let mut m = [[0.0f32; 4]; 4];
        for (row, out) in m.iter_mut().take(3).enumerate() {
            for (col, v) in out.iter_mut().enumerate() {
                *v = x[(col, row)] as f32;
            }
        }
        m[3] = [0.0, 0.0, 0.0, 1.0];
        self.transform = Some(m);
        info!(points = n, "camera-to-robot transform solved");
        Ok(())
    }

    /// Map a camera-frame point into the robot frame.
    pub fn camera_to_robot(&self, p: Point3) -> Option<Point3> {
        let m = self.transform?;
        let row = |r: [f32; 4]| r[0] * p.x + r[1] * p.y + r[2] * p.z + r[3];
        Some(Point3::new(row(m[0]), row(m[1]), row(m[2])))
    }

    /// Write the transform and its points as pretty JSON.
    pub fn save(&self, path: &Path) -> Result<(), ArmError> {
        let Some(m) = self.transform else {
            return Err(ArmError::Calibration("nothing to save".into()));
        };
        let file = CalibrationFile {
            transform_matrix: m.iter().map(|r| r.to_vec()).collect(),
            points: self.points.clone(),
        };
        let raw = serde_json::to_string_pretty(&file)
            .map_err(|e| ArmError::Serialization(e.to_string()))?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| ArmError::Calibration(e.to_string()))?;
        }
        fs::write(path, raw)
            .map_err(|e| ArmError::Calibration(format!("write {}: {e}", path.display())))
    }

    /// Load a saved calibration.  Returns `Ok(None)` if the file is missing.
    pub fn load(path: &Path) -> Result<Option<Self>, ArmError> {
        if !path.exists() {
            return Ok(None);
        }
        let raw = fs::read_to_string(path)
            .map_err(|e| ArmError::Calibration(format!("read {}: {e}", path.display())))?;
        let file: CalibrationFile =
            serde_json::from_str(&raw).map_err(|e| ArmError::Serialization(e.to_string()))?;

        if file.transform_matrix.len() != 4 || file.transform_matrix.iter().any(|r| r.len() != 4) {
            return Err(ArmError::Calibration("transform matrix must be 4x4".into()));
        }
        let mut m = [[0.0f32; 4]; 4];
        for (dst, src) in m.iter_mut().zip(&file.transform_matrix) {
            dst.copy_from_slice(src);
        }
        Ok(Some(Self {
            points: file.points,
            transform: Some(m),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DOWN: Point3 = Point3::new(0.0, 1.0, 0.0);

    #[test]
    fn level_camera_needs_no_correction() {
        let r = tilt_correction(Point3::new(0.0, 9.81, 0.0), DOWN);
        assert!((r - Matrix3::identity()).norm() < 1e-6);
    }

    #[test]
    fn zero_reading_gives_identity() {
        assert_eq!(tilt_correction(Point3::zero(), DOWN), Matrix3::identity());
    }

    #[test]
    fn tilted_gravity_is_rotated_onto_down() {
        let angle = 10f32.to_radians();
        let g = Point3::new(0.0, angle.cos(), angle.sin()).scale(9.81);
        let r = tilt_correction(g, DOWN);
        let levelled = rotate(&r, g.scale(1.0 / 9.81));
        assert!(levelled.distance(DOWN) < 1e-5, "got {levelled:?}");
        assert!((r.determinant() - 1.0).abs() < 1e-5);
    }

    #[test]
    fn collinear_points_make_no_plane() {
        let p = Point3::new(1.0, 1.0, 1.0);
        assert!(Plane::through(Point3::zero(), p, p.scale(2.0)).is_none());
    }

    #[test]
    fn ransac_finds_dominant_plane_despite_outliers() {
        let mut points = Vec::new();
        for i in 0..20 {
            for j in 0..20 {
                points.push(Point3::new(i as f32 * 5.0, j as f32 * 5.0, 80.0));
            }
        }
        for k in 0..40 {
            points.push(Point3::new(k as f32, 3.0 * k as f32, 10.0 + k as f32));
        }
        let fit = fit_plane_ransac(&points, &RansacOptions::default()).unwrap();
        assert!(fit.plane.normal.z.abs() > 0.99);
        assert!((fit.plane.d.abs() - 80.0).abs() < 1e-2);
        assert!(fit.inliers >= 400);
    }

    #[test]
    fn too_few_points_fit_nothing() {
        assert!(fit_plane_ransac(&[Point3::zero(); 2], &RansacOptions::default()).is_none());
    }

    #[test]
    fn floor_offset_from_flat_depth() {
        let intr = HardwareIntrinsics::default();
        // Wall-like frame: every pixel 0.8 m away along the optical axis.
        let frame = DepthMap::filled(intr.width, intr.height, 0.8);
        let offset = FloorCalibration::default().estimate_offset(
            &[frame.clone(), frame],
            &intr,
            &Matrix3::identity(),
        );
        assert!((offset - 80.0).abs() < 0.1, "offset={offset}");
    }

    #[test]
    fn floor_calibration_without_frames_is_zero() {
        let offset = FloorCalibration::default().estimate_offset(
            &[],
            &HardwareIntrinsics::default(),
            &Matrix3::identity(),
        );
        assert_eq!(offset, 0.0);
    }

    fn known_pairs() -> AffineCalibration {
        let mut cal = AffineCalibration::new();
        let offset = Point3::new(63.0, 0.0, 54.0);
        for cam in [
            Point3::new(0.0, 0.0, 0.0),
            Point3::new(10.0, 0.0, 0.0),
            Point3::new(0.0, 10.0, 0.0),
            Point3::new(0.0, 0.0, 10.0),
            Point3::new(5.0, 5.0, 5.0),
        ] {
            // Robot frame swaps x/y and shifts by the mounting offset.
            let robot = Point3::new(cam.y, cam.x, cam.z).add(offset);
            cal.add_point(robot, cam);
        }
        cal
    }

    #[test]
    fn affine_solve_recovers_known_map() {
        let mut cal = known_pairs();
        cal.solve().unwrap();
        let out = cal.camera_to_robot(Point3::new(2.0, 7.0, -3.0)).unwrap();
        assert!(out.distance(Point3::new(70.0, 2.0, 51.0)) < 1e-3, "out={out:?}");
    }

    #[test]
    fn affine_needs_four_points() {
        let mut cal = AffineCalibration::new();
        for i in 0..3 {
            cal.add_point(Point3::new(i as f32, 0.0, 0.0), Point3::new(0.0, i as f32, 0.0));
        }
        assert!(matches!(cal.solve(), Err(ArmError::Calibration(_))));
        assert!(cal.camera_to_robot(Point3::zero()).is_none());
    }

    #[test]
    fn coplanar_points_are_rejected() {
        let mut cal = AffineCalibration::new();
        for (x, y) in [(0.0, 0.0), (1.0, 0.0), (0.0, 1.0), (1.0, 1.0), (2.0, 3.0)] {
            let p = Point3::new(x, y, 0.0);
            cal.add_point(p, p);
        }
        assert!(cal.solve().is_err());
    }

    #[test]
    fn save_and_load_preserve_transform() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = dir.path().join("calib").join("camera_to_robot.json");
        let mut cal = known_pairs();
        cal.solve().unwrap();
        cal.save(&path).unwrap();

        let loaded = AffineCalibration::load(&path).unwrap().unwrap();
        assert_eq!(loaded.transform(), cal.transform());
        assert_eq!(loaded.points().len(), 5);
    }

    #[test]
    fn load_missing_file_is_none() {
        let dir = tempfile::tempdir().expect("tmp dir");
        assert!(AffineCalibration::load(&dir.path().join("nope.json")).unwrap().is_none());
    }

    #[test]
    fn load_rejects_non_square_matrix() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = dir.path().join("bad.json");
        fs::write(&path, r#"{"transform_matrix": [[1, 0, 0]], "points": []}"#).unwrap();
        assert!(AffineCalibration::load(&path).is_err());
    }
}
