//! Coordinate bridge: 2-D detections → robot-base-frame [`RefinedDetection`]s.
//!
//! The bridge owns one projector per optical path and the active
//! [`CameraSource`].  Each projector keeps its own filter history, so
//! switching source never mixes smoothing state across paths.
//!
//! ```text
//! world camera:  pixel ─► Projector::pixel_to_3d ─► (+ install offset | affine) ─► base
//! wrist camera:  pixel ─► Projector::pixel_to_view ─► basis change ─► sync pose ─► base
//! ```

use std::sync::Arc;

use armsight_types::{
    CameraSource, DepthMap, DeploymentMode, Detection, OperatingMode, Point3, Quaternion,
    RefinedDetection, SyncPose,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::calibration::AffineCalibration;
use crate::depth::DepthSampler;
use crate::projection::sim::SimulationOracle;
use crate::projection::{ProjectionFrame, Projector};
use crate::transform::{BasisChange, Transform3D};

/// Bridge tunables.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    pub deployment: DeploymentMode,
    /// World-camera mount relative to the robot base in simulation, cm.
    pub sim_installation_offset: Point3,
    /// World-camera mount relative to the robot base on hardware, cm.
    pub hardware_installation_offset: Point3,
    /// Max disagreement between the synced and the fetched end-effector
    /// position before a warning is logged, cm.
    pub pose_tolerance_cm: f32,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            deployment: DeploymentMode::Simulation,
            sim_installation_offset: Point3::new(50.0, 0.0, 50.0),
            hardware_installation_offset: Point3::new(63.0, 0.0, 54.0),
            pose_tolerance_cm: 5.0,
        }
    }
}

impl BridgeConfig {
    pub fn installation_offset(&self) -> Point3 {
        match self.deployment {
            DeploymentMode::Simulation => self.sim_installation_offset,
            DeploymentMode::Hardware => self.hardware_installation_offset,
        }
    }
}

/// Turns per-frame detections into robot-frame positions.
pub struct CoordinateBridge {
    config: BridgeConfig,
    mode: OperatingMode,
    world: Box<dyn Projector>,
    wrist: Box<dyn Projector>,
    sampler: DepthSampler,
    calibration: Option<AffineCalibration>,
    oracle: Option<Arc<dyn SimulationOracle>>,
}

impl CoordinateBridge {
    pub fn new(config: BridgeConfig, world: Box<dyn Projector>, wrist: Box<dyn Projector>) -> Self {
        Self {
            config,
            mode: OperatingMode::Default,
            world,
            wrist,
            sampler: DepthSampler::default(),
            calibration: None,
            oracle: None,
        }
    }

    /// Map world-camera points through a solved affine calibration instead
    /// of the fixed installation offset.  Ignored in simulation.
    pub fn with_calibration(mut self, calibration: AffineCalibration) -> Self {
        self.calibration = calibration.transform().is_some().then_some(calibration);
        self
    }

    /// Source of the true end-effector orientation when the synced pose
    /// carries a placeholder.
    pub fn with_oracle(mut self, oracle: Arc<dyn SimulationOracle>) -> Self {
        self.oracle = Some(oracle);
        self
    }

    pub fn with_sampler(mut self, sampler: DepthSampler) -> Self {
        self.sampler = sampler;
        self
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    pub fn mode(&self) -> OperatingMode {
        self.mode
    }

    pub fn source(&self) -> CameraSource {
        self.mode.camera_source()
    }

    /// Switch operating mode.  When that changes the camera source, the
    /// newly active projector starts from a clean filter history.
    pub fn set_mode(&mut self, mode: OperatingMode) {
        let before = self.source();
        self.mode = mode;
        let after = self.source();
        if before != after {
            self.projector_mut(after).reset_filters();
            info!(?mode, ?after, "camera source switched");
        }
    }

    pub fn projector_mut(&mut self, source: CameraSource) -> &mut dyn Projector {
        match source {
            CameraSource::World => self.world.as_mut(),
            CameraSource::Wrist => self.wrist.as_mut(),
        }
    }

    /// Refine every detection of one frame from the active source.
    ///
    /// Detections with invalid depth, phantom detections, and wrist
    /// detections without any usable end-effector pose are dropped.
    pub fn refine(
        &mut self,
        detections: &[Detection],
        depth: &DepthMap,
        sync_pose: Option<SyncPose>,
    ) -> Vec<RefinedDetection> {
        let source = self.source();
        detections
            .iter()
            .filter_map(|det| {
                let Some(d) = self.sampler.sample(depth, det.pixel_center, det.bbox) else {
                    debug!(name = %det.name, "invalid depth, dropping detection");
                    return None;
                };
                let (u, v) = (det.pixel_center.0 as f32, det.pixel_center.1 as f32);
                let position = match source {
                    CameraSource::World => self.world_point(&det.name, u, v, d)?,
                    CameraSource::Wrist => self.wrist_point(u, v, d, sync_pose)?,
                };
                Some(RefinedDetection {
                    name: det.name.clone(),
                    position: position.rounded(2),
                    pixel_center: det.pixel_center,
                    bbox: det.bbox,
                    sync_pose,
                })
            })
            .collect()
    }

    fn world_point(&mut self, name: &str, u: f32, v: f32, depth_m: f32) -> Option<Point3> {
        let p = self.world.pixel_to_3d(name, u, v, depth_m)?;
        match self.world.frame() {
            ProjectionFrame::World => Some(p),
            ProjectionFrame::Camera => match (&self.calibration, self.config.deployment) {
                (Some(cal), DeploymentMode::Hardware) => cal.camera_to_robot(p),
                _ => Some(p.add(self.config.installation_offset())),
            },
        }
    }

    fn wrist_point(&self, u: f32, v: f32, depth_m: f32, sync: Option<SyncPose>) -> Option<Point3> {
        let view = self.wrist.pixel_to_view(u, v, depth_m);
        let local = BasisChange::VIEW_TO_END_EFFECTOR.apply(view);
        let ee = self.end_effector_transform(sync)?;
        Some(ee.apply(local))
    }

    /// Pose of the end-effector at capture time.
    ///
    /// A degenerate synced orientation is replaced by the one fetched from
    /// the simulator.  A fetched position more than `pose_tolerance_cm`
    /// away only produces a warning.
    fn end_effector_transform(&self, sync: Option<SyncPose>) -> Option<Transform3D> {
        let fetched = self.oracle.as_ref().and_then(|o| o.end_effector_state());
        match (sync, fetched) {
            (Some(pose), Some((pos, orientation))) if pose.orientation.is_degenerate() => {
                let gap = pos.distance(pose.position);
                if gap > self.config.pose_tolerance_cm {
                    warn!(
                        gap_cm = gap,
                        "synced and fetched end-effector positions disagree, using fetched orientation anyway"
                    );
                }
                Some(Transform3D::new(pose.position, normalized(orientation)))
            }
            (Some(pose), _) => Some(Transform3D::new(pose.position, normalized(pose.orientation))),
            (None, Some((pos, orientation))) => {
                debug!("no synced pose, using live end-effector state");
                Some(Transform3D::new(pos, normalized(orientation)))
            }
            (None, None) => {
                warn!("wrist detection without end-effector pose, dropping");
                None
            }
        }
    }
}

/// All-zero quaternions come from sources that never reported orientation;
/// treat them as identity.
fn normalized(q: Quaternion) -> Quaternion {
    let n = (q.w * q.w + q.x * q.x + q.y * q.y + q.z * q.z).sqrt();
    if n < 1e-6 {
        Quaternion::identity()
    } else {
        Quaternion::new(q.w / n, q.x / n, q.y / n, q.z / n)
    }
}
