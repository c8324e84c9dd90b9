//! Synthetic tabletop scene for the headless demo.
//!
//! Objects are coloured cubes at known world positions.  Frames are
//! rendered through the same [`SimCamera`] the projection engine inverts, so
//! the full perception path runs on them unchanged.

use std::sync::Arc;

use armsight_hal::{DepthCamera, MotionDriver, SimArm};
use armsight_perception::{ColorClass, GroundTruth, SimCamera, SimCameraConfig, SimulationOracle};
use armsight_types::{ArmError, ColorImage, DepthMap, Point3, Quaternion, SyncPose, SyncedFrame};
use chrono::Utc;

const BACKGROUND: [u8; 3] = [46, 46, 52];
const BACKGROUND_ALT: [u8; 3] = [58, 58, 64];
const CLASS_TOLERANCE: u8 = 12;

#[derive(Debug, Clone, PartialEq)]
pub struct SceneObject {
    pub name: String,
    /// Centre, world cm.
    pub position: Point3,
    /// Edge length, cm.
    pub size_cm: f32,
    pub rgb: [u8; 3],
}

impl SceneObject {
    pub fn new(name: &str, position: Point3, size_cm: f32, rgb: [u8; 3]) -> Self {
        Self {
            name: name.to_string(),
            position,
            size_cm,
            rgb,
        }
    }
}

/// Static scene plus the arm whose pose is stamped onto every frame.
pub struct SyntheticScene {
    camera: SimCamera,
    objects: Vec<SceneObject>,
    arm: Arc<SimArm>,
}

impl SyntheticScene {
    pub fn new(camera: SimCamera, objects: Vec<SceneObject>, arm: Arc<SimArm>) -> Self {
        Self { camera, objects, arm }
    }

    /// Bottle, cup, and duck in front of the default render camera.
    pub fn demo(arm: Arc<SimArm>) -> Result<Self, ArmError> {
        let camera = SimCamera::new(SimCameraConfig::default())?;
        let objects = vec![
            SceneObject::new("bottle", Point3::new(30.0, 0.0, 5.0), 6.0, [40, 200, 70]),
            SceneObject::new("cup", Point3::new(20.0, -12.0, 4.0), 8.0, [220, 40, 40]),
            SceneObject::new("duck", Point3::new(24.0, 12.0, 3.0), 5.0, [235, 210, 40]),
        ];
        Ok(Self::new(camera, objects, arm))
    }

    pub fn camera(&self) -> &SimCamera {
        &self.camera
    }

    pub fn objects(&self) -> &[SceneObject] {
        &self.objects
    }

    /// One detector class per object colour.
    pub fn color_classes(&self) -> Vec<ColorClass> {
        self.objects
            .iter()
            .map(|o| ColorClass::new(o.name.clone(), o.rgb, CLASS_TOLERANCE))
            .collect()
    }

    /// Render colour and depth.  Each object is drawn as a square facing
    /// the camera at the planar depth of its centre; nearer objects win.
    pub fn render(&self) -> (ColorImage, DepthMap) {
        let cfg = self.camera.config();
        let (w, h) = (cfg.width, cfg.height);
        let mut color = ColorImage::filled(w, h, BACKGROUND);
        for v in 0..h {
            for u in 0..w {
                if (u / 8 + v / 8) % 2 == 0 {
                    color.set_pixel(u, v, BACKGROUND_ALT);
                }
            }
        }
        let mut depth = DepthMap::filled(w, h, 0.0);
        let (fx, _, _, _) = self.camera.intrinsics();

        let mut order: Vec<&SceneObject> = self.objects.iter().collect();
        // Far to near, so nearer objects overwrite.
        order.sort_by(|a, b| {
            self.camera
                .planar_depth(b.position)
                .total_cmp(&self.camera.planar_depth(a.position))
        });

        for obj in order {
            let Some((cu, cv, d)) = self.camera.world_to_pixel(obj.position) else {
                continue;
            };
            let half = (obj.size_cm / 100.0 * fx / d / 2.0).max(1.0);
            let u0 = (cu - half).max(0.0) as u32;
            let v0 = (cv - half).max(0.0) as u32;
            let u1 = ((cu + half).max(0.0) as u32).min(w);
            let v1 = ((cv + half).max(0.0) as u32).min(h);
            for v in v0..v1 {
                for u in u0..u1 {
                    color.set_pixel(u, v, obj.rgb);
                    depth.set(u, v, d);
                }
            }
        }
        (color, depth)
    }
}

/// Ground truth straight from the scene description.
pub struct SceneOracle(pub Arc<SyntheticScene>);

impl SimulationOracle for SceneOracle {
    fn object_position(&self, name: &str) -> GroundTruth {
        self.0
            .objects
            .iter()
            .find(|o| o.name == name)
            .map_or(GroundTruth::Absent, |o| GroundTruth::Present(o.position))
    }

    fn end_effector_state(&self) -> Option<(Point3, Quaternion)> {
        let pose = self.0.arm.current_pose().ok()?;
        Some((pose.position, self.0.arm.orientation()))
    }
}

/// [`DepthCamera`] that renders the scene on every capture.
pub struct SceneCamera {
    scene: Arc<SyntheticScene>,
}

impl SceneCamera {
    pub fn new(scene: Arc<SyntheticScene>) -> Self {
        Self { scene }
    }
}

impl DepthCamera for SceneCamera {
    fn id(&self) -> &str {
        "synthetic_world"
    }

    fn capture(&mut self) -> Result<Option<SyncedFrame>, ArmError> {
        let (color, depth) = self.scene.render();
        let pose = self.scene.arm.current_pose().ok().map(|p| SyncPose {
            position: p.position,
            orientation: self.scene.arm.orientation(),
            joints: p.joints,
        });
        Ok(Some(SyncedFrame {
            color,
            depth,
            pose,
            captured_at: Utc::now(),
        }))
    }
}
