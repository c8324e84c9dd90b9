//! Grasp pose planning with a per-object parameter memory.
//!
//! Known objects reuse remembered parameters.  Unknown ones get a size
//! estimate from the bounding box (pinhole relation at an assumed distance)
//! and one of two strategies:
//!
//! - **centre grasp** – aperture = object width + clearance, clamped to
//!   `[min_width_pct, 100] %` of the gripper;
//! - **edge grasp** – the object is wider than the gripper can open, so aim
//!   `width/2 − edge_margin` off-centre along x with a narrower aperture.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use armsight_types::{ArmError, Point3};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

/// Planner tunables.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GraspPlannerConfig {
    pub max_aperture_cm: f32,
    pub focal_length_px: f32,
    /// Distance assumed when converting box pixels to centimetres.
    pub nominal_distance_cm: f32,
    pub default_approach_cm: f32,
    pub default_width_pct: f32,
    pub default_depth_cm: f32,
    pub edge_width_pct: f32,
    pub edge_depth_cm: f32,
    /// How far inside the object's edge the edge grasp aims.
    pub edge_margin_cm: f32,
    /// Extra opening beyond the estimated width for centre grasps.
    pub clearance_cm: f32,
    pub min_width_pct: f32,
    /// Label fragments of thin, flat objects lying on the table.
    pub thin_classes: Vec<String>,
    pub thin_depth_cm: f32,
    pub thin_approach_cm: f32,
}

impl Default for GraspPlannerConfig {
    fn default() -> Self {
        Self {
            max_aperture_cm: 6.0,
            focal_length_px: 520.0,
            nominal_distance_cm: 50.0,
            default_approach_cm: 10.0,
            default_width_pct: 100.0,
            default_depth_cm: -3.0,
            edge_width_pct: 60.0,
            edge_depth_cm: -2.0,
            edge_margin_cm: 1.5,
            clearance_cm: 2.0,
            min_width_pct: 40.0,
            thin_classes: vec!["kite".to_string()],
            thin_depth_cm: -0.5,
            thin_approach_cm: 8.0,
        }
    }
}

/// Remembered parameters for one object class.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GraspParams {
    pub approach_offset_z: f32,
    /// Gripper opening, percent.
    pub gripper_width: f32,
    /// Falls back to the planner default when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub grasp_depth_offset: Option<f32>,
}

impl GraspParams {
    pub fn new(approach_offset_z: f32, gripper_width: f32) -> Self {
        Self {
            approach_offset_z,
            gripper_width,
            grasp_depth_offset: None,
        }
    }
}

/// How a plan was derived.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GraspStrategy {
    Remembered,
    Centre,
    Edge,
    /// No usable bounding box: fully open, default depths.
    Conservative,
}

/// Output of [`GraspPlanner::compute_grasp_pose`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraspPlan {
    pub object_name: String,
    pub pre_grasp: Point3,
    pub grasp: Point3,
    /// Percent, `0..=100`.
    pub gripper_width: f32,
    /// Lateral (x) offset from the object centre, cm.  Zero unless edge grasp.
    pub lateral_offset: f32,
    pub approach_offset_z: f32,
    pub grasp_depth_offset: f32,
    pub strategy: GraspStrategy,
}

impl GraspPlan {
    /// Parameters to remember if this plan succeeds.
    pub fn params(&self) -> GraspParams {
        GraspParams {
            approach_offset_z: self.approach_offset_z,
            gripper_width: self.gripper_width,
            grasp_depth_offset: Some(self.grasp_depth_offset),
        }
    }
}

/// Built-in presets for the demo objects.
pub fn default_memory() -> BTreeMap<String, GraspParams> {
    [
        ("bottle", 5.0, 80.0),
        ("cup", 5.0, 90.0),
        ("teddy", 8.0, 100.0),
        ("duck", 5.0, 80.0),
        ("soccerball", 10.0, 100.0),
    ]
    .into_iter()
    .map(|(name, z, w)| (name.to_string(), GraspParams::new(z, w)))
    .collect()
}

/// Rule-based planner with learned per-object overrides.
#[derive(Debug, Clone)]
pub struct GraspPlanner {
    config: GraspPlannerConfig,
    memory: BTreeMap<String, GraspParams>,
    memory_path: Option<PathBuf>,
}

impl GraspPlanner {
    /// Planner with the built-in presets and no persistence.
    pub fn new(config: GraspPlannerConfig) -> Self {
        Self {
            config,
            memory: default_memory(),
            memory_path: None,
        }
    }

    /// Planner backed by a JSON memory file.  A missing file starts from the
    /// presets and is created on the first [`save`](Self::save).
    pub fn with_memory_file(config: GraspPlannerConfig, path: impl Into<PathBuf>) -> Result<Self, ArmError> {
        let path = path.into();
        let memory = if path.exists() {
            let raw = fs::read_to_string(&path)
                .map_err(|e| ArmError::Config(format!("read {}: {e}", path.display())))?;
            let memory: BTreeMap<String, GraspParams> =
                serde_json::from_str(&raw).map_err(|e| ArmError::Serialization(e.to_string()))?;
            info!(path = %path.display(), entries = memory.len(), "grasp memory loaded");
            memory
        } else {
            default_memory()
        };
        Ok(Self {
            config,
            memory,
            memory_path: Some(path),
        })
    }

    pub fn config(&self) -> &GraspPlannerConfig {
        &self.config
    }

    pub fn remembered(&self, name: &str) -> Option<GraspParams> {
        self.memory.get(name).copied()
    }

    /// Plan pre-grasp and grasp points for `name` centred at `position`
    /// (cm) with a `bbox` of `(w, h)` pixels.
    pub fn compute_grasp_pose(&self, name: &str, position: Point3, bbox: (u32, u32)) -> GraspPlan {
        let cfg = &self.config;
        let mut approach = cfg.default_approach_cm;
        let mut width = cfg.default_width_pct;
        let mut depth = cfg.default_depth_cm;
        let mut lateral = 0.0;
        let strategy;

        if let Some(params) = self.memory.get(name) {
            approach = params.approach_offset_z;
            width = params.gripper_width;
            depth = params.grasp_depth_offset.unwrap_or(depth);
            strategy = GraspStrategy::Remembered;
        } else {
            if bbox.0 > 0 && bbox.1 > 0 {
                let est_w = bbox.0 as f32 / cfg.focal_length_px * cfg.nominal_distance_cm;
                let est_h = bbox.1 as f32 / cfg.focal_length_px * cfg.nominal_distance_cm;
                let min_dim = est_w.min(est_h);
                info!(name, est_w_cm = est_w, est_h_cm = est_h, "object size estimated");

                if min_dim > cfg.max_aperture_cm {
                    lateral = est_w / 2.0 - cfg.edge_margin_cm;
                    width = cfg.edge_width_pct;
                    depth = cfg.edge_depth_cm;
                    strategy = GraspStrategy::Edge;
                    warn!(name, min_dim_cm = min_dim, lateral_cm = lateral, "object wider than gripper, edge grasp");
                } else {
                    let target = min_dim + cfg.clearance_cm;
                    width = (target / cfg.max_aperture_cm * 100.0).clamp(cfg.min_width_pct, 100.0);
                    strategy = GraspStrategy::Centre;
                }
            } else {
                strategy = GraspStrategy::Conservative;
            }

            let lower = name.to_lowercase();
            if cfg.thin_classes.iter().any(|t| lower.contains(t.as_str())) {
                depth = cfg.thin_depth_cm;
                approach = cfg.thin_approach_cm;
            }
        }

        let base = Point3::new(position.x + lateral, position.y, position.z);
        let plan = GraspPlan {
            object_name: name.to_string(),
            pre_grasp: Point3::new(base.x, base.y, base.z + approach),
            grasp: Point3::new(base.x, base.y, base.z + depth),
            gripper_width: width.min(100.0),
            lateral_offset: lateral,
            approach_offset_z: approach,
            grasp_depth_offset: depth,
            strategy,
        };
        info!(
            name,
            ?strategy,
            pre_x = plan.pre_grasp.x,
            pre_y = plan.pre_grasp.y,
            pre_z = plan.pre_grasp.z,
            width = plan.gripper_width,
            "grasp pose planned"
        );
        plan
    }

    /// Learn from an attempt.
    ///
    /// Success stores `params`.  Failure on a remembered object opens the
    /// gripper 10 % wider (max 100) and approaches 1 cm higher next time.
    pub fn update_grasp_memory(&mut self, name: &str, success: bool, params: GraspParams) {
        if success {
            info!(name, "grasp succeeded, remembering parameters");
            self.memory.insert(name.to_string(), params);
        } else if let Some(entry) = self.memory.get_mut(name) {
            entry.gripper_width = (entry.gripper_width + 10.0).min(100.0);
            entry.approach_offset_z += 1.0;
            warn!(
                name,
                width = entry.gripper_width,
                approach = entry.approach_offset_z,
                "grasp failed, adjusted remembered parameters"
            );
        } else {
            warn!(name, "grasp failed for unremembered object");
        }
    }

    /// Persist the memory if a file was configured.
    pub fn save(&self) -> Result<(), ArmError> {
        let Some(path) = &self.memory_path else {
            return Ok(());
        };
        save_memory(path, &self.memory)
    }
}

impl Default for GraspPlanner {
    fn default() -> Self {
        Self::new(GraspPlannerConfig::default())
    }
}

fn save_memory(path: &Path, memory: &BTreeMap<String, GraspParams>) -> Result<(), ArmError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| ArmError::Config(e.to_string()))?;
    }
    let raw = serde_json::to_string_pretty(memory).map_err(|e| ArmError::Serialization(e.to_string()))?;
    fs::write(path, raw).map_err(|e| ArmError::Config(format!("write {}: {e}", path.display())))
}
