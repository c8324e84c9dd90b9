//! `armsight-types` – shared data model for the perception-to-grasp stack.
//!
//! Every crate in the workspace speaks in these types: detections coming out
//! of the object detector, refined 3-D detections coming out of the
//! coordinate bridge, end-effector poses coming back from the motion driver,
//! and the progress [`Event`]s routed over the event bus.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

pub mod frame;
pub mod geometry;

pub use frame::{ColorImage, DepthMap, SyncedFrame};
pub use geometry::{Point3, Quaternion};

// ────────────────────────────────────────────────────────────────────────────
// Modes
// ────────────────────────────────────────────────────────────────────────────

/// High-level operating mode requested by the layer above the servo.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OperatingMode {
    #[default]
    Default,
    Steadycam,
    Exploration,
    /// Close-range precision work through the wrist camera.
    Exploitation,
}

impl OperatingMode {
    /// The camera that serves this mode.
    pub fn camera_source(self) -> CameraSource {
        match self {
            OperatingMode::Exploitation => CameraSource::Wrist,
            _ => CameraSource::World,
        }
    }
}

/// Which optical path produced a detection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CameraSource {
    /// Fixed camera looking at the workspace.
    World,
    /// Camera rigidly mounted on the end-effector.
    Wrist,
}

/// Whether the stack runs against the simulator or physical hardware.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeploymentMode {
    #[default]
    Simulation,
    Hardware,
}

impl std::fmt::Display for DeploymentMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DeploymentMode::Simulation => write!(f, "simulation"),
            DeploymentMode::Hardware => write!(f, "hardware"),
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Detections and poses
// ────────────────────────────────────────────────────────────────────────────

/// A single 2-D detection from the object detector.  Lives for one frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    /// Class label, e.g. `"bottle"`.
    pub name: String,
    /// Bounding-box centre `(u, v)` in pixels.
    pub pixel_center: (u32, u32),
    /// Bounding-box size `(w, h)` in pixels.
    pub bbox: (u32, u32),
}

/// End-effector pose sampled at the same instant as a camera frame.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct SyncPose {
    /// World position in centimetres.
    pub position: Point3,
    pub orientation: Quaternion,
    /// Joint angles in degrees.
    pub joints: [f32; 5],
}

/// A detection lifted into the robot-base frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RefinedDetection {
    pub name: String,
    /// Position in centimetres, robot-base frame, rounded to 0.01 cm.
    pub position: Point3,
    pub pixel_center: (u32, u32),
    pub bbox: (u32, u32),
    pub sync_pose: Option<SyncPose>,
}

impl RefinedDetection {
    /// Case-insensitive substring match against the class label.
    pub fn matches(&self, label: &str) -> bool {
        self.name.to_lowercase().contains(&label.to_lowercase())
    }
}

/// Read-only snapshot of the arm as reported by the motion driver.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct EndEffectorPose {
    /// Position in centimetres.
    pub position: Point3,
    /// Joint angles in degrees.
    pub joints: [f32; 5],
    /// Gripper aperture as reported by the finger encoders.
    pub gripper: f32,
    pub is_moving: bool,
}

// ────────────────────────────────────────────────────────────────────────────
// Events
// ────────────────────────────────────────────────────────────────────────────

/// Unified event wrapper for the event bus.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    /// e.g. `"armsight-runtime::servo"`
    pub source: String,
    pub payload: EventPayload,
}

impl Event {
    /// Stamp a payload with a fresh id and the current time.
    pub fn new(source: impl Into<String>, payload: EventPayload) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            source: source.into(),
            payload,
        }
    }
}

/// Variants of data routed over the event bus.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum EventPayload {
    /// Free-form progress line emitted by the servo state machine.
    ServoProgress { state: String, message: String },
    /// Terminal result of one servo invocation.
    ServoFinished {
        target: String,
        success: bool,
        reason: Option<String>,
    },
    /// One perception tick was published.
    PerceptionUpdate {
        source: CameraSource,
        detections: usize,
        focus_score: f32,
    },
    HardwareFault {
        component: String,
        code: u32,
        message: String,
    },
}

// ────────────────────────────────────────────────────────────────────────────
// Errors
// ────────────────────────────────────────────────────────────────────────────

/// Workspace-wide error type for hardware, calibration, and plumbing faults.
///
/// Routine perception gaps (no depth, target not visible) are not errors;
/// they surface as `None` or as a typed servo outcome.
#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ArmError {
    #[error("Hardware Fault on {component}: {details}")]
    HardwareFault { component: String, details: String },

    #[error("Driver unavailable: {0}")]
    DriverUnavailable(String),

    #[error("Calibration error: {0}")]
    Calibration(String),

    #[error("Projection error: {0}")]
    Projection(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Channel error: {0}")]
    Channel(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_exploitation_selects_wrist_camera() {
        assert_eq!(OperatingMode::Exploitation.camera_source(), CameraSource::Wrist);
        for mode in [
            OperatingMode::Default,
            OperatingMode::Steadycam,
            OperatingMode::Exploration,
        ] {
            assert_eq!(mode.camera_source(), CameraSource::World);
        }
    }

    #[test]
    fn operating_mode_uses_screaming_case_on_the_wire() {
        let json = serde_json::to_string(&OperatingMode::Exploitation).unwrap();
        assert_eq!(json, "\"EXPLOITATION\"");
    }

    #[test]
    fn refined_detection_matches_case_insensitive_substring() {
        let det = RefinedDetection {
            name: "Water_Bottle".to_string(),
            position: Point3::zero(),
            pixel_center: (10, 10),
            bbox: (4, 4),
            sync_pose: None,
        };
        assert!(det.matches("bottle"));
        assert!(det.matches("WATER"));
        assert!(!det.matches("cup"));
    }

    #[test]
    fn event_roundtrip() {
        let event = Event::new(
            "armsight-runtime::servo",
            EventPayload::ServoProgress {
                state: "DETECT".to_string(),
                message: "found bottle".to_string(),
            },
        );
        let json = serde_json::to_string(&event).unwrap();
        let back: Event = serde_json::from_str(&json).unwrap();
        assert_eq!(event.id, back.id);
        assert_eq!(event.source, back.source);
    }

    #[test]
    fn arm_error_display() {
        let err = ArmError::HardwareFault {
            component: "gripper".to_string(),
            details: "overcurrent".to_string(),
        };
        assert!(err.to_string().contains("gripper"));
        assert!(ArmError::Calibration("no plane".into()).to_string().contains("no plane"));
    }
}
