//! `armsight-perception` – turns 2-D detections plus depth into stable 3-D
//! positions in the robot-base frame.
//!
//! # Pipeline
//!
//! ```text
//! ColorImage ──► ObjectDetector ──► Detection { name, pixel_center, bbox }
//!                                         │
//! DepthMap ──► DepthSampler ──────────────┤ metres
//!                                         ▼
//!                 Projector (sim | hardware) + per-axis Kalman filters
//!                                         │ cm
//!                                         ▼
//!                 CoordinateBridge (install offset | wrist kinematics)
//!                                         │
//!                                         ▼
//!                             RefinedDetection (robot base, cm)
//! ```

pub mod bridge;
pub mod calibration;
pub mod depth;
pub mod detector;
pub mod filter;
pub mod focus;
pub mod projection;
pub mod transform;

pub use bridge::{BridgeConfig, CoordinateBridge};
pub use calibration::{AffineCalibration, FloorCalibration};
pub use depth::DepthSampler;
pub use detector::{ColorBlobDetector, ColorClass, ObjectDetector};
pub use filter::{AxisFilters, FilterTuning, KalmanFilter1D};
pub use projection::hardware::{HardwareIntrinsics, HardwareProjection};
pub use projection::sim::{GroundTruth, SimCamera, SimCameraConfig, SimProjection, SimulationOracle};
pub use projection::{ProjectionFrame, Projector};
