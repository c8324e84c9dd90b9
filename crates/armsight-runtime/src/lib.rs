//! `armsight-runtime` – the closed-loop grasping engine.
//!
//! Perception runs on its own thread and keeps a latest-value snapshot
//! fresh; the servo state machine reads that snapshot and drives the arm.
//!
//! # Modules
//!
//! - [`perception_loop`] – [`PerceptionLoop`][perception_loop::PerceptionLoop]:
//!   capture → detect → refine → focus score → publish, at a fixed interval.
//! - [`servo`] – [`ServoController`][servo::ServoController]: the
//!   DETECT / VISUAL_SERVO / AUTO_FOCUS / VLM_CHECK / SCANNING / GRASP state
//!   machine with cooperative cancellation and a single-run guard.
//! - [`control`] – [`ApproachController`][control::ApproachController]: the
//!   pure two-phase proportional positioning step behind VISUAL_SERVO.
//! - [`command_gate`] – [`CommandGate`][command_gate::CommandGate]: drops
//!   motion commands that would not move the arm.
//! - [`grasp_planner`] – [`GraspPlanner`][grasp_planner::GraspPlanner]:
//!   pre-grasp and grasp points, gripper width, and learned per-object
//!   parameters with JSON persistence.
//! - [`grasp_task`] – [`GraspCoordinator`][grasp_task::GraspCoordinator]:
//!   plan, open, servo, and learn for one request.
//! - [`cancel`] – [`CancelToken`][cancel::CancelToken] and
//!   [`RunFlag`][cancel::RunFlag].
//! - [`telemetry`] – [`init_tracing`][telemetry::init_tracing]: global
//!   `tracing` subscriber with an optional OTLP span exporter.  Set
//!   `OTEL_EXPORTER_OTLP_ENDPOINT` to enable export.

pub mod cancel;
pub mod command_gate;
pub mod control;
pub mod grasp_planner;
pub mod grasp_task;
pub mod perception_loop;
pub mod servo;
pub mod telemetry;

pub use cancel::{CancelToken, RunFlag, RunGuard};
pub use command_gate::CommandGate;
pub use control::{ApproachController, ControlPhase, SpeedTiers, Tick};
pub use grasp_planner::{GraspParams, GraspPlan, GraspPlanner, GraspPlannerConfig, GraspStrategy};
pub use grasp_task::{GraspCoordinator, GraspReport};
pub use perception_loop::{FocusMode, PerceptionHandle, PerceptionLoop, PerceptionLoopConfig};
pub use servo::{
    Confidence, ConfidenceJudge, FailureReason, PerceptionSource, ServoConfig, ServoController,
    ServoOutcome, ServoState, SharpnessProxy,
};
pub use telemetry::{LogFormat, TracerProviderGuard, init_tracing};
