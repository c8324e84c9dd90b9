//! Visual-servo state machine: find, approach, focus, confirm, and grasp.
//!
//! ```text
//! IDLE ─► DETECT ─► VISUAL_SERVO ─► AUTO_FOCUS ─► VLM_CHECK ─┬─► GRASP ─► SUCCESS
//!           │            │               ▲                    │     │
//!           │            │               └──── SCANNING ◄─────┘     │
//!           └────────────┴───────────────────────────────────────► FAIL
//! ```
//!
//! [`ServoController::run`] executes one sequence synchronously on the
//! calling thread.  Only one sequence runs at a time per controller; a
//! concurrent call returns [`FailureReason::AlreadyRunning`] at once.
//! [`ServoController::stop`] cancels cooperatively: every wait polls the
//! token, and the sequence ends in `FAIL(Cancelled)` unless success was
//! already latched.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use armsight_hal::MotionDriver;
use armsight_middleware::{EventBus, PerceptionHub, PerceptionSnapshot, Topic};
use armsight_types::{Event, EventPayload, Point3, RefinedDetection};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{error, info, instrument, warn};

use crate::cancel::{CancelToken, RunFlag, RunGuard};
use crate::command_gate::DEFAULT_MIN_DELTA_CM;
use crate::control::{ApproachController, SpeedTiers, Tick};

const EVENT_SOURCE: &str = "armsight-runtime::servo";

// ────────────────────────────────────────────────────────────────────────────
// Configuration
// ────────────────────────────────────────────────────────────────────────────

/// Servo tunables.  Durations are seconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServoConfig {
    pub loop_hz: f32,
    pub gain: f32,
    pub xy_threshold_cm: f32,
    pub z_threshold_cm: f32,
    pub approach_height_cm: f32,
    pub settle_secs: f32,
    pub lost_target_grace_secs: f32,
    pub timeout_secs: f32,
    pub min_command_delta_cm: f32,
    pub speed: SpeedTiers,
    /// Timeout handed to the driver with every move, seconds.
    pub move_timeout_secs: f32,

    pub detect_retries: u32,
    pub detect_interval_secs: f32,

    pub focus_step_cm: f32,
    pub focus_range_cm: f32,
    pub focus_max_iterations: u32,
    /// Minimum score gain that counts as an improvement.
    pub focus_threshold: f32,
    pub focus_settle_secs: f32,
    pub focus_speed: u8,
    pub focus_return_speed: u8,

    pub vlm_settle_secs: f32,
    /// Sharpness above which [`SharpnessProxy`] is confident.
    pub confidence_threshold: f32,

    pub scan_step_cm: f32,
    pub scan_speed: u8,
    pub scan_settle_secs: f32,
    pub max_scan_attempts: u32,

    pub grasp_sample_secs: f32,
    /// Aperture change below which a sample counts as stable.
    pub grasp_epsilon: f32,
    pub grasp_stable_samples: u32,
    pub grasp_timeout_secs: f32,
    /// Final aperture above which something is held.
    pub grasp_success_threshold: f32,

    /// Snapshots older than this count as "no detection".
    pub stale_after_secs: f32,
    /// Descend goal offset when the caller gives none, cm.
    pub default_grasp_offset_cm: f32,
}

impl Default for ServoConfig {
    fn default() -> Self {
        Self {
            loop_hz: 10.0,
            gain: 0.8,
            xy_threshold_cm: 1.0,
            z_threshold_cm: 0.5,
            approach_height_cm: 8.0,
            settle_secs: 0.3,
            lost_target_grace_secs: 2.0,
            timeout_secs: 60.0,
            min_command_delta_cm: DEFAULT_MIN_DELTA_CM,
            speed: SpeedTiers::default(),
            move_timeout_secs: 5.0,
            detect_retries: 3,
            detect_interval_secs: 1.0,
            focus_step_cm: 0.5,
            focus_range_cm: 5.0,
            focus_max_iterations: 10,
            focus_threshold: 10.0,
            focus_settle_secs: 0.5,
            focus_speed: 15,
            focus_return_speed: 20,
            vlm_settle_secs: 1.0,
            confidence_threshold: 50.0,
            scan_step_cm: 2.0,
            scan_speed: 20,
            scan_settle_secs: 1.0,
            max_scan_attempts: 8,
            grasp_sample_secs: 0.05,
            grasp_epsilon: 0.0005,
            grasp_stable_samples: 10,
            grasp_timeout_secs: 3.5,
            grasp_success_threshold: 0.005,
            stale_after_secs: 1.0,
            default_grasp_offset_cm: -1.5,
        }
    }
}

fn secs(s: f32) -> Duration {
    Duration::from_secs_f32(s.max(0.0))
}

/// Lateral shift for the `attempt`-th scan (1-based): -X, +Y, -Y, +X, ...
fn scan_shift(attempt: u32, step: f32) -> Point3 {
    match attempt % 4 {
        0 => Point3::new(step, 0.0, 0.0),
        1 => Point3::new(-step, 0.0, 0.0),
        2 => Point3::new(0.0, step, 0.0),
        _ => Point3::new(0.0, -step, 0.0),
    }
}

impl ServoConfig {
    fn tick_period(&self) -> Duration {
        secs(1.0 / self.loop_hz.max(f32::EPSILON))
    }
}

// ────────────────────────────────────────────────────────────────────────────
// States and outcomes
// ────────────────────────────────────────────────────────────────────────────

/// Why a sequence ended in FAIL.
#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum FailureReason {
    #[error("another sequence is already running")]
    AlreadyRunning,
    #[error("target not found")]
    TargetNotFound,
    #[error("target lost during approach")]
    TargetLost,
    #[error("control loop timed out")]
    Timeout,
    #[error("gripper closed on nothing (aperture {aperture:.4})")]
    EmptyGrasp { aperture: f32 },
    #[error("cancelled")]
    Cancelled,
    #[error("not confident about the target")]
    LowConfidence,
    #[error("motion fault: {0}")]
    MotionFault(String),
}

/// Terminal result of [`ServoController::run`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ServoOutcome {
    Success { aperture: f32 },
    Failed(FailureReason),
}

impl ServoOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, ServoOutcome::Success { .. })
    }

    pub fn failure(&self) -> Option<&FailureReason> {
        match self {
            ServoOutcome::Failed(r) => Some(r),
            ServoOutcome::Success { .. } => None,
        }
    }
}

/// Servo state machine states.  Terminal states carry their result.
#[derive(Debug, Clone, PartialEq)]
pub enum ServoState {
    Idle,
    Detect,
    VisualServo,
    AutoFocus,
    VlmCheck,
    Scanning,
    Grasp,
    Success { aperture: f32 },
    Fail(FailureReason),
}

impl ServoState {
    pub fn name(&self) -> &'static str {
        match self {
            ServoState::Idle => "IDLE",
            ServoState::Detect => "DETECT",
            ServoState::VisualServo => "VISUAL_SERVO",
            ServoState::AutoFocus => "AUTO_FOCUS",
            ServoState::VlmCheck => "VLM_CHECK",
            ServoState::Scanning => "SCANNING",
            ServoState::Grasp => "GRASP",
            ServoState::Success { .. } => "SUCCESS",
            ServoState::Fail(_) => "FAIL",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, ServoState::Success { .. } | ServoState::Fail(_))
    }

    /// Legal edges of the machine.  Any live state may fail.
    pub fn can_transition_to(&self, next: &ServoState) -> bool {
        use ServoState::*;
        if !self.is_terminal() && matches!(next, Fail(_)) {
            return true;
        }
        matches!(
            (self, next),
            (Idle, Detect)
                | (Detect, VisualServo)
                | (VisualServo, AutoFocus)
                | (AutoFocus, VlmCheck)
                | (VlmCheck, Grasp)
                | (VlmCheck, Scanning)
                | (Scanning, AutoFocus)
                | (Grasp, Success { .. })
        )
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Seams
// ────────────────────────────────────────────────────────────────────────────

/// Read access to the latest perception snapshot.
pub trait PerceptionSource: Send + Sync {
    fn snapshot(&self) -> PerceptionSnapshot;
}

impl PerceptionSource for PerceptionHub {
    fn snapshot(&self) -> PerceptionSnapshot {
        self.latest()
    }
}

/// Verdict of a [`ConfidenceJudge`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Confidence {
    Confident,
    Uncertain,
    /// The judge could not decide; the sequence fails.
    Unknown,
}

/// Decides whether the current view is good enough to grasp.
pub trait ConfidenceJudge: Send + Sync {
    fn judge(&self, target: &str, snapshot: &PerceptionSnapshot) -> Confidence;
}

/// Treats image sharpness as confidence.  A stand-in until a semantic
/// verifier is plugged in.
#[derive(Debug, Clone, Copy)]
pub struct SharpnessProxy {
    pub threshold: f32,
}

impl ConfidenceJudge for SharpnessProxy {
    fn judge(&self, _target: &str, snapshot: &PerceptionSnapshot) -> Confidence {
        if !snapshot.focus_score.is_finite() {
            Confidence::Unknown
        } else if snapshot.focus_score > self.threshold {
            Confidence::Confident
        } else {
            Confidence::Uncertain
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Controller
// ────────────────────────────────────────────────────────────────────────────

/// Step results inside one state.
type StepResult = Result<ServoState, FailureReason>;

/// Per-run bookkeeping.
struct RunContext<'a> {
    target: &'a str,
    grasp_offset_cm: f32,
    scan_attempts: u32,
}

/// Drives one approach-and-grasp sequence at a time.
pub struct ServoController {
    config: ServoConfig,
    driver: Arc<dyn MotionDriver>,
    perception: Arc<dyn PerceptionSource>,
    judge: Arc<dyn ConfidenceJudge>,
    bus: Option<EventBus>,
    cancel: CancelToken,
    running: RunFlag,
    state: Mutex<ServoState>,
}

impl ServoController {
    pub fn new(
        config: ServoConfig,
        driver: Arc<dyn MotionDriver>,
        perception: Arc<dyn PerceptionSource>,
    ) -> Self {
        let judge = Arc::new(SharpnessProxy {
            threshold: config.confidence_threshold,
        });
        Self {
            config,
            driver,
            perception,
            judge,
            bus: None,
            cancel: CancelToken::new(),
            running: RunFlag::new(),
            state: Mutex::new(ServoState::Idle),
        }
    }

    /// Replace the default [`SharpnessProxy`].
    pub fn with_judge(mut self, judge: Arc<dyn ConfidenceJudge>) -> Self {
        self.judge = judge;
        self
    }

    /// Publish progress on `bus` under [`Topic::ServoProgress`].
    pub fn with_bus(mut self, bus: EventBus) -> Self {
        self.bus = Some(bus);
        self
    }

    pub fn config(&self) -> &ServoConfig {
        &self.config
    }

    /// Token shared with whoever may cancel the sequence.
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Request cancellation of the running sequence.
    pub fn stop(&self) {
        warn!("servo stop requested");
        self.cancel.cancel();
    }

    pub fn is_running(&self) -> bool {
        self.running.is_running()
    }

    pub fn current_state(&self) -> ServoState {
        self.state.lock().map(|s| s.clone()).unwrap_or(ServoState::Idle)
    }

    /// Claim this controller for one sequence and re-arm the cancel token.
    ///
    /// `None` if a sequence is already running.  Callers that do work before
    /// the servo loop (planning, opening the gripper) claim first and hand
    /// the guard to [`run_claimed`](Self::run_claimed), so a `stop()` issued
    /// in between is not lost.
    pub fn try_begin(&self) -> Option<RunGuard> {
        let guard = self.running.try_acquire()?;
        self.cancel.reset();
        Some(guard)
    }

    /// Approach and grasp `target`.
    ///
    /// `grasp_offset_cm` shifts the descend goal relative to the object
    /// centre; `None` uses [`ServoConfig::default_grasp_offset_cm`].
    pub fn run(&self, target: &str, grasp_offset_cm: Option<f32>) -> ServoOutcome {
        let Some(guard) = self.try_begin() else {
            warn!(target, "servo already running, rejecting");
            return ServoOutcome::Failed(FailureReason::AlreadyRunning);
        };
        self.run_claimed(guard, target, grasp_offset_cm)
    }

    /// [`run`](Self::run) under a guard from [`try_begin`](Self::try_begin).
    /// The guard is released when the sequence ends.
    #[instrument(skip(self, guard, grasp_offset_cm))]
    pub fn run_claimed(&self, guard: RunGuard, target: &str, grasp_offset_cm: Option<f32>) -> ServoOutcome {
        if !guard.holds(&self.running) {
            error!(target, "run guard belongs to another controller");
            return ServoOutcome::Failed(FailureReason::AlreadyRunning);
        }
        self.set_state(ServoState::Idle);
        info!("approach and grasp started");

        let mut ctx = RunContext {
            target,
            grasp_offset_cm: grasp_offset_cm.unwrap_or(self.config.default_grasp_offset_cm),
            scan_attempts: 0,
        };
        let mut state = ServoState::Idle;

        while !state.is_terminal() {
            let next = if self.cancel.is_cancelled() {
                ServoState::Fail(FailureReason::Cancelled)
            } else {
                self.step(&state, &mut ctx).unwrap_or_else(ServoState::Fail)
            };
            self.transition(&mut state, next);
        }

        let outcome = match state {
            ServoState::Success { aperture } => ServoOutcome::Success { aperture },
            ServoState::Fail(reason) => ServoOutcome::Failed(reason),
            _ => ServoOutcome::Failed(FailureReason::Cancelled),
        };
        match &outcome {
            ServoOutcome::Success { aperture } => info!(aperture, "grasp sequence succeeded"),
            ServoOutcome::Failed(reason) => warn!(%reason, "grasp sequence failed"),
        }
        self.publish(EventPayload::ServoFinished {
            target: target.to_string(),
            success: outcome.is_success(),
            reason: outcome.failure().map(ToString::to_string),
        });
        outcome
    }

    /// Execute the work of `state` and return where to go next.
    fn step(&self, state: &ServoState, ctx: &mut RunContext<'_>) -> StepResult {
        match state {
            ServoState::Idle => Ok(ServoState::Detect),
            ServoState::Detect => self.detect(ctx.target),
            ServoState::VisualServo => self.visual_servo(ctx.target, ctx.grasp_offset_cm),
            ServoState::AutoFocus => self.auto_focus(),
            ServoState::VlmCheck => self.vlm_check(ctx.target),
            ServoState::Scanning => self.scan(ctx),
            ServoState::Grasp => self.grasp(),
            ServoState::Success { .. } | ServoState::Fail(_) => Ok(state.clone()),
        }
    }

    fn transition(&self, state: &mut ServoState, next: ServoState) {
        debug_assert!(
            state.can_transition_to(&next),
            "illegal servo transition {} -> {}",
            state.name(),
            next.name()
        );
        info!(from = state.name(), to = next.name(), "servo transition");
        self.publish(EventPayload::ServoProgress {
            state: next.name().to_string(),
            message: format!("{} -> {}", state.name(), next.name()),
        });
        *state = next.clone();
        self.set_state(next);
    }

    fn set_state(&self, next: ServoState) {
        if let Ok(mut s) = self.state.lock() {
            *s = next;
        }
    }

    fn publish(&self, payload: EventPayload) {
        if let Some(bus) = &self.bus {
            // Nobody listening is fine.
            let _ = bus.publish_to(Topic::ServoProgress, Event::new(EVENT_SOURCE, payload));
        }
    }

    fn progress(&self, state: &ServoState, message: String) {
        self.publish(EventPayload::ServoProgress {
            state: state.name().to_string(),
            message,
        });
    }

    /// Fresh detection matching `label`, if any.
    fn find_target(&self, label: &str) -> Option<RefinedDetection> {
        let snap = self.perception.snapshot();
        if snap.is_stale(Utc::now(), secs(self.config.stale_after_secs)) {
            return None;
        }
        snap.find(label).cloned()
    }

    fn pose(&self) -> Result<Point3, FailureReason> {
        self.driver
            .current_pose()
            .map(|p| p.position)
            .map_err(|e| FailureReason::MotionFault(e.to_string()))
    }

    fn move_to(&self, target: Point3, speed: u8) -> Result<(), FailureReason> {
        self.driver
            .move_to(target, speed, false, secs(self.config.move_timeout_secs))
            .map_err(|e| FailureReason::MotionFault(e.to_string()))
    }

    fn wait(&self, seconds: f32) -> Result<(), FailureReason> {
        if self.cancel.sleep(secs(seconds)) {
            Ok(())
        } else {
            Err(FailureReason::Cancelled)
        }
    }

    // ── DETECT ──────────────────────────────────────────────────────────────

    fn detect(&self, label: &str) -> StepResult {
        let cfg = &self.config;
        for attempt in 0..=cfg.detect_retries {
            if let Some(found) = self.find_target(label) {
                info!(name = %found.name, ?found.position, "target detected");
                return Ok(ServoState::VisualServo);
            }
            if attempt == cfg.detect_retries {
                break;
            }
            warn!(attempt = attempt + 1, "target not visible, retrying");
            self.wait(cfg.detect_interval_secs)?;
        }
        error!(retries = cfg.detect_retries, "target not found");
        Err(FailureReason::TargetNotFound)
    }

    // ── VISUAL_SERVO ────────────────────────────────────────────────────────

    fn visual_servo(&self, label: &str, grasp_offset_cm: f32) -> StepResult {
        let cfg = &self.config;
        let period = cfg.tick_period();
        let mut ctl = ApproachController::new(cfg, grasp_offset_cm);
        let start = Instant::now();
        let mut lost_since: Option<Instant> = None;
        let mut last_target: Option<Point3> = None;

        loop {
            if self.cancel.is_cancelled() {
                return Err(FailureReason::Cancelled);
            }
            if start.elapsed() > secs(cfg.timeout_secs) {
                warn!(timeout_secs = cfg.timeout_secs, "visual servo timed out");
                return Err(FailureReason::Timeout);
            }
            let tick_start = Instant::now();

            let Some(found) = self.find_target(label) else {
                let since = *lost_since.get_or_insert_with(Instant::now);
                if since.elapsed() > secs(cfg.lost_target_grace_secs) {
                    error!("target lost for too long");
                    return Err(FailureReason::TargetLost);
                }
                warn!(lost_secs = since.elapsed().as_secs_f32(), "target lost, waiting");
                self.wait(1.0 / cfg.loop_hz)?;
                continue;
            };
            lost_since = None;
            let target = found.position;
            last_target = Some(target);

            let ee = self.pose()?;
            match ctl.tick(ee, target) {
                Tick::Move(step) => {
                    if step.send {
                        self.move_to(step.command.target, step.command.speed)?;
                    }
                    self.progress(
                        &ServoState::VisualServo,
                        format!("{:?} error {:.1} cm", step.phase, step.error_cm),
                    );
                }
                Tick::Arrived { z_error_cm } => {
                    info!(z_error_cm, "descend goal reached, settling");
                    self.wait(cfg.settle_secs)?;
                    let ee = self.pose()?;
                    let target = self
                        .find_target(label)
                        .map(|d| d.position)
                        .or(last_target)
                        .unwrap_or(target);
                    if ctl.holds(ee, target) {
                        return Ok(ServoState::AutoFocus);
                    }
                    warn!("drifted during settle, continuing");
                }
            }

            let elapsed = tick_start.elapsed();
            if elapsed < period {
                self.wait((period - elapsed).as_secs_f32())?;
            }
        }
    }

    // ── AUTO_FOCUS ──────────────────────────────────────────────────────────

    fn focus_score(&self) -> f32 {
        self.perception.snapshot().focus_score
    }

    /// Hill-climb the focus score along z.  Never fails on its own: when no
    /// offset improves the score, the arm returns to where it started.
    fn auto_focus(&self) -> StepResult {
        let cfg = &self.config;
        let start = self.pose()?;
        let mut best_score = self.focus_score();
        let mut best_offset = 0.0f32;
        let mut offset = 0.0f32;
        let mut direction = 1.0f32;
        let mut reversed = false;
        info!(score = best_score, "auto focus started");

        for _ in 0..cfg.focus_max_iterations {
            let candidate = offset + cfg.focus_step_cm * direction;
            if candidate.abs() > cfg.focus_range_cm {
                warn!(range_cm = cfg.focus_range_cm, "focus range exhausted");
                break;
            }
            self.move_to(Point3::new(start.x, start.y, start.z + candidate), cfg.focus_speed)?;
            self.wait(cfg.focus_settle_secs)?;
            let score = self.focus_score();
            info!(offset_cm = candidate, score, best = best_score, "focus probe");

            if score > best_score + cfg.focus_threshold {
                best_score = score;
                best_offset = candidate;
                offset = candidate;
            } else if !reversed {
                reversed = true;
                direction = -direction;
                offset = 0.0;
                self.move_to(start, cfg.focus_return_speed)?;
                self.wait(cfg.focus_settle_secs)?;
            } else {
                break;
            }
        }

        self.move_to(
            Point3::new(start.x, start.y, start.z + best_offset),
            cfg.focus_return_speed,
        )?;
        info!(offset_cm = best_offset, score = best_score, "auto focus done");
        Ok(ServoState::VlmCheck)
    }

    // ── VLM_CHECK ───────────────────────────────────────────────────────────

    fn vlm_check(&self, label: &str) -> StepResult {
        self.progress(&ServoState::VlmCheck, "taking a closer look".to_string());
        self.wait(self.config.vlm_settle_secs)?;
        let snapshot = self.perception.snapshot();
        match self.judge.judge(label, &snapshot) {
            Confidence::Confident => Ok(ServoState::Grasp),
            Confidence::Uncertain => Ok(ServoState::Scanning),
            Confidence::Unknown => Err(FailureReason::LowConfidence),
        }
    }

    // ── SCANNING ────────────────────────────────────────────────────────────

    /// Shift the vantage point 2 cm in a round-robin cross pattern.
    fn scan(&self, ctx: &mut RunContext<'_>) -> StepResult {
        let cfg = &self.config;
        if ctx.scan_attempts >= cfg.max_scan_attempts {
            error!(attempts = ctx.scan_attempts, "scanning exhausted");
            return Err(FailureReason::LowConfidence);
        }
        ctx.scan_attempts += 1;
        let shift = scan_shift(ctx.scan_attempts, cfg.scan_step_cm);

        let goal = self.pose()?.add(shift);
        info!(attempt = ctx.scan_attempts, x = goal.x, y = goal.y, "changing vantage point");
        self.move_to(goal, cfg.scan_speed)?;
        self.wait(cfg.scan_settle_secs)?;
        Ok(ServoState::AutoFocus)
    }

    // ── GRASP ───────────────────────────────────────────────────────────────

    fn aperture(&self) -> Result<f32, FailureReason> {
        self.driver
            .gripper_aperture()
            .map_err(|e| FailureReason::MotionFault(e.to_string()))
    }

    /// Close the gripper, wait for the fingers to stop, then check whether
    /// anything is between them.
    fn grasp(&self) -> StepResult {
        let cfg = &self.config;
        self.progress(&ServoState::Grasp, "closing gripper".to_string());
        self.driver
            .move_gripper(0.0)
            .map_err(|e| FailureReason::MotionFault(e.to_string()))?;

        let start = Instant::now();
        let mut last = self.aperture()?;
        let mut stable = 0u32;
        while start.elapsed() < secs(cfg.grasp_timeout_secs) {
            self.wait(cfg.grasp_sample_secs)?;
            let current = self.aperture()?;
            if (current - last).abs() < cfg.grasp_epsilon {
                stable += 1;
            } else {
                stable = 0;
            }
            last = current;
            if stable >= cfg.grasp_stable_samples {
                info!(aperture = current, "gripper settled");
                break;
            }
        }

        let aperture = self.aperture()?;
        if aperture > cfg.grasp_success_threshold {
            info!(aperture, "object held");
            Ok(ServoState::Success { aperture })
        } else {
            warn!(aperture, "gripper fully closed, nothing held");
            Err(FailureReason::EmptyGrasp { aperture })
        }
    }
}
