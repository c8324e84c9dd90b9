//! [`GraspCoordinator`] – glue between the planner, the gripper, and the
//! servo state machine for one "pick up X" request.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use armsight_hal::MotionDriver;
use armsight_types::RefinedDetection;
use chrono::Utc;
use tracing::{error, info, instrument, warn};

use crate::grasp_planner::{GraspPlan, GraspPlanner};
use crate::servo::{FailureReason, PerceptionSource, ServoController, ServoOutcome};

/// Result of [`GraspCoordinator::execute`].
#[derive(Debug, Clone, PartialEq)]
pub struct GraspReport {
    pub outcome: ServoOutcome,
    /// `None` when the target was never seen, so nothing was planned.
    pub plan: Option<GraspPlan>,
}

pub struct GraspCoordinator {
    servo: Arc<ServoController>,
    planner: Mutex<GraspPlanner>,
    driver: Arc<dyn MotionDriver>,
    perception: Arc<dyn PerceptionSource>,
}

impl GraspCoordinator {
    pub fn new(
        servo: Arc<ServoController>,
        planner: GraspPlanner,
        driver: Arc<dyn MotionDriver>,
        perception: Arc<dyn PerceptionSource>,
    ) -> Self {
        Self {
            servo,
            planner: Mutex::new(planner),
            driver,
            perception,
        }
    }

    pub fn servo(&self) -> &Arc<ServoController> {
        &self.servo
    }

    /// Current planner state, e.g. to inspect learned parameters.
    pub fn planner(&self) -> Option<GraspPlanner> {
        self.planner.lock().ok().map(|p| p.clone())
    }

    /// Plan, open, servo, close, and learn.
    ///
    /// The servo is claimed before anything else, so a call made while a
    /// sequence is running is rejected without touching the arm.
    #[instrument(skip(self))]
    pub fn execute(&self, target: &str) -> GraspReport {
        let Some(guard) = self.servo.try_begin() else {
            warn!("a grasp sequence is already running, rejecting");
            return GraspReport {
                outcome: ServoOutcome::Failed(FailureReason::AlreadyRunning),
                plan: None,
            };
        };

        let found = match self.locate(target) {
            Ok(Some(found)) => found,
            Ok(None) => {
                warn!("target not in view, nothing to plan");
                return GraspReport {
                    outcome: ServoOutcome::Failed(FailureReason::TargetNotFound),
                    plan: None,
                };
            }
            Err(reason) => {
                warn!(%reason, "search for target interrupted");
                return GraspReport {
                    outcome: ServoOutcome::Failed(reason),
                    plan: None,
                };
            }
        };

        let plan = match self.planner.lock() {
            Ok(planner) => planner.compute_grasp_pose(&found.name, found.position, found.bbox),
            Err(_) => {
                error!("grasp planner lock poisoned");
                return GraspReport {
                    outcome: ServoOutcome::Failed(FailureReason::MotionFault("planner unavailable".into())),
                    plan: None,
                };
            }
        };

        if let Err(e) = self.driver.move_gripper(plan.gripper_width) {
            error!(error = %e, "could not open gripper");
            return GraspReport {
                outcome: ServoOutcome::Failed(FailureReason::MotionFault(e.to_string())),
                plan: Some(plan),
            };
        }

        let outcome = self.servo.run_claimed(guard, target, Some(plan.grasp_depth_offset));
        self.learn(&found.name, &plan, &outcome);
        GraspReport {
            outcome,
            plan: Some(plan),
        }
    }

    /// Poll the snapshot the way DETECT does: one look plus the configured
    /// retries.  `Err(Cancelled)` if the servo is stopped meanwhile.
    fn locate(&self, target: &str) -> Result<Option<RefinedDetection>, FailureReason> {
        let cfg = self.servo.config();
        let cancel = self.servo.cancel_token();
        let max_age = Duration::from_secs_f32(cfg.stale_after_secs.max(0.0));
        for attempt in 0..=cfg.detect_retries {
            if cancel.is_cancelled() {
                return Err(FailureReason::Cancelled);
            }
            let snap = self.perception.snapshot();
            if !snap.is_stale(Utc::now(), max_age)
                && let Some(found) = snap.find(target)
            {
                return Ok(Some(found.clone()));
            }
            if attempt < cfg.detect_retries
                && !cancel.sleep(Duration::from_secs_f32(cfg.detect_interval_secs.max(0.0)))
            {
                return Err(FailureReason::Cancelled);
            }
        }
        Ok(None)
    }

    fn learn(&self, name: &str, plan: &GraspPlan, outcome: &ServoOutcome) {
        // Cancellation and contention say nothing about the parameters.
        if matches!(
            outcome,
            ServoOutcome::Failed(FailureReason::Cancelled | FailureReason::AlreadyRunning)
        ) {
            return;
        }
        let Ok(mut planner) = self.planner.lock() else {
            error!("grasp planner lock poisoned, not learning");
            return;
        };
        planner.update_grasp_memory(name, outcome.is_success(), plan.params());
        match planner.save() {
            Ok(()) => info!(name, success = outcome.is_success(), "grasp memory updated"),
            Err(e) => warn!(error = %e, "could not persist grasp memory"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grasp_planner::{GraspPlannerConfig, GraspStrategy};
    use crate::servo::ServoConfig;
    use armsight_hal::SimArm;
    use armsight_middleware::PerceptionSnapshot;
    use armsight_types::{CameraSource, Point3};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;
    use std::time::Instant;

    /// Fixed scene that counts how often it was looked at.
    struct Fixed {
        detections: Vec<RefinedDetection>,
        looks: AtomicUsize,
    }

    impl Fixed {
        fn new(detections: Vec<RefinedDetection>) -> Self {
            Self {
                detections,
                looks: AtomicUsize::new(0),
            }
        }
    }

    impl PerceptionSource for Fixed {
        fn snapshot(&self) -> PerceptionSnapshot {
            self.looks.fetch_add(1, Ordering::SeqCst);
            PerceptionSnapshot::new(self.detections.clone(), 100.0, CameraSource::World)
        }
    }

    fn detection(name: &str, position: Point3) -> RefinedDetection {
        RefinedDetection {
            name: name.to_string(),
            position,
            pixel_center: (300, 240),
            bbox: (40, 80),
            sync_pose: None,
        }
    }

    fn fast_config() -> ServoConfig {
        ServoConfig {
            loop_hz: 100.0,
            settle_secs: 0.01,
            detect_interval_secs: 0.01,
            focus_settle_secs: 0.0,
            vlm_settle_secs: 0.0,
            scan_settle_secs: 0.0,
            grasp_sample_secs: 0.001,
            ..ServoConfig::default()
        }
    }

    fn coordinator(arm: Arc<SimArm>, scene: Vec<RefinedDetection>, planner: GraspPlanner) -> GraspCoordinator {
        coordinator_with(fast_config(), arm, Arc::new(Fixed::new(scene)), planner)
    }

    fn coordinator_with(
        cfg: ServoConfig,
        arm: Arc<SimArm>,
        perception: Arc<Fixed>,
        planner: GraspPlanner,
    ) -> GraspCoordinator {
        let servo = Arc::new(ServoController::new(cfg, arm.clone(), perception.clone()));
        GraspCoordinator::new(servo, planner, arm, perception)
    }

    #[test]
    fn successful_grasp_opens_to_plan_and_remembers() {
        let arm = Arc::new(SimArm::new("sim").at(Point3::new(0.0, 0.0, 20.0)).holding(0.02));
        let target = Point3::new(25.0, 5.0, 6.0);
        let coord = coordinator(arm.clone(), vec![detection("cup", target)], GraspPlanner::default());

        let report = coord.execute("cup");
        assert!(report.outcome.is_success(), "{:?}", report.outcome);
        let plan = report.plan.expect("plan");
        assert_eq!(plan.strategy, GraspStrategy::Remembered);
        assert_eq!(arm.gripper_commands(), vec![90.0, 0.0]);

        // Descended to the planned depth below the object centre.
        let z = arm.current_pose().unwrap().position.z;
        assert!((z - (target.z + plan.grasp_depth_offset)).abs() < 1.0, "z={z}");

        let learned = coord.planner().unwrap().remembered("cup").unwrap();
        assert_eq!(learned.grasp_depth_offset, Some(plan.grasp_depth_offset));
    }

    #[test]
    fn failed_grasp_widens_remembered_width_and_persists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("grasp_memory.json");
        let planner = GraspPlanner::with_memory_file(GraspPlannerConfig::default(), &path).unwrap();
        let arm = Arc::new(SimArm::new("sim").at(Point3::new(0.0, 0.0, 20.0)));
        let coord = coordinator(arm, vec![detection("bottle", Point3::new(25.0, 0.0, 5.0))], planner);

        let report = coord.execute("bottle");
        assert!(matches!(
            report.outcome,
            ServoOutcome::Failed(FailureReason::EmptyGrasp { .. })
        ));

        let reloaded = GraspPlanner::with_memory_file(GraspPlannerConfig::default(), &path).unwrap();
        let bottle = reloaded.remembered("bottle").unwrap();
        assert_eq!(bottle.gripper_width, 90.0);
        assert_eq!(bottle.approach_offset_z, 6.0);
    }

    #[test]
    fn unseen_target_is_not_planned() {
        let arm = Arc::new(SimArm::new("sim"));
        let coord = coordinator(arm.clone(), Vec::new(), GraspPlanner::default());
        let report = coord.execute("duck");
        assert_eq!(report.outcome, ServoOutcome::Failed(FailureReason::TargetNotFound));
        assert!(report.plan.is_none());
        assert!(arm.gripper_commands().is_empty());
    }

    #[test]
    fn gripper_fault_is_reported_with_plan() {
        let arm = Arc::new(SimArm::new("sim").faulted());
        let coord = coordinator(arm, vec![detection("duck", Point3::new(20.0, 0.0, 5.0))], GraspPlanner::default());
        let report = coord.execute("duck");
        assert!(matches!(report.outcome, ServoOutcome::Failed(FailureReason::MotionFault(_))));
        assert!(report.plan.is_some());
    }

    #[test]
    fn execute_during_running_sequence_leaves_arm_alone() {
        let arm = Arc::new(SimArm::new("sim").at(Point3::new(0.0, 0.0, 20.0)).holding(0.02));
        let coord = coordinator(arm.clone(), vec![detection("cup", Point3::new(25.0, 5.0, 6.0))], GraspPlanner::default());

        let busy = coord.servo().try_begin().expect("idle servo");
        let report = coord.execute("cup");
        assert_eq!(report.outcome, ServoOutcome::Failed(FailureReason::AlreadyRunning));
        assert!(report.plan.is_none());
        assert!(arm.gripper_commands().is_empty());
        assert!(arm.commands().is_empty());

        drop(busy);
        assert!(coord.execute("cup").outcome.is_success());
    }

    #[test]
    fn concurrent_execute_is_rejected_without_side_effects() {
        let arm = Arc::new(SimArm::new("sim").at(Point3::new(0.0, 0.0, 20.0)).holding(0.02));
        let cfg = ServoConfig {
            vlm_settle_secs: 0.3,
            ..fast_config()
        };
        let scene = Arc::new(Fixed::new(vec![detection("cup", Point3::new(25.0, 5.0, 6.0))]));
        let coord = Arc::new(coordinator_with(cfg, arm.clone(), scene, GraspPlanner::default()));

        let first = {
            let coord = coord.clone();
            thread::spawn(move || coord.execute("cup"))
        };
        while arm.gripper_commands().is_empty() {
            thread::yield_now();
        }
        let before = arm.gripper_commands();
        let second = coord.execute("cup");
        assert_eq!(second.outcome, ServoOutcome::Failed(FailureReason::AlreadyRunning));
        assert!(second.plan.is_none());
        assert_eq!(arm.gripper_commands()[..before.len()], before[..]);
        assert!(!arm.gripper_commands()[before.len()..].contains(&90.0));

        assert!(first.join().unwrap().outcome.is_success());
        assert_eq!(arm.gripper_commands(), vec![90.0, 0.0]);
    }

    #[test]
    fn earlier_stop_does_not_cut_the_search_short() {
        let arm = Arc::new(SimArm::new("sim"));
        let scene = Arc::new(Fixed::new(Vec::new()));
        let coord = coordinator_with(fast_config(), arm, scene.clone(), GraspPlanner::default());

        coord.servo().stop();
        let report = coord.execute("cup");
        assert_eq!(report.outcome, ServoOutcome::Failed(FailureReason::TargetNotFound));
        let retries = coord.servo().config().detect_retries as usize;
        assert_eq!(scene.looks.load(Ordering::SeqCst), retries + 1);
    }

    #[test]
    fn stop_during_search_is_reported_as_cancelled() {
        let arm = Arc::new(SimArm::new("sim"));
        let cfg = ServoConfig {
            detect_interval_secs: 5.0,
            ..fast_config()
        };
        let coord = Arc::new(coordinator_with(cfg, arm.clone(), Arc::new(Fixed::new(Vec::new())), GraspPlanner::default()));

        let runner = {
            let coord = coord.clone();
            thread::spawn(move || coord.execute("cup"))
        };
        while !coord.servo().is_running() {
            thread::yield_now();
        }
        thread::sleep(Duration::from_millis(20));
        let started = Instant::now();
        coord.servo().stop();
        let report = runner.join().unwrap();
        assert_eq!(report.outcome, ServoOutcome::Failed(FailureReason::Cancelled));
        assert!(report.plan.is_none());
        assert!(started.elapsed() < Duration::from_secs(1));
        assert!(!coord.servo().is_running());
        assert!(arm.gripper_commands().is_empty());
    }
}
