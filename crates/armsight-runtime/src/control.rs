//! Two-phase proportional positioning used by the VISUAL_SERVO state.
//!
//! ```text
//! APPROACH  goal = target + (0, 0, approach_height)
//!           └─ horizontal error < xy_threshold ─► DESCEND (same tick)
//! DESCEND   goal = target + (0, 0, grasp_offset)
//!           └─ vertical error < z_threshold ─► Arrived
//! ```
//!
//! Every tick the goal is recomputed from the latest target and end-effector
//! positions, since both may move.  The command is
//! `current + gain · (goal − current)` per axis, sent at a speed tier picked
//! from the 3-D error, and filtered through a [`CommandGate`].
//!
//! [`ApproachController`] is pure: it never sleeps or talks to hardware, so
//! the convergence behaviour can be tested tick by tick.

use armsight_hal::{CartesianController, MotionCommand};
use armsight_types::Point3;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::command_gate::CommandGate;
use crate::servo::ServoConfig;

/// Speed percentages keyed by distance to goal.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SpeedTiers {
    pub precise: u8,
    pub medium: u8,
    pub fast: u8,
    /// Errors below this use `precise`, cm.
    pub precise_below_cm: f32,
    /// Errors below this use `medium`, cm.
    pub medium_below_cm: f32,
}

impl Default for SpeedTiers {
    fn default() -> Self {
        Self {
            precise: 15,
            medium: 30,
            fast: 60,
            precise_below_cm: 3.0,
            medium_below_cm: 10.0,
        }
    }
}

impl SpeedTiers {
    pub fn for_error(&self, error_cm: f32) -> u8 {
        if error_cm < self.precise_below_cm {
            self.precise
        } else if error_cm < self.medium_below_cm {
            self.medium
        } else {
            self.fast
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlPhase {
    Approach,
    Descend,
}

/// One control tick that produced a motion command.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ControlStep {
    pub phase: ControlPhase,
    pub goal: Point3,
    /// 3-D distance from the end-effector to `goal`, cm.
    pub error_cm: f32,
    pub command: MotionCommand,
    /// `false` when the gate judged the command redundant.
    pub send: bool,
}

/// Result of [`ApproachController::tick`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Tick {
    Move(ControlStep),
    /// Descend goal reached within the vertical threshold.
    Arrived { z_error_cm: f32 },
}

/// Pure APPROACH/DESCEND controller.
#[derive(Debug, Clone)]
pub struct ApproachController {
    axes: CartesianController,
    gate: CommandGate,
    phase: ControlPhase,
    approach_height_cm: f32,
    grasp_offset_cm: f32,
    xy_threshold_cm: f32,
    z_threshold_cm: f32,
    tiers: SpeedTiers,
}

impl ApproachController {
    pub fn new(config: &ServoConfig, grasp_offset_cm: f32) -> Self {
        Self {
            axes: CartesianController::new(config.gain),
            gate: CommandGate::new(config.min_command_delta_cm),
            phase: ControlPhase::Approach,
            approach_height_cm: config.approach_height_cm,
            grasp_offset_cm,
            xy_threshold_cm: config.xy_threshold_cm,
            z_threshold_cm: config.z_threshold_cm,
            tiers: config.speed,
        }
    }

    pub fn phase(&self) -> ControlPhase {
        self.phase
    }

    /// Goal for the current phase given the object position.
    pub fn goal(&self, target: Point3) -> Point3 {
        let lift = match self.phase {
            ControlPhase::Approach => self.approach_height_cm,
            ControlPhase::Descend => self.grasp_offset_cm,
        };
        Point3::new(target.x, target.y, target.z + lift)
    }

    /// `true` while in DESCEND with the end-effector inside the vertical
    /// threshold.
    pub fn holds(&self, ee: Point3, target: Point3) -> bool {
        self.phase == ControlPhase::Descend
            && (ee.z - self.goal(target).z).abs() < self.z_threshold_cm
    }

    /// Advance one tick.
    pub fn tick(&mut self, ee: Point3, target: Point3) -> Tick {
        if self.phase == ControlPhase::Approach {
            let xy_error = ee.horizontal_distance(target);
            if xy_error < self.xy_threshold_cm {
                self.phase = ControlPhase::Descend;
                info!(xy_error_cm = xy_error, "xy aligned, APPROACH -> DESCEND");
            }
        }

        let goal = self.goal(target);
        if self.phase == ControlPhase::Descend {
            let z_error = (ee.z - goal.z).abs();
            if z_error < self.z_threshold_cm {
                return Tick::Arrived { z_error_cm: z_error };
            }
        }

        let error_cm = ee.distance(goal);
        let speed = self.tiers.for_error(error_cm);
        self.axes.set_target(goal);
        let command = MotionCommand {
            target: self.axes.command(ee),
            speed,
        };
        let send = self.gate.admit(command);
        debug!(phase = ?self.phase, error_cm, speed, send, "control tick");

        Tick::Move(ControlStep {
            phase: self.phase,
            goal,
            error_cm,
            command,
            send,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn controller(offset: f32) -> ApproachController {
        ApproachController::new(&ServoConfig::default(), offset)
    }

    /// Run ticks against an actuator that lands exactly on every command.
    fn simulate(ctl: &mut ApproachController, start: Point3, target: Point3) -> (Vec<Tick>, Point3) {
        let mut ee = start;
        let mut ticks = Vec::new();
        for _ in 0..200 {
            let t = ctl.tick(ee, target);
            ticks.push(t);
            match t {
                Tick::Move(step) => ee = step.command.target,
                Tick::Arrived { .. } => break,
            }
        }
        (ticks, ee)
    }

    #[test]
    fn speed_tiers_follow_error() {
        let tiers = SpeedTiers::default();
        assert_eq!(tiers.for_error(2.9), 15);
        assert_eq!(tiers.for_error(3.0), 30);
        assert_eq!(tiers.for_error(9.99), 30);
        assert_eq!(tiers.for_error(10.0), 60);
    }

    #[test]
    fn first_command_is_proportional_step_toward_approach_goal() {
        let mut ctl = controller(0.0);
        let Tick::Move(step) = ctl.tick(Point3::new(0.0, 0.0, 20.0), Point3::new(30.0, 0.0, 5.0)) else {
            panic!("expected a move");
        };
        assert_eq!(step.phase, ControlPhase::Approach);
        assert_eq!(step.goal, Point3::new(30.0, 0.0, 13.0));
        assert!(step.command.target.distance(Point3::new(24.0, 0.0, 14.4)) < 1e-4);
        assert_eq!(step.command.speed, 60);
        assert!(step.send);
    }

    #[test]
    fn switches_to_descend_exactly_when_xy_error_drops_below_threshold() {
        let target = Point3::new(30.0, 0.0, 5.0);
        let mut ctl = controller(0.0);
        let mut ee = Point3::new(0.0, 0.0, 20.0);
        loop {
            let xy_before = ee.horizontal_distance(target);
            match ctl.tick(ee, target) {
                Tick::Move(step) => {
                    if xy_before < 1.0 {
                        assert_eq!(step.phase, ControlPhase::Descend);
                        // Same tick already steers toward the descend goal.
                        assert_eq!(step.goal, target);
                        break;
                    }
                    assert_eq!(step.phase, ControlPhase::Approach, "xy={xy_before}");
                    ee = step.command.target;
                }
                Tick::Arrived { .. } => panic!("arrived before descending"),
            }
        }
    }

    #[test]
    fn arrives_when_vertical_error_below_threshold() {
        let target = Point3::new(30.0, 0.0, 5.0);
        let mut ctl = controller(0.0);
        let (ticks, ee) = simulate(&mut ctl, Point3::new(0.0, 0.0, 20.0), target);
        let Some(Tick::Arrived { z_error_cm }) = ticks.last().copied() else {
            panic!("did not arrive");
        };
        assert!(z_error_cm < 0.5);
        assert!(ctl.holds(ee, target));
        assert_eq!(ctl.phase(), ControlPhase::Descend);
    }

    #[test]
    fn command_sequence_monotonically_closes_distance() {
        let target = Point3::new(30.0, 0.0, 5.0);
        let mut ctl = controller(0.0);
        let (ticks, _) = simulate(&mut ctl, Point3::new(0.0, 0.0, 20.0), target);
        let mut last = Point3::new(0.0, 0.0, 20.0).distance(target);
        for t in ticks {
            if let Tick::Move(step) = t {
                let d = step.command.target.distance(target);
                assert!(d < last, "distance went {last} -> {d}");
                last = d;
            }
        }
    }

    #[test]
    fn grasp_offset_shifts_descend_goal() {
        let target = Point3::new(10.0, 10.0, 5.0);
        let mut ctl = controller(-1.5);
        let (_, ee) = simulate(&mut ctl, Point3::new(10.0, 10.0, 20.0), target);
        assert!((ee.z - 3.5).abs() < 0.5, "z={}", ee.z);
    }

    #[test]
    fn moving_target_is_tracked() {
        let mut ctl = controller(0.0);
        let mut ee = Point3::new(0.0, 0.0, 20.0);
        let mut target = Point3::new(20.0, 0.0, 5.0);
        for _ in 0..10 {
            if let Tick::Move(step) = ctl.tick(ee, target) {
                ee = step.command.target;
            }
            target.y += 0.2;
        }
        assert!(ee.horizontal_distance(target) < 2.0);
    }

    #[test]
    fn redundant_commands_are_flagged_not_sent() {
        let mut ctl = controller(0.0);
        let ee = Point3::new(0.0, 0.0, 20.0);
        let target = Point3::new(30.0, 0.0, 5.0);
        let Tick::Move(first) = ctl.tick(ee, target) else { panic!() };
        // End-effector did not move: same command again.
        let Tick::Move(second) = ctl.tick(ee, target) else { panic!() };
        assert!(first.send);
        assert!(!second.send);
    }
}
