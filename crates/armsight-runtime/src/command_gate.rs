//! [`CommandGate`] – suppresses redundant motion commands.
//!
//! The control loop recomputes a goal every tick.  Near convergence those
//! goals barely move, and re-sending each one floods the driver and the log.
//! The gate remembers the last command that was actually sent and lets a new
//! one through only when the target moved by at least `min_delta_cm` or the
//! speed tier changed.
//!
//! # Example
//!
//! ```rust
//! use armsight_hal::MotionCommand;
//! use armsight_runtime::command_gate::CommandGate;
//! use armsight_types::Point3;
//!
//! let mut gate = CommandGate::new(0.1);
//! let cmd = MotionCommand { target: Point3::new(10.0, 0.0, 5.0), speed: 30 };
//!
//! assert!(gate.admit(cmd));
//! assert!(!gate.admit(cmd)); // identical → suppressed
//!
//! gate.reset();
//! assert!(gate.admit(cmd));
//! ```

use armsight_hal::MotionCommand;

/// Default minimum target change, in centimetres.
pub const DEFAULT_MIN_DELTA_CM: f32 = 0.1;

/// De-duplicates consecutive motion commands.
#[derive(Debug, Clone)]
pub struct CommandGate {
    min_delta_cm: f32,
    last_sent: Option<MotionCommand>,
    suppressed: usize,
}

impl CommandGate {
    pub fn new(min_delta_cm: f32) -> Self {
        Self {
            min_delta_cm,
            last_sent: None,
            suppressed: 0,
        }
    }

    /// Decide whether `cmd` should be sent.
    ///
    /// Returns `true` (and remembers `cmd`) when it differs enough from the
    /// last admitted command; `false` otherwise.
    pub fn admit(&mut self, cmd: MotionCommand) -> bool {
        if let Some(last) = self.last_sent
            && last.speed == cmd.speed
            && last.target.distance(cmd.target) < self.min_delta_cm
        {
            self.suppressed += 1;
            return false;
        }
        self.last_sent = Some(cmd);
        true
    }

    pub fn last_sent(&self) -> Option<MotionCommand> {
        self.last_sent
    }

    /// Commands dropped since the last reset.
    pub fn suppressed(&self) -> usize {
        self.suppressed
    }

    /// Forget the last command, e.g. after an out-of-band move.
    pub fn reset(&mut self) {
        self.last_sent = None;
        self.suppressed = 0;
    }
}

impl Default for CommandGate {
    fn default() -> Self {
        Self::new(DEFAULT_MIN_DELTA_CM)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use armsight_types::Point3;

    fn cmd(x: f32, speed: u8) -> MotionCommand {
        MotionCommand {
            target: Point3::new(x, 0.0, 5.0),
            speed,
        }
    }

    #[test]
    fn first_command_always_passes() {
        assert!(CommandGate::default().admit(cmd(0.0, 15)));
    }

    #[test]
    fn tiny_moves_at_same_speed_are_suppressed() {
        let mut gate = CommandGate::default();
        assert!(gate.admit(cmd(10.0, 30)));
        assert!(!gate.admit(cmd(10.05, 30)));
        assert!(!gate.admit(cmd(10.09, 30)));
        assert_eq!(gate.suppressed(), 2);
    }

    #[test]
    fn comparison_is_against_last_sent_not_last_seen() {
        let mut gate = CommandGate::default();
        gate.admit(cmd(10.0, 30));
        gate.admit(cmd(10.06, 30)); // suppressed
        // 0.12 from the last *sent* command.
        assert!(gate.admit(cmd(10.12, 30)));
    }

    #[test]
    fn speed_change_forces_send() {
        let mut gate = CommandGate::default();
        gate.admit(cmd(10.0, 30));
        assert!(gate.admit(cmd(10.0, 15)));
        assert_eq!(gate.last_sent().map(|c| c.speed), Some(15));
    }

    #[test]
    fn move_of_exactly_threshold_passes() {
        let mut gate = CommandGate::new(0.5);
        gate.admit(cmd(0.0, 60));
        assert!(gate.admit(cmd(0.5, 60)));
    }

    #[test]
    fn reset_forgets_history() {
        let mut gate = CommandGate::default();
        gate.admit(cmd(1.0, 15));
        gate.reset();
        assert!(gate.last_sent().is_none());
        assert!(gate.admit(cmd(1.0, 15)));
    }
}
