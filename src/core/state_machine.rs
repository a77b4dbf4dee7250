//! Per-job transition guard.
//!
//! Progress only moves forward one stage at a time: from `current` the
//! only legal target is `current + 1`, and targets outside 1..=12 are
//! rejected outright.

use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

use crate::domain::{StepNumber, STEP_COUNT};

/// Why a transition was refused
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum TransitionError {
    #[error("invalid step number {target} (expected 1..=12)")]
    InvalidStep { target: u8 },

    #[error("cannot move from step {current} to step {target}: steps advance one at a time")]
    Skip { current: u8, target: u8 },
}

/// Check a transition without side effects
pub fn check_transition(current: u8, target: u8) -> Result<StepNumber, TransitionError> {
    if target == 0 || target > STEP_COUNT {
        return Err(TransitionError::InvalidStep { target });
    }
    if u16::from(target) != u16::from(current) + 1 {
        return Err(TransitionError::Skip { current, target });
    }
    StepNumber::try_from(target).map_err(|_| TransitionError::InvalidStep { target })
}

/// True iff `target == current + 1` and `1 <= target <= 12`
pub fn can_transition(current: u8, target: u8) -> bool {
    check_transition(current, target).is_ok()
}

/// Transition guard for one job
#[derive(Debug, Clone)]
pub struct GameStateMachine {
    job_id: Uuid,
    current: u8,
}

impl GameStateMachine {
    pub fn new(job_id: Uuid, current_step: u8) -> Self {
        Self {
            job_id,
            current: current_step,
        }
    }

    pub fn current(&self) -> u8 {
        self.current
    }

    /// Check a move to `target`, logging the attempt
    pub fn check(&self, target: u8) -> Result<StepNumber, TransitionError> {
        let result = check_transition(self.current, target);
        match &result {
            Ok(_) => info!(
                job_id = %self.job_id,
                from = self.current,
                to = target,
                "Transition allowed"
            ),
            Err(e) => warn!(
                job_id = %self.job_id,
                from = self.current,
                to = target,
                reason = %e,
                "Transition denied"
            ),
        }
        result
    }

    /// Move to `target`.
    ///
    /// With `force` the guard is bypassed; only privileged retry paths pass
    /// it. A forced target must still be a real step number.
    pub fn transition(&mut self, target: u8, force: bool) -> Result<StepNumber, TransitionError> {
        let step = if force {
            let step = StepNumber::try_from(target)
                .map_err(|_| TransitionError::InvalidStep { target })?;
            warn!(
                job_id = %self.job_id,
                from = self.current,
                to = target,
                "Forced transition"
            );
            step
        } else {
            self.check(target)?
        };
        self.current = target;
        Ok(step)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_can_transition_exhaustive() {
        for current in 0..=14u8 {
            for target in 0..=14u8 {
                let expected = target == current + 1 && (1..=12).contains(&target);
                assert_eq!(
                    can_transition(current, target),
                    expected,
                    "current={} target={}",
                    current,
                    target
                );
            }
        }
    }

    #[test]
    fn test_denial_reasons() {
        assert_eq!(
            check_transition(0, 13),
            Err(TransitionError::InvalidStep { target: 13 })
        );
        assert_eq!(
            check_transition(2, 5),
            Err(TransitionError::Skip { current: 2, target: 5 })
        );
        assert_eq!(
            check_transition(4, 3),
            Err(TransitionError::Skip { current: 4, target: 3 })
        );
    }

    #[test]
    fn test_transition_advances() {
        let mut machine = GameStateMachine::new(Uuid::new_v4(), 0);
        assert_eq!(machine.transition(1, false), Ok(StepNumber::PreProduction));
        assert_eq!(machine.current(), 1);
        assert!(machine.transition(3, false).is_err());
        assert_eq!(machine.current(), 1);
    }

    #[test]
    fn test_forced_transition_skips_guard() {
        let mut machine = GameStateMachine::new(Uuid::new_v4(), 3);
        assert_eq!(machine.transition(3, true), Ok(StepNumber::Architecture));
        assert!(machine.transition(0, true).is_err());
    }

    #[test]
    fn test_max_current_does_not_overflow() {
        assert!(!can_transition(u8::MAX, 1));
        assert!(!can_transition(u8::MAX, 0));
    }
}
