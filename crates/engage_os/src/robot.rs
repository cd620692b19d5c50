#![forbid(unsafe_code)]

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use engage_kernel_contracts::decision::{Action, Decision};
use engage_kernel_contracts::state::EngageState;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RobotCommandError {
    #[error("robot unavailable: {0}")]
    Unavailable(String),
    #[error("robot rejected {action}: {reason}")]
    Rejected { action: Action, reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum InteractionToggleError {
    #[error("interaction toggle refused: {0}")]
    Refused(String),
}

/// Physical side of a decision. One call per decision; failures are reported, never retried here.
pub trait RobotCommandAdapter {
    fn execute(&mut self, decision: &Decision, state: &EngageState)
        -> Result<(), RobotCommandError>;

    /// Hands the participant over to the tablet questionnaire.
    fn start_tablet_behaviour(&mut self) -> Result<(), RobotCommandError> {
        Ok(())
    }
}

/// Pause/resume of the interaction service.
pub trait InteractionToggle {
    fn set_interaction_enabled(&mut self, enabled: bool) -> Result<(), InteractionToggleError>;
}

/// Shared interaction switch read by the decision cycle before dispatching to the robot.
#[derive(Debug, Clone)]
pub struct InteractionGate {
    enabled: Arc<AtomicBool>,
}

impl InteractionGate {
    pub fn new(enabled: bool) -> Self {
        Self {
            enabled: Arc::new(AtomicBool::new(enabled)),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }
}

impl Default for InteractionGate {
    fn default() -> Self {
        Self::new(true)
    }
}

impl InteractionToggle for InteractionGate {
    fn set_interaction_enabled(&mut self, enabled: bool) -> Result<(), InteractionToggleError> {
        self.enabled.store(enabled, Ordering::Release);
        Ok(())
    }
}

/// In-process robot that keeps every command it receives.
#[derive(Debug, Clone, Default)]
pub struct RecordingRobotAdapter {
    executed: Vec<Decision>,
    tablet_starts: u32,
    fail_with: Option<RobotCommandError>,
}

impl RecordingRobotAdapter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every command is recorded, then answered with `err`.
    pub fn failing(err: RobotCommandError) -> Self {
        Self {
            fail_with: Some(err),
            ..Self::default()
        }
    }

    pub fn executed(&self) -> &[Decision] {
        &self.executed
    }

    pub fn tablet_starts(&self) -> u32 {
        self.tablet_starts
    }
}

impl RobotCommandAdapter for RecordingRobotAdapter {
    fn execute(
        &mut self,
        decision: &Decision,
        _state: &EngageState,
    ) -> Result<(), RobotCommandError> {
        self.executed.push(decision.clone());
        match &self.fail_with {
            Some(err) => Err(err.clone()),
            None => Ok(()),
        }
    }

    fn start_tablet_behaviour(&mut self) -> Result<(), RobotCommandError> {
        self.tablet_starts += 1;
        match &self.fail_with {
            Some(err) => Err(err.clone()),
            None => Ok(()),
        }
    }
}
