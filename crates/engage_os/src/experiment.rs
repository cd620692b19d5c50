#![forbid(unsafe_code)]

use engage_kernel_contracts::decision::DecisionStateRecord;
use engage_kernel_contracts::MonotonicTimeNs;
use tracing::{info, warn};

use crate::robot::{
    InteractionToggle, InteractionToggleError, RobotCommandAdapter, RobotCommandError,
};

pub mod reason_codes {
    use engage_kernel_contracts::ReasonCodeId;

    pub const EXPERIMENT_TOGGLE_FAILED: ReasonCodeId = ReasonCodeId(0x5845_0001);
    pub const EXPERIMENT_TABLET_FAILED: ReasonCodeId = ReasonCodeId(0x5845_0002);
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ExperimentConfig {
    /// A tracked person closer than this (metres) ends the eliciting phase.
    pub decision_threshold_m: f64,
    pub test_timeout_ns: u64,
    pub toggle_retry_ns: u64,
}

impl ExperimentConfig {
    pub fn mvp_v1() -> Self {
        Self {
            decision_threshold_m: 1.0,
            test_timeout_ns: 10_000_000_000,
            toggle_retry_ns: 1_000_000_000,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExperimentState {
    /// The robot is free to elicit interaction.
    Elicit,
    /// Interaction is paused while the participant answers on the tablet.
    Test,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExperimentEvent {
    Unchanged,
    EnteredTest {
        deadline: MonotonicTimeNs,
        /// The state changed even if the tablet could not be started.
        tablet: Result<(), RobotCommandError>,
    },
    ReturnedToElicit,
    ToggleFailed {
        error: InteractionToggleError,
        retry_at: Option<MonotonicTimeNs>,
    },
}

/// Two-state controller of the prediction experiment, driven by decision states and `tick`.
#[derive(Debug)]
pub struct PredictionExperimentManager<T>
where
    T: InteractionToggle,
{
    config: ExperimentConfig,
    toggle: T,
    state: ExperimentState,
    deadline: Option<MonotonicTimeNs>,
}

impl<T> PredictionExperimentManager<T>
where
    T: InteractionToggle,
{
    pub fn new(config: ExperimentConfig, toggle: T) -> Self {
        Self {
            config,
            toggle,
            state: ExperimentState::Elicit,
            deadline: None,
        }
    }

    pub fn state(&self) -> ExperimentState {
        self.state
    }

    pub fn deadline(&self) -> Option<MonotonicTimeNs> {
        self.deadline
    }

    pub fn process_decision_state<R>(
        &mut self,
        record: &DecisionStateRecord,
        now: MonotonicTimeNs,
        robot: &mut R,
    ) -> ExperimentEvent
    where
        R: RobotCommandAdapter + ?Sized,
    {
        if self.state != ExperimentState::Elicit {
            return ExperimentEvent::Unchanged;
        }
        let close = record
            .state
            .persons()
            .values()
            .filter_map(|f| f.distance)
            .any(|d| d < self.config.decision_threshold_m);
        if !close {
            return ExperimentEvent::Unchanged;
        }

        if let Err(error) = self.toggle.set_interaction_enabled(false) {
            warn!(
                error = %error,
                reason_code = reason_codes::EXPERIMENT_TOGGLE_FAILED.0,
                "could not pause interaction, staying in ELICIT"
            );
            return ExperimentEvent::ToggleFailed {
                error,
                retry_at: None,
            };
        }

        let deadline = now.saturating_add_ns(self.config.test_timeout_ns);
        self.state = ExperimentState::Test;
        self.deadline = Some(deadline);
        info!(deadline_ns = deadline.0, "experiment ELICIT -> TEST");

        let tablet = robot.start_tablet_behaviour();
        if let Err(err) = &tablet {
            warn!(
                error = %err,
                reason_code = reason_codes::EXPERIMENT_TABLET_FAILED.0,
                "tablet behaviour did not start"
            );
        }
        ExperimentEvent::EnteredTest { deadline, tablet }
    }

    /// Fires the pending timer once `now` has reached it.
    pub fn tick(&mut self, now: MonotonicTimeNs) -> ExperimentEvent {
        match self.deadline {
            Some(deadline) if now >= deadline => {}
            _ => return ExperimentEvent::Unchanged,
        }
        match self.toggle.set_interaction_enabled(true) {
            Ok(()) => {
                self.state = ExperimentState::Elicit;
                self.deadline = None;
                info!("experiment TEST -> ELICIT");
                ExperimentEvent::ReturnedToElicit
            }
            Err(error) => {
                let retry_at = now.saturating_add_ns(self.config.toggle_retry_ns);
                self.deadline = Some(retry_at);
                warn!(
                    error = %error,
                    retry_at_ns = retry_at.0,
                    reason_code = reason_codes::EXPERIMENT_TOGGLE_FAILED.0,
                    "could not resume interaction, retrying"
                );
                ExperimentEvent::ToggleFailed {
                    error,
                    retry_at: Some(retry_at),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use engage_kernel_contracts::decision::{Action, Decision};
    use engage_kernel_contracts::person::{PersonFeatures, PersonId};
    use engage_kernel_contracts::state::EngageState;

    use super::*;
    use crate::robot::{InteractionGate, RecordingRobotAdapter};

    /// Fails the first `failures` calls.
    #[derive(Debug, Default)]
    struct FlakyToggle {
        failures: u32,
        calls: Vec<bool>,
    }

    impl InteractionToggle for FlakyToggle {
        fn set_interaction_enabled(&mut self, enabled: bool) -> Result<(), InteractionToggleError> {
            self.calls.push(enabled);
            if self.failures > 0 {
                self.failures -= 1;
                return Err(InteractionToggleError::Refused("service busy".to_string()));
            }
            Ok(())
        }
    }

    fn record_at(distance: f64) -> DecisionStateRecord {
        let mut persons = BTreeMap::new();
        persons.insert(
            PersonId::new("A").unwrap(),
            PersonFeatures {
                distance: Some(distance),
                ..PersonFeatures::default()
            },
        );
        DecisionStateRecord::v1(
            EngageState::v1(MonotonicTimeNs(1), persons, None, false).unwrap(),
            Decision::general(Action::ElicitGeneral).unwrap(),
        )
        .unwrap()
    }

    const SEC: u64 = 1_000_000_000;

    #[test]
    fn at_exp_01_close_person_enters_test_and_timeout_returns() {
        let gate = InteractionGate::default();
        let mut m = PredictionExperimentManager::new(ExperimentConfig::mvp_v1(), gate.clone());
        let mut robot = RecordingRobotAdapter::new();

        let far = m.process_decision_state(&record_at(2.5), MonotonicTimeNs(SEC), &mut robot);
        assert_eq!(far, ExperimentEvent::Unchanged);

        let ev = m.process_decision_state(&record_at(0.6), MonotonicTimeNs(SEC), &mut robot);
        assert_eq!(
            ev,
            ExperimentEvent::EnteredTest {
                deadline: MonotonicTimeNs(11 * SEC),
                tablet: Ok(())
            }
        );
        assert_eq!(m.state(), ExperimentState::Test);
        assert!(!gate.is_enabled());
        assert_eq!(robot.tablet_starts(), 1);

        // Further decision states are ignored while testing.
        m.process_decision_state(&record_at(0.2), MonotonicTimeNs(2 * SEC), &mut robot);
        assert_eq!(robot.tablet_starts(), 1);

        assert_eq!(m.tick(MonotonicTimeNs(10 * SEC)), ExperimentEvent::Unchanged);
        assert_eq!(m.tick(MonotonicTimeNs(11 * SEC)), ExperimentEvent::ReturnedToElicit);
        assert_eq!(m.state(), ExperimentState::Elicit);
        assert!(gate.is_enabled());
    }

    #[test]
    fn at_exp_02_failed_pause_stays_in_elicit() {
        let mut m = PredictionExperimentManager::new(
            ExperimentConfig::mvp_v1(),
            FlakyToggle {
                failures: 1,
                ..FlakyToggle::default()
            },
        );
        let mut robot = RecordingRobotAdapter::new();
        let ev = m.process_decision_state(&record_at(0.5), MonotonicTimeNs(SEC), &mut robot);
        assert!(matches!(ev, ExperimentEvent::ToggleFailed { retry_at: None, .. }));
        assert_eq!(m.state(), ExperimentState::Elicit);
        assert_eq!(robot.tablet_starts(), 0);
        assert_eq!(m.deadline(), None);
    }

    #[test]
    fn at_exp_03_failed_resume_retries_after_one_second() {
        let mut m =
            PredictionExperimentManager::new(ExperimentConfig::mvp_v1(), FlakyToggle::default());
        let mut robot = RecordingRobotAdapter::new();
        m.process_decision_state(&record_at(0.5), MonotonicTimeNs(0), &mut robot);
        m.toggle.failures = 1;

        let ev = m.tick(MonotonicTimeNs(10 * SEC));
        assert_eq!(
            ev,
            ExperimentEvent::ToggleFailed {
                error: InteractionToggleError::Refused("service busy".to_string()),
                retry_at: Some(MonotonicTimeNs(11 * SEC)),
            }
        );
        assert_eq!(m.state(), ExperimentState::Test);
        assert_eq!(m.tick(MonotonicTimeNs(10 * SEC + 1)), ExperimentEvent::Unchanged);
        assert_eq!(m.tick(MonotonicTimeNs(11 * SEC)), ExperimentEvent::ReturnedToElicit);
        assert_eq!(m.toggle.calls, vec![false, true, true]);
    }
}
