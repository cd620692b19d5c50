#![forbid(unsafe_code)]

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize};

use crate::person::PersonId;
use crate::state::EngageState;
use crate::{ContractViolation, MonotonicTimeNs, SchemaVersion, Validate};

pub const DECISION_CONTRACT_VERSION: SchemaVersion = SchemaVersion(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Action {
    Nothing,
    Wait,
    Maintain,
    Recapture,
    ElicitGeneral,
    ElicitTarget,
}

impl Action {
    pub const ALL: [Action; 6] = [
        Action::Nothing,
        Action::Wait,
        Action::Maintain,
        Action::Recapture,
        Action::ElicitGeneral,
        Action::ElicitTarget,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Action::Nothing => "NOTHING",
            Action::Wait => "WAIT",
            Action::Maintain => "MAINTAIN",
            Action::Recapture => "RECAPTURE",
            Action::ElicitGeneral => "ELICIT_GENERAL",
            Action::ElicitTarget => "ELICIT_TARGET",
        }
    }

    pub fn takes_target(self) -> bool {
        matches!(self, Action::ElicitTarget)
    }

    /// `NOTHING` and `WAIT` are inaction and never count as a decision having been acted on.
    pub fn is_inaction(self) -> bool {
        matches!(self, Action::Nothing | Action::Wait)
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Action {
    type Err = ContractViolation;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Action::ALL
            .into_iter()
            .find(|a| a.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or(ContractViolation::InvalidValue {
                field: "action",
                reason: "unknown action name",
            })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct Decision {
    action: Action,
    target: Option<PersonId>,
}

#[derive(Deserialize)]
struct DecisionWire {
    action: Action,
    target: Option<PersonId>,
}

impl<'de> Deserialize<'de> for Decision {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let w = DecisionWire::deserialize(deserializer)?;
        Decision::v1(w.action, w.target).map_err(serde::de::Error::custom)
    }
}

impl Decision {
    /// Fails when the target presence does not match `action.takes_target()`.
    pub fn v1(action: Action, target: Option<PersonId>) -> Result<Self, ContractViolation> {
        let d = Self { action, target };
        d.validate()?;
        Ok(d)
    }

    pub fn general(action: Action) -> Result<Self, ContractViolation> {
        Self::v1(action, None)
    }

    pub fn action(&self) -> Action {
        self.action
    }

    pub fn target(&self) -> Option<&PersonId> {
        self.target.as_ref()
    }

    pub fn validate_against(&self, state: &EngageState) -> Result<(), ContractViolation> {
        self.validate()?;
        if let Some(t) = &self.target {
            if !state.contains(t) {
                return Err(ContractViolation::InvalidValue {
                    field: "decision.target",
                    reason: "must be a member of the state's person set",
                });
            }
        }
        Ok(())
    }
}

impl Validate for Decision {
    fn validate(&self) -> Result<(), ContractViolation> {
        match (self.action.takes_target(), &self.target) {
            (true, None) => Err(ContractViolation::InvalidValue {
                field: "decision.target",
                reason: "target-taking action requires a target",
            }),
            (false, Some(_)) => Err(ContractViolation::InvalidValue {
                field: "decision.target",
                reason: "non-target action must not carry a target",
            }),
            _ => Ok(()),
        }
    }
}

impl fmt::Display for Decision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.target {
            Some(t) => write!(f, "{}({})", self.action, t),
            None => write!(f, "{}", self.action),
        }
    }
}

/// Decision output record: `{timestamp, action, target}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecisionMessage {
    pub timestamp: MonotonicTimeNs,
    pub action: Action,
    pub target: Option<PersonId>,
}

impl DecisionMessage {
    pub fn from_decision(timestamp: MonotonicTimeNs, d: &Decision) -> Self {
        Self {
            timestamp,
            action: d.action,
            target: d.target.clone(),
        }
    }
}

/// A snapshot and the decision computed from it, retained for loggers and explanation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DecisionStateRecord {
    pub schema_version: SchemaVersion,
    pub state: EngageState,
    pub decision: Decision,
}

#[derive(Deserialize)]
struct DecisionStateRecordWire {
    schema_version: SchemaVersion,
    state: EngageState,
    decision: Decision,
}

impl<'de> Deserialize<'de> for DecisionStateRecord {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let w = DecisionStateRecordWire::deserialize(deserializer)?;
        let r = Self {
            schema_version: w.schema_version,
            state: w.state,
            decision: w.decision,
        };
        r.validate().map_err(serde::de::Error::custom)?;
        Ok(r)
    }
}

impl DecisionStateRecord {
    pub fn v1(state: EngageState, decision: Decision) -> Result<Self, ContractViolation> {
        let r = Self {
            schema_version: DECISION_CONTRACT_VERSION,
            state,
            decision,
        };
        r.validate()?;
        Ok(r)
    }

    pub fn message(&self) -> DecisionMessage {
        DecisionMessage::from_decision(self.state.timestamp(), &self.decision)
    }
}

impl Validate for DecisionStateRecord {
    fn validate(&self) -> Result<(), ContractViolation> {
        if self.schema_version != DECISION_CONTRACT_VERSION {
            return Err(ContractViolation::InvalidValue {
                field: "decision_state_record.schema_version",
                reason: "must match DECISION_CONTRACT_VERSION",
            });
        }
        self.state.validate()?;
        self.decision.validate_against(&self.state)
    }
}
