#![forbid(unsafe_code)]

use serde::{Deserialize, Serialize};

use crate::{ContractViolation, SchemaVersion, Validate};

pub const EXPLAIN_CONTRACT_VERSION: SchemaVersion = SchemaVersion(1);

pub const EXPLAIN_MAX_TEXT_LEN: usize = 512;
pub const EXPLAIN_MAX_ANSWERS: usize = 8;
pub const EXPLAIN_MAX_IMAGE_REFS: usize = 8;

/// Which explanation style a participant is shown.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ExperimentGroup {
    /// Reason only, no uncertainty.
    ReasonOnly,
    /// Reason and counterfactual, no uncertainty.
    ReasonCounterfactual,
    /// Reason citing gaze and pose-estimation confidence.
    Uncertainty,
    /// Uncertainty reason, counterfactual on gaze.
    UncertaintyGazeCounterfactual,
    /// Uncertainty reason, counterfactual on pose-estimation confidence.
    UncertaintyConfidenceCounterfactual,
}

impl ExperimentGroup {
    pub const ALL: [ExperimentGroup; 5] = [
        ExperimentGroup::ReasonOnly,
        ExperimentGroup::ReasonCounterfactual,
        ExperimentGroup::Uncertainty,
        ExperimentGroup::UncertaintyGazeCounterfactual,
        ExperimentGroup::UncertaintyConfidenceCounterfactual,
    ];

    pub fn id(self) -> u8 {
        match self {
            ExperimentGroup::ReasonOnly => 0,
            ExperimentGroup::ReasonCounterfactual => 1,
            ExperimentGroup::Uncertainty => 2,
            ExperimentGroup::UncertaintyGazeCounterfactual => 3,
            ExperimentGroup::UncertaintyConfidenceCounterfactual => 4,
        }
    }

    pub fn from_id(id: u8) -> Result<Self, ContractViolation> {
        ExperimentGroup::ALL
            .into_iter()
            .find(|g| g.id() == id)
            .ok_or(ContractViolation::InvalidValue {
                field: "experiment_group",
                reason: "must be in 0..=4",
            })
    }

    pub fn requires_uncertainty(self) -> bool {
        !matches!(
            self,
            ExperimentGroup::ReasonOnly | ExperimentGroup::ReasonCounterfactual
        )
    }

    pub fn shows_counterfactual(self) -> bool {
        matches!(
            self,
            ExperimentGroup::ReasonCounterfactual
                | ExperimentGroup::UncertaintyGazeCounterfactual
                | ExperimentGroup::UncertaintyConfidenceCounterfactual
        )
    }
}

/// One multiple-choice comprehension question.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnswerChoices {
    pub answers: Vec<String>,
    /// 1-based index of the correct entry in `answers`.
    pub correct_answer: u8,
}

impl Validate for AnswerChoices {
    fn validate(&self) -> Result<(), ContractViolation> {
        if self.answers.is_empty() || self.answers.len() > EXPLAIN_MAX_ANSWERS {
            return Err(ContractViolation::InvalidValue {
                field: "answer_choices.answers",
                reason: "must contain 1..=EXPLAIN_MAX_ANSWERS entries",
            });
        }
        if self.correct_answer == 0 || self.correct_answer as usize > self.answers.len() {
            return Err(ContractViolation::InvalidValue {
                field: "answer_choices.correct_answer",
                reason: "must be a 1-based index into answers",
            });
        }
        if self.answers.iter().any(|a| a.trim().is_empty()) {
            return Err(ContractViolation::InvalidValue {
                field: "answer_choices.answers",
                reason: "answers must not be empty",
            });
        }
        Ok(())
    }
}

/// Explanation output consumed by the experiment tablet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExplainabilityRecord {
    pub schema_version: SchemaVersion,
    pub group: ExperimentGroup,
    pub user_id: u32,
    pub num_people: u32,
    /// Opaque references passed through untouched.
    pub image_refs: Vec<String>,
    pub explanation: String,
    /// Empty when the group does not show a counterfactual.
    pub counterfactual: String,
    pub gaze_question: AnswerChoices,
    pub uncertainty_question: AnswerChoices,
}

impl ExplainabilityRecord {
    #[allow(clippy::too_many_arguments)]
    pub fn v1(
        group: ExperimentGroup,
        user_id: u32,
        num_people: u32,
        image_refs: Vec<String>,
        explanation: String,
        counterfactual: String,
        gaze_question: AnswerChoices,
        uncertainty_question: AnswerChoices,
    ) -> Result<Self, ContractViolation> {
        let r = Self {
            schema_version: EXPLAIN_CONTRACT_VERSION,
            group,
            user_id,
            num_people,
            image_refs,
            explanation,
            counterfactual,
            gaze_question,
            uncertainty_question,
        };
        r.validate()?;
        Ok(r)
    }
}

impl Validate for ExplainabilityRecord {
    fn validate(&self) -> Result<(), ContractViolation> {
        if self.schema_version != EXPLAIN_CONTRACT_VERSION {
            return Err(ContractViolation::InvalidValue {
                field: "explainability_record.schema_version",
                reason: "must match EXPLAIN_CONTRACT_VERSION",
            });
        }
        if self.explanation.trim().is_empty() {
            return Err(ContractViolation::InvalidValue {
                field: "explainability_record.explanation",
                reason: "must not be empty",
            });
        }
        if self.explanation.len() > EXPLAIN_MAX_TEXT_LEN
            || self.counterfactual.len() > EXPLAIN_MAX_TEXT_LEN
        {
            return Err(ContractViolation::InvalidValue {
                field: "explainability_record.text",
                reason: "must be <= EXPLAIN_MAX_TEXT_LEN bytes",
            });
        }
        if self.group.shows_counterfactual() == self.counterfactual.trim().is_empty() {
            return Err(ContractViolation::InvalidValue {
                field: "explainability_record.counterfactual",
                reason: "must be present exactly when the group shows a counterfactual",
            });
        }
        if self.image_refs.len() > EXPLAIN_MAX_IMAGE_REFS {
            return Err(ContractViolation::InvalidValue {
                field: "explainability_record.image_refs",
                reason: "must be <= EXPLAIN_MAX_IMAGE_REFS entries",
            });
        }
        self.gaze_question.validate()?;
        self.uncertainty_question.validate()
    }
}
