#![forbid(unsafe_code)]

use std::collections::BTreeMap;

use engage_kernel_contracts::decision::Decision;
use engage_kernel_contracts::explain::{AnswerChoices, ExperimentGroup, ExplainabilityRecord};
use engage_kernel_contracts::person::PersonId;
use engage_kernel_contracts::state::{ContinuousFeature, EngageState};
use engage_kernel_contracts::ReasonCodeId;
use rand::seq::SliceRandom;
use rand::Rng;

use crate::discretize::{DiscreteLevel, Discretizer};
use crate::explain::{ExplainError, Explanation, ReasonShape};
use crate::language::{sentence_case, Connective, Language, PersonNames, TemplateSet, Tense};
use crate::observation::VariableKind;

pub mod reason_codes {
    use engage_kernel_contracts::ReasonCodeId;

    pub const EXPLAIN_NO_EXPLANATORY_VARIABLE: ReasonCodeId = ReasonCodeId(0x4558_0001);
    pub const EXPLAIN_NO_ELIGIBLE_PERSON: ReasonCodeId = ReasonCodeId(0x4558_0002);
    pub const EXPLAIN_NOT_EXPLAINABLE: ReasonCodeId = ReasonCodeId(0x4558_0003);
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExplainConfig {
    pub language: Language,
    pub group: ExperimentGroup,
    /// Skip explanations about the robot itself (`Waiting`).
    pub ignore_uninteresting: bool,
}

impl ExplainConfig {
    pub fn mvp_v1() -> Self {
        Self {
            language: Language::English,
            group: ExperimentGroup::ReasonOnly,
            ignore_uninteresting: true,
        }
    }
}

/// Pass-through context for one explainability record.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExplainRequest {
    pub user_id: u32,
    pub image_refs: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoExplanationReason {
    NoExplanatoryVariable,
    NoEligiblePerson,
    NotExplainable,
}

impl NoExplanationReason {
    pub fn reason_code(self) -> ReasonCodeId {
        match self {
            NoExplanationReason::NoExplanatoryVariable => {
                reason_codes::EXPLAIN_NO_EXPLANATORY_VARIABLE
            }
            NoExplanationReason::NoEligiblePerson => reason_codes::EXPLAIN_NO_ELIGIBLE_PERSON,
            NoExplanationReason::NotExplainable => reason_codes::EXPLAIN_NOT_EXPLAINABLE,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExplanationOutcome {
    Ready(ExplainabilityRecord),
    NoExplanation(NoExplanationReason),
}

impl ExplanationOutcome {
    pub fn record(&self) -> Option<&ExplainabilityRecord> {
        match self {
            ExplanationOutcome::Ready(r) => Some(r),
            ExplanationOutcome::NoExplanation(_) => None,
        }
    }
}

/// Turns the explanations of one decision into the record shown to a participant.
#[derive(Debug, Clone)]
pub struct ExplainabilityTestBuilder<'a> {
    config: &'a ExplainConfig,
    templates: &'a TemplateSet,
    names: &'a PersonNames,
    discretizer: Discretizer,
}

impl<'a> ExplainabilityTestBuilder<'a> {
    pub fn new(
        config: &'a ExplainConfig,
        templates: &'a TemplateSet,
        names: &'a PersonNames,
    ) -> Self {
        Self {
            config,
            templates,
            names,
            discretizer: Discretizer::mvp_v1(),
        }
    }

    pub fn build<R: Rng + ?Sized>(
        &self,
        explanations: &[Explanation],
        state: &EngageState,
        decision: &Decision,
        request: &ExplainRequest,
        rng: &mut R,
    ) -> Result<ExplanationOutcome, ExplainError> {
        let group = self.config.group;

        let usable: Vec<&Explanation> = explanations
            .iter()
            .filter(|e| !self.config.ignore_uninteresting || e.person().is_some())
            .collect();
        if usable.is_empty() {
            return Ok(ExplanationOutcome::NoExplanation(
                NoExplanationReason::NoExplanatoryVariable,
            ));
        }

        let mut by_person: BTreeMap<&PersonId, BTreeMap<VariableKind, &Explanation>> =
            BTreeMap::new();
        for e in usable {
            if let Some(p) = e.person() {
                by_person.entry(p).or_default().insert(e.kind(), e);
            }
        }
        let eligible: Vec<&PersonId> = by_person
            .iter()
            .filter(|(_, vars)| {
                vars.contains_key(&VariableKind::MutualGaze)
                    && (!group.requires_uncertainty()
                        || vars.contains_key(&VariableKind::PoseConfidence))
            })
            .map(|(p, _)| *p)
            .collect();
        let Some(&picked) = eligible.choose(rng) else {
            return Ok(ExplanationOutcome::NoExplanation(
                NoExplanationReason::NoEligiblePerson,
            ));
        };
        let vars = &by_person[picked];
        let gaze = vars[&VariableKind::MutualGaze];
        let confidence = vars.get(&VariableKind::PoseConfidence).copied();

        let subject = self.templates.subject(picked, self.names)?;
        let outcome = self.templates.outcome(decision, Tense::Past, self.names)?;
        let gaze_reason =
            self.templates
                .reason(VariableKind::MutualGaze, gaze.reason_shape(), &subject)?;

        let explanation = match (group.requires_uncertainty(), confidence) {
            (true, Some(c)) => {
                let conf_reason =
                    self.templates
                        .reason(VariableKind::PoseConfidence, c.reason_shape(), &subject)?;
                self.templates.connect(
                    Connective::BecauseUncertain,
                    &[
                        ("outcome", outcome.as_str()),
                        ("reason", gaze_reason.as_str()),
                        ("confidence", conf_reason.as_str()),
                    ],
                )?
            }
            _ => self.templates.connect(
                Connective::Because,
                &[("outcome", outcome.as_str()), ("reason", gaze_reason.as_str())],
            )?,
        };

        let counterfactual = match group {
            ExperimentGroup::ReasonCounterfactual
            | ExperimentGroup::UncertaintyGazeCounterfactual => {
                self.counterfactual_text(gaze, &subject)?
            }
            ExperimentGroup::UncertaintyConfidenceCounterfactual => match confidence {
                Some(c) => self.counterfactual_text(c, &subject)?,
                None => String::new(),
            },
            ExperimentGroup::ReasonOnly | ExperimentGroup::Uncertainty => String::new(),
        };

        let gaze_level = gaze.true_level().unwrap_or(DiscreteLevel::LOWEST);
        let gaze_question =
            self.answer_choices(VariableKind::MutualGaze, gaze_level, &subject, rng)?;

        // Confidence is asked about whenever it was observed, explanatory or not.
        let observed_confidence = state
            .person(picked)
            .and_then(|f| ContinuousFeature::PoseConfidence.read(f))
            .map(|v| self.discretizer.bucket(v));
        let confidence_level = confidence
            .and_then(Explanation::true_level)
            .or(observed_confidence);
        let uncertainty_question = match confidence_level {
            Some(level) => {
                self.answer_choices(VariableKind::PoseConfidence, level, &subject, rng)?
            }
            None => self.answer_choices(VariableKind::MutualGaze, gaze_level, &subject, rng)?,
        };

        let record = ExplainabilityRecord::v1(
            group,
            request.user_id,
            u32::try_from(state.len()).unwrap_or(u32::MAX),
            request.image_refs.clone(),
            explanation,
            counterfactual,
            gaze_question,
            uncertainty_question,
        )?;
        Ok(ExplanationOutcome::Ready(record))
    }

    fn counterfactual_text(&self, e: &Explanation, subject: &str) -> Result<String, ExplainError> {
        let foil = self.templates.foil(e.kind(), &e.foil_shapes(), subject)?;
        let outcome = self.templates.outcome(
            &e.nearest_counterfactual().decision,
            Tense::Conditional,
            self.names,
        )?;
        Ok(self.templates.connect(
            Connective::Counterfactual,
            &[("foil", foil.as_str()), ("outcome", outcome.as_str())],
        )?)
    }

    /// One answer per level, shuffled; `correct_answer` points at `truth` (1-based).
    fn answer_choices<R: Rng + ?Sized>(
        &self,
        variable: VariableKind,
        truth: DiscreteLevel,
        subject: &str,
        rng: &mut R,
    ) -> Result<AnswerChoices, ExplainError> {
        let mut options = DiscreteLevel::ALL
            .into_iter()
            .map(|level| {
                self.templates
                    .reason(variable, ReasonShape::Exact(level), subject)
                    .map(|text| (level == truth, sentence_case(&text)))
            })
            .collect::<Result<Vec<_>, _>>()?;
        options.shuffle(rng);

        let correct = options.iter().position(|(is_truth, _)| *is_truth).unwrap_or(0);
        Ok(AnswerChoices {
            answers: options.into_iter().map(|(_, text)| text).collect(),
            correct_answer: u8::try_from(correct + 1).unwrap_or(1),
        })
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use engage_kernel_contracts::decision::Action;
    use engage_kernel_contracts::person::PersonFeatures;
    use engage_kernel_contracts::MonotonicTimeNs;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    use super::*;
    use crate::decision::DecisionStrategy;
    use crate::explain::ExplanationEngine;

    fn pid(s: &str) -> PersonId {
        PersonId::new(s).unwrap()
    }

    fn gaze_state() -> EngageState {
        let mut persons = BTreeMap::new();
        persons.insert(
            pid("A"),
            PersonFeatures {
                mutual_gaze: Some(0.9),
                pose_confidence: Some(0.9),
                ..PersonFeatures::default()
            },
        );
        persons.insert(
            pid("B"),
            PersonFeatures {
                mutual_gaze: Some(0.4),
                pose_confidence: Some(0.9),
                ..PersonFeatures::default()
            },
        );
        EngageState::v1(MonotonicTimeNs(3), persons, None, false).unwrap()
    }

    fn explain(state: &EngageState) -> (Decision, Vec<Explanation>) {
        let strategy = DecisionStrategy::GazeConfidence;
        let d = strategy
            .decide_deterministic(state, &Discretizer::mvp_v1())
            .unwrap()
            .unwrap();
        let exps = ExplanationEngine::default().explain(&strategy, state, &d).unwrap();
        (d, exps)
    }

    fn build(group: ExperimentGroup, seed: u64) -> ExplanationOutcome {
        let state = gaze_state();
        let (d, exps) = explain(&state);
        let config = ExplainConfig {
            group,
            ..ExplainConfig::mvp_v1()
        };
        let templates = TemplateSet::builtin(config.language);
        let names = PersonNames::new();
        ExplainabilityTestBuilder::new(&config, &templates, &names)
            .build(
                &exps,
                &state,
                &d,
                &ExplainRequest {
                    user_id: 12,
                    image_refs: vec!["frame-001".to_string()],
                },
                &mut StdRng::seed_from_u64(seed),
            )
            .unwrap()
    }

    #[test]
    fn at_xtest_01_counterfactual_present_only_for_counterfactual_groups() {
        for group in ExperimentGroup::ALL {
            let outcome = build(group, 7);
            let record = outcome.record().unwrap();
            assert!(!record.explanation.is_empty());
            assert_eq!(record.counterfactual.is_empty(), !group.shows_counterfactual());
            assert_eq!(record.group, group);
            assert_eq!(record.num_people, 2);
            assert_eq!(record.image_refs, vec!["frame-001".to_string()]);
        }
    }

    #[test]
    fn at_xtest_02_answers_are_shuffled_deterministically_per_seed() {
        let a = build(ExperimentGroup::ReasonOnly, 42);
        let b = build(ExperimentGroup::ReasonOnly, 42);
        assert_eq!(a, b);

        let record = a.record().unwrap();
        let q = &record.gaze_question;
        assert_eq!(q.answers.len(), 4);
        let correct = &q.answers[usize::from(q.correct_answer) - 1];
        let picked_full = correct == "Person A and I were looking directly at each other";
        let picked_low = correct == "Person B was not looking at me";
        assert!(picked_full || picked_low, "unexpected answer {correct}");
    }

    #[test]
    fn at_xtest_03_uncertainty_groups_need_confidence_explanations() {
        // SimpleTarget never searches gaze, so nobody qualifies.
        let mut persons = BTreeMap::new();
        persons.insert(
            pid("A"),
            PersonFeatures {
                engagement_value: Some(0.9),
                mutual_gaze: Some(0.9),
                ..PersonFeatures::default()
            },
        );
        let state = EngageState::v1(MonotonicTimeNs(3), persons, None, false).unwrap();
        let strategy = DecisionStrategy::SimpleTarget;
        let d = Decision::v1(Action::ElicitTarget, Some(pid("A"))).unwrap();
        let exps = ExplanationEngine::default().explain(&strategy, &state, &d).unwrap();

        let config = ExplainConfig {
            group: ExperimentGroup::Uncertainty,
            ..ExplainConfig::mvp_v1()
        };
        let templates = TemplateSet::builtin(Language::English);
        let names = PersonNames::new();
        let outcome = ExplainabilityTestBuilder::new(&config, &templates, &names)
            .build(
                &exps,
                &state,
                &d,
                &ExplainRequest::default(),
                &mut StdRng::seed_from_u64(1),
            )
            .unwrap();
        assert_eq!(
            outcome,
            ExplanationOutcome::NoExplanation(NoExplanationReason::NoEligiblePerson)
        );
    }

    #[test]
    fn general_only_explanations_are_uninteresting() {
        let state = EngageState::v1(MonotonicTimeNs(3), BTreeMap::new(), None, true).unwrap();
        let strategy = DecisionStrategy::SimpleTarget;
        let d = Decision::general(Action::Wait).unwrap();
        let exps = ExplanationEngine::default().explain(&strategy, &state, &d).unwrap();
        assert_eq!(exps.len(), 1);

        let config = ExplainConfig::mvp_v1();
        let templates = TemplateSet::builtin(Language::Catalan);
        let names = PersonNames::new();
        let outcome = ExplainabilityTestBuilder::new(&config, &templates, &names)
            .build(
                &exps,
                &state,
                &d,
                &ExplainRequest::default(),
                &mut StdRng::seed_from_u64(1),
            )
            .unwrap();
        assert_eq!(
            outcome,
            ExplanationOutcome::NoExplanation(NoExplanationReason::NoExplanatoryVariable)
        );
        assert_eq!(
            NoExplanationReason::NoExplanatoryVariable.reason_code(),
            reason_codes::EXPLAIN_NO_EXPLANATORY_VARIABLE
        );
    }
}
