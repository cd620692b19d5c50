#![forbid(unsafe_code)]

use engage_engines::decision::DecisionStrategy;
use engage_engines::discretize::Discretizer;
use engage_engines::explain::{ExplainError, ExplanationEngine};
use engage_engines::explainability::{
    ExplainConfig, ExplainRequest, ExplainabilityTestBuilder, ExplanationOutcome,
    NoExplanationReason,
};
use engage_engines::language::{PersonNames, TemplateError, TemplateSet};
use engage_engines::observation::VariableKind;
use engage_kernel_contracts::decision::DecisionStateRecord;
use engage_storage::ledger::{DecisionStateId, StorageError};
use engage_storage::repo::DecisionStateRepo;
use rand::Rng;
use tracing::{debug, info};

#[derive(Debug, thiserror::Error)]
pub enum ExplainServiceError {
    #[error(transparent)]
    Explain(#[from] ExplainError),
    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Out-of-band explanation of stored decision/state pairs.
///
/// Shares nothing mutable with the decision cycle; the only side effect is the caller's rng.
#[derive(Debug, Clone)]
pub struct ExplanationService {
    config: ExplainConfig,
    strategy: DecisionStrategy,
    engine: ExplanationEngine,
    templates: TemplateSet,
    names: PersonNames,
}

impl ExplanationService {
    /// Fails when `templates` cannot phrase every combination reachable for `strategy`.
    pub fn new(
        config: ExplainConfig,
        strategy: DecisionStrategy,
        discretizer: Discretizer,
        templates: TemplateSet,
        names: PersonNames,
    ) -> Result<Self, TemplateError> {
        templates.validate_coverage(&Self::phrased_variables(&strategy))?;
        Ok(Self {
            config,
            strategy,
            engine: ExplanationEngine::new(discretizer),
            templates,
            names,
        })
    }

    /// Strategy inputs plus the two variables the comprehension questions ask about.
    fn phrased_variables(strategy: &DecisionStrategy) -> Vec<VariableKind> {
        let mut vars = strategy.input_variables().to_vec();
        for v in [VariableKind::MutualGaze, VariableKind::PoseConfidence] {
            if !vars.contains(&v) {
                vars.push(v);
            }
        }
        vars
    }

    pub fn config(&self) -> &ExplainConfig {
        &self.config
    }

    pub fn templates(&self) -> &TemplateSet {
        &self.templates
    }

    pub fn explain_record<R: Rng + ?Sized>(
        &self,
        record: &DecisionStateRecord,
        request: &ExplainRequest,
        rng: &mut R,
    ) -> Result<ExplanationOutcome, ExplainError> {
        let explanations = match self
            .engine
            .explain(&self.strategy, &record.state, &record.decision)
        {
            Ok(e) => e,
            Err(ExplainError::NotExplainable(kind)) => {
                debug!(strategy = kind.as_str(), "decision maker is not explainable");
                return Ok(ExplanationOutcome::NoExplanation(
                    NoExplanationReason::NotExplainable,
                ));
            }
            Err(err) => return Err(err),
        };

        let outcome = ExplainabilityTestBuilder::new(&self.config, &self.templates, &self.names)
            .build(
                &explanations,
                &record.state,
                &record.decision,
                request,
                rng,
            )?;
        match &outcome {
            ExplanationOutcome::Ready(r) => info!(
                group = self.config.group.id(),
                user_id = request.user_id,
                has_counterfactual = !r.counterfactual.is_empty(),
                "explanation ready"
            ),
            ExplanationOutcome::NoExplanation(reason) => info!(
                reason_code = reason.reason_code().0,
                "no explanation available"
            ),
        }
        Ok(outcome)
    }

    /// Explains the row `id` of `repo`.
    pub fn explain_stored<S, R>(
        &self,
        repo: &S,
        id: DecisionStateId,
        request: &ExplainRequest,
        rng: &mut R,
    ) -> Result<ExplanationOutcome, ExplainServiceError>
    where
        S: DecisionStateRepo + ?Sized,
        R: Rng + ?Sized,
    {
        let row = repo.decision_state_row(id)?;
        Ok(self.explain_record(&row.record, request, rng)?)
    }
}

#[cfg(test)]
mod tests {
    use engage_engines::decision::{DecisionConfig, DecisionStrategyKind};
    use engage_engines::language::Language;
    use engage_kernel_contracts::decision::{Action, Decision};
    use engage_kernel_contracts::state::EngageState;
    use engage_kernel_contracts::MonotonicTimeNs;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    use super::*;

    fn service(kind: DecisionStrategyKind) -> ExplanationService {
        ExplanationService::new(
            ExplainConfig::mvp_v1(),
            DecisionStrategy::from_config(&DecisionConfig::mvp_v1().with_strategy(kind)),
            Discretizer::mvp_v1(),
            TemplateSet::builtin(Language::English),
            PersonNames::new(),
        )
        .unwrap()
    }

    #[test]
    fn random_robot_decisions_yield_typed_refusal() {
        let record = DecisionStateRecord::v1(
            EngageState::empty(MonotonicTimeNs(1), false),
            Decision::general(Action::Nothing).unwrap(),
        )
        .unwrap();
        let out = service(DecisionStrategyKind::RandomRobot)
            .explain_record(
                &record,
                &ExplainRequest::default(),
                &mut StdRng::seed_from_u64(1),
            )
            .unwrap();
        assert_eq!(
            out,
            ExplanationOutcome::NoExplanation(NoExplanationReason::NotExplainable)
        );
    }

    #[test]
    fn stored_decision_that_strategy_disagrees_with_is_an_error() {
        let record = DecisionStateRecord::v1(
            EngageState::empty(MonotonicTimeNs(1), false),
            Decision::general(Action::ElicitGeneral).unwrap(),
        )
        .unwrap();
        let err = service(DecisionStrategyKind::SimpleTarget)
            .explain_record(
                &record,
                &ExplainRequest::default(),
                &mut StdRng::seed_from_u64(1),
            )
            .unwrap_err();
        assert!(matches!(err, ExplainError::DecisionMismatch { .. }));
    }
}
