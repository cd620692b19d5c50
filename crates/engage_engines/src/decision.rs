#![forbid(unsafe_code)]

use std::collections::BTreeMap;
use std::str::FromStr;

use engage_kernel_contracts::decision::{Action, Decision};
use engage_kernel_contracts::person::{PersonFeatures, PersonId};
use engage_kernel_contracts::state::EngageState;
use engage_kernel_contracts::{ContractViolation, MonotonicTimeNs};
use rand::rngs::StdRng;
use rand::seq::IteratorRandom;
use rand::{Rng, SeedableRng};

use crate::discretize::{DiscreteLevel, Discretizer};
use crate::observation::VariableKind;

#[derive(Debug, thiserror::Error)]
pub enum DecisionError {
    #[error("decision shape violates contract: {0}")]
    InvalidShape(#[from] ContractViolation),
    #[error("unknown decision maker `{0}`")]
    UnknownStrategy(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DecisionStrategyKind {
    Heuristic,
    RandomRobot,
    SimpleTarget,
    GazeConfidence,
}

impl DecisionStrategyKind {
    pub const ALL: [DecisionStrategyKind; 4] = [
        DecisionStrategyKind::Heuristic,
        DecisionStrategyKind::RandomRobot,
        DecisionStrategyKind::SimpleTarget,
        DecisionStrategyKind::GazeConfidence,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            DecisionStrategyKind::Heuristic => "heuristic",
            DecisionStrategyKind::RandomRobot => "random_robot",
            DecisionStrategyKind::SimpleTarget => "simple_target",
            DecisionStrategyKind::GazeConfidence => "gaze_confidence",
        }
    }
}

impl FromStr for DecisionStrategyKind {
    type Err = DecisionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        DecisionStrategyKind::ALL
            .into_iter()
            .find(|k| k.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| DecisionError::UnknownStrategy(s.to_string()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HeuristicWeights {
    pub engagement_value: f64,
    pub mutual_gaze: f64,
}

impl HeuristicWeights {
    pub fn mvp_v1() -> Self {
        Self {
            engagement_value: 0.5,
            mutual_gaze: 0.5,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DecisionConfig {
    pub strategy: DecisionStrategyKind,
    /// Time after a real action during which new states are forced into `WAIT`.
    pub wait_time_ns: u64,
    pub heuristic_weights: HeuristicWeights,
    pub random_seed: u64,
}

impl DecisionConfig {
    pub fn mvp_v1() -> Self {
        Self {
            strategy: DecisionStrategyKind::Heuristic,
            wait_time_ns: 5_000_000_000,
            heuristic_weights: HeuristicWeights::mvp_v1(),
            random_seed: 0,
        }
    }

    pub fn with_strategy(mut self, strategy: DecisionStrategyKind) -> Self {
        self.strategy = strategy;
        self
    }
}

/// The closed set of decision makers.
#[derive(Debug, Clone)]
pub enum DecisionStrategy {
    /// Engagement value blended with mutual gaze when gaze is known.
    Heuristic(HeuristicWeights),
    /// Random action over a random person. Not explainable.
    RandomRobot(Box<StdRng>),
    /// Engagement value alone.
    SimpleTarget,
    /// Mutual gaze weighted by pose-estimation confidence.
    GazeConfidence,
}

impl DecisionStrategy {
    pub fn from_config(config: &DecisionConfig) -> Self {
        match config.strategy {
            DecisionStrategyKind::Heuristic => {
                DecisionStrategy::Heuristic(config.heuristic_weights)
            }
            DecisionStrategyKind::RandomRobot => {
                DecisionStrategy::RandomRobot(Box::new(StdRng::seed_from_u64(config.random_seed)))
            }
            DecisionStrategyKind::SimpleTarget => DecisionStrategy::SimpleTarget,
            DecisionStrategyKind::GazeConfidence => DecisionStrategy::GazeConfidence,
        }
    }

    pub fn kind(&self) -> DecisionStrategyKind {
        match self {
            DecisionStrategy::Heuristic(_) => DecisionStrategyKind::Heuristic,
            DecisionStrategy::RandomRobot(_) => DecisionStrategyKind::RandomRobot,
            DecisionStrategy::SimpleTarget => DecisionStrategyKind::SimpleTarget,
            DecisionStrategy::GazeConfidence => DecisionStrategyKind::GazeConfidence,
        }
    }

    pub fn is_deterministic(&self) -> bool {
        !matches!(self, DecisionStrategy::RandomRobot(_))
    }

    /// Per-person variables the score reads.
    pub fn input_variables(&self) -> &'static [VariableKind] {
        match self {
            DecisionStrategy::Heuristic(_) => {
                &[VariableKind::EngagementValue, VariableKind::MutualGaze]
            }
            DecisionStrategy::RandomRobot(_) => &[],
            DecisionStrategy::SimpleTarget => &[VariableKind::EngagementValue],
            DecisionStrategy::GazeConfidence => {
                &[VariableKind::MutualGaze, VariableKind::PoseConfidence]
            }
        }
    }

    /// Continuous engagement score, `None` when the person is ineligible.
    pub fn score(&self, f: &PersonFeatures) -> Option<f64> {
        match self {
            DecisionStrategy::Heuristic(w) => {
                let ev = f.engagement_value?;
                match f.mutual_gaze {
                    Some(mg) if w.engagement_value + w.mutual_gaze > 0.0 => Some(
                        (w.engagement_value * ev + w.mutual_gaze * mg)
                            / (w.engagement_value + w.mutual_gaze),
                    ),
                    _ => Some(ev),
                }
            }
            DecisionStrategy::RandomRobot(_) => None,
            DecisionStrategy::SimpleTarget => f.engagement_value,
            DecisionStrategy::GazeConfidence => Some(f.mutual_gaze? * f.pose_confidence?),
        }
    }

    /// Decides without touching any internal state. `None` for the random strategy.
    pub fn decide_deterministic(
        &self,
        state: &EngageState,
        discretizer: &Discretizer,
    ) -> Result<Option<Decision>, ContractViolation> {
        if !self.is_deterministic() {
            return Ok(None);
        }
        if let Some(d) = precondition(state)? {
            return Ok(Some(d));
        }
        decide_by_score(state, discretizer, |f| self.score(f)).map(Some)
    }

    pub fn decide(
        &mut self,
        state: &EngageState,
        discretizer: &Discretizer,
    ) -> Result<Decision, ContractViolation> {
        if let Some(d) = precondition(state)? {
            return Ok(d);
        }
        match self {
            DecisionStrategy::RandomRobot(rng) => decide_randomly(state, rng.as_mut()),
            _ => decide_by_score(state, discretizer, |f| self.score(f)),
        }
    }
}

fn precondition(state: &EngageState) -> Result<Option<Decision>, ContractViolation> {
    if state.waiting() {
        // Still executing a previous decision.
        return Decision::general(Action::Wait).map(Some);
    }
    if state.is_empty() {
        return Decision::general(Action::Nothing).map(Some);
    }
    Ok(None)
}

fn decide_by_score(
    state: &EngageState,
    discretizer: &Discretizer,
    score: impl Fn(&PersonFeatures) -> Option<f64>,
) -> Result<Decision, ContractViolation> {
    // Compare discretized scores so explanations over the same buckets agree with the decision.
    let scores: BTreeMap<&PersonId, DiscreteLevel> = state
        .persons()
        .iter()
        .filter_map(|(id, f)| score(f).map(|s| (id, discretizer.bucket(s))))
        .collect();

    let Some(best) = scores.values().max().copied() else {
        return Decision::general(Action::Nothing);
    };
    if best == DiscreteLevel::LOWEST {
        return Decision::general(Action::ElicitGeneral);
    }
    // BTreeMap iteration order makes the first maximum the lexicographically smallest id.
    let target = scores
        .iter()
        .find(|(_, level)| **level == best)
        .map(|(id, _)| (*id).clone());
    Decision::v1(Action::ElicitTarget, target)
}

fn decide_randomly(state: &EngageState, rng: &mut StdRng) -> Result<Decision, ContractViolation> {
    match rng.gen_range(0..3u8) {
        0 => Decision::general(Action::Nothing),
        1 => Decision::general(Action::ElicitGeneral),
        _ => {
            let target = state.person_ids().choose(rng).cloned();
            Decision::v1(Action::ElicitTarget, target)
        }
    }
}

/// A strategy plus the waiting bookkeeping shared by every strategy.
#[derive(Debug, Clone)]
pub struct DecisionEngine {
    strategy: DecisionStrategy,
    discretizer: Discretizer,
    wait_time_ns: u64,
    last_decision_time: Option<MonotonicTimeNs>,
}

impl DecisionEngine {
    pub fn new(config: &DecisionConfig, discretizer: Discretizer) -> Self {
        Self {
            strategy: DecisionStrategy::from_config(config),
            discretizer,
            wait_time_ns: config.wait_time_ns,
            last_decision_time: None,
        }
    }

    pub fn strategy(&self) -> &DecisionStrategy {
        &self.strategy
    }

    pub fn discretizer(&self) -> &Discretizer {
        &self.discretizer
    }

    pub fn last_decision_time(&self) -> Option<MonotonicTimeNs> {
        self.last_decision_time
    }

    pub fn decide(&mut self, state: &EngageState) -> Result<Decision, DecisionError> {
        let d = self.strategy.decide(state, &self.discretizer)?;
        d.validate_against(state)?;
        Ok(d)
    }

    /// Only real actions start a new waiting window.
    pub fn update_last_decision_time(&mut self, decision: &Decision, time: MonotonicTimeNs) {
        if !decision.action().is_inaction() {
            self.last_decision_time = Some(time);
        }
    }

    pub fn is_waiting(&self, now: MonotonicTimeNs) -> bool {
        self.last_decision_time
            .is_some_and(|t| now.saturating_elapsed_since(t) < self.wait_time_ns)
    }

    /// External timeout signal: the next state is decided again instead of forced into `WAIT`.
    pub fn clear_waiting(&mut self) {
        self.last_decision_time = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use engage_kernel_contracts::person::PersonFeatures;

    fn pid(s: &str) -> PersonId {
        PersonId::new(s).unwrap()
    }

    fn state_with(values: &[(&str, Option<f64>)], waiting: bool) -> EngageState {
        let persons = values
            .iter()
            .map(|(id, ev)| {
                (
                    pid(id),
                    PersonFeatures {
                        engagement_value: *ev,
                        ..PersonFeatures::default()
                    },
                )
            })
            .collect();
        EngageState::v1(MonotonicTimeNs(1_000), persons, None, waiting).unwrap()
    }

    fn engine(kind: DecisionStrategyKind) -> DecisionEngine {
        DecisionEngine::new(
            &DecisionConfig::mvp_v1().with_strategy(kind),
            Discretizer::mvp_v1(),
        )
    }

    #[test]
    fn at_dec_01_waiting_forces_wait_without_target() {
        for kind in DecisionStrategyKind::ALL {
            let mut e = engine(kind);
            let d = e
                .decide(&state_with(&[("A", Some(1.0)), ("B", Some(0.9))], true))
                .unwrap();
            assert_eq!(d.action(), Action::Wait);
            assert!(d.target().is_none());
        }
    }

    #[test]
    fn at_dec_02_nobody_tracked_is_nothing() {
        for kind in DecisionStrategyKind::ALL {
            let mut e = engine(kind);
            let d = e.decide(&state_with(&[], false)).unwrap();
            assert_eq!(d.action(), Action::Nothing);
        }
    }

    #[test]
    fn at_dec_03_highest_bucket_is_targeted() {
        let mut e = engine(DecisionStrategyKind::SimpleTarget);
        let d = e
            .decide(&state_with(&[("A", Some(0.33)), ("B", Some(0.67))], false))
            .unwrap();
        assert_eq!(d.action(), Action::ElicitTarget);
        assert_eq!(d.target(), Some(&pid("B")));
    }

    #[test]
    fn at_dec_04_everyone_in_lowest_bucket_elicits_general() {
        let mut e = engine(DecisionStrategyKind::SimpleTarget);
        let d = e
            .decide(&state_with(&[("A", Some(0.0)), ("B", Some(0.1))], false))
            .unwrap();
        assert_eq!(d.action(), Action::ElicitGeneral);
        assert!(d.target().is_none());
    }

    #[test]
    fn at_dec_05_ties_pick_smallest_id_every_time() {
        let s = state_with(&[("B", Some(0.7)), ("A", Some(0.6)), ("C", Some(0.2))], false);
        let mut e = engine(DecisionStrategyKind::SimpleTarget);
        for _ in 0..10 {
            assert_eq!(e.decide(&s).unwrap().target(), Some(&pid("A")));
        }
    }

    #[test]
    fn at_dec_06_absent_scores_are_excluded_not_zero() {
        let mut e = engine(DecisionStrategyKind::SimpleTarget);
        let d = e
            .decide(&state_with(&[("A", None), ("B", Some(0.4))], false))
            .unwrap();
        assert_eq!(d.target(), Some(&pid("B")));

        let d = e.decide(&state_with(&[("A", None), ("B", None)], false)).unwrap();
        assert_eq!(d.action(), Action::Nothing);
    }

    #[test]
    fn at_dec_07_inaction_does_not_start_waiting_window() {
        let mut e = engine(DecisionStrategyKind::SimpleTarget);
        e.update_last_decision_time(
            &Decision::general(Action::Nothing).unwrap(),
            MonotonicTimeNs(10),
        );
        e.update_last_decision_time(&Decision::general(Action::Wait).unwrap(), MonotonicTimeNs(10));
        assert_eq!(e.last_decision_time(), None);
        assert!(!e.is_waiting(MonotonicTimeNs(11)));

        e.update_last_decision_time(
            &Decision::general(Action::ElicitGeneral).unwrap(),
            MonotonicTimeNs(10),
        );
        assert!(e.is_waiting(MonotonicTimeNs(10 + 4_999_999_999)));
        assert!(!e.is_waiting(MonotonicTimeNs(10 + 5_000_000_000)));

        e.clear_waiting();
        assert!(!e.is_waiting(MonotonicTimeNs(11)));
    }

    #[test]
    fn at_dec_08_random_strategy_respects_decision_shape() {
        let mut e = engine(DecisionStrategyKind::RandomRobot);
        let s = state_with(&[("A", Some(0.3)), ("B", None)], false);
        for _ in 0..50 {
            let d = e.decide(&s).unwrap();
            assert_eq!(d.target().is_some(), d.action().takes_target());
            if let Some(t) = d.target() {
                assert!(s.contains(t));
            }
        }
        assert!(!e.strategy().is_deterministic());
        assert!(e
            .strategy()
            .decide_deterministic(&s, &Discretizer::mvp_v1())
            .unwrap()
            .is_none());
    }

    #[test]
    fn gaze_confidence_requires_both_inputs() {
        let s = DecisionStrategy::GazeConfidence;
        let mut f = PersonFeatures {
            mutual_gaze: Some(0.9),
            ..PersonFeatures::default()
        };
        assert_eq!(s.score(&f), None);
        f.pose_confidence = Some(0.5);
        assert_eq!(s.score(&f), Some(0.45));
    }

    #[test]
    fn heuristic_falls_back_to_engagement_value_without_gaze() {
        let s = DecisionStrategy::Heuristic(HeuristicWeights::mvp_v1());
        let mut f = PersonFeatures {
            engagement_value: Some(0.8),
            ..PersonFeatures::default()
        };
        assert_eq!(s.score(&f), Some(0.8));
        f.mutual_gaze = Some(0.2);
        assert!((s.score(&f).unwrap() - 0.5).abs() < 1e-12);
    }

    #[test]
    fn strategy_names_parse() {
        assert_eq!(
            "gaze_confidence".parse::<DecisionStrategyKind>().unwrap(),
            DecisionStrategyKind::GazeConfidence
        );
        assert!(matches!(
            "lime".parse::<DecisionStrategyKind>(),
            Err(DecisionError::UnknownStrategy(_))
        ));
    }
}
