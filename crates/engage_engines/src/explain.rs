#![forbid(unsafe_code)]

use engage_kernel_contracts::decision::Decision;
use engage_kernel_contracts::person::PersonId;
use engage_kernel_contracts::state::EngageState;
use engage_kernel_contracts::ContractViolation;

use crate::decision::{DecisionStrategy, DecisionStrategyKind};
use crate::discretize::{DiscreteLevel, Discretizer};
use crate::observation::{ObservationVar, VariableKind};

#[derive(Debug, thiserror::Error)]
pub enum ExplainError {
    #[error("decision maker `{}` is not explainable", .0.as_str())]
    NotExplainable(DecisionStrategyKind),
    #[error("stored decision {stored} does not match {recomputed} recomputed from its state")]
    DecisionMismatch { stored: String, recomputed: String },
    #[error(transparent)]
    Contract(#[from] ContractViolation),
    #[error(transparent)]
    Template(#[from] crate::language::TemplateError),
}

/// Value an explained variable takes, in the form decisions are compared on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ExplainedValue {
    Flag(bool),
    Level(DiscreteLevel),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Counterfactual {
    pub value: ExplainedValue,
    pub decision: Decision,
}

/// Where the counterfactual values lie relative to the true value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CounterfactualDirection {
    /// Only a higher value would have changed the decision.
    Upper,
    /// Only a lower value would have changed the decision.
    Lower,
    /// The true value sits between counterfactual values.
    TwoSided,
    /// Flags have no order.
    Flip,
}

/// How the true value is phrased in a reason clause.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ReasonShape {
    Flag(bool),
    /// Counterfactuals on both sides; the exact level is named.
    Exact(DiscreteLevel),
    /// True value is below this threshold level.
    Below(DiscreteLevel),
    /// True value is above this threshold level.
    Above(DiscreteLevel),
}

/// How a contiguous run of counterfactual values is phrased.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum FoilShape {
    Flag(bool),
    Single(DiscreteLevel),
    AtMost(DiscreteLevel),
    AtLeast(DiscreteLevel),
    Within(DiscreteLevel, DiscreteLevel),
}

/// A single explanatory variable of one decision, with every value that would have changed it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Explanation {
    var: ObservationVar,
    true_value: ExplainedValue,
    counterfactuals: Vec<Counterfactual>,
}

impl Explanation {
    /// `counterfactuals` must be non-empty and must not contain the true value.
    pub fn new(
        var: ObservationVar,
        true_value: ExplainedValue,
        mut counterfactuals: Vec<Counterfactual>,
    ) -> Result<Self, ContractViolation> {
        if counterfactuals.is_empty() {
            return Err(ContractViolation::InvalidValue {
                field: "explanation.counterfactuals",
                reason: "must not be empty",
            });
        }
        let same_kind = counterfactuals.iter().all(|c| {
            matches!(
                (c.value, true_value),
                (ExplainedValue::Flag(_), ExplainedValue::Flag(_))
                    | (ExplainedValue::Level(_), ExplainedValue::Level(_))
            )
        });
        if !same_kind || counterfactuals.iter().any(|c| c.value == true_value) {
            return Err(ContractViolation::InvalidValue {
                field: "explanation.counterfactuals",
                reason: "must hold values of the true value's kind other than the true value",
            });
        }
        counterfactuals.sort_by_key(|c| c.value);
        counterfactuals.dedup_by_key(|c| c.value);
        Ok(Self {
            var,
            true_value,
            counterfactuals,
        })
    }

    pub fn var(&self) -> &ObservationVar {
        &self.var
    }

    pub fn kind(&self) -> VariableKind {
        self.var.kind
    }

    pub fn person(&self) -> Option<&PersonId> {
        self.var.scope.person()
    }

    pub fn true_value(&self) -> ExplainedValue {
        self.true_value
    }

    pub fn true_level(&self) -> Option<DiscreteLevel> {
        match self.true_value {
            ExplainedValue::Level(l) => Some(l),
            ExplainedValue::Flag(_) => None,
        }
    }

    /// Sorted ascending by value.
    pub fn counterfactuals(&self) -> &[Counterfactual] {
        &self.counterfactuals
    }

    pub fn direction(&self) -> CounterfactualDirection {
        let ExplainedValue::Level(t) = self.true_value else {
            return CounterfactualDirection::Flip;
        };
        let levels = self.counterfactual_levels();
        if levels.iter().all(|l| *l > t) {
            CounterfactualDirection::Upper
        } else if levels.iter().all(|l| *l < t) {
            CounterfactualDirection::Lower
        } else {
            CounterfactualDirection::TwoSided
        }
    }

    pub fn reason_shape(&self) -> ReasonShape {
        let t = match self.true_value {
            ExplainedValue::Flag(b) => return ReasonShape::Flag(b),
            ExplainedValue::Level(t) => t,
        };
        let levels = self.counterfactual_levels();
        match (self.direction(), levels.first(), levels.last()) {
            (CounterfactualDirection::Upper, Some(lowest), _) => ReasonShape::Below(*lowest),
            (CounterfactualDirection::Lower, _, Some(highest)) => ReasonShape::Above(*highest),
            _ => ReasonShape::Exact(t),
        }
    }

    /// One shape per contiguous run of counterfactual levels, ascending.
    pub fn foil_shapes(&self) -> Vec<FoilShape> {
        if let ExplainedValue::Flag(_) = self.true_value {
            return self
                .counterfactuals
                .iter()
                .filter_map(|c| match c.value {
                    ExplainedValue::Flag(b) => Some(FoilShape::Flag(b)),
                    ExplainedValue::Level(_) => None,
                })
                .collect();
        }

        let mut runs: Vec<(DiscreteLevel, DiscreteLevel)> = Vec::new();
        for level in self.counterfactual_levels() {
            match runs.last_mut() {
                Some((_, hi)) if level_index(*hi) + 1 == level_index(level) => *hi = level,
                _ => runs.push((level, level)),
            }
        }
        runs.into_iter()
            .map(|(lo, hi)| {
                if lo == hi {
                    FoilShape::Single(lo)
                } else if lo == DiscreteLevel::LOWEST {
                    FoilShape::AtMost(hi)
                } else if hi == DiscreteLevel::HIGHEST {
                    FoilShape::AtLeast(lo)
                } else {
                    FoilShape::Within(lo, hi)
                }
            })
            .collect()
    }

    /// The counterfactual closest to the true value. Equal distances resolve to the lower value.
    pub fn nearest_counterfactual(&self) -> &Counterfactual {
        let t = match self.true_value {
            ExplainedValue::Level(t) => level_index(t),
            ExplainedValue::Flag(_) => 0,
        };
        let mut best = &self.counterfactuals[0];
        for c in &self.counterfactuals[1..] {
            if let (ExplainedValue::Level(l), ExplainedValue::Level(b)) = (c.value, best.value) {
                if level_index(l).abs_diff(t) < level_index(b).abs_diff(t) {
                    best = c;
                }
            }
        }
        best
    }

    fn counterfactual_levels(&self) -> Vec<DiscreteLevel> {
        self.counterfactuals
            .iter()
            .filter_map(|c| match c.value {
                ExplainedValue::Level(l) => Some(l),
                ExplainedValue::Flag(_) => None,
            })
            .collect()
    }
}

fn level_index(l: DiscreteLevel) -> usize {
    DiscreteLevel::ALL
        .iter()
        .position(|x| *x == l)
        .unwrap_or_default()
}

/// Searches every searchable variable of a stored decision for values that would have changed it.
#[derive(Debug, Clone, Copy, Default)]
pub struct ExplanationEngine {
    discretizer: Discretizer,
}

impl ExplanationEngine {
    pub fn new(discretizer: Discretizer) -> Self {
        Self { discretizer }
    }

    pub fn discretizer(&self) -> &Discretizer {
        &self.discretizer
    }

    /// Explains `decision` as produced by `strategy` from `state`.
    pub fn explain(
        &self,
        strategy: &DecisionStrategy,
        state: &EngageState,
        decision: &Decision,
    ) -> Result<Vec<Explanation>, ExplainError> {
        if !strategy.is_deterministic() {
            return Err(ExplainError::NotExplainable(strategy.kind()));
        }
        let decide = |s: &EngageState| -> Result<Decision, ExplainError> {
            strategy
                .decide_deterministic(s, &self.discretizer)?
                .ok_or(ExplainError::NotExplainable(strategy.kind()))
        };

        let recomputed = decide(state)?;
        if &recomputed != decision {
            return Err(ExplainError::DecisionMismatch {
                stored: decision.to_string(),
                recomputed: recomputed.to_string(),
            });
        }
        self.explain_with(state, decision, strategy.input_variables(), decide)
    }

    /// Counterfactual search against an arbitrary decision function.
    ///
    /// `Waiting` is always searched. Person variables are searched only when listed in
    /// `variables`, normalized, and observed for that person.
    pub fn explain_with<F>(
        &self,
        state: &EngageState,
        decision: &Decision,
        variables: &[VariableKind],
        decide: F,
    ) -> Result<Vec<Explanation>, ExplainError>
    where
        F: Fn(&EngageState) -> Result<Decision, ExplainError>,
    {
        let mut out = Vec::new();

        let waiting = state.waiting();
        let flipped = decide(&state.with_waiting(!waiting))?;
        if &flipped != decision {
            out.push(Explanation::new(
                ObservationVar::general(VariableKind::Waiting),
                ExplainedValue::Flag(waiting),
                vec![Counterfactual {
                    value: ExplainedValue::Flag(!waiting),
                    decision: flipped,
                }],
            )?);
        }

        for (id, features) in state.persons() {
            for kind in variables {
                let Some(feature) = kind.feature().filter(|f| f.is_normalized()) else {
                    continue;
                };
                let Some(raw) = feature.read(features) else {
                    continue;
                };
                let true_level = self.discretizer.bucket(raw);

                let mut counterfactuals = Vec::new();
                for level in self.discretizer.domain() {
                    if *level == true_level {
                        continue;
                    }
                    let varied = state.with_person_value(id, feature, level.value())?;
                    let d = decide(&varied)?;
                    if &d != decision {
                        counterfactuals.push(Counterfactual {
                            value: ExplainedValue::Level(*level),
                            decision: d,
                        });
                    }
                }
                if !counterfactuals.is_empty() {
                    out.push(Explanation::new(
                        ObservationVar::person(id.clone(), *kind),
                        ExplainedValue::Level(true_level),
                        counterfactuals,
                    )?);
                }
            }
        }
        Ok(out)
    }
}
