#![forbid(unsafe_code)]

use std::collections::BTreeMap;
use std::fmt;

use engage_kernel_contracts::person::{EngagementLevel, MotionActivity, PersonId};
use engage_kernel_contracts::state::{ContinuousFeature, EngageState};
use serde::{Deserialize, Serialize};

use crate::discretize::{DiscreteLevel, Discretizer};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum VariableKind {
    Waiting,
    EngagementLevel,
    EngagementLevelConfidence,
    Motion,
    MotionConfidence,
    Group,
    GroupConfidence,
    Distance,
    MutualGaze,
    EngagementValue,
    PoseConfidence,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum VariableCategory {
    Categorical,
    Continuous,
}

impl VariableKind {
    pub const PERSON_VARIABLES: [VariableKind; 10] = [
        VariableKind::EngagementLevel,
        VariableKind::EngagementLevelConfidence,
        VariableKind::Motion,
        VariableKind::MotionConfidence,
        VariableKind::Group,
        VariableKind::GroupConfidence,
        VariableKind::Distance,
        VariableKind::MutualGaze,
        VariableKind::EngagementValue,
        VariableKind::PoseConfidence,
    ];

    /// Human-facing variable name.
    pub fn name(self) -> &'static str {
        match self {
            VariableKind::Waiting => "Waiting",
            VariableKind::EngagementLevel => "Engagement Level",
            VariableKind::EngagementLevelConfidence => "Engagement Level Confidence",
            VariableKind::Motion => "Motion",
            VariableKind::MotionConfidence => "Motion Confidence",
            VariableKind::Group => "Group",
            VariableKind::GroupConfidence => "Group Confidence",
            VariableKind::Distance => "Distance",
            VariableKind::MutualGaze => "Mutual Gaze",
            VariableKind::EngagementValue => "Engagement Value",
            VariableKind::PoseConfidence => "Pose Estimation Confidence",
        }
    }

    /// Stable snake_case key used in template tables.
    pub fn slug(self) -> &'static str {
        match self {
            VariableKind::Waiting => "waiting",
            VariableKind::EngagementLevel => "engagement_level",
            VariableKind::EngagementLevelConfidence => "engagement_level_confidence",
            VariableKind::Motion => "motion",
            VariableKind::MotionConfidence => "motion_confidence",
            VariableKind::Group => "group",
            VariableKind::GroupConfidence => "group_confidence",
            VariableKind::Distance => "distance",
            VariableKind::MutualGaze => "mutual_gaze",
            VariableKind::EngagementValue => "engagement_value",
            VariableKind::PoseConfidence => "pose_confidence",
        }
    }

    pub fn category(self) -> VariableCategory {
        match self {
            VariableKind::Waiting
            | VariableKind::EngagementLevel
            | VariableKind::Motion
            | VariableKind::Group => VariableCategory::Categorical,
            _ => VariableCategory::Continuous,
        }
    }

    pub fn feature(self) -> Option<ContinuousFeature> {
        match self {
            VariableKind::EngagementLevelConfidence => {
                Some(ContinuousFeature::EngagementLevelConfidence)
            }
            VariableKind::MotionConfidence => Some(ContinuousFeature::MotionConfidence),
            VariableKind::GroupConfidence => Some(ContinuousFeature::GroupConfidence),
            VariableKind::Distance => Some(ContinuousFeature::Distance),
            VariableKind::MutualGaze => Some(ContinuousFeature::MutualGaze),
            VariableKind::EngagementValue => Some(ContinuousFeature::EngagementValue),
            VariableKind::PoseConfidence => Some(ContinuousFeature::PoseConfidence),
            _ => None,
        }
    }

    pub fn is_confidence(self) -> bool {
        matches!(
            self,
            VariableKind::EngagementLevelConfidence
                | VariableKind::MotionConfidence
                | VariableKind::GroupConfidence
                | VariableKind::PoseConfidence
        )
    }
}

impl fmt::Display for VariableKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Who a variable is about. `General` variables describe the robot or the scene.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum VariableScope {
    General,
    Person(PersonId),
}

impl VariableScope {
    pub fn person(&self) -> Option<&PersonId> {
        match self {
            VariableScope::General => None,
            VariableScope::Person(p) => Some(p),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ObservationVar {
    pub scope: VariableScope,
    pub kind: VariableKind,
}

impl ObservationVar {
    pub fn general(kind: VariableKind) -> Self {
        Self {
            scope: VariableScope::General,
            kind,
        }
    }

    pub fn person(id: PersonId, kind: VariableKind) -> Self {
        Self {
            scope: VariableScope::Person(id),
            kind,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ObservedValue {
    Absent,
    Flag(bool),
    EngagementLevel(EngagementLevel),
    Motion(MotionActivity),
    Group(String),
    Level { raw: f64, level: DiscreteLevel },
    /// Metric continuous value, rounded to one decimal.
    Metric(f64),
}

impl ObservedValue {
    pub fn level(&self) -> Option<DiscreteLevel> {
        match self {
            ObservedValue::Level { level, .. } => Some(*level),
            _ => None,
        }
    }

    pub fn is_absent(&self) -> bool {
        matches!(self, ObservedValue::Absent)
    }
}

/// Per-variable qualitative view of one snapshot.
#[derive(Debug, Clone, PartialEq)]
pub struct DiscretizedObservation {
    values: BTreeMap<ObservationVar, ObservedValue>,
}

impl DiscretizedObservation {
    pub fn from_state(state: &EngageState, discretizer: &Discretizer) -> Self {
        let mut values = BTreeMap::new();
        values.insert(
            ObservationVar::general(VariableKind::Waiting),
            ObservedValue::Flag(state.waiting()),
        );
        for (id, f) in state.persons() {
            for kind in VariableKind::PERSON_VARIABLES {
                let v = match kind {
                    VariableKind::EngagementLevel => f
                        .engagement_level
                        .map_or(ObservedValue::Absent, ObservedValue::EngagementLevel),
                    VariableKind::Motion => {
                        f.motion.map_or(ObservedValue::Absent, ObservedValue::Motion)
                    }
                    VariableKind::Group => f
                        .group_id
                        .as_ref()
                        .map_or(ObservedValue::Absent, |g| {
                            ObservedValue::Group(g.as_str().to_string())
                        }),
                    _ => match kind.feature() {
                        Some(feature) => match feature.read(f) {
                            None => ObservedValue::Absent,
                            Some(raw) if feature.is_normalized() => ObservedValue::Level {
                                raw,
                                level: discretizer.bucket(raw),
                            },
                            Some(raw) => ObservedValue::Metric((raw * 10.0).round() / 10.0),
                        },
                        None => ObservedValue::Absent,
                    },
                };
                values.insert(ObservationVar::person(id.clone(), kind), v);
            }
        }
        Self { values }
    }

    pub fn get(&self, var: &ObservationVar) -> Option<&ObservedValue> {
        self.values.get(var)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&ObservationVar, &ObservedValue)> {
        self.values.iter()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use engage_kernel_contracts::person::PersonFeatures;
    use engage_kernel_contracts::MonotonicTimeNs;

    use super::*;

    #[test]
    fn observation_marks_unobserved_values_absent() {
        let a = PersonId::new("A").unwrap();
        let mut persons = BTreeMap::new();
        persons.insert(
            a.clone(),
            PersonFeatures {
                mutual_gaze: Some(0.7),
                distance: Some(1.26),
                ..PersonFeatures::default()
            },
        );
        let state = EngageState::v1(MonotonicTimeNs(1), persons, None, true).unwrap();
        let obs = DiscretizedObservation::from_state(&state, &Discretizer::mvp_v1());

        assert_eq!(
            obs.get(&ObservationVar::general(VariableKind::Waiting)),
            Some(&ObservedValue::Flag(true))
        );
        assert_eq!(
            obs.get(&ObservationVar::person(a.clone(), VariableKind::MutualGaze))
                .and_then(ObservedValue::level),
            Some(DiscreteLevel::High)
        );
        assert_eq!(
            obs.get(&ObservationVar::person(a.clone(), VariableKind::Distance)),
            Some(&ObservedValue::Metric(1.3))
        );
        assert!(obs
            .get(&ObservationVar::person(a, VariableKind::EngagementValue))
            .unwrap()
            .is_absent());
        assert_eq!(obs.len(), 1 + VariableKind::PERSON_VARIABLES.len());
    }

    #[test]
    fn categories_follow_variable_kind() {
        assert_eq!(VariableKind::Waiting.category(), VariableCategory::Categorical);
        assert_eq!(VariableKind::MutualGaze.category(), VariableCategory::Continuous);
        assert_eq!(VariableKind::PoseConfidence.name(), "Pose Estimation Confidence");
    }
}
