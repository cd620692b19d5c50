#![forbid(unsafe_code)]

use std::collections::BTreeMap;

use serde::{Deserialize, Deserializer, Serialize};

use crate::person::{GroupId, PersonFeatures, PersonId};
use crate::{ContractViolation, MonotonicTimeNs, SchemaVersion, Validate};

pub const ENGAGE_STATE_CONTRACT_VERSION: SchemaVersion = SchemaVersion(1);

pub const ENGAGE_STATE_MAX_PERSONS: usize = 64;

/// Continuous per-person features that can be read and overridden by name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ContinuousFeature {
    EngagementLevelConfidence,
    MotionConfidence,
    GroupConfidence,
    Distance,
    MutualGaze,
    EngagementValue,
    PoseConfidence,
}

impl ContinuousFeature {
    pub const ALL: [ContinuousFeature; 7] = [
        ContinuousFeature::EngagementLevelConfidence,
        ContinuousFeature::MotionConfidence,
        ContinuousFeature::GroupConfidence,
        ContinuousFeature::Distance,
        ContinuousFeature::MutualGaze,
        ContinuousFeature::EngagementValue,
        ContinuousFeature::PoseConfidence,
    ];

    /// Whether the feature lives in [0, 1]. Distance is metric.
    pub fn is_normalized(self) -> bool {
        !matches!(self, ContinuousFeature::Distance)
    }

    pub fn read(self, f: &PersonFeatures) -> Option<f64> {
        match self {
            ContinuousFeature::EngagementLevelConfidence => f.engagement_level_confidence,
            ContinuousFeature::MotionConfidence => f.motion_confidence,
            ContinuousFeature::GroupConfidence => f.group_confidence,
            ContinuousFeature::Distance => f.distance,
            ContinuousFeature::MutualGaze => f.mutual_gaze,
            ContinuousFeature::EngagementValue => f.engagement_value,
            ContinuousFeature::PoseConfidence => f.pose_confidence,
        }
    }

    fn slot(self, f: &mut PersonFeatures) -> &mut Option<f64> {
        match self {
            ContinuousFeature::EngagementLevelConfidence => &mut f.engagement_level_confidence,
            ContinuousFeature::MotionConfidence => &mut f.motion_confidence,
            ContinuousFeature::GroupConfidence => &mut f.group_confidence,
            ContinuousFeature::Distance => &mut f.distance,
            ContinuousFeature::MutualGaze => &mut f.mutual_gaze,
            ContinuousFeature::EngagementValue => &mut f.engagement_value,
            ContinuousFeature::PoseConfidence => &mut f.pose_confidence,
        }
    }
}

/// Immutable snapshot of everything the decision maker may look at.
///
/// Built fresh on every aggregation trigger. Variations for counterfactual search are new
/// snapshots produced by the `with_*` methods; the original is never touched.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EngageState {
    schema_version: SchemaVersion,
    timestamp: MonotonicTimeNs,
    persons: BTreeMap<PersonId, PersonFeatures>,
    robot_group: Option<GroupId>,
    waiting: bool,
}

#[derive(Deserialize)]
struct EngageStateWire {
    schema_version: SchemaVersion,
    timestamp: MonotonicTimeNs,
    persons: BTreeMap<PersonId, PersonFeatures>,
    robot_group: Option<GroupId>,
    waiting: bool,
}

impl<'de> Deserialize<'de> for EngageState {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let w = EngageStateWire::deserialize(deserializer)?;
        let s = Self {
            schema_version: w.schema_version,
            timestamp: w.timestamp,
            persons: w.persons,
            robot_group: w.robot_group,
            waiting: w.waiting,
        };
        s.validate().map_err(serde::de::Error::custom)?;
        Ok(s)
    }
}

impl EngageState {
    pub fn v1(
        timestamp: MonotonicTimeNs,
        persons: BTreeMap<PersonId, PersonFeatures>,
        robot_group: Option<GroupId>,
        waiting: bool,
    ) -> Result<Self, ContractViolation> {
        let s = Self {
            schema_version: ENGAGE_STATE_CONTRACT_VERSION,
            timestamp,
            persons,
            robot_group,
            waiting,
        };
        s.validate()?;
        Ok(s)
    }

    pub fn empty(timestamp: MonotonicTimeNs, waiting: bool) -> Self {
        Self {
            schema_version: ENGAGE_STATE_CONTRACT_VERSION,
            timestamp,
            persons: BTreeMap::new(),
            robot_group: None,
            waiting,
        }
    }

    pub fn schema_version(&self) -> SchemaVersion {
        self.schema_version
    }

    pub fn timestamp(&self) -> MonotonicTimeNs {
        self.timestamp
    }

    pub fn waiting(&self) -> bool {
        self.waiting
    }

    pub fn robot_group(&self) -> Option<&GroupId> {
        self.robot_group.as_ref()
    }

    pub fn persons(&self) -> &BTreeMap<PersonId, PersonFeatures> {
        &self.persons
    }

    pub fn person(&self, id: &PersonId) -> Option<&PersonFeatures> {
        self.persons.get(id)
    }

    pub fn person_ids(&self) -> impl Iterator<Item = &PersonId> {
        self.persons.keys()
    }

    pub fn contains(&self, id: &PersonId) -> bool {
        self.persons.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.persons.len()
    }

    pub fn is_empty(&self) -> bool {
        self.persons.is_empty()
    }

    pub fn with_waiting(&self, waiting: bool) -> Self {
        let mut s = self.clone();
        s.waiting = waiting;
        s
    }

    pub fn with_person_value(
        &self,
        id: &PersonId,
        feature: ContinuousFeature,
        value: f64,
    ) -> Result<Self, ContractViolation> {
        let mut s = self.clone();
        let features = s
            .persons
            .get_mut(id)
            .ok_or(ContractViolation::InvalidValue {
                field: "engage_state.persons",
                reason: "override target must be present in the snapshot",
            })?;
        *feature.slot(features) = Some(value);
        features.validate()?;
        Ok(s)
    }
}

impl Validate for EngageState {
    fn validate(&self) -> Result<(), ContractViolation> {
        if self.schema_version != ENGAGE_STATE_CONTRACT_VERSION {
            return Err(ContractViolation::InvalidValue {
                field: "engage_state.schema_version",
                reason: "must match ENGAGE_STATE_CONTRACT_VERSION",
            });
        }
        if self.persons.len() > ENGAGE_STATE_MAX_PERSONS {
            return Err(ContractViolation::InvalidValue {
                field: "engage_state.persons",
                reason: "must be <= ENGAGE_STATE_MAX_PERSONS entries",
            });
        }
        for (id, f) in &self.persons {
            id.validate()?;
            f.validate()?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn person(id: &str) -> PersonId {
        PersonId::new(id).unwrap()
    }

    fn two_person_state() -> EngageState {
        let mut persons = BTreeMap::new();
        persons.insert(
            person("A"),
            PersonFeatures {
                engagement_value: Some(0.2),
                ..PersonFeatures::default()
            },
        );
        persons.insert(person("B"), PersonFeatures::default());
        EngageState::v1(MonotonicTimeNs(10), persons, None, false).unwrap()
    }

    #[test]
    fn override_returns_new_snapshot_and_leaves_original() {
        let s = two_person_state();
        let v = s
            .with_person_value(&person("B"), ContinuousFeature::MutualGaze, 1.0)
            .unwrap();
        assert_eq!(s.person(&person("B")).unwrap().mutual_gaze, None);
        assert_eq!(v.person(&person("B")).unwrap().mutual_gaze, Some(1.0));
    }

    #[test]
    fn override_rejects_unknown_person_and_out_of_range() {
        let s = two_person_state();
        assert!(s
            .with_person_value(&person("Z"), ContinuousFeature::MutualGaze, 0.5)
            .is_err());
        assert!(s
            .with_person_value(&person("A"), ContinuousFeature::EngagementValue, 2.0)
            .is_err());
    }

    #[test]
    fn absent_values_survive_serde_as_absent() {
        let s = two_person_state();
        let json = serde_json::to_string(&s).unwrap();
        let back: EngageState = serde_json::from_str(&json).unwrap();
        assert_eq!(back.person(&person("B")).unwrap().engagement_value, None);
        assert_eq!(back, s);
    }
}
