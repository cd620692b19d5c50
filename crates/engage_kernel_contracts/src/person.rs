#![forbid(unsafe_code)]

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::common::{validate_non_negative, validate_short_text, validate_unit_interval};
use crate::{ContractViolation, Validate};

pub const PERSON_ID_MAX_LEN: usize = 128;

/// Group membership entry name used by upstream group detection for the robot itself.
pub const ROBOT_GROUP_MEMBER: &str = "ROBOT";

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct PersonId(String);

impl PersonId {
    pub fn new(id: impl Into<String>) -> Result<Self, ContractViolation> {
        let id = PersonId(id.into());
        id.validate()?;
        Ok(id)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Validate for PersonId {
    fn validate(&self) -> Result<(), ContractViolation> {
        validate_short_text("person_id", &self.0, PERSON_ID_MAX_LEN)?;
        if self.0 == ROBOT_GROUP_MEMBER {
            return Err(ContractViolation::InvalidValue {
                field: "person_id",
                reason: "ROBOT is reserved for the robot's own group entry",
            });
        }
        Ok(())
    }
}

impl TryFrom<String> for PersonId {
    type Error = ContractViolation;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        PersonId::new(value)
    }
}

impl From<PersonId> for String {
    fn from(value: PersonId) -> Self {
        value.0
    }
}

impl fmt::Display for PersonId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum EngagementLevel {
    Unknown,
    Disengaged,
    Engaging,
    Engaged,
    Disengaging,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum MotionActivity {
    Nothing,
    Walking,
    Gesturing,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Validate for Position {
    fn validate(&self) -> Result<(), ContractViolation> {
        if !(self.x.is_finite() && self.y.is_finite() && self.z.is_finite()) {
            return Err(ContractViolation::NotFinite { field: "position" });
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct GroupId(String);

impl GroupId {
    pub fn new(id: impl Into<String>) -> Result<Self, ContractViolation> {
        let id = GroupId(id.into());
        validate_short_text("group_id", &id.0, 128)?;
        Ok(id)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Latest known feature values for one tracked person.
///
/// Every field is `None` until its upstream signal has been observed at least once.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct PersonFeatures {
    pub engagement_level: Option<EngagementLevel>,
    pub engagement_level_confidence: Option<f64>,
    pub motion: Option<MotionActivity>,
    pub motion_confidence: Option<f64>,
    pub position: Option<Position>,
    pub group_id: Option<GroupId>,
    pub group_confidence: Option<f64>,
    pub distance: Option<f64>,
    pub mutual_gaze: Option<f64>,
    pub engagement_value: Option<f64>,
    pub pose_confidence: Option<f64>,
}

impl Validate for PersonFeatures {
    fn validate(&self) -> Result<(), ContractViolation> {
        let unit = [
            (
                "person_features.engagement_level_confidence",
                self.engagement_level_confidence,
            ),
            ("person_features.motion_confidence", self.motion_confidence),
            ("person_features.group_confidence", self.group_confidence),
            ("person_features.mutual_gaze", self.mutual_gaze),
            ("person_features.engagement_value", self.engagement_value),
            ("person_features.pose_confidence", self.pose_confidence),
        ];
        for (field, v) in unit {
            if let Some(v) = v {
                validate_unit_interval(field, v)?;
            }
        }
        if let Some(d) = self.distance {
            validate_non_negative("person_features.distance", d)?;
        }
        if let Some(p) = &self.position {
            p.validate()?;
        }
        Ok(())
    }
}

/// One asynchronous upstream signal for a single person.
///
/// Each variant is applied as one atomic write; the body-signal pair arrives time-synchronised.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum FeatureUpdate {
    BodySignals {
        engagement_level: EngagementLevel,
        engagement_level_confidence: f64,
        motion: MotionActivity,
        motion_confidence: f64,
    },
    Position(Position),
    Group {
        group_id: GroupId,
        confidence: f64,
    },
    RobotRelative {
        distance: f64,
        mutual_gaze: f64,
        engagement_value: f64,
        pose_confidence: f64,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum FeatureChannel {
    BodySignals,
    Position,
    Group,
    RobotRelative,
}

impl FeatureUpdate {
    pub fn channel(&self) -> FeatureChannel {
        match self {
            FeatureUpdate::BodySignals { .. } => FeatureChannel::BodySignals,
            FeatureUpdate::Position(_) => FeatureChannel::Position,
            FeatureUpdate::Group { .. } => FeatureChannel::Group,
            FeatureUpdate::RobotRelative { .. } => FeatureChannel::RobotRelative,
        }
    }

    pub fn apply_to(&self, f: &mut PersonFeatures) {
        match self {
            FeatureUpdate::BodySignals {
                engagement_level,
                engagement_level_confidence,
                motion,
                motion_confidence,
            } => {
                f.engagement_level = Some(*engagement_level);
                f.engagement_level_confidence = Some(*engagement_level_confidence);
                f.motion = Some(*motion);
                f.motion_confidence = Some(*motion_confidence);
            }
            FeatureUpdate::Position(p) => f.position = Some(*p),
            FeatureUpdate::Group {
                group_id,
                confidence,
            } => {
                f.group_id = Some(group_id.clone());
                f.group_confidence = Some(*confidence);
            }
            FeatureUpdate::RobotRelative {
                distance,
                mutual_gaze,
                engagement_value,
                pose_confidence,
            } => {
                f.distance = Some(*distance);
                f.mutual_gaze = Some(*mutual_gaze);
                f.engagement_value = Some(*engagement_value);
                f.pose_confidence = Some(*pose_confidence);
            }
        }
    }
}

impl Validate for FeatureUpdate {
    fn validate(&self) -> Result<(), ContractViolation> {
        match self {
            FeatureUpdate::BodySignals {
                engagement_level_confidence,
                motion_confidence,
                ..
            } => {
                validate_unit_interval(
                    "feature_update.engagement_level_confidence",
                    *engagement_level_confidence,
                )?;
                validate_unit_interval("feature_update.motion_confidence", *motion_confidence)
            }
            FeatureUpdate::Position(p) => p.validate(),
            FeatureUpdate::Group { confidence, .. } => {
                validate_unit_interval("feature_update.group_confidence", *confidence)
            }
            FeatureUpdate::RobotRelative {
                distance,
                mutual_gaze,
                engagement_value,
                pose_confidence,
            } => {
                validate_non_negative("feature_update.distance", *distance)?;
                validate_unit_interval("feature_update.mutual_gaze", *mutual_gaze)?;
                validate_unit_interval("feature_update.engagement_value", *engagement_value)?;
                validate_unit_interval("feature_update.pose_confidence", *pose_confidence)
            }
        }
    }
}
