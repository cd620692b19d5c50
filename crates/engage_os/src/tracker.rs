#![forbid(unsafe_code)]

use std::collections::{BTreeMap, BTreeSet};

use engage_kernel_contracts::person::{
    FeatureChannel, FeatureUpdate, GroupId, PersonFeatures, PersonId, Position, ROBOT_GROUP_MEMBER,
};
use engage_kernel_contracts::{
    validate_unit_interval, ContractViolation, MonotonicTimeNs, Validate,
};
use tracing::{debug, info};

pub mod reason_codes {
    use engage_kernel_contracts::ReasonCodeId;

    pub const TRACKER_ORPHAN_UPDATE_DROPPED: ReasonCodeId = ReasonCodeId(0x5452_0001);
    pub const TRACKER_STALE_UPDATE_DROPPED: ReasonCodeId = ReasonCodeId(0x5452_0002);
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    pub added: Vec<PersonId>,
    pub removed: Vec<PersonId>,
}

impl ReconcileReport {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateOutcome {
    Applied,
    /// The id is not tracked (any more).
    DroppedOrphan,
    /// Older than the last update applied on the same channel.
    DroppedStale,
    /// Not about the robot, nothing to record.
    Ignored,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TrackerDiagnostics {
    pub persons_added: u64,
    pub persons_removed: u64,
    pub orphan_updates_dropped: u64,
    pub stale_updates_dropped: u64,
}

/// Engagement message between two parties. An empty id stands for the robot.
#[derive(Debug, Clone, PartialEq)]
pub struct PairwiseEngagement {
    pub person_a: String,
    pub person_b: String,
    pub distance: f64,
    pub mutual_gaze: f64,
    pub engagement_value: f64,
    pub confidence_a: f64,
    pub confidence_b: f64,
}

/// Group membership message. The member `ROBOT` is the robot itself.
#[derive(Debug, Clone, PartialEq)]
pub struct GroupMessage {
    pub group_id: GroupId,
    pub members: Vec<String>,
    pub confidences: Vec<f64>,
}

#[derive(Debug, Clone, Default, PartialEq)]
struct PersonRecord {
    features: PersonFeatures,
    last_update: BTreeMap<FeatureChannel, MonotonicTimeNs>,
}

/// Sole owner of per-person records while their ids are tracked.
#[derive(Debug, Clone, Default)]
pub struct PersonTracker {
    persons: BTreeMap<PersonId, PersonRecord>,
    robot_group: Option<(GroupId, f64)>,
    diagnostics: TrackerDiagnostics,
}

impl PersonTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes the tracked set equal to `tracked`. Records of unchanged ids are left untouched.
    pub fn reconcile<I>(&mut self, tracked: I) -> ReconcileReport
    where
        I: IntoIterator<Item = PersonId>,
    {
        let tracked: BTreeSet<PersonId> = tracked.into_iter().collect();

        let removed: Vec<PersonId> = self
            .persons
            .keys()
            .filter(|id| !tracked.contains(*id))
            .cloned()
            .collect();
        for id in &removed {
            self.persons.remove(id);
            info!(person = %id, "person left tracking");
        }

        let mut added = Vec::new();
        for id in tracked {
            if !self.persons.contains_key(&id) {
                info!(person = %id, "person entered tracking");
                self.persons.insert(id.clone(), PersonRecord::default());
                added.push(id);
            }
        }

        self.diagnostics.persons_added += added.len() as u64;
        self.diagnostics.persons_removed += removed.len() as u64;
        ReconcileReport { added, removed }
    }

    /// Applies one channel update.
    ///
    /// Invalid values are rejected; orphans and stale updates are dropped.
    pub fn update_feature(
        &mut self,
        id: &PersonId,
        update: FeatureUpdate,
        timestamp: MonotonicTimeNs,
    ) -> Result<UpdateOutcome, ContractViolation> {
        update.validate()?;
        let Some(record) = self.persons.get_mut(id) else {
            self.diagnostics.orphan_updates_dropped += 1;
            debug!(
                person = %id,
                reason_code = reason_codes::TRACKER_ORPHAN_UPDATE_DROPPED.0,
                "dropping update for untracked person"
            );
            return Ok(UpdateOutcome::DroppedOrphan);
        };

        let channel = update.channel();
        if record
            .last_update
            .get(&channel)
            .is_some_and(|last| timestamp < *last)
        {
            self.diagnostics.stale_updates_dropped += 1;
            debug!(
                person = %id,
                ?channel,
                reason_code = reason_codes::TRACKER_STALE_UPDATE_DROPPED.0,
                "dropping out-of-order update"
            );
            return Ok(UpdateOutcome::DroppedStale);
        }

        update.apply_to(&mut record.features);
        record.last_update.insert(channel, timestamp);
        Ok(UpdateOutcome::Applied)
    }

    /// Routes a pairwise engagement message; only robot-relative ones are recorded.
    pub fn apply_engagement(
        &mut self,
        msg: &PairwiseEngagement,
        timestamp: MonotonicTimeNs,
    ) -> Result<UpdateOutcome, ContractViolation> {
        let (id, pose_confidence) = match (msg.person_a.is_empty(), msg.person_b.is_empty()) {
            (true, false) => (msg.person_b.as_str(), msg.confidence_b),
            (false, true) => (msg.person_a.as_str(), msg.confidence_a),
            _ => return Ok(UpdateOutcome::Ignored),
        };
        let id = PersonId::new(id)?;
        self.update_feature(
            &id,
            FeatureUpdate::RobotRelative {
                distance: msg.distance,
                mutual_gaze: msg.mutual_gaze,
                engagement_value: msg.engagement_value,
                pose_confidence,
            },
            timestamp,
        )
    }

    /// Position follows the nose keypoint; poses without one leave the last position in place.
    pub fn apply_nose_keypoint(
        &mut self,
        id: &PersonId,
        nose: Option<Position>,
        timestamp: MonotonicTimeNs,
    ) -> Result<UpdateOutcome, ContractViolation> {
        match nose {
            Some(p) => self.update_feature(id, FeatureUpdate::Position(p), timestamp),
            None => Ok(UpdateOutcome::Ignored),
        }
    }

    /// Applies a group message to every listed member that is tracked, and to the robot.
    pub fn apply_group(
        &mut self,
        msg: &GroupMessage,
        timestamp: MonotonicTimeNs,
    ) -> Result<Vec<UpdateOutcome>, ContractViolation> {
        if msg.members.len() != msg.confidences.len() {
            return Err(ContractViolation::InvalidValue {
                field: "group_message.confidences",
                reason: "must have one entry per member",
            });
        }
        // Validate the whole message before touching any record.
        let mut updates = Vec::with_capacity(msg.members.len());
        for (member, confidence) in msg.members.iter().zip(&msg.confidences) {
            validate_unit_interval("group_message.confidences", *confidence)?;
            let target = if member == ROBOT_GROUP_MEMBER {
                None
            } else {
                Some(PersonId::new(member.as_str())?)
            };
            updates.push((target, *confidence));
        }

        let mut out = Vec::with_capacity(updates.len());
        for (target, confidence) in updates {
            let Some(id) = target else {
                self.robot_group = Some((msg.group_id.clone(), confidence));
                out.push(UpdateOutcome::Applied);
                continue;
            };
            out.push(self.update_feature(
                &id,
                FeatureUpdate::Group {
                    group_id: msg.group_id.clone(),
                    confidence,
                },
                timestamp,
            )?);
        }
        Ok(out)
    }

    pub fn features(&self, id: &PersonId) -> Option<&PersonFeatures> {
        self.persons.get(id).map(|r| &r.features)
    }

    /// Current values of every tracked person, cloned.
    pub fn snapshot_features(&self) -> BTreeMap<PersonId, PersonFeatures> {
        self.persons
            .iter()
            .map(|(id, r)| (id.clone(), r.features.clone()))
            .collect()
    }

    pub fn robot_group(&self) -> Option<&GroupId> {
        self.robot_group.as_ref().map(|(g, _)| g)
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

    pub fn diagnostics(&self) -> TrackerDiagnostics {
        self.diagnostics
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pid(s: &str) -> PersonId {
        PersonId::new(s).unwrap()
    }

    fn robot_relative(ev: f64) -> FeatureUpdate {
        FeatureUpdate::RobotRelative {
            distance: 1.5,
            mutual_gaze: 0.4,
            engagement_value: ev,
            pose_confidence: 0.9,
        }
    }

    #[test]
    fn at_track_01_reconcile_reports_additions_and_removals() {
        let mut t = PersonTracker::new();
        let r = t.reconcile([pid("A"), pid("B")]);
        assert_eq!(r.added, vec![pid("A"), pid("B")]);
        assert!(r.removed.is_empty());

        let r = t.reconcile([pid("B"), pid("C")]);
        assert_eq!(r.added, vec![pid("C")]);
        assert_eq!(r.removed, vec![pid("A")]);
        assert_eq!(t.person_ids().cloned().collect::<Vec<_>>(), vec![pid("B"), pid("C")]);
    }

    #[test]
    fn at_track_02_reconcile_same_set_is_a_no_op() {
        let mut t = PersonTracker::new();
        t.reconcile([pid("A"), pid("B")]);
        t.update_feature(&pid("A"), robot_relative(0.7), MonotonicTimeNs(5))
            .unwrap();
        let before = t.snapshot_features();

        let r = t.reconcile([pid("B"), pid("A")]);
        assert!(r.is_empty());
        assert_eq!(t.snapshot_features(), before);
    }

    #[test]
    fn at_track_03_orphan_and_stale_updates_are_dropped_and_counted() {
        let mut t = PersonTracker::new();
        t.reconcile([pid("A")]);
        assert_eq!(
            t.update_feature(&pid("Z"), robot_relative(0.5), MonotonicTimeNs(1))
                .unwrap(),
            UpdateOutcome::DroppedOrphan
        );
        assert_eq!(
            t.update_feature(&pid("A"), robot_relative(0.5), MonotonicTimeNs(10))
                .unwrap(),
            UpdateOutcome::Applied
        );
        assert_eq!(
            t.update_feature(&pid("A"), robot_relative(0.9), MonotonicTimeNs(9))
                .unwrap(),
            UpdateOutcome::DroppedStale
        );
        assert_eq!(t.features(&pid("A")).unwrap().engagement_value, Some(0.5));

        let d = t.diagnostics();
        assert_eq!(d.orphan_updates_dropped, 1);
        assert_eq!(d.stale_updates_dropped, 1);
    }

    #[test]
    fn at_track_04_removed_person_forgets_its_values() {
        let mut t = PersonTracker::new();
        t.reconcile([pid("A")]);
        t.update_feature(&pid("A"), robot_relative(0.5), MonotonicTimeNs(10))
            .unwrap();
        t.reconcile([]);
        t.reconcile([pid("A")]);
        assert_eq!(t.features(&pid("A")), Some(&PersonFeatures::default()));
    }

    #[test]
    fn engagement_messages_route_by_empty_party() {
        let mut t = PersonTracker::new();
        t.reconcile([pid("A"), pid("B")]);
        let mut msg = PairwiseEngagement {
            person_a: String::new(),
            person_b: "B".to_string(),
            distance: 2.0,
            mutual_gaze: 0.3,
            engagement_value: 0.6,
            confidence_a: 0.1,
            confidence_b: 0.8,
        };
        assert_eq!(
            t.apply_engagement(&msg, MonotonicTimeNs(1)).unwrap(),
            UpdateOutcome::Applied
        );
        let b = t.features(&pid("B")).unwrap();
        assert_eq!(b.pose_confidence, Some(0.8));
        assert_eq!(b.distance, Some(2.0));

        msg.person_a = "A".to_string();
        assert_eq!(
            t.apply_engagement(&msg, MonotonicTimeNs(2)).unwrap(),
            UpdateOutcome::Ignored
        );
    }

    #[test]
    fn poses_without_nose_keep_last_position() {
        let mut t = PersonTracker::new();
        t.reconcile([pid("A")]);
        let nose = Position {
            x: 1.0,
            y: 0.5,
            z: 1.6,
        };
        t.apply_nose_keypoint(&pid("A"), Some(nose), MonotonicTimeNs(1))
            .unwrap();
        assert_eq!(
            t.apply_nose_keypoint(&pid("A"), None, MonotonicTimeNs(2))
                .unwrap(),
            UpdateOutcome::Ignored
        );
        assert_eq!(t.features(&pid("A")).unwrap().position, Some(nose));
    }

    #[test]
    fn robot_group_membership_is_kept_apart() {
        let mut t = PersonTracker::new();
        t.reconcile([pid("A")]);
        let msg = GroupMessage {
            group_id: GroupId::new("g1").unwrap(),
            members: vec!["ROBOT".to_string(), "A".to_string(), "Q".to_string()],
            confidences: vec![0.9, 0.8, 0.7],
        };
        let outcomes = t.apply_group(&msg, MonotonicTimeNs(3)).unwrap();
        assert_eq!(
            outcomes,
            vec![
                UpdateOutcome::Applied,
                UpdateOutcome::Applied,
                UpdateOutcome::DroppedOrphan
            ]
        );
        assert_eq!(t.robot_group().map(GroupId::as_str), Some("g1"));
        assert_eq!(t.features(&pid("A")).unwrap().group_confidence, Some(0.8));
        assert!(PersonId::new("ROBOT").is_err());
        assert_eq!(t.len(), 1);
    }

    #[test]
    fn group_message_with_a_bad_member_changes_nothing() {
        let mut t = PersonTracker::new();
        t.reconcile([pid("A")]);
        let before = t.snapshot_features();
        for members in [
            vec!["ROBOT".to_string(), "A".to_string(), String::new()],
            vec!["A".to_string(), "x".repeat(129)],
        ] {
            let confidences = vec![0.5; members.len()];
            let msg = GroupMessage {
                group_id: GroupId::new("g2").unwrap(),
                members,
                confidences,
            };
            assert!(t.apply_group(&msg, MonotonicTimeNs(4)).is_err());
        }
        let bad_confidence = GroupMessage {
            group_id: GroupId::new("g2").unwrap(),
            members: vec!["A".to_string(), "ROBOT".to_string()],
            confidences: vec![0.5, 1.5],
        };
        assert!(t.apply_group(&bad_confidence, MonotonicTimeNs(4)).is_err());

        assert_eq!(t.snapshot_features(), before);
        assert_eq!(t.robot_group(), None);
    }
}
