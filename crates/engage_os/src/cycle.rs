#![forbid(unsafe_code)]

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use engage_engines::decision::{DecisionEngine, DecisionError};
use engage_kernel_contracts::decision::DecisionStateRecord;
use engage_kernel_contracts::person::PersonId;
use engage_kernel_contracts::state::ENGAGE_STATE_MAX_PERSONS;
use engage_kernel_contracts::{ContractViolation, MonotonicTimeNs, ReasonCodeId};
use engage_storage::ledger::{DecisionStateId, DecisionStateLedger, StorageError};
use engage_storage::repo::DecisionStateRepo;
use tracing::{debug, error, info, warn};

use crate::aggregator::StateAggregator;
use crate::robot::{InteractionGate, RobotCommandAdapter, RobotCommandError};
use crate::tracker::{PersonTracker, ReconcileReport};

pub mod reason_codes {
    use engage_kernel_contracts::ReasonCodeId;

    pub const CYCLE_TRIGGER_DROPPED_BUSY: ReasonCodeId = ReasonCodeId(0x4359_0001);
    pub const CYCLE_ROBOT_COMMAND_FAILED: ReasonCodeId = ReasonCodeId(0x4359_0002);
    pub const CYCLE_ROBOT_COMMAND_DISABLED: ReasonCodeId = ReasonCodeId(0x4359_0003);
    pub const CYCLE_INTERACTION_PAUSED: ReasonCodeId = ReasonCodeId(0x4359_0004);
    pub const CYCLE_TRACKED_IDS_OVER_CAPACITY: ReasonCodeId = ReasonCodeId(0x4359_0005);
    pub const CYCLE_CONTRACT_BROKEN: ReasonCodeId = ReasonCodeId(0x4359_0006);
    pub const CYCLE_FAILED: ReasonCodeId = ReasonCodeId(0x4359_0007);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CycleConfig {
    /// Forward decisions to the robot at all.
    pub robot_command: bool,
}

impl CycleConfig {
    pub fn mvp_v1() -> Self {
        Self {
            robot_command: true,
        }
    }
}

/// Fatal cycle failures. Robot delivery problems are not among them.
#[derive(Debug, thiserror::Error)]
pub enum CycleError {
    #[error("snapshot or record rejected: {0}")]
    Contract(#[from] ContractViolation),
    #[error(transparent)]
    Decision(#[from] DecisionError),
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error("{0} lock poisoned")]
    LockPoisoned(&'static str),
}

impl CycleError {
    /// The snapshot, the decision or the record broke a contract; a defect, not bad luck.
    pub fn is_contract_failure(&self) -> bool {
        matches!(self, CycleError::Contract(_) | CycleError::Decision(_))
    }

    pub fn reason_code(&self) -> ReasonCodeId {
        if self.is_contract_failure() {
            reason_codes::CYCLE_CONTRACT_BROKEN
        } else {
            reason_codes::CYCLE_FAILED
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchStatus {
    Executed,
    Failed(RobotCommandError),
    Skipped(ReasonCodeId),
}

impl DispatchStatus {
    pub fn reason_code(&self) -> Option<ReasonCodeId> {
        match self {
            DispatchStatus::Executed => None,
            DispatchStatus::Failed(_) => Some(reason_codes::CYCLE_ROBOT_COMMAND_FAILED),
            DispatchStatus::Skipped(code) => Some(*code),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CycleReport {
    pub id: DecisionStateId,
    pub record: DecisionStateRecord,
    pub reconcile: ReconcileReport,
    /// Tracked ids left out because the snapshot was full.
    pub ids_over_capacity: usize,
    pub dispatch: DispatchStatus,
}

#[derive(Debug, Clone, PartialEq)]
pub enum CycleOutcome {
    Completed(CycleReport),
    /// Another cycle held the critical section; the trigger is not queued.
    Dropped { reason_code: ReasonCodeId },
}

impl CycleOutcome {
    pub fn report(&self) -> Option<&CycleReport> {
        match self {
            CycleOutcome::Completed(r) => Some(r),
            CycleOutcome::Dropped { .. } => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleDiagnostics {
    pub cycles_completed: u64,
    pub triggers_dropped: u64,
    pub robot_failures: u64,
    pub cycles_failed: u64,
}

#[derive(Debug, Default)]
struct CycleCounters {
    completed: AtomicU64,
    dropped: AtomicU64,
    robot_failures: AtomicU64,
    failed: AtomicU64,
}

struct CycleGuard<'a>(&'a AtomicBool);

impl Drop for CycleGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// reconcile → snapshot → decide → bookkeeping → store → dispatch, one at a time.
///
/// Feature updates keep flowing into the shared tracker while a cycle runs; the snapshot is
/// taken under the tracker lock so each person record is read whole.
pub struct DecisionCycle<R>
where
    R: RobotCommandAdapter,
{
    config: CycleConfig,
    busy: AtomicBool,
    tracker: Arc<Mutex<PersonTracker>>,
    aggregator: StateAggregator,
    engine: Mutex<DecisionEngine>,
    ledger: Arc<Mutex<DecisionStateLedger>>,
    robot: Mutex<R>,
    gate: InteractionGate,
    counters: CycleCounters,
}

impl<R> DecisionCycle<R>
where
    R: RobotCommandAdapter,
{
    pub fn new(
        config: CycleConfig,
        tracker: Arc<Mutex<PersonTracker>>,
        engine: DecisionEngine,
        ledger: Arc<Mutex<DecisionStateLedger>>,
        robot: R,
        gate: InteractionGate,
    ) -> Self {
        Self {
            config,
            busy: AtomicBool::new(false),
            tracker,
            aggregator: StateAggregator::new(),
            engine: Mutex::new(engine),
            ledger,
            robot: Mutex::new(robot),
            gate,
            counters: CycleCounters::default(),
        }
    }

    fn try_enter(&self) -> Option<CycleGuard<'_>> {
        self.busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| CycleGuard(&self.busy))
    }

    /// Runs one cycle for the tracked-ids trigger, or drops it if a cycle is in progress.
    pub fn run<I>(&self, tracked: I, now: MonotonicTimeNs) -> Result<CycleOutcome, CycleError>
    where
        I: IntoIterator<Item = PersonId>,
    {
        let Some(_guard) = self.try_enter() else {
            self.counters.dropped.fetch_add(1, Ordering::Relaxed);
            debug!(
                reason_code = reason_codes::CYCLE_TRIGGER_DROPPED_BUSY.0,
                "decision cycle busy, dropping trigger"
            );
            return Ok(CycleOutcome::Dropped {
                reason_code: reason_codes::CYCLE_TRIGGER_DROPPED_BUSY,
            });
        };

        let result = self.run_entered(tracked, now);
        if let Err(err) = &result {
            self.counters.failed.fetch_add(1, Ordering::Relaxed);
            let reason_code = err.reason_code().0;
            if err.is_contract_failure() {
                error!(error = %err, reason_code, "decision cycle broke a contract");
            } else {
                warn!(error = %err, reason_code, "decision cycle failed");
            }
        }
        result
    }

    fn run_entered<I>(&self, tracked: I, now: MonotonicTimeNs) -> Result<CycleOutcome, CycleError>
    where
        I: IntoIterator<Item = PersonId>,
    {
        let mut engine = self
            .engine
            .lock()
            .map_err(|_| CycleError::LockPoisoned("decision engine"))?;

        let (tracked, ids_over_capacity) = bound_tracked(tracked);

        let (reconcile, state) = {
            let mut tracker = self
                .tracker
                .lock()
                .map_err(|_| CycleError::LockPoisoned("person tracker"))?;
            let reconcile = tracker.reconcile(tracked);
            let waiting = engine.is_waiting(now);
            let state = self.aggregator.build_snapshot(&tracker, waiting, now)?;
            (reconcile, state)
        };

        let decision = engine.decide(&state)?;
        engine.update_last_decision_time(&decision, now);
        drop(engine);

        let record = DecisionStateRecord::v1(state, decision)?;
        info!(
            action = %record.decision.action(),
            target = record.decision.target().map(PersonId::as_str),
            persons = record.state.len(),
            waiting = record.state.waiting(),
            "decision made"
        );

        let id = self
            .ledger
            .lock()
            .map_err(|_| CycleError::LockPoisoned("decision state ledger"))?
            .append_decision_state_row(record.clone(), now)?;

        let dispatch = self.dispatch(&record)?;
        self.counters.completed.fetch_add(1, Ordering::Relaxed);
        Ok(CycleOutcome::Completed(CycleReport {
            id,
            record,
            reconcile,
            ids_over_capacity,
            dispatch,
        }))
    }

    /// Counts a trigger turned away before it reached [`DecisionCycle::run`].
    pub fn record_dropped_trigger(&self) {
        self.counters.dropped.fetch_add(1, Ordering::Relaxed);
        debug!(
            reason_code = reason_codes::CYCLE_TRIGGER_DROPPED_BUSY.0,
            "dropping trigger at ingress"
        );
    }

    fn dispatch(&self, record: &DecisionStateRecord) -> Result<DispatchStatus, CycleError> {
        if !self.config.robot_command {
            return Ok(DispatchStatus::Skipped(
                reason_codes::CYCLE_ROBOT_COMMAND_DISABLED,
            ));
        }
        if !self.gate.is_enabled() {
            debug!(
                reason_code = reason_codes::CYCLE_INTERACTION_PAUSED.0,
                "interaction paused, not commanding robot"
            );
            return Ok(DispatchStatus::Skipped(reason_codes::CYCLE_INTERACTION_PAUSED));
        }
        let mut robot = self
            .robot
            .lock()
            .map_err(|_| CycleError::LockPoisoned("robot adapter"))?;
        match robot.execute(&record.decision, &record.state) {
            Ok(()) => Ok(DispatchStatus::Executed),
            Err(err) => {
                self.counters.robot_failures.fetch_add(1, Ordering::Relaxed);
                warn!(
                    error = %err,
                    action = %record.decision.action(),
                    reason_code = reason_codes::CYCLE_ROBOT_COMMAND_FAILED.0,
                    "robot command failed"
                );
                Ok(DispatchStatus::Failed(err))
            }
        }
    }

    /// External timeout: the next state is decided again instead of forced into `WAIT`.
    pub fn clear_waiting(&self) -> Result<(), CycleError> {
        self.engine
            .lock()
            .map_err(|_| CycleError::LockPoisoned("decision engine"))?
            .clear_waiting();
        Ok(())
    }

    pub fn tracker(&self) -> &Arc<Mutex<PersonTracker>> {
        &self.tracker
    }

    pub fn ledger(&self) -> &Arc<Mutex<DecisionStateLedger>> {
        &self.ledger
    }

    pub fn gate(&self) -> &InteractionGate {
        &self.gate
    }

    /// Runs `f` against the robot adapter, e.g. to start tablet behaviour outside a cycle.
    pub fn with_robot<T>(&self, f: impl FnOnce(&mut R) -> T) -> Result<T, CycleError> {
        let mut robot = self
            .robot
            .lock()
            .map_err(|_| CycleError::LockPoisoned("robot adapter"))?;
        Ok(f(&mut robot))
    }

    pub fn diagnostics(&self) -> CycleDiagnostics {
        CycleDiagnostics {
            cycles_completed: self.counters.completed.load(Ordering::Relaxed),
            triggers_dropped: self.counters.dropped.load(Ordering::Relaxed),
            robot_failures: self.counters.robot_failures.load(Ordering::Relaxed),
            cycles_failed: self.counters.failed.load(Ordering::Relaxed),
        }
    }
}

/// Keeps the lowest `ENGAGE_STATE_MAX_PERSONS` distinct ids so the snapshot stays valid.
fn bound_tracked<I>(tracked: I) -> (BTreeSet<PersonId>, usize)
where
    I: IntoIterator<Item = PersonId>,
{
    let mut tracked: BTreeSet<PersonId> = tracked.into_iter().collect();
    let over = tracked.len().saturating_sub(ENGAGE_STATE_MAX_PERSONS);
    if over > 0 {
        tracked = tracked.into_iter().take(ENGAGE_STATE_MAX_PERSONS).collect();
        warn!(
            over,
            max = ENGAGE_STATE_MAX_PERSONS,
            reason_code = reason_codes::CYCLE_TRACKED_IDS_OVER_CAPACITY.0,
            "too many tracked ids, ignoring the highest"
        );
    }
    (tracked, over)
}

#[cfg(test)]
mod tests {
    use engage_engines::decision::DecisionConfig;
    use engage_engines::discretize::Discretizer;
    use engage_kernel_contracts::decision::Action;

    use super::*;
    use crate::robot::RecordingRobotAdapter;

    fn cycle(config: CycleConfig) -> DecisionCycle<RecordingRobotAdapter> {
        DecisionCycle::new(
            config,
            Arc::new(Mutex::new(PersonTracker::new())),
            DecisionEngine::new(&DecisionConfig::mvp_v1(), Discretizer::mvp_v1()),
            Arc::new(Mutex::new(DecisionStateLedger::new_in_memory())),
            RecordingRobotAdapter::new(),
            InteractionGate::default(),
        )
    }

    #[test]
    fn contract_failures_are_told_apart_from_other_failures() {
        let broken = CycleError::Contract(ContractViolation::InvalidValue {
            field: "engage_state.persons",
            reason: "too many persons",
        });
        assert!(broken.is_contract_failure());
        assert_eq!(broken.reason_code(), reason_codes::CYCLE_CONTRACT_BROKEN);

        let poisoned = CycleError::LockPoisoned("person tracker");
        assert!(!poisoned.is_contract_failure());
        assert_eq!(poisoned.reason_code(), reason_codes::CYCLE_FAILED);
    }

    #[test]
    fn failed_cycles_are_counted_and_release_the_guard() {
        let c = cycle(CycleConfig::mvp_v1());
        let tracker = Arc::clone(c.tracker());
        let _ = std::thread::spawn(move || {
            let _held = tracker.lock().unwrap();
            panic!("poison the tracker");
        })
        .join();

        for t in 1..=2 {
            let err = c.run(Vec::<PersonId>::new(), MonotonicTimeNs(t)).unwrap_err();
            assert!(matches!(err, CycleError::LockPoisoned("person tracker")));
        }
        let diag = c.diagnostics();
        assert_eq!(diag.cycles_failed, 2);
        assert_eq!(diag.cycles_completed, 0);
        assert_eq!(diag.triggers_dropped, 0);
    }

    #[test]
    fn guard_is_released_after_each_cycle() {
        let c = cycle(CycleConfig::mvp_v1());
        for t in 1..=3 {
            let out = c.run(Vec::<PersonId>::new(), MonotonicTimeNs(t)).unwrap();
            assert_eq!(out.report().unwrap().record.decision.action(), Action::Nothing);
        }
        assert_eq!(c.diagnostics().cycles_completed, 3);
        assert_eq!(c.ledger().lock().unwrap().len(), 3);
    }

    #[test]
    fn held_guard_drops_trigger() {
        let c = cycle(CycleConfig::mvp_v1());
        let guard = c.try_enter().unwrap();
        let out = c.run(Vec::<PersonId>::new(), MonotonicTimeNs(1)).unwrap();
        assert_eq!(
            out,
            CycleOutcome::Dropped {
                reason_code: reason_codes::CYCLE_TRIGGER_DROPPED_BUSY
            }
        );
        drop(guard);
        assert!(c.run(Vec::<PersonId>::new(), MonotonicTimeNs(2)).unwrap().report().is_some());
        assert_eq!(c.diagnostics().triggers_dropped, 1);
    }

    #[test]
    fn robot_command_off_skips_dispatch() {
        let c = cycle(CycleConfig {
            robot_command: false,
        });
        let out = c.run(Vec::<PersonId>::new(), MonotonicTimeNs(1)).unwrap();
        assert_eq!(
            out.report().unwrap().dispatch,
            DispatchStatus::Skipped(reason_codes::CYCLE_ROBOT_COMMAND_DISABLED)
        );
        assert!(c.with_robot(|r| r.executed().is_empty()).unwrap());
    }
}
