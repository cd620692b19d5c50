#![forbid(unsafe_code)]

//! Process adapter around the engagement core: env configuration, typed ingress channels and a
//! single aggregation loop feeding the decision cycle.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use engage_engines::decision::{
    DecisionConfig, DecisionEngine, DecisionStrategy, DecisionStrategyKind,
};
use engage_engines::discretize::Discretizer;
use engage_engines::explainability::{ExplainConfig, ExplainRequest, ExplanationOutcome};
use engage_engines::language::{Language, PersonNames, TemplateError, TemplateSet};
use engage_kernel_contracts::decision::{Decision, DecisionMessage, DecisionStateRecord};
use engage_kernel_contracts::explain::{ExperimentGroup, ExplainabilityRecord};
use engage_kernel_contracts::person::{
    EngagementLevel, FeatureUpdate, GroupId, MotionActivity, PersonId, Position,
};
use engage_kernel_contracts::state::EngageState;
use engage_kernel_contracts::{ContractViolation, MonotonicTimeNs};
use engage_os::cycle::{CycleConfig, CycleError, CycleOutcome, DecisionCycle};
use engage_os::experiment::{ExperimentConfig, ExperimentEvent, PredictionExperimentManager};
use engage_os::explain_service::{ExplainServiceError, ExplanationService};
use engage_os::robot::{InteractionGate, RobotCommandAdapter, RobotCommandError};
use engage_os::tracker::{GroupMessage, PairwiseEngagement, PersonTracker, UpdateOutcome};
use engage_storage::ledger::{DecisionStateId, DecisionStateLedger};
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Debug, thiserror::Error)]
pub enum AdapterConfigError {
    #[error("{var}={value:?}: {reason}")]
    Invalid {
        var: &'static str,
        value: String,
        reason: String,
    },
    #[error("cannot read template file {path}: {source}")]
    TemplateFile {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error(transparent)]
    Templates(#[from] TemplateError),
}

#[derive(Debug, thiserror::Error)]
pub enum AdapterError {
    #[error(transparent)]
    Contract(#[from] ContractViolation),
    #[error(transparent)]
    Cycle(#[from] CycleError),
    #[error(transparent)]
    Explain(#[from] ExplainServiceError),
    #[error("{0} lock poisoned")]
    LockPoisoned(&'static str),
    #[error("no decision state stored yet")]
    NoDecisionState,
    #[error("aggregation loop is gone")]
    IngressClosed,
}

#[derive(Debug, Clone)]
pub struct AdapterConfig {
    pub http_bind: SocketAddr,
    pub decision: DecisionConfig,
    pub cycle: CycleConfig,
    pub explain: ExplainConfig,
    /// `None` seeds from entropy.
    pub random_seed: Option<u64>,
    pub person_names: PersonNames,
    pub template_file: Option<PathBuf>,
    pub experiment: Option<ExperimentConfig>,
    /// Decision states retained for explanation; older rows are pruned.
    pub ledger_max_rows: usize,
    pub channel_capacity: usize,
    pub tick_interval: Duration,
}

impl AdapterConfig {
    pub fn mvp_v1() -> Self {
        Self {
            http_bind: SocketAddr::from(([127, 0, 0, 1], 8080)),
            decision: DecisionConfig::mvp_v1(),
            cycle: CycleConfig::mvp_v1(),
            explain: ExplainConfig::mvp_v1(),
            random_seed: None,
            person_names: PersonNames::new(),
            template_file: None,
            experiment: None,
            ledger_max_rows: 1024,
            channel_capacity: 256,
            tick_interval: Duration::from_millis(100),
        }
    }

    pub fn from_env() -> Result<Self, AdapterConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Unset or blank variables keep their `mvp_v1` value.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, AdapterConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |var: &str| lookup(var).filter(|v| !v.trim().is_empty());
        let mut config = Self::mvp_v1();

        if let Some(v) = get("ENGAGE_HTTP_BIND") {
            config.http_bind = parse_var("ENGAGE_HTTP_BIND", &v)?;
        }
        if let Some(v) = get("ENGAGE_DECISION_MAKER") {
            config.decision.strategy =
                parse_var::<DecisionStrategyKind>("ENGAGE_DECISION_MAKER", &v)?;
        }
        if let Some(v) = get("ENGAGE_WAIT_TIME_MS") {
            let ms: u64 = parse_var("ENGAGE_WAIT_TIME_MS", &v)?;
            config.decision.wait_time_ns = ms.saturating_mul(1_000_000);
        }
        if let Some(v) = get("ENGAGE_LANGUAGE") {
            config.explain.language = parse_var::<Language>("ENGAGE_LANGUAGE", &v)?;
        }
        if let Some(v) = get("ENGAGE_EXPERIMENT_GROUP") {
            let id: u8 = parse_var("ENGAGE_EXPERIMENT_GROUP", &v)?;
            config.explain.group = ExperimentGroup::from_id(id)
                .map_err(|e| invalid("ENGAGE_EXPERIMENT_GROUP", &v, e.to_string()))?;
        }
        if let Some(v) = get("ENGAGE_ROBOT_COMMAND") {
            config.cycle.robot_command = !is_falsy(&v);
        }
        if let Some(v) = get("ENGAGE_RANDOM_SEED") {
            let seed: u64 = parse_var("ENGAGE_RANDOM_SEED", &v)?;
            config.random_seed = Some(seed);
            config.decision.random_seed = seed;
        }
        if let Some(v) = get("ENGAGE_PERSON_NAMES") {
            config.person_names = parse_person_names(&v)?;
        }
        if let Some(v) = get("ENGAGE_TEMPLATE_FILE") {
            config.template_file = Some(PathBuf::from(v.trim()));
        }
        if let Some(v) = get("ENGAGE_LEDGER_MAX_ROWS") {
            let rows: usize = parse_var("ENGAGE_LEDGER_MAX_ROWS", &v)?;
            if rows == 0 {
                let reason = "must be at least 1".to_string();
                return Err(invalid("ENGAGE_LEDGER_MAX_ROWS", &v, reason));
            }
            config.ledger_max_rows = rows;
        }
        if let Some(v) = get("ENGAGE_PREDICTION_EXPERIMENT") {
            if !is_falsy(&v) {
                config.experiment = Some(ExperimentConfig::mvp_v1());
            }
        }
        Ok(config)
    }

    /// Built-in table for the configured language unless a template file overrides it.
    pub fn load_templates(
        &self,
        strategy: &DecisionStrategy,
    ) -> Result<TemplateSet, AdapterConfigError> {
        let Some(path) = &self.template_file else {
            return Ok(TemplateSet::builtin(self.explain.language));
        };
        let json =
            std::fs::read_to_string(path).map_err(|source| AdapterConfigError::TemplateFile {
                path: path.clone(),
                source,
            })?;
        Ok(TemplateSet::from_json(&json, strategy.input_variables())?)
    }
}

fn invalid(var: &'static str, value: &str, reason: String) -> AdapterConfigError {
    AdapterConfigError::Invalid {
        var,
        value: value.to_string(),
        reason,
    }
}

fn parse_var<T>(var: &'static str, value: &str) -> Result<T, AdapterConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    value
        .trim()
        .parse::<T>()
        .map_err(|e| invalid(var, value, e.to_string()))
}

fn is_falsy(v: &str) -> bool {
    matches!(
        v.trim().to_ascii_lowercase().as_str(),
        "false" | "f" | "0" | "no" | "off"
    )
}

/// `id=name` pairs separated by commas.
fn parse_person_names(v: &str) -> Result<PersonNames, AdapterConfigError> {
    let mut names = PersonNames::new();
    for pair in v.split(',').map(str::trim).filter(|p| !p.is_empty()) {
        let Some((id, name)) = pair.split_once('=') else {
            return Err(invalid(
                "ENGAGE_PERSON_NAMES",
                v,
                format!("`{pair}` is not id=name"),
            ));
        };
        let id = PersonId::new(id.trim())
            .map_err(|e| invalid("ENGAGE_PERSON_NAMES", v, e.to_string()))?;
        names.insert(id, name.trim());
    }
    Ok(names)
}

/// Installs the fmt subscriber; `RUST_LOG` overrides the `info` default.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .try_init();
}

/// Stand-in robot for processes without a motor controller: every command is logged.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingRobotAdapter;

impl RobotCommandAdapter for TracingRobotAdapter {
    fn execute(
        &mut self,
        decision: &Decision,
        state: &EngageState,
    ) -> Result<(), RobotCommandError> {
        info!(
            action = %decision.action(),
            target = decision.target().map(PersonId::as_str),
            persons = state.len(),
            "robot command"
        );
        Ok(())
    }

    fn start_tablet_behaviour(&mut self) -> Result<(), RobotCommandError> {
        info!("robot tablet behaviour started");
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackedIdsInput {
    pub ids: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BodySignalsInput {
    pub person_id: String,
    pub engagement_level: EngagementLevel,
    pub engagement_level_confidence: f64,
    pub motion: MotionActivity,
    pub motion_confidence: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PoseInput {
    pub person_id: String,
    /// Absent when the skeleton had no nose keypoint.
    pub nose: Option<Position>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupInput {
    pub group_id: String,
    pub members: Vec<String>,
    pub confidences: Vec<f64>,
}

/// Pairwise engagement message; an empty id is the robot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngagementInput {
    #[serde(default)]
    pub person_a: String,
    #[serde(default)]
    pub person_b: String,
    pub distance: f64,
    pub mutual_gaze: f64,
    pub engagement_value: f64,
    pub confidence_a: f64,
    pub confidence_b: f64,
}

/// One sender per upstream signal kind.
///
/// Tracked-id triggers have a single slot and go through [`EngageRuntime::offer_trigger`].
#[derive(Debug, Clone)]
pub struct IngressSenders {
    tracked: mpsc::Sender<TrackedIdsInput>,
    pub body: mpsc::Sender<BodySignalsInput>,
    pub pose: mpsc::Sender<PoseInput>,
    pub group: mpsc::Sender<GroupInput>,
    pub engagement: mpsc::Sender<EngagementInput>,
}

#[derive(Debug)]
pub struct IngressReceivers {
    tracked: mpsc::Receiver<TrackedIdsInput>,
    body: mpsc::Receiver<BodySignalsInput>,
    pose: mpsc::Receiver<PoseInput>,
    group: mpsc::Receiver<GroupInput>,
    engagement: mpsc::Receiver<EngagementInput>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerAdmission {
    Accepted,
    /// A trigger was already pending; this one is counted and forgotten.
    Dropped,
}

/// `capacity` bounds the feature channels; the tracked-id channel holds one trigger.
pub fn ingress_channels(capacity: usize) -> (IngressSenders, IngressReceivers) {
    let capacity = capacity.max(1);
    let (tracked_tx, tracked_rx) = mpsc::channel(1);
    let (body_tx, body_rx) = mpsc::channel(capacity);
    let (pose_tx, pose_rx) = mpsc::channel(capacity);
    let (group_tx, group_rx) = mpsc::channel(capacity);
    let (engagement_tx, engagement_rx) = mpsc::channel(capacity);
    (
        IngressSenders {
            tracked: tracked_tx,
            body: body_tx,
            pose: pose_tx,
            group: group_tx,
            engagement: engagement_tx,
        },
        IngressReceivers {
            tracked: tracked_rx,
            body: body_rx,
            pose: pose_rx,
            group: group_rx,
            engagement: engagement_rx,
        },
    )
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DecisionStateResponse {
    pub id: String,
    pub stored_at_ns: u64,
    pub state_digest: String,
    pub message: DecisionMessage,
    pub record: DecisionStateRecord,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct ExplainHttpRequest {
    /// Row to explain; the latest row when absent.
    pub decision_state_id: Option<u64>,
    #[serde(default)]
    pub user_id: u32,
    #[serde(default)]
    pub image_refs: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExplainHttpResponse {
    pub status: String,
    pub outcome: String,
    pub reason_code: Option<u32>,
    pub record: Option<ExplainabilityRecord>,
}

impl From<ExplanationOutcome> for ExplainHttpResponse {
    fn from(outcome: ExplanationOutcome) -> Self {
        match outcome {
            ExplanationOutcome::Ready(record) => Self {
                status: "ok".to_string(),
                outcome: "READY".to_string(),
                reason_code: None,
                record: Some(record),
            },
            ExplanationOutcome::NoExplanation(reason) => Self {
                status: "ok".to_string(),
                outcome: "NO_EXPLANATION".to_string(),
                reason_code: Some(reason.reason_code().0),
                record: None,
            },
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub tracked_persons: usize,
    pub decision_states: usize,
    pub cycles_completed: u64,
    pub triggers_dropped: u64,
    pub robot_failures: u64,
    pub cycles_failed: u64,
    pub orphan_updates_dropped: u64,
    pub interaction_enabled: bool,
}

/// Everything one adapter process runs, shareable across tasks.
pub struct EngageRuntime {
    cycle: DecisionCycle<TracingRobotAdapter>,
    explainer: ExplanationService,
    experiment: Option<Mutex<PredictionExperimentManager<InteractionGate>>>,
    explain_rng: Mutex<StdRng>,
    started: Instant,
}

impl EngageRuntime {
    pub fn from_config(config: &AdapterConfig) -> Result<Self, AdapterConfigError> {
        let seed = config.random_seed.unwrap_or_else(rand::random);
        let decision = DecisionConfig {
            random_seed: seed,
            ..config.decision.clone()
        };
        let discretizer = Discretizer::mvp_v1();
        let strategy = DecisionStrategy::from_config(&decision);
        let templates = config.load_templates(&strategy)?;
        let explainer = ExplanationService::new(
            config.explain.clone(),
            strategy,
            discretizer,
            templates,
            config.person_names.clone(),
        )?;

        let gate = InteractionGate::default();
        let cycle = DecisionCycle::new(
            config.cycle,
            Arc::new(Mutex::new(PersonTracker::new())),
            DecisionEngine::new(&decision, discretizer),
            Arc::new(Mutex::new(DecisionStateLedger::with_max_rows(
                config.ledger_max_rows,
            ))),
            TracingRobotAdapter,
            gate.clone(),
        );
        info!(
            strategy = decision.strategy.as_str(),
            language = config.explain.language.as_str(),
            group = config.explain.group.id(),
            robot_command = config.cycle.robot_command,
            experiment = config.experiment.is_some(),
            "engage runtime configured"
        );
        Ok(Self {
            cycle,
            explainer,
            experiment: config
                .experiment
                .map(|c| Mutex::new(PredictionExperimentManager::new(c, gate))),
            explain_rng: Mutex::new(StdRng::seed_from_u64(seed.wrapping_add(1))),
            started: Instant::now(),
        })
    }

    pub fn record_dropped_trigger(&self) {
        self.cycle.record_dropped_trigger();
    }

    pub fn now(&self) -> MonotonicTimeNs {
        MonotonicTimeNs(u64::try_from(self.started.elapsed().as_nanos()).unwrap_or(u64::MAX))
    }

    fn with_tracker<T>(
        &self,
        f: impl FnOnce(&mut PersonTracker) -> Result<T, ContractViolation>,
    ) -> Result<T, AdapterError> {
        let mut tracker = self
            .cycle
            .tracker()
            .lock()
            .map_err(|_| AdapterError::LockPoisoned("person tracker"))?;
        Ok(f(&mut tracker)?)
    }

    /// Hands a tracked-ids trigger to the aggregation loop without waiting for room.
    pub fn offer_trigger(
        &self,
        ingress: &IngressSenders,
        input: TrackedIdsInput,
    ) -> Result<TriggerAdmission, AdapterError> {
        match ingress.tracked.try_send(input) {
            Ok(()) => Ok(TriggerAdmission::Accepted),
            Err(TrySendError::Full(_)) => {
                self.cycle.record_dropped_trigger();
                Ok(TriggerAdmission::Dropped)
            }
            Err(TrySendError::Closed(_)) => Err(AdapterError::IngressClosed),
        }
    }

    pub fn on_tracked(&self, input: TrackedIdsInput) -> Result<CycleOutcome, AdapterError> {
        let ids = input
            .ids
            .into_iter()
            .map(PersonId::new)
            .collect::<Result<Vec<_>, _>>()?;
        let now = self.now();
        let outcome = self.cycle.run(ids, now)?;
        if let (CycleOutcome::Completed(report), Some(experiment)) = (&outcome, &self.experiment) {
            let mut experiment = experiment
                .lock()
                .map_err(|_| AdapterError::LockPoisoned("experiment manager"))?;
            self.cycle
                .with_robot(|robot| experiment.process_decision_state(&report.record, now, robot))?;
        }
        Ok(outcome)
    }

    pub fn on_body_signals(&self, input: BodySignalsInput) -> Result<UpdateOutcome, AdapterError> {
        let id = PersonId::new(input.person_id)?;
        let now = self.now();
        self.with_tracker(|t| {
            t.update_feature(
                &id,
                FeatureUpdate::BodySignals {
                    engagement_level: input.engagement_level,
                    engagement_level_confidence: input.engagement_level_confidence,
                    motion: input.motion,
                    motion_confidence: input.motion_confidence,
                },
                now,
            )
        })
    }

    pub fn on_pose(&self, input: PoseInput) -> Result<UpdateOutcome, AdapterError> {
        let id = PersonId::new(input.person_id)?;
        let now = self.now();
        self.with_tracker(|t| t.apply_nose_keypoint(&id, input.nose, now))
    }

    pub fn on_group(&self, input: GroupInput) -> Result<Vec<UpdateOutcome>, AdapterError> {
        let msg = GroupMessage {
            group_id: GroupId::new(input.group_id)?,
            members: input.members,
            confidences: input.confidences,
        };
        let now = self.now();
        self.with_tracker(|t| t.apply_group(&msg, now))
    }

    pub fn on_engagement(&self, input: EngagementInput) -> Result<UpdateOutcome, AdapterError> {
        let msg = PairwiseEngagement {
            person_a: input.person_a,
            person_b: input.person_b,
            distance: input.distance,
            mutual_gaze: input.mutual_gaze,
            engagement_value: input.engagement_value,
            confidence_a: input.confidence_a,
            confidence_b: input.confidence_b,
        };
        let now = self.now();
        self.with_tracker(|t| t.apply_engagement(&msg, now))
    }

    /// Fires experiment timers; a return to ELICIT lets the next state be decided again.
    pub fn tick(&self) -> Result<ExperimentEvent, AdapterError> {
        let Some(experiment) = &self.experiment else {
            return Ok(ExperimentEvent::Unchanged);
        };
        let event = experiment
            .lock()
            .map_err(|_| AdapterError::LockPoisoned("experiment manager"))?
            .tick(self.now());
        if event == ExperimentEvent::ReturnedToElicit {
            self.cycle.clear_waiting()?;
        }
        Ok(event)
    }

    pub fn latest_decision_state(&self) -> Result<DecisionStateResponse, AdapterError> {
        let ledger = self
            .cycle
            .ledger()
            .lock()
            .map_err(|_| AdapterError::LockPoisoned("decision state ledger"))?;
        let row = ledger.latest().ok_or(AdapterError::NoDecisionState)?;
        Ok(DecisionStateResponse {
            id: row.id.to_string(),
            stored_at_ns: row.stored_at.0,
            state_digest: row.state_digest.clone(),
            message: row.record.message(),
            record: row.record.clone(),
        })
    }

    pub fn explain(&self, request: ExplainHttpRequest) -> Result<ExplanationOutcome, AdapterError> {
        let record = {
            let ledger = self
                .cycle
                .ledger()
                .lock()
                .map_err(|_| AdapterError::LockPoisoned("decision state ledger"))?;
            let row = match request.decision_state_id {
                Some(id) => ledger
                    .get(DecisionStateId(id))
                    .map_err(ExplainServiceError::from)?,
                None => ledger.latest().ok_or(AdapterError::NoDecisionState)?,
            };
            row.record.clone()
        };
        let mut rng = self
            .explain_rng
            .lock()
            .map_err(|_| AdapterError::LockPoisoned("explanation rng"))?;
        let outcome = self
            .explainer
            .explain_record(
                &record,
                &ExplainRequest {
                    user_id: request.user_id,
                    image_refs: request.image_refs,
                },
                &mut *rng,
            )
            .map_err(ExplainServiceError::from)?;
        Ok(outcome)
    }

    pub fn health(&self) -> Result<HealthResponse, AdapterError> {
        let cycle = self.cycle.diagnostics();
        let (tracked_persons, orphan_updates_dropped) = {
            let tracker = self
                .cycle
                .tracker()
                .lock()
                .map_err(|_| AdapterError::LockPoisoned("person tracker"))?;
            (tracker.len(), tracker.diagnostics().orphan_updates_dropped)
        };
        let decision_states = self
            .cycle
            .ledger()
            .lock()
            .map_err(|_| AdapterError::LockPoisoned("decision state ledger"))?
            .len();
        Ok(HealthResponse {
            status: "ok".to_string(),
            tracked_persons,
            decision_states,
            cycles_completed: cycle.cycles_completed,
            triggers_dropped: cycle.triggers_dropped,
            robot_failures: cycle.robot_failures,
            cycles_failed: cycle.cycles_failed,
            orphan_updates_dropped,
            interaction_enabled: self.cycle.gate().is_enabled(),
        })
    }
}

/// Consumes every ingress channel in arrival order until all senders are gone.
///
/// A decision cycle runs on the blocking pool while feature updates keep being applied; a
/// trigger that arrives before it finishes is dropped.
pub async fn run_aggregation_loop(
    runtime: Arc<EngageRuntime>,
    mut rx: IngressReceivers,
    tick_interval: Duration,
) {
    let mut ticker = tokio::time::interval(tick_interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    let mut in_flight: JoinSet<Result<CycleOutcome, AdapterError>> = JoinSet::new();
    let (mut tracked_open, mut body_open, mut pose_open, mut group_open, mut engagement_open) =
        (true, true, true, true, true);

    loop {
        let any_open = tracked_open || body_open || pose_open || group_open || engagement_open;
        tokio::select! {
            msg = rx.tracked.recv(), if tracked_open => match msg {
                Some(_) if !in_flight.is_empty() => runtime.record_dropped_trigger(),
                Some(input) => {
                    let rt = runtime.clone();
                    in_flight.spawn_blocking(move || rt.on_tracked(input));
                }
                None => tracked_open = false,
            },
            Some(joined) = in_flight.join_next(), if !in_flight.is_empty() => match joined {
                Ok(result) => log_cycle(result),
                Err(err) => error!(error = %err, "decision cycle task did not finish"),
            },
            msg = rx.body.recv(), if body_open => match msg {
                Some(input) => log_update("body", runtime.on_body_signals(input)),
                None => body_open = false,
            },
            msg = rx.pose.recv(), if pose_open => match msg {
                Some(input) => log_update("pose", runtime.on_pose(input)),
                None => pose_open = false,
            },
            msg = rx.engagement.recv(), if engagement_open => match msg {
                Some(input) => log_update("engagement", runtime.on_engagement(input)),
                None => engagement_open = false,
            },
            msg = rx.group.recv(), if group_open => match msg {
                Some(input) => {
                    if let Err(err) = runtime.on_group(input) {
                        warn!(error = %err, channel = "group", "feature update rejected");
                    }
                }
                None => group_open = false,
            },
            _ = ticker.tick(), if any_open => {
                if let Err(err) = runtime.tick() {
                    warn!(error = %err, "experiment tick failed");
                }
            }
            else => break,
        }
    }
    info!("aggregation loop stopped");
}

fn log_cycle(result: Result<CycleOutcome, AdapterError>) {
    match result {
        Ok(CycleOutcome::Completed(report)) => {
            debug!(id = %report.id, "decision cycle completed");
        }
        Ok(CycleOutcome::Dropped { reason_code }) => {
            debug!(reason_code = reason_code.0, "tracked-ids trigger dropped");
        }
        // The cycle logs and counts its own failures.
        Err(AdapterError::Cycle(_)) => {}
        Err(err) => warn!(error = %err, "tracked-ids trigger rejected"),
    }
}

fn log_update(channel: &'static str, result: Result<UpdateOutcome, AdapterError>) {
    match result {
        Ok(UpdateOutcome::Applied | UpdateOutcome::Ignored) => {}
        Ok(outcome) => debug!(channel, ?outcome, "feature update dropped"),
        Err(err) => warn!(error = %err, channel, "feature update rejected"),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use engage_kernel_contracts::decision::Action;

    use super::*;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: BTreeMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |k| map.get(k).cloned()
    }

    #[test]
    fn at_cfg_01_defaults_without_env() {
        let c = AdapterConfig::from_lookup(|_| None).unwrap();
        assert_eq!(c.http_bind.to_string(), "127.0.0.1:8080");
        assert_eq!(c.decision.strategy, DecisionStrategyKind::Heuristic);
        assert_eq!(c.decision.wait_time_ns, 5_000_000_000);
        assert_eq!(c.explain.language, Language::English);
        assert_eq!(c.explain.group, ExperimentGroup::ReasonOnly);
        assert!(c.cycle.robot_command);
        assert!(c.experiment.is_none());
    }

    #[test]
    fn at_cfg_02_env_overrides_are_parsed() {
        let c = AdapterConfig::from_lookup(lookup(&[
            ("ENGAGE_HTTP_BIND", "0.0.0.0:9000"),
            ("ENGAGE_DECISION_MAKER", "gaze_confidence"),
            ("ENGAGE_WAIT_TIME_MS", "2500"),
            ("ENGAGE_LANGUAGE", "catalan"),
            ("ENGAGE_EXPERIMENT_GROUP", "3"),
            ("ENGAGE_ROBOT_COMMAND", "False"),
            ("ENGAGE_RANDOM_SEED", "42"),
            ("ENGAGE_PERSON_NAMES", "1=Anna, 2=Pau"),
            ("ENGAGE_PREDICTION_EXPERIMENT", "1"),
        ]))
        .unwrap();
        assert_eq!(c.http_bind.port(), 9000);
        assert_eq!(c.decision.strategy, DecisionStrategyKind::GazeConfidence);
        assert_eq!(c.decision.wait_time_ns, 2_500_000_000);
        assert_eq!(c.explain.language, Language::Catalan);
        assert_eq!(c.explain.group, ExperimentGroup::UncertaintyGazeCounterfactual);
        assert!(!c.cycle.robot_command);
        assert_eq!(c.random_seed, Some(42));
        assert_eq!(c.person_names.get(&PersonId::new("2").unwrap()), Some("Pau"));
        assert_eq!(c.experiment, Some(ExperimentConfig::mvp_v1()));
    }

    #[test]
    fn at_cfg_03_bad_values_name_the_variable() {
        for (var, value) in [
            ("ENGAGE_DECISION_MAKER", "lime"),
            ("ENGAGE_LANGUAGE", "klingon"),
            ("ENGAGE_EXPERIMENT_GROUP", "7"),
            ("ENGAGE_WAIT_TIME_MS", "-1"),
            ("ENGAGE_PERSON_NAMES", "anna"),
        ] {
            let err = AdapterConfig::from_lookup(lookup(&[(var, value)])).unwrap_err();
            assert!(err.to_string().starts_with(var), "{err}");
        }
    }

    #[test]
    fn at_cfg_04_missing_template_file_is_reported() {
        let c = AdapterConfig::from_lookup(lookup(&[(
            "ENGAGE_TEMPLATE_FILE",
            "/nonexistent/engage/templates.json",
        )]))
        .unwrap();
        assert!(matches!(
            EngageRuntime::from_config(&c),
            Err(AdapterConfigError::TemplateFile { .. })
        ));
    }

    #[test]
    fn at_cfg_05_ledger_retention_is_bounded_and_configurable() {
        assert_eq!(AdapterConfig::mvp_v1().ledger_max_rows, 1024);
        let c = AdapterConfig::from_lookup(lookup(&[("ENGAGE_LEDGER_MAX_ROWS", "2")])).unwrap();
        assert_eq!(c.ledger_max_rows, 2);
        let err =
            AdapterConfig::from_lookup(lookup(&[("ENGAGE_LEDGER_MAX_ROWS", "0")])).unwrap_err();
        assert!(err.to_string().starts_with("ENGAGE_LEDGER_MAX_ROWS"), "{err}");

        let rt = EngageRuntime::from_config(&c).unwrap();
        for _ in 0..3 {
            rt.on_tracked(TrackedIdsInput { ids: Vec::new() }).unwrap();
        }
        assert_eq!(rt.health().unwrap().decision_states, 2);
        assert_eq!(rt.latest_decision_state().unwrap().id, "ds_3");
    }

    fn runtime() -> Arc<EngageRuntime> {
        let mut c = AdapterConfig::mvp_v1();
        c.random_seed = Some(7);
        c.decision.strategy = DecisionStrategyKind::SimpleTarget;
        Arc::new(EngageRuntime::from_config(&c).unwrap())
    }

    #[test]
    fn at_rt_01_direct_ingress_reaches_ledger() {
        let rt = runtime();
        rt.on_tracked(TrackedIdsInput {
            ids: vec!["A".to_string(), "B".to_string()],
        })
        .unwrap();
        for (id, ev) in [("A", 0.33), ("B", 0.67)] {
            let out = rt
                .on_engagement(EngagementInput {
                    person_a: String::new(),
                    person_b: id.to_string(),
                    distance: 2.0,
                    mutual_gaze: 0.5,
                    engagement_value: ev,
                    confidence_a: 0.0,
                    confidence_b: 0.8,
                })
                .unwrap();
            assert_eq!(out, UpdateOutcome::Applied);
        }
        rt.on_tracked(TrackedIdsInput {
            ids: vec!["A".to_string(), "B".to_string()],
        })
        .unwrap();

        let latest = rt.latest_decision_state().unwrap();
        assert_eq!(latest.id, "ds_2");
        assert_eq!(latest.message.action, Action::ElicitTarget);
        assert_eq!(latest.message.target, Some(PersonId::new("B").unwrap()));
        let health = rt.health().unwrap();
        assert_eq!(health.decision_states, 2);
        assert_eq!(health.tracked_persons, 2);
    }

    #[test]
    fn at_rt_02_explain_without_rows_is_an_error() {
        let rt = runtime();
        assert!(matches!(
            rt.explain(ExplainHttpRequest::default()),
            Err(AdapterError::NoDecisionState)
        ));
    }

    #[test]
    fn at_rt_04_engagement_without_person_a_is_robot_relative() {
        let input: EngagementInput = serde_json::from_str(concat!(
            r#"{"person_b":"7","distance":1.0,"mutual_gaze":0.2,"engagement_value":0.3,"#,
            r#""confidence_a":0.0,"confidence_b":0.6}"#,
        ))
        .unwrap();
        assert!(input.person_a.is_empty());

        let rt = runtime();
        rt.on_tracked(TrackedIdsInput {
            ids: vec!["7".to_string()],
        })
        .unwrap();
        assert_eq!(rt.on_engagement(input).unwrap(), UpdateOutcome::Applied);
    }

    #[test]
    fn at_rt_05_refusal_serializes_with_reason_code() {
        let resp = ExplainHttpResponse::from(ExplanationOutcome::NoExplanation(
            engage_engines::explainability::NoExplanationReason::NoEligiblePerson,
        ));
        let json = serde_json::to_value(&resp).unwrap();
        assert_eq!(json["outcome"], "NO_EXPLANATION");
        assert_eq!(
            json["reason_code"],
            engage_engines::explainability::reason_codes::EXPLAIN_NO_ELIGIBLE_PERSON.0
        );
        assert!(json["record"].is_null());
    }

    #[tokio::test]
    async fn at_rt_03_aggregation_loop_drains_channels_and_stops() {
        let rt = runtime();
        let (tx, rx) = ingress_channels(8);
        let handle = tokio::spawn(run_aggregation_loop(
            rt.clone(),
            rx,
            Duration::from_millis(5),
        ));

        let admitted = rt
            .offer_trigger(
                &tx,
                TrackedIdsInput {
                    ids: vec!["A".to_string()],
                },
            )
            .unwrap();
        assert_eq!(admitted, TriggerAdmission::Accepted);
        tx.pose
            .send(PoseInput {
                person_id: "A".to_string(),
                nose: None,
            })
            .await
            .unwrap();
        drop(tx);
        handle.await.unwrap();

        assert_eq!(rt.health().unwrap().cycles_completed, 1);
        assert_eq!(
            rt.latest_decision_state().unwrap().message.action,
            Action::Nothing
        );
    }

    #[tokio::test]
    async fn at_rt_06_triggers_beyond_the_pending_one_are_dropped() {
        let rt = runtime();
        let (tx, rx) = ingress_channels(8);
        let admissions: Vec<TriggerAdmission> = (0..20)
            .map(|_| {
                rt.offer_trigger(
                    &tx,
                    TrackedIdsInput {
                        ids: vec!["A".to_string()],
                    },
                )
                .unwrap()
            })
            .collect();
        assert_eq!(admissions[0], TriggerAdmission::Accepted);
        assert!(admissions[1..].iter().all(|a| *a == TriggerAdmission::Dropped));
        assert_eq!(rt.health().unwrap().triggers_dropped, 19);

        drop(tx);
        run_aggregation_loop(rt.clone(), rx, Duration::from_millis(5)).await;

        let health = rt.health().unwrap();
        assert_eq!(health.cycles_completed, 1);
        assert_eq!(health.triggers_dropped, 19);
        assert_eq!(health.decision_states, 1);
    }

    #[test]
    fn at_rt_07_closed_ingress_is_reported() {
        let rt = runtime();
        let (tx, rx) = ingress_channels(8);
        drop(rx);
        assert!(matches!(
            rt.offer_trigger(&tx, TrackedIdsInput { ids: Vec::new() }),
            Err(AdapterError::IngressClosed)
        ));
    }
}
