#![forbid(unsafe_code)]

use std::sync::Arc;

use axum::{
    extract::State,
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use engage_adapter::{
    ingress_channels, init_tracing, run_aggregation_loop, AdapterConfig, AdapterError,
    BodySignalsInput, DecisionStateResponse, EngageRuntime, EngagementInput,
    ExplainHttpRequest, ExplainHttpResponse, GroupInput, HealthResponse, IngressSenders,
    PoseInput, TrackedIdsInput, TriggerAdmission,
};
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{error, info};

#[derive(Clone)]
struct AppState {
    runtime: Arc<EngageRuntime>,
    ingress: IngressSenders,
}

#[derive(Debug, Serialize)]
struct AcceptedResponse {
    status: String,
    reason: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();
    let config = AdapterConfig::from_env()?;
    let runtime = Arc::new(EngageRuntime::from_config(&config)?);

    let (ingress, receivers) = ingress_channels(config.channel_capacity);
    tokio::spawn(run_aggregation_loop(
        runtime.clone(),
        receivers,
        config.tick_interval,
    ));

    let app = Router::new()
        .route("/healthz", get(healthz))
        .route("/v1/tracked", post(post_tracked))
        .route("/v1/features/body", post(post_body))
        .route("/v1/features/pose", post(post_pose))
        .route("/v1/features/group", post(post_group))
        .route("/v1/features/engagement", post(post_engagement))
        .route("/v1/decision_states/latest", get(latest_decision_state))
        .route("/v1/explain", post(explain))
        .with_state(AppState { runtime, ingress });

    info!(addr = %config.http_bind, "engage_adapter_http listening");
    let listener = tokio::net::TcpListener::bind(config.http_bind).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

async fn enqueue<T>(
    tx: &mpsc::Sender<T>,
    input: T,
) -> (StatusCode, Json<AcceptedResponse>) {
    match tx.send(input).await {
        Ok(()) => (StatusCode::ACCEPTED, accepted("accepted", None)),
        Err(_) => (
            StatusCode::SERVICE_UNAVAILABLE,
            accepted("error", Some(AdapterError::IngressClosed.to_string())),
        ),
    }
}

fn accepted(status: &str, reason: Option<String>) -> Json<AcceptedResponse> {
    Json(AcceptedResponse {
        status: status.to_string(),
        reason,
    })
}

async fn post_tracked(
    State(app): State<AppState>,
    Json(input): Json<TrackedIdsInput>,
) -> (StatusCode, Json<AcceptedResponse>) {
    match app.runtime.offer_trigger(&app.ingress, input) {
        Ok(TriggerAdmission::Accepted) => (StatusCode::ACCEPTED, accepted("accepted", None)),
        Ok(TriggerAdmission::Dropped) => (
            StatusCode::ACCEPTED,
            accepted("dropped", Some("decision cycle busy".to_string())),
        ),
        Err(err) => (
            StatusCode::SERVICE_UNAVAILABLE,
            accepted("error", Some(err.to_string())),
        ),
    }
}

async fn post_body(
    State(app): State<AppState>,
    Json(input): Json<BodySignalsInput>,
) -> (StatusCode, Json<AcceptedResponse>) {
    enqueue(&app.ingress.body, input).await
}

async fn post_pose(
    State(app): State<AppState>,
    Json(input): Json<PoseInput>,
) -> (StatusCode, Json<AcceptedResponse>) {
    enqueue(&app.ingress.pose, input).await
}

async fn post_group(
    State(app): State<AppState>,
    Json(input): Json<GroupInput>,
) -> (StatusCode, Json<AcceptedResponse>) {
    enqueue(&app.ingress.group, input).await
}

async fn post_engagement(
    State(app): State<AppState>,
    Json(input): Json<EngagementInput>,
) -> (StatusCode, Json<AcceptedResponse>) {
    enqueue(&app.ingress.engagement, input).await
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
enum Reply<T> {
    Ok(T),
    Err { status: String, reason: String },
}

fn error_reply<T>(code: StatusCode, err: &AdapterError) -> (StatusCode, Json<Reply<T>>) {
    if code == StatusCode::INTERNAL_SERVER_ERROR {
        error!(error = %err, "request failed");
    }
    (
        code,
        Json(Reply::Err {
            status: "error".to_string(),
            reason: err.to_string(),
        }),
    )
}

async fn latest_decision_state(
    State(app): State<AppState>,
) -> (StatusCode, Json<Reply<DecisionStateResponse>>) {
    match app.runtime.latest_decision_state() {
        Ok(resp) => (StatusCode::OK, Json(Reply::Ok(resp))),
        Err(err @ AdapterError::NoDecisionState) => error_reply(StatusCode::NOT_FOUND, &err),
        Err(err) => error_reply(StatusCode::INTERNAL_SERVER_ERROR, &err),
    }
}

async fn explain(
    State(app): State<AppState>,
    Json(request): Json<ExplainHttpRequest>,
) -> (StatusCode, Json<Reply<ExplainHttpResponse>>) {
    match app.runtime.explain(request) {
        Ok(outcome) => (StatusCode::OK, Json(Reply::Ok(outcome.into()))),
        Err(err @ AdapterError::NoDecisionState) => error_reply(StatusCode::NOT_FOUND, &err),
        Err(err @ AdapterError::Explain(_)) => error_reply(StatusCode::UNPROCESSABLE_ENTITY, &err),
        Err(err) => error_reply(StatusCode::INTERNAL_SERVER_ERROR, &err),
    }
}

async fn healthz(State(app): State<AppState>) -> (StatusCode, Json<Reply<HealthResponse>>) {
    match app.runtime.health() {
        Ok(resp) => (StatusCode::OK, Json(Reply::Ok(resp))),
        Err(err) => error_reply(StatusCode::INTERNAL_SERVER_ERROR, &err),
    }
}
