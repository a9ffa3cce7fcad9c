// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

use axum::{
    extract::{rejection::JsonRejection, Path, Query, State},
    http::{HeaderMap, HeaderValue, StatusCode},
    response::{
        sse::{Event, Sse},
        IntoResponse, Response,
    },
    routing::{get, post, put},
    Json, Router,
};
use futures::stream::Stream;
use serde::Deserialize;
use serde_json::json;
use std::convert::Infallible;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{debug, warn};

use crate::application::command_broker::{BrokerSettings, CommandBroker};
use crate::application::hook_ingest::{HookIngestService, SERVER_ERROR_PROCEEDING};
use crate::application::maintenance::MaintenanceScheduler;
use crate::domain::clock::SharedClock;
use crate::domain::command::{
    BrokerError, CommandId, CompleteCommandRequest, CreateCommandRequest, RemoteCommand,
};
use crate::domain::config::ServerConfig;
use crate::domain::events::{HookResponse, LifecycleEvent};
use crate::infrastructure::agent_registry::AgentRegistry;
use crate::infrastructure::event_hub::{EventHub, HubSettings, SubscriberId, Subscription};

const STREAM_HEARTBEAT: Duration = Duration::from_secs(15);

/// Shared services behind every handler
pub struct AppState {
    pub broker: Arc<CommandBroker>,
    pub hub: Arc<EventHub>,
    pub registry: Arc<AgentRegistry>,
    pub ingest: Arc<HookIngestService>,
    pub clock: SharedClock,
    pub allowed_origins: Vec<String>,
    pub sweep_interval: Duration,
    pub start_time: Instant,
}

impl AppState {
    pub fn new(config: &ServerConfig, clock: SharedClock) -> Self {
        let hub = Arc::new(EventHub::new(HubSettings::from(config), clock.clone()));
        let registry = Arc::new(AgentRegistry::new(
            hub.clone(),
            clock.clone(),
            config.agent_idle(),
        ));
        let broker = Arc::new(CommandBroker::new(
            hub.clone(),
            clock.clone(),
            BrokerSettings::from(config),
        ));
        let ingest = Arc::new(HookIngestService::new(
            registry.clone(),
            hub.clone(),
            clock.clone(),
        ));

        Self {
            broker,
            hub,
            registry,
            ingest,
            clock,
            allowed_origins: config.allowed_origins.clone(),
            sweep_interval: config.sweep_interval(),
            start_time: Instant::now(),
        }
    }

    pub fn maintenance(&self) -> MaintenanceScheduler {
        MaintenanceScheduler::new(
            self.broker.clone(),
            self.hub.clone(),
            self.registry.clone(),
            self.sweep_interval,
        )
    }
}

/// HTTP mapping for broker failures
pub struct ApiError(BrokerError);

impl From<BrokerError> for ApiError {
    fn from(err: BrokerError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            BrokerError::NotFound(_) => StatusCode::NOT_FOUND,
            BrokerError::InvalidState { .. } => StatusCode::CONFLICT,
            BrokerError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
        };
        (status, Json(json!({ "error": self.0.to_string() }))).into_response()
    }
}

pub fn app(state: Arc<AppState>) -> Router {
    let cors = cors_layer(&state.allowed_origins);

    let api = Router::new()
        .route("/hooks/events", post(hook_event_handler))
        .route("/hooks/heartbeat", post(heartbeat_handler))
        .route("/events/stream", get(stream_handler))
        .route("/events/agents", get(agents_handler))
        .route("/commands", post(create_command_handler).get(list_commands_handler))
        .route("/commands/agent/{id}", get(agent_commands_handler))
        .route("/commands/{id}", get(pending_commands_handler))
        .route("/commands/{id}/interrupt", get(interrupt_commands_handler))
        .route("/commands/{id}/processing", put(claim_command_handler))
        .route("/commands/{id}/complete", put(complete_command_handler));

    Router::new()
        .route("/health", get(health_handler))
        .nest("/api", api)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn cors_layer(allowed_origins: &[String]) -> CorsLayer {
    let layer = CorsLayer::new().allow_methods(Any).allow_headers(Any);
    if allowed_origins.is_empty() {
        return layer.allow_origin(Any);
    }
    let origins: Vec<HeaderValue> = allowed_origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(_) => {
                warn!(origin = %origin, "Ignoring invalid CORS origin");
                None
            }
        })
        .collect();
    layer.allow_origin(AllowOrigin::list(origins))
}

async fn health_handler(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    Json(json!({
        "status": "healthy",
        "uptime_seconds": state.start_time.elapsed().as_secs(),
    }))
}

async fn hook_event_handler(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<LifecycleEvent>, JsonRejection>,
) -> Json<HookResponse> {
    match payload {
        Ok(Json(event)) => Json(state.ingest.handle(event)),
        Err(rejection) => {
            warn!(error = %rejection, "Rejected hook event body");
            Json(HookResponse::proceed(SERVER_ERROR_PROCEEDING))
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct HeartbeatRequest {
    agent_id: String,
}

async fn heartbeat_handler(
    State(state): State<Arc<AppState>>,
    Json(request): Json<HeartbeatRequest>,
) -> Json<serde_json::Value> {
    state.ingest.heartbeat(&request.agent_id);
    Json(json!({ "status": "ok" }))
}

async fn agents_handler(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    Json(json!({
        "agents": state.registry.list(),
        "timestamp": state.clock.now(),
    }))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StreamQuery {
    agent_id: Option<String>,
}

/// Streaming state; dropping it (client went away) unsubscribes from the hub.
struct StreamContext {
    hub: Arc<EventHub>,
    subscription: Subscription,
    heartbeat: tokio::time::Interval,
}

impl StreamContext {
    fn id(&self) -> &SubscriberId {
        &self.subscription.id
    }
}

impl Drop for StreamContext {
    fn drop(&mut self) {
        self.hub.unsubscribe(&self.subscription.id);
    }
}

async fn stream_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<StreamQuery>,
    headers: HeaderMap,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let token = headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .map(|value| value.trim_start_matches("Bearer ").to_string());

    let subscription = state.hub.subscribe(query.agent_id, token);
    let heartbeat = tokio::time::interval_at(
        tokio::time::Instant::now() + STREAM_HEARTBEAT,
        STREAM_HEARTBEAT,
    );
    let context = StreamContext {
        hub: state.hub.clone(),
        subscription,
        heartbeat,
    };

    let stream = futures::stream::unfold(context, |mut context| async move {
        tokio::select! {
            frame = context.subscription.receiver.recv() => {
                let frame = frame?;
                Some((Ok::<_, Infallible>(Event::default().data(frame.to_json())), context))
            }
            _ = context.heartbeat.tick() => {
                context.hub.touch(context.id());
                debug!(subscriber_id = %context.id(), "Stream heartbeat");
                Some((Ok::<_, Infallible>(Event::default().comment("keepalive")), context))
            }
        }
    });

    Sse::new(stream)
}

async fn create_command_handler(
    State(state): State<Arc<AppState>>,
    Json(request): Json<CreateCommandRequest>,
) -> Result<(StatusCode, Json<RemoteCommand>), ApiError> {
    let command = state.broker.create(request)?;
    Ok((StatusCode::CREATED, Json(command)))
}

async fn list_commands_handler(State(state): State<Arc<AppState>>) -> Json<Vec<RemoteCommand>> {
    Json(state.broker.list_all())
}

async fn agent_commands_handler(
    State(state): State<Arc<AppState>>,
    Path(agent_id): Path<String>,
) -> Json<Vec<RemoteCommand>> {
    Json(state.broker.list_by_agent(&agent_id))
}

async fn pending_commands_handler(
    State(state): State<Arc<AppState>>,
    Path(agent_id): Path<String>,
) -> Json<Vec<RemoteCommand>> {
    Json(state.broker.list_pending(&agent_id))
}

async fn interrupt_commands_handler(
    State(state): State<Arc<AppState>>,
    Path(agent_id): Path<String>,
) -> Json<Vec<RemoteCommand>> {
    Json(state.broker.list_interrupts(&agent_id))
}

async fn claim_command_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<RemoteCommand>, ApiError> {
    let command = state.broker.claim(&CommandId(id))?;
    Ok(Json(command))
}

async fn complete_command_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(request): Json<CompleteCommandRequest>,
) -> Result<Json<RemoteCommand>, ApiError> {
    let command = state
        .broker
        .complete(&CommandId(id), request.status, request.result)?;
    Ok(Json(command))
}
