use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Result;
use axum::body::{Body, Bytes};
use axum::extract::State;
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde::de::DeserializeOwned;
use tokio_stream::StreamExt;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;

use mealstream_core::cache::{CacheStats, CacheTiers, ClearedCounts};
use mealstream_core::chat::{ChatError, ChatService};
use mealstream_core::config::ServiceConfig;
use mealstream_core::gate::ConcurrencyGate;
use mealstream_core::inference::{InferenceBackend, OllamaClient};
use mealstream_core::model::{PlanRequest, WeeklyPlan};
use mealstream_core::orchestrator::Orchestrator;
use mealstream_core::readiness::{ModelReadiness, ReadinessState};
use mealstream_core::stream::EventSink;

use crate::config::MealstreamConfig;

/// Frames buffered between a run and a slow client.
const STREAM_BUFFER: usize = 32;

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

pub struct AppError {
    status: StatusCode,
    message: String,
}

impl AppError {
    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: msg.into(),
        }
    }

    pub fn unavailable(msg: impl Into<String>) -> Self {
        Self {
            status: StatusCode::SERVICE_UNAVAILABLE,
            message: msg.into(),
        }
    }

    pub fn internal(err: anyhow::Error) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: format!("{err:#}"),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = serde_json::json!({ "error": self.message });
        (self.status, Json(body)).into_response()
    }
}

impl From<ChatError> for AppError {
    fn from(err: ChatError) -> Self {
        if err.is_client_error() {
            Self::bad_request(err.to_string())
        } else {
            Self::unavailable(err.to_string())
        }
    }
}

// ---------------------------------------------------------------------------
// State
// ---------------------------------------------------------------------------

/// Shared services behind every route. Created once at startup.
#[derive(Clone)]
pub struct AppState {
    orchestrator: Arc<Orchestrator>,
    chat: Arc<ChatService>,
}

impl AppState {
    /// Wire the gate, readiness manager and cache tiers around `backend`.
    pub fn new(backend: Arc<dyn InferenceBackend>, config: &ServiceConfig) -> Self {
        let gate = Arc::new(ConcurrencyGate::new(config.gate.capacity));
        let readiness = Arc::new(ModelReadiness::from_config(&config.inference));
        let caches = Arc::new(CacheTiers::new(&config.cache));
        let chat = ChatService::new(
            Arc::clone(&backend),
            Arc::clone(&gate),
            Arc::clone(&readiness),
            Arc::clone(&caches),
            &config.inference,
        );
        let orchestrator = Orchestrator::new(backend, gate, readiness, caches, &config.inference);
        Self {
            orchestrator: Arc::new(orchestrator),
            chat: Arc::new(chat),
        }
    }

    pub fn gate(&self) -> &Arc<ConcurrencyGate> {
        self.orchestrator.gate()
    }

    pub fn caches(&self) -> &Arc<CacheTiers> {
        self.orchestrator.caches()
    }
}

// ---------------------------------------------------------------------------
// Request / response types
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanResponse {
    pub success: bool,
    pub meal_plan: WeeklyPlan,
    pub cached: bool,
}

#[derive(Debug, Deserialize)]
pub struct ChatBody {
    pub message: String,
    #[serde(default)]
    pub context: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ChatReply {
    pub success: bool,
    pub answer: String,
    pub cached: bool,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub model: String,
    pub readiness: ReadinessState,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GateStatus {
    pub capacity: usize,
    pub in_use: usize,
    pub closed: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadinessStatus {
    pub state: ReadinessState,
    pub current_model: String,
    pub models: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct AdminStatus {
    pub gate: GateStatus,
    pub cache: CacheStats,
    pub readiness: ReadinessStatus,
}

#[derive(Debug, Serialize)]
pub struct ClearResponse {
    pub success: bool,
    pub cleared: ClearedCounts,
}

/// Parse a JSON body, reporting problems as `400 { error }`.
fn parse_body<T: DeserializeOwned>(body: &[u8]) -> Result<T, AppError> {
    serde_json::from_slice(body).map_err(|e| AppError::bad_request(format!("invalid request body: {e}")))
}

fn parse_plan_request(body: &[u8]) -> Result<PlanRequest, AppError> {
    let request: PlanRequest = parse_body(body)?;
    request
        .validate()
        .map_err(|e| AppError::bad_request(e.to_string()))?;
    Ok(request)
}

// ---------------------------------------------------------------------------
// Router
// ---------------------------------------------------------------------------

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/api/meal-plans/generate", post(generate_plan_stream))
        .route("/api/meal-plans", post(generate_plan))
        .route("/api/chat", post(chat))
        .route("/api/health", get(health))
        .route("/api/admin/status", get(admin_status))
        .route("/api/admin/cache/clear", post(clear_cache))
        .route("/api/admin/readiness/reset", post(reset_readiness))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

pub async fn run_serve(config: MealstreamConfig) -> Result<()> {
    let backend = Arc::new(OllamaClient::new(&config.service.inference.base_url)?);
    let state = AppState::new(backend, &config.service);

    let cancel = CancellationToken::new();
    let janitor = state
        .caches()
        .spawn_janitor(config.service.cache.cleanup_interval, cancel.clone());

    let gate = Arc::clone(state.gate());
    let app = build_router(state);
    let addr: SocketAddr = format!("{}:{}", config.bind, config.port).parse()?;
    tracing::info!(
        inference_url = %config.service.inference.base_url,
        model = config.service.inference.primary_model(),
        gate_capacity = config.service.gate.capacity,
        "mealstream serve listening on http://{addr}"
    );
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            // Waiting sessions fail fast with an error event.
            gate.close();
        })
        .await?;

    cancel.cancel();
    let _ = janitor.await;
    tracing::info!("mealstream serve shut down");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to install Ctrl+C handler");
        std::future::pending::<()>().await;
    }
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

/// Cache hit: the plan as JSON. Miss: an event stream fed by a spawned run.
async fn generate_plan_stream(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<Response, AppError> {
    let request = parse_plan_request(&body)?;

    if let Some(plan) = state.orchestrator.cached_plan(&request) {
        tracing::info!("serving cached plan");
        return Ok(Json(PlanResponse {
            success: true,
            meal_plan: plan,
            cached: true,
        })
        .into_response());
    }

    let (sink, rx) = EventSink::channel(STREAM_BUFFER);
    let orchestrator = Arc::clone(&state.orchestrator);
    tokio::spawn(async move {
        orchestrator.run(&request, &sink).await;
    });

    let stream = ReceiverStream::new(rx).map(Ok::<_, Infallible>);
    Response::builder()
        .header(header::CONTENT_TYPE, "text/event-stream")
        .header(header::CACHE_CONTROL, "no-cache")
        .header(header::CONNECTION, "keep-alive")
        .header("x-accel-buffering", "no")
        .body(Body::from_stream(stream))
        .map_err(|e| AppError::internal(e.into()))
}

async fn generate_plan(State(state): State<AppState>, body: Bytes) -> Result<Response, AppError> {
    let request = parse_plan_request(&body)?;

    if let Some(plan) = state.orchestrator.cached_plan(&request) {
        return Ok(Json(PlanResponse {
            success: true,
            meal_plan: plan,
            cached: true,
        })
        .into_response());
    }

    let plan = state
        .orchestrator
        .generate(&request)
        .await
        .map_err(|e| AppError::unavailable(e.to_string()))?;
    Ok(Json(PlanResponse {
        success: true,
        meal_plan: plan,
        cached: false,
    })
    .into_response())
}

async fn chat(State(state): State<AppState>, body: Bytes) -> Result<Response, AppError> {
    let body: ChatBody = parse_body(&body)?;
    let answer = state
        .chat
        .answer(&body.message, body.context.as_deref())
        .await?;
    Ok(Json(ChatReply {
        success: true,
        answer: answer.answer,
        cached: answer.cached,
    })
    .into_response())
}

async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    let readiness = state.orchestrator.readiness();
    Json(HealthResponse {
        status: "ok",
        model: readiness.current_model(),
        readiness: readiness.state(),
    })
}

async fn admin_status(State(state): State<AppState>) -> Json<AdminStatus> {
    let gate = state.gate();
    let readiness = state.orchestrator.readiness();
    Json(AdminStatus {
        gate: GateStatus {
            capacity: gate.capacity(),
            in_use: gate.in_use(),
            closed: gate.is_closed(),
        },
        cache: state.caches().stats(),
        readiness: ReadinessStatus {
            state: readiness.state(),
            current_model: readiness.current_model(),
            models: readiness.models().to_vec(),
        },
    })
}

async fn clear_cache(State(state): State<AppState>) -> Json<ClearResponse> {
    Json(ClearResponse {
        success: true,
        cleared: state.caches().clear(),
    })
}

/// Forget the warm-up result; the next unit or chat walks the model list
/// again from the primary.
async fn reset_readiness(State(state): State<AppState>) -> Json<ReadinessStatus> {
    let readiness = state.orchestrator.readiness();
    readiness.reset();
    Json(ReadinessStatus {
        state: readiness.state(),
        current_model: readiness.current_model(),
        models: readiness.models().to_vec(),
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
