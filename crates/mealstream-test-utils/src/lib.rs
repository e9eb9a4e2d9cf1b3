//! Shared test utilities for mealstream integration tests.
//!
//! Provides scripted in-process inference backends, a fake Ollama HTTP
//! server bound to an ephemeral port, and sample plan requests.

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::Router;
use axum::body::Body;
use axum::extract::State;
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use serde_json::{Value, json};
use tokio::task::JoinHandle;

use mealstream_core::inference::{
    ChatRequest, ChatResponse, DeltaStream, InferenceBackend, InferenceError,
};
use mealstream_core::model::PlanRequest;

// ---------------------------------------------------------------------------
// Sample data
// ---------------------------------------------------------------------------

/// A vegetarian weight-loss request that prefers light dinners.
pub fn sample_request_json() -> Value {
    json!({
        "profile": {
            "age": 28,
            "gender": "female",
            "weight": 65,
            "activityLevel": "moderate",
            "primaryGoal": "weight_loss",
            "dietaryRestrictions": ["vegetarian"]
        },
        "budget": "50-100",
        "preferences": "light dinners",
        "varietyMode": "varied"
    })
}

pub fn sample_request() -> PlanRequest {
    serde_json::from_value(sample_request_json()).expect("sample request is valid")
}

/// A valid vegetarian meal reply as the model would write it.
pub fn meal_json(name: &str) -> String {
    json!({
        "name": name,
        "calories": 420,
        "protein": 22,
        "carbs": 48,
        "fat": 14,
        "ingredients": ["chickpeas", "spinach", "brown rice"]
    })
    .to_string()
}

// ---------------------------------------------------------------------------
// Scripted backends
// ---------------------------------------------------------------------------

fn words(text: &str) -> DeltaStream {
    let deltas: Vec<Result<String, InferenceError>> = text
        .split_inclusive(' ')
        .map(|w| Ok(w.to_string()))
        .collect();
    Box::pin(futures::stream::iter(deltas))
}

/// Answers every unit with a valid, numbered meal and every chat with a
/// fixed answer. Counts calls.
#[derive(Debug)]
pub struct CannedBackend {
    answer: String,
    calls: AtomicUsize,
}

impl CannedBackend {
    pub fn new() -> Self {
        Self::with_answer("Lentils are an excellent source of plant protein.")
    }

    pub fn with_answer(answer: impl Into<String>) -> Self {
        Self {
            answer: answer.into(),
            calls: AtomicUsize::new(0),
        }
    }

    /// Generation calls made so far (warm-up included).
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Default for CannedBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl InferenceBackend for CannedBackend {
    fn name(&self) -> &str {
        "canned"
    }

    async fn ping(&self) -> Result<(), InferenceError> {
        Ok(())
    }

    async fn chat(&self, request: &ChatRequest) -> Result<ChatResponse, InferenceError> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(ChatResponse {
            content: format!("```json\n{}\n```", meal_json(&format!("Chickpea Bowl {n}"))),
            model: request.model.clone(),
        })
    }

    async fn chat_stream(&self, _request: &ChatRequest) -> Result<DeltaStream, InferenceError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(words(&self.answer))
    }
}

/// Reachable, but every generation call hangs forever.
#[derive(Debug, Default)]
pub struct TimingOutBackend {
    calls: AtomicUsize,
}

impl TimingOutBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl InferenceBackend for TimingOutBackend {
    fn name(&self) -> &str {
        "timing-out"
    }

    async fn ping(&self) -> Result<(), InferenceError> {
        Ok(())
    }

    async fn chat(&self, _request: &ChatRequest) -> Result<ChatResponse, InferenceError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        futures::future::pending().await
    }

    async fn chat_stream(&self, _request: &ChatRequest) -> Result<DeltaStream, InferenceError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        futures::future::pending().await
    }
}

/// Nothing is listening.
#[derive(Debug, Default)]
pub struct UnreachableBackend;

fn refused() -> InferenceError {
    InferenceError::Unreachable("connection refused".to_string())
}

#[async_trait]
impl InferenceBackend for UnreachableBackend {
    fn name(&self) -> &str {
        "unreachable"
    }

    async fn ping(&self) -> Result<(), InferenceError> {
        Err(refused())
    }

    async fn chat(&self, _request: &ChatRequest) -> Result<ChatResponse, InferenceError> {
        Err(refused())
    }

    async fn chat_stream(&self, _request: &ChatRequest) -> Result<DeltaStream, InferenceError> {
        Err(refused())
    }
}

/// Answers after a delay while recording how many calls overlap.
#[derive(Debug)]
pub struct TrackingBackend {
    delay: Duration,
    active: AtomicUsize,
    peak: AtomicUsize,
    calls: AtomicUsize,
}

impl TrackingBackend {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            active: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
            calls: AtomicUsize::new(0),
        }
    }

    /// Highest number of calls ever in flight at once.
    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    async fn tracked<T>(&self, value: T) -> T {
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        self.calls.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        self.active.fetch_sub(1, Ordering::SeqCst);
        value
    }
}

#[async_trait]
impl InferenceBackend for TrackingBackend {
    fn name(&self) -> &str {
        "tracking"
    }

    async fn ping(&self) -> Result<(), InferenceError> {
        Ok(())
    }

    async fn chat(&self, request: &ChatRequest) -> Result<ChatResponse, InferenceError> {
        let content = self.tracked(meal_json("Tracked Lentil Soup")).await;
        Ok(ChatResponse {
            content,
            model: request.model.clone(),
        })
    }

    async fn chat_stream(&self, _request: &ChatRequest) -> Result<DeltaStream, InferenceError> {
        let text = self.tracked("Tracked answer.".to_string()).await;
        Ok(words(&text))
    }
}

// ---------------------------------------------------------------------------
// Fake Ollama server
// ---------------------------------------------------------------------------

#[derive(Clone)]
struct FakeState {
    reply: Arc<String>,
    requests: Arc<Mutex<Vec<Value>>>,
}

/// An in-process HTTP server speaking enough of the Ollama API for
/// adapter tests. Aborted on drop.
pub struct FakeOllama {
    addr: SocketAddr,
    requests: Arc<Mutex<Vec<Value>>>,
    handle: JoinHandle<()>,
}

impl FakeOllama {
    /// Start a server whose every chat reply is `reply`.
    ///
    /// A request for the model named `missing` gets Ollama's 404.
    pub async fn start(reply: impl Into<String>) -> Self {
        let requests = Arc::new(Mutex::new(Vec::new()));
        let state = FakeState {
            reply: Arc::new(reply.into()),
            requests: Arc::clone(&requests),
        };
        let app = Router::new()
            .route("/api/tags", get(tags))
            .route("/api/chat", post(chat))
            .with_state(state);

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind fake ollama");
        let addr = listener.local_addr().expect("fake ollama addr");
        let handle = tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });
        Self {
            addr,
            requests,
            handle,
        }
    }

    pub fn base_url(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// JSON bodies of every `/api/chat` request received so far.
    pub fn requests(&self) -> Vec<Value> {
        self.requests.lock().expect("requests lock").clone()
    }
}

impl Drop for FakeOllama {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

async fn tags() -> impl IntoResponse {
    axum::Json(json!({"models": [{"name": "llama3.2:3b"}]}))
}

async fn chat(State(state): State<FakeState>, axum::Json(body): axum::Json<Value>) -> Response {
    state.requests.lock().expect("requests lock").push(body.clone());

    let model = body["model"].as_str().unwrap_or_default().to_string();
    if model == "missing" {
        return (
            StatusCode::NOT_FOUND,
            axum::Json(json!({"error": format!("model '{model}' not found")})),
        )
            .into_response();
    }

    if !body["stream"].as_bool().unwrap_or(true) {
        return axum::Json(json!({
            "model": model,
            "message": {"role": "assistant", "content": state.reply.as_str()},
            "done": true
        }))
        .into_response();
    }

    // Stream the reply a few characters per line, then the done marker.
    let chars: Vec<char> = state.reply.chars().collect();
    let mut lines: Vec<String> = chars
        .chunks(4)
        .map(|piece| {
            let content: String = piece.iter().collect();
            format!(
                "{}\n",
                json!({"model": model, "message": {"role": "assistant", "content": content}, "done": false})
            )
        })
        .collect();
    lines.push(format!("{}\n", json!({"model": model, "done": true})));

    let body = Body::from_stream(futures::stream::iter(
        lines.into_iter().map(Ok::<_, Infallible>),
    ));
    Response::builder()
        .header(header::CONTENT_TYPE, "application/x-ndjson")
        .body(body)
        .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
}
