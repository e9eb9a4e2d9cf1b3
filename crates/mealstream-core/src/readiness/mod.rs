//! Model warm-up and selection.
//!
//! [`ModelReadiness`] walks the prioritized model list once, issuing a tiny
//! generation call to each model until one answers. The outcome sticks for
//! the process lifetime (until [`ModelReadiness::reset`]): either a model is
//! `warm`, or the whole list failed and the manager is `exhausted`, in which
//! case real requests go to the primary model and rely on unit fallbacks.

use std::fmt;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use serde::Serialize;
use tracing::{info, warn};

use crate::config::InferenceConfig;
use crate::inference::{ChatMessage, ChatRequest, GenerationOptions, InferenceBackend};

const WARMUP_PROMPT: &str = "Reply with OK.";
const WARMUP_TOKEN_LIMIT: u32 = 5;
const WARMUP_CONTEXT_WINDOW: u32 = 512;

/// Warm-up state of the inference backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReadinessState {
    /// No warm-up attempted yet.
    Cold,
    /// The selected model answered a warm-up call.
    Warm,
    /// Every model failed warm-up; the primary is selected.
    Exhausted,
}

impl fmt::Display for ReadinessState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Cold => f.write_str("cold"),
            Self::Warm => f.write_str("warm"),
            Self::Exhausted => f.write_str("exhausted"),
        }
    }
}

#[derive(Debug)]
struct Selection {
    state: ReadinessState,
    index: usize,
}

/// Tracks which model to use and whether it has been warmed.
#[derive(Debug)]
pub struct ModelReadiness {
    models: Vec<String>,
    warmup_timeout: Duration,
    selection: Mutex<Selection>,
    /// Serializes warm-up walks.
    warming: tokio::sync::Mutex<()>,
}

impl ModelReadiness {
    /// Create a manager over `models` (highest priority first).
    ///
    /// An empty list falls back to the default model list.
    pub fn new(models: Vec<String>, warmup_timeout: Duration) -> Self {
        let models = if models.is_empty() {
            InferenceConfig::DEFAULT_MODELS
                .iter()
                .map(|m| m.to_string())
                .collect()
        } else {
            models
        };
        Self {
            models,
            warmup_timeout,
            selection: Mutex::new(Selection {
                state: ReadinessState::Cold,
                index: 0,
            }),
            warming: tokio::sync::Mutex::new(()),
        }
    }

    pub fn from_config(config: &InferenceConfig) -> Self {
        Self::new(config.models.clone(), config.warmup_timeout)
    }

    pub fn state(&self) -> ReadinessState {
        self.lock().state
    }

    /// The model every generation call should use right now.
    pub fn current_model(&self) -> String {
        let index = self.lock().index;
        self.models[index.min(self.models.len() - 1)].clone()
    }

    pub fn models(&self) -> &[String] {
        &self.models
    }

    /// Warm the backend if that has not happened yet.
    ///
    /// Returns immediately in the `warm` and `exhausted` states. Never
    /// fails: when no model answers the manager becomes `exhausted`.
    pub async fn ensure_warm(&self, backend: &dyn InferenceBackend) -> ReadinessState {
        if self.state() != ReadinessState::Cold {
            return self.state();
        }

        let _warming = self.warming.lock().await;
        // Another caller may have finished the walk while we waited.
        let start = {
            let selection = self.lock();
            if selection.state != ReadinessState::Cold {
                return selection.state;
            }
            selection.index
        };

        for index in start..self.models.len() {
            let model = &self.models[index];
            self.lock().index = index;

            match tokio::time::timeout(self.warmup_timeout, backend.chat(&warmup_request(model)))
                .await
            {
                Ok(Ok(_)) => {
                    info!(model = %model, backend = backend.name(), "model warmed");
                    self.lock().state = ReadinessState::Warm;
                    return ReadinessState::Warm;
                }
                Ok(Err(e)) => {
                    warn!(model = %model, error = %e, "model warm-up failed, trying next");
                }
                Err(_) => {
                    warn!(
                        model = %model,
                        timeout_secs = self.warmup_timeout.as_secs(),
                        "model warm-up timed out, trying next"
                    );
                }
            }
        }

        warn!(
            primary = %self.models[0],
            "no model answered warm-up, continuing with the primary model"
        );
        let mut selection = self.lock();
        selection.state = ReadinessState::Exhausted;
        selection.index = 0;
        ReadinessState::Exhausted
    }

    /// Return to `cold` with the primary model selected.
    pub fn reset(&self) {
        let mut selection = self.lock();
        selection.state = ReadinessState::Cold;
        selection.index = 0;
        info!("model readiness reset");
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Selection> {
        // The guarded data is two plain fields; a panic mid-update cannot
        // leave it inconsistent.
        self.selection.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn warmup_request(model: &str) -> ChatRequest {
    ChatRequest {
        model: model.to_string(),
        messages: vec![ChatMessage::user(WARMUP_PROMPT)],
        options: GenerationOptions {
            token_limit: WARMUP_TOKEN_LIMIT,
            temperature: 0.0,
            context_window: WARMUP_CONTEXT_WINDOW,
        },
        json_output: false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inference::{ChatResponse, DeltaStream, InferenceError};
    use async_trait::async_trait;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Answers only for the models in `healthy`; counts calls.
    struct PickyBackend {
        healthy: Vec<&'static str>,
        calls: AtomicUsize,
        delay: Duration,
    }

    impl PickyBackend {
        fn new(healthy: Vec<&'static str>) -> Self {
            Self {
                healthy,
                calls: AtomicUsize::new(0),
                delay: Duration::ZERO,
            }
        }
    }

    #[async_trait]
    impl InferenceBackend for PickyBackend {
        fn name(&self) -> &str {
            "picky"
        }

        async fn ping(&self) -> Result<(), InferenceError> {
            Ok(())
        }

        async fn chat(&self, request: &ChatRequest) -> Result<ChatResponse, InferenceError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            if self.healthy.contains(&request.model.as_str()) {
                Ok(ChatResponse {
                    content: "OK".into(),
                    model: request.model.clone(),
                })
            } else {
                Err(InferenceError::ModelNotFound(request.model.clone()))
            }
        }

        async fn chat_stream(&self, _request: &ChatRequest) -> Result<DeltaStream, InferenceError> {
            Err(InferenceError::Transport("not scripted".into()))
        }
    }

    fn manager() -> ModelReadiness {
        ModelReadiness::new(
            vec!["big".into(), "medium".into(), "small".into()],
            Duration::from_secs(1),
        )
    }

    #[tokio::test]
    async fn first_healthy_model_is_selected_once() {
        let readiness = manager();
        let backend = PickyBackend::new(vec!["medium", "small"]);
        assert_eq!(readiness.state(), ReadinessState::Cold);

        assert_eq!(readiness.ensure_warm(&backend).await, ReadinessState::Warm);
        assert_eq!(readiness.current_model(), "medium");
        assert_eq!(backend.calls.load(Ordering::SeqCst), 2);

        // Warm is sticky: no further calls.
        readiness.ensure_warm(&backend).await;
        assert_eq!(backend.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn exhausted_list_returns_to_primary_and_stops_retrying() {
        let readiness = manager();
        let backend = PickyBackend::new(vec![]);

        assert_eq!(
            readiness.ensure_warm(&backend).await,
            ReadinessState::Exhausted
        );
        assert_eq!(readiness.current_model(), "big");
        assert_eq!(backend.calls.load(Ordering::SeqCst), 3);

        readiness.ensure_warm(&backend).await;
        assert_eq!(backend.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn reset_allows_a_new_walk() {
        let readiness = manager();
        let backend = PickyBackend::new(vec!["small"]);
        readiness.ensure_warm(&backend).await;
        assert_eq!(readiness.current_model(), "small");

        readiness.reset();
        assert_eq!(readiness.state(), ReadinessState::Cold);
        assert_eq!(readiness.current_model(), "big");

        let backend = PickyBackend::new(vec!["big"]);
        readiness.ensure_warm(&backend).await;
        assert_eq!(readiness.current_model(), "big");
        assert_eq!(backend.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn slow_model_times_out_and_next_is_tried() {
        let readiness = ModelReadiness::new(
            vec!["big".into(), "small".into()],
            Duration::from_millis(20),
        );
        let mut backend = PickyBackend::new(vec!["big", "small"]);
        backend.delay = Duration::from_millis(50);
        // Every call is slower than the warm-up deadline.
        assert_eq!(
            readiness.ensure_warm(&backend).await,
            ReadinessState::Exhausted
        );
        assert_eq!(backend.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn concurrent_callers_share_one_walk() {
        let readiness = Arc::new(manager());
        let backend = Arc::new(PickyBackend {
            delay: Duration::from_millis(10),
            ..PickyBackend::new(vec!["big"])
        });

        let tasks: Vec<_> = (0..5)
            .map(|_| {
                let readiness = Arc::clone(&readiness);
                let backend = Arc::clone(&backend);
                tokio::spawn(async move { readiness.ensure_warm(backend.as_ref()).await })
            })
            .collect();
        for t in tasks {
            assert_eq!(t.await.unwrap(), ReadinessState::Warm);
        }
        assert_eq!(backend.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn empty_model_list_uses_defaults() {
        let readiness = ModelReadiness::new(vec![], Duration::from_secs(1));
        assert_eq!(readiness.current_model(), InferenceConfig::DEFAULT_MODELS[0]);
        assert_eq!(ReadinessState::Exhausted.to_string(), "exhausted");
    }
}
