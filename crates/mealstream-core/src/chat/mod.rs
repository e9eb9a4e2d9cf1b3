//! Free-text nutrition questions, answered through the chat cache tier.
//!
//! Answers are streamed from the backend and assembled server-side, so the
//! whole answer is subject to one deadline and one gate permit.

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::cache::{CacheTiers, chat_key};
use crate::config::InferenceConfig;
use crate::gate::{ConcurrencyGate, GateError};
use crate::inference::{ChatMessage, ChatRequest, GenerationOptions, InferenceBackend, InferenceError};
use crate::readiness::ModelReadiness;

const SYSTEM_PROMPT: &str = "You are a friendly, evidence-based nutrition assistant. \
Answer in at most three short paragraphs. If a question needs a doctor, say so.";

/// Longest accepted question, in characters.
pub const MAX_MESSAGE_CHARS: usize = 2000;

/// Errors from answering a chat question.
#[derive(Debug, Error)]
pub enum ChatError {
    #[error("message must not be empty")]
    EmptyMessage,

    #[error("message is longer than 2000 characters")]
    MessageTooLong,

    #[error("assistant timed out after {}s", .0.as_secs())]
    Timeout(Duration),

    #[error("assistant returned an empty answer")]
    EmptyAnswer,

    #[error(transparent)]
    Backend(#[from] InferenceError),

    #[error("assistant is shutting down")]
    GateClosed(#[from] GateError),
}

impl ChatError {
    /// Whether the caller sent a bad question (as opposed to a service failure).
    pub fn is_client_error(&self) -> bool {
        matches!(self, Self::EmptyMessage | Self::MessageTooLong)
    }
}

/// One answer, with whether it came from the cache.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChatAnswer {
    pub answer: String,
    pub cached: bool,
}

/// Answers chat questions through the gate and the chat cache tier.
pub struct ChatService {
    backend: Arc<dyn InferenceBackend>,
    gate: Arc<ConcurrencyGate>,
    readiness: Arc<ModelReadiness>,
    caches: Arc<CacheTiers>,
    options: GenerationOptions,
    timeout: Duration,
}

impl ChatService {
    pub fn new(
        backend: Arc<dyn InferenceBackend>,
        gate: Arc<ConcurrencyGate>,
        readiness: Arc<ModelReadiness>,
        caches: Arc<CacheTiers>,
        config: &InferenceConfig,
    ) -> Self {
        Self {
            backend,
            gate,
            readiness,
            caches,
            options: GenerationOptions {
                token_limit: config.token_limit,
                temperature: config.temperature,
                context_window: config.context_window,
            },
            timeout: config.unit_timeout,
        }
    }

    /// Answer `message`, optionally grounded in `context` (e.g. the user's
    /// current plan summary).
    pub async fn answer(
        &self,
        message: &str,
        context: Option<&str>,
    ) -> Result<ChatAnswer, ChatError> {
        let message = message.trim();
        if message.is_empty() {
            return Err(ChatError::EmptyMessage);
        }
        if message.chars().count() > MAX_MESSAGE_CHARS {
            return Err(ChatError::MessageTooLong);
        }

        let key = chat_key(message, context);
        if let Some(answer) = self.caches.chat.get(&key) {
            debug!("chat answer served from cache");
            return Ok(ChatAnswer {
                answer,
                cached: true,
            });
        }

        let answer = {
            let _permit = self.gate.acquire().await?;
            self.readiness.ensure_warm(self.backend.as_ref()).await;
            let request = self.build_request(message, context);
            tokio::time::timeout(self.timeout, self.collect(&request))
                .await
                .map_err(|_| ChatError::Timeout(self.timeout))??
        };

        let answer = answer.trim().to_string();
        if answer.is_empty() {
            warn!("assistant produced an empty answer");
            return Err(ChatError::EmptyAnswer);
        }

        info!(chars = answer.len(), "chat answer generated");
        self.caches.chat.set(key, answer.clone());
        Ok(ChatAnswer {
            answer,
            cached: false,
        })
    }

    fn build_request(&self, message: &str, context: Option<&str>) -> ChatRequest {
        let mut messages = vec![ChatMessage::system(SYSTEM_PROMPT)];
        if let Some(context) = context.map(str::trim).filter(|c| !c.is_empty()) {
            messages.push(ChatMessage::system(format!("Context about the user:\n{context}")));
        }
        messages.push(ChatMessage::user(message));
        ChatRequest {
            model: self.readiness.current_model(),
            messages,
            options: self.options,
            json_output: false,
        }
    }

    /// Concatenate streamed deltas into the full answer.
    async fn collect(&self, request: &ChatRequest) -> Result<String, InferenceError> {
        let mut stream = self.backend.chat_stream(request).await?;
        let mut answer = String::new();
        while let Some(delta) = stream.next().await {
            answer.push_str(&delta?);
        }
        Ok(answer)
    }
}

impl std::fmt::Debug for ChatService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChatService")
            .field("backend", &self.backend.name())
            .field("options", &self.options)
            .field("timeout", &self.timeout)
            .finish()
    }
}
