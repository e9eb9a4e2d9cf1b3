//! Request, response and error types shared by inference backends.

use serde::{Deserialize, Serialize};

/// One chat turn.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    /// `system`, `user` or `assistant`.
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }
}

/// Sampling limits for one call.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GenerationOptions {
    /// Maximum tokens to generate.
    pub token_limit: u32,
    pub temperature: f32,
    /// Context window to allocate.
    pub context_window: u32,
}

/// A generation call against one model.
#[derive(Debug, Clone, PartialEq)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub options: GenerationOptions,
    /// Ask the backend to constrain output to JSON.
    pub json_output: bool,
}

/// The complete text of a non-streaming call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatResponse {
    pub content: String,
    /// Model that actually answered.
    pub model: String,
}

/// Errors from talking to an inference backend.
#[derive(Debug, Clone, thiserror::Error)]
pub enum InferenceError {
    /// The backend could not be reached at all (connection refused, DNS).
    #[error("inference backend unreachable: {0}")]
    Unreachable(String),

    #[error("inference request timed out")]
    Timeout,

    #[error("inference backend returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("model {0:?} is not available on the backend")]
    ModelNotFound(String),

    #[error("malformed inference response: {0}")]
    Decode(String),

    #[error("inference transport error: {0}")]
    Transport(String),
}

impl InferenceError {
    /// Whether this error means the backend is down rather than a single
    /// call going wrong.
    pub fn is_unreachable(&self) -> bool {
        matches!(self, Self::Unreachable(_))
    }
}
