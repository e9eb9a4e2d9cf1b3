//! Inference backend interface.
//!
//! This module defines the [`InferenceBackend`] trait the generation core
//! talks to, the request/response types it exchanges, and the
//! [`OllamaClient`] implementation for an Ollama-compatible HTTP server.
//!
//! # Architecture
//!
//! ```text
//! UnitGenerator / ModelReadiness / ChatService
//!     |
//!     v
//! Arc<dyn InferenceBackend>
//!     |   ping()                 -- reachability preflight
//!     |   chat(request)          -- one complete answer
//!     |   chat_stream(request)   -- Stream<delta>
//!     v
//! OllamaClient --HTTP--> /api/chat, /api/tags
//! ```

pub mod ollama;
pub mod trait_def;
pub mod types;

pub use ollama::OllamaClient;
pub use trait_def::{DeltaStream, InferenceBackend};
pub use types::{ChatMessage, ChatRequest, ChatResponse, GenerationOptions, InferenceError};
