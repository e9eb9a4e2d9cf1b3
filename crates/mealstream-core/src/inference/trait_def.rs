//! The `InferenceBackend` trait: the adapter interface for text generation.
//!
//! The trait is object-safe so the service can hold an
//! `Arc<dyn InferenceBackend>` and tests can swap in scripted backends.

use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;

use super::types::{ChatRequest, ChatResponse, InferenceError};

/// A stream of generated text deltas.
pub type DeltaStream = Pin<Box<dyn Stream<Item = Result<String, InferenceError>> + Send>>;

/// A possibly slow, possibly failing text generation service.
///
/// Implementations must not impose their own short deadlines: callers race
/// every call against a timeout that fits the call's purpose.
#[async_trait]
pub trait InferenceBackend: Send + Sync {
    /// Human-readable backend name for logs (e.g. "ollama").
    fn name(&self) -> &str;

    /// Cheap reachability check. Must return
    /// [`InferenceError::Unreachable`] when nothing answers.
    async fn ping(&self) -> Result<(), InferenceError>;

    /// Generate a complete answer.
    async fn chat(&self, request: &ChatRequest) -> Result<ChatResponse, InferenceError>;

    /// Generate an answer as a stream of text deltas.
    ///
    /// The stream ends after the last delta. Transport failures mid-stream
    /// surface as an `Err` item.
    async fn chat_stream(&self, request: &ChatRequest) -> Result<DeltaStream, InferenceError>;
}

// Compile-time assertion: InferenceBackend must be object-safe.
const _: () = {
    fn _assert_object_safe(_: &dyn InferenceBackend) {}
};
