//! Ollama HTTP adapter.
//!
//! Talks to `POST /api/chat` (sync and NDJSON streaming) and
//! `GET /api/tags` (reachability). Only a connect timeout is set on the
//! HTTP client; per-call deadlines belong to the caller.

use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::trait_def::{DeltaStream, InferenceBackend};
use super::types::{ChatMessage, ChatRequest, ChatResponse, InferenceError};

const CONNECT_TIMEOUT_SECS: u64 = 5;

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
struct OllamaChatBody<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    format: Option<&'static str>,
    options: OllamaOptions,
}

#[derive(Debug, Serialize)]
struct OllamaOptions {
    num_predict: u32,
    temperature: f32,
    num_ctx: u32,
}

#[derive(Debug, Deserialize)]
struct OllamaChatReply {
    #[serde(default)]
    model: String,
    message: Option<OllamaReplyMessage>,
    #[serde(default)]
    done: bool,
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OllamaReplyMessage {
    #[serde(default)]
    content: String,
}

fn chat_body(request: &ChatRequest, stream: bool) -> OllamaChatBody<'_> {
    OllamaChatBody {
        model: &request.model,
        messages: &request.messages,
        stream,
        format: request.json_output.then_some("json"),
        options: OllamaOptions {
            num_predict: request.options.token_limit,
            temperature: request.options.temperature,
            num_ctx: request.options.context_window,
        },
    }
}

/// One decoded NDJSON line from a streaming reply.
#[derive(Debug, PartialEq, Eq)]
struct StreamLine {
    delta: String,
    done: bool,
}

/// Decode one NDJSON line. Blank lines decode to `None`.
fn parse_stream_line(line: &[u8]) -> Result<Option<StreamLine>, InferenceError> {
    let text = std::str::from_utf8(line)
        .map_err(|e| InferenceError::Decode(format!("stream line is not UTF-8: {e}")))?
        .trim();
    if text.is_empty() {
        return Ok(None);
    }

    let reply: OllamaChatReply = serde_json::from_str(text)
        .map_err(|e| InferenceError::Decode(format!("bad stream line: {e}")))?;
    if let Some(error) = reply.error {
        return Err(InferenceError::Transport(error));
    }

    Ok(Some(StreamLine {
        delta: reply.message.map(|m| m.content).unwrap_or_default(),
        done: reply.done,
    }))
}

fn map_send_error(e: reqwest::Error) -> InferenceError {
    if e.is_connect() {
        InferenceError::Unreachable(e.to_string())
    } else if e.is_timeout() {
        InferenceError::Timeout
    } else {
        InferenceError::Transport(e.to_string())
    }
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

/// Inference backend for an Ollama-compatible server.
#[derive(Debug, Clone)]
pub struct OllamaClient {
    base_url: String,
    client: reqwest::Client,
}

impl OllamaClient {
    /// Create a client for the server at `base_url`
    /// (e.g. `http://localhost:11434`).
    pub fn new(base_url: impl Into<String>) -> Result<Self, InferenceError> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(CONNECT_TIMEOUT_SECS))
            .build()
            .map_err(|e| InferenceError::Transport(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    /// Send a chat request and turn HTTP failures into typed errors.
    async fn post_chat(
        &self,
        request: &ChatRequest,
        stream: bool,
    ) -> Result<reqwest::Response, InferenceError> {
        let response = self
            .client
            .post(self.url("api/chat"))
            .json(&chat_body(request, stream))
            .send()
            .await
            .map_err(map_send_error)?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        if status == reqwest::StatusCode::NOT_FOUND && body.contains("not found") {
            return Err(InferenceError::ModelNotFound(request.model.clone()));
        }
        Err(InferenceError::Status {
            status: status.as_u16(),
            body,
        })
    }
}

#[async_trait]
impl InferenceBackend for OllamaClient {
    fn name(&self) -> &str {
        "ollama"
    }

    async fn ping(&self) -> Result<(), InferenceError> {
        let response = self
            .client
            .get(self.url("api/tags"))
            .send()
            .await
            .map_err(map_send_error)?;
        if !response.status().is_success() {
            return Err(InferenceError::Status {
                status: response.status().as_u16(),
                body: response.text().await.unwrap_or_default(),
            });
        }
        Ok(())
    }

    async fn chat(&self, request: &ChatRequest) -> Result<ChatResponse, InferenceError> {
        let response = self.post_chat(request, false).await?;
        let reply: OllamaChatReply = response
            .json()
            .await
            .map_err(|e| InferenceError::Decode(e.to_string()))?;
        if let Some(error) = reply.error {
            return Err(InferenceError::Transport(error));
        }

        let content = reply.message.map(|m| m.content).unwrap_or_default();
        debug!(model = %request.model, chars = content.len(), "received chat reply");
        Ok(ChatResponse {
            content,
            model: if reply.model.is_empty() {
                request.model.clone()
            } else {
                reply.model
            },
        })
    }

    async fn chat_stream(&self, request: &ChatRequest) -> Result<DeltaStream, InferenceError> {
        let response = self.post_chat(request, true).await?;
        let mut bytes = response.bytes_stream();

        // NDJSON: a reply line may straddle network chunks, so buffer until
        // a newline arrives.
        let stream = async_stream::try_stream! {
            let mut buffer: Vec<u8> = Vec::new();
            let mut finished = false;
            while !finished {
                let Some(chunk) = bytes.next().await else {
                    break;
                };
                let chunk = chunk.map_err(map_send_error)?;
                buffer.extend_from_slice(&chunk);

                while let Some(pos) = buffer.iter().position(|b| *b == b'\n') {
                    let line: Vec<u8> = buffer.drain(..=pos).collect();
                    if let Some(parsed) = parse_stream_line(&line)? {
                        if !parsed.delta.is_empty() {
                            yield parsed.delta;
                        }
                        if parsed.done {
                            finished = true;
                            break;
                        }
                    }
                }
            }

            if !finished {
                if let Some(parsed) = parse_stream_line(&buffer)? {
                    if !parsed.delta.is_empty() {
                        yield parsed.delta;
                    }
                }
            }
        };

        Ok(Box::pin(stream))
    }
}
