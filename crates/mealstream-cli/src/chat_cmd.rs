use anyhow::{Context, Result, bail};
use serde::Deserialize;

#[derive(Debug, Deserialize)]
pub struct ChatReply {
    pub answer: String,
    #[serde(default)]
    pub cached: bool,
}

/// Ask the server one question.
pub async fn ask(server: &str, message: &str, context: Option<&str>) -> Result<ChatReply> {
    let url = format!("{}/api/chat", server.trim_end_matches('/'));
    let mut body = serde_json::json!({ "message": message });
    if let Some(context) = context {
        body["context"] = serde_json::Value::from(context);
    }

    let response = reqwest::Client::new()
        .post(&url)
        .json(&body)
        .send()
        .await
        .with_context(|| format!("failed to reach mealstream server at {server}"))?;

    let status = response.status();
    if !status.is_success() {
        let body: serde_json::Value = response.json().await.unwrap_or_default();
        let message = body["error"].as_str().unwrap_or("no error message");
        bail!("chat failed ({status}): {message}");
    }
    response.json().await.context("failed to decode chat response")
}

/// Execute `mealstream chat`.
pub async fn run_chat(server: &str, message: &str, context: Option<&str>) -> Result<()> {
    let reply = ask(server, message, context).await?;
    println!("{}", reply.answer);
    if reply.cached {
        tracing::debug!("answer served from cache");
    }
    Ok(())
}
