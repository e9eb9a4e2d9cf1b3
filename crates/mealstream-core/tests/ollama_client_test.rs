//! Integration tests for the Ollama adapter against an in-process fake
//! server.

use futures::StreamExt;

use mealstream_core::inference::{
    ChatMessage, ChatRequest, GenerationOptions, InferenceBackend, InferenceError, OllamaClient,
};
use mealstream_test_utils::{FakeOllama, meal_json};

fn request(model: &str) -> ChatRequest {
    ChatRequest {
        model: model.to_string(),
        messages: vec![
            ChatMessage::system("You are a dietitian."),
            ChatMessage::user("Create breakfast for Monday."),
        ],
        options: GenerationOptions {
            token_limit: 400,
            temperature: 0.7,
            context_window: 2048,
        },
        json_output: true,
    }
}

#[tokio::test]
async fn ping_hits_tags() {
    let server = FakeOllama::start("unused").await;
    let client = OllamaClient::new(server.base_url()).unwrap();
    client.ping().await.unwrap();
    assert_eq!(client.name(), "ollama");
}

#[tokio::test]
async fn sync_chat_returns_whole_content() {
    let reply = meal_json("Overnight Oats");
    let server = FakeOllama::start(reply.clone()).await;
    let client = OllamaClient::new(server.base_url()).unwrap();

    let response = client.chat(&request("llama3.2:3b")).await.unwrap();
    assert_eq!(response.content, reply);
    assert_eq!(response.model, "llama3.2:3b");

    let sent = server.requests();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0]["stream"], false);
    assert_eq!(sent[0]["format"], "json");
    assert_eq!(sent[0]["options"]["num_predict"], 400);
    assert_eq!(sent[0]["messages"][0]["role"], "system");
}

#[tokio::test]
async fn streamed_deltas_reassemble_to_reply() {
    let reply = "Crème fraîche works well in small amounts 🥣.";
    let server = FakeOllama::start(reply).await;
    let client = OllamaClient::new(server.base_url()).unwrap();

    let deltas: Vec<String> = client
        .chat_stream(&request("llama3.2:3b"))
        .await
        .unwrap()
        .map(|d| d.unwrap())
        .collect()
        .await;
    assert!(deltas.len() > 1);
    assert_eq!(deltas.concat(), reply);
    assert_eq!(server.requests()[0]["stream"], true);
}

#[tokio::test]
async fn missing_model_maps_to_model_not_found() {
    let server = FakeOllama::start("unused").await;
    let client = OllamaClient::new(server.base_url()).unwrap();

    let err = client.chat(&request("missing")).await.unwrap_err();
    assert!(
        matches!(err, InferenceError::ModelNotFound(ref m) if m == "missing"),
        "got {err:?}"
    );
    assert!(client.chat_stream(&request("missing")).await.is_err());
}

#[tokio::test]
async fn wrong_path_maps_to_status_error() {
    let server = FakeOllama::start("unused").await;
    let client = OllamaClient::new(format!("{}/nested", server.base_url())).unwrap();

    let err = client.ping().await.unwrap_err();
    assert!(matches!(err, InferenceError::Status { status: 404, .. }), "got {err:?}");
}
