//! Chat answers through the real Ollama adapter against a fake server.

use std::sync::Arc;
use std::time::Duration;

use mealstream_core::cache::CacheTiers;
use mealstream_core::chat::{ChatError, ChatService};
use mealstream_core::config::{CacheConfig, InferenceConfig};
use mealstream_core::gate::ConcurrencyGate;
use mealstream_core::inference::OllamaClient;
use mealstream_core::readiness::{ModelReadiness, ReadinessState};
use mealstream_test_utils::FakeOllama;

fn service(base_url: &str, models: &[&str]) -> (ChatService, Arc<ModelReadiness>) {
    let mut config = InferenceConfig::new(base_url)
        .with_models(models.iter().map(|m| m.to_string()).collect())
        .unwrap();
    config.unit_timeout = Duration::from_secs(5);
    config.warmup_timeout = Duration::from_secs(2);

    let readiness = Arc::new(ModelReadiness::from_config(&config));
    let service = ChatService::new(
        Arc::new(OllamaClient::new(base_url).unwrap()),
        Arc::new(ConcurrencyGate::new(1)),
        Arc::clone(&readiness),
        Arc::new(CacheTiers::new(&CacheConfig::default())),
        &config,
    );
    (service, readiness)
}

#[tokio::test]
async fn streamed_answer_is_assembled_and_cached() {
    let fake = FakeOllama::start("Beans and rice make a complete protein.").await;
    let (service, readiness) = service(&fake.base_url(), &["llama3.2:3b"]);

    let answer = service.answer("Is rice and beans enough protein?", None).await.unwrap();
    assert_eq!(answer.answer, "Beans and rice make a complete protein.");
    assert!(!answer.cached);
    assert_eq!(readiness.state(), ReadinessState::Warm);

    let again = service.answer("is rice and beans enough protein?", None).await.unwrap();
    assert!(again.cached);

    // Warm-up (sync) plus one streamed answer; the cached answer made no call.
    let requests = fake.requests();
    assert_eq!(requests.len(), 2);
    assert_eq!(requests[0]["stream"], false);
    assert_eq!(requests[1]["stream"], true);
    assert_eq!(requests[1]["model"], "llama3.2:3b");
}

#[tokio::test]
async fn missing_first_model_falls_through_to_next() {
    let fake = FakeOllama::start("Yes.").await;
    let (service, readiness) = service(&fake.base_url(), &["missing", "llama3.2:1b"]);

    let answer = service.answer("Are eggs vegetarian?", Some("ovo-lacto")).await.unwrap();
    assert_eq!(answer.answer, "Yes.");
    assert_eq!(readiness.current_model(), "llama3.2:1b");

    let last = fake.requests().pop().unwrap();
    assert_eq!(last["model"], "llama3.2:1b");
    let system_prompts: Vec<&str> = last["messages"]
        .as_array()
        .unwrap()
        .iter()
        .filter(|m| m["role"] == "system")
        .filter_map(|m| m["content"].as_str())
        .collect();
    assert!(system_prompts.iter().any(|c| c.contains("ovo-lacto")));
}

#[tokio::test]
async fn only_missing_model_is_a_backend_error() {
    let fake = FakeOllama::start("unused").await;
    let (service, readiness) = service(&fake.base_url(), &["missing"]);

    let err = service.answer("hello", None).await.unwrap_err();
    assert!(matches!(err, ChatError::Backend(_)), "unexpected: {err}");
    assert!(!err.is_client_error());
    assert_eq!(readiness.state(), ReadinessState::Exhausted);
}
