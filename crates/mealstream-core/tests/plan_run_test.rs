//! Integration tests for full plan runs: event ordering, fallbacks, caching,
//! the concurrency bound, disconnects and fatal failures.
//!
//! All runs use scripted in-process backends with short deadlines.

use std::sync::Arc;
use std::time::Duration;

use mealstream_core::cache::CacheTiers;
use mealstream_core::client::{ClientState, consume};
use mealstream_core::config::{CacheConfig, InferenceConfig};
use mealstream_core::gate::ConcurrencyGate;
use mealstream_core::inference::InferenceBackend;
use mealstream_core::model::{DAYS_PER_PLAN, MEALS_PER_DAY, WeeklyPlan};
use mealstream_core::orchestrator::{Orchestrator, OrchestratorError, RunOutcome};
use mealstream_core::readiness::ModelReadiness;
use mealstream_core::stream::{Decoder, EventSink, Frame, SENTINEL, StreamEvent};
use mealstream_core::unit::Diet;
use mealstream_core::unit::parser::diet_violation;

use mealstream_test_utils::{
    CannedBackend, TimingOutBackend, TrackingBackend, UnreachableBackend, sample_request,
};

// ===========================================================================
// Harness
// ===========================================================================

fn config() -> InferenceConfig {
    let mut config = InferenceConfig::new("http://unused")
        .with_models(vec!["primary".into(), "backup".into()])
        .unwrap();
    config.unit_timeout = Duration::from_millis(50);
    config.warmup_timeout = Duration::from_millis(30);
    config
}

fn orchestrator(backend: Arc<dyn InferenceBackend>) -> Orchestrator {
    orchestrator_with_gate(backend, Arc::new(ConcurrencyGate::new(1)))
}

fn orchestrator_with_gate(
    backend: Arc<dyn InferenceBackend>,
    gate: Arc<ConcurrencyGate>,
) -> Orchestrator {
    let config = config();
    Orchestrator::new(
        backend,
        gate,
        Arc::new(ModelReadiness::from_config(&config)),
        Arc::new(CacheTiers::new(&CacheConfig::default())),
        &config,
    )
}

/// Run one streaming session and return its outcome plus every byte sent.
async fn run_collect(orch: &Orchestrator) -> (RunOutcome, Vec<u8>) {
    let (sink, mut rx) = EventSink::channel(16);
    let collector = tokio::spawn(async move {
        let mut bytes = Vec::new();
        while let Some(chunk) = rx.recv().await {
            bytes.extend_from_slice(&chunk);
        }
        bytes
    });
    let outcome = orch.run(&sample_request(), &sink).await;
    drop(sink);
    (outcome, collector.await.unwrap())
}

fn decode(bytes: &[u8]) -> Vec<Frame> {
    let mut decoder = Decoder::new();
    let mut frames = decoder.push(bytes);
    frames.extend(decoder.flush());
    frames
}

fn events(frames: &[Frame]) -> Vec<StreamEvent> {
    frames
        .iter()
        .filter_map(|f| match f {
            Frame::Event(e) => Some(e.clone()),
            _ => None,
        })
        .collect()
}

async fn client_state(bytes: &[u8], chunk: usize) -> ClientState {
    let chunks: Vec<Result<Vec<u8>, std::io::Error>> =
        bytes.chunks(chunk).map(|c| Ok(c.to_vec())).collect();
    consume(futures::stream::iter(chunks), |_, _| {})
        .await
        .unwrap()
}

fn completed(outcome: RunOutcome) -> WeeklyPlan {
    match outcome {
        RunOutcome::Completed(plan) => plan,
        other => panic!("expected a completed run, got {other:?}"),
    }
}

// ===========================================================================
// Scenarios
// ===========================================================================

#[tokio::test]
async fn vegetarian_weight_loss_run_streams_full_week() {
    let orch = orchestrator(Arc::new(CannedBackend::new()));
    let (outcome, bytes) = run_collect(&orch).await;
    let plan = completed(outcome);

    let frames = decode(&bytes);
    assert_eq!(frames.last(), Some(&Frame::Done));
    assert!(bytes.ends_with(SENTINEL));

    let events = events(&frames);
    let percents: Vec<u8> = events
        .iter()
        .filter_map(|e| match e {
            StreamEvent::DayComplete {
                progress_percent, ..
            } => Some(*progress_percent),
            _ => None,
        })
        .collect();
    assert_eq!(percents.len(), DAYS_PER_PLAN);
    assert!(percents.windows(2).all(|w| w[0] < w[1]));
    assert_eq!(percents.last(), Some(&100));

    let completes: Vec<&WeeklyPlan> = events
        .iter()
        .filter_map(|e| match e {
            StreamEvent::Complete { plan } => Some(plan),
            _ => None,
        })
        .collect();
    assert_eq!(completes.len(), 1);
    assert_eq!(completes[0].days.len(), DAYS_PER_PLAN);
    assert_eq!(completes[0], &plan);

    for day in &plan.days {
        for meal in &day.meals {
            assert_eq!(diet_violation(meal, Diet::Vegetarian), None, "{}", meal.name);
        }
    }
    assert_eq!(plan.metadata.fallback_meals, 0);
    assert_eq!(plan.metadata.model, "primary");
}

#[tokio::test]
async fn repeated_request_is_served_from_cache() {
    let backend = Arc::new(CannedBackend::new());
    let orch = orchestrator(Arc::clone(&backend) as Arc<dyn InferenceBackend>);
    let request = sample_request();

    assert!(orch.cached_plan(&request).is_none());
    let (outcome, _) = run_collect(&orch).await;
    let plan = completed(outcome);
    let calls = backend.calls();

    let cached = orch.cached_plan(&request).expect("plan should be cached");
    assert_eq!(
        serde_json::to_vec(&cached).unwrap(),
        serde_json::to_vec(&plan).unwrap()
    );
    assert_eq!(backend.calls(), calls);
}

// ===========================================================================
// Properties
// ===========================================================================

#[tokio::test]
async fn events_are_strictly_ordered() {
    let orch = orchestrator(Arc::new(CannedBackend::new()));
    let (_, bytes) = run_collect(&orch).await;
    let events = events(&decode(&bytes));

    assert_eq!(events[0], StreamEvent::status("Preparing your plan", 0));

    let mut days_done = 0;
    let mut meals_in_day = 0;
    for event in &events {
        match event {
            StreamEvent::Meal {
                day_index,
                meal_index,
                ..
            } => {
                assert_eq!(*day_index, days_done, "meal ahead of its day_complete");
                assert_eq!(*meal_index, meals_in_day);
                meals_in_day += 1;
            }
            StreamEvent::DayComplete { day_index, .. } => {
                assert_eq!(*day_index, days_done);
                assert_eq!(meals_in_day, MEALS_PER_DAY);
                days_done += 1;
                meals_in_day = 0;
            }
            StreamEvent::Complete { .. } => assert_eq!(days_done, DAYS_PER_PLAN),
            StreamEvent::Error { message } => panic!("unexpected error event: {message}"),
            StreamEvent::Status { .. } => {}
        }
    }
    assert!(matches!(events.last(), Some(StreamEvent::Complete { .. })));
}

#[tokio::test]
async fn timeouts_everywhere_still_yield_full_plan() {
    let backend = Arc::new(TimingOutBackend::new());
    let orch = orchestrator(Arc::clone(&backend) as Arc<dyn InferenceBackend>);
    let (outcome, bytes) = run_collect(&orch).await;
    let plan = completed(outcome);

    assert_eq!(plan.metadata.fallback_meals, DAYS_PER_PLAN * MEALS_PER_DAY);
    assert!(plan.days.iter().all(|d| d.meals.len() == MEALS_PER_DAY));
    // Two warm-up attempts, then one call per unit.
    assert_eq!(backend.calls(), 2 + DAYS_PER_PLAN * MEALS_PER_DAY);

    let state = client_state(&bytes, 64).await;
    assert_eq!(state.completed_days.len(), DAYS_PER_PLAN);
    assert_eq!(state.meal_count(), DAYS_PER_PLAN * MEALS_PER_DAY);
    assert!(!state.is_generating);
    assert!(state.error.is_none());
}

#[tokio::test]
async fn client_state_is_independent_of_chunking() {
    let orch = orchestrator(Arc::new(CannedBackend::new()));
    let (_, bytes) = run_collect(&orch).await;

    let reference = client_state(&bytes, bytes.len()).await;
    assert_eq!(reference.meal_count(), DAYS_PER_PLAN * MEALS_PER_DAY);
    for size in [1, 2, 3, 7, 13, 64, 1000] {
        assert_eq!(client_state(&bytes, size).await, reference, "chunk size {size}");
    }

    // Irregular splits from a fixed linear congruential sequence.
    let mut seed: u64 = 0x5eed;
    let mut chunks = Vec::new();
    let mut rest = bytes.as_slice();
    while !rest.is_empty() {
        seed = seed.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
        let n = ((seed >> 33) as usize % 40 + 1).min(rest.len());
        chunks.push(Ok::<_, std::io::Error>(rest[..n].to_vec()));
        rest = &rest[n..];
    }
    let state = consume(futures::stream::iter(chunks), |_, _| {})
        .await
        .unwrap();
    assert_eq!(state, reference);
}

#[tokio::test]
async fn concurrent_sessions_never_overlap_unit_calls() {
    let backend = Arc::new(TrackingBackend::new(Duration::from_millis(2)));
    let orch = Arc::new(orchestrator(
        Arc::clone(&backend) as Arc<dyn InferenceBackend>,
    ));

    let sessions: Vec<_> = (0..3)
        .map(|_| {
            let orch = Arc::clone(&orch);
            tokio::spawn(async move { run_collect(&orch).await.0 })
        })
        .collect();
    for session in sessions {
        completed(session.await.unwrap());
    }

    assert_eq!(backend.peak(), 1);
    // One warm-up for the process, then 21 units per session.
    assert_eq!(backend.calls(), 1 + 3 * DAYS_PER_PLAN * MEALS_PER_DAY);
}

// ===========================================================================
// Failure semantics
// ===========================================================================

#[tokio::test]
async fn unreachable_backend_is_fatal_with_one_error_event() {
    let orch = orchestrator(Arc::new(UnreachableBackend));
    let (outcome, bytes) = run_collect(&orch).await;

    assert!(matches!(
        outcome,
        RunOutcome::Failed(OrchestratorError::BackendUnreachable(_))
    ));
    let frames = decode(&bytes);
    let events = events(&frames);
    assert_eq!(events.len(), 2);
    assert!(matches!(events[1], StreamEvent::Error { .. }));
    assert_eq!(frames.last(), Some(&Frame::Done));
    assert!(orch.cached_plan(&sample_request()).is_none());

    let state = client_state(&bytes, 5).await;
    assert!(state.error.is_some());
    assert!(!state.is_generating);
}

#[tokio::test]
async fn closed_gate_is_fatal() {
    let gate = Arc::new(ConcurrencyGate::new(1));
    gate.close();
    let orch = orchestrator_with_gate(Arc::new(CannedBackend::new()), gate);
    let (outcome, bytes) = run_collect(&orch).await;

    assert!(matches!(
        outcome,
        RunOutcome::Failed(OrchestratorError::GateClosed(_))
    ));
    let events = events(&decode(&bytes));
    let errors: Vec<_> = events
        .iter()
        .filter(|e| matches!(e, StreamEvent::Error { .. }))
        .collect();
    assert_eq!(errors.len(), 1);
    assert!(!events.iter().any(|e| matches!(e, StreamEvent::Meal { .. })));
}

#[tokio::test]
async fn disconnect_stops_run_and_caches_nothing() {
    let backend = Arc::new(TrackingBackend::new(Duration::from_millis(5)));
    let orch = orchestrator(Arc::clone(&backend) as Arc<dyn InferenceBackend>);

    let (sink, mut rx) = EventSink::channel(1);
    let reader = tokio::spawn(async move {
        // Read the opening status and the first two meals, then hang up.
        for _ in 0..4 {
            rx.recv().await;
        }
        drop(rx);
    });

    let outcome = orch.run(&sample_request(), &sink).await;
    reader.await.unwrap();

    assert!(matches!(outcome, RunOutcome::Disconnected));
    assert!(orch.cached_plan(&sample_request()).is_none());
    assert_eq!(orch.gate().in_use(), 0);
    assert!(backend.calls() < 1 + DAYS_PER_PLAN * MEALS_PER_DAY);
}

#[tokio::test]
async fn non_streaming_generate_shares_the_cache() {
    let orch = orchestrator(Arc::new(CannedBackend::new()));
    let plan = orch.generate(&sample_request()).await.unwrap();
    assert_eq!(plan.days.len(), DAYS_PER_PLAN);
    assert_eq!(orch.cached_plan(&sample_request()), Some(plan));

    let orch = orchestrator(Arc::new(UnreachableBackend));
    assert!(matches!(
        orch.generate(&sample_request()).await,
        Err(OrchestratorError::BackendUnreachable(_))
    ));
}

#[tokio::test]
async fn client_leaving_while_queued_costs_no_unit_call() {
    let backend = Arc::new(TrackingBackend::new(Duration::from_millis(5)));
    let gate = Arc::new(ConcurrencyGate::new(1));
    let orch = Arc::new(orchestrator_with_gate(
        Arc::clone(&backend) as Arc<dyn InferenceBackend>,
        Arc::clone(&gate),
    ));

    // Another session holds the only permit.
    let held = gate.acquire().await.unwrap();
    let (sink, rx) = EventSink::channel(16);
    let run = {
        let orch = Arc::clone(&orch);
        tokio::spawn(async move { orch.run(&sample_request(), &sink).await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;
    drop(rx);
    held.release();

    let outcome = run.await.unwrap();
    assert!(matches!(outcome, RunOutcome::Disconnected));
    assert_eq!(backend.calls(), 0);
    assert_eq!(gate.in_use(), 0);
}

#[tokio::test]
async fn repeated_fallback_dinners_vary() {
    let orch = orchestrator(Arc::new(TimingOutBackend::new()));
    let plan = orch.generate(&sample_request()).await.unwrap();

    let dinners: Vec<&str> = plan
        .days
        .iter()
        .map(|d| d.meals[MEALS_PER_DAY - 1].name.as_str())
        .collect();
    let distinct: std::collections::HashSet<_> = dinners.iter().collect();
    assert!(distinct.len() > 1, "every dinner was {:?}", dinners[0]);
    assert_eq!(plan.metadata.fallback_meals, DAYS_PER_PLAN * MEALS_PER_DAY);
}
