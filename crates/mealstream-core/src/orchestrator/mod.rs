//! Plan orchestrator: drives 7 days x 3 meals through the gate and pushes
//! ordered progress events.
//!
//! Each run is one sequential control flow. Units never abort a run (they
//! fall back); only a closed gate or an unreachable backend does, and those
//! produce exactly one `error` event followed by the sentinel.

use std::convert::Infallible;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use thiserror::Error;
use tracing::{Instrument, debug, error, info, info_span, warn};
use uuid::Uuid;

use crate::cache::{CacheTiers, plan_key};
use crate::config::InferenceConfig;
use crate::gate::{ConcurrencyGate, GateError};
use crate::inference::{InferenceBackend, InferenceError};
use crate::model::{
    DAYS_PER_PLAN, DayPlan, PlanRequest, PlanShapeError, Slot, WEEKDAYS, WeeklyPlan,
    day_progress_percent, unit_progress_percent,
};
use crate::readiness::ModelReadiness;
use crate::stream::{Disconnected, EventSink, StreamEvent};
use crate::unit::{GenerationContext, Unit, UnitGenerator};

/// Upper bound on the reachability preflight.
const PREFLIGHT_TIMEOUT: Duration = Duration::from_secs(10);

/// Failures that end a run.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("meal plan service is unavailable: {0}")]
    BackendUnreachable(InferenceError),

    #[error("meal plan service is shutting down")]
    GateClosed(#[from] GateError),

    #[error("assembled plan is malformed: {0}")]
    Shape(#[from] PlanShapeError),
}

/// How a streaming run ended.
#[derive(Debug)]
pub enum RunOutcome {
    /// The plan was produced, cached and sent.
    Completed(WeeklyPlan),
    /// The client went away; nothing was cached.
    Disconnected,
    /// A fatal failure; the client received an `error` event.
    Failed(OrchestratorError),
}

/// Internal stop reasons of the row-major loop. `G` is what a vanished
/// consumer looks like to the progress target.
enum Stop<G> {
    Gone(G),
    Fatal(OrchestratorError),
}

impl<G> From<OrchestratorError> for Stop<G> {
    fn from(e: OrchestratorError) -> Self {
        Self::Fatal(e)
    }
}

/// Where a run reports progress.
#[async_trait]
trait Progress: Send + Sync {
    type Gone: Send;

    async fn emit(&self, event: StreamEvent) -> Result<(), Self::Gone>;

    /// Fails once nobody is left to receive events.
    fn check(&self) -> Result<(), Self::Gone>;
}

#[async_trait]
impl Progress for EventSink {
    type Gone = Disconnected;

    async fn emit(&self, event: StreamEvent) -> Result<(), Disconnected> {
        self.send(&event).await
    }

    fn check(&self) -> Result<(), Disconnected> {
        if self.is_closed() {
            Err(Disconnected)
        } else {
            Ok(())
        }
    }
}

/// Progress target of a non-streaming run; it can never go away.
struct Silent;

#[async_trait]
impl Progress for Silent {
    type Gone = Infallible;

    async fn emit(&self, _event: StreamEvent) -> Result<(), Infallible> {
        Ok(())
    }

    fn check(&self) -> Result<(), Infallible> {
        Ok(())
    }
}

/// Runs plan generation sessions against shared gate, readiness and caches.
pub struct Orchestrator {
    backend: Arc<dyn InferenceBackend>,
    gate: Arc<ConcurrencyGate>,
    readiness: Arc<ModelReadiness>,
    caches: Arc<CacheTiers>,
    generator: UnitGenerator,
}

impl Orchestrator {
    pub fn new(
        backend: Arc<dyn InferenceBackend>,
        gate: Arc<ConcurrencyGate>,
        readiness: Arc<ModelReadiness>,
        caches: Arc<CacheTiers>,
        config: &InferenceConfig,
    ) -> Self {
        let generator = UnitGenerator::new(Arc::clone(&backend), config);
        Self {
            backend,
            gate,
            readiness,
            caches,
            generator,
        }
    }

    pub fn gate(&self) -> &Arc<ConcurrencyGate> {
        &self.gate
    }

    pub fn readiness(&self) -> &Arc<ModelReadiness> {
        &self.readiness
    }

    pub fn caches(&self) -> &Arc<CacheTiers> {
        &self.caches
    }

    /// A previously generated plan for an equivalent request, if still fresh.
    pub fn cached_plan(&self, request: &PlanRequest) -> Option<WeeklyPlan> {
        self.caches.plans.get(&plan_key(request))
    }

    /// Run a streaming session, writing frames into `sink`.
    ///
    /// Always ends the stream with the sentinel unless the client is gone.
    pub async fn run(&self, request: &PlanRequest, sink: &EventSink) -> RunOutcome {
        let session_id = Uuid::new_v4();
        let span = info_span!("plan_run", %session_id);
        async {
            let started = Instant::now();
            match self.drive(request, sink).await {
                Ok(plan) => {
                    // The plan is already cached; a client leaving now loses
                    // nothing.
                    if sink.send(&StreamEvent::Complete { plan: plan.clone() }).await.is_err()
                        || sink.finish().await.is_err()
                    {
                        debug!("client left before the final frames");
                    }
                    info!(
                        elapsed_ms = started.elapsed().as_millis() as u64,
                        fallback_meals = plan.metadata.fallback_meals,
                        "plan run completed"
                    );
                    RunOutcome::Completed(plan)
                }
                Err(Stop::Gone(Disconnected)) => {
                    info!(
                        elapsed_ms = started.elapsed().as_millis() as u64,
                        "client disconnected, run abandoned"
                    );
                    RunOutcome::Disconnected
                }
                Err(Stop::Fatal(e)) => {
                    error!(error = %e, "plan run failed");
                    if sink.send(&StreamEvent::error(e.to_string())).await.is_ok() {
                        let _ = sink.finish().await;
                    }
                    RunOutcome::Failed(e)
                }
            }
        }
        .instrument(span)
        .await
    }

    /// Run a session to completion without streaming.
    pub async fn generate(&self, request: &PlanRequest) -> Result<WeeklyPlan, OrchestratorError> {
        let session_id = Uuid::new_v4();
        let span = info_span!("plan_run", %session_id, streaming = false);
        match self.drive(request, &Silent).instrument(span).await {
            Ok(plan) => Ok(plan),
            Err(Stop::Fatal(e)) => Err(e),
            Err(Stop::Gone(never)) => match never {},
        }
    }

    /// The row-major state machine shared by both entry points.
    async fn drive<P: Progress>(
        &self,
        request: &PlanRequest,
        progress: &P,
    ) -> Result<WeeklyPlan, Stop<P::Gone>> {
        progress
            .emit(StreamEvent::status("Preparing your plan", 0))
            .await
            .map_err(Stop::Gone)?;
        self.preflight().await?;

        let mut context = GenerationContext::new();
        let mut days: Vec<DayPlan> = Vec::with_capacity(DAYS_PER_PLAN);

        for (day_index, day) in WEEKDAYS.iter().enumerate() {
            progress
                .emit(StreamEvent::status(
                    format!("Planning {day}"),
                    unit_progress_percent(day_index * Slot::ALL.len()),
                ))
                .await
                .map_err(Stop::Gone)?;

            let mut meals = Vec::with_capacity(Slot::ALL.len());
            for slot in Slot::ALL {
                let unit = Unit::new(day_index, slot);
                let outcome = {
                    let permit = self.gate.acquire().await.map_err(OrchestratorError::from)?;
                    // A consumer that left while queued must not cost a unit call.
                    progress.check().map_err(Stop::Gone)?;
                    self.readiness.ensure_warm(self.backend.as_ref()).await;
                    let model = self.readiness.current_model();
                    let outcome = self
                        .generator
                        .generate(request, unit, &model, &mut context)
                        .await;
                    permit.release();
                    outcome
                };

                progress
                    .emit(StreamEvent::Meal {
                        day_index,
                        day: day.to_string(),
                        meal_index: slot.index(),
                        item: outcome.item.clone(),
                    })
                    .await
                    .map_err(Stop::Gone)?;
                meals.push(outcome.item);
            }

            let day_plan = DayPlan::new(*day, meals);
            progress
                .emit(StreamEvent::DayComplete {
                    day_index,
                    day: day.to_string(),
                    totals: day_plan.totals,
                    progress_percent: day_progress_percent(day_index),
                })
                .await
                .map_err(Stop::Gone)?;
            days.push(day_plan);
        }

        let plan = WeeklyPlan::assemble(
            days,
            request,
            self.readiness.current_model(),
            context.fallbacks(),
        )
        .map_err(OrchestratorError::from)?;
        self.caches.plans.set(plan_key(request), plan.clone());
        Ok(plan)
    }

    /// Fail fast when nothing is listening at the backend address.
    ///
    /// Other ping failures are logged and the run continues: units will
    /// fall back if the backend really is broken.
    async fn preflight(&self) -> Result<(), OrchestratorError> {
        match tokio::time::timeout(PREFLIGHT_TIMEOUT, self.backend.ping()).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) if e.is_unreachable() => Err(OrchestratorError::BackendUnreachable(e)),
            Ok(Err(e)) => {
                warn!(error = %e, "backend preflight failed, continuing");
                Ok(())
            }
            Err(_) => {
                warn!(
                    timeout_secs = PREFLIGHT_TIMEOUT.as_secs(),
                    "backend preflight timed out, continuing"
                );
                Ok(())
            }
        }
    }
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("backend", &self.backend.name())
            .field("gate", &self.gate)
            .field("readiness", &self.readiness.state())
            .field("generator", &self.generator)
            .finish()
    }
}
