//! Single-meal generation with deterministic fallback.
//!
//! [`UnitGenerator::generate`] never fails: any timeout, transport error or
//! unusable output is replaced by an entry from the embedded fallback table.
//!
//! ```text
//! Unit{day, slot} + GenerationContext
//!     |
//!     v
//! prompt::unit_prompt --> backend.chat  (raced against unit_timeout)
//!     |                       |
//!     |          ok           | timeout / error
//!     v                       v
//! parser::parse_item ----> FallbackTable::select(rotation)
//!     |        parse error /
//!     v        diet violation
//! UnitOutcome{item, source}
//! ```

pub mod fallback;
pub mod parser;
pub mod prompt;

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tracing::{info, warn};

use crate::config::InferenceConfig;
use crate::inference::{ChatMessage, ChatRequest, GenerationOptions, InferenceBackend, InferenceError};
use crate::model::{Item, PlanRequest, Slot, WEEKDAYS};

pub use fallback::{Diet, FallbackTable, GoalBucket};
pub use parser::ParseError;

/// One meal position in the plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Unit {
    /// Zero-based day, `0..7`.
    pub day_index: usize,
    pub slot: Slot,
}

impl Unit {
    pub fn new(day_index: usize, slot: Slot) -> Self {
        Self { day_index, slot }
    }

    /// Weekday label of this unit.
    pub fn day(&self) -> &'static str {
        WEEKDAYS[self.day_index.min(WEEKDAYS.len() - 1)]
    }
}

/// Per-session memory carried across units.
#[derive(Debug, Default)]
pub struct GenerationContext {
    earlier: [Vec<String>; 3],
    rotations: [usize; 3],
    fallbacks: usize,
}

impl GenerationContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Remember a produced meal name for its slot.
    pub fn record(&mut self, slot: Slot, name: &str) {
        self.earlier[slot.index()].push(name.to_string());
    }

    /// Meal names already produced for `slot`, in day order.
    pub fn earlier(&self, slot: Slot) -> &[String] {
        &self.earlier[slot.index()]
    }

    /// Monday's meal for `slot`, once produced.
    pub fn first(&self, slot: Slot) -> Option<&str> {
        self.earlier[slot.index()].first().map(String::as_str)
    }

    /// Number of units served from the fallback table so far.
    pub fn fallbacks(&self) -> usize {
        self.fallbacks
    }

    /// Next fallback rotation for `slot`.
    fn next_rotation(&mut self, slot: Slot) -> usize {
        let rotation = self.rotations[slot.index()];
        self.rotations[slot.index()] += 1;
        self.fallbacks += 1;
        rotation
    }
}

/// Why a unit was served from the fallback table.
#[derive(Debug, Clone, Error)]
pub enum UnitFailure {
    #[error("generation timed out after {}s", .0.as_secs())]
    Timeout(Duration),

    #[error(transparent)]
    Backend(#[from] InferenceError),

    #[error(transparent)]
    Parse(#[from] ParseError),
}

/// Where a unit's item came from.
#[derive(Debug, Clone)]
pub enum ItemSource {
    Generated,
    Fallback(UnitFailure),
}

/// The result of one unit.
#[derive(Debug, Clone)]
pub struct UnitOutcome {
    pub item: Item,
    pub source: ItemSource,
}

impl UnitOutcome {
    pub fn is_fallback(&self) -> bool {
        matches!(self.source, ItemSource::Fallback(_))
    }
}

/// Generates one meal at a time against an inference backend.
pub struct UnitGenerator {
    backend: Arc<dyn InferenceBackend>,
    options: GenerationOptions,
    unit_timeout: Duration,
}

impl UnitGenerator {
    pub fn new(backend: Arc<dyn InferenceBackend>, config: &InferenceConfig) -> Self {
        Self {
            backend,
            options: GenerationOptions {
                token_limit: config.token_limit,
                temperature: config.temperature,
                context_window: config.context_window,
            },
            unit_timeout: config.unit_timeout,
        }
    }

    pub fn unit_timeout(&self) -> Duration {
        self.unit_timeout
    }

    /// Produce the meal for `unit` using `model`.
    ///
    /// Always yields an item. The produced name is recorded in `context`.
    pub async fn generate(
        &self,
        request: &PlanRequest,
        unit: Unit,
        model: &str,
        context: &mut GenerationContext,
    ) -> UnitOutcome {
        let outcome = match self.try_generate(request, unit, model, context).await {
            Ok(item) => {
                info!(
                    day = unit.day(),
                    slot = %unit.slot,
                    model,
                    meal = %item.name,
                    "unit generated"
                );
                UnitOutcome {
                    item,
                    source: ItemSource::Generated,
                }
            }
            Err(failure) => {
                let rotation = context.next_rotation(unit.slot);
                let item = FallbackTable::get().select_for(request, unit.slot, rotation);
                warn!(
                    day = unit.day(),
                    slot = %unit.slot,
                    model,
                    reason = %failure,
                    meal = %item.name,
                    "unit served from fallback table"
                );
                UnitOutcome {
                    item,
                    source: ItemSource::Fallback(failure),
                }
            }
        };
        context.record(unit.slot, &outcome.item.name);
        outcome
    }

    async fn try_generate(
        &self,
        request: &PlanRequest,
        unit: Unit,
        model: &str,
        context: &GenerationContext,
    ) -> Result<Item, UnitFailure> {
        let chat = ChatRequest {
            model: model.to_string(),
            messages: vec![
                ChatMessage::system(prompt::system_prompt()),
                ChatMessage::user(prompt::unit_prompt(request, unit, context)),
            ],
            options: self.options,
            json_output: true,
        };

        let response = tokio::time::timeout(self.unit_timeout, self.backend.chat(&chat))
            .await
            .map_err(|_| UnitFailure::Timeout(self.unit_timeout))??;

        let item = parser::parse_item(&response.content, unit.slot, parser::required_diet(request))?;
        Ok(item)
    }
}

impl std::fmt::Debug for UnitGenerator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UnitGenerator")
            .field("backend", &self.backend.name())
            .field("options", &self.options)
            .field("unit_timeout", &self.unit_timeout)
            .finish()
    }
}
