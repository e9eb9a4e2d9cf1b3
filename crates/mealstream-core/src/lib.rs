//! Streaming meal-plan generation core.
//!
//! # Architecture
//!
//! ```text
//! PlanRequest
//!     |
//!     v
//! Orchestrator --cache hit--> WeeklyPlan (cached: true)
//!     |
//!     |  for day in 0..7, for slot in [breakfast, lunch, dinner]:
//!     |      ConcurrencyGate::acquire
//!     |      ModelReadiness::ensure_warm
//!     |      UnitGenerator::generate --timeout/parse failure--> fallback table
//!     |      (permit released)
//!     |      EventSink::send(meal)
//!     |  EventSink::send(day_complete) after each day
//!     v
//! EventSink::send(complete) + sentinel --> StreamConsumer (client) --> ClientState
//! ```

pub mod cache;
pub mod chat;
pub mod client;
pub mod config;
pub mod gate;
pub mod inference;
pub mod model;
pub mod orchestrator;
pub mod readiness;
pub mod stream;
pub mod unit;
