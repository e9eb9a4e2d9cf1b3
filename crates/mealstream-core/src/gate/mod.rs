//! Global admission gate for inference calls.
//!
//! One [`ConcurrencyGate`] is created at startup and shared by every
//! session. It wraps a fair (FIFO) tokio semaphore, so waiters are admitted
//! in arrival order. The default capacity is a single permit: the inference
//! backend runs on constrained hardware and concurrent requests thrash it.

use std::sync::Arc;
use std::time::Instant;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// Errors from acquiring a gate permit.
#[derive(Debug, thiserror::Error)]
pub enum GateError {
    #[error("generation gate is closed")]
    Closed,
}

/// Bounded admission for generation calls across all sessions.
#[derive(Debug)]
pub struct ConcurrencyGate {
    semaphore: Arc<Semaphore>,
    capacity: usize,
}

/// A held admission permit. Dropping it returns the permit.
#[derive(Debug)]
pub struct GatePermit {
    _permit: OwnedSemaphorePermit,
}

impl GatePermit {
    /// Return the permit explicitly. Equivalent to dropping it.
    pub fn release(self) {}
}

impl ConcurrencyGate {
    /// Create a gate admitting `capacity` callers at once (minimum one).
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            semaphore: Arc::new(Semaphore::new(capacity)),
            capacity,
        }
    }

    /// Wait for a permit.
    ///
    /// Returns [`GateError::Closed`] once [`close`](Self::close) has been
    /// called, including for callers already waiting.
    pub async fn acquire(&self) -> Result<GatePermit, GateError> {
        let started = Instant::now();
        let permit = Arc::clone(&self.semaphore)
            .acquire_owned()
            .await
            .map_err(|_| GateError::Closed)?;
        tracing::debug!(
            waited_ms = started.elapsed().as_millis() as u64,
            "generation gate acquired"
        );
        Ok(GatePermit { _permit: permit })
    }

    /// Configured capacity.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Permits currently held.
    pub fn in_use(&self) -> usize {
        self.capacity
            .saturating_sub(self.semaphore.available_permits())
    }

    /// Refuse all current and future waiters. Held permits stay valid.
    pub fn close(&self) {
        self.semaphore.close();
    }

    pub fn is_closed(&self) -> bool {
        self.semaphore.is_closed()
    }
}

impl Default for ConcurrencyGate {
    fn default() -> Self {
        Self::new(1)
    }
}
