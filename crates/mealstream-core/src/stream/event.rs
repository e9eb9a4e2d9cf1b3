//! Progress events pushed to the client during a run.

use serde::{Deserialize, Serialize};

use crate::model::{Item, Totals, WeeklyPlan};

/// One progress event. Tagged by `type` on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum StreamEvent {
    /// Human-readable progress note.
    Status {
        message: String,
        progress_percent: u8,
    },

    /// One meal finished.
    Meal {
        day_index: usize,
        day: String,
        meal_index: usize,
        item: Item,
    },

    /// All meals of a day finished.
    DayComplete {
        day_index: usize,
        day: String,
        totals: Totals,
        progress_percent: u8,
    },

    /// The canonical finished plan.
    Complete { plan: WeeklyPlan },

    /// The run failed and no further events follow.
    Error { message: String },
}

impl StreamEvent {
    pub fn status(message: impl Into<String>, progress_percent: u8) -> Self {
        Self::Status {
            message: message.into(),
            progress_percent,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
        }
    }

    /// The wire tag of this event.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Status { .. } => "status",
            Self::Meal { .. } => "meal",
            Self::DayComplete { .. } => "day_complete",
            Self::Complete { .. } => "complete",
            Self::Error { .. } => "error",
        }
    }
}
