//! Client-side plan state and the event reducer.

use serde::Serialize;

use crate::model::{DAYS_PER_PLAN, DayPlan, WeeklyPlan};
use crate::stream::StreamEvent;

/// Everything a client needs to render a run in progress.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientState {
    /// Days received so far; the last one may still be filling.
    pub completed_days: Vec<DayPlan>,
    pub current_day_index: usize,
    pub current_meal_index: usize,
    pub is_generating: bool,
    pub error: Option<String>,
    pub status_message: String,
    pub progress_percent: u8,
    /// The canonical plan, once `complete` arrived.
    pub plan: Option<WeeklyPlan>,
}

impl ClientState {
    /// Fresh state for a new request.
    pub fn started() -> Self {
        Self {
            is_generating: true,
            ..Self::default()
        }
    }

    /// Whether a terminal event (`complete` or `error`) has been applied.
    pub fn is_finished(&self) -> bool {
        self.plan.is_some() || self.error.is_some()
    }

    /// Meals received so far across all days.
    pub fn meal_count(&self) -> usize {
        self.completed_days.iter().map(|d| d.meals.len()).sum()
    }

    /// Fold one event into the state. Returns `false` when the event was
    /// ignored because the run already finished.
    pub fn apply(&mut self, event: &StreamEvent) -> bool {
        if self.is_finished() {
            tracing::debug!(kind = event.kind(), "ignoring event after terminal event");
            return false;
        }

        match event {
            StreamEvent::Status {
                message,
                progress_percent,
            } => {
                self.status_message = message.clone();
                self.progress_percent = *progress_percent;
            }
            StreamEvent::Meal { day, item, .. } => {
                let index = self.current_day_index;
                if index >= DAYS_PER_PLAN {
                    tracing::debug!("ignoring meal after the last day");
                    return false;
                }
                while self.completed_days.len() <= index {
                    self.completed_days.push(DayPlan::new(day.clone(), Vec::new()));
                }
                let mut meals = std::mem::take(&mut self.completed_days[index].meals);
                meals.push(item.clone());
                let label = std::mem::take(&mut self.completed_days[index].day);
                self.completed_days[index] = DayPlan::new(label, meals);
                self.current_meal_index += 1;
            }
            StreamEvent::DayComplete {
                progress_percent, ..
            } => {
                self.current_day_index = (self.current_day_index + 1).min(DAYS_PER_PLAN);
                self.current_meal_index = 0;
                self.progress_percent = *progress_percent;
            }
            StreamEvent::Complete { plan } => {
                self.completed_days = plan.days.clone();
                self.current_day_index = plan.days.len();
                self.current_meal_index = 0;
                self.progress_percent = 100;
                self.is_generating = false;
                self.plan = Some(plan.clone());
            }
            StreamEvent::Error { message } => {
                self.error = Some(message.clone());
                self.is_generating = false;
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Item, PlanRequest, Slot, WEEKDAYS};

    fn item(slot: Slot, calories: f64) -> Item {
        Item {
            slot,
            name: format!("{slot} meal"),
            calories,
            protein: 10.0,
            carbs: 10.0,
            fat: 1.0,
            ingredients: vec!["x".into()],
        }
    }

    fn meal(day_index: usize, slot: Slot) -> StreamEvent {
        StreamEvent::Meal {
            day_index,
            day: WEEKDAYS[day_index].to_string(),
            meal_index: slot.index(),
            item: item(slot, 100.0),
        }
    }

    fn day_complete(day_index: usize) -> StreamEvent {
        StreamEvent::DayComplete {
            day_index,
            day: WEEKDAYS[day_index].to_string(),
            totals: Default::default(),
            progress_percent: crate::model::day_progress_percent(day_index),
        }
    }

    fn plan() -> WeeklyPlan {
        let request: PlanRequest = serde_json::from_value(serde_json::json!({
            "profile": {"age": 30, "weight": 70, "primaryGoal": "maintenance"}
        }))
        .unwrap();
        let days = WEEKDAYS
            .iter()
            .map(|d| DayPlan::new(*d, Slot::ALL.iter().map(|s| item(*s, 200.0)).collect()))
            .collect();
        WeeklyPlan::assemble(days, &request, "m", 0).unwrap()
    }

    #[test]
    fn status_updates_message_only() {
        let mut state = ClientState::started();
        assert!(state.apply(&StreamEvent::status("Generating Monday", 0)));
        assert_eq!(state.status_message, "Generating Monday");
        assert!(state.completed_days.is_empty());
        assert!(state.is_generating);
    }

    #[test]
    fn meals_fill_the_current_day_with_running_totals() {
        let mut state = ClientState::started();
        state.apply(&meal(0, Slot::Breakfast));
        state.apply(&meal(0, Slot::Lunch));

        assert_eq!(state.completed_days.len(), 1);
        assert_eq!(state.completed_days[0].day, "Monday");
        assert_eq!(state.completed_days[0].meals.len(), 2);
        assert_eq!(state.completed_days[0].totals.calories, 200.0);
        assert_eq!(state.current_meal_index, 2);

        state.apply(&meal(0, Slot::Dinner));
        state.apply(&day_complete(0));
        assert_eq!(state.current_day_index, 1);
        assert_eq!(state.current_meal_index, 0);
        assert_eq!(state.progress_percent, 14);

        state.apply(&meal(1, Slot::Breakfast));
        assert_eq!(state.completed_days.len(), 2);
        assert_eq!(state.completed_days[1].day, "Tuesday");
        assert_eq!(state.meal_count(), 4);
    }

    #[test]
    fn meals_past_the_last_day_are_ignored() {
        let mut state = ClientState::started();
        for day in 0..DAYS_PER_PLAN {
            for slot in Slot::ALL {
                state.apply(&meal(day, slot));
            }
            state.apply(&day_complete(day));
        }
        assert_eq!(state.current_day_index, DAYS_PER_PLAN);

        assert!(!state.apply(&meal(DAYS_PER_PLAN - 1, Slot::Breakfast)));
        assert_eq!(state.completed_days.len(), DAYS_PER_PLAN);
        assert_eq!(state.meal_count(), 21);
    }

    #[test]
    fn complete_replaces_incremental_state() {
        let mut state = ClientState::started();
        state.apply(&meal(0, Slot::Breakfast));
        let plan = plan();
        state.apply(&StreamEvent::Complete { plan: plan.clone() });

        assert!(!state.is_generating);
        assert_eq!(state.completed_days, plan.days);
        assert_eq!(state.meal_count(), 21);
        assert_eq!(state.progress_percent, 100);
        assert_eq!(state.plan.as_ref(), Some(&plan));
        assert!(!state.apply(&meal(0, Slot::Lunch)));
    }

    #[test]
    fn error_stops_and_later_events_are_ignored() {
        let mut state = ClientState::started();
        state.apply(&StreamEvent::error("backend unreachable"));
        assert_eq!(state.error.as_deref(), Some("backend unreachable"));
        assert!(!state.is_generating);

        assert!(!state.apply(&StreamEvent::status("late", 50)));
        assert_eq!(state.status_message, "");
        assert!(state.is_finished());
    }

    #[test]
    fn state_serializes_camel_case() {
        let value = serde_json::to_value(ClientState::started()).unwrap();
        assert_eq!(value["isGenerating"], true);
        assert!(value.get("completedDays").is_some());
    }
}
