//! Plan data model: requests, meals, day plans and weekly plans.
//!
//! Everything here is plain data. Wire names are camelCase to match the
//! browser client; enum values are snake_case.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Fixed weekday labels, in plan order.
pub const WEEKDAYS: [&str; 7] = [
    "Monday",
    "Tuesday",
    "Wednesday",
    "Thursday",
    "Friday",
    "Saturday",
    "Sunday",
];

/// Number of days in every weekly plan.
pub const DAYS_PER_PLAN: usize = WEEKDAYS.len();

/// Number of meals in every day plan.
pub const MEALS_PER_DAY: usize = Slot::ALL.len();

// ---------------------------------------------------------------------------
// Enums
// ---------------------------------------------------------------------------

/// Meal slot within a day.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Slot {
    Breakfast,
    Lunch,
    Dinner,
}

impl Slot {
    /// All slots in generation order.
    pub const ALL: [Slot; 3] = [Slot::Breakfast, Slot::Lunch, Slot::Dinner];

    /// Position of this slot within a day.
    pub fn index(self) -> usize {
        match self {
            Self::Breakfast => 0,
            Self::Lunch => 1,
            Self::Dinner => 2,
        }
    }
}

impl fmt::Display for Slot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Breakfast => "breakfast",
            Self::Lunch => "lunch",
            Self::Dinner => "dinner",
        };
        f.write_str(s)
    }
}

impl FromStr for Slot {
    type Err = SlotParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "breakfast" => Ok(Self::Breakfast),
            "lunch" => Ok(Self::Lunch),
            "dinner" => Ok(Self::Dinner),
            other => Err(SlotParseError(other.to_owned())),
        }
    }
}

/// Error returned when parsing an invalid [`Slot`] string.
#[derive(Debug, Clone)]
pub struct SlotParseError(pub String);

impl fmt::Display for SlotParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid meal slot: {:?}", self.0)
    }
}

impl std::error::Error for SlotParseError {}

// ---------------------------------------------------------------------------

/// Primary dietary goal from the user's profile.
///
/// Unknown goal strings deserialize as [`Goal::GeneralHealth`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Goal {
    WeightLoss,
    MuscleGain,
    Maintenance,
    #[serde(other)]
    GeneralHealth,
}

impl fmt::Display for Goal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::WeightLoss => "weight_loss",
            Self::MuscleGain => "muscle_gain",
            Self::Maintenance => "maintenance",
            Self::GeneralHealth => "general_health",
        };
        f.write_str(s)
    }
}

/// Whether consecutive days should vary or repeat.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VarietyMode {
    #[default]
    Varied,
    Consistent,
}

impl fmt::Display for VarietyMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Varied => f.write_str("varied"),
            Self::Consistent => f.write_str("consistent"),
        }
    }
}

// ---------------------------------------------------------------------------
// Request
// ---------------------------------------------------------------------------

/// Demographic profile consumed by plan generation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Profile {
    pub age: u32,
    #[serde(default)]
    pub gender: String,
    /// Body mass in kilograms.
    pub weight: f64,
    #[serde(default)]
    pub activity_level: String,
    pub primary_goal: Goal,
    #[serde(default)]
    pub dietary_restrictions: Vec<String>,
}

/// Inbound plan generation request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanRequest {
    pub profile: Profile,
    /// Budget band, e.g. `"50-100"`.
    #[serde(default)]
    pub budget: String,
    /// Free-text preferences, e.g. `"light dinners"`.
    #[serde(default)]
    pub preferences: String,
    #[serde(default)]
    pub variety_mode: VarietyMode,
}

/// Errors from validating a [`PlanRequest`].
#[derive(Debug, thiserror::Error)]
pub enum RequestError {
    #[error("age must be between 1 and 120, got {0}")]
    InvalidAge(u32),

    #[error("weight must be a positive number of kilograms, got {0}")]
    InvalidWeight(f64),
}

/// Stable, order-independent view of the fields that determine a plan.
///
/// Two requests that normalize to the same value share a cache entry.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NormalizedRequest {
    age: u32,
    gender: String,
    weight: f64,
    activity_level: String,
    goal: Goal,
    restrictions: Vec<String>,
    budget: String,
    preferences: String,
    variety_mode: VarietyMode,
}

impl PlanRequest {
    /// Reject requests no plan could sensibly be generated for.
    pub fn validate(&self) -> Result<(), RequestError> {
        let age = self.profile.age;
        if !(1..=120).contains(&age) {
            return Err(RequestError::InvalidAge(age));
        }
        let weight = self.profile.weight;
        if !weight.is_finite() || weight <= 0.0 {
            return Err(RequestError::InvalidWeight(weight));
        }
        Ok(())
    }

    /// Case-insensitive check for a dietary restriction tag.
    pub fn has_restriction(&self, tag: &str) -> bool {
        self.profile
            .dietary_restrictions
            .iter()
            .any(|r| r.trim().eq_ignore_ascii_case(tag))
    }

    /// Whether the free-text preferences ask for light dinners.
    pub fn wants_light_dinner(&self) -> bool {
        self.preferences.to_lowercase().contains("light")
    }

    /// Normalize the request for cache keying.
    ///
    /// Strings are trimmed and lower-cased; restriction tags are sorted and
    /// deduplicated so their order in the request does not matter.
    pub fn normalized(&self) -> NormalizedRequest {
        let mut restrictions: Vec<String> = self
            .profile
            .dietary_restrictions
            .iter()
            .map(|r| r.trim().to_lowercase())
            .filter(|r| !r.is_empty())
            .collect();
        restrictions.sort();
        restrictions.dedup();

        NormalizedRequest {
            age: self.profile.age,
            gender: self.profile.gender.trim().to_lowercase(),
            weight: self.profile.weight,
            activity_level: self.profile.activity_level.trim().to_lowercase(),
            goal: self.profile.primary_goal,
            restrictions,
            budget: self.budget.trim().to_owned(),
            preferences: self.preferences.trim().to_lowercase(),
            variety_mode: self.variety_mode,
        }
    }
}

// ---------------------------------------------------------------------------
// Plan
// ---------------------------------------------------------------------------

/// A single meal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Item {
    pub slot: Slot,
    pub name: String,
    pub calories: f64,
    pub protein: f64,
    pub carbs: f64,
    pub fat: f64,
    pub ingredients: Vec<String>,
}

/// Nutrient sums across meals or days.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Totals {
    pub calories: f64,
    pub protein: f64,
    pub carbs: f64,
    pub fat: f64,
}

impl Totals {
    /// Sum the nutrients of a list of meals.
    pub fn from_items<'a>(items: impl IntoIterator<Item = &'a Item>) -> Self {
        items
            .into_iter()
            .fold(Self::default(), |acc, item| Self {
                calories: acc.calories + item.calories,
                protein: acc.protein + item.protein,
                carbs: acc.carbs + item.carbs,
                fat: acc.fat + item.fat,
            })
            .rounded()
    }

    /// Sum a list of totals (e.g. day totals into weekly totals).
    pub fn sum<'a>(totals: impl IntoIterator<Item = &'a Totals>) -> Self {
        totals
            .into_iter()
            .fold(Self::default(), |acc, t| Self {
                calories: acc.calories + t.calories,
                protein: acc.protein + t.protein,
                carbs: acc.carbs + t.carbs,
                fat: acc.fat + t.fat,
            })
            .rounded()
    }

    /// Round every field to one decimal place.
    fn rounded(self) -> Self {
        fn r(v: f64) -> f64 {
            (v * 10.0).round() / 10.0
        }
        Self {
            calories: r(self.calories),
            protein: r(self.protein),
            carbs: r(self.carbs),
            fat: r(self.fat),
        }
    }
}

/// One day of meals.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DayPlan {
    /// Weekday label from [`WEEKDAYS`].
    pub day: String,
    pub meals: Vec<Item>,
    pub totals: Totals,
}

impl DayPlan {
    /// Build a day from its meals, deriving the totals.
    pub fn new(day: impl Into<String>, meals: Vec<Item>) -> Self {
        let totals = Totals::from_items(&meals);
        Self {
            day: day.into(),
            meals,
            totals,
        }
    }
}

/// Descriptive metadata attached to a finished plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanMetadata {
    pub created_at: DateTime<Utc>,
    pub goal: Goal,
    pub budget: String,
    pub preferences: String,
    pub variety_mode: VarietyMode,
    /// Model selected when the plan completed.
    pub model: String,
    /// How many meals came from the fallback table.
    pub fallback_meals: usize,
}

/// A complete seven-day plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WeeklyPlan {
    pub days: Vec<DayPlan>,
    pub weekly_totals: Totals,
    pub metadata: PlanMetadata,
}

/// Errors from assembling a [`WeeklyPlan`] with the wrong shape.
#[derive(Debug, thiserror::Error)]
pub enum PlanShapeError {
    #[error("plan must have 7 days, got {0}")]
    DayCount(usize),

    #[error("{day} must have 3 meals, got {count}")]
    MealCount { day: String, count: usize },
}

impl WeeklyPlan {
    /// Assemble the final plan, checking the 7 x 3 shape.
    pub fn assemble(
        days: Vec<DayPlan>,
        request: &PlanRequest,
        model: impl Into<String>,
        fallback_meals: usize,
    ) -> Result<Self, PlanShapeError> {
        if days.len() != DAYS_PER_PLAN {
            return Err(PlanShapeError::DayCount(days.len()));
        }
        if let Some(bad) = days.iter().find(|d| d.meals.len() != MEALS_PER_DAY) {
            return Err(PlanShapeError::MealCount {
                day: bad.day.clone(),
                count: bad.meals.len(),
            });
        }

        let weekly_totals = Totals::sum(days.iter().map(|d| &d.totals));
        Ok(Self {
            days,
            weekly_totals,
            metadata: PlanMetadata {
                created_at: Utc::now(),
                goal: request.profile.primary_goal,
                budget: request.budget.clone(),
                preferences: request.preferences.clone(),
                variety_mode: request.variety_mode,
                model: model.into(),
                fallback_meals,
            },
        })
    }
}

/// Overall progress after `day_index` (zero-based) has completed.
pub fn day_progress_percent(day_index: usize) -> u8 {
    (((day_index + 1) as f64 / DAYS_PER_PLAN as f64) * 100.0).round() as u8
}

/// Overall progress after `units_done` meals have been produced.
pub fn unit_progress_percent(units_done: usize) -> u8 {
    let total = (DAYS_PER_PLAN * MEALS_PER_DAY) as f64;
    ((units_done as f64 / total) * 100.0).round().min(100.0) as u8
}
