//! Embedded fallback meal table.
//!
//! Served whenever a unit cannot be generated. The table lives in
//! `fallback_meals.toml` and is embedded at compile time, so the candidate
//! set for any request is fixed and enumerable.

use std::sync::LazyLock;

use serde::Deserialize;

use crate::model::{Goal, Item, PlanRequest, Slot};

/// Diet flag used to pick fallback meals.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Diet {
    Vegan,
    Vegetarian,
    Standard,
}

impl Diet {
    pub const ALL: [Diet; 3] = [Diet::Vegan, Diet::Vegetarian, Diet::Standard];

    /// Vegan wins over vegetarian; pescatarian is served vegetarian meals.
    pub fn for_request(request: &PlanRequest) -> Self {
        if request.has_restriction("vegan") {
            Self::Vegan
        } else if request.has_restriction("vegetarian") || request.has_restriction("pescatarian")
        {
            Self::Vegetarian
        } else {
            Self::Standard
        }
    }
}

/// Goal grouping used by the fallback table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GoalBucket {
    WeightLoss,
    MuscleGain,
    Balanced,
}

impl GoalBucket {
    pub const ALL: [GoalBucket; 3] = [
        GoalBucket::WeightLoss,
        GoalBucket::MuscleGain,
        GoalBucket::Balanced,
    ];
}

impl From<Goal> for GoalBucket {
    fn from(goal: Goal) -> Self {
        match goal {
            Goal::WeightLoss => Self::WeightLoss,
            Goal::MuscleGain => Self::MuscleGain,
            Goal::Maintenance | Goal::GeneralHealth => Self::Balanced,
        }
    }
}

/// One row of the embedded table.
#[derive(Debug, Clone, Deserialize)]
pub struct FallbackMeal {
    pub diet: Diet,
    pub goal: GoalBucket,
    pub slot: Slot,
    #[serde(default)]
    pub light: bool,
    pub name: String,
    pub calories: f64,
    pub protein: f64,
    pub carbs: f64,
    pub fat: f64,
    pub ingredients: Vec<String>,
}

impl FallbackMeal {
    fn to_item(&self) -> Item {
        Item {
            slot: self.slot,
            name: self.name.clone(),
            calories: self.calories,
            protein: self.protein,
            carbs: self.carbs,
            fat: self.fat,
            ingredients: self.ingredients.clone(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct FallbackFile {
    meals: Vec<FallbackMeal>,
}

static FALLBACK_TOML: &str = include_str!("fallback_meals.toml");

static TABLE: LazyLock<FallbackTable> = LazyLock::new(FallbackTable::load);

/// The parsed fallback table.
#[derive(Debug)]
pub struct FallbackTable {
    meals: Vec<FallbackMeal>,
}

impl FallbackTable {
    /// The process-wide table.
    pub fn get() -> &'static FallbackTable {
        &TABLE
    }

    /// Parse the embedded table.
    ///
    /// # Panics
    ///
    /// Panics if the embedded TOML is malformed or leaves a
    /// (diet, goal, slot) combination without a regular entry. Both are
    /// build-time properties of the binary and covered by tests.
    fn load() -> Self {
        let file: FallbackFile =
            toml::from_str(FALLBACK_TOML).expect("embedded fallback_meals.toml is invalid");
        let table = Self { meals: file.meals };
        for diet in Diet::ALL {
            for goal in GoalBucket::ALL {
                for slot in Slot::ALL {
                    assert!(
                        !table.candidates(diet, goal, slot, false).is_empty(),
                        "fallback table has no {diet:?}/{goal:?}/{slot} meal"
                    );
                }
            }
        }
        table
    }

    /// All entries for an exact key.
    pub fn candidates(
        &self,
        diet: Diet,
        goal: GoalBucket,
        slot: Slot,
        light: bool,
    ) -> Vec<&FallbackMeal> {
        self.meals
            .iter()
            .filter(|m| m.diet == diet && m.goal == goal && m.slot == slot && m.light == light)
            .collect()
    }

    /// Pick the fallback item for a unit.
    ///
    /// Light dinners fall back to regular dinners when no light entry
    /// exists. `rotation` selects among candidates, modulo their count.
    pub fn select(
        &self,
        diet: Diet,
        goal: GoalBucket,
        slot: Slot,
        light_dinner: bool,
        rotation: usize,
    ) -> Item {
        let light = light_dinner && slot == Slot::Dinner;
        let mut pool = self.candidates(diet, goal, slot, light);
        if pool.is_empty() {
            pool = self.candidates(diet, goal, slot, false);
        }
        // Non-empty: checked for every key in `load`.
        pool[rotation % pool.len()].to_item()
    }

    /// Convenience wrapper deriving the key from a request.
    pub fn select_for(&self, request: &PlanRequest, slot: Slot, rotation: usize) -> Item {
        self.select(
            Diet::for_request(request),
            request.profile.primary_goal.into(),
            slot,
            request.wants_light_dinner(),
            rotation,
        )
    }

    pub fn len(&self) -> usize {
        self.meals.len()
    }

    pub fn is_empty(&self) -> bool {
        self.meals.is_empty()
    }
}
