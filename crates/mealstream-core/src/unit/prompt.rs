//! Prompt construction for a single meal.
//!
//! Each call asks for exactly one meal as one JSON object, which keeps the
//! output short enough for small local models.

use super::{GenerationContext, Unit};
use crate::model::{Goal, PlanRequest, Slot, VarietyMode};

const OUTPUT_CONTRACT: &str = r#"Respond with ONE JSON object and nothing else, using exactly these keys:
{"name": string, "calories": number, "protein": number, "carbs": number, "fat": number, "ingredients": [string]}
Macros are grams. Do not wrap the object in Markdown. Do not add commentary."#;

/// Rough daily calorie target for a goal.
fn daily_calories(goal: Goal) -> u32 {
    match goal {
        Goal::WeightLoss => 1600,
        Goal::MuscleGain => 2600,
        Goal::Maintenance | Goal::GeneralHealth => 2100,
    }
}

/// Share of the daily calories a slot should carry, in percent.
fn slot_share(slot: Slot) -> u32 {
    match slot {
        Slot::Breakfast => 25,
        Slot::Lunch => 35,
        Slot::Dinner => 40,
    }
}

/// Approximate calories for one meal, rounded to the nearest 10.
pub fn target_calories(goal: Goal, slot: Slot, light_dinner: bool) -> u32 {
    let mut share = slot_share(slot);
    if light_dinner && slot == Slot::Dinner {
        share = 25;
    }
    let raw = daily_calories(goal) * share / 100;
    (raw + 5) / 10 * 10
}

/// The system message shared by every unit of a plan.
pub fn system_prompt() -> String {
    let mut prompt = String::with_capacity(512);
    prompt.push_str(
        "You are a registered dietitian writing one meal of a weekly meal plan. \
         Meals must be realistic, affordable home cooking.\n\n",
    );
    prompt.push_str(OUTPUT_CONTRACT);
    prompt
}

/// The user message for one unit.
pub fn unit_prompt(request: &PlanRequest, unit: Unit, context: &GenerationContext) -> String {
    let profile = &request.profile;
    let light = request.wants_light_dinner() && unit.slot == Slot::Dinner;
    let mut prompt = String::with_capacity(1024);

    prompt.push_str(&format!("Create {} for {}.\n\n", unit.slot, unit.day()));

    prompt.push_str("Profile:\n");
    prompt.push_str(&format!("- Age: {}\n", profile.age));
    if !profile.gender.is_empty() {
        prompt.push_str(&format!("- Gender: {}\n", profile.gender));
    }
    prompt.push_str(&format!("- Weight: {} kg\n", profile.weight));
    if !profile.activity_level.is_empty() {
        prompt.push_str(&format!("- Activity level: {}\n", profile.activity_level));
    }
    prompt.push_str(&format!("- Goal: {}\n", profile.primary_goal));

    if profile.dietary_restrictions.is_empty() {
        prompt.push_str("- Dietary restrictions: none\n");
    } else {
        prompt.push_str(&format!(
            "- Dietary restrictions: {} (strict, never include forbidden ingredients)\n",
            profile.dietary_restrictions.join(", ")
        ));
    }
    if !request.budget.is_empty() {
        prompt.push_str(&format!("- Weekly budget: {}\n", request.budget));
    }
    if !request.preferences.is_empty() {
        prompt.push_str(&format!("- Preferences: {}\n", request.preferences));
    }

    prompt.push_str(&format!(
        "\nTarget about {} kcal for this meal",
        target_calories(profile.primary_goal, unit.slot, light)
    ));
    prompt.push_str(if light { " and keep it light.\n" } else { ".\n" });

    match request.variety_mode {
        VarietyMode::Varied => {
            let earlier = context.earlier(unit.slot);
            if !earlier.is_empty() {
                prompt.push_str(&format!(
                    "Do not repeat any {} already planned this week: {}.\n",
                    unit.slot,
                    earlier.join("; ")
                ));
            }
        }
        VarietyMode::Consistent => {
            if let Some(first) = context.first(unit.slot) {
                prompt.push_str(&format!(
                    "Keep it close to Monday's {}: {}. Small variations are fine.\n",
                    unit.slot, first
                ));
            }
        }
    }

    prompt
}
