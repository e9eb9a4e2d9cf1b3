//! Lenient parsing of a generated meal.
//!
//! Small models wrap JSON in Markdown fences, add prose around it, nest the
//! meal under a key, or write numbers as `"450 kcal"`. The parser accepts
//! all of that and rejects anything that would produce a partial or
//! implausible [`Item`].

use serde_json::{Map, Value};
use thiserror::Error;

use super::fallback::Diet;
use crate::model::{Item, PlanRequest, Slot};

const MAX_CALORIES: f64 = 3000.0;
const MAX_MACRO_GRAMS: f64 = 400.0;

/// Words that mark a meal as not vegetarian.
const MEAT_WORDS: &[&str] = &[
    "anchovies", "anchovy", "bacon", "beef", "chicken", "chorizo", "clam", "clams", "cod",
    "crab", "duck", "fish", "gelatin", "goose", "halibut", "ham", "lamb", "lobster",
    "mackerel", "meat", "meatball", "meatballs", "mussel", "mussels", "mutton", "oyster",
    "oysters", "pepperoni", "pork", "prawn", "prawns", "prosciutto", "salami", "salmon",
    "sardine", "sardines", "sausage", "sausages", "scallop", "scallops", "shrimp", "squid",
    "steak", "tilapia", "trout", "tuna", "turkey", "veal", "venison",
];

/// Additional animal products that mark a meal as not vegan.
const ANIMAL_PRODUCT_WORDS: &[&str] = &[
    "cheddar", "cheese", "egg", "eggs", "feta", "ghee", "halloumi", "honey", "milk",
    "mozzarella", "paneer", "parmesan", "ricotta", "whey", "yoghurt", "yogurt",
];

/// Words that turn a following dairy word into a plant product
/// ("oat milk", "soy yogurt").
const PLANT_QUALIFIERS: &[&str] = &[
    "almond", "cashew", "coconut", "hemp", "oat", "pea", "plant", "rice", "soy", "vegan",
];

/// Why generated text could not become an [`Item`].
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ParseError {
    #[error("model returned no text")]
    Empty,

    #[error("no JSON object found in model output")]
    NoJsonObject,

    #[error("invalid JSON: {0}")]
    InvalidJson(String),

    #[error("missing or empty field {0:?}")]
    MissingField(&'static str),

    #[error("field {field:?} is not a number: {value}")]
    NotANumber { field: &'static str, value: String },

    #[error("field {field:?} out of range: {value}")]
    OutOfRange { field: &'static str, value: f64 },

    #[error("meal violates {diet:?} restriction: contains {keyword:?}")]
    DietViolation { diet: Diet, keyword: String },
}

/// The diet a generated meal must satisfy.
///
/// Only explicit vegan and vegetarian restrictions are enforced.
pub fn required_diet(request: &PlanRequest) -> Diet {
    if request.has_restriction("vegan") {
        Diet::Vegan
    } else if request.has_restriction("vegetarian") {
        Diet::Vegetarian
    } else {
        Diet::Standard
    }
}

/// Parse raw model output into a meal for `slot`, enforcing `diet`.
pub fn parse_item(raw: &str, slot: Slot, diet: Diet) -> Result<Item, ParseError> {
    let stripped = strip_code_fences(raw);
    if stripped.trim().is_empty() {
        return Err(ParseError::Empty);
    }

    let json = extract_json_object(&stripped).ok_or(ParseError::NoJsonObject)?;
    let value: Value =
        serde_json::from_str(json).map_err(|e| ParseError::InvalidJson(e.to_string()))?;
    let object = find_meal_object(&value).ok_or(ParseError::MissingField("name"))?;

    let name = ["name", "title", "meal"]
        .iter()
        .find_map(|k| object.get(*k).and_then(Value::as_str))
        .map(str::trim)
        .filter(|n| !n.is_empty())
        .ok_or(ParseError::MissingField("name"))?
        .to_string();

    let item = Item {
        slot,
        name,
        calories: number_field(object, "calories", MAX_CALORIES)?,
        protein: number_field(object, "protein", MAX_MACRO_GRAMS)?,
        carbs: number_field(object, "carbs", MAX_MACRO_GRAMS)?,
        fat: number_field(object, "fat", MAX_MACRO_GRAMS)?,
        ingredients: ingredients_field(object)?,
    };
    if item.calories <= 0.0 {
        return Err(ParseError::OutOfRange {
            field: "calories",
            value: item.calories,
        });
    }

    if let Some(keyword) = diet_violation(&item, diet) {
        return Err(ParseError::DietViolation { diet, keyword });
    }
    Ok(item)
}

/// Return the first keyword in the meal's name or ingredients that the
/// diet forbids.
pub fn diet_violation(item: &Item, diet: Diet) -> Option<String> {
    if diet == Diet::Standard {
        return None;
    }

    let texts = std::iter::once(item.name.as_str()).chain(item.ingredients.iter().map(String::as_str));
    for text in texts {
        let lower = text.to_lowercase();
        let words: Vec<&str> = lower
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty())
            .collect();
        for (i, word) in words.iter().enumerate() {
            if MEAT_WORDS.contains(word) {
                return Some(word.to_string());
            }
            if diet == Diet::Vegan && ANIMAL_PRODUCT_WORDS.contains(word) {
                let qualified = i > 0 && PLANT_QUALIFIERS.contains(&words[i - 1]);
                if !qualified {
                    return Some(word.to_string());
                }
            }
        }
    }
    None
}

/// Drop Markdown fence lines (```` ``` ```` and ```` ```json ````).
fn strip_code_fences(raw: &str) -> String {
    raw.lines()
        .filter(|line| !line.trim_start().starts_with("```"))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Slice out the first balanced `{ ... }` object, skipping braces inside
/// string literals.
pub fn extract_json_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, c) in text[start..].char_indices() {
        if in_string {
            match c {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[start..start + offset + 1]);
                }
            }
            _ => {}
        }
    }
    None
}

/// Locate the object describing the meal: the top level, a nested object,
/// or the first element of a nested array.
fn find_meal_object(value: &Value) -> Option<&Map<String, Value>> {
    let object = value.as_object()?;
    if ["name", "title", "meal"]
        .iter()
        .any(|k| object.get(*k).is_some_and(Value::is_string))
    {
        return Some(object);
    }
    object.values().find_map(|v| match v {
        Value::Object(_) => find_meal_object(v),
        Value::Array(items) => items.first().and_then(find_meal_object),
        _ => None,
    })
}

fn number_field(
    object: &Map<String, Value>,
    field: &'static str,
    max: f64,
) -> Result<f64, ParseError> {
    let value = object.get(field).ok_or(ParseError::MissingField(field))?;
    let number = lenient_number(value).ok_or_else(|| ParseError::NotANumber {
        field,
        value: value.to_string(),
    })?;
    if !number.is_finite() || !(0.0..=max).contains(&number) {
        return Err(ParseError::OutOfRange {
            field,
            value: number,
        });
    }
    Ok(number)
}

/// Accept JSON numbers and strings that start with a number
/// (`"450"`, `"450 kcal"`, `"12.5g"`, `"~30"`).
pub fn lenient_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => {
            let s = s.trim();
            let start = s.find(|c: char| c.is_ascii_digit())?;
            let negative = s[..start].trim_end().ends_with('-');
            let digits: String = s[start..]
                .chars()
                .take_while(|c| c.is_ascii_digit() || *c == '.')
                .collect();
            let n: f64 = digits.trim_end_matches('.').parse().ok()?;
            Some(if negative { -n } else { n })
        }
        _ => None,
    }
}

fn ingredients_field(object: &Map<String, Value>) -> Result<Vec<String>, ParseError> {
    let ingredients: Vec<String> = match object.get("ingredients") {
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(|v| match v {
                Value::String(s) => Some(s.trim().to_string()),
                Value::Object(o) => o.get("name").and_then(Value::as_str).map(|s| s.trim().to_string()),
                _ => None,
            })
            .filter(|s| !s.is_empty())
            .collect(),
        Some(Value::String(s)) => s
            .split(',')
            .map(|i| i.trim().to_string())
            .filter(|i| !i.is_empty())
            .collect(),
        _ => Vec::new(),
    };
    if ingredients.is_empty() {
        return Err(ParseError::MissingField("ingredients"));
    }
    Ok(ingredients)
}
