use std::path::Path;

use anyhow::{Context, Result, bail};
use reqwest::header::CONTENT_TYPE;
use serde::Deserialize;

use mealstream_core::client::{ConsumeError, consume};
use mealstream_core::model::{DAYS_PER_PLAN, MEALS_PER_DAY, WeeklyPlan};
use mealstream_core::stream::StreamEvent;

/// JSON reply of a plan route (cache hit or non-streaming).
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PlanReply {
    meal_plan: WeeklyPlan,
    #[serde(default)]
    cached: bool,
}

/// Execute `mealstream generate`: post the request in `file` and follow the
/// run to its end.
///
/// Returns `Ok(false)` when the server reported the run as failed.
pub async fn run_generate(server: &str, file: &Path) -> Result<bool> {
    let contents = std::fs::read_to_string(file)
        .with_context(|| format!("failed to read request file {}", file.display()))?;
    let request: serde_json::Value = serde_json::from_str(&contents)
        .with_context(|| format!("request file {} is not valid JSON", file.display()))?;

    let url = format!("{}/api/meal-plans/generate", server.trim_end_matches('/'));
    let response = reqwest::Client::new()
        .post(&url)
        .json(&request)
        .send()
        .await
        .with_context(|| format!("failed to reach mealstream server at {server}"))?;

    let status = response.status();
    if !status.is_success() {
        let body: serde_json::Value = response.json().await.unwrap_or_default();
        let message = body["error"].as_str().unwrap_or("no error message");
        bail!("server rejected the request ({status}): {message}");
    }

    let is_json = response
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.starts_with("application/json"));
    if is_json {
        let reply: PlanReply = response
            .json()
            .await
            .context("failed to decode plan response")?;
        if reply.cached {
            println!("Served from cache.");
        }
        println!("{}", summary(&reply.meal_plan));
        return Ok(true);
    }

    let outcome = consume(response.bytes_stream(), |_, event| {
        if let Some(line) = render_event(event) {
            println!("{line}");
        }
    })
    .await;

    let state = match outcome {
        Ok(state) => state,
        Err(ConsumeError::Truncated(state)) => bail!(
            "stream ended early after {} of {} meals",
            state.meal_count(),
            DAYS_PER_PLAN * MEALS_PER_DAY
        ),
        Err(e) => return Err(e.into()),
    };

    if let Some(error) = &state.error {
        eprintln!("Generation failed: {error}");
        return Ok(false);
    }
    match &state.plan {
        Some(plan) => {
            println!();
            println!("{}", summary(plan));
            Ok(true)
        }
        None => bail!("stream finished without a plan"),
    }
}

/// One progress line per event, if the event is worth a line.
fn render_event(event: &StreamEvent) -> Option<String> {
    match event {
        StreamEvent::Status {
            message,
            progress_percent,
        } => Some(format!("[{progress_percent:>3}%] {message}")),
        StreamEvent::Meal { day, item, .. } => Some(format!(
            "       {day} {}: {} ({:.0} kcal)",
            item.slot, item.name, item.calories
        )),
        StreamEvent::DayComplete {
            day,
            totals,
            progress_percent,
            ..
        } => Some(format!(
            "[{progress_percent:>3}%] {day} done: {:.0} kcal, {:.0} g protein",
            totals.calories, totals.protein
        )),
        StreamEvent::Complete { .. } | StreamEvent::Error { .. } => None,
    }
}

fn summary(plan: &WeeklyPlan) -> String {
    let mut out = format!(
        "Weekly plan ({} goal, model {})\n",
        plan.metadata.goal, plan.metadata.model
    );
    for day in &plan.days {
        let names: Vec<&str> = day.meals.iter().map(|m| m.name.as_str()).collect();
        out.push_str(&format!(
            "  {:<9} {:>5.0} kcal  {}\n",
            day.day,
            day.totals.calories,
            names.join(" | ")
        ));
    }
    out.push_str(&format!(
        "Weekly totals: {:.0} kcal, {:.0} g protein, {:.0} g carbs, {:.0} g fat",
        plan.weekly_totals.calories,
        plan.weekly_totals.protein,
        plan.weekly_totals.carbs,
        plan.weekly_totals.fat
    ));
    if plan.metadata.fallback_meals > 0 {
        out.push_str(&format!(
            "\n{} meals came from the built-in fallback table",
            plan.metadata.fallback_meals
        ));
    }
    out
}
