//! Plain-text renderings of summaries and catalog listings for chat replies.

use std::fmt::Write;

use crate::models::{DailySummary, Food, WeeklySummary};

pub fn daily_summary(summary: &DailySummary, is_today: bool) -> String {
    if summary.entries.is_empty() {
        let when = if is_today {
            "today".to_string()
        } else {
            summary.date.format("%Y-%m-%d").to_string()
        };
        return format!("No food logged for {when}. Start logging with 🍽️ Log Food!");
    }

    let mut out = format!("Daily Summary ({}):\n\n", summary.date.format("%Y-%m-%d"));
    for e in &summary.entries {
        let _ = writeln!(
            out,
            "🍽️ {}: {}g ({:.1} kcal)",
            e.food_name, e.weight_g, e.calories
        );
    }
    let _ = write!(out, "\nTotal Calories: {:.1} kcal", summary.total_calories);
    if let (Some(goal), Some(pct)) = (summary.goal_kcal, summary.percent_of_goal()) {
        let _ = write!(out, "\nGoal: {goal} kcal ({pct:.1}% of goal)");
    }
    out
}

pub fn weekly_summary(summary: &WeeklySummary) -> String {
    if !summary.has_entries() {
        return "No food logged for this week. Start logging with 🍽️ Log Food!".to_string();
    }

    let mut out = format!(
        "Weekly Summary ({} to {}):\n\n",
        summary.start.format("%Y-%m-%d"),
        summary.end.format("%Y-%m-%d")
    );
    for day in summary.days.iter().filter(|d| d.entry_count > 0) {
        let _ = writeln!(
            out,
            "📅 {}: {:.1} kcal",
            day.date.format("%Y-%m-%d"),
            day.calories
        );
    }
    let _ = write!(
        out,
        "\nTotal Weekly Calories: {:.1} kcal",
        summary.total_calories
    );
    if let (Some(goal), Some(pct)) = (summary.goal_kcal, summary.percent_of_goal()) {
        let weekly_goal = goal * 7.0;
        let _ = write!(out, "\nWeekly goal: {weekly_goal} kcal ({pct:.1}% of goal)");
    }
    out
}

pub fn owned_foods(foods: &[Food]) -> String {
    let mut out = String::from("Your foods:\n\n");
    for f in foods {
        let _ = writeln!(out, "• {} ({} kcal/g)", f.name, f.kcal_per_gram);
    }
    out.push_str("\nTap a button to edit or delete a food.");
    out
}
