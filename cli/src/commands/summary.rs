use anyhow::Result;
use std::process;
use tabled::{
    Table, Tabled,
    settings::{Alignment, Modify, Style, object::Columns},
};

use foodlog_core::models::UserId;
use foodlog_core::render;
use foodlog_core::service::{FoodLogService, today};

use super::helpers::{no_neg_zero, parse_date};

pub(crate) fn cmd_summary(
    service: &FoodLogService,
    user_id: UserId,
    date: Option<String>,
    json: bool,
) -> Result<()> {
    let date = parse_date(date)?;
    let summary = service.daily_summary(user_id, date)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
        return Ok(());
    }

    if summary.entries.is_empty() {
        eprintln!("No entries for {date}");
        process::exit(2);
    }

    println!("{}", render::daily_summary(&summary, date == today()));
    Ok(())
}

pub(crate) fn cmd_weekly(
    service: &FoodLogService,
    user_id: UserId,
    end: Option<String>,
    json: bool,
) -> Result<()> {
    #[derive(Tabled)]
    struct DayRow {
        #[tabled(rename = "Date")]
        date: String,
        #[tabled(rename = "Entries")]
        entries: usize,
        #[tabled(rename = "Calories")]
        calories: String,
    }

    let end = parse_date(end)?;
    let summary = service.weekly_summary(user_id, end)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
        return Ok(());
    }

    if !summary.has_entries() {
        eprintln!("No entries between {} and {end}", summary.start);
        process::exit(2);
    }

    let rows: Vec<DayRow> = summary
        .days
        .iter()
        .map(|d| DayRow {
            date: d.date.format("%Y-%m-%d").to_string(),
            entries: d.entry_count,
            calories: format!("{:.1}", no_neg_zero(d.calories)),
        })
        .collect();

    let table = Table::new(&rows)
        .with(Style::rounded())
        .with(Modify::new(Columns::new(1..)).with(Alignment::right()))
        .to_string();
    println!("{table}");

    let total = summary.total_calories;
    println!("  TOTAL: {total:.1} kcal");
    if let (Some(goal), Some(pct)) = (summary.goal_kcal, summary.percent_of_goal()) {
        let weekly = goal * 7.0;
        println!("  GOAL: {weekly} kcal ({pct:.1}%)");
    }

    Ok(())
}
