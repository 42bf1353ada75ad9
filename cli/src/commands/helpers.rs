use anyhow::{Context, Result};
use chrono::NaiveDate;
use tabled::{
    Table, Tabled,
    settings::{Alignment, Modify, Style, object::Columns},
};

use foodlog_core::models::{Food, Owner};
use foodlog_core::service::today;

pub(crate) fn parse_date(date_str: Option<String>) -> Result<NaiveDate> {
    match date_str {
        None => Ok(today()),
        Some(s) => match s.as_str() {
            "today" => Ok(today()),
            "yesterday" => Ok(today() - chrono::Duration::days(1)),
            _ => NaiveDate::parse_from_str(&s, "%Y-%m-%d")
                .with_context(|| format!("Invalid date '{s}'. Use YYYY-MM-DD, today or yesterday")),
        },
    }
}

pub(crate) fn print_food_table(foods: &[Food]) {
    #[derive(Tabled)]
    struct FoodRow {
        #[tabled(rename = "ID")]
        id: i64,
        #[tabled(rename = "Name")]
        name: String,
        #[tabled(rename = "kcal/g")]
        density: String,
        #[tabled(rename = "Scope")]
        scope: &'static str,
    }

    let rows: Vec<FoodRow> = foods
        .iter()
        .map(|f| FoodRow {
            id: f.id,
            name: truncate(&f.name, 35),
            density: format!("{:.2}", f.kcal_per_gram),
            scope: match f.owner {
                Owner::Global => "global",
                Owner::User(_) => "mine",
            },
        })
        .collect();

    let table = Table::new(&rows)
        .with(Style::rounded())
        .with(Modify::new(Columns::single(2)).with(Alignment::right()))
        .to_string();
    println!("{table}");
}

pub(crate) fn no_neg_zero(v: f64) -> f64 {
    if v == 0.0 { 0.0 } else { v }
}

pub(crate) fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let end = s.char_indices().nth(max - 3).map_or(s.len(), |(i, _)| i);
        format!("{}...", &s[..end])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_date_none() {
        assert_eq!(parse_date(None).unwrap(), today());
    }

    #[test]
    fn test_parse_date_keywords() {
        assert_eq!(parse_date(Some("today".to_string())).unwrap(), today());
        assert_eq!(
            parse_date(Some("yesterday".to_string())).unwrap(),
            today() - chrono::Duration::days(1)
        );
    }

    #[test]
    fn test_parse_date_iso() {
        let date = parse_date(Some("2024-01-15".to_string())).unwrap();
        assert_eq!(date, NaiveDate::from_ymd_opt(2024, 1, 15).unwrap());
    }

    #[test]
    fn test_parse_date_invalid() {
        assert!(parse_date(Some("nope".to_string())).is_err());
    }

    #[test]
    fn test_truncate_utf8() {
        assert_eq!(truncate("Crème fraîche", 10), "Crème f...");
        assert_eq!(truncate("Müsli", 10), "Müsli");
    }

    #[test]
    fn test_no_neg_zero() {
        assert_eq!(no_neg_zero(-0.0).to_bits(), 0.0_f64.to_bits());
        assert_eq!(no_neg_zero(5.0), 5.0);
    }
}
