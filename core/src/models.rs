use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Opaque user identity assigned by the messaging transport.
pub type UserId = i64;

/// Foods every user can see until they shadow one with a food of their own.
pub const SEED_FOODS: &[(&str, f64)] = &[
    ("Apple", 0.52),
    ("Chicken Breast", 1.65),
    ("Rice", 1.30),
    ("Banana", 0.89),
    ("Salmon", 2.08),
    ("Broccoli", 0.35),
    ("Bread", 2.65),
];

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserProfile {
    pub username: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct User {
    pub id: UserId,
    pub username: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub goal_kcal: Option<f64>,
    pub created_at: String,
}

/// Scope a food lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Owner {
    Global,
    User(UserId),
}

impl Owner {
    #[must_use]
    pub fn from_db(owner_id: Option<UserId>) -> Self {
        owner_id.map_or(Self::Global, Self::User)
    }

    #[must_use]
    pub fn as_db(self) -> Option<UserId> {
        match self {
            Self::Global => None,
            Self::User(id) => Some(id),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Food {
    pub id: i64,
    pub name: String,
    pub kcal_per_gram: f64,
    pub owner: Owner,
    pub created_at: String,
    pub updated_at: String,
}

impl Food {
    #[must_use]
    pub fn is_owned_by(&self, user_id: UserId) -> bool {
        self.owner == Owner::User(user_id)
    }
}

#[derive(Debug, Clone)]
pub struct NewFood {
    pub name: String,
    pub kcal_per_gram: f64,
    pub owner: Owner,
}

/// The fields of a food a user may edit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FoodField {
    Name,
    Density,
}

impl FoodField {
    pub const ALL: [FoodField; 2] = [FoodField::Name, FoodField::Density];

    #[must_use]
    pub fn key(self) -> &'static str {
        match self {
            Self::Name => "name",
            Self::Density => "density",
        }
    }

    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            Self::Name => "Name",
            Self::Density => "Calories per gram",
        }
    }

    #[must_use]
    pub fn prompt(self) -> &'static str {
        match self {
            Self::Name => "Enter the new name:",
            Self::Density => "Enter the new calories per gram (e.g., 0.52):",
        }
    }

    /// Accepts the field key in any case, e.g. "Density".
    #[must_use]
    pub fn parse(text: &str) -> Option<Self> {
        let lower = text.trim().to_lowercase();
        Self::ALL.into_iter().find(|f| f.key() == lower)
    }

    /// Validate a raw answer for this field and turn it into an edit.
    pub fn edit_from(self, text: &str) -> Result<FoodEdit> {
        match self {
            Self::Name => validate_food_name(text).map(FoodEdit::Rename),
            Self::Density => parse_positive(text, "calories per gram").map(FoodEdit::SetDensity),
        }
    }
}

/// A validated change to one food field.
#[derive(Debug, Clone, PartialEq)]
pub enum FoodEdit {
    Rename(String),
    SetDensity(f64),
}

impl FoodEdit {
    #[must_use]
    pub fn field(&self) -> FoodField {
        match self {
            Self::Rename(_) => FoodField::Name,
            Self::SetDensity(_) => FoodField::Density,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct LogEntry {
    pub id: i64,
    pub user_id: UserId,
    /// `None` once the food has been deleted from the catalog.
    pub food_id: Option<i64>,
    pub food_name: String,
    pub weight_g: f64,
    pub calories: f64,
    pub log_date: NaiveDate,
    pub logged_at: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct DailySummary {
    pub date: NaiveDate,
    pub entries: Vec<LogEntry>,
    pub total_calories: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub goal_kcal: Option<f64>,
}

impl DailySummary {
    #[must_use]
    pub fn percent_of_goal(&self) -> Option<f64> {
        self.goal_kcal
            .map(|goal| percent_of_goal(self.total_calories, goal))
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct DayTotal {
    pub date: NaiveDate,
    pub calories: f64,
    pub entry_count: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct WeeklySummary {
    pub start: NaiveDate,
    pub end: NaiveDate,
    /// One row per calendar day in `start..=end`, including empty days.
    pub days: Vec<DayTotal>,
    pub total_calories: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub goal_kcal: Option<f64>,
}

impl WeeklySummary {
    #[must_use]
    pub fn has_entries(&self) -> bool {
        self.days.iter().any(|d| d.entry_count > 0)
    }

    /// Progress against seven days' worth of the daily goal.
    #[must_use]
    pub fn percent_of_goal(&self) -> Option<f64> {
        self.goal_kcal
            .map(|goal| percent_of_goal(self.total_calories, goal * 7.0))
    }
}

#[must_use]
pub fn percent_of_goal(total: f64, goal: f64) -> f64 {
    total / goal * 100.0
}

/// Parse a strictly positive, finite number.
///
/// Unparseable text is a [`Error::Validation`]; zero or negative values are
/// [`Error::InvalidValue`]. Callers treat both the same way.
pub fn parse_positive(text: &str, what: &str) -> Result<f64> {
    let value: f64 = text
        .trim()
        .parse()
        .map_err(|_| Error::Validation(format!("Please enter a valid number for the {what}:")))?;
    if !value.is_finite() {
        return Err(Error::Validation(format!(
            "Please enter a valid number for the {what}:"
        )));
    }
    if value <= 0.0 {
        return Err(Error::InvalidValue(format!(
            "Please enter a positive number for the {what}:"
        )));
    }
    Ok(value)
}

/// Largest single portion accepted, in grams.
pub const MAX_WEIGHT_G: f64 = 100_000.0;

/// Parse a weight answer like "100" or "100g".
pub fn parse_weight(text: &str) -> Result<f64> {
    let text = text.trim();
    let number = text.strip_suffix('g').unwrap_or(text).trim();
    let weight = parse_positive(number, "weight in grams")?;
    if weight > MAX_WEIGHT_G {
        return Err(Error::InvalidValue(format!(
            "Please enter a weight of at most {MAX_WEIGHT_G} grams:"
        )));
    }
    Ok(weight)
}

pub fn validate_food_name(text: &str) -> Result<String> {
    let name = text.trim();
    if name.is_empty() {
        return Err(Error::Validation(
            "Food name must not be empty. Enter a name:".to_string(),
        ));
    }
    Ok(name.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_positive_valid() {
        assert!((parse_positive("2000", "goal").unwrap() - 2000.0).abs() < f64::EPSILON);
        assert!((parse_positive(" 0.52 ", "goal").unwrap() - 0.52).abs() < f64::EPSILON);
    }

    #[test]
    fn test_parse_positive_distinguishes_kinds() {
        assert!(matches!(
            parse_positive("abc", "weight"),
            Err(Error::Validation(_))
        ));
        assert!(matches!(
            parse_positive("-5", "weight"),
            Err(Error::InvalidValue(_))
        ));
        assert!(matches!(
            parse_positive("0", "weight"),
            Err(Error::InvalidValue(_))
        ));
        assert!(matches!(
            parse_positive("inf", "weight"),
            Err(Error::Validation(_))
        ));
        assert!(matches!(
            parse_positive("NaN", "weight"),
            Err(Error::Validation(_))
        ));
    }

    #[test]
    fn test_parse_weight_accepts_gram_suffix() {
        assert!((parse_weight("100g").unwrap() - 100.0).abs() < f64::EPSILON);
        assert!((parse_weight("100 g").unwrap() - 100.0).abs() < f64::EPSILON);
        assert!((parse_weight("150").unwrap() - 150.0).abs() < f64::EPSILON);
        assert!(parse_weight("g").is_err());
        assert!(parse_weight("100gg").is_err());
    }

    #[test]
    fn test_parse_weight_upper_bound() {
        assert!((parse_weight("100000").unwrap() - MAX_WEIGHT_G).abs() < f64::EPSILON);
        assert!(matches!(
            parse_weight("100001"),
            Err(Error::InvalidValue(_))
        ));
        assert!(matches!(
            parse_weight("1e308"),
            Err(Error::InvalidValue(_))
        ));
    }

    #[test]
    fn test_validate_food_name() {
        assert_eq!(validate_food_name("  Oat Milk ").unwrap(), "Oat Milk");
        assert!(validate_food_name("   ").is_err());
    }

    #[test]
    fn test_food_field_parse() {
        assert_eq!(FoodField::parse("name"), Some(FoodField::Name));
        assert_eq!(FoodField::parse(" Density "), Some(FoodField::Density));
        assert_eq!(FoodField::parse("brand"), None);
    }

    #[test]
    fn test_food_field_edit_validation() {
        assert_eq!(
            FoodField::Density.edit_from("1.2").unwrap(),
            FoodEdit::SetDensity(1.2)
        );
        assert_eq!(
            FoodField::Name.edit_from("Toast").unwrap(),
            FoodEdit::Rename("Toast".to_string())
        );
        assert!(FoodField::Density.edit_from("-1").is_err());
        assert!(FoodField::Density.edit_from("lots").is_err());
        assert!(FoodField::Name.edit_from("").is_err());
    }

    #[test]
    fn test_owner_db_mapping() {
        assert_eq!(Owner::from_db(None), Owner::Global);
        assert_eq!(Owner::from_db(Some(7)), Owner::User(7));
        assert_eq!(Owner::User(7).as_db(), Some(7));
        assert_eq!(Owner::Global.as_db(), None);
    }

    #[test]
    fn test_percent_of_goal() {
        assert!((percent_of_goal(330.0, 2000.0) - 16.5).abs() < 1e-9);
    }

    #[test]
    fn test_weekly_percent_uses_seven_days() {
        let date = NaiveDate::from_ymd_opt(2024, 6, 15).unwrap();
        let summary = WeeklySummary {
            start: date,
            end: date,
            days: vec![],
            total_calories: 7000.0,
            goal_kcal: Some(2000.0),
        };
        assert!((summary.percent_of_goal().unwrap() - 50.0).abs() < 1e-9);
        assert!(!summary.has_entries());
    }
}
