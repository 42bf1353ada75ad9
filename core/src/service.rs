use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;

use chrono::{Duration, Local, NaiveDate, NaiveDateTime};

use crate::db::{Database, NewLogEntry};
use crate::error::{Error, Result};
use crate::models::{
    DailySummary, DayTotal, Food, FoodEdit, LogEntry, NewFood, Owner, User, UserId, UserProfile,
    WeeklySummary, validate_food_name,
};

/// Today's date on the server's local clock.
///
/// All "today" and "this week" boundaries use this single convention; users
/// carry no timezone of their own.
#[must_use]
pub fn today() -> NaiveDate {
    Local::now().date_naive()
}

/// Merge a user's own foods over the global catalog.
///
/// A user food with the same name as a global food replaces it. The result is
/// ordered by name.
#[must_use]
pub fn shadow_catalog(owned: Vec<Food>, global: Vec<Food>) -> Vec<Food> {
    let owned_names: HashSet<String> = owned.iter().map(|f| f.name.clone()).collect();
    let mut all: Vec<Food> = global
        .into_iter()
        .filter(|f| !owned_names.contains(&f.name))
        .chain(owned)
        .collect();
    all.sort_by(|a, b| a.name.cmp(&b.name));
    all
}

/// Atomic business operations against the catalog, ledger and user stores.
pub struct FoodLogService {
    db: Arc<Database>,
}

impl FoodLogService {
    pub fn new(db_path: &str) -> anyhow::Result<Self> {
        let db = Database::open(Path::new(db_path))?;
        Ok(Self::with_database(Arc::new(db)))
    }

    pub fn new_in_memory() -> anyhow::Result<Self> {
        let db = Database::open_in_memory()?;
        Ok(Self::with_database(Arc::new(db)))
    }

    #[must_use]
    pub fn with_database(db: Arc<Database>) -> Self {
        Self { db }
    }

    #[must_use]
    pub fn database(&self) -> &Arc<Database> {
        &self.db
    }

    // --- Users ---

    pub fn register_user(&self, id: UserId, profile: &UserProfile) -> Result<()> {
        if self.db.insert_user_if_absent(id, profile)? {
            tracing::info!(user_id = id, "registered new user");
        }
        Ok(())
    }

    pub fn get_user(&self, id: UserId) -> Result<Option<User>> {
        self.db.get_user(id)
    }

    pub fn set_goal(&self, id: UserId, goal_kcal: f64) -> Result<()> {
        if !goal_kcal.is_finite() || goal_kcal <= 0.0 {
            return Err(Error::InvalidValue(
                "Calorie goal must be greater than 0".to_string(),
            ));
        }
        self.db.set_goal(id, goal_kcal)?;
        tracing::info!(user_id = id, goal_kcal, "calorie goal set");
        Ok(())
    }

    // --- Catalog ---

    pub fn create_food(&self, owner_id: UserId, name: &str, kcal_per_gram: f64) -> Result<Food> {
        let name = validate_food_name(name)?;
        if !kcal_per_gram.is_finite() || kcal_per_gram <= 0.0 {
            return Err(Error::InvalidValue(
                "Calories per gram must be greater than 0".to_string(),
            ));
        }
        let food = self
            .db
            .insert_food(&NewFood {
                name,
                kcal_per_gram,
                owner: Owner::User(owner_id),
            })
            .inspect_err(|e| {
                tracing::warn!(user_id = owner_id, error = %e, "create food rejected");
            })?;
        tracing::info!(user_id = owner_id, food_id = food.id, name = %food.name, "food created");
        Ok(food)
    }

    pub fn update_food(&self, food_id: i64, owner_id: UserId, edit: &FoodEdit) -> Result<Food> {
        let food = self
            .db
            .update_food(food_id, owner_id, edit)
            .inspect_err(|e| {
                tracing::warn!(user_id = owner_id, food_id, error = %e, "update food rejected");
            })?;
        tracing::info!(
            user_id = owner_id,
            food_id,
            field = edit.field().key(),
            "food updated"
        );
        Ok(food)
    }

    /// Delete one of the user's foods. Already-deleted foods are a no-op (`false`).
    pub fn delete_food(&self, food_id: i64, owner_id: UserId) -> Result<bool> {
        let deleted = self
            .db
            .delete_food(food_id, owner_id)
            .inspect_err(|e| {
                tracing::warn!(user_id = owner_id, food_id, error = %e, "delete food rejected");
            })?;
        if deleted {
            tracing::info!(user_id = owner_id, food_id, "food deleted");
        }
        Ok(deleted)
    }

    pub fn get_food(&self, food_id: i64) -> Result<Option<Food>> {
        self.db.get_food_by_id(food_id)
    }

    /// Look a food up by exact name: the user's own scope first, then global.
    pub fn resolve_visible_food(&self, user_id: UserId, name: &str) -> Result<Option<Food>> {
        if let Some(food) = self.db.find_food(name, Owner::User(user_id))? {
            return Ok(Some(food));
        }
        self.db.find_food(name, Owner::Global)
    }

    /// The catalog as this user sees it.
    pub fn visible_foods(&self, user_id: UserId) -> Result<Vec<Food>> {
        let owned = self.db.list_foods(Owner::User(user_id))?;
        let global = self.db.list_foods(Owner::Global)?;
        Ok(shadow_catalog(owned, global))
    }

    pub fn owned_foods(&self, user_id: UserId) -> Result<Vec<Food>> {
        self.db.list_foods(Owner::User(user_id))
    }

    // --- Ledger ---

    pub fn log_entry(&self, user_id: UserId, food_name: &str, weight_g: f64) -> Result<LogEntry> {
        self.log_entry_at(user_id, food_name, weight_g, Local::now().naive_local())
    }

    pub fn log_entry_at(
        &self,
        user_id: UserId,
        food_name: &str,
        weight_g: f64,
        logged_at: NaiveDateTime,
    ) -> Result<LogEntry> {
        if !weight_g.is_finite() || weight_g <= 0.0 {
            return Err(Error::InvalidValue(
                "Weight must be greater than 0".to_string(),
            ));
        }
        let food = self
            .resolve_visible_food(user_id, food_name)?
            .ok_or_else(|| Error::food_not_found(food_name))?;

        let calories = food.kcal_per_gram * weight_g;
        if !calories.is_finite() {
            return Err(Error::InvalidValue(
                "That portion is too large to log. Please enter a smaller weight:".to_string(),
            ));
        }
        let entry = self.db.insert_log_entry(&NewLogEntry {
            user_id,
            food_id: food.id,
            food_name: food.name,
            weight_g,
            calories,
            logged_at,
        })?;
        tracing::info!(
            user_id,
            entry_id = entry.id,
            food = %entry.food_name,
            weight_g,
            calories,
            "food logged"
        );
        Ok(entry)
    }

    pub fn daily_summary(&self, user_id: UserId, date: NaiveDate) -> Result<DailySummary> {
        let entries = self.db.get_entries_between(user_id, date, date)?;
        let total_calories = entries.iter().map(|e| e.calories).sum();
        Ok(DailySummary {
            date,
            entries,
            total_calories,
            goal_kcal: self.db.get_goal(user_id)?,
        })
    }

    /// Seven calendar days ending at `end`, inclusive.
    pub fn weekly_summary(&self, user_id: UserId, end: NaiveDate) -> Result<WeeklySummary> {
        let start = end - Duration::days(6);
        let entries = self.db.get_entries_between(user_id, start, end)?;

        let days: Vec<DayTotal> = start
            .iter_days()
            .take(7)
            .map(|date| {
                let on_day: Vec<&LogEntry> =
                    entries.iter().filter(|e| e.log_date == date).collect();
                DayTotal {
                    date,
                    calories: on_day.iter().map(|e| e.calories).sum(),
                    entry_count: on_day.len(),
                }
            })
            .collect();
        let total_calories = days.iter().map(|d| d.calories).sum();

        Ok(WeeklySummary {
            start,
            end,
            days,
            total_calories,
            goal_kcal: self.db.get_goal(user_id)?,
        })
    }
}
