use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};

use anyhow::Context;
use chrono::{Local, NaiveDate, NaiveDateTime};
use rusqlite::{Connection, OptionalExtension, params};

use crate::error::{Error, Result, map_food_conflict};
use crate::models::{
    Food, FoodEdit, LogEntry, NewFood, Owner, SEED_FOODS, User, UserId, UserProfile,
};

const DATE_FORMAT: &str = "%Y-%m-%d";
const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

const FOOD_COLUMNS: &str = "id, name, kcal_per_gram, owner_id, created_at, updated_at";
const ENTRY_COLUMNS: &str =
    "id, user_id, food_id, food_name, weight_g, calories, log_date, logged_at";

/// A ledger row about to be appended.
#[derive(Debug, Clone)]
pub struct NewLogEntry {
    pub user_id: UserId,
    pub food_id: i64,
    pub food_name: String,
    pub weight_g: f64,
    pub calories: f64,
    pub logged_at: NaiveDateTime,
}

/// SQLite-backed catalog, ledger, user and session storage.
///
/// Every public method is a single atomic unit; the connection mutex is held
/// only for the duration of one call.
pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    pub fn open(path: &Path) -> anyhow::Result<Self> {
        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open database: {}", path.display()))?;
        let db = Database {
            conn: Mutex::new(conn),
        };
        db.migrate()?;
        Ok(db)
    }

    pub fn open_in_memory() -> anyhow::Result<Self> {
        let conn = Connection::open_in_memory()?;
        let db = Database {
            conn: Mutex::new(conn),
        };
        db.migrate()?;
        Ok(db)
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn migrate(&self) -> anyhow::Result<()> {
        let conn = self.conn();
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;

        let version: i64 = conn.pragma_query_value(None, "user_version", |row| row.get(0))?;

        if version < 1 {
            conn.execute_batch(
                "CREATE TABLE IF NOT EXISTS users (
                    id INTEGER PRIMARY KEY,
                    username TEXT,
                    first_name TEXT,
                    last_name TEXT,
                    goal_kcal REAL CHECK (goal_kcal IS NULL OR goal_kcal > 0),
                    created_at TEXT NOT NULL
                );

                CREATE TABLE IF NOT EXISTS foods (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    name TEXT NOT NULL,
                    kcal_per_gram REAL NOT NULL CHECK (kcal_per_gram > 0),
                    owner_id INTEGER,
                    created_at TEXT NOT NULL,
                    updated_at TEXT NOT NULL
                );

                CREATE UNIQUE INDEX IF NOT EXISTS idx_foods_scope_name
                    ON foods(name, IFNULL(owner_id, 'global'));

                CREATE TABLE IF NOT EXISTS log_entries (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    user_id INTEGER NOT NULL REFERENCES users(id),
                    food_id INTEGER REFERENCES foods(id) ON DELETE SET NULL,
                    food_name TEXT NOT NULL,
                    weight_g REAL NOT NULL CHECK (weight_g > 0),
                    calories REAL NOT NULL,
                    log_date TEXT NOT NULL,
                    logged_at TEXT NOT NULL
                );

                CREATE INDEX IF NOT EXISTS idx_log_entries_user_date
                    ON log_entries(user_id, log_date);

                CREATE TABLE IF NOT EXISTS sessions (
                    user_id INTEGER PRIMARY KEY,
                    state TEXT NOT NULL,
                    scratch TEXT NOT NULL DEFAULT '{}',
                    updated_at TEXT NOT NULL
                );

                PRAGMA user_version = 1;",
            )?;

            let now = Local::now().to_rfc3339();
            for (name, density) in SEED_FOODS {
                conn.execute(
                    "INSERT OR IGNORE INTO foods (name, kcal_per_gram, owner_id, created_at, updated_at)
                     VALUES (?1, ?2, NULL, ?3, ?3)",
                    params![name, density, now],
                )
                .context("Failed to seed global foods")?;
            }
        }

        Ok(())
    }

    // --- Row mapping helpers ---

    fn food_from_row(row: &rusqlite::Row) -> rusqlite::Result<Food> {
        Ok(Food {
            id: row.get(0)?,
            name: row.get(1)?,
            kcal_per_gram: row.get(2)?,
            owner: Owner::from_db(row.get(3)?),
            created_at: row.get(4)?,
            updated_at: row.get(5)?,
        })
    }

    fn log_entry_from_row(row: &rusqlite::Row) -> rusqlite::Result<LogEntry> {
        let log_date: String = row.get(6)?;
        let log_date = NaiveDate::parse_from_str(&log_date, DATE_FORMAT).map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(6, rusqlite::types::Type::Text, Box::new(e))
        })?;
        Ok(LogEntry {
            id: row.get(0)?,
            user_id: row.get(1)?,
            food_id: row.get(2)?,
            food_name: row.get(3)?,
            weight_g: row.get(4)?,
            calories: row.get(5)?,
            log_date,
            logged_at: row.get(7)?,
        })
    }

    fn user_from_row(row: &rusqlite::Row) -> rusqlite::Result<User> {
        Ok(User {
            id: row.get(0)?,
            username: row.get(1)?,
            first_name: row.get(2)?,
            last_name: row.get(3)?,
            goal_kcal: row.get(4)?,
            created_at: row.get(5)?,
        })
    }

    fn food_in(conn: &Connection, id: i64) -> rusqlite::Result<Option<Food>> {
        conn.query_row(
            &format!("SELECT {FOOD_COLUMNS} FROM foods WHERE id = ?1"),
            params![id],
            Self::food_from_row,
        )
        .optional()
    }

    // --- Users ---

    /// Insert the user if absent. Returns `true` when a row was created.
    pub fn insert_user_if_absent(&self, id: UserId, profile: &UserProfile) -> Result<bool> {
        let now = Local::now().to_rfc3339();
        let rows = self.conn().execute(
            "INSERT INTO users (id, username, first_name, last_name, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(id) DO NOTHING",
            params![
                id,
                profile.username,
                profile.first_name,
                profile.last_name,
                now
            ],
        )?;
        Ok(rows > 0)
    }

    pub fn get_user(&self, id: UserId) -> Result<Option<User>> {
        let user = self
            .conn()
            .query_row(
                "SELECT id, username, first_name, last_name, goal_kcal, created_at
                 FROM users WHERE id = ?1",
                params![id],
                Self::user_from_row,
            )
            .optional()?;
        Ok(user)
    }

    pub fn set_goal(&self, id: UserId, goal_kcal: f64) -> Result<()> {
        let rows = self.conn().execute(
            "UPDATE users SET goal_kcal = ?1 WHERE id = ?2",
            params![goal_kcal, id],
        )?;
        if rows == 0 {
            return Err(Error::NotFound {
                entity: "user",
                key: id.to_string(),
            });
        }
        Ok(())
    }

    pub fn get_goal(&self, id: UserId) -> Result<Option<f64>> {
        let goal = self
            .conn()
            .query_row(
                "SELECT goal_kcal FROM users WHERE id = ?1",
                params![id],
                |row| row.get::<_, Option<f64>>(0),
            )
            .optional()?;
        Ok(goal.flatten())
    }

    // --- Foods ---

    pub fn insert_food(&self, food: &NewFood) -> Result<Food> {
        let now = Local::now().to_rfc3339();
        let conn = self.conn();
        conn.execute(
            "INSERT INTO foods (name, kcal_per_gram, owner_id, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?4)",
            params![food.name, food.kcal_per_gram, food.owner.as_db(), now],
        )
        .map_err(|e| map_food_conflict(e, &food.name))?;
        let id = conn.last_insert_rowid();
        Self::food_in(&conn, id)?.ok_or_else(|| Error::food_not_found(id))
    }

    pub fn get_food_by_id(&self, id: i64) -> Result<Option<Food>> {
        Ok(Self::food_in(&self.conn(), id)?)
    }

    /// Exact-name lookup within a single owner scope.
    pub fn find_food(&self, name: &str, owner: Owner) -> Result<Option<Food>> {
        let food = self
            .conn()
            .query_row(
                &format!("SELECT {FOOD_COLUMNS} FROM foods WHERE name = ?1 AND owner_id IS ?2"),
                params![name, owner.as_db()],
                Self::food_from_row,
            )
            .optional()?;
        Ok(food)
    }

    /// All foods in one owner scope, ordered by name.
    pub fn list_foods(&self, owner: Owner) -> Result<Vec<Food>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {FOOD_COLUMNS} FROM foods WHERE owner_id IS ?1 ORDER BY name"
        ))?;
        let foods = stmt
            .query_map(params![owner.as_db()], Self::food_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(foods)
    }

    /// Apply one edit to a food owned by `owner_id`, checking ownership in the
    /// same transaction as the write.
    pub fn update_food(&self, food_id: i64, owner_id: UserId, edit: &FoodEdit) -> Result<Food> {
        let now = Local::now().to_rfc3339();
        let mut conn = self.conn();
        let tx = conn.transaction()?;

        let food = Self::food_in(&tx, food_id)?.ok_or_else(|| Error::food_not_found(food_id))?;
        if !food.is_owned_by(owner_id) {
            return Err(Error::NotOwned(food_id));
        }

        match edit {
            FoodEdit::Rename(name) => {
                tx.execute(
                    "UPDATE foods SET name = ?1, updated_at = ?2 WHERE id = ?3",
                    params![name, now, food_id],
                )
                .map_err(|e| map_food_conflict(e, name))?;
            }
            FoodEdit::SetDensity(density) => {
                if *density <= 0.0 {
                    return Err(Error::InvalidValue(
                        "Calories per gram must be greater than 0".to_string(),
                    ));
                }
                tx.execute(
                    "UPDATE foods SET kcal_per_gram = ?1, updated_at = ?2 WHERE id = ?3",
                    params![density, now, food_id],
                )?;
            }
        }

        let updated = Self::food_in(&tx, food_id)?.ok_or_else(|| Error::food_not_found(food_id))?;
        tx.commit()?;
        Ok(updated)
    }

    /// Delete a food owned by `owner_id`. Returns `false` if it was already gone.
    pub fn delete_food(&self, food_id: i64, owner_id: UserId) -> Result<bool> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;

        let Some(food) = Self::food_in(&tx, food_id)? else {
            return Ok(false);
        };
        if !food.is_owned_by(owner_id) {
            return Err(Error::NotOwned(food_id));
        }
        let rows = tx.execute("DELETE FROM foods WHERE id = ?1", params![food_id])?;
        tx.commit()?;
        Ok(rows > 0)
    }

    // --- Ledger ---

    pub fn insert_log_entry(&self, entry: &NewLogEntry) -> Result<LogEntry> {
        let log_date = entry.logged_at.date().format(DATE_FORMAT).to_string();
        let logged_at = entry.logged_at.format(TIMESTAMP_FORMAT).to_string();
        let conn = self.conn();
        conn.execute(
            "INSERT INTO log_entries (user_id, food_id, food_name, weight_g, calories, log_date, logged_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                entry.user_id,
                entry.food_id,
                entry.food_name,
                entry.weight_g,
                entry.calories,
                log_date,
                logged_at,
            ],
        )?;
        let id = conn.last_insert_rowid();
        let inserted = conn.query_row(
            &format!("SELECT {ENTRY_COLUMNS} FROM log_entries WHERE id = ?1"),
            params![id],
            Self::log_entry_from_row,
        )?;
        Ok(inserted)
    }

    pub fn get_log_entry(&self, id: i64) -> Result<Option<LogEntry>> {
        let entry = self
            .conn()
            .query_row(
                &format!("SELECT {ENTRY_COLUMNS} FROM log_entries WHERE id = ?1"),
                params![id],
                Self::log_entry_from_row,
            )
            .optional()?;
        Ok(entry)
    }

    /// Entries for one user whose calendar day falls in `start..=end`, oldest first.
    pub fn get_entries_between(
        &self,
        user_id: UserId,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<LogEntry>> {
        let start = start.format(DATE_FORMAT).to_string();
        let end = end.format(DATE_FORMAT).to_string();
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {ENTRY_COLUMNS} FROM log_entries
             WHERE user_id = ?1 AND log_date BETWEEN ?2 AND ?3
             ORDER BY logged_at, id"
        ))?;
        let entries = stmt
            .query_map(params![user_id, start, end], Self::log_entry_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(entries)
    }

    // --- Sessions ---

    /// Raw `(state, scratch)` columns for a user, if a row exists.
    pub fn load_session(&self, user_id: UserId) -> Result<Option<(String, String)>> {
        let row = self
            .conn()
            .query_row(
                "SELECT state, scratch FROM sessions WHERE user_id = ?1",
                params![user_id],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;
        Ok(row)
    }

    pub fn save_session(&self, user_id: UserId, state: &str, scratch: &str) -> Result<()> {
        let now = Local::now().to_rfc3339();
        self.conn().execute(
            "INSERT INTO sessions (user_id, state, scratch, updated_at)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(user_id) DO UPDATE SET
                state = excluded.state,
                scratch = excluded.scratch,
                updated_at = excluded.updated_at",
            params![user_id, state, scratch, now],
        )?;
        Ok(())
    }
}
