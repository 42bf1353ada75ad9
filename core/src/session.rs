//! Per-user dialog sessions: where each user is in a multi-step interaction.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use serde::de::Error as _;
use serde::{Deserialize, Serialize};

use crate::db::Database;
use crate::error::Result;
use crate::models::{FoodField, UserId};

/// The pending prompt for one user, with the partial answers gathered so far.
///
/// Scratch data lives inside the variant that needs it, so it cannot outlive
/// the step it belongs to.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum DialogState {
    #[default]
    Idle,
    // Log food
    AwaitingFoodName,
    AwaitingWeight { food_name: String },
    // Add food
    AwaitingName,
    AwaitingDensity { name: String },
    // Update food
    AwaitingFieldChoice { food_id: i64 },
    AwaitingValue { food_id: i64, field: FoodField },
    // Set goal
    AwaitingGoal,
}

impl DialogState {
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::AwaitingFoodName => "awaiting_food_name",
            Self::AwaitingWeight { .. } => "awaiting_weight",
            Self::AwaitingName => "awaiting_name",
            Self::AwaitingDensity { .. } => "awaiting_density",
            Self::AwaitingFieldChoice { .. } => "awaiting_field_choice",
            Self::AwaitingValue { .. } => "awaiting_value",
            Self::AwaitingGoal => "awaiting_goal",
        }
    }

    #[must_use]
    pub fn is_idle(&self) -> bool {
        matches!(self, Self::Idle)
    }

    /// Split into the `state` name and a JSON object of scratch fields.
    pub fn to_columns(&self) -> Result<(&'static str, String)> {
        let mut value = serde_json::to_value(self)?;
        if let Some(fields) = value.as_object_mut() {
            fields.remove("state");
        }
        Ok((self.name(), value.to_string()))
    }

    pub fn from_columns(state: &str, scratch: &str) -> Result<Self> {
        let mut value: serde_json::Value = serde_json::from_str(scratch)?;
        let fields = value
            .as_object_mut()
            .ok_or_else(|| serde_json::Error::custom("session scratch must be a JSON object"))?;
        fields.insert("state".to_string(), serde_json::Value::from(state));
        Ok(serde_json::from_value(value)?)
    }
}

/// Keyed storage for dialog sessions. One slot per user.
pub trait SessionStore: Send + Sync {
    /// The user's session, or [`DialogState::Idle`] if none was stored.
    fn get(&self, user_id: UserId) -> Result<DialogState>;
    fn put(&self, user_id: UserId, state: &DialogState) -> Result<()>;

    fn clear(&self, user_id: UserId) -> Result<()> {
        self.put(user_id, &DialogState::Idle)
    }
}

/// Sessions held in process memory; lost on restart.
#[derive(Default)]
pub struct MemorySessionStore {
    sessions: Mutex<HashMap<UserId, DialogState>>,
}

impl MemorySessionStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl SessionStore for MemorySessionStore {
    fn get(&self, user_id: UserId) -> Result<DialogState> {
        let sessions = self.sessions.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(sessions.get(&user_id).cloned().unwrap_or_default())
    }

    fn put(&self, user_id: UserId, state: &DialogState) -> Result<()> {
        let mut sessions = self.sessions.lock().unwrap_or_else(PoisonError::into_inner);
        if state.is_idle() {
            sessions.remove(&user_id);
        } else {
            sessions.insert(user_id, state.clone());
        }
        Ok(())
    }
}

/// Sessions in the `sessions` table, surviving restarts.
pub struct SqliteSessionStore {
    db: Arc<Database>,
}

impl SqliteSessionStore {
    #[must_use]
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }
}

impl SessionStore for SqliteSessionStore {
    fn get(&self, user_id: UserId) -> Result<DialogState> {
        match self.db.load_session(user_id)? {
            Some((state, scratch)) => DialogState::from_columns(&state, &scratch),
            None => Ok(DialogState::Idle),
        }
    }

    fn put(&self, user_id: UserId, state: &DialogState) -> Result<()> {
        let (name, scratch) = state.to_columns()?;
        self.db.save_session(user_id, name, &scratch)
    }
}

/// One mutex per user, so a user's events never interleave while different
/// users proceed independently.
///
/// Slots are created on first use and kept for the life of the process, the
/// same as sessions, which never expire.
#[derive(Default)]
pub struct UserLocks {
    slots: Mutex<HashMap<UserId, Arc<Mutex<()>>>>,
}

impl UserLocks {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The lock guarding `user_id`. Callers hold its guard for a whole event.
    pub fn slot(&self, user_id: UserId) -> Arc<Mutex<()>> {
        let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(slots.entry(user_id).or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn all_states() -> Vec<DialogState> {
        vec![
            DialogState::Idle,
            DialogState::AwaitingFoodName,
            DialogState::AwaitingWeight {
                food_name: "Apple".to_string(),
            },
            DialogState::AwaitingName,
            DialogState::AwaitingDensity {
                name: "Granola".to_string(),
            },
            DialogState::AwaitingFieldChoice { food_id: 12 },
            DialogState::AwaitingValue {
                food_id: 12,
                field: FoodField::Density,
            },
            DialogState::AwaitingGoal,
        ]
    }

    #[test]
    fn test_columns_layout() {
        let state = DialogState::AwaitingValue {
            food_id: 12,
            field: FoodField::Name,
        };
        let (name, scratch) = state.to_columns().unwrap();
        assert_eq!(name, "awaiting_value");
        let scratch: serde_json::Value = serde_json::from_str(&scratch).unwrap();
        assert_eq!(scratch, serde_json::json!({"food_id": 12, "field": "name"}));

        let (name, scratch) = DialogState::Idle.to_columns().unwrap();
        assert_eq!(name, "idle");
        assert_eq!(scratch, "{}");
    }

    #[test]
    fn test_state_names_match_serde_tags() {
        for state in all_states() {
            let value = serde_json::to_value(&state).unwrap();
            assert_eq!(value["state"], state.name());
        }
    }

    #[test]
    fn test_from_columns_rejects_garbage() {
        assert!(DialogState::from_columns("awaiting_weight", "[]").is_err());
        assert!(DialogState::from_columns("awaiting_weight", "{}").is_err());
        assert!(DialogState::from_columns("dancing", "{}").is_err());
    }

    #[test]
    fn test_memory_store_defaults_to_idle() {
        let store = MemorySessionStore::new();
        assert_eq!(store.get(1).unwrap(), DialogState::Idle);

        store.put(1, &DialogState::AwaitingGoal).unwrap();
        assert_eq!(store.get(1).unwrap(), DialogState::AwaitingGoal);
        assert_eq!(store.get(2).unwrap(), DialogState::Idle);

        store.clear(1).unwrap();
        assert_eq!(store.get(1).unwrap(), DialogState::Idle);
    }

    #[test]
    fn test_sqlite_store_persists_every_state() {
        let store = SqliteSessionStore::new(Arc::new(Database::open_in_memory().unwrap()));
        assert_eq!(store.get(7).unwrap(), DialogState::Idle);

        for state in all_states() {
            store.put(7, &state).unwrap();
            assert_eq!(store.get(7).unwrap(), state);
        }

        store.put(7, &DialogState::AwaitingFoodName).unwrap();
        store.clear(7).unwrap();
        assert_eq!(store.get(7).unwrap(), DialogState::Idle);
    }

    #[test]
    fn test_user_locks_share_slot_per_user() {
        let locks = UserLocks::new();
        let a = locks.slot(1);
        let b = locks.slot(1);
        let c = locks.slot(2);
        assert!(Arc::ptr_eq(&a, &b));
        assert!(!Arc::ptr_eq(&a, &c));

        let _held = a.lock().unwrap();
        assert!(b.try_lock().is_err());
        assert!(c.try_lock().is_ok());
    }
}
