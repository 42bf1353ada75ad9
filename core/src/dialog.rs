//! The conversational state machine.
//!
//! Each inbound [`Event`] is either a menu command, which always starts a new
//! dialog and discards whatever was pending, or an answer to the prompt the
//! user's session is waiting on. Domain services are only invoked when a
//! dialog completes.

use std::sync::PoisonError;

use crate::error::{Error, Result};
use crate::models::{FoodField, UserId, UserProfile, parse_positive, parse_weight, validate_food_name};
use crate::render;
use crate::service::{FoodLogService, today};
use crate::session::{DialogState, SessionStore, SqliteSessionStore, UserLocks};

const HELP_TEXT: &str = "Use the menu to log food, see your daily or weekly summary, \
manage your own foods, or set a daily calorie goal.\n\n\
Commands: /log /daily /weekly /addfood /myfoods /goal /cancel";

// --- Boundary types ---

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    Command(String),
    Text(String),
    Callback(String),
}

/// One inbound user interaction, already stripped of transport details.
#[derive(Debug, Clone)]
pub struct Event {
    pub user_id: UserId,
    pub profile: UserProfile,
    pub payload: Payload,
}

impl Event {
    #[must_use]
    pub fn command(user_id: UserId, name: &str) -> Self {
        Self::new(user_id, Payload::Command(name.to_string()))
    }

    #[must_use]
    pub fn text(user_id: UserId, text: &str) -> Self {
        Self::new(user_id, Payload::Text(text.to_string()))
    }

    #[must_use]
    pub fn callback(user_id: UserId, token: &str) -> Self {
        Self::new(user_id, Payload::Callback(token.to_string()))
    }

    fn new(user_id: UserId, payload: Payload) -> Self {
        Self {
            user_id,
            profile: UserProfile::default(),
            payload,
        }
    }

    #[must_use]
    pub fn with_profile(mut self, profile: UserProfile) -> Self {
        self.profile = profile;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InlineOption {
    pub label: String,
    pub token: String,
}

/// The logical choices valid after a reply. Layout is the transport's concern.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Keyboard {
    /// Leave whatever the user currently sees.
    None,
    /// Take away any reply keyboard, for free-form answers.
    Remove,
    MainMenu,
    /// Texts the user can send back verbatim.
    Choices(Vec<String>),
    Inline(Vec<InlineOption>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Reply {
    pub user_id: UserId,
    pub text: String,
    pub keyboard: Keyboard,
}

// --- Menu commands and callbacks ---

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MenuCommand {
    Start,
    Help,
    Cancel,
    LogFood,
    DailySummary,
    WeeklySummary,
    AddFood,
    MyFoods,
    SetGoal,
}

impl MenuCommand {
    /// Main-menu buttons, in display order.
    pub const MENU: [MenuCommand; 6] = [
        MenuCommand::LogFood,
        MenuCommand::DailySummary,
        MenuCommand::WeeklySummary,
        MenuCommand::AddFood,
        MenuCommand::MyFoods,
        MenuCommand::SetGoal,
    ];

    /// Parse a slash command such as `/log` or `/log@SomeBot`.
    #[must_use]
    pub fn from_command(name: &str) -> Option<Self> {
        let name = name.trim().trim_start_matches('/');
        let name = name.split('@').next().unwrap_or(name).to_lowercase();
        match name.as_str() {
            "start" => Some(Self::Start),
            "help" => Some(Self::Help),
            "cancel" => Some(Self::Cancel),
            "log" => Some(Self::LogFood),
            "daily" => Some(Self::DailySummary),
            "weekly" => Some(Self::WeeklySummary),
            "addfood" => Some(Self::AddFood),
            "myfoods" => Some(Self::MyFoods),
            "goal" => Some(Self::SetGoal),
            _ => None,
        }
    }

    /// Recognise a main-menu button press sent back as text.
    #[must_use]
    pub fn from_label(text: &str) -> Option<Self> {
        let text = text.trim();
        Self::MENU.into_iter().find(|c| c.label() == Some(text))
    }

    #[must_use]
    pub fn label(self) -> Option<&'static str> {
        match self {
            Self::LogFood => Some("🍽️ Log Food"),
            Self::DailySummary => Some("📅 Daily Summary"),
            Self::WeeklySummary => Some("📊 Weekly Summary"),
            Self::AddFood => Some("➕ Add Food"),
            Self::MyFoods => Some("🗂️ My Foods"),
            Self::SetGoal => Some("🎯 Set Goal"),
            Self::Start | Self::Help | Self::Cancel => None,
        }
    }
}

/// Opaque button payloads handed to the transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Callback {
    Edit(i64),
    Delete(i64),
    Field(FoodField),
}

impl Callback {
    #[must_use]
    pub fn parse(token: &str) -> Option<Self> {
        let (kind, arg) = token.trim().split_once(':')?;
        match kind {
            "edit" => arg.parse().ok().map(Self::Edit),
            "delete" => arg.parse().ok().map(Self::Delete),
            "field" => FoodField::parse(arg).map(Self::Field),
            _ => None,
        }
    }

    #[must_use]
    pub fn token(self) -> String {
        match self {
            Self::Edit(id) => format!("edit:{id}"),
            Self::Delete(id) => format!("delete:{id}"),
            Self::Field(field) => format!("field:{}", field.key()),
        }
    }
}

fn field_options() -> Keyboard {
    Keyboard::Inline(
        FoodField::ALL
            .into_iter()
            .map(|f| InlineOption {
                label: f.label().to_string(),
                token: Callback::Field(f).token(),
            })
            .collect(),
    )
}

/// Outcome of one transition: the next state and what to say.
struct Step {
    next: DialogState,
    text: String,
    keyboard: Keyboard,
}

impl Step {
    fn new(next: DialogState, text: impl Into<String>, keyboard: Keyboard) -> Self {
        Self {
            next,
            text: text.into(),
            keyboard,
        }
    }

    fn idle(text: impl Into<String>) -> Self {
        Self::new(DialogState::Idle, text, Keyboard::MainMenu)
    }
}

// --- Controller ---

pub struct DialogController {
    service: FoodLogService,
    sessions: Box<dyn SessionStore>,
    locks: UserLocks,
}

impl DialogController {
    #[must_use]
    pub fn new(service: FoodLogService, sessions: Box<dyn SessionStore>) -> Self {
        Self {
            service,
            sessions,
            locks: UserLocks::new(),
        }
    }

    /// Controller whose sessions live in the same database as the catalog.
    #[must_use]
    pub fn with_sqlite_sessions(service: FoodLogService) -> Self {
        let sessions = SqliteSessionStore::new(service.database().clone());
        Self::new(service, Box::new(sessions))
    }

    #[must_use]
    pub fn service(&self) -> &FoodLogService {
        &self.service
    }

    pub fn session(&self, user_id: UserId) -> Result<DialogState> {
        self.sessions.get(user_id)
    }

    /// Process one event to completion. Always yields exactly one reply.
    ///
    /// Events for the same user are serialized; the session is read, advanced
    /// and written back under that user's lock.
    pub fn handle(&self, event: &Event) -> Reply {
        let user_id = event.user_id;
        let slot = self.locks.slot(user_id);
        let _guard = slot.lock().unwrap_or_else(PoisonError::into_inner);

        let step = self
            .dispatch(event)
            .unwrap_or_else(|err| self.fail(user_id, &err));
        Reply {
            user_id,
            text: step.text,
            keyboard: step.keyboard,
        }
    }

    fn dispatch(&self, event: &Event) -> Result<Step> {
        let user_id = event.user_id;
        self.service.register_user(user_id, &event.profile)?;
        let current = self.sessions.get(user_id)?;
        let from = current.name();

        // Rejected input never ends a dialog: stay put and re-prompt.
        let step = match self.transition(user_id, current.clone(), &event.payload) {
            Ok(step) => step,
            Err(err) if err.is_recoverable() => {
                tracing::debug!(user_id, state = from, error = %err, "input rejected");
                Step::new(current, err.to_string(), Keyboard::None)
            }
            Err(err) => return Err(err),
        };

        self.sessions.put(user_id, &step.next)?;
        tracing::debug!(user_id, from, to = step.next.name(), "dialog step");
        Ok(step)
    }

    fn transition(&self, user_id: UserId, current: DialogState, payload: &Payload) -> Result<Step> {
        match payload {
            Payload::Command(name) => match MenuCommand::from_command(name) {
                Some(command) => self.start(user_id, command),
                None => Ok(Step::new(
                    current,
                    format!("Unknown command '{}'.\n\n{HELP_TEXT}", name.trim()),
                    Keyboard::None,
                )),
            },
            Payload::Text(text) => match MenuCommand::from_label(text) {
                Some(command) => self.start(user_id, command),
                None => self.answer(user_id, current, text),
            },
            Payload::Callback(token) => self.callback(user_id, current, token),
        }
    }

    /// Turn a dialog-ending failure into a reply and reset the session.
    fn fail(&self, user_id: UserId, err: &Error) -> Step {
        if err.is_internal() {
            tracing::error!(user_id, error = %err, "event processing failed");
        } else {
            tracing::info!(user_id, error = %err, "dialog ended with error");
        }
        if let Err(clear_err) = self.sessions.clear(user_id) {
            tracing::error!(user_id, error = %clear_err, "failed to reset session");
        }

        let text = match err {
            Error::NotFound { entity: "food", .. } => {
                "Food not found. It may have been deleted. Please try again.".to_string()
            }
            Error::NotFound { .. } => "Not found. Please try again.".to_string(),
            Error::DuplicateName(name) => {
                format!("You already have a food named '{name}'. Nothing was changed.")
            }
            Error::NotOwned(_) => "You can only change foods you added yourself.".to_string(),
            Error::Validation(msg) | Error::InvalidValue(msg) => msg.clone(),
            Error::Store(_) | Error::Session(_) => {
                "Something went wrong on our side. Please try again later.".to_string()
            }
        };
        Step::idle(text)
    }

    /// Start a top-level action. Any pending dialog is dropped.
    fn start(&self, user_id: UserId, command: MenuCommand) -> Result<Step> {
        let step = match command {
            MenuCommand::Start => Step::idle(
                "Welcome to the Daily Food Log! 🍎\n\
                 Track your meals and calories. What would you like to do?",
            ),
            MenuCommand::Help => Step::idle(HELP_TEXT),
            MenuCommand::Cancel => Step::idle("Cancelled. What would you like to do?"),
            MenuCommand::LogFood => self.prompt_food_name(
                DialogState::AwaitingFoodName,
                user_id,
                "Select a food item to log:",
            )?,
            MenuCommand::DailySummary => {
                let summary = self.service.daily_summary(user_id, today())?;
                Step::idle(render::daily_summary(&summary, true))
            }
            MenuCommand::WeeklySummary => {
                let summary = self.service.weekly_summary(user_id, today())?;
                Step::idle(render::weekly_summary(&summary))
            }
            MenuCommand::AddFood => Step::new(
                DialogState::AwaitingName,
                "Enter the name of the new food:",
                Keyboard::Remove,
            ),
            MenuCommand::MyFoods => {
                let foods = self.service.owned_foods(user_id)?;
                if foods.is_empty() {
                    Step::idle("You have no foods of your own yet. Use ➕ Add Food to create one.")
                } else {
                    let options = foods
                        .iter()
                        .flat_map(|f| {
                            [
                                InlineOption {
                                    label: format!("✏️ {}", f.name),
                                    token: Callback::Edit(f.id).token(),
                                },
                                InlineOption {
                                    label: format!("🗑️ {}", f.name),
                                    token: Callback::Delete(f.id).token(),
                                },
                            ]
                        })
                        .collect();
                    Step::new(
                        DialogState::Idle,
                        render::owned_foods(&foods),
                        Keyboard::Inline(options),
                    )
                }
            }
            MenuCommand::SetGoal => {
                let current = self
                    .service
                    .get_user(user_id)?
                    .and_then(|u| u.goal_kcal)
                    .map(|g| format!("Your current goal is {g} kcal. "))
                    .unwrap_or_default();
                Step::new(
                    DialogState::AwaitingGoal,
                    format!("{current}Enter your daily calorie goal in kcal (e.g., 2000):"),
                    Keyboard::Remove,
                )
            }
        };
        Ok(step)
    }

    fn prompt_food_name(&self, next: DialogState, user_id: UserId, text: &str) -> Result<Step> {
        let names = self
            .service
            .visible_foods(user_id)?
            .into_iter()
            .map(|f| f.name)
            .collect();
        Ok(Step::new(next, text, Keyboard::Choices(names)))
    }

    /// Interpret free text as the answer to the pending prompt.
    fn answer(&self, user_id: UserId, state: DialogState, text: &str) -> Result<Step> {
        let step = match state {
            DialogState::Idle => Step::idle(HELP_TEXT),

            DialogState::AwaitingFoodName => {
                match self.service.resolve_visible_food(user_id, text.trim())? {
                    Some(food) => Step::new(
                        DialogState::AwaitingWeight {
                            food_name: food.name,
                        },
                        "Enter the weight in grams (e.g., 100):",
                        Keyboard::Remove,
                    ),
                    None => self.prompt_food_name(
                        DialogState::AwaitingFoodName,
                        user_id,
                        "Please select a valid food from the keyboard below:",
                    )?,
                }
            }

            DialogState::AwaitingWeight { food_name } => match parse_weight(text) {
                Ok(weight_g) => {
                    let entry = self.service.log_entry(user_id, &food_name, weight_g)?;
                    Step::idle(format!(
                        "Logged {}: {}g ({:.1} kcal)",
                        entry.food_name, entry.weight_g, entry.calories
                    ))
                }
                Err(e) => Step::new(
                    DialogState::AwaitingWeight { food_name },
                    e.to_string(),
                    Keyboard::None,
                ),
            },

            DialogState::AwaitingName => match validate_food_name(text) {
                Ok(name) => Step::new(
                    DialogState::AwaitingDensity { name: name.clone() },
                    format!("Enter the calories per gram for {name} (e.g., 0.52):"),
                    Keyboard::None,
                ),
                Err(e) => Step::new(DialogState::AwaitingName, e.to_string(), Keyboard::None),
            },

            DialogState::AwaitingDensity { name } => {
                match parse_positive(text, "calories per gram") {
                    Ok(density) => {
                        let food = self.service.create_food(user_id, &name, density)?;
                        Step::idle(format!(
                            "Added {} ({} kcal/g). You can now log it.",
                            food.name, food.kcal_per_gram
                        ))
                    }
                    Err(e) => Step::new(
                        DialogState::AwaitingDensity { name },
                        e.to_string(),
                        Keyboard::None,
                    ),
                }
            }

            DialogState::AwaitingFieldChoice { food_id } => match FoodField::parse(text) {
                Some(field) => Self::choose_field(food_id, field),
                None => Step::new(
                    DialogState::AwaitingFieldChoice { food_id },
                    "Please choose which field to edit:",
                    field_options(),
                ),
            },

            DialogState::AwaitingValue { food_id, field } => match field.edit_from(text) {
                Ok(edit) => {
                    let food = self.service.update_food(food_id, user_id, &edit)?;
                    Step::idle(format!(
                        "Updated {}: {} kcal/g.",
                        food.name, food.kcal_per_gram
                    ))
                }
                Err(e) => Step::new(
                    DialogState::AwaitingValue { food_id, field },
                    e.to_string(),
                    Keyboard::None,
                ),
            },

            DialogState::AwaitingGoal => match parse_positive(text, "calorie goal") {
                Ok(goal) => {
                    self.service.set_goal(user_id, goal)?;
                    Step::idle(format!("Daily calorie goal set to {goal} kcal."))
                }
                Err(e) => Step::new(DialogState::AwaitingGoal, e.to_string(), Keyboard::None),
            },
        };
        Ok(step)
    }

    fn choose_field(food_id: i64, field: FoodField) -> Step {
        Step::new(
            DialogState::AwaitingValue { food_id, field },
            field.prompt(),
            Keyboard::Remove,
        )
    }

    fn callback(&self, user_id: UserId, state: DialogState, token: &str) -> Result<Step> {
        let Some(callback) = Callback::parse(token) else {
            return Ok(Step::new(
                state,
                "That button is no longer valid.",
                Keyboard::None,
            ));
        };

        let step = match (callback, state) {
            (Callback::Edit(food_id), _) => {
                let food = self
                    .service
                    .get_food(food_id)?
                    .ok_or_else(|| Error::food_not_found(food_id))?;
                if !food.is_owned_by(user_id) {
                    return Err(Error::NotOwned(food_id));
                }
                Step::new(
                    DialogState::AwaitingFieldChoice { food_id },
                    format!(
                        "Editing {} ({} kcal/g). Which field do you want to change?",
                        food.name, food.kcal_per_gram
                    ),
                    field_options(),
                )
            }
            (Callback::Delete(food_id), _) => {
                if self.service.delete_food(food_id, user_id)? {
                    Step::idle("Food deleted. Your past log entries are kept.")
                } else {
                    Step::idle("That food was already deleted.")
                }
            }
            (Callback::Field(field), DialogState::AwaitingFieldChoice { food_id }) => {
                Self::choose_field(food_id, field)
            }
            (Callback::Field(_), state) => {
                Step::new(state, "That button has expired.", Keyboard::None)
            }
        };
        Ok(step)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::db::Database;
    use crate::models::Owner;
    use crate::session::MemorySessionStore;

    fn controller() -> DialogController {
        DialogController::new(
            FoodLogService::new_in_memory().unwrap(),
            Box::new(MemorySessionStore::new()),
        )
    }

    fn say(c: &DialogController, user: UserId, text: &str) -> Reply {
        c.handle(&Event::text(user, text))
    }

    fn cmd(c: &DialogController, user: UserId, name: &str) -> Reply {
        c.handle(&Event::command(user, name))
    }

    fn tap(c: &DialogController, user: UserId, token: &str) -> Reply {
        c.handle(&Event::callback(user, token))
    }

    fn state(c: &DialogController, user: UserId) -> DialogState {
        c.session(user).unwrap()
    }

    fn today_entries(c: &DialogController, user: UserId) -> Vec<crate::models::LogEntry> {
        c.service().daily_summary(user, today()).unwrap().entries
    }

    fn awaiting_weight(name: &str) -> DialogState {
        DialogState::AwaitingWeight {
            food_name: name.to_string(),
        }
    }

    #[test]
    fn test_log_food_scenario() {
        let c = controller();

        let reply = say(&c, 1, "🍽️ Log Food");
        assert_eq!(state(&c, 1), DialogState::AwaitingFoodName);
        match reply.keyboard {
            Keyboard::Choices(names) => assert!(names.contains(&"Apple".to_string())),
            other => panic!("expected food choices, got {other:?}"),
        }

        let reply = say(&c, 1, "Pizza");
        assert!(reply.text.contains("valid food"));
        assert_eq!(state(&c, 1), DialogState::AwaitingFoodName);

        say(&c, 1, "Apple");
        assert_eq!(state(&c, 1), awaiting_weight("Apple"));

        let reply = say(&c, 1, "-5");
        assert!(reply.text.contains("positive"));
        assert_eq!(state(&c, 1), awaiting_weight("Apple"));

        let reply = say(&c, 1, "100");
        assert_eq!(reply.text, "Logged Apple: 100g (52.0 kcal)");
        assert_eq!(reply.keyboard, Keyboard::MainMenu);
        assert_eq!(state(&c, 1), DialogState::Idle);

        let entries = today_entries(&c, 1);
        assert_eq!(entries.len(), 1);
        assert!((entries[0].calories - 0.52 * 100.0).abs() < 1e-9);
    }

    #[test]
    fn test_non_numeric_weight_keeps_scratch() {
        let c = controller();
        cmd(&c, 1, "/log");
        say(&c, 1, "Rice");

        let reply = say(&c, 1, "a handful");
        assert!(reply.text.contains("valid number"));
        assert_eq!(state(&c, 1), awaiting_weight("Rice"));
        assert!(today_entries(&c, 1).is_empty());
    }

    #[test]
    fn test_oversized_weight_reprompts() {
        let c = controller();
        cmd(&c, 1, "/log");
        say(&c, 1, "Bread");

        let reply = say(&c, 1, "1e308");
        assert!(reply.text.contains("at most"));
        assert_eq!(state(&c, 1), awaiting_weight("Bread"));

        cmd(&c, 1, "/log");
        say(&c, 1, "Apple");
        say(&c, 1, "100");
        let summary = c.service().daily_summary(1, today()).unwrap();
        assert_eq!(summary.entries.len(), 1);
        assert!(summary.total_calories.is_finite());
    }

    #[test]
    fn test_service_rejection_keeps_dialog() {
        let c = controller();
        c.service().register_user(1, &UserProfile::default()).unwrap();
        c.service().create_food(1, "Lead", 1e308).unwrap();
        cmd(&c, 1, "/log");
        say(&c, 1, "Lead");

        let reply = say(&c, 1, "100");
        assert!(reply.text.contains("too large"));
        assert_eq!(reply.keyboard, Keyboard::None);
        assert_eq!(state(&c, 1), awaiting_weight("Lead"));
        assert!(today_entries(&c, 1).is_empty());

        let reply = say(&c, 1, "0.5");
        assert!(reply.text.starts_with("Logged Lead: 0.5g"));
        assert_eq!(state(&c, 1), DialogState::Idle);
    }

    #[test]
    fn test_menu_command_preempts_dialog() {
        let c = controller();
        cmd(&c, 1, "/addfood");
        say(&c, 1, "Granola");
        assert_eq!(
            state(&c, 1),
            DialogState::AwaitingDensity {
                name: "Granola".to_string()
            }
        );

        say(&c, 1, "🍽️ Log Food");
        assert_eq!(state(&c, 1), DialogState::AwaitingFoodName);

        // A fresh add-food dialog has no memory of "Granola"
        cmd(&c, 1, "/addfood");
        assert_eq!(state(&c, 1), DialogState::AwaitingName);
        say(&c, 1, "Muesli");
        say(&c, 1, "3.6");
        assert!(c.service().resolve_visible_food(1, "Muesli").unwrap().is_some());
        assert!(c.service().resolve_visible_food(1, "Granola").unwrap().is_none());
    }

    #[test]
    fn test_cancel_resets() {
        let c = controller();
        cmd(&c, 1, "/goal");
        let reply = cmd(&c, 1, "/cancel");
        assert!(reply.text.starts_with("Cancelled"));
        assert_eq!(state(&c, 1), DialogState::Idle);
    }

    #[test]
    fn test_unknown_command_leaves_state() {
        let c = controller();
        cmd(&c, 1, "/goal");
        let reply = cmd(&c, 1, "/dance");
        assert!(reply.text.contains("Unknown command '/dance'"));
        assert_eq!(state(&c, 1), DialogState::AwaitingGoal);
    }

    #[test]
    fn test_idle_text_gets_help() {
        let c = controller();
        let reply = say(&c, 1, "hello?");
        assert!(reply.text.contains("/log"));
        assert_eq!(reply.keyboard, Keyboard::MainMenu);
        assert_eq!(state(&c, 1), DialogState::Idle);
    }

    #[test]
    fn test_end_to_end_summaries_and_goal() {
        let c = controller();

        say(&c, 1, "🍽️ Log Food");
        say(&c, 1, "Apple");
        say(&c, 1, "100");
        let reply = say(&c, 1, "📅 Daily Summary");
        assert!(reply.text.contains("Total Calories: 52.0 kcal"));
        assert!(!reply.text.contains("goal"));

        say(&c, 2, "🎯 Set Goal");
        assert_eq!(state(&c, 2), DialogState::AwaitingGoal);
        let reply = say(&c, 2, "0");
        assert!(reply.text.contains("positive"));
        assert_eq!(state(&c, 2), DialogState::AwaitingGoal);
        say(&c, 2, "2000");
        assert_eq!(state(&c, 2), DialogState::Idle);

        say(&c, 2, "🍽️ Log Food");
        say(&c, 2, "Chicken Breast");
        let reply = say(&c, 2, "200");
        assert_eq!(reply.text, "Logged Chicken Breast: 200g (330.0 kcal)");
        let reply = cmd(&c, 2, "/daily");
        assert!(reply.text.contains("Total Calories: 330.0 kcal"));
        assert!(reply.text.contains("16.5% of goal"));

        let reply = cmd(&c, 2, "/weekly");
        assert!(reply.text.contains("Total Weekly Calories: 330.0 kcal"));
    }

    #[test]
    fn test_empty_summaries() {
        let c = controller();
        assert!(cmd(&c, 1, "/daily").text.contains("No food logged for today"));
        assert!(cmd(&c, 1, "/weekly").text.contains("No food logged for this week"));
    }

    #[test]
    fn test_add_food_duplicate_ends_dialog() {
        let c = controller();
        c.service().register_user(1, &UserProfile::default()).unwrap();
        c.service().create_food(1, "Granola", 4.7).unwrap();

        cmd(&c, 1, "/addfood");
        let reply = say(&c, 1, "   ");
        assert!(reply.text.contains("must not be empty"));
        assert_eq!(state(&c, 1), DialogState::AwaitingName);

        say(&c, 1, "Granola");
        let reply = say(&c, 1, "nope");
        assert!(reply.text.contains("valid number"));
        let reply = say(&c, 1, "4.5");
        assert!(reply.text.contains("already have a food named 'Granola'"));
        assert_eq!(state(&c, 1), DialogState::Idle);
    }

    #[test]
    fn test_added_food_shadows_global_when_logging() {
        let c = controller();
        cmd(&c, 1, "/addfood");
        say(&c, 1, "Apple");
        say(&c, 1, "0.6");

        cmd(&c, 1, "/log");
        say(&c, 1, "Apple");
        let reply = say(&c, 1, "100g");
        assert_eq!(reply.text, "Logged Apple: 100g (60.0 kcal)");
    }

    #[test]
    fn test_update_food_dialog() {
        let c = controller();
        c.service().register_user(1, &UserProfile::default()).unwrap();
        let food = c.service().create_food(1, "Oats", 3.8).unwrap();

        let reply = cmd(&c, 1, "/myfoods");
        match &reply.keyboard {
            Keyboard::Inline(options) => {
                assert!(options.iter().any(|o| o.token == format!("edit:{}", food.id)));
                assert!(options.iter().any(|o| o.token == format!("delete:{}", food.id)));
            }
            other => panic!("expected inline options, got {other:?}"),
        }

        tap(&c, 1, &format!("edit:{}", food.id));
        assert_eq!(
            state(&c, 1),
            DialogState::AwaitingFieldChoice { food_id: food.id }
        );

        let reply = say(&c, 1, "colour");
        assert!(reply.text.contains("choose which field"));

        tap(&c, 1, "field:density");
        let pending = DialogState::AwaitingValue {
            food_id: food.id,
            field: FoodField::Density,
        };
        assert_eq!(state(&c, 1), pending);

        say(&c, 1, "-1");
        assert_eq!(state(&c, 1), pending);

        let reply = say(&c, 1, "3.9");
        assert!(reply.text.contains("3.9 kcal/g"));
        assert_eq!(state(&c, 1), DialogState::Idle);
        let updated = c.service().get_food(food.id).unwrap().unwrap();
        assert!((updated.kcal_per_gram - 3.9).abs() < f64::EPSILON);
    }

    #[test]
    fn test_rename_collision_ends_dialog() {
        let c = controller();
        c.service().register_user(1, &UserProfile::default()).unwrap();
        c.service().create_food(1, "Oats", 3.8).unwrap();
        let bran = c.service().create_food(1, "Bran", 2.1).unwrap();

        tap(&c, 1, &format!("edit:{}", bran.id));
        say(&c, 1, "Name");
        let reply = say(&c, 1, "Oats");
        assert!(reply.text.contains("already have a food named 'Oats'"));
        assert_eq!(state(&c, 1), DialogState::Idle);
        assert_eq!(c.service().get_food(bran.id).unwrap().unwrap().name, "Bran");
    }

    #[test]
    fn test_edit_global_food_not_owned() {
        let c = controller();
        let apple = c
            .service()
            .database()
            .find_food("Apple", Owner::Global)
            .unwrap()
            .unwrap();
        cmd(&c, 1, "/goal");

        let reply = tap(&c, 1, &format!("edit:{}", apple.id));
        assert!(reply.text.contains("only change foods you added"));
        assert_eq!(state(&c, 1), DialogState::Idle);
    }

    #[test]
    fn test_field_callback_when_not_editing() {
        let c = controller();
        cmd(&c, 1, "/log");
        let reply = tap(&c, 1, "field:name");
        assert_eq!(reply.text, "That button has expired.");
        assert_eq!(state(&c, 1), DialogState::AwaitingFoodName);

        let reply = tap(&c, 1, "bogus");
        assert_eq!(reply.text, "That button is no longer valid.");
        assert_eq!(state(&c, 1), DialogState::AwaitingFoodName);
    }

    #[test]
    fn test_delete_callback_keeps_history() {
        let c = controller();
        cmd(&c, 1, "/addfood");
        say(&c, 1, "Granola");
        say(&c, 1, "4.7");
        cmd(&c, 1, "/log");
        say(&c, 1, "Granola");
        say(&c, 1, "50");
        let food = c.service().owned_foods(1).unwrap().remove(0);

        let reply = tap(&c, 1, &format!("delete:{}", food.id));
        assert!(reply.text.starts_with("Food deleted"));
        let reply = tap(&c, 1, &format!("delete:{}", food.id));
        assert_eq!(reply.text, "That food was already deleted.");

        let entries = today_entries(&c, 1);
        assert_eq!(entries.len(), 1);
        assert!((entries[0].calories - 235.0).abs() < 1e-9);
    }

    #[test]
    fn test_food_deleted_mid_dialog() {
        let c = controller();
        cmd(&c, 1, "/addfood");
        say(&c, 1, "Granola");
        say(&c, 1, "4.7");
        let food = c.service().owned_foods(1).unwrap().remove(0);

        cmd(&c, 1, "/log");
        say(&c, 1, "Granola");
        c.service().delete_food(food.id, 1).unwrap();

        let reply = say(&c, 1, "50");
        assert!(reply.text.starts_with("Food not found"));
        assert_eq!(state(&c, 1), DialogState::Idle);
        assert!(today_entries(&c, 1).is_empty());
    }

    #[test]
    fn test_event_registers_user_profile() {
        let c = controller();
        let profile = UserProfile {
            username: Some("ana".to_string()),
            first_name: Some("Ana".to_string()),
            last_name: None,
        };
        c.handle(&Event::command(9, "/start").with_profile(profile));
        let user = c.service().get_user(9).unwrap().unwrap();
        assert_eq!(user.first_name.as_deref(), Some("Ana"));
    }

    #[test]
    fn test_sqlite_sessions_survive_controller_restart() {
        let db = Arc::new(Database::open_in_memory().unwrap());
        let first =
            DialogController::with_sqlite_sessions(FoodLogService::with_database(db.clone()));
        cmd(&first, 1, "/log");
        say(&first, 1, "Banana");
        drop(first);

        let second = DialogController::with_sqlite_sessions(FoodLogService::with_database(db));
        assert_eq!(state(&second, 1), awaiting_weight("Banana"));
        let reply = say(&second, 1, "100");
        assert_eq!(reply.text, "Logged Banana: 100g (89.0 kcal)");
    }

    struct BrokenStore;

    impl SessionStore for BrokenStore {
        fn get(&self, _user_id: UserId) -> Result<DialogState> {
            Err(Error::Store(rusqlite::Error::InvalidQuery))
        }

        fn put(&self, _user_id: UserId, _state: &DialogState) -> Result<()> {
            Err(Error::Store(rusqlite::Error::InvalidQuery))
        }
    }

    #[test]
    fn test_store_failure_yields_generic_reply() {
        let c = DialogController::new(
            FoodLogService::new_in_memory().unwrap(),
            Box::new(BrokenStore),
        );
        let reply = cmd(&c, 1, "/log");
        assert!(reply.text.starts_with("Something went wrong"));
        assert_eq!(reply.keyboard, Keyboard::MainMenu);
    }

    #[test]
    fn test_concurrent_users_do_not_interfere() {
        let c = Arc::new(controller());
        let foods = ["Apple", "Rice", "Banana", "Salmon"];

        let handles: Vec<_> = (1..=8)
            .map(|user: UserId| {
                let c = Arc::clone(&c);
                std::thread::spawn(move || {
                    let food = foods[(user as usize) % foods.len()];
                    for _ in 0..5 {
                        say(&c, user, "🍽️ Log Food");
                        say(&c, user, food);
                        say(&c, user, "10");
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        for user in 1..=8 {
            let entries = today_entries(&c, user);
            assert_eq!(entries.len(), 5);
            let food = foods[(user as usize) % foods.len()];
            assert!(entries.iter().all(|e| e.food_name == food));
            assert_eq!(state(&c, user), DialogState::Idle);
        }
    }

    #[test]
    fn test_menu_command_parsing() {
        assert_eq!(MenuCommand::from_command("/log"), Some(MenuCommand::LogFood));
        assert_eq!(
            MenuCommand::from_command("/Daily@FoodLogBot"),
            Some(MenuCommand::DailySummary)
        );
        assert_eq!(MenuCommand::from_command("weekly"), Some(MenuCommand::WeeklySummary));
        assert_eq!(MenuCommand::from_command("/nope"), None);
        assert_eq!(
            MenuCommand::from_label(" 🎯 Set Goal "),
            Some(MenuCommand::SetGoal)
        );
        assert_eq!(MenuCommand::from_label("Apple"), None);
    }

    #[test]
    fn test_callback_tokens() {
        for cb in [
            Callback::Edit(3),
            Callback::Delete(4),
            Callback::Field(FoodField::Name),
        ] {
            assert_eq!(Callback::parse(&cb.token()), Some(cb));
        }
        assert_eq!(Callback::parse("edit:abc"), None);
        assert_eq!(Callback::parse("field:brand"), None);
        assert_eq!(Callback::parse("edit"), None);
    }
}
