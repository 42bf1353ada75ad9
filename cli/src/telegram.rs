//! Telegram transport: long-polls the Bot API and feeds the dialog controller.
//!
//! Each user gets a worker task with its own queue, so a user's updates are
//! handled in arrival order while different users run concurrently.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use serde::Deserialize;
use serde_json::{Value, json};
use tokio::sync::mpsc;

use foodlog_core::dialog::{DialogController, Event, Keyboard, MenuCommand, Reply};
use foodlog_core::models::{UserId, UserProfile};

/// Maximum message length for Telegram's sendMessage API.
const TELEGRAM_MAX_MESSAGE_LENGTH: usize = 4096;
const RETRY_DELAY: Duration = Duration::from_secs(5);

// --- Bot API payloads ---

#[derive(Debug, Deserialize)]
struct ApiResponse<T> {
    ok: bool,
    result: Option<T>,
    description: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct Update {
    pub update_id: i64,
    pub message: Option<Message>,
    pub callback_query: Option<CallbackQuery>,
}

#[derive(Debug, Deserialize)]
pub struct Message {
    pub chat: Chat,
    pub from: Option<TelegramUser>,
    pub text: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct Chat {
    pub id: i64,
}

#[derive(Debug, Deserialize)]
pub struct TelegramUser {
    pub id: i64,
    pub username: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
}

impl TelegramUser {
    fn profile(&self) -> UserProfile {
        UserProfile {
            username: self.username.clone(),
            first_name: self.first_name.clone(),
            last_name: self.last_name.clone(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct CallbackQuery {
    pub id: String,
    pub from: TelegramUser,
    pub message: Option<Message>,
    pub data: Option<String>,
}

/// An update reduced to what the controller needs, plus where to answer.
#[derive(Debug)]
pub struct Inbound {
    pub chat_id: i64,
    pub callback_id: Option<String>,
    pub event: Event,
}

impl Inbound {
    /// `None` for updates the bot does not act on (stickers, edits, channel posts).
    #[must_use]
    pub fn from_update(update: Update) -> Option<Self> {
        if let Some(query) = update.callback_query {
            let data = query.data?;
            let chat_id = query.message.as_ref().map_or(query.from.id, |m| m.chat.id);
            let event = Event::callback(query.from.id, &data).with_profile(query.from.profile());
            return Some(Self {
                chat_id,
                callback_id: Some(query.id),
                event,
            });
        }

        let message = update.message?;
        let from = message.from?;
        let text = message.text?;
        let event = match text.strip_prefix('/') {
            Some(rest) => {
                let name = rest.split_whitespace().next().unwrap_or_default();
                Event::command(from.id, name)
            }
            None => Event::text(from.id, &text),
        };
        Some(Self {
            chat_id: message.chat.id,
            callback_id: None,
            event: event.with_profile(from.profile()),
        })
    }
}

// --- Outbound rendering ---

fn rows<T: Clone>(items: &[T], width: usize) -> Vec<Vec<T>> {
    items.chunks(width).map(<[T]>::to_vec).collect()
}

/// Map the controller's logical keyboard to Bot API `reply_markup`.
#[must_use]
pub fn reply_markup(keyboard: &Keyboard) -> Option<Value> {
    match keyboard {
        Keyboard::None => None,
        Keyboard::Remove => Some(json!({ "remove_keyboard": true })),
        Keyboard::MainMenu => {
            let labels: Vec<&str> = MenuCommand::MENU.iter().filter_map(|c| c.label()).collect();
            Some(json!({ "keyboard": rows(&labels, 2), "resize_keyboard": true }))
        }
        Keyboard::Choices(choices) if choices.is_empty() => {
            Some(json!({ "remove_keyboard": true }))
        }
        Keyboard::Choices(choices) => Some(json!({
            "keyboard": rows(choices, 2),
            "resize_keyboard": true,
            "one_time_keyboard": true,
        })),
        Keyboard::Inline(options) => {
            let buttons: Vec<Value> = options
                .iter()
                .map(|o| json!({ "text": o.label, "callback_data": o.token }))
                .collect();
            Some(json!({ "inline_keyboard": rows(&buttons, 2) }))
        }
    }
}

/// Split a message into chunks that fit Telegram's character limit.
/// Tries to split on newlines, then spaces, then hard-cuts on a char boundary.
fn split_message(text: &str, max_len: usize) -> Vec<String> {
    if text.len() <= max_len {
        return vec![text.to_string()];
    }

    let mut chunks = Vec::new();
    let mut remaining = text;
    while !remaining.is_empty() {
        if remaining.len() <= max_len {
            chunks.push(remaining.to_string());
            break;
        }

        let mut limit = max_len;
        while !remaining.is_char_boundary(limit) {
            limit -= 1;
        }
        let chunk = &remaining[..limit];
        let split_at = chunk
            .rfind('\n')
            .or_else(|| chunk.rfind(' '))
            .filter(|&i| i > 0)
            .unwrap_or(limit);

        chunks.push(remaining[..split_at].to_string());
        remaining = remaining[split_at..].trim_start();
    }
    chunks
}

// --- Client ---

pub struct TelegramBot {
    bot_token: String,
    client: reqwest::Client,
    poll_timeout: u64,
}

impl TelegramBot {
    pub fn new(bot_token: String, poll_timeout: u64) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(format!("foodlog/{}", env!("CARGO_PKG_VERSION")))
            .timeout(Duration::from_secs(poll_timeout + 10))
            .connect_timeout(Duration::from_secs(5))
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self {
            bot_token,
            client,
            poll_timeout,
        })
    }

    fn api_url(&self, method: &str) -> String {
        format!("https://api.telegram.org/bot{}/{method}", self.bot_token)
    }

    async fn call<T: serde::de::DeserializeOwned>(&self, method: &str, body: &Value) -> Result<T> {
        let resp: ApiResponse<T> = self
            .client
            .post(self.api_url(method))
            .json(body)
            .send()
            .await
            .with_context(|| format!("Failed to reach Telegram ({method})"))?
            .json()
            .await
            .with_context(|| format!("Failed to parse Telegram {method} response"))?;

        match resp {
            ApiResponse {
                ok: true,
                result: Some(result),
                ..
            } => Ok(result),
            ApiResponse { description, .. } => bail!(
                "Telegram {method} failed: {}",
                description.as_deref().unwrap_or("no description")
            ),
        }
    }

    /// Verify the token before entering the poll loop.
    pub async fn get_me(&self) -> Result<TelegramUser> {
        self.call("getMe", &json!({})).await
    }

    pub async fn get_updates(&self, offset: i64) -> Result<Vec<Update>> {
        self.call(
            "getUpdates",
            &json!({
                "offset": offset,
                "timeout": self.poll_timeout,
                "allowed_updates": ["message", "callback_query"],
            }),
        )
        .await
    }

    pub async fn send_reply(&self, chat_id: i64, reply: &Reply) -> Result<()> {
        let chunks = split_message(&reply.text, TELEGRAM_MAX_MESSAGE_LENGTH);
        let last = chunks.len().saturating_sub(1);
        for (i, chunk) in chunks.iter().enumerate() {
            let mut body = json!({ "chat_id": chat_id, "text": chunk });
            // The keyboard rides on the final chunk only
            if i == last {
                if let Some(markup) = reply_markup(&reply.keyboard) {
                    body["reply_markup"] = markup;
                }
            }
            let _: Value = self.call("sendMessage", &body).await?;
        }
        Ok(())
    }

    pub async fn answer_callback(&self, callback_id: &str) -> Result<()> {
        let _: Value = self
            .call(
                "answerCallbackQuery",
                &json!({ "callback_query_id": callback_id }),
            )
            .await?;
        Ok(())
    }
}

// --- Dispatch ---

/// Sent when the controller could not produce a reply of its own.
fn failure_reply(user_id: UserId) -> Reply {
    Reply {
        user_id,
        text: "Something went wrong on our side. Please try again later.".to_string(),
        keyboard: Keyboard::MainMenu,
    }
}

/// Serves one user's queue for the life of the process. Workers are never
/// reaped; an idle one costs only a parked task and an empty channel.
async fn run_worker(
    user_id: UserId,
    bot: Arc<TelegramBot>,
    controller: Arc<DialogController>,
    mut rx: mpsc::UnboundedReceiver<Inbound>,
) {
    while let Some(inbound) = rx.recv().await {
        let Inbound {
            chat_id,
            callback_id,
            event,
        } = inbound;

        let c = Arc::clone(&controller);
        let reply = match tokio::task::spawn_blocking(move || c.handle(&event)).await {
            Ok(reply) => reply,
            Err(e) => {
                tracing::error!(user_id, error = %e, "dialog handler panicked");
                failure_reply(user_id)
            }
        };

        if let Some(id) = callback_id {
            if let Err(e) = bot.answer_callback(&id).await {
                tracing::warn!(user_id, error = %e, "answerCallbackQuery failed");
            }
        }
        if let Err(e) = bot.send_reply(chat_id, &reply).await {
            tracing::warn!(user_id, chat_id, error = %e, "sendMessage failed");
        }
    }
    tracing::debug!(user_id, "worker stopped");
}

/// Routes inbound updates to per-user worker tasks.
///
/// `workers` keeps one entry per user ever seen; sessions have no expiry, so
/// neither do workers.
struct Router {
    bot: Arc<TelegramBot>,
    controller: Arc<DialogController>,
    workers: HashMap<UserId, mpsc::UnboundedSender<Inbound>>,
}

impl Router {
    fn route(&mut self, inbound: Inbound) {
        let user_id = inbound.event.user_id;
        let tx = self.workers.entry(user_id).or_insert_with(|| {
            let (tx, rx) = mpsc::unbounded_channel();
            tokio::spawn(run_worker(
                user_id,
                Arc::clone(&self.bot),
                Arc::clone(&self.controller),
                rx,
            ));
            tx
        });
        if tx.send(inbound).is_err() {
            tracing::error!(user_id, "worker gone; dropping update");
            self.workers.remove(&user_id);
        }
    }
}

/// Long-poll until interrupted with Ctrl-C.
pub async fn run(bot: TelegramBot, controller: DialogController) -> Result<()> {
    let me = bot.get_me().await.context("Telegram rejected the bot token")?;
    tracing::info!(
        bot = me.username.as_deref().unwrap_or("unknown"),
        "Telegram bot listening for updates"
    );

    let mut router = Router {
        bot: Arc::new(bot),
        controller: Arc::new(controller),
        workers: HashMap::new(),
    };
    let mut offset: i64 = 0;

    loop {
        let updates = tokio::select! {
            res = router.bot.get_updates(offset) => res,
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Telegram bot shutting down");
                return Ok(());
            }
        };

        let updates = match updates {
            Ok(updates) => updates,
            Err(e) => {
                tracing::warn!(error = %format!("{e:#}"), "Telegram poll error");
                tokio::time::sleep(RETRY_DELAY).await;
                continue;
            }
        };

        for update in updates {
            offset = update.update_id + 1;
            match Inbound::from_update(update) {
                Some(inbound) => router.route(inbound),
                None => tracing::debug!(offset, "ignoring unsupported update"),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use foodlog_core::dialog::{InlineOption, Payload};

    fn parse(raw: &str) -> Update {
        serde_json::from_str(raw).unwrap()
    }

    #[test]
    fn test_api_url() {
        let bot = TelegramBot::new("123:ABC".into(), 30).unwrap();
        assert_eq!(
            bot.api_url("getUpdates"),
            "https://api.telegram.org/bot123:ABC/getUpdates"
        );
    }

    #[test]
    fn test_text_message_update() {
        let update = parse(
            r#"{"update_id": 10, "message": {"message_id": 1, "date": 0,
                "chat": {"id": 555, "type": "private"},
                "from": {"id": 42, "is_bot": false, "first_name": "Ana", "username": "ana"},
                "text": "Apple"}}"#,
        );
        let inbound = Inbound::from_update(update).unwrap();
        assert_eq!(inbound.chat_id, 555);
        assert_eq!(inbound.callback_id, None);
        assert_eq!(inbound.event.user_id, 42);
        assert_eq!(inbound.event.payload, Payload::Text("Apple".into()));
        assert_eq!(inbound.event.profile.username.as_deref(), Some("ana"));
    }

    #[test]
    fn test_command_update_drops_arguments() {
        let update = parse(
            r#"{"update_id": 11, "message": {"chat": {"id": 1},
                "from": {"id": 1, "first_name": "A"}, "text": "/log@FoodLogBot now"}}"#,
        );
        let inbound = Inbound::from_update(update).unwrap();
        assert_eq!(
            inbound.event.payload,
            Payload::Command("log@FoodLogBot".into())
        );
        assert_eq!(
            MenuCommand::from_command("log@FoodLogBot"),
            Some(MenuCommand::LogFood)
        );
    }

    #[test]
    fn test_callback_update() {
        let update = parse(
            r#"{"update_id": 12, "callback_query": {"id": "cb-1",
                "from": {"id": 42, "first_name": "Ana"},
                "message": {"chat": {"id": 555}},
                "data": "edit:7"}}"#,
        );
        let inbound = Inbound::from_update(update).unwrap();
        assert_eq!(inbound.chat_id, 555);
        assert_eq!(inbound.callback_id.as_deref(), Some("cb-1"));
        assert_eq!(inbound.event.payload, Payload::Callback("edit:7".into()));
    }

    #[test]
    fn test_unsupported_updates_ignored() {
        let sticker = parse(
            r#"{"update_id": 13, "message": {"chat": {"id": 1}, "from": {"id": 1},
                "sticker": {"file_id": "x"}}}"#,
        );
        assert!(Inbound::from_update(sticker).is_none());
        assert!(Inbound::from_update(parse(r#"{"update_id": 14}"#)).is_none());
    }

    #[test]
    fn test_api_error_response() {
        let resp: ApiResponse<Vec<Update>> =
            serde_json::from_str(r#"{"ok": false, "error_code": 401, "description": "Unauthorized"}"#)
                .unwrap();
        assert!(!resp.ok);
        assert!(resp.result.is_none());
        assert_eq!(resp.description.as_deref(), Some("Unauthorized"));
    }

    #[test]
    fn test_main_menu_markup() {
        let markup = reply_markup(&Keyboard::MainMenu).unwrap();
        let rows = markup["keyboard"].as_array().unwrap();
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[0][0], "🍽️ Log Food");
        assert_eq!(rows[2][1], "🎯 Set Goal");
        assert_eq!(markup["resize_keyboard"], true);
    }

    #[test]
    fn test_choices_and_inline_markup() {
        let markup = reply_markup(&Keyboard::Choices(vec![
            "Apple".into(),
            "Banana".into(),
            "Rice".into(),
        ]))
        .unwrap();
        assert_eq!(markup["keyboard"][1][0], "Rice");
        assert_eq!(markup["one_time_keyboard"], true);

        let markup = reply_markup(&Keyboard::Inline(vec![InlineOption {
            label: "✏️ Oats".into(),
            token: "edit:3".into(),
        }]))
        .unwrap();
        assert_eq!(markup["inline_keyboard"][0][0]["callback_data"], "edit:3");

        assert_eq!(
            reply_markup(&Keyboard::Choices(vec![])).unwrap()["remove_keyboard"],
            true
        );
        assert!(reply_markup(&Keyboard::None).is_none());
    }

    #[test]
    fn test_failure_reply_restores_menu() {
        let reply = failure_reply(42);
        assert_eq!(reply.user_id, 42);
        assert!(reply.text.starts_with("Something went wrong"));
        assert!(reply_markup(&reply.keyboard).unwrap()["keyboard"].is_array());
    }

    #[test]
    fn test_split_message_short() {
        assert_eq!(split_message("Hello", 4096), vec!["Hello"]);
    }

    #[test]
    fn test_split_message_on_newline() {
        let text = format!("{}\n{}", "a".repeat(30), "b".repeat(30));
        let chunks = split_message(&text, 40);
        assert_eq!(chunks, vec!["a".repeat(30), "b".repeat(30)]);
    }

    #[test]
    fn test_split_message_respects_char_boundaries() {
        let text = "🍎".repeat(10);
        let chunks = split_message(&text, 10);
        assert!(chunks.iter().all(|c| c.len() <= 10));
        assert_eq!(chunks.concat(), text);
    }
}
