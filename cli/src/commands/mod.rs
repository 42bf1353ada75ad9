mod chat;
mod foods;
mod helpers;
mod summary;

pub(crate) use chat::cmd_chat;
pub(crate) use foods::{cmd_foods, cmd_goal};
pub(crate) use summary::{cmd_summary, cmd_weekly};
