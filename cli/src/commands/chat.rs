use anyhow::Result;
use std::io::{self, BufRead, Write};

use foodlog_core::dialog::{DialogController, Event, Keyboard, MenuCommand, Reply};
use foodlog_core::models::UserId;

/// Console input: `/name` is a command, `:token` a button press, anything else text.
pub(crate) fn parse_line(user_id: UserId, line: &str) -> Option<Event> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }
    let event = if let Some(name) = line.strip_prefix('/') {
        Event::command(user_id, name)
    } else if let Some(token) = line.strip_prefix(':') {
        Event::callback(user_id, token)
    } else {
        Event::text(user_id, line)
    };
    Some(event)
}

pub(crate) fn format_reply(reply: &Reply) -> String {
    let buttons: Vec<String> = match &reply.keyboard {
        Keyboard::None | Keyboard::Remove => Vec::new(),
        Keyboard::MainMenu => MenuCommand::MENU
            .iter()
            .filter_map(|c| c.label())
            .map(|l| format!("[{l}]"))
            .collect(),
        Keyboard::Choices(choices) => choices.iter().map(|c| format!("[{c}]")).collect(),
        Keyboard::Inline(options) => options
            .iter()
            .map(|o| format!("[{} :{}]", o.label, o.token))
            .collect(),
    };

    if buttons.is_empty() {
        reply.text.clone()
    } else {
        format!("{}\n  {}", reply.text, buttons.join(" "))
    }
}

pub(crate) fn run_chat<R: BufRead, W: Write>(
    controller: &DialogController,
    user_id: UserId,
    input: R,
    mut out: W,
) -> Result<()> {
    for line in input.lines() {
        let line = line?;
        let Some(event) = parse_line(user_id, &line) else {
            continue;
        };
        let reply = controller.handle(&event);
        writeln!(out, "{}\n", format_reply(&reply))?;
        out.flush()?;
    }
    Ok(())
}

pub(crate) fn cmd_chat(controller: &DialogController, user_id: UserId) -> Result<()> {
    eprintln!("Chatting as user {user_id}. /command, :button-token, or text. Ctrl-D to quit.\n");
    let start = controller.handle(&Event::command(user_id, "start"));
    println!("{}\n", format_reply(&start));

    let stdin = io::stdin();
    run_chat(controller, user_id, stdin.lock(), io::stdout().lock())
}
