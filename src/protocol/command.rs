//! Client command parsing and server line formatting.
//!
//! Inbound lines are parsed once into a [`Command`] so the dispatcher can
//! match exhaustively instead of testing string prefixes in several places.

use crate::constants::{REGISTER_COMMAND, STATUS_COMMAND, SYSTEM_PREFIX};

/// A parsed client-to-server line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// `/register <name>`; the name is trimmed and may be empty.
    Register(String),
    /// `/status <value>`; the value is trimmed and may be empty.
    SetStatus(String),
    /// Any other non-empty text, relayed as chat.
    Chat(String),
}

impl Command {
    /// Parse one framed line.
    ///
    /// A command word must be followed by whitespace or end the line, so
    /// `/registered` is chat, while a bare `/register` is a registration
    /// with an empty name.
    pub fn parse(line: &str) -> Self {
        if let Some(name) = strip_command(line, REGISTER_COMMAND) {
            Command::Register(name.to_string())
        } else if let Some(value) = strip_command(line, STATUS_COMMAND) {
            Command::SetStatus(value.to_string())
        } else {
            Command::Chat(line.to_string())
        }
    }

    /// Encode this command as the line a client sends.
    pub fn to_line(&self) -> String {
        match self {
            Command::Register(name) => format!("{REGISTER_COMMAND} {name}"),
            Command::SetStatus(value) => format!("{STATUS_COMMAND} {value}"),
            Command::Chat(text) => text.clone(),
        }
    }
}

/// Return the trimmed argument if `line` starts with the command word.
fn strip_command<'a>(line: &'a str, command: &str) -> Option<&'a str> {
    let rest = line.strip_prefix(command)?;
    if rest.is_empty() {
        return Some("");
    }
    rest.starts_with(char::is_whitespace).then(|| rest.trim())
}

/// Format a server notice: `[System] <text>`.
pub fn system_message(text: &str) -> String {
    format!("{SYSTEM_PREFIX}{text}")
}

/// Format a relayed chat line: `<username>: <text>`.
pub fn chat_message(username: &str, text: &str) -> String {
    format!("{username}: {text}")
}
