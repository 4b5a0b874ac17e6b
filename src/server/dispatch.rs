//! Chat protocol state machine.
//!
//! Turns connection lifecycle events and parsed [`Command`]s into registry
//! mutations plus a list of [`Effect`]s. Nothing here touches a socket;
//! the event loop carries the effects out, which keeps every rule below
//! testable without I/O.

use std::net::SocketAddr;

use crate::constants::{INVALID_USERNAME, USERNAME_TAKEN};
use crate::protocol::command::{chat_message, system_message};
use crate::protocol::{is_guest, Command};

use super::registry::{ConnectionId, SessionRegistry};

/// Outbound work produced by the state machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    /// Send one line to a single connection.
    Unicast {
        /// Recipient.
        to: ConnectionId,
        /// Line without delimiter.
        line: String,
    },
    /// Send one line to every connection, the originator included.
    Broadcast(String),
    /// Send the current `/userlist` frame to every connection.
    BroadcastUserList,
    /// Notify the presentation layer that the roster changed.
    RosterChanged,
}

/// A newly accepted connection: create its session and refresh everyone's user list.
pub fn on_connect(
    registry: &mut SessionRegistry,
    id: ConnectionId,
    peer: Option<SocketAddr>,
) -> Vec<Effect> {
    registry.create(id, peer);
    vec![Effect::BroadcastUserList]
}

/// A connection closed or failed: drop its session and announce the departure.
///
/// Returns no effects if the session is already gone, so a connection that
/// fails on both its read and write side is only announced once.
pub fn on_disconnect(registry: &mut SessionRegistry, id: ConnectionId) -> Vec<Effect> {
    let Some(session) = registry.remove(id) else {
        return Vec::new();
    };
    vec![
        Effect::Broadcast(system_message(&format!(
            "{} has left the chat",
            session.username
        ))),
        Effect::BroadcastUserList,
        Effect::RosterChanged,
    ]
}

/// Handle one framed line from `from`. Blank lines are ignored.
pub fn on_line(registry: &mut SessionRegistry, from: ConnectionId, line: &str) -> Vec<Effect> {
    if line.is_empty() {
        return Vec::new();
    }
    on_command(registry, from, Command::parse(line))
}

/// Apply a parsed command from `from`.
pub fn on_command(
    registry: &mut SessionRegistry,
    from: ConnectionId,
    command: Command,
) -> Vec<Effect> {
    if registry.lookup(from).is_none() {
        log::warn!("[Server] Command from unknown connection {from}");
        return Vec::new();
    }

    match command {
        Command::Register(name) => register(registry, from, name),
        Command::SetStatus(value) => set_status(registry, from, value),
        Command::Chat(text) => {
            let Some(session) = registry.lookup(from) else {
                return Vec::new();
            };
            vec![Effect::Broadcast(chat_message(&session.username, &text))]
        }
    }
}

fn register(registry: &mut SessionRegistry, from: ConnectionId, name: String) -> Vec<Effect> {
    if !is_valid_username(&name) {
        return vec![Effect::Unicast {
            to: from,
            line: INVALID_USERNAME.to_string(),
        }];
    }
    if registry.is_username_taken(&name, Some(from)) {
        return vec![Effect::Unicast {
            to: from,
            line: USERNAME_TAKEN.to_string(),
        }];
    }

    let Some(session) = registry.lookup_mut(from) else {
        return Vec::new();
    };
    let notice = system_message(&format!("{name} has joined the chat"));
    session.username = name;

    vec![
        Effect::Broadcast(notice),
        Effect::BroadcastUserList,
        Effect::RosterChanged,
    ]
}

fn set_status(registry: &mut SessionRegistry, from: ConnectionId, value: String) -> Vec<Effect> {
    if value.is_empty() {
        log::debug!("[Server] Ignoring empty status from {from}");
        return Vec::new();
    }
    let Some(session) = registry.lookup_mut(from) else {
        return Vec::new();
    };
    let notice = system_message(&format!("{} is now {value}", session.username));
    session.status = value;

    vec![
        Effect::Broadcast(notice),
        Effect::BroadcastUserList,
        Effect::RosterChanged,
    ]
}

/// Usernames must be non-empty, must not look like a placeholder, and
/// must not contain the `/userlist` separators.
fn is_valid_username(name: &str) -> bool {
    !name.is_empty() && !is_guest(name) && !name.contains([',', ':'])
}
