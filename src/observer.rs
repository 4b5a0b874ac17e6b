//! Callbacks from the chat core to the presentation layer.
//!
//! The server and client never print or draw anything themselves. They
//! report through these traits, implemented by whatever front-end is in
//! use: the terminal front-end in `main.rs`, a GUI, or a test harness.
//!
//! Callbacks run on the core's own threads (the server event loop thread,
//! the client listener thread), so implementations must be cheap and must
//! not call back into the blocking parts of the core.

use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Mutex;

use crate::protocol::User;

/// Notifications from a running [`ChatServer`](crate::server::ChatServer).
pub trait ServerObserver: Send + Sync {
    /// Operator-facing activity line.
    fn on_log(&self, _message: &str) {}

    /// The set of registered users or their statuses changed.
    fn on_roster_changed(&self, _users: &[User]) {}

    /// A non-fatal server error.
    fn on_error(&self, _message: &str) {}
}

/// Notifications from a [`ChatClient`](crate::client::ChatClient).
pub trait ClientObserver: Send + Sync {
    /// A display line arrived (chat, system notice, or reply).
    fn on_message(&self, _line: &str) {}

    /// The server sent a new roster.
    fn on_roster_changed(&self, _users: &[User]) {}

    /// The link went up (`true`) or down (`false`).
    fn on_connection_status_changed(&self, _connected: bool) {}

    /// A user-visible error.
    fn on_error(&self, _message: &str) {}
}

/// Server notification as a value, for channel-based consumers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerEvent {
    /// See [`ServerObserver::on_log`].
    Log(String),
    /// See [`ServerObserver::on_roster_changed`].
    Roster(Vec<User>),
    /// See [`ServerObserver::on_error`].
    Error(String),
}

/// Client notification as a value, for channel-based consumers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientEvent {
    /// See [`ClientObserver::on_message`].
    Message(String),
    /// See [`ClientObserver::on_roster_changed`].
    Roster(Vec<User>),
    /// See [`ClientObserver::on_connection_status_changed`].
    ConnectionStatus(bool),
    /// See [`ClientObserver::on_error`].
    Error(String),
}

/// Observer that forwards every callback into an `mpsc` channel.
///
/// Lets a front-end (or a test) consume events on its own thread.
/// Sends after the receiver is dropped are discarded.
#[derive(Debug)]
pub struct ChannelObserver<E> {
    tx: Mutex<Sender<E>>,
}

impl<E> ChannelObserver<E> {
    /// Create the observer and the receiving end.
    pub fn new() -> (Self, Receiver<E>) {
        let (tx, rx) = mpsc::channel();
        (Self { tx: Mutex::new(tx) }, rx)
    }

    fn emit(&self, event: E) {
        if let Ok(tx) = self.tx.lock() {
            let _ = tx.send(event);
        }
    }
}

impl ServerObserver for ChannelObserver<ServerEvent> {
    fn on_log(&self, message: &str) {
        self.emit(ServerEvent::Log(message.to_string()));
    }

    fn on_roster_changed(&self, users: &[User]) {
        self.emit(ServerEvent::Roster(users.to_vec()));
    }

    fn on_error(&self, message: &str) {
        self.emit(ServerEvent::Error(message.to_string()));
    }
}

impl ClientObserver for ChannelObserver<ClientEvent> {
    fn on_message(&self, line: &str) {
        self.emit(ClientEvent::Message(line.to_string()));
    }

    fn on_roster_changed(&self, users: &[User]) {
        self.emit(ClientEvent::Roster(users.to_vec()));
    }

    fn on_connection_status_changed(&self, connected: bool) {
        self.emit(ClientEvent::ConnectionStatus(connected));
    }

    fn on_error(&self, message: &str) {
        self.emit(ClientEvent::Error(message.to_string()));
    }
}

/// Observer that writes everything to the `log` facade.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogObserver;

impl ServerObserver for LogObserver {
    fn on_log(&self, message: &str) {
        log::info!("[Server] {message}");
    }

    fn on_roster_changed(&self, users: &[User]) {
        log::info!("[Server] Roster: {} registered user(s)", users.len());
    }

    fn on_error(&self, message: &str) {
        log::error!("[Server] {message}");
    }
}

impl ClientObserver for LogObserver {
    fn on_message(&self, line: &str) {
        log::info!("[Client] {line}");
    }

    fn on_roster_changed(&self, users: &[User]) {
        log::info!("[Client] Roster: {} user(s)", users.len());
    }

    fn on_connection_status_changed(&self, connected: bool) {
        log::info!("[Client] Connected: {connected}");
    }

    fn on_error(&self, message: &str) {
        log::error!("[Client] {message}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_observer_forwards_client_events() {
        let (observer, rx) = ChannelObserver::<ClientEvent>::new();
        observer.on_message("hi");
        observer.on_connection_status_changed(true);
        observer.on_roster_changed(&[User::new("alice", "Away")]);
        observer.on_error("boom");

        let events: Vec<ClientEvent> = rx.try_iter().collect();
        assert_eq!(
            events,
            vec![
                ClientEvent::Message("hi".into()),
                ClientEvent::ConnectionStatus(true),
                ClientEvent::Roster(vec![User::new("alice", "Away")]),
                ClientEvent::Error("boom".into()),
            ]
        );
    }

    #[test]
    fn test_channel_observer_survives_dropped_receiver() {
        let (observer, rx) = ChannelObserver::<ServerEvent>::new();
        drop(rx);
        observer.on_log("nobody listening");
    }
}
