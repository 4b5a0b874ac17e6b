//! Relaychat - line-delimited TCP chat relay.
//!
//! A server accepts many concurrent TCP connections, gives each a
//! placeholder identity until it registers, and relays chat lines, joins,
//! leaves and presence changes to every connected client. A companion
//! client connects, registers, and transparently reconnects after a
//! dropped link.
//!
//! # Architecture
//!
//! ```text
//! bytes ──► LineFramer ──► Command ──► dispatch ──► registry mutation
//!                                          │
//!                                          └──► Effects ──► EventLoop writes
//! ```
//!
//! Presentation (terminal, GUI, tests) stays outside the core. It calls
//! into [`ChatServer`] / [`ChatClient`] and receives callbacks through
//! [`ServerObserver`] / [`ClientObserver`].
//!
//! # Modules
//!
//! - [`protocol`] - Line framing, commands, roster frames
//! - [`server`] - Session registry, protocol state machine, event loop
//! - [`client`] - Blocking client with bounded reconnect
//! - [`observer`] - Presentation callbacks
//! - [`config`] - Configuration loading/saving

pub mod client;
pub mod config;
pub mod constants;
pub mod observer;
pub mod protocol;
pub mod server;

pub use client::{ChatClient, ConnectionState, Presence, ReconnectPolicy};
pub use config::{ClientConfig, Config, ServerConfig};
pub use observer::{
    ChannelObserver, ClientEvent, ClientObserver, LogObserver, ServerEvent, ServerObserver,
};
pub use protocol::User;
pub use server::ChatServer;
