//! Wire protocol shared by the chat server and client.
//!
//! Newline-delimited UTF-8 text frames over TCP.
//!
//! # Client → Server
//!
//! ```text
//! /register <username>
//! /status <value>
//! <any other text>            relayed as chat
//! ```
//!
//! # Server → Client
//!
//! ```text
//! /userlist,<username>:<status>,...
//! [System] <notice>
//! <username>: <text>
//! Invalid username            (unicast)
//! Username already taken      (unicast)
//! ```
//!
//! See [`framing`] for the line codec.

pub mod command;
pub mod framing;
pub mod roster;

pub use command::Command;
pub use framing::{encode_line, LineFramer};
pub use roster::{is_guest, parse_user_list, user_list_frame, User};
