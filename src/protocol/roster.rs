//! Roster entries and the `/userlist` frame.
//!
//! ```text
//! /userlist,alice:Online,bob:Away
//! ```
//!
//! Sessions still carrying the `Guest` placeholder are never listed.

use serde::{Deserialize, Serialize};

use crate::constants::{DEFAULT_STATUS, GUEST_PREFIX, USERLIST_PREFIX};

/// One registered user and their presence label.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct User {
    /// Registered username.
    pub username: String,
    /// Presence label (`Online`, `Away`, free text).
    pub status: String,
}

impl User {
    /// Create a roster entry.
    pub fn new(username: impl Into<String>, status: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            status: status.into(),
        }
    }
}

impl std::fmt::Display for User {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.username, self.status)
    }
}

/// True if `username` is an unregistered placeholder.
pub fn is_guest(username: &str) -> bool {
    username.starts_with(GUEST_PREFIX)
}

/// Build the `/userlist` frame for the given users, skipping placeholders.
pub fn user_list_frame<'a, I>(users: I) -> String
where
    I: IntoIterator<Item = &'a User>,
{
    let mut frame = String::from(USERLIST_PREFIX);
    for user in users.into_iter().filter(|u| !is_guest(&u.username)) {
        frame.push(',');
        frame.push_str(&user.username);
        frame.push(':');
        frame.push_str(&user.status);
    }
    frame
}

/// Parse a `/userlist` frame into roster entries.
///
/// Returns `None` if `line` is not a user-list frame. Entries without a
/// status default to `Online`; the status is everything after the first
/// `:`. Placeholder users are dropped.
pub fn parse_user_list(line: &str) -> Option<Vec<User>> {
    let rest = line.strip_prefix(USERLIST_PREFIX)?;
    if !rest.is_empty() && !rest.starts_with(',') {
        return None;
    }

    let users = rest
        .split(',')
        .filter(|part| !part.is_empty())
        .map(|part| match part.split_once(':') {
            Some((name, status)) => User::new(name, status),
            None => User::new(part, DEFAULT_STATUS),
        })
        .filter(|user| !user.username.is_empty() && !is_guest(&user.username))
        .collect();
    Some(users)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_lists_registered_users() {
        let users = vec![User::new("alice", "Online"), User::new("bob", "Away")];
        assert_eq!(user_list_frame(&users), "/userlist,alice:Online,bob:Away");
    }

    #[test]
    fn test_frame_skips_guests() {
        let users = vec![User::new("Guest3", "Online"), User::new("carol", "Busy")];
        assert_eq!(user_list_frame(&users), "/userlist,carol:Busy");
    }

    #[test]
    fn test_empty_frame() {
        assert_eq!(user_list_frame(&Vec::<User>::new()), "/userlist");
        assert_eq!(parse_user_list("/userlist"), Some(vec![]));
    }

    #[test]
    fn test_parse_frame() {
        let users = parse_user_list("/userlist,alice:Online,bob:Away").unwrap();
        assert_eq!(users, vec![User::new("alice", "Online"), User::new("bob", "Away")]);
    }

    #[test]
    fn test_parse_drops_guests_and_defaults_status() {
        let users = parse_user_list("/userlist,Guest7:Online,dave,erin:In a meeting").unwrap();
        assert_eq!(
            users,
            vec![User::new("dave", "Online"), User::new("erin", "In a meeting")]
        );
    }

    #[test]
    fn test_parse_status_keeps_colons() {
        let users = parse_user_list("/userlist,frank:back at 3:30").unwrap();
        assert_eq!(users, vec![User::new("frank", "back at 3:30")]);
    }

    #[test]
    fn test_parse_rejects_other_lines() {
        assert_eq!(parse_user_list("alice: hi"), None);
        assert_eq!(parse_user_list("/userlistx"), None);
    }

    #[test]
    fn test_display() {
        assert_eq!(User::new("alice", "Away").to_string(), "alice (Away)");
    }
}
