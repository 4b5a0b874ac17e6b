//! Session registry for connected chat clients.
//!
//! One [`Session`] per live connection, keyed by [`ConnectionId`]. The
//! registry only knows connection ids; the transports themselves belong to
//! the event loop, which is also the only code that touches the registry.

use std::collections::btree_map::Entry;
use std::collections::BTreeMap;
use std::net::SocketAddr;

use anyhow::Result;
use chrono::{DateTime, Utc};

use crate::constants::{DEFAULT_STATUS, GUEST_PREFIX};
use crate::protocol::{is_guest, LineFramer, User};

/// Opaque handle for one accepted connection.
///
/// Ids increase monotonically for the lifetime of a server, so iterating
/// the registry visits sessions in accept order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(pub u64);

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "conn:{}", self.0)
    }
}

/// Server-side state for one connected client.
#[derive(Debug)]
pub struct Session {
    id: ConnectionId,
    /// `Guest<N>` until a `/register` succeeds.
    pub username: String,
    /// Presence label.
    pub status: String,
    /// Updated on every inbound read.
    pub last_active_at: DateTime<Utc>,
    /// When the connection was accepted.
    pub connected_at: DateTime<Utc>,
    peer: Option<SocketAddr>,
    /// Bytes received but not yet framed into a complete line.
    inbound: LineFramer,
}

impl Session {
    fn new(id: ConnectionId, peer: Option<SocketAddr>, max_line: Option<usize>) -> Self {
        let now = Utc::now();
        Self {
            id,
            username: format!("{GUEST_PREFIX}{}", id.0),
            status: DEFAULT_STATUS.to_string(),
            last_active_at: now,
            connected_at: now,
            peer,
            inbound: max_line.map_or_else(LineFramer::new, LineFramer::with_limit),
        }
    }

    /// Connection this session belongs to.
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Remote address, if known.
    pub fn peer(&self) -> Option<SocketAddr> {
        self.peer
    }

    /// True once the session holds a real username.
    pub fn is_registered(&self) -> bool {
        !is_guest(&self.username)
    }

    /// Roster view of this session.
    pub fn user(&self) -> User {
        User::new(self.username.clone(), self.status.clone())
    }

    /// Mark the session active now.
    pub fn touch(&mut self) {
        self.last_active_at = Utc::now();
    }

    /// Append received bytes and return every completed line.
    ///
    /// # Errors
    ///
    /// Returns an error if the buffered partial line exceeds the limit.
    pub fn feed(&mut self, bytes: &[u8]) -> Result<Vec<String>> {
        self.touch();
        self.inbound.feed(bytes)
    }

    /// Bytes held for an unterminated line.
    pub fn pending_bytes(&self) -> usize {
        self.inbound.buffered()
    }

    /// True once an inbound line has exceeded the limit.
    pub fn is_overflowed(&self) -> bool {
        self.inbound.is_overflowed()
    }
}

impl std::fmt::Display for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.username, self.status)
    }
}

/// Registry of all live sessions.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    sessions: BTreeMap<ConnectionId, Session>,
    /// Line limit applied to new sessions' inbound buffers.
    max_line: Option<usize>,
}

impl SessionRegistry {
    /// Create an empty registry with unbounded line buffers.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty registry whose sessions reject lines over `max_line` bytes.
    pub fn with_line_limit(max_line: usize) -> Self {
        Self {
            sessions: BTreeMap::new(),
            max_line: Some(max_line),
        }
    }

    /// Create the session for a newly accepted connection.
    ///
    /// The session starts as `Guest<N>` with the default status. If `id`
    /// is already present, the old session is replaced.
    pub fn create(&mut self, id: ConnectionId, peer: Option<SocketAddr>) -> &mut Session {
        let session = Session::new(id, peer, self.max_line);
        match self.sessions.entry(id) {
            Entry::Occupied(mut slot) => {
                slot.insert(session);
                slot.into_mut()
            }
            Entry::Vacant(slot) => slot.insert(session),
        }
    }

    /// Get a session by connection id.
    pub fn lookup(&self, id: ConnectionId) -> Option<&Session> {
        self.sessions.get(&id)
    }

    /// Get a session by connection id (mutable).
    pub fn lookup_mut(&mut self, id: ConnectionId) -> Option<&mut Session> {
        self.sessions.get_mut(&id)
    }

    /// Remove a session, returning it if it existed.
    pub fn remove(&mut self, id: ConnectionId) -> Option<Session> {
        self.sessions.remove(&id)
    }

    /// Iterate all sessions in accept order, registered or not.
    pub fn all(&self) -> impl Iterator<Item = &Session> {
        self.sessions.values()
    }

    /// Connection ids of every session.
    pub fn ids(&self) -> Vec<ConnectionId> {
        self.sessions.keys().copied().collect()
    }

    /// Snapshot of registered users, placeholders excluded.
    pub fn roster(&self) -> Vec<User> {
        self.sessions
            .values()
            .filter(|s| s.is_registered())
            .map(Session::user)
            .collect()
    }

    /// Check whether another registered session already uses `name`.
    ///
    /// The comparison ignores case. Placeholder names never count, and
    /// the session identified by `except` is skipped so a client may
    /// re-register its own name.
    pub fn is_username_taken(&self, name: &str, except: Option<ConnectionId>) -> bool {
        self.sessions.values().any(|s| {
            Some(s.id) != except && s.is_registered() && s.username.eq_ignore_ascii_case(name)
        })
    }

    /// Number of live sessions.
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    /// Check if the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Drop every session.
    pub fn clear(&mut self) {
        self.sessions.clear();
    }
}
