//! Application-wide constants for relaychat.
//!
//! Protocol literals live here next to the tunables so client and server
//! agree on them. Constants are grouped by domain.
//!
//! # Categories
//!
//! - **Wire protocol**: command prefixes and fixed reply strings
//! - **Sessions**: placeholder identity and default presence
//! - **Timing**: reconnect and shutdown delays
//! - **Buffers**: read sizes and line limits

use std::time::Duration;

// ============================================================================
// Wire protocol
// ============================================================================

/// Command a client sends to claim a username.
pub const REGISTER_COMMAND: &str = "/register";

/// Command a client sends to change its presence label.
pub const STATUS_COMMAND: &str = "/status";

/// Prefix of the roster frame the server broadcasts on every roster event.
pub const USERLIST_PREFIX: &str = "/userlist";

/// Prefix for server-generated notices (joins, leaves, status changes).
pub const SYSTEM_PREFIX: &str = "[System] ";

/// Unicast reply for an empty or malformed `/register` name.
pub const INVALID_USERNAME: &str = "Invalid username";

/// Unicast reply when another session already holds the name.
pub const USERNAME_TAKEN: &str = "Username already taken";

/// Notice broadcast just before the server closes every connection.
pub const SHUTDOWN_NOTICE: &str = "Server is shutting down";

// ============================================================================
// Sessions
// ============================================================================

/// Placeholder username prefix for sessions that have not registered.
///
/// Sessions carrying this prefix are left out of every roster and are
/// exempt from the uniqueness check.
pub const GUEST_PREFIX: &str = "Guest";

/// Presence label a new session starts with.
pub const DEFAULT_STATUS: &str = "Online";

// ============================================================================
// Timing
// ============================================================================

/// Default TCP port for both server and client.
pub const DEFAULT_PORT: u16 = 5555;

/// Wait between automatic reconnect attempts.
pub const RECONNECT_DELAY: Duration = Duration::from_secs(5);

/// Automatic reconnect attempts before the client gives up.
pub const MAX_RECONNECT_ATTEMPTS: u32 = 5;

/// Pause after the shutdown notice so writer tasks can flush it.
pub const SHUTDOWN_GRACE: Duration = Duration::from_millis(200);

/// Slice used when sleeping between reconnect attempts so a manual
/// disconnect is noticed promptly.
pub const RECONNECT_POLL_INTERVAL: Duration = Duration::from_millis(50);

// ============================================================================
// Buffers
// ============================================================================

/// Per-read buffer size for socket reads.
pub const READ_BUFFER_SIZE: usize = 4 * 1024;

/// Longest partial line the server buffers for one connection (64 KB).
pub const MAX_LINE_BYTES: usize = 64 * 1024;

/// Lines queued for one client before it is treated as stalled and dropped.
pub const MAX_QUEUED_LINES: usize = 1024;
