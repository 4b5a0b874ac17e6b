//! Connection lifecycle and bounded-retry policy for [`ChatClient`].
//!
//! ```text
//! Disconnected ──connect──► Connecting ──► Connected
//!                                            │ link lost
//!                                            ▼
//!                    Connected ◄──ok── Reconnecting ──max attempts──► GaveUp
//! ```
//!
//! [`ChatClient`]: super::ChatClient

use std::fmt;
use std::time::Duration;

use crate::config::ClientConfig;
use crate::constants::{MAX_RECONNECT_ATTEMPTS, RECONNECT_DELAY};

/// Where the client is in its connection lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    /// No link and no retry pending.
    #[default]
    Disconnected,
    /// Opening a link on behalf of `connect()` or `reconnect_now()`.
    Connecting,
    /// Link up and registered.
    Connected,
    /// Link lost; the retry loop is waiting or dialing.
    Reconnecting,
    /// Retries exhausted. Only a manual reconnect leaves this state.
    GaveUp,
}

impl ConnectionState {
    /// Short lowercase label for logs and status bars.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Reconnecting => "reconnecting",
            Self::GaveUp => "gave up",
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Fixed-delay, bounded-attempt reconnect policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    /// Attempts allowed after a link is lost.
    pub max_attempts: u32,
    /// Wait before each attempt.
    pub delay: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            max_attempts: MAX_RECONNECT_ATTEMPTS,
            delay: RECONNECT_DELAY,
        }
    }
}

impl From<&ClientConfig> for ReconnectPolicy {
    fn from(config: &ClientConfig) -> Self {
        Self {
            max_attempts: config.max_reconnect_attempts,
            delay: config.reconnect_delay(),
        }
    }
}

impl ReconnectPolicy {
    /// Number of the next attempt, or `None` once `made` attempts have
    /// used up the budget.
    pub fn next_attempt(&self, made: u32) -> Option<u32> {
        (made < self.max_attempts).then(|| made + 1)
    }

    /// Display line announcing attempt `attempt`.
    pub fn progress_message(&self, attempt: u32) -> String {
        format!(
            "Attempting to reconnect ({attempt}/{})...",
            self.max_attempts
        )
    }

    /// Terminal error once the budget is spent.
    pub fn exhausted_message(&self) -> String {
        format!("Failed to reconnect after {} attempts", self.max_attempts)
    }
}

/// Presence presets offered by front-ends.
///
/// The wire accepts any status text; these are the common ones.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Presence {
    /// Available.
    Online,
    /// Idle.
    Away,
    /// Do not disturb.
    Busy,
}

impl Presence {
    /// Every preset, in menu order.
    pub const ALL: [Presence; 3] = [Presence::Online, Presence::Away, Presence::Busy];

    /// Status text sent with `/status`.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Online => "Online",
            Self::Away => "Away",
            Self::Busy => "Busy",
        }
    }
}

impl fmt::Display for Presence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_policy_allows_exactly_max_attempts() {
        let policy = ReconnectPolicy {
            max_attempts: 5,
            delay: Duration::ZERO,
        };
        let mut made = 0;
        while let Some(n) = policy.next_attempt(made) {
            made = n;
        }
        assert_eq!(made, 5);
        assert_eq!(policy.next_attempt(5), None);
    }

    #[test]
    fn test_zero_budget_never_retries() {
        let policy = ReconnectPolicy {
            max_attempts: 0,
            delay: Duration::ZERO,
        };
        assert_eq!(policy.next_attempt(0), None);
    }

    #[test]
    fn test_messages() {
        let policy = ReconnectPolicy::default();
        assert_eq!(policy.progress_message(2), "Attempting to reconnect (2/5)...");
        assert_eq!(
            policy.exhausted_message(),
            "Failed to reconnect after 5 attempts"
        );
    }

    #[test]
    fn test_policy_from_config() {
        let config = ClientConfig {
            reconnect_delay_ms: 250,
            max_reconnect_attempts: 3,
            ..ClientConfig::default()
        };
        let policy = ReconnectPolicy::from(&config);
        assert_eq!(policy.max_attempts, 3);
        assert_eq!(policy.delay, Duration::from_millis(250));
    }

    #[test]
    fn test_presence_labels() {
        let labels: Vec<&str> = Presence::ALL.iter().map(|p| p.as_str()).collect();
        assert_eq!(labels, ["Online", "Away", "Busy"]);
        assert_eq!(ConnectionState::default(), ConnectionState::Disconnected);
        assert_eq!(ConnectionState::GaveUp.to_string(), "gave up");
    }
}
