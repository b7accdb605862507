//! Session, transport and relay configuration.

use std::time::Duration;

use crate::protocol::ParticipantProfile;

/// Who we are when joining a room.
#[derive(Debug, Clone, PartialEq)]
pub struct LocalIdentity {
    /// Durable user identity; also the echo key for `document_updated`.
    pub user_id: String,
    pub username: String,
    pub role: String,
    pub status: String,
    pub permissions: Vec<String>,
}

impl LocalIdentity {
    pub fn new(user_id: impl Into<String>, username: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            username: username.into(),
            ..Self::default()
        }
    }

    /// Profile sent in `join_room`.
    pub fn profile(&self) -> ParticipantProfile {
        ParticipantProfile {
            user_id: self.user_id.clone(),
            username: self.username.clone(),
            role: self.role.clone(),
            status: self.status.clone(),
            permissions: self.permissions.clone(),
        }
    }
}

impl Default for LocalIdentity {
    fn default() -> Self {
        Self {
            user_id: String::new(),
            username: "anonymous".to_string(),
            role: "editor".to_string(),
            status: "online".to_string(),
            permissions: vec!["read".to_string(), "write".to_string()],
        }
    }
}

/// Per-room session configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionConfig {
    pub room_id: String,
    pub identity: LocalIdentity,
    /// Document id for outgoing updates until the server names one.
    /// Falls back to `room_id`.
    pub document_id: Option<String>,
}

impl SessionConfig {
    pub fn new(room_id: impl Into<String>, identity: LocalIdentity) -> Self {
        Self {
            room_id: room_id.into(),
            identity,
            document_id: None,
        }
    }
}

/// WebSocket transport configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct TransportConfig {
    /// Server URL, e.g. `ws://127.0.0.1:9191`.
    pub url: String,
    /// Interval between WebSocket pings (0 disables).
    pub heartbeat_interval_secs: u64,
    /// First reconnect delay; doubles on every failed attempt.
    pub initial_backoff_ms: u64,
    /// Reconnect delay ceiling.
    pub max_backoff_ms: u64,
    /// Give up after this many consecutive failed attempts (None = never).
    pub max_attempts: Option<u32>,
}

impl TransportConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Self::default()
        }
    }

    /// Delay before reconnect attempt number `attempt` (1-based).
    pub fn backoff(&self, attempt: u32) -> Duration {
        let shift = attempt.saturating_sub(1).min(16);
        let delay = self.initial_backoff_ms.saturating_mul(1u64 << shift);
        Duration::from_millis(delay.min(self.max_backoff_ms))
    }
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            url: "ws://127.0.0.1:9191".to_string(),
            heartbeat_interval_secs: 30,
            initial_backoff_ms: 250,
            max_backoff_ms: 10_000,
            max_attempts: None,
        }
    }
}

/// Reference relay configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct RelayConfig {
    pub bind_addr: String,
    /// Broadcast channel capacity per room.
    pub broadcast_capacity: usize,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:9191".to_string(),
            broadcast_capacity: 256,
        }
    }
}
