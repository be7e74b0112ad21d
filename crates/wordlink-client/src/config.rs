use std::time::Duration;

use wordlink_core::channel::Delivery;
use wordlink_core::participant::Role;

/// Process-wide connection settings.
#[derive(Debug, Clone, PartialEq)]
pub struct ClientConfig {
    /// `ws://` or `wss://` URL of the signaling endpoint.
    pub signaling_url: String,
    /// How long a new connection may take to reach `joined`.
    pub connect_timeout: Duration,
    /// Consecutive failed attempts after which `acquire` stops trying until
    /// a successful join or an explicit `disconnect`.
    pub max_connect_attempts: u32,
    /// Default for sends that don't pick a [`Delivery`].
    pub queue_while_connecting: bool,
}

impl ClientConfig {
    pub fn new(signaling_url: impl Into<String>) -> Self {
        Self {
            signaling_url: signaling_url.into(),
            connect_timeout: Duration::from_secs(10),
            max_connect_attempts: 3,
            queue_while_connecting: true,
        }
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_max_connect_attempts(mut self, attempts: u32) -> Self {
        self.max_connect_attempts = attempts;
        self
    }

    pub fn with_queue_while_connecting(mut self, queue: bool) -> Self {
        self.queue_while_connecting = queue;
        self
    }

    pub fn default_delivery(&self) -> Delivery {
        if self.queue_while_connecting {
            Delivery::Queue
        } else {
            Delivery::Immediate
        }
    }
}

/// What the first view to acquire a connection asks for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    /// Absent when a host wants a freshly generated code.
    pub room_code: Option<String>,
    pub display_name: String,
    pub role: Role,
}

impl SessionConfig {
    /// Host a new room under a server-generated code.
    pub fn host(display_name: impl Into<String>) -> Self {
        Self {
            room_code: None,
            display_name: display_name.into(),
            role: Role::Host,
        }
    }

    /// Join an existing room.
    pub fn guest(room_code: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            room_code: Some(room_code.into()),
            display_name: display_name.into(),
            role: Role::Guest,
        }
    }

    /// Pin the room code, e.g. a host sharing a code chosen up front.
    pub fn with_room_code(mut self, code: impl Into<String>) -> Self {
        self.room_code = Some(code.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let cfg = ClientConfig::new("ws://localhost:8080/ws");
        assert_eq!(cfg.connect_timeout, Duration::from_secs(10));
        assert_eq!(cfg.max_connect_attempts, 3);
        assert_eq!(cfg.default_delivery(), Delivery::Queue);
        assert_eq!(
            cfg.with_queue_while_connecting(false).default_delivery(),
            Delivery::Immediate
        );
    }

    #[test]
    fn session_constructors() {
        let host = SessionConfig::host("Alice").with_room_code("ABC123");
        assert_eq!(host.role, Role::Host);
        assert_eq!(host.room_code.as_deref(), Some("ABC123"));
        let guest = SessionConfig::guest("ABC123", "Bob");
        assert_eq!(guest.role, Role::Guest);
    }
}
