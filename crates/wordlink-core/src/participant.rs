use serde::{Deserialize, Serialize};

use crate::identity::ConnectionId;

/// Longest accepted display name, in characters.
pub const MAX_DISPLAY_NAME_LEN: usize = 32;

/// A participant's place in a room.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Role {
    /// First successful joiner; owns word selection.
    Host,
    Guest,
}

impl Role {
    pub fn is_host(self) -> bool {
        matches!(self, Role::Host)
    }
}

/// A member of a room.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Participant {
    pub identity: ConnectionId,
    pub display_name: String,
    pub role: Role,
    /// False while the seat is held for a reconnecting client.
    #[serde(default = "default_connected")]
    pub connected: bool,
}

fn default_connected() -> bool {
    true
}

impl Participant {
    pub fn new(identity: ConnectionId, display_name: impl Into<String>, role: Role) -> Self {
        Self {
            identity,
            display_name: display_name.into(),
            role,
            connected: true,
        }
    }
}

/// Normalize a user-supplied display name. Returns `None` when the trimmed
/// name is empty, too long, or contains control characters.
pub fn normalize_display_name(raw: &str) -> Option<String> {
    let name = raw.trim();
    if name.is_empty()
        || name.chars().count() > MAX_DISPLAY_NAME_LEN
        || name.chars().any(char::is_control)
    {
        return None;
    }
    Some(name.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn role_serializes_kebab_case() {
        assert_eq!(serde_json::to_string(&Role::Host).unwrap(), "\"host\"");
        assert_eq!(serde_json::to_string(&Role::Guest).unwrap(), "\"guest\"");
    }

    #[test]
    fn participant_uses_camel_case_fields() {
        let p = Participant::new(ConnectionId::new(), "Alice", Role::Host);
        let json = serde_json::to_value(&p).unwrap();
        assert_eq!(json["displayName"], "Alice");
        assert_eq!(json["role"], "host");
        assert_eq!(json["connected"], true);
    }

    #[test]
    fn display_name_validation() {
        assert_eq!(normalize_display_name("  Bob "), Some("Bob".to_string()));
        assert_eq!(normalize_display_name("   "), None);
        assert_eq!(normalize_display_name("bad\u{7}name"), None);
        assert_eq!(normalize_display_name(&"x".repeat(33)), None);
        assert!(normalize_display_name(&"x".repeat(32)).is_some());
    }
}
