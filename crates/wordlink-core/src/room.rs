use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::identity::ConnectionId;
use crate::participant::{Participant, Role};

/// Length of a room code.
pub const ROOM_CODE_LEN: usize = 6;

const ROOM_CODE_ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

/// What happens to a seat when its signaling connection drops.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ReconnectPolicy {
    /// A dropped connection is a leave. A returning client always gets a new
    /// identity and joins as a guest; a dropped host closes the room.
    #[default]
    Disabled,
    /// A dropped connection keeps its seat for the session TTL. A join that
    /// presents the seat's session token takes it over in place, keeping the
    /// index and role.
    ReclaimSeat,
}

/// Per-room settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoomConfig {
    pub max_players: u8,
    pub reconnect: ReconnectPolicy,
    pub session_ttl: Duration,
}

impl Default for RoomConfig {
    fn default() -> Self {
        Self {
            max_players: 2,
            reconnect: ReconnectPolicy::Disabled,
            session_ttl: Duration::from_secs(60),
        }
    }
}

/// A room and its ordered participant list.
///
/// `players` keeps insertion order and index 0 is always the host. The host
/// seat is assigned once at creation and is never handed to another player.
#[derive(Debug, Clone)]
pub struct Room {
    pub code: String,
    pub players: Vec<Participant>,
    pub config: RoomConfig,
}

impl Room {
    pub fn new(
        code: String,
        host_identity: ConnectionId,
        host_name: String,
        config: RoomConfig,
    ) -> Self {
        Self {
            code,
            players: vec![Participant::new(host_identity, host_name, Role::Host)],
            config,
        }
    }

    pub fn host(&self) -> Option<&Participant> {
        self.players.first()
    }

    pub fn index_of(&self, identity: ConnectionId) -> Option<usize> {
        self.players.iter().position(|p| p.identity == identity)
    }

    pub fn contains(&self, identity: ConnectionId) -> bool {
        self.index_of(identity).is_some()
    }

    pub fn is_full(&self) -> bool {
        self.players.len() >= usize::from(self.config.max_players)
    }

    /// Append a guest. Returns the new participant's index.
    pub fn push_guest(&mut self, identity: ConnectionId, display_name: String) -> usize {
        self.players
            .push(Participant::new(identity, display_name, Role::Guest));
        self.players.len() - 1
    }

    /// Remove the participant with `identity`, returning it.
    pub fn remove(&mut self, identity: ConnectionId) -> Option<Participant> {
        let index = self.index_of(identity)?;
        Some(self.players.remove(index))
    }

    pub fn connected_count(&self) -> usize {
        self.players.iter().filter(|p| p.connected).count()
    }
}

/// Generate a random room code like `K7Q2ZD`.
pub fn generate_room_code() -> String {
    let mut rng = rand::rng();
    (0..ROOM_CODE_LEN)
        .map(|_| {
            let idx = rng.random_range(0..ROOM_CODE_ALPHABET.len());
            char::from(ROOM_CODE_ALPHABET[idx])
        })
        .collect()
}

/// Check that a code has the shape produced by [`generate_room_code`].
pub fn is_valid_room_code(code: &str) -> bool {
    code.len() == ROOM_CODE_LEN
        && code
            .bytes()
            .all(|b| b.is_ascii_uppercase() || b.is_ascii_digit())
}

/// Canonical form of a user-entered code (trimmed, upper-cased).
pub fn normalize_room_code(raw: &str) -> String {
    raw.trim().to_ascii_uppercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_codes_are_valid() {
        for _ in 0..200 {
            let code = generate_room_code();
            assert!(is_valid_room_code(&code), "Invalid room code: {code}");
        }
    }

    #[test]
    fn code_validation() {
        assert!(is_valid_room_code("ABC123"));
        assert!(!is_valid_room_code("abc123"));
        assert!(!is_valid_room_code("ABC12"));
        assert!(!is_valid_room_code("ABC-12"));
        assert!(!is_valid_room_code(""));
        assert_eq!(normalize_room_code(" abc123 "), "ABC123");
    }

    #[test]
    fn creator_is_host_at_index_zero() {
        let host = ConnectionId::new();
        let room = Room::new("ABC123".into(), host, "Alice".into(), RoomConfig::default());
        assert_eq!(room.host().map(|p| p.identity), Some(host));
        assert_eq!(room.players[0].role, Role::Host);
    }

    #[test]
    fn guests_append_in_order() {
        let mut room = Room::new(
            "ABC123".into(),
            ConnectionId::new(),
            "Alice".into(),
            RoomConfig {
                max_players: 4,
                ..RoomConfig::default()
            },
        );
        let bob = ConnectionId::new();
        let carol = ConnectionId::new();
        assert_eq!(room.push_guest(bob, "Bob".into()), 1);
        assert_eq!(room.push_guest(carol, "Carol".into()), 2);
        assert_eq!(room.index_of(carol), Some(2));

        room.remove(bob);
        assert_eq!(room.index_of(carol), Some(1));
        assert_eq!(room.players[0].role, Role::Host);
    }

    #[test]
    fn default_room_is_host_plus_one_guest() {
        let mut room = Room::new(
            "ABC123".into(),
            ConnectionId::new(),
            "Alice".into(),
            RoomConfig::default(),
        );
        assert!(!room.is_full());
        room.push_guest(ConnectionId::new(), "Bob".into());
        assert!(room.is_full());
    }

    #[test]
    fn reconnect_policy_names() {
        let json = serde_json::to_string(&ReconnectPolicy::ReclaimSeat).unwrap();
        assert_eq!(json, "\"reclaim-seat\"");
        assert_eq!(ReconnectPolicy::default(), ReconnectPolicy::Disabled);
    }
}
