use std::rc::Rc;

use wordlink_core::identity::ConnectionId;
use wordlink_core::net::messages::PeerMessage;
use wordlink_core::participant::{Participant, Role};

use crate::error::ClientError;

/// Why a connection ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectReason {
    /// The last lease was released.
    Released,
    /// `disconnect()` was called.
    UserRequested,
    /// No `joined` reply within the connect timeout.
    ConnectTimeout,
    /// The signaling socket never opened.
    SignalingUnavailable,
    /// The signaling socket dropped after the room was joined.
    SignalingLost,
    /// The host left and the server closed the room.
    RoomClosed,
    /// The server refused the join.
    RoomUnavailable,
}

/// Everything a view can observe on the shared connection.
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionEvent {
    Connected {
        room_code: String,
        your_index: usize,
        role: Role,
        identity: ConnectionId,
    },
    Disconnected {
        reason: DisconnectReason,
    },
    PeerJoined {
        participant: Participant,
    },
    PeerLeft {
        identity: ConnectionId,
    },
    RoomUpdate {
        players: Vec<Participant>,
        count: usize,
    },
    /// The data channel opened; `flushed` queued payloads were sent in order.
    ChannelOpen {
        flushed: usize,
    },
    /// The data channel closed; `discarded` queued payloads were dropped.
    ChannelClosed {
        discarded: usize,
    },
    Message(PeerMessage),
    Error(ClientError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Connected,
    Disconnected,
    PeerJoined,
    PeerLeft,
    RoomUpdate,
    ChannelOpen,
    ChannelClosed,
    Message,
    Error,
}

impl EventKind {
    /// Kebab-case event names, as used by the browser bridge.
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "connected" => Some(Self::Connected),
            "disconnected" => Some(Self::Disconnected),
            "peer-joined" => Some(Self::PeerJoined),
            "peer-left" => Some(Self::PeerLeft),
            "room-update" => Some(Self::RoomUpdate),
            "channel-open" => Some(Self::ChannelOpen),
            "channel-closed" => Some(Self::ChannelClosed),
            "message" => Some(Self::Message),
            "error" => Some(Self::Error),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Connected => "connected",
            Self::Disconnected => "disconnected",
            Self::PeerJoined => "peer-joined",
            Self::PeerLeft => "peer-left",
            Self::RoomUpdate => "room-update",
            Self::ChannelOpen => "channel-open",
            Self::ChannelClosed => "channel-closed",
            Self::Message => "message",
            Self::Error => "error",
        }
    }
}

impl DisconnectReason {
    pub fn name(self) -> &'static str {
        match self {
            Self::Released => "released",
            Self::UserRequested => "user-requested",
            Self::ConnectTimeout => "connect-timeout",
            Self::SignalingUnavailable => "signaling-unavailable",
            Self::SignalingLost => "signaling-lost",
            Self::RoomClosed => "room-closed",
            Self::RoomUnavailable => "room-unavailable",
        }
    }
}

impl ClientError {
    fn kind_name(&self) -> &'static str {
        match self {
            Self::SignalingUnavailable(_) => "signaling-unavailable",
            Self::RoomUnavailable(_) => "room-unavailable",
            Self::ChannelNotReady(_) => "channel-not-ready",
            Self::PeerDisconnected => "peer-disconnected",
            Self::HostOnly => "host-only",
            Self::InvalidPayload(_) => "invalid-payload",
            Self::Protocol(_) => "protocol",
        }
    }
}

fn message_json(msg: &PeerMessage) -> serde_json::Value {
    match msg {
        PeerMessage::WordSelect(m) => serde_json::json!({
            "type": "word-select",
            "word": m.word,
        }),
        PeerMessage::Guess(m) => serde_json::json!({
            "type": "guess",
            "word": m.word,
            "attempt": m.attempt,
        }),
        PeerMessage::GameComplete(m) => serde_json::json!({
            "type": "game-complete",
            "solved": m.solved,
            "attempts": m.attempts,
        }),
    }
}

impl ConnectionEvent {
    /// camelCase JSON form, `{ "type": <kebab name>, ... }`.
    pub fn to_json(&self) -> serde_json::Value {
        let kind = self.kind().name();
        match self {
            Self::Connected {
                room_code,
                your_index,
                role,
                identity,
            } => serde_json::json!({
                "type": kind,
                "roomCode": room_code,
                "yourIndex": your_index,
                "role": role,
                "identity": identity,
            }),
            Self::Disconnected { reason } => serde_json::json!({
                "type": kind,
                "reason": reason.name(),
            }),
            Self::PeerJoined { participant } => serde_json::json!({
                "type": kind,
                "participant": participant,
            }),
            Self::PeerLeft { identity } => serde_json::json!({
                "type": kind,
                "identity": identity,
            }),
            Self::RoomUpdate { players, count } => serde_json::json!({
                "type": kind,
                "players": players,
                "count": count,
            }),
            Self::ChannelOpen { flushed } => serde_json::json!({
                "type": kind,
                "flushed": flushed,
            }),
            Self::ChannelClosed { discarded } => serde_json::json!({
                "type": kind,
                "discarded": discarded,
            }),
            Self::Message(msg) => serde_json::json!({
                "type": kind,
                "message": message_json(msg),
            }),
            Self::Error(e) => serde_json::json!({
                "type": kind,
                "kind": e.kind_name(),
                "message": e.to_string(),
            }),
        }
    }

    pub fn kind(&self) -> EventKind {
        match self {
            Self::Connected { .. } => EventKind::Connected,
            Self::Disconnected { .. } => EventKind::Disconnected,
            Self::PeerJoined { .. } => EventKind::PeerJoined,
            Self::PeerLeft { .. } => EventKind::PeerLeft,
            Self::RoomUpdate { .. } => EventKind::RoomUpdate,
            Self::ChannelOpen { .. } => EventKind::ChannelOpen,
            Self::ChannelClosed { .. } => EventKind::ChannelClosed,
            Self::Message(_) => EventKind::Message,
            Self::Error(_) => EventKind::Error,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ListenerId(u64);

pub type Callback = Rc<dyn Fn(&ConnectionEvent)>;

struct Entry {
    id: ListenerId,
    /// `None` subscribes to every kind.
    kind: Option<EventKind>,
    callback: Callback,
}

/// Registration-ordered listener table.
#[derive(Default)]
pub struct Listeners {
    next_id: u64,
    entries: Vec<Entry>,
}

impl Listeners {
    pub fn add(&mut self, kind: Option<EventKind>, callback: Callback) -> ListenerId {
        self.next_id += 1;
        let id = ListenerId(self.next_id);
        self.entries.push(Entry { id, kind, callback });
        id
    }

    /// Returns whether a listener was removed.
    pub fn remove(&mut self, id: ListenerId) -> bool {
        let before = self.entries.len();
        self.entries.retain(|e| e.id != id);
        self.entries.len() != before
    }

    /// Callbacks interested in `kind`, in registration order.
    pub fn matching(&self, kind: EventKind) -> Vec<Callback> {
        self.entries
            .iter()
            .filter(|e| e.kind.is_none_or(|k| k == kind))
            .map(|e| Rc::clone(&e.callback))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
