use serde::{Deserialize, Serialize};

use crate::identity::ConnectionId;
use crate::participant::{Participant, Role};

/// Longest word accepted in a game payload.
pub const MAX_WORD_LEN: usize = 16;

/// Network message type discriminator.
///
/// Signaling frames carry the kebab-case name in their `type` field; peer
/// data-channel frames carry the byte value as a one-byte prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
#[repr(u8)]
pub enum MessageType {
    // Client -> Server (offer/answer/ice/leave are also relayed Server -> Client)
    JoinRoom = 0x01,
    Offer = 0x02,
    Answer = 0x03,
    IceCandidate = 0x04,
    Leave = 0x05,

    // Server -> Client
    Welcome = 0x10,
    Joined = 0x11,
    RoomUpdate = 0x12,
    Error = 0x13,

    // Peer <-> Peer (data channel)
    WordSelect = 0x20,
    Guess = 0x21,
    GameComplete = 0x22,
}

impl MessageType {
    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            0x01 => Some(Self::JoinRoom),
            0x02 => Some(Self::Offer),
            0x03 => Some(Self::Answer),
            0x04 => Some(Self::IceCandidate),
            0x05 => Some(Self::Leave),
            0x10 => Some(Self::Welcome),
            0x11 => Some(Self::Joined),
            0x12 => Some(Self::RoomUpdate),
            0x13 => Some(Self::Error),
            0x20 => Some(Self::WordSelect),
            0x21 => Some(Self::Guess),
            0x22 => Some(Self::GameComplete),
            _ => None,
        }
    }

    /// Messages that only the server may originate.
    pub fn is_server_only(self) -> bool {
        matches!(
            self,
            Self::Welcome | Self::Joined | Self::RoomUpdate | Self::Error
        )
    }

    /// Messages that travel over the peer data channel, never signaling.
    pub fn is_game_payload(self) -> bool {
        matches!(self, Self::WordSelect | Self::Guess | Self::GameComplete)
    }
}

// ============================================================================
// Signaling payloads
// ============================================================================

/// Request to enter a room. An absent room code with role `host` creates a
/// new room.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinRoomMsg {
    pub display_name: String,
    pub role: Role,
    /// Token from an earlier `joined`, used to take a held seat back.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_token: Option<String>,
}

/// SDP offer or answer. `from` is stamped by the server when relaying.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionDescriptionMsg {
    pub sdp: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<ConnectionId>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IceCandidateMsg {
    pub candidate: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sdp_mid: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sdp_m_line_index: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<ConnectionId>,
}

/// Sent by a client to leave its room, or by the server to tell guests that
/// someone left. `room_closed` is set when the room no longer exists.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LeaveMsg {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub identity: Option<ConnectionId>,
    pub room_closed: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WelcomeMsg {
    pub identity: ConnectionId,
}

/// Direct reply to the requester of a successful `join-room`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinedMsg {
    pub players: Vec<Participant>,
    pub your_index: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_token: Option<String>,
}

/// Full membership snapshot, broadcast to the whole room.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomUpdateMsg {
    pub players: Vec<Participant>,
    pub count: usize,
}

impl RoomUpdateMsg {
    pub fn new(players: Vec<Participant>) -> Self {
        let count = players.len();
        Self { players, count }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ErrorKind {
    /// Bad, expired, or full room code.
    RoomUnavailable,
    /// Malformed or out-of-sequence request.
    BadRequest,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorMsg {
    pub kind: ErrorKind,
    pub message: String,
}

/// All messages exchanged over the signaling connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SignalMessage {
    JoinRoom(JoinRoomMsg),
    Offer(SessionDescriptionMsg),
    Answer(SessionDescriptionMsg),
    IceCandidate(IceCandidateMsg),
    Leave(LeaveMsg),
    Welcome(WelcomeMsg),
    Joined(JoinedMsg),
    RoomUpdate(RoomUpdateMsg),
    Error(ErrorMsg),
}

impl SignalMessage {
    pub fn message_type(&self) -> MessageType {
        match self {
            Self::JoinRoom(_) => MessageType::JoinRoom,
            Self::Offer(_) => MessageType::Offer,
            Self::Answer(_) => MessageType::Answer,
            Self::IceCandidate(_) => MessageType::IceCandidate,
            Self::Leave(_) => MessageType::Leave,
            Self::Welcome(_) => MessageType::Welcome,
            Self::Joined(_) => MessageType::Joined,
            Self::RoomUpdate(_) => MessageType::RoomUpdate,
            Self::Error(_) => MessageType::Error,
        }
    }
}

/// A signaling message with the envelope's optional room code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignalFrame {
    pub room_code: Option<String>,
    pub message: SignalMessage,
}

impl SignalFrame {
    pub fn new(message: SignalMessage) -> Self {
        Self {
            room_code: None,
            message,
        }
    }

    pub fn in_room(room_code: impl Into<String>, message: SignalMessage) -> Self {
        Self {
            room_code: Some(room_code.into()),
            message,
        }
    }
}

// ============================================================================
// Peer data-channel payloads
// ============================================================================

/// Host announces the secret word.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WordSelectMsg {
    pub word: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GuessMsg {
    pub word: String,
    /// 1-based attempt number.
    pub attempt: u8,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GameCompleteMsg {
    pub solved: bool,
    pub attempts: u8,
}

/// In-game payloads carried by the peer data channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PeerMessage {
    WordSelect(WordSelectMsg),
    Guess(GuessMsg),
    GameComplete(GameCompleteMsg),
}

impl PeerMessage {
    pub fn word_select(word: impl Into<String>) -> Self {
        Self::WordSelect(WordSelectMsg { word: word.into() })
    }

    pub fn guess(word: impl Into<String>, attempt: u8) -> Self {
        Self::Guess(GuessMsg {
            word: word.into(),
            attempt,
        })
    }

    pub fn game_complete(solved: bool, attempts: u8) -> Self {
        Self::GameComplete(GameCompleteMsg { solved, attempts })
    }

    pub fn message_type(&self) -> MessageType {
        match self {
            Self::WordSelect(_) => MessageType::WordSelect,
            Self::Guess(_) => MessageType::Guess,
            Self::GameComplete(_) => MessageType::GameComplete,
        }
    }

    /// Check payload contents. Returns a human-readable reason on failure.
    pub fn validate(&self) -> Result<(), String> {
        match self {
            Self::WordSelect(m) => validate_word(&m.word),
            Self::Guess(m) => {
                validate_word(&m.word)?;
                if m.attempt == 0 {
                    return Err("attempt numbers start at 1".to_string());
                }
                Ok(())
            },
            Self::GameComplete(_) => Ok(()),
        }
    }
}

fn validate_word(word: &str) -> Result<(), String> {
    if word.is_empty() || word.len() > MAX_WORD_LEN {
        return Err(format!("word must be 1-{MAX_WORD_LEN} letters"));
    }
    if !word.bytes().all(|b| b.is_ascii_alphabetic()) {
        return Err("word must contain only ASCII letters".to_string());
    }
    Ok(())
}
