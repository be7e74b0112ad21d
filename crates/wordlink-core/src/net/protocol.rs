use serde::{Deserialize, Serialize};

use super::messages::{
    ErrorMsg, GameCompleteMsg, GuessMsg, IceCandidateMsg, JoinRoomMsg, JoinedMsg, LeaveMsg,
    MessageType, PeerMessage, RoomUpdateMsg, SessionDescriptionMsg, SignalFrame, SignalMessage,
    WelcomeMsg, WordSelectMsg,
};

/// Maximum message size in bytes, for both signaling and peer frames.
pub const MAX_MESSAGE_SIZE: usize = 64 * 1024; // 64 KiB

#[derive(Debug)]
pub enum ProtocolError {
    EmptyMessage,
    UnknownMessageType(u8),
    /// A known type arrived on the wrong channel (e.g. a guess over signaling).
    WrongChannel(MessageType),
    PayloadTooLarge(usize),
    SerializeError(String),
    DeserializeError(String),
}

impl std::fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::EmptyMessage => write!(f, "empty message"),
            Self::UnknownMessageType(b) => write!(f, "unknown message type: 0x{b:02x}"),
            Self::WrongChannel(t) => write!(f, "message type {t:?} not valid on this channel"),
            Self::PayloadTooLarge(size) => {
                write!(
                    f,
                    "payload too large: {size} bytes (max {MAX_MESSAGE_SIZE})"
                )
            },
            Self::SerializeError(e) => write!(f, "serialize error: {e}"),
            Self::DeserializeError(e) => write!(f, "deserialize error: {e}"),
        }
    }
}

impl std::error::Error for ProtocolError {}

// ============================================================================
// Signaling: JSON text envelope `{ type, roomCode?, payload }`
// ============================================================================

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Envelope {
    #[serde(rename = "type")]
    kind: MessageType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    room_code: Option<String>,
    #[serde(default)]
    payload: serde_json::Value,
}

fn to_payload<T: Serialize>(payload: &T) -> Result<serde_json::Value, ProtocolError> {
    serde_json::to_value(payload).map_err(|e| ProtocolError::SerializeError(e.to_string()))
}

fn from_payload<T: for<'de> Deserialize<'de>>(
    payload: serde_json::Value,
) -> Result<T, ProtocolError> {
    // Missing payloads decode as empty objects so `{ "type": "leave" }` works.
    let payload = if payload.is_null() {
        serde_json::Value::Object(serde_json::Map::new())
    } else {
        payload
    };
    serde_json::from_value(payload).map_err(|e| ProtocolError::DeserializeError(e.to_string()))
}

/// Encode a signaling frame to its JSON text form.
pub fn encode_signal(frame: &SignalFrame) -> Result<String, ProtocolError> {
    let payload = match &frame.message {
        SignalMessage::JoinRoom(m) => to_payload(m)?,
        SignalMessage::Offer(m) | SignalMessage::Answer(m) => to_payload(m)?,
        SignalMessage::IceCandidate(m) => to_payload(m)?,
        SignalMessage::Leave(m) => to_payload(m)?,
        SignalMessage::Welcome(m) => to_payload(m)?,
        SignalMessage::Joined(m) => to_payload(m)?,
        SignalMessage::RoomUpdate(m) => to_payload(m)?,
        SignalMessage::Error(m) => to_payload(m)?,
    };
    let envelope = Envelope {
        kind: frame.message.message_type(),
        room_code: frame.room_code.clone(),
        payload,
    };
    let text =
        serde_json::to_string(&envelope).map_err(|e| ProtocolError::SerializeError(e.to_string()))?;
    if text.len() > MAX_MESSAGE_SIZE {
        return Err(ProtocolError::PayloadTooLarge(text.len()));
    }
    Ok(text)
}

/// Decode a JSON text frame into a signaling frame.
pub fn decode_signal(text: &str) -> Result<SignalFrame, ProtocolError> {
    if text.is_empty() {
        return Err(ProtocolError::EmptyMessage);
    }
    if text.len() > MAX_MESSAGE_SIZE {
        return Err(ProtocolError::PayloadTooLarge(text.len()));
    }
    let envelope: Envelope =
        serde_json::from_str(text).map_err(|e| ProtocolError::DeserializeError(e.to_string()))?;
    let payload = envelope.payload;
    let message = match envelope.kind {
        MessageType::JoinRoom => SignalMessage::JoinRoom(from_payload::<JoinRoomMsg>(payload)?),
        MessageType::Offer => SignalMessage::Offer(from_payload::<SessionDescriptionMsg>(payload)?),
        MessageType::Answer => {
            SignalMessage::Answer(from_payload::<SessionDescriptionMsg>(payload)?)
        },
        MessageType::IceCandidate => {
            SignalMessage::IceCandidate(from_payload::<IceCandidateMsg>(payload)?)
        },
        MessageType::Leave => SignalMessage::Leave(from_payload::<LeaveMsg>(payload)?),
        MessageType::Welcome => SignalMessage::Welcome(from_payload::<WelcomeMsg>(payload)?),
        MessageType::Joined => SignalMessage::Joined(from_payload::<JoinedMsg>(payload)?),
        MessageType::RoomUpdate => {
            SignalMessage::RoomUpdate(from_payload::<RoomUpdateMsg>(payload)?)
        },
        MessageType::Error => SignalMessage::Error(from_payload::<ErrorMsg>(payload)?),
        other @ (MessageType::WordSelect | MessageType::Guess | MessageType::GameComplete) => {
            return Err(ProtocolError::WrongChannel(other));
        },
    };
    Ok(SignalFrame {
        room_code: envelope.room_code,
        message,
    })
}

// ============================================================================
// Peer data channel: 1-byte type prefix + MessagePack payload
// ============================================================================

/// Encode a serializable payload with a 1-byte type prefix.
pub fn encode_message<T: Serialize>(
    msg_type: MessageType,
    payload: &T,
) -> Result<Vec<u8>, ProtocolError> {
    let payload_bytes =
        rmp_serde::to_vec(payload).map_err(|e| ProtocolError::SerializeError(e.to_string()))?;
    let total = 1 + payload_bytes.len();
    if total > MAX_MESSAGE_SIZE {
        return Err(ProtocolError::PayloadTooLarge(total));
    }
    let mut buf = Vec::with_capacity(total);
    buf.push(msg_type as u8);
    buf.extend_from_slice(&payload_bytes);
    Ok(buf)
}

/// Encode a `PeerMessage` to data-channel wire format.
pub fn encode_peer_message(msg: &PeerMessage) -> Result<Vec<u8>, ProtocolError> {
    match msg {
        PeerMessage::WordSelect(m) => encode_message(MessageType::WordSelect, m),
        PeerMessage::Guess(m) => encode_message(MessageType::Guess, m),
        PeerMessage::GameComplete(m) => encode_message(MessageType::GameComplete, m),
    }
}

/// Extract the message type byte from raw wire data.
pub fn decode_message_type(data: &[u8]) -> Result<MessageType, ProtocolError> {
    let Some(&first) = data.first() else {
        return Err(ProtocolError::EmptyMessage);
    };
    MessageType::from_byte(first).ok_or(ProtocolError::UnknownMessageType(first))
}

/// Decode a MessagePack payload (bytes after the type prefix).
pub fn decode_payload<T: for<'de> Deserialize<'de>>(data: &[u8]) -> Result<T, ProtocolError> {
    if data.is_empty() {
        return Err(ProtocolError::EmptyMessage);
    }
    rmp_serde::from_slice(&data[1..]).map_err(|e| ProtocolError::DeserializeError(e.to_string()))
}

/// Decode raw data-channel bytes into a `PeerMessage`.
pub fn decode_peer_message(data: &[u8]) -> Result<PeerMessage, ProtocolError> {
    if data.len() > MAX_MESSAGE_SIZE {
        return Err(ProtocolError::PayloadTooLarge(data.len()));
    }
    let msg_type = decode_message_type(data)?;
    match msg_type {
        MessageType::WordSelect => Ok(PeerMessage::WordSelect(decode_payload::<WordSelectMsg>(
            data,
        )?)),
        MessageType::Guess => Ok(PeerMessage::Guess(decode_payload::<GuessMsg>(data)?)),
        MessageType::GameComplete => Ok(PeerMessage::GameComplete(decode_payload::<
            GameCompleteMsg,
        >(data)?)),
        other => Err(ProtocolError::WrongChannel(other)),
    }
}
