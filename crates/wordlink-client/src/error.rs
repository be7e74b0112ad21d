use std::fmt;

use wordlink_core::channel::ChannelState;

/// Errors surfaced to the views that use a connection.
///
/// Lifecycle failures (timeouts, lost signaling, peer loss) arrive as
/// [`ConnectionEvent::Error`](crate::events::ConnectionEvent::Error) payloads.
/// Only send-side checks are returned directly from a call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientError {
    /// The signaling server could not be reached in time.
    SignalingUnavailable(String),
    /// The room code is bad, expired, or full.
    RoomUnavailable(String),
    /// A send was refused because the data channel is not open.
    ChannelNotReady(ChannelState),
    /// The peer went away mid-session.
    PeerDisconnected,
    /// Only the host may pick the word.
    HostOnly,
    InvalidPayload(String),
    /// The server rejected a request or sent something unreadable.
    Protocol(String),
}

impl fmt::Display for ClientError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SignalingUnavailable(reason) => write!(f, "signaling unavailable: {reason}"),
            Self::RoomUnavailable(reason) => write!(f, "room unavailable: {reason}"),
            Self::ChannelNotReady(state) => {
                write!(f, "data channel not ready (state: {state:?})")
            },
            Self::PeerDisconnected => write!(f, "peer disconnected"),
            Self::HostOnly => write!(f, "only the host may select the word"),
            Self::InvalidPayload(reason) => write!(f, "invalid payload: {reason}"),
            Self::Protocol(reason) => write!(f, "protocol error: {reason}"),
        }
    }
}

impl std::error::Error for ClientError {}

/// Failures reported by a platform link.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    Connect(String),
    Send(String),
    /// The link was already closed.
    Closed,
    /// The remote description or candidate could not be applied.
    Negotiation(String),
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Connect(e) => write!(f, "connect failed: {e}"),
            Self::Send(e) => write!(f, "send failed: {e}"),
            Self::Closed => write!(f, "link closed"),
            Self::Negotiation(e) => write!(f, "negotiation failed: {e}"),
        }
    }
}

impl std::error::Error for TransportError {}
