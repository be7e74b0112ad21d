//! Seams between the connection manager and the platform.
//!
//! The manager is pumped from a single thread (a browser event loop or a
//! frame loop). Links buffer whatever their platform delivers and hand it
//! over in [`drain_events`](SignalingLink::drain_events), so the manager
//! never runs inside a platform callback.

use std::time::Duration;

use crate::error::TransportError;

/// Something that happened on a signaling connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkEvent {
    Open,
    /// One JSON text frame.
    Message(String),
    Closed { reason: String },
}

/// Negotiation data exchanged through signaling.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PeerSignal {
    Offer(String),
    Answer(String),
    Candidate {
        candidate: String,
        sdp_mid: Option<String>,
        sdp_m_line_index: Option<u16>,
    },
}

/// Something that happened on a peer connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PeerEvent {
    /// Negotiation output to forward to the remote side.
    LocalSignal(PeerSignal),
    /// The data channel can carry payloads.
    Open,
    /// One binary data-channel frame.
    Message(Vec<u8>),
    Closed,
}

/// A text-frame signaling connection.
pub trait SignalingLink {
    fn send(&mut self, text: &str) -> Result<(), TransportError>;
    fn drain_events(&mut self) -> Vec<LinkEvent>;
    fn close(&mut self);
}

/// A negotiated peer connection with one ordered, reliable data channel.
pub trait PeerLink {
    /// Create the data channel and produce an offer (the guest side).
    fn start_offer(&mut self) -> Result<(), TransportError>;
    fn apply_remote(&mut self, signal: PeerSignal) -> Result<(), TransportError>;
    fn send(&mut self, data: &[u8]) -> Result<(), TransportError>;
    fn drain_events(&mut self) -> Vec<PeerEvent>;
    fn close(&mut self);
}

/// Constructs peer links. Shared by connectors that can plug in different
/// peer transports.
pub trait PeerFactory {
    fn create_peer(&self) -> Result<Box<dyn PeerLink>, TransportError>;
}

/// Platform entry point used by the connection manager.
pub trait Connector {
    fn connect_signaling(&self, url: &str) -> Result<Box<dyn SignalingLink>, TransportError>;
    fn create_peer(&self) -> Result<Box<dyn PeerLink>, TransportError>;
    /// Monotonic time since an arbitrary origin.
    fn now(&self) -> Duration;
}
