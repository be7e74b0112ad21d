//! Scripted connector for driving a [`ConnectionManager`](crate::ConnectionManager)
//! without a network.

use std::cell::RefCell;
use std::rc::Rc;
use std::time::Duration;

use wordlink_core::identity::ConnectionId;
use wordlink_core::net::messages::{
    JoinedMsg, PeerMessage, RoomUpdateMsg, SessionDescriptionMsg, SignalFrame, SignalMessage,
    WelcomeMsg,
};
use wordlink_core::net::protocol::{
    decode_peer_message, decode_signal, encode_peer_message, encode_signal,
};
use wordlink_core::participant::Participant;

use crate::error::TransportError;
use crate::link::{Connector, LinkEvent, PeerEvent, PeerLink, PeerSignal, SignalingLink};

#[derive(Default)]
struct FakeSignaling {
    events: Vec<LinkEvent>,
    sent: Vec<String>,
    closed: bool,
}

#[derive(Default)]
struct FakePeer {
    events: Vec<PeerEvent>,
    sent: Vec<Vec<u8>>,
    remote: Vec<PeerSignal>,
    offered: bool,
    closed: bool,
}

#[derive(Default)]
struct FakeState {
    now: Duration,
    connects: usize,
    fail_connect: bool,
    signaling: Option<Rc<RefCell<FakeSignaling>>>,
    peers: Vec<Rc<RefCell<FakePeer>>>,
}

/// A connector whose links are fed by the test. Clones share state, so keep
/// one clone and hand another to the manager.
#[derive(Clone, Default)]
pub struct FakeConnector {
    state: Rc<RefCell<FakeState>>,
}

impl FakeConnector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn advance(&self, by: Duration) {
        self.state.borrow_mut().now += by;
    }

    pub fn set_fail_connect(&self, fail: bool) {
        self.state.borrow_mut().fail_connect = fail;
    }

    pub fn connect_count(&self) -> usize {
        self.state.borrow().connects
    }

    fn signaling(&self) -> Rc<RefCell<FakeSignaling>> {
        let state = self.state.borrow();
        let link = state.signaling.as_ref().expect("no signaling link opened yet");
        Rc::clone(link)
    }

    fn last_peer(&self) -> Rc<RefCell<FakePeer>> {
        let state = self.state.borrow();
        let peer = state.peers.last().expect("no peer link created yet");
        Rc::clone(peer)
    }

    // Signaling side

    pub fn open_signaling(&self) {
        self.signaling().borrow_mut().events.push(LinkEvent::Open);
    }

    pub fn close_signaling(&self, reason: &str) {
        self.signaling().borrow_mut().events.push(LinkEvent::Closed {
            reason: reason.to_string(),
        });
    }

    pub fn push_text(&self, text: &str) {
        self.signaling()
            .borrow_mut()
            .events
            .push(LinkEvent::Message(text.to_string()));
    }

    pub fn push_frame(&self, frame: SignalFrame) {
        let text = encode_signal(&frame).expect("encode scripted frame");
        self.push_text(&text);
    }

    pub fn push_welcome(&self, identity: ConnectionId) {
        self.push_frame(SignalFrame::new(SignalMessage::Welcome(WelcomeMsg {
            identity,
        })));
    }

    pub fn push_joined(&self, code: &str, players: Vec<Participant>, your_index: usize) {
        self.push_frame(SignalFrame::in_room(
            code,
            SignalMessage::Joined(JoinedMsg {
                players,
                your_index,
                session_token: Some("test-token".to_string()),
            }),
        ));
    }

    pub fn push_room_update(&self, code: &str, players: Vec<Participant>) {
        self.push_frame(SignalFrame::in_room(
            code,
            SignalMessage::RoomUpdate(RoomUpdateMsg::new(players)),
        ));
    }

    pub fn push_offer(&self, code: &str, from: ConnectionId) {
        self.push_frame(SignalFrame::in_room(
            code,
            SignalMessage::Offer(SessionDescriptionMsg {
                sdp: "fake-offer".to_string(),
                from: Some(from),
            }),
        ));
    }

    /// Every frame the manager sent over signaling, decoded.
    pub fn sent_signals(&self) -> Vec<SignalFrame> {
        let Some(link) = self.state.borrow().signaling.as_ref().map(Rc::clone) else {
            return Vec::new();
        };
        let link = link.borrow();
        link.sent
            .iter()
            .map(|t| decode_signal(t).expect("manager sent an unreadable frame"))
            .collect()
    }

    pub fn signaling_closed(&self) -> bool {
        self.signaling().borrow().closed
    }

    // Peer side

    pub fn peer_count(&self) -> usize {
        self.state.borrow().peers.len()
    }

    pub fn peer_offered(&self) -> bool {
        self.last_peer().borrow().offered
    }

    pub fn peer_closed(&self) -> bool {
        self.last_peer().borrow().closed
    }

    pub fn open_peer(&self) {
        self.last_peer().borrow_mut().events.push(PeerEvent::Open);
    }

    pub fn close_peer(&self) {
        self.last_peer().borrow_mut().events.push(PeerEvent::Closed);
    }

    pub fn push_peer_message(&self, msg: &PeerMessage) {
        let data = encode_peer_message(msg).expect("encode scripted payload");
        self.last_peer()
            .borrow_mut()
            .events
            .push(PeerEvent::Message(data));
    }

    /// Payloads the manager put on the data channel, decoded.
    pub fn peer_sent(&self) -> Vec<PeerMessage> {
        let Some(peer) = self.state.borrow().peers.last().map(Rc::clone) else {
            return Vec::new();
        };
        let peer = peer.borrow();
        peer.sent
            .iter()
            .map(|d| decode_peer_message(d).expect("manager sent an unreadable payload"))
            .collect()
    }

    /// Negotiation messages applied to the latest peer.
    pub fn peer_remote_signals(&self) -> Vec<PeerSignal> {
        self.last_peer().borrow().remote.clone()
    }
}

impl Connector for FakeConnector {
    fn connect_signaling(&self, _url: &str) -> Result<Box<dyn SignalingLink>, TransportError> {
        let mut state = self.state.borrow_mut();
        if state.fail_connect {
            return Err(TransportError::Connect("refused".to_string()));
        }
        state.connects += 1;
        let link = Rc::new(RefCell::new(FakeSignaling::default()));
        state.signaling = Some(Rc::clone(&link));
        Ok(Box::new(FakeSignalingLink(link)))
    }

    fn create_peer(&self) -> Result<Box<dyn PeerLink>, TransportError> {
        let peer = Rc::new(RefCell::new(FakePeer::default()));
        self.state.borrow_mut().peers.push(Rc::clone(&peer));
        Ok(Box::new(FakePeerLink(peer)))
    }

    fn now(&self) -> Duration {
        self.state.borrow().now
    }
}

struct FakeSignalingLink(Rc<RefCell<FakeSignaling>>);

impl SignalingLink for FakeSignalingLink {
    fn send(&mut self, text: &str) -> Result<(), TransportError> {
        let mut link = self.0.borrow_mut();
        if link.closed {
            return Err(TransportError::Closed);
        }
        link.sent.push(text.to_string());
        Ok(())
    }

    fn drain_events(&mut self) -> Vec<LinkEvent> {
        std::mem::take(&mut self.0.borrow_mut().events)
    }

    fn close(&mut self) {
        self.0.borrow_mut().closed = true;
    }
}

struct FakePeerLink(Rc<RefCell<FakePeer>>);

impl PeerLink for FakePeerLink {
    fn start_offer(&mut self) -> Result<(), TransportError> {
        let mut peer = self.0.borrow_mut();
        peer.offered = true;
        peer.events.push(PeerEvent::LocalSignal(PeerSignal::Offer(
            "fake-offer".to_string(),
        )));
        Ok(())
    }

    fn apply_remote(&mut self, signal: PeerSignal) -> Result<(), TransportError> {
        let mut peer = self.0.borrow_mut();
        if matches!(signal, PeerSignal::Offer(_)) {
            peer.events.push(PeerEvent::LocalSignal(PeerSignal::Answer(
                "fake-answer".to_string(),
            )));
        }
        peer.remote.push(signal);
        Ok(())
    }

    fn send(&mut self, data: &[u8]) -> Result<(), TransportError> {
        let mut peer = self.0.borrow_mut();
        if peer.closed {
            return Err(TransportError::Closed);
        }
        peer.sent.push(data.to_vec());
        Ok(())
    }

    fn drain_events(&mut self) -> Vec<PeerEvent> {
        std::mem::take(&mut self.0.borrow_mut().events)
    }

    fn close(&mut self) {
        self.0.borrow_mut().closed = true;
    }
}
