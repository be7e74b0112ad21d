//! One live signaling session plus its peer data channel.
//!
//! A [`TransportHandle`] is owned by the connection manager and advanced one
//! link event at a time. It never invokes listeners itself; every step
//! returns the events it produced and, when the session is over, the reason
//! to tear it down.

use std::collections::VecDeque;
use std::time::Duration;

use wordlink_core::channel::{ChannelGate, ChannelState, Delivery, GateError, Submission};
use wordlink_core::identity::ConnectionId;
use wordlink_core::net::messages::{
    ErrorKind, IceCandidateMsg, JoinRoomMsg, LeaveMsg, PeerMessage, SessionDescriptionMsg,
    SignalFrame, SignalMessage,
};
use wordlink_core::net::protocol::{
    decode_peer_message, decode_signal, encode_peer_message, encode_signal,
};
use wordlink_core::participant::{Participant, Role};
use wordlink_core::room::normalize_room_code;

use crate::config::SessionConfig;
use crate::error::ClientError;
use crate::events::{ConnectionEvent, DisconnectReason};
use crate::link::{Connector, LinkEvent, PeerEvent, PeerLink, PeerSignal, SignalingLink};

enum Input {
    Signaling(LinkEvent),
    Peer(PeerEvent),
}

/// What one step produced.
#[derive(Debug, Default)]
pub(crate) struct Step {
    pub events: Vec<ConnectionEvent>,
    pub teardown: Option<DisconnectReason>,
}

impl Step {
    fn emit(&mut self, event: ConnectionEvent) {
        self.events.push(event);
    }

    fn error(&mut self, error: ClientError) {
        self.events.push(ConnectionEvent::Error(error));
    }
}

pub(crate) struct TransportHandle {
    generation: u64,
    signaling: Box<dyn SignalingLink>,
    signaling_open: bool,
    peer: Option<Box<dyn PeerLink>>,
    /// Identity of the participant on the other end of `peer`.
    remote: Option<ConnectionId>,
    gate: ChannelGate<PeerMessage>,
    inbox: VecDeque<Input>,
    session: SessionConfig,
    identity: Option<ConnectionId>,
    room_code: Option<String>,
    your_index: Option<usize>,
    players: Vec<Participant>,
    session_token: Option<String>,
    joined: bool,
    offer_started: bool,
    in_game: bool,
    connect_deadline: Option<Duration>,
}

impl TransportHandle {
    pub fn new(
        generation: u64,
        signaling: Box<dyn SignalingLink>,
        session: SessionConfig,
        connect_deadline: Duration,
    ) -> Self {
        Self {
            generation,
            signaling,
            signaling_open: false,
            peer: None,
            remote: None,
            gate: ChannelGate::new(),
            inbox: VecDeque::new(),
            session,
            identity: None,
            room_code: None,
            your_index: None,
            players: Vec::new(),
            session_token: None,
            joined: false,
            offer_started: false,
            in_game: false,
            connect_deadline: Some(connect_deadline),
        }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn session(&self) -> &SessionConfig {
        &self.session
    }

    pub fn identity(&self) -> Option<ConnectionId> {
        self.identity
    }

    pub fn room_code(&self) -> Option<&str> {
        self.room_code.as_deref()
    }

    pub fn players(&self) -> &[Participant] {
        &self.players
    }

    pub fn channel_state(&self) -> ChannelState {
        self.gate.state()
    }

    pub fn pending_len(&self) -> usize {
        self.gate.pending_len()
    }

    pub fn is_joined(&self) -> bool {
        self.joined
    }

    pub fn in_game(&self) -> bool {
        self.in_game
    }

    /// The role the server gave us, or the requested one before `joined`.
    pub fn role(&self) -> Role {
        self.your_index
            .and_then(|i| self.players.get(i))
            .map_or(self.session.role, |p| p.role)
    }

    pub fn deadline_passed(&self, now: Duration) -> bool {
        self.connect_deadline.is_some_and(|d| now >= d)
    }

    /// Advance by one buffered link event. Returns `None` when both links
    /// are idle.
    pub fn step(&mut self, connector: &dyn Connector) -> Option<Step> {
        if self.inbox.is_empty() {
            self.refill();
        }
        let input = self.inbox.pop_front()?;
        let mut step = Step::default();
        match input {
            Input::Signaling(event) => self.on_signaling(event, connector, &mut step),
            Input::Peer(event) => self.on_peer(event, &mut step),
        }
        Some(step)
    }

    fn refill(&mut self) {
        self.inbox
            .extend(self.signaling.drain_events().into_iter().map(Input::Signaling));
        if let Some(peer) = self.peer.as_mut() {
            self.inbox
                .extend(peer.drain_events().into_iter().map(Input::Peer));
        }
    }

    // ------------------------------------------------------------------
    // Signaling
    // ------------------------------------------------------------------

    fn on_signaling(&mut self, event: LinkEvent, connector: &dyn Connector, step: &mut Step) {
        match event {
            LinkEvent::Open => {
                self.signaling_open = true;
                self.send_join();
            },
            LinkEvent::Message(text) => match decode_signal(&text) {
                Ok(frame) => self.on_frame(frame, connector, step),
                Err(e) => {
                    tracing::warn!(error = %e, "Unreadable signaling frame");
                    step.error(ClientError::Protocol(e.to_string()));
                },
            },
            LinkEvent::Closed { reason } => {
                self.signaling_open = false;
                if self.joined {
                    tracing::info!(%reason, "Signaling connection lost");
                    step.teardown = Some(DisconnectReason::SignalingLost);
                } else {
                    tracing::info!(%reason, "Signaling connection failed");
                    step.error(ClientError::SignalingUnavailable(reason));
                    step.teardown = Some(DisconnectReason::SignalingUnavailable);
                }
            },
        }
    }

    fn send_join(&mut self) {
        let join = SignalMessage::JoinRoom(JoinRoomMsg {
            display_name: self.session.display_name.clone(),
            role: self.session.role,
            session_token: self.session_token.clone(),
        });
        let frame = match self.session.room_code.as_deref() {
            Some(code) => SignalFrame::in_room(normalize_room_code(code), join),
            None => SignalFrame::new(join),
        };
        self.send_frame(&frame);
    }

    fn send_frame(&mut self, frame: &SignalFrame) {
        match encode_signal(frame) {
            Ok(text) => {
                if let Err(e) = self.signaling.send(&text) {
                    tracing::debug!(error = %e, "Signaling send failed");
                }
            },
            Err(e) => tracing::warn!(error = %e, "Failed to encode signaling frame"),
        }
    }

    fn send_in_room(&mut self, message: SignalMessage) {
        let frame = match self.room_code.clone() {
            Some(code) => SignalFrame::in_room(code, message),
            None => SignalFrame::new(message),
        };
        self.send_frame(&frame);
    }

    fn on_frame(&mut self, frame: SignalFrame, connector: &dyn Connector, step: &mut Step) {
        match frame.message {
            SignalMessage::Welcome(m) => {
                tracing::debug!(identity = %m.identity, "Signaling identity assigned");
                self.identity = Some(m.identity);
            },
            SignalMessage::Joined(m) => {
                if let Some(code) = frame.room_code {
                    self.room_code = Some(code);
                }
                self.your_index = Some(m.your_index);
                if m.session_token.is_some() {
                    self.session_token = m.session_token;
                }
                if self.identity.is_none() {
                    self.identity = m.players.get(m.your_index).map(|p| p.identity);
                }
                self.apply_players(m.players, step);
                if !self.joined {
                    self.joined = true;
                    self.connect_deadline = None;
                    let role = self.role();
                    match (self.room_code.clone(), self.identity) {
                        (Some(room_code), Some(identity)) => {
                            tracing::info!(
                                %room_code,
                                your_index = m.your_index,
                                ?role,
                                "Joined room"
                            );
                            step.emit(ConnectionEvent::Connected {
                                room_code,
                                your_index: m.your_index,
                                role,
                                identity,
                            });
                        },
                        _ => step.error(ClientError::Protocol(
                            "joined reply without room code or seat".to_string(),
                        )),
                    }
                }
                self.maybe_start_offer(connector, step);
            },
            SignalMessage::RoomUpdate(m) => {
                self.apply_players(m.players, step);
                step.emit(ConnectionEvent::RoomUpdate {
                    players: self.players.clone(),
                    count: m.count,
                });
                self.maybe_start_offer(connector, step);
            },
            SignalMessage::Offer(m) => self.on_offer(m, connector, step),
            SignalMessage::Answer(m) => self.apply_remote(PeerSignal::Answer(m.sdp), step),
            SignalMessage::IceCandidate(m) => self.apply_remote(
                PeerSignal::Candidate {
                    candidate: m.candidate,
                    sdp_mid: m.sdp_mid,
                    sdp_m_line_index: m.sdp_m_line_index,
                },
                step,
            ),
            SignalMessage::Leave(m) => {
                if m.room_closed {
                    tracing::info!(room_code = ?self.room_code, "Room closed by server");
                    step.teardown = Some(DisconnectReason::RoomClosed);
                }
            },
            SignalMessage::Error(m) => {
                tracing::info!(kind = ?m.kind, message = %m.message, "Server error");
                if self.joined {
                    step.error(ClientError::Protocol(m.message));
                } else {
                    step.error(match m.kind {
                        ErrorKind::RoomUnavailable => ClientError::RoomUnavailable(m.message),
                        ErrorKind::BadRequest => ClientError::Protocol(m.message),
                    });
                    step.teardown = Some(DisconnectReason::RoomUnavailable);
                }
            },
            SignalMessage::JoinRoom(_) => {
                tracing::warn!("Ignoring join-room from server");
            },
        }
    }

    /// Replace the player list and report who arrived and who left.
    fn apply_players(&mut self, players: Vec<Participant>, step: &mut Step) {
        let me = self.identity;
        for p in &players {
            if Some(p.identity) != me && !self.players.iter().any(|q| q.identity == p.identity) {
                step.emit(ConnectionEvent::PeerJoined {
                    participant: p.clone(),
                });
            }
        }
        let mut remote_left = false;
        for q in &self.players {
            if Some(q.identity) != me && !players.iter().any(|p| p.identity == q.identity) {
                remote_left |= self.remote == Some(q.identity);
                step.emit(ConnectionEvent::PeerLeft {
                    identity: q.identity,
                });
            }
        }
        if let Some(me) = me
            && let Some(index) = players.iter().position(|p| p.identity == me)
        {
            self.your_index = Some(index);
        }
        self.players = players;

        if remote_left {
            self.close_channel(step);
        }
    }

    /// A guest starts negotiation once the host is in the room.
    fn maybe_start_offer(&mut self, connector: &dyn Connector, step: &mut Step) {
        if !self.joined
            || self.offer_started
            || self.role().is_host()
            || self.gate.state() != ChannelState::Connecting
        {
            return;
        }
        let Some(host) = self.players.first() else {
            return;
        };
        if !host.role.is_host() || !host.connected || Some(host.identity) == self.identity {
            return;
        }
        let host_identity = host.identity;

        self.offer_started = true;
        let mut peer = match connector.create_peer() {
            Ok(peer) => peer,
            Err(e) => {
                tracing::warn!(error = %e, "Could not create peer connection");
                step.error(ClientError::Protocol(e.to_string()));
                return;
            },
        };
        if let Err(e) = peer.start_offer() {
            tracing::warn!(error = %e, "Could not start offer");
            step.error(ClientError::Protocol(e.to_string()));
            return;
        }
        tracing::debug!(host = %host_identity, "Started offer");
        self.remote = Some(host_identity);
        self.peer = Some(peer);
    }

    fn on_offer(&mut self, m: SessionDescriptionMsg, connector: &dyn Connector, step: &mut Step) {
        if self.gate.state() == ChannelState::Closed {
            tracing::debug!("Ignoring offer on a closed channel");
            return;
        }
        if self.peer.is_none() {
            match connector.create_peer() {
                Ok(peer) => {
                    self.peer = Some(peer);
                    self.remote = m.from;
                },
                Err(e) => {
                    tracing::warn!(error = %e, "Could not create peer connection");
                    step.error(ClientError::Protocol(e.to_string()));
                    return;
                },
            }
        }
        self.apply_remote(PeerSignal::Offer(m.sdp), step);
    }

    fn apply_remote(&mut self, signal: PeerSignal, step: &mut Step) {
        let Some(peer) = self.peer.as_mut() else {
            tracing::debug!("Negotiation message without a peer connection");
            return;
        };
        if let Err(e) = peer.apply_remote(signal) {
            tracing::warn!(error = %e, "Failed to apply remote signal");
            step.error(ClientError::Protocol(e.to_string()));
        }
    }

    // ------------------------------------------------------------------
    // Peer
    // ------------------------------------------------------------------

    fn on_peer(&mut self, event: PeerEvent, step: &mut Step) {
        match event {
            PeerEvent::LocalSignal(signal) => {
                let message = match signal {
                    PeerSignal::Offer(sdp) => {
                        SignalMessage::Offer(SessionDescriptionMsg { sdp, from: None })
                    },
                    PeerSignal::Answer(sdp) => {
                        SignalMessage::Answer(SessionDescriptionMsg { sdp, from: None })
                    },
                    PeerSignal::Candidate {
                        candidate,
                        sdp_mid,
                        sdp_m_line_index,
                    } => SignalMessage::IceCandidate(IceCandidateMsg {
                        candidate,
                        sdp_mid,
                        sdp_m_line_index,
                        from: None,
                    }),
                };
                self.send_in_room(message);
            },
            PeerEvent::Open if self.gate.state() == ChannelState::Open => {
                tracing::debug!("Data channel already open");
            },
            PeerEvent::Open => match self.gate.open() {
                Ok(batch) => {
                    let mut flushed = 0;
                    for msg in batch {
                        // The seat may differ from the role asked for.
                        if matches!(msg, PeerMessage::WordSelect(_)) && !self.role().is_host() {
                            tracing::warn!("Dropping queued word selection from a guest seat");
                            step.error(ClientError::HostOnly);
                            continue;
                        }
                        flushed += 1;
                        self.track_game(&msg);
                        if let Err(e) = self.transmit(&msg) {
                            tracing::warn!(error = %e, "Failed to flush queued payload");
                        }
                    }
                    tracing::info!(flushed, "Data channel open");
                    step.emit(ConnectionEvent::ChannelOpen { flushed });
                },
                Err(e) => tracing::debug!(error = %e, "Ignoring open on a closed channel"),
            },
            PeerEvent::Message(data) => match decode_peer_message(&data) {
                Ok(msg) => {
                    self.track_game(&msg);
                    step.emit(ConnectionEvent::Message(msg));
                },
                Err(e) => {
                    tracing::warn!(error = %e, "Unreadable peer payload");
                    step.error(ClientError::Protocol(e.to_string()));
                },
            },
            PeerEvent::Closed => self.close_channel(step),
        }
    }

    fn close_channel(&mut self, step: &mut Step) {
        if self.gate.state() == ChannelState::Closed {
            return;
        }
        let discarded = self.gate.close().len();
        if let Some(mut peer) = self.peer.take() {
            peer.close();
        }
        self.in_game = false;
        tracing::info!(discarded, "Data channel closed");
        step.emit(ConnectionEvent::ChannelClosed { discarded });
        step.error(ClientError::PeerDisconnected);
    }

    fn track_game(&mut self, msg: &PeerMessage) {
        match msg {
            PeerMessage::WordSelect(_) => self.in_game = true,
            PeerMessage::GameComplete(_) => self.in_game = false,
            PeerMessage::Guess(_) => {},
        }
    }

    fn transmit(&mut self, msg: &PeerMessage) -> Result<(), ClientError> {
        let data =
            encode_peer_message(msg).map_err(|e| ClientError::InvalidPayload(e.to_string()))?;
        let peer = self
            .peer
            .as_mut()
            .ok_or(ClientError::ChannelNotReady(ChannelState::Closed))?;
        peer.send(&data).map_err(|e| {
            tracing::warn!(error = %e, "Peer send failed");
            ClientError::PeerDisconnected
        })
    }

    /// Gate, then transmit or queue, one game payload.
    pub fn send(&mut self, msg: PeerMessage, delivery: Delivery) -> Result<(), ClientError> {
        msg.validate().map_err(ClientError::InvalidPayload)?;
        if matches!(msg, PeerMessage::WordSelect(_)) && !self.role().is_host() {
            return Err(ClientError::HostOnly);
        }
        match self.gate.submit(msg, delivery) {
            Ok(Submission::Transmit(msg)) => {
                self.transmit(&msg)?;
                self.track_game(&msg);
                Ok(())
            },
            Ok(Submission::Queued(position)) => {
                tracing::debug!(position, "Queued payload until the channel opens");
                Ok(())
            },
            Err(GateError::NotReady { state, .. }) => Err(ClientError::ChannelNotReady(state)),
            Err(e @ GateError::InvalidTransition { .. }) => {
                Err(ClientError::Protocol(e.to_string()))
            },
        }
    }

    /// Leave the room and close both links.
    pub fn shutdown(&mut self, reason: DisconnectReason) -> Vec<ConnectionEvent> {
        let mut events = Vec::new();
        if self.signaling_open && self.joined {
            self.send_in_room(SignalMessage::Leave(LeaveMsg::default()));
        }
        self.signaling.close();
        self.signaling_open = false;
        if let Some(mut peer) = self.peer.take() {
            peer.close();
        }
        if self.gate.state() != ChannelState::Closed {
            let discarded = self.gate.close().len();
            events.push(ConnectionEvent::ChannelClosed { discarded });
        }
        self.in_game = false;
        self.inbox.clear();
        tracing::info!(?reason, room_code = ?self.room_code, "Connection torn down");
        events.push(ConnectionEvent::Disconnected { reason });
        events
    }
}
