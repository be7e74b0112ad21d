use std::collections::HashMap;
use std::time::{Duration, Instant};

use tokio::sync::mpsc;
use uuid::Uuid;

use wordlink_core::identity::ConnectionId;
use wordlink_core::net::messages::{
    ErrorKind, ErrorMsg, JoinedMsg, LeaveMsg, RoomUpdateMsg, SignalFrame, SignalMessage,
};
use wordlink_core::net::protocol::encode_signal;
use wordlink_core::participant::{Participant, Role, normalize_display_name};
use wordlink_core::room::{
    ReconnectPolicy, Room, RoomConfig, generate_room_code, is_valid_room_code,
};

/// Per-participant sender for outbound signaling text frames.
/// Bounded so a slow client cannot exhaust memory; full channels are skipped.
pub type ParticipantSender = mpsc::Sender<String>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoomError {
    InvalidCode(String),
    NotFound(String),
    Full(String),
    CodeTaken(String),
    /// The connection is already seated in a different room.
    AlreadyInRoom(String),
    InvalidName,
    /// A guest asked to join without naming a room.
    CodeRequired,
    SessionExpired,
}

impl RoomError {
    /// Wire-level classification sent back to the requester.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidName | Self::CodeRequired => ErrorKind::BadRequest,
            _ => ErrorKind::RoomUnavailable,
        }
    }

    /// Encoded `error` frame for the requester.
    pub fn to_frame(&self) -> SignalFrame {
        SignalFrame::new(SignalMessage::Error(ErrorMsg {
            kind: self.kind(),
            message: self.to_string(),
        }))
    }
}

impl std::fmt::Display for RoomError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidCode(c) => write!(f, "Invalid room code: {c}"),
            Self::NotFound(c) => write!(f, "Room not found: {c}"),
            Self::Full(c) => write!(f, "Room is full: {c}"),
            Self::CodeTaken(c) => write!(f, "Room code already in use: {c}"),
            Self::AlreadyInRoom(c) => write!(f, "Already in room {c}"),
            Self::InvalidName => write!(f, "Invalid display name"),
            Self::CodeRequired => write!(f, "A room code is required to join as guest"),
            Self::SessionExpired => write!(f, "Invalid or expired session"),
        }
    }
}

impl std::error::Error for RoomError {}

/// Result of a successful join, create, or seat reclaim.
#[derive(Debug, Clone)]
pub struct JoinOutcome {
    pub room_code: String,
    pub players: Vec<Participant>,
    pub your_index: usize,
    pub session_token: String,
    /// False when the identity was already seated and nothing changed.
    pub inserted: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeaveOutcome {
    /// The identity had no seat in the room.
    NotMember,
    /// Removed; `remaining` participants were sent a `room-update`.
    Left { remaining: usize },
    /// Connection dropped under `reclaim-seat`; the seat waits for its token.
    SeatHeld,
    /// The room was deleted (host left or last participant left).
    RoomClosed,
}

/// A seat kept for a disconnected participant.
struct HeldSeat {
    room_code: String,
    identity: ConnectionId,
    disconnected_at: Instant,
}

struct RoomEntry {
    room: Room,
    connections: HashMap<ConnectionId, ParticipantSender>,
    /// Maps identity → session token for every seated participant.
    session_tokens: HashMap<ConnectionId, String>,
    last_activity: Instant,
}

impl RoomEntry {
    fn new(room: Room) -> Self {
        Self {
            room,
            connections: HashMap::new(),
            session_tokens: HashMap::new(),
            last_activity: Instant::now(),
        }
    }

    fn seat(&mut self, identity: ConnectionId, sender: ParticipantSender) -> String {
        let token = generate_session_token();
        self.connections.insert(identity, sender);
        self.session_tokens.insert(identity, token.clone());
        self.last_activity = Instant::now();
        token
    }

    fn outcome(&self, identity: ConnectionId, inserted: bool) -> Option<JoinOutcome> {
        Some(JoinOutcome {
            room_code: self.room.code.clone(),
            players: self.room.players.clone(),
            your_index: self.room.index_of(identity)?,
            session_token: self.session_tokens.get(&identity)?.clone(),
            inserted,
        })
    }
}

/// Authoritative room membership.
///
/// Every mutation runs inside `&mut self`; callers share the registry behind
/// a write lock, so two joins for the same room can never interleave and only
/// one of them can be the creator.
pub struct RoomRegistry {
    rooms: HashMap<String, RoomEntry>,
    config: RoomConfig,
    /// Maps session token → held seat.
    held_seats: HashMap<String, HeldSeat>,
    /// Maps identity → room code for seated connections.
    seated: HashMap<ConnectionId, String>,
}

impl Default for RoomRegistry {
    fn default() -> Self {
        Self::new(RoomConfig::default())
    }
}

impl RoomRegistry {
    pub fn new(config: RoomConfig) -> Self {
        Self {
            rooms: HashMap::new(),
            config,
            held_seats: HashMap::new(),
            seated: HashMap::new(),
        }
    }

    pub fn config(&self) -> &RoomConfig {
        &self.config
    }

    /// Create a room with a fresh code. The creator is the host.
    ///
    /// A connection that is already seated gets its current room back
    /// unchanged, so a re-sent create is harmless.
    pub fn create_room(
        &mut self,
        identity: ConnectionId,
        display_name: &str,
        sender: ParticipantSender,
    ) -> Result<JoinOutcome, RoomError> {
        if let Some(code) = self.seated.get(&identity).cloned() {
            return self.join_room(&code, identity, display_name, sender);
        }
        let code = generate_unique_room_code(&self.rooms);
        self.create_room_with_code(&code, identity, display_name, sender)
    }

    /// Create a room under a caller-chosen code.
    pub fn create_room_with_code(
        &mut self,
        code: &str,
        identity: ConnectionId,
        display_name: &str,
        sender: ParticipantSender,
    ) -> Result<JoinOutcome, RoomError> {
        if !is_valid_room_code(code) {
            return Err(RoomError::InvalidCode(code.to_string()));
        }
        let name = normalize_display_name(display_name)
            .ok_or(RoomError::InvalidName)?;
        if let Some(current) = self.seated.get(&identity) {
            return Err(RoomError::AlreadyInRoom(current.clone()));
        }
        if self.rooms.contains_key(code) {
            return Err(RoomError::CodeTaken(code.to_string()));
        }

        let room = Room::new(code.to_string(), identity, name, self.config.clone());
        let mut entry = RoomEntry::new(room);
        entry.seat(identity, sender.clone());
        let Some(outcome) = entry.outcome(identity, true) else {
            return Err(RoomError::NotFound(code.to_string()));
        };
        self.rooms.insert(code.to_string(), entry);
        self.seated.insert(identity, code.to_string());

        tracing::info!(room_code = code, %identity, "Room created");
        send_direct(&sender, code, joined_message(&outcome));
        self.broadcast_room_update(code);
        Ok(outcome)
    }

    /// Join an existing room.
    ///
    /// Membership is keyed by `identity`. If it is already seated here the
    /// call is a no-op: the requester gets a fresh `joined` reply but nothing
    /// is inserted and no `room-update` is broadcast. Failures never mutate.
    pub fn join_room(
        &mut self,
        code: &str,
        identity: ConnectionId,
        display_name: &str,
        sender: ParticipantSender,
    ) -> Result<JoinOutcome, RoomError> {
        if !is_valid_room_code(code) {
            return Err(RoomError::InvalidCode(code.to_string()));
        }
        if let Some(current) = self.seated.get(&identity)
            && current != code
        {
            return Err(RoomError::AlreadyInRoom(current.clone()));
        }
        let entry = self
            .rooms
            .get_mut(code)
            .ok_or_else(|| RoomError::NotFound(code.to_string()))?;

        if entry.room.contains(identity) {
            let outcome = entry
                .outcome(identity, false)
                .ok_or_else(|| RoomError::NotFound(code.to_string()))?;
            tracing::debug!(room_code = code, %identity, "Duplicate join ignored");
            send_direct(&sender, code, joined_message(&outcome));
            return Ok(outcome);
        }

        let name = normalize_display_name(display_name)
            .ok_or(RoomError::InvalidName)?;
        if entry.room.is_full() {
            return Err(RoomError::Full(code.to_string()));
        }

        entry.room.push_guest(identity, name);
        entry.seat(identity, sender.clone());
        let outcome = entry
            .outcome(identity, true)
            .ok_or_else(|| RoomError::NotFound(code.to_string()))?;
        self.seated.insert(identity, code.to_string());

        tracing::info!(
            room_code = code,
            %identity,
            players = outcome.players.len(),
            "Participant joined"
        );
        send_direct(&sender, code, joined_message(&outcome));
        self.broadcast_room_update(code);
        Ok(outcome)
    }

    /// Join `code`, creating it when it does not exist yet and the requester
    /// asked to host. Two hosts racing for the same fresh code are serialized
    /// by the caller's write lock, so the second one lands as a guest.
    pub fn join_or_create(
        &mut self,
        code: &str,
        identity: ConnectionId,
        display_name: &str,
        role: Role,
        sender: ParticipantSender,
    ) -> Result<JoinOutcome, RoomError> {
        if role.is_host()
            && !self.rooms.contains_key(code)
            && !self.seated.contains_key(&identity)
        {
            self.create_room_with_code(code, identity, display_name, sender)
        } else {
            self.join_room(code, identity, display_name, sender)
        }
    }

    /// Take over a held seat with a new connection. Only available under
    /// [`ReconnectPolicy::ReclaimSeat`]. The seat keeps its index and role.
    pub fn reclaim_seat(
        &mut self,
        session_token: &str,
        identity: ConnectionId,
        sender: ParticipantSender,
    ) -> Result<JoinOutcome, RoomError> {
        if self.config.reconnect != ReconnectPolicy::ReclaimSeat {
            return Err(RoomError::SessionExpired);
        }
        if let Some(current) = self.seated.get(&identity) {
            return Err(RoomError::AlreadyInRoom(current.clone()));
        }
        // Expired seats stay put until the reaper removes them.
        let seat = self
            .held_seats
            .get(session_token)
            .filter(|s| s.disconnected_at.elapsed() <= self.config.session_ttl)
            .ok_or(RoomError::SessionExpired)?;
        let entry = self
            .rooms
            .get_mut(&seat.room_code)
            .ok_or_else(|| RoomError::NotFound(seat.room_code.clone()))?;
        let index = entry
            .room
            .index_of(seat.identity)
            .ok_or(RoomError::SessionExpired)?;
        let Some(seat) = self.held_seats.remove(session_token) else {
            return Err(RoomError::SessionExpired);
        };

        let participant = &mut entry.room.players[index];
        participant.identity = identity;
        participant.connected = true;
        entry.session_tokens.remove(&seat.identity);
        entry.seat(identity, sender.clone());
        let outcome = entry
            .outcome(identity, true)
            .ok_or(RoomError::SessionExpired)?;
        self.seated.remove(&seat.identity);
        self.seated.insert(identity, seat.room_code.clone());

        tracing::info!(
            room_code = %seat.room_code,
            previous = %seat.identity,
            %identity,
            index,
            "Seat reclaimed"
        );
        send_direct(&sender, &seat.room_code, joined_message(&outcome));
        self.broadcast_room_update(&seat.room_code);
        Ok(outcome)
    }

    /// Explicit leave. The participant is removed regardless of policy.
    pub fn leave_room(&mut self, code: &str, identity: ConnectionId) -> LeaveOutcome {
        self.remove_participant(code, identity)
    }

    /// The participant's signaling connection went away.
    ///
    /// Under `reclaim-seat` the seat is held for the session TTL; otherwise
    /// this is the same as [`leave_room`](Self::leave_room).
    pub fn disconnect(&mut self, code: &str, identity: ConnectionId) -> LeaveOutcome {
        if self.config.reconnect != ReconnectPolicy::ReclaimSeat {
            return self.remove_participant(code, identity);
        }
        let Some(entry) = self.rooms.get_mut(code) else {
            return LeaveOutcome::NotMember;
        };
        let Some(index) = entry.room.index_of(identity) else {
            return LeaveOutcome::NotMember;
        };
        let Some(token) = entry.session_tokens.get(&identity).cloned() else {
            return self.remove_participant(code, identity);
        };

        entry.connections.remove(&identity);
        entry.room.players[index].connected = false;
        entry.last_activity = Instant::now();
        self.seated.remove(&identity);

        if entry.room.connected_count() == 0 {
            self.close_room(code, identity);
            return LeaveOutcome::RoomClosed;
        }

        self.held_seats.insert(
            token,
            HeldSeat {
                room_code: code.to_string(),
                identity,
                disconnected_at: Instant::now(),
            },
        );
        tracing::info!(
            room_code = code,
            %identity,
            "Connection dropped, seat held for reconnection"
        );
        self.broadcast_room_update(code);
        LeaveOutcome::SeatHeld
    }

    fn remove_participant(&mut self, code: &str, identity: ConnectionId) -> LeaveOutcome {
        let Some(entry) = self.rooms.get_mut(code) else {
            return LeaveOutcome::NotMember;
        };
        let Some(index) = entry.room.index_of(identity) else {
            return LeaveOutcome::NotMember;
        };

        if index == 0 || entry.room.players.len() == 1 {
            self.close_room(code, identity);
            return LeaveOutcome::RoomClosed;
        }

        entry.room.players.remove(index);
        entry.connections.remove(&identity);
        if let Some(token) = entry.session_tokens.remove(&identity) {
            self.held_seats.remove(&token);
        }
        entry.last_activity = Instant::now();
        let remaining = entry.room.players.len();
        self.seated.remove(&identity);

        tracing::info!(room_code = code, %identity, remaining, "Participant left");
        self.broadcast_room_update(code);
        LeaveOutcome::Left { remaining }
    }

    /// Delete a room, telling everyone still connected that it is gone.
    fn close_room(&mut self, code: &str, departed: ConnectionId) {
        let Some(entry) = self.rooms.remove(code) else {
            return;
        };
        let frame = SignalFrame::in_room(
            code,
            SignalMessage::Leave(LeaveMsg {
                identity: Some(departed),
                room_closed: true,
            }),
        );
        if let Ok(text) = encode_signal(&frame) {
            for (&id, sender) in &entry.connections {
                if id != departed {
                    try_send(sender, code, id, text.clone());
                }
            }
        }
        for p in &entry.room.players {
            if self.seated.get(&p.identity).is_some_and(|c| c == code) {
                self.seated.remove(&p.identity);
            }
        }
        self.held_seats.retain(|_, seat| seat.room_code != code);
        tracing::info!(room_code = code, "Room closed");
    }

    /// Remove held seats whose TTL has expired. Returns the number removed.
    pub fn cleanup_expired_sessions(&mut self) -> usize {
        let ttl = self.config.session_ttl;
        let expired: Vec<(String, ConnectionId)> = self
            .held_seats
            .values()
            .filter(|s| s.disconnected_at.elapsed() > ttl)
            .map(|s| (s.room_code.clone(), s.identity))
            .collect();
        for (code, identity) in &expired {
            self.remove_participant(code, *identity);
        }
        self.held_seats
            .retain(|_, s| s.disconnected_at.elapsed() <= ttl);
        expired.len()
    }

    /// Remove rooms that have been idle for longer than `max_idle`.
    /// Returns the number of rooms removed.
    pub fn cleanup_idle_rooms(&mut self, max_idle: Duration) -> usize {
        let now = Instant::now();
        let idle: Vec<(String, ConnectionId)> = self
            .rooms
            .iter()
            .filter(|(_, e)| now.duration_since(e.last_activity) >= max_idle)
            .filter_map(|(code, e)| Some((code.clone(), e.room.host()?.identity)))
            .collect();
        for (code, host) in &idle {
            self.close_room(code, *host);
        }
        idle.len()
    }

    /// Touch room activity timestamp (call on any incoming message).
    pub fn touch_activity(&mut self, code: &str) {
        if let Some(entry) = self.rooms.get_mut(code) {
            entry.last_activity = Instant::now();
        }
    }

    /// Build and broadcast a `room-update` to every connected participant.
    pub fn broadcast_room_update(&self, code: &str) {
        let Some(entry) = self.rooms.get(code) else {
            return;
        };
        let frame = SignalFrame::in_room(
            code,
            SignalMessage::RoomUpdate(RoomUpdateMsg::new(entry.room.players.clone())),
        );
        match encode_signal(&frame) {
            Ok(text) => {
                for (&id, sender) in &entry.connections {
                    try_send(sender, code, id, text.clone());
                }
            },
            Err(e) => tracing::warn!(room_code = code, error = %e, "Failed to encode room-update"),
        }
    }

    /// Forward an encoded frame to every connected participant except `from`.
    pub fn relay_to_others(&self, code: &str, from: ConnectionId, text: &str) -> usize {
        let Some(entry) = self.rooms.get(code) else {
            return 0;
        };
        let mut delivered = 0;
        for (&id, sender) in &entry.connections {
            if id != from && try_send(sender, code, id, text.to_string()) {
                delivered += 1;
            }
        }
        delivered
    }

    /// Room the identity is currently seated in.
    pub fn room_of(&self, identity: ConnectionId) -> Option<&str> {
        self.seated.get(&identity).map(String::as_str)
    }

    pub fn players(&self, code: &str) -> Option<&[Participant]> {
        self.rooms.get(code).map(|e| e.room.players.as_slice())
    }

    pub fn room_exists(&self, code: &str) -> bool {
        self.rooms.contains_key(code)
    }

    /// Returns (active rooms, total participants).
    pub fn stats(&self) -> (usize, usize) {
        let participants = self.rooms.values().map(|e| e.room.players.len()).sum();
        (self.rooms.len(), participants)
    }
}

fn generate_session_token() -> String {
    Uuid::new_v4().to_string()
}

/// Generate a unique room code, retrying on collision with existing rooms.
fn generate_unique_room_code(existing: &HashMap<String, RoomEntry>) -> String {
    loop {
        let code = generate_room_code();
        if !existing.contains_key(&code) {
            return code;
        }
    }
}

fn joined_message(outcome: &JoinOutcome) -> SignalMessage {
    SignalMessage::Joined(JoinedMsg {
        players: outcome.players.clone(),
        your_index: outcome.your_index,
        session_token: Some(outcome.session_token.clone()),
    })
}

fn send_direct(sender: &ParticipantSender, code: &str, message: SignalMessage) {
    match encode_signal(&SignalFrame::in_room(code, message)) {
        Ok(text) => {
            if let Err(e) = sender.try_send(text) {
                tracing::debug!(room_code = code, error = %e, "Failed to send direct reply");
            }
        },
        Err(e) => tracing::warn!(room_code = code, error = %e, "Failed to encode reply"),
    }
}

fn try_send(sender: &ParticipantSender, code: &str, identity: ConnectionId, text: String) -> bool {
    match sender.try_send(text) {
        Ok(()) => true,
        Err(e) => {
            tracing::debug!(
                %identity, room_code = code, error = %e,
                "Skipping send to slow client"
            );
            false
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wordlink_core::net::protocol::decode_signal;
    use wordlink_core::test_helpers::assert_host_first;

    fn make_sender() -> (ParticipantSender, mpsc::Receiver<String>) {
        mpsc::channel(256)
    }

    fn drain(rx: &mut mpsc::Receiver<String>) -> Vec<SignalMessage> {
        let mut out = Vec::new();
        while let Ok(text) = rx.try_recv() {
            out.push(decode_signal(&text).unwrap().message);
        }
        out
    }

    fn count_updates(msgs: &[SignalMessage]) -> usize {
        msgs.iter()
            .filter(|m| matches!(m, SignalMessage::RoomUpdate(_)))
            .count()
    }

    fn reclaim_config() -> RoomConfig {
        RoomConfig {
            reconnect: ReconnectPolicy::ReclaimSeat,
            ..RoomConfig::default()
        }
    }

    #[test]
    fn create_room_returns_valid_code() {
        let mut reg = RoomRegistry::default();
        let (tx, mut rx) = make_sender();
        let host = ConnectionId::new();
        let outcome = reg.create_room(host, "Alice", tx).unwrap();
        assert!(is_valid_room_code(&outcome.room_code));
        assert_eq!(outcome.your_index, 0);
        assert!(outcome.inserted);
        assert!(reg.room_exists(&outcome.room_code));

        let msgs = drain(&mut rx);
        assert!(matches!(msgs[0], SignalMessage::Joined(_)));
        assert_eq!(count_updates(&msgs), 1);
    }

    #[test]
    fn duplicate_join_is_idempotent_and_silent() {
        let mut reg = RoomRegistry::default();
        let (tx, mut rx) = make_sender();
        let host = ConnectionId::new();
        reg.create_room_with_code("ABC123", host, "Alice", tx.clone())
            .unwrap();
        drain(&mut rx);

        let again = reg.join_room("ABC123", host, "Alice", tx).unwrap();
        assert!(!again.inserted);
        assert_eq!(again.your_index, 0);
        assert_eq!(reg.players("ABC123").unwrap().len(), 1);

        let msgs = drain(&mut rx);
        assert_eq!(count_updates(&msgs), 0, "no broadcast on duplicate join");
        assert!(matches!(msgs.as_slice(), [SignalMessage::Joined(_)]));
    }

    #[test]
    fn duplicate_create_returns_current_room() {
        let mut reg = RoomRegistry::default();
        let (tx, mut rx) = make_sender();
        let host = ConnectionId::new();
        let first = reg.create_room(host, "Alice", tx.clone()).unwrap();
        drain(&mut rx);

        let second = reg.create_room(host, "Alice", tx).unwrap();
        assert_eq!(second.room_code, first.room_code);
        assert!(!second.inserted);
        assert_eq!(reg.stats(), (1, 1));
        assert_eq!(count_updates(&drain(&mut rx)), 0);
    }

    #[test]
    fn second_identity_joins_as_guest_and_everyone_is_told() {
        let mut reg = RoomRegistry::default();
        let (htx, mut hrx) = make_sender();
        let (gtx, mut grx) = make_sender();
        let host = ConnectionId::new();
        let guest = ConnectionId::new();
        reg.create_room_with_code("ABC123", host, "Alice", htx)
            .unwrap();
        drain(&mut hrx);

        let outcome = reg.join_room("ABC123", guest, "Bob", gtx).unwrap();
        assert_eq!(outcome.your_index, 1);

        for msgs in [drain(&mut hrx), drain(&mut grx)] {
            let update = msgs
                .iter()
                .find_map(|m| match m {
                    SignalMessage::RoomUpdate(u) => Some(u.clone()),
                    _ => None,
                })
                .expect("room-update expected");
            assert_eq!(update.count, 2);
            assert_eq!(update.players.len(), 2);
            assert_eq!(update.players[0].identity, host);
            assert_eq!(update.players[0].role, Role::Host);
            assert_host_first(&update.players);
        }
    }

    #[test]
    fn joined_reply_precedes_room_update() {
        let mut reg = RoomRegistry::default();
        let (htx, _hrx) = make_sender();
        let (gtx, mut grx) = make_sender();
        reg.create_room_with_code("ABC123", ConnectionId::new(), "Alice", htx)
            .unwrap();
        reg.join_room("ABC123", ConnectionId::new(), "Bob", gtx)
            .unwrap();

        let msgs = drain(&mut grx);
        assert!(matches!(msgs[0], SignalMessage::Joined(_)));
        assert!(matches!(msgs[1], SignalMessage::RoomUpdate(_)));
    }

    #[test]
    fn join_errors_do_not_mutate() {
        let mut reg = RoomRegistry::default();
        let (tx, _rx) = make_sender();
        assert_eq!(
            reg.join_room("ZZZ999", ConnectionId::new(), "Bob", tx.clone())
                .unwrap_err(),
            RoomError::NotFound("ZZZ999".into())
        );
        assert!(matches!(
            reg.join_room("bad", ConnectionId::new(), "Bob", tx.clone()),
            Err(RoomError::InvalidCode(_))
        ));

        reg.create_room_with_code("ABC123", ConnectionId::new(), "Alice", tx.clone())
            .unwrap();
        reg.join_room("ABC123", ConnectionId::new(), "Bob", tx.clone())
            .unwrap();
        let err = reg
            .join_room("ABC123", ConnectionId::new(), "Carol", tx)
            .unwrap_err();
        assert_eq!(err, RoomError::Full("ABC123".into()));
        assert_eq!(err.kind(), ErrorKind::RoomUnavailable);
        assert_eq!(reg.players("ABC123").unwrap().len(), 2);
    }

    #[test]
    fn duplicate_join_into_full_room_still_succeeds() {
        let mut reg = RoomRegistry::default();
        let (tx, _rx) = make_sender();
        let guest = ConnectionId::new();
        reg.create_room_with_code("ABC123", ConnectionId::new(), "Alice", tx.clone())
            .unwrap();
        reg.join_room("ABC123", guest, "Bob", tx.clone()).unwrap();

        let again = reg.join_room("ABC123", guest, "Bob", tx).unwrap();
        assert!(!again.inserted);
        assert_eq!(again.your_index, 1);
    }

    #[test]
    fn invalid_name_rejected() {
        let mut reg = RoomRegistry::default();
        let (tx, _rx) = make_sender();
        let err = reg
            .create_room_with_code("ABC123", ConnectionId::new(), "   ", tx)
            .unwrap_err();
        assert_eq!(err, RoomError::InvalidName);
        assert_eq!(err.kind(), ErrorKind::BadRequest);
        assert!(!reg.room_exists("ABC123"));
    }

    #[test]
    fn seated_identity_cannot_join_another_room() {
        let mut reg = RoomRegistry::default();
        let (tx, _rx) = make_sender();
        let alice = ConnectionId::new();
        reg.create_room_with_code("ABC123", alice, "Alice", tx.clone())
            .unwrap();
        reg.create_room_with_code("XYZ789", ConnectionId::new(), "Bob", tx.clone())
            .unwrap();
        assert_eq!(
            reg.join_room("XYZ789", alice, "Alice", tx).unwrap_err(),
            RoomError::AlreadyInRoom("ABC123".into())
        );
    }

    #[test]
    fn code_collision_rejected() {
        let mut reg = RoomRegistry::default();
        let (tx, _rx) = make_sender();
        reg.create_room_with_code("ABC123", ConnectionId::new(), "Alice", tx.clone())
            .unwrap();
        assert_eq!(
            reg.create_room_with_code("ABC123", ConnectionId::new(), "Bob", tx)
                .unwrap_err(),
            RoomError::CodeTaken("ABC123".into())
        );
    }

    #[test]
    fn racing_hosts_for_one_code_yield_one_host() {
        let mut reg = RoomRegistry::default();
        let (tx, _rx) = make_sender();
        let first = ConnectionId::new();
        let second = ConnectionId::new();
        let a = reg
            .join_or_create("ABC123", first, "Alice", Role::Host, tx.clone())
            .unwrap();
        let b = reg
            .join_or_create("ABC123", second, "Bob", Role::Host, tx)
            .unwrap();
        assert_eq!(a.your_index, 0);
        assert_eq!(b.your_index, 1);
        let players = reg.players("ABC123").unwrap();
        assert_eq!(players[1].role, Role::Guest);
        assert_host_first(players);
    }

    #[test]
    fn guest_cannot_create_by_joining() {
        let mut reg = RoomRegistry::default();
        let (tx, _rx) = make_sender();
        assert_eq!(
            reg.join_or_create("ABC123", ConnectionId::new(), "Bob", Role::Guest, tx)
                .unwrap_err(),
            RoomError::NotFound("ABC123".into())
        );
        assert!(!reg.room_exists("ABC123"));
    }

    #[test]
    fn guest_leave_broadcasts_to_remaining() {
        let mut reg = RoomRegistry::default();
        let (htx, mut hrx) = make_sender();
        let (gtx, _grx) = make_sender();
        let host = ConnectionId::new();
        let guest = ConnectionId::new();
        reg.create_room_with_code("ABC123", host, "Alice", htx)
            .unwrap();
        reg.join_room("ABC123", guest, "Bob", gtx).unwrap();
        drain(&mut hrx);

        assert_eq!(
            reg.leave_room("ABC123", guest),
            LeaveOutcome::Left { remaining: 1 }
        );
        let msgs = drain(&mut hrx);
        match msgs.as_slice() {
            [SignalMessage::RoomUpdate(u)] => {
                assert_eq!(u.count, 1);
                assert_eq!(u.players[0].identity, host);
            },
            other => panic!("Expected one RoomUpdate, got: {other:?}"),
        }
        assert_eq!(reg.room_of(guest), None);
        assert_eq!(reg.leave_room("ABC123", guest), LeaveOutcome::NotMember);
    }

    #[test]
    fn host_leave_closes_room_and_tells_guests() {
        let mut reg = RoomRegistry::default();
        let (htx, _hrx) = make_sender();
        let (gtx, mut grx) = make_sender();
        let host = ConnectionId::new();
        let guest = ConnectionId::new();
        reg.create_room_with_code("ABC123", host, "Alice", htx)
            .unwrap();
        reg.join_room("ABC123", guest, "Bob", gtx).unwrap();
        drain(&mut grx);

        assert_eq!(reg.leave_room("ABC123", host), LeaveOutcome::RoomClosed);
        assert!(!reg.room_exists("ABC123"));
        assert_eq!(reg.room_of(guest), None);

        let msgs = drain(&mut grx);
        assert_eq!(
            msgs,
            vec![SignalMessage::Leave(LeaveMsg {
                identity: Some(host),
                room_closed: true
            })]
        );
    }

    #[test]
    fn last_leave_destroys_room() {
        let mut reg = RoomRegistry::default();
        let (tx, _rx) = make_sender();
        let host = ConnectionId::new();
        reg.create_room_with_code("ABC123", host, "Alice", tx)
            .unwrap();
        assert_eq!(reg.disconnect("ABC123", host), LeaveOutcome::RoomClosed);
        assert!(!reg.room_exists("ABC123"));
        assert_eq!(reg.stats(), (0, 0));
    }

    #[test]
    fn relay_skips_sender() {
        let mut reg = RoomRegistry::default();
        let (htx, mut hrx) = make_sender();
        let (gtx, mut grx) = make_sender();
        let host = ConnectionId::new();
        let guest = ConnectionId::new();
        reg.create_room_with_code("ABC123", host, "Alice", htx)
            .unwrap();
        reg.join_room("ABC123", guest, "Bob", gtx).unwrap();
        drain(&mut hrx);
        drain(&mut grx);

        assert_eq!(reg.relay_to_others("ABC123", guest, "payload"), 1);
        assert_eq!(hrx.try_recv().unwrap(), "payload");
        assert!(grx.try_recv().is_err());
    }

    #[test]
    fn disconnect_without_reclaim_is_a_leave() {
        let mut reg = RoomRegistry::default();
        let (tx, _rx) = make_sender();
        let guest = ConnectionId::new();
        reg.create_room_with_code("ABC123", ConnectionId::new(), "Alice", tx.clone())
            .unwrap();
        reg.join_room("ABC123", guest, "Bob", tx).unwrap();
        assert_eq!(
            reg.disconnect("ABC123", guest),
            LeaveOutcome::Left { remaining: 1 }
        );
    }

    #[test]
    fn reclaim_rejected_when_policy_disabled() {
        let mut reg = RoomRegistry::default();
        let (tx, _rx) = make_sender();
        let outcome = reg
            .create_room_with_code("ABC123", ConnectionId::new(), "Alice", tx.clone())
            .unwrap();
        assert_eq!(
            reg.reclaim_seat(&outcome.session_token, ConnectionId::new(), tx)
                .unwrap_err(),
            RoomError::SessionExpired
        );
    }

    #[test]
    fn host_reclaims_seat_and_stays_host() {
        let mut reg = RoomRegistry::new(reclaim_config());
        let (htx, _hrx) = make_sender();
        let (gtx, mut grx) = make_sender();
        let host = ConnectionId::new();
        let guest = ConnectionId::new();
        let created = reg
            .create_room_with_code("ABC123", host, "Alice", htx)
            .unwrap();
        reg.join_room("ABC123", guest, "Bob", gtx).unwrap();
        drain(&mut grx);

        assert_eq!(reg.disconnect("ABC123", host), LeaveOutcome::SeatHeld);
        assert!(reg.room_exists("ABC123"));
        let held = drain(&mut grx);
        match held.as_slice() {
            [SignalMessage::RoomUpdate(u)] => assert!(!u.players[0].connected),
            other => panic!("Expected RoomUpdate, got: {other:?}"),
        }

        let (ntx, _nrx) = make_sender();
        let new_host = ConnectionId::new();
        let reclaimed = reg
            .reclaim_seat(&created.session_token, new_host, ntx)
            .unwrap();
        assert_eq!(reclaimed.your_index, 0);
        assert_ne!(reclaimed.session_token, created.session_token);

        let players = reg.players("ABC123").unwrap();
        assert_eq!(players[0].identity, new_host);
        assert_eq!(players[0].role, Role::Host);
        assert!(players[0].connected);
        assert_eq!(players[1].identity, guest);
        assert_eq!(reg.room_of(host), None);

        // The old token is single-use.
        let (xtx, _xrx) = make_sender();
        assert!(
            reg.reclaim_seat(&created.session_token, ConnectionId::new(), xtx)
                .is_err()
        );
    }

    #[test]
    fn expired_host_seat_closes_room() {
        let mut reg = RoomRegistry::new(RoomConfig {
            session_ttl: Duration::ZERO,
            ..reclaim_config()
        });
        let (htx, _hrx) = make_sender();
        let (gtx, mut grx) = make_sender();
        let host = ConnectionId::new();
        reg.create_room_with_code("ABC123", host, "Alice", htx)
            .unwrap();
        reg.join_room("ABC123", ConnectionId::new(), "Bob", gtx)
            .unwrap();
        assert_eq!(reg.disconnect("ABC123", host), LeaveOutcome::SeatHeld);
        drain(&mut grx);

        std::thread::sleep(Duration::from_millis(5));
        assert_eq!(reg.cleanup_expired_sessions(), 1);
        assert!(!reg.room_exists("ABC123"));
        let msgs = drain(&mut grx);
        assert!(matches!(
            msgs.as_slice(),
            [SignalMessage::Leave(LeaveMsg {
                room_closed: true,
                ..
            })]
        ));
    }

    #[test]
    fn expired_reclaim_leaves_seat_for_the_reaper() {
        let mut reg = RoomRegistry::new(RoomConfig {
            session_ttl: Duration::ZERO,
            ..reclaim_config()
        });
        let (htx, mut hrx) = make_sender();
        let (gtx, _grx) = make_sender();
        let host = ConnectionId::new();
        let guest = ConnectionId::new();
        reg.create_room_with_code("ABC123", host, "Alice", htx)
            .unwrap();
        let joined = reg.join_room("ABC123", guest, "Bob", gtx).unwrap();
        assert_eq!(reg.disconnect("ABC123", guest), LeaveOutcome::SeatHeld);
        drain(&mut hrx);

        std::thread::sleep(Duration::from_millis(5));
        let (xtx, _xrx) = make_sender();
        assert_eq!(
            reg.reclaim_seat(&joined.session_token, ConnectionId::new(), xtx)
                .unwrap_err(),
            RoomError::SessionExpired
        );
        assert_eq!(reg.players("ABC123").unwrap().len(), 2);

        assert_eq!(reg.cleanup_expired_sessions(), 1);
        let players = reg.players("ABC123").unwrap();
        assert_eq!(players.len(), 1);
        assert_eq!(players[0].identity, host);
        assert_eq!(count_updates(&drain(&mut hrx)), 1);

        let (ntx, _nrx) = make_sender();
        let next = reg
            .join_room("ABC123", ConnectionId::new(), "Carol", ntx)
            .unwrap();
        assert_eq!(next.your_index, 1);
    }

    #[test]
    fn idle_room_cleanup_removes_stale_rooms() {
        let mut reg = RoomRegistry::default();
        let (tx1, _rx1) = make_sender();
        let (tx2, _rx2) = make_sender();
        let alice = ConnectionId::new();
        reg.create_room_with_code("AAA111", alice, "Alice", tx1)
            .unwrap();
        reg.create_room_with_code("BBB222", ConnectionId::new(), "Bob", tx2)
            .unwrap();

        if let Some(entry) = reg.rooms.get_mut("AAA111") {
            entry.last_activity = Instant::now() - Duration::from_secs(7200);
        }

        assert_eq!(reg.cleanup_idle_rooms(Duration::from_secs(3600)), 1);
        assert!(!reg.room_exists("AAA111"));
        assert!(reg.room_exists("BBB222"));
        assert_eq!(reg.room_of(alice), None);
    }

    mod properties {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn repeated_joins_add_at_most_one(repeats in 1usize..8) {
                let mut reg = RoomRegistry::new(RoomConfig { max_players: 4, ..RoomConfig::default() });
                let (htx, mut hrx) = make_sender();
                reg.create_room_with_code("ABC123", ConnectionId::new(), "Alice", htx).unwrap();
                drain(&mut hrx);

                let guest = ConnectionId::new();
                let (gtx, _grx) = make_sender();
                for _ in 0..repeats {
                    reg.join_room("ABC123", guest, "Bob", gtx.clone()).unwrap();
                }
                prop_assert_eq!(reg.players("ABC123").unwrap().len(), 2);
                prop_assert_eq!(count_updates(&drain(&mut hrx)), 1);
            }

            #[test]
            fn host_stays_first_through_guest_churn(ops in proptest::collection::vec(any::<bool>(), 1..32)) {
                let mut reg = RoomRegistry::new(RoomConfig { max_players: 8, ..RoomConfig::default() });
                let (tx, _rx) = mpsc::channel(4096);
                let host = ConnectionId::new();
                reg.create_room_with_code("ABC123", host, "Alice", tx.clone()).unwrap();

                let mut guests: Vec<ConnectionId> = Vec::new();
                for join in ops {
                    if join {
                        let g = ConnectionId::new();
                        if reg.join_room("ABC123", g, "Guest", tx.clone()).is_ok() {
                            guests.push(g);
                        }
                    } else if let Some(g) = guests.pop() {
                        reg.leave_room("ABC123", g);
                    }
                    let players = reg.players("ABC123").unwrap();
                    prop_assert_eq!(players[0].identity, host);
                    assert_host_first(players);
                }
            }
        }
    }
}
