//! Process-wide owner of the one live connection.
//!
//! Views call [`ConnectionManager::acquire`] when they mount and drop the
//! returned [`Lease`] when they unmount. The first acquire opens signaling;
//! later ones share the same [`TransportHandle`]. The last release tears the
//! connection down, unless a game is still running.

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::rc::{Rc, Weak};

use wordlink_core::channel::{ChannelState, Delivery};
use wordlink_core::identity::ConnectionId;
use wordlink_core::net::messages::PeerMessage;
use wordlink_core::participant::{Participant, Role, normalize_display_name};
use wordlink_core::room::{is_valid_room_code, normalize_room_code};

use crate::config::{ClientConfig, SessionConfig};
use crate::error::ClientError;
use crate::events::{ConnectionEvent, DisconnectReason, EventKind, ListenerId, Listeners};
use crate::link::Connector;
use crate::transport::TransportHandle;

struct Inner {
    connector: Box<dyn Connector>,
    config: ClientConfig,
    handle: Option<TransportHandle>,
    usage: usize,
    next_generation: u64,
    failed_attempts: u32,
    queue: VecDeque<ConnectionEvent>,
}

impl Inner {
    fn current(&self, generation: u64) -> Option<&TransportHandle> {
        self.handle
            .as_ref()
            .filter(|h| h.generation() == generation)
    }

    fn teardown(&mut self, reason: DisconnectReason) {
        let Some(mut handle) = self.handle.take() else {
            return;
        };
        if matches!(
            reason,
            DisconnectReason::ConnectTimeout | DisconnectReason::SignalingUnavailable
        ) {
            self.failed_attempts += 1;
        }
        self.usage = 0;
        self.queue.extend(handle.shutdown(reason));
    }

    /// Finish a teardown that was held back by a running game.
    fn settle(&mut self) {
        if self.usage == 0 && self.handle.as_ref().is_some_and(|h| !h.in_game()) {
            self.teardown(DisconnectReason::Released);
        }
    }

    /// Process one link event or the connect deadline. Returns false when
    /// there was nothing to do.
    fn step(&mut self) -> bool {
        let Some(handle) = self.handle.as_mut() else {
            return false;
        };
        if handle.deadline_passed(self.connector.now()) {
            tracing::warn!(
                timeout_ms = self.config.connect_timeout.as_millis() as u64,
                "Connect timed out"
            );
            self.queue.push_back(ConnectionEvent::Error(ClientError::SignalingUnavailable(
                "timed out waiting to join".to_string(),
            )));
            self.teardown(DisconnectReason::ConnectTimeout);
            return true;
        }
        let Some(step) = handle.step(self.connector.as_ref()) else {
            return false;
        };
        if step.events.iter().any(|e| e.kind() == EventKind::Connected) {
            self.failed_attempts = 0;
        }
        self.queue.extend(step.events);
        match step.teardown {
            Some(reason) => self.teardown(reason),
            None => self.settle(),
        }
        true
    }
}

struct Shared {
    inner: RefCell<Inner>,
    listeners: RefCell<Listeners>,
    dispatching: Cell<bool>,
}

impl Shared {
    /// Deliver queued events with no manager borrow held. Nested calls made
    /// from a listener return at once and leave the work to the outer loop.
    fn flush(&self) {
        if self.dispatching.replace(true) {
            return;
        }
        loop {
            let next = self.inner.borrow_mut().queue.pop_front();
            let Some(event) = next else {
                break;
            };
            let callbacks = self.listeners.borrow().matching(event.kind());
            for callback in callbacks {
                callback(&event);
            }
        }
        self.dispatching.set(false);
    }

    fn release(&self, generation: u64) {
        {
            let mut inner = self.inner.borrow_mut();
            let Some(handle) = inner.current(generation) else {
                return;
            };
            let in_game = handle.in_game();
            inner.usage = inner.usage.saturating_sub(1);
            if inner.usage == 0 {
                if in_game {
                    tracing::debug!("Last lease released mid-game, deferring teardown");
                } else {
                    inner.teardown(DisconnectReason::Released);
                }
            }
        }
        self.flush();
    }
}

impl Drop for Shared {
    fn drop(&mut self) {
        if let Some(mut handle) = self.inner.get_mut().handle.take() {
            handle.shutdown(DisconnectReason::Released);
        }
    }
}

/// Shared connection owner. Clones refer to the same connection.
pub struct ConnectionManager {
    shared: Rc<Shared>,
}

impl Clone for ConnectionManager {
    fn clone(&self) -> Self {
        Self {
            shared: Rc::clone(&self.shared),
        }
    }
}

impl ConnectionManager {
    pub fn new(connector: Box<dyn Connector>, config: ClientConfig) -> Self {
        Self {
            shared: Rc::new(Shared {
                inner: RefCell::new(Inner {
                    connector,
                    config,
                    handle: None,
                    usage: 0,
                    next_generation: 0,
                    failed_attempts: 0,
                    queue: VecDeque::new(),
                }),
                listeners: RefCell::new(Listeners::default()),
                dispatching: Cell::new(false),
            }),
        }
    }

    fn lease(&self, generation: u64) -> Lease {
        Lease {
            shared: Rc::downgrade(&self.shared),
            generation,
        }
    }

    fn owns(&self, lease: &Lease) -> bool {
        std::ptr::eq(lease.shared.as_ptr(), Rc::as_ptr(&self.shared))
    }

    /// Get a lease on the live connection, opening one if there is none.
    ///
    /// `session` only matters for the call that opens the connection.
    pub fn acquire(&self, session: SessionConfig) -> Result<Lease, ClientError> {
        let mut inner = self.shared.inner.borrow_mut();

        if let Some(handle) = inner.handle.as_ref() {
            if handle.session() != &session {
                tracing::debug!(
                    requested = ?session,
                    active = ?handle.session(),
                    "Reusing live connection, ignoring new session settings"
                );
            }
            let generation = handle.generation();
            inner.usage += 1;
            tracing::debug!(usage = inner.usage, "Lease acquired on live connection");
            return Ok(self.lease(generation));
        }

        if inner.failed_attempts >= inner.config.max_connect_attempts {
            return Err(ClientError::SignalingUnavailable(format!(
                "gave up after {} failed attempts",
                inner.failed_attempts
            )));
        }
        let session = validate_session(session)?;

        let url = inner.config.signaling_url.clone();
        let link = match inner.connector.connect_signaling(&url) {
            Ok(link) => link,
            Err(e) => {
                inner.failed_attempts += 1;
                tracing::warn!(
                    %url,
                    error = %e,
                    attempts = inner.failed_attempts,
                    "Signaling connect failed"
                );
                return Err(ClientError::SignalingUnavailable(e.to_string()));
            },
        };

        inner.next_generation += 1;
        let generation = inner.next_generation;
        let deadline = inner.connector.now() + inner.config.connect_timeout;
        tracing::info!(
            %url,
            role = ?session.role,
            room_code = ?session.room_code,
            "Opening connection"
        );
        inner.handle = Some(TransportHandle::new(generation, link, session, deadline));
        inner.usage = 1;
        Ok(self.lease(generation))
    }

    /// Give a lease back. Same as dropping it.
    pub fn release(&self, lease: Lease) {
        drop(lease);
    }

    /// Send with the configured default [`Delivery`].
    pub fn send(&self, lease: &Lease, msg: PeerMessage) -> Result<(), ClientError> {
        let delivery = self.shared.inner.borrow().config.default_delivery();
        self.send_with(lease, msg, delivery)
    }

    pub fn send_with(
        &self,
        lease: &Lease,
        msg: PeerMessage,
        delivery: Delivery,
    ) -> Result<(), ClientError> {
        let result = {
            let mut inner = self.shared.inner.borrow_mut();
            let owned = self.owns(lease);
            let result = match inner
                .handle
                .as_mut()
                .filter(|h| owned && h.generation() == lease.generation)
            {
                Some(handle) => handle.send(msg, delivery),
                None => Err(ClientError::ChannelNotReady(ChannelState::Closed)),
            };
            inner.settle();
            result
        };
        self.shared.flush();
        result
    }

    /// Subscribe to one kind of event.
    pub fn on(&self, kind: EventKind, callback: impl Fn(&ConnectionEvent) + 'static) -> ListenerId {
        self.shared
            .listeners
            .borrow_mut()
            .add(Some(kind), Rc::new(callback))
    }

    pub fn on_any(&self, callback: impl Fn(&ConnectionEvent) + 'static) -> ListenerId {
        self.shared
            .listeners
            .borrow_mut()
            .add(None, Rc::new(callback))
    }

    pub fn off(&self, id: ListenerId) -> bool {
        self.shared.listeners.borrow_mut().remove(id)
    }

    /// Drain link events, check the connect deadline, and notify listeners.
    pub fn poll(&self) {
        loop {
            let progressed = self.shared.inner.borrow_mut().step();
            self.shared.flush();
            if !progressed {
                break;
            }
        }
    }

    /// Tear the connection down now, regardless of leases or game state.
    pub fn disconnect(&self) {
        {
            let mut inner = self.shared.inner.borrow_mut();
            inner.teardown(DisconnectReason::UserRequested);
            inner.failed_attempts = 0;
        }
        self.shared.flush();
    }

    pub fn is_connected(&self) -> bool {
        self.shared.inner.borrow().handle.is_some()
    }

    /// Number of leases on the live connection.
    pub fn usage(&self) -> usize {
        self.shared.inner.borrow().usage
    }
}

fn validate_session(mut session: SessionConfig) -> Result<SessionConfig, ClientError> {
    session.display_name = normalize_display_name(&session.display_name)
        .ok_or_else(|| ClientError::InvalidPayload("invalid display name".to_string()))?;
    session.room_code = session
        .room_code
        .as_deref()
        .map(normalize_room_code)
        .filter(|c| !c.is_empty());
    match session.room_code.as_deref() {
        Some(code) if !is_valid_room_code(code) => Err(ClientError::RoomUnavailable(format!(
            "invalid room code: {code}"
        ))),
        None if !session.role.is_host() => Err(ClientError::RoomUnavailable(
            "a room code is required to join".to_string(),
        )),
        _ => Ok(session),
    }
}

/// One view's claim on the shared connection.
///
/// A lease outliving its connection is stale: sends through it fail with
/// [`ClientError::ChannelNotReady`] and dropping it has no effect.
pub struct Lease {
    shared: Weak<Shared>,
    generation: u64,
}

impl Lease {
    fn with_handle<R>(&self, f: impl FnOnce(&TransportHandle) -> R) -> Option<R> {
        let shared = self.shared.upgrade()?;
        let inner = shared.inner.borrow();
        inner.current(self.generation).map(f)
    }

    /// False once the connection this lease was issued for is gone.
    pub fn is_current(&self) -> bool {
        self.with_handle(|_| ()).is_some()
    }

    pub fn identity(&self) -> Option<ConnectionId> {
        self.with_handle(TransportHandle::identity).flatten()
    }

    pub fn channel_state(&self) -> ChannelState {
        self.with_handle(TransportHandle::channel_state)
            .unwrap_or(ChannelState::Closed)
    }

    pub fn is_ready(&self) -> bool {
        self.channel_state() == ChannelState::Open
    }

    pub fn is_joined(&self) -> bool {
        self.with_handle(TransportHandle::is_joined).unwrap_or(false)
    }

    pub fn pending_len(&self) -> usize {
        self.with_handle(TransportHandle::pending_len).unwrap_or(0)
    }

    pub fn room_code(&self) -> Option<String> {
        self.with_handle(|h| h.room_code().map(str::to_string))
            .flatten()
    }

    pub fn role(&self) -> Option<Role> {
        self.with_handle(TransportHandle::role)
    }

    pub fn players(&self) -> Vec<Participant> {
        self.with_handle(|h| h.players().to_vec())
            .unwrap_or_default()
    }
}

impl Drop for Lease {
    fn drop(&mut self) {
        if let Some(shared) = self.shared.upgrade() {
            shared.release(self.generation);
        }
    }
}
