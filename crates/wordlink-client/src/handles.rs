//! Numbered lease and listener handles for callers that cannot hold Rust
//! values, such as the browser bridge.
//!
//! Every method takes `&self` and no table borrow is held across a manager
//! call, so listeners may acquire, release, subscribe or disconnect while
//! events are being delivered.

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::rc::Rc;

use crate::config::SessionConfig;
use crate::error::ClientError;
use crate::events::{ConnectionEvent, EventKind, ListenerId};
use crate::manager::{ConnectionManager, Lease};

pub struct HandleTable {
    manager: ConnectionManager,
    leases: RefCell<HashMap<u32, Rc<Lease>>>,
    listeners: RefCell<HashMap<u32, ListenerId>>,
    next_id: Cell<u32>,
}

impl HandleTable {
    pub fn new(manager: ConnectionManager) -> Self {
        Self {
            manager,
            leases: RefCell::new(HashMap::new()),
            listeners: RefCell::new(HashMap::new()),
            next_id: Cell::new(0),
        }
    }

    pub fn manager(&self) -> &ConnectionManager {
        &self.manager
    }

    fn next_id(&self) -> u32 {
        let id = self.next_id.get() + 1;
        self.next_id.set(id);
        id
    }

    pub fn acquire(&self, session: SessionConfig) -> Result<u32, ClientError> {
        let lease = self.manager.acquire(session)?;
        let id = self.next_id();
        self.leases.borrow_mut().insert(id, Rc::new(lease));
        Ok(id)
    }

    /// Returns false for an unknown or already released handle.
    pub fn release(&self, id: u32) -> bool {
        let lease = self.leases.borrow_mut().remove(&id);
        // Dropped here, after the table borrow ends.
        lease.is_some()
    }

    pub fn lease(&self, id: u32) -> Option<Rc<Lease>> {
        self.leases.borrow().get(&id).map(Rc::clone)
    }

    /// Subscribe to one kind of event, or to all of them with `None`.
    pub fn on(
        &self,
        kind: Option<EventKind>,
        callback: impl Fn(&ConnectionEvent) + 'static,
    ) -> u32 {
        let listener = match kind {
            Some(kind) => self.manager.on(kind, callback),
            None => self.manager.on_any(callback),
        };
        let id = self.next_id();
        self.listeners.borrow_mut().insert(id, listener);
        id
    }

    pub fn off(&self, id: u32) -> bool {
        let listener = self.listeners.borrow_mut().remove(&id);
        listener.is_some_and(|l| self.manager.off(l))
    }

    /// Tear the connection down and forget every lease handle. Handles
    /// acquired by listeners during the teardown survive.
    pub fn disconnect(&self) {
        let stale = std::mem::take(&mut *self.leases.borrow_mut());
        self.manager.disconnect();
        drop(stale);
    }
}
