//! In-process peer transport.
//!
//! Every peer link created by one [`LoopbackSwitchboard`] gets a port.
//! Offers and answers carry `loopback:<port>`, so two connection managers
//! can negotiate through a real signaling server and then exchange
//! data-channel frames directly in memory.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use crate::error::TransportError;
use crate::link::{PeerEvent, PeerFactory, PeerLink, PeerSignal};

const SDP_PREFIX: &str = "loopback:";

#[derive(Default)]
struct Endpoint {
    events: Vec<PeerEvent>,
    remote: Option<u32>,
    open: bool,
    closed: bool,
}

#[derive(Default)]
struct Board {
    next_port: u32,
    endpoints: HashMap<u32, Rc<RefCell<Endpoint>>>,
}

/// Pairs loopback peer links. Clones share one board.
#[derive(Clone, Default)]
pub struct LoopbackSwitchboard {
    board: Rc<RefCell<Board>>,
}

impl LoopbackSwitchboard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of links that have not been closed.
    pub fn live_links(&self) -> usize {
        self.board.borrow().endpoints.len()
    }

    fn endpoint(&self, port: u32) -> Option<Rc<RefCell<Endpoint>>> {
        self.board.borrow().endpoints.get(&port).map(Rc::clone)
    }
}

impl PeerFactory for LoopbackSwitchboard {
    fn create_peer(&self) -> Result<Box<dyn PeerLink>, TransportError> {
        let endpoint = Rc::new(RefCell::new(Endpoint::default()));
        let port = {
            let mut board = self.board.borrow_mut();
            board.next_port += 1;
            let port = board.next_port;
            board.endpoints.insert(port, Rc::clone(&endpoint));
            port
        };
        Ok(Box::new(LoopbackPeer {
            switchboard: self.clone(),
            port,
            endpoint,
        }))
    }
}

fn parse_port(sdp: &str) -> Result<u32, TransportError> {
    sdp.strip_prefix(SDP_PREFIX)
        .and_then(|p| p.parse().ok())
        .ok_or_else(|| TransportError::Negotiation(format!("not a loopback description: {sdp}")))
}

struct LoopbackPeer {
    switchboard: LoopbackSwitchboard,
    port: u32,
    endpoint: Rc<RefCell<Endpoint>>,
}

impl LoopbackPeer {
    fn local_description(&self) -> String {
        format!("{SDP_PREFIX}{}", self.port)
    }

    fn push_local(&self, event: PeerEvent) {
        self.endpoint.borrow_mut().events.push(event);
    }
}

impl PeerLink for LoopbackPeer {
    fn start_offer(&mut self) -> Result<(), TransportError> {
        self.push_local(PeerEvent::LocalSignal(PeerSignal::Offer(
            self.local_description(),
        )));
        self.push_local(PeerEvent::LocalSignal(PeerSignal::Candidate {
            candidate: format!("candidate:{} 1 udp 1 127.0.0.1 {} typ host", self.port, self.port),
            sdp_mid: Some("0".to_string()),
            sdp_m_line_index: Some(0),
        }));
        Ok(())
    }

    fn apply_remote(&mut self, signal: PeerSignal) -> Result<(), TransportError> {
        match signal {
            PeerSignal::Offer(sdp) => {
                let remote = parse_port(&sdp)?;
                self.endpoint.borrow_mut().remote = Some(remote);
                self.push_local(PeerEvent::LocalSignal(PeerSignal::Answer(
                    self.local_description(),
                )));
            },
            PeerSignal::Answer(sdp) => {
                let remote = parse_port(&sdp)?;
                let other = self.switchboard.endpoint(remote).ok_or_else(|| {
                    TransportError::Negotiation(format!("no loopback peer on {remote}"))
                })?;
                if other.borrow().remote != Some(self.port) {
                    return Err(TransportError::Negotiation(format!(
                        "loopback peer {remote} did not answer this offer"
                    )));
                }
                {
                    let mut local = self.endpoint.borrow_mut();
                    local.remote = Some(remote);
                    local.open = true;
                    local.events.push(PeerEvent::Open);
                }
                let mut other = other.borrow_mut();
                other.open = true;
                other.events.push(PeerEvent::Open);
            },
            // Nothing to gather in memory.
            PeerSignal::Candidate { .. } => {},
        }
        Ok(())
    }

    fn send(&mut self, data: &[u8]) -> Result<(), TransportError> {
        let (open, remote) = {
            let local = self.endpoint.borrow();
            (local.open && !local.closed, local.remote)
        };
        let other = remote
            .filter(|_| open)
            .and_then(|port| self.switchboard.endpoint(port))
            .ok_or(TransportError::Closed)?;
        other
            .borrow_mut()
            .events
            .push(PeerEvent::Message(data.to_vec()));
        Ok(())
    }

    fn drain_events(&mut self) -> Vec<PeerEvent> {
        std::mem::take(&mut self.endpoint.borrow_mut().events)
    }

    fn close(&mut self) {
        let remote = {
            let mut local = self.endpoint.borrow_mut();
            if local.closed {
                return;
            }
            local.closed = true;
            local.open = false;
            local.remote
        };
        self.switchboard.board.borrow_mut().endpoints.remove(&self.port);
        if let Some(other) = remote.and_then(|port| self.switchboard.endpoint(port)) {
            let mut other = other.borrow_mut();
            if !other.closed {
                other.open = false;
                other.events.push(PeerEvent::Closed);
            }
        }
    }
}

impl Drop for LoopbackPeer {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn local_signals(peer: &mut dyn PeerLink) -> Vec<PeerSignal> {
        peer.drain_events()
            .into_iter()
            .filter_map(|e| match e {
                PeerEvent::LocalSignal(s) => Some(s),
                _ => None,
            })
            .collect()
    }

    /// Run a full offer/answer between two links.
    fn pair(board: &LoopbackSwitchboard) -> (Box<dyn PeerLink>, Box<dyn PeerLink>) {
        let mut guest = board.create_peer().unwrap();
        let mut host = board.create_peer().unwrap();
        guest.start_offer().unwrap();
        for signal in local_signals(guest.as_mut()) {
            host.apply_remote(signal).unwrap();
        }
        for signal in local_signals(host.as_mut()) {
            guest.apply_remote(signal).unwrap();
        }
        (guest, host)
    }

    #[test]
    fn negotiation_opens_both_ends() {
        let board = LoopbackSwitchboard::new();
        let (mut guest, mut host) = pair(&board);
        assert_eq!(guest.drain_events(), vec![PeerEvent::Open]);
        assert_eq!(host.drain_events(), vec![PeerEvent::Open]);
    }

    #[test]
    fn frames_cross_in_order() {
        let board = LoopbackSwitchboard::new();
        let (mut guest, mut host) = pair(&board);
        guest.drain_events();
        host.drain_events();

        host.send(b"one").unwrap();
        host.send(b"two").unwrap();
        assert_eq!(
            guest.drain_events(),
            vec![
                PeerEvent::Message(b"one".to_vec()),
                PeerEvent::Message(b"two".to_vec()),
            ]
        );
    }

    #[test]
    fn send_before_open_fails() {
        let board = LoopbackSwitchboard::new();
        let mut peer = board.create_peer().unwrap();
        assert_eq!(peer.send(b"x"), Err(TransportError::Closed));
    }

    #[test]
    fn close_notifies_remote() {
        let board = LoopbackSwitchboard::new();
        let (mut guest, mut host) = pair(&board);
        guest.drain_events();
        host.drain_events();
        assert_eq!(board.live_links(), 2);

        drop(guest);
        assert_eq!(host.drain_events(), vec![PeerEvent::Closed]);
        assert_eq!(host.send(b"late"), Err(TransportError::Closed));
        assert_eq!(board.live_links(), 1);
    }

    #[test]
    fn rejects_foreign_descriptions() {
        let board = LoopbackSwitchboard::new();
        let mut peer = board.create_peer().unwrap();
        assert!(matches!(
            peer.apply_remote(PeerSignal::Offer("v=0 o=- 0 0 IN IP4 0.0.0.0".to_string())),
            Err(TransportError::Negotiation(_))
        ));
    }
}
