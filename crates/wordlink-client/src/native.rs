//! Native signaling over tokio-tungstenite.
//!
//! The socket runs as a task on the ambient tokio runtime. The link handed to
//! the manager only touches the two unbounded channels, so it stays usable
//! from a non-async frame loop.

use std::rc::Rc;
use std::time::{Duration, Instant};

use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;

use crate::error::TransportError;
use crate::link::{Connector, LinkEvent, PeerFactory, PeerLink, SignalingLink};

pub struct NativeConnector {
    peers: Rc<dyn PeerFactory>,
    origin: Instant,
}

impl NativeConnector {
    /// Native builds have no WebRTC stack; peer links come from `peers`
    /// (usually a [`LoopbackSwitchboard`](crate::loopback::LoopbackSwitchboard)).
    pub fn new(peers: Rc<dyn PeerFactory>) -> Self {
        Self {
            peers,
            origin: Instant::now(),
        }
    }
}

impl Connector for NativeConnector {
    fn connect_signaling(&self, url: &str) -> Result<Box<dyn SignalingLink>, TransportError> {
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| TransportError::Connect(e.to_string()))?;
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        runtime.spawn(run_socket(url.to_string(), outbound_rx, inbound_tx));
        Ok(Box::new(NativeSignalingLink {
            outbound: Some(outbound_tx),
            inbound: inbound_rx,
        }))
    }

    fn create_peer(&self) -> Result<Box<dyn PeerLink>, TransportError> {
        self.peers.create_peer()
    }

    fn now(&self) -> Duration {
        self.origin.elapsed()
    }
}

struct NativeSignalingLink {
    outbound: Option<mpsc::UnboundedSender<String>>,
    inbound: mpsc::UnboundedReceiver<LinkEvent>,
}

impl SignalingLink for NativeSignalingLink {
    fn send(&mut self, text: &str) -> Result<(), TransportError> {
        let tx = self.outbound.as_ref().ok_or(TransportError::Closed)?;
        tx.send(text.to_string()).map_err(|_| TransportError::Closed)
    }

    fn drain_events(&mut self) -> Vec<LinkEvent> {
        let mut events = Vec::new();
        while let Ok(event) = self.inbound.try_recv() {
            events.push(event);
        }
        events
    }

    fn close(&mut self) {
        // Dropping the sender ends the socket task.
        self.outbound = None;
    }
}

async fn run_socket(
    url: String,
    mut outbound: mpsc::UnboundedReceiver<String>,
    inbound: mpsc::UnboundedSender<LinkEvent>,
) {
    let ws = match tokio_tungstenite::connect_async(url.as_str()).await {
        Ok((ws, _)) => ws,
        Err(e) => {
            tracing::debug!(%url, error = %e, "Signaling connect failed");
            let _ = inbound.send(LinkEvent::Closed {
                reason: e.to_string(),
            });
            return;
        },
    };
    let _ = inbound.send(LinkEvent::Open);
    let (mut sink, mut stream) = ws.split();

    let reason = loop {
        tokio::select! {
            out = outbound.recv() => match out {
                Some(text) => {
                    if let Err(e) = sink.send(Message::Text(text.into())).await {
                        break e.to_string();
                    }
                },
                None => {
                    let _ = sink.send(Message::Close(None)).await;
                    break "closed locally".to_string();
                },
            },
            incoming = stream.next() => match incoming {
                Some(Ok(Message::Text(text))) => {
                    let _ = inbound.send(LinkEvent::Message(text.as_str().to_string()));
                },
                Some(Ok(Message::Close(_))) | None => break "closed by server".to_string(),
                Some(Ok(_)) => {},
                Some(Err(e)) => break e.to_string(),
            },
        }
    };
    tracing::debug!(%url, %reason, "Signaling socket finished");
    let _ = inbound.send(LinkEvent::Closed { reason });
}
