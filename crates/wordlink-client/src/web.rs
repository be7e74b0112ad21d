//! Browser transports: `WebSocket` signaling and an `RtcPeerConnection`
//! data channel.
//!
//! Browser callbacks only push into shared buffers. Everything is single
//! threaded, hence `Rc<RefCell<_>>` throughout.

use std::cell::RefCell;
use std::rc::Rc;
use std::time::Duration;

use wasm_bindgen::JsCast;
use wasm_bindgen::prelude::*;
use wasm_bindgen_futures::{JsFuture, spawn_local};
use web_sys::{
    CloseEvent, ErrorEvent, MessageEvent, RtcConfiguration, RtcDataChannel, RtcDataChannelEvent,
    RtcDataChannelType, RtcIceCandidateInit, RtcIceServer, RtcPeerConnection,
    RtcPeerConnectionIceEvent, RtcSdpType, RtcSessionDescriptionInit, WebSocket,
};

use crate::error::TransportError;
use crate::link::{Connector, LinkEvent, PeerEvent, PeerLink, PeerSignal, SignalingLink};

const DATA_CHANNEL_LABEL: &str = "wordlink";

fn js_error(e: &JsValue) -> String {
    e.as_string().unwrap_or_else(|| format!("{e:?}"))
}

pub struct WebConnector {
    ice_servers: Vec<String>,
}

impl WebConnector {
    pub fn new(ice_servers: Vec<String>) -> Self {
        Self { ice_servers }
    }
}

impl Default for WebConnector {
    fn default() -> Self {
        Self::new(vec!["stun:stun.l.google.com:19302".to_string()])
    }
}

impl Connector for WebConnector {
    fn connect_signaling(&self, url: &str) -> Result<Box<dyn SignalingLink>, TransportError> {
        Ok(Box::new(WebSignalingLink::connect(url)?))
    }

    fn create_peer(&self) -> Result<Box<dyn PeerLink>, TransportError> {
        Ok(Box::new(WebPeerLink::new(&self.ice_servers)?))
    }

    fn now(&self) -> Duration {
        Duration::from_secs_f64(js_sys::Date::now() / 1000.0)
    }
}

// ============================================================================
// Signaling
// ============================================================================

struct WebSignalingLink {
    ws: WebSocket,
    events: Rc<RefCell<Vec<LinkEvent>>>,
    closed: bool,
}

impl WebSignalingLink {
    fn connect(url: &str) -> Result<Self, TransportError> {
        let ws = WebSocket::new(url).map_err(|e| TransportError::Connect(js_error(&e)))?;
        let events = Rc::new(RefCell::new(Vec::new()));

        let buffer = Rc::clone(&events);
        let onopen = Closure::<dyn FnMut()>::new(move || {
            buffer.borrow_mut().push(LinkEvent::Open);
        });
        ws.set_onopen(Some(onopen.as_ref().unchecked_ref()));
        onopen.forget();

        let buffer = Rc::clone(&events);
        let onmessage = Closure::<dyn FnMut(MessageEvent)>::new(move |evt: MessageEvent| {
            if let Some(text) = evt.data().as_string() {
                buffer.borrow_mut().push(LinkEvent::Message(text));
            } else {
                tracing::debug!("Ignoring non-text signaling frame");
            }
        });
        ws.set_onmessage(Some(onmessage.as_ref().unchecked_ref()));
        onmessage.forget();

        // Browsers always follow `error` with `close`, so only close reports.
        let onerror = Closure::<dyn FnMut(ErrorEvent)>::new(|evt: ErrorEvent| {
            tracing::debug!(message = %evt.message(), "WebSocket error");
        });
        ws.set_onerror(Some(onerror.as_ref().unchecked_ref()));
        onerror.forget();

        let buffer = Rc::clone(&events);
        let onclose = Closure::<dyn FnMut(CloseEvent)>::new(move |evt: CloseEvent| {
            let reason = if evt.reason().is_empty() {
                format!("close code {}", evt.code())
            } else {
                evt.reason()
            };
            buffer.borrow_mut().push(LinkEvent::Closed { reason });
        });
        ws.set_onclose(Some(onclose.as_ref().unchecked_ref()));
        onclose.forget();

        Ok(Self {
            ws,
            events,
            closed: false,
        })
    }
}

impl SignalingLink for WebSignalingLink {
    fn send(&mut self, text: &str) -> Result<(), TransportError> {
        if self.closed {
            return Err(TransportError::Closed);
        }
        self.ws
            .send_with_str(text)
            .map_err(|e| TransportError::Send(js_error(&e)))
    }

    fn drain_events(&mut self) -> Vec<LinkEvent> {
        std::mem::take(&mut self.events.borrow_mut())
    }

    fn close(&mut self) {
        if !self.closed {
            self.closed = true;
            let _ = self.ws.close();
        }
    }
}

// ============================================================================
// Peer connection
// ============================================================================

#[derive(Default)]
struct PeerShared {
    events: Vec<PeerEvent>,
    channel: Option<RtcDataChannel>,
    remote_set: bool,
    /// Candidates that arrived before the remote description.
    pending_candidates: Vec<RtcIceCandidateInit>,
}

struct WebPeerLink {
    pc: RtcPeerConnection,
    shared: Rc<RefCell<PeerShared>>,
}

impl WebPeerLink {
    fn new(ice_servers: &[String]) -> Result<Self, TransportError> {
        let config = RtcConfiguration::new();
        if !ice_servers.is_empty() {
            let urls = js_sys::Array::new();
            for url in ice_servers {
                urls.push(&JsValue::from_str(url));
            }
            let server = RtcIceServer::new();
            server.set_urls(&urls);
            let servers = js_sys::Array::new();
            servers.push(&server);
            config.set_ice_servers(&servers);
        }
        let pc = RtcPeerConnection::new_with_configuration(&config)
            .map_err(|e| TransportError::Connect(js_error(&e)))?;
        let shared = Rc::new(RefCell::new(PeerShared::default()));

        let buffer = Rc::clone(&shared);
        let onicecandidate = Closure::<dyn FnMut(RtcPeerConnectionIceEvent)>::new(
            move |evt: RtcPeerConnectionIceEvent| {
                // A null candidate marks the end of gathering.
                let Some(c) = evt.candidate() else {
                    return;
                };
                buffer
                    .borrow_mut()
                    .events
                    .push(PeerEvent::LocalSignal(PeerSignal::Candidate {
                        candidate: c.candidate(),
                        sdp_mid: c.sdp_mid(),
                        sdp_m_line_index: c.sdp_m_line_index(),
                    }));
            },
        );
        pc.set_onicecandidate(Some(onicecandidate.as_ref().unchecked_ref()));
        onicecandidate.forget();

        // The answering side receives the channel the offerer created.
        let buffer = Rc::clone(&shared);
        let ondatachannel =
            Closure::<dyn FnMut(RtcDataChannelEvent)>::new(move |evt: RtcDataChannelEvent| {
                attach_channel(&buffer, evt.channel());
            });
        pc.set_ondatachannel(Some(ondatachannel.as_ref().unchecked_ref()));
        ondatachannel.forget();

        Ok(Self { pc, shared })
    }

    fn set_remote(&self, kind: RtcSdpType, sdp: String) {
        let pc = self.pc.clone();
        let shared = Rc::clone(&self.shared);
        spawn_local(async move {
            let desc = RtcSessionDescriptionInit::new(kind);
            desc.set_sdp(&sdp);
            if let Err(e) = JsFuture::from(pc.set_remote_description(&desc)).await {
                tracing::warn!(error = %js_error(&e), "setRemoteDescription failed");
                shared.borrow_mut().events.push(PeerEvent::Closed);
                return;
            }
            let pending = {
                let mut shared = shared.borrow_mut();
                shared.remote_set = true;
                std::mem::take(&mut shared.pending_candidates)
            };
            for candidate in pending {
                add_candidate(&pc, &candidate).await;
            }
            if kind == RtcSdpType::Offer {
                create_local(&pc, &shared, RtcSdpType::Answer).await;
            }
        });
    }
}

fn attach_channel(shared: &Rc<RefCell<PeerShared>>, channel: RtcDataChannel) {
    channel.set_binary_type(RtcDataChannelType::Arraybuffer);

    let buffer = Rc::clone(shared);
    let onopen = Closure::<dyn FnMut()>::new(move || {
        buffer.borrow_mut().events.push(PeerEvent::Open);
    });
    channel.set_onopen(Some(onopen.as_ref().unchecked_ref()));
    onopen.forget();

    let buffer = Rc::clone(shared);
    let onmessage = Closure::<dyn FnMut(MessageEvent)>::new(move |evt: MessageEvent| {
        if let Ok(buf) = evt.data().dyn_into::<js_sys::ArrayBuffer>() {
            let data = js_sys::Uint8Array::new(&buf).to_vec();
            buffer.borrow_mut().events.push(PeerEvent::Message(data));
        }
    });
    channel.set_onmessage(Some(onmessage.as_ref().unchecked_ref()));
    onmessage.forget();

    let buffer = Rc::clone(shared);
    let onclose = Closure::<dyn FnMut()>::new(move || {
        buffer.borrow_mut().events.push(PeerEvent::Closed);
    });
    channel.set_onclose(Some(onclose.as_ref().unchecked_ref()));
    onclose.forget();

    shared.borrow_mut().channel = Some(channel);
}

/// Create an offer or answer, install it locally, and queue it for signaling.
async fn create_local(pc: &RtcPeerConnection, shared: &Rc<RefCell<PeerShared>>, kind: RtcSdpType) {
    let promise = if kind == RtcSdpType::Offer {
        pc.create_offer()
    } else {
        pc.create_answer()
    };
    let result = async {
        let desc = JsFuture::from(promise).await?;
        let sdp = js_sys::Reflect::get(&desc, &JsValue::from_str("sdp"))?
            .as_string()
            .unwrap_or_default();
        let init = RtcSessionDescriptionInit::new(kind);
        init.set_sdp(&sdp);
        JsFuture::from(pc.set_local_description(&init)).await?;
        Ok::<_, JsValue>(sdp)
    }
    .await;
    match result {
        Ok(sdp) => {
            let signal = if kind == RtcSdpType::Offer {
                PeerSignal::Offer(sdp)
            } else {
                PeerSignal::Answer(sdp)
            };
            shared.borrow_mut().events.push(PeerEvent::LocalSignal(signal));
        },
        Err(e) => {
            tracing::warn!(error = %js_error(&e), ?kind, "Local description failed");
            shared.borrow_mut().events.push(PeerEvent::Closed);
        },
    }
}

async fn add_candidate(pc: &RtcPeerConnection, candidate: &RtcIceCandidateInit) {
    let promise = pc.add_ice_candidate_with_opt_rtc_ice_candidate_init(Some(candidate));
    if let Err(e) = JsFuture::from(promise).await {
        tracing::debug!(error = %js_error(&e), "addIceCandidate failed");
    }
}

impl PeerLink for WebPeerLink {
    fn start_offer(&mut self) -> Result<(), TransportError> {
        let channel = self.pc.create_data_channel(DATA_CHANNEL_LABEL);
        attach_channel(&self.shared, channel);
        let pc = self.pc.clone();
        let shared = Rc::clone(&self.shared);
        spawn_local(async move {
            create_local(&pc, &shared, RtcSdpType::Offer).await;
        });
        Ok(())
    }

    fn apply_remote(&mut self, signal: PeerSignal) -> Result<(), TransportError> {
        match signal {
            PeerSignal::Offer(sdp) => self.set_remote(RtcSdpType::Offer, sdp),
            PeerSignal::Answer(sdp) => self.set_remote(RtcSdpType::Answer, sdp),
            PeerSignal::Candidate {
                candidate,
                sdp_mid,
                sdp_m_line_index,
            } => {
                let init = RtcIceCandidateInit::new(&candidate);
                init.set_sdp_mid(sdp_mid.as_deref());
                init.set_sdp_m_line_index(sdp_m_line_index);
                let mut shared = self.shared.borrow_mut();
                if shared.remote_set {
                    drop(shared);
                    let pc = self.pc.clone();
                    spawn_local(async move {
                        add_candidate(&pc, &init).await;
                    });
                } else {
                    shared.pending_candidates.push(init);
                }
            },
        }
        Ok(())
    }

    fn send(&mut self, data: &[u8]) -> Result<(), TransportError> {
        let shared = self.shared.borrow();
        let channel = shared.channel.as_ref().ok_or(TransportError::Closed)?;
        channel
            .send_with_u8_array(data)
            .map_err(|e| TransportError::Send(js_error(&e)))
    }

    fn drain_events(&mut self) -> Vec<PeerEvent> {
        std::mem::take(&mut self.shared.borrow_mut().events)
    }

    fn close(&mut self) {
        if let Some(channel) = self.shared.borrow_mut().channel.take() {
            channel.close();
        }
        self.pc.close();
    }
}
