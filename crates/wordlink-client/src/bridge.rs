use serde::Deserialize;
use wasm_bindgen::prelude::*;

use wordlink_core::channel::{ChannelState, Delivery};
use wordlink_core::net::messages::PeerMessage;
use wordlink_core::participant::Role;

use crate::config::{ClientConfig, SessionConfig};
use crate::events::{ConnectionEvent, EventKind};
use crate::handles::HandleTable;
use crate::manager::ConnectionManager;
use crate::web::WebConnector;

/// Game payloads as the page hands them in.
#[derive(Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
enum JsPayload {
    WordSelect { word: String },
    Guess { word: String, attempt: u8 },
    GameComplete { solved: bool, attempts: u8 },
}

impl From<JsPayload> for PeerMessage {
    fn from(p: JsPayload) -> Self {
        match p {
            JsPayload::WordSelect { word } => PeerMessage::word_select(word),
            JsPayload::Guess { word, attempt } => PeerMessage::guess(word, attempt),
            JsPayload::GameComplete { solved, attempts } => {
                PeerMessage::game_complete(solved, attempts)
            },
        }
    }
}

fn to_js_error(e: impl std::fmt::Display) -> JsValue {
    JsValue::from_str(&e.to_string())
}

/// JavaScript entry point. Views acquire numbered leases and release them
/// when they unmount. The page calls `poll()` from its animation frame.
///
/// All methods take `&self`, so listeners may call back into the client.
#[wasm_bindgen]
pub struct WordlinkClient {
    table: HandleTable,
}

#[wasm_bindgen]
impl WordlinkClient {
    #[wasm_bindgen(constructor)]
    pub fn new(signaling_url: String) -> WordlinkClient {
        console_error_panic_hook::set_once();
        let manager = ConnectionManager::new(
            Box::new(WebConnector::default()),
            ClientConfig::new(signaling_url),
        );
        Self {
            table: HandleTable::new(manager),
        }
    }

    /// `role` is `"host"` or `"guest"`. Returns a lease id.
    pub fn acquire(
        &self,
        role: &str,
        display_name: String,
        room_code: Option<String>,
    ) -> Result<u32, JsValue> {
        let role = match role {
            "host" => Role::Host,
            "guest" => Role::Guest,
            other => return Err(JsValue::from_str(&format!("unknown role: {other}"))),
        };
        let session = SessionConfig {
            room_code,
            display_name,
            role,
        };
        self.table.acquire(session).map_err(to_js_error)
    }

    pub fn release(&self, lease: u32) {
        self.table.release(lease);
    }

    /// Send a payload such as `{ "type": "guess", "word": "CRANE", "attempt": 1 }`.
    /// With `immediate`, fail instead of queueing while the channel connects.
    pub fn send(&self, lease: u32, payload: &str, immediate: bool) -> Result<(), JsValue> {
        let lease = self
            .table
            .lease(lease)
            .ok_or_else(|| JsValue::from_str("unknown lease"))?;
        let payload: JsPayload = serde_json::from_str(payload).map_err(to_js_error)?;
        let manager = self.table.manager();
        let result = if immediate {
            manager.send_with(&lease, payload.into(), Delivery::Immediate)
        } else {
            manager.send(&lease, payload.into())
        };
        result.map_err(to_js_error)
    }

    /// Subscribe to an event by name (`"connected"`, `"message"`, ...), or to
    /// everything with `"*"`. The callback receives a plain object.
    pub fn on(&self, event: &str, callback: js_sys::Function) -> Result<u32, JsValue> {
        let kind = match event {
            "*" => None,
            name => Some(
                EventKind::from_name(name)
                    .ok_or_else(|| JsValue::from_str(&format!("unknown event: {name}")))?,
            ),
        };
        let deliver = move |e: &ConnectionEvent| {
            let json = e.to_json().to_string();
            match js_sys::JSON::parse(&json) {
                Ok(value) => {
                    if let Err(err) = callback.call1(&JsValue::NULL, &value) {
                        tracing::warn!(error = ?err, "Event listener threw");
                    }
                },
                Err(err) => tracing::warn!(error = ?err, "Event JSON parse failed"),
            }
        };
        Ok(self.table.on(kind, deliver))
    }

    pub fn off(&self, id: u32) {
        self.table.off(id);
    }

    pub fn poll(&self) {
        self.table.manager().poll();
    }

    pub fn disconnect(&self) {
        self.table.disconnect();
    }

    /// `"connecting"`, `"open"`, or `"closed"` for the given lease.
    #[wasm_bindgen(js_name = channelState)]
    pub fn channel_state(&self, lease: u32) -> String {
        let state = self
            .table
            .lease(lease)
            .map_or(ChannelState::Closed, |l| l.channel_state());
        match state {
            ChannelState::Connecting => "connecting",
            ChannelState::Open => "open",
            ChannelState::Closed => "closed",
        }
        .to_string()
    }

    #[wasm_bindgen(js_name = roomCode)]
    pub fn room_code(&self, lease: u32) -> Option<String> {
        self.table.lease(lease).and_then(|l| l.room_code())
    }
}
