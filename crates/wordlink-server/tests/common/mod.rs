use std::net::SocketAddr;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use wordlink_core::identity::ConnectionId;
use wordlink_core::net::messages::{
    ErrorMsg, JoinRoomMsg, JoinedMsg, RoomUpdateMsg, SignalFrame, SignalMessage,
};
use wordlink_core::net::protocol::{decode_signal, encode_signal};
use wordlink_core::participant::Role;

use wordlink_server::config::ServerConfig;
use wordlink_server::{build_app, spawn_room_reaper};

pub type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

pub struct TestServer {
    pub addr: SocketAddr,
    _shutdown: tokio::task::JoinHandle<()>,
}

impl TestServer {
    /// Start a test server with default settings.
    pub async fn new() -> Self {
        Self::from_config(ServerConfig::default()).await
    }

    pub async fn from_config(config: ServerConfig) -> Self {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let (app, state) = build_app(config);
        spawn_room_reaper(state);

        let handle = tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        // Give the server a moment to start accepting
        tokio::time::sleep(Duration::from_millis(20)).await;

        Self {
            addr,
            _shutdown: handle,
        }
    }

    pub fn base_url(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub fn ws_url(&self) -> String {
        format!("ws://{}/ws", self.addr)
    }
}

/// Connect and consume the `welcome`. Returns the stream and its identity.
pub async fn ws_connect(url: &str) -> (WsStream, ConnectionId) {
    let (mut stream, _) = tokio_tungstenite::connect_async(url).await.unwrap();
    match ws_read_signal(&mut stream).await.message {
        SignalMessage::Welcome(w) => (stream, w.identity),
        other => panic!("Expected Welcome, got: {other:?}"),
    }
}

pub async fn ws_send_signal(stream: &mut WsStream, frame: &SignalFrame) {
    let text = encode_signal(frame).unwrap();
    stream.send(Message::Text(text.into())).await.unwrap();
}

pub async fn ws_send_join(stream: &mut WsStream, room_code: Option<&str>, name: &str, role: Role) {
    let message = SignalMessage::JoinRoom(JoinRoomMsg {
        display_name: name.to_string(),
        role,
        session_token: None,
    });
    let frame = SignalFrame {
        room_code: room_code.map(str::to_string),
        message,
    };
    ws_send_signal(stream, &frame).await;
}

/// Create a room as host. Consumes the `joined` reply and the first
/// `room-update`. Returns the reply and the room code.
pub async fn ws_create_room(stream: &mut WsStream, name: &str) -> (JoinedMsg, String) {
    ws_send_join(stream, None, name, Role::Host).await;
    let frame = ws_read_signal(stream).await;
    let joined = match frame.message {
        SignalMessage::Joined(j) => j,
        other => panic!("Expected Joined, got: {other:?}"),
    };
    let code = frame.room_code.expect("joined carries the room code");
    let _ = ws_read_room_update(stream).await;
    (joined, code)
}

/// Join an existing room as guest and return the `joined` reply.
pub async fn ws_join_room(stream: &mut WsStream, room_code: &str, name: &str) -> JoinedMsg {
    ws_send_join(stream, Some(room_code), name, Role::Guest).await;
    match ws_read_signal(stream).await.message {
        SignalMessage::Joined(j) => j,
        other => panic!("Expected Joined, got: {other:?}"),
    }
}

/// Join and expect an `error` reply.
pub async fn ws_join_room_expect_error(
    stream: &mut WsStream,
    room_code: &str,
    name: &str,
) -> ErrorMsg {
    ws_send_join(stream, Some(room_code), name, Role::Guest).await;
    match ws_read_signal(stream).await.message {
        SignalMessage::Error(e) => e,
        other => panic!("Expected Error, got: {other:?}"),
    }
}

pub async fn ws_read_room_update(stream: &mut WsStream) -> RoomUpdateMsg {
    match ws_read_signal(stream).await.message {
        SignalMessage::RoomUpdate(u) => u,
        other => panic!("Expected RoomUpdate, got: {other:?}"),
    }
}

/// Read the next text frame (5s timeout).
pub async fn ws_read_text(stream: &mut WsStream) -> String {
    let deadline = Duration::from_secs(5);
    tokio::time::timeout(deadline, async {
        loop {
            match stream.next().await {
                Some(Ok(Message::Text(text))) => return text.as_str().to_string(),
                Some(Ok(Message::Close(_))) => panic!("WebSocket closed unexpectedly"),
                Some(Err(e)) => panic!("WebSocket error: {e}"),
                None => panic!("WebSocket stream ended"),
                _ => continue,
            }
        }
    })
    .await
    .expect("Timed out waiting for WebSocket message")
}

/// Try to read a text frame, returning None on timeout.
pub async fn ws_try_read_text(stream: &mut WsStream, timeout_ms: u64) -> Option<String> {
    let deadline = Duration::from_millis(timeout_ms);
    tokio::time::timeout(deadline, async {
        loop {
            match stream.next().await {
                Some(Ok(Message::Text(text))) => return text.as_str().to_string(),
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => {
                    panic!("WebSocket error or closed")
                },
                _ => continue,
            }
        }
    })
    .await
    .ok()
}

/// Read and decode the next signaling frame (5s timeout).
pub async fn ws_read_signal(stream: &mut WsStream) -> SignalFrame {
    let text = ws_read_text(stream).await;
    decode_signal(&text).unwrap()
}
