use std::sync::Arc;
use std::sync::atomic::Ordering;

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{State, WebSocketUpgrade};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;

use wordlink_core::identity::ConnectionId;
use wordlink_core::net::messages::{
    ErrorKind, ErrorMsg, JoinRoomMsg, SignalFrame, SignalMessage, WelcomeMsg,
};
use wordlink_core::net::protocol::{MAX_MESSAGE_SIZE, decode_signal, encode_signal};
use wordlink_core::room::{ReconnectPolicy, normalize_room_code};

use crate::rate_limit::TokenBucket;
use crate::room_registry::{ParticipantSender, RoomError};
use crate::state::{AppState, ConnectionGuard};

pub async fn ws_handler(
    State(state): State<AppState>,
    ws: WebSocketUpgrade,
) -> Result<axum::response::Response, StatusCode> {
    let max_ws = state.config.limits.max_ws_connections;
    let current = state.ws_connection_count.load(Ordering::Relaxed);
    if current >= max_ws {
        tracing::warn!(current, max = max_ws, "WS connection limit reached");
        return Err(StatusCode::SERVICE_UNAVAILABLE);
    }

    Ok(ws
        .max_message_size(MAX_MESSAGE_SIZE)
        .on_upgrade(move |socket| handle_socket(socket, state))
        .into_response())
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    let _guard = ConnectionGuard::new(Arc::clone(&state.ws_connection_count));
    let (ws_sender, mut ws_receiver) = socket.split();

    let identity = ConnectionId::new();
    let (tx, rx) = mpsc::channel::<String>(state.config.limits.player_message_buffer);
    spawn_writer(ws_sender, rx);

    send_frame(
        &tx,
        &SignalFrame::new(SignalMessage::Welcome(WelcomeMsg { identity })),
    );
    tracing::info!(%identity, "Signaling connection opened");

    read_loop(&mut ws_receiver, &state, identity, &tx).await;

    // Socket gone: release or hold the seat.
    let mut rooms = state.rooms.write().await;
    if let Some(code) = rooms.room_of(identity).map(str::to_string) {
        let outcome = rooms.disconnect(&code, identity);
        tracing::info!(%identity, room_code = %code, ?outcome, "Participant disconnected");
    }
    drop(rooms);

    tracing::info!(%identity, "Signaling connection closed");
}

fn spawn_writer(
    mut ws_sender: futures::stream::SplitSink<WebSocket, Message>,
    mut rx: mpsc::Receiver<String>,
) {
    tokio::spawn(async move {
        while let Some(text) = rx.recv().await {
            if ws_sender.send(Message::Text(text.into())).await.is_err() {
                break;
            }
        }
    });
}

fn send_frame(tx: &ParticipantSender, frame: &SignalFrame) {
    match encode_signal(frame) {
        Ok(text) => {
            if let Err(e) = tx.try_send(text) {
                tracing::debug!(error = %e, "Dropping reply to slow client");
            }
        },
        Err(e) => tracing::warn!(error = %e, "Failed to encode signaling frame"),
    }
}

fn send_error(tx: &ParticipantSender, kind: ErrorKind, message: impl Into<String>) {
    let frame = SignalFrame::new(SignalMessage::Error(ErrorMsg {
        kind,
        message: message.into(),
    }));
    send_frame(tx, &frame);
}

async fn read_loop(
    ws_receiver: &mut futures::stream::SplitStream<WebSocket>,
    state: &AppState,
    identity: ConnectionId,
    tx: &ParticipantSender,
) {
    let rate = state.config.limits.ws_rate_limit_per_sec;
    let mut rate_limiter = TokenBucket::new(rate, rate);

    while let Some(Ok(msg)) = ws_receiver.next().await {
        let text = match msg {
            Message::Text(t) => t,
            Message::Binary(_) => {
                tracing::debug!(%identity, "Ignoring binary frame on signaling socket");
                continue;
            },
            Message::Close(_) => break,
            _ => continue,
        };

        // Rate limit: drop frames that exceed the per-connection rate
        if !rate_limiter.allow() {
            tracing::warn!(%identity, "Rate limited");
            continue;
        }

        if text.len() > MAX_MESSAGE_SIZE {
            continue;
        }

        let frame = match decode_signal(text.as_str()) {
            Ok(f) => f,
            Err(e) => {
                tracing::debug!(%identity, error = %e, "Malformed signaling frame");
                send_error(tx, ErrorKind::BadRequest, e.to_string());
                continue;
            },
        };

        let msg_type = frame.message.message_type();
        if msg_type.is_server_only() {
            tracing::warn!(%identity, ?msg_type, "Rejected server-only message from client");
            continue;
        }

        match frame.message {
            SignalMessage::JoinRoom(join) => {
                handle_join(state, identity, frame.room_code.as_deref(), &join, tx).await;
            },
            SignalMessage::Offer(mut sdp) => {
                sdp.from = Some(identity);
                relay(state, identity, SignalMessage::Offer(sdp), tx).await;
            },
            SignalMessage::Answer(mut sdp) => {
                sdp.from = Some(identity);
                relay(state, identity, SignalMessage::Answer(sdp), tx).await;
            },
            SignalMessage::IceCandidate(mut ice) => {
                ice.from = Some(identity);
                relay(state, identity, SignalMessage::IceCandidate(ice), tx).await;
            },
            SignalMessage::Leave(_) => {
                let mut rooms = state.rooms.write().await;
                if let Some(code) = rooms.room_of(identity).map(str::to_string) {
                    let outcome = rooms.leave_room(&code, identity);
                    tracing::info!(%identity, room_code = %code, ?outcome, "Leave requested");
                } else {
                    tracing::debug!(%identity, "Leave without a room");
                }
            },
            _ => {},
        }
    }
}

/// Create, join, or reclaim a seat. Errors go to the requester only.
async fn handle_join(
    state: &AppState,
    identity: ConnectionId,
    room_code: Option<&str>,
    join: &JoinRoomMsg,
    tx: &ParticipantSender,
) {
    let code = room_code
        .map(normalize_room_code)
        .filter(|c| !c.is_empty());

    let mut rooms = state.rooms.write().await;

    // Try taking back a held seat first
    if let Some(token) = join.session_token.as_deref()
        && rooms.config().reconnect == ReconnectPolicy::ReclaimSeat
    {
        match rooms.reclaim_seat(token, identity, tx.clone()) {
            Ok(outcome) => {
                tracing::info!(
                    %identity,
                    room_code = %outcome.room_code,
                    index = outcome.your_index,
                    "Participant reclaimed seat"
                );
                return;
            },
            Err(e) => {
                tracing::debug!(%identity, error = %e, "Seat reclaim failed, trying normal join");
            },
        }
    }

    let result = match code.as_deref() {
        None if join.role.is_host() => {
            rooms.create_room(identity, &join.display_name, tx.clone())
        },
        None => Err(RoomError::CodeRequired),
        Some(code) => {
            rooms.join_or_create(code, identity, &join.display_name, join.role, tx.clone())
        },
    };
    drop(rooms);

    if let Err(e) = result {
        tracing::info!(%identity, error = %e, "Join rejected");
        send_frame(tx, &e.to_frame());
    }
}

/// Forward a negotiation message to the rest of the sender's room.
async fn relay(
    state: &AppState,
    identity: ConnectionId,
    message: SignalMessage,
    tx: &ParticipantSender,
) {
    let mut rooms = state.rooms.write().await;
    let Some(code) = rooms.room_of(identity).map(str::to_string) else {
        drop(rooms);
        send_error(tx, ErrorKind::BadRequest, "Join a room before negotiating");
        return;
    };
    rooms.touch_activity(&code);

    let msg_type = message.message_type();
    match encode_signal(&SignalFrame::in_room(&code, message)) {
        Ok(text) => {
            let delivered = rooms.relay_to_others(&code, identity, &text);
            tracing::debug!(%identity, room_code = %code, ?msg_type, delivered, "Relayed");
        },
        Err(e) => tracing::warn!(%identity, error = %e, "Failed to encode relay"),
    }
}
