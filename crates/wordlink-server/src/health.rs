use std::sync::atomic::Ordering;

use axum::Json;
use axum::extract::State;
use serde::Serialize;

use crate::state::AppState;

/// Structured health check response.
#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub connections: usize,
    pub rooms: RoomInfo,
}

#[derive(Serialize)]
pub struct RoomInfo {
    pub active: usize,
    pub participants: usize,
}

/// Returns server status, open signaling sockets, and room counts as JSON.
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let connections = state.ws_connection_count.load(Ordering::Relaxed);

    let (active, participants) = {
        let rooms = state.rooms.read().await;
        rooms.stats()
    };

    Json(HealthResponse {
        status: "healthy",
        version: env!("CARGO_PKG_VERSION"),
        connections,
        rooms: RoomInfo {
            active,
            participants,
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn health_response_serializes() {
        let resp = HealthResponse {
            status: "healthy",
            version: "0.1.0",
            connections: 5,
            rooms: RoomInfo {
                active: 1,
                participants: 2,
            },
        };
        let json = serde_json::to_string(&resp).unwrap();
        assert!(json.contains("\"healthy\""));
        assert!(json.contains("\"connections\":5"));
        assert!(json.contains("\"participants\":2"));
    }
}
