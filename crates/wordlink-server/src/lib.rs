pub mod config;
pub mod health;
pub mod rate_limit;
pub mod room_registry;
pub mod state;
pub mod ws;

use std::time::Duration;

use axum::Router;

use config::ServerConfig;
use state::AppState;

/// Build the Axum router and application state from a config.
pub fn build_app(config: ServerConfig) -> (Router<()>, AppState) {
    let state = AppState::new(config);

    let app = Router::new()
        .route("/ws", axum::routing::get(ws::ws_handler))
        .route("/health", axum::routing::get(health::health_check))
        .with_state(state.clone());

    (app, state)
}

/// Background task that periodically drops idle rooms and expired held seats.
pub fn spawn_room_reaper(state: AppState) -> tokio::task::JoinHandle<()> {
    let interval = Duration::from_secs(state.config.rooms.idle_check_interval_secs);
    let max_idle = Duration::from_secs(state.config.rooms.idle_timeout_secs);

    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        // The first tick completes immediately
        ticker.tick().await;
        loop {
            ticker.tick().await;
            let mut rooms = state.rooms.write().await;
            let expired = rooms.cleanup_expired_sessions();
            let idle = rooms.cleanup_idle_rooms(max_idle);
            drop(rooms);
            if expired > 0 || idle > 0 {
                tracing::info!(expired, idle, "Reaped rooms and seats");
            }
        }
    })
}
