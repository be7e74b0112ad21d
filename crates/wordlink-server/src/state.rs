use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use tokio::sync::RwLock;

use crate::config::ServerConfig;
use crate::room_registry::RoomRegistry;

pub type SharedRoomRegistry = Arc<RwLock<RoomRegistry>>;

#[derive(Clone)]
pub struct AppState {
    pub rooms: SharedRoomRegistry,
    pub config: Arc<ServerConfig>,
    pub ws_connection_count: Arc<AtomicUsize>,
}

impl AppState {
    pub fn new(config: ServerConfig) -> Self {
        let registry = RoomRegistry::new(config.rooms.room_config());
        Self {
            rooms: Arc::new(RwLock::new(registry)),
            config: Arc::new(config),
            ws_connection_count: Arc::new(AtomicUsize::new(0)),
        }
    }
}

/// Counts an open WebSocket for as long as it lives.
pub struct ConnectionGuard {
    count: Arc<AtomicUsize>,
}

impl ConnectionGuard {
    pub fn new(count: Arc<AtomicUsize>) -> Self {
        count.fetch_add(1, Ordering::Relaxed);
        Self { count }
    }
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.count.fetch_sub(1, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn guard_tracks_live_connections() {
        let count = Arc::new(AtomicUsize::new(0));
        let a = ConnectionGuard::new(Arc::clone(&count));
        let b = ConnectionGuard::new(Arc::clone(&count));
        assert_eq!(count.load(Ordering::Relaxed), 2);
        drop(a);
        assert_eq!(count.load(Ordering::Relaxed), 1);
        drop(b);
        assert_eq!(count.load(Ordering::Relaxed), 0);
    }
}
