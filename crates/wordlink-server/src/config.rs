use std::time::Duration;

use serde::Deserialize;

use wordlink_core::room::{ReconnectPolicy, RoomConfig};

/// Top-level server configuration, loaded from `wordlink.toml`.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub listen_addr: String,
    pub limits: LimitsConfig,
    pub rooms: RoomsConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0:8080".to_string(),
            limits: LimitsConfig::default(),
            rooms: RoomsConfig::default(),
        }
    }
}

/// Infrastructure limits (connection caps, buffer sizes, rate limits).
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LimitsConfig {
    pub max_ws_connections: usize,
    /// Signaling frames per second per socket, also the burst size.
    pub ws_rate_limit_per_sec: f64,
    /// Outbound frames buffered per participant before sends are skipped.
    pub player_message_buffer: usize,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_ws_connections: 200,
            ws_rate_limit_per_sec: 50.0,
            player_message_buffer: 256,
        }
    }
}

/// Room lifecycle configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RoomsConfig {
    pub max_players: u8,
    pub reconnect: ReconnectPolicy,
    /// How long a dropped seat is held under `reclaim-seat`.
    pub session_ttl_secs: u64,
    pub idle_timeout_secs: u64,
    pub idle_check_interval_secs: u64,
}

impl Default for RoomsConfig {
    fn default() -> Self {
        Self {
            max_players: 2,
            reconnect: ReconnectPolicy::Disabled,
            session_ttl_secs: 60,
            idle_timeout_secs: 3600,
            idle_check_interval_secs: 60,
        }
    }
}

impl RoomsConfig {
    pub fn room_config(&self) -> RoomConfig {
        RoomConfig {
            max_players: self.max_players,
            reconnect: self.reconnect,
            session_ttl: Duration::from_secs(self.session_ttl_secs),
        }
    }
}

/// A configuration value that the server cannot run with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    InvalidListenAddr(String),
    /// A field that must be strictly positive was not.
    NotPositive(&'static str),
    /// A room needs seats for a host and at least one guest.
    TooFewPlayers(u8),
    Parse(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidListenAddr(addr) => {
                write!(f, "listen_addr is not a valid socket address: {addr}")
            },
            Self::NotPositive(field) => write!(f, "{field} must be > 0"),
            Self::TooFewPlayers(n) => write!(f, "rooms.max_players must be at least 2, got {n}"),
            Self::Parse(e) => write!(f, "Failed to parse config: {e}"),
        }
    }
}

impl std::error::Error for ConfigError {}

impl ServerConfig {
    /// Check the configuration, returning the first problem found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.listen_addr.parse::<std::net::SocketAddr>().is_err() {
            return Err(ConfigError::InvalidListenAddr(self.listen_addr.clone()));
        }

        if self.limits.max_ws_connections == 0 {
            return Err(ConfigError::NotPositive("limits.max_ws_connections"));
        }
        if self.limits.ws_rate_limit_per_sec <= 0.0 {
            return Err(ConfigError::NotPositive("limits.ws_rate_limit_per_sec"));
        }
        if self.limits.player_message_buffer == 0 {
            return Err(ConfigError::NotPositive("limits.player_message_buffer"));
        }

        if self.rooms.max_players < 2 {
            return Err(ConfigError::TooFewPlayers(self.rooms.max_players));
        }
        if self.rooms.idle_timeout_secs == 0 {
            return Err(ConfigError::NotPositive("rooms.idle_timeout_secs"));
        }
        if self.rooms.idle_check_interval_secs == 0 {
            return Err(ConfigError::NotPositive("rooms.idle_check_interval_secs"));
        }
        if self.rooms.reconnect == ReconnectPolicy::ReclaimSeat && self.rooms.session_ttl_secs == 0
        {
            return Err(ConfigError::NotPositive("rooms.session_ttl_secs"));
        }
        Ok(())
    }

    /// Parse a TOML document. Missing sections fall back to defaults.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        toml::from_str(content).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Load config from `wordlink.toml` if it exists, then apply env var overrides.
    pub fn load() -> Self {
        let mut config = match std::fs::read_to_string("wordlink.toml") {
            Ok(content) => match Self::from_toml(&content) {
                Ok(cfg) => {
                    tracing::info!("Loaded configuration from wordlink.toml");
                    cfg
                },
                Err(e) => {
                    tracing::warn!("{e}, using defaults");
                    ServerConfig::default()
                },
            },
            Err(_) => {
                tracing::info!("No wordlink.toml found, using defaults");
                ServerConfig::default()
            },
        };
        config.apply_env_overrides(|key| std::env::var(key).ok());
        config
    }

    /// Apply `WORDLINK_*` overrides. `lookup` is `std::env::var` in production.
    pub fn apply_env_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(addr) = lookup("WORDLINK_LISTEN_ADDR")
            && !addr.is_empty()
        {
            self.listen_addr = addr;
        }
        if let Some(val) = lookup("WORDLINK_MAX_WS_CONNECTIONS")
            && let Ok(n) = val.parse::<usize>()
        {
            self.limits.max_ws_connections = n;
        }
        if let Some(val) = lookup("WORDLINK_WS_RATE_LIMIT")
            && let Ok(n) = val.parse::<f64>()
        {
            self.limits.ws_rate_limit_per_sec = n;
        }
        if let Some(val) = lookup("WORDLINK_RECONNECT") {
            match val.as_str() {
                "disabled" => self.rooms.reconnect = ReconnectPolicy::Disabled,
                "reclaim-seat" => self.rooms.reconnect = ReconnectPolicy::ReclaimSeat,
                other => tracing::warn!(value = other, "Ignoring unknown WORDLINK_RECONNECT"),
            }
        }
        if let Some(val) = lookup("WORDLINK_SESSION_TTL_SECS")
            && let Ok(n) = val.parse::<u64>()
        {
            self.rooms.session_ttl_secs = n;
        }
    }
}
