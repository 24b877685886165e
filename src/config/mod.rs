//! Configuration module - environment variable parsing

use std::env;
use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

use uuid::Uuid;

use crate::game::world::{GameRules, PALETTE};
use crate::game::LobbySettings;

/// Lobby id existing clients connect to
pub const DEFAULT_LOBBY_ID: &str = "9ec2a984-b5bf-4a13-89fd-53c0d9cafef6";

/// Application configuration loaded from environment variables
#[derive(Clone, Debug)]
pub struct Config {
    /// Server binding address
    pub server_addr: SocketAddr,
    /// Log level (trace, debug, info, warn, error)
    pub log_level: String,
    /// Allowed client origins for CORS, comma separated; `*` allows any
    pub client_origin: String,

    /// Rules for lobbies created without overrides
    pub rules: GameRules,

    /// Close a websocket after this long without inbound traffic
    pub idle_timeout: Duration,
    /// Frames queued per connection before it counts as slow
    pub outbound_buffer: usize,
    /// Inbound frames per second accepted per connection
    pub input_rate_limit: u32,

    pub max_lobbies: usize,
    /// How long a FINISHED lobby stays listed
    pub finished_retention: Duration,
    /// Lobbies created at boot
    pub seed_lobbies: Vec<String>,
    /// Id pinned to the first seeded lobby
    pub default_lobby_id: Uuid,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server_addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
            log_level: "info".to_string(),
            client_origin: "*".to_string(),
            rules: GameRules::default(),
            idle_timeout: Duration::from_secs(30),
            outbound_buffer: 16,
            input_rate_limit: 20,
            max_lobbies: 64,
            finished_retention: Duration::from_secs(300),
            seed_lobbies: vec!["Lobby 1".to_string()],
            default_lobby_id: Uuid::parse_str(DEFAULT_LOBBY_ID).unwrap_or_else(|_| Uuid::nil()),
        }
    }
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Config::default();

        // PORT wins (hosted platforms set it), then SERVER_ADDR
        let server_addr = match env::var("PORT") {
            Ok(port) => format!("0.0.0.0:{}", port)
                .parse()
                .map_err(|_| ConfigError::InvalidAddress)?,
            Err(_) => match env::var("SERVER_ADDR") {
                Ok(addr) => addr.parse().map_err(|_| ConfigError::InvalidAddress)?,
                Err(_) => defaults.server_addr,
            },
        };

        let rules = GameRules {
            tick_length: Duration::from_millis(parse_var(
                "TICK_LENGTH_MS",
                defaults.rules.tick_length_millis(),
            )?),
            damage: parse_var("PROJECTILE_DAMAGE", defaults.rules.damage)?,
            travel_distance: parse_var(
                "PROJECTILE_TRAVEL_DISTANCE",
                defaults.rules.travel_distance,
            )?,
            min_players: parse_var("MIN_PLAYERS", defaults.rules.min_players)?,
            max_players: parse_var("MAX_PLAYERS", defaults.rules.max_players)?,
            start_grace: Duration::from_secs(parse_var(
                "START_GRACE_SECS",
                defaults.rules.start_grace.as_secs(),
            )?),
        };

        let seed_lobbies = match env::var("SEED_LOBBIES") {
            Ok(names) => names
                .split(',')
                .map(str::trim)
                .filter(|name| !name.is_empty())
                .map(str::to_string)
                .collect(),
            Err(_) => defaults.seed_lobbies,
        };

        let config = Self {
            server_addr,
            log_level: env::var("LOG_LEVEL").unwrap_or(defaults.log_level),
            client_origin: env::var("CLIENT_ORIGIN").unwrap_or(defaults.client_origin),
            rules,
            idle_timeout: Duration::from_secs(parse_var(
                "IDLE_TIMEOUT_SECS",
                defaults.idle_timeout.as_secs(),
            )?),
            outbound_buffer: parse_var("OUTBOUND_BUFFER", defaults.outbound_buffer)?,
            input_rate_limit: parse_var("INPUT_RATE_LIMIT", defaults.input_rate_limit)?,
            max_lobbies: parse_var("MAX_LOBBIES", defaults.max_lobbies)?,
            finished_retention: Duration::from_secs(parse_var(
                "FINISHED_RETENTION_SECS",
                defaults.finished_retention.as_secs(),
            )?),
            seed_lobbies,
            default_lobby_id: parse_var("DEFAULT_LOBBY_ID", defaults.default_lobby_id)?,
        };

        config.validate()?;
        Ok(config)
    }

    /// Reject combinations the server cannot run with
    pub fn validate(&self) -> Result<(), ConfigError> {
        let rules = &self.rules;
        if rules.tick_length.is_zero() {
            return Err(ConfigError::Invalid("TICK_LENGTH_MS"));
        }
        if rules.damage <= 0 {
            return Err(ConfigError::Invalid("PROJECTILE_DAMAGE"));
        }
        if !(rules.travel_distance.is_finite() && rules.travel_distance > 0.0) {
            return Err(ConfigError::Invalid("PROJECTILE_TRAVEL_DISTANCE"));
        }
        if rules.min_players < 2 {
            return Err(ConfigError::Invalid("MIN_PLAYERS"));
        }
        if rules.max_players < rules.min_players || rules.max_players > PALETTE.len() {
            return Err(ConfigError::Invalid("MAX_PLAYERS"));
        }
        if self.idle_timeout.is_zero() {
            return Err(ConfigError::Invalid("IDLE_TIMEOUT_SECS"));
        }
        if self.outbound_buffer < 2 {
            return Err(ConfigError::Invalid("OUTBOUND_BUFFER"));
        }
        if self.input_rate_limit == 0 {
            return Err(ConfigError::Invalid("INPUT_RATE_LIMIT"));
        }
        if self.max_lobbies == 0 {
            return Err(ConfigError::Invalid("MAX_LOBBIES"));
        }
        Ok(())
    }

    /// Settings for lobbies created from this configuration
    pub fn lobby_settings(&self) -> LobbySettings {
        LobbySettings {
            rules: self.rules.clone(),
            outbound_buffer: self.outbound_buffer,
        }
    }
}

/// Read `name` and parse it, falling back to `default` when unset
fn parse_var<T: FromStr>(name: &'static str, default: T) -> Result<T, ConfigError> {
    match env::var(name) {
        Ok(raw) => raw.trim().parse().map_err(|_| ConfigError::Invalid(name)),
        Err(_) => Ok(default),
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid value for environment variable: {0}")]
    Invalid(&'static str),

    #[error("Invalid server address format")]
    InvalidAddress,
}
