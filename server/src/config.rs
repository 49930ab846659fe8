//! Server settings read from a flat key-value mapping.
//!
//! The mapping is produced by whatever loads configuration (the binary builds
//! it from command-line overrides). Every key has a default, so an empty map
//! yields a usable configuration.

use crate::error::ConfigError;
use log::warn;
use shared::{DEFAULT_PORT, DEFAULT_TICK_RATE, PLAYER_ID_LIMIT};
use std::collections::HashMap;
use std::str::FromStr;
use std::time::Duration;

pub const KEY_IP: &str = "ip";
pub const KEY_PORT: &str = "port";
pub const KEY_VERSION: &str = "version";
pub const KEY_TICK_RATE: &str = "tickRate";
pub const KEY_SERVER_PLAYER_DATA: &str = "serverPlayerData";
pub const KEY_MAX_PLAYERS: &str = "maxPlayers";
pub const KEY_WORLD_SEED: &str = "worldSeed";
pub const KEY_HANDSHAKE_TIMEOUT: &str = "handshakeTimeout";
pub const KEY_SLOW_TICK_THRESHOLD: &str = "slowTickThreshold";
pub const KEY_SPEED: &str = "speed";
pub const KEY_STARTING_ITEMS: &str = "startingItems";
pub const KEY_DB_IP: &str = "dbip";
pub const KEY_DB_PORT: &str = "dbport";
pub const KEY_DB_USER: &str = "dbuser";
pub const KEY_DB_PASSWORD: &str = "dbpassword";

const KNOWN_KEYS: [&str; 15] = [
    KEY_IP,
    KEY_PORT,
    KEY_VERSION,
    KEY_TICK_RATE,
    KEY_SERVER_PLAYER_DATA,
    KEY_MAX_PLAYERS,
    KEY_WORLD_SEED,
    KEY_HANDSHAKE_TIMEOUT,
    KEY_SLOW_TICK_THRESHOLD,
    KEY_SPEED,
    KEY_STARTING_ITEMS,
    KEY_DB_IP,
    KEY_DB_PORT,
    KEY_DB_USER,
    KEY_DB_PASSWORD,
];

/// Connection settings for the external record store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordStoreSettings {
    /// Record store host
    pub ip: String,
    /// Record store port
    pub port: u16,
    /// Record store user name
    pub user: String,
    /// Never logged; only its length is
    pub password: String,
}

/// Everything the server reads at startup.
#[derive(Debug, Clone, PartialEq)]
pub struct ServerConfig {
    /// Address the listener binds to
    pub ip: String,
    /// Listener port; zero picks a free one
    pub port: u16,
    /// Compared verbatim against the version each client sends.
    pub version: String,
    /// Simulation ticks per second
    pub tick_rate: u32,
    /// Send full player state on connect instead of a bare identity.
    pub server_player_data: bool,
    /// Requested player slots, capped by the identity namespace
    pub max_players: u32,
    /// Seed for chunk generation
    pub world_seed: u64,
    /// How long an identity stays reserved for a peer that has not joined.
    pub handshake_timeout: Duration,
    /// Ticks slower than this are logged
    pub slow_tick_threshold: Duration,
    /// Simulation speed multiplier; zero pauses the tick.
    pub speed: f32,
    /// Items generated for each player in server-data mode
    pub starting_items: usize,
    /// Where player records are kept
    pub record_store: RecordStoreSettings,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            ip: "127.0.0.1".to_string(),
            port: DEFAULT_PORT,
            version: env!("CARGO_PKG_VERSION").to_string(),
            tick_rate: DEFAULT_TICK_RATE,
            server_player_data: true,
            max_players: 10,
            world_seed: 50,
            handshake_timeout: Duration::from_secs(30),
            slow_tick_threshold: Duration::from_secs(1),
            speed: 1.0,
            starting_items: 40,
            record_store: RecordStoreSettings {
                ip: "127.0.0.1".to_string(),
                port: 3306,
                user: "user".to_string(),
                password: "password".to_string(),
            },
        }
    }
}

impl ServerConfig {
    /// Builds a configuration from `vars`, falling back to defaults for
    /// missing keys. Unknown keys are logged and ignored.
    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self, ConfigError> {
        for key in vars.keys() {
            if !KNOWN_KEYS.contains(&key.as_str()) {
                warn!("Ignoring unknown server variable '{}'", key);
            }
        }

        let defaults = ServerConfig::default();
        let tick_rate: u32 = parse_or(vars, KEY_TICK_RATE, defaults.tick_rate)?;
        if tick_rate == 0 {
            return Err(invalid(KEY_TICK_RATE, "0"));
        }
        let speed: f32 = parse_or(vars, KEY_SPEED, defaults.speed)?;
        if !speed.is_finite() || speed < 0.0 {
            return Err(invalid(KEY_SPEED, &speed.to_string()));
        }

        Ok(Self {
            ip: string_or(vars, KEY_IP, &defaults.ip),
            port: parse_or(vars, KEY_PORT, defaults.port)?,
            version: string_or(vars, KEY_VERSION, &defaults.version),
            tick_rate,
            server_player_data: parse_or(
                vars,
                KEY_SERVER_PLAYER_DATA,
                defaults.server_player_data,
            )?,
            max_players: parse_or(vars, KEY_MAX_PLAYERS, defaults.max_players)?,
            world_seed: parse_or(vars, KEY_WORLD_SEED, defaults.world_seed)?,
            handshake_timeout: Duration::from_secs(parse_or(
                vars,
                KEY_HANDSHAKE_TIMEOUT,
                defaults.handshake_timeout.as_secs(),
            )?),
            slow_tick_threshold: Duration::from_millis(parse_or(
                vars,
                KEY_SLOW_TICK_THRESHOLD,
                defaults.slow_tick_threshold.as_millis() as u64,
            )?),
            speed,
            starting_items: parse_or(vars, KEY_STARTING_ITEMS, defaults.starting_items)?,
            record_store: RecordStoreSettings {
                ip: string_or(vars, KEY_DB_IP, &defaults.record_store.ip),
                port: parse_or(vars, KEY_DB_PORT, defaults.record_store.port)?,
                user: string_or(vars, KEY_DB_USER, &defaults.record_store.user),
                password: string_or(vars, KEY_DB_PASSWORD, &defaults.record_store.password),
            },
        })
    }

    /// Size of the player identity namespace.
    pub fn player_limit(&self) -> u32 {
        self.max_players.min(PLAYER_ID_LIMIT)
    }

    /// Address string for the listener, `ip:port`.
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.ip, self.port)
    }

    /// Wall-clock length of one tick.
    pub fn tick_duration(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.tick_rate as f64)
    }
}

/// Parses `key=value` pairs into a variable map. Later pairs win.
pub fn parse_overrides<I, S>(pairs: I) -> Result<HashMap<String, String>, ConfigError>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut vars = HashMap::new();
    for pair in pairs {
        let pair = pair.as_ref();
        match pair.split_once('=') {
            Some((key, value)) if !key.trim().is_empty() => {
                vars.insert(key.trim().to_string(), value.trim().to_string());
            }
            _ => return Err(invalid(pair, "")),
        }
    }
    Ok(vars)
}

fn string_or(vars: &HashMap<String, String>, key: &str, default: &str) -> String {
    vars.get(key)
        .cloned()
        .unwrap_or_else(|| default.to_string())
}

fn parse_or<T: FromStr>(
    vars: &HashMap<String, String>,
    key: &str,
    default: T,
) -> Result<T, ConfigError> {
    match vars.get(key) {
        Some(value) => value.trim().parse().map_err(|_| invalid(key, value)),
        None => Ok(default),
    }
}

fn invalid(key: &str, value: &str) -> ConfigError {
    ConfigError::InvalidValue {
        key: key.to_string(),
        value: value.to_string(),
    }
}
