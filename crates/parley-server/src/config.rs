use std::fs;
use std::str::FromStr;
use std::time::Duration;

use anyhow::Result;
use parley_core::access::AccessConfig as CoreAccessConfig;
use parley_core::{AppConfig, GatewayConfig as CoreGatewayConfig};
use serde::{Deserialize, Serialize};

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub gateway: GatewayConfig,
    #[serde(default)]
    pub access: AccessConfig,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
        }
    }
}

#[derive(Debug, Deserialize, Serialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_database_url")]
    pub url: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: default_database_url(),
            max_connections: default_max_connections(),
        }
    }
}

#[derive(Debug, Deserialize, Serialize)]
pub struct GatewayConfig {
    #[serde(default = "default_handshake_timeout_secs")]
    pub handshake_timeout_secs: u64,
    #[serde(default = "default_outbox_capacity")]
    pub outbox_capacity: usize,
    #[serde(default = "default_max_message_length")]
    pub max_message_length: usize,
    #[serde(default = "default_max_messages_per_minute")]
    pub max_messages_per_minute: u32,
    #[serde(default = "default_max_connections_per_user")]
    pub max_connections_per_user: usize,
    /// Distinguishes message ids minted by different server instances.
    #[serde(default)]
    pub worker_id: u16,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            handshake_timeout_secs: default_handshake_timeout_secs(),
            outbox_capacity: default_outbox_capacity(),
            max_message_length: default_max_message_length(),
            max_messages_per_minute: default_max_messages_per_minute(),
            max_connections_per_user: default_max_connections_per_user(),
            worker_id: 0,
        }
    }
}

#[derive(Debug, Deserialize, Serialize)]
pub struct AccessConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Only enable behind a reverse proxy that sets `X-Forwarded-For`.
    #[serde(default)]
    pub trust_forwarded_for: bool,
    #[serde(default = "default_cache_ttl_secs")]
    pub cache_ttl_secs: u64,
}

impl Default for AccessConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            trust_forwarded_for: false,
            cache_ttl_secs: default_cache_ttl_secs(),
        }
    }
}

fn default_bind_address() -> String {
    "0.0.0.0:8080".into()
}
fn default_database_url() -> String {
    "sqlite://./data/parley.db?mode=rwc".into()
}
fn default_max_connections() -> u32 {
    5
}
fn default_handshake_timeout_secs() -> u64 {
    10
}
fn default_outbox_capacity() -> usize {
    256
}
fn default_max_message_length() -> usize {
    4000
}
fn default_max_messages_per_minute() -> u32 {
    240
}
fn default_max_connections_per_user() -> usize {
    5
}
fn default_true() -> bool {
    true
}
fn default_cache_ttl_secs() -> u64 {
    300
}

/// Parses `name` into `target`; unparsable values are logged and ignored.
fn env_override<T: FromStr>(name: &str, target: &mut T) {
    let Ok(value) = std::env::var(name) else {
        return;
    };
    match value.trim().parse::<T>() {
        Ok(parsed) => *target = parsed,
        Err(_) => tracing::warn!("Ignoring invalid {} value '{}'", name, value),
    }
}

impl Config {
    /// Reads `path`, writing a default config there first if it does not
    /// exist, then applies `PARLEY_*` environment overrides.
    pub fn load(path: &str) -> Result<Self> {
        let mut config = if std::path::Path::new(path).exists() {
            let content = fs::read_to_string(path)?;
            toml::from_str(&content)?
        } else {
            tracing::info!(
                "Config file not found at '{}', generating defaults...",
                path
            );
            let config = Config::default();
            if let Some(parent) = std::path::Path::new(path).parent() {
                fs::create_dir_all(parent)?;
            }
            fs::write(path, toml::to_string_pretty(&config)?)?;
            tracing::info!("Generated default config at '{}'", path);
            config
        };

        config.apply_env_overrides();
        Ok(config)
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(value) = std::env::var("PARLEY_BIND_ADDRESS") {
            self.server.bind_address = value;
        }
        if let Ok(value) = std::env::var("PARLEY_DATABASE_URL") {
            self.database.url = value;
        }
        env_override(
            "PARLEY_DATABASE_MAX_CONNECTIONS",
            &mut self.database.max_connections,
        );
        env_override(
            "PARLEY_HANDSHAKE_TIMEOUT_SECS",
            &mut self.gateway.handshake_timeout_secs,
        );
        env_override("PARLEY_OUTBOX_CAPACITY", &mut self.gateway.outbox_capacity);
        env_override(
            "PARLEY_MAX_MESSAGE_LENGTH",
            &mut self.gateway.max_message_length,
        );
        env_override(
            "PARLEY_MAX_MESSAGES_PER_MINUTE",
            &mut self.gateway.max_messages_per_minute,
        );
        env_override(
            "PARLEY_MAX_CONNECTIONS_PER_USER",
            &mut self.gateway.max_connections_per_user,
        );
        env_override("PARLEY_WORKER_ID", &mut self.gateway.worker_id);
        env_override("PARLEY_ACCESS_ENABLED", &mut self.access.enabled);
        env_override(
            "PARLEY_TRUST_FORWARDED_FOR",
            &mut self.access.trust_forwarded_for,
        );
        env_override("PARLEY_ACCESS_CACHE_TTL_SECS", &mut self.access.cache_ttl_secs);
    }

    /// Runtime settings, with every limit clamped to at least 1.
    pub fn app_config(&self) -> AppConfig {
        let gateway = &self.gateway;
        AppConfig {
            gateway: CoreGatewayConfig {
                handshake_timeout: Duration::from_secs(gateway.handshake_timeout_secs.max(1)),
                outbox_capacity: gateway.outbox_capacity.max(1),
                max_message_length: gateway.max_message_length.max(1),
                max_messages_per_minute: gateway.max_messages_per_minute.max(1),
                max_connections_per_user: gateway.max_connections_per_user.max(1),
            },
            access: CoreAccessConfig {
                enabled: self.access.enabled,
                trust_forwarded_for: self.access.trust_forwarded_for,
                cache_ttl: Duration::from_secs(self.access.cache_ttl_secs.max(1)),
            },
            worker_id: gateway.worker_id,
        }
    }
}
