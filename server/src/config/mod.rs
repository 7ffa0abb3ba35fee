use serde::Deserialize;
use std::fs;
use std::path::Path;
use std::time::Duration;

use crate::db::connection::{ConnectionSettings, ReconnectPolicy};
use crate::error::{AppError, Result};
use crate::middleware::auth::VerifierSettings;

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub environment: Environment,
    pub server: HttpConfig,
    pub database: DatabaseConfig,
    pub auth: AuthConfig,
}

#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    #[default]
    Development,
    Test,
    Production,
}

impl Environment {
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "production" | "prod" => Environment::Production,
            "test" => Environment::Test,
            _ => Environment::Development,
        }
    }

    pub fn is_production(self) -> bool {
        self == Environment::Production
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    pub host: String,
    pub port: u16,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 5000,
        }
    }
}

#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum ReconnectStrategy {
    #[default]
    Fixed,
    Exponential,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub uri: String,
    pub name: String,
    pub connect_timeout_ms: u64,
    pub socket_timeout_ms: u64,
    pub heartbeat_interval_ms: u64,
    pub reconnect_strategy: ReconnectStrategy,
    pub reconnect_delay_ms: u64,
    pub max_reconnect_delay_ms: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            uri: "mongodb://localhost:27017".to_string(),
            name: "community".to_string(),
            connect_timeout_ms: 10_000,
            socket_timeout_ms: 45_000,
            heartbeat_interval_ms: 10_000,
            reconnect_strategy: ReconnectStrategy::Fixed,
            reconnect_delay_ms: 5_000,
            max_reconnect_delay_ms: 30_000,
        }
    }
}

impl DatabaseConfig {
    pub fn reconnect_policy(&self) -> ReconnectPolicy {
        let delay = Duration::from_millis(self.reconnect_delay_ms);
        match self.reconnect_strategy {
            ReconnectStrategy::Fixed => ReconnectPolicy::Fixed(delay),
            ReconnectStrategy::Exponential => ReconnectPolicy::Exponential {
                initial: delay,
                max: Duration::from_millis(self.max_reconnect_delay_ms),
            },
        }
    }

    pub fn connection_settings(&self) -> ConnectionSettings {
        ConnectionSettings {
            reconnect: self.reconnect_policy(),
            heartbeat_interval: Duration::from_millis(self.heartbeat_interval_ms),
        }
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn socket_timeout(&self) -> Duration {
        Duration::from_millis(self.socket_timeout_ms)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    pub jwt_secret: Option<String>,
    pub token_ttl_secs: u64,
    pub cache_ttl_ms: u64,
    pub cache_prune_threshold: usize,
    pub log_throttle_ms: u64,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            jwt_secret: None,
            token_ttl_secs: 360_000,
            cache_ttl_ms: 30_000,
            cache_prune_threshold: 100,
            log_throttle_ms: 10_000,
        }
    }
}

impl AuthConfig {
    pub fn token_ttl(&self) -> Duration {
        Duration::from_secs(self.token_ttl_secs)
    }

    pub fn verifier_settings(&self) -> VerifierSettings {
        VerifierSettings {
            cache_ttl_ms: self.cache_ttl_ms,
            prune_threshold: self.cache_prune_threshold,
            log_throttle_ms: self.log_throttle_ms,
        }
    }
}

impl AppConfig {
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path)
            .map_err(|e| AppError::Config(format!("Failed to read config file: {}", e)))?;

        let config: AppConfig = toml::from_str(&content)
            .map_err(|e| AppError::Config(format!("Failed to parse config file: {}", e)))?;

        Ok(config)
    }

    /// Defaults (or `CONFIG_PATH` when set) overlaid with process environment.
    pub fn from_env() -> Result<Self> {
        let mut config = match std::env::var("CONFIG_PATH") {
            Ok(path) => Self::load_from_file(path)?,
            Err(_) => Self::default(),
        };
        config.apply_env();
        Ok(config)
    }

    pub fn apply_env(&mut self) {
        if let Ok(env) = std::env::var("APP_ENV") {
            self.environment = Environment::parse(&env);
        }
        if let Ok(host) = std::env::var("SERVER_HOST") {
            self.server.host = host;
        }
        if let Some(port) = env_parse("SERVER_PORT") {
            self.server.port = port;
        }
        if let Ok(uri) = std::env::var("MONGODB_URI") {
            self.database.uri = uri;
        }
        if let Ok(name) = std::env::var("DATABASE_NAME") {
            self.database.name = name;
        }
        if let Ok(strategy) = std::env::var("DB_RECONNECT_STRATEGY") {
            self.database.reconnect_strategy = match strategy.to_ascii_lowercase().as_str() {
                "exponential" => ReconnectStrategy::Exponential,
                _ => ReconnectStrategy::Fixed,
            };
        }
        if let Some(delay) = env_parse("DB_RECONNECT_DELAY_MS") {
            self.database.reconnect_delay_ms = delay;
        }
        if let Ok(secret) = std::env::var("JWT_SECRET") {
            self.auth.jwt_secret = Some(secret).filter(|s| !s.is_empty());
        }
        if let Some(ttl) = env_parse("TOKEN_TTL_SECS") {
            self.auth.token_ttl_secs = ttl;
        }
    }

    pub fn verbose_errors(&self) -> bool {
        !self.environment.is_production()
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|s| s.parse().ok())
}
