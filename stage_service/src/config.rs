//! Configuration Management
//!
//! Provides application configuration as a singleton using `OnceLock`.
//! Configuration values are read from environment variables with sensible defaults.
//!
//! ## Configuration Variables
//!
//! - `DATABASE_URL`: SQLite database URL (default: `sqlite://apigateway.db`)
//! - `BIND_ADDRESS`: HTTP server bind address (default: `0.0.0.0:3000`)
//! - `DATABASE_MAX_CONNECTIONS`: Pool size (default: `5`)
//! - `MAX_STAGE_COUNT_PER_GATEWAY`: Stage quota per gateway (default: `10`)
//! - `DEFAULT_LANGUAGE`: Language used when a request does not ask for one (default: `zh`)

use std::env;
use std::str::FromStr;
use std::sync::OnceLock;

use crate::i18n::Lang;

static CONFIG: OnceLock<Config> = OnceLock::new();

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub bind_address: String,
    pub database_max_connections: u32,
    pub max_stage_count_per_gateway: i64,
    pub default_language: Lang,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_url: "sqlite://apigateway.db".to_string(),
            bind_address: "0.0.0.0:3000".to_string(),
            database_max_connections: 5,
            max_stage_count_per_gateway: 10,
            default_language: Lang::Zh,
        }
    }
}

impl Config {
    /// Initialize the global config (can only be called once)
    pub fn init() -> &'static Config {
        CONFIG.get_or_init(Config::from_env)
    }

    /// Defaults overridden by whatever is set in the environment.
    /// Unparseable numeric values are ignored with a warning.
    pub fn from_env() -> Self {
        let mut config = Config::default();

        if let Ok(url) = env::var("DATABASE_URL") {
            config.database_url = url;
        }
        if let Ok(addr) = env::var("BIND_ADDRESS") {
            config.bind_address = addr;
        }
        if let Some(n) = parse_var("DATABASE_MAX_CONNECTIONS") {
            config.database_max_connections = n;
        }
        if let Some(n) = parse_var("MAX_STAGE_COUNT_PER_GATEWAY") {
            config.max_stage_count_per_gateway = n;
        }
        if let Ok(lang) = env::var("DEFAULT_LANGUAGE") {
            config.default_language = Lang::from_tag(&lang).unwrap_or(config.default_language);
        }

        config
    }

    pub fn with_max_stage_count(mut self, max: i64) -> Self {
        self.max_stage_count_per_gateway = max;
        self
    }
}

fn parse_var<T: FromStr>(key: &str) -> Option<T> {
    let raw = env::var(key).ok()?;
    match raw.parse() {
        Ok(value) => Some(value),
        Err(_) => {
            tracing::warn!(key, value = raw.as_str(), "Ignoring invalid configuration value");
            None
        }
    }
}
