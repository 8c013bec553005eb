//! Application configuration with layered loading.
//!
//! # Configuration Hierarchy
//!
//! Configuration is loaded in this order (later overrides earlier):
//!
//! 1. **Compiled defaults**: `set_default` calls in [`AppConfig::from_file`]
//! 2. **Config file**: TOML file named by the `SUBLIMIT_CONFIG` env var
//! 3. **Environment variables**: `SUBLIMIT__SECTION__FIELD` overrides single fields
//!
//! # Configuration Sections
//!
//! - [`ServerConfig`]: bind address and request limits
//! - [`SigningConfig`]: the message users sign
//! - [`LedgerConfig`]: storage engine and admission strictness
//! - [`PlansConfig`]: plan cache TTL and the trial plan
//! - [`GatewayConfig`]: credential header names and bypassed paths
//! - [`SourcesConfig`]: statically declared plans and subscriptions
//! - [`LoggingConfig`]: log level and format
//!
//! # Example
//!
//! ```toml
//! [signing]
//! message = "I am verifying my ownership of this wallet."
//!
//! [ledger]
//! backend = "sqlite"
//! database_url = "sqlite://./db/ledger.db"
//!
//! [plans]
//! trial_requests_per_minute = 5
//!
//! [[sources.static]]
//! name = "operators"
//!
//! [[sources.static.plans]]
//! name = "pro"
//! requests_per_minute = 60
//! ```

use crate::{
    ledger::window::ONE_DAY,
    plan::{Plan, PlanError},
    source::StaticSourceConfig,
};
use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::{path::Path, time::Duration};

pub const DEFAULT_SIGNING_MESSAGE: &str = "I am verifying my ownership of this wallet.";

/// HTTP server configuration settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// IP address to bind the server to. Defaults to `127.0.0.1`.
    pub bind_address: String,

    /// Port number to listen on. Must be greater than 0. Defaults to `3030`.
    pub bind_port: u16,

    /// Maximum number of requests in flight. Defaults to `100`.
    pub max_concurrent_requests: usize,

    /// Request timeout in seconds. Defaults to `30`.
    pub request_timeout_seconds: u64,

    /// Largest accepted request body. Defaults to 1 MiB.
    pub max_body_bytes: usize,
}

/// The message users sign to prove wallet ownership.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SigningConfig {
    pub message: String,
}

/// Ledger storage engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LedgerBackend {
    Sqlite,
    Memory,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LedgerConfig {
    /// Defaults to `sqlite`.
    pub backend: LedgerBackend,

    /// `SQLite` database URL. Defaults to `sqlite://./db/ledger.db`.
    pub database_url: String,

    /// Serialize each user's check-and-record so concurrent requests cannot overshoot a
    /// cap. Defaults to `true`.
    pub strict_admission: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PlansConfig {
    /// How long plan lists and per-user subscriptions are cached. Defaults to `300`.
    pub cache_ttl_seconds: u64,

    /// Identities tracked by the subscription cache. Defaults to `10000`.
    pub cache_max_identities: u64,

    /// Minute rate of the free trial; unset disables the trial.
    pub trial_requests_per_minute: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    /// Header carrying the claimed signer address. Defaults to `X-Signer`.
    pub signer_header: String,

    /// Header carrying the hex signature. Defaults to `X-Signature`.
    pub signature_header: String,

    /// Where users buy a plan, quoted in rejection messages.
    pub subscribe_url: Option<String>,

    /// Paths served without credentials or accounting. A trailing `*` matches a prefix.
    pub bypass_paths: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SourcesConfig {
    #[serde(default, rename = "static")]
    pub static_sources: Vec<StaticSourceConfig>,
}

/// Application logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (e.g., "trace", "debug", "info", "warn", "error"). Defaults to `"info"`.
    pub level: String,

    /// Output format: `"json"` or `"pretty"`. Defaults to `"pretty"`.
    pub format: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub signing: SigningConfig,

    #[serde(default)]
    pub ledger: LedgerConfig,

    #[serde(default)]
    pub plans: PlansConfig,

    #[serde(default)]
    pub gateway: GatewayConfig,

    #[serde(default)]
    pub sources: SourcesConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: "127.0.0.1".to_string(),
            bind_port: 3030,
            max_concurrent_requests: 100,
            request_timeout_seconds: 30,
            max_body_bytes: 1024 * 1024,
        }
    }
}

impl Default for SigningConfig {
    fn default() -> Self {
        Self { message: DEFAULT_SIGNING_MESSAGE.to_string() }
    }
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            backend: LedgerBackend::Sqlite,
            database_url: "sqlite://./db/ledger.db".to_string(),
            strict_admission: true,
        }
    }
}

impl Default for PlansConfig {
    fn default() -> Self {
        Self {
            cache_ttl_seconds: 300,
            cache_max_identities: 10_000,
            trial_requests_per_minute: None,
        }
    }
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            signer_header: "X-Signer".to_string(),
            signature_header: "X-Signature".to_string(),
            subscribe_url: None,
            bypass_paths: Vec::new(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { level: "info".to_string(), format: "pretty".to_string() }
    }
}

impl AppConfig {
    /// Loads configuration from a TOML file with environment variable overrides.
    ///
    /// Environment variables with the `SUBLIMIT__` prefix can override any configuration
    /// value. Use `__` as a separator for nested fields (e.g.,
    /// `SUBLIMIT__LEDGER__DATABASE_URL=sqlite::memory:`).
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the file cannot be read, parsed, or deserialized.
    pub fn from_file<P: AsRef<Path>>(config_path: P) -> Result<Self, ConfigError> {
        let config_builder = Config::builder()
            .set_default("server.bind_address", "127.0.0.1")?
            .set_default("server.bind_port", 3030)?
            .set_default("server.max_concurrent_requests", 100)?
            .set_default("server.request_timeout_seconds", 30)?
            .set_default("signing.message", DEFAULT_SIGNING_MESSAGE)?
            .set_default("ledger.backend", "sqlite")?
            .set_default("ledger.database_url", "sqlite://./db/ledger.db")?
            .set_default("ledger.strict_admission", true)?
            .set_default("plans.cache_ttl_seconds", 300)?
            .set_default("gateway.signer_header", "X-Signer")?
            .set_default("gateway.signature_header", "X-Signature")?
            .set_default("logging.level", "info")?
            .set_default("logging.format", "pretty")?
            .add_source(File::with_name(&config_path.as_ref().to_string_lossy()).required(false))
            .add_source(Environment::with_prefix("SUBLIMIT").separator("__").try_parsing(true))
            .build()?;

        config_builder.try_deserialize()
    }

    /// Loads configuration from `config/config.toml` with fallback to defaults.
    ///
    /// The config file path can be overridden using the `SUBLIMIT_CONFIG` environment
    /// variable.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the configuration cannot be loaded or parsed.
    pub fn load() -> Result<Self, ConfigError> {
        let config_path =
            std::env::var("SUBLIMIT_CONFIG").unwrap_or_else(|_| "config/config.toml".to_string());
        Self::from_file(&config_path)
    }

    /// Returns the parsed socket address for the HTTP server.
    ///
    /// # Errors
    ///
    /// Returns an error string if the address cannot be parsed into a valid `SocketAddr`.
    pub fn socket_addr(&self) -> Result<std::net::SocketAddr, String> {
        format!("{}:{}", self.server.bind_address, self.server.bind_port)
            .parse()
            .map_err(|_| {
                format!(
                    "Invalid socket address: {}:{}",
                    self.server.bind_address, self.server.bind_port
                )
            })
    }

    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.server.request_timeout_seconds)
    }

    #[must_use]
    pub fn plan_cache_ttl(&self) -> Duration {
        Duration::from_secs(self.plans.cache_ttl_seconds)
    }

    /// The trial plan, if one is configured.
    ///
    /// # Errors
    ///
    /// Returns [`PlanError::InvalidRate`] if the trial rate is zero.
    pub fn trial_plan(&self) -> Result<Option<Plan>, PlanError> {
        self.plans.trial_requests_per_minute.map(Plan::trial).transpose()
    }

    /// Validates the configuration for correctness and consistency.
    ///
    /// # Errors
    ///
    /// Returns a descriptive error string if validation fails.
    pub fn validate(&self) -> Result<(), String> {
        if self.server.bind_port == 0 {
            return Err("Bind port must be greater than 0".to_string());
        }

        if self.server.max_concurrent_requests == 0 {
            return Err("Max concurrent requests must be greater than 0".to_string());
        }

        if self.signing.message.is_empty() {
            return Err("Signing message must not be empty".to_string());
        }

        if self.ledger.backend == LedgerBackend::Sqlite
            && !self.ledger.database_url.starts_with("sqlite:")
        {
            return Err(format!("Invalid SQLite database URL: {}", self.ledger.database_url));
        }

        if self.plans.cache_ttl_seconds == 0 {
            return Err("Plan cache TTL must be greater than 0".to_string());
        }

        if Duration::from_secs(self.plans.cache_ttl_seconds) > ONE_DAY {
            return Err("Plan cache TTL must not exceed one day".to_string());
        }

        if self.plans.trial_requests_per_minute == Some(0) {
            return Err("Trial requests per minute must be greater than 0".to_string());
        }

        if self.gateway.signer_header.is_empty() || self.gateway.signature_header.is_empty() {
            return Err("Gateway header names must not be empty".to_string());
        }

        if self.gateway.signer_header.eq_ignore_ascii_case(&self.gateway.signature_header) {
            return Err("Signer and signature headers must differ".to_string());
        }

        let mut names = std::collections::HashSet::new();
        for source in &self.sources.static_sources {
            if !names.insert(source.name.as_str()) {
                return Err(format!("Duplicate plan source name: {}", source.name));
            }
        }

        if !["json", "pretty"].contains(&self.logging.format.as_str()) {
            return Err("Logging format must be 'json' or 'pretty'".to_string());
        }

        Ok(())
    }
}
