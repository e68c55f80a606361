use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;

use crate::billing::webhook::AccountCreation;
use crate::error::BillsyncError;
use crate::utils::{get_env_parsed, get_env_with_prefix};

/// Main configuration for a billsync deployment
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub billing: BillingConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Maximum request body size in bytes (default: 1MB)
    #[serde(default = "default_max_body_size")]
    pub max_body_size: usize,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub json: bool,
}

/// Provider credentials and reconciliation knobs.
///
/// Secrets are never serialized.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BillingConfig {
    #[serde(skip)]
    pub stripe_secret_key: Option<SecretString>,
    /// Enables `Stripe-Signature` verification on the webhook route.
    #[serde(skip)]
    pub webhook_secret: Option<SecretString>,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_seconds: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Cached customer snapshots older than this are refetched.
    #[serde(default = "default_max_age_hours")]
    pub max_age_hours: i64,
    /// Listing attempts before a bulk sync gives up.
    #[serde(default = "default_sync_max_attempts")]
    pub sync_max_attempts: u32,
    #[serde(default)]
    pub webhook_accounts: AccountCreation,
    /// Directory for the file-backed account store.
    #[serde(default = "default_data_dir")]
    pub data_dir: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            max_body_size: default_max_body_size(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

impl Default for BillingConfig {
    fn default() -> Self {
        Self {
            stripe_secret_key: None,
            webhook_secret: None,
            request_timeout_seconds: default_request_timeout(),
            max_retries: default_max_retries(),
            max_age_hours: default_max_age_hours(),
            sync_max_attempts: default_sync_max_attempts(),
            webhook_accounts: AccountCreation::default(),
            data_dir: default_data_dir(),
        }
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8000
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_max_body_size() -> usize {
    1024 * 1024
}

fn default_request_timeout() -> u64 {
    30
}

fn default_max_retries() -> u32 {
    3
}

fn default_max_age_hours() -> i64 {
    crate::billing::sync::DEFAULT_MAX_AGE_HOURS
}

fn default_sync_max_attempts() -> u32 {
    crate::billing::reconcile::DEFAULT_MAX_ATTEMPTS
}

fn default_data_dir() -> String {
    "./accounts".to_string()
}

impl ServerConfig {
    pub fn addr(&self) -> Result<SocketAddr, std::net::AddrParseError> {
        format!("{}:{}", self.host, self.port).parse()
    }
}

/// Builder for Config with environment variable support
#[must_use = "builder does nothing until you call build()"]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: Config::default(),
        }
    }

    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.config.server.host = host.into();
        self
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.config.server.port = port;
        self
    }

    pub fn with_max_body_size(mut self, max_body_size: usize) -> Self {
        self.config.server.max_body_size = max_body_size;
        self
    }

    pub fn with_log_level(mut self, level: impl Into<String>) -> Self {
        self.config.logging.level = level.into();
        self
    }

    pub fn with_json_logging(mut self, enabled: bool) -> Self {
        self.config.logging.json = enabled;
        self
    }

    pub fn with_stripe_secret_key(mut self, key: impl Into<String>) -> Self {
        self.config.billing.stripe_secret_key = Some(SecretString::from(key.into()));
        self
    }

    pub fn with_webhook_secret(mut self, secret: impl Into<String>) -> Self {
        self.config.billing.webhook_secret = Some(SecretString::from(secret.into()));
        self
    }

    pub fn with_request_timeout(mut self, seconds: u64) -> Self {
        self.config.billing.request_timeout_seconds = seconds;
        self
    }

    pub fn with_max_retries(mut self, retries: u32) -> Self {
        self.config.billing.max_retries = retries;
        self
    }

    pub fn with_max_age_hours(mut self, hours: i64) -> Self {
        self.config.billing.max_age_hours = hours;
        self
    }

    pub fn with_sync_max_attempts(mut self, attempts: u32) -> Self {
        self.config.billing.sync_max_attempts = attempts;
        self
    }

    pub fn with_webhook_accounts(mut self, creation: AccountCreation) -> Self {
        self.config.billing.webhook_accounts = creation;
        self
    }

    pub fn with_data_dir(mut self, dir: impl Into<String>) -> Self {
        self.config.billing.data_dir = dir.into();
        self
    }

    /// Load configuration from environment variables with BILLSYNC_ prefix
    pub fn from_env(mut self) -> Self {
        if let Some(host) = get_env_with_prefix("HOST") {
            self.config.server.host = host;
        }
        // BILLSYNC_PORT first, then PORT for hosting platforms that set it
        if let Some(port) = get_env_parsed("PORT") {
            self.config.server.port = port;
        }
        if let Some(size) = get_env_parsed("MAX_BODY_SIZE") {
            self.config.server.max_body_size = size;
        }
        if let Some(level) = get_env_with_prefix("LOG_LEVEL") {
            self.config.logging.level = level;
        }
        if let Some(json) = get_env_with_prefix("LOG_JSON") {
            self.config.logging.json = json.parse().unwrap_or(false);
        }

        if let Some(key) = get_env_with_prefix("STRIPE_SECRET_KEY") {
            self.config.billing.stripe_secret_key = Some(SecretString::from(key));
        }
        if let Some(secret) = get_env_with_prefix("STRIPE_WEBHOOK_SECRET") {
            self.config.billing.webhook_secret = Some(SecretString::from(secret));
        }
        if let Some(seconds) = get_env_parsed("STRIPE_TIMEOUT_SECONDS") {
            self.config.billing.request_timeout_seconds = seconds;
        }
        if let Some(retries) = get_env_parsed("STRIPE_MAX_RETRIES") {
            self.config.billing.max_retries = retries;
        }
        if let Some(hours) = get_env_parsed("CUSTOMER_MAX_AGE_HOURS") {
            self.config.billing.max_age_hours = hours;
        }
        if let Some(attempts) = get_env_parsed("SYNC_MAX_ATTEMPTS") {
            self.config.billing.sync_max_attempts = attempts;
        }
        if let Some(policy) = get_env_with_prefix("WEBHOOK_ACCOUNTS") {
            match AccountCreation::from_str_lossy(&policy) {
                Some(creation) => self.config.billing.webhook_accounts = creation,
                None => tracing::warn!(
                    target: "billsync::config",
                    value = %policy,
                    "Unknown webhook account policy, keeping existing_only"
                ),
            }
        }
        if let Some(dir) = get_env_with_prefix("DATA_DIR") {
            self.config.billing.data_dir = dir;
        }

        self
    }

    /// Build the configuration, validating all settings
    ///
    /// # Errors
    ///
    /// Returns an error for an invalid server address or log level, a zero
    /// timeout or port, or a non-positive staleness window.
    pub fn build(self) -> crate::error::Result<Config> {
        self.config.server.addr().map_err(|e| {
            BillsyncError::bad_request(format!(
                "Invalid server address {}:{} - {}",
                self.config.server.host, self.config.server.port, e
            ))
        })?;

        let valid_log_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_log_levels.contains(&self.config.logging.level.to_lowercase().as_str()) {
            return Err(BillsyncError::bad_request(format!(
                "Invalid log level: {}. Must be one of: {}",
                self.config.logging.level,
                valid_log_levels.join(", ")
            )));
        }

        if self.config.server.port == 0 {
            return Err(BillsyncError::bad_request("Server port must be greater than 0"));
        }

        if self.config.server.max_body_size == 0 {
            return Err(BillsyncError::bad_request(
                "Maximum body size must be greater than 0",
            ));
        }

        let billing = &self.config.billing;
        if billing.request_timeout_seconds == 0 {
            return Err(BillsyncError::bad_request(
                "Stripe request timeout must be greater than 0",
            ));
        }
        if billing.max_age_hours <= 0 {
            return Err(BillsyncError::bad_request(
                "Customer max age must be at least one hour",
            ));
        }
        if billing.sync_max_attempts == 0 {
            return Err(BillsyncError::bad_request(
                "Sync max attempts must be greater than 0",
            ));
        }

        Ok(self.config)
    }
}

impl Default for ConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}
