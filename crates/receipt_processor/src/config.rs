use config::{Config, ConfigError, Environment};
use serde::Deserialize;

#[derive(Debug, Deserialize, Clone)]
pub struct ServiceConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Emit JSON log lines; plain text when false
    #[serde(default = "default_log_json")]
    pub log_json: bool,

    // RabbitMQ configuration
    /// AMQP broker URL (required)
    pub rabbitmq_url: String,

    /// Durable work queue carrying receipt envelopes
    #[serde(default = "default_queue_name")]
    pub queue_name: String,

    /// Consumer tag announced to the broker
    #[serde(default = "default_consumer_tag")]
    pub consumer_tag: String,

    /// Delay before the first reconnect attempt in seconds
    #[serde(default = "default_reconnect_backoff_secs")]
    pub reconnect_backoff_secs: u64,

    /// Upper bound for the reconnect delay in seconds
    #[serde(default = "default_reconnect_max_backoff_secs")]
    pub reconnect_max_backoff_secs: u64,

    // PostgreSQL configuration
    /// PostgreSQL connection string (required)
    pub database_url: String,

    /// Maximum pooled PostgreSQL connections
    #[serde(default = "default_database_pool_size")]
    pub database_pool_size: usize,

    /// Startup timeout for the storage connectivity check in seconds
    #[serde(default = "default_startup_timeout_secs")]
    pub startup_timeout_secs: u64,

    /// Time allowed for releasing resources on shutdown in seconds
    #[serde(default = "default_shutdown_timeout_secs")]
    pub shutdown_timeout_secs: u64,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_json() -> bool {
    true
}

fn default_queue_name() -> String {
    "receipt_queue".to_string()
}

fn default_consumer_tag() -> String {
    "receipt-processor".to_string()
}

fn default_reconnect_backoff_secs() -> u64 {
    5
}

fn default_reconnect_max_backoff_secs() -> u64 {
    5
}

fn default_database_pool_size() -> usize {
    1
}

fn default_startup_timeout_secs() -> u64 {
    30
}

fn default_shutdown_timeout_secs() -> u64 {
    10
}

impl ServiceConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_environment(Environment::default())
    }

    fn from_environment(environment: Environment) -> Result<Self, ConfigError> {
        let config: Self = Config::builder()
            .add_source(environment.try_parsing(true))
            .build()?
            .try_deserialize()?;

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.rabbitmq_url.trim().is_empty() {
            return Err(ConfigError::Message("RABBITMQ_URL must not be empty".to_string()));
        }
        if self.database_url.trim().is_empty() {
            return Err(ConfigError::Message("DATABASE_URL must not be empty".to_string()));
        }
        if self.queue_name.trim().is_empty() {
            return Err(ConfigError::Message("QUEUE_NAME must not be empty".to_string()));
        }
        if self.reconnect_backoff_secs == 0 {
            return Err(ConfigError::Message(
                "RECONNECT_BACKOFF_SECS must be at least 1".to_string(),
            ));
        }
        if self.reconnect_max_backoff_secs < self.reconnect_backoff_secs {
            return Err(ConfigError::Message(
                "RECONNECT_MAX_BACKOFF_SECS must not be below RECONNECT_BACKOFF_SECS".to_string(),
            ));
        }
        Ok(())
    }
}
