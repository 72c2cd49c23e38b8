use serde::Deserialize;
use service_core::config as core_config;
use service_core::error::AppError;
use service_core::outbox::RelayConfig;
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
pub struct AuthConfig {
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    pub database: DatabaseConfig,
    pub nats: NatsConfig,
    pub otp: OtpConfig,
    #[serde(default)]
    pub outbox: OutboxConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NatsConfig {
    pub url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OtpConfig {
    pub secret: String,
    #[serde(default = "default_otp_ttl_minutes")]
    pub ttl_minutes: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OutboxConfig {
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
    #[serde(default = "default_batch_size")]
    pub batch_size: i64,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: i32,
    #[serde(default = "default_stuck_timeout_secs")]
    pub stuck_timeout_secs: u64,
}

impl Default for OutboxConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: default_poll_interval_secs(),
            batch_size: default_batch_size(),
            max_attempts: default_max_attempts(),
            stuck_timeout_secs: default_stuck_timeout_secs(),
        }
    }
}

impl AuthConfig {
    pub fn load() -> Result<Self, AppError> {
        core_config::load()
    }

    pub fn relay_config(&self) -> RelayConfig {
        RelayConfig {
            poll_interval: Duration::from_secs(self.outbox.poll_interval_secs),
            batch_size: self.outbox.batch_size,
            max_attempts: self.outbox.max_attempts,
            stuck_timeout: Duration::from_secs(self.outbox.stuck_timeout_secs),
        }
    }
}

fn default_port() -> u16 {
    3001
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_max_connections() -> u32 {
    10
}

fn default_otp_ttl_minutes() -> i64 {
    5
}

fn default_poll_interval_secs() -> u64 {
    5
}

fn default_batch_size() -> i64 {
    50
}

fn default_max_attempts() -> i32 {
    5
}

fn default_stuck_timeout_secs() -> u64 {
    60
}
