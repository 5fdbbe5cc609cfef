//! Device configuration, loadable from TOML.

use std::time::Duration;

use ih_amqp_channel::HubConfig;
use serde::Deserialize;

use crate::session::SessionOptions;

/// Top-level configuration for one device.
#[derive(Clone, Deserialize)]
pub struct DeviceConfig {
    /// Device identifier registered on the hub.
    pub device_id: String,
    /// Base64 shared access key of the device.
    pub device_key: String,
    /// Hub endpoint settings.
    pub hub: HubConfig,
    /// Token renewal period in minutes.
    #[serde(default = "default_renewal_period")]
    pub renewal_period_mins: u64,
    /// Validity of each signed token in minutes.
    #[serde(default = "default_token_ttl")]
    pub token_ttl_mins: u64,
    /// Consecutive renewal failures before the session fails (0 = never).
    #[serde(default = "default_renewal_failure_limit")]
    pub renewal_failure_limit: u32,
    #[serde(default = "default_send_timeout")]
    pub send_timeout_secs: u64,
    #[serde(default = "default_close_linger")]
    pub close_linger_secs: u64,
    /// Interval of the "alive" event in seconds.
    #[serde(default = "default_alive_interval")]
    pub alive_interval_secs: u64,
}

fn default_renewal_period() -> u64 {
    2
}

fn default_token_ttl() -> u64 {
    3
}

fn default_renewal_failure_limit() -> u32 {
    3
}

fn default_send_timeout() -> u64 {
    30
}

fn default_close_linger() -> u64 {
    6
}

fn default_alive_interval() -> u64 {
    60
}

impl DeviceConfig {
    /// Load config from a TOML file path.
    pub fn from_file(path: &str) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&contents)?;
        Ok(config)
    }

    pub fn session_options(&self) -> SessionOptions {
        SessionOptions {
            renewal_period: Duration::from_secs(self.renewal_period_mins.saturating_mul(60)),
            token_ttl: Duration::from_secs(self.token_ttl_mins.saturating_mul(60)),
            renewal_failure_limit: self.renewal_failure_limit,
            send_timeout: Duration::from_secs(self.send_timeout_secs),
            close_linger: Duration::from_secs(self.close_linger_secs),
            ..SessionOptions::default()
        }
    }

    pub fn alive_interval(&self) -> Duration {
        Duration::from_secs(self.alive_interval_secs)
    }
}

impl std::fmt::Debug for DeviceConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceConfig")
            .field("device_id", &self.device_id)
            .field("device_key", &"<redacted>")
            .field("hub", &self.hub)
            .field("renewal_period_mins", &self.renewal_period_mins)
            .field("token_ttl_mins", &self.token_ttl_mins)
            .field("renewal_failure_limit", &self.renewal_failure_limit)
            .field("send_timeout_secs", &self.send_timeout_secs)
            .field("close_linger_secs", &self.close_linger_secs)
            .field("alive_interval_secs", &self.alive_interval_secs)
            .finish()
    }
}
