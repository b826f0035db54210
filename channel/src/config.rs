use crate::supervisor::ReconnectPolicy;
use service::config::{Config, DEFAULT_WS_BASE_URL};
use std::time::Duration;

/// Settings for every session spawned by a registry.
#[derive(Debug, Clone)]
pub struct ChannelConfig {
    /// Push base address; topic paths are appended to it.
    pub base_url: String,
    pub keep_alive_interval: Duration,
    pub reconnect: ReconnectPolicy,
    pub connect_timeout: Duration,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_WS_BASE_URL.to_string(),
            keep_alive_interval: Duration::from_secs(30),
            reconnect: ReconnectPolicy::default(),
            connect_timeout: Duration::from_secs(10),
        }
    }
}

impl From<&Config> for ChannelConfig {
    fn from(config: &Config) -> Self {
        Self {
            base_url: config.ws_base_url.clone(),
            keep_alive_interval: config.keep_alive_interval(),
            reconnect: ReconnectPolicy::new(
                config.reconnect_base_delay(),
                config.reconnect_max_attempts,
            ),
            connect_timeout: config.connect_timeout(),
        }
    }
}
