use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Client configuration loaded from TOML file.
///
/// # Example TOML
///
/// ```toml
/// [client]
/// server_address = "127.0.0.1:7070"
/// request_timeout_secs = 30
/// auto_reconnect = true
/// reconnect_delay_secs = 2
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    pub client: ClientInfo,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientInfo {
    /// Game server address (e.g., "127.0.0.1:7070")
    pub server_address: String,
    /// How long `request` waits for a response
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    /// Reconnect after the connection drops
    #[serde(default)]
    pub auto_reconnect: bool,
    /// Base delay before a reconnect attempt (a little random jitter is added)
    #[serde(default = "default_reconnect_delay_secs")]
    pub reconnect_delay_secs: u64,
}

fn default_request_timeout_secs() -> u64 {
    30
}

fn default_reconnect_delay_secs() -> u64 {
    2
}

impl ClientConfig {
    /// Configuration for `server_address` with every other setting defaulted.
    pub fn with_address(server_address: impl Into<String>) -> Self {
        Self {
            client: ClientInfo {
                server_address: server_address.into(),
                request_timeout_secs: default_request_timeout_secs(),
                auto_reconnect: false,
                reconnect_delay_secs: default_reconnect_delay_secs(),
            },
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.client.request_timeout_secs)
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_secs(self.client.reconnect_delay_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_fill_missing_keys() {
        let config: ClientConfig =
            toml::from_str("[client]\nserver_address = \"127.0.0.1:7070\"\n").unwrap();
        assert_eq!(config.request_timeout(), Duration::from_secs(30));
        assert!(!config.client.auto_reconnect);
        assert_eq!(config.reconnect_delay(), Duration::from_secs(2));
    }
}
