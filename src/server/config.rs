use serde::{Deserialize, Serialize};

/// Complete server configuration loaded from TOML file.
///
/// # Example TOML
///
/// ```toml
/// [server]
/// address = "127.0.0.1:7070"
///
/// [storage]
/// initial_elo = 1200
///
/// [matchmaking]
/// top_elos_limit = 10
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub server: ServerInfo,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub matchmaking: MatchmakingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerInfo {
    /// Address to listen on (e.g., "127.0.0.1:7070")
    pub address: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// ELO given to newly created accounts
    #[serde(default = "default_initial_elo")]
    pub initial_elo: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatchmakingConfig {
    /// Entries returned by `get_top_elos` when the request names no limit
    #[serde(default = "default_top_elos_limit")]
    pub top_elos_limit: usize,
}

fn default_initial_elo() -> i64 {
    1200
}

fn default_top_elos_limit() -> usize {
    10
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            initial_elo: default_initial_elo(),
        }
    }
}

impl Default for MatchmakingConfig {
    fn default() -> Self {
        Self {
            top_elos_limit: default_top_elos_limit(),
        }
    }
}

impl ServerConfig {
    /// Configuration listening on `address` with every other setting defaulted.
    pub fn with_address(address: impl Into<String>) -> Self {
        Self {
            server: ServerInfo {
                address: address.into(),
            },
            storage: StorageConfig::default(),
            matchmaking: MatchmakingConfig::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn optional_sections_take_defaults() {
        let config: ServerConfig = toml::from_str("[server]\naddress = \"0.0.0.0:7070\"\n").unwrap();
        assert_eq!(config.server.address, "0.0.0.0:7070");
        assert_eq!(config.storage.initial_elo, 1200);
        assert_eq!(config.matchmaking.top_elos_limit, 10);
    }

    #[test]
    fn explicit_values_win() {
        let config: ServerConfig = toml::from_str(
            "[server]\naddress = \"127.0.0.1:1\"\n[storage]\ninitial_elo = 1500\n[matchmaking]\ntop_elos_limit = 3\n",
        )
        .unwrap();
        assert_eq!(config.storage.initial_elo, 1500);
        assert_eq!(config.matchmaking.top_elos_limit, 3);
    }
}
