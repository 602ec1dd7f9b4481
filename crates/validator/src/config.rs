//! Launcher Configuration
//!
//! The protocol needs exactly two values from the environment: the node's
//! private key and the seed peer list. Everything else has defaults.

use anyhow::{Context, Result};

/// Environment variable holding the hex-encoded secp256k1 secret key.
pub const PRIVATE_KEY_ENV: &str = "STAKEMESH_PRIVATE_KEY";

/// Environment variable holding comma-separated peer WebSocket URLs.
pub const PEERS_ENV: &str = "STAKEMESH_PEERS";

/// Values read from the environment.
#[derive(Debug, Clone)]
pub struct LauncherConfig {
    pub private_key: String,
    pub peers: Vec<String>,
}

impl LauncherConfig {
    pub fn from_env() -> Result<Self> {
        let private_key = std::env::var(PRIVATE_KEY_ENV)
            .with_context(|| format!("{PRIVATE_KEY_ENV} must be set"))?;

        let peers = std::env::var(PEERS_ENV)
            .unwrap_or_default()
            .split(',')
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .map(str::to_string)
            .collect();

        Ok(Self { private_key, peers })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn peer_list_parsing() {
        std::env::set_var(PRIVATE_KEY_ENV, "aa");
        std::env::set_var(PEERS_ENV, "ws://a:3000, ws://b:3001,,");

        let config = LauncherConfig::from_env().unwrap();
        assert_eq!(config.peers, vec!["ws://a:3000", "ws://b:3001"]);

        std::env::remove_var(PRIVATE_KEY_ENV);
        std::env::remove_var(PEERS_ENV);
    }
}
