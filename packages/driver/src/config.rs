#![allow(dead_code)]

use std::env;
use std::fmt;
use std::path::Path;

use eyre::{eyre, Result, WrapErr};
use serde::Deserialize;

#[derive(Clone, Deserialize)]
pub struct Config {
    pub identity: IdentityConfig,
    pub relay: RelayConfig,
    pub database: DatabaseConfig,
    pub wallet: WalletConfig,
    pub availability: AvailabilityConfig,
    pub server: ServerConfig,
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("identity", &self.identity)
            .field("relay", &self.relay)
            .field("database", &self.database)
            .field("wallet", &self.wallet)
            .field("availability", &self.availability)
            .field("server", &self.server)
            .finish()
    }
}

#[derive(Clone, Deserialize)]
pub struct IdentityConfig {
    pub secret_key_hex: String,
}

impl fmt::Debug for IdentityConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IdentityConfig")
            .field("secret_key_hex", &"<redacted>")
            .finish()
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RelayConfig {
    pub urls: Vec<String>,
}

#[derive(Clone, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
}

impl fmt::Debug for DatabaseConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DatabaseConfig")
            .field("url", &"<redacted>")
            .finish()
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct WalletConfig {
    pub wallet_db_path: String,
    pub default_mint_url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AvailabilityConfig {
    #[serde(default = "default_geohash_precision")]
    pub geohash_precision: usize,
    /// Set when the driver only serves RoadFlare (no geohash, no continuous
    /// heartbeat) rides.
    #[serde(default)]
    pub roadflare_only: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,
}

fn default_geohash_precision() -> usize {
    7
}

fn default_bind_addr() -> String {
    "0.0.0.0:8081".to_string()
}

impl Config {
    pub fn load() -> Result<Self> {
        Self::load_from_file(".env")
    }

    pub fn load_from_file(path: &str) -> Result<Self> {
        if Path::new(path).exists() {
            dotenvy::from_filename(path)
                .wrap_err_with(|| format!("failed to load .env file from {path}"))?;
        }
        Self::load_from_env()
    }

    fn load_from_env() -> Result<Self> {
        let identity = IdentityConfig {
            secret_key_hex: env::var("DRIVER_SECRET_KEY")
                .map_err(|_| eyre!("DRIVER_SECRET_KEY environment variable is required"))?,
        };

        let relay_urls_raw = env::var("RELAY_URLS")
            .map_err(|_| eyre!("RELAY_URLS environment variable is required (comma-separated)"))?;
        let urls: Vec<String> = relay_urls_raw
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();
        if urls.is_empty() {
            return Err(eyre!("RELAY_URLS cannot be empty"));
        }

        let database = DatabaseConfig {
            url: env::var("DATABASE_URL").unwrap_or_else(|_| "sqlite://driver.db".to_string()),
        };

        let wallet = WalletConfig {
            wallet_db_path: env::var("WALLET_DB_PATH").unwrap_or_else(|_| "driver_wallet.sqlite".to_string()),
            default_mint_url: env::var("DEFAULT_MINT_URL")
                .map_err(|_| eyre!("DEFAULT_MINT_URL environment variable is required"))?,
        };

        let availability = AvailabilityConfig {
            geohash_precision: env::var("GEOHASH_PRECISION")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or_else(default_geohash_precision),
            roadflare_only: env::var("ROADFLARE_ONLY")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(false),
        };

        let server = ServerConfig {
            bind_addr: env::var("BIND_ADDR").unwrap_or_else(|_| default_bind_addr()),
        };

        let config = Config {
            identity,
            relay: RelayConfig { urls },
            database,
            wallet,
            availability,
            server,
        };

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.identity.secret_key_hex.len() != 64 || hex::decode(&self.identity.secret_key_hex).is_err() {
            return Err(eyre!("DRIVER_SECRET_KEY must be 64 hex chars (32 bytes)"));
        }
        if self.relay.urls.iter().any(|u| !u.starts_with("ws://") && !u.starts_with("wss://")) {
            return Err(eyre!("every RELAY_URLS entry must start with ws:// or wss://"));
        }
        if self.wallet.default_mint_url.is_empty() {
            return Err(eyre!("DEFAULT_MINT_URL cannot be empty"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_config() -> Config {
        Config {
            identity: IdentityConfig {
                secret_key_hex: "22".repeat(32),
            },
            relay: RelayConfig {
                urls: vec!["wss://relay.example.com".to_string()],
            },
            database: DatabaseConfig {
                url: "sqlite://driver.db".to_string(),
            },
            wallet: WalletConfig {
                wallet_db_path: "driver_wallet.sqlite".to_string(),
                default_mint_url: "https://mint.example.com".to_string(),
            },
            availability: AvailabilityConfig {
                geohash_precision: 7,
                roadflare_only: false,
            },
            server: ServerConfig {
                bind_addr: "0.0.0.0:8081".to_string(),
            },
        }
    }

    #[test]
    fn valid_config_passes() {
        assert!(valid_config().validate().is_ok());
    }

    #[test]
    fn rejects_bad_secret_key() {
        let mut config = valid_config();
        config.identity.secret_key_hex = "zz".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_http_relay_url() {
        let mut config = valid_config();
        config.relay.urls = vec!["http://relay.example.com".to_string()];
        assert!(config.validate().is_err());
    }
}
