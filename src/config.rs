//! Configuration loading from TOML with environment variable resolution.
//!
//! Reads `config.toml` and deserializes into strongly-typed structs.
//! Secrets and deployment-specific values (database URL, on-chain stake
//! scale) are referenced by env-var name in the config and resolved at
//! runtime via `std::env::var`.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs;
use tracing::warn;

/// Top-level application configuration.
#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub storage: StorageConfig,
    pub trading: TradingConfig,
    pub onchain: OnchainConfig,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ServerConfig {
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { port: 8090 }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct StorageConfig {
    /// Env var holding the SQLite connection URL.
    pub database_url_env: String,
    /// Fallback URL when the env var is unset.
    pub default_database_url: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database_url_env: "DATABASE_URL".to_string(),
            default_database_url: "sqlite:agentmarket.db?mode=rwc".to_string(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct TradingConfig {
    /// Hard ceiling on a single trade's stake, regardless of liquidity.
    pub absolute_max_stake: f64,
    /// Multiplier on `price * liquidity` in the volume-based cap.
    pub max_payout_multiple: f64,
}

impl Default for TradingConfig {
    fn default() -> Self {
        Self {
            absolute_max_stake: 1000.0,
            max_payout_multiple: 1.0,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct OnchainConfig {
    /// Env var holding the stake mirroring scale factor.
    pub stake_scale_env: String,
}

impl Default for OnchainConfig {
    fn default() -> Self {
        Self {
            stake_scale_env: "ONCHAIN_STAKE_SCALE".to_string(),
        }
    }
}

impl AppConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: &str) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {path}"))?;
        let config: AppConfig = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {path}"))?;
        Ok(config)
    }

    /// Load from a TOML file, falling back to defaults if the file does
    /// not exist. A malformed file is still an error.
    pub fn load_or_default(path: &str) -> Result<Self> {
        if std::path::Path::new(path).exists() {
            Self::load(path)
        } else {
            warn!(path, "Config file not found, using defaults");
            Ok(Self::default())
        }
    }

    /// Resolve the database URL from the configured env var, falling back
    /// to the configured default.
    pub fn database_url(&self) -> String {
        std::env::var(&self.storage.database_url_env)
            .unwrap_or_else(|_| self.storage.default_database_url.clone())
    }

    /// Resolve the on-chain stake scale. Missing or non-positive values
    /// fall back to 1.
    pub fn onchain_stake_scale(&self) -> f64 {
        match std::env::var(&self.onchain.stake_scale_env) {
            Ok(raw) => match raw.parse::<f64>() {
                Ok(v) if v > 0.0 && v.is_finite() => v,
                _ => 1.0,
            },
            Err(_) => 1.0,
        }
    }
}
