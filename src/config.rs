//! Configuration for the chain, the miners and storage

use serde::Deserialize;
use thiserror::Error;

use std::fs;
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid config: {0}")]
    Invalid(String),
}

/// Hex characters in a SHA-256 digest; no hash can carry more leading zeros
pub const MAX_DIFFICULTY: usize = 64;

/// Protocol version and proof-of-work difficulty in force
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChainVersion {
    pub version_id: u32,

    /// Leading `'0'` hex characters required in a block hash
    pub difficulty: usize,
}

/// Supplies the current version and difficulty, read once per setup
pub trait VersionSource {
    fn current_version(&self) -> ChainVersion;
}

impl ChainVersion {
    /// Checks that the difficulty can be met by some SHA-256 digest
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.difficulty > MAX_DIFFICULTY {
            return Err(ConfigError::Invalid(format!(
                "difficulty {} exceeds the {} hex characters of a SHA-256 digest",
                self.difficulty, MAX_DIFFICULTY
            )));
        }

        Ok(())
    }
}

impl VersionSource for ChainVersion {
    fn current_version(&self) -> ChainVersion {
        *self
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub chain: ChainConfig,

    #[serde(default)]
    pub miner: MinerConfig,

    #[serde(default)]
    pub storage: StorageConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChainConfig {
    #[serde(default = "default_version")]
    pub version: u32,

    #[serde(default = "default_difficulty")]
    pub difficulty: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MinerConfig {
    /// One worker thread is spawned per identifier each round
    #[serde(default = "default_miners")]
    pub miners: Vec<String>,

    #[serde(default = "default_commit_timeout_ms")]
    pub commit_timeout_ms: u64,

    #[serde(default = "default_rounds")]
    pub rounds: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_storage_path")]
    pub path: String,
}

impl Default for ChainConfig {
    fn default() -> Self {
        Self {
            version: default_version(),
            difficulty: default_difficulty(),
        }
    }
}

impl Default for MinerConfig {
    fn default() -> Self {
        Self {
            miners: default_miners(),
            commit_timeout_ms: default_commit_timeout_ms(),
            rounds: default_rounds(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            path: default_storage_path(),
        }
    }
}

fn default_version() -> u32 {
    1
}

fn default_difficulty() -> usize {
    4
}

fn default_miners() -> Vec<String> {
    (1..=6).map(|id| id.to_string()).collect()
}

fn default_commit_timeout_ms() -> u64 {
    1000
}

fn default_rounds() -> usize {
    1
}

fn default_storage_path() -> String {
    "data/blockchain".to_string()
}

impl Config {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        self.chain.current_version().validate()?;

        if self.miner.miners.is_empty() {
            return Err(ConfigError::Invalid("at least one miner is required".to_string()));
        }

        Ok(())
    }
}

impl MinerConfig {
    pub fn commit_timeout(&self) -> Duration {
        Duration::from_millis(self.commit_timeout_ms)
    }
}

impl VersionSource for ChainConfig {
    fn current_version(&self) -> ChainVersion {
        ChainVersion {
            version_id: self.version,
            difficulty: self.difficulty,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = Config::from_toml_str("").unwrap();

        assert_eq!(config.chain.current_version(), ChainVersion { version_id: 1, difficulty: 4 });
        assert_eq!(config.miner.miners.len(), 6);
        assert_eq!(config.miner.commit_timeout(), Duration::from_secs(1));
        assert_eq!(config.storage.path, "data/blockchain");
    }

    #[test]
    fn test_partial_config() {
        let config = Config::from_toml_str(
            r#"
            [chain]
            difficulty = 2

            [miner]
            miners = ["alice", "bob"]
            rounds = 3
            "#,
        )
        .unwrap();

        assert_eq!(config.chain.version, 1);
        assert_eq!(config.chain.difficulty, 2);
        assert_eq!(config.miner.miners, vec!["alice", "bob"]);
        assert_eq!(config.miner.rounds, 3);
        assert_eq!(config.miner.commit_timeout_ms, 1000);
    }

    #[test]
    fn test_invalid_config() {
        assert!(matches!(
            Config::from_toml_str("[chain]\ndifficulty = 65"),
            Err(ConfigError::Invalid(_))
        ));
        assert!(matches!(
            Config::from_toml_str("[miner]\nminers = []"),
            Err(ConfigError::Invalid(_))
        ));
        assert!(matches!(
            Config::from_toml_str("[chain]\ndifficulty = \"high\""),
            Err(ConfigError::Parse(_))
        ));
    }
}
