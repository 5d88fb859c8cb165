//! Persistent configuration.
//!
//! Resolution order, later wins: built-in defaults, `<config_dir>/config.json`,
//! `TUTORCHAIN_*` environment variables, then whatever the caller (the CLI)
//! sets explicitly.

use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::gateway::ReceiptPolling;
use crate::wallet::types::Address;

pub const CONFIG_FILE: &str = "config.json";

pub const ENV_RPC_URL: &str = "TUTORCHAIN_RPC_URL";
pub const ENV_CONTRACT: &str = "TUTORCHAIN_CONTRACT";
pub const ENV_LOG_DIR: &str = "TUTORCHAIN_LOG_DIR";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid config file: {0}")]
    Json(#[from] serde_json::Error),

    #[error("No contract address configured (set TUTORCHAIN_CONTRACT or pass --contract)")]
    MissingContract,

    #[error("Invalid contract address: {0}")]
    InvalidContract(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TutorchainConfig {
    /// JSON-RPC endpoint of the wallet / node.
    pub rpc_url: String,
    pub contract_address: Option<Address>,
    /// How often the provider is polled for account and chain changes.
    pub poll_interval_ms: u64,
    pub receipt_poll_attempts: u32,
    pub receipt_poll_interval_ms: u64,
    /// Directory for JSON-RPC wire logs. Wire logging is off when unset.
    pub log_dir: Option<PathBuf>,
}

impl Default for TutorchainConfig {
    fn default() -> Self {
        Self {
            rpc_url: "http://127.0.0.1:8545".to_string(),
            contract_address: None,
            poll_interval_ms: 1000,
            receipt_poll_attempts: 120,
            receipt_poll_interval_ms: 1000,
            log_dir: None,
        }
    }
}

impl TutorchainConfig {
    /// Load `config.json` from `dir`. A missing file yields the defaults.
    pub fn load(dir: &Path) -> Result<Self, ConfigError> {
        let path = dir.join(CONFIG_FILE);
        if !path.exists() {
            log::debug!("No config at {}, using defaults", path.display());
            return Ok(Self::default());
        }
        let contents = fs::read_to_string(&path)?;
        let config = serde_json::from_str(&contents)?;
        log::debug!("Loaded config from {}", path.display());
        Ok(config)
    }

    /// Save to `dir/config.json` via a temp file and rename.
    pub fn save(&self, dir: &Path) -> Result<(), ConfigError> {
        fs::create_dir_all(dir)?;

        let file_path = dir.join(CONFIG_FILE);
        let temp_path = dir.join("config.json.tmp");

        let json = serde_json::to_string_pretty(self)?;
        fs::write(&temp_path, &json)?;
        fs::rename(&temp_path, &file_path)?;
        Ok(())
    }

    /// Apply `TUTORCHAIN_*` overrides from the process environment.
    pub fn apply_env(&mut self) -> Result<(), ConfigError> {
        self.apply_overrides(|key| env::var(key).ok())
    }

    /// Apply overrides from `lookup`. Empty values are ignored.
    pub fn apply_overrides(
        &mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<(), ConfigError> {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        if let Some(url) = get(ENV_RPC_URL) {
            self.rpc_url = url;
        }
        if let Some(contract) = get(ENV_CONTRACT) {
            let address = contract
                .trim()
                .parse::<Address>()
                .map_err(|_| ConfigError::InvalidContract(contract.clone()))?;
            self.contract_address = Some(address);
        }
        if let Some(dir) = get(ENV_LOG_DIR) {
            self.log_dir = Some(PathBuf::from(dir));
        }
        Ok(())
    }

    pub fn contract(&self) -> Result<Address, ConfigError> {
        self.contract_address.ok_or(ConfigError::MissingContract)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }

    pub fn receipt_polling(&self) -> ReceiptPolling {
        ReceiptPolling {
            attempts: self.receipt_poll_attempts.max(1),
            interval: Duration::from_millis(self.receipt_poll_interval_ms),
        }
    }
}
