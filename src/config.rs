use serde::{Deserialize, Serialize};
use anyhow::{anyhow, Context, Result};
use std::fs;
use std::path::{Path, PathBuf};
use solana_sdk::{commitment_config::CommitmentConfig, pubkey::Pubkey};
use std::str::FromStr;
use std::time::Duration;
use url::Url;

pub const DEFAULT_FEE_TRACKER_URL: &str = "https://quicknode.com/_gas-tracker?slug=solana";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    // HTTP JSON-RPC endpoint
    #[serde(alias = "rpcUrl", alias = "rpcurl")]
    pub rpc_url: String,
    // Websocket endpoint, used for signature subscriptions when present
    #[serde(
        default,
        alias = "wsEndpoint",
        alias = "wsendpoint",
        skip_serializing_if = "Option::is_none"
    )]
    pub ws_endpoint: Option<String>,
    // Mint of the token being swept
    #[serde(default, alias = "spltoken", skip_serializing_if = "Option::is_none")]
    pub spl_token: Option<String>,
    // Wallet receiving every swept balance
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub beneficiary: Option<String>,
    // Newline-delimited base58 secret keys
    #[serde(default = "default_keys_file", alias = "keysFile", alias = "keysfile")]
    pub keys_file: PathBuf,
    // Gas tracker queried for priority fee percentiles
    #[serde(
        default = "default_fee_tracker_url",
        alias = "feeTrackerUrl",
        alias = "feetrackerurl"
    )]
    pub fee_tracker_url: String,
    // Compute unit price (micro-lamports) used when the tracker is down
    #[serde(default, alias = "fallbackPriorityFee", alias = "fallbackpriorityfee")]
    pub fallback_priority_fee: u64,
    // Send retries handed to the RPC node
    #[serde(default = "default_max_retries", alias = "maxRetries", alias = "maxretries")]
    pub max_retries: usize,
    // Number of keys processed at once
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    // Pause before exit once the last key is done
    #[serde(
        default = "default_settle_delay_ms",
        alias = "settleDelayMs",
        alias = "settledelayms"
    )]
    pub settle_delay_ms: u64,
    #[serde(
        default = "default_confirm_timeout_secs",
        alias = "confirmTimeoutSecs",
        alias = "confirmtimeoutsecs"
    )]
    pub confirm_timeout_secs: u64,
}

fn default_keys_file() -> PathBuf {
    PathBuf::from("PrivateKeys.txt")
}

fn default_fee_tracker_url() -> String {
    DEFAULT_FEE_TRACKER_URL.to_string()
}

fn default_max_retries() -> usize {
    10
}

fn default_concurrency() -> usize {
    1
}

fn default_settle_delay_ms() -> u64 {
    1500
}

fn default_confirm_timeout_secs() -> u64 {
    90
}

impl Default for Config {
    fn default() -> Self {
        Self {
            rpc_url: "https://api.mainnet-beta.solana.com".to_string(),
            ws_endpoint: None,
            spl_token: None,
            beneficiary: None,
            keys_file: default_keys_file(),
            fee_tracker_url: default_fee_tracker_url(),
            fallback_priority_fee: 0,
            max_retries: default_max_retries(),
            concurrency: default_concurrency(),
            settle_delay_ms: default_settle_delay_ms(),
            confirm_timeout_secs: default_confirm_timeout_secs(),
        }
    }
}

impl Config {
    /// Load the config file (if it exists), then `ORE_SWEEP__*` environment
    /// overrides. `rpc_url` must come from one of them.
    pub fn load(config_path: impl AsRef<Path>) -> Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::from(config_path.as_ref()).required(false))
            .add_source(
                config::Environment::with_prefix("ORE_SWEEP")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .context("Failed to build configuration")?;

        let config: Config = settings
            .try_deserialize()
            .context("Failed to parse config file")?;

        config.validate()?;
        Ok(config)
    }

    pub fn save(&self, config_path: impl AsRef<Path>) -> Result<()> {
        let content = serde_json::to_string_pretty(self)?;

        // Create parent directories if they don't exist
        if let Some(parent) = config_path.as_ref().parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        fs::write(config_path, content)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        let rpc = Url::parse(&self.rpc_url).context("Invalid rpc_url")?;
        if !matches!(rpc.scheme(), "http" | "https") {
            return Err(anyhow!("rpc_url must be http(s), got {}", rpc.scheme()));
        }

        if let Some(ws) = &self.ws_endpoint {
            let ws = Url::parse(ws).context("Invalid ws_endpoint")?;
            if !matches!(ws.scheme(), "ws" | "wss") {
                return Err(anyhow!("ws_endpoint must be ws(s), got {}", ws.scheme()));
            }
        }

        Url::parse(&self.fee_tracker_url).context("Invalid fee_tracker_url")?;

        if self.concurrency == 0 {
            return Err(anyhow!("concurrency must be at least 1"));
        }

        if self.spl_token.is_some() {
            self.mint()?;
        }
        if self.beneficiary.is_some() {
            self.beneficiary()?;
        }

        Ok(())
    }

    pub fn mint(&self) -> Result<Pubkey> {
        let mint = self
            .spl_token
            .as_deref()
            .ok_or_else(|| anyhow!("spl_token is not set in config"))?;
        Pubkey::from_str(mint).context("Invalid spl_token mint address")
    }

    pub fn beneficiary(&self) -> Result<Pubkey> {
        let beneficiary = self
            .beneficiary
            .as_deref()
            .ok_or_else(|| anyhow!("beneficiary is not set in config"))?;
        Pubkey::from_str(beneficiary).context("Invalid beneficiary address")
    }

    pub fn commitment(&self) -> CommitmentConfig {
        CommitmentConfig::confirmed()
    }

    pub fn confirm_timeout(&self) -> Duration {
        Duration::from_secs(self.confirm_timeout_secs)
    }

    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }
}
