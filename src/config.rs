//! Configuration management for near-runner
//!
//! Loads configuration from TOML files with environment variable substitution.
//! The network to run against is always an explicit value in `Settings`; the
//! environment is only consulted by `Settings::from_env`.

use crate::tx::BundleFailurePolicy;
use crate::types::{AccountId, Balance, Gas, ONE_NEAR, TGAS};

use anyhow::{Context, Result};
use serde::Deserialize;
use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;
use url::Url;

pub const CONFIG_ENV: &str = "NEAR_RUNNER_CONFIG";
pub const NETWORK_ENV: &str = "NEAR_RUNNER_NETWORK";
pub const ROOT_ACCOUNT_ENV: &str = "NEAR_RUNNER_ROOT_ACCOUNT";
pub const ROOT_SECRET_KEY_ENV: &str = "NEAR_RUNNER_ROOT_SECRET_KEY";
pub const SANDBOX_BIN_ENV: &str = "NEAR_SANDBOX_BIN_PATH";

const TESTNET_RPC_URL: &str = "https://rpc.testnet.near.org";
const TESTNET_WALLET_URL: &str = "https://wallet.testnet.near.org";

/// Root configuration structure
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub network: NetworkConfig,
    #[serde(default)]
    pub sandbox: SandboxConfig,
    #[serde(default)]
    pub accounts: AccountsConfig,
    #[serde(default)]
    pub transactions: TransactionsConfig,
}

#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum NetworkKind {
    Sandbox,
    Testnet,
}

impl NetworkKind {
    fn default_network_id(&self) -> &'static str {
        match self {
            NetworkKind::Sandbox => "sandbox",
            NetworkKind::Testnet => "testnet",
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct NetworkConfig {
    pub kind: NetworkKind,
    /// Key store namespace; defaults to the kind's name
    pub network_id: Option<String>,
    /// Required for testnet; sandbox servers pick their own address
    pub rpc_url: Option<String>,
    pub wallet_url: Option<String>,
    /// Testnet only: account that funds every account a test creates
    pub root_account: Option<AccountId>,
    pub root_secret_key: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SandboxConfig {
    #[serde(default = "default_sandbox_binary")]
    pub binary: String,
    /// Parent directory for sandbox home directories
    pub home_root: Option<PathBuf>,
    #[serde(default = "default_start_timeout_secs")]
    pub start_timeout_secs: u64,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AccountsConfig {
    #[serde(default = "default_initial_balance_near")]
    pub initial_balance_near: u64,
    /// Testnet only: funding of the per-runner parent account
    #[serde(default = "default_runner_balance_near")]
    pub runner_balance_near: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TransactionsConfig {
    #[serde(default)]
    pub bundle_failure: BundleFailurePolicy,
    #[serde(default = "default_call_gas_tgas")]
    pub default_gas_tgas: u64,
}

fn default_sandbox_binary() -> String {
    env::var(SANDBOX_BIN_ENV).unwrap_or_else(|_| "near-sandbox".to_string())
}

fn default_start_timeout_secs() -> u64 {
    60
}

fn default_poll_interval_ms() -> u64 {
    200
}

fn default_initial_balance_near() -> u64 {
    10
}

fn default_runner_balance_near() -> u64 {
    50
}

fn default_call_gas_tgas() -> u64 {
    30
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            binary: default_sandbox_binary(),
            home_root: None,
            start_timeout_secs: default_start_timeout_secs(),
            poll_interval_ms: default_poll_interval_ms(),
        }
    }
}

impl Default for AccountsConfig {
    fn default() -> Self {
        Self {
            initial_balance_near: default_initial_balance_near(),
            runner_balance_near: default_runner_balance_near(),
        }
    }
}

impl Default for TransactionsConfig {
    fn default() -> Self {
        Self {
            bundle_failure: BundleFailurePolicy::default(),
            default_gas_tgas: default_call_gas_tgas(),
        }
    }
}

impl SandboxConfig {
    pub fn start_timeout(&self) -> Duration {
        Duration::from_secs(self.start_timeout_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn home_root(&self) -> PathBuf {
        self.home_root.clone().unwrap_or_else(env::temp_dir)
    }
}

/// `near` whole tokens in yoctoNEAR, `None` past `Balance::MAX`
fn near_to_yocto(near: u64) -> Option<Balance> {
    Balance::from(near).checked_mul(ONE_NEAR)
}

fn tgas_to_gas(tgas: u64) -> Option<Gas> {
    tgas.checked_mul(TGAS)
}

impl AccountsConfig {
    /// Saturates at `Balance::MAX`; `Settings::validate` rejects such values
    pub fn initial_balance(&self) -> Balance {
        near_to_yocto(self.initial_balance_near).unwrap_or(Balance::MAX)
    }

    pub fn runner_balance(&self) -> Balance {
        near_to_yocto(self.runner_balance_near).unwrap_or(Balance::MAX)
    }
}

impl TransactionsConfig {
    /// Saturates at `Gas::MAX`; `Settings::validate` rejects such values
    pub fn default_gas(&self) -> Gas {
        tgas_to_gas(self.default_gas_tgas).unwrap_or(Gas::MAX)
    }
}

impl Settings {
    /// Defaults for a locally spawned sandbox
    pub fn sandbox() -> Self {
        Self {
            network: NetworkConfig {
                kind: NetworkKind::Sandbox,
                network_id: None,
                rpc_url: None,
                wallet_url: None,
                root_account: None,
                root_secret_key: None,
            },
            sandbox: SandboxConfig::default(),
            accounts: AccountsConfig::default(),
            transactions: TransactionsConfig::default(),
        }
    }

    /// Defaults for testnet with the given funding account
    pub fn testnet(root_account: AccountId, root_secret_key: impl Into<String>) -> Self {
        Self {
            network: NetworkConfig {
                kind: NetworkKind::Testnet,
                network_id: None,
                rpc_url: Some(TESTNET_RPC_URL.to_string()),
                wallet_url: Some(TESTNET_WALLET_URL.to_string()),
                root_account: Some(root_account),
                root_secret_key: Some(root_secret_key.into()),
            },
            sandbox: SandboxConfig::default(),
            accounts: AccountsConfig::default(),
            transactions: TransactionsConfig::default(),
        }
    }

    /// Load settings from a configuration file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let config_str = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;
        Self::parse(&config_str)
    }

    /// Parse settings from TOML text
    pub fn parse(config_str: &str) -> Result<Self> {
        // Substitute environment variables
        let config_str = substitute_env_vars(config_str);

        let settings: Settings =
            toml::from_str(&config_str).with_context(|| "Failed to parse configuration")?;

        settings.validate()?;

        Ok(settings)
    }

    /// Resolve settings at the process boundary.
    ///
    /// `NEAR_RUNNER_CONFIG` names a file to load; otherwise
    /// `NEAR_RUNNER_NETWORK` picks sandbox (default) or testnet defaults.
    pub fn from_env() -> Result<Self> {
        if let Ok(path) = env::var(CONFIG_ENV) {
            return Self::load(PathBuf::from(path));
        }

        let network = env::var(NETWORK_ENV).unwrap_or_else(|_| "sandbox".to_string());
        let settings = match network.as_str() {
            "sandbox" => Self::sandbox(),
            "testnet" => {
                let root_account: AccountId = env::var(ROOT_ACCOUNT_ENV)
                    .with_context(|| format!("{} must be set for testnet", ROOT_ACCOUNT_ENV))?
                    .parse()
                    .with_context(|| format!("Invalid {}", ROOT_ACCOUNT_ENV))?;
                let secret_key = env::var(ROOT_SECRET_KEY_ENV)
                    .with_context(|| format!("{} must be set for testnet", ROOT_SECRET_KEY_ENV))?;
                Self::testnet(root_account, secret_key)
            }
            other => anyhow::bail!("Unknown network {:?} in {}", other, NETWORK_ENV),
        };

        settings.validate()?;
        Ok(settings)
    }

    /// Validate configuration
    fn validate(&self) -> Result<()> {
        if let Some(network_id) = &self.network.network_id {
            if network_id.is_empty() {
                anyhow::bail!("network_id must not be empty");
            }
        }

        if self.network.kind == NetworkKind::Testnet {
            if self.network.rpc_url.is_none() {
                anyhow::bail!("Testnet requires rpc_url");
            }
            if self.network.root_account.is_none() || self.network.root_secret_key.is_none() {
                anyhow::bail!("Testnet requires root_account and root_secret_key");
            }
        }

        if self.network.kind == NetworkKind::Sandbox && self.network.rpc_url.is_some() {
            tracing::warn!("rpc_url is ignored for sandbox networks");
        }

        if near_to_yocto(self.accounts.initial_balance_near).is_none() {
            anyhow::bail!(
                "initial_balance_near {} overflows a yoctoNEAR balance",
                self.accounts.initial_balance_near
            );
        }
        if near_to_yocto(self.accounts.runner_balance_near).is_none() {
            anyhow::bail!(
                "runner_balance_near {} overflows a yoctoNEAR balance",
                self.accounts.runner_balance_near
            );
        }
        if tgas_to_gas(self.transactions.default_gas_tgas).is_none() {
            anyhow::bail!(
                "default_gas_tgas {} overflows a gas amount",
                self.transactions.default_gas_tgas
            );
        }

        if let Some(wallet_url) = &self.network.wallet_url {
            Url::parse(wallet_url).with_context(|| format!("Invalid wallet_url {:?}", wallet_url))?;
        }

        if self.accounts.initial_balance_near == 0 {
            tracing::warn!("initial_balance_near is 0 - created accounts cannot pay for storage");
        }

        Ok(())
    }

    pub fn network_id(&self) -> &str {
        self.network
            .network_id
            .as_deref()
            .unwrap_or_else(|| self.network.kind.default_network_id())
    }

    pub fn is_sandbox(&self) -> bool {
        self.network.kind == NetworkKind::Sandbox
    }
}

/// Substitute environment variables in the format ${VAR_NAME}
fn substitute_env_vars(input: &str) -> String {
    lazy_static::lazy_static! {
        static ref ENV_VAR_RE: regex::Regex =
            regex::Regex::new(r"\$\{([A-Z_][A-Z0-9_]*)\}").unwrap();
    }

    let mut result = input.to_string();
    for cap in ENV_VAR_RE.captures_iter(input) {
        let var_name = &cap[1];
        let var_value = env::var(var_name).unwrap_or_default();
        result = result.replace(&cap[0], &var_value);
    }

    result
}
