use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use alloy::primitives::Address;
use serde::{Deserialize, Serialize};

use crate::connection::EndpointPair;
use crate::descriptor::ContractDescriptor;
use crate::error::{ClientError, Result};
use crate::identity::{Identity, KeySource};

pub mod consts;

use consts::*;

/// Everything needed to build a client, as read from a TOML file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BridgeConfig {
    pub endpoints: EndpointPair,
    pub contract: ContractConfig,
    #[serde(default)]
    pub keys: KeyFiles,
    #[serde(default)]
    pub state: StateBinding,
    #[serde(default)]
    pub transactions: TransactionConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContractConfig {
    /// JSON ABI array or truffle artifact.
    pub descriptor: PathBuf,
    #[serde(default)]
    pub address: Option<Address>,
    #[serde(default)]
    pub network_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyFiles {
    #[serde(default = "default_private_key_file")]
    pub private_key_file: PathBuf,
    #[serde(default = "default_mnemonic_file")]
    pub mnemonic_file: PathBuf,
}

impl Default for KeyFiles {
    fn default() -> Self {
        Self {
            private_key_file: default_private_key_file(),
            mnemonic_file: default_mnemonic_file(),
        }
    }
}

/// Contract members the synchronizer reads, writes and listens to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateBinding {
    #[serde(default = "default_getter")]
    pub getter: String,
    #[serde(default = "default_setter")]
    pub setter: String,
    #[serde(default = "default_event")]
    pub event: String,
}

impl Default for StateBinding {
    fn default() -> Self {
        Self {
            getter: default_getter(),
            setter: default_setter(),
            event: default_event(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionConfig {
    #[serde(default = "default_chain_id")]
    pub chain_id: u64,
    #[serde(default = "default_gas_limit")]
    pub gas_limit: u64,
    /// Fixed gas price in wei. Overrides the network price when set.
    #[serde(default)]
    pub gas_price: Option<u64>,
    /// Ask the node for `eth_gasPrice` when no fixed price is set. When off
    /// and no price is set, transactions carry a zero gas price.
    #[serde(default = "default_network_gas_price")]
    pub network_gas_price: bool,
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    #[serde(default = "default_call_timeout_secs")]
    pub call_timeout_secs: u64,
}

impl Default for TransactionConfig {
    fn default() -> Self {
        Self {
            chain_id: DEFAULT_CHAIN_ID,
            gas_limit: DEFAULT_GAS_LIMIT,
            gas_price: None,
            network_gas_price: true,
            connect_timeout_secs: DEFAULT_CONNECT_TIMEOUT_SECS,
            call_timeout_secs: DEFAULT_CALL_TIMEOUT_SECS,
        }
    }
}

/// Runtime knobs for connections and transactions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientOptions {
    pub chain_id: u64,
    pub gas_limit: u64,
    pub gas_price: Option<u128>,
    pub network_gas_price: bool,
    pub connect_timeout: Duration,
    pub call_timeout: Duration,
}

impl Default for ClientOptions {
    fn default() -> Self {
        TransactionConfig::default().into()
    }
}

impl From<TransactionConfig> for ClientOptions {
    fn from(config: TransactionConfig) -> Self {
        Self {
            chain_id: config.chain_id,
            gas_limit: config.gas_limit,
            gas_price: config.gas_price.map(u128::from),
            network_gas_price: config.network_gas_price,
            connect_timeout: Duration::from_secs(config.connect_timeout_secs),
            call_timeout: Duration::from_secs(config.call_timeout_secs),
        }
    }
}

impl BridgeConfig {
    pub fn new(endpoints: EndpointPair, descriptor: impl Into<PathBuf>) -> Self {
        Self {
            endpoints,
            contract: ContractConfig {
                descriptor: descriptor.into(),
                address: None,
                network_id: None,
            },
            keys: KeyFiles::default(),
            state: StateBinding::default(),
            transactions: TransactionConfig::default(),
        }
    }

    pub fn validate(&self) -> Result<()> {
        let checks = [
            (self.endpoints.write_url.trim().is_empty(), "write endpoint is empty"),
            (self.endpoints.read_url.trim().is_empty(), "read endpoint is empty"),
            (self.transactions.gas_limit == 0, "gas limit must be positive"),
            (
                self.transactions.connect_timeout_secs == 0,
                "connect timeout must be positive",
            ),
            (
                self.transactions.call_timeout_secs == 0,
                "call timeout must be positive",
            ),
            (self.state.getter.is_empty(), "state getter is empty"),
            (self.state.setter.is_empty(), "state setter is empty"),
            (self.state.event.is_empty(), "state event is empty"),
        ];
        match checks.iter().find(|(failed, _)| *failed) {
            Some((_, reason)) => Err(ClientError::Config(reason.to_string())),
            None => Ok(()),
        }
    }

    pub fn client_options(&self) -> ClientOptions {
        self.transactions.clone().into()
    }

    pub fn key_source(&self) -> Result<KeySource> {
        KeySource::resolve(&self.keys.private_key_file, &self.keys.mnemonic_file)
    }

    pub fn load_identity(&self) -> Result<Identity> {
        self.key_source()?.load()
    }

    pub fn load_descriptor(&self) -> Result<ContractDescriptor> {
        Ok(ContractDescriptor::load(
            &self.contract.descriptor,
            self.contract.address,
            self.contract.network_id.as_deref(),
        )?)
    }
}

/// Read and validate a TOML configuration file.
pub fn load_config_from_path<P: AsRef<Path>>(path: P) -> anyhow::Result<BridgeConfig> {
    let s = fs::read_to_string(path)?;
    let cfg: BridgeConfig = toml::from_str(&s)?;
    cfg.validate()?;
    Ok(cfg)
}

fn default_private_key_file() -> PathBuf {
    PathBuf::from(DEFAULT_PRIVATE_KEY_FILE)
}

fn default_mnemonic_file() -> PathBuf {
    PathBuf::from(DEFAULT_MNEMONIC_FILE)
}

fn default_network_gas_price() -> bool {
    true
}

fn default_getter() -> String {
    DEFAULT_STATE_GETTER.to_string()
}

fn default_setter() -> String {
    DEFAULT_STATE_SETTER.to_string()
}

fn default_event() -> String {
    DEFAULT_STATE_EVENT.to_string()
}

fn default_chain_id() -> u64 {
    DEFAULT_CHAIN_ID
}

fn default_gas_limit() -> u64 {
    DEFAULT_GAS_LIMIT
}

fn default_connect_timeout_secs() -> u64 {
    DEFAULT_CONNECT_TIMEOUT_SECS
}

fn default_call_timeout_secs() -> u64 {
    DEFAULT_CALL_TIMEOUT_SECS
}
