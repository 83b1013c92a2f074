use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use clap::{Args, Parser, Subcommand};
use tilechain_client::config::KeyFiles;
use tilechain_client::{Address, BridgeConfig, EndpointPair, load_config_from_path};
use tracing::info;

/// Endpoints used with `--offline` when nothing else is configured.
const OFFLINE_WRITE_URL: &str = "mock://write";
const OFFLINE_READ_URL: &str = "mock://read";

/// CLI arguments for the host
#[derive(Parser, Debug)]
#[command(name = "tilechain_host")]
#[command(
    about = "Tilechain host - frame loop over a tile map kept in a smart contract",
    long_about = None
)]
pub struct CliArgs {
    /// TOML configuration file. Flags and environment variables override it
    #[arg(long, short, env = "TILECHAIN_CONFIG")]
    pub config: Option<PathBuf>,

    /// Endpoint transactions are sent to (http(s) is converted to WebSocket)
    #[arg(long, env = "TILECHAIN_WRITE_URL")]
    pub write_url: Option<String>,

    /// Endpoint queries and event subscriptions go to
    #[arg(long, env = "TILECHAIN_READ_URL")]
    pub read_url: Option<String>,

    /// Contract ABI (JSON array) or truffle artifact
    #[arg(long, env = "TILECHAIN_CONTRACT_DESCRIPTOR")]
    pub contract_descriptor: Option<PathBuf>,

    /// Contract address. Overrides the artifact's deployment table
    #[arg(long, env = "TILECHAIN_CONTRACT_ADDRESS")]
    pub contract_address: Option<Address>,

    /// Network id to pick from the artifact's deployment table
    #[arg(long, env = "TILECHAIN_NETWORK_ID")]
    pub network_id: Option<String>,

    /// File holding the hex (or base64) private key
    #[arg(long, env = "TILECHAIN_PRIVATE_KEY_FILE")]
    pub private_key_file: Option<PathBuf>,

    /// File holding a BIP-39 mnemonic, used when no private key file exists
    #[arg(long, env = "TILECHAIN_MNEMONIC_FILE")]
    pub mnemonic_file: Option<PathBuf>,

    /// Chain id transactions are signed for
    #[arg(long, env = "TILECHAIN_CHAIN_ID")]
    pub chain_id: Option<u64>,

    /// Run against an in-memory contract instead of a node
    #[arg(long, env = "TILECHAIN_OFFLINE", global = true)]
    pub offline: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Run the frame loop, placing random tiles
    Play(PlayArgs),
    /// Print the current tile map as JSON
    Inspect,
    /// Read the state, write one tile and wait for the update event
    Quickstart,
    /// Generate a private key file
    Keygen,
}

#[derive(Args, Debug, Clone)]
pub struct PlayArgs {
    /// Frames per second
    #[arg(long, default_value_t = 30, value_parser = clap::value_parser!(u32).range(1..=240))]
    pub fps: u32,

    /// Place a tile every N frames (0 never places)
    #[arg(long, default_value_t = 45)]
    pub place_every: u64,

    /// Width of the field tiles are placed in
    #[arg(long, default_value_t = 16, value_parser = clap::value_parser!(i32).range(1..))]
    pub field_width: i32,

    /// Height of the field tiles are placed in
    #[arg(long, default_value_t = 16, value_parser = clap::value_parser!(i32).range(1..))]
    pub field_height: i32,

    /// Stop after this many frames instead of running until interrupted
    #[arg(long)]
    pub frames: Option<u64>,
}

/// Host configuration with the TOML file and the CLI merged
#[derive(Debug, Clone)]
pub struct HostConfig {
    pub bridge: BridgeConfig,
    pub offline: bool,
}

impl HostConfig {
    /// Load configuration with priority: CLI/env -> TOML file -> defaults
    pub fn load(args: &CliArgs) -> Result<Self> {
        let mut bridge = match &args.config {
            Some(path) => load_config_from_path(path)
                .with_context(|| format!("failed to load config {}", path.display()))?,
            None => BridgeConfig::new(EndpointPair::new("", ""), PathBuf::new()),
        };

        if let Some(url) = &args.write_url {
            bridge.endpoints.write_url = url.clone();
        }
        if let Some(url) = &args.read_url {
            bridge.endpoints.read_url = url.clone();
        }
        if let Some(path) = &args.contract_descriptor {
            bridge.contract.descriptor = path.clone();
        }
        if args.contract_address.is_some() {
            bridge.contract.address = args.contract_address;
        }
        if args.network_id.is_some() {
            bridge.contract.network_id = args.network_id.clone();
        }
        if let Some(path) = &args.private_key_file {
            bridge.keys.private_key_file = path.clone();
        }
        if let Some(path) = &args.mnemonic_file {
            bridge.keys.mnemonic_file = path.clone();
        }
        if let Some(chain_id) = args.chain_id {
            bridge.transactions.chain_id = chain_id;
        }

        if args.offline {
            if bridge.endpoints.write_url.is_empty() {
                bridge.endpoints.write_url = OFFLINE_WRITE_URL.into();
            }
            if bridge.endpoints.read_url.is_empty() {
                bridge.endpoints.read_url = OFFLINE_READ_URL.into();
            }
        } else if bridge.contract.descriptor.as_os_str().is_empty() {
            bail!("no contract descriptor configured (--contract-descriptor)");
        }

        bridge.validate().context("invalid configuration")?;

        info!(
            write_url = %bridge.endpoints.write_url,
            read_url = %bridge.endpoints.read_url,
            descriptor = %bridge.contract.descriptor.display(),
            chain_id = bridge.transactions.chain_id,
            offline = args.offline,
            "Loaded HostConfig"
        );

        Ok(Self {
            bridge,
            offline: args.offline,
        })
    }

    /// Key file locations only; `keygen` needs nothing else.
    pub fn key_files(args: &CliArgs) -> Result<KeyFiles> {
        let mut keys = match &args.config {
            Some(path) => {
                load_config_from_path(path)
                    .with_context(|| format!("failed to load config {}", path.display()))?
                    .keys
            }
            None => KeyFiles::default(),
        };
        if let Some(path) = &args.private_key_file {
            keys.private_key_file = path.clone();
        }
        if let Some(path) = &args.mnemonic_file {
            keys.mnemonic_file = path.clone();
        }
        Ok(keys)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> CliArgs {
        let mut argv = vec!["tilechain_host"];
        argv.extend_from_slice(args);
        CliArgs::try_parse_from(argv).unwrap()
    }

    #[test]
    fn offline_needs_no_endpoints_or_descriptor() {
        let args = parse(&["--offline", "inspect"]);
        let config = HostConfig::load(&args).unwrap();
        assert!(config.offline);
        assert_eq!(config.bridge.endpoints.write_url, OFFLINE_WRITE_URL);
        assert_eq!(config.bridge.endpoints.read_url, OFFLINE_READ_URL);
    }

    #[test]
    fn online_requires_descriptor() {
        let args = parse(&[
            "--write-url",
            "ws://127.0.0.1:8545",
            "--read-url",
            "ws://127.0.0.1:8545",
            "inspect",
        ]);
        assert!(HostConfig::load(&args).is_err());
    }

    #[test]
    fn cli_overrides_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tilechain.toml");
        std::fs::write(
            &path,
            r#"
[endpoints]
write_url = "ws://node:46658/websocket"
read_url = "ws://node:46658/queryws"

[contract]
descriptor = "TilesChain.json"
network_id = "5777"

[transactions]
chain_id = 5777
"#,
        )
        .unwrap();

        let args = parse(&[
            "--config",
            path.to_str().unwrap(),
            "--read-url",
            "ws://other:8546",
            "--chain-id",
            "31337",
            "play",
            "--fps",
            "60",
        ]);
        let config = HostConfig::load(&args).unwrap();
        assert_eq!(config.bridge.endpoints.write_url, "ws://node:46658/websocket");
        assert_eq!(config.bridge.endpoints.read_url, "ws://other:8546");
        assert_eq!(config.bridge.transactions.chain_id, 31337);
        assert_eq!(config.bridge.contract.network_id.as_deref(), Some("5777"));
        assert!(matches!(args.command, Command::Play(PlayArgs { fps: 60, .. })));
    }

    #[test]
    fn play_rejects_empty_field() {
        let argv = ["tilechain_host", "play", "--field-width", "0"];
        assert!(CliArgs::try_parse_from(argv).is_err());
    }

    #[test]
    fn key_files_follow_flags() {
        let args = parse(&["--private-key-file", "/tmp/host.key", "keygen"]);
        let keys = HostConfig::key_files(&args).unwrap();
        assert_eq!(keys.private_key_file, PathBuf::from("/tmp/host.key"));
    }
}
