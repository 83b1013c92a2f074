use std::sync::Arc;

use anyhow::{Context, Result, bail};
use tilechain_client::mock::MockBackend;
use tilechain_client::retry::{RetryConfig, retry_connection};
use tilechain_client::transport::ws::WsConnector;
use tilechain_client::{Connector, Identity, TileChainClient};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::args::HostConfig;
use crate::keygen::{IdentityStatus, display_identity_status};

/// Build the tile map client. Offline, the contract lives in memory and a
/// missing key file is replaced by a throwaway identity.
pub fn create_client(config: &HostConfig) -> Result<TileChainClient> {
    let bridge = &config.bridge;
    let key_file = bridge.keys.private_key_file.clone();

    let (identity, status) = match bridge.key_source() {
        Ok(source) => {
            let identity = source.load().with_context(|| {
                format!("failed to load key material from {}", source.path().display())
            })?;
            (identity, IdentityStatus::Loaded)
        }
        Err(e) if config.offline => {
            warn!(reason = %e, "No key file, using an ephemeral identity");
            (Identity::generate(), IdentityStatus::Ephemeral)
        }
        Err(e) => return Err(e).context("failed to load key material"),
    };

    let (descriptor, connector): (_, Arc<dyn Connector>) = if config.offline {
        let backend = if bridge.contract.descriptor.as_os_str().is_empty() {
            MockBackend::tiles_chain()
        } else {
            MockBackend::new(
                bridge
                    .load_descriptor()
                    .context("failed to load contract descriptor")?,
                bridge.state.clone(),
            )
        };
        (backend.descriptor(), backend.connector())
    } else {
        let descriptor = bridge
            .load_descriptor()
            .context("failed to load contract descriptor")?;
        (descriptor, Arc::new(WsConnector::default()))
    };

    display_identity_status(status, &identity, &key_file, &bridge.endpoints.write_url);

    let client = TileChainClient::builder(identity, descriptor)
        .endpoints(bridge.endpoints.clone())
        .connector(connector)
        .options(bridge.client_options())
        .binding(bridge.state.clone())
        .build()
        .context("failed to build client")?;
    Ok(client)
}

/// Connect with retries, giving up early on shutdown.
pub async fn connect_with_retry(
    client: &TileChainClient,
    shutdown_token: &CancellationToken,
) -> Result<()> {
    tokio::select! {
        result = retry_connection(RetryConfig::default(), "connect", || client.connect()) => {
            result.context("failed to connect to chain")?;
            info!(contract = %client.descriptor().address(), "Connected");
            Ok(())
        }
        _ = shutdown_token.cancelled() => {
            bail!("Shutdown requested during initial connect");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tilechain_client::{BridgeConfig, EndpointPair};

    fn offline_config(dir: &tempfile::TempDir) -> HostConfig {
        let mut bridge = BridgeConfig::new(
            EndpointPair::new("mock://write", "mock://read"),
            std::path::PathBuf::new(),
        );
        bridge.keys.private_key_file = dir.path().join("missing_key");
        bridge.keys.mnemonic_file = dir.path().join("missing_mnemonic");
        HostConfig {
            bridge,
            offline: true,
        }
    }

    #[tokio::test]
    async fn offline_client_connects_with_ephemeral_identity() {
        let dir = tempfile::tempdir().unwrap();
        let client = create_client(&offline_config(&dir)).unwrap();
        connect_with_retry(&client, &CancellationToken::new())
            .await
            .unwrap();
        assert!(client.is_connected());
    }

    #[tokio::test]
    async fn offline_client_uses_key_file_when_present() {
        let dir = tempfile::tempdir().unwrap();
        let config = offline_config(&dir);
        let identity = Identity::generate();
        std::fs::write(&config.bridge.keys.private_key_file, identity.to_hex()).unwrap();

        let client = create_client(&config).unwrap();
        assert_eq!(client.identity().address(), identity.address());
    }

    #[test]
    fn online_client_needs_key_material() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = offline_config(&dir);
        config.offline = false;
        assert!(create_client(&config).is_err());
    }
}
