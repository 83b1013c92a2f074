use std::time::Duration;

use anyhow::{Context, Result, bail};
use rand::Rng;
use tilechain_client::tilemap::{Color, Point, Tile};
use tilechain_client::{CallFailure, ClientError, TileChainClient, TileMapState};
use tokio::sync::mpsc;
use tokio::time::{Instant, MissedTickBehavior, interval};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

const QUICKSTART_EVENT_TIMEOUT: Duration = Duration::from_secs(10);
const QUICKSTART_FRAME: Duration = Duration::from_millis(33);

/// Fetch the tile map once and render it as JSON.
pub async fn inspect(client: &TileChainClient) -> Result<String> {
    let state = client
        .get_state()
        .await
        .context("failed to fetch tile map")?
        .unwrap_or_default();
    Ok(serde_json::to_string_pretty(&state)?)
}

/// Read the raw state, write a one-tile map and pump until the matching
/// update comes back.
pub async fn quickstart(
    client: &TileChainClient,
    shutdown_token: &CancellationToken,
) -> Result<TileMapState> {
    match client.get_state_raw().await {
        Ok(raw) => info!(raw = %raw, "Static call result"),
        Err(ClientError::CallFailed {
            reason: CallFailure::NoResult,
            ..
        }) => warn!("Contract returned nothing"),
        Err(e) => return Err(e).context("static call failed"),
    }

    let (tx, mut rx) = mpsc::unbounded_channel();
    let observer = client.on_state_updated(move |state: &TileMapState| {
        let _ = tx.send(state.clone());
    });

    let n = rand::rng().random_range(0..100);
    let sent = TileMapState {
        tiles: vec![Tile {
            point: Point { x: n, y: n },
            color: Color { r: 255, g: 0, b: 0 },
        }],
    };
    info!(n, "Calling setter");
    let receipt = client
        .set_state(&sent)
        .await
        .context("failed to submit tile map")?;
    info!(tx_hash = ?receipt.tx_hash, block = ?receipt.block_number, "Setter mined");

    let deadline = Instant::now() + QUICKSTART_EVENT_TIMEOUT;
    let mut ticker = interval(QUICKSTART_FRAME);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let outcome = loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = shutdown_token.cancelled() => break Err(anyhow::anyhow!("Shutdown requested")),
        }
        client.pump();
        if let Ok(state) = rx.try_recv() {
            info!(tiles = state.tiles.len(), "Event received");
            break Ok(state);
        }
        if Instant::now() >= deadline {
            break Err(anyhow::anyhow!(
                "no state update within {}s",
                QUICKSTART_EVENT_TIMEOUT.as_secs()
            ));
        }
    };
    observer.cancel();

    let received = outcome?;
    if received != sent {
        bail!("update event carried a different tile map than the one sent");
    }
    Ok(received)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tilechain_client::mock::MockBackend;
    use tilechain_client::{EndpointPair, Identity};
    use tracing::Span;

    fn client(backend: &MockBackend) -> TileChainClient {
        TileChainClient::builder(Identity::generate(), backend.descriptor())
            .endpoints(EndpointPair::new("mock://write", "mock://read"))
            .connector(backend.connector())
            .span(Span::none())
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn inspect_prints_empty_map_for_fresh_contract() {
        let backend = MockBackend::tiles_chain();
        let json = inspect(&client(&backend)).await.unwrap();
        let state: TileMapState = serde_json::from_str(&json).unwrap();
        assert!(state.tiles.is_empty());
    }

    #[tokio::test]
    async fn quickstart_round_trips_one_tile() {
        let backend = MockBackend::tiles_chain();
        let client = client(&backend);

        let state = quickstart(&client, &CancellationToken::new()).await.unwrap();
        assert_eq!(state.tiles.len(), 1);
        assert_eq!(client.get_state().await.unwrap(), Some(state));
        assert_eq!(backend.transactions().len(), 1);
    }

    #[tokio::test]
    async fn quickstart_tolerates_empty_getter_payload() {
        let backend = MockBackend::tiles_chain();
        backend.respond_empty(true);
        let client = client(&backend);

        assert!(quickstart(&client, &CancellationToken::new()).await.is_ok());
    }

    #[tokio::test]
    async fn quickstart_fails_when_the_setter_is_rejected() {
        let backend = MockBackend::tiles_chain();
        backend.reject_transactions(Some("out of gas".into()));
        let client = client(&backend);

        assert!(quickstart(&client, &CancellationToken::new()).await.is_err());
    }
}
