use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use parking_lot::Mutex;
use rand::Rng;
use tilechain_client::tilemap::{Color, Point, Tile};
use tilechain_client::{TileChainClient, TileMapState};
use tokio::time::{MissedTickBehavior, interval};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::args::PlayArgs;

/// Counters reported when the loop stops.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FrameStats {
    pub frames: u64,
    pub callbacks: usize,
    pub tiles_placed: u64,
}

/// Fixed-rate loop that pumps state callbacks every frame and now and then
/// drops a tile at a random point.
pub struct FrameLoop {
    client: Arc<TileChainClient>,
    args: PlayArgs,
    board: Arc<Mutex<TileMapState>>,
    color: Color,
    shutdown_token: CancellationToken,
}

impl FrameLoop {
    pub fn new(
        client: Arc<TileChainClient>,
        args: PlayArgs,
        shutdown_token: CancellationToken,
    ) -> Self {
        let mut rng = rand::rng();
        let color = Color {
            r: rng.random(),
            g: rng.random(),
            b: rng.random(),
        };
        Self {
            client,
            args,
            board: Arc::new(Mutex::new(TileMapState::default())),
            color,
            shutdown_token,
        }
    }

    pub fn board(&self) -> TileMapState {
        self.board.lock().clone()
    }

    pub async fn run(&self) -> Result<FrameStats> {
        match self.client.get_state().await {
            Ok(Some(state)) => {
                info!(tiles = state.tiles.len(), "Loaded tile map");
                *self.board.lock() = state;
            }
            Ok(None) => info!("Contract holds no tile map yet"),
            Err(e) => warn!(error = %e, "Failed to fetch initial tile map"),
        }

        let board = self.board.clone();
        let observer = self.client.on_state_updated(move |state: &TileMapState| {
            info!(tiles = state.tiles.len(), "Tile map updated");
            *board.lock() = state.clone();
        });

        let period = Duration::from_secs_f64(1.0 / f64::from(self.args.fps));
        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        info!(fps = self.args.fps, place_every = self.args.place_every, "Frame loop started");

        let mut stats = FrameStats::default();
        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = self.shutdown_token.cancelled() => {
                    info!("Shutdown requested, leaving frame loop");
                    break;
                }
            }

            stats.frames += 1;
            stats.callbacks += self.client.pump();

            if self.args.place_every > 0 && stats.frames % self.args.place_every == 0 {
                self.place_random_tile();
                stats.tiles_placed += 1;
            }
            if self.args.frames.is_some_and(|limit| stats.frames >= limit) {
                break;
            }
        }

        observer.cancel();
        info!(
            frames = stats.frames,
            callbacks = stats.callbacks,
            tiles_placed = stats.tiles_placed,
            "Frame loop stopped"
        );
        Ok(stats)
    }

    /// Update the local board and submit it without blocking the frame.
    fn place_random_tile(&self) {
        let point = {
            let mut rng = rand::rng();
            Point {
                x: rng.random_range(0..self.args.field_width),
                y: rng.random_range(0..self.args.field_height),
            }
        };
        let snapshot = {
            let mut board = self.board.lock();
            board.place(Tile {
                point,
                color: self.color,
            });
            board.clone()
        };

        let client = self.client.clone();
        tokio::spawn(async move {
            match client.set_state(&snapshot).await {
                Ok(receipt) => debug!(
                    tx_hash = ?receipt.tx_hash,
                    tiles = snapshot.tiles.len(),
                    "Tile map submitted"
                ),
                Err(e) => warn!(error = %e, "Failed to submit tile map"),
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tilechain_client::mock::MockBackend;
    use tilechain_client::{EndpointPair, Identity};
    use tracing::Span;

    fn client(backend: &MockBackend) -> Arc<TileChainClient> {
        Arc::new(
            TileChainClient::builder(Identity::generate(), backend.descriptor())
                .endpoints(EndpointPair::new("mock://write", "mock://read"))
                .connector(backend.connector())
                .span(Span::none())
                .build()
                .unwrap(),
        )
    }

    fn play(frames: u64, place_every: u64) -> PlayArgs {
        PlayArgs {
            fps: 30,
            place_every,
            field_width: 4,
            field_height: 4,
            frames: Some(frames),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn places_tiles_on_schedule() {
        let backend = MockBackend::tiles_chain();
        let frame_loop = FrameLoop::new(client(&backend), play(20, 2), CancellationToken::new());

        let stats = frame_loop.run().await.unwrap();
        assert_eq!(stats.frames, 20);
        assert_eq!(stats.tiles_placed, 10);

        for _ in 0..100 {
            if backend.transactions().len() == 10 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(backend.transactions().len(), 10);
        let board = frame_loop.board();
        assert!(!board.tiles.is_empty());
        let on_field = |t: &Tile| (0..4).contains(&t.point.x) && (0..4).contains(&t.point.y);
        assert!(board.tiles.iter().all(on_field));
    }

    #[tokio::test(start_paused = true)]
    async fn starts_from_stored_state_and_follows_updates() {
        let backend = MockBackend::tiles_chain();
        let initial = TileMapState {
            tiles: vec![Tile {
                point: Point { x: 9, y: 9 },
                color: Color { r: 1, g: 2, b: 3 },
            }],
        };
        backend.set_stored_state(serde_json::to_string(&initial).unwrap());

        let client = client(&backend);
        let frame_loop = FrameLoop::new(client.clone(), play(3, 0), CancellationToken::new());
        frame_loop.run().await.unwrap();
        assert_eq!(frame_loop.board(), initial);

        let mut next = initial.clone();
        next.place(Tile {
            point: Point { x: 0, y: 0 },
            color: Color { r: 4, g: 5, b: 6 },
        });
        client.set_state(&next).await.unwrap();
        for _ in 0..100 {
            if client.pending_callbacks() > 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        let stats = frame_loop.run().await.unwrap();
        assert_eq!(stats.callbacks, 1);
        assert_eq!(frame_loop.board(), next);
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_stops_the_loop() {
        let backend = MockBackend::tiles_chain();
        let token = CancellationToken::new();
        let mut args = play(0, 0);
        args.frames = None;
        let frame_loop = FrameLoop::new(client(&backend), args, token.clone());

        let canceller = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            canceller.cancel();
        });
        let stats = frame_loop.run().await.unwrap();
        assert!(stats.frames >= 25);
        assert_eq!(stats.tiles_placed, 0);
    }
}
