//! The tile map carried by the example contract.

use serde::{Deserialize, Serialize};

use crate::sync::StateSynchronizer;

pub const GET_STATE_METHOD: &str = "GetTileMapState";
pub const SET_STATE_METHOD: &str = "SetTileMapState";
pub const STATE_UPDATED_EVENT: &str = "OnTileMapStateUpdate";

/// ABI of the `TilesChain` contract: one string slot with a getter, a setter
/// and an update event.
pub const TILES_CHAIN_ABI: &str = r#"[
  {
    "type": "event",
    "name": "OnTileMapStateUpdate",
    "anonymous": false,
    "inputs": [{ "name": "state", "type": "string", "indexed": false }]
  },
  {
    "type": "function",
    "name": "GetTileMapState",
    "stateMutability": "view",
    "inputs": [],
    "outputs": [{ "name": "", "type": "string" }]
  },
  {
    "type": "function",
    "name": "SetTileMapState",
    "stateMutability": "nonpayable",
    "inputs": [{ "name": "_tileState", "type": "string" }],
    "outputs": []
  }
]"#;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Point {
    pub x: i32,
    pub y: i32,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Color {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tile {
    pub point: Point,
    pub color: Color,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TileMapState {
    #[serde(default)]
    pub tiles: Vec<Tile>,
}

impl TileMapState {
    /// Place a tile, replacing whatever was at the same point.
    pub fn place(&mut self, tile: Tile) {
        match self.tiles.iter_mut().find(|t| t.point == tile.point) {
            Some(existing) => existing.color = tile.color,
            None => self.tiles.push(tile),
        }
    }

    pub fn tile_at(&self, point: Point) -> Option<&Tile> {
        self.tiles.iter().find(|t| t.point == point)
    }
}

/// State synchronizer bound to the tile map.
pub type TileChainClient = StateSynchronizer<TileMapState>;
