use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::{Hex, PlayerId, PlayerState, Shortcut, Tile, Unit};

/// Full world state for persistence and for seeding transactions on another peer.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    /// Number of commits applied to the world this snapshot was taken from.
    pub version: u64,
    pub turn: u32,
    pub current_player: PlayerId,
    /// Indexed by `PlayerId`; its length is the player count.
    pub players: Vec<PlayerState>,
    /// Sorted by coordinate.
    pub tiles: Vec<Tile>,
    /// Sorted by coordinate.
    pub units: Vec<Unit>,
    pub rng_state: [u8; 32], // combat rolls replay from here
    /// Hash of the rules the world was built against.
    #[serde(default)]
    pub rules_hash: u64,
    /// Last player left with units, once the game is over.
    #[serde(default)]
    pub winner: Option<PlayerId>,
}

impl Snapshot {
    pub fn is_finished(&self) -> bool {
        self.winner.is_some()
    }
}

impl Snapshot {
    pub fn player_count(&self) -> usize {
        self.players.len()
    }

    /// Shortcut to coordinate mirror of the unit list.
    pub fn unit_index(&self) -> BTreeMap<Shortcut, Hex> {
        self.units
            .iter()
            .map(|u| (u.shortcut.clone(), u.coord))
            .collect()
    }

    pub fn unit_at(&self, coord: Hex) -> Option<&Unit> {
        self.units
            .binary_search_by(|u| u.coord.cmp(&coord))
            .ok()
            .map(|i| &self.units[i])
    }

    pub fn tile_at(&self, coord: Hex) -> Option<&Tile> {
        self.tiles
            .binary_search_by(|t| t.coord.cmp(&coord))
            .ok()
            .map(|i| &self.tiles[i])
    }
}
