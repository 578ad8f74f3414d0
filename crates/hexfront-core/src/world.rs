use std::collections::{BTreeMap, BTreeSet, HashMap};

use hexfront_protocol::{Hex, PlayerId, PlayerState, Shortcut, Snapshot, Tile, Unit};
use thiserror::Error;
use tracing::debug;

use crate::rules::CompiledRules;
use crate::GameRng;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WorldError {
    #[error("coordinate {0} is off the map")]
    OutOfBounds(Hex),
    #[error("coordinate {0} is already occupied")]
    Occupied(Hex),
    #[error("no unit at {0}")]
    NotFound(Hex),
    #[error("no live unit with shortcut {0}")]
    UnknownShortcut(Shortcut),
    #[error("shortcut {0} already belongs to another unit")]
    DuplicateShortcut(Shortcut),
    #[error("unknown player {0}")]
    UnknownPlayer(PlayerId),
    #[error("invalid snapshot: {0}")]
    InvalidSnapshot(String),
    #[error("tile {coord} has terrain id {id}, unknown to the loaded rules")]
    UnknownTerrain { coord: Hex, id: u16 },
    #[error("unit {shortcut} has unit type id {id}, unknown to the loaded rules")]
    UnknownUnitType { shortcut: Shortcut, id: u16 },
}

/// Read access shared by the root world and transaction layers.
pub trait WorldView {
    fn tile_at(&self, coord: Hex) -> Option<&Tile>;
    fn unit_at(&self, coord: Hex) -> Option<&Unit>;
    /// Current coordinate of a live unit.
    fn unit_coord(&self, shortcut: &Shortcut) -> Option<Hex>;
    fn player(&self, player: PlayerId) -> Option<&PlayerState>;
    fn player_count(&self) -> u8;
    fn current_player(&self) -> PlayerId;
    fn turn(&self) -> u32;
    /// Set once a single player is left with units; the game accepts no further actions.
    fn winner(&self) -> Option<PlayerId>;
    fn version(&self) -> u64;
    fn rules_hash(&self) -> u64;
    fn rng(&self) -> &GameRng;
    /// Every tile coordinate, sorted.
    fn tile_coords(&self) -> Vec<Hex>;
    /// Every occupied coordinate, sorted.
    fn unit_coords(&self) -> Vec<Hex>;

    fn unit_by_shortcut(&self, shortcut: &Shortcut) -> Option<&Unit> {
        self.unit_coord(shortcut).and_then(|c| self.unit_at(c))
    }

    /// Coordinates of `player`'s units, sorted.
    fn units_of(&self, player: PlayerId) -> Vec<Hex> {
        self.unit_coords()
            .into_iter()
            .filter(|c| self.unit_at(*c).is_some_and(|u| u.owner == player))
            .collect()
    }

    fn snapshot(&self) -> Snapshot {
        Snapshot {
            version: self.version(),
            turn: self.turn(),
            current_player: self.current_player(),
            players: (0..self.player_count())
                .map(|p| self.player(PlayerId(p)).cloned().unwrap_or_default())
                .collect(),
            tiles: self
                .tile_coords()
                .into_iter()
                .filter_map(|c| self.tile_at(c).cloned())
                .collect(),
            units: self
                .unit_coords()
                .into_iter()
                .filter_map(|c| self.unit_at(c).cloned())
                .collect(),
            rng_state: self.rng().state_bytes(),
            rules_hash: self.rules_hash(),
            winner: self.winner(),
        }
    }

    /// Opens a copy-on-write layer over this view.
    fn begin(&self) -> Transaction<'_>
    where
        Self: Sized,
    {
        Transaction::new(self)
    }
}

/// Write access. Layers implement the raw slot writes; validation lives in the provided methods.
pub trait WorldMut: WorldView {
    /// Overwrites the unit slot at `coord`, keeping player and shortcut indexes in step.
    fn write_unit(&mut self, coord: Hex, unit: Option<Unit>);
    /// Overwrites an existing tile.
    fn write_tile(&mut self, tile: Tile);
    fn player_mut(&mut self, player: PlayerId) -> Option<&mut PlayerState>;
    fn set_turn(&mut self, current_player: PlayerId, turn: u32);
    fn set_winner(&mut self, winner: PlayerId);
    fn rng_mut(&mut self) -> &mut GameRng;
    /// Called after a child layer's changes are merged in.
    fn on_commit(&mut self) {}

    /// Places a new unit. The coordinate must be on the map and empty.
    fn add_unit(&mut self, unit: Unit) -> Result<(), WorldError> {
        let coord = unit.coord;
        if self.tile_at(coord).is_none() {
            return Err(WorldError::OutOfBounds(coord));
        }
        if self.unit_at(coord).is_some() {
            return Err(WorldError::Occupied(coord));
        }
        if self.unit_coord(&unit.shortcut).is_some() {
            return Err(WorldError::DuplicateShortcut(unit.shortcut));
        }
        if self.player(unit.owner).is_none() {
            return Err(WorldError::UnknownPlayer(unit.owner));
        }
        // Counters never fall behind shortcuts already in play.
        if let Some((player, number)) = unit.shortcut.parts() {
            if self.player(player).is_some_and(|s| s.unit_counter < number) {
                if let Some(state) = self.player_mut(player) {
                    state.unit_counter = number;
                }
            }
        }
        self.write_unit(coord, Some(unit));
        Ok(())
    }

    /// Places a unit over whatever stands at its coordinate, returning the displaced unit.
    fn replace_unit(&mut self, unit: Unit) -> Result<Option<Unit>, WorldError> {
        let coord = unit.coord;
        if self.tile_at(coord).is_none() {
            return Err(WorldError::OutOfBounds(coord));
        }
        if self.player(unit.owner).is_none() {
            return Err(WorldError::UnknownPlayer(unit.owner));
        }
        if let Some(elsewhere) = self.unit_coord(&unit.shortcut) {
            if elsewhere != coord {
                return Err(WorldError::DuplicateShortcut(unit.shortcut));
            }
        }
        let previous = self.unit_at(coord).cloned();
        self.write_unit(coord, Some(unit));
        Ok(previous)
    }

    fn remove_unit(&mut self, coord: Hex) -> Result<Unit, WorldError> {
        let unit = self
            .unit_at(coord)
            .cloned()
            .ok_or(WorldError::NotFound(coord))?;
        self.write_unit(coord, None);
        Ok(unit)
    }

    /// Relocates a unit. The unit is copied into this layer before its coordinate changes.
    fn move_unit(&mut self, from: Hex, to: Hex) -> Result<(), WorldError> {
        let mut unit = self.unit_at(from).cloned().ok_or(WorldError::NotFound(from))?;
        if from == to {
            return Ok(());
        }
        if self.tile_at(to).is_none() {
            return Err(WorldError::OutOfBounds(to));
        }
        if self.unit_at(to).is_some() {
            return Err(WorldError::Occupied(to));
        }
        unit.coord = to;
        self.write_unit(from, None);
        self.write_unit(to, Some(unit));
        Ok(())
    }

    /// Edits a copy of the unit at `coord` and writes it back. Position and identity are kept.
    fn update_unit<R>(
        &mut self,
        coord: Hex,
        edit: impl FnOnce(&mut Unit) -> R,
    ) -> Result<R, WorldError>
    where
        Self: Sized,
    {
        let mut unit = self.unit_at(coord).cloned().ok_or(WorldError::NotFound(coord))?;
        let (shortcut, owner) = (unit.shortcut.clone(), unit.owner);
        let out = edit(&mut unit);
        unit.coord = coord;
        unit.shortcut = shortcut;
        unit.owner = owner;
        self.write_unit(coord, Some(unit));
        Ok(out)
    }

    fn update_tile<R>(
        &mut self,
        coord: Hex,
        edit: impl FnOnce(&mut Tile) -> R,
    ) -> Result<R, WorldError>
    where
        Self: Sized,
    {
        let mut tile = self.tile_at(coord).cloned().ok_or(WorldError::OutOfBounds(coord))?;
        let terrain = tile.terrain;
        let out = edit(&mut tile);
        tile.coord = coord;
        tile.terrain = terrain;
        self.write_tile(tile);
        Ok(out)
    }

    /// Hands out the player's next shortcut. Numbers are never reused.
    fn next_shortcut(&mut self, player: PlayerId) -> Result<Shortcut, WorldError> {
        let state = self
            .player_mut(player)
            .ok_or(WorldError::UnknownPlayer(player))?;
        state.unit_counter += 1;
        Ok(Shortcut::new(player, state.unit_counter))
    }

    /// Merges a finished child layer into this one.
    fn commit(&mut self, changes: LayerChanges) {
        // Clear vacated slots first so a unit moving into one is indexed after the removal.
        let (vacated, filled): (Vec<_>, Vec<_>) =
            changes.units.into_iter().partition(|(_, u)| u.is_none());
        for (coord, _) in vacated {
            self.write_unit(coord, None);
        }
        for (coord, unit) in filled {
            self.write_unit(coord, unit);
        }
        for tile in changes.tiles.into_values() {
            self.write_tile(tile);
        }
        for (player, state) in changes.players {
            if let Some(slot) = self.player_mut(player) {
                *slot = state;
            }
        }
        if let Some((current_player, turn)) = changes.turn {
            self.set_turn(current_player, turn);
        }
        if let Some(winner) = changes.winner {
            self.set_winner(winner);
        }
        if let Some(rng) = changes.rng {
            *self.rng_mut() = rng;
        }
        self.on_commit();
    }
}

/// The canonical world: tiles, units, players and turn counters.
#[derive(Debug, Clone)]
pub struct World {
    tiles: BTreeMap<Hex, Tile>,
    units: BTreeMap<Hex, Unit>,
    units_by_player: BTreeMap<PlayerId, BTreeSet<Hex>>,
    shortcuts: HashMap<Shortcut, Hex>,
    players: Vec<PlayerState>,
    current_player: PlayerId,
    turn: u32,
    winner: Option<PlayerId>,
    version: u64,
    rng: GameRng,
    rules_hash: u64,
}

impl World {
    /// Empty world for `player_count` players, starting on turn 1 with player 0.
    pub fn new(player_count: u8, seed: u64) -> Self {
        let player_count = player_count.clamp(1, PlayerId::MAX_PLAYERS);
        Self {
            tiles: BTreeMap::new(),
            units: BTreeMap::new(),
            units_by_player: BTreeMap::new(),
            shortcuts: HashMap::new(),
            players: vec![PlayerState::default(); usize::from(player_count)],
            current_player: PlayerId(0),
            turn: 1,
            winner: None,
            version: 0,
            rng: GameRng::seed_from_u64(seed),
            rules_hash: 0,
        }
    }

    pub fn with_rules_hash(mut self, rules_hash: u64) -> Self {
        self.rules_hash = rules_hash;
        self
    }

    /// Adds or replaces a map tile. Setup only; transactions never add tiles.
    pub fn insert_tile(&mut self, tile: Tile) {
        self.tiles.insert(tile.coord, tile);
    }

    pub fn set_coins(&mut self, player: PlayerId, coins: i32) -> Result<(), WorldError> {
        let state = self
            .player_mut(player)
            .ok_or(WorldError::UnknownPlayer(player))?;
        state.coins = coins;
        Ok(())
    }

    pub fn from_snapshot(snapshot: &Snapshot) -> Result<Self, WorldError> {
        let player_count = u8::try_from(snapshot.players.len())
            .ok()
            .filter(|n| (1..=PlayerId::MAX_PLAYERS).contains(n))
            .ok_or_else(|| {
                WorldError::InvalidSnapshot(format!("{} players", snapshot.players.len()))
            })?;
        if snapshot.current_player.0 >= player_count {
            return Err(WorldError::InvalidSnapshot(format!(
                "current player {} of {player_count}",
                snapshot.current_player
            )));
        }

        let mut world = World::new(player_count, 0).with_rules_hash(snapshot.rules_hash);
        world.players = snapshot.players.clone();
        world.current_player = snapshot.current_player;
        world.turn = snapshot.turn;
        world.version = snapshot.version;
        if let Some(winner) = snapshot.winner.filter(|w| w.0 >= player_count) {
            return Err(WorldError::InvalidSnapshot(format!(
                "winner {winner} of {player_count}"
            )));
        }
        world.winner = snapshot.winner;
        world.rng = GameRng::from_state_bytes(snapshot.rng_state);

        for tile in &snapshot.tiles {
            if world.tiles.insert(tile.coord, tile.clone()).is_some() {
                return Err(WorldError::InvalidSnapshot(format!(
                    "two tiles at {}",
                    tile.coord
                )));
            }
        }
        for unit in &snapshot.units {
            if unit.shortcut.parts().map(|(p, _)| p) != Some(unit.owner) {
                return Err(WorldError::InvalidSnapshot(format!(
                    "unit {} owned by {}",
                    unit.shortcut, unit.owner
                )));
            }
            world.add_unit(unit.clone())?;
        }
        Ok(world)
    }

    /// Like [`World::from_snapshot`], but also refuses terrain and unit type ids that `rules`
    /// does not define. Use this for snapshots read from disk or from peers.
    pub fn from_snapshot_checked(
        snapshot: &Snapshot,
        rules: &CompiledRules,
    ) -> Result<Self, WorldError> {
        if let Some(tile) = snapshot
            .tiles
            .iter()
            .find(|t| rules.try_terrain(t.terrain).is_none())
        {
            return Err(WorldError::UnknownTerrain {
                coord: tile.coord,
                id: tile.terrain.raw,
            });
        }
        if let Some(unit) = snapshot
            .units
            .iter()
            .find(|u| rules.try_unit_type(u.unit_type).is_none())
        {
            return Err(WorldError::UnknownUnitType {
                shortcut: unit.shortcut.clone(),
                id: unit.unit_type.raw,
            });
        }
        Self::from_snapshot(snapshot)
    }

    fn unindex(&mut self, coord: Hex) {
        if let Some(old) = self.units.remove(&coord) {
            if let Some(set) = self.units_by_player.get_mut(&old.owner) {
                set.remove(&coord);
            }
            if self.shortcuts.get(&old.shortcut) == Some(&coord) {
                self.shortcuts.remove(&old.shortcut);
            }
        }
    }
}

impl WorldView for World {
    fn tile_at(&self, coord: Hex) -> Option<&Tile> {
        self.tiles.get(&coord)
    }

    fn unit_at(&self, coord: Hex) -> Option<&Unit> {
        self.units.get(&coord)
    }

    fn unit_coord(&self, shortcut: &Shortcut) -> Option<Hex> {
        self.shortcuts.get(shortcut).copied()
    }

    fn player(&self, player: PlayerId) -> Option<&PlayerState> {
        self.players.get(usize::from(player.0))
    }

    fn player_count(&self) -> u8 {
        self.players.len() as u8
    }

    fn current_player(&self) -> PlayerId {
        self.current_player
    }

    fn turn(&self) -> u32 {
        self.turn
    }

    fn winner(&self) -> Option<PlayerId> {
        self.winner
    }

    fn version(&self) -> u64 {
        self.version
    }

    fn rules_hash(&self) -> u64 {
        self.rules_hash
    }

    fn rng(&self) -> &GameRng {
        &self.rng
    }

    fn tile_coords(&self) -> Vec<Hex> {
        self.tiles.keys().copied().collect()
    }

    fn unit_coords(&self) -> Vec<Hex> {
        self.units.keys().copied().collect()
    }

    fn units_of(&self, player: PlayerId) -> Vec<Hex> {
        self.units_by_player
            .get(&player)
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default()
    }
}

impl WorldMut for World {
    fn write_unit(&mut self, coord: Hex, unit: Option<Unit>) {
        self.unindex(coord);
        if let Some(unit) = unit {
            self.units_by_player
                .entry(unit.owner)
                .or_default()
                .insert(coord);
            self.shortcuts.insert(unit.shortcut.clone(), coord);
            self.units.insert(coord, unit);
        }
    }

    fn write_tile(&mut self, tile: Tile) {
        if let Some(slot) = self.tiles.get_mut(&tile.coord) {
            *slot = tile;
        }
    }

    fn player_mut(&mut self, player: PlayerId) -> Option<&mut PlayerState> {
        self.players.get_mut(usize::from(player.0))
    }

    fn set_turn(&mut self, current_player: PlayerId, turn: u32) {
        self.current_player = current_player;
        self.turn = turn;
    }

    fn set_winner(&mut self, winner: PlayerId) {
        self.winner = Some(winner);
    }

    fn rng_mut(&mut self) -> &mut GameRng {
        &mut self.rng
    }

    fn on_commit(&mut self) {
        self.version += 1;
        debug!(version = self.version, "world committed");
    }
}

/// Sparse writes of a transaction layer, detached from its parent so they can be committed.
#[derive(Debug, Clone, Default)]
pub struct LayerChanges {
    /// `None` marks a unit deleted in this layer.
    units: BTreeMap<Hex, Option<Unit>>,
    tiles: BTreeMap<Hex, Tile>,
    /// `None` marks a shortcut no longer live in this layer.
    shortcuts: BTreeMap<Shortcut, Option<Hex>>,
    players: BTreeMap<PlayerId, PlayerState>,
    turn: Option<(PlayerId, u32)>,
    winner: Option<PlayerId>,
    rng: Option<GameRng>,
}

impl LayerChanges {
    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
            && self.tiles.is_empty()
            && self.players.is_empty()
            && self.turn.is_none()
            && self.winner.is_none()
            && self.rng.is_none()
    }
}

/// Copy-on-write child layer. Reads fall through to the parent until a slot is written here;
/// the parent is only borrowed immutably, so it cannot change underneath the layer.
pub struct Transaction<'p> {
    parent: &'p dyn WorldView,
    changes: LayerChanges,
}

impl<'p> Transaction<'p> {
    pub fn new(parent: &'p dyn WorldView) -> Self {
        Self {
            parent,
            changes: LayerChanges::default(),
        }
    }

    /// Detaches this layer's writes for `commit` on the parent.
    pub fn into_changes(self) -> LayerChanges {
        self.changes
    }

    /// Discards this layer. The parent never saw any of its writes.
    pub fn abort(self) {
        debug!(
            units = self.changes.units.len(),
            tiles = self.changes.tiles.len(),
            "transaction aborted"
        );
    }
}

impl WorldView for Transaction<'_> {
    fn tile_at(&self, coord: Hex) -> Option<&Tile> {
        match self.changes.tiles.get(&coord) {
            Some(tile) => Some(tile),
            None => self.parent.tile_at(coord),
        }
    }

    fn unit_at(&self, coord: Hex) -> Option<&Unit> {
        match self.changes.units.get(&coord) {
            Some(slot) => slot.as_ref(),
            None => self.parent.unit_at(coord),
        }
    }

    fn unit_coord(&self, shortcut: &Shortcut) -> Option<Hex> {
        match self.changes.shortcuts.get(shortcut) {
            Some(slot) => *slot,
            None => self.parent.unit_coord(shortcut),
        }
    }

    fn player(&self, player: PlayerId) -> Option<&PlayerState> {
        match self.changes.players.get(&player) {
            Some(state) => Some(state),
            None => self.parent.player(player),
        }
    }

    fn player_count(&self) -> u8 {
        self.parent.player_count()
    }

    fn current_player(&self) -> PlayerId {
        self.changes
            .turn
            .map(|(p, _)| p)
            .unwrap_or_else(|| self.parent.current_player())
    }

    fn turn(&self) -> u32 {
        self.changes
            .turn
            .map(|(_, t)| t)
            .unwrap_or_else(|| self.parent.turn())
    }

    fn winner(&self) -> Option<PlayerId> {
        self.changes.winner.or_else(|| self.parent.winner())
    }

    fn version(&self) -> u64 {
        self.parent.version()
    }

    fn rules_hash(&self) -> u64 {
        self.parent.rules_hash()
    }

    fn rng(&self) -> &GameRng {
        match &self.changes.rng {
            Some(rng) => rng,
            None => self.parent.rng(),
        }
    }

    fn tile_coords(&self) -> Vec<Hex> {
        self.parent.tile_coords()
    }

    fn unit_coords(&self) -> Vec<Hex> {
        let mut coords: BTreeSet<Hex> = self
            .parent
            .unit_coords()
            .into_iter()
            .filter(|c| !self.changes.units.contains_key(c))
            .collect();
        coords.extend(
            self.changes
                .units
                .iter()
                .filter(|(_, u)| u.is_some())
                .map(|(c, _)| *c),
        );
        coords.into_iter().collect()
    }
}

impl WorldMut for Transaction<'_> {
    fn write_unit(&mut self, coord: Hex, unit: Option<Unit>) {
        if let Some(old) = self.unit_at(coord) {
            let shortcut = old.shortcut.clone();
            if self.unit_coord(&shortcut) == Some(coord) {
                self.changes.shortcuts.insert(shortcut, None);
            }
        }
        if let Some(unit) = &unit {
            self.changes
                .shortcuts
                .insert(unit.shortcut.clone(), Some(coord));
        }
        self.changes.units.insert(coord, unit);
    }

    fn write_tile(&mut self, tile: Tile) {
        if self.tile_at(tile.coord).is_some() {
            self.changes.tiles.insert(tile.coord, tile);
        }
    }

    fn player_mut(&mut self, player: PlayerId) -> Option<&mut PlayerState> {
        if !self.changes.players.contains_key(&player) {
            let state = self.parent.player(player)?.clone();
            self.changes.players.insert(player, state);
        }
        self.changes.players.get_mut(&player)
    }

    fn set_turn(&mut self, current_player: PlayerId, turn: u32) {
        self.changes.turn = Some((current_player, turn));
    }

    fn set_winner(&mut self, winner: PlayerId) {
        self.changes.winner = Some(winner);
    }

    fn rng_mut(&mut self) -> &mut GameRng {
        let parent = *self.parent.rng();
        self.changes.rng.get_or_insert(parent)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hexfront_protocol::{TerrainId, UnitTypeId};
    use hexfront_protocol::wire::serialize_snapshot;
    use proptest::prelude::*;

    fn unit(player: u8, number: u32, coord: Hex) -> Unit {
        Unit {
            shortcut: Shortcut::new(PlayerId(player), number),
            coord,
            unit_type: UnitTypeId::new(0),
            owner: PlayerId(player),
            health: 100,
            max_health: 100,
            distance_left: 3,
            last_acted_turn: 0,
            last_topped_up_turn: 0,
            progression_step: 0,
            chosen_alternative: None,
            moved_this_turn: false,
            wound_bonus: 0,
            attack_history: Vec::new(),
        }
    }

    fn world() -> World {
        let mut world = World::new(2, 1);
        for hex in Hex::new(0, 0).ring_inclusive(3) {
            world.insert_tile(Tile::new(hex, TerrainId::new(0)));
        }
        world
    }

    fn bytes(view: &impl WorldView) -> Vec<u8> {
        serialize_snapshot(&view.snapshot()).unwrap()
    }

    #[test]
    fn add_rejects_occupied_and_off_map() {
        let mut world = world();
        world.add_unit(unit(0, 1, Hex::new(0, 0))).unwrap();
        assert_eq!(
            world.add_unit(unit(1, 1, Hex::new(0, 0))),
            Err(WorldError::Occupied(Hex::new(0, 0)))
        );
        assert_eq!(
            world.add_unit(unit(1, 1, Hex::new(9, 9))),
            Err(WorldError::OutOfBounds(Hex::new(9, 9)))
        );
        assert_eq!(
            world.add_unit(unit(0, 1, Hex::new(1, 0))),
            Err(WorldError::DuplicateShortcut(Shortcut::new(PlayerId(0), 1)))
        );
    }

    #[test]
    fn replace_moves_player_membership() {
        let mut world = world();
        world.add_unit(unit(0, 1, Hex::new(0, 0))).unwrap();
        let old = world.replace_unit(unit(1, 1, Hex::new(0, 0))).unwrap();
        assert_eq!(old.map(|u| u.owner), Some(PlayerId(0)));
        assert!(world.units_of(PlayerId(0)).is_empty());
        assert_eq!(world.units_of(PlayerId(1)), vec![Hex::new(0, 0)]);
        assert_eq!(world.unit_coord(&Shortcut::new(PlayerId(0), 1)), None);
    }

    #[test]
    fn remove_and_move_report_missing_units() {
        let mut world = world();
        assert_eq!(
            world.remove_unit(Hex::new(0, 0)),
            Err(WorldError::NotFound(Hex::new(0, 0)))
        );
        assert_eq!(
            world.move_unit(Hex::new(0, 0), Hex::new(1, 0)),
            Err(WorldError::NotFound(Hex::new(0, 0)))
        );
    }

    #[test]
    fn transaction_reads_through_and_copies_on_write() {
        let mut world = world();
        world.add_unit(unit(0, 1, Hex::new(0, 0))).unwrap();
        let before = bytes(&world);

        let mut tx = world.begin();
        tx.move_unit(Hex::new(0, 0), Hex::new(1, 0)).unwrap();
        assert!(tx.unit_at(Hex::new(0, 0)).is_none());
        assert_eq!(tx.unit_at(Hex::new(1, 0)).map(|u| u.coord), Some(Hex::new(1, 0)));
        assert_eq!(
            tx.unit_coord(&Shortcut::new(PlayerId(0), 1)),
            Some(Hex::new(1, 0))
        );
        // Parent still sees the unit where it was, exactly once.
        assert_eq!(world.unit_coords(), vec![Hex::new(0, 0)]);
        assert_eq!(world.unit_at(Hex::new(0, 0)).map(|u| u.coord), Some(Hex::new(0, 0)));
        tx.abort();

        assert_eq!(bytes(&world), before);
    }

    #[test]
    fn commit_merges_and_bumps_version() {
        let mut world = world();
        world.add_unit(unit(0, 1, Hex::new(0, 0))).unwrap();
        world.add_unit(unit(1, 1, Hex::new(1, 0))).unwrap();

        let mut tx = world.begin();
        tx.move_unit(Hex::new(1, 0), Hex::new(2, 0)).unwrap();
        tx.move_unit(Hex::new(0, 0), Hex::new(1, 0)).unwrap();
        tx.update_unit(Hex::new(2, 0), |u| u.health = 40).unwrap();
        let shortcut = tx.next_shortcut(PlayerId(0)).unwrap();
        tx.set_turn(PlayerId(1), 1);
        let changes = tx.into_changes();
        world.commit(changes);

        assert_eq!(world.version(), 1);
        assert_eq!(world.unit_coords(), vec![Hex::new(1, 0), Hex::new(2, 0)]);
        assert_eq!(world.unit_coord(&Shortcut::new(PlayerId(0), 1)), Some(Hex::new(1, 0)));
        assert_eq!(world.unit_coord(&Shortcut::new(PlayerId(1), 1)), Some(Hex::new(2, 0)));
        assert_eq!(world.unit_at(Hex::new(2, 0)).map(|u| u.health), Some(40));
        assert_eq!(world.units_of(PlayerId(0)), vec![Hex::new(1, 0)]);
        assert_eq!(shortcut.as_str(), "A2");
        assert_eq!(world.current_player(), PlayerId(1));
    }

    #[test]
    fn nested_layers_commit_into_their_parent_only() {
        let mut world = world();
        world.add_unit(unit(0, 1, Hex::new(0, 0))).unwrap();

        let mut outer = world.begin();
        let inner_changes = {
            let mut inner = outer.begin();
            inner.remove_unit(Hex::new(0, 0)).unwrap();
            inner.into_changes()
        };
        outer.commit(inner_changes);
        assert!(outer.unit_at(Hex::new(0, 0)).is_none());
        assert!(world.unit_at(Hex::new(0, 0)).is_some());

        let changes = outer.into_changes();
        world.commit(changes);
        assert!(world.unit_at(Hex::new(0, 0)).is_none());
        assert_eq!(world.unit_coord(&Shortcut::new(PlayerId(0), 1)), None);
    }

    #[test]
    fn snapshot_restores_world_and_counters() {
        let mut world = world();
        world.add_unit(unit(0, 4, Hex::new(0, 0))).unwrap();
        world.set_coins(PlayerId(1), 30).unwrap();
        let snapshot = world.snapshot();

        let mut restored = World::from_snapshot(&snapshot).unwrap();
        assert_eq!(bytes(&restored), bytes(&world));
        assert_eq!(restored.next_shortcut(PlayerId(0)).unwrap().as_str(), "A5");
    }

    #[test]
    fn snapshot_with_unit_off_map_is_rejected() {
        let mut snapshot = world().snapshot();
        snapshot.units.push(unit(0, 1, Hex::new(10, 10)));
        assert_eq!(
            World::from_snapshot(&snapshot).err(),
            Some(WorldError::OutOfBounds(Hex::new(10, 10)))
        );
    }

    #[test]
    fn checked_load_refuses_ids_the_rules_do_not_define() {
        let rules = crate::load_rules(crate::RulesSource::Embedded).unwrap();
        let mut world = world();
        world.add_unit(unit(0, 1, Hex::new(0, 0))).unwrap();
        let good = world.snapshot();
        assert!(World::from_snapshot_checked(&good, &rules).is_ok());

        let mut bad_unit = good.clone();
        bad_unit.units[0].unit_type = UnitTypeId::new(99);
        assert!(World::from_snapshot(&bad_unit).is_ok());
        assert_eq!(
            World::from_snapshot_checked(&bad_unit, &rules).err(),
            Some(WorldError::UnknownUnitType {
                shortcut: Shortcut::new(PlayerId(0), 1),
                id: 99
            })
        );

        let mut bad_tile = good;
        bad_tile.tiles[3].terrain = TerrainId::new(40);
        let coord = bad_tile.tiles[3].coord;
        assert_eq!(
            World::from_snapshot_checked(&bad_tile, &rules).err(),
            Some(WorldError::UnknownTerrain { coord, id: 40 })
        );
    }

    #[test]
    fn winner_is_staged_in_the_layer_until_commit() {
        let mut world = world();
        let mut tx = world.begin();
        tx.set_winner(PlayerId(1));
        assert_eq!(tx.winner(), Some(PlayerId(1)));
        assert_eq!(tx.snapshot().winner, Some(PlayerId(1)));
        let changes = tx.into_changes();
        assert_eq!(world.winner(), None);

        world.commit(changes);
        assert_eq!(world.winner(), Some(PlayerId(1)));
        let restored = World::from_snapshot(&world.snapshot()).unwrap();
        assert_eq!(restored.winner(), Some(PlayerId(1)));

        let mut snapshot = world.snapshot();
        snapshot.winner = Some(PlayerId(5));
        assert!(matches!(
            World::from_snapshot(&snapshot),
            Err(WorldError::InvalidSnapshot(_))
        ));
    }

    proptest! {
        #[test]
        fn random_moves_never_duplicate_or_lose_units(
            steps in proptest::collection::vec((0usize..4, 0usize..6, any::<bool>()), 1..40)
        ) {
            let mut world = world();
            let starts = [Hex::new(0, 0), Hex::new(2, 0), Hex::new(0, 2), Hex::new(-2, 1)];
            for (i, start) in starts.iter().enumerate() {
                world.add_unit(unit((i % 2) as u8, i as u32 + 1, *start)).unwrap();
            }

            for (who, dir, commit) in steps {
                let shortcut = Shortcut::new(PlayerId((who % 2) as u8), who as u32 + 1);
                let before = bytes(&world);
                let mut tx = world.begin();
                if let Some(from) = tx.unit_coord(&shortcut) {
                    let to = from + Hex::DIRECTIONS[dir];
                    let _ = tx.move_unit(from, to);
                }
                if commit {
                    let changes = tx.into_changes();
                    world.commit(changes);
                } else {
                    tx.abort();
                    prop_assert_eq!(bytes(&world), before);
                }

                let coords = world.unit_coords();
                prop_assert_eq!(coords.len(), 4);
                for (i, _) in starts.iter().enumerate() {
                    let s = Shortcut::new(PlayerId((i % 2) as u8), i as u32 + 1);
                    let at = world.unit_coord(&s);
                    prop_assert!(at.is_some());
                    prop_assert_eq!(world.unit_at(at.unwrap()).map(|u| &u.shortcut), Some(&s));
                }
                let by_player: usize =
                    (0..2).map(|p| world.units_of(PlayerId(p)).len()).sum();
                prop_assert_eq!(by_player, 4);
            }
        }
    }
}
