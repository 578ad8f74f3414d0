use hexfront_protocol::{
    ActionKind, CaptureProgress, CoinsReason, GameAction, Hex, PlayerId, Position, Snapshot, Unit,
    WorldChange,
};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::combat::{can_attack, resolve_attack};
use crate::pathfinder::{find_path_to, PathError};
use crate::progression::{choose, complete_step, enter_step, step_for, walking_budget};
use crate::rules::CompiledRules;
use crate::unit::{can_rest, heal_amount, needs_top_up, new_unit, top_up};
use crate::world::{LayerChanges, WorldError, WorldMut, WorldView};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MoveError {
    #[error("invalid input: {0}")]
    Validation(String),
    #[error("invalid move: {0}")]
    InvalidMove(String),
    #[error("{0} is occupied")]
    Occupied(Hex),
    #[error("no unit at {0}")]
    NotFound(Hex),
    #[error("the game is over, {0} won")]
    GameOver(PlayerId),
    #[error(transparent)]
    World(#[from] WorldError),
}

impl From<PathError> for MoveError {
    fn from(err: PathError) -> Self {
        match err {
            PathError::Occupied(hex) => MoveError::Occupied(hex),
            unreachable @ PathError::Unreachable { .. } => {
                MoveError::InvalidMove(unreachable.to_string())
            }
        }
    }
}

/// A rejected batch: the offending action, its position in the batch and why it failed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("action {index} ({}) rejected: {source}", .action.name())]
pub struct BatchError {
    pub index: usize,
    pub action: GameAction,
    #[source]
    pub source: MoveError,
}

/// A batch applied to a scratch layer, ready to be committed into the world it ran against.
#[derive(Debug, Clone)]
pub struct BatchOutcome {
    pub changes: Vec<WorldChange>,
    pub layer: LayerChanges,
    /// The root world's snapshot once `layer` is committed into it.
    pub snapshot: Snapshot,
}

/// Validates and applies batches of player actions.
#[derive(Debug, Clone, Copy)]
pub struct MoveProcessor<'r> {
    rules: &'r CompiledRules,
}

impl<'r> MoveProcessor<'r> {
    pub fn new(rules: &'r CompiledRules) -> Self {
        Self { rules }
    }

    pub fn rules(&self) -> &'r CompiledRules {
        self.rules
    }

    /// Applies `actions` in order inside one transaction. Either every action succeeds and the
    /// transaction is committed into `world`, or nothing is applied.
    pub fn process_batch<W: WorldMut>(
        &self,
        world: &mut W,
        actions: &[GameAction],
    ) -> Result<Vec<WorldChange>, BatchError> {
        let outcome = self.dry_run(&*world, actions)?;
        world.commit(outcome.layer);
        info!(
            actions = actions.len(),
            changes = outcome.changes.len(),
            version = world.version(),
            "batch committed"
        );
        Ok(outcome.changes)
    }

    /// Runs `actions` on a transaction over `world` without committing it.
    pub fn dry_run<W: WorldView>(
        &self,
        world: &W,
        actions: &[GameAction],
    ) -> Result<BatchOutcome, BatchError> {
        let mut tx = world.begin();
        match self.apply_all(&mut tx, actions) {
            Ok(changes) => {
                let mut snapshot = tx.snapshot();
                snapshot.version = world.version() + 1;
                Ok(BatchOutcome {
                    changes,
                    layer: tx.into_changes(),
                    snapshot,
                })
            }
            Err(err) => {
                warn!(index = err.index, action = err.action.name(), error = %err.source, "batch rejected");
                tx.abort();
                Err(err)
            }
        }
    }

    fn apply_all<W: WorldMut>(
        &self,
        world: &mut W,
        actions: &[GameAction],
    ) -> Result<Vec<WorldChange>, BatchError> {
        let mut changes = Vec::new();
        for (index, action) in actions.iter().enumerate() {
            let applied = self.apply(world, action).map_err(|source| BatchError {
                index,
                action: action.clone(),
                source,
            })?;
            debug!(index, action = action.name(), changes = applied.len(), "action applied");
            changes.extend(applied);
        }
        Ok(changes)
    }

    /// Applies a single action to `world`. Callers own the transaction around it.
    pub fn apply<W: WorldMut>(
        &self,
        world: &mut W,
        action: &GameAction,
    ) -> Result<Vec<WorldChange>, MoveError> {
        if let Some(winner) = world.winner() {
            return Err(MoveError::GameOver(winner));
        }
        match action {
            GameAction::MoveUnit { from, to } => {
                let from = resolve(&*world, from, None)?;
                let to = resolve(&*world, to, Some(from))?;
                self.process_move(world, from, to)
            }
            GameAction::AttackUnit { attacker, defender } => {
                let attacker = resolve(&*world, attacker, None)?;
                let defender = resolve(&*world, defender, Some(attacker))?;
                self.process_attack(world, attacker, defender)
            }
            GameAction::BuildUnit { at, unit_type } => {
                let at = resolve(&*world, at, None)?;
                self.process_build(world, at, unit_type)
            }
            GameAction::CaptureBuilding { unit } => {
                let at = resolve(&*world, unit, None)?;
                self.process_capture(world, at)
            }
            GameAction::HealUnit { unit } => {
                let at = resolve(&*world, unit, None)?;
                self.process_heal(world, at)
            }
            GameAction::EndTurn => self.process_end_turn(world),
        }
    }

    /// Tops up the current player's unit at `coord` and returns the refreshed copy.
    fn ready_unit<W: WorldMut>(&self, world: &mut W, coord: Hex) -> Result<Unit, MoveError> {
        let unit = world.unit_at(coord).ok_or(MoveError::NotFound(coord))?;
        if unit.owner != world.current_player() {
            return Err(MoveError::InvalidMove(format!(
                "{} belongs to {}, not the current player",
                unit.shortcut, unit.owner
            )));
        }
        self.top_up_at(world, coord)
    }

    fn top_up_at<W: WorldMut>(&self, world: &mut W, coord: Hex) -> Result<Unit, MoveError> {
        let turn = world.turn();
        let unit = world.unit_at(coord).ok_or(MoveError::NotFound(coord))?;
        if needs_top_up(unit, turn) {
            let tile = world.tile_at(coord).cloned();
            let rules = self.rules;
            world.update_unit(coord, |u| top_up(u, rules, tile.as_ref(), turn))?;
        }
        world
            .unit_at(coord)
            .cloned()
            .ok_or(MoveError::NotFound(coord))
    }

    pub fn process_move<W: WorldMut>(
        &self,
        world: &mut W,
        from: Hex,
        to: Hex,
    ) -> Result<Vec<WorldChange>, MoveError> {
        let unit = self.ready_unit(world, from)?;
        if from == to {
            return Err(MoveError::Validation(format!(
                "{} is already at {to}",
                unit.shortcut
            )));
        }
        let utype = self.rules.unit_type(unit.unit_type);
        let step = step_for(&unit, utype, ActionKind::Move).ok_or_else(|| {
            MoveError::InvalidMove(format!("{} cannot move now", unit.shortcut))
        })?;
        let budget = walking_budget(&unit, utype, step);
        let path = find_path_to(&*world, self.rules, &unit, budget, to)?;

        let kind = match utype.action_order.get(step) {
            Some(s) if s.contains(ActionKind::Move) => ActionKind::Move,
            _ => ActionKind::Retreat,
        };
        let turn = world.turn();
        world.move_unit(from, to)?;
        let updated = world.update_unit(to, |u| {
            enter_step(u, utype, step);
            choose(u, utype, kind);
            u.distance_left = (u.distance_left - path.total_cost).max(0);
            u.moved_this_turn = true;
            u.last_acted_turn = turn;
            if u.distance_left == 0 {
                complete_step(u, utype);
            }
            u.clone()
        })?;
        abandon_capture(world, from, &unit)?;

        Ok(vec![WorldChange::UnitMoved {
            previous: unit,
            updated,
            path: path.coords,
            cost: path.total_cost,
        }])
    }

    pub fn process_attack<W: WorldMut>(
        &self,
        world: &mut W,
        attacker_at: Hex,
        defender_at: Hex,
    ) -> Result<Vec<WorldChange>, MoveError> {
        let mut attacker = self.ready_unit(world, attacker_at)?;
        if world.unit_at(defender_at).is_none() {
            return Err(MoveError::NotFound(defender_at));
        }
        let mut defender = self.top_up_at(world, defender_at)?;
        let utype = self.rules.unit_type(attacker.unit_type);

        let step = step_for(&attacker, utype, ActionKind::Attack).ok_or_else(|| {
            MoveError::InvalidMove(format!("{} cannot attack now", attacker.shortcut))
        })?;
        if !utype.move_then_attack && attacker.moved_this_turn {
            return Err(MoveError::InvalidMove(format!(
                "{} cannot attack after moving",
                attacker.shortcut
            )));
        }
        if !can_attack(self.rules, &attacker, &defender) {
            return Err(MoveError::InvalidMove(format!(
                "{} cannot attack {} at {defender_at}",
                attacker.shortcut, defender.shortcut
            )));
        }

        let (attacker_before, defender_before) = (attacker.clone(), defender.clone());
        let mut rng = *world.rng();
        let outcome = resolve_attack(self.rules, &mut attacker, &mut defender, &mut rng);
        *world.rng_mut() = rng;
        debug!(
            attacker = %attacker.shortcut,
            defender = %defender.shortcut,
            damage = outcome.damage,
            counter = ?outcome.counter_damage,
            wound_bonus = outcome.wound_bonus,
            "attack resolved"
        );

        enter_step(&mut attacker, utype, step);
        complete_step(&mut attacker, utype);
        attacker.last_acted_turn = world.turn();

        let mut changes = vec![WorldChange::UnitDamaged {
            previous: defender_before.clone(),
            updated: defender.clone(),
            damage: outcome.damage,
        }];
        self.settle(world, defender_before, defender, &mut changes)?;
        if let Some(counter) = outcome.counter_damage {
            changes.push(WorldChange::UnitDamaged {
                previous: attacker_before.clone(),
                updated: attacker.clone(),
                damage: counter,
            });
        }
        self.settle(world, attacker_before, attacker, &mut changes)?;
        declare_winner(world, &mut changes);
        Ok(changes)
    }

    /// Writes a unit back after combat, removing it if it died.
    fn settle<W: WorldMut>(
        &self,
        world: &mut W,
        before: Unit,
        after: Unit,
        changes: &mut Vec<WorldChange>,
    ) -> Result<(), MoveError> {
        if after.is_alive() {
            world.replace_unit(after)?;
        } else {
            world.remove_unit(after.coord)?;
            abandon_capture(world, after.coord, &before)?;
            changes.push(WorldChange::UnitKilled { previous: after });
        }
        Ok(())
    }

    pub fn process_build<W: WorldMut>(
        &self,
        world: &mut W,
        at: Hex,
        unit_type: &str,
    ) -> Result<Vec<WorldChange>, MoveError> {
        let type_id = self
            .rules
            .unit_type_id(unit_type)
            .ok_or_else(|| MoveError::Validation(format!("unknown unit type `{unit_type}`")))?;
        let utype = self.rules.unit_type(type_id);
        let player = world.current_player();
        let turn = world.turn();

        let tile = world.tile_at(at).ok_or(WorldError::OutOfBounds(at))?;
        if tile.owner != Some(player) {
            return Err(MoveError::InvalidMove(format!(
                "{at} is not owned by {player}"
            )));
        }
        if !self.rules.terrain(tile.terrain).can_build(type_id) {
            return Err(MoveError::InvalidMove(format!(
                "{} cannot be built at {at}",
                utype.data_id
            )));
        }
        if tile.last_built_turn == turn {
            return Err(MoveError::InvalidMove(format!(
                "{at} already built this turn"
            )));
        }
        if world.unit_at(at).is_some() {
            return Err(MoveError::Occupied(at));
        }
        let coins = world
            .player(player)
            .map(|p| p.coins)
            .ok_or(WorldError::UnknownPlayer(player))?;
        if coins < utype.cost {
            return Err(MoveError::InvalidMove(format!(
                "{player} has {coins} coins, {} costs {}",
                utype.data_id, utype.cost
            )));
        }

        let shortcut = world.next_shortcut(player)?;
        let mut unit = new_unit(self.rules, shortcut, type_id, player, at);
        // Built units wait a turn before acting.
        unit.distance_left = 0;
        unit.last_topped_up_turn = turn;
        unit.progression_step = utype.action_order.len().min(1) as u8;
        world.add_unit(unit.clone())?;
        world.update_tile(at, |t| t.last_built_turn = turn)?;

        let updated = coins - utype.cost;
        if let Some(state) = world.player_mut(player) {
            state.coins = updated;
        }
        info!(unit = %unit.shortcut, %at, cost = utype.cost, "unit built");

        Ok(vec![
            WorldChange::UnitBuilt {
                unit,
                tile: at,
                cost: utype.cost,
            },
            WorldChange::CoinsChanged {
                player,
                previous: coins,
                updated,
                reason: CoinsReason::UnitBuilt,
            },
        ])
    }

    pub fn process_capture<W: WorldMut>(
        &self,
        world: &mut W,
        at: Hex,
    ) -> Result<Vec<WorldChange>, MoveError> {
        let unit = self.ready_unit(world, at)?;
        let utype = self.rules.unit_type(unit.unit_type);
        if !utype.can_capture {
            return Err(MoveError::InvalidMove(format!(
                "{} cannot capture buildings",
                unit.shortcut
            )));
        }
        let step = step_for(&unit, utype, ActionKind::Capture).ok_or_else(|| {
            MoveError::InvalidMove(format!("{} cannot capture now", unit.shortcut))
        })?;

        let tile = world.tile_at(at).cloned().ok_or(WorldError::OutOfBounds(at))?;
        let terrain = self.rules.terrain(tile.terrain);
        if !terrain.building {
            return Err(MoveError::InvalidMove(format!("{at} is not a building")));
        }
        if tile.owner == Some(unit.owner) {
            return Err(MoveError::InvalidMove(format!(
                "{at} already belongs to {}",
                unit.owner
            )));
        }

        let turn = world.turn();
        let earlier = tile
            .capture
            .as_ref()
            .filter(|c| c.unit == unit.shortcut && c.player == unit.owner);
        if earlier.is_some_and(|c| c.last_turn == turn) {
            return Err(MoveError::InvalidMove(format!(
                "{} already advanced the capture of {at} this turn",
                unit.shortcut
            )));
        }
        let turns = earlier.map(|c| c.turns).unwrap_or(0) + 1;
        let required = terrain.capture_turns.max(1);

        world.update_unit(at, |u| {
            enter_step(u, utype, step);
            choose(u, utype, ActionKind::Capture);
            complete_step(u, utype);
            u.last_acted_turn = turn;
        })?;

        if turns >= required {
            let updated = world.update_tile(at, |t| {
                t.owner = Some(unit.owner);
                t.capture = None;
                t.clone()
            })?;
            info!(unit = %unit.shortcut, %at, player = %unit.owner, "building captured");
            Ok(vec![WorldChange::CaptureCompleted {
                unit: unit.shortcut,
                previous: tile,
                updated,
            }])
        } else {
            let progress = CaptureProgress {
                player: unit.owner,
                unit: unit.shortcut.clone(),
                turns,
                last_turn: turn,
            };
            let updated = world.update_tile(at, |t| {
                t.capture = Some(progress);
                t.clone()
            })?;
            Ok(vec![WorldChange::CaptureProgressed {
                unit: unit.shortcut,
                tile: updated,
                turns,
                required,
            }])
        }
    }

    /// Spends a fresh unit's turn on healing by its tile's rate.
    pub fn process_heal<W: WorldMut>(
        &self,
        world: &mut W,
        at: Hex,
    ) -> Result<Vec<WorldChange>, MoveError> {
        let unit = self.ready_unit(world, at)?;
        let turn = world.turn();
        if unit.health >= unit.max_health {
            return Err(MoveError::InvalidMove(format!(
                "{} is already at full health",
                unit.shortcut
            )));
        }
        if !can_rest(&unit, turn) {
            return Err(MoveError::InvalidMove(format!(
                "{} already acted this turn",
                unit.shortcut
            )));
        }
        let amount = heal_amount(&unit, self.rules, world.tile_at(at));
        if amount <= 0 {
            return Err(MoveError::InvalidMove(format!(
                "{} cannot heal at {at}",
                unit.shortcut
            )));
        }

        let steps = self.rules.unit_type(unit.unit_type).action_order.len();
        let updated = world.update_unit(at, |u| {
            u.health += amount;
            u.last_acted_turn = turn;
            u.progression_step = steps.min(usize::from(u8::MAX)) as u8;
            u.chosen_alternative = None;
            u.distance_left = 0;
            u.clone()
        })?;
        debug!(unit = %unit.shortcut, %at, amount, health = updated.health, "unit healed");

        Ok(vec![WorldChange::UnitHealed {
            previous: unit,
            updated,
            amount,
        }])
    }

    /// Credits the outgoing player's building income, then passes play on. The turn counter
    /// only advances when play wraps back to the first player.
    pub fn process_end_turn<W: WorldMut>(
        &self,
        world: &mut W,
    ) -> Result<Vec<WorldChange>, MoveError> {
        let player = world.current_player();
        let turn = world.turn();
        let mut changes = Vec::new();

        let income: i32 = world
            .tile_coords()
            .into_iter()
            .filter_map(|c| world.tile_at(c))
            .filter(|t| t.owner == Some(player))
            .map(|t| self.rules.terrain(t.terrain))
            .filter(|terrain| terrain.building)
            .map(|terrain| terrain.income)
            .sum();
        if income > 0 {
            let state = world
                .player_mut(player)
                .ok_or(WorldError::UnknownPlayer(player))?;
            let previous = state.coins;
            state.coins = previous.saturating_add(income);
            changes.push(WorldChange::CoinsChanged {
                player,
                previous,
                updated: state.coins,
                reason: CoinsReason::Income,
            });
        }

        let count = world.player_count().max(1);
        let next = PlayerId((player.0 + 1) % count);
        let next_turn = if next.0 == 0 { turn + 1 } else { turn };
        world.set_turn(next, next_turn);
        debug!(from = %player, to = %next, turn = next_turn, "turn passed");

        changes.push(WorldChange::PlayerChanged {
            previous_player: player,
            new_player: next,
            previous_turn: turn,
            new_turn: next_turn,
        });
        declare_winner(world, &mut changes);
        Ok(changes)
    }
}

/// The only player with units left, if exactly one remains.
pub fn last_player_standing<W: WorldView + ?Sized>(world: &W) -> Option<PlayerId> {
    let mut alive = (0..world.player_count())
        .map(PlayerId)
        .filter(|p| !world.units_of(*p).is_empty());
    match (alive.next(), alive.next()) {
        (Some(player), None) => Some(player),
        _ => None,
    }
}

/// Ends the game once a single player has units. Single-seat worlds never finish.
fn declare_winner<W: WorldMut>(world: &mut W, changes: &mut Vec<WorldChange>) {
    if world.winner().is_some() || world.player_count() < 2 {
        return;
    }
    if let Some(winner) = last_player_standing(&*world) {
        world.set_winner(winner);
        info!(%winner, turn = world.turn(), "game won");
        changes.push(WorldChange::GameWon { winner });
    }
}

fn resolve<W: WorldView>(world: &W, position: &Position, base: Option<Hex>) -> Result<Hex, MoveError> {
    match position {
        Position::Unit(shortcut) => world
            .unit_coord(shortcut)
            .ok_or_else(|| WorldError::UnknownShortcut(shortcut.clone()).into()),
        Position::Relative(_) => {
            let base = base.ok_or_else(|| {
                MoveError::Validation(format!("relative position `{position}` has no base unit"))
            })?;
            position
                .resolve_from(base)
                .ok_or_else(|| MoveError::Validation(position.to_string()))
        }
        Position::Coord(hex) => Ok(*hex),
    }
}

/// Drops capture progress `unit` was making at `coord`.
fn abandon_capture<W: WorldMut>(world: &mut W, coord: Hex, unit: &Unit) -> Result<(), MoveError> {
    let capturing = world
        .tile_at(coord)
        .and_then(|t| t.capture.as_ref())
        .is_some_and(|c| c.unit == unit.shortcut);
    if capturing {
        world.update_tile(coord, |t| t.capture = None)?;
    }
    Ok(())
}
