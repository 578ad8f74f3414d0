use std::collections::BTreeSet;

use hexfront_protocol::{ActionKind, GameOption, Hex, OptionsAt, Unit};

use crate::combat::{can_attack, expected_damage};
use crate::pathfinder::all_paths;
use crate::progression::{allowed_actions, step_for, walking_budget};
use crate::rules::CompiledRules;
use crate::unit::{can_rest, heal_amount, topped_up_view};
use crate::world::WorldView;

/// Legal actions for the current player at `coord`.
///
/// Units are inspected through a topped-up view, so querying never writes to the world.
/// `EndTurn` is always offered last. A finished game offers nothing.
pub fn options_at<W: WorldView + ?Sized>(
    world: &W,
    rules: &CompiledRules,
    coord: Hex,
) -> OptionsAt {
    let mut out = OptionsAt {
        coord,
        options: Vec::new(),
        paths: None,
        threatened: Vec::new(),
    };
    if world.winner().is_some() {
        return out;
    }
    let player = world.current_player();

    if let Some(unit) = world.unit_at(coord).filter(|u| u.owner == player) {
        unit_options(world, rules, unit, &mut out);
    }
    build_options(world, rules, coord, &mut out);
    out.options.push(GameOption::EndTurn);
    out
}

fn unit_options<W: WorldView + ?Sized>(
    world: &W,
    rules: &CompiledRules,
    unit: &Unit,
    out: &mut OptionsAt,
) {
    let turn = world.turn();
    let unit = topped_up_view(unit, rules, world.tile_at(unit.coord), turn);
    let utype = rules.unit_type(unit.unit_type);
    let allowed = allowed_actions(&unit, utype);

    let budget = if allowed.contains(&ActionKind::Move) {
        step_for(&unit, utype, ActionKind::Move)
            .map(|step| walking_budget(&unit, utype, step))
            .unwrap_or(0)
    } else {
        0
    };
    let paths = all_paths(world, rules, &unit, budget);

    for to in paths.landing_hexes().filter(|h| *h != unit.coord) {
        if let Some(path) = paths.path_to(to) {
            out.options.push(GameOption::Move {
                to,
                cost: path.total_cost,
                path: path.coords,
            });
        }
    }

    let enemies: Vec<&Unit> = world
        .unit_coords()
        .into_iter()
        .filter_map(|c| world.unit_at(c))
        .filter(|u| u.owner != unit.owner)
        .collect();

    if allowed.contains(&ActionKind::Attack) {
        // The processor refreshes the defender before striking; preview against the same view.
        let defenders = enemies
            .iter()
            .map(|d| topped_up_view(d, rules, world.tile_at(d.coord), turn))
            .filter(|d| can_attack(rules, &unit, d));
        for defender in defenders {
            if let Some(expected) = expected_damage(rules, &unit, &defender) {
                out.options.push(GameOption::Attack {
                    target: defender.coord,
                    defender: defender.shortcut.clone(),
                    expected_damage: expected,
                });
            }
        }
    }

    // Enemies in reach this turn: from every landing hex, or only from here for units that
    // cannot attack after moving.
    if step_for(&unit, utype, ActionKind::Attack).is_some() {
        let origins: Vec<Hex> = if utype.move_then_attack {
            paths.landing_hexes().collect()
        } else if unit.moved_this_turn {
            Vec::new()
        } else {
            vec![unit.coord]
        };
        let threatened: BTreeSet<Hex> = enemies
            .iter()
            .filter(|d| {
                rules.combat_params(unit.unit_type, d.unit_type).is_some()
                    && origins.iter().any(|o| {
                        let distance = o.distance(d.coord);
                        distance >= 1 && distance <= utype.attack_range
                    })
            })
            .map(|d| d.coord)
            .collect();
        out.threatened = threatened.into_iter().collect();
    }

    if allowed.contains(&ActionKind::Capture) {
        if let Some(tile) = world.tile_at(unit.coord) {
            let terrain = rules.terrain(tile.terrain);
            if terrain.building && tile.owner != Some(unit.owner) {
                let turns_done = tile
                    .capture
                    .as_ref()
                    .filter(|c| c.unit == unit.shortcut && c.player == unit.owner)
                    .map(|c| c.turns)
                    .unwrap_or(0);
                out.options.push(GameOption::Capture {
                    tile: tile.coord,
                    turns_done,
                    turns_required: terrain.capture_turns.max(1),
                });
            }
        }
    }

    if unit.health < unit.max_health && can_rest(&unit, turn) {
        let amount = heal_amount(&unit, rules, world.tile_at(unit.coord));
        if amount > 0 {
            out.options.push(GameOption::Heal {
                tile: unit.coord,
                amount,
            });
        }
    }

    out.paths = Some(paths);
}

fn build_options<W: WorldView + ?Sized>(
    world: &W,
    rules: &CompiledRules,
    coord: Hex,
    out: &mut OptionsAt,
) {
    let player = world.current_player();
    let Some(tile) = world.tile_at(coord) else {
        return;
    };
    if tile.owner != Some(player) || tile.last_built_turn == world.turn() {
        return;
    }
    if world.unit_at(coord).is_some() {
        return;
    }
    let coins = world.player(player).map(|p| p.coins).unwrap_or(0);
    let terrain = rules.terrain(tile.terrain);
    if !terrain.building {
        return;
    }
    for id in &terrain.buildable_units {
        let utype = rules.unit_type(*id);
        if utype.cost <= coins {
            out.options.push(GameOption::Build {
                tile: coord,
                unit_type: utype.data_id.clone(),
                cost: utype.cost,
            });
        }
    }
}
