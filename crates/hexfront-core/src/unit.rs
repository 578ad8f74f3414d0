use hexfront_protocol::{Hex, PlayerId, Shortcut, Tile, Unit, UnitTypeId};

use crate::rules::CompiledRules;

/// A fresh unit at full health and movement, not yet topped up for any turn.
pub fn new_unit(
    rules: &CompiledRules,
    shortcut: Shortcut,
    unit_type: UnitTypeId,
    owner: PlayerId,
    coord: Hex,
) -> Unit {
    let utype = rules.unit_type(unit_type);
    Unit {
        shortcut,
        coord,
        unit_type,
        owner,
        health: utype.health,
        max_health: utype.health,
        distance_left: utype.movement,
        last_acted_turn: 0,
        last_topped_up_turn: 0,
        progression_step: 0,
        chosen_alternative: None,
        moved_this_turn: false,
        wound_bonus: 0,
        attack_history: Vec::new(),
    }
}

pub fn needs_top_up(unit: &Unit, turn: u32) -> bool {
    unit.last_topped_up_turn < turn
}

/// Refreshes a unit for `turn` if it has not been refreshed yet. Returns whether anything changed.
///
/// Movement returns to the type's maximum, the action cursor and same-turn combat state reset,
/// and a unit that sat out the previous turn heals by its tile's terrain rate.
pub fn top_up(unit: &mut Unit, rules: &CompiledRules, tile: Option<&Tile>, turn: u32) -> bool {
    if !needs_top_up(unit, turn) {
        return false;
    }
    let utype = rules.unit_type(unit.unit_type);
    unit.distance_left = utype.movement;
    unit.progression_step = 0;
    unit.chosen_alternative = None;
    unit.moved_this_turn = false;
    unit.wound_bonus = 0;
    unit.attack_history.clear();

    let rested = unit.last_acted_turn + 1 < turn;
    if rested && unit.health < unit.max_health {
        let heal = tile.map(|t| rules.terrain(t.terrain).heal).unwrap_or(0);
        unit.health = (unit.health + heal).min(unit.max_health);
    }
    unit.last_topped_up_turn = turn;
    true
}

/// A unit may heal in place of acting, so only before it has done anything this turn.
pub fn can_rest(unit: &Unit, turn: u32) -> bool {
    unit.last_acted_turn < turn && unit.progression_step == 0 && !unit.moved_this_turn
}

/// Health a manual heal restores at `tile`: the terrain's rate, capped at the missing health.
/// Tiles owned by another player never heal.
pub fn heal_amount(unit: &Unit, rules: &CompiledRules, tile: Option<&Tile>) -> i32 {
    let Some(tile) = tile else {
        return 0;
    };
    if tile.owner.is_some_and(|owner| owner != unit.owner) {
        return 0;
    }
    rules
        .terrain(tile.terrain)
        .heal
        .min(unit.max_health - unit.health)
        .max(0)
}

/// Topped-up copy for read-only queries; the world is left untouched.
pub fn topped_up_view(unit: &Unit, rules: &CompiledRules, tile: Option<&Tile>, turn: u32) -> Unit {
    let mut view = unit.clone();
    top_up(&mut view, rules, tile, turn);
    view
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{load_rules, RulesSource};

    #[test]
    fn top_up_happens_once_per_turn() {
        let rules = load_rules(RulesSource::Embedded).unwrap();
        let infantry = rules.unit_type_id("infantry").unwrap();
        let mut unit = new_unit(
            &rules,
            Shortcut::new(PlayerId(0), 1),
            infantry,
            PlayerId(0),
            Hex::new(0, 0),
        );
        unit.distance_left = 0;
        unit.progression_step = 2;
        unit.wound_bonus = 3;

        assert!(top_up(&mut unit, &rules, None, 1));
        assert_eq!(unit.distance_left, 3);
        assert_eq!(unit.progression_step, 0);
        assert_eq!(unit.wound_bonus, 0);

        unit.distance_left = 1;
        assert!(!top_up(&mut unit, &rules, None, 1));
        assert_eq!(unit.distance_left, 1);
    }

    #[test]
    fn resting_units_heal_on_building_tiles() {
        let rules = load_rules(RulesSource::Embedded).unwrap();
        let infantry = rules.unit_type_id("infantry").unwrap();
        let city = rules.terrain_id("city").unwrap();
        let tile = Tile::new(Hex::new(0, 0), city);
        let mut unit = new_unit(
            &rules,
            Shortcut::new(PlayerId(0), 1),
            infantry,
            PlayerId(0),
            Hex::new(0, 0),
        );
        unit.health = 50;
        unit.last_acted_turn = 4;

        let busy = topped_up_view(&unit, &rules, Some(&tile), 5);
        assert_eq!(busy.health, 50);

        top_up(&mut unit, &rules, Some(&tile), 6);
        assert_eq!(unit.health, 70);
    }

    #[test]
    fn manual_heal_depends_on_tile_owner_and_missing_health() {
        let rules = load_rules(RulesSource::Embedded).unwrap();
        let infantry = rules.unit_type_id("infantry").unwrap();
        let city = Tile::new(Hex::new(0, 0), rules.terrain_id("city").unwrap());
        let grass = Tile::new(Hex::new(0, 0), rules.terrain_id("grass").unwrap());
        let mut unit = new_unit(
            &rules,
            Shortcut::new(PlayerId(0), 1),
            infantry,
            PlayerId(0),
            Hex::new(0, 0),
        );
        unit.health = 90;

        assert_eq!(heal_amount(&unit, &rules, Some(&city)), 10);
        assert_eq!(heal_amount(&unit, &rules, Some(&grass)), 0);
        assert_eq!(heal_amount(&unit, &rules, None), 0);
        let enemy_city = city.clone().owned_by(PlayerId(1));
        assert_eq!(heal_amount(&unit, &rules, Some(&enemy_city)), 0);
        let own_city = city.owned_by(PlayerId(0));
        unit.health = 40;
        assert_eq!(heal_amount(&unit, &rules, Some(&own_city)), 20);

        assert!(can_rest(&unit, 1));
        unit.last_acted_turn = 1;
        assert!(!can_rest(&unit, 1));
        assert!(can_rest(&unit, 2));
    }
}
