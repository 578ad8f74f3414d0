use hexfront_protocol::{Hex, PlayerId, Tile};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::rules::CompiledRules;
use crate::unit::new_unit;
use crate::world::{World, WorldError, WorldMut};

#[derive(Debug, Error)]
pub enum SetupError {
    #[error("rules have no `{0}` entry")]
    MissingRule(&'static str),
    #[error("invalid starter map: {0}")]
    Invalid(String),
    #[error(transparent)]
    World(#[from] WorldError),
}

/// Parameters of the opening position used when no saved game exists.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StarterMap {
    pub radius: i32,
    pub players: u8,
    pub coins: i32,
}

impl Default for StarterMap {
    fn default() -> Self {
        Self {
            radius: 5,
            players: 2,
            coins: 300,
        }
    }
}

/// A hexagon of grass with one owned city and one infantry per player along the rim.
pub fn starter_world(rules: &CompiledRules, map: &StarterMap, seed: u64) -> Result<World, SetupError> {
    if map.radius < 2 {
        return Err(SetupError::Invalid(format!("radius {} below 2", map.radius)));
    }
    if !(2..=6).contains(&map.players) {
        return Err(SetupError::Invalid(format!(
            "{} players, starter maps seat 2 to 6",
            map.players
        )));
    }
    let grass = rules.terrain_id("grass").ok_or(SetupError::MissingRule("grass"))?;
    let city = rules.terrain_id("city").ok_or(SetupError::MissingRule("city"))?;
    let infantry = rules
        .unit_type_id("infantry")
        .ok_or(SetupError::MissingRule("infantry"))?;

    let mut world = World::new(map.players, seed).with_rules_hash(rules.rules_hash());
    for hex in Hex::new(0, 0).ring_inclusive(map.radius) {
        world.insert_tile(Tile::new(hex, grass));
    }
    for (i, direction) in Hex::DIRECTIONS
        .iter()
        .take(usize::from(map.players))
        .enumerate()
    {
        let player = PlayerId(i as u8);
        let home = *direction * (map.radius - 1);
        world.insert_tile(Tile::new(home, city).owned_by(player));
        let shortcut = world.next_shortcut(player)?;
        world.add_unit(new_unit(rules, shortcut, infantry, player, home))?;
        world.set_coins(player, map.coins)?;
    }
    Ok(world)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{load_rules, RulesSource, WorldView};

    #[test]
    fn starter_world_seats_every_player() {
        let rules = load_rules(RulesSource::Embedded).unwrap();
        let map = StarterMap {
            players: 3,
            ..StarterMap::default()
        };
        let world = starter_world(&rules, &map, 7).unwrap();

        assert_eq!(world.player_count(), 3);
        assert_eq!(world.tile_coords().len(), 91);
        for p in 0..3 {
            let units = world.units_of(PlayerId(p));
            assert_eq!(units.len(), 1);
            let tile = world.tile_at(units[0]).unwrap();
            assert_eq!(tile.owner, Some(PlayerId(p)));
            assert_eq!(world.player(PlayerId(p)).map(|s| s.coins), Some(300));
        }
        assert_eq!(world.rules_hash(), rules.rules_hash());
    }

    #[test]
    fn tiny_or_crowded_maps_are_refused() {
        let rules = load_rules(RulesSource::Embedded).unwrap();
        let tiny = StarterMap {
            radius: 1,
            ..StarterMap::default()
        };
        assert!(matches!(starter_world(&rules, &tiny, 0), Err(SetupError::Invalid(_))));
        let crowded = StarterMap {
            players: 7,
            ..StarterMap::default()
        };
        assert!(matches!(starter_world(&rules, &crowded, 0), Err(SetupError::Invalid(_))));
    }
}
