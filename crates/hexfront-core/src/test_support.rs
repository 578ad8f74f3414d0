use hexfront_protocol::{Hex, PlayerId, Shortcut, Tile};

use crate::{load_rules, new_unit, CompiledRules, RulesSource, World, WorldMut, WorldView};

/// Two-player world on a hexagon of grass, with the embedded rules.
pub struct Fixture {
    pub rules: CompiledRules,
    pub world: World,
}

impl Fixture {
    pub fn grass(radius: i32) -> Self {
        let rules = load_rules(RulesSource::Embedded).expect("embedded rules");
        let grass = rules.terrain_id("grass").expect("grass terrain");
        let mut world = World::new(2, 1234).with_rules_hash(rules.rules_hash());
        for hex in Hex::new(0, 0).ring_inclusive(radius) {
            world.insert_tile(Tile::new(hex, grass));
        }
        Self { rules, world }
    }

    pub fn set_terrain(&mut self, coord: Hex, terrain: &str) {
        let terrain = self.rules.terrain_id(terrain).expect("terrain");
        let owner = self.world.tile_at(coord).and_then(|t| t.owner);
        let mut tile = Tile::new(coord, terrain);
        tile.owner = owner;
        self.world.insert_tile(tile);
    }

    pub fn set_owner(&mut self, coord: Hex, owner: Option<PlayerId>) {
        self.world
            .update_tile(coord, |t| t.owner = owner)
            .expect("tile");
    }

    pub fn place(&mut self, player: PlayerId, unit_type: &str, coord: Hex) -> Shortcut {
        let unit_type = self.rules.unit_type_id(unit_type).expect("unit type");
        let shortcut = self.world.next_shortcut(player).expect("player");
        let unit = new_unit(&self.rules, shortcut.clone(), unit_type, player, coord);
        self.world.add_unit(unit).expect("free tile");
        shortcut
    }
}
