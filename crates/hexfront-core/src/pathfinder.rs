use std::cmp::Reverse;
use std::collections::{BTreeMap, BinaryHeap};

use hexfront_protocol::{AllPaths, Hex, Path, PathEdge, Unit};
use thiserror::Error;

use crate::rules::CompiledRules;
use crate::world::WorldView;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PathError {
    #[error("destination {0} is occupied")]
    Occupied(Hex),
    #[error("{to} is not reachable from {from} with {budget} movement")]
    Unreachable { from: Hex, to: Hex, budget: i32 },
}

/// Cheapest paths from `unit`'s hex within `budget`, using per-terrain costs as edge weights.
///
/// Impassable terrain and enemy units block; friendly units can be walked through but not
/// landed on. Equal-cost frontier entries expand in insertion order.
pub fn all_paths<W: WorldView + ?Sized>(
    world: &W,
    rules: &CompiledRules,
    unit: &Unit,
    budget: i32,
) -> AllPaths {
    let start = unit.coord;
    let mut paths = AllPaths::new(start, budget);
    let mut dist: BTreeMap<Hex, i32> = BTreeMap::new();
    dist.insert(start, 0);

    let mut seq: u64 = 0;
    let mut heap: BinaryHeap<Reverse<(i32, u64, Hex)>> = BinaryHeap::new();
    heap.push(Reverse((0, seq, start)));

    while let Some(Reverse((cost, _, at))) = heap.pop() {
        if dist.get(&at) != Some(&cost) {
            continue;
        }

        for neighbor in at.neighbors() {
            let Some(tile) = world.tile_at(neighbor) else {
                continue;
            };
            let occupied = match world.unit_at(neighbor) {
                Some(other) if other.owner != unit.owner => continue,
                Some(_) => true,
                None => false,
            };
            let Some(step_cost) = rules.movement_cost(tile.terrain, unit.unit_type).cost() else {
                continue;
            };
            let new_cost = cost.saturating_add(step_cost);
            if new_cost > budget {
                continue;
            }
            if dist.get(&neighbor).is_some_and(|d| new_cost >= *d) {
                continue;
            }
            dist.insert(neighbor, new_cost);
            paths.insert(PathEdge {
                from: at,
                to: neighbor,
                terrain: tile.terrain,
                movement_cost: step_cost,
                total_cost: new_cost,
                occupied,
            });
            seq += 1;
            heap.push(Reverse((new_cost, seq, neighbor)));
        }
    }

    paths
}

/// Cheapest path for `unit` to land on `to` within `budget`.
pub fn find_path_to<W: WorldView + ?Sized>(
    world: &W,
    rules: &CompiledRules,
    unit: &Unit,
    budget: i32,
    to: Hex,
) -> Result<Path, PathError> {
    if to != unit.coord && world.unit_at(to).is_some() {
        return Err(PathError::Occupied(to));
    }
    let paths = all_paths(world, rules, unit, budget);
    paths
        .path_to(to)
        .filter(|_| paths.can_land_on(to))
        .ok_or(PathError::Unreachable {
            from: unit.coord,
            to,
            budget,
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::Fixture;
    use hexfront_protocol::PlayerId;

    #[test]
    fn flat_ground_reaches_exact_radius() {
        let mut fx = Fixture::grass(5);
        let at = Hex::new(0, 0);
        fx.place(PlayerId(0), "infantry", at);
        let unit = fx.world.unit_at(at).cloned().unwrap();

        let paths = all_paths(&fx.world, &fx.rules, &unit, 3);
        let mut reached: Vec<_> = paths.landing_hexes().collect();
        reached.sort();
        let mut expected: Vec<_> = at.ring_inclusive(3).collect();
        expected.sort();
        assert_eq!(reached, expected);

        for hex in expected {
            let path = paths.path_to(hex).unwrap();
            assert_eq!(path.total_cost, at.distance(hex));
            assert_eq!(path.coords.len() as i32, at.distance(hex) + 1);
            assert_eq!(path.coords.first(), Some(&at));
            assert_eq!(path.coords.last(), Some(&hex));
        }
    }

    #[test]
    fn impassable_tiles_shrink_the_reachable_set() {
        let mut fx = Fixture::grass(5);
        let at = Hex::new(0, 0);
        // Wall off everything to the right at distance one.
        for hex in [Hex::new(1, 0), Hex::new(1, -1), Hex::new(0, 1)] {
            fx.set_terrain(hex, "water");
        }
        fx.place(PlayerId(0), "infantry", at);
        let unit = fx.world.unit_at(at).cloned().unwrap();

        let paths = all_paths(&fx.world, &fx.rules, &unit, 3);
        assert!(paths.cost_to(Hex::new(1, 0)).is_none());
        assert_eq!(paths.cost_to(Hex::new(2, 0)), None);
        // Going around the wall costs more than the straight line.
        assert_eq!(Hex::new(0, 0).distance(Hex::new(0, 2)), 2);
        assert_eq!(paths.cost_to(Hex::new(0, 2)), Some(3));
        assert_eq!(paths.cost_to(Hex::new(1, 1)), None);
        assert!(paths.landing_hexes().count() < at.ring_inclusive(3).count());
    }

    #[test]
    fn terrain_costs_are_summed_per_unit_type() {
        let mut fx = Fixture::grass(4);
        fx.set_terrain(Hex::new(1, 0), "forest");
        fx.place(PlayerId(0), "tank", Hex::new(0, 0));
        let tank = fx.world.unit_at(Hex::new(0, 0)).cloned().unwrap();

        let paths = all_paths(&fx.world, &fx.rules, &tank, 5);
        let edge = paths.edge(Hex::new(1, 0)).unwrap();
        assert_eq!(edge.movement_cost, 3);
        // Detouring around the forest beats crossing it.
        assert_eq!(paths.cost_to(Hex::new(2, 0)), Some(3));
        assert_ne!(paths.edge(Hex::new(2, 0)).unwrap().from, Hex::new(1, 0));
    }

    #[test]
    fn friendly_units_are_passable_enemies_block() {
        let mut fx = Fixture::grass(4);
        fx.place(PlayerId(0), "infantry", Hex::new(0, 0));
        fx.place(PlayerId(0), "infantry", Hex::new(1, 0));
        fx.place(PlayerId(1), "infantry", Hex::new(-1, 0));
        let unit = fx.world.unit_at(Hex::new(0, 0)).cloned().unwrap();

        let paths = all_paths(&fx.world, &fx.rules, &unit, 2);
        assert!(paths.edge(Hex::new(1, 0)).unwrap().occupied);
        assert!(!paths.can_land_on(Hex::new(1, 0)));
        assert_eq!(paths.cost_to(Hex::new(2, 0)), Some(2));
        assert!(paths.edge(Hex::new(-1, 0)).is_none());

        assert_eq!(
            find_path_to(&fx.world, &fx.rules, &unit, 2, Hex::new(1, 0)),
            Err(PathError::Occupied(Hex::new(1, 0)))
        );
        assert!(matches!(
            find_path_to(&fx.world, &fx.rules, &unit, 2, Hex::new(3, 0)),
            Err(PathError::Unreachable { .. })
        ));
    }

    #[test]
    fn exhausted_unit_reaches_only_itself() {
        let mut fx = Fixture::grass(2);
        fx.place(PlayerId(0), "infantry", Hex::new(0, 0));
        let unit = fx.world.unit_at(Hex::new(0, 0)).cloned().unwrap();

        let paths = all_paths(&fx.world, &fx.rules, &unit, 0);
        assert!(paths.is_empty());
        assert_eq!(paths.landing_hexes().collect::<Vec<_>>(), vec![Hex::new(0, 0)]);
    }
}
