use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::{Hex, TerrainId};

/// How a hex was entered on its cheapest path.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PathEdge {
    pub from: Hex,
    pub to: Hex,
    pub terrain: TerrainId,
    /// Cost of this single step.
    pub movement_cost: i32,
    /// Cost from the source up to and including this step.
    pub total_cost: i32,
    /// Held by a friendly unit: can be passed through, not landed on.
    pub occupied: bool,
}

impl PathEdge {
    /// Human-readable explanation of the step cost.
    pub fn explain(&self) -> String {
        format!(
            "{} -> {}: terrain {} costs {} (total {})",
            self.from, self.to, self.terrain.raw, self.movement_cost, self.total_cost
        )
    }
}

/// Parent-pointer map of cheapest paths from one source hex.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "AllPathsRepr", into = "AllPathsRepr")]
pub struct AllPaths {
    pub source: Hex,
    pub budget: i32,
    edges: BTreeMap<Hex, PathEdge>,
}

/// A reconstructed path, source first.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Path {
    pub coords: Vec<Hex>,
    pub total_cost: i32,
}

impl AllPaths {
    pub fn new(source: Hex, budget: i32) -> Self {
        Self {
            source,
            budget,
            edges: BTreeMap::new(),
        }
    }

    pub fn insert(&mut self, edge: PathEdge) {
        self.edges.insert(edge.to, edge);
    }

    pub fn edge(&self, to: Hex) -> Option<&PathEdge> {
        self.edges.get(&to)
    }

    pub fn edges(&self) -> impl Iterator<Item = &PathEdge> {
        self.edges.values()
    }

    pub fn cost_to(&self, to: Hex) -> Option<i32> {
        if to == self.source {
            return Some(0);
        }
        self.edges.get(&to).map(|e| e.total_cost)
    }

    /// Hexes the unit can end its move on, including the source itself.
    pub fn landing_hexes(&self) -> impl Iterator<Item = Hex> + '_ {
        std::iter::once(self.source).chain(
            self.edges
                .values()
                .filter(|e| !e.occupied)
                .map(|e| e.to),
        )
    }

    pub fn can_land_on(&self, to: Hex) -> bool {
        to == self.source || self.edges.get(&to).is_some_and(|e| !e.occupied)
    }

    /// Walks parent pointers back to the source. `None` if `to` was never reached.
    pub fn path_to(&self, to: Hex) -> Option<Path> {
        if to == self.source {
            return Some(Path {
                coords: vec![self.source],
                total_cost: 0,
            });
        }
        let total_cost = self.edges.get(&to)?.total_cost;
        let mut coords = vec![to];
        let mut at = to;
        while at != self.source {
            let edge = self.edges.get(&at)?;
            at = edge.from;
            coords.push(at);
            if coords.len() > self.edges.len() + 1 {
                return None;
            }
        }
        coords.reverse();
        Some(Path { coords, total_cost })
    }

    pub fn len(&self) -> usize {
        self.edges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.edges.is_empty()
    }
}

#[derive(Clone, Serialize, Deserialize)]
struct AllPathsRepr {
    source: Hex,
    budget: i32,
    edges: Vec<PathEdge>,
}

impl From<AllPathsRepr> for AllPaths {
    fn from(repr: AllPathsRepr) -> Self {
        let mut paths = AllPaths::new(repr.source, repr.budget);
        for edge in repr.edges {
            paths.insert(edge);
        }
        paths
    }
}

impl From<AllPaths> for AllPathsRepr {
    fn from(paths: AllPaths) -> Self {
        Self {
            source: paths.source,
            budget: paths.budget,
            edges: paths.edges.into_values().collect(),
        }
    }
}
