//! Hexfront game engine: rules tables, the layered world, pathfinding and the move processor.

mod combat;
mod moves;
mod options;
mod pathfinder;
mod progression;
mod rng;
mod rules;
mod setup;
mod unit;
mod world;

#[cfg(test)]
mod test_support;

pub use crate::combat::*;
pub use crate::moves::*;
pub use crate::options::*;
pub use crate::pathfinder::*;
pub use crate::progression::*;
pub use crate::rng::*;
pub use crate::rules::*;
pub use crate::setup::*;
pub use crate::unit::*;
pub use crate::world::*;
