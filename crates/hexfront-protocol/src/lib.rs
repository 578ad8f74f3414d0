//! Wire-level data for the hexfront engine: coordinates, units and tiles, actions,
//! world changes, options, snapshots and consensus messages.

pub mod action;
pub mod change;
pub mod consensus;
pub mod hex;
pub mod ids;
pub mod model;
pub mod options;
pub mod path;
pub mod snapshot;
pub mod wire;

pub use action::*;
pub use change::*;
pub use consensus::*;
pub use hex::*;
pub use ids::*;
pub use model::*;
pub use options::*;
pub use path::*;
pub use snapshot::*;
