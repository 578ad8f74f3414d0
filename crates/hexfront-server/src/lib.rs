//! Hexfront consensus server
//!
//! Collects K-of-N independent validations of proposed action batches and commits the agreed
//! result to the canonical world and its snapshot history.

pub mod config;
pub mod consensus;
pub mod store;
pub mod validator;

pub use config::{ConfigError, ServerConfig};
pub use consensus::{ConsensusCoordinator, ConsensusError, CoordinatorEvent};
pub use store::{FileSnapshotStore, MemorySnapshotStore, SnapshotStore, StoreError};
pub use validator::{propose, spawn_local_validator, validate, ValidatorError};
