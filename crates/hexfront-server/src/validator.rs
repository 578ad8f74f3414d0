//! Proposer and validator sides of a consensus round.

use std::sync::Arc;

use hexfront_core::{BatchError, CompiledRules, MoveProcessor, World, WorldError, WorldView};
use hexfront_protocol::wire::{snapshot_hash, WireError};
use hexfront_protocol::{
    GameAction, Proposal, ProposalId, Snapshot, ValidationOutcome, ValidationReport,
};
use thiserror::Error;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::consensus::{ConsensusCoordinator, CoordinatorEvent};

#[derive(Debug, Error)]
pub enum ValidatorError {
    #[error("snapshot is at version {got}, proposal was built on {expected}")]
    BaseMismatch { expected: u64, got: u64 },
    #[error("batch rejected locally: {0}")]
    Batch(#[from] BatchError),
    #[error(transparent)]
    World(#[from] WorldError),
    #[error(transparent)]
    Wire(#[from] WireError),
}

/// Runs `actions` on a scratch layer over `world` and packages the hash it should produce.
pub fn propose<W: WorldView>(
    world: &W,
    rules: &CompiledRules,
    proposer: &str,
    actions: Vec<GameAction>,
) -> Result<Proposal, ValidatorError> {
    let outcome = MoveProcessor::new(rules).dry_run(world, &actions)?;
    let expected_hash = snapshot_hash(&outcome.snapshot)?;
    debug!(proposer, base = world.version(), %expected_hash, "proposal prepared");
    Ok(Proposal {
        proposer: proposer.to_string(),
        base_version: world.version(),
        actions,
        expected_hash,
    })
}

/// Replays `proposal` on a world rebuilt from `snapshot`.
///
/// A batch the rules refuse is still a valid report: it carries the failing action's index.
pub fn validate(
    snapshot: &Snapshot,
    rules: &CompiledRules,
    id: ProposalId,
    validator: &str,
    proposal: &Proposal,
) -> Result<ValidationReport, ValidatorError> {
    if snapshot.version != proposal.base_version {
        return Err(ValidatorError::BaseMismatch {
            expected: proposal.base_version,
            got: snapshot.version,
        });
    }
    let world = World::from_snapshot_checked(snapshot, rules)?;
    let outcome = match MoveProcessor::new(rules).dry_run(&world, &proposal.actions) {
        Ok(outcome) => ValidationOutcome::Hash {
            hash: snapshot_hash(&outcome.snapshot)?,
        },
        Err(err) => ValidationOutcome::Rejected {
            index: err.index,
            reason: err.source.to_string(),
        },
    };
    Ok(ValidationReport {
        proposal: id,
        validator: validator.to_string(),
        outcome,
    })
}

/// In-process validator: replays every opened proposal against the coordinator's tip and
/// reports the result under `name`.
pub fn spawn_local_validator(
    coordinator: ConsensusCoordinator,
    rules: Arc<CompiledRules>,
    name: String,
) -> JoinHandle<()> {
    let mut events = coordinator.subscribe();
    tokio::spawn(async move {
        info!(validator = %name, "validator started");
        loop {
            match events.recv().await {
                Ok(CoordinatorEvent::ProposalOpened { id, proposal }) => {
                    check(&coordinator, &rules, &name, id, &proposal).await;
                }
                Ok(_) => {}
                Err(RecvError::Lagged(skipped)) => {
                    warn!(validator = %name, skipped, "validator lagged, catching up");
                    match coordinator.pending_for(&name).await {
                        Ok(pending) => {
                            for (id, proposal) in pending {
                                check(&coordinator, &rules, &name, id, &proposal).await;
                            }
                        }
                        Err(err) => warn!(validator = %name, error = %err, "catch-up failed"),
                    }
                }
                Err(RecvError::Closed) => break,
            }
        }
        info!(validator = %name, "validator stopped");
    })
}

async fn check(
    coordinator: &ConsensusCoordinator,
    rules: &CompiledRules,
    name: &str,
    id: ProposalId,
    proposal: &Proposal,
) {
    let snapshot = coordinator.snapshot().await;
    let report = match validate(&snapshot, rules, id, name, proposal) {
        Ok(report) => report,
        Err(err) => {
            debug!(validator = name, %id, error = %err, "proposal skipped");
            return;
        }
    };
    if let Err(err) = coordinator.report(report).await {
        warn!(validator = name, %id, error = %err, "report failed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hexfront_core::{load_rules, starter_world, RulesSource, StarterMap};
    use hexfront_protocol::{Hex, Position};

    fn setup() -> (CompiledRules, World) {
        let rules = load_rules(RulesSource::Embedded).unwrap();
        let world = starter_world(&rules, &StarterMap::default(), 3).unwrap();
        (rules, world)
    }

    #[test]
    fn independent_validators_agree_with_the_proposer() {
        let (rules, world) = setup();
        let proposal = propose(&world, &rules, "p0", vec![GameAction::EndTurn]).unwrap();
        assert_eq!(proposal.base_version, 0);

        let snapshot = world.snapshot();
        for name in ["a", "b"] {
            let report = validate(&snapshot, &rules, ProposalId(1), name, &proposal).unwrap();
            assert_eq!(
                report.outcome,
                ValidationOutcome::Hash {
                    hash: proposal.expected_hash
                }
            );
        }
    }

    #[test]
    fn refused_batch_reports_the_failing_action() {
        let (rules, world) = setup();
        let mut proposal = propose(&world, &rules, "p0", vec![GameAction::EndTurn]).unwrap();
        proposal.actions = vec![
            GameAction::EndTurn,
            GameAction::MoveUnit {
                from: Position::Coord(Hex::new(0, 0)),
                to: Position::Coord(Hex::new(1, 0)),
            },
        ];
        let report = validate(&world.snapshot(), &rules, ProposalId(7), "a", &proposal).unwrap();
        match report.outcome {
            ValidationOutcome::Rejected { index, .. } => assert_eq!(index, 1),
            other => panic!("expected rejection, got {other:?}"),
        }
    }

    #[test]
    fn snapshot_with_unknown_unit_types_is_not_replayed() {
        let (rules, world) = setup();
        let proposal = propose(&world, &rules, "p0", vec![GameAction::EndTurn]).unwrap();
        let mut snapshot = world.snapshot();
        snapshot.units[0].unit_type = hexfront_protocol::UnitTypeId::new(40);
        assert!(matches!(
            validate(&snapshot, &rules, ProposalId(1), "a", &proposal),
            Err(ValidatorError::World(WorldError::UnknownUnitType { id: 40, .. }))
        ));
    }

    #[test]
    fn snapshot_on_another_version_is_not_validated() {
        let (rules, world) = setup();
        let proposal = propose(&world, &rules, "p0", vec![GameAction::EndTurn]).unwrap();
        let mut snapshot = world.snapshot();
        snapshot.version = 2;
        assert!(matches!(
            validate(&snapshot, &rules, ProposalId(1), "a", &proposal),
            Err(ValidatorError::BaseMismatch {
                expected: 0,
                got: 2
            })
        ));
    }
}
