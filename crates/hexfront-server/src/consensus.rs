//! K-of-N consensus over proposed action batches.
//!
//! The coordinator never interprets moves while collecting votes: it only compares the result
//! hashes validators report against the proposer's expected hash. Once K agree it replays the
//! batch on the canonical world, persists the resulting snapshot and only then commits and
//! acknowledges.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;

use hexfront_core::{CompiledRules, MoveProcessor, World, WorldMut, WorldView};
use hexfront_protocol::wire::snapshot_hash;
use hexfront_protocol::{
    Proposal, ProposalId, ProposalStatus, Snapshot, StateHash, ValidationOutcome,
    ValidationReport, WorldChange,
};
use thiserror::Error;
use tokio::sync::{broadcast, watch, Mutex};
use tokio::task::{self, JoinHandle};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::config::{ConfigError, ServerConfig};
use crate::store::{SnapshotStore, StoreError};

/// Slack past a proposal's deadline before a waiter gives up on the expiry timer.
const EXPIRY_GRACE: Duration = Duration::from_millis(100);
/// Terminal statuses kept around for late `status`/`wait` calls.
const FINISHED_RETAINED: usize = 1024;
const EVENT_CAPACITY: usize = 64;

#[derive(Debug, Error)]
pub enum ConsensusError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("stale proposal: built on version {got}, canonical tip is {expected}")]
    StaleProposal { expected: u64, got: u64 },
    #[error("proposal {0} timed out")]
    TimedOut(ProposalId),
    #[error("unknown proposal {0}")]
    UnknownProposal(ProposalId),
    #[error("`{0}` is not a registered validator")]
    UnknownValidator(String),
    #[error("failed to persist committed snapshot: {0}")]
    Persistence(#[from] StoreError),
}

/// Broadcast to peers as proposals move through their lifecycle.
#[derive(Debug, Clone, PartialEq)]
pub enum CoordinatorEvent {
    ProposalOpened {
        id: ProposalId,
        proposal: Proposal,
    },
    Committed {
        id: ProposalId,
        version: u64,
        hash: StateHash,
        changes: Vec<WorldChange>,
    },
    Closed {
        id: ProposalId,
        status: ProposalStatus,
    },
}

struct Round {
    proposal: Proposal,
    reports: BTreeMap<String, ValidationOutcome>,
    status: watch::Sender<ProposalStatus>,
    deadline: Instant,
    timer: Option<JoinHandle<()>>,
}

impl Round {
    fn tally(&self) -> (usize, usize) {
        let agreeing = self
            .reports
            .values()
            .filter(|outcome| {
                matches!(outcome, ValidationOutcome::Hash { hash } if *hash == self.proposal.expected_hash)
            })
            .count();
        (agreeing, self.reports.len() - agreeing)
    }
}

struct State {
    world: World,
    next_id: u64,
    rounds: BTreeMap<ProposalId, Round>,
    finished: BTreeMap<ProposalId, ProposalStatus>,
}

struct Inner {
    quorum: usize,
    validators: BTreeSet<String>,
    timeout: Duration,
    rules: Arc<CompiledRules>,
    store: Arc<dyn SnapshotStore>,
    state: Mutex<State>,
    events: broadcast::Sender<CoordinatorEvent>,
}

/// Owns the canonical world and runs one consensus round per proposal. Cheap to clone.
#[derive(Clone)]
pub struct ConsensusCoordinator {
    inner: Arc<Inner>,
}

impl ConsensusCoordinator {
    pub fn new(
        config: &ServerConfig,
        rules: Arc<CompiledRules>,
        world: World,
        store: Arc<dyn SnapshotStore>,
    ) -> Result<Self, ConsensusError> {
        config.validate()?;
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        info!(
            quorum = config.quorum,
            validators = config.validators.len(),
            tip = world.version(),
            "coordinator ready"
        );
        Ok(Self {
            inner: Arc::new(Inner {
                quorum: config.quorum,
                validators: config.validators.iter().cloned().collect(),
                timeout: config.proposal_timeout,
                rules,
                store,
                state: Mutex::new(State {
                    world,
                    next_id: 1,
                    rounds: BTreeMap::new(),
                    finished: BTreeMap::new(),
                }),
                events,
            }),
        })
    }

    pub fn rules(&self) -> &Arc<CompiledRules> {
        &self.inner.rules
    }

    pub fn quorum(&self) -> usize {
        self.inner.quorum
    }

    pub fn validators(&self) -> impl Iterator<Item = &str> {
        self.inner.validators.iter().map(String::as_str)
    }

    /// Version of the last committed world.
    pub async fn tip(&self) -> u64 {
        self.inner.state.lock().await.world.version()
    }

    pub async fn snapshot(&self) -> Snapshot {
        self.inner.state.lock().await.world.snapshot()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<CoordinatorEvent> {
        self.inner.events.subscribe()
    }

    /// Opens a round for `proposal`. Proposals not built on the current tip are refused.
    pub async fn submit(&self, proposal: Proposal) -> Result<ProposalId, ConsensusError> {
        let mut state = self.inner.state.lock().await;
        let tip = state.world.version();
        if proposal.base_version != tip {
            warn!(
                proposer = %proposal.proposer,
                base = proposal.base_version,
                tip,
                "stale proposal refused"
            );
            return Err(ConsensusError::StaleProposal {
                expected: tip,
                got: proposal.base_version,
            });
        }

        let id = ProposalId(state.next_id);
        state.next_id += 1;
        let deadline = Instant::now() + self.inner.timeout;
        let (status, _) = watch::channel(ProposalStatus::Pending);

        let inner = Arc::clone(&self.inner);
        let timer = tokio::spawn(async move {
            tokio::time::sleep_until(deadline).await;
            inner.expire(id).await;
        });

        info!(
            %id,
            proposer = %proposal.proposer,
            base = proposal.base_version,
            actions = proposal.actions.len(),
            expected = %proposal.expected_hash,
            "proposal opened"
        );
        let _ = self.inner.events.send(CoordinatorEvent::ProposalOpened {
            id,
            proposal: proposal.clone(),
        });
        state.rounds.insert(
            id,
            Round {
                proposal,
                reports: BTreeMap::new(),
                status,
                deadline,
                timer: Some(timer),
            },
        );
        Ok(id)
    }

    /// Records one validator's result and returns the proposal's status afterwards.
    ///
    /// Repeat reports from a validator and reports for closed proposals change nothing.
    pub async fn report(&self, report: ValidationReport) -> Result<ProposalStatus, ConsensusError> {
        if !self.inner.validators.contains(&report.validator) {
            return Err(ConsensusError::UnknownValidator(report.validator));
        }
        let id = report.proposal;
        let mut state = self.inner.state.lock().await;
        if let Some(status) = state.finished.get(&id) {
            debug!(%id, validator = %report.validator, "late report ignored");
            return Ok(status.clone());
        }
        let round = state
            .rounds
            .get_mut(&id)
            .ok_or(ConsensusError::UnknownProposal(id))?;
        if round.reports.contains_key(&report.validator) {
            debug!(%id, validator = %report.validator, "duplicate report ignored");
            return Ok(round.status.borrow().clone());
        }
        debug!(%id, validator = %report.validator, outcome = ?report.outcome, "report received");
        round.reports.insert(report.validator, report.outcome);

        let (agreeing, disagreeing) = round.tally();
        let n = self.inner.validators.len();
        if agreeing >= self.inner.quorum {
            return self.inner.commit(&mut state, id).await;
        }
        if n - disagreeing < self.inner.quorum {
            let status = ProposalStatus::Rejected {
                reason: format!(
                    "quorum unreachable: {disagreeing} of {n} validators disagree, {} needed",
                    self.inner.quorum
                ),
            };
            self.inner.finish(&mut state, id, status.clone());
            return Ok(status);
        }
        let status = ProposalStatus::Validating {
            agreeing,
            disagreeing,
        };
        round.status.send_replace(status.clone());
        Ok(status)
    }

    /// Waits for the proposal to reach a terminal status.
    pub async fn wait(&self, id: ProposalId) -> Result<ProposalStatus, ConsensusError> {
        let (mut status, deadline) = {
            let state = self.inner.state.lock().await;
            if let Some(status) = state.finished.get(&id) {
                return Ok(status.clone());
            }
            let round = state
                .rounds
                .get(&id)
                .ok_or(ConsensusError::UnknownProposal(id))?;
            (round.status.subscribe(), round.deadline)
        };

        let settled = async {
            status
                .wait_for(ProposalStatus::is_terminal)
                .await
                .map(|s| s.clone())
        };
        match tokio::time::timeout_at(deadline + EXPIRY_GRACE, settled).await {
            Ok(Ok(status)) => Ok(status),
            Ok(Err(_)) => self
                .status(id)
                .await
                .ok_or(ConsensusError::UnknownProposal(id)),
            Err(_) => Err(ConsensusError::TimedOut(id)),
        }
    }

    pub async fn status(&self, id: ProposalId) -> Option<ProposalStatus> {
        let state = self.inner.state.lock().await;
        match state.rounds.get(&id) {
            Some(round) => Some(round.status.borrow().clone()),
            None => state.finished.get(&id).cloned(),
        }
    }

    /// Open proposals `validator` has not reported on yet.
    pub async fn pending_for(
        &self,
        validator: &str,
    ) -> Result<Vec<(ProposalId, Proposal)>, ConsensusError> {
        if !self.inner.validators.contains(validator) {
            return Err(ConsensusError::UnknownValidator(validator.to_string()));
        }
        let state = self.inner.state.lock().await;
        Ok(state
            .rounds
            .iter()
            .filter(|(_, round)| !round.reports.contains_key(validator))
            .map(|(id, round)| (*id, round.proposal.clone()))
            .collect())
    }
}

impl Inner {
    async fn expire(&self, id: ProposalId) {
        let mut state = self.state.lock().await;
        if let Some(round) = state.rounds.get_mut(&id) {
            // Running inside the timer itself; nothing to abort.
            round.timer = None;
            let (agreeing, disagreeing) = round.tally();
            warn!(%id, agreeing, disagreeing, quorum = self.quorum, "proposal timed out");
            self.finish(&mut state, id, ProposalStatus::TimedOut);
        }
    }

    /// Replays the agreed batch on the canonical world, persists the result and commits it.
    ///
    /// The state lock stays held while the blocking pool writes the snapshot, so commits stay
    /// serialized and the tip only moves once the write is durable.
    async fn commit(
        &self,
        state: &mut State,
        id: ProposalId,
    ) -> Result<ProposalStatus, ConsensusError> {
        let Some(round) = state.rounds.get(&id) else {
            return Err(ConsensusError::UnknownProposal(id));
        };
        let proposal = round.proposal.clone();

        let tip = state.world.version();
        if proposal.base_version != tip {
            let status = ProposalStatus::Rejected {
                reason: format!(
                    "stale: built on version {}, canonical tip is {tip}",
                    proposal.base_version
                ),
            };
            self.finish(state, id, status.clone());
            return Ok(status);
        }

        let processor = MoveProcessor::new(&self.rules);
        let outcome = match processor.dry_run(&state.world, &proposal.actions) {
            Ok(outcome) => outcome,
            Err(err) => {
                let status = ProposalStatus::Rejected {
                    reason: format!("canonical replay failed: {err}"),
                };
                self.finish(state, id, status.clone());
                return Ok(status);
            }
        };
        let hash = match snapshot_hash(&outcome.snapshot) {
            Ok(hash) if hash == proposal.expected_hash => hash,
            Ok(hash) => {
                let status = ProposalStatus::Rejected {
                    reason: format!(
                        "canonical replay produced {hash}, validators agreed on {}",
                        proposal.expected_hash
                    ),
                };
                self.finish(state, id, status.clone());
                return Ok(status);
            }
            Err(err) => {
                let status = ProposalStatus::Rejected {
                    reason: format!("failed to hash canonical replay: {err}"),
                };
                self.finish(state, id, status.clone());
                return Ok(status);
            }
        };

        let version = outcome.snapshot.version;
        let store = Arc::clone(&self.store);
        let snapshot = outcome.snapshot.clone();
        let persisted = match task::spawn_blocking(move || store.persist(version, &snapshot)).await
        {
            Ok(result) => result,
            Err(err) => Err(StoreError::Unavailable(format!("persist task failed: {err}"))),
        };
        if let Err(err) = persisted {
            warn!(%id, version, error = %err, "persist failed, tip unchanged");
            self.finish(
                state,
                id,
                ProposalStatus::Rejected {
                    reason: format!("persistence failed: {err}"),
                },
            );
            return Err(ConsensusError::Persistence(err));
        }

        state.world.commit(outcome.layer);
        info!(%id, version, %hash, changes = outcome.changes.len(), "proposal committed");
        let _ = self.events.send(CoordinatorEvent::Committed {
            id,
            version,
            hash,
            changes: outcome.changes,
        });
        let status = ProposalStatus::Committed { version, hash };
        self.finish(state, id, status.clone());

        let superseded: Vec<ProposalId> = state
            .rounds
            .iter()
            .filter(|(_, round)| round.proposal.base_version == proposal.base_version)
            .map(|(other, _)| *other)
            .collect();
        for other in superseded {
            self.finish(
                state,
                other,
                ProposalStatus::Rejected {
                    reason: format!(
                        "stale: version {} was superseded by proposal {id}",
                        proposal.base_version
                    ),
                },
            );
        }
        Ok(status)
    }

    /// Closes a round: wakes waiters, stops its timer and remembers the outcome.
    fn finish(&self, state: &mut State, id: ProposalId, status: ProposalStatus) {
        let Some(mut round) = state.rounds.remove(&id) else {
            return;
        };
        if let Some(timer) = round.timer.take() {
            timer.abort();
        }
        if let ProposalStatus::Rejected { reason } = &status {
            warn!(%id, %reason, "proposal rejected");
        }
        round.status.send_replace(status.clone());
        state.finished.insert(id, status.clone());
        while state.finished.len() > FINISHED_RETAINED {
            state.finished.pop_first();
        }
        let _ = self.events.send(CoordinatorEvent::Closed { id, status });
    }
}
