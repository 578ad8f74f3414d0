use std::fmt;

use serde::{Deserialize, Serialize};

use crate::GameAction;

/// Consensus result hash: FNV-1a over the MessagePack snapshot after the batch.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StateHash(pub u64);

impl fmt::Display for StateHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProposalId(pub u64);

impl fmt::Display for ProposalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A batch of actions a peer wants appended to the canonical history.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Proposal {
    pub proposer: String,
    /// World version the batch was computed against.
    pub base_version: u64,
    pub actions: Vec<GameAction>,
    pub expected_hash: StateHash,
}

/// What a validator computed after replaying a proposal.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ValidationOutcome {
    Hash { hash: StateHash },
    Rejected { index: usize, reason: String },
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationReport {
    pub proposal: ProposalId,
    pub validator: String,
    pub outcome: ValidationOutcome,
}

/// Lifecycle of a proposal: `Pending -> Validating -> {Committed | Rejected | TimedOut}`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ProposalStatus {
    Pending,
    Validating { agreeing: usize, disagreeing: usize },
    Committed { version: u64, hash: StateHash },
    Rejected { reason: String },
    TimedOut,
}

impl ProposalStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ProposalStatus::Committed { .. } | ProposalStatus::Rejected { .. } | ProposalStatus::TimedOut
        )
    }
}
