use serde::{Deserialize, Serialize};

use crate::{Hex, PlayerId, Shortcut, Tile, Unit};

/// One atomic state transition, emitted in order for every committed batch.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WorldChange {
    UnitMoved {
        previous: Unit,
        updated: Unit,
        path: Vec<Hex>,
        cost: i32,
    },
    UnitDamaged {
        previous: Unit,
        updated: Unit,
        damage: i32,
    },
    UnitKilled {
        previous: Unit,
    },
    UnitHealed {
        previous: Unit,
        updated: Unit,
        amount: i32,
    },
    UnitBuilt {
        unit: Unit,
        tile: Hex,
        cost: i32,
    },
    CoinsChanged {
        player: PlayerId,
        previous: i32,
        updated: i32,
        reason: CoinsReason,
    },
    CaptureProgressed {
        unit: Shortcut,
        tile: Tile,
        turns: u32,
        required: u32,
    },
    CaptureCompleted {
        unit: Shortcut,
        previous: Tile,
        updated: Tile,
    },
    PlayerChanged {
        previous_player: PlayerId,
        new_player: PlayerId,
        previous_turn: u32,
        new_turn: u32,
    },
    /// Only `winner` has units left. Always the last change of a batch.
    GameWon {
        winner: PlayerId,
    },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CoinsReason {
    UnitBuilt,
    Income,
}

impl WorldChange {
    /// Units whose state this change touches, by shortcut.
    pub fn units(&self) -> Vec<&Shortcut> {
        match self {
            WorldChange::UnitMoved { updated, .. }
            | WorldChange::UnitDamaged { updated, .. }
            | WorldChange::UnitHealed { updated, .. } => vec![&updated.shortcut],
            WorldChange::UnitKilled { previous } => vec![&previous.shortcut],
            WorldChange::UnitBuilt { unit, .. } => vec![&unit.shortcut],
            WorldChange::CaptureProgressed { unit, .. }
            | WorldChange::CaptureCompleted { unit, .. } => vec![unit],
            WorldChange::CoinsChanged { .. }
            | WorldChange::PlayerChanged { .. }
            | WorldChange::GameWon { .. } => Vec::new(),
        }
    }
}
