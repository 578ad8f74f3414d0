use serde::{Deserialize, Serialize};

use crate::{AllPaths, Hex, Shortcut};

/// A legal action offered at a coordinate.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum GameOption {
    Move {
        to: Hex,
        cost: i32,
        path: Vec<Hex>,
    },
    Attack {
        target: Hex,
        defender: Shortcut,
        /// Mean damage of the roll, including the current wound bonus.
        expected_damage: i32,
    },
    Capture {
        tile: Hex,
        turns_done: u32,
        turns_required: u32,
    },
    Build {
        tile: Hex,
        unit_type: String,
        cost: i32,
    },
    Heal {
        tile: Hex,
        amount: i32,
    },
    EndTurn,
}

/// Result of an options query for a single coordinate.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OptionsAt {
    pub coord: Hex,
    pub options: Vec<GameOption>,
    /// Reachability for the unit at `coord`, when the current player owns one there.
    #[serde(default)]
    pub paths: Option<AllPaths>,
    /// Enemy-held hexes the unit could attack after moving this turn.
    #[serde(default)]
    pub threatened: Vec<Hex>,
}

impl OptionsAt {
    pub fn moves(&self) -> impl Iterator<Item = &GameOption> {
        self.options
            .iter()
            .filter(|o| matches!(o, GameOption::Move { .. }))
    }

    pub fn attacks(&self) -> impl Iterator<Item = &GameOption> {
        self.options
            .iter()
            .filter(|o| matches!(o, GameOption::Attack { .. }))
    }

    pub fn builds(&self) -> impl Iterator<Item = &GameOption> {
        self.options
            .iter()
            .filter(|o| matches!(o, GameOption::Build { .. }))
    }
}
