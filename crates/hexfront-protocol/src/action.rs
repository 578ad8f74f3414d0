use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::{Direction, Hex, Shortcut};

/// Where an action points: an absolute coordinate, a unit, or a direction path from a base hex.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum Position {
    Coord(Hex),
    Unit(Shortcut),
    /// Steps walked from the action's base position (usually the acting unit).
    Relative(Vec<Direction>),
}

impl Position {
    /// Resolves against a base coordinate; unit shortcuts need a world lookup and yield `None`.
    pub fn resolve_from(&self, base: Hex) -> Option<Hex> {
        match self {
            Position::Coord(hex) => Some(*hex),
            Position::Relative(steps) => Some(base.walk(steps)),
            Position::Unit(_) => None,
        }
    }
}

impl From<Hex> for Position {
    fn from(hex: Hex) -> Self {
        Position::Coord(hex)
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Position::Coord(hex) => write!(f, "{hex}"),
            Position::Unit(shortcut) => write!(f, "{shortcut}"),
            Position::Relative(steps) => {
                let tokens: Vec<_> = steps.iter().map(|d| d.token()).collect();
                f.write_str(&tokens.join(","))
            }
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[error("cannot parse position `{0}`")]
pub struct ParsePositionError(pub String);

impl FromStr for Position {
    type Err = ParsePositionError;

    /// Accepts `q,r`, a shortcut such as `A3`, or comma-separated direction tokens (`TR,R`).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            return Err(ParsePositionError(s.to_string()));
        }
        if let Ok(hex) = s.parse::<Hex>() {
            return Ok(Position::Coord(hex));
        }
        if let Ok(shortcut) = s.parse::<Shortcut>() {
            return Ok(Position::Unit(shortcut));
        }
        s.split(',')
            .map(|token| token.parse::<Direction>())
            .collect::<Result<Vec<_>, _>>()
            .map(Position::Relative)
            .map_err(|_| ParsePositionError(s.to_string()))
    }
}

/// A single player action inside a submitted batch.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum GameAction {
    MoveUnit {
        from: Position,
        to: Position,
    },
    AttackUnit {
        attacker: Position,
        defender: Position,
    },
    BuildUnit {
        at: Position,
        /// Unit type data id, as named in the rules file.
        unit_type: String,
    },
    CaptureBuilding {
        unit: Position,
    },
    /// Spends the unit's turn recovering health on a friendly or neutral healing tile.
    HealUnit {
        unit: Position,
    },
    EndTurn,
}

impl GameAction {
    pub fn name(&self) -> &'static str {
        match self {
            GameAction::MoveUnit { .. } => "move_unit",
            GameAction::AttackUnit { .. } => "attack_unit",
            GameAction::BuildUnit { .. } => "build_unit",
            GameAction::CaptureBuilding { .. } => "capture_building",
            GameAction::HealUnit { .. } => "heal_unit",
            GameAction::EndTurn => "end_turn",
        }
    }
}
