use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::{Hex, PlayerId, Shortcut, TerrainId, UnitTypeId};

/// One hex of the map. Terrain never changes once placed; ownership and capture state do.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tile {
    pub coord: Hex,
    pub terrain: TerrainId,
    #[serde(default)]
    pub owner: Option<PlayerId>,
    #[serde(default)]
    pub capture: Option<CaptureProgress>,
    /// Turn in which this tile last produced a unit (one build per tile per turn).
    #[serde(default)]
    pub last_built_turn: u32,
}

impl Tile {
    pub fn new(coord: Hex, terrain: TerrainId) -> Self {
        Self {
            coord,
            terrain,
            owner: None,
            capture: None,
            last_built_turn: 0,
        }
    }

    pub fn owned_by(mut self, owner: PlayerId) -> Self {
        self.owner = Some(owner);
        self
    }
}

/// Capture in progress on a building tile.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaptureProgress {
    pub player: PlayerId,
    pub unit: Shortcut,
    /// Turns of capture accumulated so far.
    pub turns: u32,
    /// Turn in which progress was last advanced.
    pub last_turn: u32,
}

/// A live unit on the map.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Unit {
    pub shortcut: Shortcut,
    pub coord: Hex,
    pub unit_type: UnitTypeId,
    pub owner: PlayerId,
    pub health: i32,
    pub max_health: i32,
    pub distance_left: i32,
    #[serde(default)]
    pub last_acted_turn: u32,
    #[serde(default)]
    pub last_topped_up_turn: u32,
    /// Cursor into the unit type's action order.
    #[serde(default)]
    pub progression_step: u8,
    /// Alternative picked at the current step, if the step offers several.
    #[serde(default)]
    pub chosen_alternative: Option<ActionKind>,
    #[serde(default)]
    pub moved_this_turn: bool,
    /// Accumulated same-turn wound bonus applied against this unit.
    #[serde(default)]
    pub wound_bonus: i32,
    #[serde(default)]
    pub attack_history: Vec<AttackRecord>,
}

impl Unit {
    pub fn is_alive(&self) -> bool {
        self.health > 0
    }
}

/// One attack received this turn, kept for wound-bonus geometry.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttackRecord {
    pub from: Hex,
    pub ranged: bool,
}

/// Kinds of unit action tracked by action progression.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    Move,
    Attack,
    Capture,
    Retreat,
}

impl ActionKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ActionKind::Move => "move",
            ActionKind::Attack => "attack",
            ActionKind::Capture => "capture",
            ActionKind::Retreat => "retreat",
        }
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ActionKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "move" => Ok(ActionKind::Move),
            "attack" => Ok(ActionKind::Attack),
            "capture" => Ok(ActionKind::Capture),
            "retreat" => Ok(ActionKind::Retreat),
            other => Err(format!("unknown action `{other}`")),
        }
    }
}

/// Per-player bookkeeping.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerState {
    pub coins: i32,
    /// Last shortcut number handed out; the next unit gets `unit_counter + 1`.
    pub unit_counter: u32,
}
