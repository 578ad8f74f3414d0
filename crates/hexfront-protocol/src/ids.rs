use std::fmt;
use std::marker::PhantomData;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Data IDs are strings used in YAML files (human-readable, stable across versions)
pub type DataId = String;

/// Runtime IDs are integers compiled at rules-load (fast, deterministic)
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RuntimeId<T> {
    pub raw: u16,
    #[serde(skip)]
    _marker: PhantomData<T>,
}

impl<T> RuntimeId<T> {
    #[inline]
    pub const fn new(raw: u16) -> Self {
        Self {
            raw,
            _marker: PhantomData,
        }
    }
}

// Type-safe runtime IDs
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct UnitTypeTag;
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TerrainTag;

pub type UnitTypeId = RuntimeId<UnitTypeTag>;
pub type TerrainId = RuntimeId<TerrainTag>;

/// Player ID is a zero-based seat index (max 26 players, one shortcut letter each)
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PlayerId(pub u8);

impl PlayerId {
    pub const MAX_PLAYERS: u8 = 26;

    /// Letter prefix used in this player's unit shortcuts (`A` for player 0).
    pub fn letter(self) -> char {
        char::from(b'A' + self.0.min(Self::MAX_PLAYERS - 1))
    }
}

impl fmt::Display for PlayerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "P{}", self.0)
    }
}

/// Human-readable per-player unit identifier (`A1`, `B12`). Assigned once, never reused.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Shortcut(String);

impl Shortcut {
    pub fn new(player: PlayerId, number: u32) -> Self {
        Self(format!("{}{}", player.letter(), number))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Splits a shortcut into its player and sequence number.
    pub fn parts(&self) -> Option<(PlayerId, u32)> {
        let mut chars = self.0.chars();
        let letter = chars.next()?;
        if !letter.is_ascii_uppercase() {
            return None;
        }
        let number = chars.as_str().parse().ok()?;
        Some((PlayerId(letter as u8 - b'A'), number))
    }
}

impl fmt::Display for Shortcut {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for Shortcut {
    type Err = ParseShortcutError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        // Rebuilt from its parts so `A05` and `A5` name the same unit.
        match Shortcut(s.trim().to_ascii_uppercase()).parts() {
            Some((player, number)) if number > 0 => Ok(Shortcut::new(player, number)),
            _ => Err(ParseShortcutError(s.to_string())),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[error("invalid unit shortcut `{0}`")]
pub struct ParseShortcutError(pub String);
