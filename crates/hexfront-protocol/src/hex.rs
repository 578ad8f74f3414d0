use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Axial coordinates for a hex grid (q, r). The implicit cube coordinate is `s = -q - r`.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct Hex {
    pub q: i32,
    pub r: i32,
}

impl Hex {
    /// Neighbor offsets, indexed by `Direction as usize`.
    pub const DIRECTIONS: [Hex; 6] = [
        Hex { q: -1, r: 0 }, // Left
        Hex { q: 0, r: -1 }, // TopLeft
        Hex { q: 1, r: -1 }, // TopRight
        Hex { q: 1, r: 0 },  // Right
        Hex { q: 0, r: 1 },  // BottomRight
        Hex { q: -1, r: 1 }, // BottomLeft
    ];

    #[inline]
    pub const fn new(q: i32, r: i32) -> Self {
        Self { q, r }
    }

    #[inline]
    pub const fn s(self) -> i32 {
        -self.q - self.r
    }

    pub fn neighbors(self) -> impl Iterator<Item = Hex> {
        Self::DIRECTIONS.into_iter().map(move |d| self + d)
    }

    #[inline]
    pub fn neighbor(self, direction: Direction) -> Hex {
        self + Self::DIRECTIONS[direction as usize]
    }

    #[inline]
    pub fn distance(self, other: Hex) -> i32 {
        ((self.q - other.q).abs() + (self.r - other.r).abs() + (self.s() - other.s()).abs()) / 2
    }

    /// Follows a sequence of direction steps starting from `self`.
    pub fn walk<'a>(self, steps: impl IntoIterator<Item = &'a Direction>) -> Hex {
        steps.into_iter().fold(self, |at, dir| at.neighbor(*dir))
    }

    /// Direction of an adjacent hex, if `other` is a neighbor.
    pub fn direction_to(self, other: Hex) -> Option<Direction> {
        let delta = Hex::new(other.q - self.q, other.r - self.r);
        Self::DIRECTIONS
            .iter()
            .position(|d| *d == delta)
            .map(|i| Direction::ALL[i])
    }

    /// Hexes at exactly `radius`, walking the rim clockwise from the left corner.
    pub fn ring(self, radius: i32) -> impl Iterator<Item = Hex> {
        let start = self + Self::DIRECTIONS[Direction::Left as usize] * radius;
        let sides = [
            Direction::TopRight,
            Direction::Right,
            Direction::BottomRight,
            Direction::BottomLeft,
            Direction::Left,
            Direction::TopLeft,
        ];
        let len = if radius > 0 { radius as usize } else { 0 };
        sides
            .into_iter()
            .flat_map(move |dir| std::iter::repeat(dir).take(len))
            .scan(start, |at, dir| {
                let here = *at;
                *at = at.neighbor(dir);
                Some(here)
            })
    }

    /// Every hex within `radius`, column by column (ascending q, then r).
    pub fn ring_inclusive(self, radius: i32) -> impl Iterator<Item = Hex> {
        let radius = radius.max(0);
        (-radius..=radius).flat_map(move |dq| {
            let lo = (-radius).max(-dq - radius);
            let hi = radius.min(radius - dq);
            (lo..=hi).map(move |dr| Hex::new(self.q + dq, self.r + dr))
        })
    }
}

impl fmt::Display for Hex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{},{}", self.q, self.r)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[error("invalid coordinate `{0}`, expected `q,r`")]
pub struct ParseHexError(pub String);

impl FromStr for Hex {
    type Err = ParseHexError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (q, r) = s
            .split_once(',')
            .ok_or_else(|| ParseHexError(s.to_string()))?;
        let q = q.trim().parse().map_err(|_| ParseHexError(s.to_string()))?;
        let r = r.trim().parse().map_err(|_| ParseHexError(s.to_string()))?;
        Ok(Hex { q, r })
    }
}

/// The six neighbor directions of a pointy-top hex.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Left = 0,
    TopLeft = 1,
    TopRight = 2,
    Right = 3,
    BottomRight = 4,
    BottomLeft = 5,
}

impl Direction {
    pub const ALL: [Direction; 6] = [
        Direction::Left,
        Direction::TopLeft,
        Direction::TopRight,
        Direction::Right,
        Direction::BottomRight,
        Direction::BottomLeft,
    ];

    pub fn opposite(self) -> Direction {
        Self::ALL[(self as usize + 3) % 6]
    }

    pub fn token(self) -> &'static str {
        match self {
            Direction::Left => "L",
            Direction::TopLeft => "TL",
            Direction::TopRight => "TR",
            Direction::Right => "R",
            Direction::BottomRight => "BR",
            Direction::BottomLeft => "BL",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[error("unknown direction token `{0}`")]
pub struct ParseDirectionError(pub String);

impl FromStr for Direction {
    type Err = ParseDirectionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "L" | "LEFT" => Ok(Direction::Left),
            "TL" | "UL" | "LU" => Ok(Direction::TopLeft),
            "TR" | "UR" | "RU" => Ok(Direction::TopRight),
            "R" | "RIGHT" => Ok(Direction::Right),
            "BR" | "DR" | "RD" => Ok(Direction::BottomRight),
            "BL" | "DL" | "LD" => Ok(Direction::BottomLeft),
            _ => Err(ParseDirectionError(s.to_string())),
        }
    }
}

impl std::ops::Add for Hex {
    type Output = Hex;

    fn add(self, other: Hex) -> Hex {
        Hex {
            q: self.q + other.q,
            r: self.r + other.r,
        }
    }
}

impl std::ops::Mul<i32> for Hex {
    type Output = Hex;

    fn mul(self, rhs: i32) -> Self::Output {
        Hex {
            q: self.q * rhs,
            r: self.r * rhs,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn distance_counts_steps() {
        assert_eq!(Hex::new(0, 0).distance(Hex::new(3, -1)), 3);
        assert_eq!(Hex::new(-2, 2).distance(Hex::new(-2, 2)), 0);
        for n in Hex::new(5, 5).neighbors() {
            assert_eq!(Hex::new(5, 5).distance(n), 1);
        }
    }

    #[test]
    fn filled_hexagon_has_centered_hexagonal_count() {
        for radius in 0..=5 {
            let hexes: std::collections::BTreeSet<_> =
                Hex::new(1, 1).ring_inclusive(radius).collect();
            assert_eq!(hexes.len() as i32, 1 + 3 * radius * (radius + 1));
            assert!(hexes.iter().all(|h| Hex::new(1, 1).distance(*h) <= radius));
        }
    }

    #[test]
    fn ring_stays_at_radius() {
        let center = Hex::new(2, -3);
        let ring: Vec<_> = center.ring(3).collect();
        assert_eq!(ring.len(), 18);
        assert!(ring.iter().all(|h| center.distance(*h) == 3));
        let distinct: std::collections::BTreeSet<_> = ring.iter().collect();
        assert_eq!(distinct.len(), 18);
        assert_eq!(center.ring(0).count(), 0);
    }

    #[test]
    fn direction_tokens_parse_aliases() {
        assert_eq!("l".parse::<Direction>(), Ok(Direction::Left));
        assert_eq!("UL".parse::<Direction>(), Ok(Direction::TopLeft));
        assert_eq!("ru".parse::<Direction>(), Ok(Direction::TopRight));
        assert_eq!("Right".parse::<Direction>(), Ok(Direction::Right));
        assert_eq!("DR".parse::<Direction>(), Ok(Direction::BottomRight));
        assert_eq!("LD".parse::<Direction>(), Ok(Direction::BottomLeft));
        assert!("north".parse::<Direction>().is_err());
    }

    #[test]
    fn walk_follows_steps_and_opposites_cancel() {
        let start = Hex::new(1, 1);
        let end = start.walk(&[Direction::TopRight, Direction::Right]);
        assert_eq!(end, Hex::new(3, 0));
        for dir in Direction::ALL {
            assert_eq!(start.walk(&[dir, dir.opposite()]), start);
            assert_eq!(start.direction_to(start.neighbor(dir)), Some(dir));
        }
    }

    #[test]
    fn coordinate_text_round_trips() {
        let hex = Hex::new(-4, 7);
        assert_eq!(hex.to_string(), "-4,7");
        assert_eq!(" -4, 7".parse::<Hex>(), Ok(hex));
        assert!("4".parse::<Hex>().is_err());
    }

    proptest! {
        #[test]
        fn distance_is_symmetric_and_satisfies_triangle(
            a in (-50i32..50, -50i32..50),
            b in (-50i32..50, -50i32..50),
            c in (-50i32..50, -50i32..50),
        ) {
            let (a, b, c) = (Hex::new(a.0, a.1), Hex::new(b.0, b.1), Hex::new(c.0, c.1));
            prop_assert_eq!(a.distance(b), b.distance(a));
            prop_assert!(a.distance(c) <= a.distance(b) + b.distance(c));
            prop_assert_eq!(a.distance(a), 0);
        }
    }
}
