//! Core identity and geometry types shared by every world component.
//!
//! Identities are plain `u32` newtypes so they can cross the process link
//! unchanged. Cells use signed coordinates so that out-of-range requests can
//! be represented and rejected rather than wrapped.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Unique identifier of any live role (player, monster or NPC).
///
/// Player identities come from the Game process repository; monster and
/// other non-player identities are minted by an
/// [`IdentityAllocator`](crate::identity::IdentityAllocator).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RoleId(pub u32);

/// Identifier of a map. Values above
/// [`DYNAMIC_MAP_THRESHOLD`](crate::config::DYNAMIC_MAP_THRESHOLD) denote
/// runtime-created instance maps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct MapId(pub u32);

/// Identifier of a monster generator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct GeneratorId(pub u32);

/// Identifier of a monster template.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TemplateId(pub u32);

/// Identifier of a player account, used to reject duplicate logins.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct AccountId(pub u32);

/// Index of one execution lane of the
/// [`PartitionedProcessor`](crate::processor::PartitionedProcessor).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PartitionId(pub usize);

macro_rules! impl_display {
    ($($ty:ident),*) => {
        $(
            impl fmt::Display for $ty {
                fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                    write!(f, "{}", self.0)
                }
            }
        )*
    };
}

impl_display!(RoleId, MapId, GeneratorId, TemplateId, AccountId, PartitionId);

/// A single tile coordinate on a map.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Cell {
    pub x: i32,
    pub y: i32,
}

impl Cell {
    pub const fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }

    /// Packs the cell into one word so it can live in an atomic.
    pub(crate) fn pack(self) -> u64 {
        ((self.x as u32 as u64) << 32) | (self.y as u32 as u64)
    }

    pub(crate) fn unpack(word: u64) -> Self {
        Self {
            x: (word >> 32) as u32 as i32,
            y: word as u32 as i32,
        }
    }

    /// Returns the cell shifted by the given offset.
    pub fn offset(self, dx: i32, dy: i32) -> Self {
        Self::new(self.x + dx, self.y + dy)
    }
}

impl fmt::Display for Cell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.x, self.y)
    }
}

/// An axis-aligned rectangle of cells, `[x, x + width) × [y, y + height)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rect {
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
}

impl Rect {
    pub const fn new(x: i32, y: i32, width: i32, height: i32) -> Self {
        Self { x, y, width, height }
    }

    pub fn contains(&self, cell: Cell) -> bool {
        cell.x >= self.x
            && cell.y >= self.y
            && cell.x < self.x + self.width
            && cell.y < self.y + self.height
    }

    pub fn is_empty(&self) -> bool {
        self.width <= 0 || self.height <= 0
    }
}

/// Which of the two cooperating processes this instance is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProcessSide {
    /// Authoritative for players, combat and persistence. Listens for the AI link.
    Game,
    /// Authoritative for monster behaviour and spawning. Connects out to the Game process.
    Ai,
}

impl ProcessSide {
    pub fn peer(self) -> Self {
        match self {
            ProcessSide::Game => ProcessSide::Ai,
            ProcessSide::Ai => ProcessSide::Game,
        }
    }
}

impl fmt::Display for ProcessSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProcessSide::Game => f.write_str("game"),
            ProcessSide::Ai => f.write_str("ai"),
        }
    }
}

impl std::str::FromStr for ProcessSide {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "game" => Ok(ProcessSide::Game),
            "ai" => Ok(ProcessSide::Ai),
            other => Err(format!("unknown process role '{other}', expected 'game' or 'ai'")),
        }
    }
}
