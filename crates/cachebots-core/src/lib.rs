//! Shared world model for the cachebots workspace: ground-truth arena,
//! per-robot belief maps, and the event layer that mutates both.

pub mod arena;
pub mod cell;
pub mod entity;
pub mod events;
pub mod grid;
pub mod perception;

pub use arena::{ArenaConfig, ArenaMap};
pub use cell::{Cell, CellEntity, CellFsm, CellState};
pub use entity::{Block, BlockId, Cache, CacheId, PheromoneDensity, Placement};
pub use events::{
    BlockFound, CacheBlockDrop, CacheFound, CacheVanished, CachedBlockPickup, CellEmpty,
    CellUnknown, FreeBlockDrop, FreeBlockPickup, NestBlockDrop,
};
pub use grid::{BlockSummary, CacheSummary, Grid2D, GridCoord, LineOfSight, LosCell, Vec2};
pub use perception::{PerceivedBlock, PerceivedCache, PerceivedMap, PerceptionConfig};

use grid::GridCoord as Coord;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// High level simulation clock (ticks processed since boot).
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
pub struct Tick(pub u64);

impl Tick {
    /// Returns the next sequential tick.
    #[must_use]
    pub const fn next(self) -> Self {
        Self(self.0 + 1)
    }

    /// Resets the tick counter back to zero.
    #[must_use]
    pub const fn zero() -> Self {
        Self(0)
    }

    /// Whole ticks elapsed since `earlier`, saturating at zero.
    #[must_use]
    pub const fn since(self, earlier: Self) -> u64 {
        self.0.saturating_sub(earlier.0)
    }
}

impl fmt::Display for Tick {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "t{}", self.0)
    }
}

/// Index of a robot within the swarm, assigned by the driver at spawn.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RobotId(pub u32);

impl fmt::Display for RobotId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "robot{}", self.0)
    }
}

/// Errors that can occur when constructing the arena.
#[derive(Debug, Error)]
pub enum ArenaError {
    /// Indicates an invalid configuration value.
    #[error("invalid configuration: {0}")]
    InvalidConfig(&'static str),
}

/// Fatal faults raised when ground-truth bookkeeping disagrees with itself.
///
/// These indicate a violated data-model invariant, never an expected runtime
/// condition; callers propagate them and the driver aborts the run. Stale
/// robot *belief* is tolerated silently and never produces one of these.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConsistencyError {
    /// The event references a block the arena does not own.
    #[error("block {block:?} is not registered in the arena")]
    UnknownBlock { block: BlockId },
    /// The event references a cache the arena does not own.
    #[error("cache {cache:?} is not registered in the arena")]
    UnknownCache { cache: CacheId },
    /// A pickup targeted a block that is not sitting in the arena.
    #[error("block{block} is carried or unplaced, not on the arena floor")]
    BlockNotPlaced { block: u32 },
    /// Block bookkeeping and the event's target cell disagree.
    #[error("block{block} records cell {recorded} but the event targets {targeted}")]
    BlockCellMismatch {
        block: u32,
        recorded: Coord,
        targeted: Coord,
    },
    /// Cache bookkeeping and the event's target cell disagree.
    #[error("cache{cache} records cell {recorded} but the event targets {targeted}")]
    CacheCellMismatch {
        cache: u32,
        recorded: Coord,
        targeted: Coord,
    },
    /// A cell's occupant back-reference does not match its state machine.
    #[error("cell {coord} in state {state:?} does not reference the {expected}")]
    CellDisagreement {
        coord: Coord,
        state: CellState,
        expected: &'static str,
    },
    /// A drop event named a robot that is not carrying the block.
    #[error("{robot} is not carrying block{block}")]
    NotCarrying { robot: RobotId, block: u32 },
    /// A cache yielded no block even though it is still alive.
    #[error("cache{cache} has no blocks left to yield")]
    CacheDrained { cache: u32 },
    /// Cache creation was requested with fewer than two blocks.
    #[error("a cache needs at least two blocks, got {blocks}")]
    CacheTooSmall { blocks: usize },
    /// Block redistribution could not find a free cell.
    #[error("no free cell available to place block{block}")]
    NoFreeCell { block: u32 },
}
