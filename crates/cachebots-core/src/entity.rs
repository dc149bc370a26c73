//! Blocks, caches, and the pheromone density backing belief decay.

use crate::grid::{GridCoord, Vec2};
use crate::{RobotId, Tick};
use serde::{Deserialize, Serialize};
use slotmap::new_key_type;

new_key_type! {
    /// Stable handle for blocks backed by a generational slot map.
    pub struct BlockId;
    /// Stable handle for caches backed by a generational slot map.
    pub struct CacheId;
}

/// Where a placed entity stands: its cell plus its continuous position.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Placement {
    pub coord: GridCoord,
    pub position: Vec2,
}

impl Placement {
    /// Placement at the center of `coord` for the given grid resolution.
    #[must_use]
    pub fn at_cell(coord: GridCoord, resolution: f64) -> Self {
        Self {
            coord,
            position: coord.to_real(resolution),
        }
    }
}

/// A discrete resource item robots search for and carry.
///
/// While carried (or stored inside a cache) a block has no placement and is
/// out of sight of every robot's sensors.
#[derive(Debug, Clone, PartialEq)]
pub struct Block {
    display_id: u32,
    placement: Option<Placement>,
    carrier: Option<RobotId>,
    carries: u32,
}

impl Block {
    pub(crate) fn new(display_id: u32) -> Self {
        Self {
            display_id,
            placement: None,
            carrier: None,
            carries: 0,
        }
    }

    /// Sequential diagnostic id, stable across pickups and drops.
    #[must_use]
    pub const fn display_id(&self) -> u32 {
        self.display_id
    }

    /// Current placement, if the block sits on the arena floor.
    #[must_use]
    pub const fn placement(&self) -> Option<Placement> {
        self.placement
    }

    /// Cell the block occupies, if placed.
    #[must_use]
    pub fn coord(&self) -> Option<GridCoord> {
        self.placement.map(|p| p.coord)
    }

    /// Continuous position, if placed.
    #[must_use]
    pub fn position(&self) -> Option<Vec2> {
        self.placement.map(|p| p.position)
    }

    /// Robot currently carrying the block, if any.
    #[must_use]
    pub const fn carrier(&self) -> Option<RobotId> {
        self.carrier
    }

    /// Times the block has been picked up over its lifetime.
    #[must_use]
    pub const fn carries(&self) -> u32 {
        self.carries
    }

    /// True when no sensor can see the block (carried or cache-held).
    #[must_use]
    pub const fn is_out_of_sight(&self) -> bool {
        self.placement.is_none()
    }

    /// The block leaves the floor and joins `robot`'s payload.
    pub(crate) fn pick_up(&mut self, robot: RobotId) {
        self.carries += 1;
        self.carrier = Some(robot);
        self.placement = None;
    }

    /// The block lands on the floor at `placement`.
    pub(crate) fn drop_at(&mut self, placement: Placement) {
        self.carrier = None;
        self.placement = Some(placement);
    }

    /// The block is swallowed by a cache: unowned and out of sight.
    pub(crate) fn store(&mut self) {
        self.carrier = None;
        self.placement = None;
    }
}

/// A shared deposit of two or more blocks at one cell.
///
/// A cache holds at least two blocks while alive; removal leaving exactly
/// one orphans that block back onto the cell and destroys the cache.
#[derive(Debug, Clone, PartialEq)]
pub struct Cache {
    display_id: u32,
    created: Tick,
    coord: GridCoord,
    position: Vec2,
    blocks: Vec<BlockId>,
}

impl Cache {
    pub(crate) fn new(
        display_id: u32,
        created: Tick,
        coord: GridCoord,
        position: Vec2,
        blocks: Vec<BlockId>,
    ) -> Self {
        Self {
            display_id,
            created,
            coord,
            position,
            blocks,
        }
    }

    /// Sequential diagnostic id.
    #[must_use]
    pub const fn display_id(&self) -> u32 {
        self.display_id
    }

    /// Tick the cache was created on.
    #[must_use]
    pub const fn created(&self) -> Tick {
        self.created
    }

    /// Cell the cache occupies.
    #[must_use]
    pub const fn coord(&self) -> GridCoord {
        self.coord
    }

    /// Continuous position of the cache.
    #[must_use]
    pub const fn position(&self) -> Vec2 {
        self.position
    }

    /// Blocks stored in the cache, oldest first.
    #[must_use]
    pub fn blocks(&self) -> &[BlockId] {
        &self.blocks
    }

    /// Number of stored blocks.
    #[must_use]
    pub fn block_count(&self) -> usize {
        self.blocks.len()
    }

    /// True when `id` is stored in this cache.
    #[must_use]
    pub fn contains(&self, id: BlockId) -> bool {
        self.blocks.contains(&id)
    }

    /// Deposits a block at the back of the queue.
    pub(crate) fn push_block(&mut self, id: BlockId) {
        self.blocks.push(id);
    }

    /// Removes and returns the oldest stored block.
    pub(crate) fn take_oldest(&mut self) -> Option<BlockId> {
        if self.blocks.is_empty() {
            None
        } else {
            Some(self.blocks.remove(0))
        }
    }
}

/// Ceiling on accumulated pheromone density.
const MAX_DENSITY: f64 = 10.0;

/// Exponentially-decaying confidence attached to one belief cell.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct PheromoneDensity {
    rho: f64,
    value: f64,
}

impl PheromoneDensity {
    /// A zero-density marker decaying by `rho` per tick.
    #[must_use]
    pub const fn new(rho: f64) -> Self {
        Self { rho, value: 0.0 }
    }

    /// Current density value.
    #[must_use]
    pub const fn value(&self) -> f64 {
        self.value
    }

    /// Re-observation: either stack another unit or reset to full confidence.
    pub(crate) fn deposit(&mut self, repeat: bool) {
        if repeat {
            self.value = (self.value + 1.0).min(MAX_DENSITY);
        } else {
            self.value = 1.0;
        }
    }

    /// One tick of exponential decay.
    pub(crate) fn decay(&mut self) {
        self.value *= self.rho;
    }

    /// Forgets everything.
    pub(crate) fn reset(&mut self) {
        self.value = 0.0;
    }
}
