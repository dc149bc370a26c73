//! The closed set of world-mutating events.
//!
//! Each event is a plain value carrying the minimum data its mutation needs,
//! and defines one `apply_*` method per target it may legally visit. For one
//! physical occurrence the driver applies targets in a fixed order: arena map
//! (ground truth) first, then the acting robot's belief map, then its task
//! and state machine. Ground-truth applications verify bookkeeping and fail
//! fatally on disagreement; belief applications tolerate staleness silently.

use crate::arena::ArenaMap;
use crate::cell::{Cell, CellState};
use crate::entity::{BlockId, CacheId, Placement};
use crate::grid::{BlockSummary, CacheSummary, GridCoord};
use crate::perception::PerceivedMap;
use crate::{ConsistencyError, RobotId, Tick};

/// A robot lifts a free block off the cell it is standing on.
#[derive(Debug, Clone, Copy)]
pub struct FreeBlockPickup {
    pub block: BlockId,
    pub robot: RobotId,
    pub coord: GridCoord,
    pub tick: Tick,
}

impl FreeBlockPickup {
    /// Ground-truth mutation: the block leaves the floor, the cell empties.
    ///
    /// The block's recorded cell must equal the event's target cell; any
    /// disagreement means block and cell bookkeeping desynchronized.
    pub fn apply_to_arena(&self, arena: &mut ArenaMap) -> Result<(), ConsistencyError> {
        let (display, recorded) = {
            let block = arena
                .block(self.block)
                .ok_or(ConsistencyError::UnknownBlock { block: self.block })?;
            let recorded = block.coord().ok_or(ConsistencyError::BlockNotPlaced {
                block: block.display_id(),
            })?;
            (block.display_id(), recorded)
        };
        if recorded != self.coord {
            return Err(ConsistencyError::BlockCellMismatch {
                block: display,
                recorded,
                targeted: self.coord,
            });
        }
        let cell_agrees = arena
            .cell(self.coord)
            .is_some_and(|cell| cell.block_id() == Some(self.block));
        if !cell_agrees {
            let state = arena.cell(self.coord).map_or(CellState::Unknown, Cell::state);
            return Err(ConsistencyError::CellDisagreement {
                coord: self.coord,
                state,
                expected: "the picked-up block",
            });
        }
        if let Some(block) = arena.block_mut(self.block) {
            block.pick_up(self.robot);
        }
        if let Some(cell) = arena.cell_mut(self.coord) {
            cell.set_empty();
        }
        Ok(())
    }

    /// Belief mutation: the acting robot now knows the cell is empty.
    pub fn apply_to_perceived(&self, map: &mut PerceivedMap) {
        map.mark_empty(self.coord);
    }
}

/// A carried block is delivered into the nest and leaves the robot.
///
/// Delivered blocks return to the field through random redistribution.
#[derive(Debug, Clone, Copy)]
pub struct NestBlockDrop {
    pub block: BlockId,
    pub robot: RobotId,
    pub tick: Tick,
}

impl NestBlockDrop {
    /// Ground-truth mutation: count the delivery, redistribute the block.
    pub fn apply_to_arena(&self, arena: &mut ArenaMap) -> Result<(), ConsistencyError> {
        verify_carried(arena, self.block, self.robot)?;
        arena.redistribute(self.block)?;
        arena.note_collected();
        Ok(())
    }
}

/// A carried block is released onto a free cell mid-field, either because
/// its transport was aborted or to seed a new cache site.
#[derive(Debug, Clone, Copy)]
pub struct FreeBlockDrop {
    pub block: BlockId,
    pub robot: RobotId,
    pub coord: GridCoord,
    pub tick: Tick,
}

impl FreeBlockDrop {
    /// Ground-truth mutation: the block lands, the cell flips to occupied.
    ///
    /// The target cell must be empty; dropping onto an occupied cell is a
    /// different physical event (a cache deposit or a cache merge).
    pub fn apply_to_arena(&self, arena: &mut ArenaMap) -> Result<(), ConsistencyError> {
        verify_carried(arena, self.block, self.robot)?;
        let state = arena.cell(self.coord).map_or(CellState::Unknown, Cell::state);
        if state != CellState::Empty {
            return Err(ConsistencyError::CellDisagreement {
                coord: self.coord,
                state,
                expected: "an empty cell to drop onto",
            });
        }
        arena.place_block(self.block, self.coord)
    }
}

/// A carried block is deposited into an existing cache.
#[derive(Debug, Clone, Copy)]
pub struct CacheBlockDrop {
    pub block: BlockId,
    pub cache: CacheId,
    pub robot: RobotId,
    pub coord: GridCoord,
    pub tick: Tick,
}

impl CacheBlockDrop {
    /// Ground-truth mutation: the block joins the cache's store.
    pub fn apply_to_arena(&self, arena: &mut ArenaMap) -> Result<(), ConsistencyError> {
        verify_carried(arena, self.block, self.robot)?;
        let (display, recorded) = {
            let cache = arena
                .cache(self.cache)
                .ok_or(ConsistencyError::UnknownCache { cache: self.cache })?;
            (cache.display_id(), cache.coord())
        };
        if recorded != self.coord {
            return Err(ConsistencyError::CacheCellMismatch {
                cache: display,
                recorded,
                targeted: self.coord,
            });
        }
        let cell_agrees = arena
            .cell(self.coord)
            .is_some_and(|cell| cell.cache_id() == Some(self.cache));
        if !cell_agrees {
            let state = arena.cell(self.coord).map_or(CellState::Unknown, Cell::state);
            return Err(ConsistencyError::CellDisagreement {
                coord: self.coord,
                state,
                expected: "the targeted cache",
            });
        }
        if let Some(block) = arena.block_mut(self.block) {
            block.store();
        }
        if let Some(cache) = arena.cache_mut(self.cache) {
            cache.push_block(self.block);
        }
        if let Some(cell) = arena.cell_mut(self.coord) {
            cell.cache_block_added();
        }
        Ok(())
    }
}

/// A robot takes one block out of a cache.
///
/// Taking the second-to-last block dissolves the cache: the final block is
/// orphaned back onto the cell as a plain free block. The arena application
/// records which block was handed over and which (if any) was orphaned, so
/// later targets can react to the same outcome.
#[derive(Debug, Clone)]
pub struct CachedBlockPickup {
    pub cache: CacheId,
    pub robot: RobotId,
    pub coord: GridCoord,
    pub tick: Tick,
    pickup_block: Option<BlockId>,
    orphan_block: Option<BlockId>,
    remaining: Option<CacheSummary>,
}

impl CachedBlockPickup {
    /// Builds the event; outcome fields fill during arena application.
    #[must_use]
    pub fn new(cache: CacheId, robot: RobotId, coord: GridCoord, tick: Tick) -> Self {
        Self {
            cache,
            robot,
            coord,
            tick,
            pickup_block: None,
            orphan_block: None,
            remaining: None,
        }
    }

    /// Block handed to the robot, once the arena application ran.
    #[must_use]
    pub fn pickup_block(&self) -> Option<BlockId> {
        self.pickup_block
    }

    /// Block orphaned by cache dissolution, if dissolution happened.
    #[must_use]
    pub fn orphan_block(&self) -> Option<BlockId> {
        self.orphan_block
    }

    /// Ground-truth mutation: hand over the oldest block, degrade the cache
    /// if only one block would remain.
    pub fn apply_to_arena(&mut self, arena: &mut ArenaMap) -> Result<(), ConsistencyError> {
        let (display, recorded) = {
            let cache = arena
                .cache(self.cache)
                .ok_or(ConsistencyError::UnknownCache { cache: self.cache })?;
            (cache.display_id(), cache.coord())
        };
        if recorded != self.coord {
            return Err(ConsistencyError::CacheCellMismatch {
                cache: display,
                recorded,
                targeted: self.coord,
            });
        }
        let cell_agrees = arena
            .cell(self.coord)
            .is_some_and(|cell| cell.cache_id() == Some(self.cache));
        if !cell_agrees {
            let state = arena.cell(self.coord).map_or(CellState::Unknown, Cell::state);
            return Err(ConsistencyError::CellDisagreement {
                coord: self.coord,
                state,
                expected: "the targeted cache",
            });
        }

        let picked = arena
            .cache_mut(self.cache)
            .and_then(|cache| cache.take_oldest())
            .ok_or(ConsistencyError::CacheDrained { cache: display })?;
        if let Some(block) = arena.block_mut(picked) {
            block.pick_up(self.robot);
        }
        if let Some(cell) = arena.cell_mut(self.coord) {
            cell.cache_block_removed();
        }
        self.pickup_block = Some(picked);

        let left = arena.cache(self.cache).map_or(0, |cache| cache.block_count());
        match left {
            0 => Err(ConsistencyError::CacheDrained { cache: display }),
            1 => {
                let Some(orphan) = arena
                    .cache_mut(self.cache)
                    .and_then(|cache| cache.take_oldest())
                else {
                    return Err(ConsistencyError::CacheDrained { cache: display });
                };
                let placement = Placement::at_cell(self.coord, arena.config().resolution);
                if let Some(block) = arena.block_mut(orphan) {
                    block.drop_at(placement);
                }
                if let Some(cell) = arena.cell_mut(self.coord) {
                    cell.orphan_block(orphan);
                }
                arena.remove_cache(self.cache);
                self.orphan_block = Some(orphan);
                Ok(())
            }
            _ => {
                self.remaining = arena.cache_summary(self.cache);
                Ok(())
            }
        }
    }

    /// Belief mutation for the acting robot: a degraded cache is simply
    /// forgotten, a surviving one keeps a refreshed belief.
    pub fn apply_to_perceived(&self, map: &mut PerceivedMap) {
        match self.remaining {
            Some(summary) if self.orphan_block.is_none() => map.sense_cache(summary),
            _ => map.mark_empty(self.coord),
        }
    }
}

/// The cache a robot was counting on no longer exists.
///
/// Behavioral notification only; the cache is already gone from the arena,
/// so there is no ground-truth application.
#[derive(Debug, Clone, Copy)]
pub struct CacheVanished {
    pub cache: CacheId,
    pub robot: RobotId,
}

impl CacheVanished {
    /// Belief mutation: whatever the robot believed about the cache goes.
    pub fn apply_to_perceived(&self, map: &mut PerceivedMap) {
        map.forget_cache(self.cache);
    }
}

/// Belief-side observation: the cell was seen holding nothing.
#[derive(Debug, Clone, Copy)]
pub struct CellEmpty {
    pub coord: GridCoord,
}

impl CellEmpty {
    pub fn apply_to_perceived(&self, map: &mut PerceivedMap) {
        map.mark_empty(self.coord);
    }
}

/// Belief-side decay: everything known about the cell evaporated.
#[derive(Debug, Clone, Copy)]
pub struct CellUnknown {
    pub coord: GridCoord,
}

impl CellUnknown {
    pub fn apply_to_perceived(&self, map: &mut PerceivedMap) {
        map.forget(self.coord);
    }
}

/// Belief-side observation: a block came into view.
#[derive(Debug, Clone, Copy)]
pub struct BlockFound {
    pub summary: BlockSummary,
}

impl BlockFound {
    pub fn apply_to_perceived(&self, map: &mut PerceivedMap) {
        map.sense_block(self.summary);
    }
}

/// Belief-side observation: a cache came into view.
#[derive(Debug, Clone, Copy)]
pub struct CacheFound {
    pub summary: CacheSummary,
}

impl CacheFound {
    pub fn apply_to_perceived(&self, map: &mut PerceivedMap) {
        map.sense_cache(self.summary);
    }
}

/// Shared drop-event guard: the named robot must be carrying the block.
fn verify_carried(
    arena: &ArenaMap,
    block: BlockId,
    robot: RobotId,
) -> Result<(), ConsistencyError> {
    let found = arena
        .block(block)
        .ok_or(ConsistencyError::UnknownBlock { block })?;
    if found.carrier() != Some(robot) {
        return Err(ConsistencyError::NotCarrying {
            robot,
            block: found.display_id(),
        });
    }
    Ok(())
}
