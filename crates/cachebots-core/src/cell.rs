//! Per-cell occupancy state machine and the arena cell built on top of it.

use crate::entity::{BlockId, CacheId};
use serde::{Deserialize, Serialize};

/// Occupancy state tracked for every arena and belief cell.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum CellState {
    /// Nothing is known about the cell (belief maps only).
    #[default]
    Unknown,
    /// The cell is known to hold nothing.
    Empty,
    /// Exactly one free block sits on the cell.
    HasBlock,
    /// A cache of two or more blocks sits on the cell.
    HasCache,
}

/// State machine driving [`CellState`] transitions.
///
/// There is no state setter: every transition happens through one of the
/// event entry points, so any state change is traceable to one event.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct CellFsm {
    state: CellState,
    block_count: usize,
}

impl CellFsm {
    /// Current occupancy state.
    #[must_use]
    pub const fn state(&self) -> CellState {
        self.state
    }

    /// Blocks stacked on the cell (1 for a bare block, >= 2 for a cache).
    #[must_use]
    pub const fn block_count(&self) -> usize {
        self.block_count
    }

    /// True once the cell has been observed at all.
    #[must_use]
    pub fn is_known(&self) -> bool {
        self.state != CellState::Unknown
    }

    /// True when exactly one free block occupies the cell.
    #[must_use]
    pub fn has_block(&self) -> bool {
        self.state == CellState::HasBlock
    }

    /// True when a cache occupies the cell.
    #[must_use]
    pub fn has_cache(&self) -> bool {
        self.state == CellState::HasCache
    }

    /// True when the cell is known to be empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.state == CellState::Empty
    }

    /// Belief about the cell decayed away.
    pub(crate) fn event_unknown(&mut self) {
        self.state = CellState::Unknown;
        self.block_count = 0;
    }

    /// The cell was observed (or made) empty.
    pub(crate) fn event_empty(&mut self) {
        self.state = CellState::Empty;
        self.block_count = 0;
    }

    /// One block landed on the cell; a second block forms a cache.
    pub(crate) fn event_block_drop(&mut self) {
        match self.state {
            CellState::Unknown | CellState::Empty => {
                self.state = CellState::HasBlock;
                self.block_count = 1;
            }
            CellState::HasBlock => {
                self.state = CellState::HasCache;
                self.block_count = 2;
            }
            CellState::HasCache => self.block_count += 1,
        }
    }

    /// One block left the cell; a cache down to one block degrades.
    pub(crate) fn event_block_pickup(&mut self) {
        match self.state {
            CellState::HasCache if self.block_count > 2 => self.block_count -= 1,
            CellState::HasCache => {
                self.state = CellState::HasBlock;
                self.block_count = 1;
            }
            _ => {
                self.state = CellState::Empty;
                self.block_count = 0;
            }
        }
    }

    /// A cache of `blocks` blocks was placed on the cell wholesale.
    pub(crate) fn event_cache_formed(&mut self, blocks: usize) {
        self.state = CellState::HasCache;
        self.block_count = blocks;
    }
}

/// Index-based back-reference from a cell to the entity standing on it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CellEntity {
    Block(BlockId),
    Cache(CacheId),
}

/// One arena grid cell: occupancy state plus its occupant back-reference.
///
/// Invariant: the state machine and the back-reference always agree
/// (`HasBlock` implies a block reference, `HasCache` a cache reference,
/// anything else no reference at all).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Cell {
    fsm: CellFsm,
    entity: Option<CellEntity>,
}

impl Cell {
    /// A cell known to hold nothing, the arena bootstrap state.
    #[must_use]
    pub fn known_empty() -> Self {
        let mut cell = Self::default();
        cell.fsm.event_empty();
        cell
    }

    /// Current occupancy state.
    #[must_use]
    pub fn state(&self) -> CellState {
        self.fsm.state()
    }

    /// The cell's state machine.
    #[must_use]
    pub const fn fsm(&self) -> &CellFsm {
        &self.fsm
    }

    /// Occupant back-reference, if any.
    #[must_use]
    pub const fn entity(&self) -> Option<CellEntity> {
        self.entity
    }

    /// Id of the block occupying the cell, if one does.
    #[must_use]
    pub fn block_id(&self) -> Option<BlockId> {
        match self.entity {
            Some(CellEntity::Block(id)) => Some(id),
            _ => None,
        }
    }

    /// Id of the cache occupying the cell, if one does.
    #[must_use]
    pub fn cache_id(&self) -> Option<CacheId> {
        match self.entity {
            Some(CellEntity::Cache(id)) => Some(id),
            _ => None,
        }
    }

    /// Clears the occupant and marks the cell empty.
    pub(crate) fn set_empty(&mut self) {
        self.fsm.event_empty();
        self.entity = None;
    }

    /// Places a free block on the cell.
    pub(crate) fn set_block(&mut self, id: BlockId) {
        self.fsm.event_block_drop();
        self.entity = Some(CellEntity::Block(id));
    }

    /// Places a cache of `blocks` blocks on the cell.
    pub(crate) fn set_cache(&mut self, id: CacheId, blocks: usize) {
        self.fsm.event_cache_formed(blocks);
        self.entity = Some(CellEntity::Cache(id));
    }

    /// A block was deposited into the cache already on the cell.
    pub(crate) fn cache_block_added(&mut self) {
        self.fsm.event_block_drop();
    }

    /// A block was taken out of the cache already on the cell.
    pub(crate) fn cache_block_removed(&mut self) {
        self.fsm.event_block_pickup();
    }

    /// Swaps the occupant to a bare block after a cache degraded.
    ///
    /// Callers must have already driven the state machine to `HasBlock` via
    /// [`Cell::cache_block_removed`].
    pub(crate) fn orphan_block(&mut self, id: BlockId) {
        self.entity = Some(CellEntity::Block(id));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use slotmap::SlotMap;

    fn block_id(n: usize) -> BlockId {
        let mut keys: SlotMap<BlockId, ()> = SlotMap::with_key();
        let mut id = keys.insert(());
        for _ in 0..n {
            id = keys.insert(());
        }
        id
    }

    #[test]
    fn drop_and_pickup_walk_the_state_ladder() {
        let mut fsm = CellFsm::default();
        assert_eq!(fsm.state(), CellState::Unknown);

        fsm.event_block_drop();
        assert_eq!(fsm.state(), CellState::HasBlock);
        assert_eq!(fsm.block_count(), 1);

        fsm.event_block_drop();
        assert_eq!(fsm.state(), CellState::HasCache);
        assert_eq!(fsm.block_count(), 2);

        fsm.event_block_drop();
        assert_eq!(fsm.block_count(), 3);

        fsm.event_block_pickup();
        assert_eq!(fsm.state(), CellState::HasCache);
        assert_eq!(fsm.block_count(), 2);

        fsm.event_block_pickup();
        assert_eq!(fsm.state(), CellState::HasBlock);
        assert_eq!(fsm.block_count(), 1);

        fsm.event_block_pickup();
        assert_eq!(fsm.state(), CellState::Empty);
        assert_eq!(fsm.block_count(), 0);
    }

    #[test]
    fn unknown_resets_any_state() {
        let mut fsm = CellFsm::default();
        fsm.event_block_drop();
        fsm.event_block_drop();
        fsm.event_unknown();
        assert_eq!(fsm.state(), CellState::Unknown);
        assert_eq!(fsm.block_count(), 0);
    }

    #[test]
    fn cell_back_reference_tracks_state() {
        let id = block_id(0);
        let mut cell = Cell::known_empty();
        assert_eq!(cell.state(), CellState::Empty);
        assert!(cell.entity().is_none());

        cell.set_block(id);
        assert_eq!(cell.state(), CellState::HasBlock);
        assert_eq!(cell.block_id(), Some(id));
        assert!(cell.cache_id().is_none());

        cell.set_empty();
        assert_eq!(cell.state(), CellState::Empty);
        assert!(cell.entity().is_none());
    }

    #[test]
    fn cache_degrade_leaves_an_orphan_reference() {
        let orphan = block_id(1);
        let mut keys: SlotMap<CacheId, ()> = SlotMap::with_key();
        let cache = keys.insert(());

        let mut cell = Cell::known_empty();
        cell.set_cache(cache, 2);
        assert_eq!(cell.state(), CellState::HasCache);
        assert_eq!(cell.fsm().block_count(), 2);

        cell.cache_block_removed();
        cell.orphan_block(orphan);
        assert_eq!(cell.state(), CellState::HasBlock);
        assert_eq!(cell.block_id(), Some(orphan));
    }
}
