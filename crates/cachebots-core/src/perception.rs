//! Per-robot decaying belief about arena contents.

use crate::cell::{CellFsm, CellState};
use crate::entity::{CacheId, PheromoneDensity};
use crate::events::{BlockFound, CacheFound, CellEmpty, CellUnknown};
use crate::grid::{BlockSummary, CacheSummary, Grid2D, GridCoord, LineOfSight};
use crate::ArenaError;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Pheromone bookkeeping parameters for belief decay.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct PerceptionConfig {
    /// Per-tick multiplicative decay factor applied to every known cell.
    pub rho: f64,
    /// Density below which a known cell evaporates back to unknown.
    pub threshold: f64,
    /// Whether re-observations stack density instead of resetting it to 1.
    pub repeat_deposit: bool,
}

impl Default for PerceptionConfig {
    fn default() -> Self {
        Self {
            rho: 0.99,
            threshold: 0.1,
            repeat_deposit: false,
        }
    }
}

impl PerceptionConfig {
    /// Validates the configuration.
    pub fn validate(&self) -> Result<(), ArenaError> {
        if !(0.0..1.0).contains(&self.rho) {
            return Err(ArenaError::InvalidConfig("rho must be in [0, 1)"));
        }
        if !(0.0..1.0).contains(&self.threshold) {
            return Err(ArenaError::InvalidConfig("threshold must be in [0, 1)"));
        }
        Ok(())
    }
}

/// One belief cell: an occupancy state machine plus its confidence.
#[derive(Debug, Clone)]
struct PerceivedCell {
    fsm: CellFsm,
    density: PheromoneDensity,
}

/// A robot's belief about one block.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PerceivedBlock {
    pub summary: BlockSummary,
    pub density: f64,
}

/// A robot's belief about one cache.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PerceivedCache {
    pub summary: CacheSummary,
    pub density: f64,
}

/// Robot-local map of decaying beliefs, distinct storage from ground truth.
///
/// Entity beliefs are value copies; nothing here ever references arena
/// storage. Beliefs are allowed to be stale, so every mutation entry point
/// here tolerates disagreement silently.
#[derive(Debug, Clone)]
pub struct PerceivedMap {
    config: PerceptionConfig,
    grid: Grid2D<PerceivedCell>,
    blocks: BTreeMap<GridCoord, BlockSummary>,
    caches: BTreeMap<GridCoord, CacheSummary>,
}

impl PerceivedMap {
    /// An all-unknown belief map over a `width` x `height` grid.
    #[must_use]
    pub fn new(width: u32, height: u32, config: PerceptionConfig) -> Self {
        let seed_cell = PerceivedCell {
            fsm: CellFsm::default(),
            density: PheromoneDensity::new(config.rho),
        };
        Self {
            config,
            grid: Grid2D::filled(width, height, seed_cell),
            blocks: BTreeMap::new(),
            caches: BTreeMap::new(),
        }
    }

    /// Believed state of `coord`; out-of-bounds reads as unknown.
    #[must_use]
    pub fn cell_state(&self, coord: GridCoord) -> CellState {
        self.grid
            .get(coord)
            .map_or(CellState::Unknown, |cell| cell.fsm.state())
    }

    /// Confidence in the belief about `coord`.
    #[must_use]
    pub fn density_at(&self, coord: GridCoord) -> f64 {
        self.grid
            .get(coord)
            .map_or(0.0, |cell| cell.density.value())
    }

    /// All currently-believed blocks, in coordinate order.
    #[must_use]
    pub fn known_blocks(&self) -> Vec<PerceivedBlock> {
        self.blocks
            .values()
            .map(|summary| PerceivedBlock {
                summary: *summary,
                density: self.density_at(summary.coord),
            })
            .collect()
    }

    /// All currently-believed caches, in coordinate order.
    #[must_use]
    pub fn known_caches(&self) -> Vec<PerceivedCache> {
        self.caches
            .values()
            .map(|summary| PerceivedCache {
                summary: *summary,
                density: self.density_at(summary.coord),
            })
            .collect()
    }

    /// Folds one tick's line of sight into the belief map.
    ///
    /// Every visible entity and empty cell becomes (or refreshes) a belief,
    /// expressed through the belief-side events.
    pub fn process_los(&mut self, los: &LineOfSight) {
        for summary in los.blocks() {
            BlockFound { summary: *summary }.apply_to_perceived(self);
        }
        for summary in los.caches() {
            CacheFound { summary: *summary }.apply_to_perceived(self);
        }
        for cell in los.cells() {
            if cell.state == CellState::Empty {
                CellEmpty { coord: cell.coord }.apply_to_perceived(self);
            }
        }
    }

    /// One tick of pheromone decay; beliefs below threshold evaporate.
    pub fn decay(&mut self) {
        self.grid.cells_mut().par_iter_mut().for_each(|cell| {
            if cell.fsm.is_known() {
                cell.density.decay();
            }
        });
        let threshold = self.config.threshold;
        let stale: Vec<GridCoord> = self
            .grid
            .iter()
            .filter(|(_, cell)| cell.fsm.is_known() && cell.density.value() < threshold)
            .map(|(coord, _)| coord)
            .collect();
        for coord in stale {
            CellUnknown { coord }.apply_to_perceived(self);
        }
    }

    pub(crate) fn sense_block(&mut self, summary: BlockSummary) {
        let repeat = self.config.repeat_deposit;
        let Some(cell) = self.grid.get_mut(summary.coord) else {
            return;
        };
        if !cell.fsm.has_block() {
            cell.fsm.event_empty();
            cell.fsm.event_block_drop();
        }
        cell.density.deposit(repeat);
        self.caches.remove(&summary.coord);
        self.blocks.insert(summary.coord, summary);
    }

    pub(crate) fn sense_cache(&mut self, summary: CacheSummary) {
        let repeat = self.config.repeat_deposit;
        let Some(cell) = self.grid.get_mut(summary.coord) else {
            return;
        };
        cell.fsm.event_cache_formed(summary.blocks);
        cell.density.deposit(repeat);
        self.blocks.remove(&summary.coord);
        self.caches.insert(summary.coord, summary);
    }

    pub(crate) fn mark_empty(&mut self, coord: GridCoord) {
        let repeat = self.config.repeat_deposit;
        let Some(cell) = self.grid.get_mut(coord) else {
            return;
        };
        cell.fsm.event_empty();
        cell.density.deposit(repeat);
        self.blocks.remove(&coord);
        self.caches.remove(&coord);
    }

    pub(crate) fn forget(&mut self, coord: GridCoord) {
        let Some(cell) = self.grid.get_mut(coord) else {
            return;
        };
        cell.fsm.event_unknown();
        cell.density.reset();
        self.blocks.remove(&coord);
        self.caches.remove(&coord);
    }

    pub(crate) fn forget_cache(&mut self, id: CacheId) {
        let coord = self
            .caches
            .values()
            .find(|summary| summary.id == id)
            .map(|summary| summary.coord);
        if let Some(coord) = coord {
            self.forget(coord);
        }
    }
}
