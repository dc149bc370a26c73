//! Ground-truth arena map: the occupancy grid plus canonical entity storage.

use crate::cell::{Cell, CellEntity, CellState};
use crate::entity::{Block, BlockId, Cache, CacheId, Placement};
use crate::grid::{BlockSummary, CacheSummary, Grid2D, GridCoord, LineOfSight, LosCell, Vec2};
use crate::{ArenaError, ConsistencyError, Tick};
use rand::{Rng, SeedableRng, rngs::SmallRng};
use serde::{Deserialize, Serialize};
use slotmap::SlotMap;

/// Static arena configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArenaConfig {
    /// Arena width in meters.
    pub width: f64,
    /// Arena height in meters.
    pub height: f64,
    /// Size of one grid cell in meters (must evenly divide width/height).
    pub resolution: f64,
    /// Center of the rectangular nest region.
    pub nest_center: Vec2,
    /// Half extent of the nest region along each axis.
    pub nest_half_extent: Vec2,
    /// Number of free blocks distributed at bootstrap.
    pub block_count: usize,
    /// Blocks seeded into one static cache at bootstrap; 0 disables it.
    pub static_cache_blocks: usize,
    /// Position of the static cache.
    pub static_cache_position: Vec2,
    /// Side length of the square line-of-sight window, in cells (odd).
    pub los_dim: u32,
    /// Optional RNG seed for reproducible block distribution.
    pub rng_seed: Option<u64>,
}

impl Default for ArenaConfig {
    fn default() -> Self {
        Self {
            width: 10.0,
            height: 5.0,
            resolution: 0.2,
            nest_center: Vec2::new(2.0, 2.5),
            nest_half_extent: Vec2::new(1.0, 1.0),
            block_count: 20,
            static_cache_blocks: 2,
            static_cache_position: Vec2::new(5.0, 2.5),
            los_dim: 5,
            rng_seed: None,
        }
    }
}

impl ArenaConfig {
    /// Validates the configuration, returning the derived grid dimensions.
    pub fn grid_dimensions(&self) -> Result<(u32, u32), ArenaError> {
        if self.width <= 0.0 || self.height <= 0.0 {
            return Err(ArenaError::InvalidConfig(
                "arena dimensions must be positive",
            ));
        }
        if self.resolution <= 0.0 {
            return Err(ArenaError::InvalidConfig("resolution must be positive"));
        }
        let width = (self.width / self.resolution).round();
        let height = (self.height / self.resolution).round();
        if (width * self.resolution - self.width).abs() > 1e-9
            || (height * self.resolution - self.height).abs() > 1e-9
        {
            return Err(ArenaError::InvalidConfig(
                "arena dimensions must be divisible by the resolution",
            ));
        }
        // drivers keep a one-cell margin per side, so an interior must exist
        if width < 3.0 || height < 3.0 {
            return Err(ArenaError::InvalidConfig(
                "arena must span at least three cells per axis",
            ));
        }
        if self.los_dim == 0 || self.los_dim.is_multiple_of(2) {
            return Err(ArenaError::InvalidConfig("los_dim must be odd"));
        }
        if self.nest_half_extent.x <= 0.0 || self.nest_half_extent.y <= 0.0 {
            return Err(ArenaError::InvalidConfig(
                "nest_half_extent must be positive",
            ));
        }
        if self.nest_center.x - self.nest_half_extent.x < 0.0
            || self.nest_center.x + self.nest_half_extent.x > self.width
            || self.nest_center.y - self.nest_half_extent.y < 0.0
            || self.nest_center.y + self.nest_half_extent.y > self.height
        {
            return Err(ArenaError::InvalidConfig("nest must lie inside the arena"));
        }
        if self.static_cache_blocks == 1 {
            return Err(ArenaError::InvalidConfig(
                "static_cache_blocks must be 0 or at least 2",
            ));
        }
        if self.static_cache_blocks > 0 {
            let p = self.static_cache_position;
            if p.x < 0.0 || p.x > self.width || p.y < 0.0 || p.y > self.height {
                return Err(ArenaError::InvalidConfig(
                    "static cache must lie inside the arena",
                ));
            }
        }
        Ok((width as u32, height as u32))
    }

    /// Returns the configured RNG seed, generating one from entropy if absent.
    fn seeded_rng(&self) -> SmallRng {
        match self.rng_seed {
            Some(seed) => SmallRng::seed_from_u64(seed),
            None => {
                let seed: u64 = rand::random();
                SmallRng::seed_from_u64(seed)
            }
        }
    }
}

/// Sole authority for what is true in the world.
///
/// Owns every cell, block, and cache; after bootstrap, mutation happens
/// only through the event layer.
#[derive(Debug)]
pub struct ArenaMap {
    config: ArenaConfig,
    grid: Grid2D<Cell>,
    blocks: SlotMap<BlockId, Block>,
    caches: SlotMap<CacheId, Cache>,
    rng: SmallRng,
    next_block_display: u32,
    next_cache_display: u32,
    collected_blocks: u64,
}

impl ArenaMap {
    /// Builds the arena: empty grid, distributed blocks, optional static cache.
    pub fn new(config: ArenaConfig) -> Result<Self, ArenaError> {
        let (width, height) = config.grid_dimensions()?;
        let rng = config.seeded_rng();
        let mut arena = Self {
            grid: Grid2D::filled(width, height, Cell::known_empty()),
            blocks: SlotMap::with_key(),
            caches: SlotMap::with_key(),
            rng,
            next_block_display: 0,
            next_cache_display: 0,
            collected_blocks: 0,
            config,
        };
        for _ in 0..arena.config.block_count {
            let coord = arena
                .random_free_cell()
                .ok_or(ArenaError::InvalidConfig("arena too small for block_count"))?;
            arena.spawn_block_at(coord).map_err(|_| {
                ArenaError::InvalidConfig("arena too small for block_count")
            })?;
        }
        if arena.config.static_cache_blocks >= 2 {
            arena.bootstrap_static_cache()?;
        }
        Ok(arena)
    }

    fn bootstrap_static_cache(&mut self) -> Result<(), ArenaError> {
        let coord = self.coord_of(self.config.static_cache_position);
        let occupied = self
            .grid
            .get(coord)
            .is_none_or(|cell| cell.entity().is_some());
        if occupied {
            return Err(ArenaError::InvalidConfig(
                "static cache cell is already occupied",
            ));
        }
        let mut seed_blocks = Vec::with_capacity(self.config.static_cache_blocks);
        for _ in 0..self.config.static_cache_blocks {
            let id = self.blocks.insert(Block::new(self.next_block_display));
            self.next_block_display += 1;
            seed_blocks.push(id);
        }
        self.create_cache(coord, seed_blocks, Tick::zero())
            .map_err(|_| ArenaError::InvalidConfig("static cache bootstrap failed"))?;
        Ok(())
    }

    /// Arena configuration.
    #[must_use]
    pub fn config(&self) -> &ArenaConfig {
        &self.config
    }

    /// The occupancy grid.
    #[must_use]
    pub fn grid(&self) -> &Grid2D<Cell> {
        &self.grid
    }

    /// Borrow the cell at `coord`.
    #[must_use]
    pub fn cell(&self, coord: GridCoord) -> Option<&Cell> {
        self.grid.get(coord)
    }

    pub(crate) fn cell_mut(&mut self, coord: GridCoord) -> Option<&mut Cell> {
        self.grid.get_mut(coord)
    }

    /// Borrow a block by id.
    #[must_use]
    pub fn block(&self, id: BlockId) -> Option<&Block> {
        self.blocks.get(id)
    }

    pub(crate) fn block_mut(&mut self, id: BlockId) -> Option<&mut Block> {
        self.blocks.get_mut(id)
    }

    /// Borrow a cache by id.
    #[must_use]
    pub fn cache(&self, id: CacheId) -> Option<&Cache> {
        self.caches.get(id)
    }

    pub(crate) fn cache_mut(&mut self, id: CacheId) -> Option<&mut Cache> {
        self.caches.get_mut(id)
    }

    pub(crate) fn remove_cache(&mut self, id: CacheId) -> Option<Cache> {
        self.caches.remove(id)
    }

    /// Iterates all live blocks.
    pub fn blocks(&self) -> impl Iterator<Item = (BlockId, &Block)> + '_ {
        self.blocks.iter()
    }

    /// Iterates all live caches.
    pub fn caches(&self) -> impl Iterator<Item = (CacheId, &Cache)> + '_ {
        self.caches.iter()
    }

    /// Number of live blocks.
    #[must_use]
    pub fn block_count(&self) -> usize {
        self.blocks.len()
    }

    /// Number of live caches.
    #[must_use]
    pub fn cache_count(&self) -> usize {
        self.caches.len()
    }

    /// Blocks returned to the nest so far.
    #[must_use]
    pub fn collected_blocks(&self) -> u64 {
        self.collected_blocks
    }

    pub(crate) fn note_collected(&mut self) {
        self.collected_blocks += 1;
    }

    /// True when `position` lies inside the nest region.
    #[must_use]
    pub fn in_nest(&self, position: Vec2) -> bool {
        (position.x - self.config.nest_center.x).abs() <= self.config.nest_half_extent.x
            && (position.y - self.config.nest_center.y).abs() <= self.config.nest_half_extent.y
    }

    /// Grid cell containing `position`, clamped to the arena bounds.
    #[must_use]
    pub fn coord_of(&self, position: Vec2) -> GridCoord {
        self.grid
            .clamp(GridCoord::from_real(position, self.config.resolution))
    }

    /// Value copy of a block's visible facts, if it is placed.
    #[must_use]
    pub fn block_summary(&self, id: BlockId) -> Option<BlockSummary> {
        let block = self.blocks.get(id)?;
        let placement = block.placement()?;
        Some(BlockSummary {
            id,
            display_id: block.display_id(),
            coord: placement.coord,
            position: placement.position,
        })
    }

    /// Value copy of a cache's visible facts.
    #[must_use]
    pub fn cache_summary(&self, id: CacheId) -> Option<CacheSummary> {
        let cache = self.caches.get(id)?;
        Some(CacheSummary {
            id,
            display_id: cache.display_id(),
            coord: cache.coord(),
            position: cache.position(),
            blocks: cache.block_count(),
        })
    }

    /// Builds the line-of-sight window centered on `center`.
    #[must_use]
    pub fn line_of_sight(&self, center: GridCoord) -> LineOfSight {
        let half = self.config.los_dim / 2;
        let x_lo = center.x.saturating_sub(half);
        let y_lo = center.y.saturating_sub(half);
        let x_hi = (center.x + half).min(self.grid.width() - 1);
        let y_hi = (center.y + half).min(self.grid.height() - 1);

        let mut cells = Vec::new();
        let mut blocks = Vec::new();
        let mut caches = Vec::new();
        for y in y_lo..=y_hi {
            for x in x_lo..=x_hi {
                let coord = GridCoord::new(x, y);
                let Some(cell) = self.grid.get(coord) else {
                    continue;
                };
                cells.push(LosCell {
                    coord,
                    state: cell.state(),
                });
                match cell.entity() {
                    Some(CellEntity::Block(id)) => {
                        if let Some(summary) = self.block_summary(id) {
                            blocks.push(summary);
                        }
                    }
                    Some(CellEntity::Cache(id)) => {
                        if let Some(summary) = self.cache_summary(id) {
                            caches.push(summary);
                        }
                    }
                    None => {}
                }
            }
        }
        LineOfSight::new(center, cells, blocks, caches)
    }

    /// Creates a fresh block sitting at `coord`.
    ///
    /// Scenario and bootstrap entry point; the cell must be empty.
    pub fn spawn_block_at(&mut self, coord: GridCoord) -> Result<BlockId, ConsistencyError> {
        let state = self
            .grid
            .get(coord)
            .map_or(CellState::Unknown, Cell::state);
        if state != CellState::Empty {
            return Err(ConsistencyError::CellDisagreement {
                coord,
                state,
                expected: "an empty cell for a new block",
            });
        }
        let id = self.blocks.insert(Block::new(self.next_block_display));
        self.next_block_display += 1;
        self.place_block(id, coord)?;
        Ok(id)
    }

    /// Puts an existing (carried or unplaced) block down on `coord`.
    pub(crate) fn place_block(
        &mut self,
        id: BlockId,
        coord: GridCoord,
    ) -> Result<(), ConsistencyError> {
        let placement = Placement::at_cell(coord, self.config.resolution);
        let block = self
            .blocks
            .get_mut(id)
            .ok_or(ConsistencyError::UnknownBlock { block: id })?;
        // resolve the cell before touching the block, so a bad coord
        // leaves the block unplaced
        let cell = self
            .grid
            .get_mut(coord)
            .ok_or(ConsistencyError::NoFreeCell {
                block: block.display_id(),
            })?;
        block.drop_at(placement);
        cell.set_block(id);
        Ok(())
    }

    /// Re-places a block at a uniformly random free cell outside the nest.
    pub(crate) fn redistribute(&mut self, id: BlockId) -> Result<(), ConsistencyError> {
        let display = self
            .blocks
            .get(id)
            .ok_or(ConsistencyError::UnknownBlock { block: id })?
            .display_id();
        let coord = self
            .random_free_cell()
            .ok_or(ConsistencyError::NoFreeCell { block: display })?;
        self.place_block(id, coord)
    }

    /// Uniformly random empty cell outside the nest, if one exists.
    fn random_free_cell(&mut self) -> Option<GridCoord> {
        let width = self.grid.width();
        let height = self.grid.height();
        for _ in 0..128 {
            let coord = GridCoord::new(
                self.rng.random_range(0..width),
                self.rng.random_range(0..height),
            );
            if self.cell_is_free(coord) {
                return Some(coord);
            }
        }
        // dense arena: fall back to the first free cell in scan order
        let mut found = None;
        for (coord, _) in self.grid.iter() {
            if self.cell_is_free(coord) {
                found = Some(coord);
                break;
            }
        }
        found
    }

    fn cell_is_free(&self, coord: GridCoord) -> bool {
        let free = self
            .grid
            .get(coord)
            .is_some_and(|cell| cell.state() == CellState::Empty);
        free && !self.in_nest(coord.to_real(self.config.resolution))
    }

    /// Aggregates `blocks` into a new cache on `coord`.
    ///
    /// Driver policy entry point: called at bootstrap for the static cache and
    /// whenever a drop merges with a block already on the target cell. Each
    /// listed block must be owned by the arena; placed ones must sit on
    /// `coord` already.
    pub fn create_cache(
        &mut self,
        coord: GridCoord,
        blocks: Vec<BlockId>,
        created: Tick,
    ) -> Result<CacheId, ConsistencyError> {
        if blocks.len() < 2 {
            return Err(ConsistencyError::CacheTooSmall {
                blocks: blocks.len(),
            });
        }
        for &id in &blocks {
            let block = self
                .blocks
                .get(id)
                .ok_or(ConsistencyError::UnknownBlock { block: id })?;
            if let Some(recorded) = block.coord()
                && recorded != coord
            {
                return Err(ConsistencyError::BlockCellMismatch {
                    block: block.display_id(),
                    recorded,
                    targeted: coord,
                });
            }
        }
        for &id in &blocks {
            if let Some(block) = self.blocks.get_mut(id) {
                block.store();
            }
        }
        let position = coord.to_real(self.config.resolution);
        let count = blocks.len();
        let cache = Cache::new(self.next_cache_display, created, coord, position, blocks);
        self.next_cache_display += 1;
        let id = self.caches.insert(cache);
        if let Some(cell) = self.grid.get_mut(coord) {
            cell.set_cache(id, count);
        }
        Ok(id)
    }

    /// Walks every cell and entity, verifying the state/back-reference
    /// invariant both ways. Cheap enough to run after every event in tests.
    pub fn check_consistency(&self) -> Result<(), ConsistencyError> {
        for (coord, cell) in self.grid.iter() {
            match (cell.state(), cell.entity()) {
                (CellState::HasBlock, Some(CellEntity::Block(id))) => {
                    let block = self
                        .blocks
                        .get(id)
                        .ok_or(ConsistencyError::UnknownBlock { block: id })?;
                    let recorded =
                        block
                            .coord()
                            .ok_or(ConsistencyError::BlockNotPlaced {
                                block: block.display_id(),
                            })?;
                    if recorded != coord {
                        return Err(ConsistencyError::BlockCellMismatch {
                            block: block.display_id(),
                            recorded,
                            targeted: coord,
                        });
                    }
                }
                (CellState::HasCache, Some(CellEntity::Cache(id))) => {
                    let cache = self
                        .caches
                        .get(id)
                        .ok_or(ConsistencyError::UnknownCache { cache: id })?;
                    if cache.coord() != coord {
                        return Err(ConsistencyError::CacheCellMismatch {
                            cache: cache.display_id(),
                            recorded: cache.coord(),
                            targeted: coord,
                        });
                    }
                    if cache.block_count() < 2 || cache.block_count() != cell.fsm().block_count() {
                        return Err(ConsistencyError::CellDisagreement {
                            coord,
                            state: cell.state(),
                            expected: "a cache holding the cell's block count",
                        });
                    }
                }
                (CellState::Empty | CellState::Unknown, None) => {}
                (state, _) => {
                    return Err(ConsistencyError::CellDisagreement {
                        coord,
                        state,
                        expected: "an occupant matching the cell state",
                    });
                }
            }
        }
        for (id, block) in self.blocks.iter() {
            if let Some(coord) = block.coord() {
                let references_back = self
                    .grid
                    .get(coord)
                    .is_some_and(|cell| cell.block_id() == Some(id));
                if !references_back {
                    return Err(ConsistencyError::BlockCellMismatch {
                        block: block.display_id(),
                        recorded: coord,
                        targeted: coord,
                    });
                }
            }
        }
        Ok(())
    }
}
