//! Geometry and grid primitives underlying all spatial reasoning.

use crate::cell::CellState;
use crate::entity::{BlockId, CacheId};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{Add, Mul, Neg, Sub};

/// Continuous arena position or direction, in meters.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
pub struct Vec2 {
    pub x: f64,
    pub y: f64,
}

impl Vec2 {
    pub const ZERO: Self = Self { x: 0.0, y: 0.0 };

    /// Construct a new vector.
    #[must_use]
    pub const fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    /// Unit vector pointing along `angle` radians.
    #[must_use]
    pub fn from_angle(angle: f64) -> Self {
        Self::new(angle.cos(), angle.sin())
    }

    /// Euclidean length.
    #[must_use]
    pub fn length(self) -> f64 {
        self.x.hypot(self.y)
    }

    /// Polar angle in radians, in `(-pi, pi]`.
    #[must_use]
    pub fn angle(self) -> f64 {
        self.y.atan2(self.x)
    }

    /// Distance to another point.
    #[must_use]
    pub fn distance(self, other: Self) -> f64 {
        (self - other).length()
    }

    /// Unit vector in the same direction, or zero for degenerate input.
    #[must_use]
    pub fn normalized(self) -> Self {
        let len = self.length();
        if len < f64::EPSILON {
            Self::ZERO
        } else {
            Self::new(self.x / len, self.y / len)
        }
    }

    /// True for the zero vector, which sensor code reads as "nothing there".
    #[must_use]
    pub fn is_zero(self) -> bool {
        self.length() < f64::EPSILON
    }

    /// Rotates the vector by `angle` radians counterclockwise.
    #[must_use]
    pub fn rotated(self, angle: f64) -> Self {
        let (sin, cos) = angle.sin_cos();
        Self::new(self.x * cos - self.y * sin, self.x * sin + self.y * cos)
    }
}

impl Add for Vec2 {
    type Output = Self;
    fn add(self, rhs: Self) -> Self {
        Self::new(self.x + rhs.x, self.y + rhs.y)
    }
}

impl Sub for Vec2 {
    type Output = Self;
    fn sub(self, rhs: Self) -> Self {
        Self::new(self.x - rhs.x, self.y - rhs.y)
    }
}

impl Mul<f64> for Vec2 {
    type Output = Self;
    fn mul(self, rhs: f64) -> Self {
        Self::new(self.x * rhs, self.y * rhs)
    }
}

impl Neg for Vec2 {
    type Output = Self;
    fn neg(self) -> Self {
        Self::new(-self.x, -self.y)
    }
}

impl fmt::Display for Vec2 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({:.3}, {:.3})", self.x, self.y)
    }
}

/// Discrete cell coordinate; immutable once created and usable as a key.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GridCoord {
    pub x: u32,
    pub y: u32,
}

impl GridCoord {
    /// Construct a new coordinate.
    #[must_use]
    pub const fn new(x: u32, y: u32) -> Self {
        Self { x, y }
    }

    /// Discretizes a continuous position given the grid cell resolution.
    #[must_use]
    pub fn from_real(position: Vec2, resolution: f64) -> Self {
        Self {
            x: (position.x / resolution).floor().max(0.0) as u32,
            y: (position.y / resolution).floor().max(0.0) as u32,
        }
    }

    /// Continuous position of the cell center.
    #[must_use]
    pub fn to_real(self, resolution: f64) -> Vec2 {
        Vec2::new(
            (f64::from(self.x) + 0.5) * resolution,
            (f64::from(self.y) + 0.5) * resolution,
        )
    }
}

impl fmt::Display for GridCoord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.x, self.y)
    }
}

/// Dense row-major grid backing the arena and each robot's belief map.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Grid2D<T> {
    width: u32,
    height: u32,
    cells: Vec<T>,
}

impl<T: Clone> Grid2D<T> {
    /// Construct a grid with every cell initialised to `initial`.
    #[must_use]
    pub fn filled(width: u32, height: u32, initial: T) -> Self {
        Self {
            width,
            height,
            cells: vec![initial; (width as usize) * (height as usize)],
        }
    }
}

impl<T> Grid2D<T> {
    /// Grid width in cells.
    #[must_use]
    pub const fn width(&self) -> u32 {
        self.width
    }

    /// Grid height in cells.
    #[must_use]
    pub const fn height(&self) -> u32 {
        self.height
    }

    /// True when `coord` addresses a cell inside the grid.
    #[must_use]
    pub fn contains(&self, coord: GridCoord) -> bool {
        coord.x < self.width && coord.y < self.height
    }

    fn offset(&self, coord: GridCoord) -> usize {
        (coord.y as usize) * (self.width as usize) + (coord.x as usize)
    }

    /// Borrow the cell at `coord`, if in bounds.
    #[must_use]
    pub fn get(&self, coord: GridCoord) -> Option<&T> {
        if self.contains(coord) {
            self.cells.get(self.offset(coord))
        } else {
            None
        }
    }

    /// Mutably borrow the cell at `coord`, if in bounds.
    pub fn get_mut(&mut self, coord: GridCoord) -> Option<&mut T> {
        if self.contains(coord) {
            let offset = self.offset(coord);
            self.cells.get_mut(offset)
        } else {
            None
        }
    }

    /// Raw cell slice in row-major order.
    #[must_use]
    pub fn cells(&self) -> &[T] {
        &self.cells
    }

    /// Mutable raw cell slice in row-major order.
    pub fn cells_mut(&mut self) -> &mut [T] {
        &mut self.cells
    }

    /// Iterates all cells with their coordinates, row by row.
    pub fn iter(&self) -> impl Iterator<Item = (GridCoord, &T)> + '_ {
        let width = self.width;
        self.cells.iter().enumerate().map(move |(i, cell)| {
            let i = i as u32;
            (GridCoord::new(i % width, i / width), cell)
        })
    }

    /// Clamps `coord` to the nearest in-bounds cell.
    #[must_use]
    pub fn clamp(&self, coord: GridCoord) -> GridCoord {
        GridCoord::new(
            coord.x.min(self.width.saturating_sub(1)),
            coord.y.min(self.height.saturating_sub(1)),
        )
    }
}

/// Value copy of a block as seen through a line-of-sight window.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BlockSummary {
    pub id: BlockId,
    pub display_id: u32,
    pub coord: GridCoord,
    pub position: Vec2,
}

/// Value copy of a cache as seen through a line-of-sight window.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CacheSummary {
    pub id: CacheId,
    pub display_id: u32,
    pub coord: GridCoord,
    pub position: Vec2,
    pub blocks: usize,
}

/// One visible cell: its coordinate and observed occupancy state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LosCell {
    pub coord: GridCoord,
    pub state: CellState,
}

/// Read-only rectangular window into the arena grid, centered on a robot.
///
/// Rebuilt every tick by the driver and handed to the robot's sensing step;
/// never persisted across ticks.
#[derive(Debug, Clone)]
pub struct LineOfSight {
    center: GridCoord,
    cells: Vec<LosCell>,
    blocks: Vec<BlockSummary>,
    caches: Vec<CacheSummary>,
}

impl LineOfSight {
    /// Assembles a window from the cells and entity summaries visible this tick.
    #[must_use]
    pub fn new(
        center: GridCoord,
        cells: Vec<LosCell>,
        blocks: Vec<BlockSummary>,
        caches: Vec<CacheSummary>,
    ) -> Self {
        Self {
            center,
            cells,
            blocks,
            caches,
        }
    }

    /// An empty window, useful when a robot has no view at all.
    #[must_use]
    pub fn empty(center: GridCoord) -> Self {
        Self::new(center, Vec::new(), Vec::new(), Vec::new())
    }

    /// Cell the window is centered on.
    #[must_use]
    pub fn center(&self) -> GridCoord {
        self.center
    }

    /// All visible cells.
    #[must_use]
    pub fn cells(&self) -> &[LosCell] {
        &self.cells
    }

    /// Blocks sitting on visible cells.
    #[must_use]
    pub fn blocks(&self) -> &[BlockSummary] {
        &self.blocks
    }

    /// Caches sitting on visible cells.
    #[must_use]
    pub fn caches(&self) -> &[CacheSummary] {
        &self.caches
    }

    /// Observed state of `coord`, if it is inside the window.
    #[must_use]
    pub fn cell_state(&self, coord: GridCoord) -> Option<CellState> {
        self.cells
            .iter()
            .find(|cell| cell.coord == coord)
            .map(|cell| cell.state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn coord_round_trips_through_resolution() {
        let resolution = 0.2;
        let coord = GridCoord::new(7, 3);
        let real = coord.to_real(resolution);
        assert_eq!(GridCoord::from_real(real, resolution), coord);
    }

    #[test]
    fn from_real_floors_toward_cell_origin() {
        let coord = GridCoord::from_real(Vec2::new(0.59, 0.41), 0.2);
        assert_eq!(coord, GridCoord::new(2, 2));
    }

    #[test]
    fn grid_rejects_out_of_bounds() {
        let mut grid = Grid2D::filled(4, 2, 0u8);
        assert!(grid.get(GridCoord::new(3, 1)).is_some());
        assert!(grid.get(GridCoord::new(4, 0)).is_none());
        assert!(grid.get_mut(GridCoord::new(0, 2)).is_none());
        assert_eq!(grid.clamp(GridCoord::new(9, 9)), GridCoord::new(3, 1));
    }

    #[test]
    fn grid_iter_visits_row_major() {
        let grid = Grid2D::filled(2, 2, 0u8);
        let coords: Vec<_> = grid.iter().map(|(coord, _)| coord).collect();
        assert_eq!(
            coords,
            vec![
                GridCoord::new(0, 0),
                GridCoord::new(1, 0),
                GridCoord::new(0, 1),
                GridCoord::new(1, 1),
            ]
        );
    }

    #[test]
    fn degenerate_vectors_normalize_to_zero() {
        assert_eq!(Vec2::ZERO.normalized(), Vec2::ZERO);
        assert!(Vec2::new(1e-300, 0.0).is_zero());
        let unit = Vec2::new(3.0, 4.0).normalized();
        assert!((unit.length() - 1.0).abs() < 1e-12);
    }

    #[test]
    fn rotation_preserves_length() {
        let v = Vec2::new(2.0, -1.0);
        let rotated = v.rotated(std::f64::consts::FRAC_PI_3);
        assert!((rotated.length() - v.length()).abs() < 1e-12);
        assert!((v.rotated(std::f64::consts::TAU).x - v.x).abs() < 1e-9);
    }
}
