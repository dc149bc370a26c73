//! The per-tick sensor snapshot the driver hands each controller.

use cachebots_core::{GridCoord, LineOfSight, Tick, Vec2};

/// Everything a robot can sense in one tick, read-only.
///
/// The driver synthesizes this from ground truth; the controller never looks
/// at the arena directly.
#[derive(Debug, Clone)]
pub struct SensorSnapshot {
    /// Current simulation tick.
    pub tick: Tick,
    /// Robot position, world frame.
    pub position: Vec2,
    /// Unit facing vector, world frame.
    pub heading: Vec2,
    /// True while the robot is inside the nest region.
    pub in_nest: bool,
    /// True when a free block sits within pickup range.
    pub block_detected: bool,
    /// True when a cache sits within pickup range.
    pub cache_detected: bool,
    /// Vector to the nearest threatening obstacle, world frame.
    /// Zero means no threat.
    pub obstacle: Vec2,
    /// Grid window around the robot.
    pub los: LineOfSight,
}

impl SensorSnapshot {
    /// A quiet snapshot: no threats, no detections, empty surroundings.
    #[must_use]
    pub fn quiet(tick: Tick, position: Vec2, heading: Vec2) -> Self {
        Self {
            tick,
            position,
            heading,
            in_nest: false,
            block_detected: false,
            cache_detected: false,
            obstacle: Vec2::ZERO,
            los: LineOfSight::empty(GridCoord::new(0, 0)),
        }
    }
}
