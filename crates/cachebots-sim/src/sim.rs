//! The tick driver: robot physics, sensing, event dispatch, and the cache
//! usage penalty queue.
//!
//! Robots are processed in fixed spawn order, one full
//! sense/control/integrate/service cycle each, so every event completes
//! before the next robot senses the world. Controllers never mutate the
//! arena; when one parks in a waiting state, the driver checks the physical
//! condition, serves any penalty, and applies the matching event to the
//! arena first and the robot's belief second.

use crate::SimError;
use crate::config::SimConfig;
use crate::metrics::MetricsRegistry;
use cachebots_control::{ForageState, RobotController, SensorSnapshot};
use cachebots_core::{
    ArenaMap, BlockSummary, CacheBlockDrop, CacheId, CacheSummary, CacheVanished,
    CachedBlockPickup, CellEntity, CellState, ConsistencyError, FreeBlockDrop, FreeBlockPickup,
    GridCoord, NestBlockDrop, RobotId, Tick, Vec2,
};
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use std::f64::consts::PI;
use tracing::{debug, info, warn};

/// One embodied robot: pose plus its control stack.
#[derive(Debug, Clone)]
pub struct Robot {
    id: RobotId,
    position: Vec2,
    heading_angle: f64,
    controller: RobotController,
}

impl Robot {
    #[must_use]
    pub fn id(&self) -> RobotId {
        self.id
    }

    /// World-frame position.
    #[must_use]
    pub fn position(&self) -> Vec2 {
        self.position
    }

    /// Unit facing vector.
    #[must_use]
    pub fn heading(&self) -> Vec2 {
        Vec2::from_angle(self.heading_angle)
    }

    #[must_use]
    pub fn controller(&self) -> &RobotController {
        &self.controller
    }
}

/// One queued cache usage penalty.
///
/// A robot parked at a cache is served only after `duration` ticks; a
/// `CacheVanished` addressed to it cancels the penalty unserved.
#[derive(Debug, Clone, Copy)]
struct CachePenalty {
    robot: RobotId,
    cache: CacheId,
    start: Tick,
    duration: u64,
}

impl CachePenalty {
    fn satisfied(&self, now: Tick) -> bool {
        now.since(self.start) >= self.duration
    }
}

/// The whole run: arena, swarm, penalty queue, clock, collectors.
#[derive(Debug)]
pub struct Simulation {
    config: SimConfig,
    arena: ArenaMap,
    robots: Vec<Robot>,
    penalties: Vec<CachePenalty>,
    clock: Tick,
    metrics: MetricsRegistry,
}

impl Simulation {
    /// Builds the arena and spawns the configured swarm.
    pub fn new(mut config: SimConfig) -> Result<Self, SimError> {
        // the controller's geometry always mirrors the arena's
        config.controller.fsm.nest_center = config.arena.nest_center;
        config.controller.fsm.resolution = config.arena.resolution;
        config.validate()?;

        let grid = config.arena.grid_dimensions()?;
        let arena = ArenaMap::new(config.arena.clone())?;

        let mut spawn_rng = SmallRng::seed_from_u64(config.rng_seed);
        let margin = config.arena.resolution;
        let mut robots = Vec::with_capacity(config.task_mix.total() as usize);
        for (index, kind) in config.task_mix.kinds().enumerate() {
            let id = RobotId(index as u32);
            let seed = config.rng_seed.wrapping_add(1 + index as u64);
            let controller = RobotController::new(id, kind, &config.controller, grid, seed)?;
            let position = Vec2::new(
                spawn_rng.random_range(margin..config.arena.width - margin),
                spawn_rng.random_range(margin..config.arena.height - margin),
            );
            robots.push(Robot {
                id,
                position,
                heading_angle: spawn_rng.random_range(-PI..PI),
                controller,
            });
        }

        info!(
            robots = robots.len(),
            blocks = arena.block_count(),
            caches = arena.cache_count(),
            seed = config.rng_seed,
            "simulation bootstrapped"
        );

        let metrics = MetricsRegistry::new(config.metrics_interval);
        Ok(Self {
            config,
            arena,
            robots,
            penalties: Vec::new(),
            clock: Tick::zero(),
            metrics,
        })
    }

    #[must_use]
    pub fn config(&self) -> &SimConfig {
        &self.config
    }

    #[must_use]
    pub fn arena(&self) -> &ArenaMap {
        &self.arena
    }

    /// Direct arena access for scenario setup, loop-function style.
    pub fn arena_mut(&mut self) -> &mut ArenaMap {
        &mut self.arena
    }

    #[must_use]
    pub fn robots(&self) -> &[Robot] {
        &self.robots
    }

    #[must_use]
    pub fn clock(&self) -> Tick {
        self.clock
    }

    #[must_use]
    pub fn metrics(&self) -> &MetricsRegistry {
        &self.metrics
    }

    /// Repositions a robot, loop-function style; scenario setup hook.
    pub fn place_robot(&mut self, index: usize, position: Vec2, heading_angle: f64) {
        if let Some(robot) = self.robots.get_mut(index) {
            robot.position = position;
            robot.heading_angle = wrap_angle(heading_angle);
        }
    }

    /// Runs the configured number of ticks.
    pub fn run(&mut self) -> Result<(), SimError> {
        for _ in 0..self.config.ticks {
            self.step()?;
        }
        info!(
            tick = self.clock.0,
            collected = self.arena.collected_blocks(),
            caches = self.arena.cache_count(),
            "simulation complete"
        );
        Ok(())
    }

    /// One tick: every robot senses, controls, moves, and is serviced.
    pub fn step(&mut self) -> Result<(), SimError> {
        let now = self.clock;
        for index in 0..self.robots.len() {
            let snap = self.sense(index, now);
            self.robots[index].controller.control_step(&snap)?;
            self.integrate(index);
            self.post_step(index, now)?;
        }
        self.arena.check_consistency()?;

        for robot in &self.robots {
            self.metrics.observe_robot(&robot.controller);
        }
        let aborts = self.robots.iter().map(|r| r.controller.aborts()).sum();
        self.metrics
            .finish_tick(now, aborts, self.arena.collected_blocks());

        self.clock = now.next();
        Ok(())
    }

    /// Flushes collector CSVs if a metrics path is configured.
    pub fn write_metrics(&self) -> Result<(), SimError> {
        if let Some(dir) = &self.config.metrics_path {
            self.metrics.write_csv(dir)?;
        }
        Ok(())
    }

    fn sense(&self, index: usize, now: Tick) -> SensorSnapshot {
        let robot = &self.robots[index];
        SensorSnapshot {
            tick: now,
            position: robot.position,
            heading: Vec2::from_angle(robot.heading_angle),
            in_nest: self.arena.in_nest(robot.position),
            block_detected: self.nearest_free_block(robot.position).is_some(),
            cache_detected: self.nearest_cache(robot.position).is_some(),
            obstacle: self.obstacle_vector(index),
            los: self.arena.line_of_sight(self.arena.coord_of(robot.position)),
        }
    }

    /// Differential drive: average the wheels for speed, difference for spin.
    fn integrate(&mut self, index: usize) {
        let wheels = self.robots[index].controller.actuators().wheels();
        let dt = self.config.dt;
        let linear = (wheels.left + wheels.right) / 2.0;
        let angular = (wheels.right - wheels.left) / self.config.axle_length;
        let margin = self.config.arena.resolution / 2.0;
        let width = self.config.arena.width;
        let height = self.config.arena.height;

        let robot = &mut self.robots[index];
        robot.heading_angle = wrap_angle(robot.heading_angle + angular * dt);
        let step = Vec2::from_angle(robot.heading_angle) * (linear * dt);
        robot.position = Vec2::new(
            (robot.position.x + step.x).clamp(margin, width - margin),
            (robot.position.y + step.y).clamp(margin, height - margin),
        );
    }

    /// Services the robot's pending request, if its state announces one.
    fn post_step(&mut self, index: usize, now: Tick) -> Result<(), SimError> {
        if self.robots[index].controller.abort_pending() {
            return self.resolve_abort(index, now);
        }
        match self.robots[index].controller.state() {
            ForageState::WaitForBlockPickup => self.service_block_pickup(index, now),
            ForageState::WaitForCachePickup => self.service_cache_pickup(index, now),
            ForageState::WaitForBlockDrop => self.service_block_drop(index, now),
            _ => Ok(()),
        }
    }

    fn service_block_pickup(&mut self, index: usize, now: Tick) -> Result<(), SimError> {
        let robot_id = self.robots[index].id;
        let position = self.robots[index].position;
        let Some(block) = self.nearest_free_block(position) else {
            return Ok(());
        };
        let event = FreeBlockPickup {
            block: block.id,
            robot: robot_id,
            coord: block.coord,
            tick: now,
        };
        event.apply_to_arena(&mut self.arena)?;
        let controller = &mut self.robots[index].controller;
        controller.apply_block_pickup(&event)?;
        controller.emit_payload(Some(block.display_id));
        debug!(
            robot = %robot_id,
            block = block.display_id,
            coord = %block.coord,
            "free block pickup honored"
        );
        Ok(())
    }

    fn service_cache_pickup(&mut self, index: usize, now: Tick) -> Result<(), SimError> {
        let robot_id = self.robots[index].id;
        let position = self.robots[index].position;
        let Some(cache) = self.nearest_cache(position) else {
            return Ok(());
        };
        let Some(slot) = self.penalty_slot(robot_id) else {
            self.begin_penalty(robot_id, cache.id, now);
            return Ok(());
        };
        if !self.penalties[slot].satisfied(now) {
            return Ok(());
        }
        self.penalties.swap_remove(slot);

        let mut event = CachedBlockPickup::new(cache.id, robot_id, cache.coord, now);
        event.apply_to_arena(&mut self.arena)?;
        let display = event
            .pickup_block()
            .and_then(|id| self.arena.block(id))
            .map(|block| block.display_id());
        let dissolved = event.orphan_block().is_some();

        let controller = &mut self.robots[index].controller;
        controller.apply_cached_block_pickup(&event)?;
        controller.emit_payload(display);
        debug!(
            robot = %robot_id,
            cache = cache.display_id,
            coord = %cache.coord,
            "cached block pickup honored"
        );
        if dissolved {
            info!(
                cache = cache.display_id,
                coord = %cache.coord,
                "cache down to one block, dissolved"
            );
            self.dispatch_cache_vanished(cache.id, robot_id)?;
        }
        Ok(())
    }

    fn service_block_drop(&mut self, index: usize, now: Tick) -> Result<(), SimError> {
        let robot_id = self.robots[index].id;
        let position = self.robots[index].position;
        let Some(carried) = self.robots[index].controller.carried() else {
            return Ok(());
        };

        if self.arena.in_nest(position) {
            let event = NestBlockDrop {
                block: carried,
                robot: robot_id,
                tick: now,
            };
            event.apply_to_arena(&mut self.arena)?;
            self.robots[index].controller.apply_nest_block_drop(now)?;
            debug!(
                robot = %robot_id,
                collected = self.arena.collected_blocks(),
                "block delivered to the nest"
            );
            return Ok(());
        }

        if let Some(cache) = self.nearest_cache(position) {
            let Some(slot) = self.penalty_slot(robot_id) else {
                self.begin_penalty(robot_id, cache.id, now);
                return Ok(());
            };
            if !self.penalties[slot].satisfied(now) {
                return Ok(());
            }
            self.penalties.swap_remove(slot);

            let event = CacheBlockDrop {
                block: carried,
                cache: cache.id,
                robot: robot_id,
                coord: cache.coord,
                tick: now,
            };
            event.apply_to_arena(&mut self.arena)?;
            let summary = self
                .arena
                .cache_summary(cache.id)
                .ok_or(ConsistencyError::UnknownCache { cache: cache.id })?;
            self.robots[index]
                .controller
                .apply_cache_block_drop(summary, now)?;
            debug!(
                robot = %robot_id,
                cache = cache.display_id,
                blocks = summary.blocks,
                "block deposited into cache"
            );
            return Ok(());
        }

        // mid-field drop: merge with a resident block or seed a bare site
        let coord = self.arena.coord_of(position);
        match self.arena.cell(coord).and_then(|cell| cell.entity()) {
            Some(CellEntity::Block(resident)) => {
                let cache_id = self.arena.create_cache(coord, vec![resident, carried], now)?;
                let summary = self
                    .arena
                    .cache_summary(cache_id)
                    .ok_or(ConsistencyError::UnknownCache { cache: cache_id })?;
                self.robots[index]
                    .controller
                    .apply_cache_block_drop(summary, now)?;
                info!(
                    robot = %robot_id,
                    cache = summary.display_id,
                    coord = %coord,
                    "drop merged with a floor block into a new cache"
                );
                Ok(())
            }
            Some(CellEntity::Cache(_)) => Ok(()),
            None => {
                let event = FreeBlockDrop {
                    block: carried,
                    robot: robot_id,
                    coord,
                    tick: now,
                };
                event.apply_to_arena(&mut self.arena)?;
                let summary = self
                    .arena
                    .block_summary(carried)
                    .ok_or(ConsistencyError::UnknownBlock { block: carried })?;
                self.robots[index]
                    .controller
                    .apply_free_block_drop(summary, now)?;
                debug!(
                    robot = %robot_id,
                    block = summary.display_id,
                    coord = %coord,
                    "free drop left at a cache site"
                );
                Ok(())
            }
        }
    }

    /// Finishes a pending abort: release any payload, cancel penalties,
    /// restart the task.
    fn resolve_abort(&mut self, index: usize, now: Tick) -> Result<(), SimError> {
        let robot_id = self.robots[index].id;
        let position = self.robots[index].position;

        if let Some(carried) = self.robots[index].controller.carried() {
            let display = self
                .arena
                .block(carried)
                .map(|block| block.display_id())
                .unwrap_or_default();
            let coord = self
                .nearest_empty_cell(position)
                .ok_or(ConsistencyError::NoFreeCell { block: display })?;
            let event = FreeBlockDrop {
                block: carried,
                robot: robot_id,
                coord,
                tick: now,
            };
            event.apply_to_arena(&mut self.arena)?;
            let summary = self
                .arena
                .block_summary(carried)
                .ok_or(ConsistencyError::UnknownBlock { block: carried })?;
            let controller = &mut self.robots[index].controller;
            controller.drop_carried();
            controller.observe_block(summary);
            warn!(
                robot = %robot_id,
                block = summary.display_id,
                coord = %coord,
                "aborted transport released its payload"
            );
        } else {
            warn!(robot = %robot_id, state = %self.robots[index].controller.state(), "task aborted");
        }

        self.penalties.retain(|p| p.robot != robot_id);
        self.robots[index].controller.abort_reset(now);
        Ok(())
    }

    /// Notifies every robot depending on `cache` that it no longer exists
    /// and cancels their penalties. The robot that caused the teardown
    /// already learned through its own event.
    fn dispatch_cache_vanished(&mut self, cache: CacheId, cause: RobotId) -> Result<(), SimError> {
        let mut affected = Vec::new();
        for (index, robot) in self.robots.iter().enumerate() {
            if robot.id == cause {
                continue;
            }
            let depends = robot.controller.pending_cache() == Some(cache)
                || self
                    .penalties
                    .iter()
                    .any(|p| p.robot == robot.id && p.cache == cache);
            if depends {
                affected.push(index);
            }
        }
        self.penalties.retain(|p| p.cache != cache);

        for index in affected {
            let robot_id = self.robots[index].id;
            let event = CacheVanished {
                cache,
                robot: robot_id,
            };
            self.robots[index].controller.apply_cache_vanished(&event)?;
            warn!(robot = %robot_id, "depended-on cache vanished, replanning");
        }
        Ok(())
    }

    fn penalty_slot(&self, robot: RobotId) -> Option<usize> {
        self.penalties.iter().position(|p| p.robot == robot)
    }

    fn begin_penalty(&mut self, robot: RobotId, cache: CacheId, now: Tick) {
        debug!(
            robot = %robot,
            duration = self.config.cache_penalty,
            "cache usage penalty started"
        );
        self.penalties.push(CachePenalty {
            robot,
            cache,
            start: now,
            duration: self.config.cache_penalty,
        });
    }

    fn nearest_free_block(&self, position: Vec2) -> Option<BlockSummary> {
        let mut best: Option<(f64, BlockSummary)> = None;
        for (id, block) in self.arena.blocks() {
            let Some(block_position) = block.position() else {
                continue;
            };
            let dist = position.distance(block_position);
            if dist > self.config.proximity_range {
                continue;
            }
            if best.as_ref().is_none_or(|(closest, _)| dist < *closest)
                && let Some(summary) = self.arena.block_summary(id)
            {
                best = Some((dist, summary));
            }
        }
        best.map(|(_, summary)| summary)
    }

    fn nearest_cache(&self, position: Vec2) -> Option<CacheSummary> {
        let mut best: Option<(f64, CacheSummary)> = None;
        for (id, cache) in self.arena.caches() {
            let dist = position.distance(cache.position());
            if dist > self.config.proximity_range {
                continue;
            }
            if best.as_ref().is_none_or(|(closest, _)| dist < *closest)
                && let Some(summary) = self.arena.cache_summary(id)
            {
                best = Some((dist, summary));
            }
        }
        best.map(|(_, summary)| summary)
    }

    /// Vector to the nearest other robot in range, scaled so closer reads
    /// stronger; zero when nothing threatens.
    fn obstacle_vector(&self, index: usize) -> Vec2 {
        let position = self.robots[index].position;
        let range = self.config.proximity_range;
        let mut best: Option<(f64, Vec2)> = None;
        for (other_index, other) in self.robots.iter().enumerate() {
            if other_index == index {
                continue;
            }
            let dist = position.distance(other.position);
            if dist > range {
                continue;
            }
            if best.as_ref().is_none_or(|(closest, _)| dist < *closest) {
                best = Some((dist, other.position));
            }
        }
        let Some((dist, other_position)) = best else {
            return Vec2::ZERO;
        };
        let closeness = (1.0 - dist / range).clamp(0.0, 1.0);
        let direction = (other_position - position).normalized();
        if direction.is_zero() {
            // coincident robots; any direction reads as fully blocking
            Vec2::new(closeness, 0.0)
        } else {
            direction * closeness
        }
    }

    /// First empty cell outside the nest, scanning outward in rings from
    /// the robot's cell. Nest cells are skipped so released blocks follow
    /// the same placement policy as the arena's own distribution.
    fn nearest_empty_cell(&self, position: Vec2) -> Option<GridCoord> {
        let center = self.arena.coord_of(position);
        let max_radius =
            (self.config.arena.width.max(self.config.arena.height) / self.config.arena.resolution)
                .ceil() as i64;
        for radius in 0..=max_radius {
            for dy in -radius..=radius {
                for dx in -radius..=radius {
                    if dx.abs() != radius && dy.abs() != radius {
                        continue;
                    }
                    let x = i64::from(center.x) + dx;
                    let y = i64::from(center.y) + dy;
                    if x < 0 || y < 0 {
                        continue;
                    }
                    let coord = GridCoord::new(x as u32, y as u32);
                    let free = self
                        .arena
                        .cell(coord)
                        .is_some_and(|cell| cell.state() == CellState::Empty)
                        && !self
                            .arena
                            .in_nest(coord.to_real(self.config.arena.resolution));
                    if free {
                        return Some(coord);
                    }
                }
            }
        }
        None
    }
}

fn wrap_angle(angle: f64) -> f64 {
    (angle + PI).rem_euclid(2.0 * PI) - PI
}
