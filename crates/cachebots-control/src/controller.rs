//! The complete per-robot controller: belief map, running task, actuators,
//! and the event application surface the driver talks to.
//!
//! Each tick the driver hands the controller a [`SensorSnapshot`]; the
//! controller updates its belief from the line of sight, decays pheromones,
//! runs the task machine, and rolls the abort die. World mutations never
//! happen here. When the robot wants one, it parks in a waiting state and
//! the driver applies the matching event to the arena, then reports the
//! outcome back through the `apply_*` methods.

use crate::ControlError;
use crate::fsm::{ForageState, FsmConfig, Signal};
use crate::kinematics::{Actuators, DriveConfig};
use crate::sensors::SensorSnapshot;
use crate::tasks::{AbortConfig, EstimateConfig, ForagingTask, TaskKind};
use cachebots_core::{
    ArenaError, BlockFound, BlockId, BlockSummary, CacheFound, CacheId, CacheSummary,
    CacheVanished, CachedBlockPickup, FreeBlockPickup, PerceivedMap, PerceptionConfig, RobotId,
    Tick, Vec2,
};
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

/// Everything one robot's controller needs to be built.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ControllerConfig {
    pub drive: DriveConfig,
    pub fsm: FsmConfig,
    pub abort: AbortConfig,
    pub estimates: EstimateConfig,
    pub perception: PerceptionConfig,
}

impl ControllerConfig {
    /// Validates every section.
    pub fn validate(&self) -> Result<(), ControlError> {
        self.drive.validate()?;
        self.fsm.validate()?;
        self.abort.validate()?;
        self.estimates.validate()?;
        self.perception.validate().map_err(|err| match err {
            ArenaError::InvalidConfig(msg) => ControlError::InvalidConfig(msg),
        })
    }
}

/// One robot's control stack.
#[derive(Debug, Clone)]
pub struct RobotController {
    id: RobotId,
    task: ForagingTask,
    actuators: Actuators,
    belief: PerceivedMap,
    rng: SmallRng,
    estimates: EstimateConfig,
    carried: Option<BlockId>,
    last_position: Option<Vec2>,
    distance: f64,
    aborts: u64,
    abort_pending: bool,
}

impl RobotController {
    /// Builds a controller and starts its task at tick zero.
    ///
    /// `grid` is the arena's cell dimensions; the belief map mirrors them.
    pub fn new(
        id: RobotId,
        kind: TaskKind,
        config: &ControllerConfig,
        grid: (u32, u32),
        seed: u64,
    ) -> Result<Self, ControlError> {
        config.validate()?;
        let mut rng = SmallRng::seed_from_u64(seed);
        let mut task = ForagingTask::new(kind, config.fsm.clone(), config.abort);
        task.task_start(Tick::zero(), &config.estimates, &mut rng);
        Ok(Self {
            id,
            task,
            actuators: Actuators::new(config.drive),
            belief: PerceivedMap::new(grid.0, grid.1, config.perception),
            rng,
            estimates: config.estimates,
            carried: None,
            last_position: None,
            distance: 0.0,
            aborts: 0,
            abort_pending: false,
        })
    }

    #[must_use]
    pub fn id(&self) -> RobotId {
        self.id
    }

    #[must_use]
    pub fn kind(&self) -> TaskKind {
        self.task.kind()
    }

    #[must_use]
    pub fn state(&self) -> ForageState {
        self.task.state()
    }

    #[must_use]
    pub fn task(&self) -> &ForagingTask {
        &self.task
    }

    #[must_use]
    pub fn belief(&self) -> &PerceivedMap {
        &self.belief
    }

    #[must_use]
    pub fn actuators(&self) -> &Actuators {
        &self.actuators
    }

    /// Block currently carried, if any.
    #[must_use]
    pub fn carried(&self) -> Option<BlockId> {
        self.carried
    }

    /// Cache the task currently depends on, for vanish notifications.
    #[must_use]
    pub fn pending_cache(&self) -> Option<CacheId> {
        self.task.pending_cache()
    }

    /// True when the abort die came up and the driver has not resolved it.
    #[must_use]
    pub fn abort_pending(&self) -> bool {
        self.abort_pending
    }

    /// Odometer: meters traveled since spawn.
    #[must_use]
    pub fn distance(&self) -> f64 {
        self.distance
    }

    /// Task cycles abandoned since spawn.
    #[must_use]
    pub fn aborts(&self) -> u64 {
        self.aborts
    }

    /// One full control tick.
    pub fn control_step(&mut self, snap: &SensorSnapshot) -> Result<(), ControlError> {
        if let Some(last) = self.last_position {
            self.distance += snap.position.distance(last);
        }
        self.last_position = Some(snap.position);

        self.belief.process_los(&snap.los);
        self.belief.decay();

        self.task
            .execute(snap, &mut self.belief, &mut self.actuators, &mut self.rng)?;

        // Abort rolls pause while the robot is parked on a serviced request;
        // the driver owns the outcome of a pending pickup or drop.
        let waiting = matches!(
            self.task.state(),
            ForageState::WaitForBlockPickup
                | ForageState::WaitForCachePickup
                | ForageState::WaitForBlockDrop
        );
        if !waiting && !self.abort_pending {
            let probability = self.task.abort_probability(snap.tick);
            if probability > 0.0 && self.rng.random::<f64>() < probability {
                self.abort_pending = true;
            }
        }
        Ok(())
    }

    /// A free block pickup was honored for this robot.
    pub fn apply_block_pickup(&mut self, event: &FreeBlockPickup) -> Result<(), ControlError> {
        event.apply_to_perceived(&mut self.belief);
        self.carried = Some(event.block);
        self.actuators.set_carrying(true);
        self.task.apply_signal(Signal::BlockPickup, &mut self.actuators)
    }

    /// A cached block pickup was honored for this robot.
    ///
    /// Must be called with the event after arena application, when its
    /// outcome fields are populated.
    pub fn apply_cached_block_pickup(
        &mut self,
        event: &CachedBlockPickup,
    ) -> Result<(), ControlError> {
        event.apply_to_perceived(&mut self.belief);
        self.carried = event.pickup_block();
        self.actuators.set_carrying(self.carried.is_some());
        self.task.apply_signal(Signal::BlockPickup, &mut self.actuators)
    }

    /// A nest drop was honored; the cycle completed, timers renew.
    pub fn apply_nest_block_drop(&mut self, now: Tick) -> Result<(), ControlError> {
        self.release_payload();
        self.task.apply_signal(Signal::BlockDrop, &mut self.actuators)?;
        self.task.renew(now, &self.estimates, &mut self.rng);
        Ok(())
    }

    /// A mid-field free drop was honored; the cycle completed, timers renew.
    ///
    /// Harvesters land here when the chosen cache site held no block yet to
    /// merge with.
    pub fn apply_free_block_drop(
        &mut self,
        summary: BlockSummary,
        now: Tick,
    ) -> Result<(), ControlError> {
        self.release_payload();
        BlockFound { summary }.apply_to_perceived(&mut self.belief);
        self.task.apply_signal(Signal::BlockDrop, &mut self.actuators)?;
        self.task.renew(now, &self.estimates, &mut self.rng);
        Ok(())
    }

    /// A cache deposit was honored; the cycle completed, timers renew.
    pub fn apply_cache_block_drop(
        &mut self,
        summary: CacheSummary,
        now: Tick,
    ) -> Result<(), ControlError> {
        self.release_payload();
        CacheFound { summary }.apply_to_perceived(&mut self.belief);
        self.task.apply_signal(Signal::BlockDrop, &mut self.actuators)?;
        self.task.renew(now, &self.estimates, &mut self.rng);
        Ok(())
    }

    /// A cache this robot depended on no longer exists.
    pub fn apply_cache_vanished(&mut self, event: &CacheVanished) -> Result<(), ControlError> {
        event.apply_to_perceived(&mut self.belief);
        self.task.apply_signal(Signal::CacheVanished, &mut self.actuators)
    }

    /// Injects a block observation, bypassing line of sight.
    ///
    /// Used by the driver to tell a robot where its own aborted payload or
    /// freshly seeded cache landed.
    pub fn observe_block(&mut self, summary: BlockSummary) {
        BlockFound { summary }.apply_to_perceived(&mut self.belief);
    }

    /// Injects a cache observation, bypassing line of sight.
    pub fn observe_cache(&mut self, summary: CacheSummary) {
        CacheFound { summary }.apply_to_perceived(&mut self.belief);
    }

    /// Sets the broadcast payload, the carried block's display id.
    pub fn emit_payload(&mut self, payload: Option<u32>) {
        self.actuators.set_payload(payload);
    }

    /// Clears carry state after the driver released the block.
    pub fn drop_carried(&mut self) {
        self.release_payload();
    }

    fn release_payload(&mut self) {
        self.carried = None;
        self.actuators.set_carrying(false);
        self.actuators.set_payload(None);
    }

    /// Finishes a pending abort: count it and restart the task from scratch.
    pub fn abort_reset(&mut self, now: Tick) {
        self.aborts += 1;
        self.abort_pending = false;
        self.task.task_start(now, &self.estimates, &mut self.rng);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cachebots_core::GridCoord;

    fn config() -> ControllerConfig {
        ControllerConfig::default()
    }

    fn controller(kind: TaskKind, seed: u64) -> RobotController {
        RobotController::new(RobotId(0), kind, &config(), (50, 25), seed).expect("controller")
    }

    fn quiet(tick: u64, position: Vec2) -> SensorSnapshot {
        SensorSnapshot::quiet(Tick(tick), position, Vec2::new(1.0, 0.0))
    }

    #[test]
    fn fresh_controllers_idle_in_start() {
        let robot = controller(TaskKind::Generalist, 5);
        assert_eq!(robot.state(), ForageState::Start);
        assert_eq!(robot.carried(), None);
        assert_eq!(robot.distance(), 0.0);
        assert!(!robot.abort_pending());
    }

    #[test]
    fn invalid_configs_are_rejected_at_construction() {
        let mut bad = config();
        bad.drive.max_speed = -1.0;
        let err = RobotController::new(RobotId(1), TaskKind::Generalist, &bad, (10, 10), 1)
            .expect_err("negative speed");
        assert_eq!(err, ControlError::InvalidConfig("max_speed must be positive"));
    }

    #[test]
    fn a_quiet_world_never_produces_a_wait_state() {
        let mut robot = controller(TaskKind::Generalist, 7);
        for tick in 0..200 {
            robot
                .control_step(&quiet(tick, Vec2::new(5.0, 2.0)))
                .expect("step");
            assert!(
                matches!(
                    robot.state(),
                    ForageState::Start | ForageState::AcquireBlock
                ),
                "unexpected state {} at tick {tick}",
                robot.state()
            );
        }
        assert!(robot.task().is_exploring());
    }

    #[test]
    fn honored_pickup_switches_to_transport_with_payload() {
        let mut robot = controller(TaskKind::Generalist, 11);
        robot
            .control_step(&quiet(0, Vec2::new(5.0, 2.0)))
            .expect("step");

        let mut found = quiet(1, Vec2::new(5.0, 2.0));
        found.block_detected = true;
        robot.control_step(&found).expect("step");
        assert_eq!(robot.state(), ForageState::WaitForBlockPickup);

        let block = BlockId::default();
        let event = FreeBlockPickup {
            block,
            robot: robot.id(),
            coord: GridCoord::new(25, 10),
            tick: Tick(1),
        };
        robot.apply_block_pickup(&event).expect("pickup");
        assert_eq!(robot.state(), ForageState::TransportToNest);
        assert_eq!(robot.carried(), Some(block));
        assert!(robot.actuators().is_carrying());
    }

    #[test]
    fn distance_accumulates_between_snapshots() {
        let mut robot = controller(TaskKind::Generalist, 13);
        robot
            .control_step(&quiet(0, Vec2::new(1.0, 1.0)))
            .expect("step");
        robot
            .control_step(&quiet(1, Vec2::new(1.0, 2.0)))
            .expect("step");
        robot
            .control_step(&quiet(2, Vec2::new(2.0, 2.0)))
            .expect("step");
        assert!((robot.distance() - 2.0).abs() < 1e-12);
    }

    #[test]
    fn overrunning_the_estimate_raises_an_abort() {
        let mut config = config();
        config.estimates = EstimateConfig {
            generalist: (1, 1),
            harvester: (1, 1),
            collector: (1, 1),
        };
        let mut robot =
            RobotController::new(RobotId(2), TaskKind::Generalist, &config, (50, 25), 3)
                .expect("controller");

        let mut aborted_at = None;
        for tick in 0..200 {
            robot
                .control_step(&quiet(tick, Vec2::new(5.0, 2.0)))
                .expect("step");
            if robot.abort_pending() {
                aborted_at = Some(tick);
                break;
            }
        }
        let tick = aborted_at.expect("a one-tick estimate aborts quickly");
        assert!(tick >= 1, "the sigmoid is negligible at spawn");

        robot.abort_reset(Tick(tick + 1));
        assert_eq!(robot.aborts(), 1);
        assert!(!robot.abort_pending());
        assert_eq!(robot.state(), ForageState::Start);
    }

    #[test]
    fn vanish_notifications_clear_the_pending_cache() {
        let mut robot = controller(TaskKind::Collector, 17);
        let coord = GridCoord::new(40, 12);
        let summary = CacheSummary {
            id: CacheId::default(),
            display_id: 0,
            coord,
            position: coord.to_real(0.2),
            blocks: 4,
        };
        robot.observe_cache(summary);

        robot
            .control_step(&quiet(0, Vec2::new(1.0, 1.0)))
            .expect("step");
        robot
            .control_step(&quiet(1, Vec2::new(1.0, 1.0)))
            .expect("step");
        assert_eq!(robot.pending_cache(), Some(summary.id));

        let vanish = CacheVanished {
            cache: summary.id,
            robot: RobotId(9),
        };
        robot.apply_cache_vanished(&vanish).expect("vanish");
        assert_eq!(robot.pending_cache(), None);
        assert_eq!(robot.state(), ForageState::AcquireCache);
    }
}
