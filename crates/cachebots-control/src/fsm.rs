//! The per-robot foraging state machine.
//!
//! One machine serves all three task shapes; a [`TaskRoute`] picks which
//! acquisition source and transport goal the symbolic transition targets
//! resolve to. Signal-driven transitions live in one table consulted by
//! [`ForageFsm::inject`]; sub-machine completions (target reached, nest
//! entered or left) are detected in [`ForageFsm::run`] and either re-enter
//! the table as self-injected signals or move to the matching wait state
//! directly.

use crate::ControlError;
use crate::collision::CollisionConfig;
use crate::explore::{ExploreConfig, ExploreFsm, ExploreState};
use crate::kinematics::{Actuators, LedColor, world_to_local};
use crate::sensors::SensorSnapshot;
use crate::utility::{best_block, best_cache, best_cache_site};
use crate::vector::VectorFsm;
use cachebots_core::{CacheId, CellEmpty, GridCoord, PerceivedMap, Vec2};
use rand::rngs::SmallRng;
use serde::{Deserialize, Serialize};
use std::fmt;

/// States of the foraging cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ForageState {
    /// Initial state, entered exactly once per task start.
    Start,
    /// Searching for or vectoring to a free block.
    AcquireBlock,
    /// Searching for or vectoring to a cache to draw from.
    AcquireCache,
    /// Parked on a block, waiting for the pickup to be honored.
    WaitForBlockPickup,
    /// Parked on a cache, waiting for the pickup to be honored.
    WaitForCachePickup,
    /// Carrying a block toward the nest.
    TransportToNest,
    /// Carrying a block toward a cache or fresh cache site.
    TransportToCache,
    /// Parked at the drop target, waiting for the drop to be honored.
    WaitForBlockDrop,
    /// Dropped in the nest, driving back out.
    LeavingNest,
}

impl ForageState {
    /// Stable snake_case name for logs and metrics.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::Start => "start",
            Self::AcquireBlock => "acquire_block",
            Self::AcquireCache => "acquire_cache",
            Self::WaitForBlockPickup => "wait_for_block_pickup",
            Self::WaitForCachePickup => "wait_for_cache_pickup",
            Self::TransportToNest => "transport_to_nest",
            Self::TransportToCache => "transport_to_cache",
            Self::WaitForBlockDrop => "wait_for_block_drop",
            Self::LeavingNest => "leaving_nest",
        }
    }
}

impl fmt::Display for ForageState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// External stimuli injected into the machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    /// Kick the machine out of `Start`.
    Run,
    /// A pickup event was honored for this robot.
    BlockPickup,
    /// A drop event was honored for this robot.
    BlockDrop,
    /// The robot crossed out of the nest region.
    LeftNest,
    /// The robot crossed into the nest region.
    EnteredNest,
    /// A cache this robot depended on no longer exists.
    CacheVanished,
}

impl fmt::Display for Signal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Run => "run",
            Self::BlockPickup => "block_pickup",
            Self::BlockDrop => "block_drop",
            Self::LeftNest => "left_nest",
            Self::EnteredNest => "entered_nest",
            Self::CacheVanished => "cache_vanished",
        };
        f.write_str(name)
    }
}

/// Where a task acquires its block from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AcquireSource {
    /// Loose blocks on the floor.
    FreeBlock,
    /// Blocks stored in existing caches.
    Cache,
}

/// Where a task carries its block to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransportGoal {
    Nest,
    Cache,
}

/// One task shape: acquisition source times transport goal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskRoute {
    pub source: AcquireSource,
    pub goal: TransportGoal,
}

/// Symbolic transition target, resolved against the machine's route.
#[derive(Debug, Clone, Copy)]
enum Next {
    /// A literal state.
    Goto(ForageState),
    /// The route's acquisition state.
    Acquire,
    /// The route's transport state.
    Transport,
    /// Where a completed drop leads: out of the nest, or straight back to
    /// acquisition for routes that never enter it.
    AfterDrop,
}

/// The signal-driven transitions. Any (state, signal) pair not listed is a
/// contract violation by the caller and fails loudly.
const TRANSITIONS: &[(ForageState, Signal, Next)] = &[
    (ForageState::Start, Signal::Run, Next::Acquire),
    (
        ForageState::WaitForBlockPickup,
        Signal::BlockPickup,
        Next::Transport,
    ),
    (
        ForageState::WaitForCachePickup,
        Signal::BlockPickup,
        Next::Transport,
    ),
    (
        ForageState::WaitForCachePickup,
        Signal::CacheVanished,
        Next::Acquire,
    ),
    (
        ForageState::AcquireCache,
        Signal::CacheVanished,
        Next::Acquire,
    ),
    (
        ForageState::TransportToCache,
        Signal::CacheVanished,
        Next::Transport,
    ),
    (
        ForageState::WaitForBlockDrop,
        Signal::BlockDrop,
        Next::AfterDrop,
    ),
    (
        ForageState::WaitForBlockDrop,
        Signal::CacheVanished,
        Next::Transport,
    ),
    (
        ForageState::TransportToNest,
        Signal::EnteredNest,
        Next::Goto(ForageState::WaitForBlockDrop),
    ),
    (ForageState::LeavingNest, Signal::LeftNest, Next::Acquire),
];

/// Machine parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FsmConfig {
    /// Nest center, world frame.
    pub nest_center: Vec2,
    /// Grid cell size in meters, for coordinate discretization.
    pub resolution: f64,
    /// Distance at which a vectoring goal counts as reached.
    pub arrival_tolerance: f64,
    pub explore: ExploreConfig,
    pub collision: CollisionConfig,
}

impl Default for FsmConfig {
    fn default() -> Self {
        Self {
            nest_center: Vec2::new(2.0, 2.5),
            resolution: 0.2,
            arrival_tolerance: 0.15,
            explore: ExploreConfig::default(),
            collision: CollisionConfig::default(),
        }
    }
}

impl FsmConfig {
    /// Validates the configuration.
    pub fn validate(&self) -> Result<(), ControlError> {
        if self.resolution <= 0.0 {
            return Err(ControlError::InvalidConfig("resolution must be positive"));
        }
        if self.arrival_tolerance <= 0.0 {
            return Err(ControlError::InvalidConfig(
                "arrival_tolerance must be positive",
            ));
        }
        self.explore.validate()?;
        self.collision.validate()
    }
}

/// Current acquisition or drop target.
#[derive(Debug, Clone, Copy)]
struct Target {
    position: Vec2,
    coord: GridCoord,
    cache: Option<CacheId>,
}

/// The composite foraging machine.
#[derive(Debug, Clone)]
pub struct ForageFsm {
    config: FsmConfig,
    route: TaskRoute,
    state: ForageState,
    explore: ExploreFsm,
    vector: VectorFsm,
    target: Option<Target>,
}

impl ForageFsm {
    #[must_use]
    pub fn new(route: TaskRoute, config: FsmConfig) -> Self {
        let explore = ExploreFsm::new(config.explore, config.collision);
        let vector = VectorFsm::new(config.arrival_tolerance, config.collision);
        Self {
            config,
            route,
            state: ForageState::Start,
            explore,
            vector,
            target: None,
        }
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> ForageState {
        self.state
    }

    /// The machine's task shape.
    #[must_use]
    pub fn route(&self) -> TaskRoute {
        self.route
    }

    /// Cache this robot currently depends on, if any.
    ///
    /// The driver uses this to route `CacheVanished` notifications.
    #[must_use]
    pub fn pending_cache(&self) -> Option<CacheId> {
        match self.state {
            ForageState::AcquireCache
            | ForageState::WaitForCachePickup
            | ForageState::TransportToCache
            | ForageState::WaitForBlockDrop => self.target.and_then(|target| target.cache),
            _ => None,
        }
    }

    /// True while search locomotion is random-walking.
    #[must_use]
    pub fn is_exploring(&self) -> bool {
        matches!(
            self.state,
            ForageState::AcquireBlock | ForageState::AcquireCache
        ) && !self.vector.is_engaged()
    }

    /// True while acquisition is driving toward a believed target.
    #[must_use]
    pub fn is_vectoring(&self) -> bool {
        matches!(
            self.state,
            ForageState::AcquireBlock | ForageState::AcquireCache
        ) && self.vector.is_engaged()
    }

    /// True anywhere in the acquisition phase.
    #[must_use]
    pub fn is_acquiring(&self) -> bool {
        matches!(
            self.state,
            ForageState::AcquireBlock
                | ForageState::AcquireCache
                | ForageState::WaitForBlockPickup
                | ForageState::WaitForCachePickup
        )
    }

    /// True anywhere in the transport phase.
    #[must_use]
    pub fn is_transporting(&self) -> bool {
        matches!(
            self.state,
            ForageState::TransportToNest
                | ForageState::TransportToCache
                | ForageState::WaitForBlockDrop
        )
    }

    /// True while either sub-machine is reacting to an obstacle.
    #[must_use]
    pub fn is_avoiding_collision(&self) -> bool {
        self.explore.is_avoiding() || self.vector.is_avoiding()
    }

    /// Back to `Start` with all sub-machines fresh.
    pub fn reset(&mut self) {
        self.state = ForageState::Start;
        self.explore.reset();
        self.vector.reset();
        self.target = None;
    }

    /// Feeds one signal through the transition table.
    pub fn inject(&mut self, signal: Signal, actuators: &mut Actuators) -> Result<(), ControlError> {
        let row = TRANSITIONS
            .iter()
            .find(|(state, wanted, _)| *state == self.state && *wanted == signal);
        let Some((_, _, next)) = row else {
            return Err(ControlError::UnhandledSignal {
                state: self.state,
                signal,
            });
        };
        let next = self.resolve(*next);
        self.enter(next, actuators);
        Ok(())
    }

    fn resolve(&self, next: Next) -> ForageState {
        match next {
            Next::Goto(state) => state,
            Next::Acquire => match self.route.source {
                AcquireSource::FreeBlock => ForageState::AcquireBlock,
                AcquireSource::Cache => ForageState::AcquireCache,
            },
            Next::Transport => match self.route.goal {
                TransportGoal::Nest => ForageState::TransportToNest,
                TransportGoal::Cache => ForageState::TransportToCache,
            },
            Next::AfterDrop => match self.route.goal {
                TransportGoal::Nest => ForageState::LeavingNest,
                TransportGoal::Cache => self.resolve(Next::Acquire),
            },
        }
    }

    fn enter(&mut self, next: ForageState, actuators: &mut Actuators) {
        self.state = next;
        match next {
            ForageState::Start => {}
            ForageState::AcquireBlock | ForageState::AcquireCache => {
                self.explore.reset();
                self.vector.reset();
                self.target = None;
                actuators.set_led(LedColor::Green);
            }
            ForageState::WaitForBlockPickup
            | ForageState::WaitForCachePickup
            | ForageState::WaitForBlockDrop => {
                actuators.stop();
                actuators.set_led(LedColor::Yellow);
            }
            ForageState::TransportToNest | ForageState::TransportToCache => {
                self.explore.reset();
                self.vector.reset();
                self.target = None;
                actuators.set_led(LedColor::Red);
            }
            ForageState::LeavingNest => {
                self.vector.reset();
                actuators.set_led(LedColor::Blue);
            }
        }
    }

    /// One control tick: locomotion, completion detection, self-injection.
    pub fn run(
        &mut self,
        snap: &SensorSnapshot,
        belief: &mut PerceivedMap,
        actuators: &mut Actuators,
        rng: &mut SmallRng,
    ) -> Result<(), ControlError> {
        match self.state {
            ForageState::Start => self.inject(Signal::Run, actuators),
            ForageState::AcquireBlock | ForageState::AcquireCache => {
                self.run_acquire(snap, belief, actuators, rng)
            }
            ForageState::TransportToNest => {
                if snap.in_nest {
                    return self.inject(Signal::EnteredNest, actuators);
                }
                if !self.vector.is_engaged() {
                    self.vector.begin(self.config.nest_center);
                }
                let heading = self.vector.run(snap, rng);
                self.actuate(actuators, snap, heading, false);
                Ok(())
            }
            ForageState::TransportToCache => self.run_transport_to_cache(snap, belief, actuators, rng),
            ForageState::WaitForBlockPickup
            | ForageState::WaitForCachePickup
            | ForageState::WaitForBlockDrop => {
                actuators.stop();
                Ok(())
            }
            ForageState::LeavingNest => {
                if !snap.in_nest {
                    return self.inject(Signal::LeftNest, actuators);
                }
                if !self.vector.is_engaged() {
                    let away = (snap.position - self.config.nest_center).normalized();
                    let away = if away.is_zero() { snap.heading } else { away };
                    self.vector.begin(snap.position + away * 2.0);
                }
                let heading = self.vector.run(snap, rng);
                self.actuate(actuators, snap, heading, false);
                Ok(())
            }
        }
    }

    fn run_acquire(
        &mut self,
        snap: &SensorSnapshot,
        belief: &mut PerceivedMap,
        actuators: &mut Actuators,
        rng: &mut SmallRng,
    ) -> Result<(), ControlError> {
        let hit = match self.route.source {
            AcquireSource::FreeBlock => snap.block_detected,
            AcquireSource::Cache => snap.cache_detected,
        };
        if hit {
            self.explore.finish();
            let wait = match self.route.source {
                AcquireSource::FreeBlock => ForageState::WaitForBlockPickup,
                AcquireSource::Cache => ForageState::WaitForCachePickup,
            };
            self.enter(wait, actuators);
            return Ok(());
        }

        if self.vector.is_engaged() {
            let heading = self.vector.run(snap, rng);
            if self.vector.is_arrived() {
                // nothing here after all; the belief was stale
                if let Some(target) = self.target.take() {
                    CellEmpty {
                        coord: target.coord,
                    }
                    .apply_to_perceived(belief);
                }
                self.vector.reset();
                actuators.stop();
            } else {
                self.actuate(actuators, snap, heading, false);
            }
            return Ok(());
        }

        if let Some(target) = self.select_acquire_target(snap, belief)? {
            self.target = Some(target);
            self.vector.begin(target.position);
            let heading = self.vector.run(snap, rng);
            self.actuate(actuators, snap, heading, false);
        } else {
            let heading = self.explore.run(snap, rng);
            let spin = self.explore.state() == ExploreState::NewDirection;
            self.actuate(actuators, snap, heading, spin);
        }
        Ok(())
    }

    fn run_transport_to_cache(
        &mut self,
        snap: &SensorSnapshot,
        belief: &mut PerceivedMap,
        actuators: &mut Actuators,
        rng: &mut SmallRng,
    ) -> Result<(), ControlError> {
        if snap.cache_detected {
            self.enter(ForageState::WaitForBlockDrop, actuators);
            return Ok(());
        }
        if !self.vector.is_engaged() {
            let target = self.select_drop_target(snap, belief)?;
            self.target = Some(target);
            self.vector.begin(target.position);
        }
        let heading = self.vector.run(snap, rng);
        if self.vector.is_arrived() {
            self.enter(ForageState::WaitForBlockDrop, actuators);
        } else {
            self.actuate(actuators, snap, heading, false);
        }
        Ok(())
    }

    fn select_acquire_target(
        &self,
        snap: &SensorSnapshot,
        belief: &PerceivedMap,
    ) -> Result<Option<Target>, ControlError> {
        match self.route.source {
            AcquireSource::FreeBlock => {
                let Some(block) = best_block(belief, snap.position)? else {
                    return Ok(None);
                };
                Ok(Some(Target {
                    position: block.position,
                    coord: block.coord,
                    cache: None,
                }))
            }
            AcquireSource::Cache => {
                let Some(cache) = best_cache(belief, snap.position, self.config.nest_center)?
                else {
                    return Ok(None);
                };
                Ok(Some(Target {
                    position: cache.position,
                    coord: cache.coord,
                    cache: Some(cache.id),
                }))
            }
        }
    }

    /// Transport target for cache-bound routes: the best existing cache, or
    /// a fresh site to seed one when none is believed.
    fn select_drop_target(
        &self,
        snap: &SensorSnapshot,
        belief: &PerceivedMap,
    ) -> Result<Target, ControlError> {
        if let Some(cache) = best_cache(belief, snap.position, self.config.nest_center)? {
            return Ok(Target {
                position: cache.position,
                coord: cache.coord,
                cache: Some(cache.id),
            });
        }
        let site = best_cache_site(belief, snap.position, self.config.nest_center)?;
        Ok(Target {
            position: site,
            coord: GridCoord::from_real(site, self.config.resolution),
            cache: None,
        })
    }

    fn actuate(
        &self,
        actuators: &mut Actuators,
        snap: &SensorSnapshot,
        heading_world: Vec2,
        force_hard: bool,
    ) {
        if heading_world.is_zero() {
            actuators.stop();
        } else {
            actuators.set_heading(world_to_local(heading_world, snap.heading), force_hard);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kinematics::DriveConfig;
    use cachebots_core::{
        BlockFound, BlockId, BlockSummary, CacheFound, CacheSummary, CellState, PerceptionConfig,
        Tick,
    };
    use rand::SeedableRng;

    const GENERALIST: TaskRoute = TaskRoute {
        source: AcquireSource::FreeBlock,
        goal: TransportGoal::Nest,
    };
    const HARVESTER: TaskRoute = TaskRoute {
        source: AcquireSource::FreeBlock,
        goal: TransportGoal::Cache,
    };
    const COLLECTOR: TaskRoute = TaskRoute {
        source: AcquireSource::Cache,
        goal: TransportGoal::Nest,
    };

    struct Rig {
        fsm: ForageFsm,
        belief: PerceivedMap,
        actuators: Actuators,
        rng: SmallRng,
    }

    impl Rig {
        fn new(route: TaskRoute) -> Self {
            Self {
                fsm: ForageFsm::new(route, FsmConfig::default()),
                belief: PerceivedMap::new(50, 25, PerceptionConfig::default()),
                actuators: Actuators::new(DriveConfig::default()),
                rng: SmallRng::seed_from_u64(17),
            }
        }

        fn run(&mut self, snap: &SensorSnapshot) {
            self.fsm
                .run(snap, &mut self.belief, &mut self.actuators, &mut self.rng)
                .expect("run");
        }

        fn inject(&mut self, signal: Signal) {
            self.fsm
                .inject(signal, &mut self.actuators)
                .expect("inject");
        }
    }

    fn quiet(tick: u64, position: Vec2) -> SensorSnapshot {
        SensorSnapshot::quiet(Tick(tick), position, Vec2::new(1.0, 0.0))
    }

    #[test]
    fn generalist_walks_the_full_cycle() {
        let mut rig = Rig::new(GENERALIST);
        assert_eq!(rig.fsm.state(), ForageState::Start);

        rig.run(&quiet(0, Vec2::new(5.0, 2.0)));
        assert_eq!(rig.fsm.state(), ForageState::AcquireBlock);

        rig.run(&quiet(1, Vec2::new(5.0, 2.0)));
        assert_eq!(rig.fsm.state(), ForageState::AcquireBlock);
        assert!(rig.fsm.is_exploring());
        assert!(!rig.actuators.wheels().is_stopped());

        let mut found = quiet(2, Vec2::new(5.0, 2.0));
        found.block_detected = true;
        rig.run(&found);
        assert_eq!(rig.fsm.state(), ForageState::WaitForBlockPickup);
        assert!(rig.actuators.wheels().is_stopped());

        rig.inject(Signal::BlockPickup);
        assert_eq!(rig.fsm.state(), ForageState::TransportToNest);

        rig.run(&quiet(3, Vec2::new(4.0, 2.2)));
        assert_eq!(rig.fsm.state(), ForageState::TransportToNest);
        assert!(rig.fsm.is_transporting());

        let mut arrived = quiet(4, Vec2::new(2.0, 2.5));
        arrived.in_nest = true;
        rig.run(&arrived);
        assert_eq!(rig.fsm.state(), ForageState::WaitForBlockDrop);

        rig.inject(Signal::BlockDrop);
        assert_eq!(rig.fsm.state(), ForageState::LeavingNest);

        let mut inside = quiet(5, Vec2::new(2.2, 2.5));
        inside.in_nest = true;
        rig.run(&inside);
        assert_eq!(rig.fsm.state(), ForageState::LeavingNest);

        rig.run(&quiet(6, Vec2::new(3.5, 2.5)));
        assert_eq!(rig.fsm.state(), ForageState::AcquireBlock);
    }

    #[test]
    fn harvester_cycles_without_entering_the_nest() {
        let mut rig = Rig::new(HARVESTER);
        rig.run(&quiet(0, Vec2::new(5.0, 2.0)));
        assert_eq!(rig.fsm.state(), ForageState::AcquireBlock);

        let mut found = quiet(1, Vec2::new(5.0, 2.0));
        found.block_detected = true;
        rig.run(&found);
        rig.inject(Signal::BlockPickup);
        assert_eq!(rig.fsm.state(), ForageState::TransportToCache);

        let mut at_cache = quiet(2, Vec2::new(6.0, 2.0));
        at_cache.cache_detected = true;
        rig.run(&at_cache);
        assert_eq!(rig.fsm.state(), ForageState::WaitForBlockDrop);

        // the cache drains while this robot queues
        rig.inject(Signal::CacheVanished);
        assert_eq!(rig.fsm.state(), ForageState::TransportToCache);

        rig.run(&at_cache);
        assert_eq!(rig.fsm.state(), ForageState::WaitForBlockDrop);
        rig.inject(Signal::BlockDrop);
        assert_eq!(rig.fsm.state(), ForageState::AcquireBlock);
    }

    #[test]
    fn collector_replans_when_its_cache_vanishes() {
        let mut rig = Rig::new(COLLECTOR);
        let cache = CacheSummary {
            id: cachebots_core::CacheId::default(),
            display_id: 0,
            coord: cachebots_core::GridCoord::new(40, 12),
            position: cachebots_core::GridCoord::new(40, 12).to_real(0.2),
            blocks: 3,
        };
        CacheFound { summary: cache }.apply_to_perceived(&mut rig.belief);

        rig.run(&quiet(0, Vec2::new(1.0, 1.0)));
        assert_eq!(rig.fsm.state(), ForageState::AcquireCache);

        rig.run(&quiet(1, Vec2::new(1.0, 1.0)));
        assert!(rig.fsm.is_vectoring(), "a believed cache draws a vector");
        assert_eq!(rig.fsm.pending_cache(), Some(cache.id));

        rig.inject(Signal::CacheVanished);
        assert_eq!(rig.fsm.state(), ForageState::AcquireCache);
        assert_eq!(rig.fsm.pending_cache(), None);
    }

    #[test]
    fn stale_block_belief_is_cleared_on_arrival() {
        let mut rig = Rig::new(GENERALIST);
        let coord = cachebots_core::GridCoord::new(30, 10);
        let block = BlockSummary {
            id: BlockId::default(),
            display_id: 7,
            coord,
            position: coord.to_real(0.2),
        };
        BlockFound { summary: block }.apply_to_perceived(&mut rig.belief);

        rig.run(&quiet(0, Vec2::new(1.0, 1.0)));
        rig.run(&quiet(1, Vec2::new(1.0, 1.0)));
        assert!(rig.fsm.is_vectoring());

        // teleport to the believed block; no block is detected there
        rig.run(&quiet(2, block.position));
        assert_eq!(rig.belief.cell_state(coord), CellState::Empty);
        assert!(!rig.fsm.is_vectoring());
        assert!(rig.actuators.wheels().is_stopped());

        // with the stale belief gone, the machine explores again
        rig.run(&quiet(3, block.position));
        assert!(rig.fsm.is_exploring());
    }

    #[test]
    fn unlisted_signals_are_a_fault() {
        let mut rig = Rig::new(GENERALIST);
        let err = rig
            .fsm
            .inject(Signal::BlockDrop, &mut rig.actuators)
            .expect_err("no row");
        assert_eq!(
            err,
            ControlError::UnhandledSignal {
                state: ForageState::Start,
                signal: Signal::BlockDrop,
            }
        );
    }
}
