//! Task allocation: the three foraging task shapes, their execution-time
//! estimates, and time-based abort.
//!
//! A task wraps a [`ForageFsm`] with a route, a start tick, and an estimate
//! of how long one cycle should take. The longer a task overruns its
//! estimate, the more likely [`ForagingTask::abort_probability`] says it
//! should be abandoned for a fresh start.

use crate::ControlError;
use crate::fsm::{AcquireSource, ForageFsm, ForageState, FsmConfig, Signal, TaskRoute, TransportGoal};
use crate::kinematics::Actuators;
use crate::sensors::SensorSnapshot;
use cachebots_core::{CacheId, PerceivedMap, Tick};
use rand::Rng;
use rand::rngs::SmallRng;
use serde::{Deserialize, Serialize};
use std::fmt;

/// The foraging task shapes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskKind {
    /// Free block to nest, the whole cycle alone.
    Generalist,
    /// Free block to a cache (or a fresh cache site).
    Harvester,
    /// Cached block to nest.
    Collector,
}

impl TaskKind {
    /// The route this kind drives through the foraging machine.
    #[must_use]
    pub fn route(&self) -> TaskRoute {
        match self {
            Self::Generalist => TaskRoute {
                source: AcquireSource::FreeBlock,
                goal: TransportGoal::Nest,
            },
            Self::Harvester => TaskRoute {
                source: AcquireSource::FreeBlock,
                goal: TransportGoal::Cache,
            },
            Self::Collector => TaskRoute {
                source: AcquireSource::Cache,
                goal: TransportGoal::Nest,
            },
        }
    }

    /// Stable name for logs and metrics.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::Generalist => "generalist",
            Self::Harvester => "harvester",
            Self::Collector => "collector",
        }
    }

    /// Whether a signal is part of this kind's vocabulary.
    ///
    /// Generalists never touch caches, so cache notifications addressed to
    /// one are dropped rather than treated as a contract violation.
    #[must_use]
    pub fn accepts(&self, signal: Signal) -> bool {
        match signal {
            Signal::CacheVanished => !matches!(self, Self::Generalist),
            _ => true,
        }
    }
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Parameters of the abort sigmoid.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct AbortConfig {
    /// Steepness of the sigmoid.
    pub reactivity: f64,
    /// Overrun ratio at which the abort probability crosses one half.
    pub offset: f64,
}

impl Default for AbortConfig {
    fn default() -> Self {
        Self {
            reactivity: 8.0,
            offset: 3.0,
        }
    }
}

impl AbortConfig {
    /// Validates the configuration.
    pub fn validate(&self) -> Result<(), ControlError> {
        if self.reactivity <= 0.0 {
            return Err(ControlError::InvalidConfig("reactivity must be positive"));
        }
        if self.offset <= 0.0 {
            return Err(ControlError::InvalidConfig("offset must be positive"));
        }
        Ok(())
    }
}

/// Per-kind execution-time estimate ranges, in ticks.
///
/// A fresh estimate is drawn uniformly from the kind's range at every task
/// start and renewal.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct EstimateConfig {
    pub generalist: (u64, u64),
    pub harvester: (u64, u64),
    pub collector: (u64, u64),
}

impl Default for EstimateConfig {
    fn default() -> Self {
        Self {
            generalist: (2000, 4000),
            harvester: (1000, 2000),
            collector: (1000, 2000),
        }
    }
}

impl EstimateConfig {
    /// Validates the configuration.
    pub fn validate(&self) -> Result<(), ControlError> {
        for (lo, hi) in [self.generalist, self.harvester, self.collector] {
            if lo > hi {
                return Err(ControlError::InvalidConfig(
                    "estimate range must be ordered low to high",
                ));
            }
            if hi == 0 {
                return Err(ControlError::InvalidConfig(
                    "estimate range must allow a positive estimate",
                ));
            }
        }
        Ok(())
    }

    #[must_use]
    pub fn range_for(&self, kind: TaskKind) -> (u64, u64) {
        match kind {
            TaskKind::Generalist => self.generalist,
            TaskKind::Harvester => self.harvester,
            TaskKind::Collector => self.collector,
        }
    }
}

/// Probability that a task `elapsed` ticks into an `estimate`-tick cycle
/// should be aborted.
///
/// Sigmoid in the overrun ratio: negligible until the task has run well past
/// its estimate, then rising steeply to one.
#[must_use]
pub fn abort_probability(elapsed: u64, estimate: u64, config: &AbortConfig) -> f64 {
    if estimate == 0 {
        return 0.0;
    }
    let ratio = elapsed as f64 / estimate as f64;
    1.0 / (1.0 + (-config.reactivity * (ratio - config.offset)).exp())
}

/// A running foraging task: a machine plus its timing state.
#[derive(Debug, Clone)]
pub struct ForagingTask {
    kind: TaskKind,
    fsm: ForageFsm,
    abort: AbortConfig,
    started: Tick,
    estimate: u64,
}

impl ForagingTask {
    /// A task that has not started yet; call [`Self::task_start`] before the
    /// first control tick.
    #[must_use]
    pub fn new(kind: TaskKind, fsm_config: FsmConfig, abort: AbortConfig) -> Self {
        Self {
            kind,
            fsm: ForageFsm::new(kind.route(), fsm_config),
            abort,
            started: Tick(0),
            estimate: 0,
        }
    }

    #[must_use]
    pub fn kind(&self) -> TaskKind {
        self.kind
    }

    #[must_use]
    pub fn state(&self) -> ForageState {
        self.fsm.state()
    }

    #[must_use]
    pub fn pending_cache(&self) -> Option<CacheId> {
        self.fsm.pending_cache()
    }

    #[must_use]
    pub fn is_exploring(&self) -> bool {
        self.fsm.is_exploring()
    }

    #[must_use]
    pub fn is_vectoring(&self) -> bool {
        self.fsm.is_vectoring()
    }

    #[must_use]
    pub fn is_acquiring(&self) -> bool {
        self.fsm.is_acquiring()
    }

    #[must_use]
    pub fn is_transporting(&self) -> bool {
        self.fsm.is_transporting()
    }

    #[must_use]
    pub fn is_avoiding_collision(&self) -> bool {
        self.fsm.is_avoiding_collision()
    }

    /// Ticks since the current cycle started.
    #[must_use]
    pub fn elapsed(&self, now: Tick) -> u64 {
        now.since(self.started)
    }

    /// The current cycle's drawn estimate, in ticks.
    #[must_use]
    pub fn estimate(&self) -> u64 {
        self.estimate
    }

    /// Full restart: machine back to `Start`, fresh timer and estimate.
    ///
    /// Used at spawn and after an abort.
    pub fn task_start(&mut self, now: Tick, estimates: &EstimateConfig, rng: &mut SmallRng) {
        self.fsm.reset();
        self.restart_timer(now, estimates, rng);
    }

    /// Timer-only restart after a successfully completed cycle.
    ///
    /// The machine keeps running through its own transitions (a nest drop
    /// still has to leave the nest), so only the timing state resets.
    pub fn renew(&mut self, now: Tick, estimates: &EstimateConfig, rng: &mut SmallRng) {
        self.restart_timer(now, estimates, rng);
    }

    fn restart_timer(&mut self, now: Tick, estimates: &EstimateConfig, rng: &mut SmallRng) {
        let (lo, hi) = estimates.range_for(self.kind);
        self.started = now;
        self.estimate = rng.random_range(lo..=hi);
    }

    /// One control tick of the underlying machine.
    pub fn execute(
        &mut self,
        snap: &SensorSnapshot,
        belief: &mut PerceivedMap,
        actuators: &mut Actuators,
        rng: &mut SmallRng,
    ) -> Result<(), ControlError> {
        self.fsm.run(snap, belief, actuators, rng)
    }

    /// Feeds a signal to the machine, dropping signals outside this kind's
    /// vocabulary.
    pub fn apply_signal(
        &mut self,
        signal: Signal,
        actuators: &mut Actuators,
    ) -> Result<(), ControlError> {
        if !self.kind.accepts(signal) {
            return Ok(());
        }
        self.fsm.inject(signal, actuators)
    }

    /// Abort probability for the current cycle at `now`.
    #[must_use]
    pub fn abort_probability(&self, now: Tick) -> f64 {
        abort_probability(self.elapsed(now), self.estimate, &self.abort)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kinematics::DriveConfig;
    use rand::SeedableRng;

    fn task(kind: TaskKind) -> ForagingTask {
        ForagingTask::new(kind, FsmConfig::default(), AbortConfig::default())
    }

    #[test]
    fn abort_probability_rises_with_overrun() {
        let config = AbortConfig::default();
        let start = abort_probability(0, 1000, &config);
        assert!(start < 1e-6, "fresh tasks almost never abort: {start}");

        let midpoint = abort_probability(3000, 1000, &config);
        assert!((midpoint - 0.5).abs() < 1e-9);

        let late = abort_probability(5000, 1000, &config);
        assert!(late > 0.999);

        assert!(abort_probability(1000, 1000, &config) < abort_probability(2000, 1000, &config));
    }

    #[test]
    fn unstarted_tasks_never_abort() {
        let task = task(TaskKind::Generalist);
        assert_eq!(task.abort_probability(Tick(1_000_000)), 0.0);
    }

    #[test]
    fn task_start_resets_the_machine_and_draws_an_estimate() {
        let mut rng = SmallRng::seed_from_u64(3);
        let mut actuators = Actuators::new(DriveConfig::default());
        let mut task = task(TaskKind::Harvester);
        task.apply_signal(Signal::Run, &mut actuators).expect("run");
        assert_eq!(task.state(), ForageState::AcquireBlock);

        let estimates = EstimateConfig::default();
        task.task_start(Tick(50), &estimates, &mut rng);
        assert_eq!(task.state(), ForageState::Start);
        assert_eq!(task.elapsed(Tick(50)), 0);
        let (lo, hi) = estimates.range_for(TaskKind::Harvester);
        assert!(task.estimate() >= lo && task.estimate() <= hi);
    }

    #[test]
    fn renew_keeps_the_machine_where_it_is() {
        let mut rng = SmallRng::seed_from_u64(4);
        let mut actuators = Actuators::new(DriveConfig::default());
        let mut task = task(TaskKind::Generalist);
        task.apply_signal(Signal::Run, &mut actuators).expect("run");

        task.renew(Tick(200), &EstimateConfig::default(), &mut rng);
        assert_eq!(task.state(), ForageState::AcquireBlock);
        assert_eq!(task.elapsed(Tick(230)), 30);
    }

    #[test]
    fn generalists_drop_cache_notifications() {
        let mut actuators = Actuators::new(DriveConfig::default());
        let mut task = task(TaskKind::Generalist);
        task.apply_signal(Signal::CacheVanished, &mut actuators)
            .expect("filtered to a no-op");
        assert_eq!(task.state(), ForageState::Start);

        assert!(TaskKind::Collector.accepts(Signal::CacheVanished));
        assert!(TaskKind::Harvester.accepts(Signal::CacheVanished));
    }
}
