//! Per-robot foraging control.
//!
//! One [`RobotController`] per robot wraps a foraging task, the task's
//! state machine, the robot's belief map, and the wheel/LED actuation
//! surface. The driver feeds it one sensor snapshot per tick and applies
//! world events against it; everything in here is synchronous and owns no
//! shared state.

pub mod collision;
pub mod controller;
pub mod explore;
pub mod fsm;
pub mod kinematics;
pub mod sensors;
pub mod tasks;
pub mod utility;
pub mod vector;

pub use collision::{CollisionConfig, CollisionGuard, avoidance_heading, perturbation};
pub use controller::{ControllerConfig, RobotController};
pub use explore::{ExploreConfig, ExploreFsm, ExploreState};
pub use fsm::{AcquireSource, ForageFsm, ForageState, FsmConfig, Signal, TaskRoute, TransportGoal};
pub use kinematics::{
    Actuators, DriveConfig, LedColor, TurnClass, WheelSpeeds, classify, wheel_speeds,
    world_to_local,
};
pub use sensors::SensorSnapshot;
pub use tasks::{AbortConfig, EstimateConfig, ForagingTask, TaskKind, abort_probability};
pub use utility::{
    CacheSiteUtility, ExistingCacheUtility, SelectionError, best_block, best_cache,
    best_cache_site, select_max,
};
pub use vector::{VectorFsm, VectorState};

use thiserror::Error;

/// Control-layer failures.
///
/// Everything here is fatal: a bad configuration, a degenerate utility
/// selection, or a signal the state machine has no row for all mean the
/// caller is driving the controller outside its contract.
#[derive(Debug, Error, PartialEq)]
pub enum ControlError {
    /// A configuration value fails validation.
    #[error("invalid control configuration: {0}")]
    InvalidConfig(&'static str),
    /// A utility selection violated its positivity contract.
    #[error(transparent)]
    Selection(#[from] SelectionError),
    /// A signal arrived in a state with no transition for it.
    #[error("signal {signal} not handled in state {state}")]
    UnhandledSignal {
        state: ForageState,
        signal: Signal,
    },
}
