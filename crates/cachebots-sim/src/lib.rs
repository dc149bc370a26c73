//! The foraging simulation driver.
//!
//! Owns the arena ground truth, the swarm of [`RobotController`]s, the
//! cache usage penalty queue, and the metric collectors. One
//! [`Simulation::step`] call advances every robot through a full
//! sense/control/move/service cycle and verifies arena consistency.
//!
//! [`RobotController`]: cachebots_control::RobotController
//! [`Simulation::step`]: crate::sim::Simulation::step

pub mod config;
pub mod metrics;
pub mod sim;

pub use config::{SimConfig, TaskMix};
pub use metrics::{AcquisitionRow, DistanceRow, MetricsRegistry, TaskRow, TransportRow};
pub use sim::{Robot, Simulation};

use cachebots_control::ControlError;
use cachebots_core::{ArenaError, ConsistencyError};
use thiserror::Error;

/// Driver-level failures.
#[derive(Debug, Error)]
pub enum SimError {
    /// A configuration value fails validation.
    #[error("invalid simulation configuration: {0}")]
    InvalidConfig(&'static str),
    /// The arena rejected its configuration.
    #[error(transparent)]
    Arena(#[from] ArenaError),
    /// A controller faulted.
    #[error(transparent)]
    Control(#[from] ControlError),
    /// Ground truth and cell bookkeeping disagree.
    #[error(transparent)]
    Consistency(#[from] ConsistencyError),
    /// Metric output could not be written.
    #[error("metrics output failed: {0}")]
    Io(#[from] std::io::Error),
}
