//! Random-walk exploration sub-machine.

use crate::collision::{CollisionConfig, CollisionGuard, avoidance_heading, perturbation};
use crate::sensors::SensorSnapshot;
use cachebots_core::Vec2;
use rand::Rng;
use rand::rngs::SmallRng;
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;

/// Exploration parameters.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ExploreConfig {
    /// Ticks of fruitless straight-line exploration before a new direction.
    pub dir_change_after: u64,
}

impl Default for ExploreConfig {
    fn default() -> Self {
        Self {
            dir_change_after: 100,
        }
    }
}

impl ExploreConfig {
    /// Validates the configuration.
    pub fn validate(&self) -> Result<(), crate::ControlError> {
        if self.dir_change_after == 0 {
            return Err(crate::ControlError::InvalidConfig(
                "dir_change_after must be positive",
            ));
        }
        Ok(())
    }
}

/// States of the exploration machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExploreState {
    /// Fresh machine, no heading chosen yet.
    Start,
    /// Driving a straight line along the current heading.
    Explore,
    /// Picking a fresh random heading.
    NewDirection,
    /// Fleeing a threatening obstacle.
    CollisionAvoidance,
    /// Driving the escape heading for the cooldown window.
    CollisionRecovery,
    /// The parent machine found what it was looking for.
    Finished,
}

/// Straight-line exploration with randomized direction changes and layered
/// collision handling.
///
/// `run` returns the desired world-frame heading for this tick; the caller
/// actuates it. Obstacle readings are ignored for the whole recovery
/// cooldown, so a stale reading cannot re-trigger avoidance.
#[derive(Debug, Clone)]
pub struct ExploreFsm {
    config: ExploreConfig,
    state: ExploreState,
    heading: Vec2,
    avoid: Vec2,
    steps: u64,
    guard: CollisionGuard,
}

impl ExploreFsm {
    #[must_use]
    pub fn new(config: ExploreConfig, collision: CollisionConfig) -> Self {
        Self {
            config,
            state: ExploreState::Start,
            heading: Vec2::ZERO,
            avoid: Vec2::ZERO,
            steps: 0,
            guard: CollisionGuard::new(collision),
        }
    }

    /// Current machine state.
    #[must_use]
    pub fn state(&self) -> ExploreState {
        self.state
    }

    /// True while reacting to an obstacle.
    #[must_use]
    pub fn is_avoiding(&self) -> bool {
        matches!(
            self.state,
            ExploreState::CollisionAvoidance | ExploreState::CollisionRecovery
        )
    }

    /// Marks the search complete; `run` idles until the next reset.
    pub fn finish(&mut self) {
        self.state = ExploreState::Finished;
    }

    /// Back to a fresh machine.
    pub fn reset(&mut self) {
        self.state = ExploreState::Start;
        self.heading = Vec2::ZERO;
        self.avoid = Vec2::ZERO;
        self.steps = 0;
        self.guard.reset();
    }

    /// One exploration tick; returns the desired world-frame heading.
    pub fn run(&mut self, snap: &SensorSnapshot, rng: &mut SmallRng) -> Vec2 {
        match self.state {
            ExploreState::Start => {
                self.heading = random_unit(rng);
                self.steps = 0;
                self.state = ExploreState::Explore;
                self.heading
            }
            ExploreState::Explore => {
                if self.guard.threatened(snap.obstacle) {
                    return self.enter_avoidance(snap, rng);
                }
                self.steps += 1;
                if self.steps >= self.config.dir_change_after {
                    self.state = ExploreState::NewDirection;
                }
                self.heading
            }
            ExploreState::NewDirection => {
                self.heading = random_unit(rng);
                self.steps = 0;
                self.state = ExploreState::Explore;
                self.heading
            }
            ExploreState::CollisionAvoidance => {
                if self.guard.threatened(snap.obstacle) {
                    self.enter_avoidance(snap, rng)
                } else {
                    self.guard.begin_recovery();
                    self.state = ExploreState::CollisionRecovery;
                    self.avoid
                }
            }
            ExploreState::CollisionRecovery => {
                if self.guard.tick_recovery() {
                    self.state = ExploreState::Explore;
                    self.heading
                } else {
                    self.avoid
                }
            }
            ExploreState::Finished => Vec2::ZERO,
        }
    }

    fn enter_avoidance(&mut self, snap: &SensorSnapshot, rng: &mut SmallRng) -> Vec2 {
        let frequent = self.guard.note_collision(snap.tick);
        self.avoid = avoidance_heading(snap.obstacle, perturbation(frequent, rng));
        self.state = ExploreState::CollisionAvoidance;
        self.avoid
    }
}

fn random_unit(rng: &mut SmallRng) -> Vec2 {
    Vec2::from_angle(rng.random_range(-PI..PI))
}
