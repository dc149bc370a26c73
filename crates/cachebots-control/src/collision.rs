//! Collision threat detection, avoidance headings, and the recovery
//! cooldown shared by every locomotion machine.

use crate::ControlError;
use cachebots_core::{Tick, Vec2};
use rand::Rng;
use rand::rngs::SmallRng;
use serde::{Deserialize, Serialize};
use std::f64::consts::FRAC_PI_4;

/// Obstacle reaction parameters.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct CollisionConfig {
    /// Obstacle vector magnitude above which the reading is a threat.
    pub obstacle_delta: f64,
    /// Two collisions within this many ticks count as frequent.
    pub frequent_thresh: u64,
    /// Ticks spent driving the escape heading before resuming.
    pub recovery_ticks: u64,
}

impl Default for CollisionConfig {
    fn default() -> Self {
        Self {
            obstacle_delta: 0.1,
            frequent_thresh: 30,
            recovery_ticks: 10,
        }
    }
}

impl CollisionConfig {
    /// Validates the configuration.
    pub fn validate(&self) -> Result<(), ControlError> {
        if self.obstacle_delta <= 0.0 {
            return Err(ControlError::InvalidConfig(
                "obstacle_delta must be positive",
            ));
        }
        if self.recovery_ticks == 0 {
            return Err(ControlError::InvalidConfig(
                "recovery_ticks must be positive",
            ));
        }
        Ok(())
    }
}

/// Escape heading for an obstacle vector: straight away, optionally rotated.
///
/// `angle` perturbs the escape when collisions recur, breaking the symmetric
/// deadlock of two robots fleeing each other along the same line.
#[must_use]
pub fn avoidance_heading(obstacle: Vec2, angle: f64) -> Vec2 {
    (-obstacle).normalized().rotated(angle)
}

/// Samples the avoidance perturbation: zero normally, a random angle when
/// collisions are frequent.
pub fn perturbation(frequent: bool, rng: &mut SmallRng) -> f64 {
    if frequent {
        rng.random_range(-FRAC_PI_4..FRAC_PI_4)
    } else {
        0.0
    }
}

/// Tracks collision recency and the post-avoidance cooldown.
///
/// A zero obstacle vector is "no obstacle", never a threat. During the
/// cooldown window the owner drives its escape heading and ignores new
/// readings, so one stale trigger cannot re-enter avoidance.
#[derive(Debug, Clone)]
pub struct CollisionGuard {
    config: CollisionConfig,
    last_collision: Option<Tick>,
    recovery_left: u64,
}

impl CollisionGuard {
    #[must_use]
    pub fn new(config: CollisionConfig) -> Self {
        Self {
            config,
            last_collision: None,
            recovery_left: 0,
        }
    }

    /// True when the obstacle reading crosses the threat threshold.
    #[must_use]
    pub fn threatened(&self, obstacle: Vec2) -> bool {
        obstacle.length() > self.config.obstacle_delta
    }

    /// Records a collision, reporting whether it recurred recently.
    pub fn note_collision(&mut self, now: Tick) -> bool {
        let frequent = self
            .last_collision
            .is_some_and(|last| now.since(last) < self.config.frequent_thresh);
        self.last_collision = Some(now);
        frequent
    }

    /// Arms the cooldown window.
    pub fn begin_recovery(&mut self) {
        self.recovery_left = self.config.recovery_ticks;
    }

    /// True while the cooldown window is open.
    #[must_use]
    pub fn in_recovery(&self) -> bool {
        self.recovery_left > 0
    }

    /// Consumes one cooldown tick, returning true once the window closes.
    pub fn tick_recovery(&mut self) -> bool {
        self.recovery_left = self.recovery_left.saturating_sub(1);
        self.recovery_left == 0
    }

    /// Clears all collision history.
    pub fn reset(&mut self) {
        self.last_collision = None;
        self.recovery_left = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    #[test]
    fn zero_obstacle_is_never_a_threat() {
        let guard = CollisionGuard::new(CollisionConfig::default());
        assert!(!guard.threatened(Vec2::ZERO));
        assert!(!guard.threatened(Vec2::new(0.05, 0.0)));
        assert!(guard.threatened(Vec2::new(0.3, 0.0)));
    }

    #[test]
    fn collisions_close_together_count_as_frequent() {
        let mut guard = CollisionGuard::new(CollisionConfig::default());
        assert!(!guard.note_collision(Tick(100)));
        assert!(guard.note_collision(Tick(110)));
        assert!(!guard.note_collision(Tick(500)));
    }

    #[test]
    fn recovery_window_counts_down_exactly() {
        let config = CollisionConfig {
            recovery_ticks: 3,
            ..CollisionConfig::default()
        };
        let mut guard = CollisionGuard::new(config);
        guard.begin_recovery();
        assert!(guard.in_recovery());
        assert!(!guard.tick_recovery());
        assert!(!guard.tick_recovery());
        assert!(guard.tick_recovery());
        assert!(!guard.in_recovery());
    }

    #[test]
    fn avoidance_heading_points_away_from_the_obstacle() {
        let escape = avoidance_heading(Vec2::new(0.2, 0.0), 0.0);
        assert!((escape.x + 1.0).abs() < 1e-12);
        assert!(escape.y.abs() < 1e-12);
    }

    #[test]
    fn perturbation_is_zero_unless_frequent() {
        let mut rng = SmallRng::seed_from_u64(3);
        assert_eq!(perturbation(false, &mut rng), 0.0);
        let angle = perturbation(true, &mut rng);
        assert!(angle.abs() < FRAC_PI_4);
    }
}
