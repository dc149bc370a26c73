//! Vector-to-goal sub-machine: straight-line taxis with the same layered
//! collision handling as exploration.

use crate::collision::{CollisionConfig, CollisionGuard, avoidance_heading, perturbation};
use crate::sensors::SensorSnapshot;
use cachebots_core::Vec2;
use rand::rngs::SmallRng;

/// States of the vectoring machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VectorState {
    /// No goal bound.
    Idle,
    /// Driving toward the goal.
    Vector,
    /// Fleeing a threatening obstacle.
    CollisionAvoidance,
    /// Driving the escape heading for the cooldown window.
    CollisionRecovery,
    /// Within tolerance of the goal.
    Arrived,
}

/// Drives toward a bound goal position until within tolerance.
#[derive(Debug, Clone)]
pub struct VectorFsm {
    tolerance: f64,
    state: VectorState,
    goal: Vec2,
    avoid: Vec2,
    guard: CollisionGuard,
}

impl VectorFsm {
    #[must_use]
    pub fn new(tolerance: f64, collision: CollisionConfig) -> Self {
        Self {
            tolerance,
            state: VectorState::Idle,
            goal: Vec2::ZERO,
            avoid: Vec2::ZERO,
            guard: CollisionGuard::new(collision),
        }
    }

    /// Binds a goal and starts driving.
    pub fn begin(&mut self, goal: Vec2) {
        self.goal = goal;
        self.state = VectorState::Vector;
        self.guard.reset();
    }

    /// Unbinds the goal.
    pub fn reset(&mut self) {
        self.state = VectorState::Idle;
    }

    /// Current machine state.
    #[must_use]
    pub fn state(&self) -> VectorState {
        self.state
    }

    /// True once a goal is bound and not yet abandoned.
    #[must_use]
    pub fn is_engaged(&self) -> bool {
        !matches!(self.state, VectorState::Idle)
    }

    /// True once the goal has been reached.
    #[must_use]
    pub fn is_arrived(&self) -> bool {
        matches!(self.state, VectorState::Arrived)
    }

    /// True while reacting to an obstacle.
    #[must_use]
    pub fn is_avoiding(&self) -> bool {
        matches!(
            self.state,
            VectorState::CollisionAvoidance | VectorState::CollisionRecovery
        )
    }

    /// Bound goal position.
    #[must_use]
    pub fn goal(&self) -> Vec2 {
        self.goal
    }

    /// One vectoring tick; returns the desired world-frame heading.
    pub fn run(&mut self, snap: &SensorSnapshot, rng: &mut SmallRng) -> Vec2 {
        match self.state {
            VectorState::Idle | VectorState::Arrived => Vec2::ZERO,
            VectorState::Vector => {
                let offset = self.goal - snap.position;
                if offset.length() <= self.tolerance {
                    self.state = VectorState::Arrived;
                    return Vec2::ZERO;
                }
                if self.guard.threatened(snap.obstacle) {
                    return self.enter_avoidance(snap, rng);
                }
                offset.normalized()
            }
            VectorState::CollisionAvoidance => {
                if self.guard.threatened(snap.obstacle) {
                    self.enter_avoidance(snap, rng)
                } else {
                    self.guard.begin_recovery();
                    self.state = VectorState::CollisionRecovery;
                    self.avoid
                }
            }
            VectorState::CollisionRecovery => {
                if self.guard.tick_recovery() {
                    self.state = VectorState::Vector;
                    (self.goal - snap.position).normalized()
                } else {
                    self.avoid
                }
            }
        }
    }

    fn enter_avoidance(&mut self, snap: &SensorSnapshot, rng: &mut SmallRng) -> Vec2 {
        let frequent = self.guard.note_collision(snap.tick);
        self.avoid = avoidance_heading(snap.obstacle, perturbation(frequent, rng));
        self.state = VectorState::CollisionAvoidance;
        self.avoid
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cachebots_core::Tick;
    use rand::SeedableRng;

    fn at(tick: u64, position: Vec2) -> SensorSnapshot {
        SensorSnapshot::quiet(Tick(tick), position, Vec2::new(1.0, 0.0))
    }

    #[test]
    fn drives_toward_the_goal_until_within_tolerance() {
        let mut fsm = VectorFsm::new(0.2, CollisionConfig::default());
        let mut rng = SmallRng::seed_from_u64(5);
        fsm.begin(Vec2::new(2.0, 0.0));

        let heading = fsm.run(&at(0, Vec2::ZERO), &mut rng);
        assert!((heading.x - 1.0).abs() < 1e-12);
        assert!(fsm.is_engaged());
        assert!(!fsm.is_arrived());

        let done = fsm.run(&at(1, Vec2::new(1.9, 0.0)), &mut rng);
        assert_eq!(done, Vec2::ZERO);
        assert!(fsm.is_arrived());
    }

    #[test]
    fn obstacle_detours_then_resumes_the_goal() {
        let collision = CollisionConfig {
            recovery_ticks: 2,
            ..CollisionConfig::default()
        };
        let mut fsm = VectorFsm::new(0.1, collision);
        let mut rng = SmallRng::seed_from_u64(6);
        fsm.begin(Vec2::new(5.0, 0.0));

        fsm.run(&at(0, Vec2::ZERO), &mut rng);
        let mut snap = at(1, Vec2::new(0.5, 0.0));
        snap.obstacle = Vec2::new(0.0, 0.3);
        let escape = fsm.run(&snap, &mut rng);
        assert_eq!(fsm.state(), VectorState::CollisionAvoidance);
        assert!(escape.y < 0.0);

        fsm.run(&at(2, Vec2::new(0.5, -0.2)), &mut rng);
        assert_eq!(fsm.state(), VectorState::CollisionRecovery);
        fsm.run(&at(3, Vec2::new(0.5, -0.4)), &mut rng);
        let resumed = fsm.run(&at(4, Vec2::new(0.5, -0.6)), &mut rng);
        assert_eq!(fsm.state(), VectorState::Vector);
        assert!(resumed.x > 0.0, "back on course toward the goal");
    }

    #[test]
    fn idle_machine_produces_no_motion() {
        let mut fsm = VectorFsm::new(0.1, CollisionConfig::default());
        let mut rng = SmallRng::seed_from_u64(7);
        assert_eq!(fsm.run(&at(0, Vec2::ZERO), &mut rng), Vec2::ZERO);
        assert!(!fsm.is_engaged());
    }
}
