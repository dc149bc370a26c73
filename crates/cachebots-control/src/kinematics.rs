//! Differential-drive kinematics: the turn classifier and the actuation
//! surface every locomotion-producing state drives.

use crate::ControlError;
use cachebots_core::Vec2;
use serde::{Deserialize, Serialize};

/// Wheel and turn parameters.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct DriveConfig {
    /// Top wheel speed in meters per second.
    pub max_speed: f64,
    /// Angular deviation below which the robot drives straight, radians.
    pub no_turn_threshold: f64,
    /// Angular deviation above which the robot spins in place, radians.
    pub hard_turn_threshold: f64,
    /// Speed fraction available while carrying a block.
    pub block_carry_throttle: f64,
}

impl Default for DriveConfig {
    fn default() -> Self {
        Self {
            max_speed: 0.3,
            no_turn_threshold: 10f64.to_radians(),
            hard_turn_threshold: 90f64.to_radians(),
            block_carry_throttle: 0.5,
        }
    }
}

impl DriveConfig {
    /// Validates the configuration.
    pub fn validate(&self) -> Result<(), ControlError> {
        if self.max_speed <= 0.0 {
            return Err(ControlError::InvalidConfig("max_speed must be positive"));
        }
        if self.no_turn_threshold <= 0.0 || self.no_turn_threshold >= self.hard_turn_threshold {
            return Err(ControlError::InvalidConfig(
                "turn thresholds must satisfy 0 < no_turn < hard_turn",
            ));
        }
        if self.hard_turn_threshold > std::f64::consts::PI {
            return Err(ControlError::InvalidConfig(
                "hard_turn_threshold cannot exceed pi",
            ));
        }
        if !(0.0..=1.0).contains(&self.block_carry_throttle) || self.block_carry_throttle == 0.0 {
            return Err(ControlError::InvalidConfig(
                "block_carry_throttle must be in (0, 1]",
            ));
        }
        Ok(())
    }
}

/// Three-way turn regime for a desired heading change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnClass {
    /// Both wheels equal, straight ahead.
    NoTurn,
    /// Both wheels forward at different speeds.
    SoftTurn,
    /// Wheels at opposite speeds, spinning in place.
    HardTurn,
}

/// Classifies an angular deviation (radians) against the two thresholds.
///
/// Pure in its inputs; repeated identical headings always classify the same.
#[must_use]
pub fn classify(angle: f64, config: &DriveConfig) -> TurnClass {
    let magnitude = angle.abs();
    if magnitude > config.hard_turn_threshold {
        TurnClass::HardTurn
    } else if magnitude > config.no_turn_threshold {
        TurnClass::SoftTurn
    } else {
        TurnClass::NoTurn
    }
}

/// One tick's wheel command.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct WheelSpeeds {
    pub left: f64,
    pub right: f64,
}

impl WheelSpeeds {
    /// True when both wheels are stopped.
    #[must_use]
    pub fn is_stopped(&self) -> bool {
        self.left == 0.0 && self.right == 0.0
    }
}

/// Maps a robot-frame desired heading to the two wheel speeds.
///
/// The heading's length is read as a speed fraction of `limit`, capped at 1.
/// Soft turns slow the inner wheel and speed the outer by the same factor;
/// hard turns spin at `limit` with opposite signs.
#[must_use]
pub fn wheel_speeds(
    local_heading: Vec2,
    limit: f64,
    force_hard: bool,
    config: &DriveConfig,
) -> WheelSpeeds {
    let angle = local_heading.angle();
    let class = if force_hard {
        TurnClass::HardTurn
    } else {
        classify(angle, config)
    };
    let base = local_heading.length().min(1.0) * limit;
    let (inner, outer) = match class {
        TurnClass::NoTurn => (base, base),
        TurnClass::SoftTurn => {
            let factor = (config.hard_turn_threshold - angle.abs()) / config.hard_turn_threshold;
            (base * factor, base * (2.0 - factor))
        }
        TurnClass::HardTurn => (-limit, limit),
    };
    // positive angle turns left, so the left wheel is the inner one
    if angle > 0.0 {
        WheelSpeeds {
            left: inner,
            right: outer,
        }
    } else {
        WheelSpeeds {
            left: outer,
            right: inner,
        }
    }
}

/// Rotates a world-frame vector into the frame of a robot facing `facing`.
#[must_use]
pub fn world_to_local(world: Vec2, facing: Vec2) -> Vec2 {
    world.rotated(-facing.angle())
}

/// Diagnostic LED color, one per behavioral phase.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LedColor {
    #[default]
    Off,
    /// Acquiring a target.
    Green,
    /// Waiting for a pickup or drop to be honored.
    Yellow,
    /// Transporting a block.
    Red,
    /// Leaving the nest.
    Blue,
}

/// Actuation surface: wheels, diagnostic LED, and a communication payload
/// broadcast to observers.
///
/// Holds the last command issued; the driver reads the wheel speeds back
/// when integrating robot motion.
#[derive(Debug, Clone)]
pub struct Actuators {
    config: DriveConfig,
    wheels: WheelSpeeds,
    led: LedColor,
    carrying: bool,
    payload: Option<u32>,
}

impl Actuators {
    #[must_use]
    pub fn new(config: DriveConfig) -> Self {
        Self {
            config,
            wheels: WheelSpeeds::default(),
            led: LedColor::Off,
            carrying: false,
            payload: None,
        }
    }

    /// Translates a robot-frame desired heading into wheel speeds.
    pub fn set_heading(&mut self, local_heading: Vec2, force_hard: bool) {
        let limit = if self.carrying {
            self.config.max_speed * self.config.block_carry_throttle
        } else {
            self.config.max_speed
        };
        self.wheels = wheel_speeds(local_heading, limit, force_hard, &self.config);
    }

    /// Stops both wheels.
    pub fn stop(&mut self) {
        self.wheels = WheelSpeeds::default();
    }

    pub fn set_led(&mut self, led: LedColor) {
        self.led = led;
    }

    /// Throttles wheel speed while a block is carried.
    pub fn set_carrying(&mut self, carrying: bool) {
        self.carrying = carrying;
    }

    /// Sets the broadcast payload, typically the carried block's display id.
    pub fn set_payload(&mut self, payload: Option<u32>) {
        self.payload = payload;
    }

    /// Last wheel command.
    #[must_use]
    pub fn wheels(&self) -> WheelSpeeds {
        self.wheels
    }

    #[must_use]
    pub fn led(&self) -> LedColor {
        self.led
    }

    #[must_use]
    pub fn is_carrying(&self) -> bool {
        self.carrying
    }

    #[must_use]
    pub fn payload(&self) -> Option<u32> {
        self.payload
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classification_covers_all_three_regimes() {
        let config = DriveConfig::default();
        assert_eq!(classify(0.0, &config), TurnClass::NoTurn);
        assert_eq!(classify(0.1, &config), TurnClass::NoTurn);
        assert_eq!(classify(0.5, &config), TurnClass::SoftTurn);
        assert_eq!(classify(-0.5, &config), TurnClass::SoftTurn);
        assert_eq!(classify(2.0, &config), TurnClass::HardTurn);
        assert_eq!(classify(-2.0, &config), TurnClass::HardTurn);
    }

    #[test]
    fn identical_headings_always_produce_identical_speeds() {
        let config = DriveConfig::default();
        let heading = Vec2::new(0.6, 0.4);
        let first = wheel_speeds(heading, config.max_speed, false, &config);
        let second = wheel_speeds(heading, config.max_speed, false, &config);
        assert_eq!(first, second);
    }

    #[test]
    fn straight_headings_drive_both_wheels_equally() {
        let config = DriveConfig::default();
        let speeds = wheel_speeds(Vec2::new(1.0, 0.0), 0.3, false, &config);
        assert!((speeds.left - 0.3).abs() < 1e-12);
        assert!((speeds.right - 0.3).abs() < 1e-12);
    }

    #[test]
    fn soft_turns_slow_the_inner_wheel() {
        let config = DriveConfig::default();
        // positive angle: left turn, left wheel inner
        let left_turn = wheel_speeds(Vec2::from_angle(0.5), 0.3, false, &config);
        assert!(left_turn.left < left_turn.right);
        assert!(left_turn.left > 0.0, "soft turn keeps both wheels forward");

        let right_turn = wheel_speeds(Vec2::from_angle(-0.5), 0.3, false, &config);
        assert!(right_turn.right < right_turn.left);
    }

    #[test]
    fn hard_turns_spin_in_place() {
        let config = DriveConfig::default();
        let speeds = wheel_speeds(Vec2::from_angle(3.0), 0.3, false, &config);
        assert!((speeds.left + speeds.right).abs() < 1e-12);
        assert!(speeds.left.abs() > 0.0);

        let forced = wheel_speeds(Vec2::new(1.0, 0.0), 0.3, true, &config);
        assert!((forced.left + forced.right).abs() < 1e-12);
    }

    #[test]
    fn carrying_throttles_the_speed_limit() {
        let mut actuators = Actuators::new(DriveConfig::default());
        actuators.set_heading(Vec2::new(1.0, 0.0), false);
        let unloaded = actuators.wheels();

        actuators.set_carrying(true);
        actuators.set_heading(Vec2::new(1.0, 0.0), false);
        let loaded = actuators.wheels();
        assert!((loaded.left - unloaded.left * 0.5).abs() < 1e-12);

        actuators.stop();
        assert!(actuators.wheels().is_stopped());
    }

    #[test]
    fn world_to_local_rotates_into_the_robot_frame() {
        // robot facing +y sees a +x world vector on its right (negative y local)
        let local = world_to_local(Vec2::new(1.0, 0.0), Vec2::new(0.0, 1.0));
        assert!(local.x.abs() < 1e-12);
        assert!((local.y + 1.0).abs() < 1e-12);
    }

    #[test]
    fn invalid_drive_configs_are_rejected() {
        let swapped = DriveConfig {
            no_turn_threshold: 2.0,
            hard_turn_threshold: 0.2,
            ..DriveConfig::default()
        };
        assert!(swapped.validate().is_err());

        let stopped = DriveConfig {
            max_speed: 0.0,
            ..DriveConfig::default()
        };
        assert!(stopped.validate().is_err());
    }
}
