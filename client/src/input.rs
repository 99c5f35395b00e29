//! Control input generation for the headless bot

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use shared::protocol::ControlInput;
use shared::{Car, MAX_SPEED};

/// Shortest and longest run of one steering choice, in control messages.
const STEER_MIN_TICKS: u32 = 5;
const STEER_MAX_TICKS: u32 = 30;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Steer {
    Straight,
    Left,
    Right,
}

/// Drives a car with full throttle and random steering runs. Collisions are
/// never reported since the bot knows nothing about the track layout.
pub struct Autopilot {
    rng: StdRng,
    steer: Steer,
    ticks_left: u32,
}

impl Autopilot {
    pub fn new() -> Self {
        Self::with_rng(StdRng::from_entropy())
    }

    pub fn with_rng(rng: StdRng) -> Self {
        Self {
            rng,
            steer: Steer::Straight,
            ticks_left: 0,
        }
    }

    /// Next control message for `car`. Without a car (not yet in the
    /// snapshot) nothing is pressed.
    pub fn next_input(&mut self, car: Option<&Car>) -> ControlInput {
        let Some(car) = car else {
            return ControlInput::default();
        };

        if self.ticks_left == 0 {
            self.steer = match self.rng.gen_range(0..3) {
                0 => Steer::Left,
                1 => Steer::Right,
                _ => Steer::Straight,
            };
            self.ticks_left = self.rng.gen_range(STEER_MIN_TICKS..=STEER_MAX_TICKS);
        }
        self.ticks_left -= 1;

        ControlInput {
            up: car.speed < MAX_SPEED,
            left: self.steer == Steer::Left,
            right: self.steer == Steer::Right,
            ..ControlInput::default()
        }
    }
}

impl Default for Autopilot {
    fn default() -> Self {
        Self::new()
    }
}
