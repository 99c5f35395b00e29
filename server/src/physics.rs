//! Car kinematics and responses to client-reported collisions.
//!
//! Each control message advances the sending player's car by exactly one
//! step. Collision *detection* against the track happens on the client; the
//! server only reacts to the `collision` and `finish_collision` flags.

use rand::Rng;
use shared::protocol::ControlInput;
use shared::{Car, MAX_SPEED, MIN_SPEED, SCREEN_HEIGHT, SCREEN_WIDTH};

pub const ACCELERATION: f32 = 0.2;
/// Speed lost per step when neither throttle nor brake is held.
pub const DRAG: f32 = 0.1;
pub const STEERING_STEP: f32 = 5.0;
/// Damping applied when a car hits a field edge or the side of the finish line.
pub const EDGE_DAMPING: f32 = 0.5;
pub const WALL_DAMPING: f32 = 0.3;
pub const BOUNCE_DISTANCE: f32 = 10.0;
/// Maximum random heading change after a wall hit, in degrees.
pub const ANGLE_JITTER: f32 = 5.0;

///Represents a vector in screen space (y grows downwards).
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Vector2 {
    pub x: f32,
    pub y: f32,
}

impl Vector2 {
    ///Returns the unit vector a car with the given heading drives along.
    pub fn heading(angle_degrees: f32) -> Vector2 {
        let radians = angle_degrees.to_radians();
        Vector2 {
            x: -radians.sin(),
            y: -radians.cos(),
        }
    }

    ///Returns the scaled vector.
    pub fn scale(&self, scalar: f32) -> Vector2 {
        Vector2 {
            x: self.x * scalar,
            y: self.y * scalar,
        }
    }

    ///Returns the sum of two vectors.
    pub fn add(&self, other: &Vector2) -> Vector2 {
        Vector2 {
            x: self.x + other.x,
            y: self.y + other.y,
        }
    }
}

/// What a control message did to the car.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlOutcome {
    Driven,
    WallBounce,
    FinishSideBounce,
    /// The car crossed the finish line and was sent back to its start pose.
    FinishCrossed,
}

/// Applies one control message to `car`.
///
/// A finish-line report is handled first and the step carries on with the
/// result: a wall report bounces the car, otherwise it is driven. The
/// returned outcome names the finish event when there was one.
pub fn apply_control<R: Rng>(
    car: &mut Car,
    input: &ControlInput,
    rng: &mut R,
) -> ControlOutcome {
    let finish = if input.finish_collision {
        if input.finish_y.unwrap_or(0.0) == 0.0 {
            car.speed = -car.speed * EDGE_DAMPING;
            Some(ControlOutcome::FinishSideBounce)
        } else {
            car.reset_to_start();
            Some(ControlOutcome::FinishCrossed)
        }
    } else {
        None
    };

    let motion = if input.collision {
        bounce_off_wall(car, rng);
        ControlOutcome::WallBounce
    } else {
        drive(car, input);
        ControlOutcome::Driven
    };

    finish.unwrap_or(motion)
}

/// Throttle, steering and movement for one step, clamped to the field.
pub fn drive(car: &mut Car, input: &ControlInput) {
    if input.up {
        car.speed = (car.speed + ACCELERATION).min(MAX_SPEED);
    } else if input.down {
        car.speed = (car.speed - ACCELERATION).max(MIN_SPEED);
    } else if car.speed > 0.0 {
        car.speed = (car.speed - DRAG).max(0.0);
    } else if car.speed < 0.0 {
        car.speed = (car.speed + DRAG).min(0.0);
    }

    // A standing car cannot turn.
    if car.speed != 0.0 {
        if input.right {
            car.angle -= STEERING_STEP;
        }
        if input.left {
            car.angle += STEERING_STEP;
        }
        car.angle = normalize_angle(car.angle);
    }

    let position = Vector2 { x: car.x, y: car.y };
    let target = position.add(&Vector2::heading(car.angle).scale(car.speed));
    clamp_to_field(car, target);
}

/// Reverses and damps the car, pushes it back along the way it came and
/// nudges its heading so it does not wedge into a corner.
pub fn bounce_off_wall<R: Rng>(car: &mut Car, rng: &mut R) {
    let direction = if car.speed >= 0.0 { 1.0 } else { -1.0 };
    car.speed = -car.speed * WALL_DAMPING;

    let push = Vector2::heading(car.angle).scale(-direction * BOUNCE_DISTANCE);
    car.x += push.x;
    car.y += push.y;

    let jitter = rng.gen_range(-ANGLE_JITTER..=ANGLE_JITTER);
    car.angle = normalize_angle(car.angle + jitter);
}

/// Moves the car to `target`, keeping it inside the field. Every touched
/// edge halves and inverts the speed.
fn clamp_to_field(car: &mut Car, target: Vector2) {
    let padding = Car::padding();
    let mut x = target.x;
    let mut y = target.y;

    if x < padding {
        x = padding;
        car.speed = -car.speed * EDGE_DAMPING;
    } else if x > SCREEN_WIDTH - padding {
        x = SCREEN_WIDTH - padding;
        car.speed = -car.speed * EDGE_DAMPING;
    }

    if y < padding {
        y = padding;
        car.speed = -car.speed * EDGE_DAMPING;
    } else if y > SCREEN_HEIGHT - padding {
        y = SCREEN_HEIGHT - padding;
        car.speed = -car.speed * EDGE_DAMPING;
    }

    car.x = x;
    car.y = y;
}

/// Wraps an angle in degrees into `[0, 360)`.
pub fn normalize_angle(angle: f32) -> f32 {
    let wrapped = angle.rem_euclid(360.0);
    // rem_euclid can round up to exactly 360 for tiny negative inputs
    if wrapped >= 360.0 {
        0.0
    } else {
        wrapped
    }
}
