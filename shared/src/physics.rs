//! Kinematic integration of a free ball.
//!
//! Custom (non rigid-body) model: gravity on Z while airborne, a constant
//! horizontal deceleration chosen by ground contact, cosmetic spin decay and an
//! explicit Euler position step. Only ever run on the authority, and only while
//! the ball is `Loose` or `InFlight`.

use crate::ball::BallState;
use crate::config::BallConfig;
use nalgebra::Vector3;

/// Advances velocity and position of `state` by `dt` seconds.
///
/// Returns true when the ball is grounded and slower than the stop threshold;
/// its velocity has then been zeroed. The caller decides on any phase change.
pub fn integrate(state: &mut BallState, config: &BallConfig, dt: f32) -> bool {
    if !state.grounded {
        state.linear_velocity.z -= config.gravity * dt;
    }

    let coefficient = if state.grounded {
        config.ground_friction
    } else {
        config.air_resistance
    };
    apply_friction(&mut state.linear_velocity, coefficient * dt);

    let at_rest =
        state.grounded && state.linear_velocity.norm_squared() < config.stopped_speed_sq;
    if at_rest {
        state.linear_velocity = Vector3::zeros();
    }

    state.angular_velocity *= (1.0 - config.angular_damping * dt).max(0.0);

    state.position += state.linear_velocity * dt;

    at_rest
}

/// Reduces horizontal speed by `amount`, never reversing direction.
fn apply_friction(velocity: &mut Vector3<f32>, amount: f32) {
    let speed = horizontal_speed(velocity);
    if speed <= f32::EPSILON {
        return;
    }

    let scale = (speed - amount).max(0.0) / speed;
    velocity.x *= scale;
    velocity.y *= scale;
}

pub fn horizontal_speed(velocity: &Vector3<f32>) -> f32 {
    (velocity.x * velocity.x + velocity.y * velocity.y).sqrt()
}
