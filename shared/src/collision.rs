//! Collision resolution against the static field: ground plane, side hoardings
//! and the two goal lines.
//!
//! The field is centred on the origin. X runs across the pitch (touchlines at
//! `±half_width`), Y runs along it (goal lines at `±half_length`), Z is up.

use crate::ball::BallState;
use crate::config::BallConfig;
use crate::events::Team;
use nalgebra::Vector3;

/// Height above the resting position at which a grounded ball counts as lifted.
const GROUND_TOLERANCE: f32 = 0.5;

/// Static field dimensions supplied by match setup.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FieldGeometry {
    pub half_width: f32,
    pub half_length: f32,
    pub goal_half_width: f32,
    pub goal_height: f32,
    pub out_of_bounds_buffer: f32,
    pub ground_z: f32,
    /// Team defending the goal at `+half_length`; the opponent defends `-half_length`.
    pub positive_goal_defender: Team,
}

impl Default for FieldGeometry {
    fn default() -> Self {
        Self {
            half_width: 3400.0,
            half_length: 5250.0,
            goal_half_width: 366.0,
            goal_height: 244.0,
            out_of_bounds_buffer: 0.0,
            ground_z: 0.0,
            positive_goal_defender: Team::TeamA,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GoalEnd {
    Positive,
    Negative,
}

impl FieldGeometry {
    pub fn defender_of(&self, end: GoalEnd) -> Team {
        match end {
            GoalEnd::Positive => self.positive_goal_defender,
            GoalEnd::Negative => self.positive_goal_defender.opponent(),
        }
    }

    /// Z of a ball of `radius` resting on the ground.
    pub fn rest_height(&self, radius: f32) -> f32 {
        self.ground_z + radius
    }

    pub fn centre_spot(&self, radius: f32) -> Vector3<f32> {
        Vector3::new(0.0, 0.0, self.rest_height(radius))
    }

    /// Moves `position` back onto the playing surface, resting on the ground.
    pub fn clamp_inside(&self, position: Vector3<f32>, radius: f32) -> Vector3<f32> {
        let x_limit = (self.half_width - radius).max(0.0);
        let y_limit = (self.half_length - radius).max(0.0);
        Vector3::new(
            position.x.clamp(-x_limit, x_limit),
            position.y.clamp(-y_limit, y_limit),
            self.rest_height(radius),
        )
    }

    /// Goal end whose mouth `position` has passed through, if any.
    pub fn goal_crossed(&self, position: &Vector3<f32>) -> Option<GoalEnd> {
        let inside_mouth = position.x.abs() < self.goal_half_width
            && position.z < self.ground_z + self.goal_height;
        if !inside_mouth || position.y.abs() <= self.half_length {
            return None;
        }
        Some(if position.y > 0.0 {
            GoalEnd::Positive
        } else {
            GoalEnd::Negative
        })
    }

    /// Beyond a touchline, or beyond a goal line anywhere except through the mouth.
    pub fn is_out_of_bounds(&self, position: &Vector3<f32>) -> bool {
        let beyond_touchline = position.x.abs() > self.half_width + self.out_of_bounds_buffer;
        let beyond_goal_line = position.y.abs() > self.half_length + self.out_of_bounds_buffer;
        let outside_mouth = position.x.abs() >= self.goal_half_width
            || position.z >= self.ground_z + self.goal_height;
        beyond_touchline || (beyond_goal_line && outside_mouth)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CollisionEvent {
    BallOutOfBounds,
    GoalScored(Team),
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct CollisionOutcome {
    pub events: Vec<CollisionEvent>,
    /// A ground or wall bounce happened this tick; boundary checks were deferred.
    pub bounced: bool,
}

/// Resolves ground and wall contact, then goal / out-of-bounds crossings.
///
/// A tick that produced a bounce skips the crossing checks; the ball is flagged
/// on the next tick if it is still beyond the lines. A goal takes precedence over
/// out-of-bounds when both would apply. On either event both velocities are
/// zeroed; the phase change is left to the caller.
pub fn resolve(
    state: &mut BallState,
    config: &BallConfig,
    field: &FieldGeometry,
) -> CollisionOutcome {
    let mut outcome = CollisionOutcome::default();

    outcome.bounced |= resolve_ground(state, config, field);
    outcome.bounced |= resolve_side_walls(state, config, field);

    if outcome.bounced {
        return outcome;
    }

    if let Some(end) = field.goal_crossed(&state.position) {
        stop(state);
        outcome
            .events
            .push(CollisionEvent::GoalScored(field.defender_of(end).opponent()));
    } else if field.is_out_of_bounds(&state.position) {
        stop(state);
        outcome.events.push(CollisionEvent::BallOutOfBounds);
    }

    outcome
}

/// Returns true if the ball bounced off the ground.
fn resolve_ground(state: &mut BallState, config: &BallConfig, field: &FieldGeometry) -> bool {
    let floor = field.rest_height(state.radius);

    if state.position.z > floor {
        if state.grounded && state.position.z > floor + GROUND_TOLERANCE {
            state.grounded = false;
        }
        return false;
    }

    state.position.z = floor;

    if state.grounded {
        state.linear_velocity.z = state.linear_velocity.z.max(0.0);
        return false;
    }

    if state.linear_velocity.z >= 0.0 {
        return false;
    }

    let impact_speed = -state.linear_velocity.z;
    // Threshold applies to the incoming speed, not the damped rebound: -60 bounces, -30 lands.
    if impact_speed > config.min_bounce_speed {
        state.linear_velocity.z = impact_speed * config.bounciness;
        true
    } else {
        state.linear_velocity.z = 0.0;
        state.grounded = true;
        false
    }
}

/// Returns true if the ball was reflected off a side hoarding.
fn resolve_side_walls(state: &mut BallState, config: &BallConfig, field: &FieldGeometry) -> bool {
    let limit = field.half_width - state.radius;
    if state.position.x.abs() <= limit {
        return false;
    }

    let side = state.position.x.signum();
    state.position.x = limit * side;

    if state.linear_velocity.x * side > 0.0 {
        state.linear_velocity.x *= -config.bounciness;
        true
    } else {
        false
    }
}

fn stop(state: &mut BallState) {
    state.linear_velocity = Vector3::zeros();
    state.angular_velocity = Vector3::zeros();
}
