//! Tunable constants for the ball simulation.
//!
//! Units follow the engine convention: centimetres, seconds, Z up.

/// Where a held ball sits relative to its possessor, in the possessor's frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DribbleOffset {
    /// Distance along the possessor's facing direction.
    pub forward: f32,
    /// Height above the possessor's origin.
    pub up: f32,
}

/// Physical and arbitration parameters of a ball.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BallConfig {
    pub gravity: f32,
    /// Horizontal deceleration while rolling, units/s².
    pub ground_friction: f32,
    /// Horizontal deceleration while airborne, units/s².
    pub air_resistance: f32,
    /// Restitution applied to ground and wall bounces.
    pub bounciness: f32,
    /// Impact speed below which a landing ball stops bouncing.
    pub min_bounce_speed: f32,
    /// Squared speed under which a grounded ball is considered stopped.
    pub stopped_speed_sq: f32,
    /// Geometric decay rate of the cosmetic spin, per second.
    pub angular_damping: f32,
    pub radius: f32,
    /// Seconds during which nobody may pick up a just-released ball.
    pub possession_cooldown: f32,
    /// Seconds during which the last kicker may not pick the ball back up.
    pub last_kicker_cooldown: f32,
    /// Maximum distance between a possessor and the ball centre for pickup.
    pub pickup_radius: f32,
    pub dribble_offset: DribbleOffset,
    /// Fraction of kick power added to vertical velocity for a lofted kick.
    pub lob_factor: f32,
    /// Spin magnitude per unit of kick power.
    pub spin_scale: f32,
}

pub const DEFAULT_BALL_RADIUS: f32 = 11.0;

impl Default for BallConfig {
    fn default() -> Self {
        Self {
            gravity: 980.0,
            ground_friction: 250.0,
            air_resistance: 20.0,
            bounciness: 0.6,
            min_bounce_speed: 50.0,
            stopped_speed_sq: 100.0,
            angular_damping: 2.0,
            radius: DEFAULT_BALL_RADIUS,
            possession_cooldown: 0.2,
            last_kicker_cooldown: 1.0,
            pickup_radius: 120.0,
            dribble_offset: DribbleOffset {
                forward: 50.0,
                up: DEFAULT_BALL_RADIUS,
            },
            lob_factor: 0.3,
            spin_scale: 0.01,
        }
    }
}
