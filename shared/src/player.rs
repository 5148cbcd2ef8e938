use crate::collision::FieldGeometry;
use crate::events::{BallId, PossessorId, Team};
use crate::possession::Possessor;
use crate::{sanitize_axis, InputState, PLAYER_SPEED};
use nalgebra::Vector3;
use serde::{Deserialize, Serialize};

/// A controllable footballer. Positions are at ground level; the ball's dribble
/// offset lifts a held ball to its resting height.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Player {
    pub id: PossessorId,
    pub team: Team,
    pub position: Vector3<f32>,
    pub velocity: Vector3<f32>,
    /// Facing angle around Z, radians. Zero faces +X.
    pub yaw: f32,
    pub has_ball: bool,
    pub possessed_ball: Option<BallId>,
}

impl Player {
    pub fn new(id: PossessorId, team: Team, position: Vector3<f32>) -> Self {
        Self {
            id,
            team,
            position,
            velocity: Vector3::zeros(),
            yaw: 0.0,
            has_ball: false,
            possessed_ball: None,
        }
    }

    /// Sets velocity from the movement axes of `input` and turns to face the
    /// direction of travel. Standing still keeps the previous facing.
    pub fn apply_input(&mut self, input: &InputState) {
        let mut direction = Vector3::new(
            sanitize_axis(input.move_x),
            sanitize_axis(input.move_y),
            0.0,
        );
        if direction.norm_squared() > 1.0 {
            direction.normalize_mut();
        }

        self.velocity = direction * PLAYER_SPEED;
        if direction.norm_squared() > f32::EPSILON {
            self.yaw = direction.y.atan2(direction.x);
        }
    }

    /// Moves by the current velocity, staying on the field.
    pub fn step(&mut self, dt: f32, field: &FieldGeometry) {
        self.position += self.velocity * dt;
        self.position.x = self.position.x.clamp(-field.half_width, field.half_width);
        self.position.y = self.position.y.clamp(-field.half_length, field.half_length);
        self.position.z = field.ground_z;
    }

    /// Unit vector the player is facing, on the ground plane.
    pub fn facing(&self) -> Vector3<f32> {
        Vector3::new(self.yaw.cos(), self.yaw.sin(), 0.0)
    }
}

impl Possessor for Player {
    fn id(&self) -> PossessorId {
        self.id
    }

    fn position(&self) -> Vector3<f32> {
        self.position
    }

    fn orientation(&self) -> f32 {
        self.yaw
    }

    fn set_has_ball(&mut self, has_ball: bool) {
        self.has_ball = has_ball;
    }

    fn set_possessed_ball(&mut self, ball: Option<BallId>) {
        self.possessed_ball = ball;
    }
}
