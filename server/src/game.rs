use log::info;
use nalgebra::Vector3;
use shared::{
    Ball, BallConfig, BallEvent, FieldGeometry, InputState, Player, Role, Team, KICK_POWER,
    MATCH_BALL_ID, STEAL_RADIUS,
};
use std::collections::HashMap;

pub const DEFAULT_RESET_DELAY: f32 = 2.0;

#[derive(Debug, Clone, Copy, PartialEq)]
struct PendingReset {
    position: Vector3<f32>,
    remaining: f32,
}

/// Stand-in for the match phase system: reacts to goals and the ball leaving
/// play by placing it back after a short pause. Scores are only logged.
#[derive(Debug, Clone)]
pub struct MatchDirector {
    reset_delay: f32,
    pending: Option<PendingReset>,
}

impl MatchDirector {
    pub fn new(reset_delay: f32) -> Self {
        Self {
            reset_delay: reset_delay.max(0.0),
            pending: None,
        }
    }

    pub fn reset_pending(&self) -> bool {
        self.pending.is_some()
    }

    /// Schedules a reset for the first goal or out-of-bounds event in `events`.
    pub fn observe(&mut self, events: &[BallEvent], ball: &Ball) {
        if self.pending.is_some() {
            return;
        }

        let restart = events.iter().find_map(|event| match *event {
            BallEvent::GoalScored {
                scoring_team,
                last_kicker,
                ..
            } => {
                info!("Goal for {:?} (last kicker {:?})", scoring_team, last_kicker);
                Some(ball.field().centre_spot(ball.state().radius))
            }
            BallEvent::BallOutOfBounds { .. } => Some(
                ball.field()
                    .clamp_inside(ball.position(), ball.state().radius),
            ),
            _ => None,
        });

        if let Some(position) = restart {
            self.pending = Some(PendingReset {
                position,
                remaining: self.reset_delay,
            });
        }
    }

    /// Counts down the pending reset and returns its position once due.
    pub fn advance(&mut self, dt: f32) -> Option<Vector3<f32>> {
        let pending = self.pending.as_mut()?;
        pending.remaining -= dt;
        if pending.remaining > 0.0 {
            return None;
        }
        self.pending.take().map(|reset| reset.position)
    }
}

impl Default for MatchDirector {
    fn default() -> Self {
        Self::new(DEFAULT_RESET_DELAY)
    }
}

pub struct GameState {
    pub tick: u32,
    pub players: HashMap<u32, Player>,
    pub ball: Ball,
    pub director: MatchDirector,
}

impl GameState {
    pub fn new(config: BallConfig, field: FieldGeometry, reset_delay: f32) -> Self {
        Self {
            tick: 0,
            players: HashMap::new(),
            ball: Ball::new(MATCH_BALL_ID, Role::Authority, config, field),
            director: MatchDirector::new(reset_delay),
        }
    }

    pub fn field(&self) -> &FieldGeometry {
        self.ball.field()
    }

    /// Spawns the client's player on the smaller team, in its own half, facing
    /// the opponent's goal.
    pub fn add_player(&mut self, client_id: u32) -> Team {
        let team_a = self.players.values().filter(|p| p.team == Team::TeamA).count();
        let team = if team_a * 2 <= self.players.len() {
            Team::TeamA
        } else {
            Team::TeamB
        };

        let field = *self.field();
        // The half a team defends lies on the side of its goal.
        let side = if field.positive_goal_defender == team {
            1.0
        } else {
            -1.0
        };
        let lane = ((client_id % 5) as f32 - 2.0) * field.half_width / 3.0;
        let mut player = Player::new(
            client_id,
            team,
            Vector3::new(lane, side * field.half_length / 4.0, field.ground_z),
        );
        player.yaw = -side * std::f32::consts::FRAC_PI_2;

        info!(
            "Added player {} to {:?} at ({:.0}, {:.0})",
            client_id, team, player.position.x, player.position.y
        );
        self.players.insert(client_id, player);
        team
    }

    pub fn remove_player(&mut self, client_id: &u32) {
        if self.players.remove(client_id).is_some() {
            self.ball.on_possessor_removed(*client_id);
            info!("Removed player {}", client_id);
        }
    }

    /// Applies movement and action buttons of one input.
    pub fn apply_input(&mut self, client_id: u32, input: &InputState) {
        let Some(player) = self.players.get_mut(&client_id) else {
            return;
        };
        player.apply_input(input);
        let facing = player.facing();

        if (input.kick || input.lob) && self.ball.possessor() == Some(client_id) {
            self.ball.kick(facing, KICK_POWER, input.lob, &mut self.players);
        }
        if input.tackle {
            self.tackle(client_id);
        }
    }

    /// An opponent close to the holder takes the ball; one within pickup range
    /// only knocks it loose.
    pub fn tackle(&mut self, tackler_id: u32) -> bool {
        let Some(holder_id) = self.ball.possessor() else {
            return false;
        };
        let (Some(tackler), Some(holder)) = (
            self.players.get(&tackler_id),
            self.players.get(&holder_id),
        ) else {
            return false;
        };
        if tackler.team == holder.team {
            return false;
        }

        let offset = tackler.position - holder.position;
        let distance = (offset.x * offset.x + offset.y * offset.y).sqrt();
        if distance <= STEAL_RADIUS {
            self.ball.force_transfer(tackler_id, &mut self.players)
        } else if distance <= self.ball.config().pickup_radius {
            self.ball.release(&mut self.players)
        } else {
            false
        }
    }

    /// Advances the match by one fixed step and returns the ball events it
    /// produced, including those from inputs applied since the previous step.
    pub fn step(&mut self, dt: f32) -> Vec<BallEvent> {
        let field = *self.field();
        for player in self.players.values_mut() {
            player.step(dt, &field);
        }

        self.ball.tick(dt, &mut self.players);
        let mut events = self.ball.drain_events();

        self.director.observe(&events, &self.ball);
        if let Some(position) = self.director.advance(dt) {
            self.ball.reset(position, &mut self.players);
            events.extend(self.ball.drain_events());
        }

        self.tick = self.tick.wrapping_add(1);
        events
    }
}

impl Default for GameState {
    fn default() -> Self {
        Self::new(
            BallConfig::default(),
            FieldGeometry::default(),
            DEFAULT_RESET_DELAY,
        )
    }
}
