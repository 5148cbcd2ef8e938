use crate::input::Toggles;
use macroquad::prelude::*;
use nalgebra::Vector3;
use shared::config::DEFAULT_BALL_RADIUS;
use shared::{BallEvent, BallPhase, FieldGeometry, Player, Team, PLAYER_RADIUS};

const MARGIN: f32 = 40.0;

#[derive(Debug, Clone)]
pub struct RenderConfig {
    pub client_id: Option<u32>,
    pub team: Option<Team>,
    pub toggles: Toggles,
    pub ping_ms: u64,
    pub fake_ping_ms: u64,
    pub ball_phase: BallPhase,
    pub ball_possessor: Option<u32>,
    pub recent_events: Vec<BallEvent>,
}

/// Top-down view: field Y runs left to right, field X runs bottom to top.
pub struct Renderer {
    width: f32,
    height: f32,
    field: FieldGeometry,
    scale: f32,
}

impl Renderer {
    pub fn new(width: f32, height: f32, field: FieldGeometry) -> Self {
        let scale = ((width - 2.0 * MARGIN) / (2.0 * field.half_length))
            .min((height - 2.0 * MARGIN) / (2.0 * field.half_width))
            .max(f32::EPSILON);
        Renderer {
            width,
            height,
            field,
            scale,
        }
    }

    /// Screen position of the ground point under `position`.
    pub fn world_to_screen(&self, position: &Vector3<f32>) -> (f32, f32) {
        (
            self.width / 2.0 + position.y * self.scale,
            self.height / 2.0 - position.x * self.scale,
        )
    }

    pub fn render(&self, players: &[Player], ball: Option<Vector3<f32>>, config: &RenderConfig) {
        clear_background(Color::from_rgba(26, 26, 26, 255));

        self.draw_field();

        for player in players {
            let is_local_player = Some(player.id) == config.client_id;
            self.draw_player(player, is_local_player);
        }

        if let Some(ball) = ball {
            self.draw_ball(&ball);
        }

        self.draw_ui(config, players.len());
    }

    fn draw_field(&self) {
        let field = &self.field;
        let (left, top) = self.world_to_screen(&Vector3::new(field.half_width, -field.half_length, 0.0));
        let (right, bottom) =
            self.world_to_screen(&Vector3::new(-field.half_width, field.half_length, 0.0));

        draw_rectangle(left, top, right - left, bottom - top, Color::from_rgba(34, 102, 51, 255));
        draw_rectangle_lines(left, top, right - left, bottom - top, 2.0, WHITE);

        let (centre_x, centre_y) = self.world_to_screen(&Vector3::zeros());
        draw_line(centre_x, top, centre_x, bottom, 1.0, WHITE);
        draw_circle_lines(centre_x, centre_y, 915.0 * self.scale, 1.0, WHITE);

        for (end, team) in [
            (1.0, field.positive_goal_defender),
            (-1.0, field.positive_goal_defender.opponent()),
        ] {
            let (goal_x, goal_top) = self.world_to_screen(&Vector3::new(
                field.goal_half_width,
                end * field.half_length,
                0.0,
            ));
            let (_, goal_bottom) = self.world_to_screen(&Vector3::new(
                -field.goal_half_width,
                end * field.half_length,
                0.0,
            ));
            let depth = 12.0 * end;
            draw_rectangle(
                goal_x.min(goal_x + depth),
                goal_top,
                depth.abs(),
                goal_bottom - goal_top,
                team_color(team),
            );
        }
    }

    fn draw_player(&self, player: &Player, is_local_player: bool) {
        let (x, y) = self.world_to_screen(&player.position);
        let radius = (PLAYER_RADIUS * self.scale).max(4.0);

        draw_circle(x, y, radius, team_color(player.team));
        if is_local_player {
            draw_circle_lines(x, y, radius + 2.0, 2.0, YELLOW);
        }
        if player.has_ball {
            draw_circle_lines(x, y, radius + 5.0, 1.0, WHITE);
        }

        // Facing, rotated into screen space.
        let facing = player.facing();
        let tip = (x + facing.y * radius * 1.8, y - facing.x * radius * 1.8);
        draw_line(x, y, tip.0, tip.1, 2.0, WHITE);

        draw_text(&player.id.to_string(), x - 4.0, y - radius - 4.0, 14.0, WHITE);
    }

    /// The shadow marks the ground position; the ball is lifted by its height.
    fn draw_ball(&self, ball: &Vector3<f32>) {
        let (x, y) = self.world_to_screen(ball);
        let radius = (DEFAULT_BALL_RADIUS * self.scale).max(3.0);
        let lift = (ball.z - self.field.rest_height(DEFAULT_BALL_RADIUS)).max(0.0) * self.scale;

        draw_circle(x, y, radius, Color::from_rgba(0, 0, 0, 110));
        draw_circle(x, y - lift, radius, WHITE);
        draw_circle_lines(x, y - lift, radius, 1.0, BLACK);
    }

    fn draw_ui(&self, config: &RenderConfig, player_count: usize) {
        let y_start = 10.0;
        let indicator_size = 12.0;
        let spacing = 25.0;

        let features = [
            ("P", config.toggles.prediction),
            ("R", config.toggles.reconciliation),
            ("I", config.toggles.interpolation),
        ];

        for (i, (label, enabled)) in features.iter().enumerate() {
            let x = 10.0 + (i as f32) * spacing;
            let color = if *enabled { GREEN } else { RED };

            draw_rectangle(x, y_start, indicator_size, indicator_size, color);
            draw_rectangle_lines(x, y_start, indicator_size, indicator_size, 1.0, WHITE);

            draw_text(label, x + 3.0, y_start + indicator_size + 12.0, 12.0, WHITE);
        }

        let connection = match (config.client_id, config.team) {
            (Some(id), Some(team)) => format!("#{} {:?}", id, team),
            _ => "connecting...".to_string(),
        };
        draw_text(&connection, 90.0, y_start + 10.0, 14.0, WHITE);

        let total_ping = config.ping_ms + config.fake_ping_ms;
        let ping_color = if total_ping < 50 {
            GREEN
        } else if total_ping < 100 {
            YELLOW
        } else {
            RED
        };
        draw_text(
            &format!("{}ms  {} players", total_ping, player_count),
            10.0,
            y_start + 45.0,
            14.0,
            ping_color,
        );

        let ball = match config.ball_possessor {
            Some(id) => format!("ball: {:?} ({})", config.ball_phase, id),
            None => format!("ball: {:?}", config.ball_phase),
        };
        draw_text(&ball, 10.0, y_start + 62.0, 14.0, WHITE);

        for (i, event) in config.recent_events.iter().rev().enumerate() {
            draw_text(
                &describe(event),
                10.0,
                self.height - 10.0 - i as f32 * 16.0,
                14.0,
                LIGHTGRAY,
            );
        }
    }
}

fn team_color(team: Team) -> Color {
    match team {
        Team::TeamA => Color::from_rgba(68, 136, 255, 255),
        Team::TeamB => Color::from_rgba(255, 68, 68, 255),
    }
}

fn describe(event: &BallEvent) -> String {
    match event {
        BallEvent::PossessionChanged { new: Some(id), .. } => format!("player {} has the ball", id),
        BallEvent::PossessionChanged { old, .. } => format!("ball released by {:?}", old),
        BallEvent::BallStateChanged { phase, .. } => format!("ball {:?}", phase),
        BallEvent::BallOutOfBounds { .. } => "out of bounds".to_string(),
        BallEvent::GoalScored {
            scoring_team,
            last_kicker,
            ..
        } => match last_kicker {
            Some(kicker) => format!("GOAL for {:?} (player {})", scoring_team, kicker),
            None => format!("GOAL for {:?}", scoring_team),
        },
    }
}
