use log::debug;
use nalgebra::Vector3;
use shared::{
    BallConfig, BallEvent, FieldGeometry, InputState, InterpolatorConfig, ObserverBridge, Player,
    ReliableBallEvent, ReplicationSnapshot, MATCH_BALL_ID,
};
use std::collections::{HashMap, VecDeque};
use std::time::Instant;

/// Server tick length the prediction replays inputs with.
const SERVER_DT: f32 = 1.0 / 60.0;
/// Prediction error (world units) above which the local player is rolled back.
const RECONCILE_THRESHOLD: f32 = 5.0;
const RECENT_EVENT_LIMIT: usize = 6;

pub struct ClientGameState {
    pub confirmed_players: HashMap<u32, Player>,
    pub predicted_player: Option<Player>,
    pub input_history: Vec<InputState>,
    pub last_confirmed_tick: u32,
    pub recent_events: VecDeque<(Instant, BallEvent)>,
    bridge: ObserverBridge,
    field: FieldGeometry,
}

impl ClientGameState {
    pub fn new(ball: BallConfig, field: FieldGeometry, interpolation: InterpolatorConfig) -> Self {
        Self {
            confirmed_players: HashMap::new(),
            predicted_player: None,
            input_history: Vec::new(),
            last_confirmed_tick: 0,
            recent_events: VecDeque::new(),
            bridge: ObserverBridge::new(MATCH_BALL_ID, ball, field, interpolation),
            field,
        }
    }

    pub fn bridge(&self) -> &ObserverBridge {
        &self.bridge
    }

    pub fn field(&self) -> &FieldGeometry {
        &self.field
    }

    /// Applies an authoritative state packet and returns the ball events
    /// derived from it.
    pub fn apply_server_state(
        &mut self,
        tick: u32,
        players: Vec<Player>,
        last_processed_input: &HashMap<u32, u32>,
        ball: ReplicationSnapshot,
        received_at: Instant,
        client_id: Option<u32>,
        reconciliation_enabled: bool,
    ) -> Vec<BallEvent> {
        self.confirmed_players = players.into_iter().map(|p| (p.id, p)).collect();
        self.last_confirmed_tick = tick;

        if let Some(client_id) = client_id {
            match self.confirmed_players.get(&client_id) {
                Some(confirmed) => {
                    let predicted = self.predicted_player.get_or_insert_with(|| confirmed.clone());
                    // Possession is never predicted.
                    predicted.has_ball = confirmed.has_ball;
                    predicted.possessed_ball = confirmed.possessed_ball;
                }
                None => self.predicted_player = None,
            }

            if reconciliation_enabled {
                self.perform_reconciliation(client_id, last_processed_input);
            }
        }

        let events = self.bridge.receive(ball, received_at);
        self.remember(&events, received_at);
        events
    }

    /// Applies a de-duplicated event from the reliable channel.
    pub fn apply_ball_event(&mut self, event: ReliableBallEvent, received_at: Instant) -> Vec<BallEvent> {
        let events = self.bridge.receive_event(event);
        self.remember(&events, received_at);
        events
    }

    fn remember(&mut self, events: &[BallEvent], at: Instant) {
        for event in events {
            self.recent_events.push_back((at, *event));
        }
        while self.recent_events.len() > RECENT_EVENT_LIMIT {
            self.recent_events.pop_front();
        }
    }

    fn perform_reconciliation(&mut self, client_id: u32, last_processed_input: &HashMap<u32, u32>) {
        let Some(&last_processed_seq) = last_processed_input.get(&client_id) else {
            return;
        };
        self.input_history
            .retain(|input| input.sequence > last_processed_seq);

        let (Some(confirmed), Some(predicted)) = (
            self.confirmed_players.get(&client_id),
            self.predicted_player.as_ref(),
        ) else {
            return;
        };

        let distance = (confirmed.position - predicted.position).norm();
        if distance > RECONCILE_THRESHOLD {
            debug!("Rollback needed! Distance: {:.2}", distance);

            let mut replayed = confirmed.clone();
            for input in &self.input_history {
                replayed.apply_input(input);
                replayed.step(SERVER_DT, &self.field);
            }
            self.predicted_player = Some(replayed);
        }
    }

    /// Records and applies a local input to the predicted player.
    pub fn apply_prediction(&mut self, input: &InputState) {
        self.input_history.push(input.clone());
        if let Some(player) = self.predicted_player.as_mut() {
            player.apply_input(input);
        }
    }

    /// Advances local prediction and the ball interpolator by one frame.
    pub fn update(&mut self, dt: f32, client_id: Option<u32>, prediction_enabled: bool) {
        if prediction_enabled {
            if let Some(player) = self.predicted_player.as_mut() {
                player.step(dt, &self.field);
            }
        }

        let players: HashMap<u32, Player> = self
            .render_players(client_id, prediction_enabled)
            .into_iter()
            .map(|p| (p.id, p))
            .collect();
        self.bridge.update(dt, &players);
    }

    /// Players to draw: the predicted local player plus everyone else as
    /// last confirmed.
    pub fn render_players(&self, client_id: Option<u32>, prediction_enabled: bool) -> Vec<Player> {
        let mut players: Vec<Player> = self
            .confirmed_players
            .values()
            .filter(|p| !prediction_enabled || Some(p.id) != client_id)
            .cloned()
            .collect();

        if prediction_enabled && client_id.is_some() {
            if let Some(predicted) = &self.predicted_player {
                players.push(predicted.clone());
            }
        }
        players.sort_by_key(|p| p.id);
        players
    }

    /// Where to draw the ball: smoothed, or the raw mirrored position when
    /// interpolation is off.
    pub fn ball_position(&self, interpolation_enabled: bool) -> Option<Vector3<f32>> {
        self.bridge.latest_timestamp()?;
        if interpolation_enabled {
            self.bridge.rendered_position()
        } else {
            Some(self.bridge.ball().position())
        }
    }
}

impl Default for ClientGameState {
    fn default() -> Self {
        Self::new(
            BallConfig::default(),
            FieldGeometry::default(),
            InterpolatorConfig::default(),
        )
    }
}
