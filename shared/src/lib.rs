//! Shared ball simulation, replication and wire protocol for the server and client.
//!
//! The server owns the only authoritative [`Ball`]; clients mirror it through an
//! [`ObserverBridge`] and render it with a [`ClientInterpolator`].

pub mod ball;
pub mod codec;
pub mod collision;
pub mod config;
pub mod diagnostics;
pub mod events;
pub mod interpolation;
pub mod physics;
pub mod player;
pub mod possession;
pub mod reliable;
pub mod replication;

pub use ball::{Ball, BallPhase, BallState, Role};
pub use codec::{decode_packet, encode_packet, CodecError, MAX_DATAGRAM_SIZE};
pub use collision::{FieldGeometry, GoalEnd};
pub use config::{BallConfig, DribbleOffset};
pub use diagnostics::LogThrottle;
pub use events::{BallEvent, BallId, PossessorId, Team};
pub use interpolation::{ClientInterpolator, InterpolatorConfig};
pub use player::Player;
pub use possession::{dribble_position, Possessor, PossessorLookup};
pub use reliable::{ReliableReceiver, ReliableSender};
pub use replication::{ObserverBridge, ReliableBallEvent, ReplicationSnapshot, SendCadence};

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::{SystemTime, UNIX_EPOCH};

pub const PLAYER_SPEED: f32 = 600.0;
pub const PLAYER_RADIUS: f32 = 40.0;
pub const KICK_POWER: f32 = 1800.0;
/// A tackle within this distance of the holder takes the ball outright.
pub const STEAL_RADIUS: f32 = 60.0;
pub const CLIENT_VERSION: u32 = 1;
/// The match has a single ball.
pub const MATCH_BALL_ID: BallId = 1;

#[derive(Debug, Serialize, Deserialize, Clone)]
pub enum Packet {
    Connect {
        client_version: u32,
    },
    Input {
        sequence: u32,
        timestamp: u64,
        move_x: f32,
        move_y: f32,
        kick: bool,
        lob: bool,
        tackle: bool,
    },
    /// Acknowledges a reliable `BallEvent` by sequence number.
    Ack {
        sequence: u32,
    },
    Disconnect,

    Connected {
        client_id: u32,
        team: Team,
    },
    GameState {
        tick: u32,
        timestamp: u64,
        last_processed_input: HashMap<u32, u32>,
        players: Vec<Player>,
        ball: ReplicationSnapshot,
    },
    BallEvent {
        sequence: u32,
        event: ReliableBallEvent,
    },
    Disconnected {
        reason: String,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct InputState {
    pub sequence: u32,
    pub timestamp: u64,
    pub move_x: f32,
    pub move_y: f32,
    pub kick: bool,
    pub lob: bool,
    pub tackle: bool,
}

/// Clamps a movement axis to `-1.0..=1.0`. Non-finite values read as no input.
pub fn sanitize_axis(value: f32) -> f32 {
    if value.is_finite() {
        value.clamp(-1.0, 1.0)
    } else {
        0.0
    }
}

impl InputState {
    pub fn to_packet(&self) -> Packet {
        Packet::Input {
            sequence: self.sequence,
            timestamp: self.timestamp,
            move_x: self.move_x,
            move_y: self.move_y,
            kick: self.kick,
            lob: self.lob,
            tackle: self.tackle,
        }
    }
}

/// Milliseconds since the Unix epoch.
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
