//! Notifications the ball emits for the match layer and other observers.

use crate::ball::BallPhase;
use serde::{Deserialize, Serialize};

/// Stable identifier of an entity able to hold the ball (the owning client's id).
pub type PossessorId = u32;

/// Identifier of a ball within a match.
pub type BallId = u32;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Team {
    TeamA,
    TeamB,
}

impl Team {
    pub fn opponent(self) -> Team {
        match self {
            Team::TeamA => Team::TeamB,
            Team::TeamB => Team::TeamA,
        }
    }
}

/// Events produced by the ball during a tick or an arbitration call.
///
/// The authority drains these once per tick and forwards them over the reliable
/// channel; observers derive `PossessionChanged` and `BallStateChanged` from
/// snapshot diffs as well.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum BallEvent {
    PossessionChanged {
        ball: BallId,
        old: Option<PossessorId>,
        new: Option<PossessorId>,
    },
    BallStateChanged {
        ball: BallId,
        phase: BallPhase,
    },
    BallOutOfBounds {
        ball: BallId,
    },
    GoalScored {
        ball: BallId,
        scoring_team: Team,
        /// Last entity to kick the ball, for assist / own-goal attribution.
        last_kicker: Option<PossessorId>,
    },
}

impl BallEvent {
    pub fn ball(&self) -> BallId {
        match *self {
            BallEvent::PossessionChanged { ball, .. }
            | BallEvent::BallStateChanged { ball, .. }
            | BallEvent::BallOutOfBounds { ball }
            | BallEvent::GoalScored { ball, .. } => ball,
        }
    }

    /// True for events that only the authority can observe directly and that
    /// cannot be reconstructed from a snapshot diff.
    pub fn is_gameplay_event(&self) -> bool {
        matches!(
            self,
            BallEvent::BallOutOfBounds { .. } | BallEvent::GoalScored { .. }
        )
    }
}
