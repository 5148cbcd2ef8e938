//! The ball entity: replicated state, authority role and the per-tick pipeline.

use crate::collision::{self, CollisionEvent, FieldGeometry};
use crate::config::BallConfig;
use crate::diagnostics::LogThrottle;
use crate::events::{BallEvent, BallId, PossessorId};
use crate::physics;
use crate::possession::PossessorLookup;
use log::{debug, info};
use nalgebra::Vector3;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum BallPhase {
    #[default]
    Loose,
    Possessed,
    InFlight,
    OutOfBounds,
}

impl BallPhase {
    /// Phases in which physics runs and the ball may be picked up.
    pub fn is_free(self) -> bool {
        matches!(self, BallPhase::Loose | BallPhase::InFlight)
    }
}

/// Full simulation state of one ball.
///
/// `phase == Possessed` holds exactly when `possessor` is set.
#[derive(Debug, Clone, PartialEq)]
pub struct BallState {
    pub phase: BallPhase,
    pub position: Vector3<f32>,
    pub linear_velocity: Vector3<f32>,
    /// Visual spin only.
    pub angular_velocity: Vector3<f32>,
    pub grounded: bool,
    pub possessor: Option<PossessorId>,
    pub last_kicker: Option<PossessorId>,
    pub possession_cooldown: f32,
    pub last_kicker_cooldown: f32,
    pub radius: f32,
}

impl BallState {
    /// A loose ball at rest at `position`.
    pub fn new(position: Vector3<f32>, radius: f32) -> Self {
        Self {
            phase: BallPhase::Loose,
            position,
            linear_velocity: Vector3::zeros(),
            angular_velocity: Vector3::zeros(),
            grounded: true,
            possessor: None,
            last_kicker: None,
            possession_cooldown: 0.0,
            last_kicker_cooldown: 0.0,
            radius,
        }
    }

    pub fn speed_squared(&self) -> f32 {
        self.linear_velocity.norm_squared()
    }
}

/// Which side of the network this ball instance lives on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// The single process allowed to mutate ball state.
    Authority,
    /// A read-only mirror rebuilt from snapshots.
    Observer,
}

pub struct Ball {
    pub(crate) id: BallId,
    pub(crate) role: Role,
    pub(crate) state: BallState,
    pub(crate) config: BallConfig,
    pub(crate) field: FieldGeometry,
    pub(crate) events: Vec<BallEvent>,
    pub(crate) acquired_this_tick: bool,
    pub(crate) throttle: LogThrottle,
}

impl Ball {
    /// Spawns a loose ball resting on the centre spot.
    pub fn new(id: BallId, role: Role, config: BallConfig, field: FieldGeometry) -> Self {
        let state = BallState::new(field.centre_spot(config.radius), config.radius);
        info!("Spawned ball {} ({:?}) at {:?}", id, role, state.position);
        Self {
            id,
            role,
            state,
            config,
            field,
            events: Vec::new(),
            acquired_this_tick: false,
            throttle: LogThrottle::default(),
        }
    }

    pub fn id(&self) -> BallId {
        self.id
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn is_authority(&self) -> bool {
        self.role == Role::Authority
    }

    pub fn state(&self) -> &BallState {
        &self.state
    }

    pub fn config(&self) -> &BallConfig {
        &self.config
    }

    pub fn field(&self) -> &FieldGeometry {
        &self.field
    }

    pub fn phase(&self) -> BallPhase {
        self.state.phase
    }

    pub fn position(&self) -> Vector3<f32> {
        self.state.position
    }

    pub fn is_loose(&self) -> bool {
        self.state.phase == BallPhase::Loose
    }

    pub fn is_possessed(&self) -> bool {
        self.state.phase == BallPhase::Possessed
    }

    pub fn is_in_flight(&self) -> bool {
        self.state.phase == BallPhase::InFlight
    }

    pub fn is_out_of_bounds(&self) -> bool {
        self.state.phase == BallPhase::OutOfBounds
    }

    pub fn possessor(&self) -> Option<PossessorId> {
        self.state.possessor
    }

    /// Takes the events accumulated since the last drain.
    pub fn drain_events(&mut self) -> Vec<BallEvent> {
        std::mem::take(&mut self.events)
    }

    /// Runs one authoritative tick: Integrate → Resolve Collisions → Arbitrate Possession.
    ///
    /// Acquisitions made between two ticks (input handling) count toward the
    /// following tick. No-op on observers.
    pub fn tick<L: PossessorLookup>(&mut self, dt: f32, possessors: &mut L) {
        if !self.is_authority() {
            return;
        }

        self.state.possession_cooldown = (self.state.possession_cooldown - dt).max(0.0);
        self.state.last_kicker_cooldown = (self.state.last_kicker_cooldown - dt).max(0.0);

        match self.state.phase {
            BallPhase::Possessed => self.follow_possessor(possessors),
            BallPhase::Loose | BallPhase::InFlight => {
                let at_rest = physics::integrate(&mut self.state, &self.config, dt);
                if at_rest && self.state.phase == BallPhase::InFlight {
                    self.set_phase(BallPhase::Loose);
                }

                let outcome = collision::resolve(&mut self.state, &self.config, &self.field);
                for event in outcome.events {
                    self.apply_collision_event(event);
                }

                if self.state.phase.is_free() {
                    self.discover_possessor(possessors);
                }
            }
            BallPhase::OutOfBounds => {}
        }

        self.acquired_this_tick = false;
    }

    fn apply_collision_event(&mut self, event: CollisionEvent) {
        match event {
            CollisionEvent::BallOutOfBounds => {
                info!("Ball {} out of bounds at {:?}", self.id, self.state.position);
                self.events.push(BallEvent::BallOutOfBounds { ball: self.id });
            }
            CollisionEvent::GoalScored(team) => {
                info!(
                    "Ball {} crossed the goal line, goal for {:?} (last kicker {:?})",
                    self.id, team, self.state.last_kicker
                );
                self.events.push(BallEvent::GoalScored {
                    ball: self.id,
                    scoring_team: team,
                    last_kicker: self.state.last_kicker,
                });
            }
        }
        self.set_phase(BallPhase::OutOfBounds);
    }

    /// Changes phase and emits `BallStateChanged` if it differs.
    ///
    /// Entering `Possessed` without a possessor (or leaving it with one) is a
    /// programming error: it asserts in debug builds and is ignored in release.
    pub(crate) fn set_phase(&mut self, phase: BallPhase) {
        let consistent = (phase == BallPhase::Possessed) == self.state.possessor.is_some();
        debug_assert!(
            consistent,
            "phase {:?} with possessor {:?}",
            phase, self.state.possessor
        );
        if !consistent || self.state.phase == phase {
            return;
        }

        debug!("Ball {} phase {:?} -> {:?}", self.id, self.state.phase, phase);
        self.state.phase = phase;
        self.events.push(BallEvent::BallStateChanged {
            ball: self.id,
            phase,
        });
    }

    /// True if a ball at `position` sits on the ground plane.
    pub(crate) fn rests_on_ground(&self, position: &Vector3<f32>) -> bool {
        position.z <= self.field.rest_height(self.state.radius) + 0.5
    }
}
