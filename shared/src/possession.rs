//! Possession arbitration: who may hold the ball, and the acquire / release /
//! kick / reset transitions.
//!
//! Every acquisition, whether it comes from the periodic discovery scan or from
//! an overlap notification, goes through [`Ball::can_be_picked_up_by`] and
//! [`Ball::acquire`]. All mutating entry points silently do nothing on an
//! observer.

use crate::ball::{Ball, BallPhase};
use crate::config::DribbleOffset;
use crate::events::{BallEvent, BallId, PossessorId};
use log::{debug, info, warn};
use nalgebra::Vector3;
use std::collections::HashMap;

/// An entity able to hold the ball. The ball never owns it.
pub trait Possessor {
    fn id(&self) -> PossessorId;
    fn position(&self) -> Vector3<f32>;
    /// Facing angle around Z, radians.
    fn orientation(&self) -> f32;
    fn set_has_ball(&mut self, has_ball: bool);
    fn set_possessed_ball(&mut self, ball: Option<BallId>);
}

/// Resolves possessor ids to live entities; consulted on every use so the ball
/// never keeps a reference to a despawned possessor.
pub trait PossessorLookup {
    type Entity: Possessor;

    fn get(&self, id: PossessorId) -> Option<&Self::Entity>;
    fn get_mut(&mut self, id: PossessorId) -> Option<&mut Self::Entity>;
    fn ids(&self) -> Vec<PossessorId>;
}

impl<P: Possessor> PossessorLookup for HashMap<PossessorId, P> {
    type Entity = P;

    fn get(&self, id: PossessorId) -> Option<&P> {
        HashMap::get(self, &id)
    }

    fn get_mut(&mut self, id: PossessorId) -> Option<&mut P> {
        HashMap::get_mut(self, &id)
    }

    fn ids(&self) -> Vec<PossessorId> {
        self.keys().copied().collect()
    }
}

/// World position of a ball held by a possessor at `origin` facing `yaw`.
///
/// Shared by the authority and by observers following a possessor locally.
pub fn dribble_position(origin: Vector3<f32>, yaw: f32, offset: &DribbleOffset) -> Vector3<f32> {
    let forward = Vector3::new(yaw.cos(), yaw.sin(), 0.0);
    origin + forward * offset.forward + Vector3::z() * offset.up
}

impl Ball {
    /// Whether `possessor` may acquire the ball right now.
    pub fn can_be_picked_up_by(&self, possessor: PossessorId) -> bool {
        let state = &self.state;
        if state.possessor.is_some() || state.phase == BallPhase::OutOfBounds {
            return false;
        }
        if state.possession_cooldown > 0.0 {
            return false;
        }
        !(state.last_kicker == Some(possessor) && state.last_kicker_cooldown > 0.0)
    }

    /// Attempts to give the ball to `id`. Returns false, leaving state untouched,
    /// if the guard fails, the possessor is unknown, another acquisition already
    /// happened this tick, or this is an observer.
    pub fn acquire<L: PossessorLookup>(&mut self, id: PossessorId, possessors: &mut L) -> bool {
        if !self.is_authority() || self.acquired_this_tick || !self.can_be_picked_up_by(id) {
            return false;
        }
        if possessors.get(id).is_none() {
            return false;
        }

        self.attach(id, possessors);
        self.set_phase(BallPhase::Possessed);
        info!("Possessor {} acquired ball {}", id, self.id);
        true
    }

    /// Entry point for a possessor's pickup volume overlapping the ball.
    pub fn on_pickup_overlap<L: PossessorLookup>(
        &mut self,
        id: PossessorId,
        possessors: &mut L,
    ) -> bool {
        self.acquire(id, possessors)
    }

    /// Scans for a possessor within pickup range, nearest first, and acquires
    /// for the first one that passes the guard.
    pub fn discover_possessor<L: PossessorLookup>(
        &mut self,
        possessors: &mut L,
    ) -> Option<PossessorId> {
        if self.state.possessor.is_some() || !self.state.phase.is_free() {
            return None;
        }

        let range_sq = self.config.pickup_radius * self.config.pickup_radius;
        let mut candidates: Vec<(f32, PossessorId)> = possessors
            .ids()
            .into_iter()
            .filter_map(|id| {
                let possessor = possessors.get(id)?;
                let distance_sq = (possessor.position() - self.state.position).norm_squared();
                (distance_sq <= range_sq).then_some((distance_sq, id))
            })
            .collect();
        candidates.sort_by(|a, b| a.0.total_cmp(&b.0).then(a.1.cmp(&b.1)));

        candidates
            .into_iter()
            .map(|(_, id)| id)
            .find(|&id| self.acquire(id, possessors))
    }

    /// Drops the ball at the holder's feet. No-op unless possessed, in which
    /// case the cooldown is left as is.
    pub fn release<L: PossessorLookup>(&mut self, possessors: &mut L) -> bool {
        if !self.is_authority() {
            return false;
        }
        let Some(old) = self.state.possessor else {
            return false;
        };

        self.detach(old, possessors);
        self.state.possession_cooldown = self.config.possession_cooldown;
        self.state.grounded = self.rests_on_ground(&self.state.position);
        self.set_phase(BallPhase::Loose);
        info!("Possessor {} released ball {}", old, self.id);
        true
    }

    /// Strikes the held ball. Possession is released first (recording the
    /// kicker), then the impulse is applied and the ball goes `InFlight`.
    pub fn kick<L: PossessorLookup>(
        &mut self,
        direction: Vector3<f32>,
        power: f32,
        add_height: bool,
        possessors: &mut L,
    ) -> bool {
        if !self.is_authority() {
            return false;
        }
        let Some(kicker) = self.state.possessor else {
            if self.throttle.ready() {
                warn!("Ignoring kick on ball {}: not possessed", self.id);
            }
            return false;
        };

        let direction = direction.try_normalize(f32::EPSILON).unwrap_or_else(|| {
            let yaw = possessors.get(kicker).map_or(0.0, |p| p.orientation());
            Vector3::new(yaw.cos(), yaw.sin(), 0.0)
        });

        self.state.last_kicker = Some(kicker);
        self.state.last_kicker_cooldown = self.config.last_kicker_cooldown;
        self.detach(kicker, possessors);
        self.state.possession_cooldown = self.config.possession_cooldown;

        let mut velocity = direction * power;
        if add_height {
            velocity.z += self.config.lob_factor * power;
        }
        self.state.linear_velocity = velocity;
        self.state.angular_velocity = Vector3::z().cross(&direction) * (power * self.config.spin_scale);
        self.state.grounded = false;
        self.set_phase(BallPhase::InFlight);

        info!(
            "Possessor {} kicked ball {} with power {:.0}{}",
            kicker,
            self.id,
            power,
            if add_height { " (lofted)" } else { "" }
        );
        true
    }

    /// Hands the ball from its current holder straight to `id` (a successful
    /// tackle). Bypasses the possession cooldown without touching it.
    pub fn force_transfer<L: PossessorLookup>(
        &mut self,
        id: PossessorId,
        possessors: &mut L,
    ) -> bool {
        if !self.is_authority() || self.acquired_this_tick {
            return false;
        }
        let Some(old) = self.state.possessor else {
            return false;
        };
        if old == id || possessors.get(id).is_none() {
            return false;
        }

        self.attach(id, possessors);
        info!("Ball {} taken from {} by {}", self.id, old, id);
        true
    }

    /// Places the ball at `position`, loose and at rest, releasing any holder.
    /// Issued by the match layer on kickoff and after a stoppage.
    pub fn reset<L: PossessorLookup>(&mut self, position: Vector3<f32>, possessors: &mut L) {
        if !self.is_authority() {
            return;
        }

        if let Some(old) = self.state.possessor {
            self.detach(old, possessors);
            self.state.possession_cooldown = self.config.possession_cooldown;
        }

        let floor = self.field.rest_height(self.state.radius);
        self.state.position = Vector3::new(position.x, position.y, position.z.max(floor));
        self.state.linear_velocity = Vector3::zeros();
        self.state.angular_velocity = Vector3::zeros();
        self.state.grounded = self.rests_on_ground(&self.state.position);
        self.set_phase(BallPhase::Loose);
        info!("Ball {} reset to {:?}", self.id, self.state.position);
    }

    /// Releases the ball if `id` held it; called when a possessor despawns.
    pub fn on_possessor_removed(&mut self, id: PossessorId) {
        if !self.is_authority() || self.state.possessor != Some(id) {
            return;
        }
        self.drop_dangling(id);
    }

    /// Keeps a held ball at its possessor's dribble point, or releases it if the
    /// possessor no longer exists.
    pub(crate) fn follow_possessor<L: PossessorLookup>(&mut self, possessors: &L) {
        let Some(id) = self.state.possessor else {
            return;
        };
        match possessors.get(id) {
            Some(possessor) => {
                self.state.position = dribble_position(
                    possessor.position(),
                    possessor.orientation(),
                    &self.config.dribble_offset,
                );
            }
            None => self.drop_dangling(id),
        }
    }

    fn drop_dangling(&mut self, id: PossessorId) {
        warn!("Possessor {} of ball {} is gone, releasing", id, self.id);
        self.state.possessor = None;
        self.state.possession_cooldown = self.config.possession_cooldown;
        self.state.grounded = self.rests_on_ground(&self.state.position);
        self.events.push(BallEvent::PossessionChanged {
            ball: self.id,
            old: Some(id),
            new: None,
        });
        self.set_phase(BallPhase::Loose);
    }

    /// Makes `id` the holder, updating both possessors in lockstep.
    fn attach<L: PossessorLookup>(&mut self, id: PossessorId, possessors: &mut L) {
        let old = self.state.possessor;
        if let Some(previous) = old.filter(|&previous| previous != id) {
            if let Some(possessor) = possessors.get_mut(previous) {
                possessor.set_has_ball(false);
                possessor.set_possessed_ball(None);
            }
        }

        let Some(possessor) = possessors.get_mut(id) else {
            return;
        };
        possessor.set_has_ball(true);
        possessor.set_possessed_ball(Some(self.id));
        let holder_position = possessor.position();
        let holder_yaw = possessor.orientation();

        self.state.possessor = Some(id);
        self.state.linear_velocity = Vector3::zeros();
        self.state.angular_velocity = Vector3::zeros();
        self.state.grounded = true;
        self.state.position =
            dribble_position(holder_position, holder_yaw, &self.config.dribble_offset);
        self.acquired_this_tick = true;

        self.events.push(BallEvent::PossessionChanged {
            ball: self.id,
            old,
            new: Some(id),
        });
    }

    /// Clears the holder, updating the possessor in lockstep.
    fn detach<L: PossessorLookup>(&mut self, id: PossessorId, possessors: &mut L) {
        if let Some(possessor) = possessors.get_mut(id) {
            possessor.set_has_ball(false);
            possessor.set_possessed_ball(None);
        } else {
            debug!("Detaching unknown possessor {} from ball {}", id, self.id);
        }
        self.state.possessor = None;
        self.events.push(BallEvent::PossessionChanged {
            ball: self.id,
            old: Some(id),
            new: None,
        });
    }
}
