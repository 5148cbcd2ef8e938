use crate::ball::BallPhase;
use crate::config::DribbleOffset;
use crate::events::PossessorId;
use crate::possession::{dribble_position, Possessor, PossessorLookup};
use nalgebra::Vector3;
use std::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct InterpolatorConfig {
    /// Fraction of the remaining distance closed per second.
    pub interp_speed: f32,
    /// Discard snapshots older than the current target instead of applying the
    /// latest received one.
    pub reject_out_of_order: bool,
}

impl Default for InterpolatorConfig {
    fn default() -> Self {
        Self {
            interp_speed: 15.0,
            reject_out_of_order: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct InterpolationTarget {
    pub position: Vector3<f32>,
    pub velocity: Vector3<f32>,
    pub phase: BallPhase,
    pub possessor: Option<PossessorId>,
    pub server_timestamp: u64,
    /// Local clock at arrival.
    pub received_at: Instant,
}

/// Smooths the rendered ball position toward the latest server snapshot.
///
/// While the ball is possessed it is instead pinned to the dribble point of the
/// locally known possessor, so it never trails a predicted player.
#[derive(Debug, Clone)]
pub struct ClientInterpolator {
    config: InterpolatorConfig,
    rendered: Option<Vector3<f32>>,
    target: Option<InterpolationTarget>,
}

impl ClientInterpolator {
    pub fn new(config: InterpolatorConfig) -> Self {
        Self {
            config,
            rendered: None,
            target: None,
        }
    }

    pub fn config(&self) -> &InterpolatorConfig {
        &self.config
    }

    /// Replaces the target. Only the very first target is snapped to.
    pub fn set_target(&mut self, target: InterpolationTarget) {
        if self.rendered.is_none() {
            self.rendered = Some(target.position);
        }
        self.target = Some(target);
    }

    /// Updates the phase/possessor pair of the current target without moving it.
    pub fn set_possession(&mut self, phase: BallPhase, possessor: Option<PossessorId>) {
        if let Some(target) = self.target.as_mut() {
            target.phase = phase;
            target.possessor = possessor;
        }
    }

    /// Advances the rendered position by `dt` seconds and returns it.
    pub fn update<L: PossessorLookup>(
        &mut self,
        dt: f32,
        possessors: &L,
        offset: &DribbleOffset,
    ) -> Option<Vector3<f32>> {
        let target = self.target?;
        let rendered = self.rendered.get_or_insert(target.position);

        let holder = match (target.phase, target.possessor) {
            (BallPhase::Possessed, Some(id)) => possessors.get(id),
            _ => None,
        };

        *rendered = match holder {
            Some(possessor) => dribble_position(possessor.position(), possessor.orientation(), offset),
            None => {
                let alpha = (self.config.interp_speed * dt).clamp(0.0, 1.0);
                *rendered + (target.position - *rendered) * alpha
            }
        };
        Some(*rendered)
    }

    pub fn rendered_position(&self) -> Option<Vector3<f32>> {
        self.rendered
    }

    pub fn target(&self) -> Option<&InterpolationTarget> {
        self.target.as_ref()
    }
}

impl Default for ClientInterpolator {
    fn default() -> Self {
        Self::new(InterpolatorConfig::default())
    }
}
