//! Authority → observer replication.
//!
//! The authority emits a [`ReplicationSnapshot`] at a fixed cadence over the
//! unreliable channel and every [`BallEvent`] over the reliable one. Observers
//! rebuild a read-only [`Ball`] from both and derive change notifications by
//! diffing what they had against what arrived.

use crate::ball::{Ball, BallPhase, Role};
use crate::collision::FieldGeometry;
use crate::config::BallConfig;
use crate::events::{BallEvent, BallId, PossessorId};
use crate::interpolation::{ClientInterpolator, InterpolationTarget, InterpolatorConfig};
use crate::possession::PossessorLookup;
use log::{debug, trace};
use nalgebra::Vector3;
use serde::{Deserialize, Serialize};
use std::time::Instant;

pub const DEFAULT_SNAPSHOT_RATE: u32 = 60;
pub const MIN_SNAPSHOT_RATE: u32 = 30;
pub const MAX_SNAPSHOT_RATE: u32 = 240;

/// Networked fields of one ball at one server instant.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ReplicationSnapshot {
    pub ball: BallId,
    pub position: Vector3<f32>,
    pub linear_velocity: Vector3<f32>,
    pub phase: BallPhase,
    pub possessor: Option<PossessorId>,
    /// Milliseconds since the Unix epoch on the authority.
    pub server_timestamp: u64,
}

/// A ball event as sent on the reliable channel, stamped with the authoritative
/// phase/possessor pair at the end of the tick that produced it.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ReliableBallEvent {
    pub server_timestamp: u64,
    pub phase: BallPhase,
    pub possessor: Option<PossessorId>,
    pub event: BallEvent,
}

impl Ball {
    pub fn snapshot(&self, server_timestamp: u64) -> ReplicationSnapshot {
        ReplicationSnapshot {
            ball: self.id,
            position: self.state.position,
            linear_velocity: self.state.linear_velocity,
            phase: self.state.phase,
            possessor: self.state.possessor,
            server_timestamp,
        }
    }

    /// Wraps `event` for the reliable channel with this ball's current pair.
    pub fn reliable_event(&self, event: BallEvent, server_timestamp: u64) -> ReliableBallEvent {
        ReliableBallEvent {
            server_timestamp,
            phase: self.state.phase,
            possessor: self.state.possessor,
            event,
        }
    }

    /// Overwrites the mirrored pose of an observer ball.
    fn mirror_motion(&mut self, position: Vector3<f32>, velocity: Vector3<f32>) {
        self.state.position = position;
        self.state.linear_velocity = velocity;
        self.state.grounded = self.rests_on_ground(&position);
    }

    fn mirror_possession(&mut self, phase: BallPhase, possessor: Option<PossessorId>) {
        self.state.phase = phase;
        self.state.possessor = possessor;
    }
}

/// Change events between two phase/possessor pairs, possession first.
fn diff_pair(
    ball: BallId,
    old: (BallPhase, Option<PossessorId>),
    new: (BallPhase, Option<PossessorId>),
) -> Vec<BallEvent> {
    let mut events = Vec::new();
    if old.1 != new.1 {
        events.push(BallEvent::PossessionChanged {
            ball,
            old: old.1,
            new: new.1,
        });
    }
    if old.0 != new.0 {
        events.push(BallEvent::BallStateChanged { ball, phase: new.0 });
    }
    events
}

/// Events implied by going from `previous` to `current`. With no previous
/// snapshot the baseline is a freshly spawned loose ball.
pub fn diff_snapshots(
    previous: Option<&ReplicationSnapshot>,
    current: &ReplicationSnapshot,
) -> Vec<BallEvent> {
    let old = previous.map_or((BallPhase::Loose, None), |s| (s.phase, s.possessor));
    diff_pair(current.ball, old, (current.phase, current.possessor))
}

/// Fixed-rate gate deciding on which simulation ticks a snapshot goes out.
#[derive(Debug, Clone)]
pub struct SendCadence {
    interval: f32,
    accumulator: f32,
}

impl SendCadence {
    /// `rate_hz` is clamped to `MIN_SNAPSHOT_RATE..=MAX_SNAPSHOT_RATE`.
    pub fn new(rate_hz: u32) -> Self {
        let rate = rate_hz.clamp(MIN_SNAPSHOT_RATE, MAX_SNAPSHOT_RATE);
        Self {
            interval: 1.0 / rate as f32,
            accumulator: 0.0,
        }
    }

    pub fn interval(&self) -> f32 {
        self.interval
    }

    /// Accounts for `dt` seconds and returns true if a snapshot is due. A
    /// backlog of missed sends is dropped rather than burst out.
    pub fn advance(&mut self, dt: f32) -> bool {
        self.accumulator += dt;
        if self.accumulator + 1e-6 < self.interval {
            return false;
        }
        self.accumulator -= self.interval;
        if self.accumulator + 1e-6 >= self.interval {
            self.accumulator = 0.0;
        }
        true
    }
}

impl Default for SendCadence {
    fn default() -> Self {
        Self::new(DEFAULT_SNAPSHOT_RATE)
    }
}

/// Observer end of the replication channel for one ball.
pub struct ObserverBridge {
    ball: Ball,
    interpolator: ClientInterpolator,
    latest_timestamp: Option<u64>,
    rejected_snapshots: u64,
}

impl ObserverBridge {
    pub fn new(
        ball: BallId,
        config: BallConfig,
        field: FieldGeometry,
        interpolator: InterpolatorConfig,
    ) -> Self {
        Self {
            ball: Ball::new(ball, Role::Observer, config, field),
            interpolator: ClientInterpolator::new(interpolator),
            latest_timestamp: None,
            rejected_snapshots: 0,
        }
    }

    /// Read-only mirror of the authoritative ball.
    pub fn ball(&self) -> &Ball {
        &self.ball
    }

    pub fn interpolator(&self) -> &ClientInterpolator {
        &self.interpolator
    }

    pub fn latest_timestamp(&self) -> Option<u64> {
        self.latest_timestamp
    }

    pub fn rejected_snapshots(&self) -> u64 {
        self.rejected_snapshots
    }

    fn is_stale(&self, server_timestamp: u64) -> bool {
        self.latest_timestamp.is_some_and(|latest| server_timestamp < latest)
    }

    fn current_pair(&self) -> (BallPhase, Option<PossessorId>) {
        (self.ball.phase(), self.ball.possessor())
    }

    /// Applies a snapshot and returns the change events it implies.
    ///
    /// Snapshots are last-write-wins unless the interpolator is configured to
    /// reject out-of-order ones, in which case an older snapshot is dropped.
    pub fn receive(&mut self, snapshot: ReplicationSnapshot, received_at: Instant) -> Vec<BallEvent> {
        if snapshot.ball != self.ball.id() {
            return Vec::new();
        }
        if self.interpolator.config().reject_out_of_order && self.is_stale(snapshot.server_timestamp) {
            self.rejected_snapshots += 1;
            trace!(
                "Dropping out-of-order snapshot {} (latest {:?})",
                snapshot.server_timestamp,
                self.latest_timestamp
            );
            return Vec::new();
        }

        let previous = self.ball.snapshot(self.latest_timestamp.unwrap_or_default());
        let events = diff_snapshots(Some(&previous), &snapshot);

        self.ball.mirror_motion(snapshot.position, snapshot.linear_velocity);
        self.ball.mirror_possession(snapshot.phase, snapshot.possessor);
        self.latest_timestamp = Some(
            self.latest_timestamp
                .map_or(snapshot.server_timestamp, |latest| latest.max(snapshot.server_timestamp)),
        );

        self.interpolator.set_target(InterpolationTarget {
            position: snapshot.position,
            velocity: snapshot.linear_velocity,
            phase: snapshot.phase,
            possessor: snapshot.possessor,
            server_timestamp: snapshot.server_timestamp,
            received_at,
        });
        events
    }

    /// Applies an event from the reliable channel.
    ///
    /// Goal and out-of-bounds events are always passed on. The carried
    /// phase/possessor pair is applied together, and only if it is not older
    /// than what is already mirrored; the returned events are its diff.
    pub fn receive_event(&mut self, reliable: ReliableBallEvent) -> Vec<BallEvent> {
        if reliable.event.ball() != self.ball.id() {
            return Vec::new();
        }

        let mut events = Vec::new();
        if reliable.event.is_gameplay_event() {
            events.push(reliable.event);
        }

        if self.is_stale(reliable.server_timestamp) {
            debug!(
                "Ignoring stale possession state from {} (latest {:?})",
                reliable.server_timestamp, self.latest_timestamp
            );
            return events;
        }

        let new = (reliable.phase, reliable.possessor);
        events.extend(diff_pair(self.ball.id(), self.current_pair(), new));
        self.ball.mirror_possession(reliable.phase, reliable.possessor);
        self.interpolator.set_possession(reliable.phase, reliable.possessor);
        self.latest_timestamp = Some(reliable.server_timestamp);
        events
    }

    /// Advances the rendered position; see [`ClientInterpolator::update`].
    pub fn update<L: PossessorLookup>(&mut self, dt: f32, possessors: &L) -> Option<Vector3<f32>> {
        let offset = self.ball.config().dribble_offset;
        self.interpolator.update(dt, possessors, &offset)
    }

    pub fn rendered_position(&self) -> Option<Vector3<f32>> {
        self.interpolator.rendered_position()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::player::Player;
    use std::collections::HashMap;

    fn snapshot(
        timestamp: u64,
        x: f32,
        phase: BallPhase,
        possessor: Option<PossessorId>,
    ) -> ReplicationSnapshot {
        ReplicationSnapshot {
            ball: 1,
            position: Vector3::new(x, 0.0, 11.0),
            linear_velocity: Vector3::zeros(),
            phase,
            possessor,
            server_timestamp: timestamp,
        }
    }

    fn bridge(reject_out_of_order: bool) -> ObserverBridge {
        ObserverBridge::new(
            1,
            BallConfig::default(),
            FieldGeometry::default(),
            InterpolatorConfig {
                reject_out_of_order,
                ..InterpolatorConfig::default()
            },
        )
    }

    #[test]
    fn test_snapshot_carries_replicated_fields() {
        let mut ball = Ball::new(3, Role::Authority, BallConfig::default(), FieldGeometry::default());
        ball.state.linear_velocity = Vector3::new(1.0, 2.0, 3.0);

        let snapshot = ball.snapshot(1234);

        assert_eq!(snapshot.ball, 3);
        assert_eq!(snapshot.position, ball.position());
        assert_eq!(snapshot.linear_velocity, Vector3::new(1.0, 2.0, 3.0));
        assert_eq!(snapshot.phase, BallPhase::Loose);
        assert_eq!(snapshot.possessor, None);
        assert_eq!(snapshot.server_timestamp, 1234);
    }

    #[test]
    fn test_diff_snapshots() {
        let loose = snapshot(1, 0.0, BallPhase::Loose, None);
        let held = snapshot(2, 0.0, BallPhase::Possessed, Some(5));

        assert!(diff_snapshots(None, &loose).is_empty());
        assert!(diff_snapshots(Some(&loose), &loose).is_empty());
        assert_eq!(
            diff_snapshots(Some(&loose), &held),
            vec![
                BallEvent::PossessionChanged {
                    ball: 1,
                    old: None,
                    new: Some(5)
                },
                BallEvent::BallStateChanged {
                    ball: 1,
                    phase: BallPhase::Possessed
                },
            ]
        );
    }

    #[test]
    fn test_cadence_at_tick_rate_sends_every_tick() {
        let mut cadence = SendCadence::new(60);
        assert!((0..10).all(|_| cadence.advance(1.0 / 60.0)));
    }

    #[test]
    fn test_cadence_halves_and_clamps() {
        let mut cadence = SendCadence::new(30);
        let sent = (0..60).filter(|_| cadence.advance(1.0 / 60.0)).count();
        assert_eq!(sent, 30);

        let clamped = SendCadence::new(5);
        assert_eq!(clamped.interval(), 1.0 / MIN_SNAPSHOT_RATE as f32);
    }

    #[test]
    fn test_cadence_drops_backlog() {
        let mut cadence = SendCadence::new(60);
        assert!(cadence.advance(0.5));
        assert!(!cadence.advance(0.001));
    }

    #[test]
    fn test_receive_derives_events_and_mirrors() {
        let mut bridge = bridge(false);
        let now = Instant::now();

        assert!(bridge.receive(snapshot(1, 10.0, BallPhase::Loose, None), now).is_empty());
        let events = bridge.receive(snapshot(2, 20.0, BallPhase::Possessed, Some(3)), now);

        assert_eq!(events.len(), 2);
        assert!(bridge.ball().is_possessed());
        assert_eq!(bridge.ball().possessor(), Some(3));
        assert_eq!(bridge.ball().position(), Vector3::new(20.0, 0.0, 11.0));
        assert_eq!(bridge.interpolator().target().map(|t| t.position.x), Some(20.0));
    }

    #[test]
    fn test_last_write_wins_by_default() {
        let mut bridge = bridge(false);
        let now = Instant::now();

        bridge.receive(snapshot(10, 20.0, BallPhase::Loose, None), now);
        bridge.receive(snapshot(5, 10.0, BallPhase::Loose, None), now);

        assert_eq!(bridge.ball().position().x, 10.0);
        assert_eq!(bridge.latest_timestamp(), Some(10));
    }

    #[test]
    fn test_out_of_order_rejected_when_configured() {
        let mut bridge = bridge(true);
        let now = Instant::now();

        bridge.receive(snapshot(10, 20.0, BallPhase::Loose, None), now);
        assert!(bridge
            .receive(snapshot(5, 10.0, BallPhase::Possessed, Some(1)), now)
            .is_empty());

        assert_eq!(bridge.ball().position().x, 20.0);
        assert!(bridge.ball().is_loose());
        assert_eq!(bridge.rejected_snapshots(), 1);
    }

    #[test]
    fn test_reliable_event_applies_pair_once() {
        let mut bridge = bridge(false);
        let now = Instant::now();
        bridge.receive(snapshot(1, 0.0, BallPhase::Loose, None), now);

        let acquired = ReliableBallEvent {
            server_timestamp: 2,
            phase: BallPhase::Possessed,
            possessor: Some(7),
            event: BallEvent::PossessionChanged {
                ball: 1,
                old: None,
                new: Some(7),
            },
        };
        assert_eq!(bridge.receive_event(acquired).len(), 2);
        assert!(bridge.receive_event(acquired).is_empty());

        // The snapshot of the same tick brings nothing new.
        assert!(bridge
            .receive(snapshot(2, 0.0, BallPhase::Possessed, Some(7)), now)
            .is_empty());
    }

    #[test]
    fn test_stale_reliable_event_only_passes_gameplay() {
        let mut bridge = bridge(false);
        let now = Instant::now();
        bridge.receive(snapshot(10, 0.0, BallPhase::Loose, None), now);

        let goal = BallEvent::GoalScored {
            ball: 1,
            scoring_team: crate::events::Team::TeamA,
            last_kicker: Some(2),
        };
        let events = bridge.receive_event(ReliableBallEvent {
            server_timestamp: 4,
            phase: BallPhase::OutOfBounds,
            possessor: None,
            event: goal,
        });

        assert_eq!(events, vec![goal]);
        assert!(bridge.ball().is_loose());
    }

    #[test]
    fn test_update_smooths_toward_new_target() {
        let mut bridge = bridge(false);
        let players: HashMap<u32, Player> = HashMap::new();
        let now = Instant::now();
        bridge.receive(snapshot(1, 10.0, BallPhase::Loose, None), now);
        bridge.receive(snapshot(2, 20.0, BallPhase::Loose, None), now);

        let position = bridge.update(1.0 / 60.0, &players).unwrap();

        assert!(position.x > 10.0 && position.x < 20.0);
    }
}
