//! Integration tests for the ball engine and its replication
//!
//! These tests exercise the shared crate the way the server and client use it:
//! an authoritative ball driven by players, and an observer rebuilt from what
//! goes over the wire.

use nalgebra::Vector3;
use shared::collision::{resolve, CollisionEvent};
use shared::interpolation::InterpolationTarget;
use shared::{
    decode_packet, encode_packet, Ball, BallConfig, BallEvent, BallPhase, BallState,
    ClientInterpolator, CodecError, FieldGeometry, InterpolatorConfig, ObserverBridge, Packet,
    InputState, Player, Role, Team, MATCH_BALL_ID,
};
use std::collections::HashMap;
use std::time::Instant;

const DT: f32 = 1.0 / 60.0;

fn authority() -> Ball {
    Ball::new(
        MATCH_BALL_ID,
        Role::Authority,
        BallConfig::default(),
        FieldGeometry::default(),
    )
}

/// Two opponents standing either side of the centre spot, both in pickup range.
fn two_players() -> HashMap<u32, Player> {
    let mut players = HashMap::new();
    let mut left = Player::new(1, Team::TeamA, Vector3::new(-40.0, 0.0, 0.0));
    left.yaw = 0.0;
    let mut right = Player::new(2, Team::TeamB, Vector3::new(60.0, 0.0, 0.0));
    right.yaw = std::f32::consts::PI;
    players.insert(1, left);
    players.insert(2, right);
    players
}

fn assert_phase_matches_possessor(ball: &Ball) {
    assert_eq!(
        ball.phase() == BallPhase::Possessed,
        ball.possessor().is_some(),
        "phase {:?} with possessor {:?}",
        ball.phase(),
        ball.possessor()
    );
}

/// POSSESSION ARBITRATION TESTS
mod possession_tests {
    use super::*;

    #[test]
    fn single_acquisition_per_tick() {
        let mut ball = authority();
        let mut players = two_players();

        assert!(ball.acquire(1, &mut players));
        assert!(!ball.acquire(2, &mut players));

        assert!(ball.is_possessed());
        assert_eq!(ball.possessor(), Some(1));
        assert!(players[&1].has_ball);
        assert!(!players[&2].has_ball);
        assert_phase_matches_possessor(&ball);

        assert_eq!(
            ball.drain_events(),
            vec![
                BallEvent::PossessionChanged {
                    ball: MATCH_BALL_ID,
                    old: None,
                    new: Some(1),
                },
                BallEvent::BallStateChanged {
                    ball: MATCH_BALL_ID,
                    phase: BallPhase::Possessed,
                },
            ]
        );
    }

    #[test]
    fn phase_and_possessor_stay_consistent_through_a_match() {
        let mut ball = authority();
        let mut players = two_players();

        for tick in 0..600 {
            if tick == 30 {
                ball.kick(Vector3::new(0.0, 1.0, 0.0), 900.0, true, &mut players);
            }
            if tick == 200 {
                ball.release(&mut players);
            }
            ball.tick(DT, &mut players);
            assert_phase_matches_possessor(&ball);
            for player in players.values() {
                assert_eq!(player.has_ball, ball.possessor() == Some(player.id));
            }
        }
    }

    #[test]
    fn release_is_idempotent() {
        let mut ball = authority();
        let mut players = two_players();
        ball.acquire(1, &mut players);
        ball.drain_events();

        assert!(ball.release(&mut players));
        let first = ball.drain_events();
        assert!(!ball.release(&mut players));

        assert!(ball.is_loose());
        assert_eq!(first.len(), 2);
        assert!(ball.drain_events().is_empty());
        assert!(!players[&1].has_ball);
    }

    #[test]
    fn kick_launches_ball_along_direction() {
        let power = 1200.0;
        let mut ball = authority();
        let mut players = two_players();
        ball.acquire(1, &mut players);

        assert!(ball.kick(Vector3::new(1.0, 0.0, 0.0), power, false, &mut players));

        assert!(ball.is_in_flight());
        assert_eq!(ball.possessor(), None);
        assert_eq!(ball.state().last_kicker, Some(1));
        assert_eq!(ball.state().linear_velocity, Vector3::new(power, 0.0, 0.0));
        assert!(!players[&1].has_ball);
    }

    #[test]
    fn kicker_waits_out_cooldown_while_others_pick_up() {
        let mut ball = authority();
        let mut players = two_players();
        ball.acquire(1, &mut players);
        ball.tick(DT, &mut players);

        // A dead kick leaves the ball between both players.
        ball.kick(Vector3::new(1.0, 0.0, 0.0), 0.0, false, &mut players);

        for _ in 0..6 {
            ball.tick(DT, &mut players);
        }
        assert_eq!(ball.possessor(), None);

        for _ in 0..30 {
            ball.tick(DT, &mut players);
        }
        assert_eq!(ball.possessor(), Some(2));
        assert!(players[&2].has_ball);
    }

    #[test]
    fn tackle_transfers_without_cooldown() {
        let mut ball = authority();
        let mut players = two_players();
        ball.acquire(1, &mut players);
        ball.tick(DT, &mut players);

        assert!(ball.force_transfer(2, &mut players));

        assert_eq!(ball.possessor(), Some(2));
        assert!(!players[&1].has_ball);
        assert!(players[&2].has_ball);
        assert_eq!(players[&2].possessed_ball, Some(MATCH_BALL_ID));
        assert_phase_matches_possessor(&ball);
    }
}

/// COLLISION RESOLUTION TESTS
mod collision_tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;

    fn falling_ball(position: Vector3<f32>, vertical_speed: f32) -> BallState {
        let mut state = BallState::new(position, 11.0);
        state.grounded = false;
        state.linear_velocity.z = vertical_speed;
        state
    }

    #[test]
    fn fast_landing_bounces() {
        let config = BallConfig::default();
        let field = FieldGeometry::default();
        let mut state = falling_ball(Vector3::new(0.0, 0.0, 11.0), -60.0);

        let outcome = resolve(&mut state, &config, &field);

        assert!(outcome.bounced);
        assert_approx_eq!(state.linear_velocity.z, 36.0, 1e-4);
        assert!(!state.grounded);
    }

    #[test]
    fn slow_landing_settles() {
        let config = BallConfig::default();
        let field = FieldGeometry::default();
        let mut state = falling_ball(Vector3::new(0.0, 0.0, 10.0), -30.0);

        let outcome = resolve(&mut state, &config, &field);

        assert!(!outcome.bounced);
        assert_eq!(state.linear_velocity.z, 0.0);
        assert_eq!(state.position.z, 11.0);
        assert!(state.grounded);
    }

    #[test]
    fn ball_under_the_bar_is_a_goal_for_the_attackers() {
        let config = BallConfig::default();
        let field = FieldGeometry::default();
        let mut state = falling_ball(
            Vector3::new(0.0, field.half_length + 1.0, field.goal_height - 10.0),
            0.0,
        );
        state.linear_velocity.y = 800.0;

        let outcome = resolve(&mut state, &config, &field);

        assert_eq!(outcome.events, vec![CollisionEvent::GoalScored(Team::TeamB)]);
        assert_eq!(state.linear_velocity, Vector3::zeros());
    }

    #[test]
    fn ball_wide_of_the_post_is_out_of_bounds() {
        let config = BallConfig::default();
        let field = FieldGeometry::default();
        let mut state = BallState::new(
            Vector3::new(field.goal_half_width + 50.0, field.half_length + 1.0, 11.0),
            11.0,
        );

        let outcome = resolve(&mut state, &config, &field);

        assert_eq!(outcome.events, vec![CollisionEvent::BallOutOfBounds]);
    }

    #[test]
    fn long_shot_ends_in_goal_event() {
        let mut ball = authority();
        let mut shooter = Player::new(9, Team::TeamB, Vector3::new(0.0, 4800.0, 0.0));
        shooter.yaw = std::f32::consts::FRAC_PI_2;
        let mut players = HashMap::from([(9, shooter)]);

        ball.reset(Vector3::new(0.0, 4800.0, 11.0), &mut players);
        for _ in 0..30 {
            ball.tick(DT, &mut players);
            if ball.is_possessed() {
                break;
            }
        }
        assert_eq!(ball.possessor(), Some(9));
        ball.drain_events();

        ball.kick(Vector3::new(0.0, 1.0, 0.0), 2000.0, false, &mut players);
        for _ in 0..60 {
            ball.tick(DT, &mut players);
        }

        assert!(ball.is_out_of_bounds());
        let goals: Vec<BallEvent> = ball
            .drain_events()
            .into_iter()
            .filter(BallEvent::is_gameplay_event)
            .collect();
        assert_eq!(
            goals,
            vec![BallEvent::GoalScored {
                ball: MATCH_BALL_ID,
                scoring_team: Team::TeamB,
                last_kicker: Some(9),
            }]
        );
    }
}

/// REPLICATION AND INTERPOLATION TESTS
mod replication_tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;

    /// Sends every pending ball event through the codec and into the observer.
    fn forward(ball: &mut Ball, observer: &mut ObserverBridge, timestamp: u64) -> Vec<BallEvent> {
        let mut derived = Vec::new();
        for event in ball.drain_events() {
            let packet = Packet::BallEvent {
                sequence: timestamp as u32,
                event: ball.reliable_event(event, timestamp),
            };
            if let Packet::BallEvent { event, .. } =
                decode_packet(&encode_packet(&packet).unwrap()).unwrap()
            {
                derived.extend(observer.receive_event(event));
            }
        }
        derived
    }

    fn target(x: f32, timestamp: u64) -> InterpolationTarget {
        InterpolationTarget {
            position: Vector3::new(x, 0.0, 11.0),
            velocity: Vector3::zeros(),
            phase: BallPhase::Loose,
            possessor: None,
            server_timestamp: timestamp,
            received_at: Instant::now(),
        }
    }

    #[test]
    fn retarget_moves_smoothly_without_snapping() {
        let mut interpolator = ClientInterpolator::new(InterpolatorConfig::default());
        let players: HashMap<u32, Player> = HashMap::new();
        let offset = BallConfig::default().dribble_offset;

        interpolator.set_target(target(10.0, 1));
        assert_eq!(interpolator.rendered_position().unwrap().x, 10.0);

        interpolator.set_target(target(20.0, 2));
        assert_eq!(interpolator.rendered_position().unwrap().x, 10.0);

        let rendered = interpolator.update(DT, &players, &offset).unwrap();
        assert!(rendered.x > 10.0 && rendered.x < 20.0);
        assert_approx_eq!(rendered.x, 10.0 + 10.0 * 15.0 * DT, 1e-4);
    }

    #[test]
    fn observer_follows_authority_over_the_wire() {
        let mut authority_ball = authority();
        let mut players = two_players();
        let mut observer = ObserverBridge::new(
            MATCH_BALL_ID,
            BallConfig::default(),
            FieldGeometry::default(),
            InterpolatorConfig::default(),
        );
        let mut timestamp = 0;

        authority_ball.tick(DT, &mut players);
        timestamp += 1;
        forward(&mut authority_ball, &mut observer, timestamp);
        observer.receive(authority_ball.snapshot(timestamp), Instant::now());

        assert_eq!(observer.ball().possessor(), authority_ball.possessor());
        assert_eq!(observer.ball().phase(), BallPhase::Possessed);

        authority_ball.kick(Vector3::new(1.0, 0.0, 0.0), 1500.0, true, &mut players);
        timestamp += 1;
        let derived = forward(&mut authority_ball, &mut observer, timestamp);
        assert!(derived.contains(&BallEvent::BallStateChanged {
            ball: MATCH_BALL_ID,
            phase: BallPhase::InFlight,
        }));
        assert_eq!(observer.ball().possessor(), None);

        for _ in 0..10 {
            authority_ball.tick(DT, &mut players);
            timestamp += 1;
            forward(&mut authority_ball, &mut observer, timestamp);
            observer.receive(authority_ball.snapshot(timestamp), Instant::now());
            assert_phase_matches_possessor(observer.ball());
        }

        let difference = (observer.ball().position() - authority_ball.position()).norm();
        assert!(difference < 1e-3);
        assert_eq!(observer.ball().phase(), authority_ball.phase());
    }

    #[test]
    fn observer_ignores_mutations() {
        let mut observer_ball = Ball::new(
            MATCH_BALL_ID,
            Role::Observer,
            BallConfig::default(),
            FieldGeometry::default(),
        );
        let mut players = two_players();

        assert!(!observer_ball.acquire(1, &mut players));
        observer_ball.tick(DT, &mut players);
        observer_ball.reset(Vector3::new(100.0, 100.0, 11.0), &mut players);

        assert!(observer_ball.is_loose());
        assert_eq!(observer_ball.position(), Vector3::new(0.0, 0.0, 11.0));
        assert!(observer_ball.drain_events().is_empty());
    }
}

/// NETWORK PROTOCOL TESTS
mod protocol_tests {
    use super::*;

    #[test]
    fn malformed_packet_handling() {
        let malformed = [
            vec![],
            vec![0xFF; 3],
            vec![0x09, 0x00, 0x00, 0x00],
        ];

        for bytes in malformed {
            assert!(matches!(decode_packet(&bytes), Err(CodecError::Decode(_))));
        }
    }

    #[test]
    fn codec_is_plain_bincode() {
        let packet = InputState {
            sequence: 9,
            timestamp: 99,
            move_x: 0.5,
            move_y: -1.0,
            kick: true,
            lob: false,
            tackle: false,
        }
        .to_packet();

        let bytes = encode_packet(&packet).unwrap();
        assert_eq!(bytes, bincode::serialize(&packet).unwrap());

        let decoded: Packet = bincode::deserialize(&bytes).unwrap();
        assert!(matches!(decoded, Packet::Input { sequence: 9, kick: true, .. }));
    }

    #[test]
    fn oversized_datagram_rejected() {
        let bytes = vec![0u8; shared::MAX_DATAGRAM_SIZE + 1];
        assert!(matches!(
            decode_packet(&bytes),
            Err(CodecError::TooLarge(_, shared::MAX_DATAGRAM_SIZE))
        ));
    }

    #[test]
    fn game_state_carries_ball_snapshot() {
        let ball = authority();
        let packet = Packet::GameState {
            tick: 5,
            timestamp: 1234,
            last_processed_input: HashMap::from([(1, 7)]),
            players: vec![Player::new(1, Team::TeamA, Vector3::zeros())],
            ball: ball.snapshot(1234),
        };

        match decode_packet(&encode_packet(&packet).unwrap()).unwrap() {
            Packet::GameState { ball: snapshot, .. } => {
                assert_eq!(snapshot.phase, BallPhase::Loose);
                assert_eq!(snapshot.server_timestamp, 1234);
                assert_eq!(snapshot.position, ball.position());
            }
            other => panic!("Wrong packet type after decoding: {:?}", other),
        }
    }
}

/// SERVER MATCH FLOW TESTS
mod match_tests {
    use super::*;
    use server::game::GameState;

    #[test]
    fn pickup_kick_goal_and_restart() {
        let mut game = GameState::new(BallConfig::default(), FieldGeometry::default(), 0.5);
        assert_eq!(game.add_player(1), Team::TeamA);

        let player = game.players.get_mut(&1).unwrap();
        player.position = Vector3::new(0.0, -40.0, 0.0);
        player.yaw = std::f32::consts::FRAC_PI_2;
        game.step(DT);
        assert_eq!(game.ball.possessor(), Some(1));

        // Carry the ball to the edge of the box facing the negative goal.
        let player = game.players.get_mut(&1).unwrap();
        player.position = Vector3::new(0.0, -5000.0, 0.0);
        player.yaw = -std::f32::consts::FRAC_PI_2;
        game.step(DT);
        assert!(game.ball.position().y < -5000.0);

        game.apply_input(
            1,
            &InputState {
                sequence: 1,
                timestamp: 0,
                move_x: 0.0,
                move_y: 0.0,
                kick: true,
                lob: false,
                tackle: false,
            },
        );
        assert!(game.ball.is_in_flight());

        let mut events = Vec::new();
        for _ in 0..30 {
            events.extend(game.step(DT));
        }
        assert!(events.contains(&BallEvent::GoalScored {
            ball: MATCH_BALL_ID,
            scoring_team: Team::TeamA,
            last_kicker: Some(1),
        }));
        assert!(game.director.reset_pending());

        for _ in 0..40 {
            game.step(DT);
        }
        assert!(game.ball.is_loose());
        assert_eq!(game.ball.position(), Vector3::new(0.0, 0.0, 11.0));
        assert!(!game.director.reset_pending());
    }
}
