//! # Ball Server Library
//!
//! Authoritative side of the match. The server owns the only `Authority` ball,
//! arbitrates possession between connected players, and replicates the result
//! to every client.
//!
//! ## Core Responsibilities
//!
//! ### Authoritative Simulation
//! Player movement, ball kinematics, collisions and possession are all decided
//! here at a fixed tick. Clients never change the ball; they only send inputs.
//!
//! ### Client Management
//! Connection lifecycle, team assignment, ordered input buffering, timeouts,
//! and a per-client reliable queue for ball events.
//!
//! ### Replication
//! Unreliable snapshots (players plus ball) go out at the configured snapshot
//! rate. Ball events go out on the reliable channel and are retransmitted until
//! acknowledged.
//!
//! ## Module Organization
//!
//! ### Client Manager Module (`client_manager`)
//! - Player ID assignment and address lookup
//! - Input queue management and processing
//! - Client timeout detection and cleanup
//! - Unacknowledged ball events per client
//!
//! ### Game Module (`game`)
//! - Players and the match ball
//! - Kick, lob and tackle rules
//! - Goal and out-of-bounds restarts after a short delay
//!
//! ### Network Module (`network`)
//! - UDP socket tasks and packet dispatch
//! - The fixed-rate main loop
//! - Snapshot cadence and reliable flushing

pub mod client_manager;
pub mod game;
pub mod network;
