//! # Ball Client Library
//!
//! Observer side of the match: it predicts the local player, mirrors the ball
//! from server snapshots and reliable events, and draws everything top-down.
//!
//! ## Module Organization
//!
//! ### Game Module (`game`)
//! Local player prediction and rollback, plus the `ObserverBridge` that keeps
//! the mirrored ball and its interpolator in step with the server.
//!
//! ### Input Module (`input`)
//! Keyboard sampling, edge-latched actions (kick, lob, tackle) and input
//! sequencing.
//!
//! ### Network Module (`network`)
//! UDP transport on a background tokio runtime with simulated latency and
//! loss, connection retries, and acknowledgement of reliable ball events.
//!
//! ### Rendering Module (`rendering`)
//! Pitch, players, ball with a height shadow, and the debug HUD.
//!
//! ## Usage Example
//!
//! ```rust,ignore
//! use client::network::Client;
//!
//! #[macroquad::main("Ball Client")]
//! async fn main() {
//!     let mut client = Client::new("127.0.0.1:8080", 0, 0.0, 1280.0, 720.0).unwrap();
//!     client.run().await.unwrap();
//! }
//! ```
//!
//! ## Feature Toggles
//!
//! Prediction, reconciliation and interpolation can each be switched off at
//! runtime (keys 1, 2 and 3) to compare the raw network picture against the
//! smoothed one.

pub mod game;
pub mod input;
pub mod network;
pub mod rendering;
