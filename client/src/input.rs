//! Client input management with sequencing and change detection
//!
//! Movement axes are in field space: W/S move along +X/-X (across the pitch,
//! drawn as screen up/down), D/A move along +Y/-Y (towards either goal, drawn
//! as screen right/left).

use macroquad::prelude::*;
use shared::{now_millis, InputState};
use std::time::{Duration, Instant};

/// Interval at which inputs are sent even when nothing changed.
const SEND_INTERVAL: Duration = Duration::from_millis(16);

/// Raw key state for one frame.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct KeySample {
    pub up: bool,
    pub down: bool,
    pub left: bool,
    pub right: bool,
    pub kick: bool,
    pub lob: bool,
    pub tackle: bool,
    pub toggle_prediction: bool,
    pub toggle_reconciliation: bool,
    pub toggle_interpolation: bool,
}

impl KeySample {
    pub fn capture() -> Self {
        Self {
            up: is_key_down(KeyCode::W) || is_key_down(KeyCode::Up),
            down: is_key_down(KeyCode::S) || is_key_down(KeyCode::Down),
            left: is_key_down(KeyCode::A) || is_key_down(KeyCode::Left),
            right: is_key_down(KeyCode::D) || is_key_down(KeyCode::Right),
            kick: is_key_down(KeyCode::J) || is_key_down(KeyCode::Space),
            lob: is_key_down(KeyCode::K),
            tackle: is_key_down(KeyCode::L),
            toggle_prediction: is_key_down(KeyCode::Key1),
            toggle_reconciliation: is_key_down(KeyCode::Key2),
            toggle_interpolation: is_key_down(KeyCode::Key3),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Toggles {
    pub prediction: bool,
    pub reconciliation: bool,
    pub interpolation: bool,
}

/// Turns key samples into sequenced network inputs.
///
/// Actions (kick, lob, tackle) fire once per key press and are latched until
/// the next input goes out, so a press between two sends is never lost.
pub struct InputManager {
    next_sequence: u32,
    current_input: InputState,
    last_input_sent: Option<Instant>,
    previous: KeySample,
    latched_kick: bool,
    latched_lob: bool,
    latched_tackle: bool,
}

impl InputManager {
    pub fn new() -> Self {
        Self {
            next_sequence: 1,
            current_input: InputState {
                sequence: 0,
                timestamp: 0,
                move_x: 0.0,
                move_y: 0.0,
                kick: false,
                lob: false,
                tackle: false,
            },
            last_input_sent: None,
            previous: KeySample::default(),
            latched_kick: false,
            latched_lob: false,
            latched_tackle: false,
        }
    }

    /// Samples the keyboard and returns toggles pressed this frame plus an
    /// input to send, if one is due.
    pub fn update(&mut self) -> (Toggles, Option<InputState>) {
        self.process(KeySample::capture(), Instant::now())
    }

    pub fn process(&mut self, keys: KeySample, now: Instant) -> (Toggles, Option<InputState>) {
        let previous = self.previous;
        self.previous = keys;

        let toggles = Toggles {
            prediction: keys.toggle_prediction && !previous.toggle_prediction,
            reconciliation: keys.toggle_reconciliation && !previous.toggle_reconciliation,
            interpolation: keys.toggle_interpolation && !previous.toggle_interpolation,
        };

        self.latched_kick |= keys.kick && !previous.kick;
        self.latched_lob |= keys.lob && !previous.lob;
        self.latched_tackle |= keys.tackle && !previous.tackle;

        let move_x = axis(keys.up, keys.down);
        let move_y = axis(keys.right, keys.left);

        let input_changed = move_x != self.current_input.move_x
            || move_y != self.current_input.move_y
            || self.latched_kick
            || self.latched_lob
            || self.latched_tackle;
        let time_to_send = self
            .last_input_sent
            .map_or(true, |sent| now.duration_since(sent) >= SEND_INTERVAL);

        if !input_changed && !time_to_send {
            return (toggles, None);
        }

        self.current_input = InputState {
            sequence: self.next_sequence,
            timestamp: now_millis(),
            move_x,
            move_y,
            kick: std::mem::take(&mut self.latched_kick),
            lob: std::mem::take(&mut self.latched_lob),
            tackle: std::mem::take(&mut self.latched_tackle),
        };
        self.next_sequence += 1;
        self.last_input_sent = Some(now);

        (toggles, Some(self.current_input.clone()))
    }

    pub fn current_input(&self) -> &InputState {
        &self.current_input
    }
}

impl Default for InputManager {
    fn default() -> Self {
        Self::new()
    }
}

fn axis(positive: bool, negative: bool) -> f32 {
    match (positive, negative) {
        (true, false) => 1.0,
        (false, true) => -1.0,
        _ => 0.0,
    }
}
