//! Sequenced, acknowledged delivery on top of the unreliable datagram channel.
//!
//! The sender keeps every unacknowledged message and hands it back for
//! retransmission once `resend_after` has passed; the receiver drops duplicates.
//! Ordering is not restored: each message carries enough context to be applied
//! on its own.

use std::collections::{BTreeMap, BTreeSet};
use std::time::{Duration, Instant};

pub const DEFAULT_RESEND_AFTER: Duration = Duration::from_millis(100);

#[derive(Debug)]
struct PendingMessage<T> {
    payload: T,
    last_sent: Option<Instant>,
}

#[derive(Debug)]
pub struct ReliableSender<T> {
    next_sequence: u32,
    pending: BTreeMap<u32, PendingMessage<T>>,
    resend_after: Duration,
}

impl<T: Clone> ReliableSender<T> {
    pub fn new(resend_after: Duration) -> Self {
        Self {
            next_sequence: 1,
            pending: BTreeMap::new(),
            resend_after,
        }
    }

    /// Queues `payload` and returns its sequence number.
    pub fn push(&mut self, payload: T) -> u32 {
        let sequence = self.next_sequence;
        self.next_sequence = self.next_sequence.wrapping_add(1).max(1);
        self.pending.insert(
            sequence,
            PendingMessage {
                payload,
                last_sent: None,
            },
        );
        sequence
    }

    /// Messages never sent, or sent longer than `resend_after` ago. Marks them
    /// as sent at `now`.
    pub fn due(&mut self, now: Instant) -> Vec<(u32, T)> {
        let resend_after = self.resend_after;
        self.pending
            .iter_mut()
            .filter(|(_, message)| {
                message
                    .last_sent
                    .map_or(true, |sent| now.duration_since(sent) >= resend_after)
            })
            .map(|(&sequence, message)| {
                message.last_sent = Some(now);
                (sequence, message.payload.clone())
            })
            .collect()
    }

    /// Returns true if `sequence` was pending.
    pub fn acknowledge(&mut self, sequence: u32) -> bool {
        self.pending.remove(&sequence).is_some()
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }
}

impl<T: Clone> Default for ReliableSender<T> {
    fn default() -> Self {
        Self::new(DEFAULT_RESEND_AFTER)
    }
}

/// Tracks which sequence numbers have been delivered.
#[derive(Debug, Default)]
pub struct ReliableReceiver {
    delivered_up_to: u32,
    delivered_ahead: BTreeSet<u32>,
}

impl ReliableReceiver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true the first time `sequence` is seen.
    pub fn accept(&mut self, sequence: u32) -> bool {
        if sequence <= self.delivered_up_to || !self.delivered_ahead.insert(sequence) {
            return false;
        }

        while self.delivered_ahead.remove(&(self.delivered_up_to + 1)) {
            self.delivered_up_to += 1;
        }
        true
    }
}
