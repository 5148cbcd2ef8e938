//! Roster of connected clients for the authoritative server
//!
//! Besides connection lifecycle and input buffering, each client owns the
//! sending half of its reliable channel: ball events are queued per client and
//! re-sent until that client acknowledges them.

use log::{debug, info};
use shared::{InputState, ReliableBallEvent, ReliableSender};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

/// Silence after which a client is considered gone.
pub const CLIENT_TIMEOUT: Duration = Duration::from_secs(5);

/// Upper bound on buffered inputs per client; older ones are dropped first.
const MAX_PENDING_INPUTS: usize = 256;

/// A connected client and its network-side state
#[derive(Debug)]
pub struct Client {
    /// Unique client identifier, also the id of the client's player
    pub id: u32,
    pub addr: SocketAddr,
    /// Last time we received any packet from this client
    pub last_seen: Instant,
    /// Highest input sequence number we've processed
    pub last_processed_input: u32,
    /// Buffered inputs waiting to be processed, in sequence order
    pub pending_inputs: Vec<InputState>,
    /// Ball events awaiting acknowledgement
    pub reliable: ReliableSender<ReliableBallEvent>,
}

impl Client {
    pub fn new(id: u32, addr: SocketAddr) -> Self {
        Self {
            id,
            addr,
            last_seen: Instant::now(),
            last_processed_input: 0,
            pending_inputs: Vec::new(),
            reliable: ReliableSender::default(),
        }
    }

    /// Buffers an input, keeping the queue sorted by sequence so that
    /// reordered datagrams are still applied in order.
    pub fn add_input(&mut self, input: InputState) {
        self.last_seen = Instant::now();
        if input.sequence <= self.last_processed_input
            || self.pending_inputs.iter().any(|i| i.sequence == input.sequence)
        {
            return;
        }

        self.pending_inputs.push(input);
        self.pending_inputs.sort_by_key(|i| i.sequence);
        if self.pending_inputs.len() > MAX_PENDING_INPUTS {
            let excess = self.pending_inputs.len() - MAX_PENDING_INPUTS;
            self.pending_inputs.drain(..excess);
        }
    }

    pub fn is_timed_out(&self, timeout: Duration) -> bool {
        self.last_seen.elapsed() > timeout
    }
}

/// Manages all connected clients and their input processing
///
/// Enforces the capacity limit and hands inputs to the game loop in
/// chronological order across clients.
pub struct ClientManager {
    clients: HashMap<u32, Client>,
    next_client_id: u32,
    max_clients: usize,
}

impl ClientManager {
    /// Client IDs start from 1 and are never reused.
    pub fn new(max_clients: usize) -> Self {
        Self {
            clients: HashMap::new(),
            next_client_id: 1,
            max_clients,
        }
    }

    /// Returns Some(client_id) if successful, None if the server is at capacity.
    pub fn add_client(&mut self, addr: SocketAddr) -> Option<u32> {
        if self.clients.len() >= self.max_clients {
            return None;
        }

        let client_id = self.next_client_id;
        self.next_client_id += 1;

        info!("Client {} connected from {}", client_id, addr);
        self.clients.insert(client_id, Client::new(client_id, addr));

        Some(client_id)
    }

    pub fn remove_client(&mut self, client_id: &u32) -> bool {
        if let Some(client) = self.clients.remove(client_id) {
            info!(
                "Client {} disconnected ({} unacknowledged ball events dropped)",
                client.id,
                client.reliable.pending_len()
            );
            true
        } else {
            false
        }
    }

    pub fn find_client_by_addr(&self, addr: SocketAddr) -> Option<u32> {
        self.clients
            .iter()
            .find(|(_, client)| client.addr == addr)
            .map(|(id, _)| *id)
    }

    /// Returns false if the client ID is unknown.
    pub fn add_input(&mut self, client_id: u32, input: InputState) -> bool {
        if let Some(client) = self.clients.get_mut(&client_id) {
            client.add_input(input);
            true
        } else {
            false
        }
    }

    /// Marks the client as alive without any payload (acks, keep-alives).
    pub fn touch(&mut self, client_id: u32) {
        if let Some(client) = self.clients.get_mut(&client_id) {
            client.last_seen = Instant::now();
        }
    }

    /// Gets all unprocessed inputs sorted by client timestamp
    pub fn get_chronological_inputs(&self) -> Vec<(u32, InputState)> {
        let mut all_inputs: Vec<(u32, InputState)> = self
            .clients
            .iter()
            .flat_map(|(client_id, client)| {
                client
                    .pending_inputs
                    .iter()
                    .filter(|input| input.sequence > client.last_processed_input)
                    .map(|input| (*client_id, input.clone()))
            })
            .collect();

        all_inputs.sort_by_key(|(client_id, input)| (input.timestamp, *client_id, input.sequence));
        all_inputs
    }

    pub fn mark_input_processed(&mut self, client_id: u32, sequence: u32) {
        if let Some(client) = self.clients.get_mut(&client_id) {
            client.last_processed_input = client.last_processed_input.max(sequence);
        }
    }

    pub fn cleanup_processed_inputs(&mut self) {
        for client in self.clients.values_mut() {
            let last = client.last_processed_input;
            client.pending_inputs.retain(|input| input.sequence > last);
        }
    }

    /// Last processed input sequence per client, sent back for reconciliation.
    pub fn get_last_processed_inputs(&self) -> HashMap<u32, u32> {
        self.clients
            .iter()
            .map(|(id, client)| (*id, client.last_processed_input))
            .collect()
    }

    /// Queues a ball event on every client's reliable channel.
    pub fn push_event_all(&mut self, event: ReliableBallEvent) {
        for client in self.clients.values_mut() {
            let sequence = client.reliable.push(event);
            debug!("Queued ball event #{} for client {}", sequence, client.id);
        }
    }

    /// Reliable messages to (re)send now, with their destination.
    pub fn due_reliable(&mut self, now: Instant) -> Vec<(SocketAddr, u32, ReliableBallEvent)> {
        self.clients
            .values_mut()
            .flat_map(|client| {
                let addr = client.addr;
                client
                    .reliable
                    .due(now)
                    .into_iter()
                    .map(move |(sequence, event)| (addr, sequence, event))
            })
            .collect()
    }

    pub fn acknowledge(&mut self, client_id: u32, sequence: u32) -> bool {
        self.clients
            .get_mut(&client_id)
            .is_some_and(|client| client.reliable.acknowledge(sequence))
    }

    /// Removes clients silent for longer than [`CLIENT_TIMEOUT`] and returns their IDs.
    pub fn check_timeouts(&mut self) -> Vec<u32> {
        let timed_out: Vec<u32> = self
            .clients
            .iter()
            .filter(|(_, client)| client.is_timed_out(CLIENT_TIMEOUT))
            .map(|(id, _)| *id)
            .collect();

        for client_id in &timed_out {
            self.remove_client(client_id);
        }

        timed_out
    }

    pub fn get_client_addrs(&self) -> Vec<(u32, SocketAddr)> {
        self.clients
            .iter()
            .map(|(id, client)| (*id, client.addr))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }
}
