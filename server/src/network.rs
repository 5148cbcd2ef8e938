//! Server network layer handling UDP communications and game loop coordination

use crate::client_manager::ClientManager;
use crate::game::{GameState, DEFAULT_RESET_DELAY};
use log::{debug, error, info, warn};
use shared::replication::{DEFAULT_SNAPSHOT_RATE, MAX_SNAPSHOT_RATE, MIN_SNAPSHOT_RATE};
use shared::{
    decode_packet, encode_packet, now_millis, sanitize_axis, BallConfig, FieldGeometry, InputState, LogThrottle,
    Packet, Player, SendCadence, CLIENT_VERSION, MAX_DATAGRAM_SIZE,
};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::UdpSocket;
use tokio::sync::{mpsc, RwLock};
use tokio::time::{interval, MissedTickBehavior};

/// Messages sent from network tasks to main server loop
#[derive(Debug)]
pub enum ServerMessage {
    PacketReceived { packet: Packet, addr: SocketAddr },
    ClientTimeout { client_id: u32 },
    Shutdown,
}

/// Messages sent from game loop to network tasks
#[derive(Debug)]
pub enum GameMessage {
    SendPacket { packet: Packet, addr: SocketAddr },
    BroadcastPacket { packet: Packet, exclude: Option<u32> },
}

/// Largest roster whose `GameState` snapshot still fits in one datagram.
pub const MAX_CLIENTS: usize = 64;

/// Simulation and replication parameters of a server instance.
#[derive(Debug, Clone)]
pub struct ServerSettings {
    pub tick_rate: u32,
    pub snapshot_rate: u32,
    pub max_clients: usize,
    pub reset_delay: f32,
    pub ball: BallConfig,
    pub field: FieldGeometry,
}

impl ServerSettings {
    pub fn validate(&self) -> Result<(), String> {
        if self.tick_rate == 0 {
            return Err("tick rate must be positive".to_string());
        }
        if !(MIN_SNAPSHOT_RATE..=MAX_SNAPSHOT_RATE).contains(&self.snapshot_rate) {
            return Err(format!(
                "snapshot rate must be within {}..={} Hz, got {}",
                MIN_SNAPSHOT_RATE, MAX_SNAPSHOT_RATE, self.snapshot_rate
            ));
        }
        if !(1..=MAX_CLIENTS).contains(&self.max_clients) {
            return Err(format!(
                "max clients must be within 1..={}, got {}",
                MAX_CLIENTS, self.max_clients
            ));
        }
        Ok(())
    }

    pub fn tick_duration(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.tick_rate.max(1) as f64)
    }
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            tick_rate: 60,
            snapshot_rate: DEFAULT_SNAPSHOT_RATE,
            max_clients: 16,
            reset_delay: DEFAULT_RESET_DELAY,
            ball: BallConfig::default(),
            field: FieldGeometry::default(),
        }
    }
}

/// Main server coordinating networking and game simulation
pub struct Server {
    socket: Arc<UdpSocket>,
    clients: Arc<RwLock<ClientManager>>,
    game_state: GameState,
    tick_duration: Duration,
    cadence: SendCadence,
    slow_tick_log: LogThrottle,

    // Communication channels
    server_tx: mpsc::UnboundedSender<ServerMessage>,
    server_rx: mpsc::UnboundedReceiver<ServerMessage>,
    game_tx: mpsc::UnboundedSender<GameMessage>,
    game_rx: mpsc::UnboundedReceiver<GameMessage>,
}

impl Server {
    pub async fn new(
        addr: &str,
        settings: ServerSettings,
    ) -> Result<Self, Box<dyn std::error::Error>> {
        settings.validate()?;

        let socket = Arc::new(UdpSocket::bind(addr).await?);
        info!(
            "Server listening on {} ({} Hz simulation, {} Hz snapshots)",
            socket.local_addr()?,
            settings.tick_rate,
            settings.snapshot_rate
        );

        let (server_tx, server_rx) = mpsc::unbounded_channel();
        let (game_tx, game_rx) = mpsc::unbounded_channel();

        Ok(Server {
            socket,
            clients: Arc::new(RwLock::new(ClientManager::new(settings.max_clients))),
            game_state: GameState::new(settings.ball, settings.field, settings.reset_delay),
            tick_duration: settings.tick_duration(),
            cadence: SendCadence::new(settings.snapshot_rate),
            slow_tick_log: LogThrottle::default(),
            server_tx,
            server_rx,
            game_tx,
            game_rx,
        })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    /// Handle for asking the main loop to stop.
    pub fn shutdown_handle(&self) -> mpsc::UnboundedSender<ServerMessage> {
        self.server_tx.clone()
    }

    /// Spawns task that continuously listens for incoming packets
    fn spawn_network_receiver(&self) {
        let socket = Arc::clone(&self.socket);
        let server_tx = self.server_tx.clone();

        tokio::spawn(async move {
            let mut buffer = [0u8; MAX_DATAGRAM_SIZE];
            let mut malformed_log = LogThrottle::default();

            loop {
                match socket.recv_from(&mut buffer).await {
                    Ok((len, addr)) => match decode_packet(&buffer[..len]) {
                        Ok(packet) => {
                            if let Err(e) =
                                server_tx.send(ServerMessage::PacketReceived { packet, addr })
                            {
                                error!("Failed to send packet to main loop: {}", e);
                                break;
                            }
                        }
                        Err(e) => {
                            if malformed_log.ready() {
                                warn!("Dropping datagram from {}: {}", addr, e);
                            }
                        }
                    },
                    Err(e) => {
                        error!("Error receiving packet: {}", e);
                        tokio::time::sleep(Duration::from_millis(10)).await;
                    }
                }
            }
        });
    }

    /// Spawns task that processes outgoing packet queue
    fn spawn_network_sender(&mut self) {
        let socket = Arc::clone(&self.socket);
        let clients = Arc::clone(&self.clients);
        let mut game_rx = std::mem::replace(&mut self.game_rx, mpsc::unbounded_channel().1);

        tokio::spawn(async move {
            while let Some(message) = game_rx.recv().await {
                match message {
                    GameMessage::SendPacket { packet, addr } => {
                        if let Err(e) = Self::send_packet_impl(&socket, &packet, addr).await {
                            error!("Failed to send packet to {}: {}", addr, e);
                        }
                    }
                    GameMessage::BroadcastPacket { packet, exclude } => {
                        let client_addrs = {
                            let clients_guard = clients.read().await;
                            clients_guard.get_client_addrs()
                        };

                        for (client_id, addr) in client_addrs {
                            if Some(client_id) == exclude {
                                continue;
                            }

                            if let Err(e) = Self::send_packet_impl(&socket, &packet, addr).await {
                                error!("Failed to send to client {}: {}", client_id, e);
                            }
                        }
                    }
                }
            }
        });
    }

    /// Spawns task that monitors client timeouts
    fn spawn_timeout_checker(&self) {
        let clients = Arc::clone(&self.clients);
        let server_tx = self.server_tx.clone();

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(1));

            loop {
                interval.tick().await;

                let timed_out = {
                    let mut clients_guard = clients.write().await;
                    clients_guard.check_timeouts()
                };

                for client_id in timed_out {
                    if let Err(e) = server_tx.send(ServerMessage::ClientTimeout { client_id }) {
                        error!("Failed to send timeout message: {}", e);
                        return;
                    }
                }
            }
        });
    }

    async fn send_packet_impl(
        socket: &UdpSocket,
        packet: &Packet,
        addr: SocketAddr,
    ) -> Result<(), Box<dyn std::error::Error>> {
        let data = encode_packet(packet)?;
        socket.send_to(&data, addr).await?;
        Ok(())
    }

    fn send_packet(&self, packet: Packet, addr: SocketAddr) {
        if let Err(e) = self.game_tx.send(GameMessage::SendPacket { packet, addr }) {
            error!("Failed to queue packet for sending: {}", e);
        }
    }

    fn broadcast_packet(&self, packet: Packet, exclude: Option<u32>) {
        if let Err(e) = self
            .game_tx
            .send(GameMessage::BroadcastPacket { packet, exclude })
        {
            error!("Failed to queue broadcast packet: {}", e);
        }
    }

    async fn client_for(&self, addr: SocketAddr) -> Option<u32> {
        let clients = self.clients.read().await;
        clients.find_client_by_addr(addr)
    }

    /// Processes incoming packets and updates game state
    async fn handle_packet(&mut self, packet: Packet, addr: SocketAddr) {
        match packet {
            Packet::Connect { client_version } => {
                info!(
                    "Client connecting from {} (version: {})",
                    addr, client_version
                );

                if client_version != CLIENT_VERSION {
                    warn!(
                        "Rejecting {}: version {} (expected {})",
                        addr, client_version, CLIENT_VERSION
                    );
                    self.send_packet(
                        Packet::Disconnected {
                            reason: "Protocol version mismatch".to_string(),
                        },
                        addr,
                    );
                    return;
                }

                // A reconnect from the same address replaces the old session
                if let Some(existing_id) = self.client_for(addr).await {
                    info!("Removing existing client {} from {}", existing_id, addr);
                    self.clients.write().await.remove_client(&existing_id);
                    self.game_state.remove_player(&existing_id);
                }

                let client_id = self.clients.write().await.add_client(addr);

                match client_id {
                    Some(client_id) => {
                        let team = self.game_state.add_player(client_id);
                        self.send_packet(Packet::Connected { client_id, team }, addr);
                    }
                    None => {
                        self.send_packet(
                            Packet::Disconnected {
                                reason: "Server full".to_string(),
                            },
                            addr,
                        );
                    }
                }
            }

            Packet::Input {
                sequence,
                timestamp,
                move_x,
                move_y,
                kick,
                lob,
                tackle,
            } => {
                if let Some(client_id) = self.client_for(addr).await {
                    let input = InputState {
                        sequence,
                        timestamp,
                        move_x: sanitize_axis(move_x),
                        move_y: sanitize_axis(move_y),
                        kick,
                        lob,
                        tackle,
                    };
                    self.clients.write().await.add_input(client_id, input);
                }
            }

            Packet::Ack { sequence } => {
                if let Some(client_id) = self.client_for(addr).await {
                    let mut clients = self.clients.write().await;
                    clients.touch(client_id);
                    if !clients.acknowledge(client_id, sequence) {
                        debug!("Duplicate ack {} from client {}", sequence, client_id);
                    }
                }
            }

            Packet::Disconnect => {
                if let Some(client_id) = self.client_for(addr).await {
                    self.clients.write().await.remove_client(&client_id);
                    self.game_state.remove_player(&client_id);
                }
            }

            _ => {
                warn!("Unexpected packet type from client at {}", addr);
            }
        }
    }

    /// Applies all queued inputs in chronological order
    async fn process_inputs(&mut self) {
        let all_inputs = {
            let clients = self.clients.read().await;
            clients.get_chronological_inputs()
        };

        if all_inputs.is_empty() {
            return;
        }

        let mut clients = self.clients.write().await;
        for (client_id, input) in &all_inputs {
            self.game_state.apply_input(*client_id, input);
            clients.mark_input_processed(*client_id, input.sequence);
        }
        clients.cleanup_processed_inputs();
    }

    /// Runs one fixed simulation step and queues its ball events reliably
    async fn simulate(&mut self, dt: f32) {
        self.process_inputs().await;
        let events = self.game_state.step(dt);

        if events.is_empty() {
            return;
        }

        let timestamp = now_millis();
        let mut clients = self.clients.write().await;
        for event in events {
            debug!("Ball event: {:?}", event);
            clients.push_event_all(self.game_state.ball.reliable_event(event, timestamp));
        }
    }

    /// Sends reliable ball events that are new or due for retransmission
    async fn flush_reliable(&self) {
        let due = {
            let mut clients = self.clients.write().await;
            clients.due_reliable(Instant::now())
        };

        for (addr, sequence, event) in due {
            self.send_packet(Packet::BallEvent { sequence, event }, addr);
        }
    }

    /// Broadcasts current game state to all connected clients
    async fn broadcast_game_state(&self) {
        let last_processed_input = {
            let clients = self.clients.read().await;
            if clients.is_empty() {
                return;
            }
            clients.get_last_processed_inputs()
        };

        let players: Vec<Player> = self.game_state.players.values().cloned().collect();

        // Take timestamp as close to transmission as possible
        let timestamp = now_millis();
        let packet = Packet::GameState {
            tick: self.game_state.tick,
            timestamp,
            last_processed_input,
            players,
            ball: self.game_state.ball.snapshot(timestamp),
        };

        self.broadcast_packet(packet, None);
    }

    /// Main server loop coordinating all operations
    pub async fn run(&mut self) -> Result<(), Box<dyn std::error::Error>> {
        self.spawn_network_receiver();
        self.spawn_network_sender();
        self.spawn_timeout_checker();

        let mut tick_interval = interval(self.tick_duration);
        tick_interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let fixed_dt = self.tick_duration.as_secs_f32();
        let mut last_tick = Instant::now();

        info!("Server started successfully");

        loop {
            tokio::select! {
                // Handle network events
                message = self.server_rx.recv() => {
                    match message {
                        Some(ServerMessage::PacketReceived { packet, addr }) => {
                            self.handle_packet(packet, addr).await;
                        },
                        Some(ServerMessage::ClientTimeout { client_id }) => {
                            self.game_state.remove_player(&client_id);
                        },
                        Some(ServerMessage::Shutdown) | None => {
                            info!("Server shutting down");
                            break;
                        }
                    }
                },

                // Handle server tick events
                _ = tick_interval.tick() => {
                    let now = Instant::now();
                    let elapsed = now.duration_since(last_tick);
                    last_tick = now;

                    if elapsed > self.tick_duration * 3 && self.slow_tick_log.ready() {
                        warn!(
                            "Tick took {:.1}ms (budget {:.1}ms), {} similar warnings suppressed",
                            elapsed.as_secs_f32() * 1000.0,
                            fixed_dt * 1000.0,
                            self.slow_tick_log.suppressed()
                        );
                    }

                    self.simulate(fixed_dt).await;
                    self.flush_reliable().await;
                    if self.cadence.advance(fixed_dt) {
                        self.broadcast_game_state().await;
                    }

                    // Periodic monitoring
                    if self.game_state.tick % 60 == 0 {
                        let client_count = self.clients.read().await.len();
                        if client_count > 0 {
                            let ball = &self.game_state.ball;
                            debug!(
                                "Tick {}: {} clients, ball {:?} held by {:?} at {:?}",
                                self.game_state.tick,
                                client_count,
                                ball.phase(),
                                ball.possessor(),
                                ball.position()
                            );
                        }
                    }
                },
            }
        }

        Ok(())
    }
}
