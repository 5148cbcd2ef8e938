use crate::game::ClientGameState;
use crate::input::{InputManager, Toggles};
use crate::rendering::{RenderConfig, Renderer};
use log::{debug, error, info, warn};
use macroquad::prelude::{get_frame_time, is_key_pressed, next_frame, KeyCode};
use rand::Rng;
use shared::{
    decode_packet, encode_packet, now_millis, CodecError, FieldGeometry, InputState, LogThrottle,
    Packet, ReliableReceiver, Team, CLIENT_VERSION, MAX_DATAGRAM_SIZE,
};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::UdpSocket;
use tokio::runtime::{Builder, Runtime};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{sleep, sleep_until, timeout};

const CONNECT_RETRY: Duration = Duration::from_secs(1);

/// Datagram or packet stamped with the moment it entered the simulated link.
pub type Stamped<T> = (Instant, T);

fn simulated_loss(drop_rate: f64) -> bool {
    drop_rate > 0.0 && rand::thread_rng().gen_bool(drop_rate)
}

/// UDP link to the server, driven by a tokio runtime on a background thread.
///
/// macroquad owns the main thread, so the frame loop talks to the socket tasks
/// through channels. Half of the fake ping is applied to each direction.
pub struct Transport {
    runtime: Runtime,
    local_addr: SocketAddr,
    drop_rate: f64,
    outgoing_tx: Option<mpsc::UnboundedSender<Stamped<Vec<u8>>>>,
    incoming_rx: mpsc::UnboundedReceiver<Stamped<Packet>>,
    sender: Option<JoinHandle<()>>,
}

impl Transport {
    pub fn new(
        server_addr: &str,
        fake_ping_ms: u64,
        drop_rate: f64,
    ) -> Result<Self, Box<dyn std::error::Error>> {
        let server_addr: SocketAddr = server_addr.parse()?;
        let runtime = Builder::new_multi_thread()
            .worker_threads(1)
            .thread_name("client-net")
            .enable_all()
            .build()?;

        let socket = Arc::new(runtime.block_on(UdpSocket::bind("0.0.0.0:0"))?);
        let local_addr = socket.local_addr()?;
        let one_way_delay = Duration::from_millis(fake_ping_ms / 2);
        let drop_rate = drop_rate.clamp(0.0, 1.0);

        let (outgoing_tx, outgoing_rx) = mpsc::unbounded_channel();
        let (arrived_tx, arrived_rx) = mpsc::unbounded_channel();
        let (incoming_tx, incoming_rx) = mpsc::unbounded_channel();

        let sender = runtime.spawn(Self::send_loop(
            Arc::clone(&socket),
            server_addr,
            one_way_delay,
            outgoing_rx,
        ));
        runtime.spawn(Self::receive_loop(socket, server_addr, drop_rate, arrived_tx));
        runtime.spawn(Self::deliver_loop(one_way_delay, arrived_rx, incoming_tx));

        Ok(Transport {
            runtime,
            local_addr,
            drop_rate,
            outgoing_tx: Some(outgoing_tx),
            incoming_rx,
            sender: Some(sender),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Writes queued datagrams once their simulated delay has passed.
    async fn send_loop(
        socket: Arc<UdpSocket>,
        server_addr: SocketAddr,
        delay: Duration,
        mut outgoing_rx: mpsc::UnboundedReceiver<Stamped<Vec<u8>>>,
    ) {
        while let Some((queued_at, data)) = outgoing_rx.recv().await {
            sleep_until((queued_at + delay).into()).await;
            if let Err(e) = socket.send_to(&data, server_addr).await {
                error!("Error sending packet: {}", e);
            }
        }
    }

    /// Decodes datagrams from the server; anything from other peers is ignored.
    async fn receive_loop(
        socket: Arc<UdpSocket>,
        server_addr: SocketAddr,
        drop_rate: f64,
        arrived_tx: mpsc::UnboundedSender<Stamped<Packet>>,
    ) {
        let mut buffer = [0u8; MAX_DATAGRAM_SIZE];
        let mut decode_warnings = LogThrottle::new(Duration::from_secs(1));

        loop {
            match socket.recv_from(&mut buffer).await {
                Ok((len, addr)) => {
                    if addr != server_addr {
                        continue;
                    }
                    match decode_packet(&buffer[..len]) {
                        Ok(packet) => {
                            if simulated_loss(drop_rate) {
                                debug!("Simulated loss of incoming packet");
                                continue;
                            }
                            if arrived_tx.send((Instant::now(), packet)).is_err() {
                                break;
                            }
                        }
                        Err(e) => {
                            if decode_warnings.ready() {
                                warn!("Discarding datagram from server: {}", e);
                            }
                        }
                    }
                }
                Err(e) => {
                    error!("Error receiving packet: {}", e);
                    sleep(Duration::from_millis(10)).await;
                }
            }
        }
    }

    /// Holds received packets back by the simulated delay, preserving order.
    async fn deliver_loop(
        delay: Duration,
        mut arrived_rx: mpsc::UnboundedReceiver<Stamped<Packet>>,
        incoming_tx: mpsc::UnboundedSender<Stamped<Packet>>,
    ) {
        while let Some((arrived_at, packet)) = arrived_rx.recv().await {
            let delivered_at = arrived_at + delay;
            sleep_until(delivered_at.into()).await;
            if incoming_tx.send((delivered_at, packet)).is_err() {
                break;
            }
        }
    }

    /// Hands `packet` to the send task; it leaves as soon as its delay allows.
    pub fn send(&self, packet: &Packet) -> Result<(), CodecError> {
        let data = encode_packet(packet)?;
        if simulated_loss(self.drop_rate) {
            debug!("Simulated loss of outgoing packet");
            return Ok(());
        }
        match &self.outgoing_tx {
            Some(tx) => {
                if tx.send((Instant::now(), data)).is_err() {
                    error!("Network sender has stopped");
                }
            }
            None => warn!("Transport closed, dropping {:?}", packet),
        }
        Ok(())
    }

    /// Packets delivered since the last call, with their arrival time.
    pub fn poll(&mut self) -> Vec<Stamped<Packet>> {
        let mut ready = Vec::new();
        while let Ok(arrival) = self.incoming_rx.try_recv() {
            ready.push(arrival);
        }
        ready
    }

    /// Lets already queued datagrams leave, waiting at most `limit`.
    pub fn close(&mut self, limit: Duration) {
        self.outgoing_tx = None;
        if let Some(sender) = self.sender.take() {
            if self.runtime.block_on(timeout(limit, sender)).is_err() {
                warn!("Gave up flushing outgoing packets after {:?}", limit);
            }
        }
    }
}

pub struct Client {
    transport: Transport,
    client_id: Option<u32>,
    team: Option<Team>,
    connected: bool,
    last_connect_attempt: Option<Instant>,

    game_state: ClientGameState,
    input_manager: InputManager,
    renderer: Renderer,
    reliable: ReliableReceiver,

    ping_ms: u64,
    fake_ping_ms: u64,
    toggles: Toggles,
}

impl Client {
    pub fn new(
        server_addr: &str,
        fake_ping_ms: u64,
        drop_rate: f64,
        width: f32,
        height: f32,
    ) -> Result<Self, Box<dyn std::error::Error>> {
        let transport = Transport::new(server_addr, fake_ping_ms, drop_rate)?;
        let field = FieldGeometry::default();

        Ok(Client {
            transport,
            client_id: None,
            team: None,
            connected: false,
            last_connect_attempt: None,
            game_state: ClientGameState::default(),
            input_manager: InputManager::new(),
            renderer: Renderer::new(width, height, field),
            reliable: ReliableReceiver::new(),
            ping_ms: 0,
            fake_ping_ms,
            toggles: Toggles {
                prediction: true,
                reconciliation: true,
                interpolation: true,
            },
        })
    }

    pub fn client_id(&self) -> Option<u32> {
        self.client_id
    }

    pub fn game_state(&self) -> &ClientGameState {
        &self.game_state
    }

    /// Sends `Connect` until the server answers, once per retry interval.
    fn maintain_connection(&mut self, now: Instant) {
        if self.connected {
            return;
        }
        let due = self
            .last_connect_attempt
            .map_or(true, |last| now.duration_since(last) >= CONNECT_RETRY);
        if !due {
            return;
        }

        info!("Connecting to server...");
        self.last_connect_attempt = Some(now);
        self.send_packet(&Packet::Connect {
            client_version: CLIENT_VERSION,
        });
    }

    fn send_packet(&mut self, packet: &Packet) {
        if let Err(e) = self.transport.send(packet) {
            error!("Error sending packet: {}", e);
        }
    }

    pub fn handle_packet(&mut self, packet: Packet, received_at: Instant) {
        match packet {
            Packet::Connected { client_id, team } => {
                info!("Connected! Client ID: {} ({:?})", client_id, team);
                self.client_id = Some(client_id);
                self.team = Some(team);
                self.connected = true;
            }

            Packet::GameState {
                tick,
                timestamp,
                last_processed_input,
                players,
                ball,
            } => {
                if timestamp > 0 {
                    self.ping_ms = now_millis().saturating_sub(timestamp);
                }

                for event in self.game_state.apply_server_state(
                    tick,
                    players,
                    &last_processed_input,
                    ball,
                    received_at,
                    self.client_id,
                    self.toggles.reconciliation,
                ) {
                    debug!("Ball event from snapshot: {:?}", event);
                }
            }

            Packet::BallEvent { sequence, event } => {
                // Always acknowledge: the previous ack may have been lost.
                self.send_packet(&Packet::Ack { sequence });
                if !self.reliable.accept(sequence) {
                    return;
                }
                for event in self.game_state.apply_ball_event(event, received_at) {
                    info!("Ball event: {:?}", event);
                }
            }

            Packet::Disconnected { reason } => {
                warn!("Disconnected: {}", reason);
                self.connected = false;
                self.client_id = None;
                self.team = None;
                self.reliable = ReliableReceiver::new();
            }

            other => {
                warn!("Unexpected packet type: {:?}", other);
            }
        }
    }

    fn send_input(&mut self, input: InputState) {
        if !self.connected || self.client_id.is_none() {
            return;
        }

        self.send_packet(&input.to_packet());

        if self.toggles.prediction {
            self.game_state.apply_prediction(&input);
        }
    }

    fn handle_toggles(&mut self, toggles: Toggles) {
        if toggles.prediction {
            self.toggles.prediction = !self.toggles.prediction;
            info!("Client-side prediction: {}", self.toggles.prediction);
        }
        if toggles.reconciliation {
            self.toggles.reconciliation = !self.toggles.reconciliation;
            info!("Server reconciliation: {}", self.toggles.reconciliation);
        }
        if toggles.interpolation {
            self.toggles.interpolation = !self.toggles.interpolation;
            info!("Interpolation: {}", self.toggles.interpolation);
        }
    }

    fn render(&self) {
        let players = self
            .game_state
            .render_players(self.client_id, self.toggles.prediction);
        let ball = self.game_state.ball_position(self.toggles.interpolation);
        let mirrored = self.game_state.bridge().ball();

        let config = RenderConfig {
            client_id: self.client_id,
            team: self.team,
            toggles: self.toggles,
            ping_ms: self.ping_ms,
            fake_ping_ms: self.fake_ping_ms,
            ball_phase: mirrored.phase(),
            ball_possessor: mirrored.possessor(),
            recent_events: self
                .game_state
                .recent_events
                .iter()
                .map(|(_, event)| *event)
                .collect(),
        };

        self.renderer.render(&players, ball, &config);
    }

    /// Drives the client once per rendered frame until Escape is pressed.
    pub async fn run(&mut self) -> Result<(), Box<dyn std::error::Error>> {
        loop {
            if is_key_pressed(KeyCode::Escape) {
                break;
            }

            self.maintain_connection(Instant::now());

            for (received_at, packet) in self.transport.poll() {
                self.handle_packet(packet, received_at);
            }

            let (toggles, input_to_send) = self.input_manager.update();
            self.handle_toggles(toggles);
            if let Some(input) = input_to_send {
                self.send_input(input);
            }

            self.game_state
                .update(get_frame_time(), self.client_id, self.toggles.prediction);
            self.render();

            next_frame().await;
        }

        if self.connected {
            self.send_packet(&Packet::Disconnect);
        }
        self.transport.close(Duration::from_millis(self.fake_ping_ms + 100));

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::Vector3;
    use shared::{BallEvent, BallPhase, ReliableBallEvent, ReplicationSnapshot, MATCH_BALL_ID};
    use std::collections::HashMap;

    fn fake_server() -> std::net::UdpSocket {
        let socket = std::net::UdpSocket::bind("127.0.0.1:0").unwrap();
        socket
            .set_read_timeout(Some(Duration::from_millis(500)))
            .unwrap();
        socket
    }

    fn client_for(server: &std::net::UdpSocket) -> Client {
        let addr = server.local_addr().unwrap().to_string();
        Client::new(&addr, 0, 0.0, 800.0, 600.0).unwrap()
    }

    fn receive(server: &std::net::UdpSocket) -> Packet {
        let mut buffer = [0u8; MAX_DATAGRAM_SIZE];
        let (len, _) = server.recv_from(&mut buffer).unwrap();
        decode_packet(&buffer[..len]).unwrap()
    }

    /// Polls until something arrives or half a second has passed.
    fn wait_for_packets(transport: &mut Transport) -> Vec<Stamped<Packet>> {
        for _ in 0..50 {
            let packets = transport.poll();
            if !packets.is_empty() {
                return packets;
            }
            std::thread::sleep(Duration::from_millis(10));
        }
        Vec::new()
    }

    fn out_of_bounds_event(timestamp: u64) -> ReliableBallEvent {
        ReliableBallEvent {
            server_timestamp: timestamp,
            phase: BallPhase::OutOfBounds,
            possessor: None,
            event: BallEvent::BallOutOfBounds {
                ball: MATCH_BALL_ID,
            },
        }
    }

    #[test]
    fn test_connected_sets_identity() {
        let server = fake_server();
        let mut client = client_for(&server);

        client.handle_packet(
            Packet::Connected {
                client_id: 7,
                team: Team::TeamB,
            },
            Instant::now(),
        );

        assert_eq!(client.client_id(), Some(7));
        assert!(client.connected);
        assert_eq!(client.team, Some(Team::TeamB));
    }

    #[test]
    fn test_connect_is_retried() {
        let server = fake_server();
        let mut client = client_for(&server);
        let start = Instant::now();

        client.maintain_connection(start);
        client.maintain_connection(start + Duration::from_millis(10));

        assert!(matches!(
            receive(&server),
            Packet::Connect { client_version: CLIENT_VERSION }
        ));
        server.set_nonblocking(true).unwrap();
        let mut buffer = [0u8; MAX_DATAGRAM_SIZE];
        assert!(server.recv_from(&mut buffer).is_err());

        assert_eq!(client.last_connect_attempt, Some(start));
        client.maintain_connection(start + CONNECT_RETRY);
        assert_eq!(client.last_connect_attempt, Some(start + CONNECT_RETRY));
    }

    #[test]
    fn test_duplicate_ball_event_acked_but_applied_once() {
        let server = fake_server();
        let mut client = client_for(&server);

        client.handle_packet(
            Packet::GameState {
                tick: 1,
                timestamp: 0,
                last_processed_input: HashMap::new(),
                players: Vec::new(),
                ball: ReplicationSnapshot {
                    ball: MATCH_BALL_ID,
                    position: Vector3::new(0.0, 0.0, 11.0),
                    linear_velocity: Vector3::zeros(),
                    phase: BallPhase::Loose,
                    possessor: None,
                    server_timestamp: 1,
                },
            },
            Instant::now(),
        );

        for _ in 0..2 {
            client.handle_packet(
                Packet::BallEvent {
                    sequence: 1,
                    event: out_of_bounds_event(2),
                },
                Instant::now(),
            );
        }

        for _ in 0..2 {
            assert!(matches!(receive(&server), Packet::Ack { sequence: 1 }));
        }

        let gameplay_events = client
            .game_state()
            .recent_events
            .iter()
            .filter(|(_, event)| event.is_gameplay_event())
            .count();
        assert_eq!(gameplay_events, 1);
    }

    #[test]
    fn test_fake_latency_delays_delivery() {
        let server = fake_server();
        let addr = server.local_addr().unwrap().to_string();
        let transport = Transport::new(&addr, 200, 0.0).unwrap();

        let sent_at = Instant::now();
        transport.send(&Packet::Disconnect).unwrap();

        assert!(matches!(receive(&server), Packet::Disconnect));
        assert!(sent_at.elapsed() >= Duration::from_millis(100));
    }

    #[test]
    fn test_server_packets_delivered() {
        let server = fake_server();
        let addr = server.local_addr().unwrap().to_string();
        let mut transport = Transport::new(&addr, 0, 0.0).unwrap();

        let bytes = encode_packet(&Packet::Connected {
            client_id: 3,
            team: Team::TeamA,
        })
        .unwrap();
        server
            .send_to(&bytes, ("127.0.0.1", transport.local_addr().port()))
            .unwrap();

        let packets = wait_for_packets(&mut transport);
        assert_eq!(packets.len(), 1);
        assert!(matches!(
            packets[0].1,
            Packet::Connected {
                client_id: 3,
                team: Team::TeamA
            }
        ));
    }

    #[test]
    fn test_full_loss_drops_outgoing() {
        let server = fake_server();
        server
            .set_read_timeout(Some(Duration::from_millis(100)))
            .unwrap();
        let addr = server.local_addr().unwrap().to_string();
        let transport = Transport::new(&addr, 0, 1.0).unwrap();

        transport.send(&Packet::Disconnect).unwrap();

        let mut buffer = [0u8; MAX_DATAGRAM_SIZE];
        assert!(server.recv_from(&mut buffer).is_err());
    }

    #[test]
    fn test_foreign_datagrams_ignored() {
        let server = fake_server();
        let mut client = client_for(&server);
        let stranger = std::net::UdpSocket::bind("127.0.0.1:0").unwrap();
        let client_port = client.transport.local_addr().port();

        let bytes = encode_packet(&Packet::Disconnected {
            reason: "spoofed".to_string(),
        })
        .unwrap();
        stranger
            .send_to(&bytes, ("127.0.0.1", client_port))
            .unwrap();
        std::thread::sleep(Duration::from_millis(50));

        assert!(client.transport.poll().is_empty());
    }

    #[test]
    fn test_close_flushes_queued_packets() {
        let server = fake_server();
        let addr = server.local_addr().unwrap().to_string();
        let mut transport = Transport::new(&addr, 40, 0.0).unwrap();

        transport.send(&Packet::Disconnect).unwrap();
        transport.close(Duration::from_millis(500));

        assert!(matches!(receive(&server), Packet::Disconnect));
    }
}
