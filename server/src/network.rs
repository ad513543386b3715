//! Server network layer handling UDP communications and game loop coordination

use crate::client_manager::{ClientManager, FireCommand};
use crate::game::{GameState, TeamFilter};
use crate::lag_compensation::{
    CommandSnapshot, CompensationConfig, CompensationRequest, LagCompensator, ShotInfo,
};
use bincode::{deserialize, serialize};
use log::{debug, error, info, trace, warn};
use shared::{InputState, Packet, Vec3, CLIENT_VERSION, EYE_HEIGHT, PLAYER_MAXS};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::UdpSocket;
use tokio::sync::{mpsc, RwLock};
use tokio::time::{interval, MissedTickBehavior};

/// Ticks between latency probes.
const PING_INTERVAL_TICKS: u32 = 32;
/// Longest simulated step after a stall.
const MAX_TICK_SECONDS: f32 = 0.05;

/// Messages sent from network tasks to main server loop
#[derive(Debug)]
pub enum ServerMessage {
    PacketReceived {
        packet: Packet,
        addr: SocketAddr,
    },
    ClientTimeout {
        client_id: u32,
    },
    Shutdown,
}

/// Messages sent from game loop to network tasks
#[derive(Debug)]
pub enum GameMessage {
    SendPacket {
        packet: Packet,
        addr: SocketAddr,
    },
    BroadcastPacket {
        packet: Packet,
        exclude: Option<u32>,
    },
}

/// What the tick loop knows about the client behind a shot.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Shooter {
    pub client_id: u32,
    pub latency: f64,
    pub lag_compensation: bool,
}

/// Resolves one shot against the world as the shooter saw it.
///
/// Returns the `HitConfirmed` packet when an opposing player is struck.
pub fn resolve_shot(
    game: &mut GameState,
    compensator: &mut LagCompensator,
    filter: &TeamFilter,
    now: f64,
    shooter: Shooter,
    shot: &FireCommand,
) -> Option<Packet> {
    let shooter_handle = game.player_handle(shooter.client_id)?;
    let (eye, shooter_team) = {
        let player = game.get(shooter_handle)?;
        if !player.alive {
            return None;
        }
        let eye_height = EYE_HEIGHT * player.maxs.z / PLAYER_MAXS.z;
        (player.origin + Vec3::new(0.0, 0.0, eye_height), player.team())
    };
    let direction = shot.view_angles.forward();

    let request = CompensationRequest::new(
        shooter_handle,
        shooter.latency,
        shot.interpolation_delay,
        shot.command_time,
    )
    .with_command(CommandSnapshot {
        sequence: shot.sequence,
        command_time: shot.command_time,
        view_angles: shot.view_angles,
        shot: Some(ShotInfo {
            origin: eye,
            direction,
            range: shot.range,
        }),
    })
    .opted_out(!shooter.lag_compensation);

    let (hit, report) = compensator.with_compensation(game, filter, now, &request, |world| {
        world.hitscan(shooter_handle, eye, direction, shot.range)
    });
    trace!(
        "Shot {} from client {}: {:?}, rewound {} entities to {:.3}",
        shot.sequence,
        shooter.client_id,
        hit,
        report.rewound,
        report.target_time
    );

    let hit = hit?;
    let victim = game.get(hit.entity)?;
    let target = victim.client_id()?;
    if victim.team() == shooter_team {
        return None;
    }

    Some(Packet::HitConfirmed {
        shooter: shooter.client_id,
        target,
        sequence: shot.sequence,
        rewound_to: report.target_time,
    })
}

/// Main server coordinating networking and game simulation
pub struct Server {
    socket: Arc<UdpSocket>,
    clients: Arc<RwLock<ClientManager>>,
    game_state: GameState,
    compensator: LagCompensator,
    tick_duration: Duration,

    // Communication channels
    server_tx: mpsc::UnboundedSender<ServerMessage>,
    server_rx: mpsc::UnboundedReceiver<ServerMessage>,
    game_tx: mpsc::UnboundedSender<GameMessage>,
    game_rx: mpsc::UnboundedReceiver<GameMessage>,
}

impl Server {
    pub async fn new(
        addr: &str,
        tick_duration: Duration,
        max_clients: usize,
        config: CompensationConfig,
    ) -> Result<Self, Box<dyn std::error::Error>> {
        let socket = Arc::new(UdpSocket::bind(addr).await?);
        info!("Server listening on {}", socket.local_addr()?);
        info!(
            "Lag compensation {} (window {:.2}s)",
            if config.enabled { "enabled" } else { "disabled" },
            config.max_compensation_window_seconds
        );

        let (server_tx, server_rx) = mpsc::unbounded_channel();
        let (game_tx, game_rx) = mpsc::unbounded_channel();

        Ok(Server {
            socket,
            clients: Arc::new(RwLock::new(ClientManager::new(max_clients))),
            game_state: GameState::with_cover(),
            compensator: LagCompensator::new(config),
            tick_duration,
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
    pub fn shutdown_sender(&self) -> mpsc::UnboundedSender<ServerMessage> {
        self.server_tx.clone()
    }

    /// Spawns task that continuously listens for incoming packets
    async fn spawn_network_receiver(&self) {
        let socket = Arc::clone(&self.socket);
        let server_tx = self.server_tx.clone();

        tokio::spawn(async move {
            let mut buffer = [0u8; 2048];

            loop {
                match socket.recv_from(&mut buffer).await {
                    Ok((len, addr)) => {
                        if let Ok(packet) = deserialize::<Packet>(&buffer[0..len]) {
                            if let Err(e) =
                                server_tx.send(ServerMessage::PacketReceived { packet, addr })
                            {
                                error!("Failed to send packet to main loop: {}", e);
                                break;
                            }
                        } else {
                            warn!("Failed to deserialize packet from {}", addr);
                        }
                    }
                    Err(e) => {
                        error!("Error receiving packet: {}", e);
                        tokio::time::sleep(Duration::from_millis(10)).await;
                    }
                }
            }
        });
    }

    /// Spawns task that processes outgoing packet queue
    async fn spawn_network_sender(&mut self) {
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
    async fn spawn_timeout_checker(&self) {
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
                        break;
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
        let data = serialize(packet)?;
        socket.send_to(&data, addr).await?;
        Ok(())
    }

    fn send_packet(&self, packet: Packet, addr: SocketAddr) {
        if let Err(e) = self.game_tx.send(GameMessage::SendPacket { packet, addr }) {
            error!("Failed to queue packet for sending: {}", e);
        }
    }

    fn broadcast_packet(&self, packet: Packet, exclude: Option<u32>) {
        if let Err(e) = self.game_tx.send(GameMessage::BroadcastPacket { packet, exclude }) {
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
            Packet::Connect {
                client_version,
                lag_compensation,
            } => {
                info!(
                    "Client connecting from {} (version: {})",
                    addr, client_version
                );

                if client_version != CLIENT_VERSION {
                    self.send_packet(
                        Packet::Disconnected {
                            reason: "Protocol version mismatch".to_string(),
                        },
                        addr,
                    );
                    return;
                }

                // Remove existing connection if present
                if let Some(existing_id) = self.client_for(addr).await {
                    info!("Removing existing client {} from {}", existing_id, addr);
                    let mut clients = self.clients.write().await;
                    clients.remove_client(&existing_id);
                    self.game_state.remove_player(&existing_id);
                }

                let client_id = {
                    let mut clients = self.clients.write().await;
                    clients.add_client(addr, lag_compensation)
                };

                match client_id {
                    Some(client_id) => {
                        let handle = self.game_state.add_player(client_id);
                        let team = self
                            .game_state
                            .get(handle)
                            .and_then(|player| player.team())
                            .unwrap_or_default();
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
                forward,
                side,
                crouch,
                view_angles,
            } => {
                if let Some(client_id) = self.client_for(addr).await {
                    let input = InputState {
                        sequence,
                        timestamp,
                        forward,
                        side,
                        crouch,
                        view_angles,
                    };
                    let mut clients = self.clients.write().await;
                    clients.add_input(client_id, input);
                }
            }

            Packet::Fire {
                sequence,
                command_time,
                interpolation_delay,
                view_angles,
                range,
            } => {
                if let Some(client_id) = self.client_for(addr).await {
                    let shot = FireCommand {
                        sequence,
                        command_time,
                        interpolation_delay: interpolation_delay as f64,
                        view_angles,
                        range,
                    };
                    let mut clients = self.clients.write().await;
                    clients.add_shot(client_id, shot);
                }
            }

            Packet::Pong { server_time } => {
                if let Some(client_id) = self.client_for(addr).await {
                    let mut clients = self.clients.write().await;
                    clients.record_pong(client_id, server_time, self.game_state.time);
                }
            }

            Packet::Disconnect => {
                if let Some(client_id) = self.client_for(addr).await {
                    let mut clients = self.clients.write().await;
                    clients.remove_client(&client_id);
                    self.game_state.remove_player(&client_id);
                }
            }

            _ => {
                warn!("Unexpected packet type from client at {}", addr);
            }
        }
    }

    /// Applies queued inputs in timestamp order, then advances the world
    async fn process_inputs(&mut self, dt: f32) {
        let all_inputs = {
            let clients = self.clients.read().await;
            clients.get_chronological_inputs()
        };

        {
            let mut clients = self.clients.write().await;
            for (client_id, input) in &all_inputs {
                self.game_state.apply_input(*client_id, input);
                clients.mark_input_processed(*client_id, input.sequence);
            }
            clients.cleanup_processed_inputs();
        }

        self.game_state.update_physics(dt);
    }

    /// Resolves every shot queued since the last tick inside its own
    /// compensation bracket
    async fn resolve_shots(&mut self) {
        let shots: Vec<(Shooter, FireCommand)> = {
            let mut clients = self.clients.write().await;
            clients
                .take_shots()
                .into_iter()
                .filter_map(|(client_id, shot)| {
                    let client = clients.client(client_id)?;
                    Some((
                        Shooter {
                            client_id,
                            latency: client.latency_seconds(),
                            lag_compensation: client.lag_compensation,
                        },
                        shot,
                    ))
                })
                .collect()
        };

        if shots.is_empty() {
            return;
        }

        let filter = TeamFilter::from_world(&self.game_state, false);
        let now = self.game_state.time;
        for (shooter, shot) in shots {
            if let Some(hit) = resolve_shot(
                &mut self.game_state,
                &mut self.compensator,
                &filter,
                now,
                shooter,
                &shot,
            ) {
                debug!("Hit confirmed: {:?}", hit);
                self.broadcast_packet(hit, None);
            }
        }
    }

    /// Broadcasts current game state to all connected clients
    async fn broadcast_game_state(&mut self) {
        let last_processed_input = {
            let clients = self.clients.read().await;
            if clients.is_empty() {
                return;
            }
            clients.get_last_processed_inputs()
        };

        let packet = Packet::GameState {
            tick: self.game_state.tick,
            server_time: self.game_state.time,
            last_processed_input,
            players: self.game_state.player_states(),
        };
        self.broadcast_packet(packet, None);

        if self.game_state.tick % PING_INTERVAL_TICKS == 0 {
            self.broadcast_packet(
                Packet::Ping {
                    server_time: self.game_state.time,
                },
                None,
            );
        }
    }

    /// One server tick: simulate, record, resolve shots, publish
    async fn tick(&mut self, dt: f32) {
        self.process_inputs(dt).await;

        let summary = self
            .compensator
            .record_tick(&self.game_state, self.game_state.time);
        trace!("Tick {}: {:?}", self.game_state.tick, summary);

        self.resolve_shots().await;
        self.broadcast_game_state().await;
    }

    /// Main server loop coordinating all operations
    pub async fn run(&mut self) -> Result<(), Box<dyn std::error::Error>> {
        self.spawn_network_receiver().await;
        self.spawn_network_sender().await;
        self.spawn_timeout_checker().await;

        let mut tick_interval = interval(self.tick_duration);
        tick_interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut last_tick = Instant::now();

        info!("Server started successfully");

        loop {
            tokio::select! {
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

                _ = tick_interval.tick() => {
                    let now = Instant::now();
                    let mut dt = now.duration_since(last_tick).as_secs_f32();
                    last_tick = now;
                    if dt > MAX_TICK_SECONDS {
                        warn!("Tick took {:.3}s, capping to {:.3}s", dt, MAX_TICK_SECONDS);
                        dt = MAX_TICK_SECONDS;
                    }

                    self.tick(dt).await;

                    if self.game_state.tick % 64 == 0 {
                        let client_count = self.clients.read().await.len();
                        if client_count > 0 {
                            debug!(
                                "Tick {}: {} clients, {:.1}Hz, {} entities with history",
                                self.game_state.tick,
                                client_count,
                                1.0 / dt,
                                self.compensator.history().len()
                            );
                        }
                    }
                },
            }
        }

        if let Some(report) = self.compensator.restore_pending(&mut self.game_state) {
            warn!("Restored {} entities left rewound at shutdown", report.restored);
        }

        Ok(())
    }
}
