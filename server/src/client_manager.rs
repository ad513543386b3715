//! Client connection management, input queuing and latency tracking
//!
//! This module handles the server-side management of connected clients, including:
//! - Client connection lifecycle (connect, disconnect, timeout)
//! - Input buffering and chronological ordering for deterministic simulation
//! - Queuing of fire commands until the tick that resolves them
//! - Smoothed latency estimates from ping/pong round trips
//!
//! The latency estimate and each client's interpolation delay are what the
//! lag compensator needs to work out which moment a shot was aimed at.

use log::{debug, info};
use shared::{InputState, QAngle};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

/// Weight of a new round-trip sample in the smoothed latency.
const LATENCY_SMOOTHING: f64 = 0.2;
const CLIENT_TIMEOUT: Duration = Duration::from_secs(5);

/// A shot waiting to be resolved on the next tick.
#[derive(Debug, Clone, PartialEq)]
pub struct FireCommand {
    pub sequence: u32,
    /// Server time the client generated the command for.
    pub command_time: f64,
    pub interpolation_delay: f64,
    pub view_angles: QAngle,
    pub range: f32,
}

/// Represents a connected client and their queued commands
///
/// Each client maintains:
/// - Connection metadata (ID, address, last activity)
/// - Input acknowledgment tracking for reliable delivery
/// - Buffered inputs and shots waiting for processing
/// - A smoothed one-way latency estimate
#[derive(Debug)]
pub struct Client {
    /// Unique client identifier assigned by the server
    pub id: u32,
    /// Network address for sending responses
    pub addr: SocketAddr,
    /// Last time we received any packet from this client
    pub last_seen: Instant,
    /// Highest input sequence number we've processed
    pub last_processed_input: u32,
    /// Buffered inputs waiting to be processed
    pub pending_inputs: Vec<InputState>,
    pub pending_shots: Vec<FireCommand>,
    /// Smoothed one-way latency in seconds, once a pong has arrived
    pub latency: Option<f64>,
    /// False when the client turned lag compensation off
    pub lag_compensation: bool,
}

impl Client {
    /// Creates a new client with the given ID and network address
    ///
    /// The client starts with no processed inputs and no latency estimate.
    pub fn new(id: u32, addr: SocketAddr, lag_compensation: bool) -> Self {
        Self {
            id,
            addr,
            last_seen: Instant::now(),
            last_processed_input: 0,
            pending_inputs: Vec::new(),
            pending_shots: Vec::new(),
            latency: None,
            lag_compensation,
        }
    }

    /// Adds a new input to the client's pending queue
    ///
    /// Inputs are kept in sequence order so that out-of-order packet
    /// delivery does not reorder the simulation.
    pub fn add_input(&mut self, input: InputState) {
        self.last_seen = Instant::now();
        self.pending_inputs.push(input);
        self.pending_inputs.sort_by_key(|i| i.sequence);
    }

    pub fn add_shot(&mut self, shot: FireCommand) {
        self.last_seen = Instant::now();
        self.pending_shots.push(shot);
    }

    /// Folds a round trip into the latency estimate
    ///
    /// `sent_at` is the server time echoed back in the pong and `now` the
    /// server time it arrived. Half the round trip is taken as the one-way
    /// latency.
    pub fn record_round_trip(&mut self, sent_at: f64, now: f64) {
        self.last_seen = Instant::now();
        let round_trip = now - sent_at;
        if round_trip < 0.0 {
            return;
        }
        let one_way = round_trip * 0.5;
        self.latency = Some(match self.latency {
            Some(previous) => previous + (one_way - previous) * LATENCY_SMOOTHING,
            None => one_way,
        });
    }

    /// Latency estimate, zero until measured
    pub fn latency_seconds(&self) -> f64 {
        self.latency.unwrap_or(0.0)
    }

    /// Checks if the client has exceeded the connection timeout
    pub fn is_timed_out(&self, timeout: Duration) -> bool {
        self.last_seen.elapsed() > timeout
    }
}

/// Manages all connected clients and their command processing
///
/// The ClientManager provides centralized control over client connections,
/// enforces server capacity limits, and ensures deterministic input processing
/// by maintaining chronological order across all clients.
pub struct ClientManager {
    /// Connected clients indexed by their unique ID
    clients: HashMap<u32, Client>,
    /// Next available client ID for new connections
    next_client_id: u32,
    /// Maximum number of concurrent clients allowed
    max_clients: usize,
}

impl ClientManager {
    /// Creates a new client manager with the specified capacity limit
    ///
    /// Client IDs start from 1 and increment for each new connection.
    pub fn new(max_clients: usize) -> Self {
        Self {
            clients: HashMap::new(),
            next_client_id: 1,
            max_clients,
        }
    }

    /// Attempts to add a new client connection
    ///
    /// Returns Some(client_id) if successful, None if server is at capacity.
    pub fn add_client(&mut self, addr: SocketAddr, lag_compensation: bool) -> Option<u32> {
        if self.clients.len() >= self.max_clients {
            return None;
        }

        let client_id = self.next_client_id;
        self.next_client_id += 1;

        let client = Client::new(client_id, addr, lag_compensation);
        info!(
            "Client {} connected from {} (lag compensation {})",
            client_id,
            addr,
            if lag_compensation { "on" } else { "off" }
        );
        self.clients.insert(client_id, client);

        Some(client_id)
    }

    /// Removes a client from the server
    ///
    /// Returns true if the client was found and removed, false if they were
    /// already gone.
    pub fn remove_client(&mut self, client_id: &u32) -> bool {
        if let Some(client) = self.clients.remove(client_id) {
            info!("Client {} disconnected", client.id);
            true
        } else {
            false
        }
    }

    pub fn client(&self, client_id: u32) -> Option<&Client> {
        self.clients.get(&client_id)
    }

    /// Finds a client ID by their network address
    pub fn find_client_by_addr(&self, addr: SocketAddr) -> Option<u32> {
        self.clients
            .iter()
            .find(|(_, client)| client.addr == addr)
            .map(|(id, _)| *id)
    }

    /// Adds an input to a specific client's pending queue
    ///
    /// Returns false if the client ID is invalid.
    pub fn add_input(&mut self, client_id: u32, input: InputState) -> bool {
        if let Some(client) = self.clients.get_mut(&client_id) {
            client.add_input(input);
            true
        } else {
            false
        }
    }

    /// Queues a shot for resolution on the next tick
    pub fn add_shot(&mut self, client_id: u32, shot: FireCommand) -> bool {
        if let Some(client) = self.clients.get_mut(&client_id) {
            client.add_shot(shot);
            true
        } else {
            false
        }
    }

    /// Drains every queued shot, oldest command first
    pub fn take_shots(&mut self) -> Vec<(u32, FireCommand)> {
        let mut shots: Vec<(u32, FireCommand)> = self
            .clients
            .iter_mut()
            .flat_map(|(id, client)| {
                let id = *id;
                client.pending_shots.drain(..).map(move |shot| (id, shot))
            })
            .collect();
        shots.sort_by(|a, b| {
            a.1.command_time
                .total_cmp(&b.1.command_time)
                .then(a.0.cmp(&b.0))
        });
        shots
    }

    pub fn record_pong(&mut self, client_id: u32, sent_at: f64, now: f64) {
        if let Some(client) = self.clients.get_mut(&client_id) {
            client.record_round_trip(sent_at, now);
            debug!(
                "Client {} latency {:.1}ms",
                client_id,
                client.latency_seconds() * 1000.0
            );
        }
    }

    /// Gets all unprocessed inputs sorted chronologically
    ///
    /// Collects inputs from all clients that haven't been processed yet and
    /// sorts them by timestamp to ensure deterministic processing order.
    pub fn get_chronological_inputs(&self) -> Vec<(u32, InputState)> {
        let mut all_inputs: Vec<(u32, InputState)> = Vec::new();

        for (client_id, client) in &self.clients {
            for input in &client.pending_inputs {
                if input.sequence > client.last_processed_input {
                    all_inputs.push((*client_id, input.clone()));
                }
            }
        }

        all_inputs.sort_by_key(|(_, input)| input.timestamp);
        all_inputs
    }

    /// Marks an input sequence as processed for a specific client
    pub fn mark_input_processed(&mut self, client_id: u32, sequence: u32) {
        if let Some(client) = self.clients.get_mut(&client_id) {
            client.last_processed_input = client.last_processed_input.max(sequence);
        }
    }

    /// Removes inputs that have been processed from all client buffers
    pub fn cleanup_processed_inputs(&mut self) {
        for client in self.clients.values_mut() {
            client
                .pending_inputs
                .retain(|input| input.sequence > client.last_processed_input);
        }
    }

    /// Gets the last processed input sequence for each client
    pub fn get_last_processed_inputs(&self) -> HashMap<u32, u32> {
        self.clients
            .iter()
            .map(|(id, client)| (*id, client.last_processed_input))
            .collect()
    }

    /// Checks for and removes timed-out clients
    ///
    /// Returns the removed client IDs so other systems can clean up.
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

    /// Gets all client IDs and their network addresses
    pub fn get_client_addrs(&self) -> Vec<(u32, SocketAddr)> {
        self.clients
            .iter()
            .map(|(id, client)| (*id, client.addr))
            .collect()
    }

    /// Returns the number of currently connected clients
    pub fn len(&self) -> usize {
        self.clients.len()
    }

    /// Returns true if no clients are currently connected
    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }
}
