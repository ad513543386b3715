pub mod math;

pub use math::{QAngle, Vec3};

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

pub const PLAYER_SPEED: f32 = 250.0;
pub const PLAYER_MINS: Vec3 = Vec3::new(-16.0, -16.0, 0.0);
pub const PLAYER_MAXS: Vec3 = Vec3::new(16.0, 16.0, 72.0);
pub const PLAYER_MAXS_CROUCHED: Vec3 = Vec3::new(16.0, 16.0, 36.0);
pub const EYE_HEIGHT: f32 = 64.0;
pub const WORLD_HALF_EXTENT: f32 = 2048.0;
pub const DEFAULT_INTERPOLATION_DELAY: f32 = 0.1;
pub const CLIENT_VERSION: u32 = 2;

#[derive(Debug, Serialize, Deserialize, Clone)]
pub enum Packet {
    Connect {
        client_version: u32,
        /// The client's "lag compensation" setting; false opts out.
        lag_compensation: bool,
    },
    Input {
        sequence: u32,
        timestamp: u64,
        forward: f32,
        side: f32,
        crouch: bool,
        view_angles: QAngle,
    },
    /// A hit-scan shot. `command_time` is the server time the client's
    /// command was generated for, `interpolation_delay` its render delay.
    Fire {
        sequence: u32,
        command_time: f64,
        interpolation_delay: f32,
        view_angles: QAngle,
        range: f32,
    },
    Pong {
        server_time: f64,
    },
    Disconnect,

    Connected {
        client_id: u32,
        team: u8,
    },
    GameState {
        tick: u32,
        server_time: f64,
        last_processed_input: HashMap<u32, u32>,
        players: Vec<PlayerState>,
    },
    Ping {
        server_time: f64,
    },
    HitConfirmed {
        shooter: u32,
        target: u32,
        sequence: u32,
        rewound_to: f64,
    },
    Disconnected {
        reason: String,
    },
}

/// Replicated view of a player as sent to clients.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct PlayerState {
    pub id: u32,
    pub team: u8,
    pub origin: Vec3,
    pub angles: QAngle,
    pub crouched: bool,
    pub alive: bool,
}

impl PlayerState {
    pub fn new(id: u32, team: u8, origin: Vec3) -> Self {
        Self {
            id,
            team,
            origin,
            angles: QAngle::default(),
            crouched: false,
            alive: true,
        }
    }

    pub fn eye_position(&self) -> Vec3 {
        self.origin + Vec3::new(0.0, 0.0, EYE_HEIGHT)
    }
}

#[derive(Debug, Clone)]
pub struct InputState {
    pub sequence: u32,
    pub timestamp: u64,
    pub forward: f32,
    pub side: f32,
    pub crouch: bool,
    pub view_angles: QAngle,
}
