//! # Rewind Server Library
//!
//! An authoritative game server with server-side lag compensation. Hit tests
//! for a client's shot are run against the world as that client saw it, not
//! against the present state, so players can aim at what is on their screen.
//!
//! ## Core Responsibilities
//!
//! ### Authoritative Simulation
//! The server runs the definitive version of movement, animation and hit
//! detection. Clients only submit inputs and shots.
//!
//! ### History Recording
//! After every simulation step the position, orientation, bounds and
//! animation of each tracked entity is sampled into a short per-entity
//! history covering the compensation window.
//!
//! ### Compensated Hit Resolution
//! Each queued shot opens a compensation session: every entity the game rules
//! care about is moved back to where the shooter saw it, the hit-scan runs,
//! and the session puts everything back exactly as it was.
//!
//! ## Module Organization
//!
//! ### Entity Module (`entity`)
//! Generational handles and the slot arena that owns world entities. A stale
//! handle never resolves to a reused slot.
//!
//! ### Lag Compensation Module (`lag_compensation`)
//! The engine itself, independent of the concrete world:
//! - Per-tick recording into bounded histories
//! - Interpolation between samples, including angles and animation cycles
//! - The begin/end session bracket with exact restore
//! - Recovery when a rewound hull would end up inside something solid
//!
//! ### Physics Module (`physics`)
//! Axis-aligned boxes with hull sweeps and ray casts.
//!
//! ### Game Module (`game`)
//! The concrete world the engine runs against: players and props in an
//! arena, static cover, movement, animation and hit-scan.
//!
//! ### Client Manager Module (`client_manager`)
//! Connection lifecycle, input and shot queues, latency estimates.
//!
//! ### Network Module (`network`)
//! UDP transport and the tick loop tying everything together.
//!
//! ## Tick Pipeline
//!
//! 1. Apply queued inputs in timestamp order
//! 2. Advance physics and animation
//! 3. Record a history sample for every tracked entity
//! 4. Resolve queued shots, each inside its own compensation session
//! 5. Broadcast state, hit confirmations and periodic pings
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use server::lag_compensation::CompensationConfig;
//! use server::network::Server;
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut server = Server::new(
//!         "127.0.0.1:8080",
//!         Duration::from_secs_f64(1.0 / 64.0),
//!         32,
//!         CompensationConfig::default(),
//!     )
//!     .await?;
//!
//!     server.run().await?;
//!     Ok(())
//! }
//! ```

pub mod client_manager;
pub mod entity;
pub mod game;
pub mod lag_compensation;
pub mod network;
pub mod physics;
