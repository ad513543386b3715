//! # Lag Compensation
//!
//! Server-side rewind of entity state so that hit tests see the world the way
//! the shooting client saw it when it fired.
//!
//! ## Lifecycle
//!
//! 1. Once per tick, after simulation, [`LagCompensator::record_tick`] samples
//!    every tracked entity into a bounded per-entity history.
//! 2. When a command needs a hit test, [`LagCompensator::begin_compensation`]
//!    works out the client's view time, interpolates every accepted entity to
//!    that instant and writes the result into the live world.
//! 3. The caller runs its traces against the rewound world.
//! 4. [`LagCompensator::end_compensation`] restores everything it changed,
//!    except aspects that something else has written in the meantime.
//!
//! Only one session may be open at a time, and recording while a session is
//! open is a programming error.
//!
//! ## Module Organization
//!
//! - `config`: tunables and their JSON loading
//! - `world`: the traits the game world and its entities implement
//! - `sample`, `history`: recorded snapshots and the per-entity logs
//! - `interpolate`: blending two snapshots for a target time
//! - `resolver`: keeping rewound hulls out of solid space
//! - `records`, `session`: the begin/end bracket and its bookkeeping
//! - `compensator`, `recorder`: the owning engine type

mod compensator;
mod config;
mod history;
mod interpolate;
mod recorder;
mod records;
mod resolver;
mod sample;
mod session;
mod world;

#[cfg(test)]
pub(crate) mod test_support;

pub use compensator::LagCompensator;
pub use config::{CompensationConfig, ConfigError};
pub use history::{Bracket, EntityHistory, HistoryMiss, HistoryStore};
pub use interpolate::{interpolate, lerp_animation, lerp_cycle, lerp_pose};
pub use recorder::RecordSummary;
pub use records::{ChangeFlags, CHANGE_EPSILON};
pub use resolver::{Outcome, Resolution};
pub use sample::{AnimationLayer, AnimationState, Pose, Sample};
pub use session::{compute_target_time, CompensationRequest, SessionHandle, SessionReport};
pub use world::{
    CommandSnapshot, CompensateAll, CompensationFilter, CompensationWorld, HasAnimationState,
    HasTransform, ShotInfo, Trace,
};
