//! The narrow view of the game world the compensation engine works through.
//!
//! Entities only need to expose a transform and an animation state; the world
//! resolves handles, lists connected players and answers hull traces.

use super::sample::AnimationState;
use crate::entity::EntityHandle;
use shared::{QAngle, Vec3};

pub trait HasTransform {
    fn origin(&self) -> Vec3;
    fn set_origin(&mut self, origin: Vec3);
    fn angles(&self) -> QAngle;
    fn set_angles(&mut self, angles: QAngle);
    /// Collision bounds relative to the origin, as `(mins, maxs)`.
    fn bounds(&self) -> (Vec3, Vec3);
    fn set_bounds(&mut self, mins: Vec3, maxs: Vec3);
    /// Time the entity's state last changed, in server seconds.
    fn simulation_time(&self) -> f64;
    fn set_simulation_time(&mut self, time: f64);
    fn is_alive(&self) -> bool;
}

pub trait HasAnimationState {
    fn animation(&self) -> AnimationState;
    fn set_animation(&mut self, state: &AnimationState);
}

/// Result of sweeping an entity's hull from `start` to `end`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Trace {
    /// Fraction of the path travelled before the first blocking contact.
    pub fraction: f32,
    pub end_pos: Vec3,
    /// The hull already overlaps something at `start`.
    pub start_solid: bool,
    /// Blocking entity, `None` for static geometry or a clear path.
    pub hit: Option<EntityHandle>,
}

impl Trace {
    pub fn clear(end: Vec3) -> Self {
        Self {
            fraction: 1.0,
            end_pos: end,
            start_solid: false,
            hit: None,
        }
    }

    pub fn is_clear(&self) -> bool {
        !self.start_solid && self.fraction >= 1.0
    }
}

pub trait CompensationWorld {
    type Entity: HasTransform + HasAnimationState;

    fn entity(&self, handle: EntityHandle) -> Option<&Self::Entity>;
    fn entity_mut(&mut self, handle: EntityHandle) -> Option<&mut Self::Entity>;

    /// Every currently connected player entity.
    fn connected_players(&self) -> Vec<EntityHandle>;

    /// Sweeps `mover`'s hull, ignoring `mover` itself and everything in `ignore`.
    /// A zero-length trace (`start == end`) reports whether the hull fits at `start`.
    fn trace_hull(&self, mover: EntityHandle, start: Vec3, end: Vec3, ignore: &[EntityHandle])
        -> Trace;
}

/// Weapon information carried with a command, used only by the cone filter.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ShotInfo {
    pub origin: Vec3,
    pub direction: Vec3,
    pub range: f32,
}

/// What the game rules get to see about the command being resolved.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct CommandSnapshot {
    pub sequence: u32,
    pub command_time: f64,
    pub view_angles: QAngle,
    pub shot: Option<ShotInfo>,
}

/// Game-rule decision of which entities a particular shot should rewind.
pub trait CompensationFilter {
    fn wants_compensation_for(
        &self,
        requester: EntityHandle,
        candidate: EntityHandle,
        command: &CommandSnapshot,
    ) -> bool;
}

impl<F> CompensationFilter for F
where
    F: Fn(EntityHandle, EntityHandle, &CommandSnapshot) -> bool,
{
    fn wants_compensation_for(
        &self,
        requester: EntityHandle,
        candidate: EntityHandle,
        command: &CommandSnapshot,
    ) -> bool {
        self(requester, candidate, command)
    }
}

/// Filter that considers every tracked entity.
#[derive(Debug, Clone, Copy, Default)]
pub struct CompensateAll;

impl CompensationFilter for CompensateAll {
    fn wants_compensation_for(&self, _: EntityHandle, _: EntityHandle, _: &CommandSnapshot) -> bool {
        true
    }
}
