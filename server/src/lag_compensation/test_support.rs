//! Box world used by the session and recorder tests.

use super::compensator::LagCompensator;
use super::sample::AnimationState;
use super::world::{CompensationWorld, HasAnimationState, HasTransform, Trace};
use crate::entity::{EntityArena, EntityHandle};
use crate::physics::Aabb;
use shared::{QAngle, Vec3, PLAYER_MAXS, PLAYER_MINS};

pub const TICK_RATE: f64 = 64.0;

#[derive(Debug, Clone, PartialEq)]
pub struct MockEntity {
    pub origin: Vec3,
    pub angles: QAngle,
    pub mins: Vec3,
    pub maxs: Vec3,
    pub simulation_time: f64,
    pub alive: bool,
    pub animation: AnimationState,
    pub player: bool,
}

impl MockEntity {
    fn new(origin: Vec3, player: bool) -> Self {
        Self {
            origin,
            angles: QAngle::default(),
            mins: PLAYER_MINS,
            maxs: PLAYER_MAXS,
            simulation_time: 0.0,
            alive: true,
            animation: AnimationState::default(),
            player,
        }
    }
}

impl HasTransform for MockEntity {
    fn origin(&self) -> Vec3 {
        self.origin
    }
    fn set_origin(&mut self, origin: Vec3) {
        self.origin = origin;
    }
    fn angles(&self) -> QAngle {
        self.angles
    }
    fn set_angles(&mut self, angles: QAngle) {
        self.angles = angles;
    }
    fn bounds(&self) -> (Vec3, Vec3) {
        (self.mins, self.maxs)
    }
    fn set_bounds(&mut self, mins: Vec3, maxs: Vec3) {
        self.mins = mins;
        self.maxs = maxs;
    }
    fn simulation_time(&self) -> f64 {
        self.simulation_time
    }
    fn set_simulation_time(&mut self, time: f64) {
        self.simulation_time = time;
    }
    fn is_alive(&self) -> bool {
        self.alive
    }
}

impl HasAnimationState for MockEntity {
    fn animation(&self) -> AnimationState {
        self.animation.clone()
    }
    fn set_animation(&mut self, state: &AnimationState) {
        self.animation = state.clone();
    }
}

#[derive(Debug, Default)]
pub struct MockWorld {
    pub entities: EntityArena<MockEntity>,
    pub solids: Vec<Aabb>,
}

impl MockWorld {
    pub fn spawn_player(&mut self, origin: Vec3) -> EntityHandle {
        self.entities.insert(MockEntity::new(origin, true))
    }

    pub fn spawn_prop(&mut self, origin: Vec3) -> EntityHandle {
        self.entities.insert(MockEntity::new(origin, false))
    }

    pub fn get(&self, handle: EntityHandle) -> &MockEntity {
        self.entities.get(handle).expect("entity exists")
    }

    pub fn get_mut(&mut self, handle: EntityHandle) -> &mut MockEntity {
        self.entities.get_mut(handle).expect("entity exists")
    }

    /// Moves an entity the way a simulation step would.
    pub fn place(&mut self, handle: EntityHandle, origin: Vec3, now: f64) {
        let entity = self.get_mut(handle);
        entity.origin = origin;
        entity.simulation_time = now;
    }
}

impl CompensationWorld for MockWorld {
    type Entity = MockEntity;

    fn entity(&self, handle: EntityHandle) -> Option<&MockEntity> {
        self.entities.get(handle)
    }

    fn entity_mut(&mut self, handle: EntityHandle) -> Option<&mut MockEntity> {
        self.entities.get_mut(handle)
    }

    fn connected_players(&self) -> Vec<EntityHandle> {
        self.entities
            .iter()
            .filter(|(_, e)| e.player)
            .map(|(h, _)| h)
            .collect()
    }

    fn trace_hull(
        &self,
        mover: EntityHandle,
        start: Vec3,
        end: Vec3,
        ignore: &[EntityHandle],
    ) -> Trace {
        let Some(moving) = self.entities.get(mover) else {
            return Trace::clear(end);
        };

        let obstacles = self
            .solids
            .iter()
            .map(|solid| (None, *solid))
            .chain(
                self.entities
                    .iter()
                    .filter(|(h, e)| *h != mover && !ignore.contains(h) && e.alive)
                    .map(|(h, e)| (Some(h), Aabb::from_hull(e.origin, e.mins, e.maxs))),
            );

        let mut best = Trace::clear(end);
        for (hit, obstacle) in obstacles {
            let grown = obstacle.expanded_by_hull(moving.mins, moving.maxs);
            if grown.contains_strict(start) {
                return Trace {
                    fraction: 0.0,
                    end_pos: start,
                    start_solid: true,
                    hit,
                };
            }
            if let Some(fraction) = grown.segment_entry(start, end) {
                if fraction < best.fraction {
                    best = Trace {
                        fraction,
                        end_pos: start.lerp(end, fraction),
                        start_solid: false,
                        hit,
                    };
                }
            }
        }
        best
    }
}

pub fn tick_time(tick: u32) -> f64 {
    tick as f64 / TICK_RATE
}

/// Runs `step` then `record_tick` for every tick in the range.
pub fn record_ticks(
    world: &mut MockWorld,
    compensator: &mut LagCompensator,
    ticks: std::ops::RangeInclusive<u32>,
    mut step: impl FnMut(&mut MockWorld, f64),
) {
    for tick in ticks {
        let now = tick_time(tick);
        step(world, now);
        compensator.record_tick(world, now);
    }
}
