use crate::entity::{EntityArena, EntityHandle};
use crate::lag_compensation::{
    AnimationLayer, AnimationState, CommandSnapshot, CompensationFilter, CompensationWorld,
    HasAnimationState, HasTransform, Trace,
};
use crate::physics::Aabb;
use log::{debug, info};
use rand::Rng;
use shared::{
    InputState, PlayerState, QAngle, Vec3, PLAYER_MAXS, PLAYER_MAXS_CROUCHED, PLAYER_MINS,
    PLAYER_SPEED, WORLD_HALF_EXTENT,
};
use std::collections::HashMap;

pub const SEQUENCE_IDLE: i32 = 0;
pub const SEQUENCE_RUN: i32 = 1;
pub const SEQUENCE_AIM: i32 = 10;

/// Master cycles per second.
const IDLE_CYCLE_RATE: f32 = 0.5;
const RUN_CYCLE_RATE: f32 = 1.5;
const CROUCH_SPEED_SCALE: f32 = 0.5;
const SPAWN_ATTEMPTS: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityKind {
    Player { client_id: u32, team: u8 },
    Prop,
}

#[derive(Debug, Clone)]
pub struct GameEntity {
    pub kind: EntityKind,
    pub origin: Vec3,
    pub angles: QAngle,
    pub mins: Vec3,
    pub maxs: Vec3,
    pub velocity: Vec3,
    pub simulation_time: f64,
    pub alive: bool,
    pub crouched: bool,
    pub animation: AnimationState,
}

impl GameEntity {
    pub fn player(client_id: u32, team: u8, origin: Vec3) -> Self {
        Self {
            kind: EntityKind::Player { client_id, team },
            origin,
            angles: QAngle::default(),
            mins: PLAYER_MINS,
            maxs: PLAYER_MAXS,
            velocity: Vec3::ZERO,
            simulation_time: 0.0,
            alive: true,
            crouched: false,
            animation: AnimationState {
                sequence: SEQUENCE_IDLE,
                cycle: 0.0,
                layers: vec![AnimationLayer {
                    sequence: SEQUENCE_AIM,
                    cycle: 0.0,
                    weight: 0.0,
                    order: 0,
                }],
                pose_parameters: vec![0.0, 0.0],
            },
        }
    }

    pub fn prop(origin: Vec3, mins: Vec3, maxs: Vec3) -> Self {
        Self {
            kind: EntityKind::Prop,
            origin,
            angles: QAngle::default(),
            mins,
            maxs,
            velocity: Vec3::ZERO,
            simulation_time: 0.0,
            alive: true,
            crouched: false,
            animation: AnimationState::default(),
        }
    }

    pub fn team(&self) -> Option<u8> {
        match self.kind {
            EntityKind::Player { team, .. } => Some(team),
            EntityKind::Prop => None,
        }
    }

    pub fn client_id(&self) -> Option<u32> {
        match self.kind {
            EntityKind::Player { client_id, .. } => Some(client_id),
            EntityKind::Prop => None,
        }
    }

    pub fn world_bounds(&self) -> Aabb {
        Aabb::from_hull(self.origin, self.mins, self.maxs)
    }

    /// Steps the animation forward by `dt` from the current movement.
    fn advance_animation(&mut self, dt: f32) {
        let speed = self.velocity.length();
        let (sequence, rate) = if speed > 1.0 {
            (SEQUENCE_RUN, RUN_CYCLE_RATE)
        } else {
            (SEQUENCE_IDLE, IDLE_CYCLE_RATE)
        };

        let animation = &mut self.animation;
        if animation.sequence != sequence {
            animation.sequence = sequence;
            animation.cycle = 0.0;
        } else {
            animation.cycle = (animation.cycle + rate * dt).fract();
        }

        if let Some(aim) = animation.layers.first_mut() {
            aim.cycle = (aim.cycle + dt).fract();
            aim.weight = if self.crouched { 0.5 } else { 1.0 };
        }

        if let [pitch, move_fraction] = animation.pose_parameters.as_mut_slice() {
            *pitch = (self.angles.pitch / 90.0).clamp(-1.0, 1.0);
            *move_fraction = (speed / PLAYER_SPEED).min(1.0);
        }
    }
}

impl HasTransform for GameEntity {
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

impl HasAnimationState for GameEntity {
    fn animation(&self) -> AnimationState {
        self.animation.clone()
    }

    fn set_animation(&mut self, state: &AnimationState) {
        self.animation = state.clone();
    }
}

/// What a hit-scan ray struck first.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RayHit {
    pub entity: EntityHandle,
    pub distance: f32,
    pub point: Vec3,
}

/// The authoritative world: every player and prop plus static geometry.
#[derive(Debug, Default)]
pub struct GameState {
    pub tick: u32,
    /// Server time in seconds, advanced by [`update_physics`](Self::update_physics).
    pub time: f64,
    entities: EntityArena<GameEntity>,
    players: HashMap<u32, EntityHandle>,
    solids: Vec<Aabb>,
}

impl GameState {
    pub fn new() -> Self {
        Self::default()
    }

    /// World with a handful of cover blocks around the middle.
    pub fn with_cover() -> Self {
        let mut game = Self::new();
        for (x, y) in [(-300.0, 0.0), (300.0, 0.0), (0.0, -300.0), (0.0, 300.0)] {
            game.add_solid(Aabb::new(
                Vec3::new(x - 48.0, y - 48.0, 0.0),
                Vec3::new(x + 48.0, y + 48.0, 96.0),
            ));
        }
        game
    }

    pub fn add_solid(&mut self, solid: Aabb) {
        self.solids.push(solid);
    }

    pub fn solids(&self) -> &[Aabb] {
        &self.solids
    }

    /// Spawns a player at a random free spot; even client ids join team 0.
    pub fn add_player(&mut self, client_id: u32) -> EntityHandle {
        let team = (client_id % 2) as u8;
        let mut rng = rand::thread_rng();
        let spawn_extent = WORLD_HALF_EXTENT * 0.5;

        let mut origin = Vec3::ZERO;
        for _ in 0..SPAWN_ATTEMPTS {
            origin = Vec3::new(
                rng.gen_range(-spawn_extent..spawn_extent),
                rng.gen_range(-spawn_extent..spawn_extent),
                0.0,
            );
            if self.is_free(Aabb::from_hull(origin, PLAYER_MINS, PLAYER_MAXS)) {
                break;
            }
        }

        self.add_player_at(client_id, team, origin)
    }

    pub fn add_player_at(&mut self, client_id: u32, team: u8, origin: Vec3) -> EntityHandle {
        let mut player = GameEntity::player(client_id, team, origin);
        player.simulation_time = self.time;
        let handle = self.entities.insert(player);
        if let Some(previous) = self.players.insert(client_id, handle) {
            self.entities.remove(previous);
        }

        info!(
            "Added player {} ({}) on team {} at ({:.1}, {:.1}, {:.1})",
            client_id, handle, team, origin.x, origin.y, origin.z
        );
        handle
    }

    pub fn remove_player(&mut self, client_id: &u32) -> Option<EntityHandle> {
        let handle = self.players.remove(client_id)?;
        self.entities.remove(handle);
        info!("Removed player {} ({})", client_id, handle);
        Some(handle)
    }

    pub fn add_prop(&mut self, origin: Vec3, mins: Vec3, maxs: Vec3) -> EntityHandle {
        let mut prop = GameEntity::prop(origin, mins, maxs);
        prop.simulation_time = self.time;
        self.entities.insert(prop)
    }

    pub fn player_handle(&self, client_id: u32) -> Option<EntityHandle> {
        self.players.get(&client_id).copied()
    }

    pub fn player(&self, client_id: u32) -> Option<&GameEntity> {
        self.entities.get(self.player_handle(client_id)?)
    }

    pub fn get(&self, handle: EntityHandle) -> Option<&GameEntity> {
        self.entities.get(handle)
    }

    pub fn get_mut(&mut self, handle: EntityHandle) -> Option<&mut GameEntity> {
        self.entities.get_mut(handle)
    }

    pub fn player_count(&self) -> usize {
        self.players.len()
    }

    pub fn apply_input(&mut self, client_id: u32, input: &InputState) {
        let Some(handle) = self.player_handle(client_id) else {
            return;
        };

        let wants_stand = !input.crouch;
        let can_stand = match self.entities.get(handle) {
            Some(player) if player.crouched && wants_stand => {
                self.is_free_for(handle, Aabb::from_hull(player.origin, PLAYER_MINS, PLAYER_MAXS))
            }
            _ => true,
        };

        let Some(player) = self.entities.get_mut(handle) else {
            return;
        };
        if !player.alive {
            player.velocity = Vec3::ZERO;
            return;
        }

        player.angles = QAngle::new(input.view_angles.pitch, input.view_angles.yaw, 0.0);
        player.crouched = input.crouch || !can_stand;
        player.maxs = if player.crouched {
            PLAYER_MAXS_CROUCHED
        } else {
            PLAYER_MAXS
        };

        let yaw = player.angles.yaw.to_radians();
        let forward = Vec3::new(yaw.cos(), yaw.sin(), 0.0);
        let right = Vec3::new(yaw.sin(), -yaw.cos(), 0.0);
        let wish = forward * input.forward.clamp(-1.0, 1.0) + right * input.side.clamp(-1.0, 1.0);

        let speed = if player.crouched {
            PLAYER_SPEED * CROUCH_SPEED_SCALE
        } else {
            PLAYER_SPEED
        };
        player.velocity = wish.normalize() * speed;
    }

    /// Advances the world by one tick of `dt` seconds.
    pub fn update_physics(&mut self, dt: f32) {
        self.tick += 1;
        self.time += dt as f64;

        let handles: Vec<EntityHandle> = self.players.values().copied().collect();
        for handle in handles {
            let Some(player) = self.entities.get(handle) else {
                continue;
            };
            if !player.alive {
                continue;
            }

            let start = player.origin;
            let mut end = start + player.velocity * dt;
            end.x = end.x.clamp(-WORLD_HALF_EXTENT, WORLD_HALF_EXTENT);
            end.y = end.y.clamp(-WORLD_HALF_EXTENT, WORLD_HALF_EXTENT);
            let destination = if end == start {
                start
            } else {
                let trace = self.trace_hull(handle, start, end, &[]);
                if trace.start_solid {
                    start
                } else {
                    trace.end_pos
                }
            };

            if let Some(player) = self.entities.get_mut(handle) {
                player.origin = destination;
                player.advance_animation(dt);
                player.simulation_time = self.time;
            }
        }
    }

    pub fn teleport_player(&mut self, client_id: u32, origin: Vec3) -> bool {
        let now = self.time;
        let Some(handle) = self.player_handle(client_id) else {
            return false;
        };
        match self.entities.get_mut(handle) {
            Some(player) => {
                player.origin = origin;
                player.velocity = Vec3::ZERO;
                player.simulation_time = now;
                debug!("Teleported player {} to ({:.1}, {:.1}, {:.1})", client_id, origin.x, origin.y, origin.z);
                true
            }
            None => false,
        }
    }

    pub fn set_alive(&mut self, client_id: u32, alive: bool) {
        let now = self.time;
        if let Some(player) = self
            .player_handle(client_id)
            .and_then(|handle| self.entities.get_mut(handle))
        {
            player.alive = alive;
            player.velocity = Vec3::ZERO;
            player.simulation_time = now;
        }
    }

    /// Casts a ray and returns the first living entity it strikes before any
    /// static geometry.
    pub fn hitscan(
        &self,
        shooter: EntityHandle,
        origin: Vec3,
        direction: Vec3,
        range: f32,
    ) -> Option<RayHit> {
        let direction = direction.normalize();
        if direction == Vec3::ZERO || range <= 0.0 {
            return None;
        }

        let wall_distance = self
            .solids
            .iter()
            .filter_map(|solid| solid.ray_distance(origin, direction, range))
            .fold(range, f32::min);

        self.entities
            .iter()
            .filter(|(handle, entity)| *handle != shooter && entity.alive)
            .filter_map(|(handle, entity)| {
                entity
                    .world_bounds()
                    .ray_distance(origin, direction, range)
                    .map(|distance| (handle, distance))
            })
            .filter(|(_, distance)| *distance <= wall_distance)
            .min_by(|a, b| a.1.total_cmp(&b.1))
            .map(|(entity, distance)| RayHit {
                entity,
                distance,
                point: origin + direction * distance,
            })
    }

    pub fn player_states(&self) -> Vec<PlayerState> {
        let mut states: Vec<PlayerState> = self
            .entities
            .iter()
            .filter_map(|(_, entity)| {
                let EntityKind::Player { client_id, team } = entity.kind else {
                    return None;
                };
                Some(PlayerState {
                    id: client_id,
                    team,
                    origin: entity.origin,
                    angles: entity.angles,
                    crouched: entity.crouched,
                    alive: entity.alive,
                })
            })
            .collect();
        states.sort_by_key(|state| state.id);
        states
    }

    fn is_free(&self, hull: Aabb) -> bool {
        !self.solids.iter().any(|solid| solid.overlaps(&hull))
            && !self
                .entities
                .iter()
                .any(|(_, entity)| entity.alive && entity.world_bounds().overlaps(&hull))
    }

    fn is_free_for(&self, mover: EntityHandle, hull: Aabb) -> bool {
        !self.solids.iter().any(|solid| solid.overlaps(&hull))
            && !self.entities.iter().any(|(handle, entity)| {
                handle != mover && entity.alive && entity.world_bounds().overlaps(&hull)
            })
    }
}

impl CompensationWorld for GameState {
    type Entity = GameEntity;

    fn entity(&self, handle: EntityHandle) -> Option<&GameEntity> {
        self.entities.get(handle)
    }

    fn entity_mut(&mut self, handle: EntityHandle) -> Option<&mut GameEntity> {
        self.entities.get_mut(handle)
    }

    fn connected_players(&self) -> Vec<EntityHandle> {
        self.players.values().copied().collect()
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

        let static_geometry = self.solids.iter().map(|solid| (None, *solid));
        let entities = self
            .entities
            .iter()
            .filter(|(handle, entity)| *handle != mover && !ignore.contains(handle) && entity.alive)
            .map(|(handle, entity)| (Some(handle), entity.world_bounds()));

        let mut result = Trace::clear(end);
        for (hit, obstacle) in static_geometry.chain(entities) {
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
                if fraction < result.fraction {
                    result = Trace {
                        fraction,
                        end_pos: start.lerp(end, fraction),
                        start_solid: false,
                        hit,
                    };
                }
            }
        }
        result
    }
}

/// Rewinds only opponents of the shooter; props are always rewound.
///
/// Team membership is captured up front so the filter does not borrow the
/// world while the session mutates it.
#[derive(Debug, Clone, Default)]
pub struct TeamFilter {
    teams: HashMap<EntityHandle, u8>,
    friendly_fire: bool,
}

impl TeamFilter {
    pub fn from_world(world: &GameState, friendly_fire: bool) -> Self {
        let teams = world
            .entities
            .iter()
            .filter_map(|(handle, entity)| entity.team().map(|team| (handle, team)))
            .collect();
        Self {
            teams,
            friendly_fire,
        }
    }
}

impl CompensationFilter for TeamFilter {
    fn wants_compensation_for(
        &self,
        requester: EntityHandle,
        candidate: EntityHandle,
        _command: &CommandSnapshot,
    ) -> bool {
        if self.friendly_fire {
            return true;
        }
        match (self.teams.get(&requester), self.teams.get(&candidate)) {
            (Some(shooter_team), Some(candidate_team)) => shooter_team != candidate_team,
            _ => true,
        }
    }
}
