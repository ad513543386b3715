use super::world::{HasAnimationState, HasTransform};
use shared::{QAngle, Vec3};

/// One overlay animation layer.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct AnimationLayer {
    pub sequence: i32,
    pub cycle: f32,
    pub weight: f32,
    pub order: i32,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct AnimationState {
    pub sequence: i32,
    /// Playback position of the master sequence in `[0, 1)`.
    pub cycle: f32,
    /// Overlay layers indexed by layer slot.
    pub layers: Vec<AnimationLayer>,
    pub pose_parameters: Vec<f32>,
}

impl AnimationState {
    pub fn approx_eq(&self, other: &AnimationState, epsilon: f32) -> bool {
        self.sequence == other.sequence
            && (self.cycle - other.cycle).abs() <= epsilon
            && self.layers.len() == other.layers.len()
            && self.layers.iter().zip(&other.layers).all(|(a, b)| {
                a.sequence == b.sequence
                    && a.order == b.order
                    && (a.cycle - b.cycle).abs() <= epsilon
                    && (a.weight - b.weight).abs() <= epsilon
            })
            && self.pose_parameters.len() == other.pose_parameters.len()
            && self
                .pose_parameters
                .iter()
                .zip(&other.pose_parameters)
                .all(|(a, b)| (a - b).abs() <= epsilon)
    }
}

/// Everything the engine is able to rewind on an entity.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Pose {
    pub origin: Vec3,
    pub angles: QAngle,
    pub mins: Vec3,
    pub maxs: Vec3,
    pub animation: AnimationState,
}

impl Pose {
    pub fn capture<E: HasTransform + HasAnimationState + ?Sized>(entity: &E) -> Self {
        let (mins, maxs) = entity.bounds();
        Self {
            origin: entity.origin(),
            angles: entity.angles(),
            mins,
            maxs,
            animation: entity.animation(),
        }
    }
}

/// A recorded observation of an entity. Immutable once stored.
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    pub simulation_time: f64,
    pub alive: bool,
    pub pose: Pose,
}

impl Sample {
    pub fn capture<E: HasTransform + HasAnimationState + ?Sized>(entity: &E) -> Self {
        Self {
            simulation_time: entity.simulation_time(),
            alive: entity.is_alive(),
            pose: Pose::capture(entity),
        }
    }

    /// Sample with only a position, used by tests and synthetic history.
    pub fn at(simulation_time: f64, origin: Vec3) -> Self {
        Self {
            simulation_time,
            alive: true,
            pose: Pose {
                origin,
                ..Pose::default()
            },
        }
    }
}
