use super::sample::Pose;
use bitflags::bitflags;

bitflags! {
    /// Which aspects of an entity a session rewrote.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct ChangeFlags: u8 {
        const ORIGIN_CHANGED = 1 << 0;
        const ANGLES_CHANGED = 1 << 1;
        const SIZE_CHANGED = 1 << 2;
        const ANIMATION_CHANGED = 1 << 3;
    }
}

/// Below this, a rewound value is considered equal to the live one.
pub const CHANGE_EPSILON: f32 = 1e-3;

impl ChangeFlags {
    /// Aspects in which `target` differs from `live`.
    pub fn between(live: &Pose, target: &Pose) -> Self {
        let mut flags = ChangeFlags::empty();
        if !live.origin.approx_eq(target.origin, CHANGE_EPSILON) {
            flags |= ChangeFlags::ORIGIN_CHANGED;
        }
        if !live.angles.approx_eq(target.angles, CHANGE_EPSILON) {
            flags |= ChangeFlags::ANGLES_CHANGED;
        }
        if !live.mins.approx_eq(target.mins, CHANGE_EPSILON)
            || !live.maxs.approx_eq(target.maxs, CHANGE_EPSILON)
        {
            flags |= ChangeFlags::SIZE_CHANGED;
        }
        if !live.animation.approx_eq(&target.animation, CHANGE_EPSILON) {
            flags |= ChangeFlags::ANIMATION_CHANGED;
        }
        flags
    }
}

/// Pristine values of an entity before a session rewrote it. Only the
/// aspects named in `flags` are meaningful.
#[derive(Debug, Clone, PartialEq)]
pub struct RestoreRecord {
    pub flags: ChangeFlags,
    pub simulation_time: f64,
    pub pose: Pose,
}

/// The values a session wrote, used to detect later writes by someone else.
#[derive(Debug, Clone, PartialEq)]
pub struct ChangeRecord {
    pub flags: ChangeFlags,
    pub simulation_time: f64,
    pub pose: Pose,
}

#[derive(Debug, Clone, PartialEq)]
pub struct EntityRecords {
    pub restore: RestoreRecord,
    pub change: ChangeRecord,
}
