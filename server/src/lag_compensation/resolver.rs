//! Keeps rewound entities out of solid geometry.
//!
//! A historically accurate position can overlap something that has since
//! moved into that space. The resolver first tries to move the blocker back in
//! time as well, then falls back to stopping short along the line from the
//! entity's live position.

use super::world::CompensationWorld;
use crate::entity::EntityHandle;
use log::{trace, warn};
use shared::Vec3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// The proposed origin was free.
    Clear,
    /// Free after the blocking entity was rewound too.
    ClearAfterRewindingBlocker,
    /// Clamped along the path from the start position.
    Clamped,
    /// The start position itself is blocked; nothing could be done.
    Stuck,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Resolution {
    pub origin: Vec3,
    pub outcome: Outcome,
}

/// Resolves `proposed` for `mover`, whose live origin is `live`.
///
/// `rewind_blocker` is offered the entity blocking `proposed` and returns true
/// if it moved it; it is consulted at most once.
pub fn resolve<W, R>(
    world: &mut W,
    mover: EntityHandle,
    live: Vec3,
    proposed: Vec3,
    damping: f32,
    mut rewind_blocker: R,
) -> Resolution
where
    W: CompensationWorld,
    R: FnMut(&mut W, EntityHandle) -> bool,
{
    let probe = world.trace_hull(mover, proposed, proposed, &[]);
    if !probe.start_solid {
        return Resolution {
            origin: proposed,
            outcome: Outcome::Clear,
        };
    }

    if let Some(blocker) = probe.hit {
        if rewind_blocker(world, blocker) {
            let retry = world.trace_hull(mover, proposed, proposed, &[]);
            if !retry.start_solid {
                trace!("{} cleared by rewinding blocker {}", mover, blocker);
                return Resolution {
                    origin: proposed,
                    outcome: Outcome::ClearAfterRewindingBlocker,
                };
            }
        }
    }

    clamp_along(world, mover, live, proposed, damping, &[])
}

/// Restore-mode counterpart of [`resolve`]: moves from the rewound position
/// `current` back toward `pristine`, stopping at the first blocked point.
/// Entities in `ignore` are about to be restored themselves and do not block.
pub fn restore<W: CompensationWorld>(
    world: &W,
    mover: EntityHandle,
    current: Vec3,
    pristine: Vec3,
    damping: f32,
    ignore: &[EntityHandle],
) -> Resolution {
    let probe = world.trace_hull(mover, pristine, pristine, ignore);
    if !probe.start_solid {
        return Resolution {
            origin: pristine,
            outcome: Outcome::Clear,
        };
    }

    let resolution = clamp_along(world, mover, current, pristine, damping, ignore);
    if resolution.outcome == Outcome::Stuck {
        // Leaving the entity at its rewound spot forever is worse than putting
        // it back where the simulation had it.
        return Resolution {
            origin: pristine,
            outcome: Outcome::Stuck,
        };
    }
    resolution
}

/// Furthest clear point from `from` toward `to`, pulled back by `damping`.
fn clamp_along<W: CompensationWorld>(
    world: &W,
    mover: EntityHandle,
    from: Vec3,
    to: Vec3,
    damping: f32,
    ignore: &[EntityHandle],
) -> Resolution {
    let sweep = world.trace_hull(mover, from, to, ignore);
    if sweep.start_solid {
        warn!(
            "{} is blocked at its start position ({:.1}, {:.1}, {:.1}); leaving it there",
            mover, from.x, from.y, from.z
        );
        return Resolution {
            origin: from,
            outcome: Outcome::Stuck,
        };
    }

    let fraction = sweep.fraction.clamp(0.0, 1.0) * damping;
    let origin = from + (to - from) * fraction;
    trace!(
        "{} clamped to {:.2} of the way toward its target",
        mover,
        fraction
    );
    Resolution {
        origin,
        outcome: Outcome::Clamped,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lag_compensation::sample::AnimationState;
    use crate::lag_compensation::world::{HasAnimationState, HasTransform, Trace};
    use assert_approx_eq::assert_approx_eq;
    use shared::QAngle;
    use std::collections::HashMap;

    /// Points in a 1D corridor; a mover is blocked by any wall or entity
    /// closer than 1 unit along x.
    struct Corridor {
        walls: Vec<f32>,
        entities: HashMap<EntityHandle, Dot>,
    }

    struct Dot {
        origin: Vec3,
    }

    impl HasTransform for Dot {
        fn origin(&self) -> Vec3 {
            self.origin
        }
        fn set_origin(&mut self, origin: Vec3) {
            self.origin = origin;
        }
        fn angles(&self) -> QAngle {
            QAngle::default()
        }
        fn set_angles(&mut self, _: QAngle) {}
        fn bounds(&self) -> (Vec3, Vec3) {
            (Vec3::ZERO, Vec3::ZERO)
        }
        fn set_bounds(&mut self, _: Vec3, _: Vec3) {}
        fn simulation_time(&self) -> f64 {
            0.0
        }
        fn set_simulation_time(&mut self, _: f64) {}
        fn is_alive(&self) -> bool {
            true
        }
    }

    impl HasAnimationState for Dot {
        fn animation(&self) -> AnimationState {
            AnimationState::default()
        }
        fn set_animation(&mut self, _: &AnimationState) {}
    }

    impl Corridor {
        fn blocker_at(&self, mover: EntityHandle, x: f32, ignore: &[EntityHandle]) -> Option<Option<EntityHandle>> {
            if self.walls.iter().any(|w| (w - x).abs() < 1.0) {
                return Some(None);
            }
            self.entities
                .iter()
                .filter(|(h, _)| **h != mover && !ignore.contains(h))
                .find(|(_, d)| (d.origin.x - x).abs() < 1.0)
                .map(|(h, _)| Some(*h))
        }
    }

    impl CompensationWorld for Corridor {
        type Entity = Dot;

        fn entity(&self, handle: EntityHandle) -> Option<&Dot> {
            self.entities.get(&handle)
        }
        fn entity_mut(&mut self, handle: EntityHandle) -> Option<&mut Dot> {
            self.entities.get_mut(&handle)
        }
        fn connected_players(&self) -> Vec<EntityHandle> {
            self.entities.keys().copied().collect()
        }
        fn trace_hull(&self, mover: EntityHandle, start: Vec3, end: Vec3, ignore: &[EntityHandle]) -> Trace {
            if let Some(hit) = self.blocker_at(mover, start.x, ignore) {
                return Trace {
                    fraction: 0.0,
                    end_pos: start,
                    start_solid: true,
                    hit,
                };
            }
            let steps = 1000;
            for i in 1..=steps {
                let t = i as f32 / steps as f32;
                let p = start.lerp(end, t);
                if let Some(hit) = self.blocker_at(mover, p.x, ignore) {
                    let fraction = (i - 1) as f32 / steps as f32;
                    return Trace {
                        fraction,
                        end_pos: start.lerp(end, fraction),
                        start_solid: false,
                        hit,
                    };
                }
            }
            Trace::clear(end)
        }
    }

    const MOVER: EntityHandle = EntityHandle::from_raw(0, 0);
    const OTHER: EntityHandle = EntityHandle::from_raw(1, 0);

    fn corridor(walls: Vec<f32>, other_x: Option<f32>) -> Corridor {
        let mut entities = HashMap::new();
        entities.insert(MOVER, Dot { origin: Vec3::ZERO });
        if let Some(x) = other_x {
            entities.insert(OTHER, Dot { origin: Vec3::new(x, 0.0, 0.0) });
        }
        Corridor { walls, entities }
    }

    #[test]
    fn test_clear_target_is_unchanged() {
        let mut world = corridor(vec![], None);
        let target = Vec3::new(20.0, 0.0, 0.0);
        let res = resolve(&mut world, MOVER, Vec3::ZERO, target, 0.95, |_, _| false);
        assert_eq!(res, Resolution { origin: target, outcome: Outcome::Clear });
    }

    #[test]
    fn test_blocked_by_wall_clamps_with_damping() {
        let mut world = corridor(vec![10.5], None);
        let res = resolve(&mut world, MOVER, Vec3::ZERO, Vec3::new(10.0, 0.0, 0.0), 0.95, |_, _| false);
        assert_eq!(res.outcome, Outcome::Clamped);
        // Path stops 1 unit short of the wall, then damping pulls it back.
        assert_approx_eq!(res.origin.x, 9.5 * 0.95, 0.05);
    }

    #[test]
    fn test_rewinding_blocker_clears_target() {
        let mut world = corridor(vec![], Some(10.0));
        let mut offered = Vec::new();
        let res = resolve(&mut world, MOVER, Vec3::ZERO, Vec3::new(10.0, 0.0, 0.0), 0.95, |w: &mut Corridor, blocker| {
            offered.push(blocker);
            w.entity_mut(blocker).unwrap().origin.x = 30.0;
            true
        });
        assert_eq!(offered, vec![OTHER]);
        assert_eq!(res.outcome, Outcome::ClearAfterRewindingBlocker);
        assert_eq!(res.origin.x, 10.0);
    }

    #[test]
    fn test_declined_blocker_falls_back_to_clamp() {
        let mut world = corridor(vec![], Some(10.0));
        let res = resolve(&mut world, MOVER, Vec3::ZERO, Vec3::new(10.0, 0.0, 0.0), 1.0, |_, _| false);
        assert_eq!(res.outcome, Outcome::Clamped);
        assert!(res.origin.x < 9.01);
    }

    #[test]
    fn test_live_position_blocked_is_stuck() {
        let mut world = corridor(vec![0.2, 10.0], None);
        let res = resolve(&mut world, MOVER, Vec3::ZERO, Vec3::new(10.0, 0.0, 0.0), 0.95, |_, _| false);
        assert_eq!(res, Resolution { origin: Vec3::ZERO, outcome: Outcome::Stuck });
    }

    #[test]
    fn test_restore_clear_returns_pristine() {
        let world = corridor(vec![], None);
        let pristine = Vec3::new(5.0, 0.0, 0.0);
        let res = restore(&world, MOVER, Vec3::new(-5.0, 0.0, 0.0), pristine, 0.95, &[]);
        assert_eq!(res.origin, pristine);
        assert_eq!(res.outcome, Outcome::Clear);
    }

    #[test]
    fn test_restore_ignores_pending_entities() {
        let world = corridor(vec![], Some(5.0));
        let pristine = Vec3::new(5.0, 0.0, 0.0);
        let res = restore(&world, MOVER, Vec3::new(-5.0, 0.0, 0.0), pristine, 0.95, &[OTHER]);
        assert_eq!(res.origin, pristine);
    }

    #[test]
    fn test_restore_stops_at_obstacle() {
        let world = corridor(vec![5.5], None);
        let res = restore(&world, MOVER, Vec3::new(-5.0, 0.0, 0.0), Vec3::new(5.0, 0.0, 0.0), 1.0, &[]);
        assert_eq!(res.outcome, Outcome::Clamped);
        assert!(res.origin.x < 4.6 && res.origin.x > 4.0);
    }

    #[test]
    fn test_restore_stuck_snaps_to_pristine() {
        let world = corridor(vec![-5.0, 5.0], None);
        let pristine = Vec3::new(5.0, 0.0, 0.0);
        let res = restore(&world, MOVER, Vec3::new(-5.0, 0.0, 0.0), pristine, 0.95, &[]);
        assert_eq!(res.origin, pristine);
        assert_eq!(res.outcome, Outcome::Stuck);
    }
}
