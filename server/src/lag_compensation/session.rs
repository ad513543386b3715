//! The begin/end bracket that rewinds entities for one hit resolution.

use super::compensator::LagCompensator;
use super::config::CompensationConfig;
use super::history::{Bracket, HistoryMiss};
use super::interpolate::interpolate;
use super::records::{ChangeFlags, ChangeRecord, EntityRecords, RestoreRecord, CHANGE_EPSILON};
use super::resolver::{self, Outcome};
use super::sample::Pose;
use super::world::{
    CommandSnapshot, CompensationFilter, CompensationWorld, HasAnimationState, HasTransform,
    ShotInfo,
};
use crate::entity::EntityHandle;
use log::{debug, trace};
use shared::Vec3;
use std::collections::{BTreeMap, HashSet};

/// Everything needed to open a compensation bracket for one command.
#[derive(Debug, Clone, PartialEq)]
pub struct CompensationRequest {
    pub requester: EntityHandle,
    /// Measured one-way latency of the requesting client, in seconds.
    pub latency: f64,
    /// The client's render interpolation delay, in seconds.
    pub interpolation_delay: f64,
    pub command: CommandSnapshot,
    /// The client asked not to be lag compensated.
    pub client_opted_out: bool,
}

impl CompensationRequest {
    pub fn new(
        requester: EntityHandle,
        latency: f64,
        interpolation_delay: f64,
        command_time: f64,
    ) -> Self {
        Self {
            requester,
            latency,
            interpolation_delay,
            command: CommandSnapshot {
                command_time,
                ..CommandSnapshot::default()
            },
            client_opted_out: false,
        }
    }

    /// Replaces the command snapshot; `command.command_time` becomes the timestamp.
    pub fn with_command(mut self, command: CommandSnapshot) -> Self {
        self.command = command;
        self
    }

    pub fn with_shot(mut self, shot: ShotInfo) -> Self {
        self.command.shot = Some(shot);
        self
    }

    pub fn opted_out(mut self, opted_out: bool) -> Self {
        self.client_opted_out = opted_out;
        self
    }
}

/// Proof of an open bracket. Consumed by [`LagCompensator::end_compensation`],
/// so a bracket cannot be closed twice.
#[derive(Debug)]
#[must_use = "an open compensation session leaves entities rewound until it is ended"]
pub struct SessionHandle {
    id: u64,
    requester: EntityHandle,
    target_time: f64,
}

impl SessionHandle {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn requester(&self) -> EntityHandle {
        self.requester
    }

    pub fn target_time(&self) -> f64 {
        self.target_time
    }
}

/// What a session did, returned when it ends.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionReport {
    pub requester: EntityHandle,
    pub target_time: f64,
    pub considered: usize,
    pub filtered: usize,
    pub rewound: usize,
    pub unchanged: usize,
    pub no_history: usize,
    pub invalidated: usize,
    pub skipped_dead: usize,
    pub blockers_rewound: usize,
    pub clamped: usize,
    pub stuck: usize,
    pub restored: usize,
    /// Entities where another write replaced at least one rewound aspect
    /// before the session ended.
    pub superseded: usize,
}

impl SessionReport {
    fn new(requester: EntityHandle, target_time: f64) -> Self {
        Self {
            requester,
            target_time,
            considered: 0,
            filtered: 0,
            rewound: 0,
            unchanged: 0,
            no_history: 0,
            invalidated: 0,
            skipped_dead: 0,
            blockers_rewound: 0,
            clamped: 0,
            stuck: 0,
            restored: 0,
            superseded: 0,
        }
    }
}

#[derive(Debug)]
pub(super) struct ActiveSession {
    pub(super) id: u64,
    pub(super) requester: EntityHandle,
    target_time: f64,
    command: CommandSnapshot,
    tracked: Vec<EntityHandle>,
    /// Entities already handled or being handled, rewound or not.
    visited: HashSet<EntityHandle>,
    records: BTreeMap<EntityHandle, EntityRecords>,
    stale: Vec<EntityHandle>,
    report: SessionReport,
}

impl ActiveSession {
    fn new(id: u64, request: &CompensationRequest, target_time: f64) -> Self {
        Self {
            id,
            requester: request.requester,
            target_time,
            command: request.command.clone(),
            tracked: Vec::new(),
            visited: HashSet::new(),
            records: BTreeMap::new(),
            stale: Vec::new(),
            report: SessionReport::new(request.requester, target_time),
        }
    }
}

/// Works out which server time the requesting client was looking at.
///
/// The client's own timestamp is preferred, but if it disagrees with the
/// measured latency by more than the configured tolerance the latency wins.
pub fn compute_target_time(
    config: &CompensationConfig,
    now: f64,
    latency: f64,
    interpolation_delay: f64,
    command_time: f64,
) -> f64 {
    let window = config.max_compensation_window_seconds;
    let correction = (latency + interpolation_delay).clamp(0.0, window);

    let mut target_time = command_time - interpolation_delay;
    let claimed = now - target_time;
    if (correction - claimed).abs() > config.timestamp_tolerance_seconds {
        debug!(
            "command timestamp implies {:.3}s of lag but measured {:.3}s; using measured",
            claimed, correction
        );
        target_time = now - correction;
    }

    target_time.clamp(now - window, now)
}

impl LagCompensator {
    /// Rewinds every tracked entity the filter accepts to where the requester
    /// saw it, and opens the bracket.
    ///
    /// # Panics
    ///
    /// If another session is still active.
    pub fn begin_compensation<W, F>(
        &mut self,
        world: &mut W,
        filter: &F,
        now: f64,
        request: &CompensationRequest,
    ) -> SessionHandle
    where
        W: CompensationWorld,
        F: CompensationFilter + ?Sized,
    {
        if let Some(active) = &self.active {
            panic!(
                "begin_compensation for {} while session {} for {} is still active; \
                 every begin_compensation needs a matching end_compensation",
                request.requester, active.id, active.requester
            );
        }

        self.next_session_id += 1;
        let target_time = compute_target_time(
            &self.config,
            now,
            request.latency,
            request.interpolation_delay,
            request.command.command_time,
        );
        let mut session = ActiveSession::new(self.next_session_id, request, target_time);

        if self.config.enabled && !request.client_opted_out {
            session.tracked = self.tracked_entities(world);
            let candidates = session.tracked.clone();
            for candidate in candidates {
                if candidate == request.requester && !self.config.self_compensation_enabled {
                    continue;
                }
                session.report.considered += 1;
                if !filter.wants_compensation_for(request.requester, candidate, &request.command)
                {
                    session.report.filtered += 1;
                    continue;
                }
                self.compensate_entity(world, &mut session, candidate, 0);
            }

            for handle in std::mem::take(&mut session.stale) {
                self.history.forget(handle);
                self.additional.remove(&handle);
            }
        }

        debug!(
            "session {} for {}: target {:.3} ({:.3}s back), rewound {}/{} entities",
            session.id,
            session.requester,
            target_time,
            now - target_time,
            session.report.rewound,
            session.report.considered
        );

        let handle = SessionHandle {
            id: session.id,
            requester: session.requester,
            target_time,
        };
        self.active = Some(session);
        handle
    }

    /// Restores everything the session changed and closes the bracket.
    ///
    /// # Panics
    ///
    /// If `handle` does not belong to the currently active session.
    pub fn end_compensation<W: CompensationWorld>(
        &mut self,
        world: &mut W,
        handle: SessionHandle,
    ) -> SessionReport {
        let session = match self.active.take() {
            Some(session) if session.id == handle.id => session,
            Some(session) => {
                let active_id = session.id;
                self.active = Some(session);
                panic!(
                    "end_compensation for session {} ({}) but session {} is the active one",
                    handle.id, handle.requester, active_id
                );
            }
            None => panic!(
                "end_compensation for session {} ({}) without an active session",
                handle.id, handle.requester
            ),
        };

        let report = self.finish(world, session);
        self.last_report = Some(report.clone());
        report
    }

    /// Rewinds one entity. `depth` is non-zero when it is being rewound
    /// because it blocked another entity, in which case it may not recurse.
    fn compensate_entity<W: CompensationWorld>(
        &self,
        world: &mut W,
        session: &mut ActiveSession,
        handle: EntityHandle,
        depth: u8,
    ) {
        if !session.visited.insert(handle) {
            return;
        }

        let Some(entity) = world.entity(handle) else {
            session.stale.push(handle);
            return;
        };
        if !entity.is_alive() {
            session.report.skipped_dead += 1;
            return;
        }
        let live = Pose::capture(entity);
        let live_time = entity.simulation_time();

        let bracket = match self.history.find_bracket(
            handle,
            session.target_time,
            self.config.teleport_distance_squared(),
        ) {
            Ok(bracket) => bracket,
            Err(HistoryMiss::NoHistory) => {
                session.report.no_history += 1;
                return;
            }
            Err(miss) => {
                debug!("not rewinding {}: history invalidated ({:?})", handle, miss);
                session.report.invalidated += 1;
                return;
            }
        };

        let mut target = match bracket {
            Bracket::Between { older, newer } => interpolate(older, newer, session.target_time),
            Bracket::Single(sample) => sample.pose.clone(),
        };

        if self.outside_shot_cone(&session.command, &target) {
            target.animation = live.animation.clone();
        }

        if self.config.fix_stuck_enabled {
            let requester = session.requester;
            let may_recurse = depth == 0;
            let resolution = resolver::resolve(
                world,
                handle,
                live.origin,
                target.origin,
                self.config.restore_damping_factor,
                |world, blocker| {
                    if !may_recurse
                        || session.visited.contains(&blocker)
                        || !session.tracked.contains(&blocker)
                        || (blocker == requester && !self.config.self_compensation_enabled)
                    {
                        return false;
                    }
                    // No game-rule filter for blockers: they move whether or
                    // not they can be hit.
                    self.compensate_entity(world, &mut *session, blocker, depth + 1);
                    let moved = session.records.contains_key(&blocker);
                    if moved {
                        session.report.blockers_rewound += 1;
                    }
                    moved
                },
            );
            match resolution.outcome {
                Outcome::Clamped => session.report.clamped += 1,
                Outcome::Stuck => session.report.stuck += 1,
                Outcome::Clear | Outcome::ClearAfterRewindingBlocker => {}
            }
            target.origin = resolution.origin;
        }

        let flags = ChangeFlags::between(&live, &target);
        if flags.is_empty() {
            session.report.unchanged += 1;
            return;
        }

        let Some(entity) = world.entity_mut(handle) else {
            return;
        };
        apply_pose(entity, &target, flags);
        entity.set_simulation_time(session.target_time);

        trace!(
            "rewound {} to {:.3}: origin ({:.1}, {:.1}, {:.1}) flags {:?}",
            handle,
            session.target_time,
            target.origin.x,
            target.origin.y,
            target.origin.z,
            flags
        );

        session.records.insert(
            handle,
            EntityRecords {
                restore: RestoreRecord {
                    flags,
                    simulation_time: live_time,
                    pose: live,
                },
                change: ChangeRecord {
                    flags,
                    simulation_time: session.target_time,
                    pose: target,
                },
            },
        );
        session.report.rewound += 1;
    }

    /// True if the shot's cone filter says this entity's animation need not
    /// be rewound.
    fn outside_shot_cone(&self, command: &CommandSnapshot, target: &Pose) -> bool {
        let (Some(cone_degrees), Some(shot)) =
            (self.config.angular_cone_filter_degrees, command.shot)
        else {
            return false;
        };

        let center = target.origin + (target.mins + target.maxs) * 0.5;
        let to_target = center - shot.origin;
        let distance = to_target.length();
        if distance > shot.range + self.config.cone_filter_range_slack {
            return true;
        }

        let direction = shot.direction.normalize();
        if distance <= f32::EPSILON || direction == Vec3::ZERO {
            return false;
        }

        let cos = direction.dot(to_target * (1.0 / distance)).clamp(-1.0, 1.0);
        cos.acos().to_degrees() > cone_degrees
    }

    /// Undoes a session's changes. Aspects that were written by someone else
    /// after the rewind are left as they are.
    pub(super) fn finish<W: CompensationWorld>(
        &self,
        world: &mut W,
        session: ActiveSession,
    ) -> SessionReport {
        let ActiveSession {
            id,
            records,
            mut report,
            ..
        } = session;

        if records.is_empty() {
            return report;
        }

        let pending: Vec<EntityHandle> = records.keys().copied().collect();
        for (index, (handle, EntityRecords { restore, change })) in
            records.into_iter().enumerate()
        {
            let Some(entity) = world.entity_mut(handle) else {
                continue;
            };

            let flags = restore.flags;
            let mut superseded = false;

            if flags.contains(ChangeFlags::ANGLES_CHANGED) {
                if entity.angles().approx_eq(change.pose.angles, CHANGE_EPSILON) {
                    entity.set_angles(restore.pose.angles);
                } else {
                    superseded = true;
                }
            }

            if flags.contains(ChangeFlags::SIZE_CHANGED) {
                let (mins, maxs) = entity.bounds();
                if mins.approx_eq(change.pose.mins, CHANGE_EPSILON)
                    && maxs.approx_eq(change.pose.maxs, CHANGE_EPSILON)
                {
                    entity.set_bounds(restore.pose.mins, restore.pose.maxs);
                } else {
                    superseded = true;
                }
            }

            if flags.contains(ChangeFlags::ANIMATION_CHANGED) {
                if entity
                    .animation()
                    .approx_eq(&change.pose.animation, CHANGE_EPSILON)
                {
                    entity.set_animation(&restore.pose.animation);
                } else {
                    superseded = true;
                }
            }

            if entity.simulation_time() == change.simulation_time {
                entity.set_simulation_time(restore.simulation_time);
            }

            let rewound_origin = if flags.contains(ChangeFlags::ORIGIN_CHANGED) {
                let current = entity.origin();
                if current.approx_eq(change.pose.origin, CHANGE_EPSILON) {
                    Some(current)
                } else {
                    superseded = true;
                    None
                }
            } else {
                None
            };

            if let Some(current) = rewound_origin {
                let origin = if self.config.fix_stuck_enabled {
                    resolver::restore(
                        world,
                        handle,
                        current,
                        restore.pose.origin,
                        self.config.restore_damping_factor,
                        &pending[index + 1..],
                    )
                    .origin
                } else {
                    restore.pose.origin
                };
                if let Some(entity) = world.entity_mut(handle) {
                    entity.set_origin(origin);
                }
            }

            report.restored += 1;
            if superseded {
                report.superseded += 1;
                debug!("{} was modified during session {}; kept newer state", handle, id);
            }
        }

        report
    }
}

fn apply_pose<E: HasTransform + HasAnimationState>(entity: &mut E, pose: &Pose, flags: ChangeFlags) {
    if flags.contains(ChangeFlags::ORIGIN_CHANGED) {
        entity.set_origin(pose.origin);
    }
    if flags.contains(ChangeFlags::ANGLES_CHANGED) {
        entity.set_angles(pose.angles);
    }
    if flags.contains(ChangeFlags::SIZE_CHANGED) {
        entity.set_bounds(pose.mins, pose.maxs);
    }
    if flags.contains(ChangeFlags::ANIMATION_CHANGED) {
        entity.set_animation(&pose.animation);
    }
}
