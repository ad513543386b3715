use super::config::CompensationConfig;
use super::history::HistoryStore;
use super::session::{ActiveSession, CompensationRequest, SessionReport};
use super::world::{CompensationFilter, CompensationWorld};
use crate::entity::EntityHandle;
use log::{info, warn};
use std::collections::BTreeSet;
use std::panic::{self, AssertUnwindSafe};

/// Owns the recorded history and the single active session.
///
/// The game loop owns one of these and hands it the world explicitly, once per
/// tick through [`record_tick`](Self::record_tick) and around every hit test
/// through [`begin_compensation`](Self::begin_compensation) /
/// [`end_compensation`](Self::end_compensation).
#[derive(Debug, Default)]
pub struct LagCompensator {
    pub(super) config: CompensationConfig,
    pub(super) history: HistoryStore,
    /// Non-player entities registered for compensation.
    pub(super) additional: BTreeSet<EntityHandle>,
    pub(super) active: Option<ActiveSession>,
    pub(super) next_session_id: u64,
    pub(super) last_report: Option<SessionReport>,
}

impl LagCompensator {
    pub fn new(config: CompensationConfig) -> Self {
        Self {
            config,
            ..Self::default()
        }
    }

    pub fn config(&self) -> &CompensationConfig {
        &self.config
    }

    pub fn history(&self) -> &HistoryStore {
        &self.history
    }

    /// Opts a non-player entity into compensation. Returns false if it was
    /// already tracked.
    pub fn add_tracked_entity(&mut self, handle: EntityHandle) -> bool {
        let added = self.additional.insert(handle);
        if added {
            info!("Tracking {} for lag compensation", handle);
        }
        added
    }

    /// Stops tracking a non-player entity and drops its history.
    pub fn remove_tracked_entity(&mut self, handle: EntityHandle) -> bool {
        let removed = self.additional.remove(&handle);
        if removed {
            self.history.forget(handle);
            info!("Stopped tracking {} for lag compensation", handle);
        }
        removed
    }

    /// Connected players plus registered additional entities, in handle order.
    pub fn tracked_entities<W: CompensationWorld>(&self, world: &W) -> Vec<EntityHandle> {
        let mut tracked: BTreeSet<EntityHandle> = world.connected_players().into_iter().collect();
        tracked.extend(self.additional.iter().copied());
        tracked.into_iter().collect()
    }

    pub fn is_active(&self) -> bool {
        self.active.is_some()
    }

    pub fn active_requester(&self) -> Option<EntityHandle> {
        self.active.as_ref().map(|session| session.requester)
    }

    pub fn last_report(&self) -> Option<&SessionReport> {
        self.last_report.as_ref()
    }

    /// Restores an active session whose handle is lost, e.g. on shutdown or
    /// after an aborted hit test. Entities must never stay rewound.
    pub fn restore_pending<W: CompensationWorld>(&mut self, world: &mut W) -> Option<SessionReport> {
        let session = self.active.take()?;
        warn!(
            "restoring session {} for {} without its handle",
            session.id, session.requester
        );
        let report = self.finish(world, session);
        self.last_report = Some(report.clone());
        Some(report)
    }

    /// Runs `hit_test` inside a compensation bracket and always closes it.
    ///
    /// If `hit_test` panics the world is restored before the panic resumes.
    pub fn with_compensation<W, F, R>(
        &mut self,
        world: &mut W,
        filter: &F,
        now: f64,
        request: &CompensationRequest,
        hit_test: impl FnOnce(&mut W) -> R,
    ) -> (R, SessionReport)
    where
        W: CompensationWorld,
        F: CompensationFilter + ?Sized,
    {
        let session = self.begin_compensation(world, filter, now, request);
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| hit_test(&mut *world)));
        let report = self.end_compensation(world, session);
        match outcome {
            Ok(result) => (result, report),
            Err(payload) => {
                warn!(
                    "hit test for {} panicked; world restored before unwinding",
                    report.requester
                );
                panic::resume_unwind(payload)
            }
        }
    }
}
