use super::compensator::LagCompensator;
use super::sample::Sample;
use super::world::{CompensationWorld, HasTransform};
use log::debug;

/// What one call to [`LagCompensator::record_tick`] did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RecordSummary {
    pub recorded: usize,
    /// Entities whose state had not changed since their newest sample.
    pub redundant: usize,
    pub pruned: usize,
    /// Logs dropped because their entity no longer exists.
    pub discarded: usize,
}

impl LagCompensator {
    /// Samples every tracked entity. Call once per tick after simulation.
    ///
    /// With compensation disabled, or fewer than two players connected, all
    /// history is dropped instead: there is nobody to compensate against.
    ///
    /// # Panics
    ///
    /// If a compensation session is active, since the world is rewound.
    pub fn record_tick<W: CompensationWorld>(&mut self, world: &W, now: f64) -> RecordSummary {
        if let Some(session) = &self.active {
            panic!(
                "record_tick while session {} for {} is active; the world is still rewound",
                session.id, session.requester
            );
        }

        let mut summary = RecordSummary::default();
        let players = world.connected_players();
        if !self.config.enabled || players.len() <= 1 {
            if !self.history.is_empty() {
                debug!(
                    "clearing lag compensation history ({} players, enabled: {})",
                    players.len(),
                    self.config.enabled
                );
                summary.discarded = self.history.len();
                self.history.clear();
            }
            return summary;
        }

        self.additional.retain(|handle| world.entity(*handle).is_some());
        summary.discarded = self
            .history
            .retain_live(|handle| world.entity(handle).is_some());

        let oldest_allowed = now - self.config.max_compensation_window_seconds;
        let capacity = self.config.history_capacity();

        for handle in self.tracked_entities(world) {
            let Some(entity) = world.entity(handle) else {
                continue;
            };

            let log = self.history.entry(handle, capacity);
            summary.pruned += log.prune_older_than(oldest_allowed);

            let simulation_time = entity.simulation_time();
            let unchanged = log
                .newest()
                .map_or(false, |newest| newest.simulation_time >= simulation_time);
            if unchanged || simulation_time < oldest_allowed {
                summary.redundant += 1;
                continue;
            }

            log.push(Sample::capture(entity));
            summary.recorded += 1;
        }

        summary
    }
}
