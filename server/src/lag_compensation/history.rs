//! Bounded per-entity sample logs.

use super::sample::Sample;
use crate::entity::EntityHandle;
use std::collections::{HashMap, VecDeque};

/// Samples of one entity, newest at the front, strictly decreasing in time.
#[derive(Debug, Clone, Default)]
pub struct EntityHistory {
    samples: VecDeque<Sample>,
}

impl EntityHistory {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            samples: VecDeque::with_capacity(capacity),
        }
    }

    /// Prepends `sample` if it is strictly newer than the current newest.
    /// Returns false when the sample was redundant and dropped.
    pub fn push(&mut self, sample: Sample) -> bool {
        if let Some(newest) = self.samples.front() {
            if newest.simulation_time >= sample.simulation_time {
                return false;
            }
        }
        self.samples.push_front(sample);
        true
    }

    /// Drops trailing samples older than `oldest_allowed`; returns how many.
    pub fn prune_older_than(&mut self, oldest_allowed: f64) -> usize {
        let mut removed = 0;
        while let Some(oldest) = self.samples.back() {
            if oldest.simulation_time >= oldest_allowed {
                break;
            }
            self.samples.pop_back();
            removed += 1;
        }
        removed
    }

    pub fn newest(&self) -> Option<&Sample> {
        self.samples.front()
    }

    pub fn oldest(&self) -> Option<&Sample> {
        self.samples.back()
    }

    /// Walks newest to oldest.
    pub fn iter(&self) -> impl Iterator<Item = &Sample> {
        self.samples.iter()
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

/// The samples a rewind to a given time should be built from.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Bracket<'a> {
    /// The target time falls strictly between two samples.
    Between { older: &'a Sample, newer: &'a Sample },
    /// The target time coincides with a sample or lies outside the recorded
    /// range; the nearest sample is used directly.
    Single(&'a Sample),
}

/// Why no bracket could be produced for an entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HistoryMiss {
    NoHistory,
    /// A dead sample lies between now and the target time.
    Died,
    /// Two consecutive samples are too far apart to be one trajectory.
    Teleported,
}

#[derive(Debug, Clone, Default)]
pub struct HistoryStore {
    logs: HashMap<EntityHandle, EntityHistory>,
}

impl HistoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, handle: EntityHandle) -> Option<&EntityHistory> {
        self.logs.get(&handle)
    }

    pub fn entry(&mut self, handle: EntityHandle, capacity: usize) -> &mut EntityHistory {
        self.logs
            .entry(handle)
            .or_insert_with(|| EntityHistory::with_capacity(capacity))
    }

    pub fn forget(&mut self, handle: EntityHandle) -> bool {
        self.logs.remove(&handle).is_some()
    }

    /// Drops every log whose entity `is_live` rejects; returns how many.
    pub fn retain_live(&mut self, mut is_live: impl FnMut(EntityHandle) -> bool) -> usize {
        let before = self.logs.len();
        self.logs.retain(|handle, _| is_live(*handle));
        before - self.logs.len()
    }

    pub fn clear(&mut self) {
        self.logs.clear();
    }

    pub fn len(&self) -> usize {
        self.logs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.logs.is_empty()
    }

    /// Finds the samples surrounding `target_time`.
    ///
    /// Walks newest to oldest and stops at the first sample at or before the
    /// target. The walk gives up if it crosses a dead sample or a jump larger
    /// than `teleport_distance_squared`, since rewinding through either would
    /// place the entity somewhere it never continuously was.
    pub fn find_bracket(
        &self,
        handle: EntityHandle,
        target_time: f64,
        teleport_distance_squared: f32,
    ) -> Result<Bracket<'_>, HistoryMiss> {
        let log = self
            .logs
            .get(&handle)
            .filter(|log| !log.is_empty())
            .ok_or(HistoryMiss::NoHistory)?;

        let mut newer: Option<&Sample> = None;
        for sample in log.iter() {
            if !sample.alive {
                return Err(HistoryMiss::Died);
            }

            if let Some(next) = newer {
                let jump = (next.pose.origin - sample.pose.origin).length_sqr();
                if jump > teleport_distance_squared {
                    return Err(HistoryMiss::Teleported);
                }
            }

            if sample.simulation_time <= target_time {
                return Ok(match newer {
                    Some(next) if sample.simulation_time < target_time => Bracket::Between {
                        older: sample,
                        newer: next,
                    },
                    _ => Bracket::Single(sample),
                });
            }

            newer = Some(sample);
        }

        // Older than anything recorded: clamp to the oldest sample.
        newer.map(Bracket::Single).ok_or(HistoryMiss::NoHistory)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::Vec3;

    const TELEPORT_SQ: f32 = 64.0 * 64.0;

    fn handle() -> EntityHandle {
        EntityHandle::from_raw(1, 0)
    }

    fn store_with(samples: &[(f64, f32)]) -> HistoryStore {
        let mut store = HistoryStore::new();
        let log = store.entry(handle(), 8);
        for &(time, x) in samples {
            assert!(log.push(Sample::at(time, Vec3::new(x, 0.0, 0.0))));
        }
        store
    }

    #[test]
    fn test_push_rejects_stale_samples() {
        let mut log = EntityHistory::default();
        assert!(log.push(Sample::at(1.0, Vec3::ZERO)));
        assert!(!log.push(Sample::at(1.0, Vec3::ZERO)));
        assert!(!log.push(Sample::at(0.5, Vec3::ZERO)));
        assert!(log.push(Sample::at(1.1, Vec3::ZERO)));
        assert_eq!(log.len(), 2);
        assert_eq!(log.newest().unwrap().simulation_time, 1.1);
    }

    #[test]
    fn test_prune_older_than() {
        let mut log = EntityHistory::default();
        for i in 0..10 {
            log.push(Sample::at(i as f64 * 0.25, Vec3::ZERO));
        }

        let removed = log.prune_older_than(1.0);
        assert_eq!(removed, 4);
        assert_eq!(log.oldest().unwrap().simulation_time, 1.0);
        assert!(log.iter().all(|s| s.simulation_time >= 1.0));
    }

    #[test]
    fn test_bracket_between() {
        let store = store_with(&[(10.0, 0.0), (10.1, 10.0)]);
        match store.find_bracket(handle(), 10.05, TELEPORT_SQ).unwrap() {
            Bracket::Between { older, newer } => {
                assert_eq!(older.simulation_time, 10.0);
                assert_eq!(newer.simulation_time, 10.1);
            }
            other => panic!("expected Between, got {:?}", other),
        }
    }

    #[test]
    fn test_bracket_exact_hit_is_single() {
        let store = store_with(&[(1.0, 0.0), (2.0, 10.0), (3.0, 20.0)]);
        match store.find_bracket(handle(), 2.0, TELEPORT_SQ).unwrap() {
            Bracket::Single(sample) => assert_eq!(sample.simulation_time, 2.0),
            other => panic!("expected Single, got {:?}", other),
        }
    }

    #[test]
    fn test_bracket_before_oldest_clamps() {
        let store = store_with(&[(1.0, 0.0), (2.0, 10.0)]);
        match store.find_bracket(handle(), 0.2, TELEPORT_SQ).unwrap() {
            Bracket::Single(sample) => assert_eq!(sample.simulation_time, 1.0),
            other => panic!("expected Single, got {:?}", other),
        }
    }

    #[test]
    fn test_bracket_after_newest_is_newest() {
        let store = store_with(&[(1.0, 0.0), (2.0, 10.0)]);
        let bracket = store.find_bracket(handle(), 5.0, TELEPORT_SQ).unwrap();
        assert_eq!(bracket, Bracket::Single(store.get(handle()).unwrap().newest().unwrap()));
    }

    #[test]
    fn test_no_history() {
        let store = HistoryStore::new();
        assert_eq!(
            store.find_bracket(handle(), 1.0, TELEPORT_SQ),
            Err(HistoryMiss::NoHistory)
        );
    }

    #[test]
    fn test_teleport_invalidates_older_targets() {
        let store = store_with(&[(1.0, 0.0), (2.0, 10.0), (3.0, 500.0), (4.0, 510.0)]);

        assert!(store.find_bracket(handle(), 3.5, TELEPORT_SQ).is_ok());
        assert_eq!(
            store.find_bracket(handle(), 2.5, TELEPORT_SQ),
            Err(HistoryMiss::Teleported)
        );
        assert_eq!(
            store.find_bracket(handle(), 1.5, TELEPORT_SQ),
            Err(HistoryMiss::Teleported)
        );
        assert_eq!(
            store.find_bracket(handle(), 0.0, TELEPORT_SQ),
            Err(HistoryMiss::Teleported)
        );
    }

    #[test]
    fn test_dead_sample_aborts_walk() {
        let mut store = HistoryStore::new();
        let log = store.entry(handle(), 8);
        log.push(Sample::at(1.0, Vec3::ZERO));
        let mut dead = Sample::at(2.0, Vec3::ZERO);
        dead.alive = false;
        log.push(dead);
        log.push(Sample::at(3.0, Vec3::ZERO));

        assert!(store.find_bracket(handle(), 3.0, TELEPORT_SQ).is_ok());
        assert_eq!(
            store.find_bracket(handle(), 1.5, TELEPORT_SQ),
            Err(HistoryMiss::Died)
        );
    }

    #[test]
    fn test_retain_live() {
        let mut store = store_with(&[(1.0, 0.0)]);
        let other = EntityHandle::from_raw(2, 0);
        store.entry(other, 4).push(Sample::at(1.0, Vec3::ZERO));

        let dropped = store.retain_live(|h| h == other);
        assert_eq!(dropped, 1);
        assert!(store.get(handle()).is_none());
        assert_eq!(store.len(), 1);
    }
}
