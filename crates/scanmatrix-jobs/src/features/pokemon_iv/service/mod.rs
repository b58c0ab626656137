use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{Duration, Utc};
use scanmatrix_core::{Area, IvList, Sighting};
use tracing::debug;

use crate::features::pokemon_iv::repo::{IvQueueRepository, QueuedSighting};
use crate::JobResult;

/// Why a sighting was not queued.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Queued,
    NotListed,
    OutsideArea,
    AlreadyChecked,
    /// Despawned before it could be checked.
    Expired,
    Duplicate,
    /// Queued, then pushed past the limit by higher-priority entries.
    Truncated,
}

pub struct PokemonIvService {
    repo: Arc<dyn IvQueueRepository>,
    iv_list: IvList,
    area: Area,
    limit: usize,
    sequence: AtomicU64,
}

impl PokemonIvService {
    pub fn new(repo: Arc<dyn IvQueueRepository>, iv_list: IvList, area: Area, limit: usize) -> Self {
        Self {
            repo,
            iv_list,
            area,
            limit,
            sequence: AtomicU64::new(0),
        }
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    pub fn admit(&self, sighting: &Sighting) -> JobResult<Admission> {
        let Some(priority) = self.iv_list.priority_of(sighting.pokemon_id) else {
            return Ok(Admission::NotListed);
        };
        if sighting.iv.is_some() {
            return Ok(Admission::AlreadyChecked);
        }
        if !self.area.contains(&sighting.coordinate) {
            return Ok(Admission::OutsideArea);
        }
        let now = Utc::now().timestamp();
        if sighting.is_expired(now) {
            return Ok(Admission::Expired);
        }
        self.prune_expired(now)?;

        let entry = QueuedSighting {
            sighting: sighting.clone(),
            priority,
            sequence: self.sequence.fetch_add(1, Ordering::Relaxed),
        };
        if !self.repo.insert(entry)? {
            return Ok(Admission::Duplicate);
        }

        let dropped = self.repo.truncate(self.limit)?;
        if dropped > 0 {
            debug!(dropped, limit = self.limit, "IV queue truncated");
            // The new entry survived unless it sorted to the very tail.
            let still_queued = self
                .repo
                .snapshot()?
                .iter()
                .any(|queued| queued.sighting.encounter_id == sighting.encounter_id);
            if !still_queued {
                return Ok(Admission::Truncated);
            }
        }
        Ok(Admission::Queued)
    }

    /// Removes the encounter from the queue and counts the check when it lies
    /// inside the instance area. Returns whether it was queued.
    pub fn record_iv(&self, sighting: &Sighting) -> JobResult<bool> {
        if !self.area.contains(&sighting.coordinate) {
            return Ok(false);
        }
        let removed = self.repo.remove(&sighting.encounter_id)?.is_some();
        self.repo.record_check(Utc::now())?;
        Ok(removed)
    }

    /// Queue head, skipping encounters that despawned while waiting.
    pub fn next(&self) -> JobResult<Option<Sighting>> {
        self.prune_expired(Utc::now().timestamp())?;
        Ok(self.repo.pop_front()?.map(|queued| queued.sighting))
    }

    fn prune_expired(&self, now: i64) -> JobResult<()> {
        let expired = self.repo.remove_expired(now)?;
        if expired > 0 {
            debug!(expired, "Expired encounters dropped from IV queue");
        }
        Ok(())
    }

    pub fn queue(&self) -> JobResult<Vec<Sighting>> {
        Ok(self
            .repo
            .snapshot()?
            .into_iter()
            .map(|queued| queued.sighting)
            .collect())
    }

    pub fn ivs_per_hour(&self) -> JobResult<usize> {
        self.repo.checks_since(Utc::now() - Duration::hours(1))
    }

    pub fn reset(&self) -> JobResult<()> {
        self.repo.clear()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::pokemon_iv::repo::InMemoryIvQueueRepository;
    use crate::test_support::square_area;
    use proptest::prelude::*;
    use scanmatrix_core::Coordinate;

    fn create_test_service(limit: usize) -> PokemonIvService {
        PokemonIvService::new(
            Arc::new(InMemoryIvQueueRepository::new()),
            IvList {
                name: "rares".to_string(),
                pokemon: vec![201, 147, 246],
            },
            square_area(),
            limit,
        )
    }

    fn inside(id: &str, pokemon_id: u16) -> Sighting {
        Sighting::new(id, pokemon_id, Coordinate::new(0.5, 0.5))
    }

    #[test]
    fn test_admission_rules() {
        let service = create_test_service(10);

        assert_eq!(service.admit(&inside("e1", 1)).unwrap(), Admission::NotListed);
        assert_eq!(
            service
                .admit(&Sighting::new("e2", 201, Coordinate::new(5.0, 5.0)))
                .unwrap(),
            Admission::OutsideArea
        );
        assert_eq!(
            service.admit(&inside("e3", 201).with_iv(15, 15, 15)).unwrap(),
            Admission::AlreadyChecked
        );
        assert_eq!(service.admit(&inside("e4", 201)).unwrap(), Admission::Queued);
        assert_eq!(service.admit(&inside("e4", 201)).unwrap(), Admission::Duplicate);
        assert_eq!(service.queue().unwrap().len(), 1);
    }

    #[test]
    fn test_expired_encounters_are_never_handed_out() {
        let service = create_test_service(10);
        let now = Utc::now().timestamp();
        let mut stale = inside("stale", 201);
        stale.expire_timestamp = Some(now - 60);
        assert_eq!(service.admit(&stale).unwrap(), Admission::Expired);

        let mut fleeting = inside("fleeting", 201);
        fleeting.expire_timestamp = Some(now + 30);
        let mut lasting = inside("lasting", 147);
        lasting.expire_timestamp = Some(now + 3_600);
        assert_eq!(service.admit(&fleeting).unwrap(), Admission::Queued);
        assert_eq!(service.admit(&lasting).unwrap(), Admission::Queued);

        // Let the first encounter despawn while it waits in the queue.
        service.repo.remove_expired(now + 60).unwrap();
        assert_eq!(service.next().unwrap().unwrap().encounter_id, "lasting");
        assert!(service.next().unwrap().is_none());
    }

    #[test]
    fn test_queue_ordered_by_list_priority() {
        let service = create_test_service(10);
        service.admit(&inside("low", 246)).unwrap();
        service.admit(&inside("high", 201)).unwrap();
        service.admit(&inside("mid", 147)).unwrap();

        assert_eq!(service.next().unwrap().unwrap().encounter_id, "high");
        assert_eq!(service.next().unwrap().unwrap().encounter_id, "mid");
        assert_eq!(service.next().unwrap().unwrap().encounter_id, "low");
        assert!(service.next().unwrap().is_none());
    }

    #[test]
    fn test_limit_drops_lowest_priority() {
        let service = create_test_service(2);
        service.admit(&inside("a", 246)).unwrap();
        service.admit(&inside("b", 246)).unwrap();
        assert_eq!(service.admit(&inside("c", 246)).unwrap(), Admission::Truncated);
        assert_eq!(service.admit(&inside("d", 201)).unwrap(), Admission::Queued);

        let ids: Vec<String> = service
            .queue()
            .unwrap()
            .into_iter()
            .map(|s| s.encounter_id)
            .collect();
        assert_eq!(ids, vec!["d", "a"]);
    }

    #[test]
    fn test_record_iv_removes_and_counts() {
        let service = create_test_service(10);
        service.admit(&inside("e1", 201)).unwrap();

        assert!(service.record_iv(&inside("e1", 201).with_iv(1, 2, 3)).unwrap());
        assert!(!service.record_iv(&inside("e9", 201)).unwrap());
        assert!(!service
            .record_iv(&Sighting::new("far", 201, Coordinate::new(9.0, 9.0)))
            .unwrap());

        assert!(service.queue().unwrap().is_empty());
        assert_eq!(service.ivs_per_hour().unwrap(), 2);
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(64))]

        // The queue never exceeds its limit and stays priority-ordered
        #[test]
        fn prop_queue_bounded_and_ordered(
            species in proptest::collection::vec(prop_oneof![Just(201u16), Just(147u16), Just(246u16), Just(1u16)], 0..40),
            limit in 1usize..8,
        ) {
            let service = create_test_service(limit);
            for (i, pokemon_id) in species.iter().enumerate() {
                service.admit(&inside(&format!("e{i}"), *pokemon_id)).unwrap();
            }

            let queue = service.queue().unwrap();
            prop_assert!(queue.len() <= limit);
            let priorities: Vec<usize> = queue
                .iter()
                .map(|s| service.iv_list.priority_of(s.pokemon_id).unwrap())
                .collect();
            prop_assert!(priorities.windows(2).all(|w| w[0] <= w[1]));
        }
    }
}
