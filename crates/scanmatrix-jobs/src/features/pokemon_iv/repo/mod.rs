use std::collections::VecDeque;
use std::sync::{Arc, RwLock};

use chrono::{DateTime, Utc};
use scanmatrix_core::Sighting;

use crate::{JobError, JobResult};

/// A queued sighting with its ordering key.
#[derive(Debug, Clone, PartialEq)]
pub struct QueuedSighting {
    pub sighting: Sighting,
    pub priority: usize,
    pub sequence: u64,
}

impl QueuedSighting {
    fn key(&self) -> (usize, u64) {
        (self.priority, self.sequence)
    }
}

pub trait IvQueueRepository: Send + Sync {
    /// Insert in `(priority, sequence)` order. Returns false for a duplicate encounter.
    fn insert(&self, entry: QueuedSighting) -> JobResult<bool>;
    fn remove(&self, encounter_id: &str) -> JobResult<Option<QueuedSighting>>;
    fn pop_front(&self) -> JobResult<Option<QueuedSighting>>;
    /// Drop entries past `limit`; returns how many were dropped.
    fn truncate(&self, limit: usize) -> JobResult<usize>;
    /// Drop entries whose despawn time is at or before `now` (unix seconds).
    fn remove_expired(&self, now: i64) -> JobResult<usize>;
    fn snapshot(&self) -> JobResult<Vec<QueuedSighting>>;
    fn clear(&self) -> JobResult<()>;
    fn record_check(&self, at: DateTime<Utc>) -> JobResult<()>;
    /// Number of checks recorded at or after `since`; older ones are pruned.
    fn checks_since(&self, since: DateTime<Utc>) -> JobResult<usize>;
}

/// In-memory encounter queue used by the IV job controller.
pub struct InMemoryIvQueueRepository {
    queue: Arc<RwLock<Vec<QueuedSighting>>>,
    checks: Arc<RwLock<VecDeque<DateTime<Utc>>>>,
}

impl InMemoryIvQueueRepository {
    pub fn new() -> Self {
        Self {
            queue: Arc::new(RwLock::new(Vec::new())),
            checks: Arc::new(RwLock::new(VecDeque::new())),
        }
    }

    pub fn len(&self) -> usize {
        self.queue.read().map(|q| q.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for InMemoryIvQueueRepository {
    fn default() -> Self {
        Self::new()
    }
}

fn poisoned() -> JobError {
    JobError::LockPoisoned("IV queue".to_string())
}

impl IvQueueRepository for InMemoryIvQueueRepository {
    fn insert(&self, entry: QueuedSighting) -> JobResult<bool> {
        let mut queue = self.queue.write().map_err(|_| poisoned())?;
        if queue
            .iter()
            .any(|queued| queued.sighting.encounter_id == entry.sighting.encounter_id)
        {
            return Ok(false);
        }
        let index = queue.partition_point(|queued| queued.key() <= entry.key());
        queue.insert(index, entry);
        Ok(true)
    }

    fn remove(&self, encounter_id: &str) -> JobResult<Option<QueuedSighting>> {
        let mut queue = self.queue.write().map_err(|_| poisoned())?;
        Ok(queue
            .iter()
            .position(|queued| queued.sighting.encounter_id == encounter_id)
            .map(|index| queue.remove(index)))
    }

    fn pop_front(&self) -> JobResult<Option<QueuedSighting>> {
        let mut queue = self.queue.write().map_err(|_| poisoned())?;
        if queue.is_empty() {
            return Ok(None);
        }
        Ok(Some(queue.remove(0)))
    }

    fn truncate(&self, limit: usize) -> JobResult<usize> {
        let mut queue = self.queue.write().map_err(|_| poisoned())?;
        let dropped = queue.len().saturating_sub(limit);
        queue.truncate(limit);
        Ok(dropped)
    }

    fn remove_expired(&self, now: i64) -> JobResult<usize> {
        let mut queue = self.queue.write().map_err(|_| poisoned())?;
        let before = queue.len();
        queue.retain(|queued| !queued.sighting.is_expired(now));
        Ok(before - queue.len())
    }

    fn snapshot(&self) -> JobResult<Vec<QueuedSighting>> {
        Ok(self.queue.read().map_err(|_| poisoned())?.clone())
    }

    fn clear(&self) -> JobResult<()> {
        self.queue.write().map_err(|_| poisoned())?.clear();
        self.checks.write().map_err(|_| poisoned())?.clear();
        Ok(())
    }

    fn record_check(&self, at: DateTime<Utc>) -> JobResult<()> {
        self.checks.write().map_err(|_| poisoned())?.push_back(at);
        Ok(())
    }

    fn checks_since(&self, since: DateTime<Utc>) -> JobResult<usize> {
        let mut checks = self.checks.write().map_err(|_| poisoned())?;
        while checks.front().is_some_and(|at| *at < since) {
            checks.pop_front();
        }
        Ok(checks.len())
    }
}
