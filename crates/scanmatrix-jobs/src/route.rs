use std::collections::HashSet;
use std::sync::{Mutex, MutexGuard};

use scanmatrix_core::Coordinate;

use crate::{JobError, JobResult};

/// Shared walking state: an ordered route, a cursor, and the attached devices.
#[derive(Debug)]
pub struct RouteWalker {
    route: Vec<Coordinate>,
    cursor: usize,
    laps: u64,
    devices: HashSet<String>,
    stopped: bool,
}

/// One step handed out by [`RouteWalker::advance`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Step {
    pub coordinate: Coordinate,
    /// Set on the step that visits the final point of the route.
    pub completes_lap: bool,
}

impl RouteWalker {
    pub fn new(route: Vec<Coordinate>) -> Self {
        Self {
            route,
            cursor: 0,
            laps: 0,
            devices: HashSet::new(),
            stopped: false,
        }
    }

    pub fn advance(&mut self) -> Option<Step> {
        if self.stopped || self.route.is_empty() {
            return None;
        }

        let coordinate = self.route[self.cursor];
        self.cursor += 1;
        let completes_lap = self.cursor == self.route.len();
        if completes_lap {
            self.cursor = 0;
            self.laps += 1;
        }

        Some(Step {
            coordinate,
            completes_lap,
        })
    }

    /// Swap in a freshly decoded route, keeping attached devices.
    pub fn rebuild(&mut self, route: Vec<Coordinate>) {
        self.route = route;
        self.reset();
    }

    pub fn reset(&mut self) {
        self.cursor = 0;
        self.laps = 0;
        self.stopped = false;
    }

    pub fn stop(&mut self) {
        self.stopped = true;
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped
    }

    pub fn position(&self) -> usize {
        self.cursor
    }

    pub fn len(&self) -> usize {
        self.route.len()
    }

    pub fn is_empty(&self) -> bool {
        self.route.is_empty()
    }

    pub fn laps(&self) -> u64 {
        self.laps
    }

    pub fn attach(&mut self, device_uuid: &str) {
        self.devices.insert(device_uuid.to_string());
    }

    pub fn detach(&mut self, device_uuid: &str) {
        self.devices.remove(device_uuid);
    }

    pub fn device_count(&self) -> usize {
        self.devices.len()
    }
}

pub(crate) fn lock_state<'a, T>(
    state: &'a Mutex<T>,
    instance_name: &str,
) -> JobResult<MutexGuard<'a, T>> {
    state
        .lock()
        .map_err(|_| JobError::LockPoisoned(instance_name.to_string()))
}
