use crate::features::observability::repo::ObservabilityRepository;
use std::fmt;
use std::sync::Arc;

/// What fired an assignment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerSource {
    Clock,
    Completion,
    Startup,
    Manual,
}

impl TriggerSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            TriggerSource::Clock => "clock",
            TriggerSource::Completion => "completion",
            TriggerSource::Startup => "startup",
            TriggerSource::Manual => "manual",
        }
    }
}

impl fmt::Display for TriggerSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

pub struct ObservabilityService {
    repo: Arc<ObservabilityRepository>,
}

impl ObservabilityService {
    pub fn new(repo: Arc<ObservabilityRepository>) -> Self {
        Self { repo }
    }

    pub fn set_fleet_size(&self, instances: usize, devices: usize) {
        self.repo.set_active_instance_count(instances as f64);
        self.repo.set_device_count(devices as f64);
    }

    pub fn record_build_failure(&self) {
        self.repo.inc_controller_build_failures();
    }

    pub fn record_reassignment(&self) {
        self.repo.inc_device_reassignments();
    }

    pub fn record_trigger(&self, source: TriggerSource) {
        self.repo.inc_assignment_trigger(source.as_str());
    }

    pub fn record_tick(&self, seconds: f64) {
        self.repo.observe_scheduler_tick(seconds);
    }

    pub fn reassignments(&self) -> u64 {
        self.repo.device_reassignments() as u64
    }

    pub fn render_metrics(&self) -> Result<String, String> {
        self.repo.render_metrics()
    }
}
