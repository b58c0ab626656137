use crate::features::observability::repo::ObservabilityRepository;
use crate::features::observability::service::{ObservabilityService, TriggerSource};
use crate::shared::error::{ControlPlaneError, ControlPlaneResult};
use std::sync::Arc;

pub struct ObservabilityController {
    service: ObservabilityService,
}

impl ObservabilityController {
    pub fn new(service: ObservabilityService) -> Self {
        Self { service }
    }

    /// Controller over a fresh metrics registry.
    pub fn create() -> ControlPlaneResult<Arc<Self>> {
        let repo = ObservabilityRepository::new().map_err(|e| {
            ControlPlaneError::ConfigurationError(format!("metrics init failed: {e}"))
        })?;
        Ok(Arc::new(Self::new(ObservabilityService::new(Arc::new(
            repo,
        )))))
    }

    pub fn set_fleet_size(&self, instances: usize, devices: usize) {
        self.service.set_fleet_size(instances, devices);
    }

    pub fn record_build_failure(&self) {
        self.service.record_build_failure();
    }

    pub fn record_reassignment(&self) {
        self.service.record_reassignment();
    }

    pub fn record_trigger(&self, source: TriggerSource) {
        self.service.record_trigger(source);
    }

    pub fn record_tick(&self, seconds: f64) {
        self.service.record_tick(seconds);
    }

    pub fn reassignments(&self) -> u64 {
        self.service.reassignments()
    }

    pub fn render_metrics(&self) -> Result<String, String> {
        self.service.render_metrics()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_render_contains_known_metric_names() {
        let controller = ObservabilityController::create().unwrap();
        controller.record_trigger(TriggerSource::Completion);
        controller.record_reassignment();
        controller.set_fleet_size(3, 12);

        let rendered = controller.render_metrics().unwrap();
        assert!(rendered.contains("scanmatrix_assignment_triggers_total"));
        assert!(rendered.contains("trigger=\"completion\""));
        assert!(rendered.contains("scanmatrix_device_count 12"));
        assert_eq!(controller.reassignments(), 1);
    }

    #[test]
    fn test_registries_are_independent() {
        let first = ObservabilityController::create().unwrap();
        let second = ObservabilityController::create().unwrap();
        first.record_reassignment();
        assert_eq!(first.reassignments(), 1);
        assert_eq!(second.reassignments(), 0);
    }
}
