use crate::features::assignment_scheduling::service::AssignmentScheduler;
use crate::shared::error::ControlPlaneResult;
use crate::shared::types::{Assignment, TriggerAssignmentRequest};
use scanmatrix_core::ErrorResponse;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time;
use tracing::{debug, info, warn};

/// Owns the scheduler's tick loop and the admin entry points for assignments.
pub struct AssignmentSchedulingController {
    service: Arc<AssignmentScheduler>,
    interval: Duration,
    tick_loop: Mutex<Option<JoinHandle<()>>>,
}

impl AssignmentSchedulingController {
    pub fn new(service: Arc<AssignmentScheduler>, interval: Duration) -> Self {
        Self {
            service,
            interval,
            tick_loop: Mutex::new(None),
        }
    }

    pub fn service(&self) -> &Arc<AssignmentScheduler> {
        &self.service
    }

    /// Load assignments, place unassigned devices, then start ticking.
    pub async fn start(&self) -> ControlPlaneResult<usize> {
        let loaded = self.service.load().await?;
        let placed = self.service.setup().await;
        let handle = self.spawn_tick_loop();
        if let Ok(mut tick_loop) = self.tick_loop.lock() {
            if let Some(previous) = tick_loop.replace(handle) {
                previous.abort();
            }
        }
        info!(assignments = loaded, placed, interval = ?self.interval, "Assignment scheduler started");
        Ok(loaded)
    }

    fn spawn_tick_loop(&self) -> JoinHandle<()> {
        let service = Arc::clone(&self.service);
        let interval = self.interval;
        tokio::spawn(async move {
            let mut ticker = time::interval(interval);
            loop {
                ticker.tick().await;

                // Fired assignments finish on their own tasks.
                let fired = service.tick().await.fired;
                if fired > 0 {
                    info!(fired, "Scheduler tick fired assignments");
                } else {
                    debug!("Scheduler tick");
                }
            }
        })
    }

    pub fn is_running(&self) -> bool {
        self.tick_loop
            .lock()
            .map(|tick_loop| tick_loop.as_ref().map_or(false, |h| !h.is_finished()))
            .unwrap_or(false)
    }

    /// Abort the tick loop and drop every assignment.
    pub async fn stop(&self) {
        match self.tick_loop.lock() {
            Ok(mut tick_loop) => {
                if let Some(handle) = tick_loop.take() {
                    handle.abort();
                }
            }
            Err(_) => warn!("Tick loop handle lock poisoned"),
        }
        self.service.clear().await;
        info!("Assignment scheduler stopped");
    }

    pub async fn reload(&self) -> ControlPlaneResult<usize> {
        self.stop().await;
        self.start().await
    }

    pub async fn list_assignments(&self) -> Vec<Assignment> {
        self.service.assignments().await
    }

    pub async fn add_assignment(&self, assignment: Assignment) -> Result<(), ErrorResponse> {
        info!(assignment = assignment.id, "Received add assignment request");

        self.service
            .add_assignment(assignment)
            .await
            .map_err(|e| e.into())
    }

    pub async fn edit_assignment(
        &self,
        old_id: u32,
        assignment: Assignment,
    ) -> Result<(), ErrorResponse> {
        info!(old = old_id, new = assignment.id, "Received edit assignment request");

        self.service
            .edit_assignment(old_id, assignment)
            .await
            .map_err(|e| e.into())
    }

    pub async fn delete_assignment(&self, id: u32) -> Result<(), ErrorResponse> {
        info!(assignment = id, "Received delete assignment request");

        self.service.delete_assignment(id).await.map_err(|e| e.into())
    }

    pub async fn delete_all_assignments(&self) -> usize {
        self.service.delete_all().await
    }

    /// Returns how many devices moved.
    pub async fn trigger_assignment(
        &self,
        request: TriggerAssignmentRequest,
    ) -> Result<usize, ErrorResponse> {
        self.service
            .trigger_by_id(request.assignment_id, request.force)
            .await
            .map_err(|e| e.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::instance_orchestration::service::InstanceOrchestrator;
    use crate::features::lookups::repo::StaticTimezoneLookup;
    use crate::features::lookups::service::LookupService;
    use crate::features::observability::controller::ObservabilityController;
    use crate::features::storage::repo::{InMemoryScanRepository, ScanRepository};
    use crate::shared::types::{Device, Geofence, Instance, InstanceType};
    use scanmatrix_core::GeofenceKind;
    use scanmatrix_jobs::JobControllerRegistry;
    use serde_json::json;

    async fn create_test_controller() -> AssignmentSchedulingController {
        let repo = Arc::new(InMemoryScanRepository::new());
        repo.insert_geofence(Geofence {
            name: "route".to_string(),
            kind: GeofenceKind::Circle,
            area: json!([{"lat": 0.1, "lon": 0.1}]),
        })
        .unwrap();
        for name in ["Day", "Night"] {
            repo.insert_instance(
                Instance::new(name, InstanceType::CircleRaid).with_geofence("route"),
            )
            .unwrap();
        }
        repo.insert_device(Device::new("dev-1").with_instance("Day"))
            .unwrap();
        repo.insert_device(Device::new("dev-2")).unwrap();
        // Zero-time rule without a source: the startup pass applies it.
        repo.insert_assignment(Assignment::for_device(1, "dev-2", "Night"))
            .unwrap();
        repo.insert_assignment(Assignment::for_device(2, "dev-1", "Night").at(43_200))
            .unwrap();

        let repo: Arc<dyn ScanRepository> = repo;
        let metrics = ObservabilityController::create().unwrap();
        let lookups = Arc::new(LookupService::new(
            Arc::clone(&repo),
            Arc::new(StaticTimezoneLookup::default()),
        ));
        let orchestrator = Arc::new(InstanceOrchestrator::new(
            Arc::clone(&repo),
            lookups,
            JobControllerRegistry::with_builtin(),
            Arc::clone(&metrics),
            100,
        ));
        orchestrator.start().await.unwrap();
        let service = Arc::new(AssignmentScheduler::new(repo, orchestrator, metrics));
        AssignmentSchedulingController::new(service, Duration::from_secs(5))
    }

    #[tokio::test]
    async fn test_start_loads_and_runs_startup_pass() {
        let controller = create_test_controller().await;
        assert_eq!(controller.start().await.unwrap(), 2);
        assert!(controller.is_running());
        assert_eq!(controller.service().startup_passes(), 1);

        controller.stop().await;
        assert!(!controller.is_running());
        assert!(controller.list_assignments().await.is_empty());

        assert_eq!(controller.reload().await.unwrap(), 2);
        controller.stop().await;
    }

    #[tokio::test]
    async fn test_manual_trigger() {
        let controller = create_test_controller().await;
        controller.start().await.unwrap();

        let moved = controller
            .trigger_assignment(TriggerAssignmentRequest {
                assignment_id: 2,
                force: false,
            })
            .await
            .unwrap();
        assert_eq!(moved, 1);

        let error = controller
            .trigger_assignment(TriggerAssignmentRequest {
                assignment_id: 99,
                force: true,
            })
            .await
            .unwrap_err();
        assert_eq!(error.error_code, "ASSIGNMENT_NOT_FOUND");
        controller.stop().await;
    }

    #[tokio::test]
    async fn test_admin_errors_map_to_error_response() {
        let controller = create_test_controller().await;

        let error = controller.delete_assignment(42).await.unwrap_err();
        assert_eq!(error.error_code, "ASSIGNMENT_NOT_FOUND");

        let error = controller
            .add_assignment(Assignment::for_device(3, "dev-1", "Night").at(90_000))
            .await
            .unwrap_err();
        assert_eq!(error.error_code, "INVALID_DATA");

        controller
            .add_assignment(Assignment::for_device(3, "dev-1", "Night").at(60))
            .await
            .unwrap();
        controller
            .edit_assignment(3, Assignment::for_device(4, "dev-1", "Day").at(60))
            .await
            .unwrap();
        assert_eq!(controller.list_assignments().await[0].id, 4);
        assert_eq!(controller.delete_all_assignments().await, 1);
    }
}
