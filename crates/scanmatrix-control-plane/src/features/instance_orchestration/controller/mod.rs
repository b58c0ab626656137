use crate::features::instance_orchestration::service::InstanceOrchestrator;
use crate::shared::types::{
    Coordinate, Device, Instance, InstanceStatusResponse, ReassignDeviceRequest, Sighting, Task,
};
use scanmatrix_core::ErrorResponse;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// Entry points for device check-ins, telemetry and fleet edits.
pub struct OrchestrationController {
    service: Arc<InstanceOrchestrator>,
}

impl OrchestrationController {
    pub fn new(service: Arc<InstanceOrchestrator>) -> Self {
        Self { service }
    }

    pub fn service(&self) -> &Arc<InstanceOrchestrator> {
        &self.service
    }

    /// Unassigned devices and devices on an instance that never built get
    /// an idle task.
    pub async fn get_task(&self, device_uuid: &str, account_username: Option<&str>) -> Task {
        match self.service.get_instance_controller(device_uuid).await {
            Some(controller) => controller.get_task(device_uuid, account_username),
            None => {
                debug!(device = %device_uuid, "No job controller for device");
                Task::Idle
            }
        }
    }

    pub async fn reassign_device(
        &self,
        request: ReassignDeviceRequest,
    ) -> Result<(), ErrorResponse> {
        info!(
            device = %request.device_uuid,
            instance = %request.instance_name,
            "Received reassign device request"
        );

        self.service
            .reassign_device(&request.device_uuid, &request.instance_name)
            .await
            .map_err(|e| e.into())
    }

    pub async fn add_instance(&self, instance: Instance) -> Result<(), ErrorResponse> {
        info!(instance = %instance.name, "Received add instance request");

        self.service.add_instance(instance).await.map_err(|e| e.into())
    }

    pub async fn reload_instance(
        &self,
        instance: Instance,
        old_name: &str,
    ) -> Result<(), ErrorResponse> {
        info!(old = %old_name, new = %instance.name, "Received reload instance request");

        self.service
            .reload_instance(instance, old_name)
            .await
            .map_err(|e| e.into())
    }

    pub async fn remove_instance(&self, name: &str) -> Result<(), ErrorResponse> {
        info!(instance = %name, "Received remove instance request");

        self.service.remove_instance(name).await.map_err(|e| e.into())
    }

    pub async fn add_device(&self, device: Device) -> bool {
        self.service.add_device(device).await
    }

    pub async fn remove_device(&self, uuid: &str) -> Result<(), ErrorResponse> {
        self.service.remove_device(uuid).await.map_err(|e| e.into())
    }

    pub async fn report_location(
        &self,
        uuid: &str,
        coordinate: Coordinate,
    ) -> Result<(), ErrorResponse> {
        self.service
            .update_device_location(uuid, coordinate)
            .await
            .map_err(|e| e.into())
    }

    pub async fn report_sighting(&self, sighting: &Sighting) {
        self.service.got_pokemon(sighting).await;
    }

    pub async fn report_iv(&self, sighting: &Sighting) {
        self.service.got_iv(sighting).await;
    }

    pub async fn get_iv_queue(&self, instance_name: &str) -> Vec<Sighting> {
        self.service.get_iv_queue(instance_name).await
    }

    pub async fn list_instances(&self) -> Vec<InstanceStatusResponse> {
        self.service.list_instance_statuses().await
    }

    /// Forward controller completion signals to the assignment hook until the
    /// orchestrator is dropped. Returns `None` if forwarding already runs.
    pub async fn spawn_completion_forwarding(&self) -> Option<JoinHandle<()>> {
        let mut rx = self.service.take_completion_receiver().await?;
        let orchestrator = Arc::downgrade(&self.service);

        Some(tokio::spawn(async move {
            while let Some(instance_name) = rx.recv().await {
                let Some(orchestrator) = orchestrator.upgrade() else {
                    break;
                };
                info!(instance = %instance_name, "Instance completed its pass");
                orchestrator.notify_instance_done(&instance_name).await;
            }
            debug!("Completion forwarding stopped");
        }))
    }
}
