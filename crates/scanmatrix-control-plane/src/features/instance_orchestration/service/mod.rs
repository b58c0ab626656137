use crate::features::lookups::service::LookupService;
use crate::features::observability::controller::ObservabilityController;
use crate::features::storage::repo::ScanRepository;
use crate::shared::error::{ControlPlaneError, ControlPlaneResult};
use crate::shared::types::{Coordinate, Device, Instance, InstanceStatusResponse, Sighting};
use async_trait::async_trait;
use chrono::Utc;
use scanmatrix_jobs::{
    CompletionSignal, IvJobController, JobContext, JobController, JobControllerRegistry,
};
use std::collections::HashMap;
use std::sync::{Arc, OnceLock, Weak};
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

pub const STARTING_STATUS: &str = "Starting…";

/// Callbacks into the assignment scheduler.
#[async_trait]
pub trait AssignmentHook: Send + Sync {
    /// Devices lost their instance; re-run the startup pass.
    async fn on_devices_released(&self);

    /// A job controller finished its coverage pass.
    async fn on_instance_done(&self, instance_name: &str);
}

#[derive(Default)]
struct InstanceTable {
    definitions: HashMap<String, Instance>,
    controllers: HashMap<String, Arc<dyn JobController>>,
}

/// Owns the device registry and the live job controllers.
///
/// Lock order is instances then devices; neither lock is held across
/// storage I/O or calls into a job controller's reload.
pub struct InstanceOrchestrator {
    repo: Arc<dyn ScanRepository>,
    lookups: Arc<LookupService>,
    registry: JobControllerRegistry,
    metrics: Arc<ObservabilityController>,
    iv_queue_limit: usize,
    instances: RwLock<InstanceTable>,
    devices: RwLock<HashMap<String, Device>>,
    completion: CompletionSignal,
    completion_rx: Mutex<Option<UnboundedReceiver<String>>>,
    hook: OnceLock<Weak<dyn AssignmentHook>>,
}

impl InstanceOrchestrator {
    pub fn new(
        repo: Arc<dyn ScanRepository>,
        lookups: Arc<LookupService>,
        registry: JobControllerRegistry,
        metrics: Arc<ObservabilityController>,
        iv_queue_limit: usize,
    ) -> Self {
        let (completion, completion_rx) = CompletionSignal::channel();
        Self {
            repo,
            lookups,
            registry,
            metrics,
            iv_queue_limit,
            instances: RwLock::new(InstanceTable::default()),
            devices: RwLock::new(HashMap::new()),
            completion,
            completion_rx: Mutex::new(Some(completion_rx)),
            hook: OnceLock::new(),
        }
    }

    /// Only the first hook is kept.
    pub fn set_assignment_hook(&self, hook: Weak<dyn AssignmentHook>) {
        if self.hook.set(hook).is_err() {
            warn!("Assignment hook already installed");
        }
    }

    fn hook(&self) -> Option<Arc<dyn AssignmentHook>> {
        self.hook.get().and_then(Weak::upgrade)
    }

    /// Receiving end of every controller's completion signal. Yields once.
    pub async fn take_completion_receiver(&self) -> Option<UnboundedReceiver<String>> {
        self.completion_rx.lock().await.take()
    }

    pub(crate) async fn notify_instance_done(&self, instance_name: &str) {
        match self.hook() {
            Some(hook) => hook.on_instance_done(instance_name).await,
            None => debug!(instance = %instance_name, "No assignment hook for completion"),
        }
    }

    async fn notify_devices_released(&self) {
        if let Some(hook) = self.hook() {
            hook.on_devices_released().await;
        }
    }

    /// Load devices and instances, then build every controller in parallel.
    /// Returns how many controllers were built.
    pub async fn start(self: &Arc<Self>) -> ControlPlaneResult<usize> {
        let devices = self.repo.get_all_devices().await?;
        let instances = self.repo.get_all_instances().await?;
        info!(
            instances = instances.len(),
            devices = devices.len(),
            "Starting instance orchestrator"
        );

        {
            let mut table = self.instances.write().await;
            for instance in &instances {
                table
                    .definitions
                    .insert(instance.name.clone(), instance.clone());
            }
        }
        {
            let mut registry = self.devices.write().await;
            for device in devices {
                registry.insert(device.uuid.clone(), device);
            }
        }

        let mut builds = JoinSet::new();
        for instance in instances {
            let orchestrator = Arc::clone(self);
            builds.spawn(async move {
                let name = instance.name.clone();
                let result = orchestrator.build_controller(&instance).await;
                (name, result)
            });
        }

        let mut built = 0;
        while let Some(joined) = builds.join_next().await {
            match joined {
                Ok((name, Ok(controller))) => {
                    self.register_controller(&name, controller).await;
                    built += 1;
                }
                Ok((name, Err(err))) => {
                    self.metrics.record_build_failure();
                    error!(instance = %name, error = %err, "Failed to build job controller");
                }
                Err(join_error) => {
                    self.metrics.record_build_failure();
                    error!(error = %join_error, "Job controller build task aborted");
                }
            }
        }

        self.refresh_fleet_metrics().await;
        info!(built, "Instance orchestrator started");
        Ok(built)
    }

    async fn build_controller(
        &self,
        instance: &Instance,
    ) -> ControlPlaneResult<Arc<dyn JobController>> {
        let area = self.lookups.resolve_area(instance).await?;

        let mut instance = instance.clone();
        if instance.data.iv_queue_limit.is_none() {
            instance.data.iv_queue_limit = Some(self.iv_queue_limit);
        }

        let iv_list = match instance.data.iv_list.as_deref() {
            Some(name) => Some(self.lookups.iv_list(name).await?),
            None => None,
        };
        let timezone_offset = self.lookups.timezone_offset(&instance);

        let mut ctx = JobContext::new(instance, area, self.completion.clone());
        if let Some(iv_list) = iv_list {
            ctx = ctx.with_iv_list(iv_list);
        }
        if let Some(offset) = timezone_offset {
            ctx = ctx.with_timezone_offset(offset);
        }

        Ok(self.registry.build(ctx)?)
    }

    /// Install the controller under `name` and attach devices already on it.
    async fn register_controller(&self, name: &str, controller: Arc<dyn JobController>) {
        let previous = self
            .instances
            .write()
            .await
            .controllers
            .insert(name.to_string(), Arc::clone(&controller));
        if let Some(previous) = previous {
            previous.stop();
        }

        let attached: Vec<String> = self
            .devices
            .read()
            .await
            .values()
            .filter(|device| device.is_on(name))
            .map(|device| device.uuid.clone())
            .collect();
        for uuid in &attached {
            controller.device_attached(uuid);
        }
        info!(instance = %name, devices = attached.len(), "Job controller registered");
    }

    async fn controller(&self, name: &str) -> Option<Arc<dyn JobController>> {
        self.instances.read().await.controllers.get(name).cloned()
    }

    /// Controller for the device's instance, if both exist.
    pub async fn get_instance_controller(&self, uuid: &str) -> Option<Arc<dyn JobController>> {
        let instance_name = self.devices.read().await.get(uuid)?.instance_name.clone()?;
        self.controller(&instance_name).await
    }

    pub async fn add_instance(&self, instance: Instance) -> ControlPlaneResult<()> {
        let name = instance.name.clone();
        self.instances
            .write()
            .await
            .definitions
            .insert(name.clone(), instance.clone());

        match self.build_controller(&instance).await {
            Ok(controller) => {
                self.register_controller(&name, controller).await;
                self.refresh_fleet_metrics().await;
                Ok(())
            }
            Err(err) => {
                self.metrics.record_build_failure();
                error!(instance = %name, error = %err, "Failed to build job controller");
                Err(err)
            }
        }
    }

    /// Replace `old_name` with `instance`, carrying its devices across.
    pub async fn reload_instance(
        &self,
        instance: Instance,
        old_name: &str,
    ) -> ControlPlaneResult<()> {
        let new_name = instance.name.clone();

        let (old_definition, old_controller, migrated) = {
            let mut table = self.instances.write().await;
            let old_definition = table.definitions.remove(old_name);
            table
                .definitions
                .insert(new_name.clone(), instance.clone());
            let old_controller = table.controllers.remove(old_name);

            let mut devices = self.devices.write().await;
            let mut migrated = Vec::new();
            if old_name != new_name {
                for device in devices.values_mut().filter(|device| device.is_on(old_name)) {
                    device.instance_name = Some(new_name.clone());
                    migrated.push(device.clone());
                }
            }
            (old_definition, old_controller, migrated)
        };

        for device in &migrated {
            if let Err(err) = self.repo.update_device(device.clone()).await {
                warn!(device = %device.uuid, error = %err, "Failed to persist migrated device");
            }
        }
        if let Some(old_controller) = old_controller {
            old_controller.stop();
        }
        info!(
            old = %old_name,
            new = %new_name,
            migrated = migrated.len(),
            "Reloading instance"
        );

        // Edited geofences and IV lists must be read from storage again.
        if let Some(old_definition) = &old_definition {
            self.lookups.invalidate_instance(old_definition).await;
        }
        self.lookups.invalidate_instance(&instance).await;

        match self.build_controller(&instance).await {
            Ok(controller) => {
                self.register_controller(&new_name, controller).await;
                self.refresh_fleet_metrics().await;
                Ok(())
            }
            Err(err) => {
                self.metrics.record_build_failure();
                error!(instance = %new_name, error = %err, "Failed to rebuild job controller");
                Err(err)
            }
        }
    }

    /// Stop the instance, unassign its devices and let the scheduler place them.
    pub async fn remove_instance(&self, name: &str) -> ControlPlaneResult<()> {
        let (controller, released) = {
            let mut table = self.instances.write().await;
            let definition = table.definitions.remove(name);
            let controller = table.controllers.remove(name);
            if definition.is_none() && controller.is_none() {
                return Err(ControlPlaneError::InstanceNotFound(name.to_string()));
            }

            let mut devices = self.devices.write().await;
            let mut released = Vec::new();
            for device in devices.values_mut().filter(|device| device.is_on(name)) {
                device.instance_name = None;
                released.push(device.clone());
            }
            (controller, released)
        };

        if let Some(controller) = controller {
            controller.stop();
        }
        for device in &released {
            if let Err(err) = self.repo.update_device(device.clone()).await {
                warn!(device = %device.uuid, error = %err, "Failed to persist released device");
            }
        }
        info!(instance = %name, released = released.len(), "Instance removed");

        self.refresh_fleet_metrics().await;
        self.notify_devices_released().await;
        Ok(())
    }

    /// Returns false when the device was already registered.
    pub async fn add_device(&self, device: Device) -> bool {
        let uuid = device.uuid.clone();
        let instance_name = device.instance_name.clone();
        {
            let mut devices = self.devices.write().await;
            if devices.contains_key(&uuid) {
                return false;
            }
            devices.insert(uuid.clone(), device);
        }

        if let Some(name) = instance_name {
            if let Some(controller) = self.controller(&name).await {
                controller.device_attached(&uuid);
            }
        }
        debug!(device = %uuid, "Device registered");
        true
    }

    pub async fn remove_device(&self, uuid: &str) -> ControlPlaneResult<()> {
        let removed = self
            .devices
            .write()
            .await
            .remove(uuid)
            .ok_or_else(|| ControlPlaneError::DeviceNotFound(uuid.to_string()))?;

        if let Some(name) = removed.instance_name.as_deref() {
            if let Some(controller) = self.controller(name).await {
                controller.device_detached(uuid);
            }
        }
        info!(device = %uuid, "Device removed");

        self.notify_devices_released().await;
        Ok(())
    }

    /// Replace the registry entry for `old_uuid` with `device`.
    pub async fn reload_device(&self, device: Device, old_uuid: &str) {
        let previous = {
            let mut devices = self.devices.write().await;
            let previous = devices.remove(old_uuid);
            devices.insert(device.uuid.clone(), device.clone());
            previous
        };

        if let Some(name) = previous.as_ref().and_then(|d| d.instance_name.as_deref()) {
            if let Some(controller) = self.controller(name).await {
                controller.device_detached(old_uuid);
            }
        }
        if let Some(name) = device.instance_name.as_deref() {
            if let Some(controller) = self.controller(name).await {
                controller.device_attached(&device.uuid);
            }
        }
        debug!(old = %old_uuid, new = %device.uuid, "Device reloaded");
    }

    /// Move a device onto `instance_name`. Storage failures are logged; the
    /// in-memory move stands.
    pub async fn reassign_device(
        &self,
        uuid: &str,
        instance_name: &str,
    ) -> ControlPlaneResult<()> {
        if !self
            .instances
            .read()
            .await
            .definitions
            .contains_key(instance_name)
        {
            return Err(ControlPlaneError::InstanceNotFound(instance_name.to_string()));
        }

        if !self.devices.read().await.contains_key(uuid) {
            let stored = self
                .repo
                .get_device_by_uuid(uuid)
                .await?
                .ok_or_else(|| ControlPlaneError::DeviceNotFound(uuid.to_string()))?;
            self.devices
                .write()
                .await
                .entry(uuid.to_string())
                .or_insert(stored);
        }

        let (previous, updated) = {
            let mut devices = self.devices.write().await;
            let device = devices
                .get_mut(uuid)
                .ok_or_else(|| ControlPlaneError::DeviceNotFound(uuid.to_string()))?;
            if device.is_on(instance_name) {
                return Ok(());
            }
            let previous = device.instance_name.replace(instance_name.to_string());
            (previous, device.clone())
        };

        if let Some(previous) = previous.as_deref() {
            if let Some(controller) = self.controller(previous).await {
                controller.device_detached(uuid);
            }
        }
        if let Err(err) = self.repo.update_device(updated).await {
            warn!(device = %uuid, error = %err, "Failed to persist device reassignment");
        }
        if let Some(controller) = self.controller(instance_name).await {
            controller.device_attached(uuid);
        }

        self.metrics.record_reassignment();
        info!(
            device = %uuid,
            from = previous.as_deref().unwrap_or("-"),
            to = %instance_name,
            "Device reassigned"
        );
        Ok(())
    }

    pub async fn update_device_location(
        &self,
        uuid: &str,
        coordinate: Coordinate,
    ) -> ControlPlaneResult<()> {
        let mut devices = self.devices.write().await;
        let device = devices
            .get_mut(uuid)
            .ok_or_else(|| ControlPlaneError::DeviceNotFound(uuid.to_string()))?;
        device.last_location = Some(coordinate);
        device.last_seen = Some(Utc::now().timestamp());
        Ok(())
    }

    fn iv_controllers(
        controllers: &[Arc<dyn JobController>],
    ) -> impl Iterator<Item = &dyn IvJobController> {
        controllers.iter().filter_map(|controller| controller.as_iv())
    }

    async fn snapshot_controllers(&self) -> Vec<Arc<dyn JobController>> {
        self.instances
            .read()
            .await
            .controllers
            .values()
            .cloned()
            .collect()
    }

    /// Offer a new sighting to every IV controller.
    pub async fn got_pokemon(&self, sighting: &Sighting) {
        let controllers = self.snapshot_controllers().await;
        for iv in Self::iv_controllers(&controllers) {
            iv.add_pokemon(sighting);
        }
    }

    /// Report an encounter result to every IV controller.
    pub async fn got_iv(&self, sighting: &Sighting) {
        let controllers = self.snapshot_controllers().await;
        for iv in Self::iv_controllers(&controllers) {
            iv.got_iv(sighting);
        }
    }

    /// Empty for unknown or non-IV instances.
    pub async fn get_iv_queue(&self, name: &str) -> Vec<Sighting> {
        self.controller(name)
            .await
            .and_then(|controller| controller.as_iv().map(|iv| iv.queue()))
            .unwrap_or_default()
    }

    pub async fn get_instance(&self, name: &str) -> Option<Instance> {
        self.instances.read().await.definitions.get(name).cloned()
    }

    pub async fn instance_status(&self, name: &str) -> Option<String> {
        let table = self.instances.read().await;
        match table.controllers.get(name) {
            Some(controller) => Some(controller.status()),
            None if table.definitions.contains_key(name) => Some(STARTING_STATUS.to_string()),
            None => None,
        }
    }

    pub async fn list_instance_statuses(&self) -> Vec<InstanceStatusResponse> {
        let (definitions, controllers) = {
            let table = self.instances.read().await;
            let mut definitions: Vec<Instance> = table.definitions.values().cloned().collect();
            definitions.sort_by(|a, b| a.name.cmp(&b.name));
            (definitions, table.controllers.clone())
        };
        let mut counts: HashMap<String, usize> = HashMap::new();
        for device in self.devices.read().await.values() {
            if let Some(name) = &device.instance_name {
                *counts.entry(name.clone()).or_default() += 1;
            }
        }

        definitions
            .into_iter()
            .map(|instance| InstanceStatusResponse {
                status: controllers
                    .get(&instance.name)
                    .map(|controller| controller.status())
                    .unwrap_or_else(|| STARTING_STATUS.to_string()),
                device_count: counts.get(&instance.name).copied().unwrap_or(0),
                name: instance.name,
                instance_type: instance.instance_type,
            })
            .collect()
    }

    pub async fn device_uuids_in_instance(&self, name: &str) -> Vec<String> {
        let mut uuids: Vec<String> = self
            .devices
            .read()
            .await
            .values()
            .filter(|device| device.is_on(name))
            .map(|device| device.uuid.clone())
            .collect();
        uuids.sort();
        uuids
    }

    pub async fn get_device(&self, uuid: &str) -> Option<Device> {
        self.devices.read().await.get(uuid).cloned()
    }

    pub async fn list_devices(&self) -> Vec<Device> {
        let mut devices: Vec<Device> = self.devices.read().await.values().cloned().collect();
        devices.sort_by(|a, b| a.uuid.cmp(&b.uuid));
        devices
    }

    /// Stop every controller and empty both registries.
    pub async fn stop(&self) {
        let controllers: Vec<Arc<dyn JobController>> = {
            let mut table = self.instances.write().await;
            table.definitions.clear();
            let controllers = table.controllers.drain().map(|(_, c)| c).collect();
            self.devices.write().await.clear();
            controllers
        };
        for controller in &controllers {
            controller.stop();
        }
        self.refresh_fleet_metrics().await;
        info!(stopped = controllers.len(), "Instance orchestrator stopped");
    }

    /// Stop, drop cached lookups, then rebuild everything from storage.
    pub async fn reload_all(self: &Arc<Self>) -> ControlPlaneResult<usize> {
        self.stop().await;
        self.lookups.refresh().await;
        self.start().await
    }

    pub async fn refresh_fleet_metrics(&self) {
        let instances = self.instances.read().await.controllers.len();
        let devices = self.devices.read().await.len();
        self.metrics.set_fleet_size(instances, devices);
    }
}
