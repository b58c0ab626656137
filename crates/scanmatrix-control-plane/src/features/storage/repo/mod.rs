use crate::shared::error::{ControlPlaneError, ControlPlaneResult};
use crate::shared::types::{Assignment, Device, DeviceGroup, Geofence, Instance, IvList};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, RwLock};
use tracing::info;

/// Persistence collaborator. Not-found is `Ok(None)`; `Err` is a storage fault.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ScanRepository: Send + Sync {
    async fn get_all_instances(&self) -> ControlPlaneResult<Vec<Instance>>;

    async fn get_all_devices(&self) -> ControlPlaneResult<Vec<Device>>;

    async fn get_device_by_uuid(&self, uuid: &str) -> ControlPlaneResult<Option<Device>>;

    /// Unknown uuids are skipped.
    async fn get_devices_by_uuids(&self, uuids: &[String]) -> ControlPlaneResult<Vec<Device>>;

    /// Upsert.
    async fn update_device(&self, device: Device) -> ControlPlaneResult<()>;

    async fn get_all_assignments(&self) -> ControlPlaneResult<Vec<Assignment>>;

    async fn get_geofence_by_name(&self, name: &str) -> ControlPlaneResult<Option<Geofence>>;

    async fn get_iv_list_by_name(&self, name: &str) -> ControlPlaneResult<Option<IvList>>;

    async fn get_device_group_by_name(
        &self,
        name: &str,
    ) -> ControlPlaneResult<Option<DeviceGroup>>;
}

/// On-disk seed format for the in-memory repository.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SeedData {
    pub instances: Vec<Instance>,
    pub devices: Vec<Device>,
    pub device_groups: Vec<DeviceGroup>,
    pub assignments: Vec<Assignment>,
    pub geofences: Vec<Geofence>,
    pub iv_lists: Vec<IvList>,
}

#[derive(Default)]
struct Tables {
    instances: HashMap<String, Instance>,
    devices: HashMap<String, Device>,
    device_groups: HashMap<String, DeviceGroup>,
    assignments: HashMap<u32, Assignment>,
    geofences: HashMap<String, Geofence>,
    iv_lists: HashMap<String, IvList>,
}

/// In-memory implementation of the scan repository
#[derive(Clone, Default)]
pub struct InMemoryScanRepository {
    storage: Arc<RwLock<Tables>>,
}

fn lock_poisoned() -> ControlPlaneError {
    ControlPlaneError::StorageError("Lock poisoned".to_string())
}

impl InMemoryScanRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_seed(seed: SeedData) -> Self {
        let mut tables = Tables::default();
        tables.instances = seed
            .instances
            .into_iter()
            .map(|instance| (instance.name.clone(), instance))
            .collect();
        tables.devices = seed
            .devices
            .into_iter()
            .map(|device| (device.uuid.clone(), device))
            .collect();
        tables.device_groups = seed
            .device_groups
            .into_iter()
            .map(|group| (group.name.clone(), group))
            .collect();
        tables.assignments = seed
            .assignments
            .into_iter()
            .map(|assignment| (assignment.id, assignment))
            .collect();
        tables.geofences = seed
            .geofences
            .into_iter()
            .map(|geofence| (geofence.name.clone(), geofence))
            .collect();
        tables.iv_lists = seed
            .iv_lists
            .into_iter()
            .map(|list| (list.name.clone(), list))
            .collect();

        Self {
            storage: Arc::new(RwLock::new(tables)),
        }
    }

    pub fn from_json(raw: &str) -> ControlPlaneResult<Self> {
        let seed: SeedData = serde_json::from_str(raw)
            .map_err(|e| ControlPlaneError::ConfigurationError(format!("Invalid seed data: {e}")))?;
        Ok(Self::from_seed(seed))
    }

    pub async fn load_seed_file(path: &Path) -> ControlPlaneResult<Self> {
        let raw = tokio::fs::read_to_string(path).await.map_err(|e| {
            ControlPlaneError::ConfigurationError(format!(
                "Cannot read seed file {}: {e}",
                path.display()
            ))
        })?;
        let repo = Self::from_json(&raw)?;
        info!(path = %path.display(), "Loaded seed data");
        Ok(repo)
    }

    fn write(&self) -> ControlPlaneResult<std::sync::RwLockWriteGuard<'_, Tables>> {
        self.storage.write().map_err(|_| lock_poisoned())
    }

    fn read(&self) -> ControlPlaneResult<std::sync::RwLockReadGuard<'_, Tables>> {
        self.storage.read().map_err(|_| lock_poisoned())
    }

    pub fn insert_instance(&self, instance: Instance) -> ControlPlaneResult<()> {
        self.write()?.instances.insert(instance.name.clone(), instance);
        Ok(())
    }

    pub fn remove_instance(&self, name: &str) -> ControlPlaneResult<bool> {
        Ok(self.write()?.instances.remove(name).is_some())
    }

    pub fn insert_device(&self, device: Device) -> ControlPlaneResult<()> {
        self.write()?.devices.insert(device.uuid.clone(), device);
        Ok(())
    }

    pub fn insert_device_group(&self, group: DeviceGroup) -> ControlPlaneResult<()> {
        self.write()?.device_groups.insert(group.name.clone(), group);
        Ok(())
    }

    pub fn insert_assignment(&self, assignment: Assignment) -> ControlPlaneResult<()> {
        self.write()?.assignments.insert(assignment.id, assignment);
        Ok(())
    }

    pub fn remove_assignment(&self, id: u32) -> ControlPlaneResult<bool> {
        Ok(self.write()?.assignments.remove(&id).is_some())
    }

    pub fn insert_geofence(&self, geofence: Geofence) -> ControlPlaneResult<()> {
        self.write()?.geofences.insert(geofence.name.clone(), geofence);
        Ok(())
    }

    pub fn insert_iv_list(&self, iv_list: IvList) -> ControlPlaneResult<()> {
        self.write()?.iv_lists.insert(iv_list.name.clone(), iv_list);
        Ok(())
    }
}

#[async_trait]
impl ScanRepository for InMemoryScanRepository {
    async fn get_all_instances(&self) -> ControlPlaneResult<Vec<Instance>> {
        let mut instances: Vec<Instance> = self.read()?.instances.values().cloned().collect();
        instances.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(instances)
    }

    async fn get_all_devices(&self) -> ControlPlaneResult<Vec<Device>> {
        let mut devices: Vec<Device> = self.read()?.devices.values().cloned().collect();
        devices.sort_by(|a, b| a.uuid.cmp(&b.uuid));
        Ok(devices)
    }

    async fn get_device_by_uuid(&self, uuid: &str) -> ControlPlaneResult<Option<Device>> {
        Ok(self.read()?.devices.get(uuid).cloned())
    }

    async fn get_devices_by_uuids(&self, uuids: &[String]) -> ControlPlaneResult<Vec<Device>> {
        let storage = self.read()?;
        Ok(uuids
            .iter()
            .filter_map(|uuid| storage.devices.get(uuid).cloned())
            .collect())
    }

    async fn update_device(&self, device: Device) -> ControlPlaneResult<()> {
        self.write()?.devices.insert(device.uuid.clone(), device);
        Ok(())
    }

    async fn get_all_assignments(&self) -> ControlPlaneResult<Vec<Assignment>> {
        let mut assignments: Vec<Assignment> =
            self.read()?.assignments.values().cloned().collect();
        assignments.sort_by_key(|assignment| assignment.id);
        Ok(assignments)
    }

    async fn get_geofence_by_name(&self, name: &str) -> ControlPlaneResult<Option<Geofence>> {
        Ok(self.read()?.geofences.get(name).cloned())
    }

    async fn get_iv_list_by_name(&self, name: &str) -> ControlPlaneResult<Option<IvList>> {
        Ok(self.read()?.iv_lists.get(name).cloned())
    }

    async fn get_device_group_by_name(
        &self,
        name: &str,
    ) -> ControlPlaneResult<Option<DeviceGroup>> {
        Ok(self.read()?.device_groups.get(name).cloned())
    }
}
