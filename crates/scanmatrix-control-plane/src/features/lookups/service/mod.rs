use crate::features::lookups::repo::TimezoneLookup;
use crate::features::storage::repo::ScanRepository;
use crate::shared::error::{ControlPlaneError, ControlPlaneResult};
use crate::shared::types::{Geofence, Instance, IvList};
use scanmatrix_core::{Area, CoreError};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

/// Read-through caches over the geofence and IV-list tables, plus timezone
/// resolution for instances that follow a remote clock.
pub struct LookupService {
    repo: Arc<dyn ScanRepository>,
    timezones: Arc<dyn TimezoneLookup>,
    geofences: RwLock<HashMap<String, Geofence>>,
    iv_lists: RwLock<HashMap<String, IvList>>,
}

impl LookupService {
    pub fn new(repo: Arc<dyn ScanRepository>, timezones: Arc<dyn TimezoneLookup>) -> Self {
        Self {
            repo,
            timezones,
            geofences: RwLock::new(HashMap::new()),
            iv_lists: RwLock::new(HashMap::new()),
        }
    }

    pub async fn geofence(&self, name: &str) -> ControlPlaneResult<Geofence> {
        if let Some(geofence) = self.geofences.read().await.get(name) {
            return Ok(geofence.clone());
        }

        let geofence = self
            .repo
            .get_geofence_by_name(name)
            .await?
            .ok_or_else(|| ControlPlaneError::GeofenceNotFound(name.to_string()))?;
        debug!(geofence = %name, "Geofence cached");
        self.geofences
            .write()
            .await
            .insert(name.to_string(), geofence.clone());
        Ok(geofence)
    }

    pub async fn iv_list(&self, name: &str) -> ControlPlaneResult<IvList> {
        if let Some(list) = self.iv_lists.read().await.get(name) {
            return Ok(list.clone());
        }

        let list = self
            .repo
            .get_iv_list_by_name(name)
            .await?
            .ok_or_else(|| ControlPlaneError::IvListNotFound(name.to_string()))?;
        debug!(iv_list = %name, species = list.pokemon.len(), "IV list cached");
        self.iv_lists
            .write()
            .await
            .insert(name.to_string(), list.clone());
        Ok(list)
    }

    /// Decode every geofence the instance references into one area, in
    /// reference order.
    pub async fn resolve_area(&self, instance: &Instance) -> ControlPlaneResult<Area> {
        if instance.data.geofences.is_empty() {
            return Err(CoreError::InvalidArea(format!(
                "instance '{}' references no geofence",
                instance.name
            ))
            .into());
        }

        let mut geofences = Vec::with_capacity(instance.data.geofences.len());
        for name in &instance.data.geofences {
            geofences.push(self.geofence(name).await?);
        }
        let payloads: Vec<&serde_json::Value> = geofences.iter().map(|g| &g.area).collect();
        Ok(Area::decode(
            instance.instance_type.area_shape(),
            &payloads,
        )?)
    }

    /// Unknown timezone names are logged and treated as absent.
    pub fn timezone_offset(&self, instance: &Instance) -> Option<i32> {
        let name = instance.data.timezone.as_deref()?;
        let offset = self.timezones.offset_seconds(name);
        if offset.is_none() {
            warn!(instance = %instance.name, timezone = %name, "Unknown timezone, using UTC");
        }
        offset
    }

    /// Drop both caches so the next lookup reads storage again.
    pub async fn refresh(&self) {
        let geofences = {
            let mut cache = self.geofences.write().await;
            let count = cache.len();
            cache.clear();
            count
        };
        let iv_lists = {
            let mut cache = self.iv_lists.write().await;
            let count = cache.len();
            cache.clear();
            count
        };
        info!(geofences, iv_lists, "Lookup caches cleared");
    }

    pub async fn invalidate_geofence(&self, name: &str) {
        self.geofences.write().await.remove(name);
    }

    pub async fn invalidate_iv_list(&self, name: &str) {
        self.iv_lists.write().await.remove(name);
    }

    /// Forget the geofences and IV list `instance` references.
    pub async fn invalidate_instance(&self, instance: &Instance) {
        for name in &instance.data.geofences {
            self.invalidate_geofence(name).await;
        }
        if let Some(name) = instance.data.iv_list.as_deref() {
            self.invalidate_iv_list(name).await;
        }
        debug!(instance = %instance.name, "Lookups invalidated");
    }
}
