pub use scanmatrix_core::{
    Assignment, Coordinate, Device, DeviceGroup, Geofence, Instance, InstanceType, IvList,
    Sighting, Task,
};

use serde::{Deserialize, Serialize};

/// Status line for one configured instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstanceStatusResponse {
    pub name: String,
    pub instance_type: InstanceType,
    pub status: String,
    pub device_count: usize,
}

/// Request to move a device onto an instance outside the assignment rules.
#[derive(Debug, Clone)]
pub struct ReassignDeviceRequest {
    pub device_uuid: String,
    pub instance_name: String,
}

/// Request to fire an assignment immediately.
#[derive(Debug, Clone)]
pub struct TriggerAssignmentRequest {
    pub assignment_id: u32,
    pub force: bool,
}
