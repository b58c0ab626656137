use std::sync::{Arc, Mutex};

use scanmatrix_core::{Area, InstanceType, Task};
use tracing::{info, warn};

use crate::route::{lock_state, RouteWalker};
use crate::{JobContext, JobController, JobResult};

/// Sends devices across its polygons looking for spawnpoints with unknown timers.
pub struct FindUnknownSpawnpointJobController {
    name: String,
    instance_type: InstanceType,
    min_level: u8,
    max_level: u8,
    area: Area,
    state: Mutex<RouteWalker>,
}

impl FindUnknownSpawnpointJobController {
    pub fn new(ctx: JobContext) -> JobResult<Self> {
        ctx.expect_shape()?;
        let route = ctx.area.route();

        info!(instance = %ctx.instance.name, points = route.len(), "Spawnpoint job controller ready");

        Ok(Self {
            name: ctx.instance.name,
            instance_type: ctx.instance.instance_type,
            min_level: ctx.instance.data.min_level,
            max_level: ctx.instance.data.max_level,
            area: ctx.area,
            state: Mutex::new(RouteWalker::new(route)),
        })
    }

    pub fn construct(ctx: JobContext) -> JobResult<Arc<dyn JobController>> {
        Ok(Arc::new(Self::new(ctx)?))
    }
}

impl JobController for FindUnknownSpawnpointJobController {
    fn instance_name(&self) -> &str {
        &self.name
    }

    fn instance_type(&self) -> &InstanceType {
        &self.instance_type
    }

    fn get_task(&self, device_uuid: &str, _account_username: Option<&str>) -> Task {
        let step = match lock_state(&self.state, &self.name) {
            Ok(mut walker) => walker.advance(),
            Err(error) => {
                warn!(instance = %self.name, device = %device_uuid, error = %error, "Handing out idle task");
                None
            }
        };

        match step {
            Some(step) => Task::ScanSpawnpoint {
                coordinate: step.coordinate,
                min_level: self.min_level,
                max_level: self.max_level,
            },
            None => Task::Idle,
        }
    }

    fn status(&self) -> String {
        match lock_state(&self.state, &self.name) {
            Ok(walker) if walker.is_stopped() => "Stopped".to_string(),
            Ok(walker) => format!(
                "Searching: {}/{} points, {} laps",
                walker.position(),
                walker.len(),
                walker.laps()
            ),
            Err(error) => format!("Error: {error}"),
        }
    }

    fn reload(&self) {
        match lock_state(&self.state, &self.name) {
            Ok(mut walker) => walker.rebuild(self.area.route()),
            Err(error) => warn!(instance = %self.name, error = %error, "Reload skipped"),
        }
    }

    fn stop(&self) {
        if let Ok(mut walker) = lock_state(&self.state, &self.name) {
            walker.stop();
        }
    }

    fn device_attached(&self, device_uuid: &str) {
        if let Ok(mut walker) = lock_state(&self.state, &self.name) {
            walker.attach(device_uuid);
        }
    }

    fn device_detached(&self, device_uuid: &str) {
        if let Ok(mut walker) = lock_state(&self.state, &self.name) {
            walker.detach(device_uuid);
        }
    }
}
