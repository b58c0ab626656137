pub mod auto_quest;
pub mod bootstrap;
pub mod circle;
pub mod features;
pub mod registry;
pub mod route;
pub mod signal;
pub mod spawnpoint;

use scanmatrix_core::{Area, CoreError, Instance, InstanceType, IvList, Sighting, Task};
use thiserror::Error;

pub use registry::{JobConstructor, JobControllerRegistry};
pub use signal::CompletionSignal;

#[derive(Debug, Error)]
pub enum JobError {
    #[error("Job construction failed: {0}")]
    Construction(String),
    #[error("No job controller registered for type: {0}")]
    Unregistered(String),
    #[error("Job state lock poisoned: {0}")]
    LockPoisoned(String),
    #[error(transparent)]
    Core(#[from] CoreError),
}

pub type JobResult<T> = std::result::Result<T, JobError>;

/// Live strategy object for one instance.
///
/// Status and task calls never fail outward: internal faults surface as an
/// `"Error: ..."` status or an idle task so that one broken instance cannot
/// take down the rest of the fleet.
pub trait JobController: Send + Sync {
    fn instance_name(&self) -> &str;

    fn instance_type(&self) -> &InstanceType;

    /// Next unit of work for a device checking in.
    fn get_task(&self, device_uuid: &str, account_username: Option<&str>) -> Task;

    fn status(&self) -> String;

    /// Restart coverage from the area the controller was built with; attached
    /// devices are kept. Edited geofences or instance data take effect through
    /// `InstanceOrchestrator::reload_instance`, which rebuilds the controller
    /// from freshly read storage.
    fn reload(&self);

    /// Stop handing out work. Idempotent.
    fn stop(&self);

    fn device_attached(&self, _device_uuid: &str) {}

    fn device_detached(&self, _device_uuid: &str) {}

    /// IV-capable controllers return themselves here.
    fn as_iv(&self) -> Option<&dyn IvJobController> {
        None
    }
}

/// Controllers that maintain a rarity-priority encounter queue.
pub trait IvJobController: JobController {
    fn queue(&self) -> Vec<Sighting>;

    fn add_pokemon(&self, sighting: &Sighting);

    fn got_iv(&self, sighting: &Sighting);
}

/// Everything a constructor needs, resolved by the orchestrator beforehand.
#[derive(Debug, Clone)]
pub struct JobContext {
    pub instance: Instance,
    pub area: Area,
    pub iv_list: Option<IvList>,
    pub timezone_offset: Option<i32>,
    pub completion: CompletionSignal,
}

impl JobContext {
    pub fn new(instance: Instance, area: Area, completion: CompletionSignal) -> Self {
        Self {
            instance,
            area,
            iv_list: None,
            timezone_offset: None,
            completion,
        }
    }

    pub fn with_iv_list(mut self, iv_list: IvList) -> Self {
        self.iv_list = Some(iv_list);
        self
    }

    pub fn with_timezone_offset(mut self, offset: i32) -> Self {
        self.timezone_offset = Some(offset);
        self
    }

    /// Rejects an area decoded for a different instance shape.
    pub(crate) fn expect_shape(&self) -> JobResult<()> {
        let expected = self.instance.instance_type.area_shape();
        if self.area.shape() != expected {
            return Err(JobError::Construction(format!(
                "instance '{}' of type {} needs a {:?} area",
                self.instance.name, self.instance.instance_type, expected
            )));
        }
        if self.area.route().is_empty() {
            return Err(JobError::Construction(format!(
                "instance '{}' has an empty area",
                self.instance.name
            )));
        }
        Ok(())
    }
}
