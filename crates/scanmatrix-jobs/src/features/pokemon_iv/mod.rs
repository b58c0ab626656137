pub mod controller;
pub mod repo;
pub mod service;

use std::sync::{Arc, Mutex};

use controller::PokemonIvController;
use repo::InMemoryIvQueueRepository;
use scanmatrix_core::{Area, CoreError, InstanceType, Sighting, Task};
use service::PokemonIvService;
use tracing::{info, warn};

use crate::route::{lock_state, RouteWalker};
use crate::{IvJobController, JobContext, JobController, JobResult};

pub const DEFAULT_IV_QUEUE_LIMIT: usize = 100;

/// Works a rarity-ordered encounter queue fed by telemetry; devices patrol the
/// area outline while the queue is empty.
pub struct PokemonIvJobController {
    name: String,
    instance_type: InstanceType,
    min_level: u8,
    max_level: u8,
    area: Area,
    controller: PokemonIvController,
    patrol: Mutex<RouteWalker>,
}

impl PokemonIvJobController {
    pub fn new(ctx: JobContext) -> JobResult<Self> {
        ctx.expect_shape()?;
        let iv_list = ctx.iv_list.clone().ok_or_else(|| {
            CoreError::MissingLookup(format!(
                "instance '{}' needs an IV list",
                ctx.instance.name
            ))
        })?;
        let limit = ctx
            .instance
            .data
            .iv_queue_limit
            .unwrap_or(DEFAULT_IV_QUEUE_LIMIT);

        info!(
            instance = %ctx.instance.name,
            iv_list = %iv_list.name,
            species = iv_list.pokemon.len(),
            limit,
            "IV job controller ready"
        );

        let service = PokemonIvService::new(
            Arc::new(InMemoryIvQueueRepository::new()),
            iv_list,
            ctx.area.clone(),
            limit,
        );

        Ok(Self {
            controller: PokemonIvController::new(ctx.instance.name.clone(), service),
            patrol: Mutex::new(RouteWalker::new(ctx.area.route())),
            name: ctx.instance.name,
            instance_type: ctx.instance.instance_type,
            min_level: ctx.instance.data.min_level,
            max_level: ctx.instance.data.max_level,
            area: ctx.area,
        })
    }

    pub fn construct(ctx: JobContext) -> JobResult<Arc<dyn JobController>> {
        Ok(Arc::new(Self::new(ctx)?))
    }
}

impl JobController for PokemonIvJobController {
    fn instance_name(&self) -> &str {
        &self.name
    }

    fn instance_type(&self) -> &InstanceType {
        &self.instance_type
    }

    fn get_task(&self, device_uuid: &str, _account_username: Option<&str>) -> Task {
        let step = match lock_state(&self.patrol, &self.name) {
            Ok(walker) if walker.is_stopped() => return Task::Idle,
            Ok(mut walker) => {
                if let Some(task) = self.controller.next_task(self.min_level, self.max_level) {
                    return task;
                }
                walker.advance()
            }
            Err(error) => {
                warn!(instance = %self.name, device = %device_uuid, error = %error, "Handing out idle task");
                None
            }
        };

        match step {
            Some(step) => Task::ScanPokemon {
                coordinate: step.coordinate,
                min_level: self.min_level,
                max_level: self.max_level,
            },
            None => Task::Idle,
        }
    }

    fn status(&self) -> String {
        match lock_state(&self.patrol, &self.name) {
            Ok(walker) if walker.is_stopped() => "Stopped".to_string(),
            Ok(_) => self.controller.status(),
            Err(error) => format!("Error: {error}"),
        }
    }

    fn reload(&self) {
        self.controller.reset();
        match lock_state(&self.patrol, &self.name) {
            Ok(mut walker) => walker.rebuild(self.area.route()),
            Err(error) => warn!(instance = %self.name, error = %error, "Reload skipped"),
        }
    }

    fn stop(&self) {
        if let Ok(mut walker) = lock_state(&self.patrol, &self.name) {
            walker.stop();
        }
    }

    fn device_attached(&self, device_uuid: &str) {
        if let Ok(mut walker) = lock_state(&self.patrol, &self.name) {
            walker.attach(device_uuid);
        }
    }

    fn device_detached(&self, device_uuid: &str) {
        if let Ok(mut walker) = lock_state(&self.patrol, &self.name) {
            walker.detach(device_uuid);
        }
    }

    fn as_iv(&self) -> Option<&dyn IvJobController> {
        Some(self)
    }
}

impl IvJobController for PokemonIvJobController {
    fn queue(&self) -> Vec<Sighting> {
        self.controller.queue()
    }

    fn add_pokemon(&self, sighting: &Sighting) {
        self.controller.handle_sighting(sighting);
    }

    fn got_iv(&self, sighting: &Sighting) {
        self.controller.handle_iv(sighting);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{context, square_area};
    use crate::JobError;
    use scanmatrix_core::{Coordinate, IvList};

    fn create_test_controller() -> PokemonIvJobController {
        let ctx = context("IV-A", InstanceType::PokemonIv, square_area()).with_iv_list(IvList {
            name: "rares".to_string(),
            pokemon: vec![201, 147],
        });
        PokemonIvJobController::new(ctx).unwrap()
    }

    #[test]
    fn test_requires_iv_list() {
        let result = PokemonIvJobController::new(context(
            "IV-A",
            InstanceType::PokemonIv,
            square_area(),
        ));
        assert!(matches!(
            result,
            Err(JobError::Core(CoreError::MissingLookup(_)))
        ));
    }

    #[test]
    fn test_queue_drives_tasks_then_patrol() {
        let controller = create_test_controller();
        let iv: &dyn IvJobController = controller.as_iv().unwrap();
        iv.add_pokemon(&Sighting::new("e1", 147, Coordinate::new(0.5, 0.5)));
        iv.add_pokemon(&Sighting::new("e2", 201, Coordinate::new(0.4, 0.4)));
        assert_eq!(iv.queue().len(), 2);

        assert!(matches!(
            controller.get_task("dev-1", None),
            Task::ScanIv { ref encounter_id, .. } if encounter_id == "e2"
        ));
        iv.got_iv(&Sighting::new("e1", 147, Coordinate::new(0.5, 0.5)).with_iv(10, 10, 10));
        assert!(iv.queue().is_empty());
        assert!(matches!(
            controller.get_task("dev-1", None),
            Task::ScanPokemon { .. }
        ));
        assert_eq!(controller.status(), "IV: 0/100 queued, 1 IV/h");
    }

    #[test]
    fn test_stop_idles_even_with_queue() {
        let controller = create_test_controller();
        controller.add_pokemon(&Sighting::new("e1", 201, Coordinate::new(0.5, 0.5)));
        controller.stop();
        assert_eq!(controller.get_task("dev-1", None), Task::Idle);
        assert_eq!(controller.status(), "Stopped");
    }
}
