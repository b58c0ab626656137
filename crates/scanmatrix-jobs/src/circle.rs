use std::sync::{Arc, Mutex};

use scanmatrix_core::{Area, InstanceType, Task};
use tracing::{info, warn};

use crate::route::{lock_state, RouteWalker};
use crate::{JobContext, JobController, JobResult};

/// Patrols a fixed route of points, handing each device the next one.
///
/// Serves `circle_pokemon`, `circle_raid` and the reserved `smart_circle_raid`,
/// which behaves as a plain raid circle until its own routing lands.
pub struct CircleJobController {
    name: String,
    instance_type: InstanceType,
    min_level: u8,
    max_level: u8,
    area: Area,
    state: Mutex<RouteWalker>,
}

impl CircleJobController {
    pub fn new(ctx: JobContext) -> JobResult<Self> {
        ctx.expect_shape()?;
        let route = ctx.area.route();

        info!(
            instance = %ctx.instance.name,
            points = route.len(),
            "Circle job controller ready"
        );

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

    fn raids(&self) -> bool {
        matches!(
            self.instance_type,
            InstanceType::CircleRaid | InstanceType::SmartCircleRaid
        )
    }
}

impl JobController for CircleJobController {
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
            Some(step) if self.raids() => Task::ScanRaid {
                coordinate: step.coordinate,
                min_level: self.min_level,
                max_level: self.max_level,
            },
            Some(step) => Task::ScanPokemon {
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
                "{} devices, lap {}, point {}/{}",
                walker.device_count(),
                walker.laps() + 1,
                walker.position() + 1,
                walker.len()
            ),
            Err(error) => format!("Error: {error}"),
        }
    }

    fn reload(&self) {
        match lock_state(&self.state, &self.name) {
            Ok(mut walker) => {
                walker.rebuild(self.area.route());
                let devices = walker.device_count();
                info!(instance = %self.name, devices, "Circle route reloaded");
            }
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{context, route_area, square_area};

    #[test]
    fn test_circle_pokemon_walks_route() {
        let controller =
            CircleJobController::new(context("Circle-A", InstanceType::CirclePokemon, route_area(2)))
                .unwrap();

        let first = controller.get_task("dev-1", None);
        let second = controller.get_task("dev-2", None);
        let third = controller.get_task("dev-1", None);

        assert!(matches!(first, Task::ScanPokemon { .. }));
        assert_ne!(first, second);
        assert_eq!(first, third);
    }

    #[test]
    fn test_circle_raid_hands_out_raid_tasks() {
        let controller =
            CircleJobController::new(context("Raids", InstanceType::CircleRaid, route_area(1)))
                .unwrap();
        assert!(matches!(controller.get_task("dev-1", None), Task::ScanRaid { .. }));

        let smart =
            CircleJobController::new(context("Smart", InstanceType::SmartCircleRaid, route_area(1)))
                .unwrap();
        assert!(matches!(smart.get_task("dev-1", None), Task::ScanRaid { .. }));
    }

    #[test]
    fn test_circle_rejects_polygon_area() {
        let result =
            CircleJobController::new(context("Circle-A", InstanceType::CirclePokemon, square_area()));
        assert!(result.is_err());
    }

    #[test]
    fn test_stop_is_idempotent_and_idles_devices() {
        let controller =
            CircleJobController::new(context("Circle-A", InstanceType::CirclePokemon, route_area(3)))
                .unwrap();
        controller.stop();
        controller.stop();

        assert_eq!(controller.get_task("dev-1", None), Task::Idle);
        assert_eq!(controller.status(), "Stopped");
    }

    #[test]
    fn test_reload_keeps_devices_and_restarts_route() {
        let controller =
            CircleJobController::new(context("Circle-A", InstanceType::CirclePokemon, route_area(3)))
                .unwrap();
        controller.device_attached("dev-1");
        controller.get_task("dev-1", None);
        controller.get_task("dev-1", None);

        controller.reload();

        assert!(controller.status().starts_with("1 devices, lap 1, point 1/3"));
    }
}
