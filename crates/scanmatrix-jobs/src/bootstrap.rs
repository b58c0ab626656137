use std::sync::{Arc, Mutex};

use scanmatrix_core::{Area, InstanceType, Task};
use tracing::{info, warn};

use crate::route::{lock_state, RouteWalker};
use crate::{CompletionSignal, JobContext, JobController, JobResult};

#[derive(Debug)]
struct BootstrapState {
    walker: RouteWalker,
    visited: usize,
    completed: bool,
}

/// Visits every point of its area once, then signals completion so that a
/// zero-time assignment can move its devices on to the main scan.
pub struct BootstrapJobController {
    name: String,
    instance_type: InstanceType,
    min_level: u8,
    max_level: u8,
    fast_mode: bool,
    area: Area,
    completion: CompletionSignal,
    state: Mutex<BootstrapState>,
}

impl BootstrapJobController {
    pub fn new(ctx: JobContext) -> JobResult<Self> {
        ctx.expect_shape()?;
        let route = ctx.area.route();

        info!(
            instance = %ctx.instance.name,
            points = route.len(),
            fast = ctx.instance.data.fast_bootstrap_mode,
            "Bootstrap job controller ready"
        );

        Ok(Self {
            name: ctx.instance.name,
            instance_type: ctx.instance.instance_type,
            min_level: ctx.instance.data.min_level,
            max_level: ctx.instance.data.max_level,
            fast_mode: ctx.instance.data.fast_bootstrap_mode,
            area: ctx.area,
            completion: ctx.completion,
            state: Mutex::new(BootstrapState {
                walker: RouteWalker::new(route),
                visited: 0,
                completed: false,
            }),
        })
    }

    pub fn construct(ctx: JobContext) -> JobResult<Arc<dyn JobController>> {
        Ok(Arc::new(Self::new(ctx)?))
    }
}

impl JobController for BootstrapJobController {
    fn instance_name(&self) -> &str {
        &self.name
    }

    fn instance_type(&self) -> &InstanceType {
        &self.instance_type
    }

    fn get_task(&self, device_uuid: &str, _account_username: Option<&str>) -> Task {
        let mut state = match lock_state(&self.state, &self.name) {
            Ok(state) => state,
            Err(error) => {
                warn!(instance = %self.name, device = %device_uuid, error = %error, "Handing out idle task");
                return Task::Idle;
            }
        };

        let Some(step) = state.walker.advance() else {
            return Task::Idle;
        };

        if !state.completed {
            state.visited += 1;
            if step.completes_lap {
                state.completed = true;
                info!(instance = %self.name, points = state.visited, "Bootstrap coverage complete");
                // Release the lock before notifying; the listener may call back in.
                drop(state);
                self.completion.signal(&self.name);
            }
        }

        // Fast mode lets any account level bootstrap.
        let min_level = if self.fast_mode { 0 } else { self.min_level };
        Task::ScanBootstrap {
            coordinate: step.coordinate,
            min_level,
            max_level: self.max_level,
        }
    }

    fn status(&self) -> String {
        match lock_state(&self.state, &self.name) {
            Ok(state) if state.walker.is_stopped() => "Stopped".to_string(),
            Ok(state) if state.completed => {
                format!("Done: {}/{}", state.walker.len(), state.walker.len())
            }
            Ok(state) => {
                let total = state.walker.len().max(1);
                format!(
                    "Bootstrapping: {}/{} ({:.1}%)",
                    state.visited,
                    state.walker.len(),
                    state.visited as f64 * 100.0 / total as f64
                )
            }
            Err(error) => format!("Error: {error}"),
        }
    }

    fn reload(&self) {
        match lock_state(&self.state, &self.name) {
            Ok(mut state) => {
                state.walker.rebuild(self.area.route());
                state.visited = 0;
                state.completed = false;
                info!(instance = %self.name, "Bootstrap coverage restarted");
            }
            Err(error) => warn!(instance = %self.name, error = %error, "Reload skipped"),
        }
    }

    fn stop(&self) {
        if let Ok(mut state) = lock_state(&self.state, &self.name) {
            state.walker.stop();
        }
    }

    fn device_attached(&self, device_uuid: &str) {
        if let Ok(mut state) = lock_state(&self.state, &self.name) {
            state.walker.attach(device_uuid);
        }
    }

    fn device_detached(&self, device_uuid: &str) {
        if let Ok(mut state) = lock_state(&self.state, &self.name) {
            state.walker.detach(device_uuid);
        }
    }
}
