use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, NaiveDate, Utc};
use scanmatrix_core::clock::{date_at_offset, hour_at_offset};
use scanmatrix_core::{Area, InstanceType, Task};
use tracing::{debug, info, warn};

use crate::route::{lock_state, RouteWalker};
use crate::{CompletionSignal, JobContext, JobController, JobResult};

#[derive(Debug)]
struct QuestState {
    walker: RouteWalker,
    spins: HashMap<String, u32>,
    completed_passes: u64,
    /// Local date at the instance's timezone when the current pass began.
    local_date: NaiveDate,
}

/// Sweeps quest stops across its polygons once per pass.
///
/// Accounts that reach the spin limit get idle tasks so the transport can
/// switch them; finishing a pass raises the completion signal. A new local
/// day restarts the pass and forgets spin counts.
pub struct AutoQuestJobController {
    name: String,
    instance_type: InstanceType,
    min_level: u8,
    max_level: u8,
    spin_limit: Option<u32>,
    timezone_offset: i32,
    area: Area,
    completion: CompletionSignal,
    state: Mutex<QuestState>,
}

impl AutoQuestJobController {
    pub fn new(ctx: JobContext) -> JobResult<Self> {
        ctx.expect_shape()?;
        let route = ctx.area.route();
        let timezone_offset = ctx.timezone_offset.unwrap_or(0);

        info!(
            instance = %ctx.instance.name,
            stops = route.len(),
            timezone_offset,
            "Auto quest job controller ready"
        );

        Ok(Self {
            name: ctx.instance.name,
            instance_type: ctx.instance.instance_type,
            min_level: ctx.instance.data.min_level,
            max_level: ctx.instance.data.max_level,
            spin_limit: ctx.instance.data.spin_limit,
            timezone_offset,
            area: ctx.area,
            completion: ctx.completion,
            state: Mutex::new(QuestState {
                walker: RouteWalker::new(route),
                spins: HashMap::new(),
                completed_passes: 0,
                local_date: date_at_offset(&Utc::now(), timezone_offset),
            }),
        })
    }

    pub fn construct(ctx: JobContext) -> JobResult<Arc<dyn JobController>> {
        Ok(Arc::new(Self::new(ctx)?))
    }

    pub fn local_hour(&self) -> u32 {
        hour_at_offset(&Utc::now(), self.timezone_offset)
    }

    /// Next quest stop for a device checking in at `at`.
    pub fn task_at(
        &self,
        device_uuid: &str,
        account_username: Option<&str>,
        at: DateTime<Utc>,
    ) -> Task {
        let mut state = match lock_state(&self.state, &self.name) {
            Ok(state) => state,
            Err(error) => {
                warn!(instance = %self.name, device = %device_uuid, error = %error, "Handing out idle task");
                return Task::Idle;
            }
        };
        if state.walker.is_stopped() {
            return Task::Idle;
        }

        let today = date_at_offset(&at, self.timezone_offset);
        if today != state.local_date {
            state.local_date = today;
            state.spins.clear();
            state.walker.reset();
            info!(instance = %self.name, date = %today, "New local day, quest pass restarted");
        }

        if let (Some(limit), Some(account)) = (self.spin_limit, account_username) {
            let spins = state.spins.entry(account.to_string()).or_insert(0);
            if *spins >= limit {
                debug!(instance = %self.name, account, "Spin limit reached");
                return Task::Idle;
            }
            *spins += 1;
        }

        let Some(step) = state.walker.advance() else {
            return Task::Idle;
        };

        if step.completes_lap {
            state.completed_passes += 1;
            info!(instance = %self.name, passes = state.completed_passes, "Quest pass complete");
            drop(state);
            self.completion.signal(&self.name);
        }

        Task::ScanQuest {
            coordinate: step.coordinate,
            min_level: self.min_level,
            max_level: self.max_level,
        }
    }
}

impl JobController for AutoQuestJobController {
    fn instance_name(&self) -> &str {
        &self.name
    }

    fn instance_type(&self) -> &InstanceType {
        &self.instance_type
    }

    fn get_task(&self, device_uuid: &str, account_username: Option<&str>) -> Task {
        self.task_at(device_uuid, account_username, Utc::now())
    }

    fn status(&self) -> String {
        match lock_state(&self.state, &self.name) {
            Ok(state) if state.walker.is_stopped() => "Stopped".to_string(),
            Ok(state) => format!(
                "Quests: stop {}/{}, passes {}, local hour {:02}",
                state.walker.position(),
                state.walker.len(),
                state.completed_passes,
                self.local_hour()
            ),
            Err(error) => format!("Error: {error}"),
        }
    }

    fn reload(&self) {
        match lock_state(&self.state, &self.name) {
            Ok(mut state) => {
                state.walker.rebuild(self.area.route());
                state.spins.clear();
                info!(instance = %self.name, "Quest route reloaded");
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{route_area, square_area};
    use chrono::TimeZone;
    use scanmatrix_core::Instance;

    fn create_test_controller(
        spin_limit: Option<u32>,
    ) -> (
        AutoQuestJobController,
        tokio::sync::mpsc::UnboundedReceiver<String>,
    ) {
        let (signal, rx) = CompletionSignal::channel();
        let mut instance = Instance::new("AutoQuest-A", InstanceType::AutoQuest);
        instance.data.spin_limit = spin_limit;
        let ctx = JobContext::new(instance, square_area(), signal).with_timezone_offset(3_600);
        (AutoQuestJobController::new(ctx).unwrap(), rx)
    }

    #[test]
    fn test_pass_completion_signals() {
        let (controller, mut rx) = create_test_controller(None);
        for _ in 0..4 {
            assert!(matches!(
                controller.get_task("dev-1", Some("acct")),
                Task::ScanQuest { .. }
            ));
        }
        assert_eq!(rx.try_recv().unwrap(), "AutoQuest-A");
        assert!(controller.status().contains("passes 1"));
    }

    #[test]
    fn test_spin_limit_idles_account() {
        let (controller, _rx) = create_test_controller(Some(2));
        assert!(matches!(
            controller.get_task("dev-1", Some("acct")),
            Task::ScanQuest { .. }
        ));
        controller.get_task("dev-1", Some("acct"));
        assert_eq!(controller.get_task("dev-1", Some("acct")), Task::Idle);
        assert!(matches!(
            controller.get_task("dev-1", Some("fresh")),
            Task::ScanQuest { .. }
        ));

        controller.reload();
        assert!(matches!(
            controller.get_task("dev-1", Some("acct")),
            Task::ScanQuest { .. }
        ));
    }

    #[test]
    fn test_local_midnight_resets_spins_and_pass() {
        let (controller, _rx) = create_test_controller(Some(1));
        // Offset +1h: 22:30 UTC is 23:30 local, 23:30 UTC is the next local day.
        let evening = Utc.with_ymd_and_hms(2026, 10, 19, 22, 30, 0).unwrap();
        let after_midnight = Utc.with_ymd_and_hms(2026, 10, 19, 23, 30, 0).unwrap();

        assert!(matches!(
            controller.task_at("dev-1", Some("acct"), evening),
            Task::ScanQuest { .. }
        ));
        controller.task_at("dev-2", Some("other"), evening);
        assert_eq!(controller.task_at("dev-1", Some("acct"), evening), Task::Idle);
        assert!(controller.status().contains("stop 2/4"));

        assert!(matches!(
            controller.task_at("dev-1", Some("acct"), after_midnight),
            Task::ScanQuest { .. }
        ));
        assert!(controller.status().contains("stop 1/4"));
        assert_eq!(
            controller.task_at("dev-1", Some("acct"), after_midnight),
            Task::Idle
        );
    }

    #[test]
    fn test_stopped_controller_stays_idle_across_days() {
        let (controller, _rx) = create_test_controller(None);
        controller.stop();
        let tomorrow = Utc::now() + chrono::Duration::days(1);
        assert_eq!(controller.task_at("dev-1", None, tomorrow), Task::Idle);
        assert_eq!(controller.status(), "Stopped");
    }

    #[test]
    fn test_local_hour_follows_offset() {
        let (controller, _rx) = create_test_controller(None);
        let expected = hour_at_offset(&Utc::now(), 3_600);
        let hour = controller.local_hour();
        // Tolerate an hour boundary between the two reads.
        assert!(hour == expected || hour == (expected + 1) % 24);
    }

    #[test]
    fn test_rejects_route_area() {
        let (signal, _rx) = CompletionSignal::channel();
        let ctx = JobContext::new(
            Instance::new("AutoQuest-A", InstanceType::AutoQuest),
            route_area(3),
            signal,
        );
        assert!(AutoQuestJobController::new(ctx).is_err());
    }
}
