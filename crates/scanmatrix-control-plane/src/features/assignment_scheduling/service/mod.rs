use crate::features::instance_orchestration::service::{AssignmentHook, InstanceOrchestrator};
use crate::features::observability::controller::ObservabilityController;
use crate::features::observability::service::TriggerSource;
use crate::features::storage::repo::ScanRepository;
use crate::shared::error::{ControlPlaneError, ControlPlaneResult};
use crate::shared::types::{Assignment, Device};
use async_trait::async_trait;
use chrono::NaiveDate;
use scanmatrix_core::clock::{self, SECONDS_PER_DAY};
use scanmatrix_core::AssignmentTarget;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

#[derive(Debug, Default)]
struct SchedulerState {
    assignments: Vec<Assignment>,
    /// Seconds since midnight at the previous tick; `None` until seeded.
    last_second: Option<u32>,
    /// Local date at the previous tick.
    last_date: Option<NaiveDate>,
}

/// Assignments fired by one clock tick. Each one evaluates on its own task,
/// so a stalled reassignment never holds up the next tick.
#[derive(Debug)]
pub struct TickOutcome {
    pub fired: usize,
    evaluations: Vec<JoinHandle<usize>>,
}

impl TickOutcome {
    /// Wait for every fired assignment. Returns how many devices moved.
    pub async fn settled(self) -> usize {
        let mut moved = 0;
        for evaluation in self.evaluations {
            match evaluation.await {
                Ok(count) => moved += count,
                Err(err) => warn!(error = %err, "Assignment evaluation did not finish"),
            }
        }
        moved
    }
}

/// Moves devices between instances on clock triggers and completion signals.
pub struct AssignmentScheduler {
    repo: Arc<dyn ScanRepository>,
    orchestrator: Arc<InstanceOrchestrator>,
    metrics: Arc<ObservabilityController>,
    state: Mutex<SchedulerState>,
    startup_passes: AtomicU64,
}

impl AssignmentScheduler {
    pub fn new(
        repo: Arc<dyn ScanRepository>,
        orchestrator: Arc<InstanceOrchestrator>,
        metrics: Arc<ObservabilityController>,
    ) -> Self {
        Self {
            repo,
            orchestrator,
            metrics,
            state: Mutex::new(SchedulerState::default()),
            startup_passes: AtomicU64::new(0),
        }
    }

    /// Replace the list with the stored assignments. Invalid rows are skipped.
    pub async fn load(&self) -> ControlPlaneResult<usize> {
        let stored = self.repo.get_all_assignments().await?;
        let mut assignments = Vec::with_capacity(stored.len());
        for assignment in stored {
            match assignment.validate() {
                Ok(()) => assignments.push(assignment),
                Err(err) => {
                    warn!(assignment = assignment.id, error = %err, "Skipping invalid assignment")
                }
            }
        }

        let count = assignments.len();
        self.state.lock().await.assignments = assignments;
        info!(assignments = count, "Assignments loaded");
        Ok(count)
    }

    /// Empty the list and forget the watermark.
    pub async fn clear(&self) {
        let mut state = self.state.lock().await;
        state.assignments.clear();
        state.last_second = None;
        state.last_date = None;
    }

    pub async fn assignments(&self) -> Vec<Assignment> {
        let mut assignments = self.state.lock().await.assignments.clone();
        assignments.sort_by_key(|assignment| assignment.id);
        assignments
    }

    pub async fn add_assignment(&self, assignment: Assignment) -> ControlPlaneResult<()> {
        assignment.validate()?;

        let mut state = self.state.lock().await;
        if state.assignments.iter().any(|a| a.id == assignment.id) {
            return Err(ControlPlaneError::InvalidRequest(format!(
                "assignment {} already exists",
                assignment.id
            )));
        }
        info!(
            assignment = assignment.id,
            instance = %assignment.instance_name,
            time = assignment.time,
            "Assignment added"
        );
        state.assignments.push(assignment);
        Ok(())
    }

    /// Delete then add. Callers holding the old assignment must re-fetch.
    pub async fn edit_assignment(
        &self,
        old_id: u32,
        assignment: Assignment,
    ) -> ControlPlaneResult<()> {
        assignment.validate()?;
        self.delete_assignment(old_id).await?;
        self.add_assignment(assignment).await
    }

    pub async fn delete_assignment(&self, id: u32) -> ControlPlaneResult<()> {
        let mut state = self.state.lock().await;
        let before = state.assignments.len();
        state.assignments.retain(|assignment| assignment.id != id);
        if state.assignments.len() == before {
            return Err(ControlPlaneError::AssignmentNotFound(id));
        }
        info!(assignment = id, "Assignment deleted");
        Ok(())
    }

    pub async fn delete_all(&self) -> usize {
        let mut state = self.state.lock().await;
        let count = state.assignments.len();
        state.assignments.clear();
        count
    }

    pub fn startup_passes(&self) -> u64 {
        self.startup_passes.load(Ordering::SeqCst)
    }

    /// One clock tick at the current local time.
    pub async fn tick(self: &Arc<Self>) -> TickOutcome {
        let started = Instant::now();
        let (today, now) = clock::local_now();
        let outcome = self.tick_at(today, now).await;
        self.metrics.record_tick(started.elapsed().as_secs_f64());
        outcome
    }

    /// Advance the watermark to `now` and fire the clock triggers crossed
    /// since the previous tick. Reassignments run on spawned tasks; the
    /// returned outcome can be awaited but does not have to be.
    pub async fn tick_at(self: &Arc<Self>, today: NaiveDate, now: u32) -> TickOutcome {
        let due = self.due_at(today, now).await;

        let mut evaluations = Vec::with_capacity(due.len());
        for assignment in due {
            self.metrics.record_trigger(TriggerSource::Clock);
            info!(
                assignment = assignment.id,
                instance = %assignment.instance_name,
                time = assignment.time,
                "Clock assignment triggered"
            );
            let scheduler = Arc::clone(self);
            evaluations.push(tokio::spawn(async move {
                match scheduler.trigger_assignment(&assignment, None, false).await {
                    Ok(moved) => moved,
                    Err(err) => {
                        warn!(assignment = assignment.id, error = %err, "Assignment trigger failed");
                        0
                    }
                }
            }));
        }

        TickOutcome {
            fired: evaluations.len(),
            evaluations,
        }
    }

    /// Clock rules crossed between the watermark and `now`.
    async fn due_at(&self, today: NaiveDate, now: u32) -> Vec<Assignment> {
        let mut state = self.state.lock().await;
        let last_date = state.last_date.replace(today);
        let Some(watermark) = state.last_second.replace(now) else {
            debug!(now, "Scheduler watermark seeded");
            return Vec::new();
        };

        if watermark > now && last_date == Some(today) {
            // Clock stepped back within the day. Hold the watermark so the
            // span already fired is not fired again.
            debug!(watermark, now, "Local clock behind watermark");
            state.last_second = Some(watermark);
            return Vec::new();
        }

        let clock_rules = state
            .assignments
            .iter()
            .filter(|a| a.enabled && !a.is_completion_trigger());

        if watermark <= now {
            return clock_rules
                .filter(|a| watermark < a.time && a.time <= now && a.matches_date(today))
                .cloned()
                .collect();
        }

        // Midnight passed: finish yesterday, then start today.
        let yesterday = today.pred_opt();
        debug!(watermark, now, "Scheduler crossed midnight");
        clock_rules
            .filter(|a| {
                let tail =
                    a.time > watermark && yesterday.map_or(false, |day| a.matches_date(day));
                let head = a.time <= now && a.matches_date(today);
                tail || head
            })
            .cloned()
            .collect()
    }

    /// A controller finished its pass: fire zero-time assignments sourced on it.
    /// Returns how many devices moved.
    pub async fn instance_controller_done(&self, instance_name: &str) -> usize {
        let (today, _) = clock::local_now();
        let due: Vec<Assignment> = self
            .state
            .lock()
            .await
            .assignments
            .iter()
            .filter(|a| {
                a.enabled
                    && a.is_completion_trigger()
                    && a.source_instance_name
                        .as_deref()
                        .map_or(true, |source| source == instance_name)
                    && a.matches_date(today)
            })
            .cloned()
            .collect();

        let mut moved = 0;
        for assignment in &due {
            self.metrics.record_trigger(TriggerSource::Completion);
            match self
                .trigger_assignment(assignment, Some(instance_name), false)
                .await
            {
                Ok(count) => moved += count,
                Err(err) => {
                    warn!(assignment = assignment.id, error = %err, "Completion trigger failed")
                }
            }
        }
        info!(instance = %instance_name, assignments = due.len(), moved, "Completion handled");
        moved
    }

    /// Fire a stored assignment now, outside its schedule.
    pub async fn trigger_by_id(&self, id: u32, force: bool) -> ControlPlaneResult<usize> {
        let assignment = self
            .state
            .lock()
            .await
            .assignments
            .iter()
            .find(|a| a.id == id)
            .cloned()
            .ok_or(ControlPlaneError::AssignmentNotFound(id))?;
        self.metrics.record_trigger(TriggerSource::Manual);
        info!(assignment = id, force, "Manual assignment trigger");
        self.trigger_assignment(&assignment, None, force).await
    }

    /// Apply `assignment` to its resolved devices. Returns how many moved.
    pub async fn trigger_assignment(
        &self,
        assignment: &Assignment,
        triggering_instance: Option<&str>,
        force: bool,
    ) -> ControlPlaneResult<usize> {
        let devices = self.resolve_devices(assignment, force).await?;
        if devices.is_empty() {
            debug!(assignment = assignment.id, "Assignment resolved no devices");
            return Ok(0);
        }

        let target = assignment.instance_name.as_str();
        let mut moved = 0;
        for device in devices {
            let current = device.instance_name.as_deref();
            if current == Some(target) {
                continue;
            }

            let source_ok = assignment
                .source_instance_name
                .as_deref()
                .map_or(true, |source| current == Some(source));
            let triggering_ok = triggering_instance.map_or(true, |name| current == Some(name));
            if !(force || (source_ok && triggering_ok)) {
                continue;
            }

            match self.orchestrator.reassign_device(&device.uuid, target).await {
                Ok(()) => moved += 1,
                Err(err) => {
                    warn!(device = %device.uuid, instance = %target, error = %err, "Reassignment failed")
                }
            }
        }
        Ok(moved)
    }

    /// Registry copies win over storage so decisions see in-flight moves.
    async fn resolve_devices(
        &self,
        assignment: &Assignment,
        force: bool,
    ) -> ControlPlaneResult<Vec<Device>> {
        let uuids = match assignment.target() {
            AssignmentTarget::Device(uuid) => vec![uuid.to_string()],
            AssignmentTarget::Group(group) => match self.repo.get_device_group_by_name(group).await? {
                Some(group) => group.devices,
                None => {
                    warn!(group = %group, assignment = assignment.id, "Unknown device group");
                    Vec::new()
                }
            },
            AssignmentTarget::Unspecified if force => {
                return Ok(self.orchestrator.list_devices().await);
            }
            AssignmentTarget::Unspecified => Vec::new(),
        };

        let mut devices = Vec::with_capacity(uuids.len());
        let mut missing = Vec::new();
        for uuid in uuids {
            match self.orchestrator.get_device(&uuid).await {
                Some(device) => devices.push(device),
                None => missing.push(uuid),
            }
        }
        if !missing.is_empty() {
            devices.extend(self.repo.get_devices_by_uuids(&missing).await?);
        }
        Ok(devices)
    }

    /// Startup pass at the current local time.
    pub async fn setup(&self) -> usize {
        let (today, now) = clock::local_now();
        self.setup_at(today, now).await
    }

    /// Place every unassigned device using the latest source-less assignment
    /// already due today. Returns how many devices moved.
    pub async fn setup_at(&self, today: NaiveDate, now: u32) -> usize {
        self.startup_passes.fetch_add(1, Ordering::SeqCst);

        let candidates: Vec<Assignment> = self
            .state
            .lock()
            .await
            .assignments
            .iter()
            .filter(|a| {
                a.enabled
                    && a.source_instance_name.is_none()
                    && (a.is_completion_trigger() || a.time <= now)
                    && a.matches_date(today)
            })
            .cloned()
            .collect();
        if candidates.is_empty() {
            return 0;
        }

        let mut groups: HashMap<String, Vec<String>> = HashMap::new();
        for assignment in &candidates {
            if let AssignmentTarget::Group(name) = assignment.target() {
                if groups.contains_key(name) {
                    continue;
                }
                let members = match self.repo.get_device_group_by_name(name).await {
                    Ok(group) => group.map(|g| g.devices).unwrap_or_default(),
                    Err(err) => {
                        warn!(group = %name, error = %err, "Failed to load device group");
                        Vec::new()
                    }
                };
                groups.insert(name.to_string(), members);
            }
        }

        let mut moved = 0;
        for device in self.orchestrator.list_devices().await {
            if device.instance_name.is_some() {
                continue;
            }
            let chosen = candidates
                .iter()
                .filter(|a| match a.target() {
                    AssignmentTarget::Device(uuid) => uuid == device.uuid,
                    AssignmentTarget::Group(name) => groups
                        .get(name)
                        .map_or(false, |members| members.contains(&device.uuid)),
                    AssignmentTarget::Unspecified => false,
                })
                .max_by_key(|a| a.time);
            let Some(assignment) = chosen else {
                continue;
            };

            self.metrics.record_trigger(TriggerSource::Startup);
            match self
                .orchestrator
                .reassign_device(&device.uuid, &assignment.instance_name)
                .await
            {
                Ok(()) => moved += 1,
                Err(err) => warn!(
                    device = %device.uuid,
                    assignment = assignment.id,
                    error = %err,
                    "Startup placement failed"
                ),
            }
        }

        if moved > 0 {
            info!(moved, "Startup pass placed devices");
        }
        moved
    }
}

#[async_trait]
impl AssignmentHook for AssignmentScheduler {
    async fn on_devices_released(&self) {
        self.setup().await;
    }

    async fn on_instance_done(&self, instance_name: &str) {
        self.instance_controller_done(instance_name).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::lookups::repo::StaticTimezoneLookup;
    use crate::features::lookups::service::LookupService;
    use crate::features::storage::repo::InMemoryScanRepository;
    use crate::shared::types::{DeviceGroup, Geofence, Instance, InstanceType, IvList};
    use proptest::prelude::*;
    use scanmatrix_core::GeofenceKind;
    use scanmatrix_jobs::JobControllerRegistry;
    use serde_json::json;
    use std::time::Duration;

    /// Storage whose writes for one device never complete.
    struct StallingRepository {
        inner: Arc<InMemoryScanRepository>,
        stalled_uuid: String,
    }

    #[async_trait]
    impl ScanRepository for StallingRepository {
        async fn get_all_instances(&self) -> ControlPlaneResult<Vec<Instance>> {
            self.inner.get_all_instances().await
        }

        async fn get_all_devices(&self) -> ControlPlaneResult<Vec<Device>> {
            self.inner.get_all_devices().await
        }

        async fn get_device_by_uuid(&self, uuid: &str) -> ControlPlaneResult<Option<Device>> {
            self.inner.get_device_by_uuid(uuid).await
        }

        async fn get_devices_by_uuids(&self, uuids: &[String]) -> ControlPlaneResult<Vec<Device>> {
            self.inner.get_devices_by_uuids(uuids).await
        }

        async fn update_device(&self, device: Device) -> ControlPlaneResult<()> {
            if device.uuid == self.stalled_uuid {
                std::future::pending::<()>().await;
            }
            self.inner.update_device(device).await
        }

        async fn get_all_assignments(&self) -> ControlPlaneResult<Vec<Assignment>> {
            self.inner.get_all_assignments().await
        }

        async fn get_geofence_by_name(&self, name: &str) -> ControlPlaneResult<Option<Geofence>> {
            self.inner.get_geofence_by_name(name).await
        }

        async fn get_iv_list_by_name(&self, name: &str) -> ControlPlaneResult<Option<IvList>> {
            self.inner.get_iv_list_by_name(name).await
        }

        async fn get_device_group_by_name(
            &self,
            name: &str,
        ) -> ControlPlaneResult<Option<DeviceGroup>> {
            self.inner.get_device_group_by_name(name).await
        }
    }

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 10, d).unwrap()
    }

    fn create_test_repo() -> Arc<InMemoryScanRepository> {
        let repo = Arc::new(InMemoryScanRepository::new());
        repo.insert_geofence(Geofence {
            name: "route".to_string(),
            kind: GeofenceKind::Circle,
            area: json!([{"lat": 0.1, "lon": 0.1}, {"lat": 0.2, "lon": 0.2}]),
        })
        .unwrap();
        for name in ["Day", "Night"] {
            repo.insert_instance(
                Instance::new(name, InstanceType::CirclePokemon).with_geofence("route"),
            )
            .unwrap();
        }
        repo.insert_device(Device::new("dev-1").with_instance("Day"))
            .unwrap();
        repo.insert_device(Device::new("dev-2").with_instance("Day"))
            .unwrap();
        repo.insert_device(Device::new("dev-3")).unwrap();
        repo.insert_device_group(DeviceGroup {
            name: "crew".to_string(),
            devices: vec!["dev-1".to_string(), "dev-2".to_string()],
        })
        .unwrap();
        repo
    }

    async fn create_test_scheduler(repo: Arc<dyn ScanRepository>) -> Arc<AssignmentScheduler> {
        let metrics = ObservabilityController::create().unwrap();
        let lookups = Arc::new(LookupService::new(
            Arc::clone(&repo),
            Arc::new(StaticTimezoneLookup::default()),
        ));
        let orchestrator = Arc::new(InstanceOrchestrator::new(
            Arc::clone(&repo),
            lookups,
            JobControllerRegistry::with_builtin(),
            Arc::clone(&metrics),
            100,
        ));
        orchestrator.start().await.unwrap();
        Arc::new(AssignmentScheduler::new(repo, orchestrator, metrics))
    }

    /// Tick and wait for the fired assignments. Returns how many fired.
    async fn tick(scheduler: &Arc<AssignmentScheduler>, today: NaiveDate, now: u32) -> usize {
        let outcome = scheduler.tick_at(today, now).await;
        let fired = outcome.fired;
        outcome.settled().await;
        fired
    }

    async fn instance_of(scheduler: &AssignmentScheduler, uuid: &str) -> Option<String> {
        scheduler
            .orchestrator
            .get_device(uuid)
            .await
            .and_then(|device| device.instance_name)
    }

    #[tokio::test]
    async fn test_clock_trigger_fires_once() {
        let scheduler = create_test_scheduler(create_test_repo()).await;
        scheduler
            .add_assignment(Assignment::for_device(1, "dev-1", "Night").at(28_800))
            .await
            .unwrap();

        assert_eq!(tick(&scheduler, day(19), 28_795).await, 0);
        assert_eq!(tick(&scheduler, day(19), 28_800).await, 1);
        assert_eq!(instance_of(&scheduler, "dev-1").await.as_deref(), Some("Night"));
        assert_eq!(tick(&scheduler, day(19), 28_800).await, 0);
        assert_eq!(tick(&scheduler, day(19), 28_805).await, 0);
    }

    #[tokio::test]
    async fn test_first_tick_only_seeds() {
        let scheduler = create_test_scheduler(create_test_repo()).await;
        scheduler
            .add_assignment(Assignment::for_device(1, "dev-1", "Night").at(100))
            .await
            .unwrap();

        assert_eq!(tick(&scheduler, day(19), 50_000).await, 0);
        assert_eq!(instance_of(&scheduler, "dev-1").await.as_deref(), Some("Day"));
    }

    #[tokio::test]
    async fn test_midnight_rollover_covers_both_days() {
        let scheduler = create_test_scheduler(create_test_repo()).await;
        scheduler
            .add_assignment(Assignment::for_device(1, "dev-1", "Night").at(86_395).on(day(19)))
            .await
            .unwrap();
        scheduler
            .add_assignment(Assignment::for_device(2, "dev-2", "Night").at(3))
            .await
            .unwrap();

        tick(&scheduler, day(19), 86_390).await;
        assert_eq!(tick(&scheduler, day(20), 5).await, 2);
        assert_eq!(instance_of(&scheduler, "dev-1").await.as_deref(), Some("Night"));
        assert_eq!(instance_of(&scheduler, "dev-2").await.as_deref(), Some("Night"));
        assert_eq!(tick(&scheduler, day(20), 10).await, 0);
    }

    #[tokio::test]
    async fn test_daily_rule_fires_once_per_day() {
        let scheduler = create_test_scheduler(create_test_repo()).await;
        scheduler
            .add_assignment(Assignment::for_group(1, "crew", "Night").at(28_800))
            .await
            .unwrap();

        let mut fired = 0;
        tick(&scheduler, day(18), 0).await;
        for d in 18..21 {
            for now in (0..SECONDS_PER_DAY).step_by(3_600).map(|s| s + 1) {
                fired += tick(&scheduler, day(d), now).await;
            }
        }
        assert_eq!(fired, 3);
    }

    #[tokio::test]
    async fn test_dated_rule_only_fires_on_its_day() {
        let scheduler = create_test_scheduler(create_test_repo()).await;
        scheduler
            .add_assignment(Assignment::for_device(1, "dev-1", "Night").at(600).on(day(20)))
            .await
            .unwrap();

        tick(&scheduler, day(19), 500).await;
        assert_eq!(tick(&scheduler, day(19), 700).await, 0);
        tick(&scheduler, day(20), 500).await;
        assert_eq!(tick(&scheduler, day(20), 700).await, 1);
    }

    #[tokio::test]
    async fn test_zero_time_rule_ignores_clock() {
        let scheduler = create_test_scheduler(create_test_repo()).await;
        scheduler
            .add_assignment(Assignment::for_device(1, "dev-1", "Night").with_source("Day"))
            .await
            .unwrap();

        tick(&scheduler, day(19), 86_000).await;
        for now in [0, 1, 43_200, 86_399] {
            assert_eq!(tick(&scheduler, day(20), now).await, 0);
        }
        assert_eq!(instance_of(&scheduler, "dev-1").await.as_deref(), Some("Day"));

        assert_eq!(scheduler.instance_controller_done("Night").await, 0);
        assert_eq!(scheduler.instance_controller_done("Day").await, 1);
        assert_eq!(instance_of(&scheduler, "dev-1").await.as_deref(), Some("Night"));
    }

    #[tokio::test]
    async fn test_trigger_respects_source_filter() {
        let scheduler = create_test_scheduler(create_test_repo()).await;
        let rule = Assignment::for_group(1, "crew", "Night").with_source("Elsewhere");

        assert_eq!(scheduler.trigger_assignment(&rule, None, false).await.unwrap(), 0);
        assert_eq!(scheduler.trigger_assignment(&rule, None, true).await.unwrap(), 2);
        assert_eq!(scheduler.trigger_assignment(&rule, None, true).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_forced_rule_without_target_moves_everyone() {
        let scheduler = create_test_scheduler(create_test_repo()).await;
        let mut rule = Assignment::for_device(1, "unused", "Day");
        rule.device_uuid = None;

        assert_eq!(scheduler.trigger_assignment(&rule, None, false).await.unwrap(), 0);
        // dev-1 and dev-2 are already on Day.
        assert_eq!(scheduler.trigger_assignment(&rule, None, true).await.unwrap(), 1);
        assert_eq!(instance_of(&scheduler, "dev-3").await.as_deref(), Some("Day"));
    }

    #[tokio::test]
    async fn test_assignment_list_mutations() {
        let scheduler = create_test_scheduler(create_test_repo()).await;
        let rule = Assignment::for_device(1, "dev-1", "Night").at(100);
        scheduler.add_assignment(rule.clone()).await.unwrap();

        assert!(matches!(
            scheduler.add_assignment(rule.clone()).await,
            Err(ControlPlaneError::InvalidRequest(_))
        ));
        assert!(matches!(
            scheduler.add_assignment(Assignment::for_device(2, "dev-1", "")).await,
            Err(ControlPlaneError::CoreError(_))
        ));

        scheduler
            .edit_assignment(1, Assignment::for_device(5, "dev-1", "Day").at(200))
            .await
            .unwrap();
        let ids: Vec<u32> = scheduler.assignments().await.iter().map(|a| a.id).collect();
        assert_eq!(ids, vec![5]);

        assert!(matches!(
            scheduler.delete_assignment(1).await,
            Err(ControlPlaneError::AssignmentNotFound(1))
        ));
        assert!(matches!(
            scheduler.edit_assignment(1, rule).await,
            Err(ControlPlaneError::AssignmentNotFound(1))
        ));
        assert_eq!(scheduler.delete_all().await, 1);
        assert!(scheduler.assignments().await.is_empty());
    }

    #[tokio::test]
    async fn test_load_skips_invalid_rows() {
        let repo = create_test_repo();
        repo.insert_assignment(Assignment::for_device(1, "dev-1", "Night").at(10))
            .unwrap();
        repo.insert_assignment(Assignment::for_device(2, "dev-1", "Night").at(SECONDS_PER_DAY))
            .unwrap();
        let scheduler = create_test_scheduler(repo).await;

        assert_eq!(scheduler.load().await.unwrap(), 1);
        scheduler.clear().await;
        assert!(scheduler.assignments().await.is_empty());
    }

    #[tokio::test]
    async fn test_startup_pass_prefers_latest_due_rule() {
        let scheduler = create_test_scheduler(create_test_repo()).await;
        scheduler
            .add_assignment(Assignment::for_device(1, "dev-3", "Day"))
            .await
            .unwrap();
        scheduler
            .add_assignment(Assignment::for_device(2, "dev-3", "Night").at(3_600))
            .await
            .unwrap();
        scheduler
            .add_assignment(Assignment::for_device(3, "dev-3", "Day").at(80_000))
            .await
            .unwrap();

        assert_eq!(scheduler.setup_at(day(19), 7_200).await, 1);
        assert_eq!(instance_of(&scheduler, "dev-3").await.as_deref(), Some("Night"));
        // Assigned devices are left alone.
        assert_eq!(scheduler.setup_at(day(19), 7_200).await, 0);
        assert_eq!(scheduler.startup_passes(), 2);
    }

    #[tokio::test]
    async fn test_hook_reruns_startup_pass() {
        let scheduler = create_test_scheduler(create_test_repo()).await;
        scheduler.on_devices_released().await;
        assert_eq!(scheduler.startup_passes(), 1);
    }

    #[tokio::test]
    async fn test_rollover_from_last_second_of_day() {
        let scheduler = create_test_scheduler(create_test_repo()).await;
        scheduler
            .add_assignment(Assignment::for_device(1, "dev-1", "Night").at(86_399))
            .await
            .unwrap();
        scheduler
            .add_assignment(Assignment::for_device(2, "dev-2", "Night").at(30))
            .await
            .unwrap();

        tick(&scheduler, day(19), 86_390).await;
        assert_eq!(tick(&scheduler, day(19), 86_399).await, 1);
        assert_eq!(instance_of(&scheduler, "dev-1").await.as_deref(), Some("Night"));
        // 86399 -> 0 must not replay the trigger at 86399.
        assert_eq!(tick(&scheduler, day(20), 0).await, 0);
        assert_eq!(instance_of(&scheduler, "dev-2").await.as_deref(), Some("Day"));
        assert_eq!(tick(&scheduler, day(20), 60).await, 1);
        assert_eq!(instance_of(&scheduler, "dev-2").await.as_deref(), Some("Night"));
        assert_eq!(tick(&scheduler, day(20), 120).await, 0);
    }

    #[tokio::test]
    async fn test_clock_stepping_back_does_not_refire() {
        let scheduler = create_test_scheduler(create_test_repo()).await;
        scheduler
            .add_assignment(Assignment::for_group(1, "crew", "Night").at(5_000))
            .await
            .unwrap();

        tick(&scheduler, day(19), 4_000).await;
        assert_eq!(tick(&scheduler, day(19), 7_200).await, 1);
        // Daylight saving fall-back: the same local hour runs twice.
        assert_eq!(tick(&scheduler, day(19), 3_600).await, 0);
        assert_eq!(tick(&scheduler, day(19), 5_400).await, 0);
        assert_eq!(tick(&scheduler, day(19), 7_300).await, 0);
        // The next local day still fires.
        assert_eq!(tick(&scheduler, day(20), 10).await, 0);
        assert_eq!(tick(&scheduler, day(20), 5_000).await, 1);
    }

    #[tokio::test]
    async fn test_stalled_write_does_not_block_later_ticks() {
        let repo: Arc<dyn ScanRepository> = Arc::new(StallingRepository {
            inner: create_test_repo(),
            stalled_uuid: "dev-2".to_string(),
        });
        let scheduler = create_test_scheduler(repo).await;
        scheduler
            .add_assignment(Assignment::for_device(1, "dev-2", "Night").at(200))
            .await
            .unwrap();
        scheduler
            .add_assignment(Assignment::for_device(2, "dev-3", "Night").at(300))
            .await
            .unwrap();

        scheduler.tick_at(day(19), 100).await;
        let stalled = scheduler.tick_at(day(19), 200).await;
        assert_eq!(stalled.fired, 1);

        let outcome = tokio::time::timeout(Duration::from_secs(1), scheduler.tick_at(day(19), 300))
            .await
            .unwrap();
        assert_eq!(outcome.fired, 1);
        let moved = tokio::time::timeout(Duration::from_secs(1), outcome.settled())
            .await
            .unwrap();
        assert_eq!(moved, 1);
        assert_eq!(instance_of(&scheduler, "dev-3").await.as_deref(), Some("Night"));

        let outcome = tokio::time::timeout(Duration::from_secs(1), scheduler.tick_at(day(19), 400))
            .await
            .unwrap();
        assert_eq!(outcome.fired, 0);

        let still_stalled = tokio::time::timeout(Duration::from_millis(50), stalled.settled()).await;
        assert!(still_stalled.is_err());
    }

    proptest! {
        // Rules that resolve no devices never move anything and never fail.
        #[test]
        fn test_empty_device_set_is_noop(
            id in 1u32..1_000,
            force in any::<bool>(),
            use_group in any::<bool>(),
            time in 0u32..SECONDS_PER_DAY,
        ) {
            let moved = tokio_test::block_on(async {
                let scheduler = create_test_scheduler(create_test_repo()).await;
                let rule = if use_group {
                    Assignment::for_group(id, "nobody", "Night").at(time)
                } else {
                    Assignment::for_device(id, "ghost", "Night").at(time)
                };
                scheduler.trigger_assignment(&rule, Some("Day"), force).await
            });
            prop_assert_eq!(moved.unwrap(), 0);
        }
    }
}
