pub mod config;
pub mod features;
pub mod shared;

use std::sync::Arc;

use config::ControlPlaneConfig;
use features::assignment_scheduling::controller::AssignmentSchedulingController;
use features::assignment_scheduling::service::AssignmentScheduler;
use features::instance_orchestration::controller::OrchestrationController;
use features::instance_orchestration::service::{AssignmentHook, InstanceOrchestrator};
use features::lookups::repo::StaticTimezoneLookup;
use features::lookups::service::LookupService;
use features::observability::controller::ObservabilityController;
use features::storage::repo::ScanRepository;
use scanmatrix_jobs::JobControllerRegistry;
use shared::error::ControlPlaneResult;
use tokio::task::JoinHandle;
use tokio::time;
use tracing::{debug, info};

/// One fully wired control plane: orchestrator, scheduler and their shared
/// lookups and metrics. Construct as many as needed; nothing here is global.
pub struct ControlPlane {
    config: ControlPlaneConfig,
    repo: Arc<dyn ScanRepository>,
    lookups: Arc<LookupService>,
    metrics: Arc<ObservabilityController>,
    orchestration: Arc<OrchestrationController>,
    scheduling: Arc<AssignmentSchedulingController>,
}

impl ControlPlane {
    pub fn new(
        repo: Arc<dyn ScanRepository>,
        config: ControlPlaneConfig,
    ) -> ControlPlaneResult<Self> {
        Self::with_registry(repo, config, JobControllerRegistry::with_builtin())
    }

    /// Use a registry carrying extra job controller types.
    pub fn with_registry(
        repo: Arc<dyn ScanRepository>,
        config: ControlPlaneConfig,
        registry: JobControllerRegistry,
    ) -> ControlPlaneResult<Self> {
        let timezones = Arc::new(StaticTimezoneLookup::new(config.timezones.clone()));
        let lookups = Arc::new(LookupService::new(Arc::clone(&repo), timezones));
        let metrics = ObservabilityController::create()?;

        let orchestrator = Arc::new(InstanceOrchestrator::new(
            Arc::clone(&repo),
            Arc::clone(&lookups),
            registry,
            Arc::clone(&metrics),
            config.iv_queue_limit,
        ));
        let scheduler = Arc::new(AssignmentScheduler::new(
            Arc::clone(&repo),
            Arc::clone(&orchestrator),
            Arc::clone(&metrics),
        ));
        let hook: Arc<dyn AssignmentHook> = scheduler.clone();
        orchestrator.set_assignment_hook(Arc::downgrade(&hook));

        Ok(Self {
            orchestration: Arc::new(OrchestrationController::new(orchestrator)),
            scheduling: Arc::new(AssignmentSchedulingController::new(
                scheduler,
                config.tick_interval,
            )),
            config,
            repo,
            lookups,
            metrics,
        })
    }

    /// Build controllers, start completion forwarding, then start the
    /// scheduler. Returns how many controllers built.
    pub async fn start(&self) -> ControlPlaneResult<usize> {
        let built = self.orchestration.service().start().await?;
        // Forwarding outlives stop/start cycles and ends with the orchestrator.
        if self.orchestration.spawn_completion_forwarding().await.is_some() {
            debug!("Completion forwarding started");
        }
        let assignments = self.scheduling.start().await?;

        info!(controllers = built, assignments, "Control plane started");
        Ok(built)
    }

    pub async fn stop(&self) {
        self.scheduling.stop().await;
        self.orchestration.service().stop().await;
        info!("Control plane stopped");
    }

    /// Rebuild everything from storage, lookups included.
    pub async fn reload(&self) -> ControlPlaneResult<usize> {
        self.scheduling.stop().await;
        let built = self.orchestration.service().reload_all().await?;
        self.scheduling.start().await?;
        Ok(built)
    }

    /// Periodically log every instance status and refresh fleet gauges.
    pub fn spawn_status_reporting(&self) -> JoinHandle<()> {
        let orchestration = Arc::clone(&self.orchestration);
        let interval = self.config.status_interval;
        tokio::spawn(async move {
            let mut ticker = time::interval(interval);
            loop {
                ticker.tick().await;

                let statuses = orchestration.list_instances().await;
                for status in &statuses {
                    info!(
                        instance = %status.name,
                        instance_type = %status.instance_type,
                        devices = status.device_count,
                        status = %status.status,
                        "Instance status"
                    );
                }
                orchestration.service().refresh_fleet_metrics().await;
            }
        })
    }

    pub fn config(&self) -> &ControlPlaneConfig {
        &self.config
    }

    pub fn repository(&self) -> &Arc<dyn ScanRepository> {
        &self.repo
    }

    pub fn lookups(&self) -> &Arc<LookupService> {
        &self.lookups
    }

    pub fn metrics(&self) -> &Arc<ObservabilityController> {
        &self.metrics
    }

    pub fn orchestration(&self) -> &Arc<OrchestrationController> {
        &self.orchestration
    }

    pub fn scheduling(&self) -> &Arc<AssignmentSchedulingController> {
        &self.scheduling
    }
}
