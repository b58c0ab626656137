use prometheus::{
    opts, Counter, CounterVec, Encoder, Gauge, Histogram, HistogramOpts, Registry, TextEncoder,
};

/// Prometheus metrics for the fleet. Each control plane owns its own registry.
pub struct ObservabilityRepository {
    registry: Registry,
    active_instance_count: Gauge,
    device_count: Gauge,
    controller_build_failures_total: Counter,
    device_reassignments_total: Counter,
    assignment_triggers_total: CounterVec,
    scheduler_tick_seconds: Histogram,
}

impl ObservabilityRepository {
    pub fn new() -> Result<Self, String> {
        let registry = Registry::new();

        let active_instance_count = Gauge::with_opts(opts!(
            "scanmatrix_active_instance_count",
            "Instances with a running job controller"
        ))
        .map_err(|e| e.to_string())?;
        let device_count = Gauge::with_opts(opts!(
            "scanmatrix_device_count",
            "Devices in the orchestrator registry"
        ))
        .map_err(|e| e.to_string())?;
        let controller_build_failures_total = Counter::with_opts(opts!(
            "scanmatrix_controller_build_failures_total",
            "Job controllers that failed to build"
        ))
        .map_err(|e| e.to_string())?;
        let device_reassignments_total = Counter::with_opts(opts!(
            "scanmatrix_device_reassignments_total",
            "Devices moved between instances"
        ))
        .map_err(|e| e.to_string())?;
        let assignment_triggers_total = CounterVec::new(
            opts!(
                "scanmatrix_assignment_triggers_total",
                "Assignments fired, by trigger"
            ),
            &["trigger"],
        )
        .map_err(|e| e.to_string())?;
        let scheduler_tick_seconds = Histogram::with_opts(HistogramOpts::new(
            "scanmatrix_scheduler_tick_seconds",
            "Assignment scheduler tick duration (seconds)",
        ))
        .map_err(|e| e.to_string())?;

        registry
            .register(Box::new(active_instance_count.clone()))
            .map_err(|e| e.to_string())?;
        registry
            .register(Box::new(device_count.clone()))
            .map_err(|e| e.to_string())?;
        registry
            .register(Box::new(controller_build_failures_total.clone()))
            .map_err(|e| e.to_string())?;
        registry
            .register(Box::new(device_reassignments_total.clone()))
            .map_err(|e| e.to_string())?;
        registry
            .register(Box::new(assignment_triggers_total.clone()))
            .map_err(|e| e.to_string())?;
        registry
            .register(Box::new(scheduler_tick_seconds.clone()))
            .map_err(|e| e.to_string())?;

        Ok(Self {
            registry,
            active_instance_count,
            device_count,
            controller_build_failures_total,
            device_reassignments_total,
            assignment_triggers_total,
            scheduler_tick_seconds,
        })
    }

    pub fn set_active_instance_count(&self, count: f64) {
        self.active_instance_count.set(count);
    }

    pub fn set_device_count(&self, count: f64) {
        self.device_count.set(count);
    }

    pub fn inc_controller_build_failures(&self) {
        self.controller_build_failures_total.inc();
    }

    pub fn inc_device_reassignments(&self) {
        self.device_reassignments_total.inc();
    }

    pub fn inc_assignment_trigger(&self, trigger: &str) {
        self.assignment_triggers_total
            .with_label_values(&[trigger])
            .inc();
    }

    pub fn observe_scheduler_tick(&self, seconds: f64) {
        self.scheduler_tick_seconds.observe(seconds);
    }

    pub fn device_reassignments(&self) -> f64 {
        self.device_reassignments_total.get()
    }

    pub fn render_metrics(&self) -> Result<String, String> {
        let mut buffer = Vec::new();
        let encoder = TextEncoder::new();
        let families = self.registry.gather();
        encoder
            .encode(&families, &mut buffer)
            .map_err(|e| e.to_string())?;
        String::from_utf8(buffer).map_err(|e| e.to_string())
    }
}
