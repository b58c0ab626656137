use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use scanmatrix_core::InstanceType;
use tracing::{debug, warn};

use crate::auto_quest::AutoQuestJobController;
use crate::bootstrap::BootstrapJobController;
use crate::circle::CircleJobController;
use crate::features::pokemon_iv::PokemonIvJobController;
use crate::spawnpoint::FindUnknownSpawnpointJobController;
use crate::{JobContext, JobController, JobError, JobResult};

pub type JobConstructor =
    Arc<dyn Fn(JobContext) -> JobResult<Arc<dyn JobController>> + Send + Sync>;

/// Maps instance types to constructors. New variants can be registered
/// without touching the orchestrator.
#[derive(Clone)]
pub struct JobControllerRegistry {
    constructors: Arc<RwLock<HashMap<InstanceType, JobConstructor>>>,
}

impl JobControllerRegistry {
    pub fn new() -> Self {
        Self {
            constructors: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Registry preloaded with every built-in variant.
    pub fn with_builtin() -> Self {
        let registry = Self::new();
        let circle: JobConstructor = Arc::new(CircleJobController::construct);
        for instance_type in [
            InstanceType::CirclePokemon,
            InstanceType::CircleRaid,
            InstanceType::SmartCircleRaid,
        ] {
            registry.register(instance_type, circle.clone());
        }
        registry.register(
            InstanceType::AutoQuest,
            Arc::new(AutoQuestJobController::construct),
        );
        registry.register(
            InstanceType::PokemonIv,
            Arc::new(PokemonIvJobController::construct),
        );
        registry.register(
            InstanceType::Bootstrap,
            Arc::new(BootstrapJobController::construct),
        );
        registry.register(
            InstanceType::FindUnknownSpawnpoint,
            Arc::new(FindUnknownSpawnpointJobController::construct),
        );
        registry
    }

    /// Replaces any constructor already registered for the type.
    pub fn register(&self, instance_type: InstanceType, constructor: JobConstructor) {
        match self.constructors.write() {
            Ok(mut constructors) => {
                debug!(instance_type = %instance_type, "Registered job constructor");
                constructors.insert(instance_type, constructor);
            }
            Err(_) => warn!(instance_type = %instance_type, "Job registry lock poisoned"),
        }
    }

    pub fn build(&self, ctx: JobContext) -> JobResult<Arc<dyn JobController>> {
        let constructor = {
            let constructors = self
                .constructors
                .read()
                .map_err(|_| JobError::LockPoisoned("job registry".to_string()))?;
            constructors
                .get(&ctx.instance.instance_type)
                .cloned()
                .ok_or_else(|| JobError::Unregistered(ctx.instance.instance_type.to_string()))?
        };
        constructor(ctx)
    }

    pub fn is_registered(&self, instance_type: &InstanceType) -> bool {
        self.constructors
            .read()
            .map(|constructors| constructors.contains_key(instance_type))
            .unwrap_or(false)
    }

    pub fn registered_types(&self) -> Vec<InstanceType> {
        let mut types: Vec<InstanceType> = self
            .constructors
            .read()
            .map(|constructors| constructors.keys().cloned().collect())
            .unwrap_or_default();
        types.sort_by(|a, b| a.as_str().cmp(b.as_str()));
        types
    }
}

impl Default for JobControllerRegistry {
    fn default() -> Self {
        Self::with_builtin()
    }
}
