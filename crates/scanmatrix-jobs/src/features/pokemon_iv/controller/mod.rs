use scanmatrix_core::{Sighting, Task};
use tracing::{debug, warn};

use crate::features::pokemon_iv::service::{Admission, PokemonIvService};

/// Absorbs queue faults so the job controller surface stays infallible.
pub struct PokemonIvController {
    instance_name: String,
    service: PokemonIvService,
}

impl PokemonIvController {
    pub fn new(instance_name: impl Into<String>, service: PokemonIvService) -> Self {
        Self {
            instance_name: instance_name.into(),
            service,
        }
    }

    pub fn handle_sighting(&self, sighting: &Sighting) {
        match self.service.admit(sighting) {
            Ok(Admission::Queued) => debug!(
                instance = %self.instance_name,
                encounter = %sighting.encounter_id,
                pokemon = sighting.pokemon_id,
                "Queued for IV check"
            ),
            Ok(_) => {}
            Err(error) => warn!(instance = %self.instance_name, error = %error, "Failed to queue sighting"),
        }
    }

    pub fn handle_iv(&self, sighting: &Sighting) {
        if let Err(error) = self.service.record_iv(sighting) {
            warn!(instance = %self.instance_name, error = %error, "Failed to record IV result");
        }
    }

    pub fn next_task(&self, min_level: u8, max_level: u8) -> Option<Task> {
        match self.service.next() {
            Ok(next) => next.map(|sighting| Task::ScanIv {
                coordinate: sighting.coordinate,
                encounter_id: sighting.encounter_id,
                pokemon_id: sighting.pokemon_id,
                min_level,
                max_level,
            }),
            Err(error) => {
                warn!(instance = %self.instance_name, error = %error, "IV queue unavailable");
                None
            }
        }
    }

    pub fn queue(&self) -> Vec<Sighting> {
        self.service.queue().unwrap_or_else(|error| {
            warn!(instance = %self.instance_name, error = %error, "IV queue snapshot failed");
            Vec::new()
        })
    }

    pub fn status(&self) -> String {
        let queued = match self.service.queue() {
            Ok(queue) => queue.len(),
            Err(error) => return format!("Error: {error}"),
        };
        match self.service.ivs_per_hour() {
            Ok(rate) => format!(
                "IV: {queued}/{} queued, {rate} IV/h",
                self.service.limit()
            ),
            Err(error) => format!("Error: {error}"),
        }
    }

    pub fn reset(&self) {
        if let Err(error) = self.service.reset() {
            warn!(instance = %self.instance_name, error = %error, "IV queue reset failed");
        }
    }
}
