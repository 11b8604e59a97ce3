//! In-memory repositories backing the administration service.

use parking_lot::Mutex;
use tracing::{info, warn};
use voltring_core::types::{PlantId, PlantInfo, PollutionBatch};

pub struct AppState {
    pub plants: PlantDirectory,
    pub measurements: MeasurementStore,
}

impl AppState {
    pub fn new() -> Self {
        Self {
            plants: PlantDirectory::default(),
            measurements: MeasurementStore::default(),
        }
    }
}

pub enum RegisterOutcome {
    /// Registration accepted; carries the plants registered before this one.
    Registered(Vec<PlantInfo>),
    Duplicate,
}

/// Registered plants, unique by id. Registration times are stored and echoed
/// back verbatim; the plants rely on them for ring ordering.
#[derive(Default)]
pub struct PlantDirectory {
    plants: Mutex<Vec<PlantInfo>>,
}

impl PlantDirectory {
    pub fn register(&self, plant: PlantInfo) -> RegisterOutcome {
        let mut plants = self.plants.lock();
        if plants.iter().any(|p| p.plant_id == plant.plant_id) {
            return RegisterOutcome::Duplicate;
        }
        let existing = plants.clone();
        info!(
            "registered plant {} ({} previously known)",
            plant.plant_id,
            existing.len()
        );
        plants.push(plant);
        RegisterOutcome::Registered(existing)
    }

    pub fn all(&self) -> Vec<PlantInfo> {
        self.plants.lock().clone()
    }

    pub fn find(&self, plant_id: PlantId) -> Option<PlantInfo> {
        self.plants
            .lock()
            .iter()
            .find(|p| p.plant_id == plant_id)
            .cloned()
    }
}

/// Pollution batches reported by the plants over the broker.
#[derive(Default)]
pub struct MeasurementStore {
    batches: Mutex<Vec<PollutionBatch>>,
}

impl MeasurementStore {
    pub fn add(&self, batch: PollutionBatch) {
        if batch.averages.is_empty() {
            warn!(
                "ignoring empty pollution batch from plant {}",
                batch.plant_id
            );
            return;
        }
        let mut batches = self.batches.lock();
        info!(
            "stored pollution batch from plant {}: {} averages at t={}",
            batch.plant_id,
            batch.averages.len(),
            batch.list_computation_timestamp
        );
        batches.push(batch);
    }

    pub fn len(&self) -> usize {
        self.batches.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.batches.lock().is_empty()
    }

    /// Overall CO2 average over the per-batch means of every batch whose
    /// computation timestamp falls in `[t1, t2]`. `None` when nothing
    /// matches.
    pub fn average_co2_between(&self, t1: u64, t2: u64) -> Option<f64> {
        let batches = self.batches.lock();
        let batch_means: Vec<f64> = batches
            .iter()
            .filter(|b| b.list_computation_timestamp >= t1 && b.list_computation_timestamp <= t2)
            .map(|b| b.averages.iter().sum::<f64>() / b.averages.len() as f64)
            .collect();
        if batch_means.is_empty() {
            return None;
        }
        Some(batch_means.iter().sum::<f64>() / batch_means.len() as f64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn plant(id: PlantId) -> PlantInfo {
        PlantInfo::new(id, "localhost", 7100 + id as u16, u64::from(id))
    }

    fn batch(plant_id: PlantId, timestamp: u64, averages: Vec<f64>) -> PollutionBatch {
        PollutionBatch {
            plant_id,
            list_computation_timestamp: timestamp,
            averages,
        }
    }

    #[test]
    fn registration_returns_previously_known_plants() {
        let directory = PlantDirectory::default();
        match directory.register(plant(1)) {
            RegisterOutcome::Registered(existing) => assert!(existing.is_empty()),
            RegisterOutcome::Duplicate => panic!("first registration rejected"),
        }
        match directory.register(plant(2)) {
            RegisterOutcome::Registered(existing) => {
                assert_eq!(existing.len(), 1);
                assert_eq!(existing[0].plant_id, 1);
            }
            RegisterOutcome::Duplicate => panic!("second registration rejected"),
        }
    }

    #[test]
    fn duplicate_plant_id_is_rejected() {
        let directory = PlantDirectory::default();
        directory.register(plant(1));
        assert!(matches!(
            directory.register(plant(1)),
            RegisterOutcome::Duplicate
        ));
        assert_eq!(directory.all().len(), 1);
    }

    #[test]
    fn find_returns_the_stored_registration_time() {
        let directory = PlantDirectory::default();
        directory.register(plant(3));
        let found = directory.find(3).unwrap();
        assert_eq!(found.registration_time, 3);
        assert!(directory.find(4).is_none());
    }

    #[test]
    fn co2_average_is_the_mean_of_batch_means() {
        let store = MeasurementStore::default();
        store.add(batch(1, 100, vec![10.0, 20.0])); // mean 15
        store.add(batch(2, 200, vec![45.0])); // mean 45
        store.add(batch(3, 999, vec![1000.0])); // outside the range

        let average = store.average_co2_between(50, 250).unwrap();
        assert!((average - 30.0).abs() < 1e-9);
    }

    #[test]
    fn co2_average_without_data_is_none() {
        let store = MeasurementStore::default();
        assert!(store.average_co2_between(0, 100).is_none());
        store.add(batch(1, 500, vec![10.0]));
        assert!(store.average_co2_between(0, 100).is_none());
    }

    #[test]
    fn empty_batches_are_ignored() {
        let store = MeasurementStore::default();
        store.add(batch(1, 100, vec![]));
        assert!(store.is_empty());
        store.add(batch(1, 100, vec![1.0]));
        assert_eq!(store.len(), 1);
    }
}
