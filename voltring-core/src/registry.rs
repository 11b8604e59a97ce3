//! Membership view and logical ring derivation.
//!
//! The registry owns the set of known peers. The ring over `others ∪ {self}`
//! is sorted by registration time (ties broken by plant id), so every plant
//! that shares the same membership derives the same order. Lookups go through
//! a cached sorted snapshot that mutations invalidate.

use crate::types::{PlantId, PlantInfo};
use parking_lot::{Mutex, RwLock};
use std::sync::Arc;
use tracing::{debug, warn};

pub struct PlantRegistry {
    self_info: PlantInfo,
    others: Mutex<Vec<PlantInfo>>,
    ring_cache: RwLock<Option<Arc<[PlantInfo]>>>,
}

impl PlantRegistry {
    pub fn new(self_info: PlantInfo) -> Self {
        Self {
            self_info,
            others: Mutex::new(Vec::new()),
            ring_cache: RwLock::new(None),
        }
    }

    pub fn self_info(&self) -> &PlantInfo {
        &self.self_info
    }

    pub fn self_id(&self) -> PlantId {
        self.self_info.plant_id
    }

    /// Merge the plant list obtained from the administration service at
    /// startup. Entries matching our own id and duplicates are ignored.
    pub fn add_initial(&self, initial: Vec<PlantInfo>) {
        let mut others = self.others.lock();
        for plant in initial {
            if plant.plant_id == self.self_info.plant_id {
                continue;
            }
            if others.iter().any(|p| p.plant_id == plant.plant_id) {
                continue;
            }
            others.push(plant);
        }
        drop(others);
        self.invalidate_cache();
    }

    /// Insert a single plant if it is new and not ourselves. Returns whether
    /// the registry changed.
    pub fn add(&self, plant: PlantInfo) -> bool {
        if plant.plant_id == self.self_info.plant_id {
            return false;
        }
        let mut others = self.others.lock();
        if others.iter().any(|p| p.plant_id == plant.plant_id) {
            return false;
        }
        debug!("registry: added {} ({} others known)", plant, others.len() + 1);
        others.push(plant);
        drop(others);
        self.invalidate_cache();
        true
    }

    /// Delete a plant by id; a no-op when absent.
    pub fn remove(&self, plant_id: PlantId) -> bool {
        let mut others = self.others.lock();
        let before = others.len();
        others.retain(|p| p.plant_id != plant_id);
        let removed = others.len() != before;
        drop(others);
        if removed {
            debug!("registry: removed plant {plant_id}");
            self.invalidate_cache();
        }
        removed
    }

    /// Point-in-time copy of the other known plants.
    pub fn snapshot(&self) -> Vec<PlantInfo> {
        self.others.lock().clone()
    }

    pub fn others_count(&self) -> usize {
        self.others.lock().len()
    }

    /// The successor of `current_plant_id` in the sorted ring. Wraps around
    /// at the end. An unknown id falls back to the ring head with a warning;
    /// a ring containing only ourselves yields ourselves.
    pub fn next_in_ring(&self, current_plant_id: PlantId) -> PlantInfo {
        let ring = self.ring();
        match ring.iter().position(|p| p.plant_id == current_plant_id) {
            Some(idx) => ring[(idx + 1) % ring.len()].clone(),
            None => {
                warn!("registry: plant {current_plant_id} not in ring, defaulting to ring head");
                ring[0].clone()
            }
        }
    }

    fn invalidate_cache(&self) {
        *self.ring_cache.write() = None;
    }

    /// The cached complete ring, rebuilt after a mutation. Never empty: self
    /// is always a member. The rebuild holds the membership lock so a
    /// concurrent mutation cannot leave a stale snapshot in the cache.
    fn ring(&self) -> Arc<[PlantInfo]> {
        if let Some(ring) = self.ring_cache.read().as_ref() {
            return ring.clone();
        }
        let others = self.others.lock();
        let mut all = others.clone();
        all.push(self.self_info.clone());
        all.sort_by(|a, b| {
            a.registration_time
                .cmp(&b.registration_time)
                .then(a.plant_id.cmp(&b.plant_id))
        });
        let ring: Arc<[PlantInfo]> = all.into();
        *self.ring_cache.write() = Some(ring.clone());
        drop(others);
        ring
    }
}
