//! Core domain types for the voltring energy market

use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

/// Unique identifier of a power plant. Id 0 is reserved as the "no plant"
/// sentinel used in placeholder bids.
pub type PlantId = u32;

/// Connection and identity information for one power plant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlantInfo {
    pub plant_id: PlantId,
    pub address: String,
    pub port: u16,
    /// Millisecond timestamp assigned when the plant first started. The ring
    /// is ordered by this value so every member derives the same topology.
    pub registration_time: u64,
}

impl PlantInfo {
    pub fn new(plant_id: PlantId, address: impl Into<String>, port: u16, registration_time: u64) -> Self {
        Self {
            plant_id,
            address: address.into(),
            port,
            registration_time,
        }
    }

    /// Check the structural invariants: positive id, non-blank address,
    /// non-zero port.
    pub fn validate(&self) -> Result<(), String> {
        if self.plant_id == 0 {
            return Err("plant id must be positive".to_string());
        }
        if self.address.trim().is_empty() {
            return Err("address must not be blank".to_string());
        }
        if self.port == 0 {
            return Err("port must be in 1..=65535".to_string());
        }
        Ok(())
    }
}

impl std::fmt::Display for PlantInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "plant {} at {}:{}", self.plant_id, self.address, self.port)
    }
}

/// A request for a specific amount of energy, broadcast by the renewable
/// provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnergyRequest {
    pub request_id: String,
    #[serde(rename = "amountKWh")]
    pub amount_kwh: u32,
    pub timestamp: u64,
}

impl EnergyRequest {
    pub fn new(request_id: impl Into<String>, amount_kwh: u32, timestamp: u64) -> Self {
        Self {
            request_id: request_id.into(),
            amount_kwh,
            timestamp,
        }
    }
}

/// A bid in an election.
///
/// `plant_id == 0` marks the placeholder "no bid yet" value that any real bid
/// beats.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Bid {
    pub plant_id: PlantId,
    pub price: f64,
}

impl Bid {
    /// The placeholder bid that every election starts from.
    pub const NONE: Bid = Bid {
        plant_id: 0,
        price: f64::MAX,
    };

    pub fn new(plant_id: PlantId, price: f64) -> Self {
        Self { plant_id, price }
    }

    pub fn is_placeholder(&self) -> bool {
        self.plant_id == 0
    }

    /// Strict better-bid relation: lower price wins; on equal prices the
    /// higher plant id wins. A placeholder never beats a real bid, and every
    /// real bid beats a placeholder. The relation is total over valid bids,
    /// which is what guarantees a unique election winner regardless of the
    /// order tokens traverse the ring.
    pub fn beats(&self, other: &Bid) -> bool {
        if self.is_placeholder() {
            return false;
        }
        if other.is_placeholder() {
            return true;
        }
        self.price < other.price || (self.price == other.price && self.plant_id > other.plant_id)
    }
}

/// A single CO2 reading produced by the simulated sensor.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Measurement {
    pub value: f64,
    pub timestamp: u64,
}

/// A batch of windowed CO2 averages published by one plant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PollutionBatch {
    pub plant_id: PlantId,
    /// When the plant retrieved the averages for publishing.
    pub list_computation_timestamp: u64,
    pub averages: Vec<f64>,
}

/// Current Unix timestamp in milliseconds.
pub fn unix_timestamp_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_millis() as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lower_price_beats_higher() {
        let cheap = Bid::new(1, 0.20);
        let pricey = Bid::new(2, 0.80);
        assert!(cheap.beats(&pricey));
        assert!(!pricey.beats(&cheap));
    }

    #[test]
    fn equal_price_goes_to_higher_plant_id() {
        let low_id = Bid::new(1, 0.50);
        let high_id = Bid::new(2, 0.50);
        assert!(high_id.beats(&low_id));
        assert!(!low_id.beats(&high_id));
    }

    #[test]
    fn placeholder_loses_to_everything() {
        let real = Bid::new(1, 0.99);
        assert!(real.beats(&Bid::NONE));
        assert!(!Bid::NONE.beats(&real));
        assert!(!Bid::NONE.beats(&Bid::NONE));
    }

    #[test]
    fn relation_is_antisymmetric_for_distinct_bids() {
        let a = Bid::new(3, 0.40);
        let b = Bid::new(7, 0.40);
        assert!(a.beats(&b) != b.beats(&a));
    }

    #[test]
    fn plant_info_serialization_uses_camel_case() {
        let info = PlantInfo::new(4, "localhost", 7204, 1700000000000);
        let json = serde_json::to_string(&info).unwrap();
        assert!(json.contains("\"plantId\":4"));
        assert!(json.contains("\"registrationTime\":1700000000000"));
        let parsed: PlantInfo = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, info);
    }

    #[test]
    fn energy_request_round_trips() {
        let req = EnergyRequest::new("er-1", 5000, 42);
        let json = serde_json::to_string(&req).unwrap();
        assert!(json.contains("\"amountKWh\":5000"));
        let parsed: EnergyRequest = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, req);
    }

    #[test]
    fn plant_info_validation_rejects_bad_fields() {
        assert!(PlantInfo::new(0, "localhost", 7000, 1).validate().is_err());
        assert!(PlantInfo::new(1, "  ", 7000, 1).validate().is_err());
        assert!(PlantInfo::new(1, "localhost", 0, 1).validate().is_err());
        assert!(PlantInfo::new(1, "localhost", 7000, 1).validate().is_ok());
    }
}
