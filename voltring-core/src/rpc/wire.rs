//! Wire messages exchanged between plants.

use crate::types::{Bid, PlantId, PlantInfo};
use serde::{Deserialize, Serialize};

/// Token circulating the ring during an election.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ElectionToken {
    pub initiator_id: PlantId,
    pub request_id: String,
    pub best_bid: Bid,
    #[serde(rename = "energyAmountKWh")]
    pub energy_amount_kwh: u32,
}

/// Final outcome of an election, circulated once around the ring and
/// terminated by the plant that initiated the circulation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WinnerAnnouncement {
    pub request_id: String,
    pub winning_plant_id: PlantId,
    pub winning_price: f64,
    pub initiator_id: PlantId,
}

/// Request messages a plant accepts from its peers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum PeerMessage {
    #[serde(rename = "ANNOUNCE_PRESENCE")]
    AnnouncePresence(PlantInfo),
    #[serde(rename = "ELECTION_TOKEN")]
    ElectionToken(ElectionToken),
    #[serde(rename = "WINNER_ANNOUNCEMENT")]
    WinnerAnnouncement(WinnerAnnouncement),
}

impl PeerMessage {
    pub fn to_line(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn from_line(line: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(line)
    }
}

/// Acknowledgement answered for every peer request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ack {
    pub success: bool,
    pub message: String,
}

impl Ack {
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
        }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
        }
    }

    pub fn to_line(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn from_line(line: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(line)
    }
}
