//! Voltring power-plant runtime.
//!
//! A plant process competes in ring-based lowest-bid elections for broadcast
//! energy requests, publishes windowed pollution averages over MQTT, and keeps
//! a membership view of its peers synchronized through presence announcements
//! and a central administration service.

pub mod admin_client;
pub mod config;
pub mod election;
pub mod error;
pub mod intake;
pub mod plant;
pub mod pollution;
pub mod processor;
pub mod registry;
pub mod ring;
pub mod rpc;
pub mod types;

pub use admin_client::AdminClient;
pub use config::PlantConfig;
pub use election::ElectionManager;
pub use error::PlantError;
pub use plant::PowerPlant;
pub use processor::RequestProcessor;
pub use registry::PlantRegistry;
pub use types::{Bid, EnergyRequest, PlantInfo, PollutionBatch};
