//! Error types for the plant runtime.
//!
//! Startup failures that the operator can act on (`PortInUse`,
//! `RegistrationConflict`) get their own variants so the plant binary can
//! re-prompt instead of terminating.

use crate::types::PlantId;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PlantError {
    #[error("configuration invalid: {0}")]
    ConfigurationInvalid(String),

    #[error("peer RPC port {0} is already in use")]
    PortInUse(u16),

    #[error("plant id {0} is already registered with the administration server")]
    RegistrationConflict(PlantId),

    #[error("registration rejected by the administration server: {0}")]
    RegistrationRejected(String),

    #[error("administration server unreachable: {0}")]
    AdminUnreachable(#[from] reqwest::Error),

    #[error("broker unavailable: {0}")]
    BrokerUnavailable(#[from] rumqttc::ClientError),

    #[error("peer {0} unreachable: {1}")]
    PeerUnreachable(PlantId, String),

    #[error("malformed message: {0}")]
    MalformedMessage(#[from] serde_json::Error),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}
