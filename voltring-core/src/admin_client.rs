//! HTTP client for the administration service.

use crate::error::PlantError;
use crate::types::PlantInfo;
use reqwest::StatusCode;
use tracing::info;

pub struct AdminClient {
    base_url: String,
    http: reqwest::Client,
}

impl AdminClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        let base_url = base_url.into();
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            http: reqwest::Client::new(),
        }
    }

    /// Register this plant. On success the administration server answers
    /// with the plants registered before us; a duplicate id yields the
    /// distinct [`PlantError::RegistrationConflict`] so the operator can
    /// pick another one.
    pub async fn register(&self, info: &PlantInfo) -> Result<Vec<PlantInfo>, PlantError> {
        let url = format!("{}/plants", self.base_url);
        info!("registering plant {} with {}", info.plant_id, url);
        let response = self.http.post(&url).json(info).send().await?;
        match response.status() {
            StatusCode::CREATED | StatusCode::OK => {
                let plants: Vec<PlantInfo> = response.json().await?;
                info!(
                    "plant {} registered; {} other plants known",
                    info.plant_id,
                    plants.len()
                );
                Ok(plants)
            }
            StatusCode::CONFLICT => Err(PlantError::RegistrationConflict(info.plant_id)),
            status => Err(PlantError::RegistrationRejected(format!(
                "unexpected status {status}"
            ))),
        }
    }
}
